//! S-expression reader.
//!
//! Turns source text into expression trees, attaching a [`Span`] to every
//! atom so later diagnostics can point back into the file. Positions are
//! global: the caller registers the file with the source map and passes the
//! returned base offset.
//!
//! Accepted syntax: lists `( … )` with an optional dotted tail, double
//! quoted strings with `\n \t \\ \"` escapes, `#t`/`#f`, `'x` as sugar for
//! `(quote x)`, `;` comments to end of line, numbers, and Unicode
//! identifiers (`λ`, `≔`, `⊕`, `∇`, …).

use guage_atom::Atom;
use guage_util::diagnostic::{Diagnostic, DiagnosticBuilder};
use guage_util::span::{BytePos, Span};

/// Streaming reader over one source file.
pub struct Reader<'src> {
    src: &'src str,
    pos: usize,
    base: BytePos,
}

impl<'src> Reader<'src> {
    /// `base` is the file's offset in the global byte space.
    pub fn new(src: &'src str, base: BytePos) -> Self {
        Self { src, pos: 0, base }
    }

    /// Read every top-level form.
    pub fn read_all(&mut self) -> Result<Vec<Atom>, Diagnostic> {
        let mut forms = Vec::new();
        while let Some(expr) = self.read_expr()? {
            forms.push(expr);
        }
        Ok(forms)
    }

    /// Read the next form, or `None` at end of input.
    pub fn read_expr(&mut self) -> Result<Option<Atom>, Diagnostic> {
        self.skip_trivia();
        if self.pos >= self.src.len() {
            return Ok(None);
        }
        match self.peek_char() {
            ')' => Err(self.error_at("unexpected `)`", self.pos, self.pos + 1)),
            '(' => self.read_list().map(Some),
            '"' => self.read_string().map(Some),
            '\'' => {
                let start = self.pos;
                self.pos += 1;
                let quoted = match self.read_expr()? {
                    Some(expr) => expr,
                    None => return Err(self.error_at("`'` at end of input", start, start + 1)),
                };
                let span = self.span(start, self.pos);
                let quote = Atom::symbol_at(guage_util::intern::Symbol::intern("quote"), span);
                Ok(Some(Atom::cons_at(
                    quote,
                    Atom::cons(quoted, Atom::nil()),
                    span,
                )))
            }
            _ => self.read_atom().map(Some),
        }
    }

    fn span(&self, start: usize, end: usize) -> Span {
        Span::new(self.base + start as u32, self.base + end as u32)
    }

    fn error_at(&self, message: &str, start: usize, end: usize) -> Diagnostic {
        DiagnosticBuilder::error(message)
            .code("E0001")
            .primary_span(self.span(start, end), "here")
            .build()
    }

    fn peek_char(&self) -> char {
        self.src[self.pos..].chars().next().unwrap_or('\0')
    }

    fn skip_trivia(&mut self) {
        let bytes = self.src.as_bytes();
        while self.pos < bytes.len() {
            match bytes[self.pos] {
                b' ' | b'\t' | b'\r' | b'\n' => self.pos += 1,
                b';' => {
                    while self.pos < bytes.len() && bytes[self.pos] != b'\n' {
                        self.pos += 1;
                    }
                }
                _ => break,
            }
        }
    }

    fn read_list(&mut self) -> Result<Atom, Diagnostic> {
        let start = self.pos;
        self.pos += 1; // consume '('
        let mut items: Vec<Atom> = Vec::new();
        let mut tail: Option<Atom> = None;

        loop {
            self.skip_trivia();
            if self.pos >= self.src.len() {
                return Err(self.error_at("unterminated list", start, start + 1));
            }
            if self.peek_char() == ')' {
                self.pos += 1;
                break;
            }
            // Dotted tail: `. expr )`.
            if self.peek_dot() {
                self.pos += 1;
                let expr = self
                    .read_expr()?
                    .ok_or_else(|| self.error_at("expected expression after `.`", start, self.pos))?;
                self.skip_trivia();
                if self.peek_char() != ')' {
                    return Err(self.error_at("expected `)` after dotted tail", start, self.pos + 1));
                }
                self.pos += 1;
                tail = Some(expr);
                break;
            }
            match self.read_expr()? {
                Some(expr) => items.push(expr),
                None => return Err(self.error_at("unterminated list", start, start + 1)),
            }
        }

        let span = self.span(start, self.pos);
        let mut list = tail.unwrap_or_else(Atom::nil);
        for item in items.into_iter().rev() {
            list = Atom::cons(item, list);
        }
        // The outermost pair carries the whole list's span.
        Ok(match list.pair() {
            Some((head, rest)) => Atom::cons_at(head.clone(), rest.clone(), span),
            None => list.with_span(span),
        })
    }

    /// A lone `.` followed by a delimiter.
    fn peek_dot(&self) -> bool {
        let bytes = self.src.as_bytes();
        bytes[self.pos] == b'.'
            && bytes
                .get(self.pos + 1)
                .map_or(true, |&b| is_delimiter(b))
    }

    fn read_string(&mut self) -> Result<Atom, Diagnostic> {
        let start = self.pos;
        self.pos += 1; // consume opening quote
        let mut text = String::new();
        let mut chars = self.src[self.pos..].char_indices();
        while let Some((off, c)) = chars.next() {
            match c {
                '"' => {
                    self.pos += off + 1;
                    return Ok(Atom::string_at(text, self.span(start, self.pos)));
                }
                '\\' => match chars.next() {
                    Some((_, 'n')) => text.push('\n'),
                    Some((_, 't')) => text.push('\t'),
                    Some((_, '\\')) => text.push('\\'),
                    Some((_, '"')) => text.push('"'),
                    Some((_, other)) => text.push(other),
                    None => break,
                },
                _ => text.push(c),
            }
        }
        Err(self.error_at("unterminated string", start, self.src.len()))
    }

    fn read_atom(&mut self) -> Result<Atom, Diagnostic> {
        let start = self.pos;
        let rest = &self.src[self.pos..];
        let end_off = rest
            .char_indices()
            .find(|&(_, c)| c.is_ascii() && is_delimiter(c as u8))
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        let token = &rest[..end_off];
        self.pos += end_off;
        let span = self.span(start, self.pos);

        Ok(match token {
            "#t" => Atom::bool_at(true, span),
            "#f" => Atom::bool_at(false, span),
            _ => {
                if looks_numeric(token) {
                    match token.parse::<f64>() {
                        Ok(n) => Atom::number_at(n, span),
                        Err(_) => {
                            return Err(self.error_at("malformed number", start, self.pos));
                        }
                    }
                } else {
                    Atom::symbol_at(guage_util::intern::Symbol::intern(token), span)
                }
            }
        })
    }
}

fn is_delimiter(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\r' | b'\n' | b'(' | b')' | b'"' | b';' | b'\'')
}

/// Numbers start with a digit, or a sign/point immediately followed by a
/// digit; everything else (including bare `+` and `-`) is an identifier.
fn looks_numeric(token: &str) -> bool {
    match token.as_bytes() {
        [d, ..] if d.is_ascii_digit() => true,
        [b'+' | b'-', d, ..] if d.is_ascii_digit() => true,
        [b'.', d, ..] if d.is_ascii_digit() => true,
        [b'+' | b'-', b'.', d, ..] if d.is_ascii_digit() => true,
        _ => false,
    }
}
