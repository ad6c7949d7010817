//! Source map over a virtual byte space.
//!
//! Files are registered once and live for the program lifetime. Each file
//! gets a base offset in a single global byte space (bases start at 1, so
//! position 0 means "no position"); a span's `lo` identifies both the file
//! (binary search over bases) and the offset within it. Line tables are
//! built at registration, line/column resolution is a binary search.

use super::{BytePos, Span};
use crate::error::{SourceMapError, SourceMapResult};

/// A registered source file.
pub struct SourceFile {
    filename: String,
    base: BytePos,
    source: String,
    /// Sorted byte offset of each line start, local to this file.
    line_starts: Vec<u32>,
    file_id: u16,
}

impl SourceFile {
    fn new(filename: String, source: String, base: BytePos, file_id: u16) -> Self {
        let mut line_starts = vec![0u32];
        for (i, b) in source.bytes().enumerate() {
            if b == b'\n' {
                line_starts.push(i as u32 + 1);
            }
        }
        Self {
            filename,
            base,
            source,
            line_starts,
            file_id,
        }
    }

    #[inline]
    pub fn filename(&self) -> &str {
        &self.filename
    }

    #[inline]
    pub fn base(&self) -> BytePos {
        self.base
    }

    #[inline]
    pub fn size(&self) -> u32 {
        self.source.len() as u32
    }

    #[inline]
    pub fn source(&self) -> &str {
        &self.source
    }

    #[inline]
    pub fn file_id(&self) -> u16 {
        self.file_id
    }

    #[inline]
    pub fn line_count(&self) -> usize {
        self.line_starts.len()
    }

    /// 0-based line index containing a file-local offset.
    fn find_line(&self, local: u32) -> usize {
        match self.line_starts.binary_search(&local) {
            Ok(idx) => idx,
            Err(insert) => insert - 1,
        }
    }

    /// Text of a 0-based line, without the trailing newline.
    pub fn line_text(&self, line_idx: usize) -> Option<&str> {
        let start = *self.line_starts.get(line_idx)? as usize;
        let end = self
            .line_starts
            .get(line_idx + 1)
            .map(|&next| {
                let mut end = next as usize;
                if end > start && self.source.as_bytes()[end - 1] == b'\n' {
                    end -= 1;
                }
                end
            })
            .unwrap_or(self.source.len());
        Some(&self.source[start..end])
    }
}

impl std::fmt::Debug for SourceFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceFile")
            .field("filename", &self.filename)
            .field("base", &self.base)
            .field("lines", &self.line_count())
            .finish()
    }
}

/// Full logical span, stored in the interner for the rare spans the inline
/// form cannot represent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SpanData {
    pub lo: BytePos,
    pub hi: BytePos,
    pub ctxt: u16,
    pub file_id: u16,
}

/// A position resolved to human coordinates. Line and column are 1-based;
/// line 0 means the position did not resolve.
#[derive(Clone, Copy, Debug)]
pub struct ResolvedPos<'a> {
    pub filename: &'a str,
    pub line: u32,
    pub column: u32,
    pub byte_offset: BytePos,
    pub file_id: u16,
}

impl ResolvedPos<'static> {
    /// The unresolvable position: line 0, `<unknown>` filename.
    pub fn unknown(byte_offset: BytePos) -> Self {
        ResolvedPos {
            filename: "<unknown>",
            line: 0,
            column: 0,
            byte_offset,
            file_id: 0,
        }
    }
}

/// A span resolved to start/end positions plus the source line text of the
/// start position.
#[derive(Clone, Copy, Debug)]
pub struct ResolvedSpan<'a> {
    pub start: ResolvedPos<'a>,
    pub end: ResolvedPos<'a>,
    pub line_text: &'a str,
}

/// Registry of source files plus the span interner.
///
/// # Examples
///
/// ```
/// use guage_util::span::{SourceMap, Span};
///
/// let mut map = SourceMap::new();
/// let base = map.add_file("main.gu", "(≔ x 1)\n(⊕ x 2)");
/// let pos = map.resolve(base);
/// assert_eq!(pos.line, 1);
/// assert_eq!(pos.column, 1);
/// ```
#[derive(Default)]
pub struct SourceMap {
    files: Vec<SourceFile>,
    /// Next available global offset; starts at 1 so byte 0 stays unmapped.
    next_base: BytePos,
    interned: Vec<SpanData>,
}

impl SourceMap {
    pub fn new() -> Self {
        Self {
            files: Vec::new(),
            next_base: 1,
            interned: Vec::new(),
        }
    }

    /// Register a file. Returns its base offset, which the reader adds to
    /// every local position it records.
    pub fn add_file(&mut self, filename: impl Into<String>, source: impl Into<String>) -> BytePos {
        let source = source.into();
        let file_id = self.files.len() as u16;
        let base = self.next_base;
        let file = SourceFile::new(filename.into(), source, base, file_id);
        // 1-byte gap between files so a file-end position stays inside its
        // own file.
        self.next_base = base + file.size() + 1;
        self.files.push(file);
        base
    }

    #[inline]
    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    #[inline]
    pub fn file(&self, file_id: u16) -> Option<&SourceFile> {
        self.files.get(file_id as usize)
    }

    /// File covering a global position, by binary search over bases.
    pub fn file_for_pos(&self, pos: BytePos) -> Option<&SourceFile> {
        if pos == 0 || self.files.is_empty() {
            return None;
        }
        let idx = self
            .files
            .partition_point(|f| f.base + f.size() < pos)
            .min(self.files.len().saturating_sub(1));
        let file = &self.files[idx];
        (pos >= file.base && pos <= file.base + file.size()).then_some(file)
    }

    /// Resolve a global position to `file:line:col`. Unmapped positions
    /// come back with line 0 and filename `<unknown>`.
    pub fn resolve(&self, pos: BytePos) -> ResolvedPos<'_> {
        let Some(file) = self.file_for_pos(pos) else {
            return ResolvedPos::unknown(pos);
        };
        let local = pos - file.base;
        let line_idx = file.find_line(local);
        ResolvedPos {
            filename: &file.filename,
            line: line_idx as u32 + 1,
            column: local - file.line_starts[line_idx] + 1,
            byte_offset: pos,
            file_id: file.file_id,
        }
    }

    /// Resolve a span to start/end positions and the start line's text.
    pub fn resolve_span(&self, span: Span) -> ResolvedSpan<'_> {
        let (lo, hi) = match span.interned_index() {
            Some(index) => match self.lookup_span_data(index) {
                Ok(data) => (data.lo, data.hi),
                Err(_) => (0, 0),
            },
            None => (span.lo(), span.hi()),
        };
        let start = self.resolve(lo);
        let end = self.resolve(hi);
        let line_text = self
            .file_for_pos(lo)
            .and_then(|f| f.line_text(f.find_line(lo - f.base)))
            .unwrap_or("");
        ResolvedSpan {
            start,
            end,
            line_text,
        }
    }

    /// Intern an oversized or cross-context span, returning the compact
    /// sentinel form.
    pub fn intern_span(&mut self, data: SpanData) -> Span {
        let index = self.interned.len() as u32;
        self.interned.push(data);
        Span::from_interned_index(index)
    }

    fn lookup_span_data(&self, index: u32) -> SourceMapResult<SpanData> {
        self.interned
            .get(index as usize)
            .copied()
            .ok_or(SourceMapError::BadSpanIndex {
                index,
                count: self.interned.len() as u32,
            })
    }

    /// Decode a span to its full logical form.
    pub fn lookup_span(&self, span: Span) -> SourceMapResult<SpanData> {
        match span.interned_index() {
            Some(index) => self.lookup_span_data(index),
            None => Ok(SpanData {
                lo: span.lo(),
                hi: span.hi(),
                ctxt: span.ctxt(),
                file_id: self
                    .file_for_pos(span.lo())
                    .map(|f| f.file_id)
                    .unwrap_or(0),
            }),
        }
    }
}
