//! Value printing.
//!
//! `Display` writes the read-back form (strings quoted and escaped);
//! [`Atom::display_string`] writes the user-facing form (strings raw), which
//! is what the `display` primitive emits. Integral doubles print without a
//! fractional part so `(⊕ 1 2)` reads back as `3`.

use crate::{Atom, Value};
use std::fmt::{self, Write as _};

fn write_number(f: &mut fmt::Formatter<'_>, n: f64) -> fmt::Result {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        write!(f, "{}", n as i64)
    } else {
        write!(f, "{}", n)
    }
}

fn write_escaped(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    f.write_char('"')?;
    for c in s.chars() {
        match c {
            '"' => f.write_str("\\\"")?,
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            '\t' => f.write_str("\\t")?,
            _ => f.write_char(c)?,
        }
    }
    f.write_char('"')
}

fn write_atom(f: &mut fmt::Formatter<'_>, atom: &Atom, raw_strings: bool) -> fmt::Result {
    match atom.value() {
        Value::Number(n) => write_number(f, *n),
        Value::Integer(n) => write!(f, "{}", n),
        Value::Bool(true) => f.write_str("#t"),
        Value::Bool(false) => f.write_str("#f"),
        Value::Nil => f.write_str("()"),
        Value::Str(s) => {
            if raw_strings {
                f.write_str(s)
            } else {
                write_escaped(f, s)
            }
        }
        Value::Symbol(sym) => f.write_str(sym.as_str()),
        Value::Pair(..) => {
            f.write_char('(')?;
            let mut cur = atom.clone();
            let mut first = true;
            loop {
                let next = match cur.pair() {
                    Some((head, tail)) => {
                        if !first {
                            f.write_char(' ')?;
                        }
                        first = false;
                        write_atom(f, head, raw_strings)?;
                        tail.clone()
                    }
                    None => break,
                };
                cur = next;
            }
            if !cur.is_nil() {
                f.write_str(" . ")?;
                write_atom(f, &cur, raw_strings)?;
            }
            f.write_char(')')
        }
        Value::Vector(items) => {
            f.write_str("#(")?;
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    f.write_char(' ')?;
                }
                write_atom(f, item, raw_strings)?;
            }
            f.write_char(')')
        }
        Value::Lambda(_) => f.write_str("#<λ>"),
        Value::Error(e) => write!(f, "#<error: {}>", e.message),
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_atom(f, self, false)
    }
}

impl fmt::Debug for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_atom(f, self, false)
    }
}

impl Atom {
    /// User-facing form: like `Display` but strings print unquoted.
    pub fn display_string(&self) -> String {
        struct Raw<'a>(&'a Atom);
        impl fmt::Display for Raw<'_> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write_atom(f, self.0, true)
            }
        }
        Raw(self).to_string()
    }
}
