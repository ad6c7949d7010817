//! Diagnostic renderers: terminal and JSON.
//!
//! Terminal output is one header line (glyph, optional code, message,
//! `file:line:col`), then per labelled span a gutter-indented source line
//! with an underline (`^` primary, `~` secondary), then `help:` lines for
//! FixIt suggestions with the replacement spliced into the source line, then
//! child diagnostics indented two columns.
//!
//! Color is the caller's choice; [`use_color`] implements the policy (on
//! iff the stream is a terminal and `NO_COLOR` is unset).

use std::io::{self, IsTerminal, Write};

use super::{Diagnostic, Level};
use crate::span::SourceMap;

const ANSI_RED: &str = "\x1b[31;1m";
const ANSI_YELLOW: &str = "\x1b[33;1m";
const ANSI_BLUE: &str = "\x1b[34;1m";
const ANSI_GREEN: &str = "\x1b[32;1m";
const ANSI_CYAN: &str = "\x1b[36;1m";
const ANSI_DIM: &str = "\x1b[2m";
const ANSI_RESET: &str = "\x1b[0m";

/// Whether to colorize output to `stream`. Respects `NO_COLOR`.
pub fn use_color<S: IsTerminal>(stream: &S) -> bool {
    std::env::var_os("NO_COLOR").is_none() && stream.is_terminal()
}

fn level_color(level: Level, color: bool) -> &'static str {
    if !color {
        return "";
    }
    match level {
        Level::Error => ANSI_RED,
        Level::Warning => ANSI_YELLOW,
        Level::Note => ANSI_BLUE,
        Level::Help => ANSI_GREEN,
        Level::Hint => ANSI_CYAN,
    }
}

fn reset(color: bool) -> &'static str {
    if color {
        ANSI_RESET
    } else {
        ""
    }
}

fn dim(color: bool) -> &'static str {
    if color {
        ANSI_DIM
    } else {
        ""
    }
}

fn gutter_width(line: u32) -> usize {
    match line {
        0..=99 => 3,
        100..=999 => 4,
        _ => 5,
    }
}

/// Render one diagnostic to a terminal-style stream.
pub fn render_terminal(
    map: &SourceMap,
    diag: &Diagnostic,
    out: &mut dyn Write,
    color: bool,
) -> io::Result<()> {
    // Header: ⚠ E0017: message ── file:line:col
    write!(out, "\n{}", level_color(diag.level, color))?;
    if diag.level == Level::Error {
        write!(out, "⚠ ")?;
    }
    if let Some(code) = &diag.code {
        write!(out, "{}: ", code)?;
    }
    write!(out, "{}{}", diag.message, reset(color))?;

    if let Some(span) = diag.primary_span() {
        let pos = map.resolve(span.lo());
        if pos.line > 0 {
            write!(
                out,
                " {}── {}:{}:{}{}",
                dim(color),
                pos.filename,
                pos.line,
                pos.column,
                reset(color)
            )?;
        }
    }
    writeln!(out)?;

    // Source snippets for each labelled span.
    for ds in &diag.spans {
        if ds.span.is_none() {
            continue;
        }
        let rs = map.resolve_span(ds.span);
        if rs.start.line == 0 {
            continue;
        }
        let gutter = gutter_width(rs.start.line);

        writeln!(
            out,
            "{}{:>width$}│{} {}",
            dim(color),
            rs.start.line,
            reset(color),
            rs.line_text,
            width = gutter
        )?;

        let (col_start, col_end) = underline_columns(&rs);
        write!(out, "{:>width$}│ ", "", width = gutter)?;
        for _ in 0..col_start {
            write!(out, " ")?;
        }
        let ch = if ds.is_primary { '^' } else { '~' };
        write!(out, "{}", level_color(diag.level, color))?;
        for _ in col_start..col_end {
            write!(out, "{}", ch)?;
        }
        write!(out, "{}", reset(color))?;
        if let Some(label) = &ds.label {
            write!(
                out,
                " {}{}{}",
                level_color(diag.level, color),
                label,
                reset(color)
            )?;
        }
        writeln!(out)?;
    }

    // FixIt suggestions, with the replacement spliced into the line.
    for fix in &diag.fixits {
        writeln!(
            out,
            "{}  help{}: {}",
            if color { ANSI_GREEN } else { "" },
            reset(color),
            fix.message
        )?;
        for edit in &fix.edits {
            if edit.span.is_none() {
                continue;
            }
            let rs = map.resolve_span(edit.span);
            if rs.start.line == 0 {
                continue;
            }
            let gutter = gutter_width(rs.start.line);
            let (col_start, col_end) = underline_columns(&rs);
            write!(
                out,
                "{}{:>width$}│{} ",
                dim(color),
                rs.start.line,
                reset(color),
                width = gutter
            )?;
            let line = rs.line_text;
            let before_end = col_start.min(line.len());
            write!(out, "{}", &line[..floor_char(line, before_end)])?;
            write!(
                out,
                "{}{}{}",
                if color { ANSI_GREEN } else { "" },
                edit.new_text,
                reset(color)
            )?;
            if col_end <= line.len() {
                write!(out, "{}", &line[ceil_char(line, col_end)..])?;
            }
            writeln!(out)?;
        }
    }

    // Child diagnostics, indented two columns.
    for child in &diag.children {
        writeln!(
            out,
            "  {}{}{}: {}",
            level_color(child.level, color),
            child.level,
            reset(color),
            child.message
        )?;
    }

    writeln!(out)
}

/// 0-based column range to underline, within the start line.
fn underline_columns(rs: &crate::span::ResolvedSpan<'_>) -> (usize, usize) {
    let col_start = rs.start.column.saturating_sub(1) as usize;
    let col_end = if rs.end.line == rs.start.line && rs.end.column > rs.start.column {
        rs.end.column.saturating_sub(1) as usize
    } else {
        col_start + 1
    };
    (col_start, col_end.max(col_start + 1))
}

fn floor_char(s: &str, mut idx: usize) -> usize {
    idx = idx.min(s.len());
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn ceil_char(s: &str, mut idx: usize) -> usize {
    idx = idx.min(s.len());
    while idx < s.len() && !s.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}

fn json_escape(out: &mut dyn Write, text: &str) -> io::Result<()> {
    for c in text.chars() {
        match c {
            '"' => write!(out, "\\\"")?,
            '\\' => write!(out, "\\\\")?,
            '\n' => write!(out, "\\n")?,
            _ => write!(out, "{}", c)?,
        }
    }
    Ok(())
}

/// Render one diagnostic as a single JSON object.
pub fn render_json(map: &SourceMap, diag: &Diagnostic, out: &mut dyn Write) -> io::Result<()> {
    render_json_inner(map, diag, out)?;
    writeln!(out)
}

fn render_json_inner(map: &SourceMap, diag: &Diagnostic, out: &mut dyn Write) -> io::Result<()> {
    write!(out, "{{\"level\":\"{}\"", diag.level)?;
    if let Some(code) = &diag.code {
        write!(out, ",\"code\":\"")?;
        json_escape(out, code)?;
        write!(out, "\"")?;
    }
    write!(out, ",\"message\":\"")?;
    json_escape(out, &diag.message)?;
    write!(out, "\"")?;

    write!(out, ",\"spans\":[")?;
    for (i, ds) in diag.spans.iter().enumerate() {
        if i > 0 {
            write!(out, ",")?;
        }
        let rs = map.resolve_span(ds.span);
        write!(out, "{{\"file\":\"")?;
        json_escape(out, if rs.start.line > 0 { rs.start.filename } else { "" })?;
        write!(
            out,
            "\",\"byte_start\":{},\"byte_end\":{}",
            ds.span.lo(),
            ds.span.hi()
        )?;
        write!(
            out,
            ",\"line_start\":{},\"line_end\":{}",
            rs.start.line, rs.end.line
        )?;
        write!(
            out,
            ",\"col_start\":{},\"col_end\":{}",
            rs.start.column, rs.end.column
        )?;
        write!(out, ",\"is_primary\":{}", ds.is_primary)?;
        if let Some(label) = &ds.label {
            write!(out, ",\"label\":\"")?;
            json_escape(out, label)?;
            write!(out, "\"")?;
        }
        write!(out, "}}")?;
    }
    write!(out, "]")?;

    write!(out, ",\"children\":[")?;
    for (i, child) in diag.children.iter().enumerate() {
        if i > 0 {
            write!(out, ",")?;
        }
        render_json_inner(map, child, out)?;
    }
    write!(out, "]}}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostic::DiagnosticBuilder;
    use crate::span::Span;

    fn fixture() -> (SourceMap, u32) {
        let mut map = SourceMap::new();
        let base = map.add_file("app.gu", "(print fbi)\n(≔ fib 1)");
        (map, base)
    }

    fn render_plain(map: &SourceMap, diag: &Diagnostic) -> String {
        let mut out = Vec::new();
        render_terminal(map, diag, &mut out, false).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn terminal_header_and_location() {
        let (map, base) = fixture();
        let d = DiagnosticBuilder::error("undefined variable `fbi`")
            .code("E0017")
            .primary_span(Span::new(base + 7, base + 10), "not found")
            .build();
        let text = render_plain(&map, &d);
        assert!(text.contains("⚠ E0017: undefined variable `fbi`"));
        assert!(text.contains("app.gu:1:8"));
        assert!(text.contains("(print fbi)"));
        assert!(text.contains("^^^ not found"));
    }

    #[test]
    fn secondary_spans_use_tilde() {
        let (map, base) = fixture();
        let d = DiagnosticBuilder::warning("shadowed")
            .secondary_span(Span::new(base, base + 6), "earlier")
            .build();
        let text = render_plain(&map, &d);
        assert!(text.contains("~~~~~~ earlier"));
        // Warnings carry no glyph.
        assert!(!text.contains('⚠'));
    }

    #[test]
    fn fixit_splices_replacement() {
        let (map, base) = fixture();
        let d = DiagnosticBuilder::error("undefined variable `fbi`")
            .primary_span(Span::new(base + 7, base + 10), "here")
            .fixit("did you mean `fib`?", Span::new(base + 7, base + 10), "fib")
            .build();
        let text = render_plain(&map, &d);
        assert!(text.contains("help: did you mean `fib`?"));
        assert!(text.contains("(print fib)"));
    }

    #[test]
    fn children_indented() {
        let (map, _) = fixture();
        let d = DiagnosticBuilder::error("top")
            .note("context")
            .help("try this")
            .build();
        let text = render_plain(&map, &d);
        assert!(text.contains("  note: context"));
        assert!(text.contains("  help: try this"));
    }

    #[test]
    fn json_shape() {
        let (map, base) = fixture();
        let d = DiagnosticBuilder::error("bad \"thing\"\nline two")
            .code("E0001")
            .primary_span(Span::new(base + 7, base + 10), "lbl")
            .note("child")
            .build();
        let mut out = Vec::new();
        render_json(&map, &d, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("\"level\":\"error\""));
        assert!(text.contains("\"code\":\"E0001\""));
        assert!(text.contains("\\\"thing\\\"\\nline two"));
        assert!(text.contains("\"byte_start\":8,\"byte_end\":11"));
        assert!(text.contains("\"line_start\":1"));
        assert!(text.contains("\"col_start\":8"));
        assert!(text.contains("\"is_primary\":true"));
        assert!(text.contains("\"label\":\"lbl\""));
        assert!(text.contains("\"children\":[{\"level\":\"note\""));
    }

    #[test]
    fn color_codes_only_when_enabled() {
        let (map, base) = fixture();
        let d = DiagnosticBuilder::error("x")
            .span(Span::new(base, base + 1))
            .build();
        let mut out = Vec::new();
        render_terminal(&map, &d, &mut out, true).unwrap();
        assert!(String::from_utf8(out).unwrap().contains("\x1b[31;1m"));
        assert!(!render_plain(&map, &d).contains('\x1b'));
    }
}
