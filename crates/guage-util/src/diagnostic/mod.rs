//! Structured diagnostics.
//!
//! A [`Diagnostic`] carries a severity, a message, an optional code,
//! labelled spans, FixIt suggestions, and child diagnostics (notes and
//! helps). Construction goes through [`DiagnosticBuilder`]; rendering lives
//! in [`render`] (terminal and JSON) and fuzzy name suggestions in
//! [`suggest`].
//!
//! # Examples
//!
//! ```
//! use guage_util::diagnostic::{DiagnosticBuilder, Level};
//! use guage_util::span::Span;
//!
//! let diag = DiagnosticBuilder::error("undefined variable `fbi`")
//!     .code("E0017")
//!     .primary_span(Span::new(5, 8), "not found in this scope")
//!     .fixit("did you mean `fib`?", Span::new(5, 8), "fib")
//!     .note("variables must be defined before use")
//!     .build();
//!
//! assert_eq!(diag.level, Level::Error);
//! assert_eq!(diag.spans.len(), 1);
//! assert_eq!(diag.children.len(), 1);
//! ```

pub mod render;
pub mod suggest;

pub use render::{render_json, render_terminal, use_color};
pub use suggest::{levenshtein, suggest_name, DEFAULT_SUGGEST_BUDGET};

use crate::span::Span;
use std::fmt;

/// Diagnostic severity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    /// Fatal: prevents execution.
    Error,
    /// Suspicious but valid.
    Warning,
    /// Additional context ("defined here").
    Note,
    /// Actionable suggestion ("try X instead").
    Help,
    /// Subtle nudge.
    Hint,
}

impl Level {
    pub fn name(self) -> &'static str {
        match self {
            Level::Error => "error",
            Level::Warning => "warning",
            Level::Note => "note",
            Level::Help => "help",
            Level::Hint => "hint",
        }
    }

    #[inline]
    pub fn is_error(self) -> bool {
        self == Level::Error
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A labelled source range inside a diagnostic.
#[derive(Clone, Debug)]
pub struct DiagSpan {
    pub span: Span,
    /// Text shown at this location, if any.
    pub label: Option<String>,
    /// Primary spans underline with `^`, secondary with `~`.
    pub is_primary: bool,
}

/// How safely a FixIt can be applied without human review.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Applicability {
    /// Auto-applicable.
    MachineSafe,
    /// Contains placeholders requiring human input.
    HasPlaceholders,
    /// Might fix it, might not.
    MaybeIncorrect,
    Unspecified,
}

/// A single replacement edit.
#[derive(Clone, Debug)]
pub struct FixEdit {
    pub span: Span,
    pub new_text: String,
}

/// A suggested fix: a message plus one or more simultaneous edits.
#[derive(Clone, Debug)]
pub struct FixIt {
    pub message: String,
    pub applicability: Applicability,
    pub edits: Vec<FixEdit>,
}

/// A structured diagnostic.
#[derive(Clone, Debug)]
pub struct Diagnostic {
    pub level: Level,
    pub message: String,
    /// "E0042"-style code.
    pub code: Option<String>,
    pub spans: Vec<DiagSpan>,
    pub fixits: Vec<FixIt>,
    /// Sub-diagnostics (notes, helps), rendered indented.
    pub children: Vec<Diagnostic>,
}

impl Diagnostic {
    pub fn new(level: Level, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            code: None,
            spans: Vec::new(),
            fixits: Vec::new(),
            children: Vec::new(),
        }
    }

    /// The first primary span, if one was attached.
    pub fn primary_span(&self) -> Option<Span> {
        self.spans
            .iter()
            .find(|s| s.is_primary && !s.span.is_none())
            .map(|s| s.span)
    }
}

/// Fluent construction for [`Diagnostic`].
#[derive(Debug)]
pub struct DiagnosticBuilder {
    diag: Diagnostic,
}

impl DiagnosticBuilder {
    pub fn new(level: Level, message: impl Into<String>) -> Self {
        Self {
            diag: Diagnostic::new(level, message),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Level::Error, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(Level::Warning, message)
    }

    pub fn code(mut self, code: impl Into<String>) -> Self {
        self.diag.code = Some(code.into());
        self
    }

    /// Attach a primary span with a label.
    pub fn primary_span(mut self, span: Span, label: impl Into<String>) -> Self {
        self.diag.spans.push(DiagSpan {
            span,
            label: Some(label.into()),
            is_primary: true,
        });
        self
    }

    /// Attach an unlabelled primary span.
    pub fn span(mut self, span: Span) -> Self {
        self.diag.spans.push(DiagSpan {
            span,
            label: None,
            is_primary: true,
        });
        self
    }

    /// Attach a secondary span with a label.
    pub fn secondary_span(mut self, span: Span, label: impl Into<String>) -> Self {
        self.diag.spans.push(DiagSpan {
            span,
            label: Some(label.into()),
            is_primary: false,
        });
        self
    }

    /// Attach a machine-safe single-edit FixIt.
    pub fn fixit(
        mut self,
        message: impl Into<String>,
        span: Span,
        new_text: impl Into<String>,
    ) -> Self {
        self.diag.fixits.push(FixIt {
            message: message.into(),
            applicability: Applicability::MachineSafe,
            edits: vec![FixEdit {
                span,
                new_text: new_text.into(),
            }],
        });
        self
    }

    pub fn note(mut self, message: impl Into<String>) -> Self {
        self.diag.children.push(Diagnostic::new(Level::Note, message));
        self
    }

    pub fn help(mut self, message: impl Into<String>) -> Self {
        self.diag.children.push(Diagnostic::new(Level::Help, message));
        self
    }

    pub fn child(mut self, child: Diagnostic) -> Self {
        self.diag.children.push(child);
        self
    }

    pub fn build(self) -> Diagnostic {
        self.diag
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_assembles_all_parts() {
        let d = DiagnosticBuilder::error("boom")
            .code("E0001")
            .primary_span(Span::new(1, 4), "here")
            .secondary_span(Span::new(8, 9), "related")
            .fixit("replace", Span::new(1, 4), "fixed")
            .note("a note")
            .help("a help")
            .build();
        assert_eq!(d.level, Level::Error);
        assert_eq!(d.code.as_deref(), Some("E0001"));
        assert_eq!(d.spans.len(), 2);
        assert!(d.spans[0].is_primary);
        assert!(!d.spans[1].is_primary);
        assert_eq!(d.fixits.len(), 1);
        assert_eq!(d.children.len(), 2);
        assert_eq!(d.primary_span(), Some(Span::new(1, 4)));
    }

    #[test]
    fn level_names() {
        assert_eq!(Level::Error.to_string(), "error");
        assert_eq!(Level::Hint.to_string(), "hint");
        assert!(Level::Error.is_error());
        assert!(!Level::Help.is_error());
    }

    #[test]
    fn primary_span_skips_none() {
        let d = DiagnosticBuilder::error("x").span(Span::NONE).build();
        assert_eq!(d.primary_span(), None);
    }
}
