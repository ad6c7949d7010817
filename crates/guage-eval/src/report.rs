//! Turning error atoms into renderable diagnostics.
//!
//! An error atom carries a message, an optional datum, a span, a circular
//! return trace, and an optional cause. This module maps that onto the
//! diagnostic model: one header with the failing span, a FixIt when the
//! datum is a name suggestion, `via file:line:col` notes for the trace,
//! and the cause chain as child notes.

use guage_atom::Atom;
use guage_util::diagnostic::{Diagnostic, DiagnosticBuilder};
use guage_util::span::SourceMap;

fn code_for(message: &str) -> Option<&'static str> {
    if message.starts_with("undefined variable") {
        Some("E0017")
    } else if message.starts_with("arity error") {
        Some("E0020")
    } else if message.starts_with("type error") {
        Some("E0021")
    } else {
        None
    }
}

/// Build a diagnostic for an error atom. Non-error atoms produce a generic
/// internal error.
pub fn error_to_diagnostic(map: &SourceMap, error: &Atom) -> Diagnostic {
    let Some(err) = error.as_error() else {
        return DiagnosticBuilder::error(format!("internal error: not an error value: {}", error))
            .build();
    };

    let mut builder = DiagnosticBuilder::error(&err.message).span(err.span);
    if let Some(code) = code_for(&err.message) {
        builder = builder.code(code);
    }

    // An undefined-variable datum is the nearest known name.
    if let Some(data) = &err.data {
        if err.message.starts_with("undefined variable") {
            if let Some(suggestion) = data.as_str() {
                builder = builder.fixit(
                    format!("did you mean `{}`?", suggestion),
                    err.span,
                    suggestion,
                );
            }
        } else {
            builder = builder.note(format!("with: {}", data));
        }
    }

    // Return trace, most recent first.
    for pos in err.trace_recent() {
        let resolved = map.resolve(pos);
        if resolved.line > 0 {
            builder = builder.note(format!(
                "via {}:{}:{}",
                resolved.filename, resolved.line, resolved.column
            ));
        }
    }

    // Cause chain.
    let mut cause = err.cause.clone();
    while let Some(atom) = cause {
        match atom.as_error() {
            Some(inner) => {
                builder = builder.note(format!("caused by: {}", inner.message));
                cause = inner.cause.clone();
            }
            None => break,
        }
    }

    builder.build()
}
