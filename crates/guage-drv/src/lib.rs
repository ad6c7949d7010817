//! guage-drv - Interpreter front-end.
//!
//! Reads a source file, registers it with the source map, evaluates each
//! top-level form, and prints non-nil results. A fatal error renders one
//! diagnostic (terminal or JSON) and the process exits nonzero. Color
//! follows the stream: on for terminals unless `NO_COLOR` is set.

use anyhow::{Context, Result};
use clap::Parser;
use guage_eval::debruijn::{convert, NameContext};
use guage_eval::{error_to_diagnostic, Interp, Reader};
use guage_jit::Jit;
use guage_util::diagnostic::{render_json, render_terminal, use_color, Diagnostic};
use guage_util::span::SourceMap;
use std::io::Write;
use std::path::PathBuf;

/// The Guage interpreter.
#[derive(Debug, Parser)]
#[command(name = "guage", version, about = "Guage language interpreter")]
pub struct Cli {
    /// Source file to run.
    pub file: PathBuf,

    /// Emit diagnostics as JSON objects instead of rendered text.
    #[arg(long)]
    pub json_diagnostics: bool,

    /// Disable the native tier; interpret everything.
    #[arg(long)]
    pub no_jit: bool,

    /// Print each form after De Bruijn conversion instead of evaluating.
    #[arg(long)]
    pub dump_converted: bool,

    /// Hot-counter threshold for the native tier.
    #[arg(long, default_value_t = guage_jit::DEFAULT_HOT_THRESHOLD)]
    pub hot_threshold: u32,
}

/// Run the CLI. `Ok(exit_code)` carries the process exit status; `Err` is
/// reserved for environment failures (unreadable file).
pub fn run(cli: &Cli) -> Result<i32> {
    let source = std::fs::read_to_string(&cli.file)
        .with_context(|| format!("cannot read {}", cli.file.display()))?;

    let mut map = SourceMap::new();
    let base = map.add_file(cli.file.display().to_string(), source.clone());

    if cli.dump_converted {
        return dump_converted(&map, &source, base, cli);
    }

    let mut interp = Interp::with_jit(Jit::with_threshold(cli.hot_threshold));
    if cli.no_jit {
        interp.jit_mut().set_enabled(false);
    }

    let results = match guage_eval::run_source(&mut interp, &source, base) {
        Ok(results) => results,
        Err(diag) => {
            emit_diagnostic(&map, &diag, cli);
            return Ok(1);
        }
    };

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for value in &results {
        if value.is_error() {
            let diag = error_to_diagnostic(&map, value);
            emit_diagnostic(&map, &diag, cli);
            let stats = interp.jit().stats();
            tracing::debug!(
                compiles = stats.compiles,
                deopts = stats.deopts,
                "exiting on error"
            );
            return Ok(1);
        }
        if !value.is_nil() {
            writeln!(out, "{}", value)?;
        }
    }

    let stats = interp.jit().stats();
    tracing::debug!(
        compiles = stats.compiles,
        native_calls = stats.native_calls,
        deopts = stats.deopts,
        code_bytes = stats.code_bytes,
        "run finished"
    );
    Ok(0)
}

fn dump_converted(map: &SourceMap, source: &str, base: u32, cli: &Cli) -> Result<i32> {
    let mut reader = Reader::new(source, base);
    let forms = match reader.read_all() {
        Ok(forms) => forms,
        Err(diag) => {
            emit_diagnostic(map, &diag, cli);
            return Ok(1);
        }
    };
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for form in &forms {
        writeln!(out, "{}", convert(form, &NameContext::root()))?;
    }
    Ok(0)
}

fn emit_diagnostic(map: &SourceMap, diag: &Diagnostic, cli: &Cli) {
    let stderr = std::io::stderr();
    let color = use_color(&stderr);
    let mut err = stderr.lock();
    let result = if cli.json_diagnostics {
        render_json(map, diag, &mut err)
    } else {
        render_terminal(map, diag, &mut err, color)
    };
    if let Err(e) = result {
        tracing::error!("failed to render diagnostic: {}", e);
    }
}
