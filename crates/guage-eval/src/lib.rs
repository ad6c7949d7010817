//! guage-eval - Reader, De Bruijn conversion, and the evaluator.
//!
//! The pipeline: source text → [`reader`] → expression trees →
//! [`debruijn`] conversion (named variables become indices, literals get
//! quote-wrapped) → [`eval`], whose variable access is an indexed fetch
//! into the environment vector. The evaluator owns the tiered compiler and
//! hands hot numeric kernels to it.

pub mod debruijn;
pub mod eval;
pub mod reader;
pub mod report;

pub use eval::Interp;
pub use reader::Reader;
pub use report::error_to_diagnostic;

use guage_atom::Atom;
use guage_util::diagnostic::Diagnostic;
use guage_util::span::BytePos;

/// Read and evaluate every top-level form of `src`.
///
/// `base` is the file's base offset from the source map, so spans in
/// results and errors resolve to real locations. Reader failures come back
/// as diagnostics; evaluation failures are error atoms in the result
/// vector.
pub fn run_source(
    interp: &mut Interp,
    src: &str,
    base: BytePos,
) -> Result<Vec<Atom>, Diagnostic> {
    let mut reader = Reader::new(src, base);
    let forms = reader.read_all()?;
    let mut results = Vec::with_capacity(forms.len());
    for form in &forms {
        let value = interp.eval_toplevel(form);
        let failed = value.is_error();
        results.push(value);
        if failed {
            break;
        }
    }
    Ok(results)
}
