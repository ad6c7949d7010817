//! guage-util - Foundation types for the Guage runtime.
//!
//! This crate provides the pieces every other runtime crate builds on:
//!
//! - **Symbol interning** ([`intern`]): a shared string table that dedupes
//!   identifier text and hands out stable [`Symbol`] handles carrying a
//!   canonical pointer, a 16-bit id, and a precomputed SipHash-2-4 hash.
//!   Identifier comparison is an integer compare everywhere downstream.
//! - **Spans and source mapping** ([`span`]): an 8-byte packed [`Span`]
//!   attached to every runtime value, resolved to `file:line:col` on demand
//!   through a [`SourceMap`] over a virtual byte space.
//! - **Diagnostics** ([`diagnostic`]): structured errors with labelled
//!   spans, FixIt suggestions, and child notes, rendered to a terminal or
//!   as JSON.
//! - **Hashing** ([`siphash`]): keyed SipHash-2-4, chosen for HashDoS
//!   resistance in the intern table.
//! - **Group probes** ([`group`]): the SIMD control-byte operations the
//!   intern table probes with, behind the [`GroupOps`] trait with SSE2 and
//!   portable implementations.
//!
//! The crate is dependency-light by design; everything here must be usable
//! from the allocator-adjacent paths of the evaluator and JIT.

pub mod diagnostic;
pub mod error;
pub mod group;
pub mod intern;
pub mod siphash;
pub mod span;

pub use group::{GroupMask, GroupOps};
pub use intern::{InternTable, Symbol};
pub use span::{BytePos, SourceFile, SourceMap, Span};
