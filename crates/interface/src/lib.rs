//! Source positions and diagnostics for the Krait compiler.
//!
//! The front end that produces the typed AST is an external collaborator, so
//! this crate carries no source map or file resolver; spans are opaque byte
//! ranges attached by the front end and threaded through diagnostics.

pub mod config;
pub mod diagnostics;
mod span;

pub use config::{CompilerOpts, DispatchScheme, EvmVersion};
pub use diagnostics::{Diag, DiagCtxt, DiagKind, ErrorGuaranteed, Level};
pub use span::Span;
