//! Structured diagnostics.
//!
//! Every fatal compile condition is reported as a `{kind, span, message}`
//! triple through a shared [`DiagCtxt`]. Emitting an error-level diagnostic
//! hands back an [`ErrorGuaranteed`] token, which is the only way to
//! construct one: holding it proves an error has already been reported, so
//! callers can bail with `?` without double-reporting.

use crate::Span;
use std::{cell::RefCell, fmt};

/// Proof that an error diagnostic has been emitted.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, thiserror::Error)]
#[error("compilation failed; diagnostics were emitted")]
pub struct ErrorGuaranteed(());

/// Diagnostic severity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Level {
    /// An error in the program being compiled; prevents output.
    Error,
    /// A purely stylistic or informational issue; never blocks output.
    Warning,
    /// Additional context attached to a preceding diagnostic.
    Note,
}

/// The category of a diagnostic, used by callers to react programmatically.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DiagKind {
    /// A `constant` declaration participates in a dependency cycle.
    CyclicConstant,
    /// An array bound did not fold to a non-negative integer constant.
    InvalidArrayBound,
    /// Overflow while folding a constant expression.
    ConstOverflow,
    /// Two declarations share a name.
    DuplicateDeclaration,
    /// Two external functions hash to the same selector.
    SelectorCollision,
    /// A type error that survived the front end.
    TypeMismatch,
    /// A value crossed data regions in a way the language forbids.
    InvalidRegionCrossing,
    /// The call graph of internal functions contains a cycle.
    RecursiveCall,
    /// A basic block's live values cannot be scheduled within the stack window.
    StackTooDeep,
    /// Malformed input that does not fit a more specific category.
    Malformed,
}

/// A single structured diagnostic.
#[derive(Clone, Debug)]
pub struct Diag {
    pub level: Level,
    pub kind: DiagKind,
    pub span: Span,
    pub message: String,
}

impl fmt::Display for Diag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            Level::Error => "error",
            Level::Warning => "warning",
            Level::Note => "note",
        };
        if self.span.is_dummy() {
            write!(f, "{level}: {}", self.message)
        } else {
            write!(f, "{level}[{}]: {}", self.span, self.message)
        }
    }
}

/// The diagnostics context: collects diagnostics for the whole compilation.
///
/// Single-threaded by design (the pipeline is sequential per module), hence
/// plain interior mutability rather than locks.
#[derive(Default)]
pub struct DiagCtxt {
    diags: RefCell<Vec<Diag>>,
    err_count: RefCell<usize>,
}

impl DiagCtxt {
    /// Creates a new, empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts an error-level diagnostic.
    pub fn err(&self, kind: DiagKind, msg: impl Into<String>) -> DiagBuilder<'_> {
        DiagBuilder::new(self, Level::Error, kind, msg.into())
    }

    /// Starts a warning-level diagnostic.
    pub fn warn(&self, kind: DiagKind, msg: impl Into<String>) -> DiagBuilder<'_> {
        DiagBuilder::new(self, Level::Warning, kind, msg.into())
    }

    /// Returns the number of error-level diagnostics emitted so far.
    pub fn err_count(&self) -> usize {
        *self.err_count.borrow()
    }

    /// Returns `Err` if any error has been emitted.
    pub fn has_errors(&self) -> Result<(), ErrorGuaranteed> {
        if self.err_count() == 0 { Ok(()) } else { Err(ErrorGuaranteed(())) }
    }

    /// Returns a copy of all emitted diagnostics.
    pub fn emitted(&self) -> Vec<Diag> {
        self.diags.borrow().clone()
    }

    /// Renders all diagnostics as display lines, in emission order.
    pub fn rendered(&self) -> Vec<String> {
        self.diags.borrow().iter().map(ToString::to_string).collect()
    }

    fn emit_diag(&self, diag: Diag) -> Option<ErrorGuaranteed> {
        tracing::debug!(target: "diagnostics", "{diag}");
        let guar = match diag.level {
            Level::Error => {
                *self.err_count.borrow_mut() += 1;
                Some(ErrorGuaranteed(()))
            }
            Level::Warning | Level::Note => None,
        };
        self.diags.borrow_mut().push(diag);
        guar
    }
}

/// In-flight diagnostic. Dropping it without calling [`emit`](Self::emit) is
/// a bug; the `Drop` impl panics in debug builds to catch it.
#[must_use = "diagnostics do nothing unless emitted"]
pub struct DiagBuilder<'a> {
    dcx: &'a DiagCtxt,
    diag: Option<Diag>,
}

impl<'a> DiagBuilder<'a> {
    fn new(dcx: &'a DiagCtxt, level: Level, kind: DiagKind, message: String) -> Self {
        Self { dcx, diag: Some(Diag { level, kind, span: Span::DUMMY, message }) }
    }

    /// Attaches a source location.
    pub fn span(mut self, span: Span) -> Self {
        if let Some(diag) = &mut self.diag {
            diag.span = span;
        }
        self
    }

    /// Emits the diagnostic. For error-level diagnostics this returns the
    /// [`ErrorGuaranteed`] token.
    pub fn emit(mut self) -> ErrorGuaranteed {
        let diag = self.diag.take().expect("diagnostic already emitted");
        debug_assert_eq!(diag.level, Level::Error, "`emit` is for error-level diagnostics");
        self.dcx.emit_diag(diag).expect("error diagnostic must produce a guarantee")
    }

    /// Emits a non-error diagnostic.
    pub fn emit_non_fatal(mut self) {
        let diag = self.diag.take().expect("diagnostic already emitted");
        self.dcx.emit_diag(diag);
    }
}

impl Drop for DiagBuilder<'_> {
    fn drop(&mut self) {
        if let Some(diag) = self.diag.take() {
            debug_assert!(false, "dropped diagnostic without emitting: {diag}");
            self.dcx.emit_diag(diag);
        }
    }
}
