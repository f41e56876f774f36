//! Reverse-communication, bound-constrained, limited-memory quasi-Newton
//! optimization.
//!
//! The optimizer never calls the objective. Each call to
//! [`Vmlmb::iterate`] returns a [`Task`] telling the caller what to do next:
//!
//! ```text
//! let mut task = opt.start(&mut x);
//! loop {
//!     match task {
//!         Task::ComputeFg => { f = cost(&x, &mut g); }
//!         Task::NewX => { /* inspect the accepted iterate, maybe stop */ }
//!         Task::FinalX | Task::Warning(_) | Task::Error(_) => break,
//!     }
//!     task = opt.iterate(&mut x, f, &g);
//! }
//! ```

pub mod line_search;
pub mod vmlmb;

pub use line_search::{LineSearch, SearchStatus};
pub use vmlmb::{Vmlmb, VmlmbConfig};

/// What the caller must do next.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Task {
    /// Evaluate the cost and its gradient at the current `x`.
    ComputeFg,
    /// A new iterate was accepted.
    NewX,
    /// Convergence: `x` is the solution.
    FinalX,
    /// The optimizer stopped without convergence; `x` holds the last accepted iterate.
    Warning(Diagnostic),
    /// Invalid input; `x` holds the last accepted iterate.
    Error(Diagnostic),
}

impl Task {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::FinalX | Self::Warning(_) | Self::Error(_))
    }
}

impl std::fmt::Display for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ComputeFg => write!(f, "compute f and g"),
            Self::NewX => write!(f, "new x"),
            Self::FinalX => write!(f, "final x"),
            Self::Warning(d) => write!(f, "warning: {d}"),
            Self::Error(d) => write!(f, "error: {d}"),
        }
    }
}

/// Reason attached to a `Warning` or `Error` task.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Diagnostic {
    StepBelowMinimum,
    StepAtMaximum,
    RoundingErrors,
    NotDescent,
    NonFiniteCost,
    GradientLength,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StepBelowMinimum => write!(f, "line search step below minimum"),
            Self::StepAtMaximum => write!(f, "line search step at maximum"),
            Self::RoundingErrors => write!(f, "rounding errors prevent progress"),
            Self::NotDescent => write!(f, "search direction is not a descent direction"),
            Self::NonFiniteCost => write!(f, "cost or gradient is not finite"),
            Self::GradientLength => write!(f, "gradient length does not match x"),
        }
    }
}
