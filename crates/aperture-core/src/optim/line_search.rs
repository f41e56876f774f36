use crate::consts::{
    LINE_SEARCH_EXPANSION, LINE_SEARCH_SAFEGUARD, LINE_SEARCH_STPMAX, LINE_SEARCH_XTOL,
};

use super::Diagnostic;

/// Outcome of feeding one trial step to the line search.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SearchStatus {
    /// The last evaluated step is accepted.
    Converged,
    /// Evaluate the function at this step next.
    Continue(f64),
    /// The search cannot make progress.
    Warning(Diagnostic),
}

#[derive(Clone, Copy, Debug)]
struct Sample {
    stp: f64,
    f: f64,
    g: f64,
}

/// Reverse-communication line search.
///
/// With `armijo_only` unset it looks for a step satisfying the strong Wolfe
/// conditions, bracketing the minimum and refining it with safeguarded cubic
/// interpolation. With `armijo_only` set (bound-constrained problems, where
/// the projected path has no meaningful curvature test) it backtracks until
/// sufficient decrease holds.
#[derive(Clone, Debug)]
pub struct LineSearch {
    ftol: f64,
    gtol: f64,
    stpmin: f64,
    armijo_only: bool,
    finit: f64,
    ginit: f64,
    lo: Sample,
    hi: Option<Sample>,
    /// Set when the bracket collapsed and the next evaluation is at `lo`.
    settling: bool,
}

impl LineSearch {
    pub fn new(ftol: f64, gtol: f64, stpmin: f64, armijo_only: bool) -> Self {
        let origin = Sample {
            stp: 0.0,
            f: 0.0,
            g: 0.0,
        };
        Self {
            ftol,
            gtol,
            stpmin,
            armijo_only,
            finit: 0.0,
            ginit: 0.0,
            lo: origin,
            hi: None,
            settling: false,
        }
    }

    /// Begin a search from `f0` with directional derivative `g0 < 0`.
    pub fn start(&mut self, f0: f64, g0: f64) {
        self.finit = f0;
        self.ginit = g0;
        self.lo = Sample {
            stp: 0.0,
            f: f0,
            g: g0,
        };
        self.hi = None;
        self.settling = false;
    }

    /// Feed the function value `f` and directional derivative `g` at `stp`.
    pub fn iterate(&mut self, stp: f64, f: f64, g: f64) -> SearchStatus {
        let f = if f.is_nan() { f64::INFINITY } else { f };
        let g = if g.is_finite() { g } else { 0.0 };
        let current = Sample { stp, f, g };
        let sufficient = f <= self.finit + self.ftol * stp * self.ginit;

        if self.settling && sufficient {
            return SearchStatus::Converged;
        }
        self.settling = false;

        if self.armijo_only {
            if sufficient {
                return SearchStatus::Converged;
            }
            return self.propose(self.backtrack(current));
        }

        if !sufficient || f >= self.lo.f {
            self.hi = Some(current);
            let next = interpolate(self.lo, current);
            return self.propose(next);
        }

        if g.abs() <= -self.gtol * self.ginit {
            return SearchStatus::Converged;
        }

        match self.hi {
            Some(hi) => {
                if g * (hi.stp - self.lo.stp) >= 0.0 {
                    self.hi = Some(self.lo);
                }
                self.lo = current;
                let hi = self.hi.unwrap_or(current);
                self.propose(interpolate(self.lo, hi))
            }
            None if g >= 0.0 => {
                self.hi = Some(self.lo);
                self.lo = current;
                self.propose(interpolate(current, self.hi.unwrap_or(current)))
            }
            None => {
                self.lo = current;
                if stp >= LINE_SEARCH_STPMAX {
                    return SearchStatus::Warning(Diagnostic::StepAtMaximum);
                }
                SearchStatus::Continue((stp * LINE_SEARCH_EXPANSION).min(LINE_SEARCH_STPMAX))
            }
        }
    }

    /// Quadratic backtracking from the origin, kept within [0.1, 0.5] of the failed step.
    fn backtrack(&self, failed: Sample) -> f64 {
        let stp = failed.stp;
        let curvature = failed.f - self.finit - self.ginit * stp;
        let quadratic = if curvature.is_finite() && curvature > 0.0 {
            -self.ginit * stp * stp / (2.0 * curvature)
        } else {
            0.5 * stp
        };
        quadratic.clamp(LINE_SEARCH_SAFEGUARD * stp, 0.5 * stp)
    }

    fn propose(&mut self, next: f64) -> SearchStatus {
        if let Some(hi) = self.hi {
            let width = (hi.stp - self.lo.stp).abs();
            if width <= LINE_SEARCH_XTOL * hi.stp.abs().max(self.lo.stp.abs()) {
                return self.settle();
            }
        }
        if next < self.stpmin {
            return self.settle();
        }
        SearchStatus::Continue(next)
    }

    /// Fall back to the best sufficient-decrease step found so far, if any.
    fn settle(&mut self) -> SearchStatus {
        if self.lo.stp > 0.0 {
            self.settling = true;
            SearchStatus::Continue(self.lo.stp)
        } else if self.hi.is_some_and(|hi| hi.stp < self.stpmin) || self.armijo_only {
            SearchStatus::Warning(Diagnostic::StepBelowMinimum)
        } else {
            SearchStatus::Warning(Diagnostic::RoundingErrors)
        }
    }
}

/// Safeguarded cubic minimizer between two samples; bisection when the cubic
/// is not usable.
fn interpolate(a: Sample, b: Sample) -> f64 {
    let lower = a.stp.min(b.stp);
    let upper = a.stp.max(b.stp);
    let width = upper - lower;
    let midpoint = 0.5 * (lower + upper);
    if width <= 0.0 || !a.f.is_finite() || !b.f.is_finite() {
        return midpoint;
    }

    let d1 = a.g + b.g - 3.0 * (a.f - b.f) / (a.stp - b.stp);
    let disc = d1 * d1 - a.g * b.g;
    if disc < 0.0 {
        return midpoint;
    }
    let d2 = (b.stp - a.stp).signum() * disc.sqrt();
    let denom = b.g - a.g + 2.0 * d2;
    if denom == 0.0 {
        return midpoint;
    }
    let c = b.stp - (b.stp - a.stp) * (b.g + d2 - d1) / denom;
    if !c.is_finite() {
        return midpoint;
    }
    let margin = LINE_SEARCH_SAFEGUARD * width;
    c.clamp(lower + margin, upper - margin)
}
