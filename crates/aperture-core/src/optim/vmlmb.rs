use std::collections::VecDeque;

use crate::consts::{
    DEFAULT_GRADIENT_ATOL, DEFAULT_GRADIENT_RTOL, DEFAULT_MEMORY, INITIAL_STEP_DELTA,
    INITIAL_STEP_EPSILON, LINE_SEARCH_FTOL, LINE_SEARCH_GTOL, LINE_SEARCH_STPMIN,
};

use super::line_search::{LineSearch, SearchStatus};
use super::{Diagnostic, Task};

/// Settings of the variable-metric, limited-memory, bounded optimizer.
#[derive(Clone, Debug, PartialEq)]
pub struct VmlmbConfig {
    /// Number of (s, y) pairs kept.
    pub memory: usize,
    /// Absolute tolerance on the projected gradient norm.
    pub gatol: f64,
    /// Tolerance relative to the initial projected gradient norm.
    pub grtol: f64,
    pub lower: f64,
    pub upper: f64,
    /// Sufficient decrease parameter of the line search.
    pub ftol: f64,
    /// Curvature parameter of the line search.
    pub gtol: f64,
    pub stpmin: f64,
}

impl Default for VmlmbConfig {
    fn default() -> Self {
        Self {
            memory: DEFAULT_MEMORY,
            gatol: DEFAULT_GRADIENT_ATOL,
            grtol: DEFAULT_GRADIENT_RTOL,
            lower: f64::NEG_INFINITY,
            upper: f64::INFINITY,
            ftol: LINE_SEARCH_FTOL,
            gtol: LINE_SEARCH_GTOL,
            stpmin: LINE_SEARCH_STPMIN,
        }
    }
}

impl VmlmbConfig {
    pub fn is_bounded(&self) -> bool {
        self.lower.is_finite() || self.upper.is_finite()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Stage {
    /// Waiting for the evaluation at the starting point.
    Initial,
    /// An iterate was accepted; the next call computes a search direction.
    Accepted,
    /// Waiting for an evaluation along the current search direction.
    Searching,
}

/// Limited-memory BFGS pairs, oldest first.
#[derive(Clone, Debug, Default)]
struct Memory {
    pairs: VecDeque<(Vec<f64>, Vec<f64>, f64)>,
    depth: usize,
}

impl Memory {
    fn new(depth: usize) -> Self {
        Self {
            pairs: VecDeque::with_capacity(depth),
            depth,
        }
    }

    fn push(&mut self, s: Vec<f64>, y: Vec<f64>) {
        let sy = dot(&s, &y);
        if self.depth == 0 || !(sy > 0.0) {
            return;
        }
        if self.pairs.len() == self.depth {
            self.pairs.pop_front();
        }
        self.pairs.push_back((s, y, 1.0 / sy));
    }

    fn clear(&mut self) {
        self.pairs.clear();
    }

    fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Two-loop recursion: `-H·q` restricted to the free variables.
    fn direction(&self, q: &[f64], free: &[bool]) -> Vec<f64> {
        let masked_dot = |a: &[f64], b: &[f64]| -> f64 {
            a.iter()
                .zip(b)
                .zip(free)
                .filter(|(_, &f)| f)
                .map(|((x, y), _)| x * y)
                .sum()
        };

        let mut r = q.to_vec();
        let mut alpha = vec![0.0; self.pairs.len()];
        for (i, (s, y, rho)) in self.pairs.iter().enumerate().rev() {
            alpha[i] = rho * masked_dot(s, &r);
            for ((ri, yi), &f) in r.iter_mut().zip(y).zip(free) {
                if f {
                    *ri -= alpha[i] * yi;
                }
            }
        }

        if let Some((s, y, _)) = self.pairs.back() {
            let yy = masked_dot(y, y);
            let gamma = if yy > 0.0 { masked_dot(s, y) / yy } else { 1.0 };
            if gamma > 0.0 {
                r.iter_mut().for_each(|v| *v *= gamma);
            }
        }

        for (i, (s, y, rho)) in self.pairs.iter().enumerate() {
            let beta = rho * masked_dot(y, &r);
            for ((ri, si), &f) in r.iter_mut().zip(s).zip(free) {
                if f {
                    *ri += (alpha[i] - beta) * si;
                }
            }
        }

        r.iter()
            .zip(free)
            .map(|(&v, &f)| if f { -v } else { 0.0 })
            .collect()
    }
}

/// Variable-metric limited-memory optimizer with bounds, driven by reverse
/// communication (see the module documentation for the calling protocol).
#[derive(Clone, Debug)]
pub struct Vmlmb {
    config: VmlmbConfig,
    task: Task,
    stage: Stage,
    iterations: usize,
    evaluations: usize,
    restarts: usize,
    memory: Memory,
    x0: Vec<f64>,
    f0: f64,
    g0: Vec<f64>,
    d: Vec<f64>,
    step: f64,
    gnorm: f64,
    gnorm_init: f64,
    line_search: LineSearch,
}

impl Vmlmb {
    pub fn new(config: VmlmbConfig) -> Self {
        let line_search =
            LineSearch::new(config.ftol, config.gtol, config.stpmin, config.is_bounded());
        Self {
            memory: Memory::new(config.memory),
            config,
            task: Task::ComputeFg,
            stage: Stage::Initial,
            iterations: 0,
            evaluations: 0,
            restarts: 0,
            x0: Vec::new(),
            f0: f64::INFINITY,
            g0: Vec::new(),
            d: Vec::new(),
            step: 0.0,
            gnorm: f64::INFINITY,
            gnorm_init: f64::INFINITY,
            line_search,
        }
    }

    pub fn config(&self) -> &VmlmbConfig {
        &self.config
    }

    pub fn task(&self) -> Task {
        self.task
    }

    /// Accepted iterations so far (the starting point is iteration 0).
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    pub fn evaluations(&self) -> usize {
        self.evaluations
    }

    /// Times the memory was discarded because its direction was not a descent.
    pub fn restarts(&self) -> usize {
        self.restarts
    }

    /// Cost at the last accepted iterate.
    pub fn cost(&self) -> f64 {
        self.f0
    }

    /// Projected gradient norm at the last accepted iterate.
    pub fn gradient_norm(&self) -> f64 {
        self.gnorm
    }

    /// Project `x` into the bounds and request its first evaluation.
    pub fn start(&mut self, x: &mut [f64]) -> Task {
        self.project(x);
        self.memory.clear();
        self.iterations = 0;
        self.evaluations = 0;
        self.restarts = 0;
        self.x0 = x.to_vec();
        self.g0 = vec![0.0; x.len()];
        self.f0 = f64::INFINITY;
        self.gnorm = f64::INFINITY;
        self.gnorm_init = f64::INFINITY;
        self.stage = Stage::Initial;
        self.task = Task::ComputeFg;
        self.task
    }

    /// Advance the protocol. `f` and `g` are read only after a `ComputeFg` task.
    pub fn iterate(&mut self, x: &mut [f64], f: f64, g: &[f64]) -> Task {
        if x.len() != self.x0.len() || (self.task == Task::ComputeFg && g.len() != x.len()) {
            self.task = Task::Error(Diagnostic::GradientLength);
            return self.task;
        }
        self.task = match self.task {
            Task::ComputeFg => self.after_evaluation(x, f, g),
            Task::NewX => self.next_direction(x),
            terminal => terminal,
        };
        self.task
    }

    fn after_evaluation(&mut self, x: &mut [f64], f: f64, g: &[f64]) -> Task {
        self.evaluations += 1;
        let finite = f.is_finite() && g.iter().all(|v| v.is_finite());

        match self.stage {
            Stage::Initial => {
                if !finite {
                    return Task::Error(Diagnostic::NonFiniteCost);
                }
                self.accept(x, f, g);
                self.gnorm_init = self.gnorm;
                self.convergence_task()
            }
            Stage::Searching => {
                let gd = if finite {
                    g.iter()
                        .zip(x.iter().zip(&self.x0))
                        .map(|(gi, (xi, x0i))| gi * (xi - x0i))
                        .sum::<f64>()
                        / self.step
                } else {
                    f64::NAN
                };
                match self.line_search.iterate(self.step, f, gd) {
                    SearchStatus::Converged if finite => {
                        let s: Vec<f64> = x.iter().zip(&self.x0).map(|(a, b)| a - b).collect();
                        let y: Vec<f64> = g.iter().zip(&self.g0).map(|(a, b)| a - b).collect();
                        self.memory.push(s, y);
                        self.accept(x, f, g);
                        self.iterations += 1;
                        self.convergence_task()
                    }
                    SearchStatus::Converged => {
                        x.copy_from_slice(&self.x0);
                        Task::Warning(Diagnostic::NonFiniteCost)
                    }
                    SearchStatus::Continue(step) => {
                        self.step = step;
                        self.trial_point(x);
                        Task::ComputeFg
                    }
                    SearchStatus::Warning(reason) => {
                        x.copy_from_slice(&self.x0);
                        Task::Warning(reason)
                    }
                }
            }
            Stage::Accepted => Task::Error(Diagnostic::NotDescent),
        }
    }

    fn next_direction(&mut self, x: &mut [f64]) -> Task {
        let free = self.free_variables();
        let q: Vec<f64> = self
            .g0
            .iter()
            .zip(&free)
            .map(|(&g, &f)| if f { g } else { 0.0 })
            .collect();

        let mut d = self.memory.direction(&q, &free);
        let mut dg = dot(&d, &self.g0);
        if !(dg < 0.0) {
            self.memory.clear();
            self.restarts += 1;
            d = q.iter().map(|v| -v).collect();
            dg = -dot(&q, &q);
        }
        if !(dg < 0.0) {
            return Task::Warning(Diagnostic::NotDescent);
        }

        self.step = if self.memory.is_empty() {
            let dnorm = dot(&d, &d).sqrt();
            let xnorm = dot(&self.x0, &self.x0).sqrt();
            if xnorm > 0.0 {
                INITIAL_STEP_DELTA * xnorm / dnorm
            } else {
                INITIAL_STEP_EPSILON / dnorm
            }
        } else {
            1.0
        };
        self.d = d;
        self.line_search.start(self.f0, dg);
        self.stage = Stage::Searching;
        self.trial_point(x);
        Task::ComputeFg
    }

    fn accept(&mut self, x: &[f64], f: f64, g: &[f64]) {
        self.x0.copy_from_slice(x);
        self.f0 = f;
        self.g0.copy_from_slice(g);
        self.gnorm = self.projected_gradient_norm();
        self.stage = Stage::Accepted;
    }

    fn convergence_task(&self) -> Task {
        let threshold = self.config.gatol.max(self.config.grtol * self.gnorm_init);
        if self.gnorm <= threshold {
            Task::FinalX
        } else {
            Task::NewX
        }
    }

    /// `x = P(x0 + step·d)`.
    fn trial_point(&self, x: &mut [f64]) {
        for ((xi, &x0), &di) in x.iter_mut().zip(&self.x0).zip(&self.d) {
            *xi = x0 + self.step * di;
        }
        self.project(x);
    }

    fn project(&self, x: &mut [f64]) {
        let (lo, hi) = (self.config.lower, self.config.upper);
        for v in x.iter_mut() {
            *v = v.max(lo).min(hi);
        }
    }

    /// Variables not pinned at a bound by the gradient.
    fn free_variables(&self) -> Vec<bool> {
        let (lo, hi) = (self.config.lower, self.config.upper);
        self.x0
            .iter()
            .zip(&self.g0)
            .map(|(&x, &g)| !((x <= lo && g > 0.0) || (x >= hi && g < 0.0)))
            .collect()
    }

    fn projected_gradient_norm(&self) -> f64 {
        self.free_variables()
            .iter()
            .zip(&self.g0)
            .filter(|(&f, _)| f)
            .map(|(_, g)| g * g)
            .sum::<f64>()
            .sqrt()
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}
