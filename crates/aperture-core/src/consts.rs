/// Default relative tolerance on the projected gradient norm.
pub const DEFAULT_GRADIENT_RTOL: f64 = 1e-3;

/// Default absolute tolerance on the projected gradient norm.
pub const DEFAULT_GRADIENT_ATOL: f64 = 0.0;

/// Default iteration cap for a single parameter-group fit.
pub const DEFAULT_MAX_ITERATIONS: usize = 20;

/// Default number of (s, y) pairs kept by the limited-memory update.
pub const DEFAULT_MEMORY: usize = 5;

/// Smallest memory depth used when fitting PSF parameters inside blind deconvolution.
pub const BLIND_MIN_MEMORY: usize = 5;

/// The evaluation cap defaults to this multiple of the iteration cap.
pub const EVALUATION_CAP_FACTOR: usize = 2;

/// Line search sufficient decrease (Armijo) parameter.
pub const LINE_SEARCH_FTOL: f64 = 0.05;

/// Line search curvature parameter.
pub const LINE_SEARCH_GTOL: f64 = 0.1;

/// Smallest step the line search may try before giving up.
pub const LINE_SEARCH_STPMIN: f64 = 1e-17;

/// Largest step the line search may try.
pub const LINE_SEARCH_STPMAX: f64 = 1e20;

/// Step growth factor while the minimum is not yet bracketed.
pub const LINE_SEARCH_EXPANSION: f64 = 4.0;

/// Interpolated steps are kept this fraction away from the bracket ends.
pub const LINE_SEARCH_SAFEGUARD: f64 = 0.1;

/// Relative bracket width below which the line search settles on its best step.
pub const LINE_SEARCH_XTOL: f64 = 1e-10;

/// First step of a fit with empty memory moves x by this fraction of its norm.
pub const INITIAL_STEP_DELTA: f64 = 0.05;

/// First step length used when x is zero.
pub const INITIAL_STEP_EPSILON: f64 = 1e-2;

/// Basis vectors whose residual norm falls below this after orthogonalization
/// are rejected as linearly dependent on the pupil support.
pub const GRAM_SCHMIDT_EPSILON: f64 = 1e-10;

/// Default hyperbolic edge-preserving threshold.
pub const DEFAULT_EDGE_THRESHOLD: f64 = 1e-2;

/// Default regularization weight of the object deconvolution.
pub const DEFAULT_REGULARIZATION: f64 = 1e-3;

/// Default iteration cap of the object deconvolution.
pub const DEFAULT_DECONV_ITERATIONS: usize = 50;

/// Default number of alternating passes.
pub const DEFAULT_PASSES: usize = 3;

/// Number of PSF parameter groups (defocus, phase, modulus).
pub const PARAMETER_GROUP_COUNT: usize = 3;

/// Minimum voxel count to run 3-D FFT lanes in parallel.
pub const PARALLEL_VOXEL_THRESHOLD: usize = 32_768;
