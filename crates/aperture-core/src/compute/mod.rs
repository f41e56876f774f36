pub mod fft;
pub mod pool;

pub use fft::{convolve, Fft2Plan, Fft3Plan};
pub use pool::WorkerPool;
