pub mod blind;
pub mod cancel;
pub mod compute;
pub mod config;
pub mod consts;
pub mod cost;
pub mod deconv;
pub mod error;
pub mod estimator;
pub mod io;
pub mod optim;
pub mod psf;
pub mod volume;
