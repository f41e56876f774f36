pub mod raw;

pub use raw::{read_raw, write_raw};
