//! Infrastructure modules.
//!
//! - **Logging**: stdout plus optional rolling file streams

mod logging;

pub use logging::{init_logging, LogConfig, LogFormat};
