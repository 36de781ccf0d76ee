pub mod candle;
pub mod config;
pub mod error;
pub mod types;

pub use candle::{Candle, CandleWindow, WindowError};
pub use config::Config;
pub use error::{Error, Result};
pub use types::*;
