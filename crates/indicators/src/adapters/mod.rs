mod bollinger;
mod ema;
mod hull;
mod micro;

pub use bollinger::BollingerAdapter;
pub use ema::EmaAdapter;
pub use hull::HullAdapter;
pub use micro::MicroTrendAdapter;
