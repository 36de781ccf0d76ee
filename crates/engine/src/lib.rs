pub mod deriv;
pub mod pipeline;

pub use deriv::{DerivStream, FeedEvent};
pub use pipeline::SignalPipeline;
