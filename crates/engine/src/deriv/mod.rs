mod stream;

pub use stream::{DerivStream, FeedEvent};
