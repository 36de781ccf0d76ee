pub mod clock;
pub mod engine;
pub mod gale;

pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{CycleContext, DecisionConfig, DecisionEngine, EngineState};
pub use gale::GaleTracker;
