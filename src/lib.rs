pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

pub use adapters::{InMemorySessionStore, ManualClock, StaticCatalog, SystemClock};
pub use config::EngineConfig;
pub use crate::core::{
    catalog::ExamCatalog,
    clock::{ClockState, SessionClock},
    coordinator::{SessionCoordinator, SessionSettings},
    grader::{AnswerGrader, GradingPhase, GradingPolicy},
    placement::PlacementResolver,
};
pub use utils::error::{EngineError, Result};
