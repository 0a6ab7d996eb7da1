pub mod answer_spec;
pub mod catalog;
pub mod clock;
pub mod coordinator;
pub mod curriculum;
pub mod grader;
pub mod placement;

pub use crate::domain::model::{Navigation, Placement, Session};
pub use crate::domain::ports::{CatalogSource, Clock, SessionStore};
pub use crate::utils::error::Result;
