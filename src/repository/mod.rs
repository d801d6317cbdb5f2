pub mod event;
pub mod query;

pub use event::{EventRelation, EventRepository};
pub use query::{today, EventFilter, EventQuery};
