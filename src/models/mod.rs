pub mod event;
pub mod project;
pub mod user;

pub use event::{Event, EventChanges, NewEvent};
pub use project::Project;
pub use user::User;
