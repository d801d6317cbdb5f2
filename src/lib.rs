pub mod config;
pub mod db;
pub mod models;
pub mod repository;
pub mod utils;

pub use models::{Event, EventChanges, NewEvent, Project, User};
pub use repository::{EventQuery, EventRepository};
pub use utils::error::{AppError, AppResult};
