pub mod config;
pub mod error;
pub mod events;
pub mod types;

pub use config::*;
pub use error::*;
pub use types::*;

pub use events::{Event, EventPublisher, InMemoryEventPublisher, NullEventPublisher};
