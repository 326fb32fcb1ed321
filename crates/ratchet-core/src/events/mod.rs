pub mod broadcaster;
pub mod listener;
pub mod log;

pub use broadcaster::Broadcaster;
pub use listener::{MigrationEventKind, MigrationListener};
pub use log::LogListener;
