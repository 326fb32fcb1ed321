pub mod error;

pub use error::{MigrationError, MigrationErrorKind, MigrationResult};
