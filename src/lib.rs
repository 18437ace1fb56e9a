//! Backend for a multi-step violence registration form.
//!
//! A completed form is validated against the YAML form schema, split into a
//! registration row and its associated violence rows, and written in a single
//! transaction. In dry-run mode the registration insert is echoed instead.

pub mod config;
pub mod error;
pub mod handlers;
pub mod model;
pub mod response;
pub mod router;
pub mod schema;
pub mod sql;
pub mod state;
pub mod store;
pub mod submission;
pub mod validation;

pub use config::{AppConfig, ConfigError, RunMode, StoreBackend};
pub use error::RegistrationError;
pub use router::build_router;
pub use schema::FormSchema;
pub use state::AppState;
pub use submission::{SubmissionOutcome, SubmissionService, WritePath};
