//! HTTP handlers. Every outcome is answered with a JSON envelope and HTTP 200;
//! the `success`/`ok` flag carries the result.

pub mod health;
pub mod registration;
pub mod schema;
pub mod steps;
