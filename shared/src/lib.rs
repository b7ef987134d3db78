//! Shared types for the limpet terminal system
//!
//! Domain models, sync wire messages and the error taxonomy shared
//! between the terminal core and its service collaborators.

pub mod error;
pub mod models;
pub mod sync;

pub use error::{ErrorKind, ServiceError, StoreError};
