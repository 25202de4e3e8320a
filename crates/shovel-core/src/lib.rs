//! Core shovel primitives shared across crates.
//!
//! Includes relay job types, resource-name parsing, inbound request
//! validation, and base errors.

pub mod error;
pub mod request;
pub mod resource;
pub mod types;

pub use error::{ResourceNameError, ValidationError};
pub use request::ShovelRequest;
pub use resource::{ResourceKind, ResourceName};
pub use types::{Attributes, Message, RelayJobSpec, RelayMode, RelayResult};
