//! Hungry Agent Core Domain Types
//!
//! This crate contains pure domain types with no dependencies on:
//! - Worker processes
//! - Database
//! - Runtime specifics
//!
//! Everything a caller outside the worker client observes lives here.

pub mod error;
pub mod ids;
pub mod order;
pub mod response;
pub mod status;

// Re-export commonly used types
pub use error::CoreError;
pub use ids::SessionId;
pub use order::OrderItem;
pub use response::{DomainResponse, ResponseData};
pub use status::{Platform, ResponseSource, ResponseStatus};
