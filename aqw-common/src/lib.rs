//! # AQW Common Library
//!
//! Shared code for the annotation quality workflow core:
//! - Domain models (versions, locks, conflicts, review tasks)
//! - Event types (AqwEvent enum) and the EventBus
//! - Configuration loading
//! - Clock abstraction for lease expiry

pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod models;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use error::{Error, Result};
