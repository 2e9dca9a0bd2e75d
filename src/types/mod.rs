//! Core value types for the engine.
//!
//! - [`id`]: identifier newtypes (`ThreadId`, `MonitorId`, `ObjectId`)
//! - [`location`]: yield-point identity used as a hash key

pub mod id;
pub mod location;

pub use id::{MonitorId, ObjectId, ThreadId};
pub use location::Location;
