//! Domain models - core value types and geometry
//!
//! This module contains the canonical data types used throughout the system:
//! - `SubjectId` - identifier of a tracked parolee
//! - `Movement` / `GeoPosition` - location reports
//! - `Curfew` - daily confinement window
//! - `ViolationEvent` / `MovementNotification` - payloads delivered to subscribers
//! - `geo` - haversine distance

pub mod geo;
pub mod types;

// Re-export commonly used types at module level
pub use geo::distance_meters;
pub use types::{Curfew, GeoPosition, Movement, MovementNotification, SubjectId, ViolationEvent};
