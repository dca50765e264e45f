//! Curfew violation detection
//!
//! A movement violates a curfew when its timestamp falls strictly inside the
//! curfew window anchored on the movement's calendar date, and its position is
//! strictly further than the confinement radius from the confinement location.

use crate::domain::geo::distance_meters;
use crate::domain::types::{Curfew, Movement};
use chrono::{Duration, NaiveDate, NaiveDateTime};

/// Concrete start/end instants of a curfew window starting on `date`
///
/// When the window crosses midnight the end is moved to the following day.
/// The end is `None` when that day lies past the last representable date.
pub fn curfew_window(curfew: &Curfew, date: NaiveDate) -> (NaiveDateTime, Option<NaiveDateTime>) {
    let start = date.and_time(curfew.start_time);
    let end = date.and_time(curfew.end_time);
    if curfew.crosses_midnight() {
        (start, end.checked_add_signed(Duration::days(1)))
    } else {
        (start, Some(end))
    }
}

/// Whether `movement` falls strictly inside the curfew window for its date
pub fn within_window(curfew: &Curfew, movement: &Movement) -> bool {
    let (start, end) = curfew_window(curfew, movement.timestamp.date());
    // A missing end is on the next day, so every later instant of `date` is inside
    start < movement.timestamp && end.map_or(true, |end| movement.timestamp < end)
}

/// Whether `movement` breaches `curfew`. No curfew can never be breached.
pub fn is_violation(curfew: Option<&Curfew>, movement: &Movement) -> bool {
    let Some(curfew) = curfew else {
        return false;
    };

    if !within_window(curfew, movement) {
        return false;
    }

    distance_meters(&curfew.confinement_location, &movement.position)
        > curfew.confinement_radius_meters
}
