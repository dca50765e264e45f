//! Shared types for curfew monitoring

use chrono::{NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Absolute per-axis tolerance for position equality (absorbs JSON round-trip noise)
const POSITION_EPSILON: f64 = 1e-10;

/// Newtype wrapper for parolee IDs to provide type safety
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct SubjectId(pub i64);

impl std::fmt::Display for SubjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for SubjectId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<i64>().map(SubjectId)
    }
}

/// A latitude/longitude pair in decimal degrees
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GeoPosition {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPosition {
    #[inline]
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// Finite and within [-90, 90] / [-180, 180]
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

impl PartialEq for GeoPosition {
    fn eq(&self, other: &Self) -> bool {
        (self.latitude - other.latitude).abs() < POSITION_EPSILON
            && (self.longitude - other.longitude).abs() < POSITION_EPSILON
    }
}

impl std::fmt::Display for GeoPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.6}, {:.6})", self.latitude, self.longitude)
    }
}

/// A single location report for a subject
///
/// Timestamps are civil date-times with no zone attached; they are compared
/// against curfew times of day on the same calendar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Movement {
    pub timestamp: NaiveDateTime,
    pub position: GeoPosition,
}

impl Movement {
    #[inline]
    pub const fn new(timestamp: NaiveDateTime, position: GeoPosition) -> Self {
        Self { timestamp, position }
    }
}

/// Movements order by timestamp. Two movements at the same instant but
/// different positions are unordered.
impl PartialOrd for Movement {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match self.timestamp.cmp(&other.timestamp) {
            Ordering::Equal if self.position == other.position => Some(Ordering::Equal),
            Ordering::Equal => None,
            ord => Some(ord),
        }
    }
}

/// A recurring daily confinement window
///
/// `end_time <= start_time` means the window crosses midnight
/// (e.g. 20:00 until 06:30 the next morning).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Curfew {
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub confinement_location: GeoPosition,
    #[serde(rename = "confinementRadius")]
    pub confinement_radius_meters: f64,
}

impl Curfew {
    pub const fn new(
        start_time: NaiveTime,
        end_time: NaiveTime,
        confinement_location: GeoPosition,
        confinement_radius_meters: f64,
    ) -> Self {
        Self { start_time, end_time, confinement_location, confinement_radius_meters }
    }

    /// True if the window wraps past midnight
    #[inline]
    pub fn crosses_midnight(&self) -> bool {
        self.end_time <= self.start_time
    }

    /// Valid confinement location and a finite, non-negative radius
    pub fn is_valid(&self) -> bool {
        self.confinement_location.is_valid()
            && self.confinement_radius_meters.is_finite()
            && self.confinement_radius_meters >= 0.0
    }
}

/// A detected curfew breach, delivered to one-shot subscribers
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViolationEvent {
    #[serde(rename = "paroleeId")]
    pub subject_id: SubjectId,
    pub location: GeoPosition,
}

/// Payload pushed to stream subscribers for every movement of a subject they follow
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MovementNotification {
    #[serde(rename = "paroleeId")]
    pub subject_id: SubjectId,
    pub movement: Movement,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2021, 8, 15).unwrap().and_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_subject_id_from_str() {
        assert_eq!("42".parse::<SubjectId>().unwrap(), SubjectId(42));
        assert_eq!(" 7 ".parse::<SubjectId>().unwrap(), SubjectId(7));
        assert!("abc".parse::<SubjectId>().is_err());
    }

    #[test]
    fn test_position_equality_is_approximate() {
        let a = GeoPosition::new(-36.8656, 174.8595);
        let b = GeoPosition::new(-36.8656 + 1e-12, 174.8595 - 1e-12);
        let c = GeoPosition::new(-36.8657, 174.8595);

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_position_validity() {
        assert!(GeoPosition::new(-36.8656, 174.8595).is_valid());
        assert!(GeoPosition::new(90.0, -180.0).is_valid());
        assert!(!GeoPosition::new(90.1, 0.0).is_valid());
        assert!(!GeoPosition::new(0.0, 180.5).is_valid());
        assert!(!GeoPosition::new(f64::NAN, 0.0).is_valid());
    }

    #[test]
    fn test_movement_ordering_by_timestamp() {
        let here = GeoPosition::new(-36.8656, 174.8595);
        let there = GeoPosition::new(-36.9, 174.9);

        let early = Movement::new(at(8, 0), here);
        let late = Movement::new(at(9, 0), there);

        assert!(early < late);
        assert!(late > early);
        assert_eq!(
            Movement::new(at(8, 0), here).partial_cmp(&early),
            Some(Ordering::Equal)
        );
        assert_eq!(Movement::new(at(8, 0), there).partial_cmp(&early), None);
    }

    #[test]
    fn test_curfew_crosses_midnight() {
        let home = GeoPosition::new(-36.8656, 174.8595);
        let t = |h, m| NaiveTime::from_hms_opt(h, m, 0).unwrap();

        assert!(Curfew::new(t(20, 0), t(6, 30), home, 50.0).crosses_midnight());
        assert!(!Curfew::new(t(6, 0), t(22, 0), home, 50.0).crosses_midnight());
    }

    #[test]
    fn test_curfew_validity() {
        let home = GeoPosition::new(-36.8656, 174.8595);
        let t = |h| NaiveTime::from_hms_opt(h, 0, 0).unwrap();

        assert!(Curfew::new(t(20), t(6), home, 0.0).is_valid());
        assert!(!Curfew::new(t(20), t(6), home, -1.0).is_valid());
        assert!(!Curfew::new(t(20), t(6), home, f64::NAN).is_valid());
        assert!(!Curfew::new(t(20), t(6), GeoPosition::new(91.0, 0.0), 50.0).is_valid());
    }

    #[test]
    fn test_curfew_json_shape() {
        let json = r#"{
            "startTime": "20:00:00",
            "endTime": "06:30:00",
            "confinementLocation": {"latitude": -36.8656, "longitude": 174.8595},
            "confinementRadius": 50
        }"#;

        let curfew: Curfew = serde_json::from_str(json).unwrap();

        assert_eq!(curfew.start_time, NaiveTime::from_hms_opt(20, 0, 0).unwrap());
        assert_eq!(curfew.end_time, NaiveTime::from_hms_opt(6, 30, 0).unwrap());
        assert_eq!(curfew.confinement_radius_meters, 50.0);
    }

    #[test]
    fn test_violation_json_uses_parolee_id() {
        let event = ViolationEvent {
            subject_id: SubjectId(3),
            location: GeoPosition::new(-36.8, 174.8),
        };

        let value = serde_json::to_value(event).unwrap();

        assert_eq!(value["paroleeId"], 3);
        assert_eq!(value["location"]["latitude"], -36.8);
    }
}
