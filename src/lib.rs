//! Curfew monitoring library
//!
//! Detects curfew breaches as movements arrive and delivers them to waiting
//! subscribers. Exposes modules for integration testing and binary reuse.

pub mod domain;
pub mod infra;
pub mod io;
pub mod services;
