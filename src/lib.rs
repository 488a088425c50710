//! Batch conversion of the WESAD, SWELL and AffectiveROAD raw exports into
//! tidy tables.

pub mod config;
pub mod data;
pub mod error;
pub mod jobs;
