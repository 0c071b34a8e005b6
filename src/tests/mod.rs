//! Cross-module test suite, grouped one file per feature like the
//! individual `#[cfg(test)]` blocks scattered through `services/*.rs`, but
//! for tests that wire several engines together rather than one in
//! isolation.

pub mod common;
mod ingestion_round_trip_test;
