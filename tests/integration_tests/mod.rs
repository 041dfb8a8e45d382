//! Integration tests module

pub mod error_scenarios;
pub mod lifecycle_test;
pub mod limits_test;
pub mod recovery_test;
