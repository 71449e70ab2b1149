//! Observability for the Raccoon service.
//!
//! Provides metrics definitions and recording helpers.

pub mod metrics;
