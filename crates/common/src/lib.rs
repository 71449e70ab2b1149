//! Common utilities shared across Raccoon components.

#![warn(clippy::pedantic)]

/// Module for JWT header inspection and shared token limits
pub mod jwt;
