//! Test utilities for the blob tester.
//!
//! This crate provides helpers shared by the integration tests of the workspace. See the modules
//! for all available utilities.

pub mod backend;
pub mod tracing;
