//! Test utilities: mock links, sinks, and a mock command runner.
//!
//! Public so downstream crates can exercise their own pipelines with the
//! same building blocks the framework's tests use.

pub mod mocks;
