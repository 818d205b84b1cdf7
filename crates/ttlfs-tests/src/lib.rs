//! Integration and end-to-end tests for the TTL filesystem.
//!
//! This crate provides:
//! - A test harness wiring a backing store, registry, dispatcher and reaper
//! - Integration tests for TTL enforcement and storage behaviour
//! - An end-to-end test through a real FUSE mount (ignored by default)

pub mod harness;

pub use harness::{TestMount, TestMountConfig};
