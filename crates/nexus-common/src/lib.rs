//! # nexus-common
//!
//! Shared configuration used across the Nexus federation crates.

pub mod config;
