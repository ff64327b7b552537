//! # teleconsult-agent: Pre-flight and Call-Quality Self-Test
//!
//! Command-line companion to `teleconsult-core`. Checks the local capture
//! devices and runs a complete provider/patient call in-process so link
//! conditions and media switching can be exercised without a second
//! machine.
//!
//! ## Modes
//!
//! - **Self-test** (default): loopback call for the configured duration,
//!   then a JSON summary on stdout.
//! - **Probe** (`--probe`): device inventory, permission and self-test
//!   report as JSON.
//! - **Gen-config** (`--gen-config`): print the default TOML configuration.

pub mod config;
pub mod service;
