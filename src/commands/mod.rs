//! Command handlers for the CLI application.
//!
//! - `daemon`: the foreground monitor (`run`)
//! - `utility`: diagnostics and setup (`list`, `init-config`)

pub mod daemon;
pub mod utility;
