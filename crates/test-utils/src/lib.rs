//! Shared test utilities for the ice2ocean workspace.
//!
//! - Scripted remote store fake with call counting and fault injection
//! - Grid data generators
//! - Common fixtures
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! test-utils = { path = "../test-utils" }
//! ```

pub mod fixtures;
pub mod generators;
pub mod scripted_store;

pub use fixtures::*;
pub use generators::*;
pub use scripted_store::ScriptedStore;
