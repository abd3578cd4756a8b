//! # llmux-router
//!
//! Picks a model for an abstract task type. Each task has a prioritized
//! list of candidate models; candidates are tried in order and a single
//! fallback model is tried once if all of them fail.

pub mod router;

pub use llmux_core::{TaskType, DEFAULT_FALLBACK_MODEL};
pub use router::{ModelRoute, Router, RouterBuilder};
