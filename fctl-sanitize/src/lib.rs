//! # fctl-sanitize
//!
//! Rewrites an exported configuration tree into a portable one.
//!
//! Call [`sanitize`] to clean a tree in place, or [`plan`] to see what it would
//! change. [`consolidate`] merges the module trees of several exported
//! environments; [`LifecycleRewriter`] lifts `prevent_destroy` before a destroy.

pub mod consolidate;
pub mod engine;
pub mod error;
pub mod hcl;
pub mod lifecycle;
pub mod rules;
pub mod state;

pub use consolidate::{consolidate, ConsolidationReport, EnvTree, ModuleConflict};
pub use engine::{plan, sanitize, Change, Plan, SanitizeReport};
pub use error::{SanitizationWarning, SanitizeError};
pub use lifecycle::LifecycleRewriter;
