//! CLI command implementations.

pub mod churn;
pub mod context;
pub mod error;
pub mod reconciler;
pub mod run;
