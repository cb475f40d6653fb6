//! # Controller
//!
//! Reconciliation machinery shared by every source kind.
//!
//! - `backoff`: Exponential backoff for per-key retries
//! - `conditions`: Condition sets and the derived `Ready`
//! - `error`: Classified reconcile errors
//! - `finalizer`: Deletion guards on records
//! - `kinds`: Per-kind strategies
//! - `lifecycle`: Get-or-create and get-or-delete of external resources
//! - `operation`: Out-of-process operations and their result records
//! - `queue`: Work queue with per-key exclusivity
//! - `reconciler`: The generic reconcile loop
//! - `sink`: Destination resolution

pub mod backoff;
pub mod conditions;
pub mod error;
pub mod finalizer;
pub mod kinds;
pub mod lifecycle;
pub mod operation;
pub mod queue;
pub mod reconciler;
pub mod sink;
