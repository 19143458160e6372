//! Reviewer-facing side of the pipeline.
//!
//! - `tasks`: task packets for findings that need a decision.
//! - `ingest`: trial-apply, verify, and merge supplied diffs.
//! - `waiver`: append-only waiver records the gate counts.

pub mod diffdoc;
pub mod frame;
pub mod ingest;
pub mod tasks;
pub mod waiver;

pub use ingest::{IngestOutcome, Ingestor};
pub use tasks::{emit_tasks, TaskPacket};
pub use waiver::{manual_finding, waive, waive_batch, RejectedDocument};
