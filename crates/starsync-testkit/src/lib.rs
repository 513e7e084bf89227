//! # Starsync Testkit
//!
//! Testing utilities for the starsync fabric.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: scripted reporters, recording receivers, and a
//!   multi-node in-memory cluster harness
//! - **Generators**: proptest strategies for ids, messages, and batches
//!
//! ## Fixtures
//!
//! Spin up a leader with followers over the in-memory transport:
//!
//! ```rust,no_run
//! use starsync_testkit::fixtures::TestCluster;
//!
//! # async fn example() {
//! let cluster = TestCluster::start(2).await;
//! // drive reporters, then:
//! cluster.wait_converged(std::time::Duration::from_secs(1)).await;
//! # }
//! ```
//!
//! ## Property Testing
//!
//! Use the generators with proptest:
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use starsync_testkit::generators::arb_batch;
//!
//! proptest! {
//!     #[test]
//!     fn batches_roundtrip(batch in arb_batch(8)) {
//!         // ...
//!     }
//! }
//! ```

pub mod fixtures;
pub mod generators;

pub use fixtures::{
    recording_receiver, scripted_reporter, DeliveryLog, RecordingReceiver, ReporterScript,
    ScriptedReporter, TestCluster,
};
