//! # satfetch
//!
//! Resilient acquisition of satellite product files (HDF) from a data portal.
//!
//! ## Design Philosophy
//!
//! satfetch is designed to be:
//! - **Resilient** - Every transfer is retried a bounded number of times, stalls are
//!   detected per attempt, and sizes are verified before a file counts as downloaded
//! - **Library-first** - No CLI and no browser driver; the browser is a capability
//!   trait the embedding application implements
//! - **Event-driven** - Consumers can subscribe to lifecycle events instead of polling
//!
//! ## Quick Start
//!
//! ```no_run
//! use satfetch::{BatchDownloadCoordinator, Config, links};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Arc::new(Config::default());
//!     let coordinator = BatchDownloadCoordinator::new(config.clone())?;
//!
//!     let mut events = coordinator.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let listing = "http://portal.example/data/MOD03.A2023258.HDF";
//!     let report = coordinator
//!         .run_links(&links::extract(listing), config.download_dir())
//!         .await;
//!     println!("{}/{} downloaded", report.succeeded, report.total);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Batch dispatch and the failure manifest
pub mod coordinator;
/// Error types
pub mod error;
/// Watching the browser download directory
pub mod folder_watcher;
/// Result harvesting from the filesystem and the browser
pub mod harvester;
/// Product link extraction
pub mod links;
/// Order list reading and the readiness gate
pub mod order_status;
/// End-to-end order processing
pub mod pipeline;
/// Bounded retry loop
pub mod retry;
/// HTTP and FTP transfer engines
pub mod transfer;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;
/// Per-attempt stall detection
pub mod watchdog;

// Re-export commonly used types
pub use config::{BatchOrder, Config, RetryPolicy};
pub use coordinator::{BatchDownloadCoordinator, ManifestEntry, load_failure_manifest};
pub use error::{Error, FailureKind, Result, TransferError};
pub use harvester::{BrowserSession, ResultHarvester};
pub use links::ExtractedLinks;
pub use order_status::{GateDecision, OrderStatusGate, OrderStatusSource, read_order_ids};
pub use pipeline::{DeliveryReport, OrderReport, OrderRunner, RunSummary};
pub use transfer::{FtpTransferEngine, HttpTransferEngine, TransferEngine};
pub use types::{
    BatchReport, Event, FileDelivery, HarvestResult, Protocol, TransferOutcome, TransferTask,
    WindowHandle,
};
