//! # walstore
//!
//! A transactional page store with:
//! - Write-Ahead Logging (WAL) with batched, background fsync
//! - Fixed-size pages behind a single reader/writer lock
//! - A bounded page cache kept coherent with every write
//! - Background checkpointing that never blocks transactions for long
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Transaction / Reader Workers                 │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                 Transaction Pipeline                         │
//! │        pre-record → apply → commit → post-record             │
//! └──────────┬──────────────────────────────────┬───────────────┘
//!            │                                  │
//!            ▼                                  ▼
//!   ┌─────────────────┐                ┌─────────────────┐
//!   │   WAL Buffer    │                │   Page Store    │◄──── Page Cache
//!   │    (Mutex)      │                │   (RwLock)      │
//!   └────────┬────────┘                └────────▲────────┘
//!            │                                  │
//!            ▼                                  │
//!   ┌─────────────────┐                ┌────────┴────────┐
//!   │   WAL Writer    │                │   Checkpoint    │
//!   │ (1 bg thread)   │                │  (N bg threads) │
//!   └─────────────────┘                └─────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;
pub mod metrics;
pub mod shutdown;
pub mod event_log;

pub mod page;
pub mod wal;
pub mod checkpoint;
pub mod transaction;
pub mod pipeline;
pub mod engine;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{Result, StoreError};
pub use config::{CachePolicy, Config, WalSyncStrategy};
pub use metrics::{AtomicMetrics, Counter, Metrics, MetricsSnapshot};
pub use engine::Engine;
pub use pipeline::{Workload, WorkloadSummary};
pub use transaction::{Transaction, TransactionGenerator};
pub use wal::Operation;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of walstore
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
