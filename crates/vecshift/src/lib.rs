//! # vecshift
//!
//! `vecshift` moves embedding corpora between vector stores: a uniform
//! adapter abstraction over PostgreSQL/pgvector, OceanBase (vector emulated
//! as a JSON column) and Milvus, a durable file-backed checkpoint enabling
//! crash-resumable batch processing, and an orchestrator driving both a
//! one-shot full migration and a continuously polling incremental (CDC-style)
//! sync.
//!
//! ## Quick Start
//!
//! ```bash
//! # One-shot full copy
//! vecshift migrate-offline migration.json
//!
//! # Full copy followed by continuous sync
//! vecshift migrate-online migration.json
//! ```
//!
//! ## Configuration Example
//!
//! ```json
//! {
//!   "source": { "type": "pg", "url": "postgres://localhost/app", "table": "vectors" },
//!   "target": { "type": "milvus", "milvusAddress": "http://localhost:19530" },
//!   "batchSize": 1000,
//!   "checkpointDir": "./checkpoints",
//!   "enableCDC": true,
//!   "cdcPollInterval": 5000
//! }
//! ```
//!
//! Delivery is at-least-once: writes are upserts, and any batch left
//! unconfirmed by a crash is redone in full on the next run.

#![warn(missing_docs)]

pub mod adapters;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod migrator;

pub use adapters::{create_adapter, DatabaseAdapter, DatabaseType, VectorRecord};
pub use checkpoint::{
    BatchCheckpoint, BatchStatus, Checkpoint, CheckpointManager, MigrationPhase,
};
pub use config::{DatabaseConfig, MigrationConfig};
pub use error::{Error, Result};
pub use migrator::{get_progress, MigrationProgress, MigrationReport, Migrator};
