//! Distributed control plane for the FerroDoc document database.
//!
//! FerroDoc stores document collections as tables in a sharded relational
//! substrate. This crate is the coordinator-side control plane that sits on
//! top of the substrate's placement primitives:
//!
//! - deciding which shard group hosts a collection and keeping related
//!   collections' shards co-located ([`colocation`])
//! - moving an unsharded collection between shard groups on operator
//!   request ([`colocation::move_collection`])
//! - running cluster schema/metadata upgrades exactly once per version
//!   boundary ([`upgrade`])
//! - fanning a command out to every node hosting a shard of a table, with
//!   at-most-once-per-node delivery and optional coordinator backfill
//!   ([`dispatch`])
//!
//! The substrate itself (node catalog, shard placement, colocation groups)
//! is consumed through the typed repository traits in [`catalog`] and
//! [`placement`], bundled into one [`context::DistributedContext`] that is
//! constructed once at process start and passed by reference to every
//! operation. All control-plane operations run synchronously within the
//! caller's transaction scope; the control plane spawns no background work
//! of its own.

pub mod catalog;
pub mod colocation;
pub mod commands;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod index_ops;
pub mod placement;
pub mod rebalancer;
pub mod session;
pub mod topology;
pub mod upgrade;
pub mod version;

pub use config::DistributedConfig;
pub use context::DistributedContext;
pub use error::{DistributedError, ErrorCode, Result};
pub use version::ClusterVersion;

/// Operator commands and per-node payloads are plain JSON documents; the
/// wire-level BSON codec lives outside this crate.
pub type Document = serde_json::Value;

/// Schema holding per-collection data tables (`documents_<id>`,
/// `retry_<id>`, `changes`).
pub const DATA_SCHEMA: &str = "ferrodoc_data";

/// Schema holding the collection/index catalogs replicated cluster-wide.
pub const CATALOG_SCHEMA: &str = "ferrodoc_catalog";

/// Schema holding control-plane state such as the cluster version record.
pub const DISTRIBUTED_SCHEMA: &str = "ferrodoc_distributed";
