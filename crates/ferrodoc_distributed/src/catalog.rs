//! Typed repositories over the substrate's distribution catalogs.
//!
//! The substrate keeps its node list, shard list, shard placements and
//! colocation groups in its own metadata tables. The rest of the control
//! plane never touches that query surface directly; it goes through the
//! repository traits here, which return structured records. Reads are
//! snapshot-isolated by the substrate; nothing here is cached across calls
//! so placement decisions never act on stale state.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::version::ClusterVersion;
use crate::{Document, DATA_SCHEMA};

pub type GroupId = i32;
pub type NodeId = i32;
pub type ShardId = u64;
pub type CollectionId = u64;
pub type ColocationGroupId = i32;

/// Shard group of the coordinator itself.
pub const COORDINATOR_GROUP_ID: GroupId = 0;

/// Synthetic distribution column carried by legacy single-shard tables.
pub const SHARD_KEY_VALUE_COLUMN: &str = "shard_key_value";

/// The change-tracking table colocated with the collections it tracks.
pub fn changes_table() -> String {
    format!("{DATA_SCHEMA}.changes")
}

/// Role of a node within its shard group. Ordering is primary-first, which
/// the catalog reader relies on when sorting grouped node lists.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Primary,
    Secondary,
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeRole::Primary => f.write_str("primary"),
            NodeRole::Secondary => f.write_str("secondary"),
        }
    }
}

/// Loosely-typed node row as read from the substrate catalog. Fields may be
/// absent when the catalog row is damaged; the reader validates before use.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeRow {
    pub group_id: Option<GroupId>,
    pub node_id: Option<NodeId>,
    pub role: Option<NodeRole>,
    pub cluster: Option<String>,
    pub is_active: Option<bool>,
}

/// Validated snapshot of one shard-hosting node. Never persisted by this
/// crate; re-derived from the catalog on every read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardNode {
    pub group_id: GroupId,
    pub node_id: NodeId,
    pub role: NodeRole,
    pub cluster: String,
    pub is_active: bool,
}

impl ShardNode {
    /// Driver-facing node identifier, `node_<cluster>_<nodeId>`.
    pub fn display_name(&self) -> String {
        format!("node_{}_{}", self.cluster, self.node_id)
    }

    /// Driver-facing shard group identifier, `shard_<groupId>`.
    pub fn shard_group_name(&self) -> String {
        format!("shard_{}", self.group_id)
    }
}

/// Network address of a node as recorded in the placement catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeAddress {
    pub host: String,
    pub port: u16,
}

impl NodeAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Current placement of one physical shard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardPlacement {
    pub shard_id: ShardId,
    pub group_id: GroupId,
    pub address: NodeAddress,
}

/// Distribution shape of a table in the substrate.
///
/// `distribution_column == None` is the single-shard "none" shape;
/// `Some("shard_key_value")` is the legacy explicit-column shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDistribution {
    pub kind: TableKind,
    pub distribution_column: Option<String>,
    pub shard_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    Distributed,
    Reference,
}

/// Reads the substrate's node catalog.
#[async_trait]
pub trait NodeCatalog: Send + Sync {
    /// Raw rows for every node flagged as shard-hosting, in no particular
    /// order. An empty cluster yields an empty list, not an error.
    async fn shard_hosting_nodes(&self) -> Result<Vec<NodeRow>>;

    /// Address of the primary, active node of a shard group, if one exists.
    async fn primary_node_for_group(&self, group_id: GroupId) -> Result<Option<NodeAddress>>;

    /// Whether this process runs on the cluster's metadata coordinator.
    async fn is_metadata_coordinator(&self) -> Result<bool>;

    /// Number of active shard-hosting nodes.
    async fn active_node_count(&self) -> Result<usize>;
}

/// Reads the substrate's shard and placement catalogs.
#[async_trait]
pub trait ShardCatalog: Send + Sync {
    /// Shard ids of a distributed table; empty when the table has no shards.
    async fn shard_ids_for_table(&self, table: &str) -> Result<Vec<ShardId>>;

    /// Placement of one shard, if it has been placed.
    async fn placement_for_shard(&self, shard_id: ShardId) -> Result<Option<ShardPlacement>>;

    /// Distribution descriptor of a table, or `None` when the table is not
    /// in the distribution metadata at all.
    async fn table_distribution(&self, table: &str) -> Result<Option<TableDistribution>>;

    /// Number of placements a reference table currently has.
    async fn reference_placement_count(&self, table: &str) -> Result<usize>;
}

/// Reads the substrate's colocation-group catalog. Group ids are assigned by
/// the substrate; the control plane only requests transitions.
#[async_trait]
pub trait ColocationCatalog: Send + Sync {
    /// Colocation group of a distributed table, or `None` when the table is
    /// absent from the distribution metadata.
    async fn colocation_group(&self, table: &str) -> Result<Option<ColocationGroupId>>;
}

/// A document collection as registered in the collection catalog. Owned and
/// mutated by the catalog service; this crate only reads it and issues
/// placement requests against the backing table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionRecord {
    pub collection_id: CollectionId,
    pub database: String,
    pub name: String,
    /// Shard key document; `None` marks an unsharded (single-shard) collection.
    pub shard_key: Option<Document>,
}

impl CollectionRecord {
    pub fn is_sharded(&self) -> bool {
        self.shard_key.is_some()
    }

    /// Fully-qualified name of the collection's primary data table.
    pub fn table_name(&self) -> String {
        format!("{DATA_SCHEMA}.documents_{}", self.collection_id)
    }

    /// Fully-qualified name of the collection's retry-tracking table, which
    /// must always stay co-located with the primary table.
    pub fn retry_table_name(&self) -> String {
        format!("{DATA_SCHEMA}.retry_{}", self.collection_id)
    }
}

/// Read access to the external collection catalog.
#[async_trait]
pub trait CollectionCatalog: Send + Sync {
    async fn by_name(&self, database: &str, name: &str) -> Result<Option<CollectionRecord>>;

    async fn by_id(&self, collection_id: CollectionId) -> Result<Option<CollectionRecord>>;

    /// Ids of every registered collection, used by upgrade steps that walk
    /// all data tables.
    async fn all_ids(&self) -> Result<Vec<CollectionId>>;
}

/// Singleton per-cluster version record. `last_deploy_version` only ever
/// moves forward, under the upgrade engine's compare-and-set discipline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterVersionRecord {
    pub initialized_version: Option<ClusterVersion>,
    pub last_deploy_version: ClusterVersion,
    pub last_substrate_version: ClusterVersion,
}

impl ClusterVersionRecord {
    /// Default record of a cluster that has never completed setup.
    pub fn initial() -> Self {
        Self {
            initialized_version: None,
            last_deploy_version: ClusterVersion::new(1, 0, 4),
            last_substrate_version: ClusterVersion::default(),
        }
    }
}

/// Storage for the cluster version record plus the package versions the
/// upgrade engine compares against.
#[async_trait]
pub trait VersionStore: Send + Sync {
    /// Current record, or `None` before the record row was ever seeded.
    async fn read(&self) -> Result<Option<ClusterVersionRecord>>;

    async fn write(&self, record: &ClusterVersionRecord) -> Result<()>;

    /// Broadcast no-op write on the record; every process observes it on its
    /// next catalog read and refreshes its cached version.
    async fn invalidate(&self) -> Result<()>;

    /// Version of the installed control-plane package.
    fn installed_version(&self) -> ClusterVersion;

    /// Version of the underlying sharding substrate.
    async fn substrate_version(&self) -> Result<ClusterVersion>;
}
