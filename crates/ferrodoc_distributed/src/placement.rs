//! Write-side placement and schema primitives of the substrate.
//!
//! Everything here mutates substrate state and participates in the caller's
//! transaction. The control plane sequences these primitives; it never
//! reimplements them.

use async_trait::async_trait;

use crate::catalog::{CollectionId, NodeAddress, ShardId};
use crate::error::Result;

/// Target of a colocation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColocateWith<'a> {
    /// Break colocation; the substrate assigns a fresh group.
    None,
    /// Join the named table's colocation group.
    Table(&'a str),
}

/// Transfer strategy for a physical shard move. `BlockWrites` blocks writer
/// sessions against the moving shard for the transfer's duration;
/// `ForceLogical` copies via logical replication with catch-up before
/// cutover, keeping writes flowing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardTransferMode {
    BlockWrites,
    ForceLogical,
}

impl ShardTransferMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShardTransferMode::BlockWrites => "block_writes",
            ShardTransferMode::ForceLogical => "force_logical",
        }
    }
}

/// Placement-mutation primitives of the substrate.
#[async_trait]
pub trait PlacementOps: Send + Sync {
    /// Metadata-only colocation change; the table keeps its current shape
    /// and shard placement.
    async fn update_colocation(&self, table: &str, target: ColocateWith<'_>) -> Result<()>;

    /// Physically rewrites the table into the target's colocation group.
    /// `cascade_to_colocated == Some(false)` detaches the table alone,
    /// leaving previously colocated tables in place.
    async fn alter_colocation(
        &self,
        table: &str,
        target: ColocateWith<'_>,
        cascade_to_colocated: Option<bool>,
    ) -> Result<()>;

    /// Removes the table from distribution metadata, converting it back to a
    /// plain local table.
    async fn undistribute(&self, table: &str) -> Result<()>;

    /// Distributes a table. `distribution_column == None` creates a
    /// single-shard table with no explicit column; `shard_count == None`
    /// leaves the count to the substrate/colocation target.
    async fn redistribute(
        &self,
        table: &str,
        distribution_column: Option<&str>,
        colocate_with: ColocateWith<'_>,
        shard_count: Option<u64>,
    ) -> Result<()>;

    /// Moves one shard placement between nodes with the given transfer mode.
    async fn move_placement(
        &self,
        shard_id: ShardId,
        from: &NodeAddress,
        to: &NodeAddress,
        mode: ShardTransferMode,
    ) -> Result<()>;

    /// Converts a table into a reference table replicated to every node.
    async fn create_reference_table(&self, table: &str) -> Result<()>;

    /// Re-replicates an existing reference table to nodes missing a placement.
    async fn replicate_reference_table(&self, table: &str) -> Result<()>;

    /// Registers a coordinator-local table in the distribution metadata.
    async fn add_local_table_to_metadata(&self, table: &str) -> Result<()>;

    /// Registers a function whose calls the substrate routes to the node
    /// owning the shard for the distribution argument.
    async fn create_distributed_function(
        &self,
        signature: &str,
        distribution_arg: &str,
        colocate_with: &str,
    ) -> Result<()>;
}

/// Idempotent schema-change primitives used by upgrade steps. Each call is
/// safe to repeat after a partially completed upgrade attempt.
#[async_trait]
pub trait CatalogDdl: Send + Sync {
    async fn add_column_if_not_exists(
        &self,
        table: &str,
        column: &str,
        definition: &str,
    ) -> Result<()>;

    async fn drop_column_if_exists(&self, table: &str, column: &str) -> Result<()>;

    async fn create_or_replace_trigger(
        &self,
        name: &str,
        table: &str,
        event: &str,
        function: &str,
    ) -> Result<()>;

    async fn drop_trigger_if_exists(&self, name: &str, table: &str) -> Result<()>;

    async fn drop_table_if_exists(&self, table: &str) -> Result<()>;

    /// (Re)creates the background index-build queue table.
    async fn create_index_build_queue(&self, options: IndexQueueOptions) -> Result<()>;

    async fn grant_select(&self, table: &str, role: &str) -> Result<()>;

    /// Grants the listed roles to a grantee with admin option.
    async fn grant_roles_with_admin(&self, roles: &[&str], grantee: &str) -> Result<()>;

    /// Drops any existing primary key on the table and installs one over the
    /// given columns.
    async fn reset_primary_key(&self, table: &str, columns: &[&str]) -> Result<()>;

    async fn table_owner(&self, table: &str) -> Result<Option<String>>;

    async fn set_table_owner(&self, table: &str, owner: &str) -> Result<()>;
}

/// Column layout of the index-build queue, which grew across versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IndexQueueOptions {
    pub include_options: bool,
    pub include_drop_command_type: bool,
}

/// Data-table name for one collection id.
pub fn documents_table(collection_id: CollectionId) -> String {
    format!("{}.documents_{collection_id}", crate::DATA_SCHEMA)
}
