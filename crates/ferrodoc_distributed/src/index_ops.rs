//! Cluster-wide index metadata propagation.
//!
//! Index state flags (ready, sparse, TTL, …) live in a per-node metadata
//! store and must change on every node hosting a shard of the collection.
//! The coordinator-side entry point rides the per-node dispatcher with
//! coordinator backfill; the registered worker applies the update locally.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::catalog::{CollectionId, ShardPlacement};
use crate::context::DistributedContext;
use crate::dispatch::{self, NodeCommandHandler};
use crate::error::{DistributedError, Result};
use crate::Document;

/// Registry name of the per-node index metadata worker.
pub const INDEX_METADATA_HANDLER: &str = "update_index_metadata_worker";

/// Which index metadata flag an update targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IndexMetadataOperation {
    Ready,
    Sparse,
    Ttl,
    Hidden,
    PrepareUnique,
    Unique,
}

/// One flag change for one index, consumed once per target node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct IndexMetadataUpdateRequest {
    pub collection_id: CollectionId,
    pub index_id: i32,
    pub operation: IndexMetadataOperation,
    pub value: bool,
}

/// Node-local index metadata store mutated by the worker.
#[async_trait]
pub trait IndexMetadataStore: Send + Sync {
    /// Applies one flag change to the local shard's index metadata.
    /// `ignore_missing_shards` turns "no such shard on this node" into a
    /// no-op, tolerating placement gaps mid scale-out.
    async fn apply_update(
        &self,
        request: &IndexMetadataUpdateRequest,
        ignore_missing_shards: bool,
    ) -> Result<()>;
}

/// Applies an index metadata update on every node hosting a shard of the
/// request's collection, the coordinator included.
pub async fn update_distributed_index(
    ctx: &DistributedContext,
    request: &IndexMetadataUpdateRequest,
) -> Result<()> {
    let collection = ctx
        .collections
        .by_id(request.collection_id)
        .await?
        .ok_or_else(|| {
            DistributedError::InvalidNamespace(
                "Failed to find collection for index update".to_string(),
            )
        })?;

    let payload = serde_json::to_value(request)
        .map_err(|err| DistributedError::internal(format!("encode index update: {err}")))?;

    dispatch::dispatch(
        ctx,
        INDEX_METADATA_HANDLER,
        &payload,
        false,
        &collection.table_name(),
        true,
    )
    .await?;
    Ok(())
}

/// Per-node worker applying an [`IndexMetadataUpdateRequest`] payload.
pub struct IndexMetadataWorker;

#[async_trait]
impl NodeCommandHandler for IndexMetadataWorker {
    async fn handle(
        &self,
        ctx: &DistributedContext,
        payload: &Document,
        _shard: Option<&ShardPlacement>,
    ) -> Result<Document> {
        let request = parse_worker_payload(payload)?;
        ctx.index_metadata.apply_update(&request, true).await?;
        Ok(json!({}))
    }
}

/// Payloads come from our own coordinator, so a malformed one is a bug,
/// not user error.
fn parse_worker_payload(payload: &Document) -> Result<IndexMetadataUpdateRequest> {
    let request: IndexMetadataUpdateRequest = serde_json::from_value(payload.clone())
        .map_err(|err| {
            DistributedError::internal(format!(
                "unexpected argument to index metadata worker: {err}"
            ))
        })?;
    if request.collection_id == 0 || request.index_id == 0 {
        return Err(DistributedError::internal(
            "missing argument to index metadata worker".to_string(),
        ));
    }
    Ok(request)
}
