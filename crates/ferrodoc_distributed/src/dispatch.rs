//! Per-node command dispatch.
//!
//! Some catalog changes (index metadata flags, node-local caches) must be
//! applied on every node that hosts a shard of a table, exactly once per
//! node. The dispatcher picks one representative shard per hosting group
//! (the minimum shard id, so the choice is stable) and invokes the named
//! handler on each group's hosting node, in ascending group order. The
//! whole call fails on the first node error; there is no partial-success
//! contract, which keeps metadata-mutating commands all-or-nothing.
//!
//! When the coordinator hosts no qualifying shard (placement can be
//! asymmetric mid node-addition), `backfill_coordinator` additionally runs
//! the handler locally so cluster-metadata changes still land there.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use futures_util::future::try_join_all;
use tracing::debug;

use crate::catalog::{GroupId, ShardPlacement, COORDINATOR_GROUP_ID};
use crate::context::DistributedContext;
use crate::error::{DistributedError, Result};
use crate::Document;

/// A command that runs on each node hosting a shard of the target table.
/// `shard` is the representative shard on the executing node, or `None`
/// when invoked as a coordinator backfill.
#[async_trait]
pub trait NodeCommandHandler: Send + Sync {
    async fn handle(
        &self,
        ctx: &DistributedContext,
        payload: &Document,
        shard: Option<&ShardPlacement>,
    ) -> Result<Document>;
}

/// Handlers addressable by name, registered once at process start.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn NodeCommandHandler>>>,
}

impl HandlerRegistry {
    pub fn register(&self, name: &str, handler: Arc<dyn NodeCommandHandler>) {
        self.handlers
            .write()
            .expect("handler registry lock poisoned")
            .insert(name.to_string(), handler);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn NodeCommandHandler>> {
        self.handlers
            .read()
            .expect("handler registry lock poisoned")
            .get(name)
            .cloned()
    }
}

/// Transport seam delivering one handler invocation to the node hosting a
/// shard. The remote side resolves the handler through its own registry.
#[async_trait]
pub trait NodeInvoker: Send + Sync {
    async fn invoke(
        &self,
        shard: &ShardPlacement,
        handler: &str,
        payload: &Document,
        read_only: bool,
    ) -> Result<Document>;
}

/// Invokes `handler` once on every node hosting a shard of `target_table`.
///
/// Returns one result per hosting shard group (ascending group order), plus
/// one trailing result when the coordinator was backfilled. All node
/// invocations run in parallel; any node error aborts the whole call.
pub async fn dispatch(
    ctx: &DistributedContext,
    handler: &str,
    payload: &Document,
    read_only: bool,
    target_table: &str,
    backfill_coordinator: bool,
) -> Result<Vec<Document>> {
    let chosen = choose_shards_for_table(ctx, target_table).await?;
    debug!(
        handler,
        table = target_table,
        groups = chosen.len(),
        "dispatching per-node command"
    );

    let calls = chosen
        .iter()
        .map(|shard| ctx.invoker.invoke(shard, handler, payload, read_only));
    let mut results = try_join_all(calls).await?;

    if backfill_coordinator {
        let coordinator_hosts_shard = chosen
            .iter()
            .any(|shard| shard.group_id == COORDINATOR_GROUP_ID);
        if !coordinator_hosts_shard && ctx.nodes.is_metadata_coordinator().await? {
            let local = ctx.handlers.get(handler).ok_or_else(|| {
                DistributedError::internal(format!("no handler registered for {handler}"))
            })?;
            debug!(handler, table = target_table, "backfilling coordinator");
            results.push(local.handle(ctx, payload, None).await?);
        }
    }

    Ok(results)
}

/// One representative placement per shard group hosting the table: the
/// group's minimum shard id. Unplaced shards are ignored; a table with no
/// placed shard at all is an internal consistency error.
async fn choose_shards_for_table(
    ctx: &DistributedContext,
    table: &str,
) -> Result<Vec<ShardPlacement>> {
    let shard_ids = ctx.shards.shard_ids_for_table(table).await?;

    let mut by_group: BTreeMap<GroupId, ShardPlacement> = BTreeMap::new();
    for shard_id in shard_ids {
        let Some(placement) = ctx.shards.placement_for_shard(shard_id).await? else {
            continue;
        };
        match by_group.entry(placement.group_id) {
            Entry::Vacant(slot) => {
                slot.insert(placement);
            }
            Entry::Occupied(mut slot) => {
                if placement.shard_id < slot.get().shard_id {
                    slot.insert(placement);
                }
            }
        }
    }

    if by_group.is_empty() {
        return Err(DistributedError::internal(format!(
            "failed to resolve shards for table {table}"
        )));
    }
    Ok(by_group.into_values().collect())
}
