//! Collection colocation management and shard movement.
//!
//! Collections whose tables share a colocation group have their shards
//! placed on identical nodes, enabling local joins across them. Only
//! unsharded (single-shard-distributed) collections are eligible for
//! colocation changes and movement. Two table shapes exist in the wild:
//! the current "none" shape (single-shard table, no explicit distribution
//! column) and the legacy shape keyed by the synthetic `shard_key_value`
//! column; transitions handle every pairing of the two.
//!
//! Validation always completes before the first catalog mutation. The
//! mutations themselves run in the caller's transaction, so a failure
//! mid-sequence rolls back as a unit.

use tracing::{debug, info};

use crate::catalog::{
    ColocationGroupId, CollectionRecord, GroupId, ShardPlacement, TableDistribution,
    changes_table, SHARD_KEY_VALUE_COLUMN,
};
use crate::context::DistributedContext;
use crate::error::{DistributedError, Result};
use crate::placement::{ColocateWith, ShardTransferMode};

/// Desired colocation of a collection, as given in the collection-modify
/// command's `colocation` option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColocationTarget {
    /// Break colocation (`colocation: {collection: null}`).
    None,
    /// Co-locate with another collection in the same database.
    Collection(String),
}

/// Applies a colocation change to a collection, then re-colocates the
/// collection's retry table with its primary table using the distribution
/// shape the primary table ended up with.
pub async fn set_colocation(
    ctx: &DistributedContext,
    collection: &CollectionRecord,
    target: &ColocationTarget,
) -> Result<()> {
    let table = collection.table_name();
    let is_sharded = collection.is_sharded();

    // Sharded collections may only be normalized back to colocation-none;
    // this exists to let legacy sharded tables be cleaned up.
    if is_sharded && !matches!(target, ColocationTarget::None) {
        return Err(DistributedError::InvalidOptions(
            "Cannot colocate a collection that is already sharded.".to_string(),
        ));
    }

    let retry_distribution_column = match target {
        ColocationTarget::None => {
            if is_sharded {
                break_sharded_colocation(ctx, &table).await?;
                Some(SHARD_KEY_VALUE_COLUMN)
            } else {
                break_unsharded_colocation(ctx, &table).await?;
                None
            }
        }
        ColocationTarget::Collection(target_name) => {
            if collection.name == *target_name {
                return Err(DistributedError::InvalidNamespace(
                    "Source and target cannot be the same for colocation".to_string(),
                ));
            }

            let target_collection = ctx
                .collections
                .by_name(&collection.database, target_name)
                .await?
                .ok_or_else(|| {
                    DistributedError::InvalidNamespace(format!(
                        "Namespace {}.{} cannot be found",
                        collection.database, target_name
                    ))
                })?;

            if target_collection.is_sharded() {
                return Err(DistributedError::CommandNotSupported(
                    "Current collection cannot be colocated with any sharded collection."
                        .to_string(),
                ));
            }

            let target_table = target_collection.table_name();

            // Tables still sharing the change-tracking table's group are
            // leftovers of an old layout; they must be detached before they
            // can serve as a colocation target.
            let target_group = colocation_group_required(ctx, &target_table, target_name).await?;
            let changes_group =
                colocation_group_required(ctx, &changes_table(), "changes").await?;
            if target_group == changes_group {
                return Err(colocation_unsupported(target_name));
            }

            let target_shards = ctx.shards.shard_ids_for_table(&target_table).await?;
            if target_shards.len() != 1 {
                return Err(colocation_unsupported(target_name));
            }

            join_unsharded_tables(ctx, &table, &target_table).await?
        }
    };

    undistribute_and_redistribute(
        ctx,
        &collection.retry_table_name(),
        ColocateWith::Table(&table),
        retry_distribution_column,
    )
    .await
}

fn colocation_unsupported(target_name: &str) -> DistributedError {
    DistributedError::CommandNotSupported(format!(
        "Colocation for this collection in the current configuration is not supported. \
         Please first colocate {target_name} with colocation: none"
    ))
}

/// Co-locates two unsharded tables, returning the distribution column the
/// source table ended up with (`None` for the single-shard "none" shape,
/// `Some("shard_key_value")` for the legacy shape).
async fn join_unsharded_tables(
    ctx: &DistributedContext,
    source_table: &str,
    target_table: &str,
) -> Result<Option<&'static str>> {
    let source = table_distribution_required(ctx, source_table).await?;
    debug!(
        table = source_table,
        column = source.distribution_column.as_deref(),
        shard_count = source.shard_count,
        "source distribution before colocation"
    );
    if source.shard_count != 1 {
        return Err(DistributedError::CommandNotSupported(
            "Cannot colocate collection to source in current state. Please colocate the \
             source collection with colocation: none"
                .to_string(),
        ));
    }

    let target = table_distribution_required(ctx, target_table).await?;
    debug!(
        table = target_table,
        column = target.distribution_column.as_deref(),
        shard_count = target.shard_count,
        "target distribution before colocation"
    );

    let source_is_single_shard = source.distribution_column.is_none();
    if target.distribution_column.is_none() {
        if source_is_single_shard {
            // Both already have the "none" shape: detach the source, move its
            // one shard onto the target's node, then join the target's group.
            ctx.placement
                .update_colocation(source_table, ColocateWith::None)
                .await?;
            move_shard_to_table(ctx, source_table, target_table).await?;
            ctx.placement
                .update_colocation(source_table, ColocateWith::Table(target_table))
                .await?;
        } else {
            undistribute_and_redistribute(
                ctx,
                source_table,
                ColocateWith::Table(target_table),
                None,
            )
            .await?;
        }
        Ok(None)
    } else if source_is_single_shard {
        // Legacy target: back-convert the source to the legacy shape so the
        // shapes line up.
        undistribute_and_redistribute(
            ctx,
            source_table,
            ColocateWith::Table(target_table),
            Some(SHARD_KEY_VALUE_COLUMN),
        )
        .await?;
        Ok(Some(SHARD_KEY_VALUE_COLUMN))
    } else {
        // Both carry the legacy column already; a direct colocation request
        // suffices, no shape change.
        ctx.placement
            .alter_colocation(source_table, ColocateWith::Table(target_table), None)
            .await?;
        Ok(Some(SHARD_KEY_VALUE_COLUMN))
    }
}

/// Breaks colocation of a sharded table without touching tables that were
/// colocated with it.
async fn break_sharded_colocation(ctx: &DistributedContext, table: &str) -> Result<()> {
    ctx.placement
        .alter_colocation(table, ColocateWith::None, Some(false))
        .await
}

/// Breaks colocation of an unsharded table, normalizing legacy-shaped
/// tables to the "none" shape along the way.
async fn break_unsharded_colocation(ctx: &DistributedContext, table: &str) -> Result<()> {
    let distribution = table_distribution_required(ctx, table).await?;
    debug!(
        table,
        column = distribution.distribution_column.as_deref(),
        shard_count = distribution.shard_count,
        "distribution before breaking colocation"
    );
    if distribution.distribution_column.is_none() {
        ctx.placement
            .update_colocation(table, ColocateWith::None)
            .await
    } else {
        undistribute_and_redistribute(ctx, table, ColocateWith::None, None).await
    }
}

/// Re-creates a table as a distributed table with the given shape and
/// colocation. Used both to normalize legacy tables and to keep retry
/// tables co-located with their collection's primary table.
async fn undistribute_and_redistribute(
    ctx: &DistributedContext,
    table: &str,
    colocate_with: ColocateWith<'_>,
    distribution_column: Option<&str>,
) -> Result<()> {
    ctx.placement.undistribute(table).await?;
    ctx.placement
        .redistribute(table, distribution_column, colocate_with, None)
        .await
}

/// Physically moves a single-shard table's shard onto the node hosting the
/// target table's shard.
async fn move_shard_to_table(
    ctx: &DistributedContext,
    table_to_move: &str,
    target_table: &str,
) -> Result<()> {
    let from = single_shard_placement(ctx, table_to_move).await?;
    let to = single_shard_placement(ctx, target_table).await?;
    info!(
        shard_id = from.shard_id,
        from = %from.address,
        to = %to.address,
        "moving shard to co-locate with target table"
    );
    ctx.placement
        .move_placement(
            from.shard_id,
            &from.address,
            &to.address,
            ShardTransferMode::BlockWrites,
        )
        .await
}

/// Resolves the one shard of a single-shard table together with its current
/// placement. Absence of either row is an internal consistency error: the
/// table was just distributed, so both must exist.
async fn single_shard_placement(
    ctx: &DistributedContext,
    table: &str,
) -> Result<ShardPlacement> {
    let shard_ids = ctx.shards.shard_ids_for_table(table).await?;
    let shard_id = shard_ids.first().copied().ok_or_else(|| {
        DistributedError::internal(format!("could not resolve shard for table {table}"))
    })?;
    ctx.shards
        .placement_for_shard(shard_id)
        .await?
        .ok_or_else(|| {
            DistributedError::internal(format!(
                "could not find placement for shard {shard_id} of table {table}"
            ))
        })
}

async fn table_distribution_required(
    ctx: &DistributedContext,
    table: &str,
) -> Result<TableDistribution> {
    ctx.shards.table_distribution(table).await?.ok_or_else(|| {
        DistributedError::internal(format!("no distribution metadata for table {table}"))
    })
}

async fn colocation_group_required(
    ctx: &DistributedContext,
    table: &str,
    collection_name: &str,
) -> Result<ColocationGroupId> {
    ctx.colocation.colocation_group(table).await?.ok_or_else(|| {
        DistributedError::internal(format!(
            "could not find collection in colocation metadata: {collection_name}"
        ))
    })
}

/// Parsed `moveCollection` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveCollectionRequest {
    /// `<database>.<collection>` namespace to move.
    pub namespace: String,
    /// Target shard group in `shard_<groupId>` notation.
    pub to_shard: String,
    /// Copy via logical replication instead of blocking writes.
    pub use_logical_replication: bool,
}

/// Moves an unsharded collection's shard to another shard group.
///
/// Validation (shard-group syntax, target node, namespace, shardedness,
/// current placement) completes before any mutation; the colocation break,
/// retry-table re-colocation and placement move then run as one unit in the
/// caller's transaction.
pub async fn move_collection(
    ctx: &DistributedContext,
    request: &MoveCollectionRequest,
) -> Result<()> {
    if !ctx.config.enable_move_collection {
        return Err(DistributedError::CommandNotSupported(
            "moveCollection is not supported yet".to_string(),
        ));
    }

    let group_id = parse_shard_group_name(&request.to_shard)?;
    let target_node = ctx
        .nodes
        .primary_node_for_group(group_id)
        .await?
        .ok_or_else(|| {
            DistributedError::InvalidOptions(format!(
                "Could not find shard provided in metadata: {}",
                request.to_shard
            ))
        })?;

    let (database, collection_name) = parse_namespace(&request.namespace)?;
    let collection = ctx
        .collections
        .by_name(database, collection_name)
        .await?
        .ok_or_else(|| {
            DistributedError::NamespaceNotFound(format!(
                "Namespace {} not found",
                request.namespace
            ))
        })?;

    if collection.is_sharded() {
        return Err(DistributedError::InvalidOptions(
            "Cannot call moveCollection on a sharded collection".to_string(),
        ));
    }

    let table = collection.table_name();
    let shard_ids = ctx.shards.shard_ids_for_table(&table).await?;
    let source = match shard_ids.first() {
        Some(&shard_id) => ctx.shards.placement_for_shard(shard_id).await?,
        None => None,
    };
    let source = source.ok_or_else(|| {
        DistributedError::InvalidOptions(format!(
            "Could not find shard information for collection in metadata: {}",
            request.namespace
        ))
    })?;

    // Detach from any current colocation, then pin the retry table back to
    // the primary table before the shard starts moving.
    ctx.placement
        .update_colocation(&table, ColocateWith::None)
        .await?;
    ctx.placement
        .update_colocation(
            &collection.retry_table_name(),
            ColocateWith::Table(&table),
        )
        .await?;

    let mode = if request.use_logical_replication {
        ShardTransferMode::ForceLogical
    } else {
        ShardTransferMode::BlockWrites
    };
    info!(
        namespace = %request.namespace,
        shard_id = source.shard_id,
        from = %source.address,
        to = %target_node,
        mode = mode.as_str(),
        "moving collection"
    );
    ctx.placement
        .move_placement(source.shard_id, &source.address, &target_node, mode)
        .await
}

/// Parses a `shard_<groupId>` name, rejecting any string that does not
/// round-trip through canonical formatting (`shard_07`, `shard_x`, …).
pub fn parse_shard_group_name(shard_name: &str) -> Result<GroupId> {
    let invalid =
        || DistributedError::InvalidOptions(format!("Invalid shard provided {shard_name}"));
    let digits = shard_name.strip_prefix("shard_").ok_or_else(invalid)?;
    let group_id: GroupId = digits.parse().map_err(|_| invalid())?;
    if format!("shard_{group_id}") != shard_name {
        return Err(invalid());
    }
    Ok(group_id)
}

/// Splits a `<database>.<collection>` namespace at the first dot.
pub fn parse_namespace(namespace: &str) -> Result<(&str, &str)> {
    match namespace.split_once('.') {
        Some((database, collection)) if !database.is_empty() && !collection.is_empty() => {
            Ok((database, collection))
        }
        _ => Err(DistributedError::InvalidNamespace(format!(
            "Invalid namespace {namespace}"
        ))),
    }
}
