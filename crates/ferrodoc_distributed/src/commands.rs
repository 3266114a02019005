//! Document-in/document-out operator command surface.
//!
//! Command payload parsing lives here; the semantics live in the modules
//! the commands delegate to. Replies follow the driver convention of an
//! `ok: 1.0` marker on success.

use serde_json::{json, Map, Value};
use tracing::info;

use crate::catalog::CollectionRecord;
use crate::colocation::{self, ColocationTarget, MoveCollectionRequest};
use crate::context::DistributedContext;
use crate::error::{DistributedError, Result};
use crate::topology;
use crate::Document;

/// Generic driver fields every command may carry; they are not part of any
/// specific command's contract and parse as no-ops.
const COMMON_IGNORED_FIELDS: &[&str] = &[
    "$audit",
    "$client",
    "$clusterTime",
    "$db",
    "$readPreference",
    "apiVersion",
    "comment",
    "lsid",
    "maxTimeMS",
    "readConcern",
    "txnNumber",
    "writeConcern",
];

fn is_common_ignored_field(key: &str) -> bool {
    COMMON_IGNORED_FIELDS.contains(&key)
}

fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn spec_fields<'a>(spec: &'a Document, command: &str) -> Result<&'a Map<String, Value>> {
    spec.as_object().ok_or_else(|| {
        DistributedError::FailedToParse(format!("{command} spec must be a document"))
    })
}

/// `getShardMap`: the shard-to-node map of the cluster.
pub async fn get_shard_map(ctx: &DistributedContext) -> Result<Document> {
    let nodes = topology::list_shard_hosting_nodes(ctx).await?;
    let mut reply = if nodes.is_empty() {
        Map::new()
    } else {
        match topology::render_shard_map(&nodes) {
            Value::Object(map) => map,
            _ => unreachable!("shard map renders as an object"),
        }
    };
    reply.insert("ok".to_string(), json!(1.0));
    Ok(Value::Object(reply))
}

/// `listShards`: one entry per shard group.
pub async fn list_shards(ctx: &DistributedContext) -> Result<Document> {
    let nodes = topology::list_shard_hosting_nodes(ctx).await?;
    let mut reply = Map::new();
    if !nodes.is_empty() {
        reply.insert(
            "shards".to_string(),
            Value::Array(topology::render_shard_list(&nodes)),
        );
    }
    reply.insert("ok".to_string(), json!(1.0));
    Ok(Value::Object(reply))
}

/// `moveCollection`: moves an unsharded collection to another shard group.
pub async fn move_collection(ctx: &DistributedContext, spec: &Document) -> Result<Document> {
    if !ctx.config.enable_move_collection {
        return Err(DistributedError::CommandNotSupported(
            "moveCollection is not supported yet".to_string(),
        ));
    }

    let mut namespace = None;
    let mut to_shard = None;
    let mut use_logical_replication = false;
    for (key, value) in spec_fields(spec, "moveCollection")? {
        match key.as_str() {
            "moveCollection" => namespace = Some(require_string(key, value)?),
            "toShard" => to_shard = Some(require_string(key, value)?),
            "useLogicalReplication" => {
                use_logical_replication = require_boolean_like(key, value)?;
            }
            _ if is_common_ignored_field(key) => {}
            _ => {
                return Err(DistributedError::FailedToParse(format!(
                    "Unknown top level field {key} in moveCollection spec"
                )));
            }
        }
    }
    let (Some(namespace), Some(to_shard)) = (namespace, to_shard) else {
        return Err(DistributedError::FailedToParse(
            "Required fields moveCollection and toShard not specified".to_string(),
        ));
    };

    let request = MoveCollectionRequest {
        namespace,
        to_shard,
        use_logical_replication,
    };
    colocation::move_collection(ctx, &request).await?;
    Ok(json!({ "ok": 1.0 }))
}

/// Collection-modify `colocation` option: `{collection: "<name>" | null}`.
pub async fn modify_collection_colocation(
    ctx: &DistributedContext,
    collection: &CollectionRecord,
    colocation_value: &Document,
) -> Result<()> {
    let fields = colocation_value.as_object().ok_or_else(|| {
        DistributedError::FailedToParse(
            "Colocation options must be provided as a document.".to_string(),
        )
    })?;

    let mut target_name: Option<String> = None;
    let mut colocate_with_null = false;
    for (key, value) in fields {
        if key != "collection" {
            return Err(DistributedError::FailedToParse(format!(
                "Unrecognized field in colocation.{key}"
            )));
        }
        match value {
            Value::String(name) => target_name = Some(name.clone()),
            Value::Null => colocate_with_null = true,
            other => {
                return Err(DistributedError::BadValue(format!(
                    "colocation.collection must be a string or null. not {}",
                    value_type_name(other)
                )));
            }
        }
    }

    let target = if colocate_with_null {
        ColocationTarget::None
    } else {
        match target_name {
            Some(name) if !name.is_empty() => ColocationTarget::Collection(name),
            _ => {
                return Err(DistributedError::InvalidOptions(
                    "Must specify collection for colocation".to_string(),
                ));
            }
        }
    };

    info!(
        database = %collection.database,
        collection = %collection.name,
        target = ?target,
        "applying colocation change"
    );
    colocation::set_colocation(ctx, collection, &target).await
}

/// `rebalancerStatus`: current rebalance jobs and available strategies.
pub async fn rebalancer_status(ctx: &DistributedContext) -> Result<Document> {
    require_rebalancer_enabled(ctx, "rebalancerStatus")?;

    let jobs = ctx.rebalance.jobs().await?;
    let mut reply = Map::new();
    if jobs.is_empty() {
        reply.insert("mode".to_string(), json!("off"));
    } else {
        let (running, other): (Vec<_>, Vec<_>) = jobs
            .into_iter()
            .partition(|job| job.state.is_reported_running());
        let mode = if running.is_empty() { "off" } else { "full" };
        reply.insert("mode".to_string(), json!(mode));
        reply.insert("runningJobs".to_string(), encode_jobs(&running)?);
        reply.insert("otherJobs".to_string(), encode_jobs(&other)?);
    }

    let strategies = ctx.rebalance.strategies().await?;
    if !strategies.is_empty() {
        let encoded: Vec<Value> = strategies
            .iter()
            .map(|strategy| {
                json!({ "strategy_name": strategy.name, "isDefault": strategy.is_default })
            })
            .collect();
        reply.insert("strategies".to_string(), Value::Array(encoded));
    }

    reply.insert("ok".to_string(), json!(1.0));
    Ok(Value::Object(reply))
}

/// `rebalancerStart`: kicks off a substrate rebalance, optionally pinning
/// the default strategy first.
pub async fn rebalancer_start(ctx: &DistributedContext, spec: &Document) -> Result<Document> {
    require_rebalancer_enabled(ctx, "rebalancerStart")?;

    let has_active = ctx
        .rebalance
        .jobs()
        .await?
        .iter()
        .any(|job| job.state.is_active());
    if has_active {
        return Err(DistributedError::BackgroundOperationInProgress(
            "Cannot start rebalancing when another rebalancing is in progress".to_string(),
        ));
    }

    let strategy = match spec_fields(spec, "rebalancerStart")?.get("strategy") {
        Some(value) => Some(require_string("strategy", value)?),
        None => None,
    };
    if let Some(strategy) = strategy {
        ctx.rebalance.set_default_strategy(&strategy).await?;
    }

    ctx.rebalance.start().await?;
    Ok(json!({ "ok": 1.0 }))
}

/// `rebalancerStop`: stops any active rebalance.
pub async fn rebalancer_stop(ctx: &DistributedContext) -> Result<Document> {
    require_rebalancer_enabled(ctx, "rebalancerStop")?;

    let was_active = ctx
        .rebalance
        .jobs()
        .await?
        .iter()
        .any(|job| job.state.is_active());
    if was_active {
        ctx.rebalance.stop().await?;
    }
    Ok(json!({ "wasActive": was_active, "ok": 1.0 }))
}

fn require_rebalancer_enabled(ctx: &DistributedContext, command: &str) -> Result<()> {
    if ctx.config.enable_shard_rebalancer {
        Ok(())
    } else {
        Err(DistributedError::CommandNotSupported(format!(
            "{command} is not supported yet"
        )))
    }
}

fn encode_jobs(jobs: &[crate::rebalancer::RebalanceJob]) -> Result<Value> {
    serde_json::to_value(jobs)
        .map_err(|err| DistributedError::internal(format!("encode rebalance jobs: {err}")))
}

fn require_string(key: &str, value: &Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        other => Err(DistributedError::FailedToParse(format!(
            "Field {key} must be a string, not {}",
            value_type_name(other)
        ))),
    }
}

/// Booleans arrive as real booleans or driver-style numeric flags.
fn require_boolean_like(key: &str, value: &Value) -> Result<bool> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Number(n) => Ok(n.as_f64().unwrap_or(0.0) != 0.0),
        other => Err(DistributedError::FailedToParse(format!(
            "Field {key} must be a boolean, not {}",
            value_type_name(other)
        ))),
    }
}
