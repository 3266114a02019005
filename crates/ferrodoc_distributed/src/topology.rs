//! Node/shard catalog reader and driver-facing shard-map rendering.
//!
//! Produces the ordered, grouped view of shard-hosting nodes every other
//! component works from, plus the `getShardMap`/`listShards` payload
//! shapes. Pure reads and pure formatting; no side effects.

use serde_json::{json, Map, Value};

use crate::catalog::{NodeRow, ShardNode};
use crate::context::DistributedContext;
use crate::error::{DistributedError, Result};
use crate::Document;

/// Returns the shard-hosting nodes ordered by ascending group id, primary
/// before secondary within a group. An empty cluster placement yields an
/// empty list.
pub async fn list_shard_hosting_nodes(ctx: &DistributedContext) -> Result<Vec<ShardNode>> {
    let rows = ctx.nodes.shard_hosting_nodes().await?;
    let mut nodes = Vec::with_capacity(rows.len());
    for row in rows {
        nodes.push(validate_node_row(row)?);
    }
    nodes.sort_by_key(|node| (node.group_id, node.role));
    Ok(nodes)
}

fn validate_node_row(row: NodeRow) -> Result<ShardNode> {
    let (Some(group_id), Some(node_id), Some(role), Some(cluster), Some(is_active)) = (
        row.group_id,
        row.node_id,
        row.role,
        row.cluster.clone(),
        row.is_active,
    ) else {
        return Err(DistributedError::internal(format!(
            "node catalog row is missing expected fields: {row:?}"
        )));
    };
    Ok(ShardNode {
        group_id,
        node_id,
        role,
        cluster,
        is_active,
    })
}

/// Per-group membership strings in replica-set notation:
/// `shard_<group>/<active node names, comma-joined>`. Inactive nodes are
/// left out of the membership string but still belong to the group.
fn group_memberships(nodes: &[ShardNode]) -> Vec<(String, String)> {
    let mut entries: Vec<(String, String)> = Vec::new();
    let mut current_group = None;
    for node in nodes {
        if current_group != Some(node.group_id) {
            let shard_name = node.shard_group_name();
            entries.push((shard_name.clone(), format!("{shard_name}/")));
            current_group = Some(node.group_id);
        }
        if node.is_active {
            let (_, members) = entries.last_mut().expect("group entry exists");
            if !members.ends_with('/') {
                members.push(',');
            }
            members.push_str(&node.display_name());
        }
    }
    entries
}

/// Renders the `getShardMap` body: shard-to-members map, active host
/// index, and the per-node detail map (which lists inactive nodes too).
pub fn render_shard_map(nodes: &[ShardNode]) -> Document {
    let mut map = Map::new();
    for (shard_name, members) in group_memberships(nodes) {
        map.insert(shard_name, Value::String(members));
    }

    let mut hosts = Map::new();
    for node in nodes.iter().filter(|node| node.is_active) {
        hosts.insert(
            node.display_name(),
            Value::String(node.shard_group_name()),
        );
    }

    let mut details = Map::new();
    for node in nodes {
        details.insert(
            node.display_name(),
            json!({
                "role": node.role.to_string(),
                "active": node.is_active,
                "cluster": node.cluster,
            }),
        );
    }

    json!({
        "map": map,
        "hosts": hosts,
        "nodes": details,
    })
}

/// Renders the `listShards` body: one `{_id, nodes}` entry per shard group.
pub fn render_shard_list(nodes: &[ShardNode]) -> Vec<Document> {
    group_memberships(nodes)
        .into_iter()
        .map(|(shard_name, members)| json!({ "_id": shard_name, "nodes": members }))
        .collect()
}
