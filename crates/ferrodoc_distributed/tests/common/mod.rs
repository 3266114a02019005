//! Shared in-memory cluster harness for integration tests.
//!
//! `TestCluster` models just enough of the sharded substrate (node list,
//! table distribution, colocation groups, shard placements, version
//! record) to exercise the control plane end to end, and records every
//! mutation
//! so tests can assert on ordering and on the absence of mutations after
//! failed validation.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::json;

use ferrodoc_distributed::catalog::{
    changes_table, ClusterVersionRecord, CollectionCatalog, CollectionId, CollectionRecord,
    ColocationCatalog, ColocationGroupId, GroupId, NodeAddress, NodeCatalog, NodeId, NodeRole,
    NodeRow, ShardCatalog, ShardId, ShardPlacement, TableDistribution, TableKind, VersionStore,
};
use ferrodoc_distributed::config::DistributedConfig;
use ferrodoc_distributed::context::DistributedContext;
use ferrodoc_distributed::dispatch::{HandlerRegistry, NodeInvoker};
use ferrodoc_distributed::error::{DistributedError, Result};
use ferrodoc_distributed::index_ops::{IndexMetadataStore, IndexMetadataUpdateRequest};
use ferrodoc_distributed::placement::{
    CatalogDdl, ColocateWith, IndexQueueOptions, PlacementOps, ShardTransferMode,
};
use ferrodoc_distributed::rebalancer::{RebalanceControl, RebalanceJob, RebalanceStrategy};
use ferrodoc_distributed::session::{SessionEnv, SessionOverride};
use ferrodoc_distributed::version::ClusterVersion;
use ferrodoc_distributed::Document;

#[derive(Debug, Clone)]
pub struct TestNode {
    pub group_id: GroupId,
    pub node_id: NodeId,
    pub role: NodeRole,
    pub cluster: String,
    pub is_active: bool,
}

impl TestNode {
    pub fn address(&self) -> NodeAddress {
        NodeAddress::new(format!("10.0.0.{}", self.node_id), 5432)
    }
}

#[derive(Debug, Clone)]
pub struct TableState {
    pub distributed: bool,
    pub kind: TableKind,
    pub distribution_column: Option<String>,
    pub colocation_group: ColocationGroupId,
    /// `(shard_id, hosting group)` pairs.
    pub shards: Vec<(ShardId, GroupId)>,
}

#[derive(Debug, Default)]
pub struct ClusterModel {
    pub nodes: Vec<TestNode>,
    pub emit_broken_node_row: bool,
    pub is_coordinator: bool,
    pub tables: HashMap<String, TableState>,
    pub collections: HashMap<CollectionId, CollectionRecord>,
    pub table_owners: HashMap<String, String>,
    pub reference_placements: HashMap<String, usize>,
    pub next_shard_id: ShardId,
    pub next_colocation_id: ColocationGroupId,
    /// Placement + DDL mutations, in execution order.
    pub mutation_log: Vec<String>,
    pub version_record: Option<ClusterVersionRecord>,
    pub installed_version: ClusterVersion,
    pub substrate_version: ClusterVersion,
    pub invalidations: usize,
    pub session_stack: Vec<SessionOverride>,
    pub rebalance_jobs: Vec<RebalanceJob>,
    pub rebalance_strategies: Vec<RebalanceStrategy>,
    pub rebalance_log: Vec<String>,
    pub index_updates: Vec<(IndexMetadataUpdateRequest, bool)>,
    /// `(group, handler)` per remote invocation.
    pub invocations: Vec<(GroupId, String)>,
    /// Remote invocations to this group fail.
    pub fail_invoke_group: Option<GroupId>,
    /// DDL calls whose log entry starts with this prefix fail.
    pub fail_ddl_prefix: Option<String>,
}

#[derive(Clone)]
pub struct TestCluster {
    pub config: DistributedConfig,
    state: Arc<Mutex<ClusterModel>>,
}

impl Default for TestCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl TestCluster {
    /// Three-group cluster: coordinator (group 0) plus worker groups 1 and
    /// 2, each with an active primary. The change-tracking table exists in
    /// its own colocation group, legacy-shaped, as deployed clusters have it.
    pub fn new() -> Self {
        let mut model = ClusterModel {
            is_coordinator: true,
            next_shard_id: 100,
            next_colocation_id: 10,
            installed_version: ClusterVersion::new(1, 110, 0),
            substrate_version: ClusterVersion::new(12, 1, 0),
            ..ClusterModel::default()
        };
        for group_id in 0..=2 {
            model.nodes.push(TestNode {
                group_id,
                node_id: group_id,
                role: NodeRole::Primary,
                cluster: "default".to_string(),
                is_active: true,
            });
        }

        let changes_group = model.next_colocation_id;
        model.next_colocation_id += 1;
        let changes_shard = model.next_shard_id;
        model.next_shard_id += 1;
        model.tables.insert(
            changes_table(),
            TableState {
                distributed: true,
                kind: TableKind::Distributed,
                distribution_column: Some("shard_key_value".to_string()),
                colocation_group: changes_group,
                shards: vec![(changes_shard, 0)],
            },
        );

        Self {
            config: DistributedConfig::default(),
            state: Arc::new(Mutex::new(model)),
        }
    }

    pub fn model(&self) -> MutexGuard<'_, ClusterModel> {
        self.state.lock().expect("cluster model lock poisoned")
    }

    /// Builds a context backed by this cluster, with the built-in handlers
    /// registered.
    pub fn context(&self) -> DistributedContext {
        let shared = Arc::new(self.clone());
        let ctx = DistributedContext {
            config: self.config.clone(),
            nodes: shared.clone(),
            shards: shared.clone(),
            colocation: shared.clone(),
            collections: shared.clone(),
            placement: shared.clone(),
            ddl: shared.clone(),
            versions: shared.clone(),
            session: shared.clone(),
            invoker: shared.clone(),
            index_metadata: shared.clone(),
            rebalance: shared,
            handlers: Arc::new(HandlerRegistry::default()),
            post_setup: None,
        };
        ctx.register_builtin_handlers();
        ctx
    }

    pub fn add_node(&self, group_id: GroupId, node_id: NodeId, role: NodeRole, active: bool) {
        self.model().nodes.push(TestNode {
            group_id,
            node_id,
            role,
            cluster: "default".to_string(),
            is_active: active,
        });
    }

    /// Registers an unsharded collection whose single shard lives on
    /// `group`, with its retry table co-located alongside.
    pub fn add_collection(
        &self,
        database: &str,
        name: &str,
        collection_id: CollectionId,
        group: GroupId,
    ) -> CollectionRecord {
        self.add_collection_with_shape(database, name, collection_id, group, None, false)
    }

    /// Same, but with the legacy `shard_key_value` distribution column.
    pub fn add_legacy_collection(
        &self,
        database: &str,
        name: &str,
        collection_id: CollectionId,
        group: GroupId,
    ) -> CollectionRecord {
        self.add_collection_with_shape(
            database,
            name,
            collection_id,
            group,
            Some("shard_key_value".to_string()),
            false,
        )
    }

    /// Registers a sharded collection with one shard per listed group.
    pub fn add_sharded_collection(
        &self,
        database: &str,
        name: &str,
        collection_id: CollectionId,
        groups: &[GroupId],
    ) -> CollectionRecord {
        let record = self.add_collection_with_shape(
            database,
            name,
            collection_id,
            groups[0],
            Some("shard_key_value".to_string()),
            true,
        );
        let mut model = self.model();
        let table = record.table_name();
        for &group in &groups[1..] {
            let shard_id = model.next_shard_id;
            model.next_shard_id += 1;
            model
                .tables
                .get_mut(&table)
                .expect("table exists")
                .shards
                .push((shard_id, group));
        }
        record
    }

    fn add_collection_with_shape(
        &self,
        database: &str,
        name: &str,
        collection_id: CollectionId,
        group: GroupId,
        distribution_column: Option<String>,
        sharded: bool,
    ) -> CollectionRecord {
        let record = CollectionRecord {
            collection_id,
            database: database.to_string(),
            name: name.to_string(),
            shard_key: sharded.then(|| json!({ "_id": "hashed" })),
        };

        let mut model = self.model();
        let colocation_group = model.next_colocation_id;
        model.next_colocation_id += 1;
        for table in [record.table_name(), record.retry_table_name()] {
            let shard_id = model.next_shard_id;
            model.next_shard_id += 1;
            model.tables.insert(
                table,
                TableState {
                    distributed: true,
                    kind: TableKind::Distributed,
                    distribution_column: distribution_column.clone(),
                    colocation_group,
                    shards: vec![(shard_id, group)],
                },
            );
        }
        model.collections.insert(collection_id, record.clone());
        record
    }

    /// Registers a bare distributed table with one shard per listed group
    /// (groups may repeat to place several shards on one group).
    pub fn add_table(&self, table: &str, groups: &[GroupId]) {
        let mut model = self.model();
        let colocation_group = model.next_colocation_id;
        model.next_colocation_id += 1;
        let mut shards = Vec::new();
        for &group in groups {
            let shard_id = model.next_shard_id;
            model.next_shard_id += 1;
            shards.push((shard_id, group));
        }
        model.tables.insert(
            table.to_string(),
            TableState {
                distributed: true,
                kind: TableKind::Distributed,
                distribution_column: Some("shard_key_value".to_string()),
                colocation_group,
                shards,
            },
        );
    }

    pub fn colocation_group_of(&self, table: &str) -> ColocationGroupId {
        self.model().tables[table].colocation_group
    }

    pub fn set_colocation_group(&self, table: &str, group: ColocationGroupId) {
        self.model()
            .tables
            .get_mut(table)
            .expect("table exists")
            .colocation_group = group;
    }

    /// Hosting group of a single-shard table.
    pub fn shard_group_of(&self, table: &str) -> GroupId {
        self.model().tables[table].shards[0].1
    }

    pub fn distribution_column_of(&self, table: &str) -> Option<String> {
        self.model().tables[table].distribution_column.clone()
    }

    /// Tables sharing a colocation group, sorted.
    pub fn colocation_members(&self, group: ColocationGroupId) -> Vec<String> {
        let model = self.model();
        let mut members: Vec<String> = model
            .tables
            .iter()
            .filter(|(_, state)| state.distributed && state.colocation_group == group)
            .map(|(name, _)| name.clone())
            .collect();
        members.sort();
        members
    }

    pub fn mutation_log(&self) -> Vec<String> {
        self.model().mutation_log.clone()
    }

    pub fn mutation_count(&self) -> usize {
        self.model().mutation_log.len()
    }

    pub fn session_depth(&self) -> usize {
        self.model().session_stack.len()
    }

    pub fn invalidations(&self) -> usize {
        self.model().invalidations
    }

    pub fn set_version_record(&self, record: Option<ClusterVersionRecord>) {
        self.model().version_record = record;
    }

    pub fn set_installed_version(&self, version: ClusterVersion) {
        self.model().installed_version = version;
    }

    fn fresh_colocation_group(model: &mut ClusterModel) -> ColocationGroupId {
        let group = model.next_colocation_id;
        model.next_colocation_id += 1;
        group
    }

    fn resolve_colocation_target(
        model: &ClusterModel,
        target: ColocateWith<'_>,
    ) -> Result<Option<(ColocationGroupId, Option<GroupId>)>> {
        match target {
            ColocateWith::None => Ok(None),
            ColocateWith::Table(table) => {
                let state = model.tables.get(table).ok_or_else(|| {
                    DistributedError::internal(format!("unknown colocation target {table}"))
                })?;
                let host_group = state.shards.first().map(|(_, group)| *group);
                Ok(Some((state.colocation_group, host_group)))
            }
        }
    }

    fn group_for_address(model: &ClusterModel, address: &NodeAddress) -> Result<GroupId> {
        model
            .nodes
            .iter()
            .find(|node| node.address() == *address)
            .map(|node| node.group_id)
            .ok_or_else(|| {
                DistributedError::internal(format!("no node with address {address}"))
            })
    }
}

#[async_trait]
impl NodeCatalog for TestCluster {
    async fn shard_hosting_nodes(&self) -> Result<Vec<NodeRow>> {
        let model = self.model();
        let mut rows: Vec<NodeRow> = model
            .nodes
            .iter()
            .map(|node| NodeRow {
                group_id: Some(node.group_id),
                node_id: Some(node.node_id),
                role: Some(node.role),
                cluster: Some(node.cluster.clone()),
                is_active: Some(node.is_active),
            })
            .collect();
        if model.emit_broken_node_row {
            rows.push(NodeRow {
                group_id: Some(9),
                node_id: Some(9),
                role: None,
                cluster: None,
                is_active: Some(true),
            });
        }
        Ok(rows)
    }

    async fn primary_node_for_group(&self, group_id: GroupId) -> Result<Option<NodeAddress>> {
        Ok(self
            .model()
            .nodes
            .iter()
            .find(|node| {
                node.group_id == group_id && node.role == NodeRole::Primary && node.is_active
            })
            .map(TestNode::address))
    }

    async fn is_metadata_coordinator(&self) -> Result<bool> {
        Ok(self.model().is_coordinator)
    }

    async fn active_node_count(&self) -> Result<usize> {
        Ok(self.model().nodes.iter().filter(|node| node.is_active).count())
    }
}

#[async_trait]
impl ShardCatalog for TestCluster {
    async fn shard_ids_for_table(&self, table: &str) -> Result<Vec<ShardId>> {
        let model = self.model();
        Ok(model
            .tables
            .get(table)
            .filter(|state| state.distributed)
            .map(|state| state.shards.iter().map(|(shard_id, _)| *shard_id).collect())
            .unwrap_or_default())
    }

    async fn placement_for_shard(&self, shard_id: ShardId) -> Result<Option<ShardPlacement>> {
        let model = self.model();
        for state in model.tables.values() {
            if let Some((_, group)) = state.shards.iter().find(|(id, _)| *id == shard_id) {
                let address = model
                    .nodes
                    .iter()
                    .find(|node| node.group_id == *group && node.role == NodeRole::Primary)
                    .map(TestNode::address);
                return Ok(address.map(|address| ShardPlacement {
                    shard_id,
                    group_id: *group,
                    address,
                }));
            }
        }
        Ok(None)
    }

    async fn table_distribution(&self, table: &str) -> Result<Option<TableDistribution>> {
        let model = self.model();
        Ok(model
            .tables
            .get(table)
            .filter(|state| state.distributed)
            .map(|state| TableDistribution {
                kind: state.kind,
                distribution_column: state.distribution_column.clone(),
                shard_count: state.shards.len() as u64,
            }))
    }

    async fn reference_placement_count(&self, table: &str) -> Result<usize> {
        let model = self.model();
        match model.reference_placements.get(table) {
            Some(&count) => Ok(count),
            // Fully replicated unless a test says otherwise.
            None => Ok(model.nodes.iter().filter(|node| node.is_active).count()),
        }
    }
}

#[async_trait]
impl ColocationCatalog for TestCluster {
    async fn colocation_group(&self, table: &str) -> Result<Option<ColocationGroupId>> {
        Ok(self
            .model()
            .tables
            .get(table)
            .filter(|state| state.distributed)
            .map(|state| state.colocation_group))
    }
}

#[async_trait]
impl CollectionCatalog for TestCluster {
    async fn by_name(&self, database: &str, name: &str) -> Result<Option<CollectionRecord>> {
        Ok(self
            .model()
            .collections
            .values()
            .find(|record| record.database == database && record.name == name)
            .cloned())
    }

    async fn by_id(&self, collection_id: CollectionId) -> Result<Option<CollectionRecord>> {
        Ok(self.model().collections.get(&collection_id).cloned())
    }

    async fn all_ids(&self) -> Result<Vec<CollectionId>> {
        let mut ids: Vec<CollectionId> = self.model().collections.keys().copied().collect();
        ids.sort_unstable();
        Ok(ids)
    }
}

#[async_trait]
impl VersionStore for TestCluster {
    async fn read(&self) -> Result<Option<ClusterVersionRecord>> {
        Ok(self.model().version_record.clone())
    }

    async fn write(&self, record: &ClusterVersionRecord) -> Result<()> {
        self.model().version_record = Some(record.clone());
        Ok(())
    }

    async fn invalidate(&self) -> Result<()> {
        self.model().invalidations += 1;
        Ok(())
    }

    fn installed_version(&self) -> ClusterVersion {
        self.model().installed_version
    }

    async fn substrate_version(&self) -> Result<ClusterVersion> {
        Ok(self.model().substrate_version)
    }
}

impl SessionEnv for TestCluster {
    fn push(&self, setting: SessionOverride) {
        self.model().session_stack.push(setting);
    }

    fn pop(&self, setting: SessionOverride) {
        let popped = self.model().session_stack.pop();
        assert_eq!(popped, Some(setting), "session overrides must unwind LIFO");
    }
}

#[async_trait]
impl PlacementOps for TestCluster {
    async fn update_colocation(&self, table: &str, target: ColocateWith<'_>) -> Result<()> {
        let mut model = self.model();
        let group = match Self::resolve_colocation_target(&model, target)? {
            Some((group, _)) => group,
            None => Self::fresh_colocation_group(&mut model),
        };
        let state = model
            .tables
            .get_mut(table)
            .ok_or_else(|| DistributedError::internal(format!("unknown table {table}")))?;
        state.colocation_group = group;
        model
            .mutation_log
            .push(format!("update_colocation({table}, {target:?})"));
        Ok(())
    }

    async fn alter_colocation(
        &self,
        table: &str,
        target: ColocateWith<'_>,
        cascade_to_colocated: Option<bool>,
    ) -> Result<()> {
        let mut model = self.model();
        let group = match Self::resolve_colocation_target(&model, target)? {
            Some((group, _)) => group,
            None => Self::fresh_colocation_group(&mut model),
        };
        let state = model
            .tables
            .get_mut(table)
            .ok_or_else(|| DistributedError::internal(format!("unknown table {table}")))?;
        state.colocation_group = group;
        model.mutation_log.push(format!(
            "alter_colocation({table}, {target:?}, cascade={cascade_to_colocated:?})"
        ));
        Ok(())
    }

    async fn undistribute(&self, table: &str) -> Result<()> {
        let mut model = self.model();
        let state = model
            .tables
            .get_mut(table)
            .ok_or_else(|| DistributedError::internal(format!("unknown table {table}")))?;
        state.distributed = false;
        state.shards.clear();
        model.mutation_log.push(format!("undistribute({table})"));
        Ok(())
    }

    async fn redistribute(
        &self,
        table: &str,
        distribution_column: Option<&str>,
        colocate_with: ColocateWith<'_>,
        _shard_count: Option<u64>,
    ) -> Result<()> {
        let mut model = self.model();
        let (group, host_group) = match Self::resolve_colocation_target(&model, colocate_with)? {
            Some((group, host_group)) => (group, host_group),
            None => (Self::fresh_colocation_group(&mut model), None),
        };
        let shard_id = model.next_shard_id;
        model.next_shard_id += 1;
        let state = model
            .tables
            .get_mut(table)
            .ok_or_else(|| DistributedError::internal(format!("unknown table {table}")))?;
        state.distributed = true;
        state.distribution_column = distribution_column.map(str::to_string);
        state.colocation_group = group;
        state.shards = vec![(shard_id, host_group.unwrap_or(0))];
        model.mutation_log.push(format!(
            "redistribute({table}, column={distribution_column:?}, {colocate_with:?})"
        ));
        Ok(())
    }

    async fn move_placement(
        &self,
        shard_id: ShardId,
        from: &NodeAddress,
        to: &NodeAddress,
        mode: ShardTransferMode,
    ) -> Result<()> {
        let mut model = self.model();
        let from_group = Self::group_for_address(&model, from)?;
        let to_group = Self::group_for_address(&model, to)?;

        let moved_group = model
            .tables
            .values()
            .find_map(|state| {
                state
                    .shards
                    .iter()
                    .find(|(id, _)| *id == shard_id)
                    .map(|_| state.colocation_group)
            })
            .ok_or_else(|| DistributedError::internal(format!("unknown shard {shard_id}")))?;

        // The substrate moves the whole colocation group's placements on
        // that node, not just the named shard.
        for state in model.tables.values_mut() {
            if state.colocation_group != moved_group {
                continue;
            }
            for shard in state.shards.iter_mut() {
                if shard.1 == from_group {
                    shard.1 = to_group;
                }
            }
        }
        model.mutation_log.push(format!(
            "move_placement({shard_id}, {from} -> {to}, {})",
            mode.as_str()
        ));
        Ok(())
    }

    async fn create_reference_table(&self, table: &str) -> Result<()> {
        let mut model = self.model();
        let active = model.nodes.iter().filter(|node| node.is_active).count();
        model.reference_placements.insert(table.to_string(), active);
        let group = Self::fresh_colocation_group(&mut model);
        let shard_id = model.next_shard_id;
        model.next_shard_id += 1;
        model
            .tables
            .entry(table.to_string())
            .and_modify(|state| {
                state.distributed = true;
                state.kind = TableKind::Reference;
            })
            .or_insert(TableState {
                distributed: true,
                kind: TableKind::Reference,
                distribution_column: None,
                colocation_group: group,
                shards: vec![(shard_id, 0)],
            });
        model
            .mutation_log
            .push(format!("create_reference_table({table})"));
        Ok(())
    }

    async fn replicate_reference_table(&self, table: &str) -> Result<()> {
        let mut model = self.model();
        let active = model.nodes.iter().filter(|node| node.is_active).count();
        model.reference_placements.insert(table.to_string(), active);
        model
            .mutation_log
            .push(format!("replicate_reference_table({table})"));
        Ok(())
    }

    async fn add_local_table_to_metadata(&self, table: &str) -> Result<()> {
        self.model()
            .mutation_log
            .push(format!("add_local_table_to_metadata({table})"));
        Ok(())
    }

    async fn create_distributed_function(
        &self,
        signature: &str,
        distribution_arg: &str,
        colocate_with: &str,
    ) -> Result<()> {
        self.model().mutation_log.push(format!(
            "create_distributed_function({signature}, {distribution_arg}, {colocate_with})"
        ));
        Ok(())
    }
}

impl TestCluster {
    fn log_ddl(&self, entry: String) -> Result<()> {
        let mut model = self.model();
        if let Some(prefix) = &model.fail_ddl_prefix {
            if entry.starts_with(prefix.as_str()) {
                return Err(DistributedError::internal(format!(
                    "injected ddl failure at {entry}"
                )));
            }
        }
        model.mutation_log.push(entry);
        Ok(())
    }
}

#[async_trait]
impl CatalogDdl for TestCluster {
    async fn add_column_if_not_exists(
        &self,
        table: &str,
        column: &str,
        _definition: &str,
    ) -> Result<()> {
        self.log_ddl(format!("add_column_if_not_exists({table}, {column})"))
    }

    async fn drop_column_if_exists(&self, table: &str, column: &str) -> Result<()> {
        self.log_ddl(format!("drop_column_if_exists({table}, {column})"))
    }

    async fn create_or_replace_trigger(
        &self,
        name: &str,
        table: &str,
        _event: &str,
        _function: &str,
    ) -> Result<()> {
        self.log_ddl(format!("create_or_replace_trigger({name}, {table})"))
    }

    async fn drop_trigger_if_exists(&self, name: &str, table: &str) -> Result<()> {
        self.log_ddl(format!("drop_trigger_if_exists({name}, {table})"))
    }

    async fn drop_table_if_exists(&self, table: &str) -> Result<()> {
        self.log_ddl(format!("drop_table_if_exists({table})"))
    }

    async fn create_index_build_queue(&self, options: IndexQueueOptions) -> Result<()> {
        self.log_ddl(format!(
            "create_index_build_queue(options={}, drop_command_type={})",
            options.include_options, options.include_drop_command_type
        ))
    }

    async fn grant_select(&self, table: &str, role: &str) -> Result<()> {
        self.log_ddl(format!("grant_select({table}, {role})"))
    }

    async fn grant_roles_with_admin(&self, roles: &[&str], grantee: &str) -> Result<()> {
        self.log_ddl(format!("grant_roles_with_admin({roles:?}, {grantee})"))
    }

    async fn reset_primary_key(&self, table: &str, columns: &[&str]) -> Result<()> {
        self.log_ddl(format!("reset_primary_key({table}, {columns:?})"))
    }

    async fn table_owner(&self, table: &str) -> Result<Option<String>> {
        Ok(self.model().table_owners.get(table).cloned())
    }

    async fn set_table_owner(&self, table: &str, owner: &str) -> Result<()> {
        self.model()
            .table_owners
            .insert(table.to_string(), owner.to_string());
        self.log_ddl(format!("set_table_owner({table}, {owner})"))
    }
}

#[async_trait]
impl NodeInvoker for TestCluster {
    async fn invoke(
        &self,
        shard: &ShardPlacement,
        handler: &str,
        _payload: &Document,
        _read_only: bool,
    ) -> Result<Document> {
        let mut model = self.model();
        if model.fail_invoke_group == Some(shard.group_id) {
            return Err(DistributedError::internal(format!(
                "node invocation failed on group {}",
                shard.group_id
            )));
        }
        model.invocations.push((shard.group_id, handler.to_string()));
        Ok(json!({ "group": shard.group_id, "shardId": shard.shard_id }))
    }
}

#[async_trait]
impl IndexMetadataStore for TestCluster {
    async fn apply_update(
        &self,
        request: &IndexMetadataUpdateRequest,
        ignore_missing_shards: bool,
    ) -> Result<()> {
        self.model()
            .index_updates
            .push((*request, ignore_missing_shards));
        Ok(())
    }
}

#[async_trait]
impl RebalanceControl for TestCluster {
    async fn jobs(&self) -> Result<Vec<RebalanceJob>> {
        Ok(self.model().rebalance_jobs.clone())
    }

    async fn strategies(&self) -> Result<Vec<RebalanceStrategy>> {
        Ok(self.model().rebalance_strategies.clone())
    }

    async fn set_default_strategy(&self, name: &str) -> Result<()> {
        self.model()
            .rebalance_log
            .push(format!("set_default_strategy({name})"));
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        self.model().rebalance_log.push("start".to_string());
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.model().rebalance_log.push("stop".to_string());
        Ok(())
    }
}
