//! Cluster version upgrade engine.
//!
//! Schema/metadata changes that must happen exactly once per version
//! boundary, cluster-wide, run through here: an ordered table of
//! version-gated migration steps executed by one generic runner. Every step
//! is individually idempotent ("add column if not exists", "create or
//! replace trigger"), so a partially completed attempt can simply be
//! re-run. Re-running with no version delta costs only the version-compare
//! read.
//!
//! The engine assumes a single coordinator process invokes it at a time;
//! that is an operational invariant, not enforced here. Other processes
//! observe a finished upgrade eventually, via the version-record
//! invalidation broadcast.

use futures_util::future::BoxFuture;
use tracing::{debug, info, warn};

use crate::catalog::ClusterVersionRecord;
use crate::context::DistributedContext;
use crate::error::Result;
use crate::placement::{documents_table, IndexQueueOptions};
use crate::session::{ScopedOverride, SessionOverride};
use crate::version::{ClusterVersion, VersionGate};
use crate::{CATALOG_SCHEMA, DISTRIBUTED_SCHEMA};

/// Reference catalog of registered collections.
pub fn collections_catalog() -> String {
    format!("{CATALOG_SCHEMA}.collections")
}

/// Reference catalog of index metadata.
pub fn collection_indexes_catalog() -> String {
    format!("{CATALOG_SCHEMA}.collection_indexes")
}

/// Singleton cluster version/metadata record table.
pub fn cluster_data_table() -> String {
    format!("{DISTRIBUTED_SCHEMA}.cluster_data")
}

/// Queue table drained by the background index builder.
pub fn index_build_queue_table() -> String {
    format!("{CATALOG_SCHEMA}.index_build_queue")
}

/// Role owning API-managed objects.
pub const ADMIN_ROLE: &str = "ferrodoc_admin_role";

/// Role granted read access to data and metadata.
pub const READ_ONLY_ROLE: &str = "ferrodoc_readonly_role";

type StepFn = for<'a> fn(&'a DistributedContext, bool) -> BoxFuture<'a, Result<()>>;

/// One version-gated, idempotent migration step.
pub struct MigrationStep {
    pub version: ClusterVersion,
    pub name: &'static str,
    run: StepFn,
}

impl MigrationStep {
    pub async fn run(&self, ctx: &DistributedContext, is_initialize: bool) -> Result<()> {
        (self.run)(ctx, is_initialize).await
    }
}

/// Extension point invoked after the built-in steps, sharing the same
/// version gate so external setup code uses identical gating arithmetic.
#[async_trait::async_trait]
pub trait PostSetupHook: Send + Sync {
    async fn run(
        &self,
        ctx: &DistributedContext,
        is_initialize: bool,
        gate: VersionGate,
    ) -> Result<()>;
}

/// First-time cluster setup. A cluster that already carries an
/// `initialized_version` is left untouched.
pub async fn initialize_cluster(ctx: &DistributedContext) -> Result<bool> {
    if let Some(record) = ctx.versions.read().await? {
        if record.initialized_version.is_some() {
            info!("cluster already initialized, skipping initialize");
            return Ok(false);
        }
    }
    setup_cluster(ctx, true).await
}

/// Brings cluster metadata up to the installed package version. Returns
/// whether any migration step ran.
pub async fn complete_upgrade(ctx: &DistributedContext) -> Result<bool> {
    // Upgrades must go through even when the disk-full latch has put the
    // cluster into read-only mode.
    let _read_only = ScopedOverride::new(ctx.session.clone(), SessionOverride::BypassReadOnly);
    setup_cluster(ctx, false).await
}

async fn setup_cluster(ctx: &DistributedContext, is_initialize: bool) -> Result<bool> {
    // Writes to the version record fan out through the replicated catalog;
    // repair its replication first or those writes fail mid-upgrade.
    ensure_reference_catalog_replicated(ctx, &collections_catalog()).await?;

    let installed = ctx.versions.installed_version();
    let last_upgrade = update_cluster_metadata(ctx, is_initialize).await?;
    if last_upgrade == installed {
        info!(version = %installed, "cluster version is up-to-date, nothing to upgrade");
        return Ok(false);
    }

    if !is_initialize {
        info!(previous = %last_upgrade, current = %installed, "upgrading cluster metadata");
    }

    let gate = VersionGate {
        last_upgrade,
        installed,
    };
    for step in migration_steps() {
        if !gate.should_apply(step.version) {
            continue;
        }
        debug!(step = step.name, version = %step.version, "applying migration step");
        step.run(ctx, is_initialize).await?;
    }

    if let Some(hook) = &ctx.post_setup {
        hook.run(ctx, is_initialize, gate).await?;
    }

    ctx.versions.invalidate().await?;
    Ok(true)
}

/// Compare-and-set on the version record: reads the stored
/// `last_deploy_version`, and when it differs from the installed version,
/// advances the record (seeding `initialized_version` on first setup).
/// Returns the version stored before the write.
async fn update_cluster_metadata(
    ctx: &DistributedContext,
    is_initialize: bool,
) -> Result<ClusterVersion> {
    let installed = ctx.versions.installed_version();
    let mut record = ctx
        .versions
        .read()
        .await?
        .unwrap_or_else(ClusterVersionRecord::initial);
    let previous = record.last_deploy_version;
    if previous == installed {
        return Ok(previous);
    }

    record.last_deploy_version = installed;
    record.last_substrate_version = ctx.versions.substrate_version().await?;
    if is_initialize {
        record.initialized_version = Some(installed);
    }
    ctx.versions.write(&record).await?;
    Ok(previous)
}

/// Re-replicates a reference catalog when its placement count has fallen
/// behind the active node count (a node was added since the last sync).
async fn ensure_reference_catalog_replicated(
    ctx: &DistributedContext,
    table: &str,
) -> Result<()> {
    if !ctx.config.enable_metadata_reference_sync {
        return Ok(());
    }
    let _quiet = ScopedOverride::new(ctx.session.clone(), SessionOverride::QuietLogging);

    let active_nodes = ctx.nodes.active_node_count().await?;
    let placements = ctx.shards.reference_placement_count(table).await?;
    if placements != active_nodes {
        warn!(
            table,
            active_nodes, placements, "reference catalog under-replicated, repairing"
        );
        ctx.placement.replicate_reference_table(table).await?;
    }
    Ok(())
}

/// Ordered migration-step table. Declaration order is the tie-break for
/// steps sharing a version.
pub fn migration_steps() -> &'static [MigrationStep] {
    MIGRATION_STEPS
}

static MIGRATION_STEPS: &[MigrationStep] = &[
    MigrationStep {
        version: ClusterVersion::new(1, 0, 5),
        name: "create_reference_catalogs",
        run: step_create_reference_catalogs,
    },
    MigrationStep {
        version: ClusterVersion::new(1, 7, 0),
        name: "add_view_definition_column",
        run: step_add_view_definition_column,
    },
    MigrationStep {
        version: ClusterVersion::new(1, 8, 0),
        name: "create_version_invalidation_trigger",
        run: step_create_version_invalidation_trigger,
    },
    MigrationStep {
        version: ClusterVersion::new(1, 8, 0),
        name: "add_schema_validation_columns",
        run: step_add_schema_validation_columns,
    },
    MigrationStep {
        version: ClusterVersion::new(1, 12, 0),
        name: "create_index_build_queue",
        run: step_create_index_build_queue,
    },
    MigrationStep {
        version: ClusterVersion::new(1, 14, 0),
        name: "drop_legacy_change_stream",
        run: step_drop_legacy_change_stream,
    },
    MigrationStep {
        version: ClusterVersion::new(1, 17, 1),
        name: "grant_read_only_permissions",
        run: step_grant_read_only_permissions,
    },
    MigrationStep {
        version: ClusterVersion::new(1, 21, 0),
        name: "grant_cluster_admin_role",
        run: step_grant_cluster_admin_role,
    },
    MigrationStep {
        version: ClusterVersion::new(1, 23, 0),
        name: "reset_cluster_data_primary_key",
        run: step_reset_cluster_data_primary_key,
    },
    MigrationStep {
        version: ClusterVersion::new(1, 23, 2),
        name: "replicate_reference_catalogs",
        run: step_replicate_reference_catalogs,
    },
    MigrationStep {
        version: ClusterVersion::new(1, 102, 0),
        name: "update_changes_table_owner",
        run: step_update_changes_table_owner,
    },
    MigrationStep {
        version: ClusterVersion::new(1, 109, 0),
        name: "recreate_index_build_queue",
        run: step_recreate_index_build_queue,
    },
];

fn step_create_reference_catalogs(
    ctx: &DistributedContext,
    _is_initialize: bool,
) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        ctx.placement
            .create_reference_table(&collections_catalog())
            .await?;
        ctx.placement
            .create_reference_table(&collection_indexes_catalog())
            .await?;
        distribute_changes_table(ctx).await?;
        ctx.ddl
            .create_or_replace_trigger(
                "collections_trigger_validate_dbname",
                &collections_catalog(),
                "BEFORE INSERT OR UPDATE",
                "ferrodoc_api_internal.trigger_validate_dbname",
            )
            .await?;
        ctx.placement
            .create_reference_table(&cluster_data_table())
            .await
    })
}

/// Distributes the change-tracking table as a single-shard table and pushes
/// the single-document CRUD entry points down to the nodes owning the
/// target shard.
async fn distribute_changes_table(ctx: &DistributedContext) -> Result<()> {
    let changes = crate::catalog::changes_table();

    // Sequential shard modification keeps the just-created shard visible to
    // the distributed-function registrations later in this transaction.
    let _mode = ScopedOverride::new(
        ctx.session.clone(),
        SessionOverride::SequentialShardModify,
    );
    ctx.placement
        .redistribute(
            &changes,
            Some(crate::catalog::SHARD_KEY_VALUE_COLUMN),
            crate::placement::ColocateWith::None,
            None,
        )
        .await?;

    let bson = "ferrodoc_core.bson";
    let signatures = [
        format!("ferrodoc_api_internal.insert_one(bigint,bigint,{bson},text)"),
        format!("ferrodoc_api_internal.update_one(bigint,bigint,{bson},{bson},{bson},bool,{bson},text)"),
        format!("ferrodoc_api_internal.delete_one(bigint,bigint,{bson},{bson},bool,{bson},text)"),
    ];
    for signature in &signatures {
        ctx.placement
            .create_distributed_function(signature, "p_shard_key_value", &changes)
            .await?;
    }
    Ok(())
}

fn step_add_view_definition_column(
    ctx: &DistributedContext,
    _is_initialize: bool,
) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        ctx.ddl
            .add_column_if_not_exists(
                &collections_catalog(),
                "view_definition",
                "ferrodoc_core.bson default null",
            )
            .await
    })
}

fn step_create_version_invalidation_trigger(
    ctx: &DistributedContext,
    _is_initialize: bool,
) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        ctx.ddl
            .create_or_replace_trigger(
                "cluster_versions_trigger",
                &cluster_data_table(),
                "AFTER UPDATE OR DELETE",
                "ferrodoc_api_internal.update_version_data",
            )
            .await?;
        // Invalidate immediately so this very process starts honoring the
        // trigger it just created.
        ctx.versions.invalidate().await
    })
}

fn step_add_schema_validation_columns(
    ctx: &DistributedContext,
    _is_initialize: bool,
) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        let catalog = collections_catalog();
        ctx.ddl
            .add_column_if_not_exists(&catalog, "validator", "ferrodoc_core.bson default null")
            .await?;
        ctx.ddl
            .add_column_if_not_exists(
                &catalog,
                "validation_level",
                "text default null check (validation_level in ('off', 'strict', 'moderate'))",
            )
            .await?;
        ctx.ddl
            .add_column_if_not_exists(
                &catalog,
                "validation_action",
                "text default null check (validation_action in ('warn', 'error'))",
            )
            .await
    })
}

fn step_create_index_build_queue(
    ctx: &DistributedContext,
    _is_initialize: bool,
) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move { recreate_index_build_queue(ctx, IndexQueueOptions::default()).await })
}

async fn recreate_index_build_queue(
    ctx: &DistributedContext,
    options: IndexQueueOptions,
) -> Result<()> {
    let queue = index_build_queue_table();
    ctx.ddl.drop_table_if_exists(&queue).await?;
    ctx.ddl.create_index_build_queue(options).await?;
    ctx.placement.add_local_table_to_metadata(&queue).await
}

fn step_drop_legacy_change_stream(
    ctx: &DistributedContext,
    _is_initialize: bool,
) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        for collection_id in ctx.collections.all_ids().await? {
            let table = documents_table(collection_id);
            ctx.ddl
                .drop_column_if_exists(&table, "change_description")
                .await?;
            ctx.ddl
                .drop_trigger_if_exists("record_changes_trigger", &table)
                .await?;
        }
        Ok(())
    })
}

fn step_grant_read_only_permissions(
    ctx: &DistributedContext,
    _is_initialize: bool,
) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        ctx.ddl
            .grant_select(&cluster_data_table(), READ_ONLY_ROLE)
            .await?;
        for collection_id in ctx.collections.all_ids().await? {
            ctx.ddl
                .grant_select(&documents_table(collection_id), READ_ONLY_ROLE)
                .await?;
        }
        Ok(())
    })
}

fn step_grant_cluster_admin_role(
    ctx: &DistributedContext,
    is_initialize: bool,
) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        // Fresh clusters configure the admin role at provisioning time; the
        // grant only backfills clusters upgrading into it.
        if is_initialize {
            return Ok(());
        }
        let Some(admin) = ctx.config.cluster_admin_role.as_deref() else {
            return Ok(());
        };
        ctx.ddl
            .grant_roles_with_admin(&[ADMIN_ROLE, READ_ONLY_ROLE], admin)
            .await
    })
}

fn step_reset_cluster_data_primary_key(
    ctx: &DistributedContext,
    _is_initialize: bool,
) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        ctx.ddl
            .reset_primary_key(&cluster_data_table(), &["metadata"])
            .await
    })
}

fn step_replicate_reference_catalogs(
    ctx: &DistributedContext,
    _is_initialize: bool,
) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        for table in [
            collections_catalog(),
            collection_indexes_catalog(),
            cluster_data_table(),
        ] {
            // A reference catalog with no shard rows was never converted;
            // convert it now, otherwise leave it alone.
            if ctx.shards.shard_ids_for_table(&table).await?.is_empty() {
                ctx.placement.create_reference_table(&table).await?;
            }
        }
        Ok(())
    })
}

fn step_update_changes_table_owner(
    ctx: &DistributedContext,
    _is_initialize: bool,
) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        let changes = crate::catalog::changes_table();
        let Some(owner) = ctx.ddl.table_owner(&changes).await? else {
            return Ok(());
        };
        if owner != ADMIN_ROLE {
            ctx.ddl.set_table_owner(&changes, ADMIN_ROLE).await?;
        }
        Ok(())
    })
}

fn step_recreate_index_build_queue(
    ctx: &DistributedContext,
    _is_initialize: bool,
) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        recreate_index_build_queue(
            ctx,
            IndexQueueOptions {
                include_options: true,
                include_drop_command_type: true,
            },
        )
        .await
    })
}
