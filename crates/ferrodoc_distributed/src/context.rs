//! Process-wide context bundling the substrate collaborators.
//!
//! The substrate is pluggable: every capability the control plane consumes
//! is a trait object wired in here once at process start. Call sites take
//! `&DistributedContext`; no global mutable state is involved.

use std::sync::Arc;

use crate::catalog::{
    CollectionCatalog, ColocationCatalog, NodeCatalog, ShardCatalog, VersionStore,
};
use crate::config::DistributedConfig;
use crate::dispatch::{HandlerRegistry, NodeInvoker};
use crate::index_ops::IndexMetadataStore;
use crate::placement::{CatalogDdl, PlacementOps};
use crate::rebalancer::RebalanceControl;
use crate::session::SessionEnv;
use crate::upgrade::PostSetupHook;

pub struct DistributedContext {
    pub config: DistributedConfig,
    pub nodes: Arc<dyn NodeCatalog>,
    pub shards: Arc<dyn ShardCatalog>,
    pub colocation: Arc<dyn ColocationCatalog>,
    pub collections: Arc<dyn CollectionCatalog>,
    pub placement: Arc<dyn PlacementOps>,
    pub ddl: Arc<dyn CatalogDdl>,
    pub versions: Arc<dyn VersionStore>,
    pub session: Arc<dyn SessionEnv>,
    pub invoker: Arc<dyn NodeInvoker>,
    pub index_metadata: Arc<dyn IndexMetadataStore>,
    pub rebalance: Arc<dyn RebalanceControl>,
    /// Per-node command handlers, registered ahead of any dispatch.
    pub handlers: Arc<HandlerRegistry>,
    /// Extension point invoked after the built-in upgrade steps.
    pub post_setup: Option<Arc<dyn PostSetupHook>>,
}

impl DistributedContext {
    /// Registers the handlers this crate ships with. Call once after
    /// constructing the context.
    pub fn register_builtin_handlers(&self) {
        self.handlers.register(
            crate::index_ops::INDEX_METADATA_HANDLER,
            Arc::new(crate::index_ops::IndexMetadataWorker),
        );
    }
}
