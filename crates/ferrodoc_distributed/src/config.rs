//! Runtime configuration for the distributed control plane.

/// Feature toggles and roles, resolved once at process start.
#[derive(Clone, Debug)]
pub struct DistributedConfig {
    /// Verify and repair reference-catalog replication before cluster
    /// setup/upgrade runs.
    pub enable_metadata_reference_sync: bool,
    /// Expose the shard rebalancer command surface.
    pub enable_shard_rebalancer: bool,
    /// Expose the `moveCollection` command.
    pub enable_move_collection: bool,
    /// Operator role granted admin over the API roles during upgrade, if
    /// configured.
    pub cluster_admin_role: Option<String>,
}

impl Default for DistributedConfig {
    fn default() -> Self {
        Self {
            enable_metadata_reference_sync: true,
            enable_shard_rebalancer: false,
            enable_move_collection: true,
            cluster_admin_role: None,
        }
    }
}
