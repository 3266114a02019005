//! Shard rebalancer control surface.
//!
//! The substrate owns the rebalancing machinery; this module only gates,
//! starts, stops and reports it in driver-facing shape. Disabled by default
//! via [`crate::config::DistributedConfig::enable_shard_rebalancer`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::Document;

/// Lifecycle state of one substrate rebalance job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RebalanceJobState {
    Scheduled,
    Running,
    Cancelling,
    Failing,
    Finished,
    Cancelled,
    Failed,
}

impl RebalanceJobState {
    /// A job in one of these states blocks starting another rebalance.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            RebalanceJobState::Scheduled
                | RebalanceJobState::Running
                | RebalanceJobState::Cancelling
                | RebalanceJobState::Failing
        )
    }

    /// Whether status reporting files the job under `runningJobs`.
    pub fn is_reported_running(&self) -> bool {
        matches!(
            self,
            RebalanceJobState::Scheduled | RebalanceJobState::Running
        )
    }
}

/// One rebalance job as reported by the substrate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebalanceJob {
    pub state: RebalanceJobState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Document>,
}

/// A named rebalance strategy offered by the substrate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebalanceStrategy {
    pub name: String,
    pub is_default: bool,
}

/// Substrate rebalancer controls.
#[async_trait]
pub trait RebalanceControl: Send + Sync {
    async fn jobs(&self) -> Result<Vec<RebalanceJob>>;

    async fn strategies(&self) -> Result<Vec<RebalanceStrategy>>;

    async fn set_default_strategy(&self, name: &str) -> Result<()>;

    async fn start(&self) -> Result<()>;

    async fn stop(&self) -> Result<()>;
}
