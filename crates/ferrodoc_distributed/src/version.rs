//! Cluster version triples and upgrade gating arithmetic.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{DistributedError, Result};

/// A `(major, minor, patch)` version triple, ordered lexicographically.
///
/// The substrate's package catalog formats versions as `"major.minor-patch"`
/// (e.g. `"1.23-2"`); the dotted form is accepted on parse as well.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct ClusterVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ClusterVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl fmt::Display for ClusterVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}-{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for ClusterVersion {
    type Err = DistributedError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim().trim_matches('"');
        let parts: Vec<&str> = trimmed.split(['.', '-']).collect();
        if parts.len() != 3 {
            return Err(DistributedError::internal(format!(
                "malformed cluster version string: {s}"
            )));
        }
        let mut nums = [0u32; 3];
        for (slot, part) in nums.iter_mut().zip(&parts) {
            *slot = part.parse().map_err(|_| {
                DistributedError::internal(format!("malformed cluster version string: {s}"))
            })?;
        }
        Ok(ClusterVersion::new(nums[0], nums[1], nums[2]))
    }
}

/// Version window of one upgrade run, used to gate migration steps.
///
/// A step applies when its version lies strictly after the last completed
/// upgrade and at or before the installed package version. The same
/// predicate is handed to the post-setup extension point so external setup
/// code shares the gating arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionGate {
    pub last_upgrade: ClusterVersion,
    pub installed: ClusterVersion,
}

impl VersionGate {
    pub fn should_apply(&self, step_version: ClusterVersion) -> bool {
        step_version > self.last_upgrade && step_version <= self.installed
    }
}
