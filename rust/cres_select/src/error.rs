// SPDX-License-Identifier: GPL-2.0

//! Selection error categories.
//!
//! The driver treats `InsufficientResources` and `TopologyBestSwitch` as
//! retry triggers across its placement passes; every other kind aborts the
//! selection.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SelectError {
    /// A pass failed to satisfy the job's CPU/node minima.
    #[error("insufficient resources")]
    InsufficientResources,

    /// A required node fails state, memory, GRES, topology coverage or
    /// max-CPUs filters.
    #[error("required node unusable")]
    RequiredNodeUnusable,

    /// Required nodes span multiple consecutive blocks or switches in
    /// contiguous/topology mode.
    #[error("required nodes are not contiguous")]
    ContiguityUnmet,

    /// Required nodes alone exceed the job's max-CPU cap.
    #[error("max CPU limit exceeded by required nodes")]
    MaxCpuLimitExceeded,

    /// No single switch satisfies the request; the job may be deferred.
    #[error("no switch satisfies the request")]
    TopologyBestSwitch,

    /// Cluster node count disagrees with the candidate map.
    #[error("node count inconsistent with controller")]
    NodeCountMismatch,

    /// The job references a partition missing from the allocation table.
    #[error("job partition not in allocation table")]
    PartitionMissing,
}

impl SelectError {
    /// Kinds the placement driver may recover from by trying a more
    /// permissive pass or a trimmed candidate set.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SelectError::InsufficientResources | SelectError::TopologyBestSwitch
        )
    }
}
