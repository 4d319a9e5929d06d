// SPDX-License-Identifier: GPL-2.0

//! Job descriptor and the enums that steer a selection.

use crate::bitmap::Bitmap;

/// Multi-core shape constraints. `None` means unset.
#[derive(Debug, Clone, Default)]
pub struct MultiCore {
    /// Minimum sockets to allocate per node.
    pub sockets_per_node: Option<u16>,
    /// Minimum cores to allocate per socket.
    pub cores_per_socket: Option<u16>,
    /// Cap on threads used per core.
    pub threads_per_core: Option<u16>,
    /// Tasks to launch per core. 0 = unset.
    pub ntasks_per_core: u16,
    /// Tasks to launch per socket. 0 = unset.
    pub ntasks_per_socket: u16,
}

/// What the job demands of node sharing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRequest {
    /// Willing to share CPUs with other jobs.
    Available,
    /// Needs its CPUs unshared, but tolerates other jobs on the node.
    OneRow,
    /// Needs whole nodes.
    Reserved,
}

/// Selection mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectMode {
    /// Report feasibility against an idle cluster; commit nothing.
    TestOnly,
    /// Pick nodes and estimate CPU usage; do not build the allocation.
    WillRun,
    /// Pick nodes and build the full allocation.
    RunNow,
}

/// The resource unit consumed at allocation granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrScope {
    Cpu,
    Core,
    Socket,
}

/// Consumable-resource configuration for a selection call.
#[derive(Debug, Clone, Copy)]
pub struct CrType {
    /// None with `memory` set = memory-only accounting, which skips the
    /// priority-layered placement passes.
    pub scope: Option<CrScope>,
    /// Treat memory as a consumable resource.
    pub memory: bool,
    /// Force least-loaded-node placement.
    pub lln: bool,
}

impl CrType {
    pub fn cores(memory: bool) -> CrType {
        CrType {
            scope: Some(CrScope::Core),
            memory,
            lln: false,
        }
    }

    pub fn sockets(memory: bool) -> CrType {
        CrType {
            scope: Some(CrScope::Socket),
            memory,
            lln: false,
        }
    }

    pub fn cpus(memory: bool) -> CrType {
        CrType {
            scope: Some(CrScope::Cpu),
            memory,
            lln: false,
        }
    }

    pub fn memory_only() -> CrType {
        CrType {
            scope: None,
            memory: true,
            lln: false,
        }
    }
}

/// Everything the selector needs to know about one job.
///
/// `wait4switch_start`, `best_switch` and `total_cpus` are written back by
/// the driver; everything else is read-only during a selection.
#[derive(Debug, Clone)]
pub struct JobDescriptor {
    pub job_id: u32,
    /// Minimum CPUs over the whole allocation.
    pub min_cpus: u32,
    /// Minimum node count the user asked for.
    pub min_nodes: u32,
    /// Minimum CPUs per node.
    pub pn_min_cpus: u16,
    /// Minimum memory per node (or per CPU when `mem_per_cpu`), in MB.
    pub pn_min_memory: u32,
    pub mem_per_cpu: bool,
    /// Total task count. 0 = unset.
    pub num_tasks: u32,
    /// Tasks to launch per node. 0 = unset.
    pub ntasks_per_node: u16,
    pub cpus_per_task: u16,
    pub mc: MultiCore,
    pub overcommit: bool,
    /// Job wants every CPU of each allocated node.
    pub whole_node: bool,
    /// Job tolerates sharing its resources.
    pub share_res: bool,
    /// Allocated nodes must be consecutive.
    pub contiguous: bool,
    /// Cap on total allocated CPUs. None = unlimited.
    pub max_cpus: Option<u32>,
    /// Cores reserved per node for system use.
    pub core_spec: u16,
    /// Nodes the job must receive.
    pub req_node_bitmap: Option<Bitmap>,
    /// Per-required-node CPU caps, indexed by required-node rank.
    pub req_node_layout: Option<Vec<u16>>,
    /// Maximum leaf switches the allocation should span. 0 = unset.
    pub req_switch: u32,
    /// Seconds the job will wait for a `req_switch`-sized allocation.
    pub wait4switch: u64,
    /// Epoch seconds of the first topology attempt; 0 until then.
    pub wait4switch_start: u64,
    /// Whether the last topology pass met the switch-count request.
    pub best_switch: bool,
    /// Total CPUs of the allocation, written on success.
    pub total_cpus: u32,
    /// Index of the job's partition in the allocation table.
    pub partition: usize,
}

impl Default for JobDescriptor {
    fn default() -> Self {
        JobDescriptor {
            job_id: 0,
            min_cpus: 1,
            min_nodes: 1,
            pn_min_cpus: 1,
            pn_min_memory: 0,
            mem_per_cpu: false,
            num_tasks: 0,
            ntasks_per_node: 0,
            cpus_per_task: 1,
            mc: MultiCore::default(),
            overcommit: false,
            whole_node: false,
            share_res: true,
            contiguous: false,
            max_cpus: None,
            core_spec: 0,
            req_node_bitmap: None,
            req_node_layout: None,
            req_switch: 0,
            wait4switch: 0,
            wait4switch_start: 0,
            best_switch: true,
            total_cpus: 0,
            partition: 0,
        }
    }
}
