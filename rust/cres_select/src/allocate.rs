// SPDX-License-Identifier: GPL-2.0

//! Per-node feasibility evaluation and core selection.
//!
//! Given one node's core availability and the job's shape constraints,
//! decide how many CPUs the node can contribute and mark the chosen cores
//! in the availability map. The procedure:
//!
//! 1. Tally free/used cores per socket; under whole-socket policy a socket
//!    with any used core contributes nothing.
//! 2. Enforce the partition CPU cap and the min-cores-per-socket /
//!    min-sockets-per-node constraints.
//! 3. Derive the task count from tasks-per-core, tasks-per-socket,
//!    tasks-per-node and cpus-per-task, and reject nodes that cannot hold
//!    the per-node minimum.
//! 4. Walk the cores in order, consuming them until the CPU budget is
//!    spent, clearing everything that is not consumed.
//!
//! A zero return always leaves the node's whole core range cleared in the
//! availability map.

use log::debug;

use crate::bitmap::Bitmap;
use crate::gres::GresFilter;
use crate::job::{CrScope, CrType, JobDescriptor};
use crate::partition::PartitionConfig;
use crate::topology::{NodeInventory, NodeState, NodeUsage};

/// Determine which cores of node `node_i` can go to this job, allowing
/// cores of partially-used sockets. Returns the usable CPU count and trims
/// `core_map` to the selected cores.
pub fn allocate_cores(
    job: &JobDescriptor,
    part: &PartitionConfig,
    inv: &NodeInventory,
    core_map: &mut Bitmap,
    part_core_map: Option<&Bitmap>,
    node_i: usize,
) -> u16 {
    allocate_sc(job, part, inv, core_map, part_core_map, node_i, false)
}

/// Determine which sockets of node `node_i` can go to this job: a socket
/// with any core already in use cannot be used at all.
pub fn allocate_sockets(
    job: &JobDescriptor,
    part: &PartitionConfig,
    inv: &NodeInventory,
    core_map: &mut Bitmap,
    part_core_map: Option<&Bitmap>,
    node_i: usize,
) -> u16 {
    allocate_sc(job, part, inv, core_map, part_core_map, node_i, true)
}

fn allocate_sc(
    job: &JobDescriptor,
    part: &PartitionConfig,
    inv: &NodeInventory,
    core_map: &mut Bitmap,
    part_core_map: Option<&Bitmap>,
    node_i: usize,
    entire_sockets_only: bool,
) -> u16 {
    let core_begin = inv.coremap_offset(node_i);
    let core_end = inv.coremap_offset(node_i + 1);
    let node = inv.node(node_i);
    let sockets = node.sockets as usize;
    let cores_per_socket = node.cores as usize;
    let mut threads_per_core = node.vpus as u32;
    let cpus_per_task = job.cpus_per_task as u32;

    let mut min_cores: u16 = 1;
    let mut min_sockets: u16 = 1;
    let mut ntasks_per_core: u16 = u16::MAX;
    if let Some(c) = job.mc.cores_per_socket {
        min_cores = c;
    }
    if let Some(s) = job.mc.sockets_per_node {
        min_sockets = s;
    }
    if job.mc.ntasks_per_core != 0 {
        ntasks_per_core = job.mc.ntasks_per_core;
    }
    if let Some(t) = job.mc.threads_per_core {
        if t < ntasks_per_core {
            ntasks_per_core = t;
        }
    }
    let ntasks_per_socket = job.mc.ntasks_per_socket as u32;

    let fail = |core_map: &mut Bitmap| -> u16 {
        let _ = core_map.clear_range(core_begin..core_end);
        0
    };

    // Step 1: per-socket core counts and the partition's concurrent load.
    let mut free_cores = vec![0u16; sockets];
    let mut used_cores = vec![0u16; sockets];
    let mut used_cpu_array = vec![0u32; sockets];
    let mut free_core_count: u16 = 0;
    for c in core_begin..core_end {
        let i = (c - core_begin) / cores_per_socket;
        if core_map.test(c) {
            free_cores[i] += 1;
            free_core_count += 1;
        } else {
            used_cores[i] += 1;
        }
        if part_core_map.is_some_and(|pm| pm.test(c)) {
            used_cpu_array[i] += 1;
        }
    }

    let mut free_cpu_count: u32 = 0;
    let mut used_cpu_count: u32 = 0;
    for i in 0..sockets {
        if entire_sockets_only && used_cores[i] > 0 {
            // socket is already in use, the job cannot have it
            free_core_count -= free_cores[i];
            used_cores[i] += free_cores[i];
            free_cores[i] = 0;
        }
        free_cpu_count += free_cores[i] as u32 * threads_per_core;
        if used_cpu_array[i] > 0 {
            // Any socket with partition usage reflects its own CPU load;
            // a later loaded socket overwrites an earlier one.
            used_cpu_count = used_cores[i] as u32 * threads_per_core;
        }
    }

    // Ignore resources that would push the allocation over the partition
    // CPU limit.
    if let Some(cap) = part.max_cpus_per_node {
        if free_cpu_count + used_cpu_count > cap {
            let mut excess = (free_cpu_count + used_cpu_count - cap) as i64;
            for c in core_begin..core_end {
                let i = (c - core_begin) / cores_per_socket;
                if free_cores[i] > 0 {
                    free_core_count -= 1;
                    free_cores[i] -= 1;
                    excess -= threads_per_core as i64;
                    if excess <= 0 {
                        break;
                    }
                }
            }
        }
    }

    // Step 2: min cores per socket, min sockets per node.
    let mut usable_sockets: u16 = 0;
    for i in 0..sockets {
        if free_cores[i] < min_cores {
            free_core_count -= free_cores[i];
            free_cores[i] = 0;
            continue;
        }
        usable_sockets += 1;
    }
    if usable_sockets < min_sockets {
        return fail(core_map);
    }
    if free_core_count < 1 {
        return fail(core_map);
    }

    // Step 3: task-related data. cpus_per_task and ntasks_per_core need to
    // play nice (2 tasks per core vs. 2 cpus per task).
    threads_per_core = threads_per_core.min(ntasks_per_core as u32);
    let mut avail_cpus: u32 = 0;
    let mut num_tasks: u32 = 0;
    for i in 0..sockets {
        let tmp = free_cores[i] as u32 * threads_per_core;
        avail_cpus += tmp;
        if ntasks_per_socket > 0 {
            num_tasks += tmp.min(ntasks_per_socket);
        } else {
            num_tasks += tmp;
        }
    }

    // An exclusive job skips the cap so it still gets the entire node.
    if job.ntasks_per_node > 0 && job.share_res {
        num_tasks = num_tasks.min(job.ntasks_per_node as u32);
    }

    if cpus_per_task < 2 {
        avail_cpus = num_tasks;
    } else {
        num_tasks = num_tasks.min(avail_cpus / cpus_per_task);
        if job.ntasks_per_node > 0 {
            avail_cpus = num_tasks * cpus_per_task;
        }
    }
    if (job.ntasks_per_node > 0
        && num_tasks < job.ntasks_per_node as u32
        && !job.overcommit)
        || (job.pn_min_cpus > 0 && avail_cpus < job.pn_min_cpus as u32)
    {
        return fail(core_map);
    }

    // Step 4: consume cores in order, enforcing ntasks_per_socket.
    let mut cps = num_tasks;
    if ntasks_per_socket >= 1 {
        cps = ntasks_per_socket;
        if cpus_per_task > 1 {
            cps = ntasks_per_socket * cpus_per_task;
        }
    }
    let mut cpu_count: u32 = 0;
    let mut socket_cpus: u32 = 0;
    let mut si = usize::MAX;
    let mut c = core_begin;
    while c < core_end && avail_cpus > 0 {
        if !core_map.test(c) {
            c += 1;
            continue;
        }
        let i = (c - core_begin) / cores_per_socket;
        if free_cores[i] > 0 {
            // this socket has free cores, but don't use more than
            // ntasks_per_socket needs
            if si != i {
                si = i;
                socket_cpus = threads_per_core;
            } else {
                if socket_cpus >= cps {
                    let _ = core_map.clear(c);
                    c += 1;
                    continue;
                }
                socket_cpus += threads_per_core;
            }
            free_cores[i] -= 1;
            // cpu_count must not exceed avail_cpus; under hyperthreading a
            // full core may be worth more than the remaining budget
            if avail_cpus >= threads_per_core {
                avail_cpus -= threads_per_core;
                cpu_count += threads_per_core;
            } else {
                cpu_count += avail_cpus;
                avail_cpus = 0;
            }
        } else {
            let _ = core_map.clear(c);
        }
        c += 1;
    }
    if c < core_end {
        let _ = core_map.clear_range(c..core_end);
    }

    cpu_count as u16
}

/// Determine which resources of node `node_i` (if any) the job can have:
/// run the GRES core filter, the geometry allocator for the configured
/// resource scope, then the memory and GRES feasibility trims. Returns the
/// usable CPU count; zero clears the node's core range.
///
/// The returned CPU count may be less than the set bits left in `core_map`
/// for the node; task distribution deselects the difference downstream.
#[allow(clippy::too_many_arguments)]
pub fn can_job_run_on_node(
    job: &JobDescriptor,
    part: &PartitionConfig,
    inv: &NodeInventory,
    usage: &[NodeUsage],
    gres: &dyn GresFilter,
    core_map: &mut Bitmap,
    node_i: usize,
    cr: CrType,
    test_only: bool,
    part_core_map: Option<&Bitmap>,
) -> u16 {
    // Do not allocate more jobs to nodes with completing jobs.
    if !test_only && usage[node_i].state == NodeState::Completing {
        return 0;
    }

    let range = inv.core_range(node_i);
    let node = inv.node(node_i);
    let cpus_per_core = inv.cpus_per_core(node_i) as u32;

    gres.core_filter(node_i, &node.name, test_only, core_map, range.clone());

    let (mut cpus, cpu_alloc_size): (u16, u32) = match cr.scope {
        Some(CrScope::Core) => (
            allocate_cores(job, part, inv, core_map, part_core_map, node_i),
            node.vpus as u32,
        ),
        Some(CrScope::Socket) => (
            allocate_sockets(job, part, inv, core_map, part_core_map, node_i),
            node.cores as u32 * node.vpus as u32,
        ),
        _ => (
            allocate_cores(job, part, inv, core_map, part_core_map, node_i),
            1,
        ),
    };

    if cr.memory {
        let req_mem = job.pn_min_memory;
        let mut avail_mem = node.real_memory;
        if !test_only {
            avail_mem = avail_mem.saturating_sub(usage[node_i].alloc_memory);
        }
        if job.mem_per_cpu {
            while cpus > 0 && req_mem as u64 * cpus as u64 > avail_mem as u64 {
                cpus = cpus.saturating_sub(cpu_alloc_size as u16);
            }
            if (cpus as u32) < job.ntasks_per_node as u32
                || (job.cpus_per_task > 1 && cpus < job.cpus_per_task)
            {
                cpus = 0;
            }
        } else if req_mem > avail_mem {
            cpus = 0;
        }
    }

    let gres_cores = gres.job_test(
        node_i,
        &node.name,
        test_only,
        Some(&*core_map),
        range.clone(),
        job.job_id,
    );
    let mut gres_cpus = gres_cores.map(|gc| gc.saturating_mul(cpus_per_core));
    if let Some(gc) = gres_cpus {
        if gc < job.ntasks_per_node as u32
            || (job.cpus_per_task > 1 && gc < job.cpus_per_task as u32)
        {
            gres_cpus = Some(0);
        }
    }
    if let Some(gc) = gres_cpus {
        while gc < cpus as u32 {
            if (cpus as u32) < cpu_alloc_size {
                debug!(
                    "cres_select: cpu_alloc_size > cpus, cannot continue (node: {})",
                    node.name
                );
                cpus = 0;
                break;
            }
            cpus -= cpu_alloc_size as u16;
        }
    }

    if cpus == 0 {
        let _ = core_map.clear_range(range);
    }

    debug!(
        "cres_select: can_job_run_on_node: {} cpus on {}, mem {}/{}",
        cpus, node.name, usage[node_i].alloc_memory, node.real_memory
    );

    cpus
}

/// Given an available node map, build the corresponding available core map,
/// carving `core_spec` reserved cores per node out of the highest
/// socket/core indices. A node whose core count is not above `core_spec`
/// is dropped from the node map.
pub fn make_core_bitmap(inv: &NodeInventory, node_map: &mut Bitmap, core_spec: u16) -> Bitmap {
    let mut core_map = Bitmap::new(inv.total_cores());

    for n in 0..node_map.len() {
        if !node_map.test(n) {
            continue;
        }
        let range = inv.core_range(n);
        if core_spec as usize >= range.len() {
            let _ = node_map.clear(n);
            continue;
        }
        let _ = core_map.set_range(range.clone());

        if core_spec == 0 {
            continue;
        }
        // Remove specialized cores right now.
        let node = inv.node(n);
        let mut spec_cores = core_spec;
        let mut res_core = node.cores as i32 - 1;
        while spec_cores > 0 && res_core >= 0 {
            let mut res_sock = node.sockets as i32 - 1;
            while spec_cores > 0 && res_sock >= 0 {
                let res_off = res_sock * node.cores as i32 + res_core;
                let _ = core_map.clear(range.start + res_off as usize);
                spec_cores -= 1;
                res_sock -= 1;
            }
            res_core -= 1;
        }
    }
    core_map
}
