// SPDX-License-Identifier: GPL-2.0

//! Node-state filtering ahead of placement.
//!
//! Removes candidate nodes that cannot hold the job regardless of core
//! layout: not enough free memory, no GRES headroom, or a sharing state
//! incompatible with what the job demands:
//!
//! - `Reserved` nodes are in exclusive use and serve nobody else.
//! - `OneRow` nodes only serve other one-row jobs, and only while no
//!   sharing partition runs jobs there.
//! - `Available` nodes serve reserving jobs only while fully idle, and
//!   one-row jobs only while no sharing partition runs jobs there.
//!
//! Losing a required node here is fatal to the selection.

use log::debug;

use crate::bitmap::Bitmap;
use crate::error::SelectError;
use crate::gres::GresFilter;
use crate::job::{CrType, JobDescriptor, NodeRequest};
use crate::partition::PartitionRes;
use crate::topology::{NodeInventory, NodeState, NodeUsage};

/// Test whether a node already runs jobs of _other_ partitions. With
/// `sharing_only`, only multi-row partitions count; a one-row job does not
/// share allocated CPUs with multi-row partitions.
fn is_node_busy(
    parts: &[PartitionRes],
    inv: &NodeInventory,
    node_i: usize,
    sharing_only: bool,
    my_part: usize,
) -> bool {
    let range = inv.core_range(node_i);
    parts.iter().enumerate().any(|(pi, p)| {
        if sharing_only && (p.num_rows() < 2 || pi == my_part) {
            return false;
        }
        p.busy_in(range.clone())
    })
}

/// Determine which candidate nodes are usable by this job, clearing the
/// rest from `node_bitmap`. Fails if a required node is cleared.
#[allow(clippy::too_many_arguments)]
pub fn verify_node_state(
    parts: &[PartitionRes],
    job: &JobDescriptor,
    inv: &NodeInventory,
    node_bitmap: &mut Bitmap,
    cr: CrType,
    usage: &[NodeUsage],
    gres: &dyn GresFilter,
    job_node_req: NodeRequest,
) -> Result<(), SelectError> {
    let min_mem = if job.mem_per_cpu {
        let mut min_cpus = (job.ntasks_per_node).max(job.pn_min_cpus);
        min_cpus = min_cpus.max(job.cpus_per_task);
        if min_cpus > 0 {
            job.pn_min_memory * min_cpus as u32
        } else {
            job.pn_min_memory
        }
    } else {
        job.pn_min_memory
    };

    let first = node_bitmap.first_set();
    let last = node_bitmap.last_set();
    let (first, last) = match (first, last) {
        (Some(f), Some(l)) => (f, l),
        _ => return Ok(()),
    };
    for i in first..=last {
        if !node_bitmap.test(i) {
            continue;
        }
        let node = inv.node(i);
        let range = inv.core_range(i);
        let cpus_per_core = inv.cpus_per_core(i) as u32;
        let mut usable = true;

        // node-level memory check
        if job.pn_min_memory > 0 && cr.memory {
            let free_mem = node.real_memory.saturating_sub(usage[i].alloc_memory);
            if free_mem < min_mem {
                debug!(
                    "cres_select: vns: node {} no mem {} < {}",
                    node.name, free_mem, min_mem
                );
                usable = false;
            }
        }

        // node-level gres check
        if usable {
            let gres_cores =
                gres.job_test(i, &node.name, true, None, range.clone(), job.job_id);
            let gres_cpus = gres_cores.map(|gc| gc.saturating_mul(cpus_per_core));
            if gres_cpus == Some(0) {
                debug!("cres_select: vns: node {} lacks gres", node.name);
                usable = false;
            }
        }

        if usable {
            if usage[i].state >= NodeState::Reserved {
                // exclusive use, or still completing another job
                debug!("cres_select: vns: node {} in exclusive use", node.name);
                usable = false;
            } else if usage[i].state >= NodeState::OneRow {
                // non-resource-sharing node
                if job_node_req == NodeRequest::Reserved
                    || job_node_req == NodeRequest::Available
                {
                    debug!("cres_select: vns: node {} non-sharing", node.name);
                    usable = false;
                } else if is_node_busy(parts, inv, i, true, job.partition) {
                    debug!("cres_select: vns: node {} sharing?", node.name);
                    usable = false;
                }
            } else {
                // node is fully shareable; check the job's demand
                match job_node_req {
                    NodeRequest::Reserved => {
                        if is_node_busy(parts, inv, i, false, job.partition) {
                            debug!("cres_select: vns: node {} busy", node.name);
                            usable = false;
                        }
                    }
                    NodeRequest::OneRow => {
                        if is_node_busy(parts, inv, i, true, job.partition) {
                            debug!("cres_select: vns: node {} vbusy", node.name);
                            usable = false;
                        }
                    }
                    NodeRequest::Available => {}
                }
            }
        }

        if usable {
            continue;
        }
        let _ = node_bitmap.clear(i);
        if job
            .req_node_bitmap
            .as_ref()
            .is_some_and(|req| req.test(i))
        {
            return Err(SelectError::RequiredNodeUnusable);
        }
    }

    Ok(())
}
