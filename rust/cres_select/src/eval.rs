// SPDX-License-Identifier: GPL-2.0

//! Multi-node choosers and the per-pass selection pipeline.
//!
//! `select_nodes` drives one placement attempt against one "free cores"
//! view: it computes per-node usable CPUs, eliminates empty nodes, runs the
//! knapsack-mitigation wrapper around the configured chooser, and syncs the
//! core map with the chosen nodes.
//!
//! Three choosers share the same contract over (node_map, cpu_cnt):
//!
//! - consecutive-block best-fit, minimizing allocation fragmentation,
//! - least-loaded-node, greedily taking the highest-capacity nodes,
//! - switch-tree best-fit across the network fabric.
//!
//! All of them turn the candidate node map into the selected node map and
//! may trim entries of the per-node CPU array.

use log::{debug, error, info};

use crate::allocate::can_job_run_on_node;
use crate::bitmap::Bitmap;
use crate::error::SelectError;
use crate::gres::GresFilter;
use crate::job::{CrType, JobDescriptor};
use crate::partition::PartitionConfig;
use crate::switch::SwitchTable;
use crate::topology::{NodeInventory, NodeUsage};

/// Cluster-static inputs of one placement attempt.
pub(crate) struct EvalCtx<'a> {
    pub inv: &'a NodeInventory,
    pub switches: Option<&'a SwitchTable>,
    /// The job's partition configuration.
    pub part: PartitionConfig,
    pub usage: &'a [NodeUsage],
    pub gres: &'a dyn GresFilter,
    pub cr: CrType,
    pub test_only: bool,
    /// Epoch seconds, for the switch-count wait budget.
    pub now: u64,
}

/// CPUs the job can use on `node_i`, capped by the required-node layout.
fn get_cpu_cnt(job: &JobDescriptor, node_i: usize, cpu_cnt: &[u16]) -> i32 {
    let mut cpus = cpu_cnt[node_i] as i32;
    if let Some(layout) = &job.req_node_layout {
        let required = job
            .req_node_bitmap
            .as_ref()
            .is_some_and(|r| r.test(node_i));
        if required {
            let rank = job
                .req_node_bitmap
                .as_ref()
                .unwrap()
                .iter()
                .take_while(|&i| i < node_i)
                .count();
            cpus = cpus.min(layout[rank] as i32);
        } else {
            cpus = 0;
        }
    }
    cpus
}

fn enough_nodes(avail_nodes: i32, rem_nodes: i32, min_nodes: u32, req_nodes: u32) -> bool {
    let needed_nodes = if req_nodes > min_nodes {
        rem_nodes + min_nodes as i32 - req_nodes as i32
    } else {
        rem_nodes
    };
    avail_nodes >= needed_nodes
}

/// Trim a node's CPU contribution so later nodes can still provide their
/// per-node minimum; whole-node jobs take everything.
fn cpus_to_use(
    avail_cpus: &mut i32,
    mut rem_cpus: i32,
    rem_nodes: i32,
    job: &JobDescriptor,
    cpu_cnt: &mut u16,
) {
    if job.whole_node {
        return;
    }
    let resv_cpus = (rem_nodes - 1).max(0) * job.pn_min_cpus as i32;
    rem_cpus -= resv_cpus;

    if *avail_cpus > rem_cpus {
        *avail_cpus = rem_cpus.max(job.pn_min_cpus as i32);
        *cpu_cnt = *avail_cpus as u16;
    }
}

/// A maximal stretch of consecutive candidate nodes.
#[derive(Debug, Clone)]
struct Run {
    cpus: i32,
    nodes: i32,
    start: usize,
    end: usize,
    /// Index of the first required node in the stretch, or -1.
    req: i32,
}

impl Run {
    fn new() -> Run {
        Run {
            cpus: 0,
            nodes: 0,
            start: 0,
            end: 0,
            req: -1,
        }
    }
}

/// The heart of the selection process: dispatch to the configured chooser
/// and accumulate nodes until the job's CPU and node demands are met.
fn eval_nodes(
    ctx: &EvalCtx,
    job: &mut JobDescriptor,
    node_map: &mut Bitmap,
    min_nodes: u32,
    mut max_nodes: u32,
    req_nodes: u32,
    cpu_cnt: &mut [u16],
) -> Result<(), SelectError> {
    let cr_node_cnt = ctx.inv.len();
    if node_map.len() != cr_node_cnt {
        error!("cres_select: node count inconsistent with controller");
        return Err(SelectError::NodeCountMismatch);
    }
    if (node_map.weight() as u32) < min_nodes {
        return Err(SelectError::InsufficientResources);
    }
    if let Some(req) = &job.req_node_bitmap {
        if !node_map.is_superset_of(req) {
            return Err(SelectError::InsufficientResources);
        }
    }

    if ctx.cr.lln || (job.req_node_layout.is_none() && ctx.part.lln) {
        // Select resources on the least loaded nodes
        return eval_nodes_lln(ctx, job, node_map, min_nodes, max_nodes, req_nodes, cpu_cnt);
    }

    if let Some(switches) = ctx.switches {
        // Optimized resource selection based on fabric topology
        return eval_nodes_topo(
            ctx, switches, job, node_map, min_nodes, max_nodes, req_nodes, cpu_cnt,
        );
    }

    let mut rem_cpus = job.min_cpus as i32;
    let mut rem_nodes = min_nodes.max(req_nodes) as i32;
    let mut min_rem_nodes = min_nodes as i32;
    let mut total_cpus: i32 = 0;

    // Build the table of consecutive-node runs
    let mut runs: Vec<Run> = vec![Run::new()];
    let mut ll: i32 = -1;
    for i in 0..cr_node_cnt {
        let required_node = job.req_node_bitmap.as_ref().is_some_and(|r| r.test(i));
        if job.req_node_layout.is_some() && required_node {
            ll += 1;
        }
        if node_map.test(i) {
            let cur = runs.last_mut().unwrap();
            if cur.nodes == 0 {
                cur.start = i;
            }
            let mut avail_cpus = cpu_cnt[i] as i32;
            if let Some(layout) = &job.req_node_layout {
                if required_node {
                    avail_cpus = avail_cpus.min(layout[ll as usize] as i32);
                } else {
                    avail_cpus = 0;
                }
            }
            if max_nodes > 0 && required_node {
                if cur.req == -1 {
                    // first required node in the run
                    cur.req = i as i32;
                }
                total_cpus += avail_cpus;
                rem_cpus -= avail_cpus;
                rem_nodes -= 1;
                min_rem_nodes -= 1;
                // leaving the bit set, decrement the max limit
                max_nodes -= 1;
            } else {
                // node not selected (yet)
                let _ = node_map.clear(i);
                cur.cpus += avail_cpus;
                cur.nodes += 1;
            }
        } else if runs.last().unwrap().nodes == 0 {
            // re-use the record; any required nodes are already picked up
            runs.last_mut().unwrap().req = -1;
        } else {
            runs.last_mut().unwrap().end = i - 1;
            runs.push(Run::new());
        }
    }
    if runs.last().unwrap().nodes != 0 {
        runs.last_mut().unwrap().end = cr_node_cnt - 1;
    } else {
        runs.pop();
    }

    for (i, run) in runs.iter().enumerate() {
        debug!(
            "cres_select: eval_nodes:{} consec c={} n={} b={} e={} r={}",
            i, run.cpus, run.nodes, run.start, run.end, run.req
        );
    }

    // CPUs already committed to required nodes
    if job.max_cpus.is_some_and(|mc| total_cpus > mc as i32) {
        info!(
            "Job {} can't use required nodes due to max CPU limit",
            job.job_id
        );
        return Err(SelectError::MaxCpuLimitExceeded);
    }

    // accumulate nodes from these runs until sufficient resources
    let mut error_code = Err(SelectError::InsufficientResources);
    while !runs.is_empty() && max_nodes > 0 {
        let mut best_fit_cpus = 0i32;
        let mut best_fit_nodes = 0i32;
        let mut best_fit_sufficient = false;
        let mut best_fit_req: i32 = -1;
        let mut best_fit_index = 0usize;
        let mut contiguity_broken = false;
        for i in 0..runs.len() {
            if runs[i].nodes == 0 {
                continue; // no usable nodes here
            }
            if job.contiguous && job.req_node_bitmap.is_some() && runs[i].req == -1 {
                continue; // not the required nodes
            }
            let sufficient = runs[i].cpus >= rem_cpus
                && enough_nodes(runs[i].nodes, rem_nodes, min_nodes, req_nodes);

            // pick the first possibility, or a run with required nodes, or
            // the first sufficient run, or the tightest sufficient fit, or
            // the biggest insufficient run so far
            if best_fit_nodes == 0
                || (best_fit_req == -1 && runs[i].req != -1)
                || (sufficient && !best_fit_sufficient)
                || (sufficient && runs[i].cpus < best_fit_cpus)
                || (!sufficient && runs[i].cpus > best_fit_cpus)
            {
                best_fit_cpus = runs[i].cpus;
                best_fit_nodes = runs[i].nodes;
                best_fit_index = i;
                best_fit_req = runs[i].req;
                best_fit_sufficient = sufficient;
            }

            if job.contiguous && job.req_node_bitmap.is_some() {
                // all required nodes must sit in a single consecutive block
                let other_blocks = runs.iter().skip(i + 1).any(|r| r.req != -1);
                if other_blocks {
                    best_fit_nodes = 0;
                    contiguity_broken = true;
                    break;
                }
            }
        }
        if best_fit_nodes == 0 {
            if contiguity_broken {
                return Err(SelectError::ContiguityUnmet);
            }
            break;
        }

        if job.contiguous
            && (best_fit_cpus < rem_cpus
                || !enough_nodes(best_fit_nodes, rem_nodes, min_nodes, req_nodes))
        {
            break; // no hole large enough
        }

        if best_fit_req != -1 {
            // This run holds required nodes; work up from the required
            // index, then down from just below it.
            let run_start = runs[best_fit_index].start;
            let run_end = runs[best_fit_index].end;
            let req_i = best_fit_req as usize;
            for i in req_i..=run_end {
                if max_nodes == 0 || (rem_nodes <= 0 && rem_cpus <= 0) {
                    break;
                }
                if node_map.test(i) {
                    continue; // required node already in the set
                }
                let mut avail_cpus = get_cpu_cnt(job, i, cpu_cnt);
                if avail_cpus <= 0 {
                    continue;
                }
                cpus_to_use(&mut avail_cpus, rem_cpus, min_rem_nodes, job, &mut cpu_cnt[i]);
                total_cpus += avail_cpus;
                if job.max_cpus.is_some_and(|mc| total_cpus > mc as i32) {
                    debug!("eval_nodes: node {} would exceed the max CPU limit", i);
                    total_cpus -= avail_cpus;
                    continue;
                }
                let _ = node_map.set(i);
                rem_nodes -= 1;
                min_rem_nodes -= 1;
                max_nodes -= 1;
                rem_cpus -= avail_cpus;
            }
            let mut i = req_i as i64 - 1;
            while i >= run_start as i64 {
                if max_nodes == 0 || (rem_nodes <= 0 && rem_cpus <= 0) {
                    break;
                }
                let n = i as usize;
                if !node_map.test(n) {
                    let mut avail_cpus = get_cpu_cnt(job, n, cpu_cnt);
                    if avail_cpus > 0 {
                        cpus_to_use(
                            &mut avail_cpus,
                            rem_cpus,
                            min_rem_nodes,
                            job,
                            &mut cpu_cnt[n],
                        );
                        total_cpus += avail_cpus;
                        if job.max_cpus.is_some_and(|mc| total_cpus > mc as i32) {
                            debug!("eval_nodes: node {} would exceed the max CPU limit", n);
                            total_cpus -= avail_cpus;
                        } else {
                            rem_cpus -= avail_cpus;
                            let _ = node_map.set(n);
                            rem_nodes -= 1;
                            min_rem_nodes -= 1;
                            max_nodes -= 1;
                        }
                    }
                }
                i -= 1;
            }
        } else {
            let first = runs[best_fit_index].start;
            let last = runs[best_fit_index].end;
            // with one node left to pick, find the single best-fit node
            let mut cpus_array: Option<Vec<i32>> = None;
            if rem_nodes <= 1 {
                let mut arr = vec![0i32; last - first + 1];
                let mut best_fit: i32 = -1;
                let mut best_size = 0i32;
                for (j, i) in (first..=last).enumerate() {
                    if node_map.test(i) {
                        continue;
                    }
                    arr[j] = get_cpu_cnt(job, i, cpu_cnt);
                    if arr[j] < rem_cpus {
                        continue;
                    }
                    if best_fit == -1 || arr[j] < best_size {
                        best_fit = j as i32;
                        best_size = arr[j];
                        if best_size == rem_cpus {
                            break;
                        }
                    }
                }
                if best_fit != -1 {
                    // a single node suffices; zero out all the others
                    for j in 0..arr.len() {
                        if j as i32 != best_fit {
                            arr[j] = 0;
                        }
                    }
                }
                cpus_array = Some(arr);
            }

            for (j, i) in (first..=last).enumerate() {
                if max_nodes == 0 || (rem_nodes <= 0 && rem_cpus <= 0) {
                    break;
                }
                if node_map.test(i) {
                    continue;
                }
                let mut avail_cpus = match &cpus_array {
                    Some(arr) => arr[j],
                    None => get_cpu_cnt(job, i, cpu_cnt),
                };
                if avail_cpus <= 0 {
                    continue;
                }
                if max_nodes == 1 && avail_cpus < rem_cpus {
                    // the job can only take one more node and this one has
                    // insufficient CPU
                    continue;
                }
                cpus_to_use(&mut avail_cpus, rem_cpus, min_rem_nodes, job, &mut cpu_cnt[i]);
                total_cpus += avail_cpus;
                if job.max_cpus.is_some_and(|mc| total_cpus > mc as i32) {
                    debug!("eval_nodes: node {} would exceed the max CPU limit", i);
                    total_cpus -= avail_cpus;
                    continue;
                }
                rem_cpus -= avail_cpus;
                let _ = node_map.set(i);
                rem_nodes -= 1;
                min_rem_nodes -= 1;
                max_nodes -= 1;
            }
        }

        if job.contiguous || (rem_nodes <= 0 && rem_cpus <= 0) {
            error_code = Ok(());
            break;
        }
        runs[best_fit_index].cpus = 0;
        runs[best_fit_index].nodes = 0;
    }

    if error_code.is_err() && rem_cpus <= 0 && enough_nodes(0, rem_nodes, min_nodes, req_nodes) {
        error_code = Ok(());
    }
    error_code
}

/// A variation of `eval_nodes` selecting resources on the least loaded
/// nodes. Optimized for small node/CPU counts; the equal-to-last-maximum
/// break keeps the scan short on uniform fleets.
fn eval_nodes_lln(
    ctx: &EvalCtx,
    job: &mut JobDescriptor,
    node_map: &mut Bitmap,
    min_nodes: u32,
    mut max_nodes: u32,
    req_nodes: u32,
    cpu_cnt: &mut [u16],
) -> Result<(), SelectError> {
    let cr_node_cnt = ctx.inv.len();
    let mut rem_cpus = job.min_cpus as i32;
    let mut rem_nodes = min_nodes.max(req_nodes) as i32;
    let mut min_rem_nodes = min_nodes as i32;
    let mut total_cpus: i32 = 0;
    let mut last_max_cpu_cnt: i32 = -1;

    // pre-seat required nodes, then clear every other candidate
    if let Some(req_map) = job.req_node_bitmap.clone() {
        for i in 0..cr_node_cnt {
            if !req_map.test(i) {
                let _ = node_map.clear(i);
                continue;
            }
            if node_map.test(i) {
                let avail_cpus = cpu_cnt[i] as i32;
                if max_nodes > 0 {
                    total_cpus += avail_cpus;
                    rem_cpus -= avail_cpus;
                    rem_nodes -= 1;
                    min_rem_nodes -= 1;
                    // leaving the bit set, decrement the max limit
                    max_nodes -= 1;
                } else {
                    let _ = node_map.clear(i);
                }
            }
        }
    } else {
        node_map.clear_all();
    }

    if job.max_cpus.is_some_and(|mc| total_cpus > mc as i32) {
        info!(
            "Job {} can't use required nodes due to max CPU limit",
            job.job_id
        );
        return Err(SelectError::MaxCpuLimitExceeded);
    }

    // accumulate nodes from those with the highest available CPU count
    while (rem_cpus > 0 || rem_nodes > 0) && max_nodes > 0 {
        let mut max_cpu_idx: i32 = -1;
        for i in 0..cr_node_cnt {
            if node_map.test(i) {
                continue;
            }
            if max_cpu_idx == -1 || cpu_cnt[max_cpu_idx as usize] < cpu_cnt[i] {
                max_cpu_idx = i as i32;
                if cpu_cnt[i] as i32 == last_max_cpu_cnt {
                    break;
                }
            }
        }
        if max_cpu_idx == -1 || cpu_cnt[max_cpu_idx as usize] == 0 {
            break;
        }
        last_max_cpu_cnt = cpu_cnt[max_cpu_idx as usize] as i32;
        let avail_cpus = get_cpu_cnt(job, max_cpu_idx as usize, cpu_cnt);
        if avail_cpus > 0 {
            rem_cpus -= avail_cpus;
            let _ = node_map.set(max_cpu_idx as usize);
            rem_nodes -= 1;
            min_rem_nodes -= 1;
            max_nodes -= 1;
        } else {
            break;
        }
    }

    if rem_cpus > 0 || min_rem_nodes > 0 {
        node_map.clear_all();
        return Err(SelectError::InsufficientResources);
    }
    Ok(())
}

/// A network-topology aware version of `eval_nodes`: find the best-fit
/// switch covering the demand, then select nodes from its leaves.
#[allow(clippy::too_many_arguments)]
fn eval_nodes_topo(
    ctx: &EvalCtx,
    switches: &SwitchTable,
    job: &mut JobDescriptor,
    bitmap: &mut Bitmap,
    min_nodes: u32,
    mut max_nodes: u32,
    req_nodes: u32,
    cpu_cnt: &mut [u16],
) -> Result<(), SelectError> {
    let switch_cnt = switches.len();
    let cr_node_cnt = ctx.inv.len();

    let mut time_waiting: u64 = 0;
    if job.req_switch > 0 {
        if job.wait4switch_start == 0 {
            job.wait4switch_start = ctx.now;
        }
        time_waiting = ctx.now.saturating_sub(job.wait4switch_start);
    }

    let mut rem_cpus = job.min_cpus as i32;
    let mut rem_nodes = min_nodes.max(req_nodes) as i32;
    let mut min_rem_nodes = min_nodes as i32;
    let mut total_cpus: i32 = 0;

    let req_nodes_bitmap = job.req_node_bitmap.clone();
    if let Some(req_map) = &req_nodes_bitmap {
        let cnt = req_map.weight() as u32;
        if cnt > max_nodes {
            info!(
                "job {} requires more nodes than currently available ({}>{})",
                job.job_id, cnt, max_nodes
            );
            return Err(SelectError::InsufficientResources);
        }
    }

    // Construct the per-switch scratch state, indexed as the switch table
    let mut sw_bitmap: Vec<Bitmap> = Vec::with_capacity(switch_cnt);
    let mut sw_cpu_cnt = vec![0i32; switch_cnt];
    let mut sw_node_cnt = vec![0i32; switch_cnt];
    let mut sw_required = vec![0i32; switch_cnt];
    let mut avail_nodes_bitmap = Bitmap::new(cr_node_cnt);
    for i in 0..switch_cnt {
        let mut map = switches.get(i).nodes.clone();
        map &= &*bitmap;
        avail_nodes_bitmap |= &map;
        sw_node_cnt[i] = map.weight() as i32;
        if req_nodes_bitmap.as_ref().is_some_and(|r| r.overlaps(&map)) {
            sw_required[i] = 1;
        }
        sw_bitmap.push(map);
    }
    bitmap.clear_all();

    for i in 0..switch_cnt {
        debug!(
            "switch={} nodes={}:{} required:{} speed:{}",
            switches.get(i).name,
            sw_node_cnt[i],
            ctx.inv.name_list(&sw_bitmap[i]),
            sw_required[i],
            switches.get(i).link_speed
        );
    }

    if let Some(req_map) = &req_nodes_bitmap {
        if !avail_nodes_bitmap.is_superset_of(req_map) {
            info!(
                "job {} requires nodes not available on any switch",
                job.job_id
            );
            return Err(SelectError::RequiredNodeUnusable);
        }
        // specific required nodes must be linked together
        if !sw_bitmap.iter().any(|m| m.is_superset_of(req_map)) {
            info!(
                "job {} requires nodes that are not linked together",
                job.job_id
            );
            return Err(SelectError::ContiguityUnmet);
        }

        // Accumulate the required resources
        let first = req_map.first_set();
        let last = req_map.last_set();
        if let (Some(first), Some(last)) = (first, last) {
            for i in first..=last {
                if !req_map.test(i) {
                    continue;
                }
                if max_nodes == 0 {
                    info!("job {} requires more nodes than allowed", job.job_id);
                    return Err(SelectError::InsufficientResources);
                }
                let _ = bitmap.set(i);
                let _ = avail_nodes_bitmap.clear(i);
                let mut avail_cpus = get_cpu_cnt(job, i, cpu_cnt);
                cpus_to_use(&mut avail_cpus, rem_cpus, min_rem_nodes, job, &mut cpu_cnt[i]);
                rem_nodes -= 1;
                min_rem_nodes -= 1;
                max_nodes -= 1;
                total_cpus += avail_cpus;
                rem_cpus -= avail_cpus;
                for j in 0..switch_cnt {
                    if !sw_bitmap[j].test(i) {
                        continue;
                    }
                    let _ = sw_bitmap[j].clear(i);
                    sw_node_cnt[j] -= 1;
                    // keep track of the accumulated required resources
                    sw_required[j] += avail_cpus;
                }
            }
        }
        if job.max_cpus.is_some_and(|mc| total_cpus > mc as i32) {
            info!(
                "Job {} can't use required node due to max CPU limit",
                job.job_id
            );
            return Err(SelectError::MaxCpuLimitExceeded);
        }
        if rem_nodes <= 0 && rem_cpus <= 0 {
            return Ok(());
        }

        // Update bitmaps and node counts for higher-level switches
        for j in 0..switch_cnt {
            if sw_node_cnt[j] == 0 {
                continue;
            }
            let (first, last) = match (sw_bitmap[j].first_set(), sw_bitmap[j].last_set()) {
                (Some(f), Some(l)) => (f, l),
                _ => continue,
            };
            for i in first..=last {
                if !sw_bitmap[j].test(i) {
                    continue;
                }
                if !avail_nodes_bitmap.test(i) {
                    // cleared from a lower level
                    let _ = sw_bitmap[j].clear(i);
                    sw_node_cnt[j] -= 1;
                } else {
                    sw_cpu_cnt[j] += get_cpu_cnt(job, i, cpu_cnt);
                }
            }
        }
    } else {
        // No specific required nodes, calculate CPU counts
        for j in 0..switch_cnt {
            let (first, last) = match (sw_bitmap[j].first_set(), sw_bitmap[j].last_set()) {
                (Some(f), Some(l)) => (f, l),
                _ => continue,
            };
            for i in first..=last {
                if sw_bitmap[j].test(i) {
                    sw_cpu_cnt[j] += get_cpu_cnt(job, i, cpu_cnt);
                }
            }
        }
    }

    // Determine the lowest-level switch satisfying the request with the
    // best fit, honoring the required nodes if any
    let mut best_fit_inx: i32 = -1;
    for j in 0..switch_cnt {
        if sw_cpu_cnt[j] < rem_cpus
            || !enough_nodes(sw_node_cnt[j], rem_nodes, min_nodes, req_nodes)
        {
            continue;
        }
        if best_fit_inx != -1
            && req_nodes > min_nodes
            && sw_node_cnt[best_fit_inx as usize] < req_nodes as i32
            && sw_node_cnt[best_fit_inx as usize] < sw_node_cnt[j]
        {
            // try to get up to the requested node count
            best_fit_inx = -1;
        }

        // the first possibility, or the first required switch, or a lower
        // level switch, or a same-level but tighter switch, or of two
        // required same-level same-size switches the one holding more of
        // the required CPUs
        let b = best_fit_inx;
        if b == -1
            || (sw_required[b as usize] == 0 && sw_required[j] > 0)
            || switches.get(j).level < switches.get(b as usize).level
            || (switches.get(j).level == switches.get(b as usize).level
                && sw_node_cnt[j] < sw_node_cnt[b as usize])
            || (sw_required[b as usize] > 0
                && sw_required[j] > 0
                && switches.get(j).level == switches.get(b as usize).level
                && sw_node_cnt[j] == sw_node_cnt[b as usize]
                && sw_required[b as usize] < sw_required[j])
        {
            // never displace a required switch with a non-required one
            if b == -1
                || sw_required[b as usize] == 0
                || (sw_required[b as usize] > 0 && sw_required[j] > 0)
            {
                best_fit_inx = j as i32;
            }
        }
    }
    if best_fit_inx == -1 {
        debug!(
            "job {}: best_fit topology failure: no switch satisfying the request found",
            job.job_id
        );
        return Err(SelectError::TopologyBestSwitch);
    }
    let best_fit_inx = best_fit_inx as usize;
    if sw_required[best_fit_inx] == 0 && req_nodes_bitmap.is_some() {
        debug!(
            "job {}: best_fit topology failure: no switch including requested \
             nodes and satisfying the request found",
            job.job_id
        );
        return Err(SelectError::RequiredNodeUnusable);
    }

    // Identify the usable leaves inside the best-fit switch
    let chosen = sw_bitmap[best_fit_inx].clone();
    for j in 0..switch_cnt {
        if switches.get(j).level != 0 || !chosen.is_superset_of(&sw_bitmap[j]) {
            sw_node_cnt[j] = 0;
        }
    }

    // Select resources from these leaves on a best-fit basis, required
    // switches first to minimize the total switch count
    let mut leaf_switch_count: u32 = 0;
    while max_nodes > 0 && (rem_nodes > 0 || rem_cpus > 0) {
        let mut best_fit_cpus = 0i32;
        let mut best_fit_nodes = 0i32;
        let mut best_fit_sufficient = false;
        let mut best_fit_location = 0usize;
        for j in 0..switch_cnt {
            if sw_node_cnt[j] == 0 {
                continue;
            }
            let sufficient = sw_cpu_cnt[j] >= rem_cpus
                && enough_nodes(sw_node_cnt[j], rem_nodes, min_nodes, req_nodes);
            if best_fit_nodes == 0
                || (sw_required[best_fit_location] == 0 && sw_required[j] > 0)
                || (sufficient && !best_fit_sufficient)
                || (sufficient && sw_cpu_cnt[j] < best_fit_cpus)
                || (!sufficient && sw_cpu_cnt[j] > best_fit_cpus)
                || (sw_required[best_fit_location] > 0
                    && sw_required[j] > 0
                    && sw_cpu_cnt[best_fit_location] == sw_cpu_cnt[j]
                    && sw_required[best_fit_location] < sw_required[j])
            {
                if best_fit_nodes == 0
                    || sw_required[best_fit_location] == 0
                    || (sw_required[best_fit_location] > 0 && sw_required[j] > 0)
                {
                    best_fit_cpus = sw_cpu_cnt[j];
                    best_fit_nodes = sw_node_cnt[j];
                    best_fit_location = j;
                    best_fit_sufficient = sufficient;
                }
            }
        }
        if best_fit_nodes == 0 {
            break;
        }
        leaf_switch_count += 1;

        let (first, last) = match (
            sw_bitmap[best_fit_location].first_set(),
            sw_bitmap[best_fit_location].last_set(),
        ) {
            (Some(f), Some(l)) => (f, l),
            _ => {
                sw_node_cnt[best_fit_location] = 0;
                continue;
            }
        };
        let mut cpus_array = vec![0i32; last - first + 1];
        for (j, i) in (first..=last).enumerate() {
            if sw_bitmap[best_fit_location].test(i) {
                cpus_array[j] = get_cpu_cnt(job, i, cpu_cnt);
            }
        }

        if job.req_switch > 0 {
            if time_waiting >= job.wait4switch {
                job.best_switch = true;
                debug!(
                    "Job={} Waited {} sec for switches use={}",
                    job.job_id, time_waiting, leaf_switch_count
                );
            } else if leaf_switch_count > job.req_switch {
                // the allocation spans more than the requested switch count
                job.best_switch = false;
                debug!(
                    "Job={} waited {} sec for switches={} found={} wait {}",
                    job.job_id, time_waiting, job.req_switch, leaf_switch_count, job.wait4switch
                );
            } else {
                job.best_switch = true;
            }
        }

        // accumulate resources from this leaf on a best-fit basis
        while max_nodes > 0 && (rem_nodes > 0 || rem_cpus > 0) {
            let mut bfsuff = false;
            let mut bfloc = 0usize;
            let mut bfsize = 0i32;
            let mut ca_bfloc = 0usize;
            for (j, i) in (first..=last).enumerate() {
                if cpus_array[j] == 0 {
                    continue;
                }
                let suff = cpus_array[j] >= rem_cpus;
                if bfsize == 0
                    || (suff && !bfsuff)
                    || (suff && cpus_array[j] < bfsize)
                    || (!suff && cpus_array[j] > bfsize)
                {
                    bfsuff = suff;
                    bfloc = i;
                    bfsize = cpus_array[j];
                    ca_bfloc = j;
                }
            }

            if bfsize == 0 {
                break;
            }

            // remove this node from the switch's available pool
            let _ = sw_bitmap[best_fit_location].clear(bfloc);
            sw_node_cnt[best_fit_location] -= 1;
            sw_cpu_cnt[best_fit_location] -= bfsize;
            cpus_array[ca_bfloc] = 0;

            // already selected through another switch
            if bitmap.test(bfloc) {
                continue;
            }

            let mut bfsize = bfsize;
            cpus_to_use(&mut bfsize, rem_cpus, min_rem_nodes, job, &mut cpu_cnt[bfloc]);

            if job
                .max_cpus
                .is_some_and(|mc| total_cpus + bfsize > mc as i32)
            {
                debug!("eval_topo: node {} would exceed the max CPU limit", bfloc);
                continue;
            }

            let _ = bitmap.set(bfloc);
            total_cpus += bfsize;
            rem_nodes -= 1;
            min_rem_nodes -= 1;
            max_nodes -= 1;
            rem_cpus -= bfsize;
        }

        // mark this leaf as processed
        sw_node_cnt[best_fit_location] = 0;
    }

    if rem_cpus <= 0 && enough_nodes(0, rem_nodes, min_nodes, req_nodes) {
        Ok(())
    } else {
        Err(SelectError::InsufficientResources)
    }
}

/// The intermediary between `select_nodes` and `eval_nodes` that tackles
/// the knapsack problem: on failure, incrementally remove nodes with low
/// CPU counts and re-evaluate.
fn choose_nodes(
    ctx: &EvalCtx,
    job: &mut JobDescriptor,
    node_map: &mut Bitmap,
    min_nodes: u32,
    mut max_nodes: u32,
    req_nodes: u32,
    cpu_cnt: &mut [u16],
) -> Result<(), SelectError> {
    let cr_node_cnt = ctx.inv.len();
    let reqmap = job.req_node_bitmap.clone();

    // clear nodes without usable resources, and nodes an exclusive job
    // could not take without blowing its max CPU count
    for i in 0..cr_node_cnt {
        if !node_map.test(i) {
            continue;
        }
        let over_cap = job.whole_node && job.max_cpus.is_some_and(|mc| mc < cpu_cnt[i] as u32);
        if over_cap || cpu_cnt[i] < 1 {
            if reqmap.as_ref().is_some_and(|r| r.test(i)) {
                // can't clear a required node
                return Err(SelectError::RequiredNodeUnusable);
            }
            let _ = node_map.clear(i);
        }
    }

    // min_cpus is 1 by default; only cap max_nodes when the user asked for
    // an explicit CPU count
    if job.min_cpus > 1 && max_nodes > job.min_cpus {
        max_nodes = job.min_cpus;
    }

    let mut origmap = node_map.clone();

    let ec = eval_nodes(ctx, job, node_map, min_nodes, max_nodes, req_nodes, cpu_cnt);
    match ec {
        Ok(()) => return Ok(()),
        Err(e) if !e.is_retryable() => return Err(e),
        Err(_) => {}
    }

    // This node set didn't work. To avoid a possible knapsack problem,
    // incrementally remove nodes with low cpu counts and retry.
    let mut most_cpus = 0u16;
    for i in 0..cr_node_cnt {
        most_cpus = most_cpus.max(cpu_cnt[i]);
    }

    let mut last = ec;
    for count in 1..most_cpus {
        let mut nochange = true;
        *node_map |= &origmap;
        for i in 0..cr_node_cnt {
            if cpu_cnt[i] > 0 && cpu_cnt[i] <= count {
                if !node_map.test(i) {
                    continue;
                }
                if reqmap.as_ref().is_some_and(|r| r.test(i)) {
                    continue;
                }
                nochange = false;
                let _ = node_map.clear(i);
                let _ = origmap.clear(i);
            }
        }
        if nochange {
            continue;
        }
        let ec = eval_nodes(ctx, job, node_map, min_nodes, max_nodes, req_nodes, cpu_cnt);
        match ec {
            Ok(()) => return Ok(()),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(_) => last = ec,
        }
    }
    last
}

/// One placement attempt against one free-cores view. On success, returns
/// the per-selected-node CPU counts and leaves `node_map`/`core_map`
/// holding the selection; unselected nodes' core ranges are cleared.
#[allow(clippy::too_many_arguments)]
pub(crate) fn select_nodes(
    ctx: &EvalCtx,
    job: &mut JobDescriptor,
    min_nodes: u32,
    max_nodes: u32,
    req_nodes: u32,
    node_map: &mut Bitmap,
    core_map: &mut Bitmap,
    part_core_map: Option<&Bitmap>,
) -> Result<Vec<u16>, SelectError> {
    let cr_node_cnt = ctx.inv.len();

    if (node_map.weight() as u32) < min_nodes {
        return Err(SelectError::InsufficientResources);
    }

    // resource usage for this job on each available node
    let mut cpu_cnt = vec![0u16; cr_node_cnt];
    for n in 0..cr_node_cnt {
        if !node_map.test(n) {
            continue;
        }
        cpu_cnt[n] = can_job_run_on_node(
            job,
            &ctx.part,
            ctx.inv,
            ctx.usage,
            ctx.gres,
            core_map,
            n,
            ctx.cr,
            ctx.test_only,
            part_core_map,
        );
    }

    // clear all nodes without sufficient resources for this job
    for n in 0..cr_node_cnt {
        if node_map.test(n) && cpu_cnt[n] == 0 {
            if job.req_node_bitmap.as_ref().is_some_and(|r| r.test(n)) {
                // cannot clear a required node; fail this attempt
                return Err(SelectError::InsufficientResources);
            }
            let _ = node_map.clear(n);
        }
    }
    if (node_map.weight() as u32) < min_nodes {
        return Err(SelectError::InsufficientResources);
    }

    let mut min_nodes = min_nodes;
    if job.ntasks_per_node > 0 && job.num_tasks > 0 {
        min_nodes = min_nodes.max(job.num_tasks.div_ceil(job.ntasks_per_node as u32));
    }

    // choose the best nodes for the job
    choose_nodes(
        ctx,
        job,
        node_map,
        min_nodes,
        max_nodes,
        req_nodes,
        &mut cpu_cnt,
    )?;

    // sync the core map with the node map and compact the cpus array
    let mut cpus = Vec::with_capacity(node_map.weight());
    let mut start = 0usize;
    for n in 0..cr_node_cnt {
        if node_map.test(n) {
            cpus.push(cpu_cnt[n]);
            let off = ctx.inv.coremap_offset(n);
            if off != start {
                let _ = core_map.clear_range(start..off);
            }
            start = ctx.inv.coremap_offset(n + 1);
        }
    }
    if ctx.inv.total_cores() != start {
        let _ = core_map.clear_range(start..ctx.inv.total_cores());
    }
    Ok(cpus)
}
