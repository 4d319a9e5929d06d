// SPDX-License-Identifier: GPL-2.0

//! Priority-layered placement driver.
//!
//! `select_for_job` is the per-job entry point. It proves the job could fit
//! on the candidate nodes at all, then retries placement against
//! increasingly permissive views of the cluster's cores:
//!
//! - pass 0 probes with every available core free,
//! - pass 1 uses only cores idle across all partitions,
//! - pass 2 gives up only cores held by higher-priority partitions (and
//!   makes that view the new baseline),
//! - pass 3 additionally excludes equal-priority partitions,
//! - pass 4 fits the job into its own partition's rows, densest row first.
//!
//! Jobs that cannot share CPUs stop after pass 1. The first pass that
//! produces a placement wins; its node map, per-node CPU counts and core
//! map become the allocation.

use log::{debug, error};

use crate::allocate::make_core_bitmap;
use crate::bitmap::Bitmap;
use crate::error::SelectError;
use crate::eval::{select_nodes, EvalCtx};
use crate::gres::GresFilter;
use crate::job::{CrType, JobDescriptor, NodeRequest, SelectMode};
use crate::partition::PartitionRes;
use crate::switch::SwitchTable;
use crate::topology::{NodeInventory, NodeUsage};
use crate::verify::verify_node_state;

/// Cluster-static inputs shared by every selection call.
pub struct SelectContext<'a> {
    pub inv: &'a NodeInventory,
    pub switches: Option<&'a SwitchTable>,
    pub usage: &'a [NodeUsage],
    pub gres: &'a dyn GresFilter,
    /// Gang scheduling lets non-sharing jobs time-share rows.
    pub gang_scheduling: bool,
    /// Epoch seconds, for the switch-count wait budget.
    pub now: u64,
}

/// A committed placement.
#[derive(Debug, Clone)]
pub struct Selection {
    /// Selected nodes.
    pub node_map: Bitmap,
    /// CPUs granted on each selected node, in node order.
    pub cpus: Vec<u16>,
    /// Selected cores over the global core space.
    pub core_map: Bitmap,
    /// MB granted on each selected node; empty without memory accounting.
    pub memory_allocated: Vec<u32>,
    pub node_req: NodeRequest,
    /// CPU count the allocation is charged for.
    pub ncpus: u32,
}

/// What a successful call produced, by mode.
#[derive(Debug)]
pub enum Outcome {
    /// Test-only: the job fits an otherwise idle cluster.
    TestOnly,
    /// Will-run: nodes are picked and `job.total_cpus` estimated.
    WillRun,
    Allocated(Selection),
}

/// Select the best set of resources for the given job.
///
/// `node_bitmap` carries the candidate nodes in and the selected nodes
/// out. `min_nodes`/`max_nodes` bound the allocation size and `req_nodes`
/// is the node count the user asked for. The caller-owned exclusion bitmap
/// is never modified.
#[allow(clippy::too_many_arguments)]
pub fn select_for_job(
    ctx: &SelectContext,
    job: &mut JobDescriptor,
    parts: &mut [PartitionRes],
    node_bitmap: &mut Bitmap,
    min_nodes: u32,
    max_nodes: u32,
    req_nodes: u32,
    mode: SelectMode,
    cr: CrType,
    job_node_req: NodeRequest,
    exc_core_bitmap: Option<&Bitmap>,
) -> Result<Outcome, SelectError> {
    let test_only = mode == SelectMode::TestOnly;

    if job.partition >= parts.len() {
        error!(
            "cres_select: could not find partition for job {}",
            job.job_id
        );
        return Err(SelectError::PartitionMissing);
    }

    // check node states and update the candidate map as necessary
    if !test_only {
        verify_node_state(
            parts,
            job,
            ctx.inv,
            node_bitmap,
            cr,
            ctx.usage,
            ctx.gres,
            job_node_req,
        )?;
    }

    // overcommit-style request: min_cpus tracks nodes, scale it by the
    // per-node multipliers
    if job.min_cpus == job.min_nodes {
        if let Some(t) = job.mc.threads_per_core {
            if t > 1 {
                job.min_cpus *= t as u32;
            }
        }
        if let Some(c) = job.mc.cores_per_socket {
            if c > 1 {
                job.min_cpus *= c as u32;
            }
        }
        if let Some(s) = job.mc.sockets_per_node {
            if s > 1 {
                job.min_cpus *= s as u32;
            }
        }
    }

    debug!(
        "cres_select: select_for_job: evaluating job {} on {} nodes",
        job.job_id,
        node_bitmap.weight()
    );

    let orig_map = node_bitmap.clone();
    let mut avail_cores = make_core_bitmap(ctx.inv, node_bitmap, job.core_spec);

    let ectx = EvalCtx {
        inv: ctx.inv,
        switches: ctx.switches,
        part: parts[job.partition].config.clone(),
        usage: ctx.usage,
        gres: ctx.gres,
        cr,
        test_only,
        now: ctx.now,
    };

    // Pass 0: prove the job can succeed with all available cores free; only
    // then seek the optimal placement within them.
    let mut free_cores = avail_cores.clone();
    let pass0_cpus = match select_nodes(
        &ectx,
        job,
        min_nodes,
        max_nodes,
        req_nodes,
        node_bitmap,
        &mut free_cores,
        None,
    ) {
        Ok(c) => c,
        Err(e) => {
            if e.is_retryable() {
                debug!("cres_select: select_for_job: test 0 fail: insufficient resources");
            }
            return Err(e);
        }
    };
    if test_only {
        debug!("cres_select: select_for_job: test 0 pass: test_only");
        return Ok(Outcome::TestOnly);
    }
    if !job.best_switch {
        return Err(SelectError::TopologyBestSwitch);
    }
    if cr.scope.is_none() && cr.memory {
        // memory-only accounting ignores existing CPU allocations; jump
        // straight to the allocation
        return alloc_job(
            ctx,
            job,
            node_bitmap,
            free_cores,
            Some(pass0_cpus),
            mode,
            cr,
            job_node_req,
        );
    }
    drop(pass0_cpus);
    debug!("cres_select: select_for_job: test 0 pass - job fits on given resources");

    // Validate the caller's exclusion bitmap once; a size mismatch means
    // the core layout changed under a reservation, so ignore it.
    let mut exc = exc_core_bitmap;
    if let Some(e) = exc {
        if e.len() != free_cores.len() {
            error!(
                "cres_select: bad exclusion core bitmap size ({} != {}), ignoring core exclusion",
                e.len(),
                free_cores.len()
            );
            exc = None;
        }
    }

    // Pass 1: idle cores only.
    node_bitmap.copy_from(&orig_map);
    free_cores.copy_from(&avail_cores);
    if let Some(e) = exc {
        debug!("excluding cores reserved: {:x}", e);
        free_cores.and_not_assign(e);
    }

    // remove all existing allocations from free_cores, collecting the
    // job's own partition usage along the way
    let mut part_core_map: Option<Bitmap> = None;
    for (pi, p) in parts.iter().enumerate() {
        for row in p.rows.iter().flatten() {
            free_cores.and_not_assign(row);
            if pi != job.partition {
                continue;
            }
            match &mut part_core_map {
                Some(m) => *m |= row,
                None => part_core_map = Some(row.clone()),
            }
        }
    }

    let mut cpu_count: Option<Vec<u16>> = None;
    match select_nodes(
        &ectx,
        job,
        min_nodes,
        max_nodes,
        req_nodes,
        node_bitmap,
        &mut free_cores,
        part_core_map.as_ref(),
    ) {
        Ok(c) => cpu_count = Some(c),
        Err(e) if !e.is_retryable() => return Err(e),
        Err(_) => {}
    }
    if cpu_count.is_some() && job.best_switch {
        debug!("cres_select: select_for_job: test 1 pass - idle resources found");
        return alloc_job(
            ctx,
            job,
            node_bitmap,
            free_cores,
            cpu_count,
            mode,
            cr,
            job_node_req,
        );
    }
    if !ctx.gang_scheduling && job_node_req == NodeRequest::OneRow {
        // This job cannot share CPUs regardless of priority, so it ends
        // here. Exclusive-node demands were already settled by the node
        // state filter.
        debug!("cres_select: select_for_job: test 1 fail - no idle resources available");
        return alloc_job(
            ctx,
            job,
            node_bitmap,
            free_cores,
            cpu_count,
            mode,
            cr,
            job_node_req,
        );
    }
    debug!("cres_select: select_for_job: test 1 fail - not enough idle resources");

    // Pass 2: remove resources held by higher-priority partitions and test
    // that the job can still succeed; this view becomes the new baseline.
    node_bitmap.copy_from(&orig_map);
    free_cores.copy_from(&avail_cores);
    if let Some(e) = exc {
        free_cores.and_not_assign(e);
    }
    let jp_priority = parts[job.partition].config.priority;
    for p in parts.iter() {
        if p.config.priority <= jp_priority {
            continue;
        }
        for row in p.rows.iter().flatten() {
            free_cores.and_not_assign(row);
        }
    }
    avail_cores.copy_from(&free_cores);
    match select_nodes(
        &ectx,
        job,
        min_nodes,
        max_nodes,
        req_nodes,
        node_bitmap,
        &mut free_cores,
        part_core_map.as_ref(),
    ) {
        Ok(_) => {
            debug!(
                "cres_select: select_for_job: test 2 pass - available resources for this priority"
            );
        }
        Err(e) if !e.is_retryable() => return Err(e),
        Err(_) => {
            // the job needs resources currently held by higher-priority
            // jobs; fail for now
            debug!(
                "cres_select: select_for_job: test 2 fail - resources busy with higher priority jobs"
            );
            return alloc_job(
                ctx,
                job,
                node_bitmap,
                free_cores,
                None,
                mode,
                cr,
                job_node_req,
            );
        }
    }

    // Pass 3: also exclude equal-priority partitions, forcing idle cores
    // among the job's peers.
    node_bitmap.copy_from(&orig_map);
    free_cores.copy_from(&avail_cores);
    for p in parts.iter() {
        if p.config.priority != jp_priority {
            continue;
        }
        for row in p.rows.iter().flatten() {
            free_cores.and_not_assign(row);
        }
    }
    match select_nodes(
        &ectx,
        job,
        min_nodes,
        max_nodes,
        req_nodes,
        node_bitmap,
        &mut free_cores,
        part_core_map.as_ref(),
    ) {
        Ok(c) => {
            // jobs from lower-priority partitions are the only thing left
            // in the way; overlap them
            debug!("cres_select: select_for_job: test 3 pass - found resources");
            return alloc_job(
                ctx,
                job,
                node_bitmap,
                free_cores,
                Some(c),
                mode,
                cr,
                job_node_req,
            );
        }
        Err(e) if !e.is_retryable() => return Err(e),
        Err(_) => {
            debug!(
                "cres_select: select_for_job: test 3 fail - not enough idle resources in same priority"
            );
        }
    }

    // Pass 4: fit the job into one of its own partition's rows.
    if parts[job.partition].rows.is_empty() {
        // no existing jobs in this partition; place into the baseline
        node_bitmap.copy_from(&orig_map);
        free_cores.copy_from(&avail_cores);
        let picked = match select_nodes(
            &ectx,
            job,
            min_nodes,
            max_nodes,
            req_nodes,
            node_bitmap,
            &mut free_cores,
            part_core_map.as_ref(),
        ) {
            Ok(c) => {
                debug!("cres_select: select_for_job: test 4 pass - first row found");
                Some(c)
            }
            Err(e) if !e.is_retryable() => return Err(e),
            Err(_) => None,
        };
        return alloc_job(
            ctx,
            job,
            node_bitmap,
            free_cores,
            picked,
            mode,
            cr,
            job_node_req,
        );
    }

    parts[job.partition].sort_rows_by_density();
    let num_rows = parts[job.partition].num_rows();
    let row_limit = if job_node_req != NodeRequest::Available {
        1
    } else {
        num_rows
    };
    let mut picked: Option<Vec<u16>> = None;
    let mut row_i = 0;
    let mut hit_empty_row = false;
    while row_i < row_limit {
        let row = match parts[job.partition].rows[row_i].clone() {
            Some(r) => r,
            None => {
                hit_empty_row = true;
                break;
            }
        };
        node_bitmap.copy_from(&orig_map);
        free_cores.copy_from(&avail_cores);
        free_cores.and_not_assign(&row);
        match select_nodes(
            &ectx,
            job,
            min_nodes,
            max_nodes,
            req_nodes,
            node_bitmap,
            &mut free_cores,
            part_core_map.as_ref(),
        ) {
            Ok(c) => {
                debug!("cres_select: select_for_job: test 4 pass - row {}", row_i);
                picked = Some(c);
                break;
            }
            Err(e) if !e.is_retryable() => return Err(e),
            Err(_) => {
                debug!("cres_select: select_for_job: test 4 fail - row {}", row_i);
            }
        }
        row_i += 1;
    }

    if picked.is_none() && hit_empty_row {
        // an unused row remains, so use it
        debug!(
            "cres_select: select_for_job: test 4 trying empty row {}",
            row_i
        );
        node_bitmap.copy_from(&orig_map);
        free_cores.copy_from(&avail_cores);
        match select_nodes(
            &ectx,
            job,
            min_nodes,
            max_nodes,
            req_nodes,
            node_bitmap,
            &mut free_cores,
            part_core_map.as_ref(),
        ) {
            Ok(c) => picked = Some(c),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(_) => {}
        }
    }
    if picked.is_none() {
        debug!("cres_select: select_for_job: test 4 fail - busy partition");
    }
    alloc_job(
        ctx,
        job,
        node_bitmap,
        free_cores,
        picked,
        mode,
        cr,
        job_node_req,
    )
}

/// Turn a pass result into the caller-visible outcome. `node_bitmap` holds
/// the selected nodes, `free_cores` the selected cores, `cpu_count` the
/// per-selected-node CPU counts (None if the final pass failed).
#[allow(clippy::too_many_arguments)]
fn alloc_job(
    ctx: &SelectContext,
    job: &mut JobDescriptor,
    node_bitmap: &Bitmap,
    free_cores: Bitmap,
    cpu_count: Option<Vec<u16>>,
    mode: SelectMode,
    cr: CrType,
    job_node_req: NodeRequest,
) -> Result<Outcome, SelectError> {
    let mut cpus = match (cpu_count, job.best_switch) {
        (Some(c), true) => c,
        _ => {
            debug!("cres_select: exiting select_for_job with no allocation");
            return Err(SelectError::InsufficientResources);
        }
    };

    if mode == SelectMode::WillRun {
        // a reasonable guess until task distribution has run
        job.total_cpus = job.min_cpus.max(job.min_nodes);
        return Ok(Outcome::WillRun);
    }

    debug!(
        "cres_select: select_for_job: distributing job {}",
        job.job_id
    );

    let nhosts = node_bitmap.weight() as u32;
    let mut ncpus = nhosts;
    if job.ntasks_per_node > 0 {
        ncpus *= job.ntasks_per_node as u32;
    }
    ncpus = ncpus.max(job.min_cpus);
    ncpus = ncpus.max(job.pn_min_cpus as u32);

    // sync the per-node CPUs with the required-node layout, total them up
    let mut total_cpus: u32 = 0;
    {
        let mut ll: i32 = -1;
        let mut sel_i = 0usize;
        for n in 0..ctx.inv.len() {
            let required = job.req_node_bitmap.as_ref().is_some_and(|r| r.test(n));
            if job.req_node_layout.is_some() && required {
                ll += 1;
            }
            if !node_bitmap.test(n) {
                continue;
            }
            if let Some(layout) = &job.req_node_layout {
                if required {
                    cpus[sel_i] = cpus[sel_i].min(layout[ll as usize]);
                } else {
                    cpus[sel_i] = 0;
                }
            }
            total_cpus += cpus[sel_i] as u32;
            sel_i += 1;
        }
    }

    // Under overcommit, ncpus stays at the minimum that buys the requested
    // node count; every selected logical CPU is still handed over.
    if job.overcommit && job.num_tasks > 0 {
        ncpus = total_cpus.min(job.num_tasks);
    }

    if job.core_spec > 0 {
        // reserved cores: the job is charged every advertised CPU
        job.total_cpus = node_bitmap
            .iter()
            .map(|n| ctx.inv.node(n).cpus as u32)
            .sum();
    } else {
        job.total_cpus = total_cpus;
    }

    let mut memory_allocated = Vec::new();
    if cr.memory {
        let save_mem = job.pn_min_memory;
        if job.mem_per_cpu {
            memory_allocated = cpus.iter().map(|&c| c as u32 * save_mem).collect();
        } else {
            memory_allocated = vec![save_mem; nhosts as usize];
        }
    }

    debug!(
        "cres_select: select_for_job: job {} ncpus {} cbits {} nbits {}",
        job.job_id,
        ncpus,
        free_cores.weight(),
        nhosts
    );

    Ok(Outcome::Allocated(Selection {
        node_map: node_bitmap.clone(),
        cpus,
        core_map: free_cores,
        memory_allocated,
        node_req: job_node_req,
        ncpus,
    }))
}
