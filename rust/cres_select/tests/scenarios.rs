// SPDX-License-Identifier: GPL-2.0

// End-to-end selection scenarios driven through the full driver, with a
// simulated task-distribution step that commits each allocation into a
// partition row. All state is plain in-memory data; nothing touches the
// host.

use std::ops::Range;

use cres_select::*;

fn node(name: &str, sockets: u16, cores: u16, vpus: u16, memory: u32) -> NodeRecord {
    NodeRecord {
        name: name.to_string(),
        sockets,
        cores,
        vpus,
        cpus: sockets * cores * vpus,
        real_memory: memory,
    }
}

fn partition(name: &str, priority: u16, num_rows: usize) -> PartitionRes {
    PartitionRes::new(
        PartitionConfig {
            name: name.to_string(),
            priority,
            max_cpus_per_node: None,
            lln: false,
        },
        num_rows,
    )
}

fn all_nodes(inv: &NodeInventory) -> Bitmap {
    let mut map = Bitmap::new(inv.len());
    map.set_all();
    map
}

/// Minimal stand-in for task distribution: keep the first cpus[i] worth of
/// cores on each selected node, then file the job into the first partition
/// row its cores do not collide with.
fn commit(inv: &NodeInventory, parts: &mut [PartitionRes], part_i: usize, sel: &Selection) {
    let mut committed = Bitmap::new(inv.total_cores());
    for (i, n) in sel.node_map.iter().enumerate() {
        let vpus = inv.node(n).vpus as usize;
        let mut want = (sel.cpus[i] as usize).div_ceil(vpus);
        for c in inv.core_range(n) {
            if want == 0 {
                break;
            }
            if sel.core_map.test(c) {
                committed.set(c).unwrap();
                want -= 1;
            }
        }
    }
    for row in parts[part_i].rows.iter_mut() {
        match row {
            Some(m) if m.overlaps(&committed) => continue,
            Some(m) => {
                *m |= &committed;
                return;
            }
            None => {
                *row = Some(committed);
                return;
            }
        }
    }
    panic!("no free row for committed job");
}

fn run(
    ctx: &SelectContext,
    job: &mut JobDescriptor,
    parts: &mut [PartitionRes],
    counts: (u32, u32, u32),
    cr: CrType,
) -> Result<Selection, SelectError> {
    let mut candidates = all_nodes(ctx.inv);
    let outcome = select_for_job(
        ctx,
        job,
        parts,
        &mut candidates,
        counts.0,
        counts.1,
        counts.2,
        SelectMode::RunNow,
        cr,
        NodeRequest::Available,
        None,
    )?;
    match outcome {
        Outcome::Allocated(sel) => Ok(sel),
        other => panic!("expected an allocation, got {other:?}"),
    }
}

/// Selected cores must sit inside selected nodes' ranges (and nowhere
/// else), and never on a core-spec core.
fn assert_core_containment(inv: &NodeInventory, sel: &Selection, spec_cores: &[Range<usize>]) {
    for n in 0..inv.len() {
        let in_range = sel.core_map.weight_range(inv.core_range(n));
        if !sel.node_map.test(n) {
            assert_eq!(in_range, 0, "cores set for unselected node {n}");
        }
    }
    for r in spec_cores {
        assert_eq!(
            sel.core_map.weight_range(r.clone()),
            0,
            "core-spec cores selected"
        );
    }
}

// S1: the classic 4-node fit. linux01..03 carry 2 CPUs, linux04 carries 4.
#[test]
fn s1_basic_fit() {
    let inv = NodeInventory::new(vec![
        node("linux01", 1, 2, 1, 2048),
        node("linux02", 1, 2, 1, 2048),
        node("linux03", 1, 2, 1, 2048),
        node("linux04", 1, 4, 1, 2048),
    ])
    .unwrap();
    let usage = vec![NodeUsage::default(); 4];
    let mut parts = vec![partition("lsf", 10, 2)];
    let ctx = SelectContext {
        inv: &inv,
        switches: None,
        usage: &usage,
        gres: &NoGres,
        gang_scheduling: true,
        now: 0,
    };

    // job1: all four nodes, whole-node
    let mut job1 = JobDescriptor {
        job_id: 1,
        min_cpus: 4,
        min_nodes: 4,
        whole_node: true,
        share_res: false,
        ..JobDescriptor::default()
    };
    let sel1 = run(&ctx, &mut job1, &mut parts, (4, 4, 4), CrType::cores(false)).unwrap();
    assert_eq!(sel1.node_map.weight(), 4);
    assert_eq!(sel1.cpus, vec![2, 2, 2, 4]);
    assert_eq!(job1.total_cpus, 10);
    assert_core_containment(&inv, &sel1, &[]);
    commit(&inv, &mut parts, 0, &sel1);

    // job2: three whole nodes; lands in the second row on linux01..03
    let mut job2 = JobDescriptor {
        job_id: 2,
        min_cpus: 3,
        min_nodes: 3,
        whole_node: true,
        share_res: false,
        ..JobDescriptor::default()
    };
    let sel2 = run(&ctx, &mut job2, &mut parts, (3, 3, 3), CrType::cores(false)).unwrap();
    assert_eq!(sel2.node_map.iter().collect::<Vec<_>>(), vec![0, 1, 2]);
    assert_eq!(sel2.cpus, vec![2, 2, 2]);
    commit(&inv, &mut parts, 0, &sel2);

    // job3: a single task; the only room in the shared row is on linux04
    let mut job3 = JobDescriptor {
        job_id: 3,
        min_cpus: 1,
        min_nodes: 1,
        num_tasks: 1,
        ..JobDescriptor::default()
    };
    let sel3 = run(&ctx, &mut job3, &mut parts, (1, 1, 1), CrType::cores(false)).unwrap();
    assert_eq!(sel3.node_map.iter().collect::<Vec<_>>(), vec![3]);
    assert_eq!(sel3.cpus, vec![1]);
    commit(&inv, &mut parts, 0, &sel3);

    // job4: three more CPUs; exactly the rest of linux04
    let mut job4 = JobDescriptor {
        job_id: 4,
        min_cpus: 3,
        min_nodes: 1,
        num_tasks: 3,
        ..JobDescriptor::default()
    };
    let sel4 = run(&ctx, &mut job4, &mut parts, (1, 4, 1), CrType::cores(false)).unwrap();
    assert_eq!(sel4.node_map.iter().collect::<Vec<_>>(), vec![3]);
    assert_eq!(sel4.cpus, vec![3]);
    commit(&inv, &mut parts, 0, &sel4);

    // job5 remains queued until job1 finishes, then takes linux01..03
    let mut job5 = JobDescriptor {
        job_id: 5,
        min_cpus: 3,
        min_nodes: 3,
        num_tasks: 3,
        ..JobDescriptor::default()
    };
    let err = run(&ctx, &mut job5, &mut parts, (3, 3, 3), CrType::cores(false)).unwrap_err();
    assert_eq!(err, SelectError::InsufficientResources);

    parts[0].rows[0] = None; // job1 finished
    let sel5 = run(&ctx, &mut job5, &mut parts, (3, 3, 3), CrType::cores(false)).unwrap();
    assert_eq!(sel5.node_map.iter().collect::<Vec<_>>(), vec![0, 1, 2]);
    commit(&inv, &mut parts, 0, &sel5);
}

// S2: whole-socket exclusivity on a 2-socket node with one core pre-used.
#[test]
fn s2_whole_socket_exclusivity() {
    let inv = NodeInventory::new(vec![node("n0", 2, 4, 1, 4096)]).unwrap();
    let usage = vec![NodeUsage::default()];
    let mut parts = vec![partition("batch", 10, 2)];
    // an earlier job of this partition holds one core of socket 0
    parts[0].rows[0] = Some(Bitmap::from_list("0", 8).unwrap());
    let ctx = SelectContext {
        inv: &inv,
        switches: None,
        usage: &usage,
        gres: &NoGres,
        gang_scheduling: true,
        now: 0,
    };

    let mut job = JobDescriptor {
        job_id: 10,
        min_cpus: 4,
        min_nodes: 1,
        ..JobDescriptor::default()
    };
    let sel = run(&ctx, &mut job, &mut parts, (1, 1, 1), CrType::sockets(false)).unwrap();
    assert_eq!(sel.cpus, vec![4]);
    // socket 1 only: every selected core sits in a socket with no pre-used
    // cores
    assert_eq!(sel.core_map.iter().collect::<Vec<_>>(), vec![4, 5, 6, 7]);
}

// S3: tasks-per-socket with hyperthreads and cpus-per-task.
#[test]
fn s3_tasks_per_socket() {
    let inv = NodeInventory::new(vec![node("n0", 2, 4, 2, 4096)]).unwrap();
    let usage = vec![NodeUsage::default()];
    let mut parts = vec![partition("batch", 10, 1)];
    let ctx = SelectContext {
        inv: &inv,
        switches: None,
        usage: &usage,
        gres: &NoGres,
        gang_scheduling: false,
        now: 0,
    };

    let mut job = JobDescriptor {
        job_id: 11,
        min_cpus: 8,
        min_nodes: 1,
        cpus_per_task: 2,
        mc: MultiCore {
            ntasks_per_socket: 2,
            ..MultiCore::default()
        },
        ..JobDescriptor::default()
    };
    let sel = run(&ctx, &mut job, &mut parts, (1, 1, 1), CrType::cores(false)).unwrap();
    assert_eq!(sel.cpus, vec![8]);
    // exactly 4 cores, two per socket
    assert_eq!(sel.core_map.weight(), 4);
    assert_eq!(sel.core_map.weight_range(0..4), 2);
    assert_eq!(sel.core_map.weight_range(4..8), 2);
}

// S4: per-CPU memory trims the usable CPU count.
#[test]
fn s4_memory_per_cpu_cap() {
    let inv = NodeInventory::new(vec![node("n0", 1, 8, 1, 3000)]).unwrap();
    let usage = vec![NodeUsage::default()];
    let mut parts = vec![partition("batch", 10, 1)];
    let ctx = SelectContext {
        inv: &inv,
        switches: None,
        usage: &usage,
        gres: &NoGres,
        gang_scheduling: false,
        now: 0,
    };

    let mut job = JobDescriptor {
        job_id: 12,
        min_cpus: 3,
        min_nodes: 1,
        pn_min_memory: 1000,
        mem_per_cpu: true,
        ..JobDescriptor::default()
    };
    let sel = run(&ctx, &mut job, &mut parts, (1, 1, 1), CrType::cpus(true)).unwrap();
    assert_eq!(sel.cpus, vec![3]);
    assert_eq!(sel.memory_allocated, vec![3000]);

    // four CPUs worth of memory demand cannot fit
    let mut job = JobDescriptor {
        job_id: 13,
        min_cpus: 4,
        min_nodes: 1,
        pn_min_memory: 1000,
        mem_per_cpu: true,
        ..JobDescriptor::default()
    };
    let err = run(&ctx, &mut job, &mut parts, (1, 1, 1), CrType::cpus(true)).unwrap_err();
    assert_eq!(err, SelectError::InsufficientResources);
}

fn fabric(inv: &NodeInventory) -> SwitchTable {
    SwitchTable::new(
        vec![
            SwitchRecord {
                name: "a".to_string(),
                level: 0,
                link_speed: 100,
                nodes: Bitmap::from_list("0-1", inv.len()).unwrap(),
            },
            SwitchRecord {
                name: "b".to_string(),
                level: 0,
                link_speed: 100,
                nodes: Bitmap::from_list("2-3", inv.len()).unwrap(),
            },
            SwitchRecord {
                name: "root".to_string(),
                level: 1,
                link_speed: 100,
                nodes: Bitmap::from_list("0-3", inv.len()).unwrap(),
            },
        ],
        inv.len(),
    )
    .unwrap()
}

// S5: switch-tree best fit lands on the leaf holding the required node.
#[test]
fn s5_topology_best_fit() {
    let inv = NodeInventory::new(vec![
        node("n1", 1, 2, 1, 2048),
        node("n2", 1, 2, 1, 2048),
        node("n3", 1, 2, 1, 2048),
        node("n4", 1, 2, 1, 2048),
    ])
    .unwrap();
    let switches = fabric(&inv);
    let usage = vec![NodeUsage::default(); 4];
    let mut parts = vec![partition("batch", 10, 1)];
    let ctx = SelectContext {
        inv: &inv,
        switches: Some(&switches),
        usage: &usage,
        gres: &NoGres,
        gang_scheduling: false,
        now: 1000,
    };

    let mut job = JobDescriptor {
        job_id: 20,
        min_cpus: 2,
        min_nodes: 2,
        req_node_bitmap: Some(Bitmap::from_list("2", 4).unwrap()),
        req_switch: 1,
        wait4switch: 300,
        ..JobDescriptor::default()
    };
    let sel = run(&ctx, &mut job, &mut parts, (2, 4, 2), CrType::cores(false)).unwrap();
    // switch b holds the required node and fits the job on one leaf
    assert_eq!(sel.node_map.iter().collect::<Vec<_>>(), vec![2, 3]);
    assert!(job.best_switch);
    assert_eq!(job.wait4switch_start, 1000);
}

// A job forced across two leaves inside its wait budget is deferred.
#[test]
fn s5_topology_switch_budget_defers() {
    let inv = NodeInventory::new(vec![
        node("n1", 1, 2, 1, 2048),
        node("n2", 1, 2, 1, 2048),
        node("n3", 1, 2, 1, 2048),
        node("n4", 1, 2, 1, 2048),
    ])
    .unwrap();
    let switches = fabric(&inv);
    let usage = vec![NodeUsage::default(); 4];
    let mut parts = vec![partition("batch", 10, 1)];
    let ctx = SelectContext {
        inv: &inv,
        switches: Some(&switches),
        usage: &usage,
        gres: &NoGres,
        gang_scheduling: false,
        now: 1000,
    };

    let mut job = JobDescriptor {
        job_id: 21,
        min_cpus: 3,
        min_nodes: 3,
        req_switch: 1,
        wait4switch: 300,
        ..JobDescriptor::default()
    };
    let mut candidates = all_nodes(&inv);
    let err = select_for_job(
        &ctx,
        &mut job,
        &mut parts,
        &mut candidates,
        3,
        4,
        3,
        SelectMode::RunNow,
        CrType::cores(false),
        NodeRequest::Available,
        None,
    )
    .unwrap_err();
    assert_eq!(err, SelectError::TopologyBestSwitch);
    assert!(!job.best_switch);

    // once the wait budget is exhausted the same request goes through
    let ctx_late = SelectContext {
        now: 1000 + 301,
        ..ctx
    };
    let sel = run(
        &ctx_late,
        &mut job,
        &mut parts,
        (3, 4, 3),
        CrType::cores(false),
    )
    .unwrap();
    assert_eq!(sel.node_map.weight(), 3);
    assert!(job.best_switch);
}

// S6: knapsack mitigation ends up on the one node that can hold the job.
#[test]
fn s6_knapsack_single_big_node() {
    let inv = NodeInventory::new(vec![
        node("n0", 1, 1, 1, 1024),
        node("n1", 1, 1, 1, 1024),
        node("n2", 1, 1, 1, 1024),
        node("n3", 1, 1, 1, 1024),
        node("n4", 1, 8, 1, 8192),
    ])
    .unwrap();
    let usage = vec![NodeUsage::default(); 5];
    let mut parts = vec![partition("batch", 10, 1)];
    let ctx = SelectContext {
        inv: &inv,
        switches: None,
        usage: &usage,
        gres: &NoGres,
        gang_scheduling: false,
        now: 0,
    };

    let mut job = JobDescriptor {
        job_id: 30,
        min_cpus: 8,
        min_nodes: 1,
        ..JobDescriptor::default()
    };
    let sel = run(&ctx, &mut job, &mut parts, (1, 1, 1), CrType::cores(false)).unwrap();
    assert_eq!(sel.node_map.iter().collect::<Vec<_>>(), vec![4]);
    assert_eq!(sel.cpus, vec![8]);
}

/// GRES stub capping every node at a fixed core count.
struct GresCap(u32);

impl GresFilter for GresCap {
    fn core_filter(
        &self,
        _node_i: usize,
        _node_name: &str,
        _test_only: bool,
        _core_map: &mut Bitmap,
        _core_range: Range<usize>,
    ) {
    }

    fn job_test(
        &self,
        _node_i: usize,
        _node_name: &str,
        _test_only: bool,
        _core_map: Option<&Bitmap>,
        _core_range: Range<usize>,
        _job_id: u32,
    ) -> Option<u32> {
        Some(self.0)
    }
}

#[test]
fn gres_bound_trims_cpus() {
    let inv = NodeInventory::new(vec![node("n0", 1, 8, 1, 4096)]).unwrap();
    let usage = vec![NodeUsage::default()];
    let mut parts = vec![partition("batch", 10, 1)];
    let gres = GresCap(2);
    let ctx = SelectContext {
        inv: &inv,
        switches: None,
        usage: &usage,
        gres: &gres,
        gang_scheduling: false,
        now: 0,
    };

    let mut job = JobDescriptor {
        job_id: 40,
        min_cpus: 2,
        min_nodes: 1,
        ..JobDescriptor::default()
    };
    let sel = run(&ctx, &mut job, &mut parts, (1, 1, 1), CrType::cpus(false)).unwrap();
    assert_eq!(sel.cpus, vec![2]);
}

#[test]
fn gres_exhausted_required_node_is_fatal() {
    let inv = NodeInventory::new(vec![node("n0", 1, 8, 1, 4096)]).unwrap();
    let usage = vec![NodeUsage::default()];
    let mut parts = vec![partition("batch", 10, 1)];
    let gres = GresCap(0);
    let ctx = SelectContext {
        inv: &inv,
        switches: None,
        usage: &usage,
        gres: &gres,
        gang_scheduling: false,
        now: 0,
    };

    let mut job = JobDescriptor {
        job_id: 41,
        min_cpus: 1,
        min_nodes: 1,
        req_node_bitmap: Some(Bitmap::from_list("0", 1).unwrap()),
        ..JobDescriptor::default()
    };
    let mut candidates = all_nodes(&inv);
    let err = select_for_job(
        &ctx,
        &mut job,
        &mut parts,
        &mut candidates,
        1,
        1,
        1,
        SelectMode::RunNow,
        CrType::cores(false),
        NodeRequest::Available,
        None,
    )
    .unwrap_err();
    assert_eq!(err, SelectError::RequiredNodeUnusable);
}

#[test]
fn memory_only_ignores_cpu_allocations() {
    let inv = NodeInventory::new(vec![node("n0", 1, 4, 1, 4096)]).unwrap();
    let usage = vec![NodeUsage::default()];
    let mut parts = vec![partition("batch", 10, 1)];
    // every core is busy, but memory accounting does not care
    parts[0].rows[0] = Some(Bitmap::from_str("all", 4).unwrap());
    let ctx = SelectContext {
        inv: &inv,
        switches: None,
        usage: &usage,
        gres: &NoGres,
        gang_scheduling: false,
        now: 0,
    };

    let mut job = JobDescriptor {
        job_id: 50,
        min_cpus: 1,
        min_nodes: 1,
        pn_min_memory: 1024,
        ..JobDescriptor::default()
    };
    let sel = run(&ctx, &mut job, &mut parts, (1, 1, 1), CrType::memory_only()).unwrap();
    assert_eq!(sel.node_map.weight(), 1);
    assert_eq!(sel.memory_allocated, vec![1024]);
}

#[test]
fn test_only_and_will_run_modes() {
    let inv = NodeInventory::new(vec![node("n0", 1, 4, 1, 4096)]).unwrap();
    let usage = vec![NodeUsage {
        alloc_memory: 0,
        state: NodeState::Completing,
    }];
    let mut parts = vec![partition("batch", 10, 1)];
    let ctx = SelectContext {
        inv: &inv,
        switches: None,
        usage: &usage,
        gres: &NoGres,
        gang_scheduling: false,
        now: 0,
    };

    // test-only reports feasibility even though the node is completing
    let mut job = JobDescriptor {
        job_id: 60,
        min_cpus: 2,
        min_nodes: 1,
        ..JobDescriptor::default()
    };
    let mut candidates = all_nodes(&inv);
    let outcome = select_for_job(
        &ctx,
        &mut job,
        &mut parts,
        &mut candidates,
        1,
        1,
        1,
        SelectMode::TestOnly,
        CrType::cores(false),
        NodeRequest::Available,
        None,
    )
    .unwrap();
    assert!(matches!(outcome, Outcome::TestOnly));

    // will-run picks nodes and estimates total_cpus without an allocation
    let usage = vec![NodeUsage::default()];
    let ctx = SelectContext {
        usage: &usage,
        ..ctx
    };
    let mut candidates = all_nodes(&inv);
    let outcome = select_for_job(
        &ctx,
        &mut job,
        &mut parts,
        &mut candidates,
        1,
        1,
        1,
        SelectMode::WillRun,
        CrType::cores(false),
        NodeRequest::Available,
        None,
    )
    .unwrap();
    assert!(matches!(outcome, Outcome::WillRun));
    assert_eq!(job.total_cpus, 2);
    assert_eq!(candidates.weight(), 1);
}

#[test]
fn exclusion_bitmap_is_honored_and_unmodified() {
    let inv = NodeInventory::new(vec![node("n0", 1, 4, 1, 4096)]).unwrap();
    let usage = vec![NodeUsage::default()];
    let mut parts = vec![partition("batch", 10, 1)];
    let ctx = SelectContext {
        inv: &inv,
        switches: None,
        usage: &usage,
        gres: &NoGres,
        gang_scheduling: false,
        now: 0,
    };

    let exc = Bitmap::from_list("0-1", 4).unwrap();
    let exc_before = exc.clone();
    let mut job = JobDescriptor {
        job_id: 70,
        min_cpus: 2,
        min_nodes: 1,
        ..JobDescriptor::default()
    };
    let mut candidates = all_nodes(&inv);
    let outcome = select_for_job(
        &ctx,
        &mut job,
        &mut parts,
        &mut candidates,
        1,
        1,
        1,
        SelectMode::RunNow,
        CrType::cores(false),
        NodeRequest::Available,
        Some(&exc),
    )
    .unwrap();
    let sel = match outcome {
        Outcome::Allocated(sel) => sel,
        other => panic!("expected allocation, got {other:?}"),
    };
    assert_eq!(sel.core_map.iter().collect::<Vec<_>>(), vec![2, 3]);
    assert_eq!(exc, exc_before);

    // a wrong-sized exclusion map is ignored rather than honored
    let bad_exc = Bitmap::from_list("0-1", 3).unwrap();
    let mut job = JobDescriptor {
        job_id: 71,
        min_cpus: 4,
        min_nodes: 1,
        ..JobDescriptor::default()
    };
    let mut candidates = all_nodes(&inv);
    let outcome = select_for_job(
        &ctx,
        &mut job,
        &mut parts,
        &mut candidates,
        1,
        1,
        1,
        SelectMode::RunNow,
        CrType::cores(false),
        NodeRequest::Available,
        Some(&bad_exc),
    )
    .unwrap();
    assert!(matches!(outcome, Outcome::Allocated(_)));
}

#[test]
fn identical_inputs_select_identically() {
    let inv = NodeInventory::new(vec![
        node("n0", 2, 4, 2, 8192),
        node("n1", 2, 4, 2, 8192),
        node("n2", 2, 4, 2, 8192),
    ])
    .unwrap();
    let usage = vec![NodeUsage::default(); 3];
    let ctx = SelectContext {
        inv: &inv,
        switches: None,
        usage: &usage,
        gres: &NoGres,
        gang_scheduling: true,
        now: 0,
    };
    let job_proto = JobDescriptor {
        job_id: 80,
        min_cpus: 6,
        min_nodes: 1,
        pn_min_memory: 512,
        ..JobDescriptor::default()
    };
    let mut parts_a = vec![partition("batch", 10, 2)];
    parts_a[0].rows[0] = Some(Bitmap::from_list("0-3", 24).unwrap());
    let mut parts_b = parts_a.clone();

    let mut job_a = job_proto.clone();
    let sel_a = run(&ctx, &mut job_a, &mut parts_a, (1, 3, 1), CrType::cores(true)).unwrap();
    let mut job_b = job_proto.clone();
    let sel_b = run(&ctx, &mut job_b, &mut parts_b, (1, 3, 1), CrType::cores(true)).unwrap();

    assert_eq!(sel_a.node_map, sel_b.node_map);
    assert_eq!(sel_a.cpus, sel_b.cpus);
    assert_eq!(sel_a.core_map, sel_b.core_map);
    assert_eq!(sel_a.memory_allocated, sel_b.memory_allocated);
    assert_eq!(job_a.total_cpus, job_b.total_cpus);
}

#[test]
fn core_spec_cores_never_selected() {
    let inv = NodeInventory::new(vec![node("n0", 2, 4, 1, 4096)]).unwrap();
    let usage = vec![NodeUsage::default()];
    let mut parts = vec![partition("batch", 10, 1)];
    let ctx = SelectContext {
        inv: &inv,
        switches: None,
        usage: &usage,
        gres: &NoGres,
        gang_scheduling: false,
        now: 0,
    };

    let mut job = JobDescriptor {
        job_id: 90,
        min_cpus: 6,
        min_nodes: 1,
        core_spec: 2,
        whole_node: true,
        ..JobDescriptor::default()
    };
    let sel = run(&ctx, &mut job, &mut parts, (1, 1, 1), CrType::cores(false)).unwrap();
    // the last core of each socket is reserved for the system
    assert_core_containment(&inv, &sel, &[3..4, 7..8]);
    assert_eq!(sel.cpus, vec![6]);
    // with reserved cores the job is charged the full node
    assert_eq!(job.total_cpus, 8);
}
