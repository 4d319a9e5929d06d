// SPDX-License-Identifier: GPL-2.0

//! # Consumable-resource node selection
//!
//! The selection core of the cres workload manager: given a job's
//! requested shape (nodes, CPUs, tasks, memory, generic resources,
//! topology constraints, contiguity, exclusivity), the cluster's
//! socket/core/thread geometry, and the cores already held by running
//! jobs, pick the nodes to use and the cores to bind on each of them, or
//! reject the job.
//!
//! The core is synchronous and single-threaded per call; the surrounding
//! service serializes access to the inventory, the usage records and the
//! partition allocation table. Given identical inputs, a call returns an
//! identical result.
//!
//! Typical use:
//!
//!```no_run
//!     use cres_select::*;
//!
//!     # fn demo(inv: NodeInventory, usage: Vec<NodeUsage>,
//!     #        mut parts: Vec<PartitionRes>, mut job: JobDescriptor,
//!     #        mut candidates: Bitmap) -> Result<(), SelectError> {
//!     let ctx = SelectContext {
//!         inv: &inv,
//!         switches: None,
//!         usage: &usage,
//!         gres: &NoGres,
//!         gang_scheduling: false,
//!         now: 0,
//!     };
//!     let outcome = select_for_job(
//!         &ctx, &mut job, &mut parts, &mut candidates,
//!         1, 4, 1,
//!         SelectMode::RunNow, CrType::cores(true), NodeRequest::Available,
//!         None,
//!     )?;
//!     if let Outcome::Allocated(sel) = outcome {
//!         // hand sel off to task distribution
//!     }
//!     # Ok(())
//!     # }
//!```

mod bitmap;
pub use bitmap::read_index_list;
pub use bitmap::Bitmap;

mod topology;
pub use topology::NodeInventory;
pub use topology::NodeRecord;
pub use topology::NodeState;
pub use topology::NodeUsage;

mod switch;
pub use switch::SwitchRecord;
pub use switch::SwitchTable;

mod partition;
pub use partition::PartitionConfig;
pub use partition::PartitionRes;

mod job;
pub use job::CrScope;
pub use job::CrType;
pub use job::JobDescriptor;
pub use job::MultiCore;
pub use job::NodeRequest;
pub use job::SelectMode;

mod gres;
pub use gres::GresFilter;
pub use gres::NoGres;

mod error;
pub use error::SelectError;

mod allocate;
pub use allocate::allocate_cores;
pub use allocate::allocate_sockets;
pub use allocate::can_job_run_on_node;
pub use allocate::make_core_bitmap;

mod verify;
pub use verify::verify_node_state;

mod eval;

mod driver;
pub use driver::select_for_job;
pub use driver::Outcome;
pub use driver::SelectContext;
pub use driver::Selection;
