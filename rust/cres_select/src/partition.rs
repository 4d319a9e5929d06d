// SPDX-License-Identifier: GPL-2.0

//! Partition allocation table.
//!
//! Each scheduling partition tracks the cores its running jobs occupy as a
//! set of "rows" over the global core space. Rows never overlap on a core:
//! a partition with N rows can time-share a core between up to N jobs under
//! gang scheduling. A single job's cores always live in exactly one row.
//!
//! Row bitmaps are `None` until first use so an empty row is
//! distinguishable from a row of all-free cores.

use crate::bitmap::Bitmap;
use std::cmp::Reverse;
use std::ops::Range;

/// Static partition configuration relevant to selection.
#[derive(Debug, Clone)]
pub struct PartitionConfig {
    pub name: String,
    pub priority: u16,
    /// Cap on CPUs a single job may take on one node. None = unlimited.
    pub max_cpus_per_node: Option<u32>,
    /// Prefer least-loaded-node placement for jobs in this partition.
    pub lln: bool,
}

/// One partition's entry in the allocation table.
#[derive(Debug, Clone)]
pub struct PartitionRes {
    pub config: PartitionConfig,
    /// Core-usage bitmaps, one per row. Early rows are preferred.
    pub rows: Vec<Option<Bitmap>>,
}

impl PartitionRes {
    pub fn new(config: PartitionConfig, num_rows: usize) -> PartitionRes {
        PartitionRes {
            config,
            rows: vec![None; num_rows],
        }
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    /// Sort rows densest-first so row-fitting tries the busiest rows before
    /// sparse ones; unused rows sort last.
    pub fn sort_rows_by_density(&mut self) {
        self.rows
            .sort_by_key(|row| Reverse(row.as_ref().map_or(0, |map| map.weight())));
    }

    /// True if any row of this partition uses a core in `range`.
    pub fn busy_in(&self, range: Range<usize>) -> bool {
        self.rows.iter().any(|row| {
            row.as_ref()
                .is_some_and(|map| map.weight_range(range.clone()) > 0)
        })
    }
}
