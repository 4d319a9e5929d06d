// SPDX-License-Identifier: GPL-2.0

//! Generic-resource (GRES) filter seam.
//!
//! GRES accounting lives outside the selection core. The core consumes it
//! through this trait: `core_filter` may clear core bits a job's GRES
//! request cannot use, and `job_test` bounds how many cores of a node the
//! request can occupy. Implementations own whatever per-node GRES state
//! they need, keyed by node index.

use std::ops::Range;

use crate::bitmap::Bitmap;

pub trait GresFilter {
    /// Restrict `core_map` within `core_range` to cores usable by the
    /// job's GRES request on node `node_i`.
    fn core_filter(
        &self,
        node_i: usize,
        node_name: &str,
        test_only: bool,
        core_map: &mut Bitmap,
        core_range: Range<usize>,
    );

    /// Upper bound, in cores, on what the job's GRES request can occupy on
    /// node `node_i`. `None` = unlimited, `Some(0)` = unusable. When
    /// `core_map` is given, only its set cores within `core_range` count.
    fn job_test(
        &self,
        node_i: usize,
        node_name: &str,
        test_only: bool,
        core_map: Option<&Bitmap>,
        core_range: Range<usize>,
        job_id: u32,
    ) -> Option<u32>;
}

/// Filter for jobs with no GRES request: nothing is restricted.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoGres;

impl GresFilter for NoGres {
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
        None
    }
}
