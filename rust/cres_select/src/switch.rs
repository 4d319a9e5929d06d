// SPDX-License-Identifier: GPL-2.0

//! Network switch tree.
//!
//! An ordered array of switch records describing the cluster fabric. Leaves
//! have level 0 and directly enumerate compute nodes; internal switches
//! aggregate the nodes of their children. The chooser only reads the table;
//! per-call scratch state lives in the chooser itself.

use anyhow::bail;
use anyhow::Result;

use crate::bitmap::Bitmap;

#[derive(Debug, Clone)]
pub struct SwitchRecord {
    pub name: String,
    /// 0 = leaf switch.
    pub level: u16,
    pub link_speed: u32,
    /// Nodes covered transitively by this switch.
    pub nodes: Bitmap,
}

#[derive(Debug, Clone)]
pub struct SwitchTable {
    switches: Vec<SwitchRecord>,
}

impl SwitchTable {
    pub fn new(switches: Vec<SwitchRecord>, node_cnt: usize) -> Result<SwitchTable> {
        if switches.is_empty() {
            bail!("Switch table has no switches");
        }
        if !switches.iter().any(|s| s.level == 0) {
            bail!("Switch table has no leaf switches");
        }
        for s in switches.iter() {
            if s.nodes.len() != node_cnt {
                bail!(
                    "Switch {} node bitmap size {} != cluster size {}",
                    s.name,
                    s.nodes.len(),
                    node_cnt
                );
            }
        }
        Ok(SwitchTable { switches })
    }

    pub fn len(&self) -> usize {
        self.switches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.switches.is_empty()
    }

    pub fn get(&self, i: usize) -> &SwitchRecord {
        &self.switches[i]
    }

    pub fn iter(&self) -> impl Iterator<Item = &SwitchRecord> {
        self.switches.iter()
    }
}
