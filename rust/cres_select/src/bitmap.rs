// SPDX-License-Identifier: GPL-2.0

//! Fixed-size bit arrays over node and core index spaces.
//!
//! A `Bitmap` is a BitVec of u64's sized at construction, along with the
//! helper functions the selection core is phrased in: single-bit and range
//! updates, popcount, first/last set bit, subset and overlap tests, and
//! in-place AND/OR/AND-NOT over equal-sized maps.
//!
//! Empty bitmaps are created directly, or from a hexadecimal string:
//!
//!```
//!     use cres_select::Bitmap;
//!     let none = Bitmap::new(16);
//!     let some = Bitmap::from_str("0xf0", 16).unwrap();
//!```
//!
//! The hexadecimal string also supports the special values "none" and "all".
//! `from_list` parses comma-separated index lists such as `"0-3,7"`.

use anyhow::bail;
use anyhow::Context;
use anyhow::Result;
use bitvec::prelude::*;
use sscanf::sscanf;
use std::fmt;
use std::ops::BitAndAssign;
use std::ops::BitOrAssign;
use std::ops::Range;

#[derive(Debug, Eq, Clone, Hash, Ord, PartialEq, PartialOrd)]
pub struct Bitmap {
    mask: BitVec<u64, Lsb0>,
}

impl Bitmap {
    fn check_bit(&self, bit: usize) -> Result<()> {
        if bit >= self.mask.len() {
            bail!("Invalid bit {} passed, max {}", bit, self.mask.len());
        }

        Ok(())
    }

    fn check_range(&self, range: &Range<usize>) -> Result<()> {
        if range.start > range.end || range.end > self.mask.len() {
            bail!(
                "Invalid bit range {}..{} passed, max {}",
                range.start,
                range.end,
                self.mask.len()
            );
        }

        Ok(())
    }

    /// Build a new empty Bitmap holding `nbits` bits.
    pub fn new(nbits: usize) -> Bitmap {
        Bitmap {
            mask: bitvec![u64, Lsb0; 0; nbits],
        }
    }

    /// Build a Bitmap from a hexadecimal string, or "none" / "all".
    pub fn from_str(s: &str, nbits: usize) -> Result<Bitmap> {
        match s {
            "none" => return Ok(Bitmap::new(nbits)),
            "all" => {
                return Ok(Bitmap {
                    mask: bitvec![u64, Lsb0; 1; nbits],
                })
            }
            _ => {}
        }
        let hex_str = {
            let mut tmp_str = s.strip_prefix("0x").unwrap_or(s).replace('_', "");
            if tmp_str.len() % 2 != 0 {
                tmp_str = "0".to_string() + &tmp_str;
            }
            tmp_str
        };
        let byte_vec =
            hex::decode(&hex_str).with_context(|| format!("Failed to parse bitmap: {s}"))?;

        let mut mask = bitvec![u64, Lsb0; 0; nbits];
        for (index, &val) in byte_vec.iter().rev().enumerate() {
            let mut v = val;
            while v != 0 {
                let lsb = v.trailing_zeros() as usize;
                v &= !(1 << lsb);
                let bit = index * 8 + lsb;
                if bit >= nbits {
                    bail!("Found bit ({}) in bitmap ({}) beyond size {}", bit, s, nbits);
                }
                mask.set(bit, true);
            }
        }

        Ok(Bitmap { mask })
    }

    /// Build a Bitmap from an index list such as "0-3,7".
    pub fn from_list(list: &str, nbits: usize) -> Result<Bitmap> {
        let mut map = Bitmap::new(nbits);
        for i in read_index_list(list)? {
            map.set(i)
                .with_context(|| format!("Failed to apply index list: {list}"))?;
        }
        Ok(map)
    }

    /// The total size of the bitmap.
    pub fn len(&self) -> usize {
        self.mask.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mask.count_ones() == 0
    }

    /// Set a bit in the Bitmap. Returns an error if the specified bit
    /// exceeds the size of the Bitmap.
    pub fn set(&mut self, bit: usize) -> Result<()> {
        self.check_bit(bit)?;
        self.mask.set(bit, true);
        Ok(())
    }

    /// Clear a bit from the Bitmap. Returns an error if the specified bit
    /// exceeds the size of the Bitmap.
    pub fn clear(&mut self, bit: usize) -> Result<()> {
        self.check_bit(bit)?;
        self.mask.set(bit, false);
        Ok(())
    }

    /// Test whether a bit is set. Out-of-range bits read as false.
    pub fn test(&self, bit: usize) -> bool {
        match self.mask.get(bit) {
            Some(b) => *b,
            None => false,
        }
    }

    /// Set every bit in `range`. Returns an error if the range exceeds the
    /// size of the Bitmap.
    pub fn set_range(&mut self, range: Range<usize>) -> Result<()> {
        self.check_range(&range)?;
        self.mask[range].fill(true);
        Ok(())
    }

    /// Clear every bit in `range`. Returns an error if the range exceeds
    /// the size of the Bitmap.
    pub fn clear_range(&mut self, range: Range<usize>) -> Result<()> {
        self.check_range(&range)?;
        self.mask[range].fill(false);
        Ok(())
    }

    pub fn set_all(&mut self) {
        self.mask.fill(true);
    }

    pub fn clear_all(&mut self) {
        self.mask.fill(false);
    }

    /// Count the number of bits set.
    pub fn weight(&self) -> usize {
        self.mask.count_ones()
    }

    /// Count the number of bits set within `range`.
    pub fn weight_range(&self, range: Range<usize>) -> usize {
        self.mask[range].count_ones()
    }

    /// Index of the first set bit, if any.
    pub fn first_set(&self) -> Option<usize> {
        self.mask.first_one()
    }

    /// Index of the last set bit, if any.
    pub fn last_set(&self) -> Option<usize> {
        self.mask.last_one()
    }

    /// True if every bit set in `other` is also set in `self`.
    pub fn is_superset_of(&self, other: &Bitmap) -> bool {
        other.iter().all(|i| self.test(i))
    }

    /// True if `self` and `other` have any set bit in common.
    pub fn overlaps(&self, other: &Bitmap) -> bool {
        self.iter().any(|i| other.test(i))
    }

    /// Overwrite this bitmap with the contents of `other` (equal sizes).
    pub fn copy_from(&mut self, other: &Bitmap) {
        self.mask.copy_from_bitslice(other.mask.as_bitslice());
    }

    /// Create a Bitmap that is the negation of the current one.
    pub fn not(&self) -> Bitmap {
        let mut new = self.clone();
        new.mask = !new.mask;
        new
    }

    /// Clear every bit of `self` that is set in `other`.
    pub fn and_not_assign(&mut self, other: &Bitmap) {
        self.mask &= !other.mask.clone();
    }

    /// Iterate over the indices of set bits, in increasing order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.mask.iter_ones()
    }

    fn fmt_with(&self, f: &mut fmt::Formatter<'_>, case: char) -> fmt::Result {
        let nbits = self.mask.len();
        let mut masks: Vec<u32> = self
            .mask
            .as_raw_slice()
            .iter()
            .flat_map(|x| [*x as u32, (x >> 32) as u32])
            .collect();

        // Throw out possible stray from u64 -> u32.
        masks.truncate(nbits.div_ceil(32).max(1));

        // Print the highest 32bit. Trim digits beyond nbits.
        let width = match nbits.div_ceil(4) % 8 {
            0 => 8,
            v => v,
        };
        match case {
            'x' => write!(f, "{:0width$x}", masks.pop().unwrap(), width = width)?,
            'X' => write!(f, "{:0width$X}", masks.pop().unwrap(), width = width)?,
            _ => unreachable!(),
        }

        // The rest in descending order.
        for submask in masks.iter().rev() {
            match case {
                'x' => write!(f, ",{submask:08x}")?,
                'X' => write!(f, ",{submask:08X}")?,
                _ => unreachable!(),
            }
        }
        Ok(())
    }
}

/// Parse an index list such as "0-3,7" into the indices it covers.
pub fn read_index_list(list: &str) -> Result<Vec<usize>> {
    let list = list.trim_end_matches('\0');
    let groups: Vec<&str> = list.split(',').collect();
    let mut indices = vec![];
    for group in groups.iter() {
        let (min, max) = match sscanf!(group.trim(), "{usize}-{usize}") {
            Ok((x, y)) => (x, y),
            Err(_) => match sscanf!(group.trim(), "{usize}") {
                Ok(x) => (x, x),
                Err(_) => {
                    bail!("Failed to parse index list {}", group.trim());
                }
            },
        };
        for i in min..(max + 1) {
            indices.push(i);
        }
    }

    Ok(indices)
}

impl fmt::Display for Bitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_with(f, 'x')
    }
}

impl fmt::LowerHex for Bitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_with(f, 'x')
    }
}

impl fmt::UpperHex for Bitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_with(f, 'X')
    }
}

impl BitAndAssign<&Self> for Bitmap {
    fn bitand_assign(&mut self, rhs: &Self) {
        self.mask &= &rhs.mask;
    }
}

impl BitOrAssign<&Self> for Bitmap {
    fn bitor_assign(&mut self, rhs: &Self) {
        self.mask |= &rhs.mask;
    }
}
