//! Ordered pools of ranges.

use super::range::{AddressFamily, Range};
use crate::error::{IpamError, Result};
use std::fmt;
use std::net::IpAddr;

/// Ordered, non-overlapping collection of ranges of one address family
///
/// A range set is allocated from round-robin, in declaration order. It can
/// only be built through [`RangeSet::new`], which rejects empty sets, mixed
/// families and overlapping members.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeSet {
    ranges: Vec<Range>,
}

impl RangeSet {
    /// Build a range set; `index` is its position in the resolved configuration
    /// and only appears in error messages.
    pub fn new(index: usize, ranges: Vec<Range>) -> Result<Self> {
        let first = ranges.first().ok_or_else(|| IpamError::InvalidRangeSet {
            index,
            reason: "empty range set".to_string(),
        })?;

        let family = first.family();
        if ranges.iter().any(|r| r.family() != family) {
            return Err(IpamError::MixedFamilies { index });
        }

        for (i, a) in ranges.iter().enumerate() {
            for b in &ranges[i + 1..] {
                if a.overlaps(b) {
                    return Err(IpamError::RangeOverlap {
                        index,
                        first: a.to_string(),
                        second: b.to_string(),
                    });
                }
            }
        }

        Ok(RangeSet { ranges })
    }

    pub fn family(&self) -> AddressFamily {
        self.ranges[0].family()
    }

    pub fn ranges(&self) -> &[Range] {
        &self.ranges
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Check whether any member range contains `ip`
    pub fn contains(&self, ip: IpAddr) -> bool {
        self.ranges.iter().any(|r| r.contains(ip))
    }

    /// Find the member range containing `ip`
    pub fn range_for(&self, ip: IpAddr) -> Result<&Range> {
        self.ranges
            .iter()
            .find(|r| r.contains(ip))
            .ok_or_else(|| IpamError::NotInRangeSet {
                ip,
                range_set: self.to_string(),
            })
    }

    /// Check whether any range in `self` overlaps any range in `other`
    pub fn overlaps(&self, other: &RangeSet) -> bool {
        self.ranges
            .iter()
            .any(|a| other.ranges.iter().any(|b| a.overlaps(b)))
    }

    /// Total number of addresses the set can hand out
    pub fn pool_size(&self) -> u128 {
        self.ranges
            .iter()
            .fold(0u128, |total, r| total.saturating_add(r.allocatable_count()))
    }
}

impl fmt::Display for RangeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, r) in self.ranges.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}", r)?;
        }
        Ok(())
    }
}
