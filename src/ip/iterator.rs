//! Round-robin candidate iteration over a range set.

use super::range::Range;
use super::range_set::RangeSet;
use crate::utils::ip_utils::next_ip;
use std::net::IpAddr;

/// Infinite iterator over the allocatable addresses of a range set
///
/// Iteration starts strictly after the cursor when the cursor lies inside the
/// set, otherwise at the first range's start. At the end of a range it moves
/// on to the next range, wrapping from the last range back to the first.
/// Gateways, network addresses and IPv4 broadcast addresses are skipped.
/// Callers bound the iteration with [`RangeSet::pool_size`].
#[derive(Debug, Clone)]
pub struct RangeIter<'a> {
    range_set: &'a RangeSet,
    range_idx: usize,
    cur: Option<IpAddr>,
    empty: bool,
}

impl<'a> RangeIter<'a> {
    pub fn new(range_set: &'a RangeSet, after: Option<IpAddr>) -> Self {
        let resume = after.and_then(|ip| {
            range_set
                .ranges()
                .iter()
                .position(|r| r.contains(ip))
                .map(|idx| (idx, ip))
        });

        let (range_idx, cur) = match resume {
            Some((idx, ip)) => (idx, Some(ip)),
            None => (0, None),
        };

        RangeIter {
            range_set,
            range_idx,
            cur,
            empty: range_set.pool_size() == 0,
        }
    }

    fn advance(&mut self) -> IpAddr {
        let ranges = self.range_set.ranges();
        let current = &ranges[self.range_idx];

        let candidate = match self.cur {
            None => current.range_start,
            Some(ip) if ip == current.range_end => {
                self.range_idx = (self.range_idx + 1) % ranges.len();
                ranges[self.range_idx].range_start
            }
            Some(ip) => next_ip(ip).unwrap_or(current.range_start),
        };

        self.cur = Some(candidate);
        candidate
    }
}

impl<'a> Iterator for RangeIter<'a> {
    type Item = (&'a Range, IpAddr);

    fn next(&mut self) -> Option<Self::Item> {
        if self.empty {
            return None;
        }
        loop {
            let candidate = self.advance();
            let range = &self.range_set.ranges()[self.range_idx];
            if range.is_allocatable(candidate) {
                return Some((range, candidate));
            }
        }
    }
}
