//! Address ranges.
//!
//! A [`Range`] is one contiguous interval of allocatable addresses inside a
//! single subnet. Ranges are produced from their JSON form
//! ([`RangeDescriptor`]) by [`RangeDescriptor::canonicalize`], which fills in
//! defaults and checks that the interval lies inside the subnet. A canonical
//! range is never mutated afterwards.

use crate::error::{IpamError, Result};
use crate::utils::ip_utils::{first_usable, ip_to_u128, last_usable};
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

/// Address family of a range or address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressFamily {
    V4,
    V6,
}

impl AddressFamily {
    pub fn of(ip: IpAddr) -> Self {
        match ip {
            IpAddr::V4(_) => AddressFamily::V4,
            IpAddr::V6(_) => AddressFamily::V6,
        }
    }
}

/// Range as written in the network configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RangeDescriptor {
    pub subnet: IpNet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range_start: Option<IpAddr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range_end: Option<IpAddr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<IpAddr>,
}

impl RangeDescriptor {
    pub fn new(subnet: IpNet) -> Self {
        RangeDescriptor {
            subnet,
            range_start: None,
            range_end: None,
            gateway: None,
        }
    }

    /// Validate the descriptor and fill in defaults
    ///
    /// Omitted bounds default to the first and last usable host of the
    /// subnet; an omitted gateway defaults to the first usable host.
    pub fn canonicalize(&self) -> Result<Range> {
        let subnet = self.subnet;

        if subnet.addr() != subnet.network() {
            return Err(IpamError::InvalidRange(format!(
                "network {} has host bits set, for a subnet mask of length {} the network address is {}",
                subnet,
                subnet.prefix_len(),
                subnet.network()
            )));
        }
        if subnet.prefix_len() > subnet.max_prefix_len() - 2 {
            return Err(IpamError::InvalidRange(format!(
                "network {} too small to allocate from",
                subnet
            )));
        }

        let range_start = match self.range_start {
            Some(start) if !subnet.contains(&start) => {
                return Err(IpamError::InvalidRange(format!(
                    "rangeStart {} not in network {}",
                    start, subnet
                )));
            }
            Some(start) => start,
            None => first_usable(&subnet),
        };

        let range_end = match self.range_end {
            Some(end) if !subnet.contains(&end) => {
                return Err(IpamError::InvalidRange(format!(
                    "rangeEnd {} not in network {}",
                    end, subnet
                )));
            }
            Some(end) => end,
            None => last_usable(&subnet),
        };

        if range_start > range_end {
            return Err(IpamError::InvalidRange(format!(
                "rangeStart {} is after rangeEnd {}",
                range_start, range_end
            )));
        }

        let gateway = match self.gateway {
            Some(gw) if AddressFamily::of(gw) != AddressFamily::of(subnet.addr()) => {
                return Err(IpamError::InvalidRange(format!(
                    "gateway {} does not match the address family of {}",
                    gw, subnet
                )));
            }
            Some(gw) => gw,
            None => first_usable(&subnet),
        };

        Ok(Range {
            subnet,
            range_start,
            range_end,
            gateway,
        })
    }
}

/// Canonical, validated address range
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Range {
    pub subnet: IpNet,
    pub range_start: IpAddr,
    pub range_end: IpAddr,
    pub gateway: IpAddr,
}

impl Range {
    pub fn family(&self) -> AddressFamily {
        AddressFamily::of(self.range_start)
    }

    /// Check whether `ip` lies inside this range (bounds inclusive)
    pub fn contains(&self, ip: IpAddr) -> bool {
        AddressFamily::of(ip) == self.family()
            && self.subnet.contains(&ip)
            && ip >= self.range_start
            && ip <= self.range_end
    }

    /// Check whether two ranges share at least one address
    ///
    /// Ranges of different families never overlap.
    pub fn overlaps(&self, other: &Range) -> bool {
        if self.family() != other.family() {
            return false;
        }
        let max_start = self.range_start.max(other.range_start);
        let min_end = self.range_end.min(other.range_end);
        max_start <= min_end
    }

    /// Whether `ip` may be handed out: not the gateway, not the network
    /// address and, for IPv4, not the broadcast address
    pub fn is_allocatable(&self, ip: IpAddr) -> bool {
        if ip == self.gateway || ip == self.subnet.network() {
            return false;
        }
        match self.subnet {
            IpNet::V4(net) => ip != IpAddr::V4(net.broadcast()),
            IpNet::V6(_) => true,
        }
    }

    /// Number of allocatable addresses between the range bounds
    pub fn allocatable_count(&self) -> u128 {
        let span = (ip_to_u128(self.range_end) - ip_to_u128(self.range_start)).saturating_add(1);

        let mut excluded = vec![self.gateway, self.subnet.network()];
        if let IpNet::V4(net) = self.subnet {
            excluded.push(IpAddr::V4(net.broadcast()));
        }
        excluded.sort();
        excluded.dedup();

        let skipped = excluded
            .into_iter()
            .filter(|ip| self.contains(*ip))
            .count() as u128;
        span - skipped
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.range_start, self.range_end)
    }
}
