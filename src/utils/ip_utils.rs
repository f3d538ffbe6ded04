//! IP utility functions for address arithmetic

use crate::error::{IpamError, Result};
use ipnet::IpNet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Convert an address to its integer value (IPv4 occupies the low 32 bits)
pub fn ip_to_u128(ip: IpAddr) -> u128 {
    match ip {
        IpAddr::V4(v4) => u32::from(v4) as u128,
        IpAddr::V6(v6) => u128::from(v6),
    }
}

/// Build an address of the same family as `like` from an integer value
///
/// Returns `None` if the value does not fit the family's width.
pub fn ip_from_u128(value: u128, like: IpAddr) -> Option<IpAddr> {
    match like {
        IpAddr::V4(_) => u32::try_from(value).ok().map(|v| IpAddr::V4(Ipv4Addr::from(v))),
        IpAddr::V6(_) => Some(IpAddr::V6(Ipv6Addr::from(value))),
    }
}

/// The address immediately after `ip`, or `None` at the end of the family's space
pub fn next_ip(ip: IpAddr) -> Option<IpAddr> {
    ip_to_u128(ip)
        .checked_add(1)
        .and_then(|value| ip_from_u128(value, ip))
}

/// First usable host address of a subnet (the address after the network address)
pub fn first_usable(subnet: &IpNet) -> IpAddr {
    next_ip(subnet.network()).unwrap_or_else(|| subnet.network())
}

/// Last usable host address of a subnet
///
/// For IPv4 the broadcast address is excluded; IPv6 has no broadcast, so the
/// last address of the subnet is usable.
pub fn last_usable(subnet: &IpNet) -> IpAddr {
    match subnet {
        IpNet::V4(net) => {
            let broadcast = u32::from(net.broadcast());
            IpAddr::V4(Ipv4Addr::from(broadcast.saturating_sub(1)))
        }
        IpNet::V6(net) => IpAddr::V6(net.broadcast()),
    }
}

/// Parse a statically requested address given as `ip` or `ip/prefix`
///
/// The prefix only has to be well formed; it is not retained.
pub fn parse_ip_arg(value: &str) -> Result<IpAddr> {
    let value = value.trim();
    let parsed = if value.contains('/') {
        value.parse::<IpNet>().map(|net| net.addr()).ok()
    } else {
        value.parse::<IpAddr>().ok()
    };
    parsed.ok_or_else(|| IpamError::InvalidAddress(value.to_string()))
}
