//! Allocation results.
//!
//! These types are what the surrounding plugin reports back to the runtime.
//! The JSON layout follows the CNI IPAM result: a `cniVersion` and a list of
//! `ips`, each with an `address` in CIDR notation and a `gateway`.

use crate::error::{IpamError, Result};
use crate::ip::Range;
use ipnet::IpNet;
use serde::Serialize;
use std::net::IpAddr;

/// Address handed out from one range set
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AllocatedIp {
    /// The address with the prefix length of its range's subnet
    pub address: IpNet,
    pub gateway: IpAddr,
}

impl AllocatedIp {
    pub fn new(range: &Range, ip: IpAddr) -> Result<Self> {
        let address = IpNet::new(ip, range.subnet.prefix_len())
            .map_err(|e| IpamError::InvalidRange(format!("{} in {}: {}", ip, range.subnet, e)))?;
        Ok(AllocatedIp {
            address,
            gateway: range.gateway,
        })
    }
}

/// Result document written by the `add` command
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IpamResult {
    pub cni_version: String,
    pub ips: Vec<AllocatedIp>,
}

impl IpamResult {
    pub fn new(cni_version: impl Into<String>, ips: Vec<AllocatedIp>) -> Self {
        IpamResult {
            cni_version: cni_version.into(),
            ips,
        }
    }
}
