use crate::ip::{RangeDescriptor, RangeSet};
use ipnet::IpNet;
use semver::Version;
use serde::Deserialize;
use std::net::IpAddr;
use std::path::PathBuf;

/// First CNI spec version that allows several addresses per family
const MULTIPLE_ADDRESSES_SINCE: Version = Version::new(0, 3, 0);

/// Network configuration document as handed to the plugin
///
/// Only the keys consumed by IP address management are modelled; anything
/// else in the document is ignored.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetConf {
    #[serde(default)]
    pub cni_version: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub ipam: Option<IpamSection>,
    #[serde(default)]
    pub runtime_config: RuntimeConfig,
    #[serde(default)]
    pub args: Option<NetArgs>,
}

/// The `ipam` object of the network configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpamSection {
    #[serde(rename = "type", default)]
    pub plugin_type: String,

    // Legacy single-range fields
    #[serde(default)]
    pub subnet: Option<IpNet>,
    #[serde(default)]
    pub range_start: Option<IpAddr>,
    #[serde(default)]
    pub range_end: Option<IpAddr>,
    #[serde(default)]
    pub gateway: Option<IpAddr>,

    #[serde(default)]
    pub ranges: Vec<Vec<RangeDescriptor>>,
    #[serde(default)]
    pub range_from_file: Option<PathBuf>,
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    #[serde(default)]
    pub resolv_conf: Option<PathBuf>,
}

impl IpamSection {
    /// The legacy top-level range, present only when `subnet` is set
    pub fn legacy_range(&self) -> Option<RangeDescriptor> {
        self.subnet.map(|subnet| RangeDescriptor {
            subnet,
            range_start: self.range_start,
            range_end: self.range_end,
            gateway: self.gateway,
        })
    }
}

/// Capability arguments supplied by the runtime
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeConfig {
    #[serde(default)]
    pub ip_ranges: Vec<Vec<RangeDescriptor>>,
    #[serde(default)]
    pub ips: Vec<String>,
}

/// Legacy `args` object
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NetArgs {
    #[serde(default)]
    pub cni: Option<CniArgs>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CniArgs {
    #[serde(default)]
    pub ips: Vec<String>,
}

/// Resolved IP address management configuration
///
/// Built from scratch on every invocation; never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpamConfig {
    pub name: String,
    pub plugin_type: String,
    pub ranges: Vec<RangeSet>,
    pub ip_args: Vec<IpAddr>,
    pub data_dir: Option<PathBuf>,
    pub resolv_conf: Option<PathBuf>,
}

/// Whether a CNI spec version can report more than one address per family
///
/// Versions that do not parse are treated as the oldest spec.
pub fn supports_multiple_addresses(cni_version: &str) -> bool {
    Version::parse(cni_version.trim())
        .map(|v| v >= MULTIPLE_ADDRESSES_SINCE)
        .unwrap_or(false)
}
