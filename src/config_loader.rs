use crate::config::{supports_multiple_addresses, IpamSection, NetConf};
use crate::config::IpamConfig;
use crate::error::{IpamError, Result};
use crate::ip::{AddressFamily, Range, RangeDescriptor, RangeSet};
use crate::utils::ip_utils::parse_ip_arg;
use log::{debug, info};
use std::net::IpAddr;
use std::path::Path;

/// Key of `CNI_ARGS` carrying statically requested addresses
const IP_ARG_KEY: &str = "IP";

/// Resolve the IPAM configuration from a network configuration document
///
/// `env_args` is the raw `CNI_ARGS` value. Range sets are merged in priority
/// order: runtime `ipRanges`, the legacy top-level range, the `ranges` list,
/// then the range loaded from `rangeFromFile`. Static addresses come from
/// `CNI_ARGS`, then `runtimeConfig.ips`, then `args.cni.ips`.
///
/// Returns the resolved configuration and the document's `cniVersion`.
pub fn load_ipam_config(bytes: &[u8], env_args: &str) -> Result<(IpamConfig, String)> {
    let conf: NetConf = serde_json::from_slice(bytes)?;
    let ipam = conf.ipam.as_ref().ok_or(IpamError::MissingIpam)?;

    let mut ip_args = parse_cni_args(env_args)?;
    for value in &conf.runtime_config.ips {
        ip_args.push(parse_ip_arg(value)?);
    }
    if let Some(cni) = conf.args.as_ref().and_then(|args| args.cni.as_ref()) {
        for value in &cni.ips {
            ip_args.push(parse_ip_arg(value)?);
        }
    }

    let descriptors = collect_range_sets(&conf, ipam)?;
    if descriptors.is_empty() {
        return Err(IpamError::NoRanges);
    }

    let ranges = descriptors
        .iter()
        .enumerate()
        .map(|(index, set)| build_range_set(index, set))
        .collect::<Result<Vec<_>>>()?;

    check_set_overlaps(&ranges)?;
    check_version_capacity(&conf.cni_version, &ranges)?;

    info!(
        "Loaded IPAM config for network {:?}: {} range set(s), {} requested address(es)",
        conf.name,
        ranges.len(),
        ip_args.len()
    );

    let config = IpamConfig {
        name: conf.name.clone(),
        plugin_type: ipam.plugin_type.clone(),
        ranges,
        ip_args,
        data_dir: ipam.data_dir.clone(),
        resolv_conf: ipam.resolv_conf.clone(),
    };
    Ok((config, conf.cni_version))
}

/// Parse the `IP` key of a `CNI_ARGS` string (`K=V;K=V`)
///
/// The value is a comma separated list of `ip` or `ip/prefix`; only the
/// address is kept. Empty items are skipped and other keys are ignored.
pub fn parse_cni_args(env_args: &str) -> Result<Vec<IpAddr>> {
    let mut ips = Vec::new();

    for pair in env_args.split(';').map(str::trim).filter(|p| !p.is_empty()) {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| IpamError::InvalidArgs(format!("invalid pair {:?}", pair)))?;

        if key.trim() != IP_ARG_KEY {
            debug!("Ignoring CNI_ARGS key {:?}", key);
            continue;
        }
        for item in value.split(',').map(str::trim).filter(|i| !i.is_empty()) {
            ips.push(parse_ip_arg(item)?);
        }
    }

    Ok(ips)
}

/// Gather range set descriptors from all sources in priority order
fn collect_range_sets(conf: &NetConf, ipam: &IpamSection) -> Result<Vec<Vec<RangeDescriptor>>> {
    let mut sets = Vec::new();

    sets.extend(conf.runtime_config.ip_ranges.iter().cloned());
    if let Some(legacy) = ipam.legacy_range() {
        sets.push(vec![legacy]);
    }
    sets.extend(ipam.ranges.iter().cloned());
    if let Some(path) = &ipam.range_from_file {
        sets.push(vec![load_range_file(path)?]);
    }

    Ok(sets)
}

/// Load a single range descriptor from a JSON file
fn load_range_file(path: &Path) -> Result<RangeDescriptor> {
    debug!("Loading range from {:?}", path);
    let content = std::fs::read(path).map_err(|e| IpamError::RangeFile {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    serde_json::from_slice(&content).map_err(|e| IpamError::RangeFile {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

fn build_range_set(index: usize, descriptors: &[RangeDescriptor]) -> Result<RangeSet> {
    let ranges = descriptors
        .iter()
        .map(|d| {
            d.canonicalize().map_err(|e| IpamError::InvalidRangeSet {
                index,
                reason: match e {
                    IpamError::InvalidRange(reason) => reason,
                    other => other.to_string(),
                },
            })
        })
        .collect::<Result<Vec<Range>>>()?;

    RangeSet::new(index, ranges)
}

/// Reject any two range sets sharing an address, lowest pair first
fn check_set_overlaps(sets: &[RangeSet]) -> Result<()> {
    for (i, a) in sets.iter().enumerate() {
        for (j, b) in sets.iter().enumerate().skip(i + 1) {
            if a.overlaps(b) {
                return Err(IpamError::RangeSetOverlap { first: i, second: j });
            }
        }
    }
    Ok(())
}

/// Old CNI versions report a single address per family
fn check_version_capacity(cni_version: &str, sets: &[RangeSet]) -> Result<()> {
    let v4 = sets.iter().filter(|s| s.family() == AddressFamily::V4).count();
    let v6 = sets.len() - v4;

    if (v4 > 1 || v6 > 1) && !supports_multiple_addresses(cni_version) {
        return Err(IpamError::UnsupportedAddressCount {
            version: cni_version.to_string(),
        });
    }
    Ok(())
}
