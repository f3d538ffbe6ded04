//! Error types for IP address management.

use std::io;
use std::net::IpAddr;
use std::path::PathBuf;

/// Result type for IPAM operations
pub type Result<T> = std::result::Result<T, IpamError>;

/// Errors raised while resolving configuration or allocating addresses
#[derive(Debug, thiserror::Error)]
pub enum IpamError {
    // Configuration errors
    #[error("failed to parse network configuration: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IPAM config missing 'ipam' key")]
    MissingIpam,

    #[error("no IP ranges specified")]
    NoRanges,

    #[error("invalid IP address: {0}")]
    InvalidAddress(String),

    #[error("invalid CNI_ARGS: {0}")]
    InvalidArgs(String),

    #[error("invalid network name {0:?}")]
    InvalidNetworkName(String),

    #[error("failed to load range file {}: {reason}", .path.display())]
    RangeFile { path: PathBuf, reason: String },

    #[error("invalid range: {0}")]
    InvalidRange(String),

    // Overlap and family errors
    #[error("invalid range set {index}: {reason}")]
    InvalidRangeSet { index: usize, reason: String },

    #[error("invalid range set {index}: mixed address families")]
    MixedFamilies { index: usize },

    #[error("invalid range set {index}: subnets {first} and {second} overlap")]
    RangeOverlap {
        index: usize,
        first: String,
        second: String,
    },

    #[error("range set {first} overlaps with {second}")]
    RangeSetOverlap { first: usize, second: usize },

    // Capability errors
    #[error("CNI version {version} does not support more than 1 address per family")]
    UnsupportedAddressCount { version: String },

    // Reservation errors
    #[error("{ip} not in range set {range_set}")]
    NotInRangeSet { ip: IpAddr, range_set: String },

    #[error("requested ip {0} is subnet's gateway")]
    RequestedGateway(IpAddr),

    #[error("requested IP address {ip} is not available in range set {range_set}")]
    RequestedUnavailable { ip: IpAddr, range_set: String },

    #[error("{ip} has been allocated to {container_id}, duplicate allocation is not allowed")]
    DuplicateAllocation { ip: IpAddr, container_id: String },

    #[error("failed to allocate all requested IPs:{0}")]
    UnfulfilledRequests(String),

    #[error("no IP addresses available in range set: {0}")]
    Exhausted(String),

    #[error("failed to allocate for range {index}: {source}")]
    RangeAllocation {
        index: usize,
        #[source]
        source: Box<IpamError>,
    },

    #[error("{source} (rollback incomplete: {failures})")]
    RollbackFailed {
        #[source]
        source: Box<IpamError>,
        failures: String,
    },

    #[error("failed to find address added by container {0}")]
    NotFound(String),

    // Store errors
    #[error("failed to lock {}: {source}", .path.display())]
    Lock {
        path: PathBuf,
        #[source]
        source: nix::errno::Errno,
    },

    #[error("store I/O error on {}: {source}", .path.display())]
    Store {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl IpamError {
    /// Wrap an I/O error with the store path it occurred on
    pub(crate) fn store(path: impl Into<PathBuf>, source: io::Error) -> Self {
        IpamError::Store {
            path: path.into(),
            source,
        }
    }
}
