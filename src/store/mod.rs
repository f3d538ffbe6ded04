//! Durable allocation state.
//!
//! A store maps each reserved address to the [`Identity`] holding it and keeps
//! one "last reserved" cursor per range set index. Every read-modify-write
//! sequence must run while the caller holds the [`StoreLock`] returned by
//! [`Store::lock`]; the lock is released when the guard is dropped.
//! Stores are created lazily by the first lock or write.

pub mod disk;
pub mod lock;

pub use disk::{DiskStore, DEFAULT_DATA_DIR};
pub use lock::StoreLock;

use crate::error::Result;
use std::fmt;
use std::net::IpAddr;

/// Separator between the container id and interface name in a record
const LINE_BREAK: &str = "\r\n";

/// Owner of a reservation: a container's interface
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity {
    pub container_id: String,
    pub ifname: String,
}

impl Identity {
    pub fn new(container_id: impl Into<String>, ifname: impl Into<String>) -> Self {
        Identity {
            container_id: container_id.into(),
            ifname: ifname.into(),
        }
    }

    /// Serialized form stored against each reserved address
    pub fn record(&self) -> String {
        format!("{}{}{}", self.container_id.trim(), LINE_BREAK, self.ifname)
    }

    /// Check whether a stored record belongs to this identity
    pub fn matches(&self, record: &str) -> bool {
        record.trim() == self.record().trim()
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.container_id, self.ifname)
    }
}

/// Persistent reservation table for one network
pub trait Store {
    /// Whether anything has ever been written to the store
    fn exists(&self) -> Result<bool>;

    /// Block until the store's exclusive lock is held
    fn lock(&self) -> Result<StoreLock>;

    /// Record `ip` as held by `identity`; returns `false` if it was already reserved
    fn reserve(&mut self, ip: IpAddr, identity: &Identity) -> Result<bool>;

    /// Remove the reservation of a single address; returns `false` if there was none
    fn release_address(&mut self, ip: IpAddr) -> Result<bool>;

    /// Remove every reservation held by `identity`, returning the freed addresses
    fn release_by_id(&mut self, identity: &Identity) -> Result<Vec<IpAddr>>;

    /// Whether `ip` is currently reserved
    fn has_reservation(&self, ip: IpAddr) -> Result<bool>;

    /// Addresses currently held by `identity`
    fn get_by_id(&self, identity: &Identity) -> Result<Vec<IpAddr>>;

    /// The cursor of range set `range_id`, if one has been recorded
    fn last_reserved_ip(&self, range_id: usize) -> Result<Option<IpAddr>>;

    fn set_last_reserved_ip(&mut self, range_id: usize, ip: IpAddr) -> Result<()>;

    fn clear_last_reserved_ip(&mut self, range_id: usize) -> Result<()>;
}
