//! IP address allocation logic.
//!
//! [`RangeAllocator`] hands out addresses from a single range set, resuming
//! round-robin after the set's stored cursor. The free functions [`allocate`],
//! [`release`] and [`check`] are the per-invocation entry points: each takes
//! the store lock once and holds it for the whole operation.
//!
//! Allocation is all-or-nothing. When any range set fails, every address
//! reserved earlier in the same call is released and the cursors are put
//! back, so the store is left as it was found.

use super::iterator::RangeIter;
use super::range_set::RangeSet;
use crate::config::IpamConfig;
use crate::error::{IpamError, Result};
use crate::result::AllocatedIp;
use crate::store::{Identity, Store};
use log::{debug, error, info};
use std::net::IpAddr;

/// Allocator for one range set of the configuration
///
/// Every method expects the caller to hold the store lock.
pub struct RangeAllocator<'a, S: Store> {
    range_set: &'a RangeSet,
    store: &'a mut S,
    range_id: usize,
}

impl<'a, S: Store> RangeAllocator<'a, S> {
    pub fn new(range_set: &'a RangeSet, store: &'a mut S, range_id: usize) -> Self {
        RangeAllocator {
            range_set,
            store,
            range_id,
        }
    }

    /// Reserve an address for `identity`
    ///
    /// A `requested` address is reserved directly if it is free; otherwise
    /// the next free address after the cursor is taken.
    pub fn get(&mut self, identity: &Identity, requested: Option<IpAddr>) -> Result<AllocatedIp> {
        if let Some(ip) = requested {
            return self.get_requested(identity, ip);
        }

        // duplicate allocation within one range set is not allowed
        for held in self.store.get_by_id(identity)? {
            if self.range_set.contains(held) {
                return Err(IpamError::DuplicateAllocation {
                    ip: held,
                    container_id: identity.container_id.clone(),
                });
            }
        }

        let range_set = self.range_set;
        let cursor = self.store.last_reserved_ip(self.range_id)?;
        let limit = usize::try_from(range_set.pool_size()).unwrap_or(usize::MAX);
        debug!(
            "Scanning range set {} ({}) after {:?}, up to {} candidates",
            self.range_id, range_set, cursor, limit
        );

        for (range, candidate) in RangeIter::new(range_set, cursor).take(limit) {
            if self.store.has_reservation(candidate)? {
                continue;
            }
            if self.reserve(candidate, identity)? {
                return AllocatedIp::new(range, candidate);
            }
        }

        Err(IpamError::Exhausted(range_set.to_string()))
    }

    fn get_requested(&mut self, identity: &Identity, ip: IpAddr) -> Result<AllocatedIp> {
        let range_set = self.range_set;
        let range = range_set.range_for(ip)?;
        if ip == range.gateway {
            return Err(IpamError::RequestedGateway(ip));
        }
        if !self.reserve(ip, identity)? {
            return Err(IpamError::RequestedUnavailable {
                ip,
                range_set: range_set.to_string(),
            });
        }
        AllocatedIp::new(range, ip)
    }

    /// Reserve `ip` and move the cursor onto it
    ///
    /// If the cursor cannot be written the reservation is removed again, so a
    /// failure never leaves a record behind.
    fn reserve(&mut self, ip: IpAddr, identity: &Identity) -> Result<bool> {
        if !self.store.reserve(ip, identity)? {
            return Ok(false);
        }
        if let Err(e) = self.store.set_last_reserved_ip(self.range_id, ip) {
            return Err(match self.store.release_address(ip) {
                Ok(_) => e,
                Err(undo) => {
                    error!("Failed to release {} after cursor write failure: {}", ip, undo);
                    IpamError::RollbackFailed {
                        source: Box::new(e),
                        failures: format!("release {}: {}", ip, undo),
                    }
                }
            });
        }
        Ok(true)
    }
}

/// Changes made during one `allocate` call, kept so they can be undone
#[derive(Debug, Default)]
struct Journal {
    reserved: Vec<IpAddr>,
    cursors: Vec<(usize, Option<IpAddr>)>,
}

impl Journal {
    /// Undo the journaled changes, returning a description of each step that failed
    fn roll_back<S: Store>(self, store: &mut S) -> Vec<String> {
        let mut failures = Vec::new();
        for ip in self.reserved {
            if let Err(e) = store.release_address(ip) {
                error!("Failed to roll back reservation of {}: {}", ip, e);
                failures.push(format!("release {}: {}", ip, e));
            }
        }
        for (range_id, cursor) in self.cursors {
            let restored = match cursor {
                Some(ip) => store.set_last_reserved_ip(range_id, ip),
                None => store.clear_last_reserved_ip(range_id),
            };
            if let Err(e) = restored {
                error!("Failed to restore cursor of range set {}: {}", range_id, e);
                failures.push(format!("cursor {}: {}", range_id, e));
            }
        }
        failures
    }
}

/// Allocate one address per range set of `config` for `identity`
///
/// Statically requested addresses (`ip_args`) are matched to the first range
/// set containing them; repeated entries of one address are satisfied
/// together. Requests that match no range set fail the call.
pub fn allocate<S: Store>(
    config: &IpamConfig,
    store: &mut S,
    identity: &Identity,
) -> Result<Vec<AllocatedIp>> {
    let lock = store.lock()?;
    let mut journal = Journal::default();

    match allocate_locked(config, store, identity, &mut journal) {
        Ok(allocated) => {
            lock.release()?;
            Ok(allocated)
        }
        Err(e) => {
            let failures = journal.roll_back(store);
            drop(lock);
            if failures.is_empty() {
                Err(e)
            } else {
                Err(IpamError::RollbackFailed {
                    source: Box::new(e),
                    failures: failures.join("; "),
                })
            }
        }
    }
}

fn allocate_locked<S: Store>(
    config: &IpamConfig,
    store: &mut S,
    identity: &Identity,
    journal: &mut Journal,
) -> Result<Vec<AllocatedIp>> {
    let mut requested = config.ip_args.clone();
    let mut allocated = Vec::with_capacity(config.ranges.len());

    for (idx, range_set) in config.ranges.iter().enumerate() {
        let wanted = requested
            .iter()
            .position(|ip| range_set.contains(*ip))
            .map(|pos| requested.remove(pos));
        if let Some(ip) = wanted {
            // the same address may arrive from several sources
            requested.retain(|other| *other != ip);
        }

        journal.cursors.push((idx, store.last_reserved_ip(idx)?));
        let ip = RangeAllocator::new(range_set, store, idx)
            .get(identity, wanted)
            .map_err(|e| IpamError::RangeAllocation {
                index: idx,
                source: Box::new(e),
            })?;

        info!("Allocated {} to {} from range set {}", ip.address, identity, idx);
        journal.reserved.push(ip.address.addr());
        allocated.push(ip);
    }

    if !requested.is_empty() {
        let missing: String = requested.iter().map(|ip| format!(" {}", ip)).collect();
        return Err(IpamError::UnfulfilledRequests(missing));
    }

    Ok(allocated)
}

/// Release every address held by `identity`
///
/// Releasing an identity that holds nothing succeeds with an empty list.
pub fn release<S: Store>(store: &mut S, identity: &Identity) -> Result<Vec<IpAddr>> {
    if !store.exists()? {
        debug!("Store not initialized, nothing to release for {}", identity);
        return Ok(Vec::new());
    }
    let lock = store.lock()?;
    let released = store.release_by_id(identity)?;
    lock.release()?;

    info!("Released {} address(es) held by {}", released.len(), identity);
    Ok(released)
}

/// Return the addresses held by `identity`, failing if there are none
pub fn check<S: Store>(store: &S, identity: &Identity) -> Result<Vec<IpAddr>> {
    if !store.exists()? {
        return Err(IpamError::NotFound(identity.container_id.clone()));
    }
    let lock = store.lock()?;
    let held = store.get_by_id(identity)?;
    lock.release()?;

    if held.is_empty() {
        return Err(IpamError::NotFound(identity.container_id.clone()));
    }
    Ok(held)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ip::range::RangeDescriptor;
    use crate::store::{DiskStore, StoreLock};
    use std::io;
    use tempfile::TempDir;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn range_set(index: usize, subnets: &[&str]) -> RangeSet {
        let ranges = subnets
            .iter()
            .map(|s| RangeDescriptor::new(s.parse().unwrap()).canonicalize().unwrap())
            .collect();
        RangeSet::new(index, ranges).unwrap()
    }

    fn config(ranges: Vec<RangeSet>, ip_args: Vec<IpAddr>) -> IpamConfig {
        IpamConfig {
            name: "mynet".to_string(),
            plugin_type: "host-local".to_string(),
            ranges,
            ip_args,
            data_dir: None,
            resolv_conf: None,
        }
    }

    fn store(dir: &TempDir) -> DiskStore {
        DiskStore::open("mynet", Some(dir.path())).unwrap()
    }

    fn id(n: usize) -> Identity {
        Identity::new(format!("container-{}", n), "eth0")
    }

    /// Disk store with injectable write failures
    struct FaultyStore {
        inner: DiskStore,
        fail_cursor_write: bool,
        fail_release: bool,
    }

    impl FaultyStore {
        fn new(dir: &TempDir) -> Self {
            FaultyStore {
                inner: store(dir),
                fail_cursor_write: false,
                fail_release: false,
            }
        }

        fn disk_full(path: &str) -> IpamError {
            IpamError::store(path, io::Error::other("disk full"))
        }
    }

    impl Store for FaultyStore {
        fn exists(&self) -> Result<bool> {
            self.inner.exists()
        }

        fn lock(&self) -> Result<StoreLock> {
            self.inner.lock()
        }

        fn reserve(&mut self, ip: IpAddr, identity: &Identity) -> Result<bool> {
            self.inner.reserve(ip, identity)
        }

        fn release_address(&mut self, ip: IpAddr) -> Result<bool> {
            if self.fail_release {
                return Err(Self::disk_full("/release"));
            }
            self.inner.release_address(ip)
        }

        fn release_by_id(&mut self, identity: &Identity) -> Result<Vec<IpAddr>> {
            self.inner.release_by_id(identity)
        }

        fn has_reservation(&self, ip: IpAddr) -> Result<bool> {
            self.inner.has_reservation(ip)
        }

        fn get_by_id(&self, identity: &Identity) -> Result<Vec<IpAddr>> {
            self.inner.get_by_id(identity)
        }

        fn last_reserved_ip(&self, range_id: usize) -> Result<Option<IpAddr>> {
            self.inner.last_reserved_ip(range_id)
        }

        fn set_last_reserved_ip(&mut self, range_id: usize, ip: IpAddr) -> Result<()> {
            if self.fail_cursor_write {
                return Err(Self::disk_full("/cursor"));
            }
            self.inner.set_last_reserved_ip(range_id, ip)
        }

        fn clear_last_reserved_ip(&mut self, range_id: usize) -> Result<()> {
            self.inner.clear_last_reserved_ip(range_id)
        }
    }

    #[test]
    fn test_sequential_allocation_until_exhausted() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);
        let conf = config(vec![range_set(0, &["10.1.2.0/29"])], vec![]);

        let mut got = Vec::new();
        for n in 0..5 {
            let ips = allocate(&conf, &mut store, &id(n)).unwrap();
            assert_eq!(ips.len(), 1);
            assert_eq!(ips[0].gateway, ip("10.1.2.1"));
            got.push(ips[0].address.to_string());
        }
        assert_eq!(
            got,
            ["10.1.2.2/29", "10.1.2.3/29", "10.1.2.4/29", "10.1.2.5/29", "10.1.2.6/29"]
        );

        let err = allocate(&conf, &mut store, &id(5)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "failed to allocate for range 0: no IP addresses available in range set: 10.1.2.1-10.1.2.6"
        );
    }

    #[test]
    fn test_round_robin_does_not_reuse_released_address() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);
        let conf = config(vec![range_set(0, &["10.1.2.0/29"])], vec![]);

        let first = allocate(&conf, &mut store, &id(0)).unwrap();
        assert_eq!(first[0].address.addr(), ip("10.1.2.2"));
        release(&mut store, &id(0)).unwrap();

        let second = allocate(&conf, &mut store, &id(1)).unwrap();
        assert_eq!(second[0].address.addr(), ip("10.1.2.3"));
    }

    #[test]
    fn test_wraps_around_after_cursor() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);
        let conf = config(vec![range_set(0, &["10.1.2.0/29"])], vec![]);
        store.set_last_reserved_ip(0, ip("10.1.2.6")).unwrap();

        let ips = allocate(&conf, &mut store, &id(0)).unwrap();
        assert_eq!(ips[0].address.addr(), ip("10.1.2.2"));
        assert_eq!(store.last_reserved_ip(0).unwrap(), Some(ip("10.1.2.2")));
    }

    #[test]
    fn test_one_address_per_range_set() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);
        let conf = config(
            vec![range_set(0, &["10.1.2.0/24"]), range_set(1, &["2001:db8:1::/64"])],
            vec![],
        );

        let ips = allocate(&conf, &mut store, &id(0)).unwrap();
        assert_eq!(ips[0].address.to_string(), "10.1.2.2/24");
        assert_eq!(ips[1].address.to_string(), "2001:db8:1::2/64");
        assert_eq!(ips[1].gateway, ip("2001:db8:1::1"));
        assert_eq!(store.last_reserved_ip(1).unwrap(), Some(ip("2001:db8:1::2")));
    }

    #[test]
    fn test_requested_address() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);
        let conf = config(vec![range_set(0, &["10.1.2.0/24"])], vec![ip("10.1.2.77")]);

        let ips = allocate(&conf, &mut store, &id(0)).unwrap();
        assert_eq!(ips[0].address.to_string(), "10.1.2.77/24");
        assert_eq!(store.last_reserved_ip(0).unwrap(), Some(ip("10.1.2.77")));

        let err = allocate(&conf, &mut store, &id(1)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "failed to allocate for range 0: requested IP address 10.1.2.77 is not available in range set 10.1.2.1-10.1.2.254"
        );
    }

    #[test]
    fn test_requested_gateway_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);
        let conf = config(vec![range_set(0, &["10.1.2.0/24"])], vec![ip("10.1.2.1")]);

        let err = allocate(&conf, &mut store, &id(0)).unwrap_err();
        assert!(err.to_string().ends_with("requested ip 10.1.2.1 is subnet's gateway"), "{}", err);
        assert!(!store.has_reservation(ip("10.1.2.1")).unwrap());
    }

    #[test]
    fn test_requested_address_outside_pool_fails() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);
        let conf = config(vec![range_set(0, &["10.1.2.0/24"])], vec![ip("192.168.0.9")]);

        let err = allocate(&conf, &mut store, &id(0)).unwrap_err();
        assert_eq!(err.to_string(), "failed to allocate all requested IPs: 192.168.0.9");
        // the dynamic allocation made before the check is rolled back
        assert!(store.get_by_id(&id(0)).unwrap().is_empty());
        assert_eq!(store.last_reserved_ip(0).unwrap(), None);
    }

    #[test]
    fn test_duplicate_allocation_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);
        let conf = config(vec![range_set(0, &["10.1.2.0/24"])], vec![]);

        allocate(&conf, &mut store, &id(0)).unwrap();
        let err = allocate(&conf, &mut store, &id(0)).unwrap_err();
        assert!(
            err.to_string()
                .ends_with("10.1.2.2 has been allocated to container-0, duplicate allocation is not allowed"),
            "{}",
            err
        );
        // the existing reservation is untouched
        assert_eq!(store.get_by_id(&id(0)).unwrap(), vec![ip("10.1.2.2")]);
    }

    #[test]
    fn test_partial_failure_rolls_back() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);
        // 10.1.3.0/30 has a single allocatable address: .2
        let conf = config(
            vec![range_set(0, &["10.1.2.0/24"]), range_set(1, &["10.1.3.0/30"])],
            vec![],
        );
        store.set_last_reserved_ip(0, ip("10.1.2.40")).unwrap();
        store.reserve(ip("10.1.3.2"), &id(9)).unwrap();

        let err = allocate(&conf, &mut store, &id(0)).unwrap_err();
        assert!(matches!(err, IpamError::RangeAllocation { index: 1, .. }), "{:?}", err);

        assert!(store.get_by_id(&id(0)).unwrap().is_empty());
        assert!(!store.has_reservation(ip("10.1.2.41")).unwrap());
        assert_eq!(store.last_reserved_ip(0).unwrap(), Some(ip("10.1.2.40")));
        assert_eq!(store.last_reserved_ip(1).unwrap(), None);
        assert_eq!(store.get_by_id(&id(9)).unwrap(), vec![ip("10.1.3.2")]);
    }

    #[test]
    fn test_release_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);

        assert!(release(&mut store, &id(0)).unwrap().is_empty());
        assert!(release(&mut store, &id(0)).unwrap().is_empty());

        let conf = config(vec![range_set(0, &["10.1.2.0/24"])], vec![]);
        allocate(&conf, &mut store, &id(0)).unwrap();
        assert_eq!(release(&mut store, &id(0)).unwrap(), vec![ip("10.1.2.2")]);
        assert!(release(&mut store, &id(0)).unwrap().is_empty());
    }

    #[test]
    fn test_check() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);
        let conf = config(vec![range_set(0, &["10.1.2.0/24"])], vec![]);

        let err = check(&store, &id(0)).unwrap_err();
        assert_eq!(err.to_string(), "failed to find address added by container container-0");

        allocate(&conf, &mut store, &id(0)).unwrap();
        assert_eq!(check(&store, &id(0)).unwrap(), vec![ip("10.1.2.2")]);
    }

    #[test]
    fn test_cursor_write_failure_releases_reservation() {
        let dir = TempDir::new().unwrap();
        let mut store = FaultyStore::new(&dir);
        store.fail_cursor_write = true;
        let conf = config(vec![range_set(0, &["10.1.2.0/24"])], vec![]);

        let err = allocate(&conf, &mut store, &id(0)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "failed to allocate for range 0: store I/O error on /cursor: disk full"
        );
        assert!(store.get_by_id(&id(0)).unwrap().is_empty());
        assert!(!store.has_reservation(ip("10.1.2.2")).unwrap());
    }

    #[test]
    fn test_requested_address_cursor_failure_releases_reservation() {
        let dir = TempDir::new().unwrap();
        let mut store = FaultyStore::new(&dir);
        store.fail_cursor_write = true;
        let conf = config(vec![range_set(0, &["10.1.2.0/24"])], vec![ip("10.1.2.77")]);

        assert!(allocate(&conf, &mut store, &id(0)).is_err());
        assert!(!store.has_reservation(ip("10.1.2.77")).unwrap());
    }

    #[test]
    fn test_incomplete_rollback_is_reported() {
        let dir = TempDir::new().unwrap();
        let mut store = FaultyStore::new(&dir);
        store.fail_release = true;
        let conf = config(
            vec![range_set(0, &["10.1.2.0/24"]), range_set(1, &["10.1.3.0/30"])],
            vec![],
        );
        store.inner.reserve(ip("10.1.3.2"), &id(9)).unwrap();

        let err = allocate(&conf, &mut store, &id(0)).unwrap_err();
        assert!(matches!(err, IpamError::RollbackFailed { .. }), "{:?}", err);
        assert_eq!(
            err.to_string(),
            "failed to allocate for range 1: no IP addresses available in range set: 10.1.3.1-10.1.3.2 \
             (rollback incomplete: release 10.1.2.2: store I/O error on /release: disk full)"
        );
        let source = std::error::Error::source(&err).unwrap();
        assert!(source.to_string().starts_with("failed to allocate for range 1"));
    }

    #[test]
    fn test_repeated_request_is_satisfied_once() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);
        let conf = config(
            vec![range_set(0, &["10.1.2.0/24"]), range_set(1, &["2001:db8:1::/64"])],
            vec![ip("10.1.2.10"), ip("2001:db8:1::10"), ip("10.1.2.10")],
        );

        let ips = allocate(&conf, &mut store, &id(0)).unwrap();
        assert_eq!(ips[0].address.addr(), ip("10.1.2.10"));
        assert_eq!(ips[1].address.addr(), ip("2001:db8:1::10"));
    }

    #[test]
    fn test_release_and_check_do_not_create_store() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);

        assert!(release(&mut store, &id(0)).unwrap().is_empty());
        assert!(matches!(check(&store, &id(0)), Err(IpamError::NotFound(_))));
        assert!(!dir.path().join("mynet").exists());

        let conf = config(vec![range_set(0, &["10.1.2.0/24"])], vec![]);
        allocate(&conf, &mut store, &id(0)).unwrap();
        assert!(dir.path().join("mynet").is_dir());
    }
}
