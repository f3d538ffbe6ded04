//! Directory-backed allocation store.
//!
//! Layout of `<data_dir>/<network>/`:
//!
//! ```text
//! lock                    # flock(2) target
//! last_reserved_ip.<N>    # cursor of range set N (address text)
//! <address>               # one file per reservation: "<container id>\r\n<ifname>"
//! ```

use super::{Identity, Store, StoreLock};
use crate::error::{IpamError, Result};
use log::{debug, info, warn};
use std::fs::{self, File};
use std::io::{self, Write};
use std::net::IpAddr;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Component, Path, PathBuf};

/// Default root for per-network store directories
pub const DEFAULT_DATA_DIR: &str = "/var/lib/cni/networks";

const LOCK_FILE: &str = "lock";
const LAST_RESERVED_PREFIX: &str = "last_reserved_ip.";

/// Store keeping one file per reserved address
#[derive(Debug, Clone)]
pub struct DiskStore {
    dir: PathBuf,
}

impl DiskStore {
    /// Open the store for `network`
    ///
    /// Only the name is validated here; the directory is created by the
    /// first lock or write.
    pub fn open(network: &str, data_dir: Option<&Path>) -> Result<Self> {
        let mut components = Path::new(network).components();
        let single_component = matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        );
        if network.is_empty() || !single_component {
            return Err(IpamError::InvalidNetworkName(network.to_string()));
        }

        let root = data_dir.unwrap_or_else(|| Path::new(DEFAULT_DATA_DIR));
        let dir = root.join(network);
        debug!("Opened store at {:?}", dir);

        Ok(DiskStore { dir })
    }

    fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| IpamError::store(&self.dir, e))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn address_path(&self, ip: IpAddr) -> PathBuf {
        self.dir.join(ip.to_string())
    }

    fn cursor_path(&self, range_id: usize) -> PathBuf {
        self.dir.join(format!("{}{}", LAST_RESERVED_PREFIX, range_id))
    }

    /// All reservation records as `(address, record)` pairs, sorted by address
    fn records(&self) -> Result<Vec<(IpAddr, String)>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(IpamError::store(&self.dir, e)),
        };

        let mut records = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| IpamError::store(&self.dir, e))?;
            let Some(ip) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<IpAddr>().ok())
            else {
                continue;
            };

            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let record = fs::read_to_string(&path).map_err(|e| IpamError::store(&path, e))?;
            records.push((ip, record));
        }
        records.sort_by_key(|(ip, _)| *ip);
        Ok(records)
    }
}

impl Store for DiskStore {
    fn exists(&self) -> Result<bool> {
        self.dir.try_exists().map_err(|e| IpamError::store(&self.dir, e))
    }

    fn lock(&self) -> Result<StoreLock> {
        self.ensure_dir()?;
        StoreLock::acquire(&self.dir.join(LOCK_FILE))
    }

    fn reserve(&mut self, ip: IpAddr, identity: &Identity) -> Result<bool> {
        self.ensure_dir()?;
        let path = self.address_path(ip);
        let mut file = match File::options()
            .write(true)
            .create_new(true)
            .mode(0o600)
            .open(&path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => return Err(IpamError::store(&path, e)),
        };

        if let Err(e) = file.write_all(identity.record().as_bytes()) {
            drop(file);
            let _ = fs::remove_file(&path);
            return Err(IpamError::store(&path, e));
        }

        info!("Reserved {} for {}", ip, identity);
        Ok(true)
    }

    fn release_address(&mut self, ip: IpAddr) -> Result<bool> {
        let path = self.address_path(ip);
        match fs::remove_file(&path) {
            Ok(()) => {
                info!("Released {}", ip);
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(IpamError::store(&path, e)),
        }
    }

    fn release_by_id(&mut self, identity: &Identity) -> Result<Vec<IpAddr>> {
        let mut released = Vec::new();
        for (ip, record) in self.records()? {
            if identity.matches(&record) && self.release_address(ip)? {
                released.push(ip);
            }
        }
        if released.is_empty() {
            debug!("No reservations held by {}", identity);
        }
        Ok(released)
    }

    fn has_reservation(&self, ip: IpAddr) -> Result<bool> {
        let path = self.address_path(ip);
        path.try_exists().map_err(|e| IpamError::store(&path, e))
    }

    fn get_by_id(&self, identity: &Identity) -> Result<Vec<IpAddr>> {
        Ok(self
            .records()?
            .into_iter()
            .filter(|(_, record)| identity.matches(record))
            .map(|(ip, _)| ip)
            .collect())
    }

    fn last_reserved_ip(&self, range_id: usize) -> Result<Option<IpAddr>> {
        let path = self.cursor_path(range_id);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(IpamError::store(&path, e)),
        };

        match content.trim().parse::<IpAddr>() {
            Ok(ip) => Ok(Some(ip)),
            Err(_) => {
                warn!("Ignoring corrupt cursor {:?}: {:?}", path, content);
                Ok(None)
            }
        }
    }

    fn set_last_reserved_ip(&mut self, range_id: usize, ip: IpAddr) -> Result<()> {
        self.ensure_dir()?;
        let path = self.cursor_path(range_id);
        let mut file = File::options()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(&path)
            .map_err(|e| IpamError::store(&path, e))?;
        file.write_all(ip.to_string().as_bytes())
            .map_err(|e| IpamError::store(&path, e))
    }

    fn clear_last_reserved_ip(&mut self, range_id: usize) -> Result<()> {
        let path = self.cursor_path(range_id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(IpamError::store(&path, e)),
        }
    }
}
