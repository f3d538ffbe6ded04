//! # host-local - Host-local IP address management for CNI plugins
//!
//! This library decides which IP address(es) a container interface receives
//! from a declaratively configured pool, and durably records that decision on
//! the local host so that repeated and concurrent plugin invocations never
//! hand out the same address twice.
//!
//! ## Overview
//!
//! Every CNI ADD/DEL call is a fresh process. Nothing is cached between
//! calls: the configuration is resolved again from the network configuration
//! document, and the only shared state is the per-network store directory,
//! guarded by an advisory file lock.
//!
//! ## Key Features
//!
//! - **Multiple pools**: several range sets per network, one address per set
//! - **Dual stack**: IPv4 and IPv6 ranges behind one model
//! - **Round-robin**: allocation resumes after the last address handed out
//! - **Static requests**: addresses requested through `CNI_ARGS`,
//!   `runtimeConfig.ips` or `args.cni.ips`
//! - **All-or-nothing**: a failed multi-range allocation leaves the store untouched
//!
//! ## Architecture
//!
//! - `config`: serde types for the network configuration and the resolved `IpamConfig`
//! - `config_loader`: merging of configuration sources and validation
//! - `ip`: ranges, range sets, candidate iteration and the allocator
//! - `store`: the lock-protected, directory-backed reservation store
//! - `result`: the allocation result reported to the runtime
//! - `utils`: address arithmetic helpers
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use host_local::config_loader::load_ipam_config;
//! use host_local::ip::{allocate, release};
//! use host_local::store::{DiskStore, Identity};
//!
//! let netconf = br#"{
//!     "cniVersion": "1.0.0",
//!     "name": "mynet",
//!     "ipam": { "type": "host-local", "subnet": "10.1.2.0/24" }
//! }"#;
//! let (config, _version) = load_ipam_config(netconf, "IgnoreUnknown=1")?;
//!
//! let mut store = DiskStore::open(&config.name, config.data_dir.as_deref())?;
//! let identity = Identity::new("f81d4fae7dec", "eth0");
//!
//! let ips = allocate(&config, &mut store, &identity)?;
//! println!("allocated {}", ips[0].address);
//!
//! release(&mut store, &identity)?;
//! # Ok::<(), host_local::error::IpamError>(())
//! ```
//!
//! ## Store Layout
//!
//! ```text
//! /var/lib/cni/networks/<network>/
//! |-- lock                  # flock(2) target
//! |-- last_reserved_ip.0    # round-robin cursor of range set 0
//! \-- 10.1.2.2              # "<container id>\r\n<ifname>"
//! ```
//!
//! ## Error Handling
//!
//! The library returns [`error::IpamError`] through [`error::Result`]. The
//! `host-local` binary reports errors with `color_eyre`.

pub mod config;
pub mod config_loader;
pub mod error;
pub mod ip;
pub mod result;
pub mod store;
pub mod utils;
