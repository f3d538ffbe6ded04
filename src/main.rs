use clap::{Parser, Subcommand};
use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use env_logger::Env;
use log::info;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use host_local::config::IpamConfig;
use host_local::config_loader::load_ipam_config;
use host_local::ip::{allocate, check, release};
use host_local::result::IpamResult;
use host_local::store::{DiskStore, Identity};

/// Host-local IP address management for CNI plugins
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Allocate addresses and print the result as JSON
    Add(Invocation),
    /// Release every address held by the container interface
    Del(Invocation),
    /// Verify that the container interface holds addresses
    Check(Invocation),
}

/// Per-invocation parameters, taken from flags or the CNI environment
#[derive(clap::Args, Debug)]
struct Invocation {
    /// Path to the network configuration JSON (read from stdin when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Container ID owning the addresses
    #[arg(long, env = "CNI_CONTAINERID")]
    container_id: String,

    /// Interface name inside the container
    #[arg(long, env = "CNI_IFNAME", default_value = "eth0")]
    ifname: String,

    /// Extra arguments in KEY=VALUE;KEY=VALUE form
    #[arg(long, env = "CNI_ARGS", default_value = "")]
    cni_args: String,
}

impl Invocation {
    fn identity(&self) -> Identity {
        Identity::new(&self.container_id, &self.ifname)
    }

    fn load(&self) -> Result<(IpamConfig, String)> {
        let netconf = read_netconf(self.config.as_deref())?;
        load_ipam_config(&netconf, &self.cni_args).wrap_err("Failed to load IPAM configuration")
    }
}

fn read_netconf(path: Option<&Path>) -> Result<Vec<u8>> {
    match path {
        Some(path) => fs::read(path)
            .wrap_err_with(|| format!("Failed to read network configuration '{}'", path.display())),
        None => {
            let mut buf = Vec::new();
            io::stdin()
                .read_to_end(&mut buf)
                .wrap_err("Failed to read network configuration from stdin")?;
            Ok(buf)
        }
    }
}

fn open_store(config: &IpamConfig) -> Result<DiskStore> {
    DiskStore::open(&config.name, config.data_dir.as_deref())
        .wrap_err_with(|| format!("Failed to open store for network '{}'", config.name))
}

fn cmd_add(invocation: &Invocation) -> Result<()> {
    let (config, cni_version) = invocation.load()?;
    let mut store = open_store(&config)?;

    let ips = allocate(&config, &mut store, &invocation.identity())
        .wrap_err_with(|| format!("Failed to allocate for {}", invocation.container_id))?;

    let result = IpamResult::new(cni_version, ips);
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn cmd_del(invocation: &Invocation) -> Result<()> {
    let (config, _) = invocation.load()?;
    let mut store = open_store(&config)?;

    let released = release(&mut store, &invocation.identity())
        .wrap_err_with(|| format!("Failed to release addresses of {}", invocation.container_id))?;
    info!("Released {:?}", released);
    Ok(())
}

fn cmd_check(invocation: &Invocation) -> Result<()> {
    let (config, _) = invocation.load()?;
    let store = open_store(&config)?;

    let held = check(&store, &invocation.identity())?;
    info!("{} holds {:?}", invocation.identity(), held);
    Ok(())
}

fn main() -> Result<()> {
    // Initialize error handling
    color_eyre::install()?;

    let args = Args::parse();

    // Logs go to stderr; stdout carries the result document
    env_logger::Builder::from_env(Env::default().default_filter_or("warn")).init();

    match &args.command {
        Command::Add(invocation) => cmd_add(invocation),
        Command::Del(invocation) => cmd_del(invocation),
        Command::Check(invocation) => cmd_check(invocation),
    }
}
