//! SendTargets discovery configuration CLI
//!
//! Commands:
//! - add-portal: Add a SendTargets discovery portal
//! - remove-portal: Remove a discovery portal; the targets it discovered are
//!   logged out and removed by the next discovery pass
//! - portals: List discovery portals
//! - add-static: Add a statically configured target
//! - remove: Mark a target for logout and removal by the next discovery pass
//! - list: List configured targets
//!
//! Mutating commands hold the registry lock from load to sync, waiting for
//! any discovery pass in progress to finish.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use env_logger::Env;
use std::io::Write;
use std::path::{Path, PathBuf};

use voe_discovery::config::Config;
use voe_discovery::registry::RegistryLock;
use voe_discovery::{DiscoveryPortal, FileTargetRegistry, Portal, TargetName, TargetRegistry};

#[derive(Parser)]
#[command(name = "iscsi-discovery")]
#[command(about = "iSCSI SendTargets discovery configuration", long_about = None)]
struct Cli {
    /// Path to configuration file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Path to registry file (overrides the configuration)
    #[arg(long)]
    registry: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add a SendTargets discovery portal
    AddPortal {
        /// Portal address (addr[:port])
        portal: String,

        /// Host interface to use for discovery
        #[arg(short, long)]
        interface: Option<String>,
    },

    /// Remove a discovery portal and the dynamic targets it owns
    RemovePortal {
        /// Discovery portal name (addr:port)
        name: String,
    },

    /// List discovery portals
    Portals,

    /// Add a statically configured target
    AddStatic {
        /// Target IQN
        iqn: String,

        /// Portal addresses (addr[:port])
        #[arg(required = true)]
        portals: Vec<String>,
    },

    /// Log out and remove a target at the next discovery pass
    Remove {
        /// Target IQN
        iqn: String,
    },

    /// List configured targets
    List {
        /// Only targets discovered through this discovery portal
        #[arg(long)]
        owner: Option<String>,
    },
}

impl Commands {
    fn mutates(&self) -> bool {
        !matches!(self, Commands::Portals | Commands::List { .. })
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("failed to load config from {:?}", path))?,
        None => Config::default(),
    };

    init_logging(&config.discovery.log_level);

    let registry_path = cli
        .registry
        .clone()
        .unwrap_or_else(|| config.discovery.registry.clone());

    let _lock = if cli.command.mutates() {
        Some(lock_registry(&registry_path)?)
    } else {
        None
    };

    let mut registry = FileTargetRegistry::load_or_create(&registry_path)
        .with_context(|| format!("failed to open registry {:?}", registry_path))?;

    match &cli.command {
        Commands::AddPortal { portal, interface } => {
            cmd_add_portal(&mut registry, portal, interface.clone())
        }
        Commands::RemovePortal { name } => cmd_remove_portal(&mut registry, name),
        Commands::Portals => cmd_portals(&registry),
        Commands::AddStatic { iqn, portals } => cmd_add_static(&mut registry, iqn, portals),
        Commands::Remove { iqn } => cmd_remove(&mut registry, iqn),
        Commands::List { owner } => cmd_list(&registry, owner.as_deref()),
    }
}

fn lock_registry(path: &Path) -> Result<RegistryLock> {
    if let Some(lock) = RegistryLock::try_acquire(path)? {
        return Ok(lock);
    }

    log::info!("Waiting for the discovery pass holding {:?}", path);
    RegistryLock::acquire(path).with_context(|| format!("failed to lock registry {:?}", path))
}

fn cmd_add_portal(
    registry: &mut FileTargetRegistry,
    portal: &str,
    interface: Option<String>,
) -> Result<()> {
    let mut portal: Portal = portal
        .parse()
        .with_context(|| format!("invalid portal: {}", portal))?;
    portal.host_interface = interface;

    let name = registry.add_send_targets_portal(portal)?;
    registry.sync()?;

    println!("✓ Added discovery portal {}", name);
    Ok(())
}

fn cmd_remove_portal(registry: &mut FileTargetRegistry, name: &str) -> Result<()> {
    let orphans = registry.remove_send_targets_portal(&DiscoveryPortal::new(name))?;
    registry.sync()?;

    println!("✓ Removed discovery portal {}", name);
    for target in orphans {
        println!("  - {} will be logged out and removed at the next discovery pass", target);
    }
    Ok(())
}

fn cmd_portals(registry: &FileTargetRegistry) -> Result<()> {
    let names = registry.send_targets_portals();
    if names.is_empty() {
        println!("No discovery portals configured.");
        return Ok(());
    }

    println!("SendTargets Discovery Portals:\n");
    for name in names {
        let owned = registry.entries_owned_by(&name).len();
        match registry.send_targets_portal(&name).and_then(|p| p.host_interface) {
            Some(interface) => println!("{}  (via {}, {} target(s))", name, interface, owned),
            None => println!("{}  ({} target(s))", name, owned),
        }
    }
    Ok(())
}

fn cmd_add_static(registry: &mut FileTargetRegistry, iqn: &str, portals: &[String]) -> Result<()> {
    let portals = portals
        .iter()
        .map(|p| p.parse::<Portal>().with_context(|| format!("invalid portal: {}", p)))
        .collect::<Result<Vec<_>>>()?;

    registry.add_static_target(TargetName::from(iqn), portals)?;
    registry.sync()?;

    println!("✓ Added static target {}", iqn);
    Ok(())
}

fn cmd_remove(registry: &mut FileTargetRegistry, iqn: &str) -> Result<()> {
    registry.retire_target(&TargetName::from(iqn))?;
    registry.sync()?;

    println!("✓ Target {} will be logged out and removed at the next discovery pass", iqn);
    Ok(())
}

fn cmd_list(registry: &FileTargetRegistry, owner: Option<&str>) -> Result<()> {
    let owner = owner.map(DiscoveryPortal::new);
    let entries: Vec<_> = registry
        .entries()
        .filter(|(_, e)| owner.is_none() || e.discovery_portal == owner)
        .collect();

    if entries.is_empty() {
        println!("No targets configured.");
        return Ok(());
    }

    println!("Configured Targets:\n");
    for (name, entry) in entries {
        if entry.retired {
            println!("{}  (pending removal)", name);
        } else {
            println!("{}", name);
        }
        println!("  Config:  {:?}", entry.config_type);
        if let Some(ref dp) = entry.discovery_portal {
            println!("  Discovered via: {}", dp);
        }
        for portal in entry.portals.values() {
            println!("  Portal:  {}", portal);
        }
        println!();
    }
    Ok(())
}

/// Initialize env_logger, appending structured fields to each line
fn init_logging(default_level: &str) {
    env_logger::Builder::from_env(Env::default().default_filter_or(default_level))
        .format(|buf, record| {
            let mut fields = String::new();
            let _ = record.key_values().visit(&mut FieldWriter(&mut fields));
            writeln!(
                buf,
                "[{} {:<5} {}] {}{}",
                buf.timestamp(),
                record.level(),
                record.target(),
                record.args(),
                fields
            )
        })
        .init();
}

struct FieldWriter<'a>(&'a mut String);

impl<'kvs> log::kv::VisitSource<'kvs> for FieldWriter<'_> {
    fn visit_pair(
        &mut self,
        key: log::kv::Key<'kvs>,
        value: log::kv::Value<'kvs>,
    ) -> Result<(), log::kv::Error> {
        use std::fmt::Write as _;
        let _ = write!(self.0, " {}={}", key, value);
        Ok(())
    }
}
