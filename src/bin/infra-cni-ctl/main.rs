use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use infra_cni::agent::DEFAULT_AGENT_SOCKET;
use infra_cni::config::{Installer, NetConf, NetConfList, PluginDefaults};
use infra_cni::link::{IpLinkProvisioner, IpvlanMode};

/// A command line tool to manage the infra offload CNI plugin
#[derive(Parser)]
#[command(name = "infra-cni-ctl", author, version, about)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a network configuration list
    Generate {
        /// Master interface
        #[arg(long)]
        master: String,

        /// IPVLAN mode (l2, l3, l3s)
        #[arg(long, default_value = "l3")]
        mode: IpvlanMode,

        /// Interface MTU
        #[arg(long)]
        mtu: Option<u32>,

        /// Network name
        #[arg(long, default_value = "infra-offload")]
        name: String,

        /// Infra agent socket
        #[arg(long, default_value = DEFAULT_AGENT_SOCKET)]
        agent_socket: PathBuf,

        /// Output file path
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Write the default configuration into the CNI directories
    Install {
        /// CNI binary directory
        #[arg(long, default_value = "/opt/cni/bin")]
        bin_dir: PathBuf,

        /// CNI configuration directory
        #[arg(long, default_value = "/etc/cni/net.d")]
        conf_dir: PathBuf,

        /// Master interface
        #[arg(long)]
        master: Option<String>,

        /// Network name
        #[arg(long, default_value = "infra-offload")]
        name: String,
    },

    /// Status of IPVLAN interfaces
    Status {
        /// Inspect this network namespace instead of the current one
        #[arg(long)]
        netns: Option<String>,
    },
}

fn generate_network_config(
    master: &str,
    mode: IpvlanMode,
    mtu: Option<u32>,
    name: &str,
    agent_socket: PathBuf,
) -> NetConfList {
    let mut conf = NetConf::new_default(name, master, mode, mtu);
    conf.agent_socket = agent_socket;
    NetConfList::single(conf)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Configure logging based on verbosity
    let log_level = if cli.verbose { "debug" } else { "info" };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)))
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set default subscriber")?;

    match cli.command {
        Commands::Generate { master, mode, mtu, name, agent_socket, output } => {
            let config = generate_network_config(&master, mode, mtu, &name, agent_socket);
            let config_json = serde_json::to_string_pretty(&config)?;

            if let Some(path) = output {
                fs::write(&path, config_json)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                println!("Network configuration written to {}", path.display());
            } else {
                println!("{}", config_json);
            }
        }

        Commands::Install { bin_dir, conf_dir, master, name } => {
            let mut defaults = PluginDefaults {
                cni_bin_dir: bin_dir,
                cni_conf_dir: conf_dir,
                ..Default::default()
            };
            if let Some(master) = master {
                defaults.default_master = master;
            }

            let path = Installer::new(defaults).install(&name)?;
            info!(path = %path.display(), "installed network configuration");
            println!("Network configuration installed at {}", path.display());
        }

        Commands::Status { netns } => {
            let links = IpLinkProvisioner::default()
                .list_ipvlan_links(netns.as_deref())
                .context("Failed to list IPVLAN interfaces")?;

            if links.is_empty() {
                println!("No IPVLAN interfaces found");
            } else {
                println!("IPVLAN Interface Status:");
                for link in links {
                    println!("  {}:", link.name);
                    println!("    State: {}", link.state);
                    println!("    Master: {}", link.master.as_deref().unwrap_or("-"));
                    println!("    Mode: {}", link.mode.as_deref().unwrap_or("-"));
                    if let Some(mac) = link.mac {
                        println!("    MAC: {}", mac);
                    }
                }
            }
        }
    }

    Ok(())
}
