use clap::{Parser, Subcommand};
use hostport::{MetaHostportManager, PodPortMapping, Result};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(
    name = "hostportctl",
    version = hostport::VERSION,
    about = "Program hostport NAT rules for pod sandboxes"
)]
struct Cli {
    /// Default to debug-level logging (RUST_LOG still wins).
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Program the hostports described by a pod mapping file.
    Add {
        /// JSON file holding the pod port mapping.
        mapping: PathBuf,
        /// Sandbox id the derived chain names are keyed on.
        #[arg(long)]
        id: String,
        /// Pod network bridge; enables the loopback masquerade rule.
        #[arg(long)]
        nat_interface: Option<String>,
    },
    /// Tear down the hostports described by a pod mapping file.
    Remove {
        /// JSON file holding the pod port mapping.
        mapping: PathBuf,
        /// Sandbox id the rules were added under.
        #[arg(long)]
        id: String,
    },
    /// Dump the IPv4 and IPv6 nat tables in save format.
    Dump,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let manager = MetaHostportManager::system();
    match cli.command {
        Command::Add {
            mapping,
            id,
            nat_interface,
        } => {
            let pod = load_mapping(&mapping)?;
            manager.add(&id, &pod, nat_interface.as_deref())?;
            info!(pod = %pod.identity(), "hostports added");
        }
        Command::Remove { mapping, id } => {
            let pod = load_mapping(&mapping)?;
            manager.remove(&id, &pod)?;
            info!(pod = %pod.identity(), "hostports removed");
        }
        Command::Dump => {
            print!("{}", manager.ipv4().dump()?);
            print!("{}", manager.ipv6().dump()?);
        }
    }
    Ok(())
}

fn load_mapping(path: &Path) -> Result<PodPortMapping> {
    let contents = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

fn init_tracing(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
