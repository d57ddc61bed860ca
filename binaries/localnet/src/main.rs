//! Localnet - provision and operate local multi-node test networks.
//!
//! # Usage
//!
//! ```bash
//! # Create the default network (one seed, two whales, one fish, one node)
//! localnet network create
//!
//! # Create a named network from a topology document and an existing ledger
//! localnet network create -n zk -t topology.json -g ledger.json
//!
//! # Start it, take one producer down and bring it back
//! localnet network start -n zk
//! localnet node stop -n zk -i whale-1
//! localnet node start -n zk -i whale-1
//!
//! # Inspect, then tear down
//! localnet network info -n zk
//! localnet network stop -n zk
//! localnet network delete -n zk
//! ```
//!
//! Command results are printed to stdout as JSON; logs go to stderr. The exit
//! code is 0 on success, 2 when the request itself was rejected (bad topology,
//! unknown network, network busy, ...) and 1 for environment failures.

mod config;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use config::LocalnetConfig;
use localnet_core::{NodeId, NodeRole};
use localnet_orchestrator::{
    list_networks, Controller, CreateOptions, DockerKeyGenerator, DockerRuntime, KeyMaterialManager,
    NetworkStore, NodeStartOptions, OrchestratorError, PostgresConfig, ResetMode, TopologySpec,
};
use serde::Serialize;
use tracing::{debug, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// CLI arguments for localnet.
#[derive(Parser, Debug)]
#[command(
    name = "localnet",
    about = "Provision and operate local multi-node test networks",
    version
)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Root directory of all network state.
    #[arg(long, value_name = "DIR", global = true)]
    base_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, value_name = "LEVEL", global = true)]
    log_level: Option<String>,

    /// Enable JSON log output.
    #[arg(long, global = true)]
    json_logs: bool,

    /// Print the effective configuration and exit.
    #[arg(long)]
    print_config: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Operate on whole networks.
    #[command(subcommand)]
    Network(NetworkCommand),

    /// Operate on single nodes of a network.
    #[command(subcommand)]
    Node(NodeCommand),
}

#[derive(Args, Debug, Clone)]
struct NetworkName {
    /// Network name.
    #[arg(short = 'n', long = "name", default_value = "default")]
    name: String,
}

#[derive(Subcommand, Debug)]
enum NetworkCommand {
    /// Resolve a topology, generate keys and write all artifacts.
    Create {
        #[command(flatten)]
        network: NetworkName,

        /// Topology document (JSON). Defaults to one seed, two whales, one
        /// fish and one plain node.
        #[arg(short = 't', long, value_name = "FILE")]
        topology: Option<PathBuf>,

        /// Genesis ledger whose accounts are kept.
        #[arg(short = 'g', long, value_name = "FILE")]
        genesis: Option<PathBuf>,

        /// Succeed without changes if the network exists with the same topology.
        #[arg(long)]
        reuse: bool,
    },

    /// Start every node in dependency order.
    Start(NetworkName),

    /// Stop every node in reverse dependency order.
    Stop(NetworkName),

    /// Show recorded and live state of every node.
    Status(NetworkName),

    /// Show endpoints, keys and artifact paths.
    Info(NetworkName),

    /// Tear down a stopped network and remove its directory.
    Delete(NetworkName),

    /// List all networks.
    List,

    /// Regenerate keys and genesis of a stopped network.
    Reset {
        #[command(flatten)]
        network: NetworkName,

        /// Only move the genesis timestamp to now.
        #[arg(long)]
        clock_only: bool,
    },
}

#[derive(Args, Debug, Clone)]
struct NodeTarget {
    #[command(flatten)]
    network: NetworkName,

    /// Node id, e.g. whale-0.
    #[arg(short = 'i', long = "id", value_name = "NODE")]
    id: NodeId,
}

#[derive(Subcommand, Debug)]
enum NodeCommand {
    /// Start one node.
    Start {
        #[command(flatten)]
        target: NodeTarget,

        /// Remove the node's container and config volume first.
        #[arg(short = 'f', long)]
        fresh_state: bool,

        /// Import the genesis accounts from network-keypairs into the
        /// node's wallet before it boots.
        #[arg(short = 'a', long)]
        import_accounts: bool,
    },

    /// Stop one node.
    Stop(NodeTarget),

    /// Print the logs of a node's services.
    Logs {
        #[command(flatten)]
        target: NodeTarget,

        /// Only the last N lines per service.
        #[arg(long, value_name = "N")]
        tail: Option<usize>,
    },

    /// Print the precomputed blocks a running node has logged.
    DumpPrecomputedBlocks(NodeTarget),
}

/// Initialize tracing/logging. Everything goes to stderr so stdout carries
/// only command results.
fn init_tracing(config: &config::LoggingConfig, json_logs: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .context("Failed to parse log filter")?;

    let format = if json_logs || config.format == "json" {
        "json"
    } else {
        &config.format
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .try_init()
                .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))?;
        }
        "compact" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .try_init()
                .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))?;
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().pretty().with_writer(std::io::stderr))
                .try_init()
                .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))?;
        }
    }

    Ok(())
}

/// Topology used when `create` gets no `-t`.
fn default_topology() -> TopologySpec {
    TopologySpec::builder()
        .group(NodeRole::Seed, 1)
        .group(NodeRole::WhaleBlockProducer, 2)
        .group(NodeRole::FishBlockProducer, 1)
        .group(NodeRole::PlainNode, 1)
        .value_transfers(true)
        .build()
}

async fn connect(config: &LocalnetConfig, store: NetworkStore) -> Result<Controller> {
    let runtime = DockerRuntime::connect()
        .await
        .context("Failed to connect to the Docker daemon")?;
    let defaults = config.network.clone();
    let generator = DockerKeyGenerator::new(
        runtime.client(),
        defaults.images.daemon.clone(),
        defaults.signing_key_passphrase.clone(),
        defaults.peer_key_passphrase.clone(),
    );
    let postgres = PostgresConfig::from_env().context("Invalid PostgreSQL settings")?;
    debug!(base_dir = %store.base_dir().display(), "Using network store");

    Ok(Controller::new(
        Arc::new(runtime),
        KeyMaterialManager::new(Arc::new(generator)),
        store,
        defaults,
        postgres,
    ))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn execute(command: Command, config: &LocalnetConfig) -> Result<()> {
    let store = NetworkStore::new(config.base_dir()?);

    if let Command::Network(NetworkCommand::List) = command {
        return print_json(&list_networks(&store)?);
    }

    let controller = connect(config, store).await?;
    match command {
        Command::Network(NetworkCommand::Create {
            network,
            topology,
            genesis,
            reuse,
        }) => {
            let spec = match topology {
                Some(path) => TopologySpec::from_file(&path)?,
                None => default_topology(),
            };
            let options = CreateOptions {
                reuse_existing: reuse,
                genesis,
            };
            let record = controller.create(&network.name, &spec, &options).await?;
            print_json(&controller.summarize(&record))
        }
        Command::Network(NetworkCommand::Start(network)) => {
            let record = controller.start(&network.name, None).await?;
            print_json(&controller.summarize(&record))
        }
        Command::Network(NetworkCommand::Stop(network)) => {
            let record = controller.stop(&network.name, None).await?;
            print_json(&controller.summarize(&record))
        }
        Command::Network(NetworkCommand::Status(network)) => print_json(&controller.status(&network.name).await?),
        Command::Network(NetworkCommand::Info(network)) => print_json(&controller.info(&network.name).await?),
        Command::Network(NetworkCommand::Delete(network)) => {
            let record = controller.delete(&network.name).await?;
            print_json(&controller.summarize(&record))
        }
        Command::Network(NetworkCommand::Reset { network, clock_only }) => {
            let mode = if clock_only { ResetMode::ClockOnly } else { ResetMode::Full };
            let record = controller.reset(&network.name, mode).await?;
            print_json(&controller.summarize(&record))
        }
        Command::Network(NetworkCommand::List) => print_json(&controller.list()?),
        Command::Node(NodeCommand::Start {
            target,
            fresh_state,
            import_accounts,
        }) => {
            let options = NodeStartOptions {
                fresh_state,
                import_accounts,
            };
            let record = controller.start_node(&target.network.name, &target.id, options).await?;
            print_json(&controller.summarize(&record))
        }
        Command::Node(NodeCommand::Stop(target)) => {
            let record = controller.stop(&target.network.name, Some(&target.id)).await?;
            print_json(&controller.summarize(&record))
        }
        Command::Node(NodeCommand::Logs { target, tail }) => {
            let logs = controller.logs(&target.network.name, &target.id, tail).await?;
            print!("{logs}");
            Ok(())
        }
        Command::Node(NodeCommand::DumpPrecomputedBlocks(target)) => {
            let blocks = controller.precomputed_blocks(&target.network.name, &target.id).await?;
            print!("{blocks}");
            Ok(())
        }
    }
}

async fn run(args: CliArgs) -> Result<()> {
    let mut config = if let Some(ref config_path) = args.config {
        LocalnetConfig::from_file(config_path)
            .with_context(|| format!("Failed to load config from {:?}", config_path))?
    } else {
        LocalnetConfig::default()
    };
    config.merge_env(|key| std::env::var(key).ok());
    config.merge_cli_args(&args);
    config.validate().context("Invalid configuration")?;

    if args.print_config {
        println!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    let Some(command) = args.command else {
        anyhow::bail!("no command given; run with --help for usage");
    };

    init_tracing(&config.logging, args.json_logs)?;
    info!(version = env!("CARGO_PKG_VERSION"), "localnet starting");

    execute(command, &config).await
}

/// 2 for requests that can never succeed as given, 1 for everything else.
fn exit_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<OrchestratorError>() {
        Some(e) if e.is_user_error() => 2,
        _ => 1,
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = CliArgs::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(exit_code(&e))
        }
    }
}
