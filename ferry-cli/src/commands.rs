//! CLI command implementations

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::Subcommand;
use ferry_core::PeerLocation;
use ferry_core::config::{DirectoryConfig, FerryConfig, NodeConfig};
use ferry_core::directory::{DirectoryClient, HttpDirectoryClient};
use ferry_core::orchestrator::{FetchOutcome, SourceSelector, TransferOrchestrator};
use ferry_core::resolver::{CandidateSource, RemoteResolver};
use ferry_core::transfer::TcpTransferClient;

const DEFAULT_DIRECTORY_URL: &str = "http://127.0.0.1:9000";

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Run the directory service
    Directory {
        /// JSON file with `ip` and `port`
        #[arg(short, long, conflicts_with_all = ["host", "port"])]
        config: Option<PathBuf>,
        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        /// Port to bind to
        #[arg(short, long, default_value = "9000")]
        port: u16,
    },
    /// Run a storage node
    Node {
        /// JSON node configuration
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Download a file from the first node that has it
    Fetch {
        /// Name of the file to fetch
        #[arg(short, long)]
        file: String,
        /// Directory service to ask for candidates
        #[arg(long, default_value = DEFAULT_DIRECTORY_URL)]
        directory: String,
        /// Ask a node's resolver instead of the directory
        #[arg(long, requires = "peer")]
        use_peer: bool,
        /// Node whose resolver is asked with --use-peer
        #[arg(long)]
        peer: Option<String>,
        /// Where the file is saved as downloaded_<file>
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
    },
    /// Upload a local file to one node
    Push {
        /// Control-plane URL of the target node
        #[arg(long)]
        peer: String,
        /// Transfer port of the target node
        #[arg(long)]
        transfer_port: u16,
        /// Name to store the file under
        #[arg(short, long)]
        file: String,
        /// Local file to upload
        #[arg(long)]
        path: PathBuf,
    },
    /// Print the nodes holding a file
    Locate {
        /// Name of the file to locate
        #[arg(short, long)]
        file: String,
        /// Directory service to ask
        #[arg(long, default_value = DEFAULT_DIRECTORY_URL)]
        directory: String,
        /// Ask a node's resolver instead of the directory
        #[arg(long, requires = "peer")]
        use_peer: bool,
        /// Node whose resolver is asked with --use-peer
        #[arg(long)]
        peer: Option<String>,
    },
    /// List every node registered with the directory
    Peers {
        /// Directory service to ask
        #[arg(long, default_value = DEFAULT_DIRECTORY_URL)]
        directory: String,
    },
}

/// Handle the CLI command
///
/// # Errors
/// Returns the failure of the command that ran
pub async fn handle_command(command: Commands) -> anyhow::Result<()> {
    let config = FerryConfig::from_env();

    match command {
        Commands::Directory { config: path, host, port } => {
            let directory_config = match path {
                Some(path) => DirectoryConfig::from_file(&path)?,
                None => DirectoryConfig { ip: host, port },
            };
            run_directory(directory_config).await
        }
        Commands::Node { config: path } => run_node(NodeConfig::from_file(&path)?, config).await,
        Commands::Fetch {
            file,
            directory,
            use_peer,
            peer,
            output,
        } => {
            let source = peer.filter(|_| use_peer);
            fetch(&config, &file, &directory, source, output).await
        }
        Commands::Push {
            peer,
            transfer_port,
            file,
            path,
        } => push(&config, &peer, transfer_port, &file, path).await,
        Commands::Locate {
            file,
            directory,
            use_peer,
            peer,
        } => {
            let source = peer.filter(|_| use_peer);
            locate(&config, &file, &directory, source).await
        }
        Commands::Peers { directory } => list_peers(&config, &directory).await,
    }
}

/// Run the directory service until it fails
///
/// # Errors
/// - `WebError::Bind` - Address unavailable
pub async fn run_directory(config: DirectoryConfig) -> anyhow::Result<()> {
    println!("Ferry directory service on http://{}", config.bind_address());
    ferry_web::run_directory(config)
        .await
        .context("directory service stopped")
}

/// Run a storage node until it fails
///
/// # Errors
/// - `WebError` - Listener or storage setup failed
pub async fn run_node(node: NodeConfig, config: FerryConfig) -> anyhow::Result<()> {
    println!(
        "Ferry node {} on {} (transfer port {}), sharing {}",
        node.id,
        node.base_url(),
        node.transfer_port,
        node.shared_dir.display()
    );
    ferry_web::run_node(node, config)
        .await
        .context("node stopped")
}

/// Fetch a file via the directory or a node's resolver
///
/// # Errors
/// - `FerryError::Storage` - Invalid file name or download not saved
/// - No node delivered the file
pub async fn fetch(
    config: &FerryConfig,
    file: &str,
    directory_url: &str,
    peer: Option<String>,
    output: PathBuf,
) -> anyhow::Result<()> {
    let transfer = Arc::new(TcpTransferClient::new(config));
    let orchestrator = TransferOrchestrator::new(transfer, output);

    let (orchestrator, selector) = match peer {
        Some(peer) => {
            let resolver = RemoteResolver::new(peer, &config.network)?;
            (
                orchestrator.with_discovery(Arc::new(resolver)),
                SourceSelector::PeerDiscovery,
            )
        }
        None => {
            let directory = HttpDirectoryClient::new(directory_url, &config.network)?;
            (
                orchestrator.with_directory(Arc::new(directory)),
                SourceSelector::Directory,
            )
        }
    };

    match orchestrator.fetch_file(file, selector).await? {
        FetchOutcome::Downloaded {
            source,
            path,
            bytes,
        } => {
            println!(
                "Downloaded {} ({} bytes) from {} to {}",
                file,
                bytes,
                source.endpoint,
                path.display()
            );
            Ok(())
        }
        FetchOutcome::NotFound => bail!("no node holds {file}"),
        FetchOutcome::AllCandidatesFailed { attempts } => {
            for attempt in &attempts {
                println!("  {} -> {}", attempt.location.endpoint, attempt.reason);
            }
            bail!("all {} candidates for {file} failed", attempts.len())
        }
    }
}

/// Upload a local file to one node
///
/// # Errors
/// - `FerryError::Storage` - Local file unreadable
/// - The node refused the upload
pub async fn push(
    config: &FerryConfig,
    peer: &str,
    transfer_port: u16,
    file: &str,
    path: PathBuf,
) -> anyhow::Result<()> {
    let target = PeerLocation::new(peer, transfer_port)
        .transfer_address()
        .with_context(|| format!("invalid peer URL {peer}"))?;
    let orchestrator = TransferOrchestrator::new(Arc::new(TcpTransferClient::new(config)), ".");

    let response = orchestrator.push_file(&target, file, &path).await?;
    if !response.ok {
        bail!("upload to {target} failed: {}", response.message);
    }
    println!("{}", response.message);
    Ok(())
}

/// Print the candidates for a file
///
/// # Errors
/// - `ClientError` - Directory or node unreachable
pub async fn locate(
    config: &FerryConfig,
    file: &str,
    directory_url: &str,
    peer: Option<String>,
) -> anyhow::Result<()> {
    let candidates = match peer {
        Some(peer) => RemoteResolver::new(peer, &config.network)?.candidates(file).await?,
        None => {
            HttpDirectoryClient::new(directory_url, &config.network)?
                .locate(file)
                .await?
        }
    };

    if candidates.is_empty() {
        println!("No node holds {file}");
    }
    for candidate in candidates {
        println!("{} (transfer port {})", candidate.endpoint, candidate.transfer_port);
    }
    Ok(())
}

/// List registered nodes
///
/// # Errors
/// - `ClientError` - Directory unreachable
pub async fn list_peers(config: &FerryConfig, directory_url: &str) -> anyhow::Result<()> {
    let peers = HttpDirectoryClient::new(directory_url, &config.network)?
        .peers()
        .await?;

    println!("Registered nodes");
    println!("{:-<60}", "");
    if peers.is_empty() {
        println!("No nodes registered yet.");
    }
    for peer in peers {
        println!(
            "{} (transfer port {}, {} files, registered {})",
            peer.rest,
            peer.transfer_port,
            peer.files.len(),
            peer.registered_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
        for file in peer.files {
            println!("  {file}");
        }
    }
    Ok(())
}
