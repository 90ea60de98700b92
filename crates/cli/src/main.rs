use std::{path::PathBuf, sync::Arc};

use {
    clap::{Parser, Subcommand},
    tether_chat::{ChatProtocol, ChatServer},
    tether_config::TetherConfig,
    tether_gateway::{Server, SessionRegistry, server::bind},
    tether_protocol::MethodCatalog,
    tokio_util::sync::CancellationToken,
    tracing::{info, warn},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "tether", about = "tether RPC chat server", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file to load instead of the discovered one.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error). Defaults to the
    /// configured level.
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the chat server until Ctrl-C.
    Serve {
        #[arg(long)]
        bind: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Print both chat catalogs with method ids and signatures.
    Catalog,
    /// Print the effective configuration as TOML.
    Config,
}

fn load_config(cli: &Cli) -> anyhow::Result<TetherConfig> {
    match &cli.config {
        Some(path) => tether_config::load_config(path),
        None => Ok(tether_config::discover_and_load()),
    }
}

fn init_telemetry(cli: &Cli, config: &TetherConfig) {
    let level = cli.log_level.as_deref().unwrap_or(&config.logging.level);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if cli.json_logs || config.logging.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

async fn serve(mut config: TetherConfig, bind_addr: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    if let Some(bind_addr) = bind_addr {
        config.server.bind = bind_addr;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    let protocol = ChatProtocol::new()?;
    let registry = SessionRegistry::new();
    let handler = Arc::new(ChatServer::new(&protocol)?);
    let listener = bind(&config.server).await?;
    let server = Server::new(Arc::clone(&registry), handler, &config.server);

    let shutdown = CancellationToken::new();
    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl-C");
            return;
        }
        info!("Ctrl-C received, shutting down");
        ctrl_c.cancel();
    });

    server.run(listener, shutdown).await?;

    let stats = registry.stats();
    info!(
        sessions = stats.sessions,
        recv_bytes = stats.recv_bytes,
        sent_bytes = stats.sent_bytes,
        requests = stats.requests,
        replies = stats.replies,
        "server stopped"
    );
    Ok(())
}

fn print_catalog(catalog: &MethodCatalog) {
    println!("{}", catalog.role());
    for entry in catalog.entries() {
        println!("  {:>3}  {}{}", entry.id(), entry.name(), entry.signature());
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    init_telemetry(&cli, &config);

    info!(version = env!("CARGO_PKG_VERSION"), "tether starting");

    match cli.command {
        Commands::Serve { bind, port } => serve(config, bind, port).await,
        Commands::Catalog => {
            let protocol = ChatProtocol::new()?;
            print_catalog(&protocol.server);
            print_catalog(&protocol.client);
            Ok(())
        },
        Commands::Config => {
            print!("{}", tether_config::to_toml(&config)?);
            Ok(())
        },
    }
}
