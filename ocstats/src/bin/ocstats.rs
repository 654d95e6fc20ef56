use std::{
    fs,
    io::{self, Write},
    net::SocketAddr,
    path::PathBuf,
    sync::Arc,
};

use clap::{Args, Parser, Subcommand};
use jemallocator::Jemalloc;
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use ocstats::{
    aggregator::{self, Aggregator},
    classify::Scheme,
    compiler::{self, Compiler},
    config::{self, Config},
    httpd,
    store::{self, DirectoryStore, SnapshotStore},
};
use tokio::{runtime::Builder, signal};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, util::SubscriberInitExt};

#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

#[derive(thiserror::Error, Debug)]
enum Error {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("Failed to load ocstats config: {0}")]
    Config(#[from] config::Error),
    #[error("Compilation failed: {0}")]
    Compiler(#[from] compiler::Error),
    #[error("Snapshot store failed: {0}")]
    Store(#[from] store::Error),
    #[error(transparent)]
    Aggregator(#[from] aggregator::Error),
    #[error("HTTP server error: {0}")]
    Httpd(#[from] httpd::Error),
    #[error("Failed to install prometheus recorder: {0}")]
    Prometheus(#[from] BuildError),
    #[error("Refusing to overwrite {0}, pass --force to replace it")]
    OutputExists(PathBuf),
}

#[derive(Parser)]
#[clap(version, about, long_about = None)]
struct Cli {
    /// path on disk to the configuration file
    #[clap(long, global = true)]
    config_path: Option<PathBuf>,
    /// directory holding the monthly snapshots, overrides the configuration
    #[clap(long, global = true)]
    stats_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a month of canonical log rows into a snapshot
    Compile(CompileCommand),
    /// Answer a date token on standard output
    Query(QueryCommand),
    /// Serve date queries over HTTP
    Serve(ServeCommand),
    /// Validate configuration and exit
    ConfigCheck,
}

#[derive(Args)]
struct CompileCommand {
    /// rows to compile, plain, gzip or zstd; relative paths are taken from
    /// the log directory
    input: PathBuf,
    /// rows use the old path-prefix addressing scheme
    #[clap(long)]
    old: bool,
    /// write the snapshot here instead of the snapshot directory
    #[clap(long)]
    output: Option<PathBuf>,
    /// replace an existing snapshot for the same month
    #[clap(long)]
    force: bool,
}

#[derive(Args)]
struct QueryCommand {
    /// `last-month`, `YYYY-MM` or `YYYY-MM_YYYY-MM`
    token: String,
}

#[derive(Args)]
struct ServeCommand {
    /// address -- IP plus port -- to bind to, overrides the configuration
    #[clap(long)]
    binding_addr: Option<SocketAddr>,
}

fn load_config(cli: &Cli) -> Result<Config, Error> {
    let mut config = Config::load(cli.config_path.as_deref())?;
    if let Some(stats_dir) = &cli.stats_dir {
        config.stats_dir.clone_from(stats_dir);
    }
    Ok(config)
}

async fn compile(config: &Config, cmd: CompileCommand) -> Result<(), Error> {
    let scheme = if cmd.old { Scheme::Old } else { Scheme::New };
    let input = config.resolve_input(&cmd.input);
    info!("Compiling {} with the {scheme:?} addressing scheme", input.display());

    let compiler = Compiler::new(config.compiler_settings(scheme));
    let compilation = compiler.compile_path(&input).await?;
    compilation.log_summary();

    if let Some(output) = cmd.output {
        if !cmd.force && output.exists() {
            return Err(Error::OutputExists(output));
        }
        fs::write(&output, &compilation.text)?;
        info!("Snapshot for {} written to {}", compilation.period, output.display());
        return Ok(());
    }

    let store = DirectoryStore::new(&config.stats_dir);
    if cmd.force {
        store.replace(compilation.period, &compilation.text)?;
    } else {
        store.put(compilation.period, &compilation.text)?;
    }
    info!(
        "Snapshot for {} written to {}",
        compilation.period,
        store.path_of(compilation.period).display()
    );
    Ok(())
}

fn query(config: &Config, cmd: &QueryCommand) -> Result<(), Error> {
    let aggregator = Aggregator::new(DirectoryStore::new(&config.stats_dir));
    let text = aggregator.answer_token(&cmd.token)?;
    let mut stdout = io::stdout().lock();
    stdout.write_all(text.as_bytes())?;
    stdout.flush()?;
    Ok(())
}

async fn serve(config: Config, cmd: ServeCommand) -> Result<(), Error> {
    if let Some(addr) = config.telemetry.prometheus_addr {
        PrometheusBuilder::new().with_http_listener(addr).install()?;
        info!("Prometheus exporter listening on {addr}");
    }

    let mut http = config.http;
    if let Some(addr) = cmd.binding_addr {
        http.binding_addr = addr;
    }

    let aggregator = Arc::new(Aggregator::new(DirectoryStore::new(config.stats_dir)));
    let shutdown = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received ctrl-c, shutting down."),
            Err(e) => error!("Unable to listen for ctrl-c, shutting down: {e}"),
        }
    };
    httpd::serve(&http, aggregator, shutdown).await?;
    Ok(())
}

fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_ansi(false)
        .finish()
        .init();

    let cli = Cli::parse();
    let version = env!("CARGO_PKG_VERSION");
    info!("Starting ocstats {version}.");

    let config = load_config(&cli)?;
    match cli.command {
        Commands::ConfigCheck => {
            info!("Configuration is valid");
            Ok(())
        }
        Commands::Query(cmd) => query(&config, &cmd),
        Commands::Compile(cmd) => {
            let runtime = Builder::new_multi_thread()
                .enable_io()
                .enable_time()
                .build()?;
            runtime.block_on(compile(&config, cmd))
        }
        Commands::Serve(cmd) => {
            let runtime = Builder::new_multi_thread()
                .enable_io()
                .enable_time()
                .build()?;
            runtime.block_on(serve(config, cmd))
        }
    }
}
