use anyhow::Result;
use clap::Parser;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;

use vigil::{ProcessingNode, VigilConfig};

#[derive(Parser, Debug)]
#[command(name = "vigil")]
#[command(about = "Queue-driven processing node for person tracking and aggression alerts")]
#[command(version)]
#[command(long_about = "Consumes camera frames from a message broker, tracks people through an \
external detect-and-track service, flags fast movement and close proximity, records incident \
clips with pre-event footage and publishes alerts to a durable queue.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "vigil.toml", help = "Path to TOML configuration file")]
    config: String,

    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    #[arg(long, help = "Validate configuration and exit without connecting")]
    validate_config: bool,

    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,

    /// Also write logs to a daily rolling file in this directory
    #[arg(long, value_name = "DIR")]
    log_dir: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        print_default_config()?;
        return Ok(());
    }

    let guard = init_logging(&args)?;

    info!("Starting vigil v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let config = match VigilConfig::load_from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            eprintln!("✗ Failed to load configuration: {}", e);
            exit(guard, 1);
        }
    };

    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {}", e);
        eprintln!("✗ Configuration validation failed: {}", e);
        exit(guard, 1);
    }

    if args.validate_config {
        println!("✓ Configuration is valid");
        return Ok(());
    }

    let mut node = match ProcessingNode::connect(config).await {
        Ok(node) => node,
        Err(e) => {
            error!(fatal = e.is_fatal(), "Failed to start processing node: {}", e);
            exit(guard, 1);
        }
    };

    let reason = node.run().await;
    let exit_code = node.shutdown(reason).await;

    exit(guard, exit_code);
}

/// Flush buffered log output, then exit with `code`
fn exit(guard: Option<WorkerGuard>, code: i32) -> ! {
    drop(guard);
    std::process::exit(code);
}

fn init_logging(args: &Args) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };

    // RUST_LOG takes precedence over the level flags
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("vigil={},lapin=warn", log_level)));

    let console = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_ids(args.debug)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer()
                .with_target(true)
                .with_thread_ids(args.debug)
                .with_file(args.debug)
                .with_line_number(args.debug)
                .boxed()
        }
    };

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = vec![console];
    let mut guard = None;

    if let Some(dir) = &args.log_dir {
        let appender = tracing_appender::rolling::daily(dir, "vigil.log");
        let (writer, file_guard) = tracing_appender::non_blocking(appender);
        layers.push(
            fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .boxed(),
        );
        guard = Some(file_guard);
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(env_filter)
        .init();

    Ok(guard)
}

/// Print default configuration in TOML format
fn print_default_config() -> Result<()> {
    println!("# Vigil Configuration File");
    println!("# Default configuration with all available options.");
    println!("# Environment overrides: VIGIL__<SECTION>__<KEY>, plus RABBITMQ_HOST,");
    println!("# RABBITMQ_PORT, RABBITMQ_TLS_HOST, CA_CERT, CLIENT_CERT, CLIENT_KEY, CAMERA_ID");
    println!();
    println!("{}", toml::to_string_pretty(&VigilConfig::default())?);
    Ok(())
}
