use audit_config::{AppConfig, LoggingConfig};
use audit_core::{Worker, WorkerCommand};
use audit_nats_source::NatsEventSource;
use audit_postgres_sink::PostgresRecordSink;
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "audit-cli")]
#[command(about = "Audit event ingestion worker CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the ingestion worker until interrupted
    Run {
        /// Path to configuration directory
        #[arg(short, long, default_value = "config")]
        config_dir: String,
    },

    /// Validate configuration files
    Validate {
        /// Path to configuration directory
        #[arg(short, long, default_value = "config")]
        config_dir: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config_dir } => run(&config_dir).await,
        Commands::Validate { config_dir } => validate(&config_dir),
    }
}

async fn run(config_dir: &str) -> anyhow::Result<()> {
    let app_config = AppConfig::load(config_dir)?;
    init_tracing(&app_config.logging)?;

    info!(
        "Starting audit ingestion worker with config directory: {}",
        config_dir
    );

    let source = NatsEventSource::new(app_config.broker.clone());
    let sink = PostgresRecordSink::new(app_config.store.clone());

    let (control_tx, control_rx) = mpsc::channel(8);
    let worker = Worker::new(Box::new(source), Box::new(sink))
        .with_config(app_config.worker.to_worker_config())
        .with_control(control_rx);

    let mut handle = tokio::spawn(worker.run());

    // Wait for the worker or a shutdown signal
    tokio::select! {
        result = &mut handle => {
            match result? {
                Ok(()) => info!("Worker finished"),
                Err(e) => {
                    error!("Worker failed: {}", e);
                    return Err(e.into());
                }
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down audit worker...");
            let _ = control_tx.send(WorkerCommand::Stop).await;
            handle.await??;
        }
    }

    Ok(())
}

fn validate(config_dir: &str) -> anyhow::Result<()> {
    let config = AppConfig::load(config_dir)?;

    println!("✓ Configuration is valid");

    println!("\nBroker:");
    println!("  • servers: {:?}", config.broker.servers);
    println!(
        "  • stream: {} (subject '{}')",
        config.broker.stream, config.broker.subject
    );
    println!(
        "  • durable consumer: {} (prefetch {})",
        config.broker.durable_name, config.broker.prefetch
    );

    println!("\nStore:");
    println!("  • table: {}.{}", config.store.schema, config.store.table);
    println!("  • max connections: {}", config.store.max_connections);

    println!("\nWorker:");
    println!(
        "  • write timeout: {}s",
        config.worker.write_timeout_secs
    );

    Ok(())
}

fn init_tracing(config: &LoggingConfig) -> anyhow::Result<()> {
    let level = match config.level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    if config.json {
        let subscriber = FmtSubscriber::builder()
            .json()
            .with_max_level(level)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    Ok(())
}
