use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use medipi_transport::config::{Config, SettingsHandle};
use medipi_transport::daemon::build_registry;
use medipi_transport::domains::downloadable::DownloadType;
use medipi_transport::domains::envelope::Envelope;
use medipi_transport::error::{Result, TransportError};
use medipi_transport::handlers::message::LoggingHandler;
use medipi_transport::interfaces::reporting::ErrorReporter;
use medipi_transport::services::acknowledgement::AcknowledgementGenerator;
use medipi_transport::services::concentrator::ConcentratorClient;
use medipi_transport::services::notifications::LogReporter;
use medipi_transport::services::poller::{CredentialStore, DownloadPoller, PollCycleOutcome};

#[derive(Parser, Debug)]
#[command(name = "medipi-transport")]
#[command(about = "MediPi envelope acknowledgement and download polling tools")]
struct Cli {
    #[arg(long, env = "MEDIPI_TRANSPORT_CONFIG", default_value = "./medipi-transport.json")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Print the business acknowledgement for an inbound envelope (JSON).
    Ack {
        #[arg(long)]
        envelope: String,
    },
    /// Run a single download poll cycle.
    Poll {
        #[arg(long)]
        patient_id: Option<String>,

        /// Extra download types to accept and log without a dedicated handler.
        #[arg(long = "accept")]
        accept: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,medipi_transport=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();
    let config = Config::from_file(&cli.config)?;

    match cli.command {
        Commands::Ack { envelope } => run_ack(&config, &envelope),
        Commands::Poll { patient_id, accept } => run_poll(&config, patient_id, accept).await,
    }
}

fn run_ack(config: &Config, envelope_path: &str) -> Result<()> {
    let content = std::fs::read_to_string(envelope_path)
        .map_err(|e| TransportError::Runtime(format!("{envelope_path}: {e}")))?;
    let envelope: Envelope = serde_json::from_str(&content)
        .map_err(|e| TransportError::InvalidEnvelope(e.to_string()))?;
    let settings = SettingsHandle::new(config.acknowledgement.clone().unwrap_or_default());
    let ack = AcknowledgementGenerator::new(settings).acknowledge(&envelope)?;
    let out = serde_json::to_string_pretty(&ack)
        .map_err(|e| TransportError::Serialization(e.to_string()))?;
    println!("{out}");
    Ok(())
}

async fn run_poll(config: &Config, patient_id: Option<String>, accept: Vec<String>) -> Result<()> {
    let poller_config = config
        .poller
        .as_ref()
        .ok_or_else(|| TransportError::Config("poller section is missing".to_string()))?;
    let reporter: Arc<dyn ErrorReporter> = Arc::new(LogReporter);
    let registry = build_registry(Some(poller_config), reporter.clone()).await;
    for key in accept {
        registry
            .register(DownloadType::from(key.as_str()), Arc::new(LoggingHandler))
            .await;
    }

    let credentials = CredentialStore::new();
    if let Some(patient_id) = patient_id.or_else(|| poller_config.patient_id.clone()) {
        credentials.set_patient_id(patient_id);
    }
    let poller = DownloadPoller::new(
        poller_config.device_id()?,
        credentials,
        Arc::new(ConcentratorClient::from_config(poller_config)?),
        registry,
        reporter,
    );

    match poller.poll_once().await {
        PollCycleOutcome::Completed { items, failed } => {
            println!("poll complete: {items} item(s), {failed} failed");
        }
        PollCycleOutcome::Skipped(reason) => println!("poll skipped: {reason:?}"),
        PollCycleOutcome::Rejected { failure, body } => println!(
            "poll rejected: {} ({}) {body}",
            failure.status_code(),
            failure.describe()
        ),
        PollCycleOutcome::Errored(err) => println!("poll failed: {err}"),
    }
    Ok(())
}
