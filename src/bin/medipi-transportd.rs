use clap::Parser;
use medipi_transport::daemon;
use medipi_transport::error::Result;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "medipi-transportd")]
#[command(about = "MediPi transport daemon: business acknowledgements and download polling")]
struct Cli {
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    #[arg(long, default_value_t = 7979)]
    port: u16,

    #[arg(long, env = "MEDIPI_TRANSPORT_CONFIG")]
    config: Option<String>,

    #[arg(long, env = "MEDIPI_TRANSPORT_TOKEN", default_value = "")]
    token: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,medipi_transport=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    let cli = Cli::parse();

    daemon::run(&cli.host, cli.port, cli.config.as_deref(), &cli.token).await
}
