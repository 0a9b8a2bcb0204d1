use clap::Parser;
use rift_mock::{LogReporter, MockFile, MockServer};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "rift-mock", version, about = "Standalone HTTP mock server")]
struct Args {
    /// Expectation file (YAML or JSON)
    #[arg(short, long, env = "RIFT_MOCK_CONFIG")]
    config: PathBuf,

    /// Override the listen host from the file
    #[arg(long, env = "RIFT_MOCK_HOST")]
    host: Option<String>,

    /// Override the listen port from the file
    #[arg(short, long, env = "RIFT_MOCK_PORT")]
    port: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    match run(args).await {
        Ok(0) => ExitCode::SUCCESS,
        Ok(failures) => {
            error!("Mock server finished with {} failure(s)", failures);
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<usize> {
    let file = MockFile::from_file(&args.config)?;
    let mut options = file.server_options()?;
    if let Some(host) = args.host {
        options = options.with_host(host);
    }
    if let Some(port) = args.port {
        options = options.with_port(port);
    }

    let reporter = Arc::new(LogReporter::new());
    let server = MockServer::try_start(options, reporter.clone()).await?;
    file.install(&server);
    info!(
        "Loaded {} every, {} expect and {} default expectation(s) from {}",
        file.every.len(),
        file.expect.len(),
        file.defaults.len(),
        args.config.display()
    );
    info!("Serving on {} (Ctrl-C to stop)", server.base_url());

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    server.verify();
    server.shutdown().await;
    Ok(reporter.failure_count())
}
