//! Service binary: load `.env`, read settings, wire the state, serve.

use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "atelier-serve", about = "Atelier control-plane HTTP server")]
struct Args {
    /// Listen address, e.g. 127.0.0.1:8000. Overrides HOST/PORT settings.
    #[arg(long)]
    addr: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    config::load_and_apply(None)?;
    let settings = config::Settings::from_env()?;
    let addr = format!("{}:{}", settings.host, settings.port);

    let args = Args::parse();
    let addr = args.addr.unwrap_or(addr);

    let state = serve::AppState::from_settings(settings)?;
    serve::run_serve(Some(&addr), state).await
}
