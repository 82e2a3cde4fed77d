use clap::Parser;
use codesearch::Error;
use codesearch::cli::{self, Cli};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("codesearch=info,warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();

    if let Err(err) = cli::run(cli).await {
        match err.downcast_ref::<Error>() {
            Some(e) => {
                eprintln!("error[{}]: {e}", e.kind());
                std::process::exit(e.exit_code());
            }
            None => {
                eprintln!("error: {err:#}");
                std::process::exit(1);
            }
        }
    }
}
