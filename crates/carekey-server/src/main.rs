use std::path::PathBuf;

use carekey_server::ServerBuilder;
use carekey_server::config::loader::load_config;
use clap::Parser;

/// CareKey identity and authorization server.
#[derive(Debug, Parser)]
#[command(name = "carekey-server", version, about)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, env = "CAREKEY_CONFIG", default_value = "carekey.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    // Load .env before anything reads the environment.
    if let Err(e) = dotenvy::dotenv()
        && !matches!(e, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound)
    {
        eprintln!("Warning: Failed to load .env file: {e}");
    }

    carekey_server::observability::init_tracing();

    let cli = Cli::parse();

    let cfg = match load_config(Some(cli.config.as_path())) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(2);
        }
    };

    tracing::info!(path = %cli.config.display(), "Configuration loaded");
    carekey_server::observability::apply_logging_level(&cfg.logging.level);

    let server = match ServerBuilder::new().with_config(cfg).build().await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Server initialization failed: {e:#}");
            std::process::exit(2);
        }
    };

    if let Err(err) = server.run().await {
        eprintln!("Server error: {err:#}");
        std::process::exit(1);
    }
}
