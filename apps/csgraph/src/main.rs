//! # csgraph
//!
//! The binary for the csgraph document graph.
//!
//! ## Usage
//!
//! ```bash
//! # Upload a set as draft, then publish it
//! csgraph upload --draft lxcat-set.json
//! csgraph publish 1042
//!
//! # Revise a published set
//! csgraph update 1042 revised.json -m "fix threshold"
//!
//! # Public search
//! csgraph search --species Ar --tag Ionization
//! ```

use clap::Parser;
use csgraph::cli::{self, Cli, Context};
use csgraph::config::{Config, LogFormat};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    let cli = Cli::parse();

    let config = match Config::discover(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(2);
        }
    };

    init_tracing(&cli, config.log_format);

    let ctx = Context::new(&cli, config);
    if let Err(e) = cli::execute(cli.command, &ctx) {
        if ctx.json {
            println!("{}", serde_json::json!({ "error": e.to_string() }));
        }
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}

/// CSGRAPH_LOG_FORMAT=json (or `log_format = "json"`) enables machine-parseable output.
fn init_tracing(cli: &Cli, configured: Option<LogFormat>) {
    let json = match std::env::var("CSGRAPH_LOG_FORMAT") {
        Ok(format) => format == "json",
        Err(_) => configured == Some(LogFormat::Json),
    };

    let default_filter = if cli.verbose {
        "csgraph=debug,csgraph_core=debug"
    } else if cli.quiet {
        "csgraph=warn,csgraph_core=warn"
    } else {
        "csgraph=info,csgraph_core=info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    // Logs go to stderr so that stdout stays parseable.
    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
