mod cli;

use clap::{Parser, Subcommand};
use hostpool_core::logging::{LogFormat, init_logging};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "hostpool",
    version,
    about = "Hostpool: pooled HTTP/1.1 client"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch URLs through one pool per destination, printing a JSON line per result
    Fetch {
        /// HCL settings file with a `pool { ... }` block
        #[arg(long)]
        config: Option<PathBuf>,

        /// Override `max_connections`
        #[arg(long)]
        max_connections: Option<usize>,

        /// Override `pipelining_limit`
        #[arg(long)]
        pipelining_limit: Option<usize>,

        /// Log output on stderr: `json` or `compact`
        #[arg(long, default_value_t = LogFormat::Json)]
        log_format: LogFormat,

        #[arg(required = true)]
        urls: Vec<String>,
    },

    /// Validate a settings file and exit
    CheckConfig {
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Fetch {
            config,
            max_connections,
            pipelining_limit,
            log_format,
            urls,
        } => {
            init_logging(log_format);

            cli::fetch::run(cli::fetch::FetchArgs {
                config,
                max_connections,
                pipelining_limit,
                urls,
            })
            .await
        }

        Command::CheckConfig { path } => cli::check::run(&path),
    }
}
