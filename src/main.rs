use clap::{Parser, Subcommand};
use std::error::Error;
use std::time::Duration;

use talon::{Config, DEFAULT_RELAY_ADDR, DEFAULT_RELAY_PORT, INTERACTIVE_TIMEOUT_SECS};

#[derive(Parser)]
#[command(name = "talon")]
#[command(about = "Encrypted file handoff through an untrusted relay", long_about = None)]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Relay server address (host:port)
    #[arg(long, global = true)]
    relay: Option<String>,

    /// Deadline in seconds for each blocking receive
    #[arg(long, global = true)]
    timeout: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a file
    Send {
        /// Path to the file to send
        file_path: String,

        /// Use a persistent room with a shareable room id
        #[arg(short, long)]
        persistent: bool,

        /// Hours before a persistent room expires (-1 keeps it forever)
        #[arg(long, default_value_t = 24)]
        ttl_hours: i64,
    },
    /// Receive a file by code phrase, or by room id with --code
    Receive {
        /// Code phrase (ephemeral) or room id (persistent)
        identifier: String,

        /// Code phrase when joining a persistent room by id
        #[arg(long)]
        code: Option<String>,

        /// Directory to store the received file
        #[arg(short, long, default_value = ".")]
        output: String,
    },
    /// Run a relay server
    Relay {
        /// Port to bind to
        #[arg(short, long, default_value_t = DEFAULT_RELAY_PORT)]
        port: u16,
    },
    /// Print a received file wrapped with untrusted-content markers
    Read {
        /// Path to the file
        path: String,

        /// Emit the structured tagged form instead of the banner layout
        #[arg(long)]
        tagged: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    // Configure logging based on verbose flag
    if cli.verbose {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Debug)
            .init();
        log::info!("Verbose logging enabled");
    } else {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Info)
            .init();
    }

    let config = Config {
        relay_addr: cli.relay.unwrap_or_else(|| DEFAULT_RELAY_ADDR.to_string()),
        timeout: Duration::from_secs(cli.timeout.unwrap_or(INTERACTIVE_TIMEOUT_SECS)),
    };

    match cli.command {
        Commands::Send {
            file_path,
            persistent,
            ttl_hours,
        } => {
            talon::commands::send::run(&file_path, persistent, ttl_hours, config).await?;
        }
        Commands::Receive {
            identifier,
            code,
            output,
        } => {
            talon::commands::receive::run(&identifier, code, &output, config).await?;
        }
        Commands::Relay { port } => {
            talon::commands::relay::run(port).await?;
        }
        Commands::Read { path, tagged } => {
            talon::commands::read::run(&path, tagged)?;
        }
    }

    Ok(())
}
