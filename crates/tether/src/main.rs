mod cli;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tether_core::kernel::constants::DEFAULT_CONFIG_FILE;
use tracing_subscriber::EnvFilter;

/// Tether: a plugin host with dependency-aware lifecycle management
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    /// Print "pong" and exit
    #[arg(long)]
    ping: bool,

    /// Host configuration file (JSON, TOML or YAML)
    #[arg(long, short, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List the plugin descriptors found in the metadata directory
    Scan,
    /// Validate a descriptor file and check it against the framework version
    Check {
        /// Path to a plugin descriptor (.json)
        descriptor: PathBuf,
    },
    /// Print the dependency order of the given plugins (all if none given)
    Order {
        ids: Vec<String>,
    },
    /// Activate plugins (and their dependencies), then report their states
    Activate {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Activate a plugin and run one of its commands
    Run {
        /// Plugin id
        id: String,
        /// Command name
        command: String,
        /// Command parameter as key=value; values are read as JSON when possible
        #[arg(short = 'p', long = "param", value_parser = cli::parse_param)]
        params: Vec<(String, serde_json::Value)>,
    },
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_ok() {
        // tether-core logs through the `log` facade
        if let Err(e) = tracing_log::LogTracer::init() {
            eprintln!("Failed to bridge log records: {}", e);
        }
    }
}

fn main() -> ExitCode {
    let args = CliArgs::parse();

    if args.ping {
        println!("pong");
        return ExitCode::SUCCESS;
    }

    init_logging(&args.log_level);

    let config = match cli::load_config(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = match args.command {
        None => cli::status(&config),
        Some(Commands::Scan) => cli::scan(config),
        Some(Commands::Check { descriptor }) => cli::check(&config, &descriptor),
        Some(Commands::Order { ids }) => cli::order(config, &ids),
        Some(Commands::Activate { ids }) => cli::activate(config, &ids),
        Some(Commands::Run { id, command, params }) => cli::run(config, &id, &command, params),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
