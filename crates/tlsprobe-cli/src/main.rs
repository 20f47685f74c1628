use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod padding_oracle;

/// TLS protocol testing tool.
#[derive(Parser)]
#[command(name = "tlsprobe")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Enable debug logging.
    #[arg(long, global = true)]
    debug: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a server for a CBC padding oracle.
    PaddingOracle {
        /// Host:port to connect to (default port 443).
        #[arg(long)]
        connect: String,
        /// Parallel connections.
        #[arg(long, default_value_t = 1)]
        threads: usize,
        /// Extra attempts per test vector after a failed one.
        #[arg(long, default_value_t = 3)]
        reexecutions: u32,
        /// Record generator: very-short, short, medium or long.
        #[arg(long, default_value = "short")]
        record_generator: String,
        /// Vector generator: classic, finished or close-notify.
        #[arg(long, default_value = "classic")]
        vector_generator: String,
        /// Cipher suite to test, as a hex code (e.g. 002F).
        #[arg(long)]
        suite: Option<String>,
        /// Use DTLS over UDP.
        #[arg(long)]
        dtls: bool,
        /// Print the bucketed responses as JSON.
        #[arg(long)]
        dump_responses: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let result = match &cli.command {
        Commands::PaddingOracle {
            connect,
            threads,
            reexecutions,
            record_generator,
            vector_generator,
            suite,
            dtls,
            dump_responses,
        } => padding_oracle::run(&padding_oracle::Options {
            connect,
            threads: *threads,
            reexecutions: *reexecutions,
            record_generator,
            vector_generator,
            suite: suite.as_deref(),
            dtls: *dtls,
            dump_responses: *dump_responses,
        }),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
