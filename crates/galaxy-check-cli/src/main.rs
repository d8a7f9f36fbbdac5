mod commands;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use commands::{EndpointArgs, EXIT_CONFIG_ERROR, EXIT_FAILURE};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "galaxy-check",
    version,
    about = "Certify a Galaxy service: health, authentication, upload, import and download"
)]
struct Cli {
    /// Base URL of the Galaxy service.
    #[arg(long, env = "GALAXY_URL", global = true)]
    url: Option<String>,

    #[arg(long, env = "GALAXY_USERNAME", global = true)]
    username: Option<String>,

    #[arg(long, env = "GALAXY_PASSWORD", hide_env_values = true, global = true)]
    password: Option<String>,

    /// API path prefix below the base URL [default: api/galaxy].
    #[arg(long, env = "GALAXY_API_PATH_PREFIX", global = true)]
    api_prefix: Option<String>,

    /// Skip TLS certificate validation.
    #[arg(long, default_value_t = false, global = true)]
    insecure: bool,

    /// Seconds to wait for an import task to finish.
    #[arg(long, env = "GALAXY_WAIT_TIMEOUT", default_value_t = 120, global = true)]
    wait_timeout: u64,

    /// JSON endpoint file [default: ~/.config/galaxy-check/endpoint.json, if present].
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Probe service health and database connectivity.
    Validate,
    /// Upload a collection archive, or a freshly packaged test collection.
    Upload {
        /// Existing `.tar.gz` collection archive to upload.
        #[arg(long)]
        src: Option<PathBuf>,
    },
    /// Download a collection version.
    Download {
        /// Collection as `namespace.name`.
        name: String,
        /// Version to fetch; defaults to the first one the service lists.
        #[arg(long)]
        version: Option<String>,
        /// Where to save the archive.
        #[arg(long)]
        dest: Option<PathBuf>,
    },
    /// Full certification: health, then upload and import of a test collection.
    Test,
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("GALAXY_CHECK_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    let args = EndpointArgs {
        url: cli.url.as_deref(),
        username: cli.username.as_deref(),
        password: cli.password.as_deref(),
        api_prefix: cli.api_prefix.as_deref(),
        insecure: cli.insecure,
        config: cli.config.as_deref(),
    };
    let connect = || commands::connect(&args, cli.wait_timeout);
    let json = cli.json;

    let result = match cli.command {
        Commands::Validate => connect().and_then(|mut svc| commands::validate::run(&mut svc, json)),
        Commands::Upload { ref src } => {
            connect().and_then(|mut svc| commands::upload::run(&mut svc, src.clone(), json))
        }
        Commands::Download {
            ref name,
            ref version,
            ref dest,
        } => connect().and_then(|mut svc| {
            commands::download::run(&mut svc, name, version.as_deref(), dest.clone(), json)
        }),
        Commands::Test => connect().and_then(|mut svc| commands::certify::run(&mut svc, json)),
        Commands::Completions { shell } => commands::completions::run::<Cli>(shell),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            let code = if msg.starts_with("config error:") {
                EXIT_CONFIG_ERROR
            } else {
                EXIT_FAILURE
            };
            ExitCode::from(code)
        }
    }
}
