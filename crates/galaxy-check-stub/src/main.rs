use clap::{Parser, ValueEnum};
use galaxy_check_stub::{HealthConfig, ImportBehaviour, Stub, StubConfig};
use std::process::ExitCode;
use tracing::{error, info};

#[derive(Clone, Copy, ValueEnum)]
enum ImportMode {
    Succeed,
    Fail,
    Never,
    Sync,
}

#[derive(Parser)]
#[command(
    name = "galaxy-check-stub",
    version,
    about = "In-memory Galaxy service for exercising galaxy-check"
)]
struct Cli {
    /// Port to listen on.
    #[arg(long, default_value_t = 8321)]
    port: u16,

    /// Address to bind.
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,

    #[arg(long, default_value = "admin")]
    username: String,

    #[arg(long, default_value = "admin")]
    password: String,

    #[arg(long, default_value = "api/galaxy")]
    api_prefix: String,

    /// How uploads are imported.
    #[arg(long, value_enum, default_value_t = ImportMode::Succeed)]
    import: ImportMode,

    /// Polls before an import finishes (succeed/fail modes).
    #[arg(long, default_value_t = 2)]
    import_polls: u32,

    /// Status code of the status endpoint.
    #[arg(long, default_value_t = 200)]
    status_code: u16,

    #[arg(long)]
    database_down: bool,

    #[arg(long)]
    redis_down: bool,

    /// Publish a collection at startup, as `namespace.name:version`. Repeatable.
    #[arg(long = "seed", value_name = "NS.NAME:VERSION")]
    seeds: Vec<String>,
}

fn parse_seed(seed: &str) -> Option<(&str, &str, &str)> {
    let (fqcn, version) = seed.split_once(':')?;
    let (namespace, name) = fqcn.split_once('.')?;
    if namespace.is_empty() || name.is_empty() || version.is_empty() {
        return None;
    }
    Some((namespace, name, version))
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("GALAXY_CHECK_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let import = match cli.import {
        ImportMode::Succeed => ImportBehaviour::SucceedAfter(cli.import_polls),
        ImportMode::Fail => ImportBehaviour::FailAfter(cli.import_polls),
        ImportMode::Never => ImportBehaviour::Never,
        ImportMode::Sync => ImportBehaviour::Synchronous,
    };
    let config = StubConfig {
        username: cli.username,
        password: cli.password,
        api_prefix: cli.api_prefix,
        health: HealthConfig {
            status: cli.status_code,
            database: !cli.database_down,
            redis: !cli.redis_down,
            ..HealthConfig::default()
        },
        import,
    };

    let stub = Stub::new(config);
    for seed in &cli.seeds {
        let Some((namespace, name, version)) = parse_seed(seed) else {
            error!("invalid --seed '{seed}', expected namespace.name:version");
            return ExitCode::from(2);
        };
        match galaxy_check_stub::build_archive(namespace, name, version) {
            Ok(data) => {
                info!("seeded {namespace}.{name} {version}");
                stub.seed_collection(namespace, name, version, data);
            }
            Err(e) => {
                error!("failed to build seed archive for {seed}: {e}");
                return ExitCode::FAILURE;
            }
        }
    }

    let addr = format!("{}:{}", cli.bind, cli.port);
    info!("starting galaxy-check-stub on {addr}");
    if let Err(e) = galaxy_check_stub::run_server(&stub, &addr) {
        error!("server error: {e}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
