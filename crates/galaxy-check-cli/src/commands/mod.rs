pub mod certify;
pub mod completions;
pub mod download;
pub mod upload;
pub mod validate;

use console::Style;
use galaxy_check_client::config::{default_config_path, DEFAULT_API_PREFIX};
use galaxy_check_client::{
    Action, ActionParams, GalaxyService, Outcome, PollSettings, ServiceEndpoint,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_CONFIG_ERROR: u8 = 2;

/// Endpoint values from flags and environment, before merging with the file.
#[derive(Debug, Default)]
pub struct EndpointArgs<'a> {
    pub url: Option<&'a str>,
    pub username: Option<&'a str>,
    pub password: Option<&'a str>,
    pub api_prefix: Option<&'a str>,
    pub insecure: bool,
    pub config: Option<&'a Path>,
}

fn load_file(args: &EndpointArgs<'_>) -> Result<Option<ServiceEndpoint>, String> {
    let path = match args.config {
        Some(path) => path.to_path_buf(),
        None => match default_config_path() {
            Ok(path) if path.exists() => path,
            _ => return Ok(None),
        },
    };
    ServiceEndpoint::load(&path)
        .map(Some)
        .map_err(|e| format!("config error: cannot load {}: {e}", path.display()))
}

/// Merge flags over the endpoint file. Flags win field by field.
pub fn resolve_endpoint(args: &EndpointArgs<'_>) -> Result<ServiceEndpoint, String> {
    let file = load_file(args)?;
    let pick = |flag: Option<&str>, stored: Option<&str>, what: &str| {
        flag.or(stored)
            .map(str::to_owned)
            .ok_or_else(|| format!("config error: {what} is required"))
    };

    let url = pick(
        args.url,
        file.as_ref().map(|f| f.url.as_str()),
        "--url (or GALAXY_URL)",
    )?;
    let username = pick(
        args.username,
        file.as_ref().map(|f| f.username.as_str()),
        "--username (or GALAXY_USERNAME)",
    )?;
    let password = pick(
        args.password,
        file.as_ref().map(|f| f.password.as_str()),
        "--password (or GALAXY_PASSWORD)",
    )?;
    let api_prefix = args
        .api_prefix
        .or(file.as_ref().map(|f| f.api_prefix.as_str()))
        .unwrap_or(DEFAULT_API_PREFIX);
    let validate_certs = !args.insecure && file.as_ref().map_or(true, |f| f.validate_certs);

    let endpoint = ServiceEndpoint::new(&url, &username, &password)
        .with_api_prefix(api_prefix)
        .with_validate_certs(validate_certs);
    endpoint.validate().map_err(|e| e.to_string())?;
    Ok(endpoint)
}

pub fn connect(args: &EndpointArgs<'_>, wait_timeout: u64) -> Result<GalaxyService, String> {
    let endpoint = resolve_endpoint(args)?;
    tracing::debug!("using endpoint {endpoint:?}");
    Ok(GalaxyService::connect(
        &endpoint,
        PollSettings::with_timeout_secs(wait_timeout),
    ))
}

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .expect("valid template")
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

/// `✓ msg` or `✗ msg`, coloured when stdout is a terminal.
pub fn verdict(outcome: &Outcome) -> String {
    if outcome.ok {
        format!("{} {}", Style::new().green().apply_to("✓"), outcome.msg)
    } else {
        format!("{} {}", Style::new().red().apply_to("✗"), outcome.msg)
    }
}

pub fn colorize_import(state: &str) -> String {
    match state {
        "success" => Style::new().green().apply_to(state).to_string(),
        "failed" => Style::new().red().bold().apply_to(state).to_string(),
        "timeout" => Style::new().yellow().apply_to(state).to_string(),
        "unknown" => Style::new().dim().apply_to(state).to_string(),
        other => other.to_owned(),
    }
}

fn connected(flag: Option<bool>) -> &'static str {
    match flag {
        Some(true) => "connected",
        Some(false) => "not connected",
        None => "unknown",
    }
}

pub fn format_components(components: &BTreeMap<String, String>) -> String {
    if components.is_empty() {
        return "none reported".to_owned();
    }
    components
        .iter()
        .map(|(name, version)| format!("{name} {version}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Health lines shared by `validate` and `test`. Skipped when auth failed.
pub fn print_health(outcome: &Outcome) {
    let Some(status) = outcome.api_status else {
        return;
    };
    let components = outcome.components.clone().unwrap_or_default();
    println!("  api status:  {status}");
    println!("  database:    {}", connected(outcome.database_connected));
    println!("  redis:       {}", connected(outcome.redis_connected));
    println!("  components:  {}", format_components(&components));
    if let Some(count) = outcome.collections_count {
        println!("  collections: {count}");
    }
}

/// Run one flow behind a spinner (human mode only).
pub fn run_flow(
    service: &mut GalaxyService,
    action: Action,
    params: &ActionParams,
    json: bool,
    progress: &str,
) -> Outcome {
    let pb = (!json).then(|| spinner(progress));
    let outcome = service.run(action, params);
    if let Some(pb) = pb {
        pb.finish_and_clear();
    }
    outcome
}

pub fn exit_code(outcome: &Outcome) -> u8 {
    if outcome.ok {
        EXIT_SUCCESS
    } else {
        EXIT_FAILURE
    }
}

/// `--json` output: the whole outcome.
pub fn print_json(outcome: &Outcome) -> Result<u8, String> {
    println!("{}", json_pretty(outcome)?);
    Ok(exit_code(outcome))
}
