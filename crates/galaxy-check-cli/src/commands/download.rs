use super::{exit_code, print_json, run_flow, verdict};
use galaxy_check_client::{Action, ActionParams, GalaxyService};
use std::path::PathBuf;

pub fn run(
    service: &mut GalaxyService,
    name: &str,
    version: Option<&str>,
    dest: Option<PathBuf>,
    json: bool,
) -> Result<u8, String> {
    let params = ActionParams {
        collection_name: Some(name.to_owned()),
        collection_version: version.map(str::to_owned),
        dest,
        ..ActionParams::default()
    };
    let outcome = run_flow(
        service,
        Action::Download,
        &params,
        json,
        &format!("downloading {name}…"),
    );
    if json {
        return print_json(&outcome);
    }

    println!("{}", verdict(&outcome));
    if let Some(result) = outcome.download_result.as_ref().filter(|r| r.downloaded) {
        if let (Some(path), Some(version)) = (&result.path, &result.version) {
            println!("  version:     {version}");
            println!(
                "  saved to:    {} ({} bytes)",
                path.display(),
                result.bytes.unwrap_or(0)
            );
        }
    }
    Ok(exit_code(&outcome))
}
