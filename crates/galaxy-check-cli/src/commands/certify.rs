use super::upload::print_upload;
use super::{exit_code, print_health, print_json, run_flow, verdict};
use galaxy_check_client::{Action, ActionParams, GalaxyService};

pub fn run(service: &mut GalaxyService, json: bool) -> Result<u8, String> {
    let outcome = run_flow(
        service,
        Action::Test,
        &ActionParams::default(),
        json,
        "certifying service…",
    );
    if json {
        return print_json(&outcome);
    }
    println!("{}", verdict(&outcome));
    print_health(&outcome);
    if let Some(result) = &outcome.upload_result {
        print_upload(result);
    }
    Ok(exit_code(&outcome))
}
