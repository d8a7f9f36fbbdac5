use super::{exit_code, print_health, print_json, run_flow, verdict};
use galaxy_check_client::{Action, ActionParams, GalaxyService};

pub fn run(service: &mut GalaxyService, json: bool) -> Result<u8, String> {
    let outcome = run_flow(
        service,
        Action::Validate,
        &ActionParams::default(),
        json,
        "probing service…",
    );
    if json {
        return print_json(&outcome);
    }
    println!("{}", verdict(&outcome));
    print_health(&outcome);
    Ok(exit_code(&outcome))
}
