use super::{colorize_import, exit_code, print_json, run_flow, verdict};
use galaxy_check_client::{Action, ActionParams, GalaxyService, UploadResult};
use std::path::PathBuf;

pub fn print_upload(result: &UploadResult) {
    println!("  collection:  {}", result.collection);
    if let Some(task) = &result.task_id {
        println!("  task:        {task}");
    }
    println!(
        "  import:      {}",
        colorize_import(result.import_status_str())
    );
    println!(
        "  artifact:    {} bytes, blake3 {}",
        result.bytes,
        &result.blake3[..result.blake3.len().min(16)]
    );
}

pub fn run(service: &mut GalaxyService, src: Option<PathBuf>, json: bool) -> Result<u8, String> {
    let progress = if src.is_some() {
        "uploading collection…"
    } else {
        "packaging and uploading test collection…"
    };
    let params = ActionParams {
        src,
        ..ActionParams::default()
    };
    let outcome = run_flow(service, Action::Upload, &params, json, progress);
    if json {
        return print_json(&outcome);
    }
    println!("{}", verdict(&outcome));
    if let Some(result) = &outcome.upload_result {
        print_upload(result);
    }
    Ok(exit_code(&outcome))
}
