use super::{json_pretty, with_spinner, Tools, EXIT_SUCCESS};
use std::path::Path;
use stratum_core::Image;
use stratum_runtime::Locator;

pub fn to_daemon(tools: &Tools, image: &Image, tag: &str, json: bool) -> Result<u8, String> {
    with_spinner(
        &format!("exporting {}:{tag} to docker daemon", image.name()),
        "exported to docker daemon",
        || tools.store().export_to_daemon(image, tag),
    )?;
    if json {
        let payload = serde_json::json!({
            "image": format!("{}:{tag}", image.name()),
            "destination": format!("docker-daemon:{}:{tag}", image.name()),
        });
        println!("{}", json_pretty(&payload)?);
    }
    Ok(EXIT_SUCCESS)
}

pub fn to_archive(
    tools: &Tools,
    image: &Image,
    tag: &str,
    output: &Path,
    json: bool,
) -> Result<u8, String> {
    with_spinner(
        &format!("exporting {}:{tag} to {}", image.name(), output.display()),
        &format!("exported to OCI archive '{}'", output.display()),
        || tools.store().export_to_archive(image, tag, output),
    )?;
    if json {
        let payload = serde_json::json!({
            "image": format!("{}:{tag}", image.name()),
            "archive": output,
        });
        println!("{}", json_pretty(&payload)?);
    }
    Ok(EXIT_SUCCESS)
}

pub fn digest(tools: &Tools, locator: &str, json: bool) -> Result<u8, String> {
    let locator: Locator = locator.parse().map_err(|e| format!("{e}"))?;
    let bytes = tools.store().digest(&locator).map_err(|e| e.to_string())?;
    let hex = hex::encode(bytes);

    if json {
        let payload = serde_json::json!({
            "locator": locator.to_string(),
            "digest": hex,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("{hex}");
    }
    Ok(EXIT_SUCCESS)
}
