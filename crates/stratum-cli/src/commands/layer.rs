use super::{json_pretty, with_spinner, Tools, EXIT_SUCCESS};
use chrono::{DateTime, Utc};
use std::path::Path;
use stratum_core::{ControlData, Image};
use stratum_store::list_layer_entries;

pub fn add_layer(
    tools: &Tools,
    image: &Image,
    tag: &str,
    root: &Path,
    json: bool,
) -> Result<u8, String> {
    let (tagged, stats) = with_spinner(
        &format!("adding layer from {}", root.display()),
        "layer added",
        || tools.store().add_layer(image, tag, root),
    )?;

    if json {
        let payload = serde_json::json!({
            "image": tagged.image_name(),
            "files": stats.files,
            "dirs": stats.dirs,
            "symlinks": stats.symlinks,
            "skipped": stats.skipped,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!(
            "{}: {} entries added ({} skipped)",
            tagged.image_name(),
            stats.entries(),
            stats.skipped
        );
    }
    Ok(EXIT_SUCCESS)
}

pub fn control_data(
    tools: &Tools,
    image: &Image,
    name: &str,
    version: &str,
    created: Option<&str>,
    json: bool,
) -> Result<u8, String> {
    let created = match created {
        Some(s) => DateTime::parse_from_rfc3339(s)
            .map_err(|e| format!("invalid --created '{s}': {e}"))?
            .with_timezone(&Utc),
        None => Utc::now(),
    };
    let metadata = ControlData::new(name, version, created);
    tools
        .store()
        .set_control_data(image, &metadata)
        .map_err(|e| e.to_string())?;

    if json {
        println!("{}", json_pretty(&metadata)?);
    } else {
        println!(
            "{}: control data {name} {version} ({})",
            image.image_name(),
            metadata.created
        );
    }
    Ok(EXIT_SUCCESS)
}

pub fn inspect_layer(tar: &Path, json: bool) -> Result<u8, String> {
    let entries = list_layer_entries(tar).map_err(|e| format!("store error: {e}"))?;
    if json {
        let names: Vec<_> = entries.iter().map(|p| p.to_string_lossy()).collect();
        println!("{}", json_pretty(&names)?);
    } else {
        for entry in &entries {
            println!("{}", entry.display());
        }
    }
    Ok(EXIT_SUCCESS)
}
