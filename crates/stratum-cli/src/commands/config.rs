use super::{json_pretty, Tools, EXIT_SUCCESS};
use stratum_core::Image;
use stratum_store::inject_architecture_variant;

/// Which whole-field replacement to apply.
pub enum FieldUpdate<'a> {
    Entrypoint(&'a [String]),
    Cmd(&'a [String]),
    Env(&'a [(String, String)]),
    Annotations(&'a [(String, String)]),
}

impl FieldUpdate<'_> {
    fn name(&self) -> &'static str {
        match self {
            FieldUpdate::Entrypoint(_) => "entrypoint",
            FieldUpdate::Cmd(_) => "cmd",
            FieldUpdate::Env(_) => "env",
            FieldUpdate::Annotations(_) => "annotations",
        }
    }

    fn len(&self) -> usize {
        match self {
            FieldUpdate::Entrypoint(v) | FieldUpdate::Cmd(v) => v.len(),
            FieldUpdate::Env(v) | FieldUpdate::Annotations(v) => v.len(),
        }
    }
}

pub fn set_field(
    tools: &Tools,
    image: &Image,
    update: &FieldUpdate<'_>,
    json: bool,
) -> Result<u8, String> {
    let store = tools.store();
    match update {
        FieldUpdate::Entrypoint(values) => store.set_entrypoint(image, values),
        FieldUpdate::Cmd(values) => store.set_cmd(image, values),
        FieldUpdate::Env(pairs) => store.set_env(image, pairs),
        FieldUpdate::Annotations(pairs) => store.set_annotations(image, pairs),
    }
    .map_err(|e| e.to_string())?;

    if json {
        let payload = serde_json::json!({
            "image": image.image_name(),
            "field": update.name(),
            "values": update.len(),
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!(
            "{}: replaced {} ({} values)",
            image.image_name(),
            update.name(),
            update.len()
        );
    }
    Ok(EXIT_SUCCESS)
}

pub fn set_variant(image: &Image, variant: &str, json: bool) -> Result<u8, String> {
    let update =
        inject_architecture_variant(&image.layout(), variant).map_err(|e| format!("store error: {e}"))?;

    if json {
        let payload = serde_json::json!({
            "image": image.image_name(),
            "variant": variant,
            "config": update.config.digest,
            "manifest": update.manifest.digest,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("variant {variant} set on {}", image.image_name());
        println!("  config   {}", update.config.digest);
        println!("  manifest {}", update.manifest.digest);
    }
    Ok(EXIT_SUCCESS)
}
