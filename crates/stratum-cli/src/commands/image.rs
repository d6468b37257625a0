use super::{json_pretty, with_spinner, Tools, EXIT_SUCCESS};
use std::path::Path;
use stratum_core::Image;

pub fn pull(
    tools: &Tools,
    image_name: &str,
    dir: &Path,
    arch: &str,
    variant: Option<&str>,
    json: bool,
) -> Result<u8, String> {
    let (image, source) = with_spinner(
        &format!("pulling {image_name}"),
        &format!("pulled {image_name}"),
        || tools.store().acquire(image_name, dir, arch, variant),
    )?;
    report_image(&image, Some(&source.to_string()), json)
}

pub fn new(
    tools: &Tools,
    image_name: &str,
    dir: &Path,
    arch: &str,
    variant: Option<&str>,
    json: bool,
) -> Result<u8, String> {
    let (image, source) = with_spinner(
        &format!("creating {image_name}"),
        &format!("created {image_name}"),
        || tools.store().create_new(image_name, dir, arch, variant),
    )?;
    report_image(&image, Some(&source.to_string()), json)
}

pub fn copy(
    tools: &Tools,
    image: &Image,
    new_name: &str,
    new_dir: &Path,
    json: bool,
) -> Result<u8, String> {
    let copied = tools
        .store()
        .duplicate(image, new_name, new_dir)
        .map_err(|e| e.to_string())?;
    report_image(&copied, None, json)
}

pub fn unpack(tools: &Tools, image: &Image, bundle_dir: &Path, json: bool) -> Result<u8, String> {
    let rootfs = with_spinner(
        &format!("unpacking {}", image.image_name()),
        &format!("unpacked {}", image.image_name()),
        || tools.store().unpack(image, bundle_dir),
    )?;
    if json {
        let payload = serde_json::json!({
            "image": image.image_name(),
            "rootfs": rootfs,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("{}", rootfs.display());
    }
    Ok(EXIT_SUCCESS)
}

fn report_image(image: &Image, source: Option<&str>, json: bool) -> Result<u8, String> {
    if json {
        let payload = serde_json::json!({
            "image": image.image_name(),
            "path": image.path(),
            "source": source,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("{}", image.image_path().display());
        if let Some(source) = source {
            println!("source: {source}");
        }
    }
    Ok(EXIT_SUCCESS)
}
