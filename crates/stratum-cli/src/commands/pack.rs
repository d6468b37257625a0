use super::{json_pretty, spin_fail, spin_ok, spinner, Tools, EXIT_SUCCESS};
use stratum_core::{pack, PackOptions};

pub fn run(tools: &Tools, opts: &PackOptions, json: bool) -> Result<u8, String> {
    let target = format!("{}:{}", opts.name, opts.version);
    let pb = spinner(&format!("packing {target} on {}", opts.base));
    let result = match pack(&tools.store(), opts) {
        Ok(r) => {
            spin_ok(&pb, &format!("packed {target}"));
            r
        }
        Err(e) => {
            spin_fail(&pb, &format!("packing {target} failed"));
            return Err(e.to_string());
        }
    };

    if json {
        println!("{}", json_pretty(&result)?);
    } else {
        println!("archive:     {}", result.archive.display());
        println!("image:       {}", result.image);
        println!("base digest: {}", result.base_digest);
        println!("created:     {}", result.created);
    }
    Ok(EXIT_SUCCESS)
}
