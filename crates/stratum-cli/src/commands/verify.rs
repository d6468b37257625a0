use super::{json_pretty, EXIT_LAYOUT_ERROR, EXIT_SUCCESS};
use std::path::Path;
use stratum_store::{verify_chain, OciLayout};

pub fn run(layout_dir: &Path, json: bool) -> Result<u8, String> {
    let layout = OciLayout::new(layout_dir);
    let report = verify_chain(&layout).map_err(|e| format!("store error: {e}"))?;

    if json {
        let failed: Vec<_> = report
            .failed
            .iter()
            .map(|f| serde_json::json!({"digest": f.digest, "reason": f.reason}))
            .collect();
        let payload = serde_json::json!({
            "layout": layout_dir,
            "checked": report.checked,
            "passed": report.passed,
            "failed": failed,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!(
            "digest chain: {}/{} objects passed",
            report.passed, report.checked
        );
        for f in &report.failed {
            println!("  FAIL {}: {}", f.digest, f.reason);
        }
    }

    if report.is_ok() {
        Ok(EXIT_SUCCESS)
    } else {
        Ok(EXIT_LAYOUT_ERROR)
    }
}
