//! Map internal errors to operator-facing explanations.

use autoscale_device::DeviceError;

pub fn humanize(err: &eyre::Report) -> String {
    if let Some(de) = err.downcast_ref::<DeviceError>() {
        return match de {
            DeviceError::TareTimeout => {
                "What happened: The load cell produced no readings during tare.\nLikely causes: HX711 not wired or powered, or the data-ready line is stuck.\nHow to fix: Check DT/SCK wiring and supply voltage, then retry."
                    .to_string()
            }
            DeviceError::SettleTimeout(ms) => format!(
                "What happened: The platform never settled within {ms} ms.\nLikely causes: Vibration, drafts, or the mass still moving.\nHow to fix: Shield the scale, wait for the platform to stop, then retry."
            ),
            DeviceError::InvalidMass => {
                "What happened: Calibration mass must be a positive number of grams.\nHow to fix: Re-run with a real mass, e.g. `cal 500`.".to_string()
            }
            DeviceError::Upload(msg) => format!(
                "What happened: Event upload failed ({msg}).\nLikely causes: Server down, wrong URL, or wrong shared secret.\nHow to fix: Verify [transport] url/secret in the config and that the server is reachable."
            ),
            other => format!(
                "What happened: {other}.\nHow to fix: Re-run with --log-level=debug or set RUST_LOG for more detail."
            ),
        };
    }

    let msg = err.to_string();
    // search the whole cause chain, not just the outermost context
    let lower = err
        .chain()
        .map(|e| e.to_string().to_ascii_lowercase())
        .collect::<Vec<_>>()
        .join(" | ");

    if lower.contains("connection refused") || lower.contains("error sending request") {
        return "What happened: Could not reach the server.\nLikely causes: Wrong --url, server not running, or a firewall in the way.\nHow to fix: Start `autoscale serve` (or fix the URL), then retry.".to_string();
    }

    if lower.contains("parse config") || lower.contains("invalid configuration") {
        return format!(
            "What happened: The config file is invalid or incomplete.\nHow to fix: Fix the TOML ([capture], [calibration], [transport] tables) and retry.\nOriginal: {msg}"
        );
    }

    if lower.contains("read samples") || lower.contains("parse samples") {
        return format!(
            "What happened: Could not load the samples file.\nHow to fix: Pass --input pointing at a JSON array of {{\"t\", \"kg\"}} objects or a full wire payload.\nOriginal: {msg}"
        );
    }

    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}
