//! Show stream properties of an input.

use std::path::PathBuf;

use snapedit_frame_source::probe_asset;

pub fn run(input: PathBuf, json: bool) -> anyhow::Result<()> {
    let asset = probe_asset(&input)
        .map_err(|e| anyhow::anyhow!("Failed to probe {}: {e}", input.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&asset)?);
        return Ok(());
    }

    println!("Asset: {}", asset.path.display());
    println!("  Kind: {:?}", asset.kind);
    println!("  Resolution: {}x{}", asset.width, asset.height);
    if !asset.is_image() {
        println!("  Frame rate: {:.3} fps", asset.fps);
        println!("  Duration: {:.2}s", asset.duration_secs);
        println!("  Frames (estimated): {}", asset.frame_count);
        println!("  Audio: {}", if asset.has_audio { "yes" } else { "no" });
    }
    Ok(())
}
