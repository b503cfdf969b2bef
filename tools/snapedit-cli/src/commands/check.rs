//! Check system capabilities.

use std::process::{Command, Stdio};

use snapedit_common::config::{config_file_path, AppConfig};
use snapedit_inference::{default_backend, DirectoryModelStore, ModelStore};
use snapedit_render_engine::FfmpegEncoder;

fn tool_available(name: &str) -> bool {
    Command::new(name)
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

pub fn run(config: &AppConfig) -> anyhow::Result<()> {
    println!("SnapEdit System Check");
    println!("{}", "=".repeat(50));

    let config_path = config_file_path();
    if config_path.exists() {
        println!("[OK] Config: {}", config_path.display());
    } else {
        println!("[--] Config: defaults ({} not found)", config_path.display());
    }
    if let Err(e) = config.pipeline.validate() {
        println!("[FAIL] Pipeline config: {e}");
    }

    let ffmpeg = FfmpegEncoder::is_available();
    let ffprobe = tool_available("ffprobe");
    println!(
        "[{}] ffmpeg (video decode/encode)",
        if ffmpeg { "OK" } else { "MISSING" }
    );
    println!(
        "[{}] ffprobe (video probing)",
        if ffprobe { "OK" } else { "MISSING" }
    );

    let backend = default_backend();
    let runtime_ok = backend.name() != "unavailable";
    println!(
        "[{}] Inference backend: {}",
        if runtime_ok { "OK" } else { "WARN" },
        backend.name()
    );

    let store = DirectoryModelStore::new(&config.models_dir);
    let models = store.list()?;
    println!(
        "[{}] Models: {} in {}",
        if models.is_empty() { "WARN" } else { "OK" },
        models.len(),
        config.models_dir.display()
    );

    println!();
    if ffmpeg && ffprobe {
        println!("Photo and video editing are available.");
    } else {
        println!("Photo editing is available; install ffmpeg for video.");
    }
    if !runtime_ok || models.is_empty() {
        println!("Edits that need a model (backgrounds, pixelation) are unavailable.");
    }
    Ok(())
}
