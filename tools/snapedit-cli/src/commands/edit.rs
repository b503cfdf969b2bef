//! Run one edit job and follow its progress.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use snapedit_common::config::AppConfig;
use snapedit_frame_source::probe_asset;
use snapedit_inference::{default_backend, DirectoryModelStore, ModelRegistry};
use snapedit_media_model::{
    Color, ColorAdjustments, EditOperation, EditSpec, EditTarget, FallbackPolicy, OverlaySpec,
    TimeRange,
};
use snapedit_pipeline::{JobEvent, JobRequest, NativeStages, PipelineScheduler};
use snapedit_render_engine::ExportSettings;

use crate::{EditOptions, FallbackArg, OperationArgs, TargetArg};

impl From<TargetArg> for EditTarget {
    fn from(target: TargetArg) -> Self {
        match target {
            TargetArg::Whole => EditTarget::Whole,
            TargetArg::Foreground => EditTarget::Foreground,
            TargetArg::Background => EditTarget::Background,
        }
    }
}

impl From<FallbackArg> for FallbackPolicy {
    fn from(fallback: FallbackArg) -> Self {
        match fallback {
            FallbackArg::Skip => FallbackPolicy::SkipEdit,
            FallbackArg::Reuse => FallbackPolicy::ReusePreviousMask,
        }
    }
}

fn build_edit(operation: OperationArgs, options: &EditOptions) -> anyhow::Result<EditSpec> {
    let operation = match operation {
        OperationArgs::FromFile { spec } => {
            let json = std::fs::read_to_string(&spec)
                .with_context(|| format!("Failed to read edit spec {}", spec.display()))?;
            let edit: EditSpec = serde_json::from_str(&json)
                .with_context(|| format!("Invalid edit spec {}", spec.display()))?;
            return Ok(edit);
        }
        OperationArgs::RemoveBackground { color } => EditOperation::RemoveBackground {
            replacement: match color {
                Some(hex) => Color::parse_hex(&hex)?,
                None => Color::TRANSPARENT,
            },
        },
        OperationArgs::BlurBackground { radius } => EditOperation::BlurBackground { radius },
        OperationArgs::Style {
            brightness,
            contrast,
            saturation,
            exposure,
            temperature,
            tint,
            target,
        } => EditOperation::StyleFilter {
            adjustments: ColorAdjustments {
                brightness,
                contrast,
                saturation,
                exposure,
                temperature,
                tint,
            },
            target: target.into(),
        },
        OperationArgs::Tint {
            color,
            opacity,
            target,
        } => EditOperation::Tint {
            color: Color::parse_hex(&color)?,
            opacity,
            target: target.into(),
        },
        OperationArgs::Pixelate { block_size } => EditOperation::PixelateRegions { block_size },
        OperationArgs::Overlay {
            image,
            x,
            y,
            scale,
            opacity,
            behind_subject,
        } => EditOperation::Overlay(OverlaySpec {
            image,
            x,
            y,
            scale,
            opacity,
            behind_subject,
        }),
    };

    let mut edit = EditSpec::new(operation)
        .with_threshold(options.threshold)
        .with_fallback(options.fallback.into());
    if let Some(model) = &options.model {
        edit = edit.with_model(model.clone());
    }
    edit.mask_threshold = options.mask_threshold;
    if options.start_ms.is_some() || options.end_ms.is_some() {
        edit = edit.with_time_range(TimeRange::new(
            options.start_ms.unwrap_or(0),
            options.end_ms,
        ));
    }
    Ok(edit)
}

fn export_settings(config: &AppConfig, options: &EditOptions) -> anyhow::Result<ExportSettings> {
    let mut defaults = config.export.clone();
    if let Some(format) = &options.format {
        defaults.video_format = format.clone();
    }
    if let Some(bitrate) = options.bitrate {
        defaults.bitrate_kbps = bitrate;
    }
    if let Some(quality) = options.jpeg_quality {
        defaults.jpeg_quality = quality;
    }
    defaults.include_audio &= !options.no_audio;
    if options.resolution.is_some() {
        defaults.resolution = options.resolution;
    }
    if options.fps.is_some() {
        defaults.framerate = options.fps;
    }
    Ok(ExportSettings::from_defaults(&defaults)?)
}

pub async fn run(
    config: &AppConfig,
    input: PathBuf,
    output: PathBuf,
    operation: OperationArgs,
    options: EditOptions,
) -> anyhow::Result<()> {
    let asset = probe_asset(&input)
        .map_err(|e| anyhow::anyhow!("Failed to open {}: {e}", input.display()))?;
    let edit = build_edit(operation, &options)?;
    edit.validate()?;
    let settings = export_settings(config, &options)?;

    let store = Arc::new(DirectoryModelStore::new(&config.models_dir));
    let registry = Arc::new(ModelRegistry::new(store, default_backend()));
    tracing::debug!(
        backend = registry.backend_name(),
        models_dir = %config.models_dir.display(),
        "Model registry ready"
    );
    let (scheduler, mut events) = PipelineScheduler::with_stages(
        registry,
        config.pipeline.clone(),
        settings,
        Arc::new(NativeStages),
    )?;

    println!("Editing: {}", input.display());
    println!(
        "  Input: {}x{} {:?}, {} frame(s)",
        asset.width, asset.height, asset.kind, asset.frame_count
    );
    println!("  Operation: {}", edit.operation.name());
    if let Some(model) = edit.required_model() {
        println!("  Model: {model}");
    }
    println!("  Output: {}", output.display());

    let job = scheduler.submit(JobRequest::new(asset, edit, output));
    tracing::debug!(job_id = %job, "Following job events");
    loop {
        let event = tokio::select! {
            event = events.recv() => event,
            _ = tokio::signal::ctrl_c() => {
                if scheduler.cancel(job) {
                    println!("\n  Cancelling...");
                }
                continue;
            }
        };
        let Some(event) = event else {
            anyhow::bail!("pipeline stopped without a result");
        };
        match event {
            JobEvent::Progress { percent, stage, .. } => {
                print!("\r  Progress: {percent:5.1}% ({stage})        ");
                let _ = std::io::stdout().flush();
            }
            JobEvent::Completed { output, .. } => {
                tracing::info!(job_id = %job, output = %output.display(), "Edit finished");
                println!("\nEdit complete: {}", output.display());
                return Ok(());
            }
            JobEvent::Cancelled { .. } => {
                tracing::info!(job_id = %job, "Edit cancelled");
                println!("\nEdit cancelled; no output written.");
                return Ok(());
            }
            JobEvent::Failed { kind, message, .. } => {
                println!();
                anyhow::bail!("Edit failed [{kind}]: {message}");
            }
        }
    }
}
