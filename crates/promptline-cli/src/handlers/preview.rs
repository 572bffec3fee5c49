//! Preview command handler
//!
//! Builds the same dry-run envelope the client produces, without requiring
//! provider credentials.

use crate::cli::PreviewArgs;
use crate::config::Config;
use crate::error::Result;
use crate::logging::timing::Timer;
use crate::output::OutputWriter;
use promptline_core::adapters::adapter_for;
use promptline_core::config::default_model_from_env;
use promptline_core::upload::PreviewUploader;
use promptline_core::JsonMap;
use serde_json::Value;
use tracing::{info, instrument};

use super::utils::{compose_request, preset_library, read_request, render_for_file, save_to};

/// Handle the preview command
#[instrument(skip(config, output), fields(file = %args.request.display()))]
pub async fn handle_preview(args: PreviewArgs, config: &Config, output: &mut OutputWriter) -> Result<()> {
    let provider = config.provider(args.provider)?;
    let _timer = Timer::with_details("preview_command", &format!("provider: {}", provider));
    output.info(&format!("Previewing {} for provider {}", args.request.display(), provider))?;

    let yaml = read_request(&args.request)?;
    let library = preset_library(config);
    let default_model = config
        .model(args.model.as_deref())
        .or_else(|| default_model_from_env(provider));
    let request = compose_request(&yaml, &library, default_model)?;

    let progress = output.spinner("Building provider payload...");
    let payload = adapter_for(provider).adapt(&request, &PreviewUploader).await?;
    if let Some(pb) = progress {
        pb.finish_and_clear();
    }
    info!(%provider, model = request.model().unwrap_or_default(), "Payload built");

    let mut envelope = JsonMap::new();
    envelope.insert("ics_request".to_string(), request.to_payload());
    envelope.insert(provider.payload_key().to_string(), payload.preview());
    let envelope = Value::Object(envelope);

    if let Some(path) = &args.save_to {
        save_to(path, &render_for_file(&envelope, output.format())?)?;
        output.success(&format!("✓ Preview saved to {}", path.display()))?;
    } else {
        output.section("Preview")?;
        output.data(&envelope)?;
    }

    Ok(())
}
