//! Run command handler

use crate::cli::RunArgs;
use crate::config::Config;
use crate::error::Result;
use crate::logging::timing::Timer;
use crate::output::OutputWriter;
use promptline_core::{InvokeOptions, LlmClient};
use std::sync::Arc;
use tracing::{debug, info, instrument};

use super::utils::{preset_library, read_request, render_for_file, save_to};

/// Handle the run command
#[instrument(skip(config, output), fields(file = %args.request.display()))]
pub async fn handle_run(args: RunArgs, config: &Config, output: &mut OutputWriter) -> Result<()> {
    let provider = config.provider(args.provider)?;
    let timer = Timer::with_details("run_command", &format!("provider: {}", provider));
    info!(%provider, "Starting run");

    let yaml = read_request(&args.request)?;

    let mut client = LlmClient::from_env(provider)?.with_presets(Arc::new(preset_library(config)));
    if let Some(model) = config.model(args.model.as_deref()) {
        debug!(model = %model, "Overriding default model");
        client = client.with_default_model(model);
    }

    let options = InvokeOptions {
        dry_run: false,
        include_debug: args.debug,
        raw_response: args.raw,
    };

    let progress = output.spinner(&format!("Waiting for {}...", provider));
    let result = client.invoke_from_yaml(&yaml, options).await;
    if let Some(pb) = progress {
        pb.finish_and_clear();
    }
    let value = result?.to_value();
    let elapsed = timer.finish();

    if args.metrics {
        output.section("Execution Metrics")?;
        output.info(&format!("Provider: {}", provider))?;
        output.info(&format!("Execution Time: {:.2}s", elapsed.as_secs_f64()))?;
    }

    if let Some(path) = &args.save_to {
        save_to(path, &render_for_file(&value, output.format())?)?;
        output.success(&format!("✓ Result saved to {}", path.display()))?;
    } else {
        output.data(&value)?;
    }

    Ok(())
}
