//! Validate command handler

use crate::cli::ValidateArgs;
use crate::config::Config;
use crate::error::Result;
use crate::logging::timing::Timer;
use crate::output::OutputWriter;
use serde_json::json;
use tracing::{info, instrument};

use super::utils::{compose_request, message_rows, preset_library, read_request};

/// Model recorded when neither the request nor the configuration names one
const UNRESOLVED_MODEL: &str = "(unresolved)";

/// Handle the validate command
#[instrument(skip(config, output), fields(file = %args.request.display()))]
pub async fn handle_validate(args: ValidateArgs, config: &Config, output: &mut OutputWriter) -> Result<()> {
    let _timer = Timer::with_details("validate_command", &args.request.display().to_string());
    output.info(&format!("Validating request: {}", args.request.display()))?;

    let yaml = read_request(&args.request)?;
    let library = preset_library(config);
    let model = config.model(None).unwrap_or_else(|| UNRESOLVED_MODEL.to_string());
    let request = compose_request(&yaml, &library, Some(model))?;

    let model = request.model().unwrap_or(UNRESOLVED_MODEL);
    let format = request.format().map(|f| f.type_name()).unwrap_or("text");
    info!(messages = request.messages().len(), model, format, "Request is valid");

    if output.is_human() {
        output.success("✓ Request is valid")?;
        output.section("Messages")?;
        output.table(&["Role", "Content"], message_rows(request.messages()))?;
        output.section("Generation")?;
        output.info(&format!("Model: {}", model))?;
        output.info(&format!("Format: {}", format))?;
        if model == UNRESOLVED_MODEL {
            output.warning("No model in the request or config file; a live run falls back to the provider's model setting")?;
        }
        if args.detailed {
            output.section("Composed Request")?;
            output.data(&request.to_payload())?;
        }
    } else {
        let mut summary = json!({
            "valid": true,
            "model": model,
            "format": format,
            "messages": request.messages().len(),
            "roles": request.messages().iter().map(|m| m.role.as_str()).collect::<Vec<_>>(),
        });
        if args.detailed {
            summary["request"] = request.to_payload();
        }
        output.data(&summary)?;
    }

    Ok(())
}
