//! Convert-tavern command handler

use crate::cli::ConvertTavernArgs;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::logging::timing::Timer;
use crate::output::OutputWriter;
use promptline_core::tavern::{batch_convert, convert_tavern_preset};
use std::fs;
use tracing::{info, instrument};

use super::utils::{preset_library, save_to};

/// Handle the convert-tavern command
///
/// A directory input converts every JSON file into the output directory,
/// defaulting to the configured preset directory. A file input prints the
/// YAML unless `--out` is given.
#[instrument(skip(config, output), fields(input = %args.input.display()))]
pub async fn handle_convert_tavern(args: ConvertTavernArgs, config: &Config, output: &mut OutputWriter) -> Result<()> {
    let _timer = Timer::with_details("convert_tavern_command", &args.input.display().to_string());

    if !args.input.exists() {
        return Err(Error::FileNotFound { path: args.input });
    }

    if args.input.is_dir() {
        let target = args
            .out
            .unwrap_or_else(|| preset_library(config).preset_dir().to_path_buf());
        output.info(&format!("Converting {} into {}", args.input.display(), target.display()))?;

        let stats = batch_convert(&args.input, &target, args.overwrite)?;
        info!(
            total = stats.total,
            success = stats.success.len(),
            failed = stats.failed.len(),
            skipped = stats.skipped.len(),
            "Batch conversion finished"
        );
        output.conversion_stats(&stats)?;
        if !stats.failed.is_empty() {
            return Err(Error::other(format!("{} file(s) failed to convert", stats.failed.len())));
        }
        return Ok(());
    }

    let json = fs::read_to_string(&args.input)?;
    let yaml = convert_tavern_preset(&json)?;

    match args.out {
        Some(path) => {
            if path.exists() && !args.overwrite {
                return Err(Error::invalid_args(format!(
                    "{} already exists; pass --overwrite to replace it",
                    path.display()
                )));
            }
            save_to(&path, &yaml)?;
            output.success(&format!("✓ Preset written to {}", path.display()))?;
        }
        None => output.write(&yaml)?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::OutputFormat;
    use crate::config::PathConfig;
    use tempfile::TempDir;

    const PRESET: &str = r#"{"prompts": [
        {"identifier": "main", "name": "Main Prompt", "role": "system", "content": "Stay in character."},
        {"identifier": "chatHistory", "name": "Chat History", "marker": true}
    ]}"#;

    fn quiet_output() -> OutputWriter {
        OutputWriter::with_writer(OutputFormat::Json, false, true, Box::new(std::io::sink()))
    }

    #[tokio::test]
    async fn test_single_file_refuses_to_overwrite() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("card.json");
        let out = dir.path().join("card.yaml");
        fs::write(&input, PRESET).unwrap();
        fs::write(&out, "keep me").unwrap();

        let args = ConvertTavernArgs {
            input: input.clone(),
            out: Some(out.clone()),
            overwrite: false,
        };
        let err = handle_convert_tavern(args, &Config::default(), &mut quiet_output())
            .await
            .unwrap_err();
        assert!(err.should_show_help());
        assert_eq!(fs::read_to_string(&out).unwrap(), "keep me");

        let args = ConvertTavernArgs {
            input,
            out: Some(out.clone()),
            overwrite: true,
        };
        handle_convert_tavern(args, &Config::default(), &mut quiet_output())
            .await
            .unwrap();
        let yaml = fs::read_to_string(&out).unwrap();
        assert!(yaml.contains("# Main Prompt (main)"));
        assert!(yaml.contains("Stay in character."));
    }

    #[tokio::test]
    async fn test_directory_defaults_to_preset_dir() {
        let dir = TempDir::new().unwrap();
        let json_dir = dir.path().join("tavern");
        fs::create_dir_all(&json_dir).unwrap();
        fs::write(json_dir.join("one.json"), PRESET).unwrap();

        let config = Config {
            paths: PathConfig {
                preset_root: Some(dir.path().join("presets")),
                env_file: None,
            },
            ..Default::default()
        };
        let args = ConvertTavernArgs {
            input: json_dir,
            out: None,
            overwrite: false,
        };
        handle_convert_tavern(args, &config, &mut quiet_output()).await.unwrap();

        assert!(dir.path().join("presets/preset/one.yaml").is_file());
    }
}
