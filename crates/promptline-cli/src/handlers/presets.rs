//! Presets command handler

use crate::cli::{PresetsAction, PresetsArgs};
use crate::config::Config;
use crate::error::Result;
use crate::output::OutputWriter;
use promptline_core::{EntrySource, PresetLoader};
use tracing::instrument;

use super::utils::{preset_library, truncate, SUMMARY_WIDTH};

/// Handle the presets command
#[instrument(skip(config, output))]
pub async fn handle_presets(args: PresetsArgs, config: &Config, output: &mut OutputWriter) -> Result<()> {
    let library = preset_library(config);

    match args.action {
        PresetsAction::List { groups } => {
            let (kind, dir, names) = if groups {
                ("groups", library.group_dir(), library.list_groups())
            } else {
                ("presets", library.preset_dir(), library.list_presets())
            };

            if !output.is_human() {
                return output.data(&names);
            }
            if names.is_empty() {
                output.warning(&format!("No {} found under {}", kind, dir.display()))?;
                return Ok(());
            }
            output.info(&format!("{} {} under {}", names.len(), kind, dir.display()))?;
            for name in &names {
                output.writeln(name)?;
            }
        }
        PresetsAction::Show { name, group } => {
            let entries = if group {
                library.load_preset_group(&name)?
            } else {
                library.load_preset(&name)?
            };

            if !output.is_human() {
                return output.data(&entries);
            }
            output.section(&format!("{} ({} entries)", name, entries.len()))?;
            let rows = entries
                .iter()
                .map(|e| {
                    let source = e.source.as_ref().map(EntrySource::to_string).unwrap_or_default();
                    vec![e.role.as_str().to_string(), source, truncate(&e.content, SUMMARY_WIDTH)]
                })
                .collect();
            output.table(&["Role", "Source", "Content"], rows)?;
        }
    }

    Ok(())
}
