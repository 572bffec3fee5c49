//! Preset and preset-group resolution
//!
//! A preset is a YAML list of `{role: content}` leaves, `{preset: name}`
//! references and `{preset-group: name}` references. A group is a YAML list of
//! references only. Resolution is depth-first and order preserving. Repeated
//! references are expanded again each time; nothing is memoized.
//!
//! Cycles are detected with a [`ResolutionStack`] threaded through the
//! recursion, so every top-level call starts with a clean slate.

use crate::error::{Error, Result};
use crate::types::{EntrySource, MessageEntry, Role};
use serde_json::Value;
use std::fs;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

const PRESET_EXTENSION: &str = "yaml";
const MAX_LISTED_PRESETS: usize = 10;

/// Capability for expanding named presets into message entries
pub trait PresetLoader: Send + Sync {
    /// Expand a preset file into its entries
    fn load_preset(&self, name: &str) -> Result<Vec<MessageEntry>>;

    /// Expand a group file into the entries of every referenced preset
    fn load_preset_group(&self, name: &str) -> Result<Vec<MessageEntry>>;

    /// System text of a preset: non-empty system entries joined by a blank line
    fn preset_system_content(&self, name: &str) -> Result<String> {
        let entries = self.load_preset(name)?;
        Ok(entries
            .iter()
            .filter(|e| e.role == Role::System && !e.content.is_empty())
            .map(|e| e.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n"))
    }
}

/// Names currently being expanded, outermost first
#[derive(Debug, Default, Clone)]
pub struct ResolutionStack {
    names: Vec<String>,
}

impl ResolutionStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push `name`, failing if it is already being expanded.
    ///
    /// The returned frame pops the name when dropped, on success and error
    /// paths alike.
    pub fn enter(&mut self, name: &str) -> Result<ResolutionFrame<'_>> {
        if self.names.iter().any(|n| n == name) {
            let mut chain = self.names.clone();
            chain.push(name.to_string());
            return Err(Error::validation(format!(
                "circular preset reference: {}",
                chain.join(" -> ")
            )));
        }
        self.names.push(name.to_string());
        Ok(ResolutionFrame { stack: self })
    }

    pub fn depth(&self) -> usize {
        self.names.len()
    }
}

/// Scoped membership of one name in a [`ResolutionStack`]
#[derive(Debug)]
pub struct ResolutionFrame<'a> {
    stack: &'a mut ResolutionStack,
}

impl Deref for ResolutionFrame<'_> {
    type Target = ResolutionStack;

    fn deref(&self) -> &ResolutionStack {
        self.stack
    }
}

impl DerefMut for ResolutionFrame<'_> {
    fn deref_mut(&mut self) -> &mut ResolutionStack {
        self.stack
    }
}

impl Drop for ResolutionFrame<'_> {
    fn drop(&mut self) {
        self.stack.names.pop();
    }
}

/// Preset library backed by a `preset/` and a `groups/` directory
#[derive(Debug, Clone)]
pub struct PresetLibrary {
    preset_dir: PathBuf,
    group_dir: PathBuf,
}

impl PresetLibrary {
    pub fn new(preset_dir: impl Into<PathBuf>, group_dir: impl Into<PathBuf>) -> Self {
        Self {
            preset_dir: preset_dir.into(),
            group_dir: group_dir.into(),
        }
    }

    /// Library rooted at `root`, using `root/preset` and `root/groups`
    pub fn from_root(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self::new(root.join("preset"), root.join("groups"))
    }

    pub fn preset_dir(&self) -> &Path {
        &self.preset_dir
    }

    pub fn group_dir(&self) -> &Path {
        &self.group_dir
    }

    /// Identifiers of every preset, sorted
    pub fn list_presets(&self) -> Vec<String> {
        list_identifiers(&self.preset_dir)
    }

    /// Identifiers of every group, sorted
    pub fn list_groups(&self) -> Vec<String> {
        list_identifiers(&self.group_dir)
    }

    fn expand_preset(&self, name: &str, stack: &mut ResolutionStack) -> Result<Vec<MessageEntry>> {
        let mut frame = stack.enter(name)?;
        let path = find_preset_file(name, &self.preset_dir, "preset")?;
        let items = read_item_list(&path, name, "preset")?;

        let mut entries = Vec::new();
        for (idx, item) in items.iter().enumerate() {
            let position = idx + 1;
            let map = item.as_object().ok_or_else(|| {
                Error::validation(format!("preset '{}' item {} must be a mapping", name, position))
            })?;

            if let Some(reference) = map.get("preset") {
                let child = reference_name(reference, name, position, "preset")?;
                debug!(preset = %name, reference = %child, "Expanding nested preset");
                entries.extend(self.expand_preset(child, &mut frame)?);
                continue;
            }

            if let Some(reference) = map.get("preset-group") {
                let child = reference_name(reference, name, position, "preset-group")?;
                debug!(preset = %name, group = %child, "Expanding preset group");
                entries.extend(self.expand_group(child, &mut frame)?);
                continue;
            }

            if map.len() != 1 {
                return Err(Error::validation(format!(
                    "preset '{}' item {} must hold exactly one role, preset or preset-group key",
                    name, position
                )));
            }

            let Some((raw_role, content)) = map.iter().next() else {
                continue;
            };
            let role = Role::from_token(raw_role).ok_or_else(|| {
                Error::validation(format!(
                    "preset '{}' item {} role must be system, user or assistant, got '{}'",
                    name, position, raw_role
                ))
            })?;
            let content = content.as_str().ok_or_else(|| {
                Error::validation(format!("preset '{}' item {} content must be a string", name, position))
            })?;

            let content = content.trim();
            if role != Role::System && content.is_empty() {
                return Err(Error::validation(format!(
                    "preset '{}' item {} {} message must not be empty",
                    name, position, role
                )));
            }

            entries.push(MessageEntry::new(role, content).with_source(EntrySource::Preset(name.to_string())));
        }

        debug!(preset = %name, entries = entries.len(), "Loaded preset");
        Ok(entries)
    }

    fn expand_group(&self, name: &str, stack: &mut ResolutionStack) -> Result<Vec<MessageEntry>> {
        let mut frame = stack.enter(name)?;
        let path = find_preset_file(name, &self.group_dir, "preset group")?;
        let items = read_item_list(&path, name, "preset group")?;

        let mut entries = Vec::new();
        for (idx, item) in items.iter().enumerate() {
            let position = idx + 1;
            let map = item.as_object().ok_or_else(|| {
                Error::validation(format!("preset group '{}' item {} must be a mapping", name, position))
            })?;

            if let Some(reference) = map.get("preset") {
                let child = reference_name(reference, name, position, "preset")?;
                entries.extend(self.expand_preset(child, &mut frame)?);
            } else if let Some(reference) = map.get("preset-group") {
                let child = reference_name(reference, name, position, "preset-group")?;
                entries.extend(self.expand_group(child, &mut frame)?);
            } else {
                return Err(Error::validation(format!(
                    "preset group '{}' item {} must contain a 'preset' or 'preset-group' key",
                    name, position
                )));
            }
        }

        debug!(group = %name, entries = entries.len(), "Expanded preset group");
        Ok(entries)
    }
}

impl PresetLoader for PresetLibrary {
    fn load_preset(&self, name: &str) -> Result<Vec<MessageEntry>> {
        self.expand_preset(name.trim(), &mut ResolutionStack::new())
    }

    fn load_preset_group(&self, name: &str) -> Result<Vec<MessageEntry>> {
        self.expand_group(name.trim(), &mut ResolutionStack::new())
    }
}

fn reference_name<'v>(value: &'v Value, owner: &str, position: usize, key: &str) -> Result<&'v str> {
    value
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            Error::validation(format!("'{}' item {} {} value must be a non-empty string", owner, position, key))
        })
}

fn read_item_list(path: &Path, name: &str, kind: &str) -> Result<Vec<Value>> {
    let text = fs::read_to_string(path)
        .map_err(|e| Error::validation(format!("failed to read {} '{}': {}", kind, name, e)))?;
    let data: Value = serde_yaml::from_str(&text)
        .map_err(|e| Error::validation(format!("{} '{}' is not valid YAML: {}", kind, name, e)))?;

    match data {
        Value::Array(items) => Ok(items),
        _ => Err(Error::validation(format!("{} '{}' must be a list", kind, name))),
    }
}

/// Locate `<dir>/<name>.yaml`, searching the tree for bare names
fn find_preset_file(name: &str, dir: &Path, kind: &str) -> Result<PathBuf> {
    let file_name = format!("{}.{}", name, PRESET_EXTENSION);
    let direct = dir.join(&file_name);
    if direct.is_file() {
        return Ok(direct);
    }

    let explicit_path = name.contains('/') || name.contains('\\');
    if !explicit_path {
        let found = WalkDir::new(dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .find(|e| e.file_type().is_file() && e.file_name().to_str() == Some(file_name.as_str()));
        if let Some(entry) = found {
            return Ok(entry.into_path());
        }
    }

    let available = list_identifiers(dir);
    let hint = if available.is_empty() {
        format!("no {}s are available in {}", kind, dir.display())
    } else {
        let shown = available.iter().take(MAX_LISTED_PRESETS).cloned().collect::<Vec<_>>().join(", ");
        let mut hint = format!("available: {}", shown);
        if available.len() > MAX_LISTED_PRESETS {
            hint.push_str(&format!(" (and {} more...)", available.len() - MAX_LISTED_PRESETS));
        }
        hint
    };

    Err(Error::validation(format!("{} '{}' not found; {}", kind, name, hint)))
}

fn list_identifiers(dir: &Path) -> Vec<String> {
    let mut ids: Vec<String> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some(PRESET_EXTENSION))
        .filter_map(|e| {
            let rel = e.path().strip_prefix(dir).ok()?.with_extension("");
            Some(rel.to_string_lossy().replace('\\', "/"))
        })
        .collect();
    ids.sort();
    ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn library(files: &[(&str, &str)]) -> (TempDir, PresetLibrary) {
        let dir = TempDir::new().unwrap();
        for (rel, body) in files {
            let path = dir.path().join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, body).unwrap();
        }
        let lib = PresetLibrary::from_root(dir.path());
        (dir, lib)
    }

    #[test]
    fn test_resolution_stack_pops_on_drop() {
        let mut stack = ResolutionStack::new();
        {
            let mut frame = stack.enter("a").unwrap();
            assert_eq!(frame.depth(), 1);
            let err = frame.enter("a").unwrap_err();
            assert!(err.to_string().contains("a -> a"));
            let inner = frame.enter("b").unwrap();
            assert_eq!(inner.depth(), 2);
        }
        assert_eq!(stack.depth(), 0);
    }

    #[test]
    fn test_load_simple_preset() {
        let (_dir, lib) = library(&[(
            "preset/persona.yaml",
            "- system: '  You are terse.  '\n- user: hello\n- assistant: hi\n",
        )]);

        let entries = lib.load_preset("persona").unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].role, Role::System);
        assert_eq!(entries[0].content, "You are terse.");
        assert_eq!(entries[0].preset_name(), Some("persona"));
        assert_eq!(entries[2].role, Role::Assistant);
    }

    #[test]
    fn test_nested_and_grouped_presets() {
        let (_dir, lib) = library(&[
            ("preset/base.yaml", "- system: base rules\n"),
            ("preset/style/poet.yaml", "- preset: base\n- system: rhyme\n"),
            ("groups/bundle.yaml", "- preset: poet\n- preset: base\n"),
        ]);

        let entries = lib.load_preset_group("bundle").unwrap();
        let contents: Vec<_> = entries.iter().map(|e| e.content.as_str()).collect();
        assert_eq!(contents, vec!["base rules", "rhyme", "base rules"]);
        assert_eq!(entries[0].preset_name(), Some("base"));
        assert_eq!(entries[1].preset_name(), Some("poet"));
    }

    #[test]
    fn test_explicit_relative_path() {
        let (_dir, lib) = library(&[("preset/style/poet.yaml", "- system: rhyme\n")]);
        assert_eq!(lib.load_preset("style/poet").unwrap().len(), 1);
        assert!(lib.load_preset("other/poet").is_err());
    }

    #[test]
    fn test_cycle_reports_chain() {
        let (_dir, lib) = library(&[
            ("preset/a.yaml", "- preset: b\n"),
            ("preset/b.yaml", "- preset: a\n"),
        ]);

        let err = lib.load_preset("a").unwrap_err();
        assert!(err.to_string().contains("a -> b -> a"), "{}", err);

        // the failed call must not poison later resolutions
        let (_dir2, lib2) = library(&[("preset/a.yaml", "- system: fine\n")]);
        assert!(lib2.load_preset("a").is_ok());
    }

    #[test]
    fn test_repeated_resolution_is_stable() {
        let (_dir, lib) = library(&[("preset/p.yaml", "- system: S\n- user: U\n")]);
        assert_eq!(lib.load_preset("p").unwrap(), lib.load_preset("p").unwrap());
    }

    #[test]
    fn test_not_found_lists_available() {
        let files: Vec<(String, &str)> = (0..12)
            .map(|i| (format!("preset/p{:02}.yaml", i), "- system: x\n"))
            .collect();
        let refs: Vec<(&str, &str)> = files.iter().map(|(p, b)| (p.as_str(), *b)).collect();
        let (_dir, lib) = library(&refs);

        let msg = lib.load_preset("missing").unwrap_err().to_string();
        assert!(msg.contains("p00, p01"), "{}", msg);
        assert!(msg.contains("(and 2 more...)"), "{}", msg);
        assert!(!msg.contains("p11"));
    }

    #[test]
    fn test_empty_library_hint() {
        let dir = TempDir::new().unwrap();
        let lib = PresetLibrary::from_root(dir.path());
        let msg = lib.load_preset("x").unwrap_err().to_string();
        assert!(msg.contains("no presets are available"), "{}", msg);
    }

    #[test]
    fn test_invalid_preset_items() {
        let (_dir, lib) = library(&[
            ("preset/multi.yaml", "- system: a\n  user: b\n"),
            ("preset/blank.yaml", "- user: '   '\n"),
            ("preset/role.yaml", "- narrator: hi\n"),
            ("preset/scalar.yaml", "just text\n"),
            ("preset/num.yaml", "- system: 3\n"),
        ]);

        assert!(lib.load_preset("multi").unwrap_err().to_string().contains("item 1"));
        assert!(lib.load_preset("blank").unwrap_err().to_string().contains("must not be empty"));
        assert!(lib.load_preset("role").is_err());
        assert!(lib.load_preset("scalar").unwrap_err().to_string().contains("must be a list"));
        assert!(lib.load_preset("num").unwrap_err().to_string().contains("must be a string"));
    }

    #[test]
    fn test_group_rejects_leaves() {
        let (_dir, lib) = library(&[("groups/g.yaml", "- system: inline\n")]);
        let msg = lib.load_preset_group("g").unwrap_err().to_string();
        assert!(msg.contains("'preset' or 'preset-group'"), "{}", msg);
    }

    #[test]
    fn test_preset_system_content() {
        let (_dir, lib) = library(&[(
            "preset/p.yaml",
            "- system: one\n- user: ask\n- system: ''\n- system: two\n",
        )]);
        assert_eq!(lib.preset_system_content("p").unwrap(), "one\n\ntwo");
    }

    #[test]
    fn test_list_identifiers() {
        let (_dir, lib) = library(&[
            ("preset/b.yaml", "[]"),
            ("preset/nested/a.yaml", "[]"),
            ("preset/notes.txt", "ignored"),
            ("groups/g.yaml", "[]"),
        ]);
        assert_eq!(lib.list_presets(), vec!["b", "nested/a"]);
        assert_eq!(lib.list_groups(), vec!["g"]);
    }
}
