//! Command-line interface argument parsing and definitions
//!
//! This module defines the CLI structure using clap's derive API.

use clap::{Parser, Subcommand, ValueEnum};
use std::io::IsTerminal;
use std::path::PathBuf;

/// Promptline CLI - compose YAML prompt requests for chat-completion APIs
///
/// Validates request documents, previews the provider payload they produce,
/// sends them to OpenAI-compatible or Gemini endpoints, and manages preset
/// libraries.
#[derive(Parser, Debug)]
#[command(
    name = "promptline",
    version,
    author,
    about,
    long_about = None,
    propagate_version = true,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Enable verbose output (can be used multiple times for increased verbosity)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all non-essential output
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Path to configuration file
    #[arg(short, long, global = true, env = "PROMPTLINE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output format for results
    #[arg(short, long, value_enum, global = true, default_value = "human")]
    pub output: OutputFormat,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Preset root holding `preset/` and `groups/`
    #[arg(long, global = true, value_name = "DIR")]
    pub preset_root: Option<PathBuf>,

    /// The subcommand to run
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Parse and compose a request document without contacting a provider
    Validate(ValidateArgs),

    /// Show the provider payload a request document produces (dry run)
    Preview(PreviewArgs),

    /// Send a request document to a provider and print the result
    Run(RunArgs),

    /// Inspect the preset library
    Presets(PresetsArgs),

    /// Convert SillyTavern preset exports into preset YAML files
    ConvertTavern(ConvertTavernArgs),

    /// Generate shell completions for the specified shell
    Completions(CompletionsArgs),
}

/// Arguments for the validate command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to the YAML request document
    #[arg(value_name = "REQUEST")]
    pub request: PathBuf,

    /// Print the composed request after validation
    #[arg(long)]
    pub detailed: bool,
}

/// Arguments for the preview command
#[derive(Parser, Debug)]
pub struct PreviewArgs {
    /// Path to the YAML request document
    #[arg(value_name = "REQUEST")]
    pub request: PathBuf,

    /// Wire provider (falls back to the configured default provider)
    #[arg(short, long, value_enum)]
    pub provider: Option<ProviderArg>,

    /// Model used when the request does not name one
    #[arg(short, long)]
    pub model: Option<String>,

    /// Write the preview to a file instead of stdout
    #[arg(long = "save-to", value_name = "OUTPUT_FILE")]
    pub save_to: Option<PathBuf>,
}

/// Arguments for the run command
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Path to the YAML request document
    #[arg(value_name = "REQUEST")]
    pub request: PathBuf,

    /// Wire provider (falls back to the configured default provider)
    #[arg(short, long, value_enum)]
    pub provider: Option<ProviderArg>,

    /// Model used when the request does not name one
    #[arg(short, long)]
    pub model: Option<String>,

    /// Include the composed request and provider payload next to the result
    #[arg(long, conflicts_with = "raw")]
    pub debug: bool,

    /// Print the provider's raw JSON response
    #[arg(long)]
    pub raw: bool,

    /// Save the result to a file
    #[arg(long = "save-to", value_name = "OUTPUT_FILE")]
    pub save_to: Option<PathBuf>,

    /// Show execution metrics
    #[arg(long)]
    pub metrics: bool,
}

/// Arguments for the presets command
#[derive(Parser, Debug)]
pub struct PresetsArgs {
    #[command(subcommand)]
    pub action: PresetsAction,
}

/// Preset library actions
#[derive(Subcommand, Debug)]
pub enum PresetsAction {
    /// List preset (or group) identifiers
    List {
        /// List groups instead of presets
        #[arg(long)]
        groups: bool,
    },

    /// Show the fully expanded entries of a preset or group
    Show {
        /// Preset identifier, relative to the preset directory
        name: String,

        /// Treat the name as a group
        #[arg(long)]
        group: bool,
    },
}

/// Arguments for the convert-tavern command
#[derive(Parser, Debug)]
pub struct ConvertTavernArgs {
    /// A SillyTavern preset JSON file, or a directory of them
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,

    /// Output file (single input) or directory (batch input)
    #[arg(long = "out", value_name = "OUTPUT")]
    pub out: Option<PathBuf>,

    /// Replace existing preset files
    #[arg(long)]
    pub overwrite: bool,
}

/// Arguments for generating shell completions
#[derive(Parser, Debug)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

/// Output format options
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable formatted output
    Human,
    /// JSON output
    Json,
    /// YAML output
    Yaml,
    /// Pretty-printed JSON output
    JsonPretty,
}

/// Wire providers selectable on the command line
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum ProviderArg {
    /// OpenAI-compatible chat completions
    Openai,
    /// Gemini generateContent
    Gemini,
}

/// Supported shells for completion generation
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum Shell {
    /// Bash shell
    Bash,
    /// Zsh shell
    Zsh,
    /// Fish shell
    Fish,
    /// PowerShell
    PowerShell,
    /// Elvish shell
    Elvish,
}

impl Cli {
    /// Parse command-line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Get the effective verbosity level (considering quiet flag)
    pub fn verbosity_level(&self) -> u8 {
        if self.quiet {
            0
        } else {
            self.verbose
        }
    }

    /// Check if colored output should be used
    pub fn use_color(&self) -> bool {
        !self.no_color && std::io::stdout().is_terminal()
    }
}

impl From<ProviderArg> for promptline_core::Provider {
    fn from(arg: ProviderArg) -> Self {
        match arg {
            ProviderArg::Openai => promptline_core::Provider::OpenAi,
            ProviderArg::Gemini => promptline_core::Provider::Gemini,
        }
    }
}

impl Shell {
    /// Convert to clap_complete shell type
    pub fn to_clap_shell(self) -> clap_complete::Shell {
        match self {
            Shell::Bash => clap_complete::Shell::Bash,
            Shell::Zsh => clap_complete::Shell::Zsh,
            Shell::Fish => clap_complete::Shell::Fish,
            Shell::PowerShell => clap_complete::Shell::PowerShell,
            Shell::Elvish => clap_complete::Shell::Elvish,
        }
    }
}
