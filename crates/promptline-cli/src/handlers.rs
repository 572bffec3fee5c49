//! Command handlers for CLI subcommands
//!
//! Each subcommand lives in its own module; shared loading helpers are in
//! `utils`.

mod completions;
mod convert;
mod presets;
mod preview;
mod run;
mod utils;
mod validate;

pub use completions::handle_completions;
pub use convert::handle_convert_tavern;
pub use presets::handle_presets;
pub use preview::handle_preview;
pub use run::handle_run;
pub use validate::handle_validate;
