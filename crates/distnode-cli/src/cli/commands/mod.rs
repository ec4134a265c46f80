//! CLI command handlers, one per file.

mod completions;
mod fetch;
mod probe;
mod serve;
mod status;

pub use completions::run_completions;
pub use fetch::run_fetch;
pub use probe::run_probe;
pub use serve::run_serve;
pub use status::run_status;
