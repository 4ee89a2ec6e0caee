//! CLI command handlers, one file per subcommand.

mod add;
mod expand;
mod run;
mod status;

pub use add::run_add;
pub use expand::run_expand;
pub use run::{run_poll, RunOptions};
pub use status::run_status;
