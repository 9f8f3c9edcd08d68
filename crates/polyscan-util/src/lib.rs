pub mod fs;
pub mod ui;

pub use crate::fs::{latest_run, list_runs, timestamped_name, write_atomic, RunFile};
pub use crate::ui::page_spinner;
