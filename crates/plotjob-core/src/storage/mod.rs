pub mod database;

pub use database::Database;

use std::path::PathBuf;

use crate::error::CoreError;

/// Returns the plotjob data directory.
///
/// `PLOTJOB_DATA_DIR` overrides the location entirely (used by tests);
/// otherwise `~/.config/plotjob[-dev]/` based on PLOTJOB_ENV.
///
/// # Errors
/// Returns an error if creating the directory fails.
pub fn data_dir() -> Result<PathBuf, CoreError> {
    let dir = if let Ok(explicit) = std::env::var("PLOTJOB_DATA_DIR") {
        PathBuf::from(explicit)
    } else {
        let base_dir = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config");
        let env = std::env::var("PLOTJOB_ENV").unwrap_or_else(|_| "production".to_string());
        if env == "dev" {
            base_dir.join("plotjob-dev")
        } else {
            base_dir.join("plotjob")
        }
    };

    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}
