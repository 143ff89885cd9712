//! Platform default locations.

use directories::ProjectDirs;
use std::path::PathBuf;

const APPLICATION: &str = "versa";

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", APPLICATION)
}

/// Default configuration file, e.g. `~/.config/versa/versa.toml` on Linux.
///
/// `None` when no home directory can be determined.
pub fn default_config_path() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().join(format!("{APPLICATION}.toml")))
}

/// Default SQLite database file, e.g. `~/.local/share/versa/versa.db` on Linux.
pub fn default_database_path() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.data_dir().join(format!("{APPLICATION}.db")))
}
