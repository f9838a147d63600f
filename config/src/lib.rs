//! Service configuration: a project `.env` file applied to the process
//! environment via `dotenv` (which never overrides variables already set, so
//! existing env always wins), then a typed [`Settings`] snapshot read from
//! the environment with documented defaults.
//!
//! Every knob has a default that matches the deployed service; `.env` and the
//! process environment only need to name what differs.

mod settings;

use std::path::{Path, PathBuf};
use thiserror::Error;

pub use settings::{OutboxSettings, Settings};

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("load .env: {0}")]
    EnvFile(#[from] dotenv::Error),
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },
}

fn env_file_path(override_dir: Option<&Path>) -> Option<PathBuf> {
    let dir = override_dir
        .map(Path::to_path_buf)
        .or_else(|| std::env::current_dir().ok())?;
    let path = dir.join(".env");
    path.is_file().then_some(path)
}

/// Loads `.env` from `override_dir` (or the current directory) into the
/// process environment. `dotenv` skips keys that are already set, so a value
/// exported in the shell beats the file. A missing file is not an error.
pub fn load_and_apply(override_dir: Option<&Path>) -> Result<(), LoadError> {
    let Some(path) = env_file_path(override_dir) else {
        return Ok(());
    };
    dotenv::from_path(&path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn existing_env_wins_over_env_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".env"), "SETTINGS_TEST_WINNER=from_file\n").unwrap();

        env::set_var("SETTINGS_TEST_WINNER", "from_env");
        load_and_apply(Some(dir.path())).unwrap();
        assert_eq!(
            env::var("SETTINGS_TEST_WINNER").as_deref(),
            Ok("from_env")
        );
        env::remove_var("SETTINGS_TEST_WINNER");
    }

    #[test]
    fn env_file_fills_missing_keys() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".env"), "SETTINGS_TEST_FILLED=from_file\n").unwrap();

        env::remove_var("SETTINGS_TEST_FILLED");
        load_and_apply(Some(dir.path())).unwrap();
        assert_eq!(
            env::var("SETTINGS_TEST_FILLED").as_deref(),
            Ok("from_file")
        );
        env::remove_var("SETTINGS_TEST_FILLED");
    }

    #[test]
    fn quoted_values_are_unwrapped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(".env"),
            "SETTINGS_TEST_QUOTED=\"hello world\"\n",
        )
        .unwrap();

        env::remove_var("SETTINGS_TEST_QUOTED");
        load_and_apply(Some(dir.path())).unwrap();
        assert_eq!(
            env::var("SETTINGS_TEST_QUOTED").as_deref(),
            Ok("hello world")
        );
        env::remove_var("SETTINGS_TEST_QUOTED");
    }

    #[test]
    fn missing_env_file_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_and_apply(Some(dir.path())).is_ok());
    }
}
