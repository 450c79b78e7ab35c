//! Derives the state directory shared by every controller invocation.
//!
//! The directory holds one persisted-identifier file (`<service>.pid`) and one
//! invocation lock (`<service>.lock`) per controlled service. Start and stop
//! invocations must agree on the layout, so both derive it from [`Config`].

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::Config;

#[cfg(unix)]
use dirs::runtime_dir;
#[cfg(unix)]
use libc::geteuid;

/// Canonical location of controller state files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateLayout {
    dir: PathBuf,
}

impl StateLayout {
    /// Derives the layout from configuration and creates the directory.
    pub fn from_config(config: &Config) -> Result<Self, StateLayoutError> {
        let dir = config
            .state_dir
            .as_ref()
            .map_or_else(default_state_directory, |dir| dir.as_std_path().to_path_buf());
        Self::at(dir)
    }

    /// Builds a layout rooted at `dir`, creating it when missing.
    pub fn at(dir: impl Into<PathBuf>) -> Result<Self, StateLayoutError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| StateLayoutError::Directory {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    /// Directory holding state files.
    pub fn dir(&self) -> &Path {
        self.dir.as_path()
    }

    /// File name of the persisted identifier for `service`.
    pub fn pid_file_name(service: &str) -> String {
        format!("{service}.pid")
    }

    /// File name of the invocation lock for `service`.
    pub fn lock_file_name(service: &str) -> String {
        format!("{service}.lock")
    }

    /// Full path of the persisted identifier for `service`.
    pub fn pid_path(&self, service: &str) -> PathBuf {
        self.dir.join(Self::pid_file_name(service))
    }

    /// Full path of the invocation lock for `service`.
    pub fn lock_path(&self, service: &str) -> PathBuf {
        self.dir.join(Self::lock_file_name(service))
    }
}

fn default_state_directory() -> PathBuf {
    #[cfg(unix)]
    {
        if let Some(mut dir) = runtime_dir() {
            dir.push("monctl");
            return dir;
        }
        let mut dir = env::temp_dir();
        dir.push("monctl");
        // SAFETY: geteuid(2) has no failure modes and touches no memory.
        dir.push(format!("uid-{}", unsafe { geteuid() }));
        dir
    }

    #[cfg(not(unix))]
    {
        let mut dir = env::temp_dir();
        dir.push("monctl");
        dir
    }
}

/// Errors raised while preparing the state directory.
#[derive(Debug, Error)]
pub enum StateLayoutError {
    /// Creating the state directory failed.
    #[error("failed to prepare state directory '{path}': {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
