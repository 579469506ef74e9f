// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::error::{Result, SupervisorError};
use crate::process::ProcessSpec;
use log::debug;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

pub const STATE_FILE_NAME: &str = "state.yaml";

/// Durable form of the registry. Pids and status are never stored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryState {
    pub sys_folder: PathBuf,
    #[serde(default)]
    pub processes: Vec<ProcessSpec>,
}

pub trait Store: Send + Sync {
    fn persist(&self, state: &RegistryState) -> Result<()>;
    fn load(&self) -> Result<RegistryState>;
}

/// Single YAML document, replaced atomically on every persist.
#[derive(Debug, Clone)]
pub struct YamlStore {
    path: PathBuf,
}

impl YamlStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn in_sys_folder(sys_folder: &Path) -> Self {
        Self::new(sys_folder.join(STATE_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Store for YamlStore {
    fn persist(&self, state: &RegistryState) -> Result<()> {
        let persistence = |what: &str, e: &dyn std::fmt::Display| {
            SupervisorError::Persistence(format!("{what} {}: {e}", self.path.display()))
        };
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        std::fs::create_dir_all(dir).map_err(|e| persistence("creating parent of", &e))?;

        let yaml = serde_yaml::to_string(state).map_err(|e| persistence("serializing", &e))?;
        let mut tmp =
            tempfile::NamedTempFile::new_in(dir).map_err(|e| persistence("staging", &e))?;
        tmp.write_all(yaml.as_bytes())
            .and_then(|()| tmp.as_file().sync_all())
            .map_err(|e| persistence("writing", &e))?;
        tmp.persist(&self.path)
            .map_err(|e| persistence("replacing", &e.error))?;

        debug!(
            "persisted {} process(es) to {}",
            state.processes.len(),
            self.path.display()
        );
        Ok(())
    }

    /// A missing file is an empty registry.
    fn load(&self) -> Result<RegistryState> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(RegistryState::default());
            }
            Err(e) => {
                return Err(SupervisorError::Persistence(format!(
                    "reading {}: {e}",
                    self.path.display()
                )));
            }
        };
        serde_yaml::from_str(&contents).map_err(|e| {
            SupervisorError::Persistence(format!("parsing {}: {e}", self.path.display()))
        })
    }
}
