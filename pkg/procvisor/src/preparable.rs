// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Build-or-validate step that precedes the first launch of a process.

use crate::daemon::DAEMON_PID_FILE;
use crate::error::{Result, SupervisorError};
use crate::process::{ProcessEntity, ProcessSpec};
use crate::store::STATE_FILE_NAME;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tempfile::TempDir;
use tokio::process::Command;

const RESERVED_NAMES: [&str; 2] = [STATE_FILE_NAME, DAEMON_PID_FILE];

/// Toolchains able to turn a source path into an executable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    /// `go build -o {bin} {src}/.`
    #[default]
    Go,
    /// `rustc -O -o {bin} {src}` on a single crate root.
    Rust,
}

impl Language {
    fn toolchain(self) -> &'static str {
        match self {
            Language::Go => "go",
            Language::Rust => "rustc",
        }
    }

    fn build_command(self, source: &Path, bin: &Path) -> Command {
        let mut cmd = Command::new(self.toolchain());
        match self {
            Language::Go => {
                cmd.arg("build")
                    .arg("-o")
                    .arg(bin)
                    .arg(format!("{}/.", source.display()));
            }
            Language::Rust => {
                cmd.arg("-O").arg("-o").arg(bin).arg(source);
            }
        }
        cmd
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Language::Go => write!(f, "go"),
            Language::Rust => write!(f, "rust"),
        }
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "go" => Ok(Language::Go),
            "rust" => Ok(Language::Rust),
            other => Err(format!("unsupported language: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreparableKind {
    SourceBuild(Language),
    PrebuiltBinary,
}

/// A start request that has not been built or validated yet.
#[derive(Debug, Clone)]
pub struct Preparable {
    pub name: String,
    pub source_path: PathBuf,
    pub keep_alive: bool,
    pub args: Vec<String>,
    pub sys_folder: PathBuf,
    pub kind: PreparableKind,
}

/// Output of a successful [`Preparable::prepare`]: the executable exists and
/// the entity descriptor is fully resolved. A fresh build sits in a staging
/// directory until [`Prepared::start`] moves it to `spec.command`.
#[derive(Debug)]
pub struct Prepared {
    spec: ProcessSpec,
    output: String,
    staged: Option<TempDir>,
}

impl Prepared {
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &ProcessSpec {
        &self.spec
    }

    /// Captured toolchain output, empty for prebuilt binaries.
    pub fn output(&self) -> &str {
        &self.output
    }

    /// Install a staged build, then build a fresh entity and launch it.
    pub fn start(self) -> Result<ProcessEntity> {
        if let Some(staged) = &self.staged {
            std::fs::rename(staged.path().join(&self.spec.name), &self.spec.command)
                .map_err(|e| SupervisorError::launch(&self.spec.name, e))?;
        }
        let mut entity = ProcessEntity::new(self.spec);
        entity.start()?;
        Ok(entity)
    }
}

impl Preparable {
    pub fn working_path(&self) -> PathBuf {
        self.sys_folder.join(&self.name)
    }

    fn artifact(&self, suffix: &str) -> PathBuf {
        self.working_path().join(format!("{}{suffix}", self.name))
    }

    /// Build from source or validate the binary, depending on `kind`.
    /// A failure here never launches anything.
    pub async fn prepare(self) -> Result<Prepared> {
        validate_name(&self.name)?;
        std::fs::create_dir_all(self.working_path())
            .map_err(|e| SupervisorError::launch(&self.name, e))?;

        let (output, staged) = match self.kind {
            PreparableKind::SourceBuild(language) => {
                let (output, staged) = self.build(language).await?;
                (output, Some(staged))
            }
            PreparableKind::PrebuiltBinary => {
                self.validate_binary()?;
                (String::new(), None)
            }
        };
        let command = if staged.is_some() {
            self.artifact("")
        } else {
            self.source_path.clone()
        };

        let spec = ProcessSpec {
            name: self.name.clone(),
            source_path: self.source_path.clone(),
            command,
            args: self.args.clone(),
            working_path: self.working_path(),
            pid_file: self.artifact(".pid"),
            stdout_file: self.artifact(".out"),
            stderr_file: self.artifact(".err"),
            keep_alive: self.keep_alive,
        };
        Ok(Prepared {
            spec,
            output,
            staged,
        })
    }

    /// Build into a staging directory inside the working path. The live
    /// executable of a registered process with the same name is untouched.
    async fn build(&self, language: Language) -> Result<(String, TempDir)> {
        let source = trim_trailing_slash(&self.source_path);
        let staged = tempfile::Builder::new()
            .prefix(".build-")
            .tempdir_in(self.working_path())
            .map_err(|e| SupervisorError::Build {
                name: self.name.clone(),
                reason: format!("failed to create staging directory: {e}"),
                output: String::new(),
            })?;
        let bin = staged.path().join(&self.name);
        info!(
            "[{}] building {} with {}",
            self.name,
            source.display(),
            language
        );

        let result = language
            .build_command(&source, &bin)
            .output()
            .await
            .map_err(|e| SupervisorError::Build {
                name: self.name.clone(),
                reason: format!("failed to run {}: {e}", language.toolchain()),
                output: String::new(),
            })?;

        let mut output = String::from_utf8_lossy(&result.stdout).into_owned();
        output.push_str(&String::from_utf8_lossy(&result.stderr));

        if !result.status.success() {
            return Err(SupervisorError::Build {
                name: self.name.clone(),
                reason: result.status.to_string(),
                output,
            });
        }
        debug!("[{}] build finished: {}", self.name, bin.display());
        Ok((output, staged))
    }

    fn validate_binary(&self) -> Result<()> {
        let not_executable = |reason: String| SupervisorError::NotExecutable {
            path: self.source_path.clone(),
            reason,
        };
        let meta = std::fs::metadata(&self.source_path).map_err(|e| not_executable(e.to_string()))?;
        if !meta.is_file() {
            return Err(not_executable("not a regular file".into()));
        }
        if meta.permissions().mode() & 0o111 == 0 {
            return Err(not_executable(
                "no execute permission and not a source to build".into(),
            ));
        }
        Ok(())
    }
}

/// Names become directory and file names under the system folder, next to
/// the daemon's own files. Leading dots are reserved for temporary files.
pub fn validate_name(name: &str) -> Result<()> {
    let bad = name.is_empty()
        || name.starts_with('.')
        || name.contains('/')
        || name.contains('\0')
        || RESERVED_NAMES.contains(&name);
    if bad {
        return Err(SupervisorError::InvalidName(name.to_string()));
    }
    Ok(())
}

fn trim_trailing_slash(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    match s.trim_end_matches('/') {
        "" => path.to_path_buf(),
        trimmed => PathBuf::from(trimmed),
    }
}
