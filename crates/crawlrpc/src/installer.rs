//! Language and dependency installation on the local node.
//!
//! `Installer` is the seam the built-in RPC handlers call through.
//! `SystemInstaller` shells out to the package managers; language gating
//! follows what nodes actually support:
//! - language install: Node.js
//! - dependency install/uninstall: Python
//! - listing: Python and Node.js

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::bridge::protocol::Lang;

/// An installed (or installable) package.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub installed: bool,
    #[serde(default)]
    pub latest_version: String,
}

impl Dependency {
    pub fn installed(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            installed: true,
            ..Default::default()
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    #[error("unsupported language for {operation}: {lang}")]
    UnsupportedLanguage {
        operation: &'static str,
        lang: String,
    },

    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}")]
    Failed {
        program: String,
        status: String,
        output: String,
    },

    #[error("failed to parse {program} output: {message}")]
    Parse { program: String, message: String },
}

impl InstallError {
    fn unsupported(operation: &'static str, lang: &Lang) -> Self {
        Self::UnsupportedLanguage {
            operation,
            lang: lang.to_string(),
        }
    }

    /// Output captured before the failure, if any.
    pub fn output(&self) -> &str {
        match self {
            Self::Failed { output, .. } => output,
            _ => "",
        }
    }
}

#[async_trait]
pub trait Installer: Send + Sync + 'static {
    async fn install_language(&self, lang: &Lang) -> Result<String, InstallError>;

    async fn install_dependency(&self, lang: &Lang, dep_name: &str)
    -> Result<String, InstallError>;

    async fn uninstall_dependency(
        &self,
        lang: &Lang,
        dep_name: &str,
    ) -> Result<String, InstallError>;

    async fn list_installed_dependencies(
        &self,
        lang: &Lang,
    ) -> Result<Vec<Dependency>, InstallError>;
}

#[derive(Debug, Clone)]
pub struct InstallerConfig {
    pub pip: String,
    pub npm: String,
    pub nodejs_install_script: PathBuf,
}

impl Default for InstallerConfig {
    fn default() -> Self {
        Self {
            pip: std::env::var("CRAWLRPC_PIP").unwrap_or_else(|_| "pip".to_string()),
            npm: std::env::var("CRAWLRPC_NPM").unwrap_or_else(|_| "npm".to_string()),
            nodejs_install_script: std::env::var("CRAWLRPC_NODEJS_INSTALL_SCRIPT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("scripts/install-nodejs.sh")),
        }
    }
}

/// Installer backed by the node's package managers.
#[derive(Debug, Clone, Default)]
pub struct SystemInstaller {
    config: InstallerConfig,
}

impl SystemInstaller {
    pub fn new(config: InstallerConfig) -> Self {
        Self { config }
    }

    /// Run a command to completion and return stdout followed by stderr.
    async fn run(&self, program: &str, args: &[&str]) -> Result<String, InstallError> {
        tracing::debug!(program, ?args, "Running installer command");

        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| InstallError::Spawn {
                program: program.to_string(),
                source,
            })?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() {
            tracing::warn!(program, status = %output.status, "Installer command failed");
            return Err(InstallError::Failed {
                program: program.to_string(),
                status: output.status.to_string(),
                output: combined,
            });
        }

        Ok(combined)
    }

    async fn run_stdout(&self, program: &str, args: &[&str]) -> Result<Vec<u8>, InstallError> {
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .await
            .map_err(|source| InstallError::Spawn {
                program: program.to_string(),
                source,
            })?;

        // `npm ls` exits non-zero on peer-dependency warnings but still prints
        // the tree, so only an empty stdout is treated as failure.
        if !output.status.success() && output.stdout.is_empty() {
            return Err(InstallError::Failed {
                program: program.to_string(),
                status: output.status.to_string(),
                output: String::new(),
            });
        }
        Ok(output.stdout)
    }
}

#[async_trait]
impl Installer for SystemInstaller {
    async fn install_language(&self, lang: &Lang) -> Result<String, InstallError> {
        match lang {
            Lang::Nodejs => {
                let script = self.config.nodejs_install_script.to_string_lossy();
                self.run("sh", &[script.as_ref()]).await
            }
            other => Err(InstallError::unsupported("language install", other)),
        }
    }

    async fn install_dependency(
        &self,
        lang: &Lang,
        dep_name: &str,
    ) -> Result<String, InstallError> {
        match lang {
            Lang::Python => self.run(&self.config.pip, &["install", dep_name]).await,
            other => Err(InstallError::unsupported("dependency install", other)),
        }
    }

    async fn uninstall_dependency(
        &self,
        lang: &Lang,
        dep_name: &str,
    ) -> Result<String, InstallError> {
        match lang {
            Lang::Python => {
                self.run(&self.config.pip, &["uninstall", "-y", dep_name])
                    .await
            }
            other => Err(InstallError::unsupported("dependency uninstall", other)),
        }
    }

    async fn list_installed_dependencies(
        &self,
        lang: &Lang,
    ) -> Result<Vec<Dependency>, InstallError> {
        match lang {
            Lang::Python => {
                let stdout = self
                    .run_stdout(&self.config.pip, &["list", "--format=json"])
                    .await?;
                parse_pip_list(&stdout).map_err(|message| InstallError::Parse {
                    program: self.config.pip.clone(),
                    message,
                })
            }
            Lang::Nodejs => {
                let stdout = self
                    .run_stdout(&self.config.npm, &["ls", "-g", "--depth=0", "--json"])
                    .await?;
                parse_npm_ls(&stdout).map_err(|message| InstallError::Parse {
                    program: self.config.npm.clone(),
                    message,
                })
            }
            other => Err(InstallError::unsupported("dependency listing", other)),
        }
    }
}

#[derive(Deserialize)]
struct PipPackage {
    name: String,
    version: String,
}

/// Parse `pip list --format=json`.
fn parse_pip_list(stdout: &[u8]) -> Result<Vec<Dependency>, String> {
    let packages: Vec<PipPackage> = serde_json::from_slice(stdout).map_err(|e| e.to_string())?;
    Ok(packages
        .into_iter()
        .map(|p| Dependency::installed(p.name, p.version))
        .collect())
}

#[derive(Deserialize)]
struct NpmTree {
    #[serde(default)]
    dependencies: BTreeMap<String, NpmPackage>,
}

#[derive(Deserialize)]
struct NpmPackage {
    #[serde(default)]
    version: String,
}

/// Parse `npm ls -g --depth=0 --json`.
fn parse_npm_ls(stdout: &[u8]) -> Result<Vec<Dependency>, String> {
    let tree: NpmTree = serde_json::from_slice(stdout).map_err(|e| e.to_string())?;
    Ok(tree
        .dependencies
        .into_iter()
        .map(|(name, p)| Dependency::installed(name, p.version))
        .collect())
}
