//! Fakes shared by unit tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::bridge::protocol::Lang;
use crate::installer::{Dependency, InstallError, Installer};
use crate::queue::MemoryQueueStore;

/// Installer that answers like the package managers without running them.
#[derive(Default)]
pub(crate) struct ScriptedInstaller {
    failure: Option<String>,
    installed: HashMap<Lang, Vec<Dependency>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedInstaller {
    /// Every supported operation fails with `output`.
    pub(crate) fn failing(mut self, output: &str) -> Self {
        self.failure = Some(output.to_string());
        self
    }

    pub(crate) fn with_installed(mut self, lang: Lang, deps: Vec<Dependency>) -> Self {
        self.installed.insert(lang, deps);
        self
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) -> Result<(), InstallError> {
        self.calls.lock().unwrap().push(call);
        match &self.failure {
            Some(output) => Err(InstallError::Failed {
                program: "scripted".to_string(),
                status: "exit status: 1".to_string(),
                output: output.clone(),
            }),
            None => Ok(()),
        }
    }
}

fn unsupported(operation: &'static str, lang: &Lang) -> InstallError {
    InstallError::UnsupportedLanguage {
        operation,
        lang: lang.to_string(),
    }
}

#[async_trait]
impl Installer for ScriptedInstaller {
    async fn install_language(&self, lang: &Lang) -> Result<String, InstallError> {
        if *lang != Lang::Nodejs {
            return Err(unsupported("language install", lang));
        }
        self.record(format!("install_lang {lang}"))?;
        Ok(format!("{lang} installed"))
    }

    async fn install_dependency(
        &self,
        lang: &Lang,
        dep_name: &str,
    ) -> Result<String, InstallError> {
        if *lang != Lang::Python {
            return Err(unsupported("dependency install", lang));
        }
        self.record(format!("install_dep {lang} {dep_name}"))?;
        Ok(format!("Successfully installed {dep_name}"))
    }

    async fn uninstall_dependency(
        &self,
        lang: &Lang,
        dep_name: &str,
    ) -> Result<String, InstallError> {
        if *lang != Lang::Python {
            return Err(unsupported("dependency uninstall", lang));
        }
        self.record(format!("uninstall_dep {lang} {dep_name}"))?;
        Ok(format!("Successfully uninstalled {dep_name}"))
    }

    async fn list_installed_dependencies(
        &self,
        lang: &Lang,
    ) -> Result<Vec<Dependency>, InstallError> {
        if !matches!(lang, Lang::Python | Lang::Nodejs) {
            return Err(unsupported("dependency listing", lang));
        }
        self.record(format!("get_installed_dep_list {lang}"))?;
        Ok(self.installed.get(lang).cloned().unwrap_or_default())
    }
}

/// Wait until something is blocked popping `key`.
pub(crate) async fn wait_for_waiter(store: &MemoryQueueStore, key: &str) {
    for _ in 0..5000 {
        if store.waiting(key) > 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("nothing started waiting on {key}");
}
