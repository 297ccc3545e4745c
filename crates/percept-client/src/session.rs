use std::collections::BTreeMap;

use tracing::debug;

use crate::error::{PerceptError, Result};
use crate::exchange::ExperimentResponse;

#[derive(Debug, Clone, Default)]
pub struct SessionInit {
    pub label: String,
    pub static_root: String,
    pub sandbox: Option<bool>,
    pub completion: Option<BTreeMap<String, u64>>,
}

#[derive(Debug, Clone)]
struct Identity {
    label: String,
    static_root: String,
    prefix: String,
}

#[derive(Debug, Clone, Default)]
pub struct SessionState {
    identity: Option<Identity>,
    sandbox: bool,
    version: Option<String>,
    completion: BTreeMap<String, u64>,
    last_metadata: Option<ExperimentResponse>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn initialized(init: SessionInit) -> Result<Self> {
        let mut state = Self::new();
        state.initialize(init)?;
        Ok(state)
    }

    pub fn initialize(&mut self, init: SessionInit) -> Result<()> {
        if self.identity.is_some() {
            return Err(PerceptError::AlreadyInitialized);
        }
        if let Some(sandbox) = init.sandbox {
            self.sandbox = sandbox;
        }
        let prefix = format!("{}/{}/", init.static_root, init.label);
        debug!(label = %init.label, prefix = %prefix, "session initialized");
        self.identity = Some(Identity {
            label: init.label,
            static_root: init.static_root,
            prefix,
        });
        self.completion = init.completion.unwrap_or_default();
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.identity.is_some()
    }

    pub fn label(&self) -> &str {
        self.identity.as_ref().map(|i| i.label.as_str()).unwrap_or("")
    }

    pub fn static_root(&self) -> &str {
        self.identity
            .as_ref()
            .map(|i| i.static_root.as_str())
            .unwrap_or("")
    }

    pub fn url_prefix(&self) -> &str {
        self.identity.as_ref().map(|i| i.prefix.as_str()).unwrap_or("")
    }

    pub fn asset_url(&self, path: &str) -> String {
        format!("{}{}", self.url_prefix(), path)
    }

    pub fn set_version(&mut self, version: impl Into<String>) {
        self.version = Some(version.into());
    }

    pub fn selected_version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn enable_sandbox(&mut self) {
        self.sandbox = true;
    }

    pub fn is_sandbox(&self) -> bool {
        self.sandbox
    }

    pub fn completion(&self) -> &BTreeMap<String, u64> {
        &self.completion
    }

    pub fn completion_for(&self, config_name: &str) -> u64 {
        self.completion.get(config_name).copied().unwrap_or(0)
    }

    pub fn total_completions(&self) -> u64 {
        self.completion.values().sum()
    }

    pub fn last_metadata(&self) -> Option<&ExperimentResponse> {
        self.last_metadata.as_ref()
    }

    pub(crate) fn record_metadata(&mut self, response: ExperimentResponse) {
        self.last_metadata = Some(response);
    }
}
