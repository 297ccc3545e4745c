use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PerceptError, Result};
use crate::export::ExportFormat;
use crate::session::SessionInit;

fn default_server_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_server_url")]
    pub server_url: String,
    pub label: String,
    #[serde(default)]
    pub static_root: String,
    #[serde(default)]
    pub sandbox: bool,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub completion: BTreeMap<String, u64>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub export_format: ExportFormat,
}

impl ClientConfig {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            server_url: default_server_url(),
            label: label.into(),
            static_root: String::new(),
            sandbox: false,
            version: None,
            completion: BTreeMap::new(),
            timeout_secs: default_timeout_secs(),
            user_agent: None,
            export_format: ExportFormat::default(),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|e| PerceptError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        let config: ClientConfig =
            serde_yaml::from_str(raw).map_err(|e| PerceptError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let mut missing = Vec::new();
        if self.label.trim().is_empty() {
            missing.push("label");
        }
        if self.server_url.trim().is_empty() {
            missing.push("server_url");
        }
        if !missing.is_empty() {
            return Err(PerceptError::Config(format!(
                "missing required fields: {}",
                missing.join(", ")
            )));
        }
        if self.timeout_secs == 0 {
            return Err(PerceptError::Config(
                "timeout_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn session_init(&self) -> SessionInit {
        SessionInit {
            label: self.label.clone(),
            static_root: self.static_root.clone(),
            sandbox: Some(self.sandbox),
            completion: Some(self.completion.clone()),
        }
    }
}

pub const CONFIG_TEMPLATE: &str = "\
server_url: http://localhost:8000   # experiment server root
label: ''                           # REQUIRED: experiment label on the server
static_root: /static                # where the server publishes experiment assets
sandbox: false                      # true: never submit, export results locally
version: final                      # configuration name to request
completion: {}                      # configuration name -> completed runs
timeout_secs: 30
export_format: json                 # sandbox export: csv | json
";
