use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::browser::BrowserInfo;
use crate::config::ClientConfig;
use crate::error::{PerceptError, Result};
use crate::export::{ExportFormat, ResultSet};
use crate::notify::{Notice, Notifier};
use crate::session::SessionState;
use crate::timeline::{is_truthy, unpack_plain, TrialBlock};
use crate::transport::{HttpTransport, Transport};

pub const WEBEXP_ROOT: &str = "/webexp";
pub const DEFAULT_VERSION: &str = "final";
const HOME_LINK_TEXT: &str = "Back to homepage";

/// Configuration payload returned by the server for one experiment run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExperimentResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
    #[serde(default)]
    pub timeline: Vec<TrialBlock>,
    #[serde(default)]
    pub name: Value,
    #[serde(default)]
    pub subject: Value,
    #[serde(default)]
    pub current_exp: Value,
    #[serde(default)]
    pub exp_id: Value,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub previous: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmissionMeta {
    pub browser: BrowserInfo,
    pub name: Value,
    pub subject: Value,
    pub current_exp: Value,
    pub exp_id: Value,
    pub previous: Value,
    pub completed: bool,
    #[serde(rename = "extraParams", skip_serializing_if = "Option::is_none")]
    pub extra_params: Option<Value>,
}

#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    pub version: Option<String>,
    pub override_payload: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    pub data: ResultSet,
    pub to_save: Option<Value>,
    pub complete: Option<bool>,
    pub previous: Option<Value>,
    pub format: Option<ExportFormat>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    Saved {
        message: String,
        meta: SubmissionMeta,
    },
    Exported {
        format: ExportFormat,
        body: String,
        meta: SubmissionMeta,
    },
}

impl SubmitOutcome {
    pub fn meta(&self) -> &SubmissionMeta {
        match self {
            SubmitOutcome::Saved { meta, .. } | SubmitOutcome::Exported { meta, .. } => meta,
        }
    }
}

pub struct ExperimentClient<T, N> {
    session: SessionState,
    transport: T,
    notifier: N,
    browser: BrowserInfo,
    export_format: ExportFormat,
}

impl<N: Notifier> ExperimentClient<HttpTransport, N> {
    pub fn from_config(config: &ClientConfig, notifier: N) -> Result<Self> {
        config.validate()?;
        let session = SessionState::initialized(config.session_init())?;
        let transport = HttpTransport::new(
            &config.server_url,
            config.timeout(),
            config.user_agent.as_deref(),
        )?;
        let mut client =
            Self::new(session, transport, notifier).with_export_format(config.export_format);
        if let Some(ua) = &config.user_agent {
            client = client.with_browser(BrowserInfo::from_user_agent(ua));
        }
        if let Some(version) = &config.version {
            client.session.set_version(version.clone());
        }
        Ok(client)
    }
}

impl<T: Transport, N: Notifier> ExperimentClient<T, N> {
    pub fn new(session: SessionState, transport: T, notifier: N) -> Self {
        Self {
            session,
            transport,
            notifier,
            browser: BrowserInfo::current(),
            export_format: ExportFormat::default(),
        }
    }

    pub fn with_browser(mut self, browser: BrowserInfo) -> Self {
        self.browser = browser;
        self
    }

    pub fn with_export_format(mut self, format: ExportFormat) -> Self {
        self.export_format = format;
        self
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut SessionState {
        &mut self.session
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    pub fn notifier_mut(&mut self) -> &mut N {
        &mut self.notifier
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn endpoint(&self, action: &str) -> Result<String> {
        if !self.session.is_initialized() {
            return Err(PerceptError::NotInitialized);
        }
        Ok(format!("{}/{}/{}", WEBEXP_ROOT, self.session.label(), action))
    }

    fn resolve_version(&self, requested: Option<&str>) -> String {
        requested
            .filter(|v| !v.is_empty())
            .or_else(|| self.session.selected_version().filter(|v| !v.is_empty()))
            .unwrap_or(DEFAULT_VERSION)
            .to_string()
    }

    fn fail(&mut self, err: PerceptError, notice: Notice) -> PerceptError {
        warn!(code = err.code(), "{}", err);
        self.notifier.notify(notice);
        err
    }

    pub fn fetch_configuration(&mut self, options: &FetchOptions) -> Result<ExperimentResponse> {
        let path = self.endpoint("request")?;
        let version = self.resolve_version(options.version.as_deref());
        debug!(version = %version, "requesting configuration");

        let raw = match self.transport.get_json(&path, &[("version", version.as_str())]) {
            Ok(raw) => raw,
            Err(err) => {
                let notice = Notice::error(err.to_string());
                return Err(self.fail(err, notice));
            }
        };
        if let Some(message) = fetch_error(&raw) {
            let notice = Notice::error(format!("ERROR\n{}", message));
            return Err(self.fail(PerceptError::Application(message), notice));
        }

        let replacement = options
            .override_payload
            .as_deref()
            .filter(|p| !p.trim().is_empty());
        let mut response = match replacement {
            Some(payload) => match parse_override(payload) {
                Ok(response) => response,
                Err(err) => {
                    let notice = Notice::error(err.to_string());
                    return Err(self.fail(err, notice));
                }
            },
            None => match serde_json::from_value::<ExperimentResponse>(raw) {
                Ok(response) => response,
                Err(e) => {
                    let err = PerceptError::Application(format!("malformed configuration: {}", e));
                    let notice = Notice::error(err.to_string());
                    return Err(self.fail(err, notice));
                }
            },
        };

        response.timeline = unpack_plain(&response.timeline);
        self.session.record_metadata(response.clone());
        info!(
            label = self.session.label(),
            version = %version,
            trials = response.timeline.len(),
            overridden = replacement.is_some(),
            "configuration received"
        );
        Ok(response)
    }

    pub fn build_meta(&self, options: &SubmitOptions) -> Result<SubmissionMeta> {
        let meta = self
            .session
            .last_metadata()
            .ok_or(PerceptError::Precondition)?;
        let previous = match &options.previous {
            Some(previous) => previous.clone(),
            None if is_truthy(&meta.previous) => meta.previous.clone(),
            None => Value::Bool(false),
        };
        Ok(SubmissionMeta {
            browser: self.browser.clone(),
            name: meta.name.clone(),
            subject: meta.subject.clone(),
            current_exp: meta.current_exp.clone(),
            exp_id: meta.exp_id.clone(),
            previous,
            completed: options.complete.unwrap_or(true),
            extra_params: options.to_save.clone(),
        })
    }

    pub fn submit_results(&mut self, options: SubmitOptions) -> Result<SubmitOutcome> {
        let path = self.endpoint("save")?;
        let meta = match self.build_meta(&options) {
            Ok(meta) => meta,
            Err(err) => {
                let notice = Notice::error(err.to_string());
                return Err(self.fail(err, notice));
            }
        };

        if self.session.is_sandbox() {
            let format = options.format.unwrap_or(self.export_format);
            let body = match options.data.export(format) {
                Ok(body) => body,
                Err(err) => {
                    let notice = Notice::error(err.to_string());
                    return Err(self.fail(err, notice));
                }
            };
            info!(format = %format, records = options.data.len(), "sandbox export, nothing sent");
            return Ok(SubmitOutcome::Exported { format, body, meta });
        }

        self.notifier.notify(Notice::progress("Sending data..."));
        let encoded = options.data.to_json().and_then(|data| {
            let meta_json =
                serde_json::to_string(&meta).map_err(|e| PerceptError::Export(e.to_string()))?;
            Ok((data, meta_json))
        });
        let (data, meta_json) = match encoded {
            Ok(encoded) => encoded,
            Err(err) => {
                let notice = Notice::error(err.to_string());
                return Err(self.fail(err, notice));
            }
        };
        let resp = match self
            .transport
            .post_form(&path, &[("data", data.as_str()), ("meta", meta_json.as_str())])
        {
            Ok(resp) => resp,
            Err(err) => {
                let notice = Notice::error(err.to_string());
                return Err(self.fail(err, notice));
            }
        };

        if let Some(message) = save_error(&resp) {
            let notice = Notice::error(message.clone()).with_link(WEBEXP_ROOT, HOME_LINK_TEXT);
            return Err(self.fail(PerceptError::Application(message), notice));
        }
        let message = resp
            .get("success")
            .map(value_text)
            .unwrap_or_default();
        self.notifier
            .notify(Notice::info(message.clone()).with_link(WEBEXP_ROOT, HOME_LINK_TEXT));
        info!(records = options.data.len(), "results saved");
        Ok(SubmitOutcome::Saved { message, meta })
    }
}

fn parse_override(payload: &str) -> Result<ExperimentResponse> {
    let value: Value =
        serde_json::from_str(payload).map_err(|e| PerceptError::MalformedOverride(e.to_string()))?;
    serde_json::from_value(value).map_err(|e| PerceptError::MalformedOverride(e.to_string()))
}

// A configuration reply fails on any non-null `error`, `false` included.
fn fetch_error(resp: &Value) -> Option<String> {
    match resp.get("error") {
        None | Some(Value::Null) => None,
        Some(v) => Some(value_text(v)),
    }
}

// A save reply only fails on a truthy `error`.
fn save_error(resp: &Value) -> Option<String> {
    resp.get("error").filter(|v| is_truthy(v)).map(value_text)
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
