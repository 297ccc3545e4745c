use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use crate::error::{PerceptError, Result};

pub trait Transport {
    fn url(&self, path: &str) -> String;

    fn get_json(&self, path: &str, query: &[(&str, &str)]) -> Result<Value>;

    fn post_form(&self, path: &str, form: &[(&str, &str)]) -> Result<Value>;
}

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct HttpTransport {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: &str, timeout: Duration, user_agent: Option<&str>) -> Result<Self> {
        let mut builder = reqwest::blocking::Client::builder().timeout(timeout);
        if let Some(ua) = user_agent {
            builder = builder.user_agent(ua.to_string());
        }
        let client = builder
            .build()
            .map_err(|e| PerceptError::Config(format!("http client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn finish(&self, url: String, sent: reqwest::Result<reqwest::blocking::Response>) -> Result<Value> {
        let transport_err = |e: reqwest::Error| PerceptError::Transport {
            url: url.clone(),
            message: e.to_string(),
        };
        let resp = sent
            .and_then(|r| r.error_for_status())
            .map_err(transport_err)?;
        resp.json::<Value>().map_err(transport_err)
    }
}

impl Transport for HttpTransport {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn get_json(&self, path: &str, query: &[(&str, &str)]) -> Result<Value> {
        let url = self.url(path);
        debug!(url = %url, "GET");
        let sent = self.client.get(&url).query(query).send();
        self.finish(url, sent)
    }

    fn post_form(&self, path: &str, form: &[(&str, &str)]) -> Result<Value> {
        let url = self.url(path);
        debug!(url = %url, "POST");
        let sent = self.client.post(&url).form(form).send();
        self.finish(url, sent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_joins_without_double_slash() {
        let transport =
            HttpTransport::new("http://127.0.0.1:9/", DEFAULT_TIMEOUT, None).expect("client");
        assert_eq!(
            transport.url("/webexp/stroop/request"),
            "http://127.0.0.1:9/webexp/stroop/request"
        );
    }

    #[test]
    fn unreachable_server_is_a_transport_error() {
        let transport = HttpTransport::new("http://127.0.0.1:9", Duration::from_secs(2), None)
            .expect("client");
        let err = transport
            .get_json("/webexp/stroop/request", &[("version", "final")])
            .expect_err("nothing listens on the discard port");
        match err {
            PerceptError::Transport { url, .. } => {
                assert_eq!(url, "http://127.0.0.1:9/webexp/stroop/request")
            }
            other => panic!("expected transport error, got {:?}", other),
        }
    }
}
