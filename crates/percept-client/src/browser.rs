use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static ENGINE: OnceLock<Regex> = OnceLock::new();
static TRIDENT_RV: OnceLock<Regex> = OnceLock::new();
static OPERA: OnceLock<Regex> = OnceLock::new();
static VERSION: OnceLock<Regex> = OnceLock::new();

fn pattern(cell: &'static OnceLock<Regex>, source: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(source).expect("user-agent pattern"))
}

fn first_capture<'a>(re: &Regex, haystack: &'a str) -> Option<&'a str> {
    re.captures(haystack)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Best-effort client identification attached to every submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowserInfo {
    pub name: String,
    pub version: String,
}

impl BrowserInfo {
    pub fn current() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn from_user_agent(ua: &str) -> Self {
        let engine = pattern(
            &ENGINE,
            r"(?i)(opera|chrome|safari|firefox|msie|trident/)/?\s*(\d+)",
        )
        .captures(ua)
        .map(|c| (c[1].to_string(), c[2].to_string()));

        if let Some((name, _)) = &engine {
            // the trident alternative keeps its slash in the capture
            if name.ends_with('/') {
                let rv = first_capture(pattern(&TRIDENT_RV, r"\brv[ :]+(\d+)"), ua);
                return Self {
                    name: "IE".to_string(),
                    version: rv.unwrap_or_default().to_string(),
                };
            }
            if name == "Chrome" {
                if let Some(opr) = first_capture(pattern(&OPERA, r"\bOPR/(\d+)"), ua) {
                    return Self {
                        name: "Opera".to_string(),
                        version: opr.to_string(),
                    };
                }
            }
        }

        let (name, version) = match engine {
            Some(found) => found,
            None => fallback_product(ua),
        };
        let version = first_capture(pattern(&VERSION, r"(?i)version/(\d+)"), ua)
            .map(str::to_string)
            .unwrap_or(version);
        Self { name, version }
    }
}

fn fallback_product(ua: &str) -> (String, String) {
    let product = ua.split_whitespace().next().unwrap_or("");
    match product.split_once('/') {
        Some((name, version)) if !name.is_empty() => (name.to_string(), version.to_string()),
        _ if !product.is_empty() => (product.to_string(), "-?".to_string()),
        _ => ("unknown".to_string(), "-?".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(ua: &str) -> (String, String) {
        let b = BrowserInfo::from_user_agent(ua);
        (b.name, b.version)
    }

    #[test]
    fn detects_chrome() {
        let ua = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
        assert_eq!(info(ua), ("Chrome".to_string(), "120".to_string()));
    }

    #[test]
    fn detects_opera_behind_chrome() {
        let ua = "Mozilla/5.0 (Windows NT 10.0) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36 OPR/105.0.0.0";
        assert_eq!(info(ua), ("Opera".to_string(), "105".to_string()));
    }

    #[test]
    fn detects_firefox() {
        let ua = "Mozilla/5.0 (X11; Ubuntu; Linux x86_64; rv:121.0) Gecko/20100101 Firefox/121.0";
        assert_eq!(info(ua), ("Firefox".to_string(), "121".to_string()));
    }

    #[test]
    fn safari_takes_version_token() {
        let ua = "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_2) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Safari/605.1.15";
        assert_eq!(info(ua), ("Safari".to_string(), "17".to_string()));
    }

    #[test]
    fn trident_reports_ie_with_rv() {
        let ua = "Mozilla/5.0 (Windows NT 10.0; WOW64; Trident/7.0; rv:11.0) like Gecko";
        assert_eq!(info(ua), ("IE".to_string(), "11".to_string()));
    }

    #[test]
    fn msie_keeps_its_own_version() {
        let ua = "Mozilla/4.0 (compatible; MSIE 8.0; Windows NT 6.1)";
        assert_eq!(info(ua), ("MSIE".to_string(), "8".to_string()));
    }

    #[test]
    fn unknown_agent_falls_back_to_product_token() {
        assert_eq!(
            info("percept-cli/0.3.0"),
            ("percept-cli".to_string(), "0.3.0".to_string())
        );
        assert_eq!(info(""), ("unknown".to_string(), "-?".to_string()));
    }

    #[test]
    fn trident_without_rv_has_empty_version() {
        let ua = "Mozilla/4.0 (compatible; Windows NT 6.1; Trident/4.0; RV:9.0)";
        assert_eq!(info(ua), ("IE".to_string(), String::new()));
    }

    #[test]
    fn trident_needs_a_slash() {
        let ua = "Trident 7 Firefox/90.0";
        assert_eq!(info(ua), ("Firefox".to_string(), "90".to_string()));
    }
}
