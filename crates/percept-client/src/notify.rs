use serde::Serialize;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Progress,
    Info,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NoticeLink {
    pub href: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<NoticeLink>,
}

impl Notice {
    pub fn progress(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Progress,
            message: message.into(),
            link: None,
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            message: message.into(),
            link: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
            link: None,
        }
    }

    pub fn with_link(mut self, href: impl Into<String>, text: impl Into<String>) -> Self {
        self.link = Some(NoticeLink {
            href: href.into(),
            text: text.into(),
        });
        self
    }
}

/// Anything that can put a message in front of the participant or operator.
pub trait Notifier {
    fn notify(&mut self, notice: Notice);
}

#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&mut self, notice: Notice) {
        let link = notice.link.as_ref().map(|l| l.href.as_str()).unwrap_or("");
        match notice.level {
            NoticeLevel::Progress => info!(link, "{}", notice.message),
            NoticeLevel::Info => info!(link, "{}", notice.message),
            NoticeLevel::Error => error!(link, "{}", notice.message),
        }
    }
}

/// Keeps every notice in order; the CLI prints them in `--json` mode.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    notices: Vec<Notice>,
}

impl RecordingNotifier {
    pub fn notices(&self) -> &[Notice] {
        &self.notices
    }

    pub fn take(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&mut self, notice: Notice) {
        if notice.level == NoticeLevel::Error {
            warn!(message = %notice.message, "notice recorded");
        }
        self.notices.push(notice);
    }
}
