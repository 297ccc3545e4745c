//! Client for a remote experiment server: fetches a run
//! configuration, reshapes its timeline for the trial runner and sends the
//! collected results back.

pub mod browser;
pub mod config;
pub mod error;
pub mod exchange;
pub mod export;
pub mod notify;
pub mod session;
pub mod timeline;
pub mod transport;

pub use browser::BrowserInfo;
pub use config::{ClientConfig, CONFIG_TEMPLATE};
pub use error::{PerceptError, Result};
pub use exchange::{
    ExperimentClient, ExperimentResponse, FetchOptions, SubmissionMeta, SubmitOptions,
    SubmitOutcome,
};
pub use export::{ExportFormat, ResultSet};
pub use notify::{LogNotifier, Notice, NoticeLevel, Notifier, RecordingNotifier};
pub use session::{SessionInit, SessionState};
pub use timeline::{
    intersperse, unpack, unpack_plain, InterspersalRequest, IntersperseMode, TrialBlock,
};
pub use transport::{HttpTransport, Transport};
