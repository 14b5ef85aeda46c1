//! vrcwatch - VRChat log watcher.
//!
//! This crate tails the VRChat client's rotating `output_log*.txt` files,
//! classifies free-text presence lines into typed events, reconstructs
//! logical instance sessions, and fans de-duplicated join notifications
//! out to a desktop alert seam and an optional push HTTP endpoint.
//!
//! # Overview
//!
//! The pipeline is a single direction: the [`tailer`] streams classified
//! lines over a bounded channel, the [`session`] reconciler turns them
//! into sessions and notification requests, and the [`dispatch`] layer
//! applies the cooldown ledger and delivers. Everything runs from one
//! consumer loop; only the tailer and individual deliveries get their own
//! tasks.
//!
//! # Modules
//!
//! - [`config`]: Configuration from environment variables
//! - [`error`]: Crate-wide error type
//! - [`normalize`]: Text cleanup for extracted fields
//! - [`classifier`]: Raw line to typed event classification
//! - [`tailer`]: Log file selection, tailing, rotation handling
//! - [`session`]: Session reconstruction and join de-duplication
//! - [`dispatch`]: Cooldown ledger and notification channels

pub mod classifier;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod normalize;
pub mod session;
pub mod tailer;

pub use classifier::{ExtractedFields, LineClassifier, LogEvent};
pub use config::{Config, ConfigError, PushConfig};
pub use dispatch::{
    DeliveryChannel, DeliveryError, Dispatcher, LogAlert, NotificationRequest, PushChannel,
};
pub use error::{MonitorError, Result};
pub use normalize::normalize;
pub use session::SessionReconciler;
pub use tailer::{LogScorer, LogTailer, TailerEvent};
