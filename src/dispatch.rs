//! Notification fan-out with per-key cooldown.
//!
//! The reconciler decides *what* is notable; the dispatcher decides
//! *whether* and *where* it goes out. Every request carries a cooldown
//! key, and a key that fired within the cooldown window is suppressed
//! wholesale. Delivery itself is fire-and-forget: each channel send runs
//! on its own task so a slow push endpoint never stalls log consumption,
//! and a failed delivery is logged, never retried.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// One notification as shaped by the session layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationRequest {
    /// Suppression identity. Two requests with the same key within the
    /// cooldown window collapse to one delivery.
    pub cooldown_key: String,
    pub title: String,
    pub message: String,
    pub wants_desktop: bool,
    pub wants_push: bool,
}

/// Errors surfaced by a delivery channel.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("push endpoint rejected the token")]
    AuthFailed,

    #[error("push endpoint returned {status}: {message}")]
    ServerError { status: u16, message: String },
}

/// A destination that can carry a title/message pair.
///
/// The future must be `Send` because deliveries run on spawned tasks.
pub trait DeliveryChannel: Send + Sync + 'static {
    fn send(
        &self,
        title: &str,
        message: &str,
    ) -> impl std::future::Future<Output = Result<(), DeliveryError>> + Send;
}

/// Applies the cooldown ledger and fans requests out to the configured
/// channels.
#[derive(Debug)]
pub struct Dispatcher<D: DeliveryChannel, P: DeliveryChannel> {
    cooldown: chrono::Duration,
    ledger: HashMap<String, DateTime<Utc>>,
    desktop: Option<Arc<D>>,
    push: Option<Arc<P>>,
    deliveries: JoinSet<()>,
}

impl<D: DeliveryChannel, P: DeliveryChannel> Dispatcher<D, P> {
    #[must_use]
    pub fn new(cooldown: Duration, desktop: Option<D>, push: Option<P>) -> Self {
        Self {
            cooldown: chrono::Duration::seconds(cooldown.as_secs() as i64),
            ledger: HashMap::new(),
            desktop: desktop.map(Arc::new),
            push: push.map(Arc::new),
            deliveries: JoinSet::new(),
        }
    }

    /// Returns `false` when the request was suppressed by the cooldown.
    ///
    /// An accepted request refreshes its ledger entry even when no
    /// channel wants it, so "a player" style non-alerts still hold their
    /// suppression slot.
    pub fn dispatch(&mut self, request: NotificationRequest, now: DateTime<Utc>) -> bool {
        // Reap finished delivery tasks so the set stays small.
        while self.deliveries.try_join_next().is_some() {}

        if let Some(last) = self.ledger.get(&request.cooldown_key) {
            if now - *last < self.cooldown {
                info!("Suppressed '{}' within cooldown.", request.cooldown_key);
                return false;
            }
        }
        self.ledger.insert(request.cooldown_key.clone(), now);

        if request.wants_desktop {
            if let Some(sink) = &self.desktop {
                spawn_delivery(
                    &mut self.deliveries,
                    "desktop",
                    Arc::clone(sink),
                    request.title.clone(),
                    request.message.clone(),
                );
            }
        }
        if request.wants_push {
            if let Some(sink) = &self.push {
                spawn_delivery(
                    &mut self.deliveries,
                    "push",
                    Arc::clone(sink),
                    request.title,
                    request.message,
                );
            }
        }
        true
    }

    /// Waits up to `grace` for in-flight deliveries to finish. Returns
    /// how many were still pending when the grace period ran out.
    pub async fn shutdown(&mut self, grace: Duration) -> usize {
        let deadline = tokio::time::Instant::now() + grace;
        while !self.deliveries.is_empty() {
            match tokio::time::timeout_at(deadline, self.deliveries.join_next()).await {
                Ok(Some(_)) => {}
                Ok(None) => break,
                Err(_) => break,
            }
        }
        self.deliveries.len()
    }
}

fn spawn_delivery<C: DeliveryChannel>(
    deliveries: &mut JoinSet<()>,
    channel: &'static str,
    sink: Arc<C>,
    title: String,
    message: String,
) {
    deliveries.spawn(async move {
        match sink.send(&title, &message).await {
            Ok(()) => debug!(channel, title = %title, "Notification delivered"),
            Err(e) => warn!(channel, error = %e, "Notification delivery failed"),
        }
    });
}

/// Desktop alert stand-in that writes to the log under a dedicated
/// target. A platform toast sender implements [`DeliveryChannel`] the
/// same way and slots in here.
#[derive(Debug, Default)]
pub struct LogAlert;

impl DeliveryChannel for LogAlert {
    fn send(
        &self,
        title: &str,
        message: &str,
    ) -> impl std::future::Future<Output = Result<(), DeliveryError>> + Send {
        info!(target: "vrcwatch::alert", "{title}: {message}");
        std::future::ready(Ok(()))
    }
}

#[derive(Serialize)]
struct PushBody<'a> {
    title: &'a str,
    message: &'a str,
}

const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Bearer-token JSON POST channel.
#[derive(Debug, Clone)]
pub struct PushChannel {
    url: String,
    token: String,
    client: reqwest::Client,
}

impl PushChannel {
    pub fn new(url: String, token: String) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self { url, token, client })
    }
}

impl DeliveryChannel for PushChannel {
    fn send(
        &self,
        title: &str,
        message: &str,
    ) -> impl std::future::Future<Output = Result<(), DeliveryError>> + Send {
        // Serialize eagerly so the future owns its request outright.
        let request = self
            .client
            .post(&self.url)
            .bearer_auth(&self.token)
            .json(&PushBody { title, message });

        async move {
            let response = request.send().await?;
            let status = response.status();
            if status.is_success() {
                return Ok(());
            }
            if status == reqwest::StatusCode::UNAUTHORIZED {
                return Err(DeliveryError::AuthFailed);
            }
            let message = response.text().await.unwrap_or_default();
            Err(DeliveryError::ServerError {
                status: status.as_u16(),
                message,
            })
        }
    }
}
