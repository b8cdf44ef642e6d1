//! Outbound delivery of accepted findings.
//!
//! A [`DeliverySink`] receives every finding that leaves the system: triage
//! classifications in normal mode, raw findings in direct mode. The session
//! always records deliveries in `findings_delivered.log`; a webhook can be
//! added on top.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use crate::fsio::append_text;
use crate::triage::finding::Finding;
use crate::triage::pipeline::Classification;

pub const DELIVERY_LOG_FILE: &str = "findings_delivered.log";

/// Boxed future returned by [`DeliverySink::deliver`].
pub type DeliveryFuture<'a> = Pin<Box<dyn Future<Output = Result<(), String>> + Send + 'a>>;

/// What is being delivered.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Delivery {
    /// Reproduced and scored by the triage pipeline.
    Classified(Classification),
    /// Submitted in direct mode, bypassing triage.
    Direct(Finding),
}

impl Delivery {
    pub fn finding(&self) -> &Finding {
        match self {
            Self::Classified(c) => &c.finding,
            Self::Direct(f) => f,
        }
    }

    /// Human-readable block for the delivery log.
    pub fn render(&self) -> String {
        let finding = self.finding();
        let mut text = format!(
            "=== FINDING DELIVERED ===\nTimestamp: {}\n",
            Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
        );
        match self {
            Self::Classified(c) => {
                text.push_str(&format!(
                    "Triage severity: {} ({:.1})\n",
                    c.severity, c.score
                ));
                if let Some(ref vector) = c.vector {
                    text.push_str(&format!("Vector: {vector}\n"));
                }
                text.push_str(&format!("Assessment: {}\n", c.reasoning));
            }
            Self::Direct(_) => text.push_str("Mode: direct\n"),
        }
        text.push('\n');
        text.push_str(&finding.render());
        text.push_str("\n=========================\n\n");
        text
    }
}

/// Receives findings leaving the system.
pub trait DeliverySink: Send + Sync {
    fn deliver<'a>(&'a self, delivery: &'a Delivery) -> DeliveryFuture<'a>;
}

/// Appends deliveries to a log file.
#[derive(Debug, Clone)]
pub struct FileDeliverySink {
    path: PathBuf,
}

impl FileDeliverySink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Sink writing `<session_dir>/findings_delivered.log`.
    pub fn in_session(session_dir: &Path) -> Self {
        Self::new(session_dir.join(DELIVERY_LOG_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DeliverySink for FileDeliverySink {
    fn deliver<'a>(&'a self, delivery: &'a Delivery) -> DeliveryFuture<'a> {
        Box::pin(async move {
            append_text(&self.path, &delivery.render()).await?;
            info!(
                "Recorded delivery of '{}' in {}",
                delivery.finding().title,
                self.path.display()
            );
            Ok(())
        })
    }
}

/// POSTs deliveries as JSON to a webhook.
#[derive(Debug, Clone)]
pub struct WebhookDeliverySink {
    client: reqwest::Client,
    url: String,
}

impl WebhookDeliverySink {
    pub fn new(url: impl Into<String>) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| format!("failed to build HTTP client: {e}"))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

impl DeliverySink for WebhookDeliverySink {
    fn deliver<'a>(&'a self, delivery: &'a Delivery) -> DeliveryFuture<'a> {
        Box::pin(async move {
            let resp = self
                .client
                .post(&self.url)
                .json(delivery)
                .send()
                .await
                .map_err(|e| format!("webhook request failed: {e}"))?;
            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(format!("webhook returned {status}: {body}"));
            }
            info!("Delivered '{}' to webhook", delivery.finding().title);
            Ok(())
        })
    }
}

/// Delivers to every inner sink; fails if any of them failed.
#[derive(Clone, Default)]
pub struct FanOutSink {
    sinks: Vec<Arc<dyn DeliverySink>>,
}

impl FanOutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn DeliverySink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl DeliverySink for FanOutSink {
    fn deliver<'a>(&'a self, delivery: &'a Delivery) -> DeliveryFuture<'a> {
        Box::pin(async move {
            let results =
                futures::future::join_all(self.sinks.iter().map(|s| s.deliver(delivery))).await;
            let errors: Vec<String> = results.into_iter().filter_map(Result::err).collect();
            if errors.is_empty() {
                Ok(())
            } else {
                for e in &errors {
                    warn!("Delivery failed: {e}");
                }
                Err(errors.join("; "))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::triage::phase::Severity;

    fn finding() -> Finding {
        Finding {
            title: "SSRF in avatar fetch".into(),
            asset: "https://api.example".into(),
            vuln_type: "SSRF".into(),
            severity: "High".into(),
            description: "avatar_url is fetched server side".into(),
            repro_steps: "set avatar_url=http://169.254.169.254/".into(),
            impact: "cloud credential theft".into(),
            cleanup: "reset avatar".into(),
        }
    }

    struct Failing;

    impl DeliverySink for Failing {
        fn deliver<'a>(&'a self, _delivery: &'a Delivery) -> DeliveryFuture<'a> {
            Box::pin(async { Err("unreachable".to_string()) })
        }
    }

    #[tokio::test]
    async fn file_sink_appends_rendered_block() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileDeliverySink::in_session(dir.path());
        let classified = Delivery::Classified(Classification {
            finding: finding(),
            severity: Severity::Critical,
            score: 9.1,
            vector: Some("AV:N/AC:L/PR:N/UI:N/S:C/C:H/I:N/A:N".into()),
            reasoning: "metadata reachable".into(),
        });
        sink.deliver(&classified).await.unwrap();
        sink.deliver(&Delivery::Direct(finding())).await.unwrap();

        let log = std::fs::read_to_string(sink.path()).unwrap();
        assert_eq!(log.matches("=== FINDING DELIVERED ===").count(), 2);
        assert!(log.contains("Triage severity: Critical (9.1)"));
        assert!(log.contains("Vector: AV:N/AC:L"));
        assert!(log.contains("Mode: direct"));
    }

    #[test]
    fn delivery_serializes_with_kind_tag() {
        let json = serde_json::to_value(Delivery::Direct(finding())).unwrap();
        assert_eq!(json["kind"], "direct");
        assert_eq!(json["title"], "SSRF in avatar fetch");
    }

    #[tokio::test]
    async fn fan_out_reports_partial_failure() {
        let dir = tempfile::tempdir().unwrap();
        let file = Arc::new(FileDeliverySink::in_session(dir.path()));
        let sink = FanOutSink::new()
            .with(file.clone())
            .with(Arc::new(Failing));
        assert_eq!(sink.len(), 2);
        let err = sink.deliver(&Delivery::Direct(finding())).await.unwrap_err();
        assert_eq!(err, "unreachable");
        assert!(file.path().exists());
    }
}
