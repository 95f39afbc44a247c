//! Report delivery
//!
//! Hands the cumulative report and the run summary to whoever consumes
//! them. Email when SMTP settings are present, files plus a log line
//! otherwise.

use std::{env, path::PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use indoc::indoc;
use lettre::{
    message::{header::ContentType, Attachment, MultiPart},
    transport::smtp::authentication::Credentials,
    SmtpTransport, Transport,
};
use minijinja::render;

use crate::{enricher_config::DeliveryConfig, pipeline::RunSummary, report::CumulativeReport};

const REPORT_EMAIL_TEMPLATE: &str = indoc! {r#"
    <html>
    <body style="font-family: sans-serif;">
      <h2>{{ subject }}</h2>
      {% if partial %}
      <p style="color: #b45309;"><strong>PARTIAL run</strong> ({{ stop_reason }}):
        {{ pending }} channels are still waiting for enrichment and will be picked up next time.</p>
      {% endif %}
      <table cellpadding="4" style="border-collapse: collapse;">
        {% for name, value in counts %}
        <tr><td>{{ name }}</td><td align="right">{{ value }}</td></tr>
        {% endfor %}
      </table>
      <p>{{ included }} channels included, {{ excluded }} excluded.
        Both lists are attached as JSON.</p>
    </body>
    </html>
"#};

#[async_trait]
pub trait ReportDelivery: Send + Sync {
    async fn deliver(&self, report: &CumulativeReport, summary: &RunSummary)
        -> anyhow::Result<()>;
}

fn subject_line(base: &str, summary: &RunSummary) -> String {
    if summary.is_partial() {
        format!("[PARTIAL] {}", base)
    } else {
        base.to_string()
    }
}

fn count_rows(summary: &RunSummary) -> Vec<(&'static str, u64)> {
    let c = &summary.counts;
    vec![
        ("Channels in input", c.total),
        ("Cache hits", c.cache_hits),
        ("Keyword flagged", c.keyword_flagged),
        ("Fetched", c.fetched),
        ("Classified", c.classified),
        ("Degraded", c.degraded),
        ("Fetch failures", c.fetch_failed),
        ("Store failures", c.store_failures),
        ("Deferred", c.deferred),
        ("Quota used", c.quota_used),
        ("Elapsed (s)", c.elapsed_secs),
    ]
}

// ============================================================================
// Email
// ============================================================================

#[derive(Debug, Clone)]
pub struct SmtpSettings {
    pub host: String,
    pub username: String,
    pub password: String,
    pub from: String,
    pub recipient: String,
}

impl SmtpSettings {
    /// Reads `SMTP_HOST`, `SMTP_USERNAME`, `SMTP_PASSWORD`, `SMTP_FROM` and
    /// `RECIPIENT_EMAIL`. `None` unless host and recipient are both set.
    pub fn from_env() -> Option<Self> {
        let host = env::var("SMTP_HOST").ok()?;
        let recipient = env::var("RECIPIENT_EMAIL").ok()?;
        let username = env::var("SMTP_USERNAME").unwrap_or_default();
        Some(Self {
            host,
            from: env::var("SMTP_FROM")
                .unwrap_or_else(|_| format!("Channel Enricher <{}>", username)),
            username,
            password: env::var("SMTP_PASSWORD").unwrap_or_default(),
            recipient,
        })
    }
}

pub struct EmailDelivery {
    smtp: SmtpSettings,
    subject: String,
}

impl EmailDelivery {
    pub fn new(smtp: SmtpSettings, config: &DeliveryConfig) -> Self {
        Self {
            smtp,
            subject: config.subject.clone(),
        }
    }

    fn construct_message(
        &self,
        report: &CumulativeReport,
        summary: &RunSummary,
    ) -> anyhow::Result<lettre::Message> {
        let subject = subject_line(&self.subject, summary);
        let counts = count_rows(summary);

        let plain = format!(
            "{}\n\nRun {} finished {} ({}).\n{}\n\n{} included, {} excluded.",
            subject,
            summary.run_id,
            summary.outcome,
            summary.stop_reason,
            counts
                .iter()
                .map(|(name, value)| format!("{}: {}", name, value))
                .collect::<Vec<_>>()
                .join("\n"),
            report.included.len(),
            report.excluded.len(),
        );
        let html = render!(
            REPORT_EMAIL_TEMPLATE,
            subject => &subject,
            partial => summary.is_partial(),
            stop_reason => summary.stop_reason.to_string(),
            pending => summary.pending.len(),
            counts => &counts,
            included => report.included.len(),
            excluded => report.excluded.len()
        );

        let json = ContentType::parse("application/json")?;
        let included = serde_json::to_vec_pretty(&report.included)?;
        let excluded = serde_json::to_vec_pretty(&report.excluded)?;

        let message = lettre::Message::builder()
            .from(
                self.smtp
                    .from
                    .parse()
                    .context("Could not parse SMTP_FROM for report email")?,
            )
            .to(self
                .smtp
                .recipient
                .parse()
                .context("Could not parse RECIPIENT_EMAIL for report email")?)
            .subject(subject)
            .multipart(
                MultiPart::mixed()
                    .multipart(MultiPart::alternative_plain_html(plain, html))
                    .singlepart(
                        Attachment::new("included_channels.json".to_string())
                            .body(included, json.clone()),
                    )
                    .singlepart(
                        Attachment::new("excluded_channels.json".to_string()).body(excluded, json),
                    ),
            )?;

        Ok(message)
    }
}

#[async_trait]
impl ReportDelivery for EmailDelivery {
    async fn deliver(
        &self,
        report: &CumulativeReport,
        summary: &RunSummary,
    ) -> anyhow::Result<()> {
        let message = self.construct_message(report, summary)?;
        let smtp = self.smtp.clone();

        tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
            let transport = SmtpTransport::relay(&smtp.host)?
                .credentials(Credentials::new(smtp.username, smtp.password))
                .build();
            transport.send(&message)?;
            Ok(())
        })
        .await
        .context("SMTP send task panicked")??;

        tracing::info!(
            "Report for run {} emailed to {}",
            summary.run_id,
            self.smtp.recipient
        );
        Ok(())
    }
}

// ============================================================================
// Files
// ============================================================================

/// Writes the lists and summary as JSON under `output_dir`.
pub struct LogDelivery {
    output_dir: PathBuf,
}

impl LogDelivery {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn from_config(config: &DeliveryConfig) -> Self {
        Self::new(&config.output_dir)
    }
}

#[async_trait]
impl ReportDelivery for LogDelivery {
    async fn deliver(
        &self,
        report: &CumulativeReport,
        summary: &RunSummary,
    ) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .with_context(|| format!("Could not create {}", self.output_dir.display()))?;

        let files = [
            ("included", serde_json::to_vec_pretty(&report.included)?),
            ("excluded", serde_json::to_vec_pretty(&report.excluded)?),
            ("summary", serde_json::to_vec_pretty(summary)?),
        ];
        for (name, body) in files {
            let path = self
                .output_dir
                .join(format!("{}-{}.json", summary.run_id, name));
            tokio::fs::write(&path, body)
                .await
                .with_context(|| format!("Could not write {}", path.display()))?;
        }

        tracing::info!(
            "Run {} {}: {} included, {} excluded, {} pending. Written to {}",
            summary.run_id,
            summary.outcome,
            report.included.len(),
            report.excluded.len(),
            summary.pending.len(),
            self.output_dir.display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        channel::normalize,
        observability::RunCounts,
        pipeline::{RunOutcome, StopReason},
        report::ReportRow,
    };
    use indexmap::IndexMap;

    fn summary(outcome: RunOutcome) -> RunSummary {
        RunSummary {
            run_id: "20261016-120000".to_string(),
            outcome,
            stop_reason: match outcome {
                RunOutcome::Complete => StopReason::AllDone,
                RunOutcome::Partial => StopReason::QuotaExhausted,
            },
            counts: RunCounts {
                total: 3,
                classified: 2,
                deferred: 1,
                ..Default::default()
            },
            weights: IndexMap::new(),
            pending: vec![normalize("@charlie").unwrap()],
        }
    }

    fn report() -> CumulativeReport {
        CumulativeReport {
            included: vec![ReportRow {
                channel: normalize("@alpha").unwrap(),
                channel_name: Some("Alpha".to_string()),
                confidence: Some("high".to_string()),
                reasoning: Some("Tech reviews".to_string()),
                attributes: serde_json::Map::new(),
                weight: Some(10),
            }],
            excluded: vec![],
            omitted: 0,
        }
    }

    fn smtp() -> SmtpSettings {
        SmtpSettings {
            host: "smtp.example.com".to_string(),
            username: "bot".to_string(),
            password: "secret".to_string(),
            from: "Channel Enricher <bot@example.com>".to_string(),
            recipient: "ops@example.com".to_string(),
        }
    }

    fn delivery_config(output_dir: &str) -> DeliveryConfig {
        DeliveryConfig {
            subject: "Channel enrichment report".to_string(),
            output_dir: output_dir.to_string(),
        }
    }

    #[test]
    fn test_partial_run_is_tagged_in_subject() {
        assert_eq!(
            subject_line("Report", &summary(RunOutcome::Partial)),
            "[PARTIAL] Report"
        );
        assert_eq!(subject_line("Report", &summary(RunOutcome::Complete)), "Report");
    }

    #[test]
    fn test_email_carries_attachments() {
        let delivery = EmailDelivery::new(smtp(), &delivery_config("unused"));
        let message = delivery
            .construct_message(&report(), &summary(RunOutcome::Partial))
            .unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();

        assert!(raw.contains("Subject: [PARTIAL] Channel enrichment report"));
        assert!(raw.contains("included_channels.json"));
        assert!(raw.contains("excluded_channels.json"));
    }

    #[tokio::test]
    async fn test_log_delivery_writes_files() {
        let dir = std::env::temp_dir().join(format!("enricher-delivery-{}", std::process::id()));
        let delivery = LogDelivery::new(&dir);
        let summary = summary(RunOutcome::Complete);

        delivery.deliver(&report(), &summary).await.unwrap();

        let included = tokio::fs::read_to_string(dir.join(format!("{}-included.json", summary.run_id)))
            .await
            .unwrap();
        assert!(included.contains("https://www.youtube.com/@alpha"));
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
