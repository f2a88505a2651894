//! Treatment notifications and the mail outbox.
//!
//! Notifications are rendered from fixed templates and queued in the store as
//! pending mail. `dispatch_pending` hands every pending message to a
//! `MailSink` concurrently and marks the delivered ones as sent.

use crate::config::NotificationConfig;
use crate::{Database, Mail, MailStatus, Result};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use uuid::Uuid;

/// Treatment events that notify the other party
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TreatmentEvent {
    Modified,
    Finalized,
    Interrupted,
}

/// Names and address a notification is rendered with
#[derive(Clone, Debug)]
pub struct Envelope<'a> {
    pub recipient: &'a str,
    pub patient_name: &'a str,
    pub psychologist_name: &'a str,
}

/// Renders treatment notifications and queues them as pending mail
#[derive(Clone, Debug)]
pub struct Notifier {
    site_url: String,
}

impl Notifier {
    pub fn new(config: NotificationConfig) -> Self {
        Self {
            site_url: config.site_url,
        }
    }

    pub fn render(&self, event: TreatmentEvent, envelope: &Envelope<'_>) -> (String, String) {
        let patient = escape(envelope.patient_name);
        let psychologist = escape(envelope.psychologist_name);
        let site = escape(&self.site_url);

        let (subject, line) = match event {
            TreatmentEvent::Modified => (
                "Your treatment schedule has changed",
                format!(
                    "The treatment between {} and {} has a new schedule.",
                    patient, psychologist
                ),
            ),
            TreatmentEvent::Finalized => (
                "Your treatment has been finalized",
                format!(
                    "{} has finalized the treatment with {}.",
                    psychologist, patient
                ),
            ),
            TreatmentEvent::Interrupted => (
                "Your treatment has been interrupted",
                format!(
                    "The treatment between {} and {} has been interrupted.",
                    patient, psychologist
                ),
            ),
        };

        let body = format!(
            "<html><body><p>{}</p><p><a href=\"{}\">{}</a></p></body></html>",
            line, site, site
        );
        (subject.to_string(), body)
    }

    /// Render and store a pending message
    pub fn queue(
        &self,
        db: &mut Database,
        event: TreatmentEvent,
        envelope: &Envelope<'_>,
        now: DateTime<Utc>,
    ) -> Result<Mail> {
        let (subject, html_body) = self.render(event, envelope);
        let mail = Mail {
            id: Uuid::new_v4(),
            recipient: envelope.recipient.to_string(),
            subject,
            html_body,
            status: MailStatus::Pending,
            created_at: now,
        };
        db.outbox.insert(mail.clone())?;
        tracing::info!("Queued {:?} mail {} for {}", event, mail.id, mail.recipient);
        Ok(mail)
    }
}

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Delivery end of the outbox
pub trait MailSink: Sync {
    fn deliver(&self, mail: &Mail) -> Result<()>;
}

/// Appends delivered mail as JSON lines to a locked file
pub struct JsonlMailSink {
    path: PathBuf,
}

impl JsonlMailSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl MailSink for JsonlMailSink {
    fn deliver(&self, mail: &Mail) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.lock_exclusive()?;

        let mut writer = std::io::BufWriter::new(&file);
        let line = serde_json::to_string(mail)?;
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        drop(writer);

        file.unlock()?;
        tracing::debug!("Delivered mail {} to outbox file", mail.id);
        Ok(())
    }
}

/// Send every pending message concurrently and wait for all of them.
///
/// Returns the number delivered. Failed messages stay pending.
pub fn dispatch_pending(db: &mut Database, sink: &dyn MailSink) -> Result<usize> {
    let pending = db.outbox.find(|m| m.status == MailStatus::Pending);
    if pending.is_empty() {
        tracing::info!("No pending mail to dispatch");
        return Ok(0);
    }

    let outcomes: Vec<(Uuid, bool)> = std::thread::scope(|scope| {
        let handles: Vec<_> = pending
            .iter()
            .map(|mail| {
                scope.spawn(move || match sink.deliver(mail) {
                    Ok(()) => (mail.id, true),
                    Err(e) => {
                        tracing::warn!("Failed to deliver mail {}: {}", mail.id, e);
                        (mail.id, false)
                    }
                })
            })
            .collect();

        handles
            .into_iter()
            .zip(pending.iter())
            .map(|(handle, mail)| handle.join().unwrap_or((mail.id, false)))
            .collect()
    });

    let mut delivered = 0;
    for (id, ok) in outcomes {
        if !ok {
            continue;
        }
        if let Some(mut mail) = db.outbox.get(id) {
            mail.status = MailStatus::Sent;
            db.outbox.update(mail)?;
            delivered += 1;
        }
    }

    tracing::info!("Dispatched {} of {} pending mails", delivered, pending.len());
    Ok(delivered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use std::sync::Mutex;

    fn notifier() -> Notifier {
        Notifier::new(NotificationConfig {
            site_url: "https://psyche.example".into(),
        })
    }

    fn envelope() -> Envelope<'static> {
        Envelope {
            recipient: "ana@example.com",
            patient_name: "Ana <A>",
            psychologist_name: "Dr. Bia",
        }
    }

    /// Records deliveries, failing for one chosen recipient
    struct RecordingSink {
        delivered: Mutex<Vec<Uuid>>,
        reject: Option<String>,
    }

    impl MailSink for RecordingSink {
        fn deliver(&self, mail: &Mail) -> Result<()> {
            if self.reject.as_deref() == Some(mail.recipient.as_str()) {
                return Err(Error::Store("mailbox unavailable".into()));
            }
            self.delivered.lock().unwrap().push(mail.id);
            Ok(())
        }
    }

    #[test]
    fn test_render_includes_names_and_site() {
        let (subject, body) = notifier().render(TreatmentEvent::Finalized, &envelope());
        assert_eq!(subject, "Your treatment has been finalized");
        assert!(body.contains("Dr. Bia"));
        assert!(body.contains("Ana &lt;A&gt;"));
        assert!(body.contains("https://psyche.example"));
    }

    #[test]
    fn test_queue_stores_pending_mail() {
        let mut db = Database::default();
        let mail = notifier()
            .queue(&mut db, TreatmentEvent::Interrupted, &envelope(), Utc::now())
            .unwrap();
        assert_eq!(mail.status, MailStatus::Pending);
        assert_eq!(db.outbox.len(), 1);
    }

    #[test]
    fn test_dispatch_marks_delivered_and_keeps_failures() {
        crate::logging::init_test();
        let mut db = Database::default();
        let n = notifier();
        for recipient in ["a@example.com", "b@example.com", "c@example.com"] {
            let env = Envelope {
                recipient,
                ..envelope()
            };
            n.queue(&mut db, TreatmentEvent::Modified, &env, Utc::now())
                .unwrap();
        }

        let sink = RecordingSink {
            delivered: Mutex::new(Vec::new()),
            reject: Some("b@example.com".into()),
        };
        let delivered = dispatch_pending(&mut db, &sink).unwrap();
        assert_eq!(delivered, 2);
        assert_eq!(sink.delivered.lock().unwrap().len(), 2);

        let pending = db.outbox.find(|m| m.status == MailStatus::Pending);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].recipient, "b@example.com");

        // A second run only retries the failed message
        let sink = RecordingSink {
            delivered: Mutex::new(Vec::new()),
            reject: None,
        };
        assert_eq!(dispatch_pending(&mut db, &sink).unwrap(), 1);
        assert_eq!(dispatch_pending(&mut db, &sink).unwrap(), 0);
    }

    #[test]
    fn test_jsonl_sink_appends_lines() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("mail/outbox.jsonl");

        let mut db = Database::default();
        let n = notifier();
        for _ in 0..4 {
            n.queue(&mut db, TreatmentEvent::Finalized, &envelope(), Utc::now())
                .unwrap();
        }

        let sink = JsonlMailSink::new(&path);
        assert_eq!(dispatch_pending(&mut db, &sink).unwrap(), 4);

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 4);
        for line in content.lines() {
            let mail: Mail = serde_json::from_str(line).unwrap();
            assert_eq!(mail.recipient, "ana@example.com");
        }
    }
}
