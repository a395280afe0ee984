// Marketing campaigns - one message per recipient, opt-outs respected

use anyhow::Result;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{info, warn};

use crate::entities::accounts::{list_users, resolve_access};
use crate::entities::email_prefs::get_preferences;
use crate::gateways::email::{unsubscribe_link, EmailGateway, OutgoingEmail};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Audience {
    #[default]
    All,
    Subscribers,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Campaign {
    pub subject: String,
    pub html: String,
    #[serde(default)]
    pub audience: Audience,
    /// Explicit list; overrides `audience` when present
    #[serde(default)]
    pub recipients: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CampaignReport {
    pub sent_count: usize,
    pub failed_count: usize,
    pub skipped_count: usize,
    pub logs: Vec<String>,
}

/// Who gets the campaign, and who opted out. Synchronous; run under the db lock.
pub fn plan_recipients(conn: &Connection, campaign: &Campaign) -> Result<(Vec<String>, Vec<String>)> {
    let candidates: BTreeSet<String> = match &campaign.recipients {
        Some(list) => list
            .iter()
            .map(|e| e.trim().to_lowercase())
            .filter(|e| e.contains('@'))
            .collect(),
        None => {
            let mut emails = BTreeSet::new();
            for summary in list_users(conn)? {
                let email = summary.user.email.to_lowercase();
                if campaign.audience == Audience::Subscribers
                    && !resolve_access(conn, &email)?.has_access()
                {
                    continue;
                }
                emails.insert(email);
            }
            emails
        }
    };

    let mut send = Vec::new();
    let mut opted_out = Vec::new();
    for email in candidates {
        if get_preferences(conn, &email)?.marketing {
            send.push(email);
        } else {
            opted_out.push(email);
        }
    }
    Ok((send, opted_out))
}

fn with_footer(html: &str, link: &str) -> String {
    format!(
        "{html}\n<p style=\"font-size:12px;color:#666\">\
         <a href=\"{link}\">Unsubscribe from marketing emails</a></p>"
    )
}

/// Send to every planned recipient. Individual failures are counted, not fatal.
pub async fn send_campaign(
    gateway: &dyn EmailGateway,
    campaign: &Campaign,
    recipients: Vec<String>,
    opted_out: Vec<String>,
    base_url: &str,
    unsubscribe_secret: &str,
) -> Result<CampaignReport> {
    let mut report = CampaignReport {
        skipped_count: opted_out.len(),
        ..Default::default()
    };
    for email in &opted_out {
        report.logs.push(format!("{email}: skipped (unsubscribed)"));
    }

    for email in recipients {
        let link = unsubscribe_link(base_url, unsubscribe_secret, &email)?;
        let message = OutgoingEmail {
            to: email.clone(),
            subject: campaign.subject.clone(),
            html: with_footer(&campaign.html, &link),
        };

        match gateway.send(&message).await {
            Ok(()) => {
                report.sent_count += 1;
                report.logs.push(format!("{email}: sent"));
            }
            Err(e) => {
                warn!(%email, error = %e, "marketing email failed");
                report.failed_count += 1;
                report.logs.push(format!("{email}: failed ({e})"));
            }
        }
    }

    info!(
        sent = report.sent_count,
        failed = report.failed_count,
        skipped = report.skipped_count,
        subject = %campaign.subject,
        "marketing campaign finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::setup_database;
    use crate::entities::accounts::{ensure_user, upsert_subscription, SubscriptionUpdate};
    use crate::entities::email_prefs::unsubscribe_marketing;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingGateway {
        sent: Mutex<Vec<OutgoingEmail>>,
    }

    #[async_trait]
    impl EmailGateway for RecordingGateway {
        async fn send(&self, email: &OutgoingEmail) -> Result<()> {
            if email.to.starts_with("bounce") {
                anyhow::bail!("mailbox unavailable");
            }
            self.sent.lock().unwrap().push(email.clone());
            Ok(())
        }
    }

    fn campaign(recipients: Option<Vec<&str>>, audience: Audience) -> Campaign {
        Campaign {
            subject: "Rate update".into(),
            html: "<p>Hello</p>".into(),
            audience,
            recipients: recipients.map(|r| r.into_iter().map(String::from).collect()),
        }
    }

    #[test]
    fn test_plan_skips_opted_out() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        for email in ["a@example.com", "b@example.com", "c@example.com"] {
            ensure_user(&conn, email, None, None).unwrap();
        }
        unsubscribe_marketing(&conn, "b@example.com").unwrap();
        upsert_subscription(
            &conn,
            &SubscriptionUpdate {
                stripe_subscription_id: "sub_1".into(),
                user_email: "c@example.com".into(),
                status: "active".into(),
                ..Default::default()
            },
        )
        .unwrap();

        let (send, skipped) = plan_recipients(&conn, &campaign(None, Audience::All)).unwrap();
        assert_eq!(send, vec!["a@example.com", "c@example.com"]);
        assert_eq!(skipped, vec!["b@example.com"]);

        let (send, _) = plan_recipients(&conn, &campaign(None, Audience::Subscribers)).unwrap();
        assert_eq!(send, vec!["c@example.com"]);

        let explicit = campaign(Some(vec!["X@Example.com", "not-an-email", "x@example.com"]), Audience::All);
        let (send, _) = plan_recipients(&conn, &explicit).unwrap();
        assert_eq!(send, vec!["x@example.com"]);
    }

    #[tokio::test]
    async fn test_send_counts_failures() {
        let gateway = RecordingGateway::default();
        let report = send_campaign(
            &gateway,
            &campaign(None, Audience::All),
            vec!["a@example.com".into(), "bounce@example.com".into()],
            vec!["b@example.com".into()],
            "https://rates.example",
            "secret",
        )
        .await
        .unwrap();

        assert_eq!(report.sent_count, 1);
        assert_eq!(report.failed_count, 1);
        assert_eq!(report.skipped_count, 1);

        let sent = gateway.sent.lock().unwrap();
        assert!(sent[0].html.contains("/api/email/unsubscribe?email=a%40example.com&token="));
    }
}
