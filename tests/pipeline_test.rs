use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

use lead_alerts::mailer::{MailError, MailSender, OutgoingEmail};
use lead_alerts::model::{Lead, LeadQuality, Recipient};
use lead_alerts::notify::{notify_new_leads, spawn_notify_new_leads, LeadDirectory, NotifySettings};
use lead_alerts::states::match_key;

/// In-memory directory that matches states by key like the SQL queries do.
#[derive(Default)]
struct FakeDirectory {
    leads: Vec<Lead>,
    users: Vec<Recipient>,
    fail_queries: bool,
    queries: AtomicUsize,
    /// `(since, limit)` of every lead query.
    lead_queries: std::sync::Mutex<Vec<(DateTime<Utc>, i64)>>,
}

impl FakeDirectory {
    fn lead_queries(&self) -> Vec<(DateTime<Utc>, i64)> {
        self.lead_queries.lock().unwrap().clone()
    }
}

fn matches(value: &str, keys: &[String]) -> bool {
    let key = match_key(value);
    keys.iter().any(|k| *k == key)
}

#[async_trait::async_trait]
impl LeadDirectory for FakeDirectory {
    async fn recent_leads_in_states(
        &self,
        keys: &[String],
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Lead>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.lead_queries.lock().unwrap().push((since, limit));
        if self.fail_queries {
            return Err(anyhow!("database unavailable"));
        }
        Ok(self
            .leads
            .iter()
            .filter(|l| l.created_at >= since)
            .filter(|l| l.state.as_deref().is_some_and(|s| matches(s, keys)))
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn users_serving_states(&self, keys: &[String]) -> Result<Vec<Recipient>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .users
            .iter()
            .filter(|u| u.declared_states().any(|s| matches(s, keys)))
            .cloned()
            .collect())
    }
}

#[derive(Clone, Default)]
struct RecordingMailer {
    failing_recipients: Arc<HashSet<String>>,
    sent: Arc<Mutex<Vec<OutgoingEmail>>>,
}

impl RecordingMailer {
    fn failing_for(emails: &[&str]) -> Self {
        Self {
            failing_recipients: Arc::new(emails.iter().map(|e| e.to_string()).collect()),
            ..Default::default()
        }
    }

    async fn sent(&self) -> Vec<OutgoingEmail> {
        self.sent.lock().await.clone()
    }
}

#[async_trait::async_trait]
impl MailSender for RecordingMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<String, MailError> {
        if self.failing_recipients.contains(&email.to) {
            return Err(MailError::Rejected {
                status: 500,
                body: "provider down".into(),
            });
        }
        let mut guard = self.sent.lock().await;
        guard.push(email.clone());
        Ok(format!("msg-{}", guard.len()))
    }
}

fn lead(id: &str, title: &str, state: &str) -> Lead {
    Lead {
        id: id.into(),
        title: title.into(),
        location: "Downtown".into(),
        city: Some("Metro".into()),
        state: Some(state.into()),
        facility_type: "Office".into(),
        quality: LeadQuality::High,
        decision_maker: None,
        walkthrough_info: None,
        estimated_value_min: None,
        estimated_value_max: None,
        buying_signals: vec![],
        risk_factors: vec![],
        created_at: Utc::now(),
    }
}

fn user(id: &str, primary: Option<&str>, extra: &[&str]) -> Recipient {
    Recipient {
        id: id.into(),
        email: format!("{id}@example.com"),
        company_name: format!("{id} Cleaning"),
        service_state: primary.map(str::to_string),
        service_states: extra.iter().map(|s| s.to_string()).collect(),
    }
}

fn states(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn batch_without_states_does_nothing() {
    let directory = FakeDirectory {
        leads: vec![lead("1", "Office", "GA")],
        users: vec![user("a", Some("GA"), &[])],
        ..Default::default()
    };
    let mailer = RecordingMailer::default();

    let report = notify_new_leads(
        &directory,
        &mailer,
        &NotifySettings::default(),
        &states(&["", "   "]),
        4,
    )
    .await
    .unwrap();

    assert_eq!(report.attempted, 0);
    assert_eq!(directory.queries.load(Ordering::SeqCst), 0);
    assert!(mailer.sent().await.is_empty());
}

#[tokio::test]
async fn one_email_per_matching_state() {
    let directory = FakeDirectory {
        leads: vec![
            lead("1", "GA office", "GA"),
            lead("2", "FL clinic", "Florida"),
            lead("3", "FL school", "fl"),
        ],
        users: vec![user("multi", None, &["Georgia", "FL"])],
        ..Default::default()
    };
    let mailer = RecordingMailer::default();

    let report = notify_new_leads(
        &directory,
        &mailer,
        &NotifySettings::default(),
        &states(&["GA", "Florida", "fl"]),
        3,
    )
    .await
    .unwrap();
    assert_eq!(report.attempted, 2);
    assert_eq!(report.sent, 2);

    let sent = mailer.sent().await;
    assert_eq!(sent.len(), 2);
    assert!(sent.iter().all(|e| e.to == "multi@example.com"));

    let ga = sent.iter().find(|e| e.subject.contains("Georgia")).unwrap();
    assert!(ga.html.contains("GA office"));
    assert!(!ga.html.contains("FL clinic"));
    assert!(!ga.html.contains("FL school"));

    let fl = sent.iter().find(|e| e.subject.contains("Florida")).unwrap();
    assert_eq!(fl.subject, "2 new leads in Florida");
    assert!(fl.html.contains("FL clinic"));
    assert!(fl.html.contains("FL school"));
    assert!(!fl.html.contains("GA office"));
}

#[tokio::test]
async fn users_without_matching_leads_get_nothing() {
    let directory = FakeDirectory {
        leads: vec![lead("1", "Ohio plant", "OH")],
        users: vec![user("ohio", Some("Ohio"), &[]), user("utah", Some("UT"), &["Nevada"])],
        ..Default::default()
    };
    let mailer = RecordingMailer::default();

    notify_new_leads(
        &directory,
        &mailer,
        &NotifySettings::default(),
        &states(&["OH"]),
        1,
    )
    .await
    .unwrap();

    let sent = mailer.sent().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "ohio@example.com");
}

#[tokio::test]
async fn failed_send_does_not_stop_other_recipients() {
    let directory = FakeDirectory {
        leads: vec![lead("1", "Atlanta tower", "GA")],
        users: vec![user("a", Some("GA"), &[]), user("b", Some("Georgia"), &[])],
        ..Default::default()
    };
    let mailer = RecordingMailer::failing_for(&["a@example.com"]);

    let report = notify_new_leads(
        &directory,
        &mailer,
        &NotifySettings::default(),
        &states(&["GA"]),
        1,
    )
    .await
    .unwrap();

    assert_eq!(report.attempted, 2);
    assert_eq!(report.sent, 1);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].email, "a@example.com");
    assert_eq!(report.failed[0].state, "Georgia");
    assert!(report.failed[0].error.contains("provider down"));

    let sent = mailer.sent().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "b@example.com");
}

#[tokio::test]
async fn stale_leads_are_outside_the_window() {
    let mut old = lead("1", "Old job", "TX");
    old.created_at = Utc::now() - chrono::Duration::minutes(10);
    let directory = FakeDirectory {
        leads: vec![old],
        users: vec![user("tx", Some("Texas"), &[])],
        ..Default::default()
    };
    let mailer = RecordingMailer::default();

    let report = notify_new_leads(
        &directory,
        &mailer,
        &NotifySettings::default(),
        &states(&["TX"]),
        1,
    )
    .await
    .unwrap();

    assert_eq!(report.attempted, 0);
    // users are not looked up once no fresh leads match
    assert_eq!(directory.queries.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn detached_run_swallows_query_errors() {
    let directory = Arc::new(FakeDirectory {
        fail_queries: true,
        ..Default::default()
    });
    let mailer = RecordingMailer::default();

    let handle = spawn_notify_new_leads(
        directory.clone(),
        Arc::new(mailer.clone()),
        NotifySettings::default(),
        states(&["CA"]),
        2,
    );

    assert_eq!(handle.await.unwrap(), None);
    assert_eq!(directory.queries.load(Ordering::SeqCst), 1);
    assert!(mailer.sent().await.is_empty());
}

#[tokio::test]
async fn direct_run_propagates_query_errors() {
    let directory = FakeDirectory {
        fail_queries: true,
        ..Default::default()
    };
    let mailer = RecordingMailer::default();

    let res = notify_new_leads(
        &directory,
        &mailer,
        &NotifySettings::default(),
        &states(&["CA"]),
        2,
    )
    .await;
    assert!(res.is_err());
}

#[tokio::test]
async fn lead_query_uses_window_and_fetch_cap() {
    let directory = FakeDirectory {
        leads: vec![
            lead("1", "Reno office", "NV"),
            lead("2", "Vegas gym", "Nevada"),
            lead("3", "Carson clinic", "nv"),
        ],
        users: vec![user("nv", Some("NV"), &[])],
        ..Default::default()
    };
    let mailer = RecordingMailer::default();
    let settings = NotifySettings::default();

    let before = Utc::now();
    let report = notify_new_leads(&directory, &mailer, &settings, &states(&["NV"]), 3)
        .await
        .unwrap();
    let after = Utc::now();
    assert_eq!(report.sent, 1);

    let calls = directory.lead_queries();
    assert_eq!(calls.len(), 1);
    let (since, limit) = calls[0];
    assert_eq!(limit, 6);
    assert!(since >= before - settings.window);
    assert!(since <= after - settings.window);
}

#[tokio::test]
async fn lead_query_limit_is_capped_for_large_batches() {
    let directory = FakeDirectory {
        leads: vec![lead("1", "Boise depot", "ID")],
        users: vec![user("id", Some("Idaho"), &[])],
        ..Default::default()
    };
    let mailer = RecordingMailer::default();

    notify_new_leads(
        &directory,
        &mailer,
        &NotifySettings::default(),
        &states(&["ID"]),
        1_000,
    )
    .await
    .unwrap();

    let calls = directory.lead_queries();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].1, 500);
}

#[tokio::test]
async fn zero_created_count_queries_nothing() {
    let directory = FakeDirectory {
        leads: vec![lead("1", "Portland loft", "OR")],
        users: vec![user("or", Some("Oregon"), &[])],
        ..Default::default()
    };
    let mailer = RecordingMailer::default();

    let report = notify_new_leads(
        &directory,
        &mailer,
        &NotifySettings::default(),
        &states(&["OR"]),
        0,
    )
    .await
    .unwrap();

    assert_eq!(report, Default::default());
    assert_eq!(directory.queries.load(Ordering::SeqCst), 0);
    assert!(directory.lead_queries().is_empty());
    assert!(mailer.sent().await.is_empty());
}

#[tokio::test]
async fn dotted_service_state_receives_plain_abbreviation_leads() {
    let directory = FakeDirectory {
        leads: vec![lead("1", "Albany office", "NY")],
        users: vec![
            user("dotted", Some("N.Y."), &[]),
            user("spaced", None, &["new  york"]),
        ],
        ..Default::default()
    };
    let mailer = RecordingMailer::default();

    let report = notify_new_leads(
        &directory,
        &mailer,
        &NotifySettings::default(),
        &states(&["NY"]),
        1,
    )
    .await
    .unwrap();

    assert_eq!(report.sent, 2);
    let sent = mailer.sent().await;
    assert!(sent.iter().all(|e| e.subject == "1 new lead in New York"));
}
