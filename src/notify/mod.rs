//! New-lead notification pipeline.
//!
//! After a lead batch is inserted, users serving any state touched by the
//! batch get one email per matching state listing that state's fresh leads.
//! The pipeline only reads from the database; its one side effect is mail.
//! It keeps no record of what was sent, so each batch must be handed to it
//! exactly once.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::db::{self, Pool};
use crate::mailer::MailSender;
use crate::model::{Lead, Recipient};
use crate::states::state_variants;

pub mod group;
pub mod template;

pub use group::Notification;

/// Read access the pipeline needs. `keys` are
/// [`match_key`](crate::states::match_key) forms of state text, and stored
/// states are compared by the same key.
#[async_trait]
pub trait LeadDirectory: Send + Sync {
    async fn recent_leads_in_states(
        &self,
        keys: &[String],
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Lead>>;

    async fn users_serving_states(&self, keys: &[String]) -> Result<Vec<Recipient>>;
}

#[async_trait]
impl LeadDirectory for Pool {
    async fn recent_leads_in_states(
        &self,
        keys: &[String],
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Lead>> {
        db::recent_leads_in_states(self, keys, since, limit).await
    }

    async fn users_serving_states(&self, keys: &[String]) -> Result<Vec<Recipient>> {
        db::users_serving_states(self, keys).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifySettings {
    /// How far back "this batch" reaches.
    pub window: Duration,
    pub fetch_multiplier: usize,
    pub max_fetch: usize,
    pub site_url: String,
}

impl Default for NotifySettings {
    fn default() -> Self {
        Self {
            window: Duration::seconds(15),
            fetch_multiplier: 2,
            max_fetch: 500,
            site_url: "http://localhost:3000".into(),
        }
    }
}

impl NotifySettings {
    /// Upper bound on leads fetched for a batch of `created_count`.
    pub fn fetch_cap(&self, created_count: usize) -> i64 {
        created_count
            .saturating_mul(self.fetch_multiplier)
            .min(self.max_fetch) as i64
    }
}

/// Canonical states touched by a batch plus the match keys to query with.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchStates {
    pub canonical: BTreeSet<String>,
    /// Sorted, deduplicated match keys of every state's variants.
    pub keys: Vec<String>,
}

/// Canonicalize the raw states of a batch. `None` when no state is usable.
pub fn collect_batch_states<'a, I>(states: I) -> Option<BatchStates>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut canonical = BTreeSet::new();
    let mut keys = BTreeSet::new();
    for raw in states {
        let Some(expanded) = state_variants(raw) else {
            continue;
        };
        keys.extend(expanded.match_keys());
        canonical.insert(expanded.canonical);
    }
    if canonical.is_empty() || keys.is_empty() {
        return None;
    }
    Some(BatchStates {
        canonical,
        keys: keys.into_iter().collect(),
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedNotification {
    pub user_id: String,
    pub email: String,
    pub state: String,
    pub error: String,
}

/// Outcome of one pipeline run. Only logged; never shown to the admin.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotifyReport {
    pub attempted: usize,
    pub sent: usize,
    pub failed: Vec<FailedNotification>,
}

/// Email every user serving a state touched by a just-inserted batch.
///
/// Query failures abort the run. A failed send is recorded in the report
/// and the remaining notifications still go out.
#[instrument(skip_all, fields(states = states.len(), created_count = created_count))]
pub async fn notify_new_leads(
    directory: &dyn LeadDirectory,
    mailer: &dyn MailSender,
    settings: &NotifySettings,
    states: &[String],
    created_count: usize,
) -> Result<NotifyReport> {
    let mut report = NotifyReport::default();

    let Some(batch) = collect_batch_states(states.iter().map(String::as_str)) else {
        debug!("batch has no state values; nothing to notify");
        return Ok(report);
    };
    let limit = settings.fetch_cap(created_count);
    if limit == 0 {
        return Ok(report);
    }

    let since = Utc::now()
        .checked_sub_signed(settings.window)
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    let leads = directory
        .recent_leads_in_states(&batch.keys, since, limit)
        .await?;
    if leads.is_empty() {
        debug!(states = ?batch.canonical, "no fresh leads matched");
        return Ok(report);
    }

    let users = directory.users_serving_states(&batch.keys).await?;
    if users.is_empty() {
        debug!(states = ?batch.canonical, "no users serve these states");
        return Ok(report);
    }

    let leads_by_state = group::group_leads_by_state(leads);
    let planned = group::plan_notifications(users, &leads_by_state);
    info!(
        notifications = planned.len(),
        states = ?batch.canonical,
        "sending new lead notifications"
    );

    for notification in &planned {
        report.attempted += 1;
        let email = template::render(notification, &settings.site_url);
        let user_id = notification.recipient.id.as_str();
        let state = notification.state.as_str();
        match mailer.send(&email).await {
            Ok(message_id) => {
                report.sent += 1;
                info!(
                    user_id,
                    state,
                    lead_count = notification.leads.len(),
                    message_id = %message_id,
                    "notification sent"
                );
            }
            Err(err) => {
                warn!(?err, user_id, state, "notification failed");
                report.failed.push(FailedNotification {
                    user_id: user_id.to_string(),
                    email: notification.recipient.email.clone(),
                    state: state.to_string(),
                    error: err.to_string(),
                });
            }
        }
    }

    Ok(report)
}

/// Run [`notify_new_leads`] on a detached task. Errors are logged here and
/// never reach the caller; the handle may be dropped.
pub fn spawn_notify_new_leads(
    directory: Arc<dyn LeadDirectory>,
    mailer: Arc<dyn MailSender>,
    settings: NotifySettings,
    states: Vec<String>,
    created_count: usize,
) -> JoinHandle<Option<NotifyReport>> {
    tokio::spawn(async move {
        match notify_new_leads(
            directory.as_ref(),
            mailer.as_ref(),
            &settings,
            &states,
            created_count,
        )
        .await
        {
            Ok(report) => {
                if !report.failed.is_empty() {
                    warn!(
                        sent = report.sent,
                        failed = report.failed.len(),
                        "some lead notifications failed"
                    );
                }
                Some(report)
            }
            Err(err) => {
                error!(?err, "lead notification pipeline failed");
                None
            }
        }
    })
}
