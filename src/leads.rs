//! Admin lead creation. Inserts a batch and hands its states to the
//! notification pipeline without waiting for it.

use anyhow::{bail, Result};
use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, instrument};

use crate::db::{self, Pool};
use crate::mailer::MailSender;
use crate::model::{Lead, NewLead};
use crate::notify::{self, LeadDirectory, NotifyReport, NotifySettings};

pub struct LeadIntake {
    pool: Pool,
    directory: Arc<dyn LeadDirectory>,
    mailer: Arc<dyn MailSender>,
    settings: NotifySettings,
    notifications_enabled: bool,
}

/// Result of a create call. `notification` is `None` when nothing was
/// spawned (notifications off, or no lead carried a state).
pub struct CreatedLeads {
    pub leads: Vec<Lead>,
    pub notification: Option<JoinHandle<Option<NotifyReport>>>,
}

pub fn validate_new_lead(lead: &NewLead) -> Result<()> {
    if lead.title.trim().is_empty() {
        bail!("lead title must be non-empty");
    }
    if lead.location.trim().is_empty() {
        bail!("lead location must be non-empty");
    }
    if let (Some(min), Some(max)) = (lead.estimated_value_min, lead.estimated_value_max) {
        if min > max {
            bail!("estimated value range is inverted ({min} > {max})");
        }
    }
    Ok(())
}

/// Distinct non-blank state values, as typed.
pub fn distinct_states(leads: &[Lead]) -> Vec<String> {
    leads
        .iter()
        .filter_map(|l| l.state.as_deref())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

impl LeadIntake {
    pub fn new(pool: Pool, mailer: Arc<dyn MailSender>, settings: NotifySettings) -> Self {
        let directory: Arc<dyn LeadDirectory> = Arc::new(pool.clone());
        Self {
            pool,
            directory,
            mailer,
            settings,
            notifications_enabled: true,
        }
    }

    pub fn with_notifications(mut self, enabled: bool) -> Self {
        self.notifications_enabled = enabled;
        self
    }

    /// Validate and insert `leads`, then launch notifications detached.
    /// The insert's success never depends on the notification outcome.
    #[instrument(skip_all, fields(count = leads.len()))]
    pub async fn create_leads(&self, leads: Vec<NewLead>) -> Result<CreatedLeads> {
        for lead in &leads {
            validate_new_lead(lead)?;
        }
        let created = db::insert_leads(&self.pool, &leads, Utc::now()).await?;
        info!(created = created.len(), "leads created");

        let states = distinct_states(&created);
        let notification = if self.notifications_enabled && !states.is_empty() {
            Some(notify::spawn_notify_new_leads(
                Arc::clone(&self.directory),
                Arc::clone(&self.mailer),
                self.settings.clone(),
                states,
                created.len(),
            ))
        } else {
            None
        };

        Ok(CreatedLeads {
            leads: created,
            notification,
        })
    }
}
