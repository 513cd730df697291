//! Partition fresh leads and matched users by canonical state.

use std::collections::{BTreeMap, BTreeSet};

use crate::model::{Lead, Recipient};
use crate::states::canonical_state;

/// One outgoing email: a user, one of their states, and that state's leads.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub recipient: Recipient,
    pub state: String,
    pub leads: Vec<Lead>,
}

/// Group leads by the canonical form of their own state text. Leads with no
/// usable state are dropped.
pub fn group_leads_by_state(leads: Vec<Lead>) -> BTreeMap<String, Vec<Lead>> {
    let mut groups: BTreeMap<String, Vec<Lead>> = BTreeMap::new();
    for lead in leads {
        let Some(key) = lead.state.as_deref().and_then(canonical_state) else {
            continue;
        };
        groups.entry(key).or_default().push(lead);
    }
    groups
}

/// Canonical keys of every state a user declares, deduplicated.
pub fn recipient_states(recipient: &Recipient) -> BTreeSet<String> {
    recipient
        .declared_states()
        .filter_map(canonical_state)
        .collect()
}

/// One [`Notification`] per (user, state) with fresh leads in that state.
/// Users whose states have no fresh leads get nothing.
pub fn plan_notifications(
    recipients: Vec<Recipient>,
    leads_by_state: &BTreeMap<String, Vec<Lead>>,
) -> Vec<Notification> {
    let mut planned = Vec::new();
    for recipient in recipients {
        for state in recipient_states(&recipient) {
            let Some(leads) = leads_by_state.get(&state) else {
                continue;
            };
            if leads.is_empty() {
                continue;
            }
            planned.push(Notification {
                recipient: recipient.clone(),
                state,
                leads: leads.clone(),
            });
        }
    }
    planned
}
