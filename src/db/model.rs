//! Raw table rows and their conversion into domain entities.
//!
//! List-valued columns hold JSON arrays and timestamps are Unix milliseconds.

use crate::model::{Lead, LeadQuality, Recipient, Role, User};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct LeadRow {
    pub id: String,
    pub title: String,
    pub location: String,
    pub city: Option<String>,
    pub state: Option<String>,
    pub facility_type: String,
    pub quality: String,
    pub decision_maker: Option<String>,
    pub walkthrough_info: Option<String>,
    pub estimated_value_min: Option<i64>,
    pub estimated_value_max: Option<i64>,
    pub buying_signals: String,
    pub risk_factors: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserRow {
    pub id: String,
    pub email: String,
    pub company_name: String,
    pub service_state: Option<String>,
    pub service_states: String,
    pub cities: String,
    pub dnc_list: Option<String>,
    pub dnc_file_url: Option<String>,
    pub roles: String,
    pub created_at: i64,
}

/// Columns selected for the notification recipient lookup.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RecipientRow {
    pub id: String,
    pub email: String,
    pub company_name: String,
    pub service_state: Option<String>,
    pub service_states: String,
}

pub(crate) fn millis_to_utc(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(ms).ok_or_else(|| anyhow!("timestamp {ms} out of range"))
}

fn json_list<T: DeserializeOwned>(raw: &str, column: &str) -> Result<Vec<T>> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(raw).with_context(|| format!("invalid JSON in column {column}"))
}

impl TryFrom<LeadRow> for Lead {
    type Error = anyhow::Error;

    fn try_from(row: LeadRow) -> Result<Self> {
        let quality = LeadQuality::parse_quality(&row.quality)
            .ok_or_else(|| anyhow!("lead {} has unknown quality {}", row.id, row.quality))?;
        Ok(Lead {
            buying_signals: json_list(&row.buying_signals, "buying_signals")?,
            risk_factors: json_list(&row.risk_factors, "risk_factors")?,
            created_at: millis_to_utc(row.created_at)?,
            id: row.id,
            title: row.title,
            location: row.location,
            city: row.city,
            state: row.state,
            facility_type: row.facility_type,
            quality,
            decision_maker: row.decision_maker,
            walkthrough_info: row.walkthrough_info,
            estimated_value_min: row.estimated_value_min,
            estimated_value_max: row.estimated_value_max,
        })
    }
}

impl TryFrom<UserRow> for User {
    type Error = anyhow::Error;

    fn try_from(row: UserRow) -> Result<Self> {
        let roles: Vec<Role> = json_list(&row.roles, "roles")?;
        Ok(User {
            service_states: json_list(&row.service_states, "service_states")?,
            cities: json_list(&row.cities, "cities")?,
            created_at: millis_to_utc(row.created_at)?,
            roles,
            id: row.id,
            email: row.email,
            company_name: row.company_name,
            service_state: row.service_state,
            dnc_list: row.dnc_list,
            dnc_file_url: row.dnc_file_url,
        })
    }
}

impl TryFrom<RecipientRow> for Recipient {
    type Error = anyhow::Error;

    fn try_from(row: RecipientRow) -> Result<Self> {
        Ok(Recipient {
            service_states: json_list(&row.service_states, "service_states")?,
            id: row.id,
            email: row.email,
            company_name: row.company_name,
            service_state: row.service_state,
        })
    }
}
