use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum LeadQuality {
    Low,
    #[default]
    Moderate,
    High,
}

impl LeadQuality {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeadQuality::Low => "LOW",
            LeadQuality::Moderate => "MODERATE",
            LeadQuality::High => "HIGH",
        }
    }

    pub fn parse_quality(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LOW" => Some(LeadQuality::Low),
            "MODERATE" => Some(LeadQuality::Moderate),
            "HIGH" => Some(LeadQuality::High),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "USER",
            Role::Admin => "ADMIN",
        }
    }
}

/// A prospective cleaning contract as stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Lead {
    pub id: String,
    pub title: String,
    pub location: String,
    pub city: Option<String>,
    pub state: Option<String>,
    pub facility_type: String,
    pub quality: LeadQuality,
    pub decision_maker: Option<String>,
    pub walkthrough_info: Option<String>,
    pub estimated_value_min: Option<i64>,
    pub estimated_value_max: Option<i64>,
    pub buying_signals: Vec<String>,
    pub risk_factors: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Lead as submitted by an admin upload, before ids and timestamps exist.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct NewLead {
    pub title: String,
    pub location: String,
    pub city: Option<String>,
    pub state: Option<String>,
    pub facility_type: String,
    pub quality: LeadQuality,
    pub decision_maker: Option<String>,
    pub walkthrough_info: Option<String>,
    pub estimated_value_min: Option<i64>,
    pub estimated_value_max: Option<i64>,
    pub buying_signals: Vec<String>,
    pub risk_factors: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: String,
    pub email: String,
    pub company_name: String,
    pub service_state: Option<String>,
    pub service_states: Vec<String>,
    pub cities: Vec<String>,
    pub dnc_list: Option<String>,
    pub dnc_file_url: Option<String>,
    pub roles: Vec<Role>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.roles.contains(&Role::Admin)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NewUser {
    pub email: String,
    pub company_name: String,
    pub service_state: Option<String>,
    pub service_states: Vec<String>,
    pub cities: Vec<String>,
    pub dnc_list: Option<String>,
    pub dnc_file_url: Option<String>,
}

/// The slice of a user the notification pipeline needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    pub id: String,
    pub email: String,
    pub company_name: String,
    pub service_state: Option<String>,
    pub service_states: Vec<String>,
}

impl Recipient {
    /// Primary state first, then the additional ones.
    pub fn declared_states(&self) -> impl Iterator<Item = &str> {
        self.service_state
            .as_deref()
            .into_iter()
            .chain(self.service_states.iter().map(String::as_str))
    }
}
