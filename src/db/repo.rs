use super::model::{LeadRow, RecipientRow, UserRow};
use crate::model::{Lead, LeadQuality, NewLead, NewUser, Recipient, Role, User};
use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::SqlitePool;
use std::str::FromStr;
use tracing::instrument;
use uuid::Uuid;

pub type Pool = SqlitePool;

const LEAD_COLUMNS: &str = "id, title, location, city, state, facility_type, quality, \
     decision_maker, walkthrough_info, estimated_value_min, estimated_value_max, \
     buying_signals, risk_factors, created_at";

const USER_COLUMNS: &str = "id, email, company_name, service_state, service_states, cities, \
     dnc_list, dnc_file_url, roles, created_at";

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let options = SqliteConnectOptions::from_str(database_url)
        .with_context(|| format!("invalid database url {database_url}"))?
        .create_if_missing(true);
    let pool = SqlitePool::connect_with(options).await?;
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Emails are unique after trimming and lowercasing.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn to_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string(value).context("failed to encode JSON column")
}

/// Insert a batch of leads in one transaction, all stamped with `created_at`.
#[instrument(skip_all, fields(count = leads.len()))]
pub async fn insert_leads(
    pool: &Pool,
    leads: &[NewLead],
    created_at: DateTime<Utc>,
) -> Result<Vec<Lead>> {
    let mut tx = pool.begin().await?;
    let ts = created_at.timestamp_millis();
    let mut created = Vec::with_capacity(leads.len());
    for lead in leads {
        let id = Uuid::new_v4().to_string();
        let row: LeadRow = sqlx::query_as(&format!(
            "INSERT INTO leads ({LEAD_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             RETURNING {LEAD_COLUMNS}"
        ))
        .bind(&id)
        .bind(lead.title.trim())
        .bind(lead.location.trim())
        .bind(lead.city.as_deref())
        .bind(lead.state.as_deref())
        .bind(&lead.facility_type)
        .bind(lead.quality.as_str())
        .bind(lead.decision_maker.as_deref())
        .bind(lead.walkthrough_info.as_deref())
        .bind(lead.estimated_value_min)
        .bind(lead.estimated_value_max)
        .bind(to_json(&lead.buying_signals)?)
        .bind(to_json(&lead.risk_factors)?)
        .bind(ts)
        .fetch_one(&mut *tx)
        .await?;
        created.push(Lead::try_from(row)?);
    }
    tx.commit().await?;
    Ok(created)
}

#[instrument(skip_all)]
pub async fn get_lead(pool: &Pool, id: &str) -> Result<Option<Lead>> {
    let row: Option<LeadRow> =
        sqlx::query_as(&format!("SELECT {LEAD_COLUMNS} FROM leads WHERE id = ?"))
            .bind(id)
            .fetch_optional(pool)
            .await?;
    row.map(Lead::try_from).transpose()
}

/// Newest first.
#[instrument(skip_all)]
pub async fn list_leads(pool: &Pool, limit: i64) -> Result<Vec<Lead>> {
    let rows: Vec<LeadRow> = sqlx::query_as(&format!(
        "SELECT {LEAD_COLUMNS} FROM leads ORDER BY created_at DESC, id LIMIT ?"
    ))
    .bind(limit)
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(Lead::try_from).collect()
}

#[instrument(skip_all)]
pub async fn update_lead_quality(pool: &Pool, id: &str, quality: LeadQuality) -> Result<()> {
    let res = sqlx::query("UPDATE leads SET quality = ? WHERE id = ?")
        .bind(quality.as_str())
        .bind(id)
        .execute(pool)
        .await?;
    if res.rows_affected() == 0 {
        return Err(anyhow!("lead {} not found", id));
    }
    Ok(())
}

/// Returns whether a row was removed.
#[instrument(skip_all)]
pub async fn delete_lead(pool: &Pool, id: &str) -> Result<bool> {
    let res = sqlx::query("DELETE FROM leads WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(res.rows_affected() > 0)
}

/// SQL twin of [`crate::states::match_key`] applied to `column`. Strips
/// the same characters and folds ASCII case through `LOWER`.
fn sql_match_key(column: &str) -> String {
    format!(
        "LOWER(REPLACE(REPLACE(REPLACE(REPLACE(REPLACE(REPLACE({column}, \
         ' ', ''), char(9), ''), char(10), ''), char(13), ''), char(160), ''), '.', ''))"
    )
}

/// Leads created at or after `since` whose state has one of the match
/// `keys`, newest first.
#[instrument(skip_all, fields(keys = keys.len(), limit = limit))]
pub async fn recent_leads_in_states(
    pool: &Pool,
    keys: &[String],
    since: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<Lead>> {
    let rows: Vec<LeadRow> = sqlx::query_as(&format!(
        "SELECT {LEAD_COLUMNS} FROM leads \
         WHERE created_at >= ? \
           AND state IS NOT NULL \
           AND {} IN (SELECT value FROM json_each(?)) \
         ORDER BY created_at DESC, id \
         LIMIT ?",
        sql_match_key("state")
    ))
    .bind(since.timestamp_millis())
    .bind(to_json(keys)?)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(Lead::try_from).collect()
}

/// Users whose primary or additional service state has one of the match
/// `keys`.
#[instrument(skip_all, fields(keys = keys.len()))]
pub async fn users_serving_states(pool: &Pool, keys: &[String]) -> Result<Vec<Recipient>> {
    let encoded = to_json(keys)?;
    let rows: Vec<RecipientRow> = sqlx::query_as(&format!(
        "SELECT id, email, company_name, service_state, service_states FROM users u \
         WHERE {} IN (SELECT value FROM json_each(?)) \
            OR EXISTS ( \
                SELECT 1 FROM json_each(u.service_states) s \
                WHERE {} IN (SELECT value FROM json_each(?)) \
            ) \
         ORDER BY u.created_at, u.id",
        sql_match_key("COALESCE(u.service_state, '')"),
        sql_match_key("s.value"),
    ))
    .bind(&encoded)
    .bind(&encoded)
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(Recipient::try_from).collect()
}

#[instrument(skip_all)]
pub async fn create_user(pool: &Pool, user: &NewUser) -> Result<User> {
    let email = normalize_email(&user.email);
    if email.is_empty() {
        bail!("email must be non-empty");
    }
    if find_user_by_email(pool, &email).await?.is_some() {
        bail!("user with email {} already exists", email);
    }
    let row: UserRow = sqlx::query_as(&format!(
        "INSERT INTO users ({USER_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
         RETURNING {USER_COLUMNS}"
    ))
    .bind(Uuid::new_v4().to_string())
    .bind(&email)
    .bind(user.company_name.trim())
    .bind(user.service_state.as_deref())
    .bind(to_json(&user.service_states)?)
    .bind(to_json(&user.cities)?)
    .bind(user.dnc_list.as_deref())
    .bind(user.dnc_file_url.as_deref())
    .bind(to_json(&[Role::User])?)
    .bind(Utc::now().timestamp_millis())
    .fetch_one(pool)
    .await?;
    User::try_from(row)
}

#[instrument(skip_all)]
pub async fn find_user_by_email(pool: &Pool, email: &str) -> Result<Option<User>> {
    let row: Option<UserRow> =
        sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?"))
            .bind(normalize_email(email))
            .fetch_optional(pool)
            .await?;
    row.map(User::try_from).transpose()
}

#[instrument(skip_all)]
pub async fn get_user(pool: &Pool, id: &str) -> Result<Option<User>> {
    let row: Option<UserRow> =
        sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"))
            .bind(id)
            .fetch_optional(pool)
            .await?;
    row.map(User::try_from).transpose()
}

/// Replace `target_id`'s roles. Only an ADMIN actor may do this; USER is
/// always retained.
#[instrument(skip_all)]
pub async fn set_user_roles(
    pool: &Pool,
    actor_id: &str,
    target_id: &str,
    roles: &[Role],
) -> Result<User> {
    let actor = get_user(pool, actor_id)
        .await?
        .ok_or_else(|| anyhow!("user {} not found", actor_id))?;
    if !actor.is_admin() {
        bail!("user {} is not an admin", actor.email);
    }

    let mut roles: Vec<Role> = roles.to_vec();
    roles.push(Role::User);
    roles.sort();
    roles.dedup();

    let res = sqlx::query("UPDATE users SET roles = ? WHERE id = ?")
        .bind(to_json(&roles)?)
        .bind(target_id)
        .execute(pool)
        .await?;
    if res.rows_affected() == 0 {
        bail!("user {} not found", target_id);
    }
    get_user(pool, target_id)
        .await?
        .ok_or_else(|| anyhow!("user {} not found", target_id))
}

/// Grant ADMIN without an acting admin. Used to bootstrap the first account.
#[instrument(skip_all)]
pub async fn bootstrap_admin(pool: &Pool, email: &str) -> Result<()> {
    let res = sqlx::query("UPDATE users SET roles = ? WHERE email = ?")
        .bind(to_json(&[Role::User, Role::Admin])?)
        .bind(normalize_email(email))
        .execute(pool)
        .await?;
    if res.rows_affected() == 0 {
        bail!("user {} not found", email);
    }
    Ok(())
}
