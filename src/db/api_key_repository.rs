//! API key repository
//!
//! Persists `ApiKey` records and their usage logs. Timestamps are stored as
//! RFC3339 text; list-valued fields (scopes, whitelist, settings) are JSON
//! columns. `key_hash` carries a unique index and is the only verification
//! lookup path.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::models::{
    ApiKey, ApiKeyAnalytics, ApiKeyListQuery, ApiKeyUsageLog, DailyRequestCount,
    EndpointRequestCount, SecuritySettings,
};

#[derive(Debug, sqlx::FromRow)]
struct ApiKeyRow {
    id: String,
    user_id: String,
    name: String,
    description: Option<String>,
    key_hash: String,
    key_prefix: String,
    scopes: String,
    status: String,
    rate_limit_per_minute: i64,
    daily_usage_quota: i64,
    ip_whitelist: String,
    security_settings: String,
    expires_at: Option<String>,
    usage_count: i64,
    today_usage_count: i64,
    last_reset_date: Option<String>,
    created_at: String,
    updated_at: String,
    last_used_at: Option<String>,
    revoked_at: Option<String>,
}

const API_KEY_COLUMNS: &str = r#"
    id, user_id, name, description, key_hash, key_prefix, scopes, status,
    rate_limit_per_minute, daily_usage_quota, ip_whitelist, security_settings,
    expires_at, usage_count, today_usage_count, last_reset_date,
    created_at, updated_at, last_used_at, revoked_at
"#;

pub struct ApiKeyRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> ApiKeyRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, key: &ApiKey) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO api_keys (
                id, user_id, name, description, key_hash, key_prefix, scopes, status,
                rate_limit_per_minute, daily_usage_quota, ip_whitelist, security_settings,
                expires_at, usage_count, today_usage_count, last_reset_date,
                created_at, updated_at, last_used_at, revoked_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(key.id.to_string())
        .bind(key.user_id.to_string())
        .bind(&key.name)
        .bind(&key.description)
        .bind(&key.key_hash)
        .bind(&key.key_prefix)
        .bind(serde_json::to_string(&key.scopes)?)
        .bind(key.status.to_string())
        .bind(key.rate_limit_per_minute)
        .bind(key.daily_usage_quota)
        .bind(serde_json::to_string(&key.ip_whitelist)?)
        .bind(serde_json::to_string(&key.security_settings)?)
        .bind(key.expires_at.map(|d| d.to_rfc3339()))
        .bind(key.usage_count)
        .bind(key.today_usage_count)
        .bind(key.last_reset_date.map(|d| d.to_rfc3339()))
        .bind(key.created_at.to_rfc3339())
        .bind(key.updated_at.to_rfc3339())
        .bind(key.last_used_at.map(|d| d.to_rfc3339()))
        .bind(key.revoked_at.map(|d| d.to_rfc3339()))
        .execute(self.pool)
        .await
        .context("Failed to insert api key")?;

        Ok(())
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<ApiKey>> {
        let row = sqlx::query_as::<_, ApiKeyRow>(&format!(
            "SELECT {} FROM api_keys WHERE id = ?",
            API_KEY_COLUMNS
        ))
        .bind(id.to_string())
        .fetch_optional(self.pool)
        .await
        .context("Failed to get api key")?;

        row.map(row_to_api_key).transpose()
    }

    /// Lookup by hash, regardless of status: expiry and revocation are checked
    /// explicitly by the verifier so every failure gets its own reason.
    pub async fn get_by_hash(&self, key_hash: &str) -> Result<Option<ApiKey>> {
        let row = sqlx::query_as::<_, ApiKeyRow>(&format!(
            "SELECT {} FROM api_keys WHERE key_hash = ?",
            API_KEY_COLUMNS
        ))
        .bind(key_hash)
        .fetch_optional(self.pool)
        .await
        .context("Failed to get api key by hash")?;

        row.map(row_to_api_key).transpose()
    }

    pub async fn list_for_user(
        &self,
        user_id: Uuid,
        query: &ApiKeyListQuery,
    ) -> Result<Vec<ApiKey>> {
        let mut sql = format!(
            "SELECT {} FROM api_keys WHERE user_id = ?",
            API_KEY_COLUMNS
        );
        if query.status.is_some() {
            sql.push_str(" AND status = ?");
        }
        if query.search.is_some() {
            sql.push_str(" AND (name LIKE ? OR description LIKE ?)");
        }
        sql.push_str(" ORDER BY created_at DESC LIMIT ?");

        let mut q = sqlx::query_as::<_, ApiKeyRow>(&sql).bind(user_id.to_string());
        if let Some(status) = query.status {
            q = q.bind(status.to_string());
        }
        if let Some(ref search) = query.search {
            let pattern = format!("%{}%", search);
            q = q.bind(pattern.clone()).bind(pattern);
        }
        q = q.bind(query.limit.unwrap_or(100).clamp(1, 500));

        let rows = q
            .fetch_all(self.pool)
            .await
            .context("Failed to list api keys")?;

        let mut keys = Vec::with_capacity(rows.len());
        for row in rows {
            keys.push(row_to_api_key(row)?);
        }

        // Scope filtering happens after the JSON round-trip; scopes live in a
        // JSON column sqlite cannot index into portably.
        if let Some(ref scope) = query.scope {
            keys.retain(|k| k.scopes.iter().any(|s| s == scope));
        }

        Ok(keys)
    }

    /// Non-deleted keys held by a user, the number the creation cap is checked against
    pub async fn count_for_user(&self, user_id: Uuid) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM api_keys WHERE user_id = ?")
            .bind(user_id.to_string())
            .fetch_one(self.pool)
            .await
            .context("Failed to count api keys")?;

        Ok(row.try_get("n")?)
    }

    /// Persist the mutable fields of an updated key
    pub async fn update(&self, key: &ApiKey) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE api_keys SET
                name = ?, description = ?, scopes = ?, status = ?,
                rate_limit_per_minute = ?, daily_usage_quota = ?,
                ip_whitelist = ?, security_settings = ?, expires_at = ?,
                key_hash = ?, key_prefix = ?, updated_at = ?, revoked_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&key.name)
        .bind(&key.description)
        .bind(serde_json::to_string(&key.scopes)?)
        .bind(key.status.to_string())
        .bind(key.rate_limit_per_minute)
        .bind(key.daily_usage_quota)
        .bind(serde_json::to_string(&key.ip_whitelist)?)
        .bind(serde_json::to_string(&key.security_settings)?)
        .bind(key.expires_at.map(|d| d.to_rfc3339()))
        .bind(&key.key_hash)
        .bind(&key.key_prefix)
        .bind(key.updated_at.to_rfc3339())
        .bind(key.revoked_at.map(|d| d.to_rfc3339()))
        .bind(key.id.to_string())
        .execute(self.pool)
        .await
        .context("Failed to update api key")?;

        Ok(())
    }

    pub async fn delete(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM api_keys WHERE id = ?")
            .bind(id.to_string())
            .execute(self.pool)
            .await
            .context("Failed to delete api key")?;

        Ok(result.rows_affected() > 0)
    }

    /// Increment usage counters after a successful verification
    ///
    /// The increments run as one atomic statement so concurrent verifications
    /// never lose an update; `today_usage_count` restarts when the stored reset
    /// day differs from the current UTC date.
    pub async fn record_usage(&self, id: Uuid, now: DateTime<Utc>) -> Result<()> {
        let today = now.format("%Y-%m-%d").to_string();

        sqlx::query(
            r#"
            UPDATE api_keys SET
                usage_count = usage_count + 1,
                today_usage_count = CASE
                    WHEN substr(COALESCE(last_reset_date, ''), 1, 10) = ?
                    THEN today_usage_count + 1
                    ELSE 1
                END,
                last_reset_date = ?,
                last_used_at = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&today)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .bind(id.to_string())
        .execute(self.pool)
        .await
        .context("Failed to record api key usage")?;

        Ok(())
    }

    pub async fn insert_usage_log(&self, log: &ApiKeyUsageLog) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO api_key_usage_logs (
                id, api_key_id, timestamp, method, endpoint, status_code,
                response_time_ms, ip_address, user_agent, request_size,
                response_size, error_message, scopes_used, is_success
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(log.id.to_string())
        .bind(log.api_key_id.to_string())
        .bind(log.timestamp.to_rfc3339())
        .bind(&log.method)
        .bind(&log.endpoint)
        .bind(log.status_code)
        .bind(log.response_time_ms)
        .bind(&log.ip_address)
        .bind(&log.user_agent)
        .bind(log.request_size)
        .bind(log.response_size)
        .bind(&log.error_message)
        .bind(serde_json::to_string(&log.scopes_used)?)
        .bind(log.is_success)
        .execute(self.pool)
        .await
        .context("Failed to insert usage log")?;

        Ok(())
    }

    /// Aggregate usage logs for one key over a date range
    pub async fn analytics(
        &self,
        api_key_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<ApiKeyAnalytics> {
        let totals = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total,
                COALESCE(SUM(CASE WHEN is_success THEN 1 ELSE 0 END), 0) AS successes,
                COALESCE(AVG(response_time_ms), 0.0) AS avg_response_time
            FROM api_key_usage_logs
            WHERE api_key_id = ? AND timestamp >= ? AND timestamp <= ?
            "#,
        )
        .bind(api_key_id.to_string())
        .bind(from.to_rfc3339())
        .bind(to.to_rfc3339())
        .fetch_one(self.pool)
        .await
        .context("Failed to aggregate usage logs")?;

        let total_requests: i64 = totals.try_get("total")?;
        let successful_requests: i64 = totals.try_get("successes")?;
        let average_response_time_ms: f64 = totals.try_get("avg_response_time")?;

        let daily_rows = sqlx::query(
            r#"
            SELECT substr(timestamp, 1, 10) AS day, COUNT(*) AS n
            FROM api_key_usage_logs
            WHERE api_key_id = ? AND timestamp >= ? AND timestamp <= ?
            GROUP BY day
            ORDER BY day
            "#,
        )
        .bind(api_key_id.to_string())
        .bind(from.to_rfc3339())
        .bind(to.to_rfc3339())
        .fetch_all(self.pool)
        .await
        .context("Failed to aggregate daily request counts")?;

        let requests_per_day = daily_rows
            .into_iter()
            .filter_map(|row| {
                Some(DailyRequestCount {
                    date: row.try_get("day").ok()?,
                    count: row.try_get("n").ok()?,
                })
            })
            .collect();

        let endpoint_rows = sqlx::query(
            r#"
            SELECT endpoint, COUNT(*) AS n
            FROM api_key_usage_logs
            WHERE api_key_id = ? AND timestamp >= ? AND timestamp <= ?
            GROUP BY endpoint
            ORDER BY n DESC
            LIMIT 10
            "#,
        )
        .bind(api_key_id.to_string())
        .bind(from.to_rfc3339())
        .bind(to.to_rfc3339())
        .fetch_all(self.pool)
        .await
        .context("Failed to aggregate endpoint request counts")?;

        let top_endpoints = endpoint_rows
            .into_iter()
            .filter_map(|row| {
                Some(EndpointRequestCount {
                    endpoint: row.try_get("endpoint").ok()?,
                    count: row.try_get("n").ok()?,
                })
            })
            .collect();

        let failed_requests = total_requests - successful_requests;
        let success_rate = if total_requests > 0 {
            successful_requests as f64 / total_requests as f64
        } else {
            0.0
        };

        Ok(ApiKeyAnalytics {
            api_key_id,
            from,
            to,
            total_requests,
            successful_requests,
            failed_requests,
            success_rate,
            average_response_time_ms,
            requests_per_day,
            top_endpoints,
        })
    }
}

fn row_to_api_key(row: ApiKeyRow) -> Result<ApiKey> {
    let scopes: Vec<String> =
        serde_json::from_str(&row.scopes).context("Invalid scopes column")?;
    let ip_whitelist: Vec<String> =
        serde_json::from_str(&row.ip_whitelist).context("Invalid ip_whitelist column")?;
    let security_settings: SecuritySettings =
        serde_json::from_str(&row.security_settings).context("Invalid security_settings column")?;

    Ok(ApiKey {
        id: Uuid::parse_str(&row.id).context("Invalid api key id")?,
        user_id: Uuid::parse_str(&row.user_id).context("Invalid user id")?,
        name: row.name,
        description: row.description,
        key_hash: row.key_hash,
        key_prefix: row.key_prefix,
        scopes,
        status: row
            .status
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))?,
        rate_limit_per_minute: row.rate_limit_per_minute,
        daily_usage_quota: row.daily_usage_quota,
        ip_whitelist,
        security_settings,
        expires_at: row.expires_at.as_deref().map(parse_db_timestamp),
        usage_count: row.usage_count,
        today_usage_count: row.today_usage_count,
        last_reset_date: row.last_reset_date.as_deref().map(parse_db_timestamp),
        created_at: parse_db_timestamp(&row.created_at),
        updated_at: parse_db_timestamp(&row.updated_at),
        last_used_at: row.last_used_at.as_deref().map(parse_db_timestamp),
        revoked_at: row.revoked_at.as_deref().map(parse_db_timestamp),
    })
}

pub(crate) fn parse_db_timestamp(ts: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(ts) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(ts, "%Y-%m-%d %H:%M:%S") {
        return DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc);
    }
    Utc::now()
}
