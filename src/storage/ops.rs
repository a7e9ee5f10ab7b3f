use std::collections::BTreeMap;

use chrono::{SecondsFormat, Utc};
use sqlx::{Row, SqlitePool};

use crate::errors::EmailResult;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpStateEntry {
    pub namespace: String,
    pub key: String,
    pub value: String,
    /// RFC 3339, UTC.
    pub updated_at: String,
}

pub async fn ensure_op_state_table(pool: &SqlitePool) -> EmailResult<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS op_state (
            namespace TEXT NOT NULL,
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (namespace, key)
        );
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_value(pool: &SqlitePool, namespace: &str, key: &str) -> EmailResult<String> {
    let row = sqlx::query("SELECT value FROM op_state WHERE namespace = ?1 AND key = ?2")
        .bind(namespace)
        .bind(key)
        .fetch_optional(pool)
        .await?;

    match row {
        Some(row) => Ok(row.try_get::<String, _>(0)?),
        None => Ok(String::new()),
    }
}

pub async fn get_entry(
    pool: &SqlitePool,
    namespace: &str,
    key: &str,
) -> EmailResult<Option<OpStateEntry>> {
    let row = sqlx::query(
        r#"
        SELECT namespace, key, value, updated_at
        FROM op_state
        WHERE namespace = ?1 AND key = ?2
        "#,
    )
    .bind(namespace)
    .bind(key)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };
    Ok(Some(OpStateEntry {
        namespace: row.try_get(0)?,
        key: row.try_get(1)?,
        value: row.try_get(2)?,
        updated_at: row.try_get(3)?,
    }))
}

pub async fn set_value(
    pool: &SqlitePool,
    namespace: &str,
    key: &str,
    value: &str,
) -> EmailResult<()> {
    sqlx::query(
        r#"
        INSERT INTO op_state (namespace, key, value, updated_at)
        VALUES (?1, ?2, ?3, ?4)
        ON CONFLICT(namespace, key) DO UPDATE SET
            value = excluded.value,
            updated_at = excluded.updated_at;
        "#,
    )
    .bind(namespace)
    .bind(key)
    .bind(value)
    .bind(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true))
    .execute(pool)
    .await?;
    Ok(())
}

/// Writes `value` only when it is numerically greater than the stored one
/// (a non-numeric stored value counts as zero). Returns whether a row changed.
pub async fn advance_value(
    pool: &SqlitePool,
    namespace: &str,
    key: &str,
    value: u32,
) -> EmailResult<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO op_state (namespace, key, value, updated_at)
        VALUES (?1, ?2, ?3, ?4)
        ON CONFLICT(namespace, key) DO UPDATE SET
            value = excluded.value,
            updated_at = excluded.updated_at
        WHERE CAST(op_state.value AS INTEGER) < CAST(excluded.value AS INTEGER);
        "#,
    )
    .bind(namespace)
    .bind(key)
    .bind(value.to_string())
    .bind(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true))
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn delete_value(pool: &SqlitePool, namespace: &str, key: &str) -> EmailResult<()> {
    sqlx::query("DELETE FROM op_state WHERE namespace = ?1 AND key = ?2")
        .bind(namespace)
        .bind(key)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn delete_namespace(pool: &SqlitePool, namespace: &str) -> EmailResult<()> {
    sqlx::query("DELETE FROM op_state WHERE namespace = ?1")
        .bind(namespace)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn list_namespace(
    pool: &SqlitePool,
    namespace: &str,
) -> EmailResult<BTreeMap<String, String>> {
    let rows = sqlx::query(
        r#"
        SELECT key, value
        FROM op_state
        WHERE namespace = ?1
        ORDER BY key ASC;
        "#,
    )
    .bind(namespace)
    .fetch_all(pool)
    .await?;

    let mut out = BTreeMap::new();
    for row in rows {
        out.insert(row.try_get(0)?, row.try_get(1)?);
    }
    Ok(out)
}
