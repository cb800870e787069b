//! Narrow write capability over the ingestion tables. All upserts lean on
//! the two uniqueness constraints (`address.wallet_address`,
//! `address_chain(wallet_address_id, chain_id)`) and SQLite's native
//! `ON CONFLICT DO NOTHING`, which makes replaying a batch idempotent.

use crate::models::ChainInfo;
use sqlx::{Row, Sqlite, SqliteConnection, SqlitePool};
use std::collections::{HashMap, HashSet};
use std::time::Instant;
use tracing::{debug, info, warn};

// Rows per multi-value INSERT, kept well under SQLite's bind limit.
const INSERT_CHUNK: usize = 400;

pub async fn load_chain_by_external_id(
    pool: &SqlitePool,
    chain_id: &str,
) -> Result<Option<ChainInfo>, sqlx::Error> {
    sqlx::query_as::<Sqlite, ChainInfo>(
        "SELECT id, chain_name, chain_id, next_block_number, created_at, updated_at
         FROM chain_info WHERE chain_id = ?",
    )
    .bind(chain_id)
    .fetch_optional(pool)
    .await
}

/// Seeds the chain row at initialisation; a no-op when the row exists.
pub async fn ensure_chain(
    pool: &SqlitePool,
    chain_id: &str,
    chain_name: &str,
    start_block: u64,
) -> Result<ChainInfo, sqlx::Error> {
    sqlx::query(
        "INSERT INTO chain_info (chain_name, chain_id, next_block_number)
         VALUES (?, ?, ?)
         ON CONFLICT(chain_id) DO NOTHING",
    )
    .bind(chain_name)
    .bind(chain_id)
    .bind(start_block as i64)
    .execute(pool)
    .await?;

    sqlx::query_as::<Sqlite, ChainInfo>(
        "SELECT id, chain_name, chain_id, next_block_number, created_at, updated_at
         FROM chain_info WHERE chain_id = ?",
    )
    .bind(chain_id)
    .fetch_one(pool)
    .await
}

/// Upserts the miss set and its chain relationships. The batched address
/// insert and id resolution share one transaction so the lookup sees rows
/// written a moment earlier; an error there is fatal to the batch. The
/// relationship batch runs after that commit and is best-effort: a failure
/// logs at debug and never rolls back the address rows. The high-water
/// mark is deliberately NOT part of any of this.
pub async fn upsert_addresses_and_links(
    pool: &SqlitePool,
    addresses: &HashSet<String>,
    chain_row_id: i64,
) -> Result<(), sqlx::Error> {
    if addresses.is_empty() {
        return Ok(());
    }

    let started = Instant::now();
    let list: Vec<&str> = addresses.iter().map(String::as_str).collect();

    let mut tx = pool.begin().await?;
    upsert_addresses(&mut tx, &list).await?;
    let ids = lookup_address_ids(&mut tx, &list).await?;
    tx.commit().await?;
    if ids.len() < list.len() {
        warn!(
            "Resolved only {} of {} addresses to ids",
            ids.len(),
            list.len()
        );
    }

    let id_list: Vec<i64> = ids.values().copied().collect();
    match pool.acquire().await {
        Ok(mut conn) => {
            if let Err(e) = upsert_relationships(&mut conn, &id_list, chain_row_id).await {
                debug!(
                    "Failed to insert some address-chain relationships, continuing: {}",
                    e
                );
            }
        }
        Err(e) => debug!(
            "No connection for relationship inserts, continuing: {}",
            e
        ),
    }

    info!(
        "Bulk upserted {} addresses and {} relationships in {} ms",
        list.len(),
        id_list.len(),
        started.elapsed().as_millis()
    );
    Ok(())
}

pub async fn upsert_addresses(
    conn: &mut SqliteConnection,
    addresses: &[&str],
) -> Result<(), sqlx::Error> {
    for chunk in addresses.chunks(INSERT_CHUNK) {
        let placeholders = vec!["(?)"; chunk.len()].join(", ");
        let sql = format!(
            "INSERT INTO address (wallet_address) VALUES {}
             ON CONFLICT(wallet_address) DO NOTHING",
            placeholders
        );
        let mut query = sqlx::query(&sql);
        for address in chunk {
            query = query.bind(*address);
        }
        query.execute(&mut *conn).await?;
    }
    Ok(())
}

pub async fn lookup_address_ids(
    conn: &mut SqliteConnection,
    addresses: &[&str],
) -> Result<HashMap<String, i64>, sqlx::Error> {
    let mut ids = HashMap::with_capacity(addresses.len());
    for chunk in addresses.chunks(INSERT_CHUNK) {
        let placeholders = vec!["?"; chunk.len()].join(", ");
        let sql = format!(
            "SELECT id, wallet_address FROM address WHERE wallet_address IN ({})",
            placeholders
        );
        let mut query = sqlx::query(&sql);
        for address in chunk {
            query = query.bind(*address);
        }
        let rows = query.fetch_all(&mut *conn).await?;
        for row in rows {
            ids.insert(row.get::<String, _>("wallet_address"), row.get::<i64, _>("id"));
        }
    }
    Ok(ids)
}

pub async fn upsert_relationships(
    conn: &mut SqliteConnection,
    address_ids: &[i64],
    chain_row_id: i64,
) -> Result<(), sqlx::Error> {
    for chunk in address_ids.chunks(INSERT_CHUNK) {
        let placeholders = vec!["(?, ?)"; chunk.len()].join(", ");
        let sql = format!(
            "INSERT INTO address_chain (wallet_address_id, chain_id) VALUES {}
             ON CONFLICT(wallet_address_id, chain_id) DO NOTHING",
            placeholders
        );
        let mut query = sqlx::query(&sql);
        for address_id in chunk {
            query = query.bind(*address_id).bind(chain_row_id);
        }
        query.execute(&mut *conn).await?;
    }
    Ok(())
}

/// Atomic single-row advance of the chain's high-water mark.
pub async fn advance_high_water_mark(
    pool: &SqlitePool,
    chain_row_id: i64,
    next_block_number: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE chain_info
         SET next_block_number = ?, updated_at = strftime('%s', 'now')
         WHERE id = ?",
    )
    .bind(next_block_number)
    .bind(chain_row_id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn insert_failure_log(
    pool: &SqlitePool,
    chain_id: &str,
    block_number: u64,
    status_code: &str,
    error_message: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO api_call_failure_log (chain_id, block_number, status_code, error_message)
         VALUES (?, ?, ?, ?)",
    )
    .bind(chain_id)
    .bind(block_number as i64)
    .bind(status_code)
    .bind(error_message)
    .execute(pool)
    .await?;
    Ok(())
}

/// Session-level hints before a large batch. Failures are logged and
/// ignored; the batch proceeds either way.
pub async fn tune_for_bulk(pool: &SqlitePool) {
    for pragma in [
        "PRAGMA synchronous = OFF",
        "PRAGMA temp_store = MEMORY",
        "PRAGMA cache_size = -64000",
    ] {
        if let Err(e) = sqlx::query(pragma).execute(pool).await {
            warn!("Failed to apply bulk tuning '{}': {}", pragma, e);
        }
    }
    debug!("Database tuned for bulk operations");
}

pub async fn reset_tuning(pool: &SqlitePool) {
    for pragma in [
        "PRAGMA synchronous = NORMAL",
        "PRAGMA temp_store = DEFAULT",
        "PRAGMA cache_size = -2000",
    ] {
        if let Err(e) = sqlx::query(pragma).execute(pool).await {
            warn!("Failed to reset bulk tuning '{}': {}", pragma, e);
        }
    }
    debug!("Database tuning reset to defaults");
}
