use crate::models::status_codes;
use sqlx::SqlitePool;
use tracing::info;

pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    info!("Running database migrations...");

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS address (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            wallet_address TEXT NOT NULL UNIQUE,
            created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
            updated_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS chain_info (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            chain_name TEXT NOT NULL,
            chain_id TEXT NOT NULL UNIQUE,
            next_block_number INTEGER NOT NULL DEFAULT 0 CHECK (next_block_number >= 0),
            created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
            updated_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS address_chain (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            wallet_address_id INTEGER NOT NULL
                REFERENCES address(id) ON DELETE CASCADE,
            chain_id INTEGER NOT NULL
                REFERENCES chain_info(id) ON DELETE CASCADE,
            created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
            UNIQUE (wallet_address_id, chain_id)
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS status (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            status_type TEXT NOT NULL,
            status_code TEXT NOT NULL UNIQUE,
            status_description TEXT,
            created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS api_call_failure_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            chain_id TEXT NOT NULL REFERENCES chain_info(chain_id),
            block_number INTEGER NOT NULL,
            status_code TEXT NOT NULL REFERENCES status(status_code),
            error_message TEXT,
            created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_address_chain_chain_id
         ON address_chain(chain_id)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_failure_log_chain_block
         ON api_call_failure_log(chain_id, block_number)",
    )
    .execute(pool)
    .await?;

    seed_status_catalogue(pool).await?;

    info!("Database migrations completed successfully");
    Ok(())
}

async fn seed_status_catalogue(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let seed: [(&str, &str, &str); 6] = [
        ("SUCCESS", status_codes::SUCCESS, "Block processed successfully"),
        ("ERROR", status_codes::RPC_NOT_FOUND, "Block not found on the RPC provider"),
        ("ERROR", status_codes::RPC_TIMEOUT, "RPC call exceeded its timeout"),
        ("ERROR", status_codes::RPC_UPSTREAM_ERROR, "RPC provider returned an error object"),
        ("ERROR", status_codes::RPC_TRANSPORT_ERROR, "Network or decode failure talking to the RPC provider"),
        ("ERROR", status_codes::BATCH_ERROR, "Unclassified pre-fetch batch processing error"),
    ];

    for (status_type, code, description) in seed {
        sqlx::query(
            "INSERT INTO status (status_type, status_code, status_description)
             VALUES (?, ?, ?)
             ON CONFLICT(status_code) DO NOTHING",
        )
        .bind(status_type)
        .bind(code)
        .bind(description)
        .execute(pool)
        .await?;
    }

    Ok(())
}
