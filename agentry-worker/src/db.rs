use sqlx::{PgPool, postgres::PgPoolOptions};
use std::time::Duration;

pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

/// Creates the queue tables and the two store functions workers rely on
///
/// Only run when the worker owns the schema; deployments where the
/// submission service manages migrations leave this off.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS orchestration_requests (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            org_id TEXT,
            user_id TEXT,
            status TEXT NOT NULL DEFAULT 'pending',
            repo_url TEXT,
            branch TEXT DEFAULT 'main',
            prompt TEXT NOT NULL,
            config JSONB NOT NULL DEFAULT '{}',
            metadata JSONB NOT NULL DEFAULT '{}',
            claimed_at TIMESTAMPTZ,
            claimed_by TEXT,
            attempts INTEGER NOT NULL DEFAULT 0,
            max_attempts INTEGER NOT NULL DEFAULT 3,
            last_error TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS orchestration_results (
            id UUID PRIMARY KEY,
            request_id UUID NOT NULL REFERENCES orchestration_requests(id) ON DELETE CASCADE,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            status TEXT NOT NULL,
            output JSONB NOT NULL DEFAULT '{}',
            pr_url TEXT,
            commit_sha TEXT,
            branch_name TEXT,
            duration_ms BIGINT,
            worker_id TEXT,
            error TEXT,
            error_details JSONB
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_requests_pending ON orchestration_requests(created_at) WHERE status = 'pending'",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_requests_claimed ON orchestration_requests(claimed_at) WHERE status = 'processing'",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_results_request_id ON orchestration_results(request_id, created_at)",
    )
    .execute(pool)
    .await?;

    // Single-winner claim: SKIP LOCKED lets concurrent callers pass over a
    // row another transaction is already claiming.
    sqlx::query(
        r#"
        CREATE OR REPLACE FUNCTION claim_next_request(p_worker_id TEXT)
        RETURNS SETOF orchestration_requests
        LANGUAGE sql
        AS $$
            UPDATE orchestration_requests r
            SET status = 'processing',
                claimed_at = NOW(),
                claimed_by = p_worker_id,
                attempts = r.attempts + 1,
                updated_at = NOW()
            WHERE r.id = (
                SELECT id
                FROM orchestration_requests
                WHERE status = 'pending' AND attempts < max_attempts
                ORDER BY created_at ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING r.*;
        $$
        "#,
    )
    .execute(pool)
    .await?;

    // Expired leases with no attempts left are failed rather than requeued;
    // only requeued rows are counted.
    sqlx::query(
        r#"
        CREATE OR REPLACE FUNCTION release_stale_requests(p_threshold INTERVAL)
        RETURNS INTEGER
        LANGUAGE plpgsql
        AS $$
        DECLARE
            released INTEGER;
        BEGIN
            UPDATE orchestration_requests
            SET status = 'failed',
                last_error = 'lease expired after ' || attempts || ' attempt(s)',
                claimed_at = NULL,
                claimed_by = NULL,
                updated_at = NOW()
            WHERE status = 'processing'
              AND claimed_at < NOW() - p_threshold
              AND attempts >= max_attempts;

            UPDATE orchestration_requests
            SET status = 'pending',
                claimed_at = NULL,
                claimed_by = NULL,
                updated_at = NOW()
            WHERE status = 'processing'
              AND claimed_at < NOW() - p_threshold;

            GET DIAGNOSTICS released = ROW_COUNT;
            RETURN released;
        END;
        $$
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!("Database migrations completed successfully");
    Ok(())
}
