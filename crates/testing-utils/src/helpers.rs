//! Raw attempt manipulation against a SQLite-backed store
//!
//! The todo-view scenarios need attempts inserted with explicit start
//! times and exit codes rewritten after the fact, which the store's
//! public surface deliberately does not allow. These helpers go
//! straight to the pool.

use chrono::{DateTime, Duration, Utc};
use sqlx::{Row, SqlitePool};

/// Insert an attempt with an explicit start time; a non-null exit code
/// also sets `finish = start + 1s`.
pub async fn insert_attempt(
    pool: &SqlitePool,
    task: i64,
    start: DateTime<Utc>,
    exit_code: Option<i32>,
) -> i64 {
    let finish = exit_code.map(|_| start + Duration::seconds(1));
    let row = sqlx::query(
        "insert into attempts(task, start, finish, exit_code) values ($1, $2, $3, $4)
         returning id",
    )
    .bind(task)
    .bind(start)
    .bind(finish)
    .bind(exit_code)
    .fetch_one(pool)
    .await
    .expect("insert attempt");
    row.get("id")
}

/// Rewrite an attempt's exit code (sets finish when transitioning to a
/// completed state, clears it when reverting to inflight)
pub async fn set_attempt_exit(pool: &SqlitePool, attempt: i64, exit_code: Option<i32>) {
    match exit_code {
        Some(code) => {
            // timestamps are bound from chrono so the TEXT encoding stays
            // uniform across rows
            let start: DateTime<Utc> =
                sqlx::query_scalar("select start from attempts where id = $1")
                    .bind(attempt)
                    .fetch_one(pool)
                    .await
                    .expect("attempt start");
            sqlx::query(
                "update attempts set exit_code = $1, finish = $2 where id = $3",
            )
            .bind(code)
            .bind(start + Duration::seconds(1))
            .bind(attempt)
            .execute(pool)
            .await
            .expect("update attempt");
        }
        None => {
            sqlx::query("update attempts set exit_code = null, finish = null where id = $1")
                .bind(attempt)
                .execute(pool)
                .await
                .expect("update attempt");
        }
    }
}

/// Id of the chronologically latest attempt of a task
pub async fn latest_attempt_id(pool: &SqlitePool, task: i64) -> i64 {
    let row = sqlx::query(
        "select id from attempts where task = $1 order by start desc, id desc limit 1",
    )
    .bind(task)
    .fetch_one(pool)
    .await
    .expect("latest attempt");
    row.get("id")
}

/// Number of attempts recorded for a task
pub async fn attempt_count(pool: &SqlitePool, task: i64) -> i64 {
    let row = sqlx::query("select count(*) as n from attempts where task = $1")
        .bind(task)
        .fetch_one(pool)
        .await
        .expect("attempt count");
    row.get("n")
}
