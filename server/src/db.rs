//! Leaderboard store access.
//!
//! [`Database`] owns a capacity-bounded Postgres pool and bootstraps the
//! `retired_players` schema on connect. All reads and writes go through a
//! [`UnitOfWork`]: one pooled connection, one transaction, committed at
//! most once; dropping an uncommitted unit rolls everything back.

use crate::model::RetiredDog;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Row, Transaction};

/// Environment variable holding the Postgres connection URL.
pub const DB_URL_ENV: &str = "GAME_DB_URL";

const CREATE_TABLE: &str = "\
CREATE TABLE IF NOT EXISTS retired_players (
    id UUID CONSTRAINT retired_player_id_constraint PRIMARY KEY,
    name varchar(100) NOT NULL,
    score int NOT NULL,
    play_time_ms int NOT NULL
)";

const CREATE_INDEX: &str = "\
CREATE INDEX IF NOT EXISTS retired_players_idx
    ON retired_players (score DESC, play_time_ms, name)";

/// Shared handle to the connection pool. Cloning is cheap; all clones use
/// the same pool.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connects a pool of `capacity` connections and ensures the schema
    /// exists. `capacity` is floored at one so a unit of work can always be
    /// opened eventually.
    pub async fn connect(url: &str, capacity: u32) -> sqlx::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(capacity.max(1))
            .connect(url)
            .await?;

        sqlx::query(CREATE_TABLE).execute(&pool).await?;
        sqlx::query(CREATE_INDEX).execute(&pool).await?;

        Ok(Self { pool })
    }

    /// Opens a unit of work. Waits until a pooled connection is free.
    pub async fn unit_of_work(&self) -> sqlx::Result<UnitOfWork<'_>> {
        Ok(UnitOfWork {
            tx: self.pool.begin().await?,
        })
    }
}

/// A scoped transaction over the retirement repository.
pub struct UnitOfWork<'a> {
    tx: Transaction<'a, Postgres>,
}

impl UnitOfWork<'_> {
    pub async fn save_retired_dog(&mut self, dog: &RetiredDog) -> sqlx::Result<()> {
        sqlx::query(
            "INSERT INTO retired_players (id, name, score, play_time_ms) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(dog.id)
        .bind(&dog.name)
        .bind(dog.score)
        .bind(dog.play_time_ms)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    /// Fetches a page of the leaderboard, best scores first; equal scores
    /// order by shorter play time, then name.
    pub async fn fetch_retired_dogs(
        &mut self,
        offset: i64,
        limit: i64,
    ) -> sqlx::Result<Vec<RetiredDog>> {
        let rows = sqlx::query(
            "SELECT id, name, score, play_time_ms FROM retired_players \
             ORDER BY score DESC, play_time_ms, name \
             LIMIT $1 OFFSET $2",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| RetiredDog {
                id: row.get(0),
                name: row.get(1),
                score: row.get(2),
                play_time_ms: row.get(3),
            })
            .collect())
    }

    /// Commits the transaction. Consumes the unit of work: afterwards there
    /// is nothing left to roll back.
    pub async fn commit(self) -> sqlx::Result<()> {
        self.tx.commit().await
    }
}
