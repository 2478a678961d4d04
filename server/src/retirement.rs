//! Retires dogs that have been idle past the configured threshold.
//!
//! The leaderboard row is committed BEFORE any game state is touched: if
//! the database is down, the dog (and its token) stays in place and the
//! next tick tries again. Nothing is ever lost to a failed commit.

use crate::app::Application;
use crate::db::Database;
use crate::model::{MapId, RetiredDog};
use log::{info, warn};
use std::time::Duration;
use uuid::Uuid;

/// Dogs whose idle time has crossed the retirement threshold.
pub fn retirable_dogs(app: &Application) -> Vec<(MapId, u64)> {
    let max_idle_time = app.game().max_idle_time();
    app.game()
        .sessions()
        .values()
        .flat_map(|session| {
            session
                .dogs()
                .values()
                .filter(|dog| dog.idle_for >= max_idle_time)
                .map(|dog| (session.map_id().to_string(), dog.id))
        })
        .collect()
}

pub struct RetirementListener {
    db: Database,
}

impl RetirementListener {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn on_tick(&self, app: &mut Application, _dt: Duration) {
        for (map_id, dog_id) in retirable_dogs(app) {
            if let Err(e) = self.retire(app, &map_id, dog_id).await {
                warn!("could not retire dog {dog_id}: {e:#}");
            }
        }
    }

    async fn retire(
        &self,
        app: &mut Application,
        map_id: &str,
        dog_id: u64,
    ) -> anyhow::Result<()> {
        let Some(dog) = app
            .game()
            .find_session(map_id)
            .and_then(|session| session.dog(dog_id))
        else {
            return Ok(());
        };

        let retired = RetiredDog {
            id: Uuid::new_v4(),
            name: dog.name.clone(),
            score: dog.score.min(i32::MAX as u64) as i32,
            play_time_ms: dog.age.as_millis().min(i32::MAX as u128) as i32,
        };

        let mut uow = self.db.unit_of_work().await?;
        uow.save_retired_dog(&retired).await?;
        // Commit before cleanup: a failing database must not lose the dog.
        uow.commit().await?;

        app.remove_player(map_id, dog_id);
        info!(
            "dog {dog_id} ({}) retired with score {}",
            retired.name, retired.score
        );
        Ok(())
    }
}
