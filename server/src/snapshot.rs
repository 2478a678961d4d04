//! Full-state snapshots.
//!
//! The live state is mirrored into plain serde structs and written as a
//! bincode stream to `temp_<name>` next to the target file, then atomically
//! renamed over it, so a crash mid-write leaves the previous snapshot
//! intact.
//! Restore rebuilds sessions first (every referenced map must exist), then
//! players, then tokens, and finally advances the dog-id counter past every
//! restored id.

use crate::app::Application;
use crate::loot::LootGenerator;
use crate::model::{Direction, Dog, GameSession};
use anyhow::{bail, Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use shared::geom::{Point2D, Vec2D};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Serialize, Deserialize)]
struct DogRepr {
    id: u64,
    name: String,
    pos: Point2D,
    vel: Vec2D,
    dir: Direction,
    bag_capacity: usize,
    bag: Vec<(u64, usize)>,
    score: u64,
    age_ms: u64,
    idle_for_ms: u64,
    is_idle: bool,
}

impl DogRepr {
    fn capture(dog: &Dog) -> Self {
        Self {
            id: dog.id,
            name: dog.name.clone(),
            pos: dog.pos,
            vel: dog.vel,
            dir: dog.dir,
            bag_capacity: dog.bag_capacity,
            bag: dog.bag.clone(),
            score: dog.score,
            age_ms: dog.age.as_millis() as u64,
            idle_for_ms: dog.idle_for.as_millis() as u64,
            is_idle: dog.idle,
        }
    }

    fn restore(self) -> Result<Dog> {
        let mut dog = Dog::new(self.id, self.name, self.pos, self.bag_capacity);
        dog.vel = self.vel;
        dog.dir = self.dir;
        dog.score = self.score;
        dog.age = Duration::from_millis(self.age_ms);
        dog.idle_for = Duration::from_millis(self.idle_for_ms);
        dog.idle = self.is_idle;
        for (loot_id, loot_type) in self.bag {
            if !dog.try_grab_item(loot_id, loot_type) {
                bail!("dog {}: bag contents exceed capacity", dog.id);
            }
        }
        Ok(dog)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SessionRepr {
    map_id: String,
    dogs: Vec<DogRepr>,
    loot: Vec<(u64, (usize, Point2D))>,
    time_without_loot_ms: u64,
    next_loot_id: u64,
}

impl SessionRepr {
    fn capture(session: &GameSession) -> Self {
        Self {
            map_id: session.map_id().to_string(),
            dogs: session.dogs().values().map(DogRepr::capture).collect(),
            loot: session
                .loot()
                .iter()
                .map(|(&id, &entry)| (id, entry))
                .collect(),
            time_without_loot_ms: session.loot_generator().time_without_loot().as_millis() as u64,
            next_loot_id: session.next_loot_id(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct GameRepr {
    sessions: Vec<SessionRepr>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PlayerRepr {
    map_id: String,
    dog_id: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApplicationRepr {
    game: GameRepr,
    players: Vec<PlayerRepr>,
    tokens: Vec<(String, u64)>,
}

impl ApplicationRepr {
    fn capture(app: &Application) -> Self {
        Self {
            game: GameRepr {
                sessions: app
                    .game()
                    .sessions()
                    .values()
                    .map(SessionRepr::capture)
                    .collect(),
            },
            players: app
                .players()
                .iter()
                .map(|(_, player)| PlayerRepr {
                    map_id: player.map_id.clone(),
                    dog_id: player.dog_id,
                })
                .collect(),
            tokens: app
                .tokens()
                .iter()
                .map(|(token, &player_id)| (token.clone(), player_id))
                .collect(),
        }
    }

    fn restore(self, app: &mut Application) -> Result<()> {
        let mut max_dog_id = None;

        for session_repr in self.game.sessions {
            let game = app.game();
            if game.find_map(&session_repr.map_id).is_none() {
                bail!("snapshot references unknown map {:?}", session_repr.map_id);
            }
            let loot_gen =
                LootGenerator::new(game.loot_gen_period(), game.loot_gen_probability());
            let mut session = GameSession::new(session_repr.map_id, loot_gen);
            for dog_repr in session_repr.dogs {
                max_dog_id = max_dog_id.max(Some(dog_repr.id));
                session.add_dog(dog_repr.restore()?);
            }
            for (loot_id, (loot_type, pos)) in session_repr.loot {
                session.insert_loot(loot_id, loot_type, pos);
            }
            session
                .loot_generator_mut()
                .set_time_without_loot(Duration::from_millis(session_repr.time_without_loot_ms));
            session.set_next_loot_id(session_repr.next_loot_id);
            app.game_mut().add_session(session);
        }

        for player in self.players {
            let dog_exists = app
                .game()
                .find_session(&player.map_id)
                .is_some_and(|session| session.dog(player.dog_id).is_some());
            if !dog_exists {
                bail!(
                    "snapshot player {} references missing dog on map {:?}",
                    player.dog_id,
                    player.map_id
                );
            }
            app.players_mut().add(player.dog_id, player.map_id);
        }

        for (token, player_id) in self.tokens {
            if app.players().find(player_id).is_none() {
                bail!("snapshot token references missing player {player_id}");
            }
            app.tokens_mut().bind(token, player_id);
        }

        if let Some(max) = max_dog_id {
            app.bump_dog_id_past(max);
        }
        Ok(())
    }
}

/// Serializes the whole application to `path`, going through a `temp_`
/// sibling so readers only ever see a complete file.
pub fn save_state(app: &Application, path: &Path) -> Result<()> {
    let file_name = path
        .file_name()
        .context("state file path has no file name")?;
    let temp_path = path.with_file_name(format!("temp_{}", file_name.to_string_lossy()));

    let repr = ApplicationRepr::capture(app);
    let file = File::create(&temp_path)
        .with_context(|| format!("could not create {}", temp_path.display()))?;
    let mut writer = BufWriter::new(file);
    bincode::serialize_into(&mut writer, &repr).context("state serialization failed")?;
    writer.flush()?;
    drop(writer);

    fs::rename(&temp_path, path)
        .with_context(|| format!("could not rename snapshot into {}", path.display()))?;
    Ok(())
}

/// Restores the application from `path` if the file exists. Errors here are
/// fatal to startup.
pub fn load_state(app: &mut Application, path: &Path) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }
    let file =
        File::open(path).with_context(|| format!("could not open {}", path.display()))?;
    let repr: ApplicationRepr =
        bincode::deserialize_from(BufReader::new(file)).context("state deserialization failed")?;
    repr.restore(app)
}

/// Writes periodic snapshots from inside the tick; a negative/absent
/// interval means snapshots happen only on demand (shutdown).
pub struct SnapshotListener {
    path: PathBuf,
    save_interval: Option<Duration>,
    time_since_last_save: Mutex<Duration>,
}

impl SnapshotListener {
    pub fn new(path: PathBuf, save_interval: Option<Duration>) -> Self {
        Self {
            path,
            save_interval,
            time_since_last_save: Mutex::new(Duration::ZERO),
        }
    }

    pub fn on_tick(&self, app: &Application, dt: Duration) {
        let Some(interval) = self.save_interval else {
            return;
        };
        let mut elapsed = self
            .time_since_last_save
            .lock()
            .expect("snapshot timer poisoned");
        *elapsed += dt;
        if *elapsed >= interval {
            self.save(app);
            *elapsed = Duration::ZERO;
        }
    }

    /// Saves now. Failures are logged and swallowed: a broken disk must not
    /// take the tick down, and the previous snapshot survives untouched.
    pub fn save(&self, app: &Application) {
        match save_state(app, &self.path) {
            Ok(()) => info!("state saved to {}", self.path.display()),
            Err(e) => warn!("state save failed: {e:#}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::SpawnPolicy;
    use crate::config::parse_game;

    const CONFIG: &str = r#"{
        "lootGeneratorConfig": { "period": 5000.0, "probability": 0.0 },
        "dogRetirementTime": 60.0,
        "maps": [
            {
                "id": "town", "name": "Town",
                "lootTypes": [ { "value": 10 }, { "value": 5 } ],
                "roads": [
                    { "x0": 0, "y0": 0, "x1": 10 },
                    { "x0": 5, "y0": 0, "y1": 10 }
                ],
                "buildings": [],
                "offices": [ { "id": "o0", "x": 10, "y": 0, "offsetX": 0, "offsetY": 0 } ]
            }
        ]
    }"#;

    fn populated_app() -> Application {
        let mut app = Application::new(parse_game(CONFIG).unwrap(), SpawnPolicy::FirstRoadStart);
        let (id, _) = app.join_game("town", "Pluto").unwrap();
        let (id2, _) = app.join_game("town", "Laika").unwrap();

        let session = app.game_mut().find_session_mut("town").unwrap();
        session.insert_loot(41, 1, Point2D::new(7.0, 0.0));
        session.set_next_loot_id(41);
        session
            .loot_generator_mut()
            .set_time_without_loot(Duration::from_millis(777));
        {
            let dog = session.dog_mut(id).unwrap();
            dog.pos = Point2D::new(4.25, 0.0);
            dog.score = 42;
            dog.try_grab_item(3, 0);
            dog.age = Duration::from_millis(9000);
            dog.idle_for = Duration::from_millis(1500);
        }
        app.set_player_action(id2, "D");
        app
    }

    #[test]
    fn test_roundtrip_preserves_everything() {
        let app = populated_app();

        let repr = ApplicationRepr::capture(&app);
        let bytes = bincode::serialize(&repr).unwrap();
        let repr: ApplicationRepr = bincode::deserialize(&bytes).unwrap();

        let mut restored =
            Application::new(parse_game(CONFIG).unwrap(), SpawnPolicy::FirstRoadStart);
        repr.restore(&mut restored).unwrap();

        let before = app.game().find_session("town").unwrap();
        let after = restored.game().find_session("town").unwrap();

        assert_eq!(before.dogs().len(), after.dogs().len());
        for (id, dog) in before.dogs() {
            let restored_dog = after.dog(*id).unwrap();
            assert_eq!(dog.name, restored_dog.name);
            assert_eq!(dog.pos, restored_dog.pos);
            assert_eq!(dog.vel, restored_dog.vel);
            assert_eq!(dog.dir, restored_dog.dir);
            assert_eq!(dog.bag_capacity, restored_dog.bag_capacity);
            assert_eq!(dog.bag, restored_dog.bag);
            assert_eq!(dog.score, restored_dog.score);
            assert_eq!(dog.age, restored_dog.age);
            assert_eq!(dog.idle_for, restored_dog.idle_for);
            assert_eq!(dog.idle, restored_dog.idle);
        }
        assert_eq!(before.loot(), after.loot());
        assert_eq!(before.next_loot_id(), after.next_loot_id());
        assert_eq!(
            before.loot_generator().time_without_loot(),
            after.loot_generator().time_without_loot()
        );

        // Tokens still resolve to the same players.
        for (token, player_id) in app.tokens().iter() {
            assert_eq!(restored.find_player_by_token(token), Some(*player_id));
        }
        assert_eq!(app.players().len(), restored.players().len());
    }

    #[test]
    fn test_restore_advances_dog_id_counter() {
        let app = populated_app();
        let repr = ApplicationRepr::capture(&app);

        let mut restored =
            Application::new(parse_game(CONFIG).unwrap(), SpawnPolicy::FirstRoadStart);
        repr.restore(&mut restored).unwrap();

        let (new_id, _) = restored.join_game("town", "Bobik").unwrap();
        let session = restored.game().find_session("town").unwrap();
        assert_eq!(session.dogs().len(), 3);
        assert!(session.dogs().keys().filter(|&&id| id == new_id).count() == 1);
    }

    #[test]
    fn test_restore_unknown_map_fails() {
        let repr = ApplicationRepr {
            game: GameRepr {
                sessions: vec![SessionRepr {
                    map_id: "ghost-town".to_string(),
                    dogs: vec![],
                    loot: vec![],
                    time_without_loot_ms: 0,
                    next_loot_id: 0,
                }],
            },
            players: vec![],
            tokens: vec![],
        };

        let mut app = Application::new(parse_game(CONFIG).unwrap(), SpawnPolicy::FirstRoadStart);
        assert!(repr.restore(&mut app).is_err());
    }

    #[test]
    fn test_restore_token_without_player_fails() {
        let repr = ApplicationRepr {
            game: GameRepr { sessions: vec![] },
            players: vec![],
            tokens: vec![("a".repeat(32), 5)],
        };

        let mut app = Application::new(parse_game(CONFIG).unwrap(), SpawnPolicy::FirstRoadStart);
        assert!(repr.restore(&mut app).is_err());
    }

    #[test]
    fn test_save_state_writes_and_replaces_atomically() {
        let app = populated_app();
        let dir = std::env::temp_dir();
        let path = dir.join(format!("game_state_test_{}.bin", std::process::id()));

        save_state(&app, &path).unwrap();
        assert!(path.exists());
        assert!(!dir
            .join(format!("temp_game_state_test_{}.bin", std::process::id()))
            .exists());

        // Saving again replaces the file and still restores cleanly.
        save_state(&app, &path).unwrap();
        let mut restored =
            Application::new(parse_game(CONFIG).unwrap(), SpawnPolicy::FirstRoadStart);
        load_state(&mut restored, &path).unwrap();
        assert_eq!(
            restored.game().find_session("town").unwrap().dogs().len(),
            2
        );

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_load_state_missing_file_is_noop() {
        let mut app = Application::new(parse_game(CONFIG).unwrap(), SpawnPolicy::FirstRoadStart);
        let path = std::env::temp_dir().join("definitely_not_there_12345.bin");
        load_state(&mut app, &path).unwrap();
        assert!(app.game().sessions().is_empty());
    }
}
