//! Application layer: player and token registries, the join/action
//! operations the API calls into, the per-tick simulation pipeline, and the
//! listener fan-out that retirement and snapshotting hang off.
//!
//! Everything here is plain synchronous state; the server wraps one
//! [`Application`] in a `tokio::sync::Mutex` and funnels every mutation
//! (ticks, API calls, listener work) through that single lock so state
//! transitions are totally ordered.

use crate::model::{Direction, Dog, Game, GameSession, Map, MapId, GATHERER_WIDTH};
use crate::retirement::RetirementListener;
use crate::snapshot::SnapshotListener;
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use shared::collision::{find_gather_events, Gatherer, Item};
use shared::geom::{Point2D, Vec2D};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

/// Where a newly joined dog appears, fixed at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnPolicy {
    /// The start point of the map's first road.
    FirstRoadStart,
    /// A uniform position along a uniformly chosen road.
    Random,
}

/// A joined player: the session it belongs to and its dog. The player id is
/// the dog id.
#[derive(Debug, Clone)]
pub struct Player {
    pub map_id: MapId,
    pub dog_id: u64,
}

/// Registry of joined players keyed by player id.
#[derive(Debug, Default)]
pub struct Players {
    players: HashMap<u64, Player>,
}

impl Players {
    pub fn add(&mut self, dog_id: u64, map_id: MapId) {
        self.players.insert(dog_id, Player { map_id, dog_id });
    }

    pub fn find(&self, id: u64) -> Option<&Player> {
        self.players.get(&id)
    }

    pub fn remove(&mut self, id: u64) -> bool {
        self.players.remove(&id).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&u64, &Player)> {
        self.players.iter()
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}

/// Token registry: a bijection between 32-hex-char auth tokens and player
/// ids, with the inverse map kept in lockstep.
#[derive(Debug)]
pub struct PlayerTokens {
    generator1: StdRng,
    generator2: StdRng,
    token_to_player: HashMap<String, u64>,
    player_to_token: HashMap<u64, String>,
}

impl Default for PlayerTokens {
    fn default() -> Self {
        Self {
            generator1: StdRng::from_entropy(),
            generator2: StdRng::from_entropy(),
            token_to_player: HashMap::new(),
            player_to_token: HashMap::new(),
        }
    }
}

impl PlayerTokens {
    /// Issues a fresh token for `player_id` and records both directions.
    pub fn add_player(&mut self, player_id: u64) -> String {
        let token = self.generate_token();
        self.bind(token.clone(), player_id);
        token
    }

    /// Binds a known token to a player (snapshot restore).
    pub fn bind(&mut self, token: String, player_id: u64) {
        self.token_to_player.insert(token.clone(), player_id);
        self.player_to_token.insert(player_id, token);
    }

    pub fn find_player(&self, token: &str) -> Option<u64> {
        self.token_to_player.get(token).copied()
    }

    /// Drops both directions of a player's token.
    pub fn remove_token(&mut self, player_id: u64) {
        if let Some(token) = self.player_to_token.remove(&player_id) {
            self.token_to_player.remove(&token);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &u64)> {
        self.token_to_player.iter()
    }

    pub fn len(&self) -> usize {
        self.token_to_player.len()
    }

    pub fn is_empty(&self) -> bool {
        self.token_to_player.is_empty()
    }

    /// 128 bits from two independent generators, rendered as 32 hex digits.
    fn generate_token(&mut self) -> String {
        format!(
            "{:016x}{:016x}",
            self.generator1.next_u64(),
            self.generator2.next_u64()
        )
    }
}

/// The authoritative application state: the game world plus the player and
/// token registries and the engine-local randomness.
pub struct Application {
    game: Game,
    players: Players,
    tokens: PlayerTokens,
    rng: StdRng,
    spawn_policy: SpawnPolicy,
    next_dog_id: u64,
}

impl Application {
    pub fn new(game: Game, spawn_policy: SpawnPolicy) -> Self {
        Self {
            game,
            players: Players::default(),
            tokens: PlayerTokens::default(),
            rng: StdRng::from_entropy(),
            spawn_policy,
            next_dog_id: 0,
        }
    }

    pub fn game(&self) -> &Game {
        &self.game
    }

    pub fn game_mut(&mut self) -> &mut Game {
        &mut self.game
    }

    pub fn players(&self) -> &Players {
        &self.players
    }

    pub fn players_mut(&mut self) -> &mut Players {
        &mut self.players
    }

    pub fn tokens(&self) -> &PlayerTokens {
        &self.tokens
    }

    pub fn tokens_mut(&mut self) -> &mut PlayerTokens {
        &mut self.tokens
    }

    /// Moves the dog-id counter past every id in `taken` (snapshot restore).
    pub fn bump_dog_id_past(&mut self, taken: u64) {
        self.next_dog_id = self.next_dog_id.max(taken + 1);
    }

    /// Creates a dog on the requested map and issues a token for it.
    /// `None` when no such map exists.
    pub fn join_game(&mut self, map_id: &str, user_name: &str) -> Option<(u64, String)> {
        let (pos, bag_capacity) = {
            let map = self.game.find_map(map_id)?;
            let pos = match self.spawn_policy {
                SpawnPolicy::FirstRoadStart => {
                    let start = map.roads()[0].start();
                    Point2D::new(start.x as f64, start.y as f64)
                }
                SpawnPolicy::Random => random_point_on_roads(&mut self.rng, map),
            };
            (pos, map.bag_capacity)
        };

        let dog_id = self.next_dog_id;
        self.next_dog_id += 1;

        let session = self.game.ensure_session(map_id)?;
        session.add_dog(Dog::new(dog_id, user_name, pos, bag_capacity));
        self.players.add(dog_id, map_id.to_string());
        let token = self.tokens.add_player(dog_id);
        Some((dog_id, token))
    }

    pub fn find_player_by_token(&self, token: &str) -> Option<u64> {
        self.tokens.find_player(token)
    }

    /// Applies a movement command to a player's dog. "L"/"R"/"U"/"D" set a
    /// course at the map's dog speed; anything else stops the dog.
    pub fn set_player_action(&mut self, player_id: u64, action: &str) -> bool {
        let Some(player) = self.players.find(player_id) else {
            return false;
        };
        let map_id = player.map_id.clone();
        let Some(speed) = self.game.find_map(&map_id).map(|m| m.dog_speed) else {
            return false;
        };
        let Some(dog) = self
            .game
            .find_session_mut(&map_id)
            .and_then(|s| s.dog_mut(player_id))
        else {
            return false;
        };

        match action {
            "L" => dog.set_course(Direction::West, Vec2D::new(-speed, 0.0)),
            "R" => dog.set_course(Direction::East, Vec2D::new(speed, 0.0)),
            "U" => dog.set_course(Direction::North, Vec2D::new(0.0, -speed)),
            "D" => dog.set_course(Direction::South, Vec2D::new(0.0, speed)),
            _ => dog.stop(),
        }
        true
    }

    /// Removes every trace of a player: token, registry entry, dog.
    /// Used after a retirement has been committed.
    pub fn remove_player(&mut self, map_id: &str, dog_id: u64) {
        self.tokens.remove_token(dog_id);
        self.players.remove(dog_id);
        if let Some(session) = self.game.find_session_mut(map_id) {
            session.remove_dog(dog_id);
        }
    }

    /// Advances every session by `dt`: loot generation, aging and movement,
    /// then pickup/deposit resolution. Listener fan-out happens outside,
    /// under the same lock acquisition (see [`Listeners::on_tick`]).
    pub fn tick(&mut self, dt: Duration) {
        let max_idle_time = self.game.max_idle_time();
        let rng = &mut self.rng;

        for (map, session) in self.game.sessions_with_maps_mut() {
            // New loot.
            let roll: f64 = rng.gen();
            let new_loot = session.generate_loot(dt, roll);
            if !map.loot_types().is_empty() {
                for _ in 0..new_loot {
                    let loot_type = rng.gen_range(0..map.loot_types().len());
                    let pos = random_point_on_roads(rng, map);
                    session.spawn_loot(loot_type, pos);
                }
            }

            // Aging and movement. Dogs past the idle threshold are left
            // untouched so their stats survive until retirement commits.
            let mut gatherers: Vec<(u64, Gatherer)> = Vec::new();
            for dog in session.dogs_mut().values_mut() {
                if dog.idle_for >= max_idle_time {
                    continue;
                }

                dog.age += dt;
                if dog.idle {
                    dog.idle_for += dt;
                } else {
                    dog.idle_for = Duration::ZERO;
                }

                let old_pos = dog.pos;
                map.move_dog(dog, dt);
                gatherers.push((
                    dog.id,
                    Gatherer {
                        start_pos: old_pos,
                        end_pos: dog.pos,
                        width: GATHERER_WIDTH,
                    },
                ));
            }

            apply_gather_events(map, session, &gatherers);
        }
    }
}

/// Uniform point on the map's road network: uniform road, then uniform
/// position along it.
fn random_point_on_roads(rng: &mut StdRng, map: &Map) -> Point2D {
    let road = &map.roads()[rng.gen_range(0..map.roads().len())];
    let (start, end) = (road.start(), road.end());
    let x = rng.gen_range(start.x.min(end.x) as f64..=start.x.max(end.x) as f64);
    let y = rng.gen_range(start.y.min(end.y) as f64..=start.y.max(end.y) as f64);
    Point2D::new(x, y)
}

/// Resolves this tick's pickups and deposits in sweep-time order.
fn apply_gather_events(map: &Map, session: &mut GameSession, gatherers: &[(u64, Gatherer)]) {
    // Flatten loot then bases into one item list; indices below
    // `bases_offset` are loot.
    let mut loot_data = Vec::with_capacity(session.loot().len());
    let mut items = Vec::with_capacity(session.loot().len() + map.bases().len());
    for (&loot_id, &(loot_type, pos)) in session.loot() {
        loot_data.push((loot_id, loot_type));
        items.push(Item {
            position: pos,
            width: 0.0,
        });
    }
    let bases_offset = items.len();
    items.extend_from_slice(map.bases());

    let sweeps: Vec<Gatherer> = gatherers.iter().map(|&(_, g)| g).collect();
    let events = find_gather_events(&items, &sweeps);

    let (dogs, loot) = session.dogs_and_loot_mut();
    for event in events {
        let dog_id = gatherers[event.gatherer_index].0;
        let Some(dog) = dogs.get_mut(&dog_id) else {
            continue;
        };

        if event.item_index < bases_offset {
            let (loot_id, loot_type) = loot_data[event.item_index];
            // An earlier event this tick may already have taken this item.
            if loot.contains_key(&loot_id) && dog.try_grab_item(loot_id, loot_type) {
                loot.remove(&loot_id);
            }
        } else {
            let gained: u64 = dog
                .bag
                .iter()
                .map(|&(_, loot_type)| map.loot_values()[loot_type])
                .sum();
            dog.score += gained;
            dog.bag.clear();
        }
    }
}

/// One `Application` behind the single lock that orders all mutations.
pub type SharedApp = Arc<tokio::sync::Mutex<Application>>;

/// Work that runs after every simulation step, still inside the tick.
pub enum TickListener {
    Retirement(RetirementListener),
    Snapshot(SnapshotListener),
}

impl TickListener {
    pub async fn on_tick(&self, app: &mut Application, dt: Duration) {
        match self {
            TickListener::Retirement(listener) => listener.on_tick(app, dt).await,
            TickListener::Snapshot(listener) => listener.on_tick(app, dt),
        }
    }
}

/// Weakly held listener registry. Dead entries are pruned on each fan-out,
/// so dropping the owning `Arc` is all it takes to unsubscribe.
#[derive(Default)]
pub struct Listeners {
    listeners: Mutex<Vec<Weak<TickListener>>>,
}

impl Listeners {
    pub fn add(&self, listener: &Arc<TickListener>) {
        self.listeners
            .lock()
            .expect("listener registry poisoned")
            .push(Arc::downgrade(listener));
    }

    /// Delivers the tick to every live listener, in registration order.
    pub async fn on_tick(&self, app: &mut Application, dt: Duration) {
        let live: Vec<Arc<TickListener>> = {
            let mut listeners = self.listeners.lock().expect("listener registry poisoned");
            listeners.retain(|weak| weak.strong_count() > 0);
            listeners.iter().filter_map(Weak::upgrade).collect()
        };
        for listener in live {
            listener.on_tick(app, dt).await;
        }
    }

    pub fn len(&self) -> usize {
        self.listeners
            .lock()
            .expect("listener registry poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
