//! World model: static map topology and the mutable per-session state the
//! simulation advances.
//!
//! A [`Game`] owns the map catalog and one [`GameSession`] per map in play.
//! Sessions own their [`Dog`]s and loot items in id-keyed maps; everything
//! that refers to a dog from outside does so by `(map_id, dog_id)` and
//! resolves through the game on use, so there are no shared-ownership webs
//! to keep consistent.

use crate::loot::LootGenerator;
use serde::{Deserialize, Serialize};
use shared::collision::Item;
use shared::geom::{Offset, Point, Point2D, Rect, Vec2D};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use uuid::Uuid;

/// Identifier of a map, unique within the catalog.
pub type MapId = String;

/// Lateral tolerance around a road centerline a dog may occupy, in cells.
pub const ROAD_ALLOWANCE: f64 = 0.4;
/// Collection radius of a moving dog.
pub const GATHERER_WIDTH: f64 = 0.6;
/// Collection radius of a deposit base.
pub const BASE_WIDTH: f64 = 0.5;

/// Cardinal facing of a dog; `as_str` gives the wire form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Direction {
    #[default]
    North,
    South,
    West,
    East,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::North => "U",
            Direction::South => "D",
            Direction::West => "L",
            Direction::East => "R",
        }
    }
}

/// A strictly horizontal or vertical road segment with integer endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Road {
    start: Point,
    end: Point,
}

impl Road {
    pub fn horizontal(start: Point, end_x: i32) -> Self {
        Self {
            start,
            end: Point::new(end_x, start.y),
        }
    }

    pub fn vertical(start: Point, end_y: i32) -> Self {
        Self {
            start,
            end: Point::new(start.x, end_y),
        }
    }

    pub fn is_horizontal(&self) -> bool {
        self.start.y == self.end.y
    }

    pub fn is_vertical(&self) -> bool {
        self.start.x == self.end.x
    }

    pub fn start(&self) -> Point {
        self.start
    }

    pub fn end(&self) -> Point {
        self.end
    }
}

/// A decorative rectangle clients draw; the simulation never collides with
/// buildings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Building {
    pub bounds: Rect,
}

/// An office placement; each office anchors one deposit base at its
/// position. The offset is a client-side sprite adjustment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Office {
    pub id: String,
    pub position: Point,
    pub offset: Offset,
}

/// The set of integer cells covered by at least one road.
///
/// A continuous point is "on a road" when its nearest lattice cell is in the
/// set and the point lies within [`ROAD_ALLOWANCE`] of that cell's center on
/// each axis. Built once at map load, never mutated afterwards.
#[derive(Debug, Default)]
pub struct RoadGrid {
    cells: HashSet<Point>,
}

impl RoadGrid {
    fn add_road(&mut self, road: &Road) {
        if road.is_horizontal() {
            let y = road.start.y;
            for x in road.start.x.min(road.end.x)..=road.start.x.max(road.end.x) {
                self.cells.insert(Point::new(x, y));
            }
        } else {
            let x = road.start.x;
            for y in road.start.y.min(road.end.y)..=road.start.y.max(road.end.y) {
                self.cells.insert(Point::new(x, y));
            }
        }
    }

    pub fn contains(&self, p: Point) -> bool {
        self.cells.contains(&p)
    }
}

/// A player's avatar and its per-life statistics.
#[derive(Debug, Clone)]
pub struct Dog {
    pub id: u64,
    pub name: String,
    pub pos: Point2D,
    pub vel: Vec2D,
    pub dir: Direction,
    pub bag_capacity: usize,
    /// Collected loot as `(loot_id, loot_type_index)` in pickup order.
    pub bag: Vec<(u64, usize)>,
    pub score: u64,
    pub age: Duration,
    /// Time since the last movement command; drives retirement.
    pub idle_for: Duration,
    pub idle: bool,
}

impl Dog {
    pub fn new(id: u64, name: impl Into<String>, pos: Point2D, bag_capacity: usize) -> Self {
        Self {
            id,
            name: name.into(),
            pos,
            vel: Vec2D::default(),
            dir: Direction::default(),
            bag_capacity,
            bag: Vec::new(),
            score: 0,
            age: Duration::ZERO,
            idle_for: Duration::ZERO,
            idle: true,
        }
    }

    /// Puts an item in the bag unless it is full.
    pub fn try_grab_item(&mut self, loot_id: u64, loot_type: usize) -> bool {
        if self.bag.len() >= self.bag_capacity {
            return false;
        }
        self.bag.push((loot_id, loot_type));
        true
    }

    /// Begins moving in `dir` with velocity `vel`.
    pub fn set_course(&mut self, dir: Direction, vel: Vec2D) {
        self.idle = false;
        self.dir = dir;
        self.vel = vel;
    }

    /// Halts the dog; facing is kept.
    pub fn stop(&mut self) {
        self.idle = true;
        self.vel = Vec2D::default();
    }
}

/// A finished career, as persisted to the leaderboard store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetiredDog {
    pub id: Uuid,
    pub name: String,
    pub score: i32,
    pub play_time_ms: i32,
}

/// Static description of one map: topology, loot table and per-map
/// gameplay parameters. Immutable after load.
#[derive(Debug)]
pub struct Map {
    pub id: MapId,
    pub name: String,
    pub dog_speed: f64,
    pub bag_capacity: usize,
    roads: Vec<Road>,
    buildings: Vec<Building>,
    offices: Vec<Office>,
    road_grid: RoadGrid,
    /// Loot-type descriptors exactly as configured; served back to clients
    /// verbatim.
    loot_types: Vec<serde_json::Value>,
    /// Score value per loot type, parsed out of the descriptors at load.
    loot_values: Vec<u64>,
    /// One deposit base per office, radius [`BASE_WIDTH`].
    bases: Vec<Item>,
}

impl Map {
    pub fn new(
        id: MapId,
        name: String,
        dog_speed: f64,
        bag_capacity: usize,
        loot_types: Vec<serde_json::Value>,
        loot_values: Vec<u64>,
    ) -> Self {
        Self {
            id,
            name,
            dog_speed,
            bag_capacity,
            roads: Vec::new(),
            buildings: Vec::new(),
            offices: Vec::new(),
            road_grid: RoadGrid::default(),
            loot_types,
            loot_values,
            bases: Vec::new(),
        }
    }

    pub fn add_road(&mut self, road: Road) {
        self.road_grid.add_road(&road);
        self.roads.push(road);
    }

    pub fn add_building(&mut self, building: Building) {
        self.buildings.push(building);
    }

    /// Registers an office and its deposit base. Office ids must be unique
    /// within a map.
    pub fn add_office(&mut self, office: Office) -> Result<(), String> {
        if self.offices.iter().any(|o| o.id == office.id) {
            return Err(format!("duplicate office id {:?}", office.id));
        }
        self.bases.push(Item {
            position: Point2D::new(office.position.x as f64, office.position.y as f64),
            width: BASE_WIDTH,
        });
        self.offices.push(office);
        Ok(())
    }

    pub fn roads(&self) -> &[Road] {
        &self.roads
    }

    pub fn buildings(&self) -> &[Building] {
        &self.buildings
    }

    pub fn offices(&self) -> &[Office] {
        &self.offices
    }

    pub fn road_grid(&self) -> &RoadGrid {
        &self.road_grid
    }

    pub fn loot_types(&self) -> &[serde_json::Value] {
        &self.loot_types
    }

    pub fn loot_values(&self) -> &[u64] {
        &self.loot_values
    }

    pub fn bases(&self) -> &[Item] {
        &self.bases
    }

    /// Advances a dog along the road network over `delta`.
    ///
    /// Each axis is handled independently, x first. The dog walks cell by
    /// cell toward its target as long as the next cell is covered; whatever
    /// distance remains past the last covered cell is clamped to
    /// [`ROAD_ALLOWANCE`], and hitting that clamp stops the dog and marks it
    /// idle. A dog with zero velocity is untouched.
    pub fn move_dog(&self, dog: &mut Dog, delta: Duration) {
        const EPS: f64 = 1e-6;

        let dt = delta.as_secs_f64();
        let mut pos = dog.pos;
        let vel = dog.vel;

        let mut cell_x = pos.x.round() as i32;
        let cell_y = pos.y.round() as i32;

        let on_vertical = self.road_grid.contains(Point::new(cell_x, cell_y + 1))
            || self.road_grid.contains(Point::new(cell_x, cell_y - 1));
        let on_horizontal = self.road_grid.contains(Point::new(cell_x + 1, cell_y))
            || self.road_grid.contains(Point::new(cell_x - 1, cell_y));

        let y_offset_out = (pos.y - cell_y as f64).abs() > ROAD_ALLOWANCE + EPS;
        let x_offset_out = (pos.x - cell_x as f64).abs() > ROAD_ALLOWANCE + EPS;

        // The y pass uses the cell the x pass ended on as its fixed column.
        (pos.x, cell_x) = self.move_axis(
            dog,
            pos.x,
            vel.x,
            cell_x,
            cell_y,
            on_vertical,
            y_offset_out,
            dt,
            true,
        );
        (pos.y, _) = self.move_axis(
            dog,
            pos.y,
            vel.y,
            cell_y,
            cell_x,
            on_horizontal,
            x_offset_out,
            dt,
            false,
        );

        dog.pos = pos;
    }

    #[allow(clippy::too_many_arguments)]
    fn move_axis(
        &self,
        dog: &mut Dog,
        pos: f64,
        vel: f64,
        mut cell: i32,
        fixed: i32,
        on_perpendicular: bool,
        offset_out: bool,
        dt: f64,
        is_x_axis: bool,
    ) -> (f64, i32) {
        if vel == 0.0 {
            return (pos, cell);
        }

        let cell_at = |c: i32| {
            if is_x_axis {
                Point::new(c, fixed)
            } else {
                Point::new(fixed, c)
            }
        };

        let d = vel * dt;
        let target = pos + d;
        let target_cell = target.round() as i32;
        let step: i32 = if d > 0.0 { 1 } else { -1 };

        // A dog that drifted past the tolerance of a perpendicular road may
        // not change cells along this axis at all.
        let cant_move_along_axis = offset_out && on_perpendicular;

        if !cant_move_along_axis {
            while cell != target_cell && self.road_grid.contains(cell_at(cell + step)) {
                cell += step;
            }
        }

        let mut diff = target - cell as f64;
        let diff_step: i32 = if diff > 0.0 { 1 } else { -1 };
        let road_ahead = self.road_grid.contains(cell_at(cell + diff_step));

        if step == diff_step
            && (cant_move_along_axis || !road_ahead)
            && diff.abs() > ROAD_ALLOWANCE
        {
            dog.stop();
            diff = diff.clamp(-ROAD_ALLOWANCE, ROAD_ALLOWANCE);
        }

        (cell as f64 + diff, cell)
    }
}

/// Live state of one map: dogs, loot on the ground, and the loot generator.
#[derive(Debug)]
pub struct GameSession {
    map_id: MapId,
    dogs: HashMap<u64, Dog>,
    /// Loot on the ground: `loot_id -> (loot_type_index, position)`.
    loot: HashMap<u64, (usize, Point2D)>,
    loot_gen: LootGenerator,
    next_loot_id: u64,
}

impl GameSession {
    pub fn new(map_id: MapId, loot_gen: LootGenerator) -> Self {
        Self {
            map_id,
            dogs: HashMap::new(),
            loot: HashMap::new(),
            loot_gen,
            next_loot_id: 0,
        }
    }

    pub fn map_id(&self) -> &str {
        &self.map_id
    }

    pub fn dogs(&self) -> &HashMap<u64, Dog> {
        &self.dogs
    }

    pub fn dogs_mut(&mut self) -> &mut HashMap<u64, Dog> {
        &mut self.dogs
    }

    pub fn dog(&self, id: u64) -> Option<&Dog> {
        self.dogs.get(&id)
    }

    pub fn dog_mut(&mut self, id: u64) -> Option<&mut Dog> {
        self.dogs.get_mut(&id)
    }

    pub fn add_dog(&mut self, dog: Dog) {
        self.dogs.insert(dog.id, dog);
    }

    pub fn remove_dog(&mut self, id: u64) -> bool {
        self.dogs.remove(&id).is_some()
    }

    pub fn loot(&self) -> &HashMap<u64, (usize, Point2D)> {
        &self.loot
    }

    /// Drops a fresh loot item and returns its id.
    pub fn spawn_loot(&mut self, loot_type: usize, pos: Point2D) -> u64 {
        self.next_loot_id += 1;
        self.loot.insert(self.next_loot_id, (loot_type, pos));
        self.next_loot_id
    }

    /// Re-inserts a loot item under a known id (snapshot restore).
    pub fn insert_loot(&mut self, id: u64, loot_type: usize, pos: Point2D) {
        self.loot.insert(id, (loot_type, pos));
    }

    pub fn remove_loot(&mut self, id: u64) -> bool {
        self.loot.remove(&id).is_some()
    }

    /// Asks the generator how many items to drop this tick. `roll` is a
    /// uniform sample from `[0, 1]`.
    pub fn generate_loot(&mut self, dt: Duration, roll: f64) -> usize {
        self.loot_gen
            .generate(dt, self.loot.len(), self.dogs.len(), roll)
    }

    pub fn loot_generator(&self) -> &LootGenerator {
        &self.loot_gen
    }

    pub fn loot_generator_mut(&mut self) -> &mut LootGenerator {
        &mut self.loot_gen
    }

    pub fn next_loot_id(&self) -> u64 {
        self.next_loot_id
    }

    pub fn set_next_loot_id(&mut self, id: u64) {
        self.next_loot_id = id;
    }

    /// Disjoint mutable access to dogs and loot for the pickup pass.
    pub fn dogs_and_loot_mut(
        &mut self,
    ) -> (
        &mut HashMap<u64, Dog>,
        &mut HashMap<u64, (usize, Point2D)>,
    ) {
        (&mut self.dogs, &mut self.loot)
    }
}

/// The map catalog, live sessions and global gameplay defaults.
#[derive(Debug)]
pub struct Game {
    maps: Vec<Map>,
    map_index: HashMap<MapId, usize>,
    sessions: HashMap<MapId, GameSession>,
    default_dog_speed: f64,
    default_bag_capacity: usize,
    loot_gen_period: Duration,
    loot_gen_probability: f64,
    max_idle_time: Duration,
}

impl Default for Game {
    fn default() -> Self {
        Self {
            maps: Vec::new(),
            map_index: HashMap::new(),
            sessions: HashMap::new(),
            default_dog_speed: 1.0,
            default_bag_capacity: 3,
            loot_gen_period: Duration::ZERO,
            loot_gen_probability: 0.0,
            max_idle_time: Duration::from_secs(60),
        }
    }
}

impl Game {
    pub fn add_map(&mut self, map: Map) -> Result<(), String> {
        if self.map_index.contains_key(&map.id) {
            return Err(format!("map with id {:?} already exists", map.id));
        }
        self.map_index.insert(map.id.clone(), self.maps.len());
        self.maps.push(map);
        Ok(())
    }

    pub fn maps(&self) -> &[Map] {
        &self.maps
    }

    pub fn find_map(&self, id: &str) -> Option<&Map> {
        self.map_index.get(id).map(|&i| &self.maps[i])
    }

    pub fn find_session(&self, id: &str) -> Option<&GameSession> {
        self.sessions.get(id)
    }

    pub fn find_session_mut(&mut self, id: &str) -> Option<&mut GameSession> {
        self.sessions.get_mut(id)
    }

    /// Returns the session for `id`, creating it on first use. `None` when
    /// no such map exists.
    pub fn ensure_session(&mut self, id: &str) -> Option<&mut GameSession> {
        if !self.map_index.contains_key(id) {
            return None;
        }
        if !self.sessions.contains_key(id) {
            let loot_gen = LootGenerator::new(self.loot_gen_period, self.loot_gen_probability);
            self.sessions
                .insert(id.to_string(), GameSession::new(id.to_string(), loot_gen));
        }
        self.sessions.get_mut(id)
    }

    /// Inserts a fully built session (snapshot restore).
    pub fn add_session(&mut self, session: GameSession) {
        self.sessions.insert(session.map_id.clone(), session);
    }

    pub fn sessions(&self) -> &HashMap<MapId, GameSession> {
        &self.sessions
    }

    /// Iterates every live session paired with its (immutable) map.
    pub fn sessions_with_maps_mut(&mut self) -> impl Iterator<Item = (&Map, &mut GameSession)> {
        let maps = &self.maps;
        let index = &self.map_index;
        self.sessions
            .values_mut()
            .map(move |session| (&maps[index[&session.map_id]], session))
    }

    pub fn default_dog_speed(&self) -> f64 {
        self.default_dog_speed
    }

    pub fn set_default_dog_speed(&mut self, speed: f64) {
        self.default_dog_speed = speed;
    }

    pub fn default_bag_capacity(&self) -> usize {
        self.default_bag_capacity
    }

    pub fn set_default_bag_capacity(&mut self, capacity: usize) {
        self.default_bag_capacity = capacity;
    }

    pub fn loot_gen_period(&self) -> Duration {
        self.loot_gen_period
    }

    pub fn loot_gen_probability(&self) -> f64 {
        self.loot_gen_probability
    }

    pub fn set_loot_gen_config(&mut self, period: Duration, probability: f64) {
        self.loot_gen_period = period;
        self.loot_gen_probability = probability;
    }

    pub fn max_idle_time(&self) -> Duration {
        self.max_idle_time
    }

    pub fn set_max_idle_time(&mut self, max_idle_time: Duration) {
        self.max_idle_time = max_idle_time;
    }
}
