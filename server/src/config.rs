//! Game config loader.
//!
//! The config file is a single JSON document: global loot-generator
//! parameters, optional gameplay defaults, and the map catalog. Any problem
//! with it is fatal at startup, so errors carry enough context to point at
//! the offending map.

use crate::model::{Building, Game, Map, Office, Road};
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use shared::geom::{Offset, Point, Rect, Size};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigFile {
    loot_generator_config: LootGeneratorConfig,
    default_dog_speed: Option<f64>,
    default_bag_capacity: Option<usize>,
    /// Seconds a dog may stay idle before it is retired.
    dog_retirement_time: Option<f64>,
    maps: Vec<MapConfig>,
}

#[derive(Debug, Deserialize)]
struct LootGeneratorConfig {
    /// Base interval of the arrival process, milliseconds.
    period: f64,
    probability: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MapConfig {
    id: String,
    name: String,
    dog_speed: Option<f64>,
    bag_capacity: Option<usize>,
    loot_types: Vec<serde_json::Value>,
    roads: Vec<RoadConfig>,
    buildings: Vec<BuildingConfig>,
    offices: Vec<OfficeConfig>,
}

/// A road has `x0,y0` and exactly one of `x1` (horizontal) or `y1`
/// (vertical).
#[derive(Debug, Deserialize)]
struct RoadConfig {
    x0: i32,
    y0: i32,
    x1: Option<i32>,
    y1: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct BuildingConfig {
    x: i32,
    y: i32,
    w: i32,
    h: i32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OfficeConfig {
    id: String,
    x: i32,
    y: i32,
    offset_x: i32,
    offset_y: i32,
}

/// Reads and validates the config file, producing the game model.
pub fn load_game(path: &Path) -> Result<Game> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("could not open config file {}", path.display()))?;
    parse_game(&text).with_context(|| format!("invalid config file {}", path.display()))
}

/// Builds a [`Game`] from config JSON text.
pub fn parse_game(text: &str) -> Result<Game> {
    let config: ConfigFile = serde_json::from_str(text).context("config parse error")?;

    let mut game = Game::default();
    game.set_loot_gen_config(
        Duration::from_millis(config.loot_generator_config.period as u64),
        config.loot_generator_config.probability,
    );
    if let Some(speed) = config.default_dog_speed {
        game.set_default_dog_speed(speed);
    }
    if let Some(capacity) = config.default_bag_capacity {
        game.set_default_bag_capacity(capacity);
    }
    if let Some(seconds) = config.dog_retirement_time {
        game.set_max_idle_time(Duration::from_secs_f64(seconds));
    }

    for map_config in config.maps {
        let map = build_map(map_config, &game)
            .with_context(|| "invalid map definition".to_string())?;
        game.add_map(map).map_err(anyhow::Error::msg)?;
    }

    Ok(game)
}

fn build_map(config: MapConfig, game: &Game) -> Result<Map> {
    let dog_speed = config.dog_speed.unwrap_or(game.default_dog_speed());
    let bag_capacity = config.bag_capacity.unwrap_or(game.default_bag_capacity());

    let loot_values = config
        .loot_types
        .iter()
        .enumerate()
        .map(|(i, loot_type)| {
            loot_type
                .get("value")
                .and_then(serde_json::Value::as_u64)
                .with_context(|| {
                    format!("map {:?}: lootTypes[{i}] has no numeric value", config.id)
                })
        })
        .collect::<Result<Vec<u64>>>()?;

    if config.roads.is_empty() {
        bail!("map {:?} has no roads", config.id);
    }

    let mut map = Map::new(
        config.id.clone(),
        config.name,
        dog_speed,
        bag_capacity,
        config.loot_types,
        loot_values,
    );

    for (i, road) in config.roads.iter().enumerate() {
        let start = Point::new(road.x0, road.y0);
        let road = match (road.x1, road.y1) {
            (Some(x1), None) => Road::horizontal(start, x1),
            (None, Some(y1)) => Road::vertical(start, y1),
            _ => bail!(
                "map {:?}: roads[{i}] must have exactly one of x1 or y1",
                config.id
            ),
        };
        map.add_road(road);
    }

    for building in config.buildings {
        map.add_building(Building {
            bounds: Rect {
                position: Point::new(building.x, building.y),
                size: Size {
                    width: building.w,
                    height: building.h,
                },
            },
        });
    }

    for office in config.offices {
        map.add_office(Office {
            id: office.id,
            position: Point::new(office.x, office.y),
            offset: Offset {
                dx: office.offset_x,
                dy: office.offset_y,
            },
        })
        .map_err(anyhow::Error::msg)
        .with_context(|| format!("map {:?}", config.id))?;
    }

    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"{
        "lootGeneratorConfig": { "period": 5000.0, "probability": 0.5 },
        "defaultDogSpeed": 3.5,
        "defaultBagCapacity": 4,
        "dogRetirementTime": 15.5,
        "maps": [
            {
                "id": "map1",
                "name": "Map 1",
                "dogSpeed": 4.0,
                "lootTypes": [
                    { "name": "key", "file": "key.obj", "value": 10 },
                    { "name": "wallet", "file": "wallet.obj", "value": 30 }
                ],
                "roads": [
                    { "x0": 0, "y0": 0, "x1": 40 },
                    { "x0": 40, "y0": 0, "y1": 30 }
                ],
                "buildings": [ { "x": 5, "y": 5, "w": 10, "h": 10 } ],
                "offices": [ { "id": "o0", "x": 40, "y": 30, "offsetX": 5, "offsetY": 0 } ]
            }
        ]
    }"#;

    #[test]
    fn test_parse_full_config() {
        let game = parse_game(CONFIG).unwrap();

        assert_eq!(game.loot_gen_period(), Duration::from_millis(5000));
        assert_eq!(game.loot_gen_probability(), 0.5);
        assert_eq!(game.default_dog_speed(), 3.5);
        assert_eq!(game.default_bag_capacity(), 4);
        assert_eq!(game.max_idle_time(), Duration::from_secs_f64(15.5));

        let map = game.find_map("map1").unwrap();
        assert_eq!(map.name, "Map 1");
        assert_eq!(map.dog_speed, 4.0);
        // Map has no own bagCapacity; the default applies.
        assert_eq!(map.bag_capacity, 4);
        assert_eq!(map.roads().len(), 2);
        assert!(map.roads()[0].is_horizontal());
        assert!(map.roads()[1].is_vertical());
        assert_eq!(map.buildings().len(), 1);
        assert_eq!(map.offices().len(), 1);
        assert_eq!(map.bases().len(), 1);
        assert_eq!(map.loot_values(), &[10, 30]);
    }

    #[test]
    fn test_defaults_when_optionals_absent() {
        let text = r#"{
            "lootGeneratorConfig": { "period": 1000.0, "probability": 1.0 },
            "maps": [
                {
                    "id": "m", "name": "M",
                    "lootTypes": [ { "value": 1 } ],
                    "roads": [ { "x0": 0, "y0": 0, "x1": 5 } ],
                    "buildings": [], "offices": []
                }
            ]
        }"#;
        let game = parse_game(text).unwrap();
        let map = game.find_map("m").unwrap();
        assert_eq!(map.dog_speed, 1.0);
        assert_eq!(map.bag_capacity, 3);
        assert_eq!(game.max_idle_time(), Duration::from_secs(60));
    }

    #[test]
    fn test_road_with_both_endpoints_rejected() {
        let text = r#"{
            "lootGeneratorConfig": { "period": 1000.0, "probability": 1.0 },
            "maps": [
                {
                    "id": "m", "name": "M",
                    "lootTypes": [ { "value": 1 } ],
                    "roads": [ { "x0": 0, "y0": 0, "x1": 5, "y1": 5 } ],
                    "buildings": [], "offices": []
                }
            ]
        }"#;
        assert!(parse_game(text).is_err());
    }

    #[test]
    fn test_loot_type_without_value_rejected() {
        let text = r#"{
            "lootGeneratorConfig": { "period": 1000.0, "probability": 1.0 },
            "maps": [
                {
                    "id": "m", "name": "M",
                    "lootTypes": [ { "name": "key" } ],
                    "roads": [ { "x0": 0, "y0": 0, "x1": 5 } ],
                    "buildings": [], "offices": []
                }
            ]
        }"#;
        assert!(parse_game(text).is_err());
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(parse_game("not json").is_err());
        assert!(parse_game("{}").is_err());
    }
}
