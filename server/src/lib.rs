//! # Game Server Library
//!
//! The authoritative server for the dog-and-loot grid game. It owns the
//! canonical world state, advances it tick by tick, and exposes a JSON API
//! for clients to join, steer their dogs and observe the world.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Simulation
//! Every tick the server generates loot, moves each dog along the road
//! network under the ±0.4 centerline tolerance, resolves pickups and
//! deposits in sweep-time order, and ages players toward retirement. The
//! server's state is the only truth; clients render what they are told.
//!
//! ### Player Lifecycle
//! Joining creates a dog on the requested map and issues a 128-bit bearer
//! token. Dogs that idle past the configured threshold are retired: their
//! result is committed to the Postgres leaderboard first, and only then are
//! the token, the player record and the dog removed.
//!
//! ### Durability
//! The whole live state (sessions, dogs, loot, players, tokens) snapshots
//! to a bincode stream with an atomic temp-file-then-rename replace, either
//! on a timer or once at shutdown, and is restored on the next start.
//!
//! ## Architecture Design
//!
//! ### Single Serialization Domain
//! All state mutations, from tick processing and API mutations to listener
//! fan-out and snapshot capture, run under one `tokio::sync::Mutex` around
//! the [`app::Application`]. That single lock totally orders every
//! transition: tick N (including its retirement and snapshot work)
//! completes before tick N+1, and an API request sees either pre-tick or
//! post-tick state, never a half-applied one. Only static file serving
//! runs outside it.
//!
//! ### Module Organization
//!
//! - [`model`]: static map topology and mutable session state
//! - [`loot`]: the stochastic loot budget
//! - [`config`]: JSON config loading and validation
//! - [`app`]: registries, join/action operations, the tick pipeline,
//!   listener fan-out
//! - [`api`]: axum HTTP adapter and static file service
//! - [`db`]: Postgres pool and the unit-of-work over the leaderboard
//! - [`retirement`]: idle-expiry scan and transactional writeback
//! - [`snapshot`]: full-state save/restore
//! - [`ticker`]: the periodic tick driver

pub mod api;
pub mod app;
pub mod config;
pub mod db;
pub mod loot;
pub mod model;
pub mod retirement;
pub mod snapshot;
pub mod ticker;
