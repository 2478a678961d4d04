//! # Shared Game Library
//!
//! Data structures and pure math shared by the authoritative server and its
//! tests. It has no knowledge of maps, sessions or networking, only of
//! points, vectors and the swept-circle collection geometry the simulation
//! is built on.
//!
//! ## Core Components
//!
//! ### Geometry (`geom`)
//! Integer lattice coordinates for the static road/building topology and
//! continuous 2-D points/vectors for dog positions and velocities. All types
//! are small `Copy` structs that serialize directly into the state snapshot.
//!
//! ### Collision Detection (`collision`)
//! The item-gathering detector: each moving dog is a fat-radius segment
//! swept over one tick, each collectible a circle. `find_gather_events`
//! returns every hit ordered by the moment it happens along the sweep,
//! which is what makes pickup resolution deterministic regardless of the
//! order dogs are iterated in.
//!
//! ## Design Philosophy
//!
//! All math uses `f64` throughout so results are identical wherever the
//! simulation runs. Structures derive `Serialize`/`Deserialize` so the
//! persistence layer can embed them without conversion.

pub mod collision;
pub mod geom;

pub use collision::{find_gather_events, try_collect_point, Gatherer, GatheringEvent, Item};
pub use geom::{Offset, Point, Point2D, Rect, Size, Vec2D};
