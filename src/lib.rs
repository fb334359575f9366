//! bimstream - visibility-driven geometry streaming for huge building models
//!
//! Two engines cooperate:
//! - [`culling`] renders color-coded bounding-box proxies off the main
//!   thread and reports which geometries the camera can see
//! - [`streaming`] fetches and decodes only the tiles those geometries live
//!   in, and turns them into fragments for the host scene
//!
//! [`streamer::TileStreamer`] wires the two together.

pub mod core;
pub mod culling;
pub mod math;
pub mod model;
pub mod streamer;
pub mod streaming;

pub use streamer::{StreamerStats, TileStreamer};
