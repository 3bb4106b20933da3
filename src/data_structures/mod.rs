//! Scene data: geometry, materials, textures, instances and the scene graph.
//!
//! - `geometry` holds vertex attributes and index buffers plus the merge helper
//! - `material` holds shared surface descriptions
//! - `texture` holds decoded images and sampler settings
//! - `instance` holds local transformations and packed per-instance matrices
//! - `scene_graph` is the arena tying nodes to the resources above

pub mod geometry;
pub mod instance;
pub mod material;
pub mod scene_graph;
pub mod texture;
