//! flow-optimizer
//!
//! Render-cost optimization for flow-ngin scenes. A loaded hierarchy goes in,
//! a cheaper one comes out: textures capped, meshes decimated, repeated
//! meshes instanced, materials consolidated, meshes merged per material and,
//! optionally, the whole scene wrapped in a distance-switched LOD container.
//! Runs natively and on WASM, blocking or cooperatively.
//!
//! High-level modules
//! - `context`: per-call bookkeeping (processed sets, diagnostics)
//! - `data_structures`: geometry, materials, textures, instances and the scene arena
//! - `error`: error types crossing the public boundary and unit-level failures
//! - `flow`: the scheduler (options, progress, cancellation, async execution)
//! - `resources`: glTF/GLB import into a [`Scene`]
//! - `stages`: the individual optimization passes
//!

pub mod context;
pub mod data_structures;
pub mod error;
pub mod flow;
pub mod resources;
pub mod stages;

// Re-exports commonly used types for convenience in downstream code.
pub use cgmath;
pub use data_structures::{
    geometry::{AttributeKind, Geometry},
    instance::Instance,
    material::{Material, MaterialKind},
    scene_graph::{GeometryId, MaterialId, ModelStats, NodeId, NodeKind, Scene, TextureId},
    texture::Texture,
};
pub use error::OptimizeError;
#[cfg(not(target_arch = "wasm32"))]
pub use flow::spawn_optimize;
pub use flow::{
    CancellationToken, OptimizationOptions, OptimizationScheduler, OptimizationState, Optimized, optimize,
    optimize_async,
};
pub use stages::lod::LodLevelSpec;

#[cfg(target_arch = "wasm32")]
use wasm_bindgen::prelude::*;

/// Installs a logger for the `log` facade: `env_logger` natively,
/// `console_log` in the browser. Calling it twice only warns.
pub fn init_logging() {
    #[cfg(not(target_arch = "wasm32"))]
    {
        if let Err(e) = env_logger::try_init() {
            println!("Warning: Could not initialize logger: {}", e);
        };
    }

    #[cfg(target_arch = "wasm32")]
    {
        if let Err(e) = console_log::init_with_level(log::Level::Info) {
            web_sys::console::warn_1(&JsValue::from_str(&format!("Could not initialize logger: {}", e)));
        }
    }
}
