//! Level-of-detail ladders.
//!
//! The whole hierarchy becomes level 0 of a new LOD container; each further
//! level is a copy of it with every geometry decimated at that level's ratio.

use std::collections::HashMap;

use crate::{
    context::OptimizeContext,
    data_structures::{
        instance::Instance,
        scene_graph::{GeometryId, LodContainer, NodeId, NodeKind, Scene},
    },
    error::LodError,
    stages::decimate::{self, Decimator},
};

pub const STAGE: &str = "lod";

/// One rung: switch distance and the fraction of vertices to remove.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LodLevelSpec {
    pub distance: f32,
    pub ratio: f32,
}

impl LodLevelSpec {
    pub const fn new(distance: f32, ratio: f32) -> Self {
        Self { distance, ratio }
    }
}

pub const DEFAULT_LEVELS: [LodLevelSpec; 3] = [
    LodLevelSpec::new(0.0, 0.0),
    LodLevelSpec::new(50.0, 0.5),
    LodLevelSpec::new(100.0, 0.8),
];

pub const AGGRESSIVE_LEVELS: [LodLevelSpec; 5] = [
    LodLevelSpec::new(0.0, 0.0),
    LodLevelSpec::new(10.0, 0.3),
    LodLevelSpec::new(30.0, 0.6),
    LodLevelSpec::new(60.0, 0.85),
    LodLevelSpec::new(100.0, 0.95),
];

/// Checks a ladder and makes sure it starts with the unmodified source at
/// distance 0. A first level at distance 0 always shows the source, whatever
/// its ratio.
pub fn validate_levels(levels: &[LodLevelSpec]) -> Result<Vec<LodLevelSpec>, LodError> {
    let first = levels.first().ok_or(LodError::Empty)?;
    for level in levels {
        if !(0.0..1.0).contains(&level.ratio) {
            return Err(LodError::InvalidRatio(level.ratio));
        }
    }
    if !first.distance.is_finite() || first.distance < 0.0 {
        return Err(LodError::UnorderedDistances {
            previous: 0.0,
            next: first.distance,
        });
    }
    for pair in levels.windows(2) {
        let (previous, next) = (pair[0].distance, pair[1].distance);
        if !next.is_finite() || next <= previous {
            return Err(LodError::UnorderedDistances { previous, next });
        }
    }

    let mut ladder = Vec::with_capacity(levels.len() + 1);
    if first.distance > 0.0 {
        ladder.push(LodLevelSpec::new(0.0, 0.0));
        ladder.extend_from_slice(levels);
    } else {
        if first.ratio > 0.0 {
            log::warn!("LOD level 0 always shows the source, ignoring ratio {}", first.ratio);
        }
        ladder.push(LodLevelSpec::new(0.0, 0.0));
        ladder.extend_from_slice(&levels[1..]);
    }
    Ok(ladder)
}

/// Wraps the current root in an LOD container and makes the container the
/// new root.
pub fn build_lod(
    scene: &mut Scene,
    ctx: &mut OptimizeContext,
    decimator: &dyn Decimator,
    levels: &[LodLevelSpec],
) -> anyhow::Result<NodeId> {
    let ladder = validate_levels(levels)?;
    let source = scene.root();

    let mut rungs = vec![source];
    for level in &ladder[1..] {
        let copy = scene
            .clone_subtree(source)
            .ok_or_else(|| anyhow::anyhow!("root {source} vanished"))?;
        decimate_subtree(scene, ctx, decimator, copy, level.ratio);
        rungs.push(copy);
    }

    let container = scene.add_detached(
        "lod",
        Instance::default(),
        NodeKind::Lod(LodContainer {
            distances: ladder.iter().map(|level| level.distance).collect(),
        }),
    );
    for rung in rungs {
        scene.attach(container, rung)?;
    }
    scene.set_root(container)?;
    scene.update_world_transforms();
    log::debug!(
        "LOD container with {} levels, {} vertices in total",
        ladder.len(),
        scene.vertex_count()
    );
    Ok(container)
}

/// Points every drawable below `start` at a decimated copy of its geometry.
/// Geometry shared inside the subtree stays shared.
fn decimate_subtree(scene: &mut Scene, ctx: &mut OptimizeContext, decimator: &dyn Decimator, start: NodeId, ratio: f32) {
    let mut copies: HashMap<GeometryId, GeometryId> = HashMap::new();
    for id in scene.traverse_from(start) {
        let geometry = match scene.node(id).map(|node| &node.kind) {
            Some(NodeKind::Mesh(mesh)) => mesh.geometry,
            Some(NodeKind::Instanced(instanced)) => instanced.geometry,
            _ => continue,
        };
        let simplified = match copies.get(&geometry) {
            Some(&copy) => copy,
            None => {
                let copy = decimate::simplified_copy(scene, ctx, decimator, geometry, ratio, STAGE);
                copies.insert(geometry, copy);
                copy
            }
        };
        if let Some(node) = scene.node_mut(id) {
            match &mut node.kind {
                NodeKind::Mesh(mesh) => mesh.geometry = simplified,
                NodeKind::Instanced(instanced) => instanced.geometry = simplified,
                NodeKind::Group | NodeKind::Lod(_) => {}
            }
        }
    }
}
