//! Texture budget: cap every texture reachable from a live material.

use crate::{
    context::OptimizeContext,
    data_structures::{
        scene_graph::{Scene, TextureId},
        texture::CapOutcome,
    },
};

pub const STAGE: &str = "textures";

/// Caps one texture unless this pass already did. Missing textures are
/// skipped silently.
pub fn cap_texture(scene: &mut Scene, ctx: &mut OptimizeContext, id: TextureId, max_size: u32) -> Option<CapOutcome> {
    if ctx.processed_textures.contains(&id) {
        return None;
    }
    let texture = scene.texture_mut(id)?;
    ctx.processed_textures.insert(id);
    let outcome = texture.cap(max_size);
    if outcome != CapOutcome::Unchanged {
        log::debug!("texture {} capped to {}: {:?}", texture.name, max_size, outcome);
    }
    Some(outcome)
}

/// Visits textures through the materials of every mesh and instanced node,
/// in traversal order. Returns how many textures were changed.
pub fn enforce_budget(scene: &mut Scene, ctx: &mut OptimizeContext, max_size: u32) -> usize {
    let textures: Vec<TextureId> = scene
        .traverse()
        .into_iter()
        .filter_map(|id| {
            let node = scene.node(id)?;
            node.mesh()
                .map(|mesh| mesh.material)
                .or_else(|| node.instanced().map(|instanced| instanced.material))
        })
        .filter_map(|material| scene.material(material))
        .flat_map(|material| material.maps.iter().collect::<Vec<_>>())
        .collect();
    textures
        .into_iter()
        .filter_map(|id| cap_texture(scene, ctx, id, max_size))
        .filter(|outcome| *outcome != CapOutcome::Unchanged)
        .count()
}
