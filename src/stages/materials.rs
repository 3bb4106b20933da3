//! Material consolidation.
//!
//! Each distinct source material is transformed exactly once per pass; every
//! mesh that used it is rewired to the single result. Results with identical
//! content are then folded into one.

use std::collections::HashMap;

use crate::{
    context::OptimizeContext,
    data_structures::{
        material::MaterialKey,
        scene_graph::{MaterialId, NodeKind, Scene},
    },
    stages::textures,
};

pub const STAGE: &str = "materials";

/// Materials used by drawables, in traversal order, without repeats.
pub fn used_materials(scene: &Scene) -> Vec<MaterialId> {
    let mut seen = Vec::new();
    for id in scene.traverse() {
        let material = match scene.node(id).map(|node| &node.kind) {
            Some(NodeKind::Mesh(mesh)) => mesh.material,
            Some(NodeKind::Instanced(instanced)) => instanced.material,
            _ => continue,
        };
        if !seen.contains(&material) {
            seen.push(material);
        }
    }
    seen
}

/// Returns the material list after consolidation, in first-use order.
pub fn consolidate(scene: &mut Scene, ctx: &mut OptimizeContext, aggressive: bool, max_texture_size: u32) -> Vec<MaterialId> {
    for source in used_materials(scene) {
        if ctx.processed_materials.contains_key(&source) {
            continue;
        }
        let Some(material) = scene.material(source) else {
            continue;
        };
        let slots: Vec<_> = material.maps.iter().collect();
        let replacement = if aggressive {
            let simplified = material.simplified();
            scene.add_material(simplified)
        } else {
            source
        };
        for texture in slots {
            textures::cap_texture(scene, ctx, texture, max_texture_size);
        }
        ctx.processed_materials.insert(source, replacement);
    }

    // fold identical results into the first one seen
    let mut by_content: HashMap<MaterialKey, MaterialId> = HashMap::new();
    let mut canonical: HashMap<MaterialId, MaterialId> = HashMap::new();
    for (&source, &result) in sorted(&ctx.processed_materials) {
        let Some(material) = scene.material(result) else {
            continue;
        };
        let first = *by_content.entry(material.content_key()).or_insert(result);
        canonical.insert(source, first);
    }

    for id in scene.traverse() {
        let Some(node) = scene.node_mut(id) else {
            continue;
        };
        let material = match &mut node.kind {
            NodeKind::Mesh(mesh) => &mut mesh.material,
            NodeKind::Instanced(instanced) => &mut instanced.material,
            NodeKind::Group | NodeKind::Lod(_) => continue,
        };
        if let Some(&target) = canonical.get(&*material) {
            *material = target;
        }
    }

    let released = scene.release_unreferenced();
    log::debug!(
        "materials consolidated: {} sources, {} released",
        canonical.len(),
        released.materials
    );
    ctx.released += released;
    used_materials(scene)
}

/// Processed pairs in ascending source id order, so the first material of a
/// content group is the oldest.
fn sorted(map: &HashMap<MaterialId, MaterialId>) -> Vec<(&MaterialId, &MaterialId)> {
    let mut pairs: Vec<_> = map.iter().collect();
    pairs.sort();
    pairs
}
