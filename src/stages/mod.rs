//! Pipeline stages.
//!
//! Each module works on a [`Scene`] plus the per-call
//! [`OptimizeContext`](crate::context::OptimizeContext) and is driven by the
//! scheduler in [`crate::flow`]:
//!
//! - `textures` caps texture dimensions
//! - `decimate` simplifies geometry by edge collapse
//! - `instancing` folds repeated geometry/material pairs into instanced nodes
//! - `materials` transforms and deduplicates materials
//! - `merge` concatenates meshes sharing a material
//! - `lod` builds a distance-switched ladder of decimated copies

pub mod decimate;
pub mod instancing;
pub mod lod;
pub mod materials;
pub mod merge;
pub mod textures;

use std::collections::HashSet;

use crate::data_structures::scene_graph::{MeshRef, NodeId, NodeKind, Scene};

/// Mesh nodes that may be regrouped, in traversal order. The root and
/// anything inside an LOD container stay where they are.
pub(crate) fn regroupable_meshes(scene: &Scene) -> Vec<(NodeId, MeshRef)> {
    let mut frozen = HashSet::new();
    for id in scene.traverse() {
        if let Some(NodeKind::Lod(_)) = scene.node(id).map(|node| &node.kind) {
            frozen.extend(scene.traverse_from(id));
        }
    }
    scene
        .meshes()
        .into_iter()
        .filter(|(id, _)| *id != scene.root() && !frozen.contains(id))
        .collect()
}

/// Display name for a generated node: the resource name, or its id.
pub(crate) fn label(name: &str, id: impl std::fmt::Display) -> String {
    if name.is_empty() {
        id.to_string()
    } else {
        name.to_string()
    }
}
