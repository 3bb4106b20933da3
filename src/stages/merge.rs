//! Geometry merging: one draw per material.
//!
//! Members of a material group are copied, their world transforms baked into
//! the copy, and the copies concatenated into a single mesh under the root.

use crate::{
    context::OptimizeContext,
    data_structures::{
        geometry::{Geometry, merge_geometries},
        instance::Instance,
        scene_graph::{MaterialId, MeshRef, NodeId, NodeKind, Scene},
    },
    stages::{label, regroupable_meshes},
};

pub const STAGE: &str = "merge";

/// Merges every material group with more than one member and returns the
/// new nodes. A group that cannot be merged is left as it was.
pub fn merge(scene: &mut Scene, ctx: &mut OptimizeContext) -> anyhow::Result<Vec<NodeId>> {
    scene.update_world_transforms();

    let mut groups: Vec<(MaterialId, Vec<NodeId>)> = Vec::new();
    for (id, mesh) in regroupable_meshes(scene) {
        match groups.iter_mut().find(|(material, _)| *material == mesh.material) {
            Some((_, members)) => members.push(id),
            None => groups.push((mesh.material, vec![id])),
        }
    }

    let root = scene.root();
    let mut merged_nodes = Vec::new();
    for (material, members) in groups.into_iter().filter(|(_, members)| members.len() > 1) {
        let name = format!(
            "merged_{}",
            label(scene.material(material).map_or("", |m| m.name.as_str()), material)
        );
        let parts = match baked_parts(scene, &members) {
            Ok(parts) => parts,
            Err(message) => {
                ctx.diagnose(STAGE, name, message);
                continue;
            }
        };
        let merged = match merge_geometries(&name, &parts) {
            Ok(merged) => merged,
            Err(err) => {
                ctx.diagnose(STAGE, name, err);
                continue;
            }
        };
        if !merged.excluded.is_empty() {
            let dropped: Vec<_> = merged.excluded.iter().map(|kind| kind.name()).collect();
            ctx.diagnose(
                STAGE,
                name.clone(),
                format!("attributes {} missing in some members, dropped", dropped.join(", ")),
            );
        }

        let geometry = scene.add_geometry(merged.geometry);
        let node = scene.add_node(
            root,
            &name,
            Instance::default(),
            NodeKind::Mesh(MeshRef { geometry, material }),
        )?;
        let sources = members
            .iter()
            .filter_map(|&member| scene.node(member).map(|n| n.name.clone()))
            .collect();
        if let Some(node) = scene.node_mut(node) {
            node.sources = sources;
        }
        for member in &members {
            scene.retire_mesh(*member);
        }
        log::debug!("{} built from {} meshes", name, members.len());
        merged_nodes.push(node);
    }

    // the un-transformed originals go with their nodes
    ctx.released += scene.release_unreferenced();
    scene.update_world_transforms();
    Ok(merged_nodes)
}

/// Copies of each member's geometry in root space.
fn baked_parts(scene: &Scene, members: &[NodeId]) -> Result<Vec<Geometry>, String> {
    members
        .iter()
        .map(|&member| {
            let node = scene.node(member).ok_or_else(|| format!("node {member} vanished"))?;
            let mesh = node.mesh().ok_or_else(|| format!("node {} is not a mesh", node.name))?;
            let mut geometry = scene
                .geometry(mesh.geometry)
                .ok_or_else(|| format!("node {} has no geometry", node.name))?
                .clone();
            geometry.apply_matrix(&scene.relative_to_root(&node.world));
            Ok(geometry)
        })
        .collect()
}
