//! Instancing: repeated geometry/material pairs become one instanced node.

use crate::{
    context::OptimizeContext,
    data_structures::{
        instance::Instance,
        scene_graph::{InstancedMesh, MeshRef, NodeId, NodeKind, Scene},
    },
    stages::{label, regroupable_meshes},
};

pub const STAGE: &str = "instancing";

/// Meshes sharing a geometry/material pair, in encounter order.
#[derive(Debug)]
pub struct InstanceGroup {
    pub key: MeshRef,
    pub members: Vec<NodeId>,
}

pub fn find_groups(scene: &Scene) -> Vec<InstanceGroup> {
    let mut groups: Vec<InstanceGroup> = Vec::new();
    for (id, mesh) in regroupable_meshes(scene) {
        match groups.iter_mut().find(|group| group.key == mesh) {
            Some(group) => group.members.push(id),
            None => groups.push(InstanceGroup {
                key: mesh,
                members: vec![id],
            }),
        }
    }
    groups
}

/// Replaces every group of two or more meshes with one instanced node under
/// the root. Shared geometry and material stay alive.
pub fn group_and_instance(scene: &mut Scene, ctx: &mut OptimizeContext) -> anyhow::Result<Vec<NodeId>> {
    scene.update_world_transforms();
    let root = scene.root();
    let mut created = Vec::new();
    for group in find_groups(scene).into_iter().filter(|group| group.members.len() > 1) {
        let mut transforms = Vec::with_capacity(group.members.len());
        let mut sources = Vec::with_capacity(group.members.len());
        for member in &group.members {
            if let Some(node) = scene.node(*member) {
                transforms.push(scene.relative_to_root(&node.world));
                sources.push(node.name.clone());
            }
        }
        let name = format!(
            "instanced_{}",
            label(
                scene.geometry(group.key.geometry).map_or("", |g| g.name.as_str()),
                group.key.geometry
            )
        );
        let node = scene.add_node(
            root,
            &name,
            Instance::default(),
            NodeKind::Instanced(InstancedMesh {
                geometry: group.key.geometry,
                material: group.key.material,
                transforms,
            }),
        )?;
        if let Some(node) = scene.node_mut(node) {
            node.sources = sources;
        }
        for member in &group.members {
            scene.retire_mesh(*member);
        }
        log::debug!("{} holds {} instances", name, group.members.len());
        created.push(node);
    }
    ctx.released += scene.release_unreferenced();
    scene.update_world_transforms();
    Ok(created)
}
