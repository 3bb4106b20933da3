use std::collections::HashMap;

use crate::data_structures::{
    geometry::{AttributeKind, Geometry},
    instance::Instance,
    material::{Material, MaterialMaps, Side},
    scene_graph::{GeometryId, MaterialId, MeshRef, NodeId, NodeKind, Scene, TextureId},
};

/// Ids handed out while converting one document, so that repeated references
/// to a glTF mesh or material share one arena entry.
pub(crate) struct Imported {
    textures: Vec<TextureId>,
    geometries: HashMap<(usize, usize), Option<GeometryId>>,
    materials: HashMap<Option<usize>, MaterialId>,
}

impl Imported {
    /// `textures[i]` is the arena id of glTF image `i`.
    pub(crate) fn new(textures: Vec<TextureId>) -> Self {
        Self {
            textures,
            geometries: HashMap::new(),
            materials: HashMap::new(),
        }
    }
}

/// Reads the attributes of one triangle-list primitive.
pub fn read_primitive(name: &str, primitive: &gltf::Primitive, buffers: &[Vec<u8>]) -> Option<Geometry> {
    if primitive.mode() != gltf::mesh::Mode::Triangles {
        log::warn!("primitive of {} is {:?}, only triangle lists are imported", name, primitive.mode());
        return None;
    }
    let reader = primitive.reader(|buffer| buffers.get(buffer.index()).map(Vec::as_slice));

    let positions: Vec<f32> = reader.read_positions()?.flatten().collect();
    let mut geometry = Geometry::new(name).with_attribute(AttributeKind::Position, positions, 3);
    if let Some(normals) = reader.read_normals() {
        geometry = geometry.with_attribute(AttributeKind::Normal, normals.flatten().collect(), 3);
    }
    if let Some(tex_coords) = reader.read_tex_coords(0) {
        geometry = geometry.with_attribute(AttributeKind::Uv, tex_coords.into_f32().flatten().collect(), 2);
    }
    if let Some(colors) = reader.read_colors(0) {
        geometry = geometry.with_attribute(AttributeKind::Color, colors.into_rgba_f32().flatten().collect(), 4);
    }
    if let Some(indices) = reader.read_indices() {
        geometry = geometry.with_indices(indices.into_u32().collect());
    }
    Some(geometry)
}

fn texture_id(imported: &Imported, texture: gltf::Texture) -> Option<TextureId> {
    imported.textures.get(texture.source().index()).copied()
}

pub(crate) fn material_id(scene: &mut Scene, imported: &mut Imported, material: gltf::Material) -> MaterialId {
    if let Some(&id) = imported.materials.get(&material.index()) {
        return id;
    }
    let pbr = material.pbr_metallic_roughness();
    let [r, g, b, a] = pbr.base_color_factor();
    let metallic_roughness = pbr
        .metallic_roughness_texture()
        .and_then(|info| texture_id(imported, info.texture()));
    let maps = MaterialMaps {
        map: pbr
            .base_color_texture()
            .and_then(|info| texture_id(imported, info.texture())),
        normal: material
            .normal_texture()
            .and_then(|normal| texture_id(imported, normal.texture())),
        roughness: metallic_roughness,
        metalness: metallic_roughness,
        ao: material
            .occlusion_texture()
            .and_then(|occlusion| texture_id(imported, occlusion.texture())),
        emissive: material
            .emissive_texture()
            .and_then(|info| texture_id(imported, info.texture())),
        ..Default::default()
    };
    let converted = Material {
        name: material.name().unwrap_or("default").to_string(),
        color: [r, g, b],
        metalness: pbr.metallic_factor(),
        roughness: pbr.roughness_factor(),
        opacity: a,
        transparent: material.alpha_mode() == gltf::material::AlphaMode::Blend,
        emissive: material.emissive_factor(),
        side: if material.double_sided() { Side::Double } else { Side::Front },
        maps,
        ..Default::default()
    };
    let id = scene.add_material(converted);
    imported.materials.insert(material.index(), id);
    id
}

/// Adds `node` and its subtree below `parent`. A mesh with several
/// primitives becomes a group with one mesh child per primitive.
pub(crate) fn add_gltf_node(
    scene: &mut Scene,
    imported: &mut Imported,
    parent: NodeId,
    node: gltf::Node,
    buffers: &[Vec<u8>],
) -> anyhow::Result<NodeId> {
    let (position, rotation, scale) = node.transform().decomposed();
    let local = Instance {
        position: position.into(),
        rotation: rotation.into(),
        scale: scale.into(),
    };
    let name = node
        .name()
        .map(str::to_string)
        .unwrap_or_else(|| format!("node_{}", node.index()));

    let mut drawables = Vec::new();
    if let Some(mesh) = node.mesh() {
        let mesh_name = mesh.name().unwrap_or(&name).to_string();
        for primitive in mesh.primitives() {
            let key = (mesh.index(), primitive.index());
            let geometry = match imported.geometries.get(&key) {
                Some(&geometry) => geometry,
                None => {
                    let geometry = read_primitive(&mesh_name, &primitive, buffers).map(|g| scene.add_geometry(g));
                    imported.geometries.insert(key, geometry);
                    geometry
                }
            };
            if let Some(geometry) = geometry {
                let material = material_id(scene, imported, primitive.material());
                drawables.push(MeshRef { geometry, material });
            }
        }
    }

    let id = match drawables.as_slice() {
        [single] => scene.add_node(parent, &name, local, NodeKind::Mesh(*single))?,
        _ => {
            let group = scene.add_group(parent, &name, local)?;
            for (index, mesh) in drawables.iter().enumerate() {
                scene.add_node(
                    group,
                    &format!("{}_{}", name, index),
                    Instance::default(),
                    NodeKind::Mesh(*mesh),
                )?;
            }
            group
        }
    };
    for child in node.children() {
        add_gltf_node(scene, imported, id, child, buffers)?;
    }
    Ok(id)
}
