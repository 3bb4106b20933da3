/**
 * This module contains all logic for turning glTF/GLB files into a [`Scene`].
 *
 * Parsing is done by the `gltf` crate; this module only maps nodes, meshes,
 * materials and images onto the scene arena.
 */
pub mod mesh;
pub mod texture;

use crate::{
    data_structures::{scene_graph::Scene, texture::Texture},
    resources::{
        mesh::{Imported, add_gltf_node},
        texture::{from_gltf_image, load_binary, load_images},
    },
};

/// Loads `assets/<file_name>` (or fetches it on wasm), including external
/// buffers and images referenced by URI.
pub async fn load_model_gltf(file_name: &str) -> anyhow::Result<Scene> {
    let gltf_bytes = load_binary(file_name).await?;
    let gltf = gltf::Gltf::from_slice(&gltf_bytes)?;

    // Load buffers
    let mut buffer_data = Vec::new();
    for buffer in gltf.buffers() {
        match buffer.source() {
            gltf::buffer::Source::Bin => {
                if let Some(blob) = gltf.blob.as_deref() {
                    buffer_data.push(blob.into());
                };
            }
            gltf::buffer::Source::Uri(uri) => {
                let bin = load_binary(uri).await?;
                buffer_data.push(bin);
            }
        }
    }
    let textures = load_images(&gltf.document, &buffer_data).await;
    build_scene(file_name, &gltf.document, &buffer_data, textures)
}

/// Imports a self-contained document (GLB, or glTF with embedded data URIs).
pub fn import_gltf(name: &str, bytes: &[u8]) -> anyhow::Result<Scene> {
    let (document, buffers, images) = gltf::import_slice(bytes)?;
    let buffers: Vec<Vec<u8>> = buffers.into_iter().map(|data| data.0).collect();
    let textures = images
        .iter()
        .enumerate()
        .map(|(index, data)| {
            let image_name = document
                .images()
                .nth(index)
                .and_then(|image| image.name().map(str::to_string))
                .unwrap_or_else(|| format!("image_{}", index));
            from_gltf_image(&image_name, data)
        })
        .collect();
    build_scene(name, &document, &buffers, textures)
}

fn build_scene(name: &str, document: &gltf::Document, buffers: &[Vec<u8>], textures: Vec<Texture>) -> anyhow::Result<Scene> {
    let gltf_scene = document
        .default_scene()
        .or_else(|| document.scenes().next())
        .ok_or_else(|| anyhow::anyhow!("{} contains no scene", name))?;
    let mut scene = Scene::new(gltf_scene.name().unwrap_or(name));
    let texture_ids = textures.into_iter().map(|texture| scene.add_texture(texture)).collect();
    let mut imported = Imported::new(texture_ids);
    let root = scene.root();
    for node in gltf_scene.nodes() {
        add_gltf_node(&mut scene, &mut imported, root, node, buffers)?;
    }
    scene.update_world_transforms();
    log::info!(
        "imported {}: {} nodes, {} geometries, {} materials, {} textures",
        name,
        scene.node_count(),
        scene.geometry_count(),
        scene.material_count(),
        scene.texture_count()
    );
    Ok(scene)
}
