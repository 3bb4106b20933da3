use std::sync::{Arc, Mutex};

use flow_optimizer::{
    Geometry, Instance, Material, MaterialId, NodeId, Scene, Texture,
    cgmath::Vector3,
    data_structures::{material::MaterialMaps, scene_graph::MeshRef},
};
use image::{Rgba, RgbaImage};

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// 40 x 25 grid: exactly 1000 vertices.
pub fn plane_1000(name: &str) -> Geometry {
    Geometry::plane(name, 10.0, 6.0, 39, 24)
}

pub fn sphere(name: &str) -> Geometry {
    Geometry::uv_sphere(name, 1.0, 32, 16)
}

pub fn material(scene: &mut Scene, name: &str, color: [f32; 3]) -> MaterialId {
    scene.add_material(Material::new(name).with_color(color))
}

pub fn checker(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_fn(width, height, |x, y| {
        if (x / 8 + y / 8) % 2 == 0 {
            Rgba([255, 255, 255, 255])
        } else {
            Rgba([0, 0, 0, 255])
        }
    })
}

/// `count` cubes in a row, all sharing one geometry and one material.
pub fn cube_row(count: usize) -> (Scene, Vec<NodeId>, MeshRef) {
    let mut scene = Scene::new("cubes");
    let geometry = scene.add_geometry(Geometry::cuboid("cube", 1.0, 1.0, 1.0));
    let material = material(&mut scene, "stone", [0.5, 0.5, 0.5]);
    let root = scene.root();
    let nodes = (0..count)
        .map(|i| {
            let local = Instance::from(Vector3::new(i as f32 * 2.0, 0.0, 0.0));
            scene
                .add_mesh(root, &format!("cube_{}", i), local, geometry, material)
                .expect("root exists")
        })
        .collect();
    scene.update_world_transforms();
    (scene, nodes, MeshRef { geometry, material })
}

/// Three meshes with three distinct materials; the first is a 1000-vertex plane.
pub fn mixed_scene() -> Scene {
    let mut scene = Scene::new("mixed");
    let root = scene.root();
    let plane = scene.add_geometry(plane_1000("plane"));
    let cube = scene.add_geometry(Geometry::cuboid("cube", 1.0, 2.0, 1.0));
    let ball = scene.add_geometry(sphere("ball"));
    let grass = material(&mut scene, "grass", [0.1, 0.8, 0.1]);
    let brick = material(&mut scene, "brick", [0.7, 0.2, 0.1]);
    let chrome = material(&mut scene, "chrome", [0.9, 0.9, 0.9]);
    scene
        .add_mesh(root, "plane", Instance::default(), plane, grass)
        .expect("root exists");
    scene
        .add_mesh(root, "tower", Instance::from(Vector3::new(3.0, 1.0, 0.0)), cube, brick)
        .expect("root exists");
    scene
        .add_mesh(root, "ball", Instance::from(Vector3::new(-3.0, 1.0, 0.0)), ball, chrome)
        .expect("root exists");
    scene
}

/// A material whose base colour map is a `size` x `size` checker texture.
pub fn textured_material(scene: &mut Scene, name: &str, size: u32) -> MaterialId {
    let texture = scene.add_texture(Texture::from_image(&format!("{}_albedo", name), checker(size, size)));
    scene.add_material(Material::new(name).with_maps(MaterialMaps {
        map: Some(texture),
        ..Default::default()
    }))
}

pub fn find_node(scene: &Scene, name: &str) -> Option<NodeId> {
    scene
        .traverse()
        .into_iter()
        .find(|&id| scene.node(id).is_some_and(|node| node.name == name))
}

/// Collects every progress report of a run.
#[derive(Clone, Default)]
pub struct ProgressLog(Arc<Mutex<Vec<(String, f32)>>>);

impl ProgressLog {
    pub fn recorder(&self) -> impl FnMut(&str, f32) + Send + 'static {
        let log = self.0.clone();
        move |stage: &str, fraction: f32| log.lock().unwrap().push((stage.to_string(), fraction))
    }

    pub fn entries(&self) -> Vec<(String, f32)> {
        self.0.lock().unwrap().clone()
    }
}
