use approx::assert_relative_eq;
use flow_optimizer::{
    Geometry, Instance, NodeKind, Scene,
    cgmath::{Deg, Quaternion, Rotation3, Vector3},
    context::OptimizeContext,
    stages::instancing,
};

use crate::common::test_utils::{cube_row, material};

mod common;

#[test]
fn repeated_meshes_become_one_instanced_node() {
    let (mut scene, nodes, mesh) = cube_row(10);
    let worlds: Vec<_> = nodes.iter().map(|&id| scene.node(id).unwrap().world).collect();

    let mut ctx = OptimizeContext::new();
    let created = instancing::group_and_instance(&mut scene, &mut ctx).unwrap();

    assert_eq!(created.len(), 1);
    let root = scene.node(scene.root()).unwrap();
    assert_eq!(root.children(), created.as_slice());
    let node = scene.node(created[0]).unwrap();
    assert_eq!(node.name, "instanced_cube");
    assert_eq!(node.sources.len(), 10);
    let instanced = node.instanced().unwrap();
    assert_eq!(instanced.count(), 10);
    assert_eq!(instanced.geometry, mesh.geometry);
    assert_eq!(instanced.material, mesh.material);
    assert_eq!(instanced.transforms, worlds);
    assert!(nodes.iter().all(|&id| scene.node(id).is_none()));
    assert_eq!(scene.vertex_count(), 240);
    scene.validate().unwrap();
}

#[test]
fn instance_transforms_include_parent_transforms() {
    let mut scene = Scene::new("nested");
    let cube = scene.add_geometry(Geometry::cuboid("cube", 1.0, 1.0, 1.0));
    let paint = material(&mut scene, "paint", [1.0, 1.0, 1.0]);
    let root = scene.root();
    let shelf = scene
        .add_group(
            root,
            "shelf",
            Instance::from(Vector3::new(0.0, 2.0, 0.0)).with_rotation(Quaternion::from_angle_y(Deg(90.0))),
        )
        .unwrap();
    scene.add_mesh(shelf, "a", Instance::from(Vector3::new(1.0, 0.0, 0.0)), cube, paint).unwrap();
    scene.add_mesh(root, "b", Instance::from(Vector3::new(-1.0, 0.0, 0.0)), cube, paint).unwrap();

    let mut ctx = OptimizeContext::new();
    let created = instancing::group_and_instance(&mut scene, &mut ctx).unwrap();

    let instanced = scene.node(created[0]).unwrap().instanced().unwrap();
    let a = instanced.transforms[0];
    // rotating +x by 90 degrees about y points it at -z
    assert_relative_eq!(a.w.x, 0.0, epsilon = 1e-6);
    assert_relative_eq!(a.w.y, 2.0, epsilon = 1e-6);
    assert_relative_eq!(a.w.z, -1.0, epsilon = 1e-6);
    let b = instanced.transforms[1];
    assert_relative_eq!(b.w.x, -1.0);
    // the emptied group stays
    assert_eq!(scene.node(shelf).unwrap().kind, NodeKind::Group);
}

#[test]
fn raw_instances_carry_the_model_matrices() {
    let (mut scene, _, _) = cube_row(3);
    let mut ctx = OptimizeContext::new();
    let created = instancing::group_and_instance(&mut scene, &mut ctx).unwrap();
    let instanced = scene.node(created[0]).unwrap().instanced().unwrap();

    let raw = instanced.to_raw();
    assert_eq!(raw.len(), 3);
    assert_relative_eq!(raw[2].model[3][0], 4.0);
    let bytes: &[u8] = bytemuck::cast_slice(&raw);
    assert_eq!(bytes.len(), 3 * std::mem::size_of_val(&raw[0]));
}

#[test]
fn distinct_meshes_are_left_alone() {
    let mut scene = Scene::new("distinct");
    let paint = material(&mut scene, "paint", [1.0, 1.0, 1.0]);
    let other = material(&mut scene, "other", [0.0, 1.0, 1.0]);
    let cube = scene.add_geometry(Geometry::cuboid("cube", 1.0, 1.0, 1.0));
    let post = scene.add_geometry(Geometry::cuboid("post", 0.2, 2.0, 0.2));
    let root = scene.root();
    scene.add_mesh(root, "a", Instance::default(), cube, paint).unwrap();
    scene.add_mesh(root, "b", Instance::default(), cube, other).unwrap();
    scene.add_mesh(root, "c", Instance::default(), post, paint).unwrap();

    assert!(instancing::find_groups(&scene).iter().all(|group| group.members.len() == 1));
    let mut ctx = OptimizeContext::new();
    assert!(instancing::group_and_instance(&mut scene, &mut ctx).unwrap().is_empty());
    assert_eq!(scene.meshes().len(), 3);
}
