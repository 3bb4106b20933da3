use flow_optimizer::{
    Geometry, Instance, Material, Scene, Texture,
    context::OptimizeContext,
    data_structures::{
        material::MaterialMaps,
        texture::{CapOutcome, FilterMode},
    },
    stages::textures,
};

use crate::common::test_utils::checker;

mod common;

#[test]
fn downsamples_keeping_aspect_ratio() {
    let mut texture = Texture::from_image("wide", checker(2048, 1024));
    assert_eq!(
        texture.cap(1024),
        CapOutcome::Downsampled {
            width: 1024,
            height: 512
        }
    );
    assert_eq!((texture.width, texture.height), (1024, 512));
    assert_eq!(texture.image.as_ref().unwrap().dimensions(), (1024, 512));
    assert_eq!(texture.max_size_applied, Some(1024));
}

#[test]
fn small_textures_are_untouched() {
    let mut texture = Texture::from_image("small", checker(256, 128));
    assert_eq!(texture.cap(1024), CapOutcome::Unchanged);
    assert_eq!((texture.width, texture.height), (256, 128));
    assert_eq!(texture.max_size_applied, None);
}

#[test]
fn textures_without_pixels_get_cheaper_sampling() {
    let mut texture = Texture::placeholder("gpu_only", 4096, 4096);
    texture.sampling.anisotropy = 16;
    texture.sampling.min_filter = FilterMode::Nearest;

    assert_eq!(texture.cap(512), CapOutcome::Relaxed);
    assert!(!texture.sampling.generate_mipmaps);
    assert_eq!(texture.sampling.min_filter, FilterMode::Linear);
    assert_eq!(texture.sampling.mag_filter, FilterMode::Linear);
    assert_eq!(texture.sampling.anisotropy, 1);
    assert_eq!(texture.max_size_applied, Some(512));
}

#[test]
fn shared_texture_is_capped_once() {
    let mut scene = Scene::new("shared");
    let atlas = scene.add_texture(Texture::from_image("atlas", checker(2048, 2048)));
    let maps = MaterialMaps {
        map: Some(atlas),
        ..Default::default()
    };
    let wood = scene.add_material(Material::new("wood").with_maps(maps.clone()));
    let bark = scene.add_material(Material::new("bark").with_maps(maps));
    let cube = scene.add_geometry(Geometry::cuboid("cube", 1.0, 1.0, 1.0));
    let root = scene.root();
    scene.add_mesh(root, "crate", Instance::default(), cube, wood).unwrap();
    scene.add_mesh(root, "stump", Instance::default(), cube, bark).unwrap();

    let mut ctx = OptimizeContext::new();
    assert_eq!(textures::enforce_budget(&mut scene, &mut ctx, 1024), 1);
    assert_eq!(ctx.processed_textures.len(), 1);
    assert_eq!(scene.texture(atlas).unwrap().width, 1024);

    // a tighter budget later in the same pass does not touch it again
    assert_eq!(textures::cap_texture(&mut scene, &mut ctx, atlas, 256), None);
    assert_eq!(scene.texture(atlas).unwrap().width, 1024);
}

#[test]
fn textures_of_unused_materials_are_left_alone() {
    let mut scene = Scene::new("unused");
    let big = scene.add_texture(Texture::from_image("big", checker(2048, 2048)));
    scene.add_material(Material::new("orphan").with_maps(MaterialMaps {
        normal: Some(big),
        ..Default::default()
    }));

    let mut ctx = OptimizeContext::new();
    assert_eq!(textures::enforce_budget(&mut scene, &mut ctx, 512), 0);
    assert_eq!(scene.texture(big).unwrap().width, 2048);
}
