use flow_optimizer::{
    AttributeKind, CancellationToken, Geometry, Instance, LodLevelSpec, ModelStats, NodeKind, OptimizationOptions,
    OptimizationScheduler, OptimizationState, OptimizeError, Scene,
    error::DecimateError,
    flow::{COMPLETE, StageOutcome},
    optimize, optimize_async,
    stages::decimate::Decimator,
};
use instant::Duration;

use crate::common::test_utils::{ProgressLog, cube_row, find_node, init_logger, material, mixed_scene};

mod common;

fn outcomes(optimized: &flow_optimizer::Optimized) -> Vec<(&'static str, StageOutcome)> {
    optimized
        .report
        .stages
        .iter()
        .map(|report| (report.stage, report.outcome.clone()))
        .collect()
}

fn plane_vertices(scene: &Scene) -> usize {
    let plane = find_node(scene, "plane").expect("plane survives");
    let mesh = scene.node(plane).unwrap().mesh().unwrap();
    scene.geometry(mesh.geometry).unwrap().vertex_count()
}

#[test]
fn progress_is_monotonic_and_ends_complete() {
    init_logger();
    let progress = ProgressLog::default();
    let options = OptimizationOptions::default().with_progress(progress.recorder());

    let optimized = optimize(mixed_scene(), options).unwrap();
    assert_eq!(optimized.state, OptimizationState::Completed);

    let entries = progress.entries();
    assert!(!entries.is_empty());
    for pair in entries.windows(2) {
        assert!(pair[0].1 <= pair[1].1, "progress went backwards: {:?}", pair);
    }
    assert!(entries.iter().all(|(_, fraction)| (0.0..=1.0).contains(fraction)));
    let (stage, fraction) = entries.last().unwrap();
    assert_eq!(stage, COMPLETE);
    assert_eq!(*fraction, 1.0);
    assert_eq!(entries.iter().filter(|(stage, _)| stage == COMPLETE).count(), 1);
}

#[test]
fn cooperative_run_completes_with_monotonic_progress() {
    init_logger();
    let progress = ProgressLog::default();
    let options = OptimizationOptions {
        frame_budget: Duration::ZERO,
        ..Default::default()
    }
    .with_progress(progress.recorder());

    let optimized =
        futures::executor::block_on(optimize_async(mixed_scene(), options, CancellationToken::new())).unwrap();

    assert_eq!(optimized.state, OptimizationState::Completed);
    assert!(!optimized.report.cancelled);
    assert!(
        optimized
            .report
            .stages
            .iter()
            .all(|report| report.outcome == StageOutcome::Completed)
    );
    let entries = progress.entries();
    for pair in entries.windows(2) {
        assert!(pair[0].1 <= pair[1].1, "progress went backwards: {:?}", pair);
    }
    assert!(entries.iter().all(|(_, fraction)| (0.0..=1.0).contains(fraction)));
    assert_eq!(entries.last().unwrap(), &(COMPLETE.to_string(), 1.0));
    assert_eq!(entries.iter().filter(|(stage, _)| stage == COMPLETE).count(), 1);
    assert!(plane_vertices(&optimized.scene) <= 500);
}

#[test]
fn report_carries_model_stats_before_and_after() {
    let optimized = optimize(mixed_scene(), OptimizationOptions::default()).unwrap();

    let ModelStats {
        meshes,
        vertices,
        triangles,
    } = optimized.report.before;
    assert_eq!(meshes, 3);
    assert_eq!(vertices, 1000 + 24 + 482);
    assert!(triangles > 0);

    let after = optimized.report.after;
    assert_eq!(after, optimized.scene.stats());
    assert_eq!(after.meshes, 3);
    assert!(after.vertices < vertices);
    assert!(after.triangles < triangles);
}

#[test]
fn ten_cubes_become_ten_instances() {
    let (scene, _, mesh) = cube_row(10);
    let options = OptimizationOptions {
        enable_instancing: true,
        merge_geometries: false,
        create_lod: false,
        ..Default::default()
    };

    let optimized = optimize(scene, options).unwrap();

    let scene = &optimized.scene;
    let children = scene.node(scene.root()).unwrap().children();
    assert_eq!(children.len(), 1);
    let instanced = scene.node(children[0]).unwrap().instanced().unwrap();
    assert_eq!(instanced.count(), 10);
    assert_eq!(instanced.geometry, mesh.geometry);
    assert_eq!(optimized.state, OptimizationState::Completed);
    assert_eq!(
        outcomes(&optimized),
        vec![
            ("textures", StageOutcome::Completed),
            ("simplify", StageOutcome::Completed),
            ("instancing", StageOutcome::Completed),
            ("materials", StageOutcome::Completed),
        ]
    );
}

#[test]
fn mixed_scene_is_simplified_but_not_regrouped() {
    let optimized = optimize(mixed_scene(), OptimizationOptions::default()).unwrap();

    assert_eq!(optimized.state, OptimizationState::Completed);
    let scene = &optimized.scene;
    let vertices = plane_vertices(scene);
    assert!((50..=500).contains(&vertices), "plane has {} vertices", vertices);
    assert_eq!(scene.meshes().len(), 3);
    assert_eq!(scene.material_count(), 3);
    let tower = find_node(scene, "tower").unwrap();
    let tower_mesh = scene.node(tower).unwrap().mesh().unwrap();
    assert_eq!(scene.geometry(tower_mesh.geometry).unwrap().vertex_count(), 24);
    assert!(optimized.report.diagnostics.is_empty());
    scene.validate().unwrap();
}

#[test]
fn cancelling_after_simplify_skips_the_rest() {
    init_logger();
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let options = OptimizationOptions::default().with_progress(move |stage, fraction| {
        if stage == "simplify" && fraction >= 0.4 {
            trigger.cancel();
        }
    });

    let optimized = futures::executor::block_on(optimize_async(mixed_scene(), options, cancel)).unwrap();

    assert_eq!(optimized.state, OptimizationState::PartiallyCompleted);
    assert!(optimized.report.cancelled);
    assert_eq!(
        outcomes(&optimized),
        vec![
            ("textures", StageOutcome::Completed),
            ("simplify", StageOutcome::Completed),
            ("instancing", StageOutcome::Skipped),
            ("materials", StageOutcome::Skipped),
            ("merge", StageOutcome::Skipped),
        ]
    );
    assert!(plane_vertices(&optimized.scene) <= 500);
}

#[test]
fn cancelling_inside_simplify_stops_between_meshes() {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let progress = ProgressLog::default();
    let mut record = progress.recorder();
    let options = OptimizationOptions {
        frame_budget: Duration::ZERO,
        ..Default::default()
    }
    .with_progress(move |stage, fraction| {
        record(stage, fraction);
        if stage == "simplify" {
            trigger.cancel();
        }
    });

    let optimized = futures::executor::block_on(optimize_async(mixed_scene(), options, cancel)).unwrap();

    assert_eq!(optimized.state, OptimizationState::PartiallyCompleted);
    assert_eq!(optimized.report.stages[1].outcome, StageOutcome::Cancelled);
    assert!(
        optimized.report.stages[2..]
            .iter()
            .all(|report| report.outcome == StageOutcome::Skipped)
    );
    // the plane comes first and was finished, the ball was never started
    assert!(plane_vertices(&optimized.scene) <= 500);
    let ball = find_node(&optimized.scene, "ball").unwrap();
    let ball_mesh = optimized.scene.node(ball).unwrap().mesh().unwrap();
    assert_eq!(optimized.scene.geometry(ball_mesh.geometry).unwrap().vertex_count(), 482);
    assert!(progress.entries().iter().all(|(stage, _)| stage != COMPLETE));
}

fn cancel_on_first_simplify_report(max_batch_meshes: usize) -> flow_optimizer::Optimized {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let options = OptimizationOptions {
        frame_budget: Duration::from_secs(3600),
        max_batch_meshes,
        ..Default::default()
    }
    .with_progress(move |stage, _| {
        if stage == "simplify" {
            trigger.cancel();
        }
    });
    futures::executor::block_on(optimize_async(mixed_scene(), options, cancel)).unwrap()
}

#[test]
fn batch_mesh_cap_forces_a_yield() {
    let capped = cancel_on_first_simplify_report(1);
    assert_eq!(capped.report.stages[1].outcome, StageOutcome::Cancelled);
    let ball = find_node(&capped.scene, "ball").unwrap();
    let ball_mesh = capped.scene.node(ball).unwrap().mesh().unwrap();
    assert_eq!(capped.scene.geometry(ball_mesh.geometry).unwrap().vertex_count(), 482);

    // within the time budget and the default cap the whole stage is one batch
    let uncapped = cancel_on_first_simplify_report(50);
    assert_eq!(uncapped.report.stages[1].outcome, StageOutcome::Completed);
    assert_eq!(uncapped.report.stages[2].outcome, StageOutcome::Skipped);
    let ball = find_node(&uncapped.scene, "ball").unwrap();
    let ball_mesh = uncapped.scene.node(ball).unwrap().mesh().unwrap();
    assert!(uncapped.scene.geometry(ball_mesh.geometry).unwrap().vertex_count() < 482);
}

#[test]
fn zero_batch_cap_is_read_as_one() {
    let options = OptimizationOptions {
        max_batch_meshes: 0,
        ..Default::default()
    };
    assert_eq!(options.resolve().unwrap().max_batch_meshes, 1);
}

#[test]
fn invalid_options_fail_the_run() {
    let mut scheduler = OptimizationScheduler::new();
    assert_eq!(scheduler.state(), OptimizationState::Idle);
    let options = OptimizationOptions {
        simplification_ratio: f32::NAN,
        ..Default::default()
    };

    let result = scheduler.run_blocking(mixed_scene(), options);

    assert!(matches!(result, Err(OptimizeError::InvalidOptions(_))));
    assert_eq!(scheduler.state(), OptimizationState::Failed);
}

#[test]
fn dangling_references_fail_the_run() {
    let mut scene = Scene::new("broken");
    let cube = scene.add_geometry(Geometry::cuboid("cube", 1.0, 1.0, 1.0));
    let mut elsewhere = Scene::new("elsewhere");
    for i in 0..5 {
        material(&mut elsewhere, &format!("m{}", i), [0.0, 0.0, 0.0]);
    }
    let foreign = material(&mut elsewhere, "foreign", [1.0, 0.0, 0.0]);
    let root = scene.root();
    scene.add_mesh(root, "orphan", Instance::default(), cube, foreign).unwrap();

    let result = optimize(scene, OptimizationOptions::default());
    assert!(matches!(result, Err(OptimizeError::InvalidHierarchy(_))));
}

#[test]
fn out_of_range_ratio_is_clamped() {
    let options = OptimizationOptions {
        simplification_ratio: 7.0,
        ..Default::default()
    };
    assert_eq!(options.resolve().unwrap().simplification_ratio, 1.0);
    let optimized = optimize(mixed_scene(), options).unwrap();
    assert_eq!(optimized.state, OptimizationState::Completed);
    assert!(plane_vertices(&optimized.scene) >= 50);
}

#[test]
fn aggressive_mode_scales_settings() {
    let settings = OptimizationOptions::aggressive().resolve().unwrap();
    assert_eq!(settings.simplification_ratio, 0.75);
    assert_eq!(settings.max_texture_size, 512);
    assert_eq!(settings.lod_levels.len(), 5);
    assert!(settings.create_lod);

    let capped = OptimizationOptions {
        aggressive_mode: true,
        simplification_ratio: 0.9,
        max_texture_size: 256,
        ..Default::default()
    }
    .resolve()
    .unwrap();
    assert_eq!(capped.simplification_ratio, 0.8);
    assert_eq!(capped.max_texture_size, 256);
}

#[test]
fn aggressive_run_ends_in_an_lod_container() {
    let optimized = optimize(mixed_scene(), OptimizationOptions::aggressive()).unwrap();

    assert_eq!(optimized.state, OptimizationState::Completed);
    let scene = &optimized.scene;
    let root = scene.node(scene.root()).unwrap();
    let NodeKind::Lod(container) = &root.kind else {
        panic!("root is {:?}", root.kind);
    };
    assert_eq!(container.distances, vec![0.0, 10.0, 30.0, 60.0, 100.0]);
    assert_eq!(root.children().len(), 5);
    for (_, mesh) in scene.meshes() {
        assert!(scene.material(mesh.material).unwrap().flat_shading);
    }
    scene.validate().unwrap();
}

#[test]
fn bad_lod_ladder_only_fails_its_stage() {
    let options = OptimizationOptions {
        create_lod: true,
        lod_levels: Some(vec![LodLevelSpec::new(0.0, 0.0), LodLevelSpec::new(0.0, 0.5)]),
        ..Default::default()
    };

    let optimized = optimize(mixed_scene(), options).unwrap();

    assert_eq!(optimized.state, OptimizationState::PartiallyCompleted);
    let lod = optimized.report.stages.last().unwrap();
    assert_eq!(lod.stage, "lod");
    assert!(matches!(lod.outcome, StageOutcome::Failed(_)));
    let root = optimized.scene.node(optimized.scene.root()).unwrap();
    assert_eq!(root.kind, NodeKind::Group);
    assert!(plane_vertices(&optimized.scene) <= 500);
}

struct Exploding;

impl Decimator for Exploding {
    fn simplify(&self, _geometry: &Geometry, _target_vertices: usize) -> Result<Geometry, DecimateError> {
        panic!("decimator exploded");
    }
}

#[test]
fn panicking_decimator_only_skips_each_mesh() {
    let progress = ProgressLog::default();
    let options = OptimizationOptions::default().with_progress(progress.recorder());
    let mut scheduler = OptimizationScheduler::with_decimator(Box::new(Exploding));

    let optimized = scheduler.run_blocking(mixed_scene(), options).unwrap();

    assert_eq!(optimized.state, OptimizationState::Completed);
    assert_eq!(scheduler.state(), OptimizationState::Completed);
    assert!(
        optimized
            .report
            .stages
            .iter()
            .all(|report| report.outcome == StageOutcome::Completed)
    );
    let diagnostics = &optimized.report.diagnostics;
    let mut subjects: Vec<&str> = diagnostics.iter().map(|d| d.subject.as_str()).collect();
    subjects.sort_unstable();
    assert_eq!(subjects, ["ball", "plane", "tower"]);
    for diagnostic in diagnostics {
        assert_eq!(diagnostic.stage, "simplify");
        assert!(diagnostic.message.contains("decimator exploded"), "{}", diagnostic.message);
    }
    assert_eq!(plane_vertices(&optimized.scene), 1000);
    let entries = progress.entries();
    assert_eq!(entries.last().unwrap(), &(COMPLETE.to_string(), 1.0));
    for pair in entries.windows(2) {
        assert!(pair[0].1 <= pair[1].1);
    }
}

#[test]
fn non_indexed_mesh_is_reported_and_skipped() {
    let mut scene = mixed_scene();
    let soup = scene.add_geometry(Geometry::new("soup").with_attribute(
        AttributeKind::Position,
        (0..900).map(|i| (i % 7) as f32).collect(),
        3,
    ));
    let paint = material(&mut scene, "paint", [0.2, 0.2, 0.2]);
    let root = scene.root();
    scene.add_mesh(root, "soup", Instance::default(), soup, paint).unwrap();

    let optimized = optimize(scene, OptimizationOptions::default()).unwrap();

    assert_eq!(optimized.state, OptimizationState::Completed);
    let diagnostics = &optimized.report.diagnostics;
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].stage, "simplify");
    assert_eq!(diagnostics[0].subject, "soup");
    assert!(plane_vertices(&optimized.scene) <= 500);
}

#[test]
fn empty_scene_completes() {
    let progress = ProgressLog::default();
    let options = OptimizationOptions::default().with_progress(progress.recorder());
    let optimized = optimize(Scene::new("empty"), options).unwrap();
    assert_eq!(optimized.state, OptimizationState::Completed);
    assert_eq!(optimized.scene.node_count(), 1);
    assert_eq!(progress.entries().last().unwrap().1, 1.0);
}

#[tokio::test]
async fn spawned_run_completes_off_the_runtime_thread() {
    let (scene, _, _) = cube_row(4);
    let optimized = flow_optimizer::spawn_optimize(scene, OptimizationOptions::default())
        .await
        .unwrap();
    assert_eq!(optimized.state, OptimizationState::Completed);
    let children = optimized.scene.node(optimized.scene.root()).unwrap().children();
    assert_eq!(children.len(), 1);
}
