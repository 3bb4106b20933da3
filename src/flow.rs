//! Optimization flow: the scheduler that drives the stages.
//!
//! A call runs the enabled stages in a fixed order over one [`Scene`]:
//!
//! 1. `textures` caps texture sizes (always on)
//! 2. `simplify` decimates every distinct geometry
//! 3. `instancing` folds repeated geometry/material pairs
//! 4. `materials` transforms and deduplicates materials
//! 5. `merge` concatenates meshes per material
//! 6. `lod` wraps the result in a distance-switched container
//!
//! then reports the `complete` pseudo-stage at exactly `1.0`.
//!
//! # User-facing entry points
//!
//! - [`optimize`] runs everything in one blocking call
//! - [`optimize_async`] yields between stages and between decimation batches
//!   (bounded by [`OptimizationOptions::frame_budget`] and
//!   [`OptimizationOptions::max_batch_meshes`]) and honours a
//!   [`CancellationToken`] at every yield point
//! - `spawn_optimize` (native only) moves the blocking run onto a tokio
//!   blocking worker
//!
//! A stage that fails or panics is logged, contributes no progress, and turns
//! the result into [`OptimizationState::PartiallyCompleted`]; only invalid
//! input is returned as an error.

use std::{
    fmt::Debug,
    panic::AssertUnwindSafe,
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    task::{Context, Poll},
};

use futures::FutureExt;
use instant::{Duration, Instant};

use crate::{
    context::{Diagnostic, OptimizeContext, panic_message},
    data_structures::scene_graph::{GeometryId, ModelStats, NodeKind, ReleaseStats, Scene},
    error::OptimizeError,
    stages::{
        decimate::{self, Decimator, EdgeCollapse},
        instancing,
        lod::{self, LodLevelSpec},
        materials, merge, textures,
    },
};

/// Receives `(stage name, cumulative fraction)`.
pub type ProgressCallback = Box<dyn FnMut(&str, f32) + Send>;

pub const COMPLETE: &str = "complete";

pub const DEFAULT_BATCH_MESHES: usize = 50;

/// Everything a caller can configure about one optimize call.
pub struct OptimizationOptions {
    pub simplify_geometry: bool,
    /// Fraction of vertices to remove per mesh, `0..=1`.
    pub simplification_ratio: f32,
    /// Pixel ceiling for both texture axes.
    pub max_texture_size: u32,
    pub optimize_materials: bool,
    pub merge_geometries: bool,
    pub enable_instancing: bool,
    pub create_lod: bool,
    /// Scales the ratio up, the texture ceiling down, simplifies materials,
    /// and switches to the denser default LOD ladder.
    pub aggressive_mode: bool,
    pub lod_levels: Option<Vec<LodLevelSpec>>,
    /// Wall-clock budget of one decimation batch between yields.
    pub frame_budget: Duration,
    /// Most meshes decimated in one batch between yields; `0` is read as `1`.
    pub max_batch_meshes: usize,
    pub min_vertex_floor: usize,
    pub on_progress: Option<ProgressCallback>,
}

impl Default for OptimizationOptions {
    fn default() -> Self {
        Self {
            simplify_geometry: true,
            simplification_ratio: 0.5,
            max_texture_size: 1024,
            optimize_materials: true,
            merge_geometries: true,
            enable_instancing: true,
            create_lod: false,
            aggressive_mode: false,
            lod_levels: None,
            frame_budget: Duration::from_millis(16),
            max_batch_meshes: DEFAULT_BATCH_MESHES,
            min_vertex_floor: decimate::DEFAULT_MIN_VERTICES,
            on_progress: None,
        }
    }
}

// Dummy impl, the callback is opaque
impl Debug for OptimizationOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptimizationOptions")
            .field("simplify_geometry", &self.simplify_geometry)
            .field("simplification_ratio", &self.simplification_ratio)
            .field("max_texture_size", &self.max_texture_size)
            .field("optimize_materials", &self.optimize_materials)
            .field("merge_geometries", &self.merge_geometries)
            .field("enable_instancing", &self.enable_instancing)
            .field("create_lod", &self.create_lod)
            .field("aggressive_mode", &self.aggressive_mode)
            .field("lod_levels", &self.lod_levels)
            .field("frame_budget", &self.frame_budget)
            .field("max_batch_meshes", &self.max_batch_meshes)
            .field("min_vertex_floor", &self.min_vertex_floor)
            .field("on_progress", &self.on_progress.is_some())
            .finish()
    }
}

/// The values a run actually uses, after clamping and aggressive scaling.
#[derive(Clone, Debug, PartialEq)]
pub struct Settings {
    pub simplify_geometry: bool,
    pub simplification_ratio: f32,
    pub max_texture_size: u32,
    pub optimize_materials: bool,
    pub merge_geometries: bool,
    pub enable_instancing: bool,
    pub create_lod: bool,
    pub aggressive_mode: bool,
    pub lod_levels: Vec<LodLevelSpec>,
    pub frame_budget: Duration,
    pub max_batch_meshes: usize,
    pub min_vertex_floor: usize,
}

impl OptimizationOptions {
    /// Preset with aggressive mode and LOD generation on.
    pub fn aggressive() -> Self {
        Self {
            aggressive_mode: true,
            create_lod: true,
            ..Default::default()
        }
    }

    pub fn with_progress(mut self, callback: impl FnMut(&str, f32) + Send + 'static) -> Self {
        self.on_progress = Some(Box::new(callback));
        self
    }

    /// Clamps the ratio into `0..=1` and applies aggressive scaling. A NaN
    /// ratio or a zero texture ceiling cannot be repaired and is rejected.
    pub fn resolve(&self) -> Result<Settings, OptimizeError> {
        if self.simplification_ratio.is_nan() {
            return Err(OptimizeError::InvalidOptions(
                "simplification ratio is NaN".to_string(),
            ));
        }
        if self.max_texture_size == 0 {
            return Err(OptimizeError::InvalidOptions(
                "max texture size must be at least 1".to_string(),
            ));
        }
        let mut ratio = self.simplification_ratio.clamp(0.0, 1.0);
        let mut max_texture_size = self.max_texture_size;
        if self.aggressive_mode {
            ratio = (ratio * 1.5).min(0.8);
            max_texture_size = max_texture_size.min(512);
        }
        let lod_levels = match (&self.lod_levels, self.aggressive_mode) {
            (Some(levels), _) => levels.clone(),
            (None, false) => lod::DEFAULT_LEVELS.to_vec(),
            (None, true) => lod::AGGRESSIVE_LEVELS.to_vec(),
        };
        Ok(Settings {
            simplify_geometry: self.simplify_geometry,
            simplification_ratio: ratio,
            max_texture_size,
            optimize_materials: self.optimize_materials,
            merge_geometries: self.merge_geometries,
            enable_instancing: self.enable_instancing,
            create_lod: self.create_lod,
            aggressive_mode: self.aggressive_mode,
            lod_levels,
            frame_budget: self.frame_budget,
            max_batch_meshes: self.max_batch_meshes.max(1),
            min_vertex_floor: self.min_vertex_floor,
        })
    }
}

/// Pipeline stages in their fixed execution order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Textures,
    Simplify,
    Instancing,
    Materials,
    Merge,
    Lod,
}

impl Stage {
    pub const ORDER: [Stage; 6] = [
        Stage::Textures,
        Stage::Simplify,
        Stage::Instancing,
        Stage::Materials,
        Stage::Merge,
        Stage::Lod,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Stage::Textures => textures::STAGE,
            Stage::Simplify => decimate::STAGE,
            Stage::Instancing => instancing::STAGE,
            Stage::Materials => materials::STAGE,
            Stage::Merge => merge::STAGE,
            Stage::Lod => lod::STAGE,
        }
    }

    fn enabled(self, settings: &Settings) -> bool {
        match self {
            Stage::Textures => true,
            Stage::Simplify => settings.simplify_geometry,
            Stage::Instancing => settings.enable_instancing,
            Stage::Materials => settings.optimize_materials,
            Stage::Merge => settings.merge_geometries,
            Stage::Lod => settings.create_lod,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OptimizationState {
    Idle,
    Running,
    Completed,
    PartiallyCompleted,
    Failed,
}

#[derive(Clone, Debug, PartialEq)]
pub enum StageOutcome {
    Completed,
    Failed(String),
    /// Stopped by cancellation part way through.
    Cancelled,
    /// Not started because the run was cancelled earlier.
    Skipped,
}

#[derive(Clone, Debug)]
pub struct StageReport {
    pub stage: &'static str,
    pub outcome: StageOutcome,
    pub duration: Duration,
}

#[derive(Clone, Debug, Default)]
pub struct OptimizationReport {
    pub stages: Vec<StageReport>,
    pub diagnostics: Vec<Diagnostic>,
    pub released: ReleaseStats,
    pub cancelled: bool,
    /// Totals of the input scene.
    pub before: ModelStats,
    /// Totals of the returned scene.
    pub after: ModelStats,
}

/// The optimized scene and how the run went.
#[derive(Debug)]
pub struct Optimized {
    pub scene: Scene,
    pub state: OptimizationState,
    pub report: OptimizationReport,
}

/// Cloneable flag checked at every yield point of an async run.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Returns `Pending` once so the executor can run other work.
#[derive(Default)]
struct YieldNow {
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            Poll::Ready(())
        } else {
            self.yielded = true;
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    }
}

enum Execution {
    /// One uninterrupted call: no yields, no cancellation.
    Blocking,
    Cooperative(CancellationToken),
}

impl Execution {
    fn is_cancelled(&self) -> bool {
        match self {
            Execution::Blocking => false,
            Execution::Cooperative(token) => token.is_cancelled(),
        }
    }

    async fn yield_now(&self) {
        if let Execution::Cooperative(_) = self {
            YieldNow::default().await;
        }
    }
}

/// Cumulative, non-decreasing progress over the enabled stages.
struct Progress {
    callback: Option<ProgressCallback>,
    total: usize,
    completed: usize,
    last: f32,
}

impl Progress {
    fn new(callback: Option<ProgressCallback>, total: usize) -> Self {
        Self {
            callback,
            total: total.max(1),
            completed: 0,
            last: 0.0,
        }
    }

    fn report(&mut self, stage: &str, fraction: f32) {
        let fraction = fraction.clamp(self.last, 1.0);
        self.last = fraction;
        if let Some(callback) = self.callback.as_mut() {
            callback(stage, fraction);
        }
    }

    /// Progress inside the current stage, `within` in `0..=1`.
    fn within(&mut self, stage: &str, within: f32) {
        let fraction = (self.completed as f32 + within.clamp(0.0, 1.0)) / self.total as f32;
        self.report(stage, fraction);
    }

    fn stage_done(&mut self, stage: &str) {
        self.completed += 1;
        let fraction = self.completed as f32 / self.total as f32;
        self.report(stage, fraction);
    }
}

enum StageEnd {
    Done,
    Cancelled,
}

/// Runs the pipeline and tracks its state.
pub struct OptimizationScheduler {
    state: OptimizationState,
    decimator: Option<Box<dyn Decimator>>,
}

impl Default for OptimizationScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl OptimizationScheduler {
    pub fn new() -> Self {
        Self {
            state: OptimizationState::Idle,
            decimator: None,
        }
    }

    /// Uses `decimator` instead of edge collapse for simplification and LOD.
    pub fn with_decimator(decimator: Box<dyn Decimator>) -> Self {
        Self {
            state: OptimizationState::Idle,
            decimator: Some(decimator),
        }
    }

    pub fn state(&self) -> OptimizationState {
        self.state
    }

    /// Blocking run on the current thread.
    pub fn run_blocking(&mut self, scene: Scene, options: OptimizationOptions) -> Result<Optimized, OptimizeError> {
        futures::executor::block_on(self.execute(scene, options, Execution::Blocking))
    }

    /// Cooperative run that yields between units of work.
    pub async fn run(
        &mut self,
        scene: Scene,
        options: OptimizationOptions,
        cancel: CancellationToken,
    ) -> Result<Optimized, OptimizeError> {
        self.execute(scene, options, Execution::Cooperative(cancel)).await
    }

    async fn execute(
        &mut self,
        mut scene: Scene,
        mut options: OptimizationOptions,
        execution: Execution,
    ) -> Result<Optimized, OptimizeError> {
        self.state = OptimizationState::Running;
        let settings = match options.resolve().and_then(|settings| {
            scene.validate()?;
            Ok(settings)
        }) {
            Ok(settings) => settings,
            Err(err) => {
                log::error!("optimization rejected: {}", err);
                self.state = OptimizationState::Failed;
                return Err(err);
            }
        };
        let fallback = EdgeCollapse::new(settings.min_vertex_floor);
        let decimator: &dyn Decimator = match &self.decimator {
            Some(decimator) => decimator.as_ref(),
            None => &fallback,
        };

        scene.update_world_transforms();
        let stages: Vec<Stage> = Stage::ORDER
            .into_iter()
            .filter(|stage| stage.enabled(&settings))
            .collect();
        let mut progress = Progress::new(options.on_progress.take(), stages.len());
        let mut ctx = OptimizeContext::new();
        let mut report = OptimizationReport {
            before: scene.stats(),
            ..Default::default()
        };
        let mut failed = false;
        let started = Instant::now();
        log::info!(
            "optimizing {} meshes, {} vertices, {} triangles through {} stages",
            report.before.meshes,
            report.before.vertices,
            report.before.triangles,
            stages.len()
        );

        for stage in stages {
            let name = stage.name();
            if report.cancelled || execution.is_cancelled() {
                report.cancelled = true;
                report.stages.push(StageReport {
                    stage: name,
                    outcome: StageOutcome::Skipped,
                    duration: Duration::ZERO,
                });
                continue;
            }

            log::info!("stage {} started", name);
            let stage_started = Instant::now();
            let body = run_stage(stage, &mut scene, &mut ctx, &settings, decimator, &mut progress, &execution);
            let result = match AssertUnwindSafe(body).catch_unwind().await {
                Ok(result) => result,
                Err(payload) => Err(anyhow::anyhow!("panicked: {}", panic_message(payload))),
            };
            let duration = stage_started.elapsed();
            let outcome = match result {
                Ok(StageEnd::Done) => {
                    progress.stage_done(name);
                    log::info!("stage {} finished in {:?}", name, duration);
                    StageOutcome::Completed
                }
                Ok(StageEnd::Cancelled) => {
                    log::info!("stage {} cancelled after {:?}", name, duration);
                    report.cancelled = true;
                    StageOutcome::Cancelled
                }
                Err(err) => {
                    log::warn!("stage {} failed, continuing without it: {:#}", name, err);
                    failed = true;
                    StageOutcome::Failed(format!("{:#}", err))
                }
            };
            report.stages.push(StageReport {
                stage: name,
                outcome,
                duration,
            });
            execution.yield_now().await;
        }

        ctx.released += scene.release_unreferenced();
        scene.update_world_transforms();
        if !report.cancelled {
            progress.report(COMPLETE, 1.0);
        }
        report.diagnostics = ctx.diagnostics;
        report.released = ctx.released;
        report.after = scene.stats();
        self.state = if failed || report.cancelled {
            OptimizationState::PartiallyCompleted
        } else {
            OptimizationState::Completed
        };
        log::info!(
            "optimization {:?} in {:?}: meshes {} -> {}, vertices {} -> {}, triangles {} -> {}, {} diagnostics",
            self.state,
            started.elapsed(),
            report.before.meshes,
            report.after.meshes,
            report.before.vertices,
            report.after.vertices,
            report.before.triangles,
            report.after.triangles,
            report.diagnostics.len()
        );
        Ok(Optimized {
            scene,
            state: self.state,
            report,
        })
    }
}

async fn run_stage(
    stage: Stage,
    scene: &mut Scene,
    ctx: &mut OptimizeContext,
    settings: &Settings,
    decimator: &dyn Decimator,
    progress: &mut Progress,
    execution: &Execution,
) -> anyhow::Result<StageEnd> {
    match stage {
        Stage::Textures => {
            let capped = textures::enforce_budget(scene, ctx, settings.max_texture_size);
            log::debug!("{} textures capped to {}", capped, settings.max_texture_size);
        }
        Stage::Simplify => {
            return simplify_all(scene, ctx, settings, decimator, progress, execution).await;
        }
        Stage::Instancing => {
            instancing::group_and_instance(scene, ctx)?;
        }
        Stage::Materials => {
            materials::consolidate(scene, ctx, settings.aggressive_mode, settings.max_texture_size);
        }
        Stage::Merge => {
            merge::merge(scene, ctx)?;
        }
        Stage::Lod => {
            lod::build_lod(scene, ctx, decimator, &settings.lod_levels)?;
        }
    }
    Ok(StageEnd::Done)
}

/// Decimates each distinct geometry in traversal order, in batches bounded by
/// the frame budget and the batch mesh cap. A single geometry is never
/// interrupted.
async fn simplify_all(
    scene: &mut Scene,
    ctx: &mut OptimizeContext,
    settings: &Settings,
    decimator: &dyn Decimator,
    progress: &mut Progress,
    execution: &Execution,
) -> anyhow::Result<StageEnd> {
    let mut queue: Vec<(GeometryId, String)> = Vec::new();
    for id in scene.traverse() {
        let Some(node) = scene.node(id) else {
            continue;
        };
        let geometry = match &node.kind {
            NodeKind::Mesh(mesh) => mesh.geometry,
            NodeKind::Instanced(instanced) => instanced.geometry,
            NodeKind::Group | NodeKind::Lod(_) => continue,
        };
        if !queue.iter().any(|(queued, _)| *queued == geometry) {
            queue.push((geometry, node.name.clone()));
        }
    }

    let total = queue.len();
    let mut batch_started = Instant::now();
    let mut in_batch = 0;
    for (done, (geometry, subject)) in queue.into_iter().enumerate() {
        decimate::simplify_shared(scene, ctx, decimator, geometry, settings.simplification_ratio, &subject);
        progress.within(decimate::STAGE, (done + 1) as f32 / total as f32);
        in_batch += 1;
        let batch_full =
            in_batch >= settings.max_batch_meshes || batch_started.elapsed() >= settings.frame_budget;
        if done + 1 < total && batch_full {
            execution.yield_now().await;
            if execution.is_cancelled() {
                return Ok(StageEnd::Cancelled);
            }
            batch_started = Instant::now();
            in_batch = 0;
        }
    }
    Ok(StageEnd::Done)
}

/// Runs the whole pipeline in one blocking call.
pub fn optimize(scene: Scene, options: OptimizationOptions) -> Result<Optimized, OptimizeError> {
    OptimizationScheduler::new().run_blocking(scene, options)
}

/// Runs the pipeline cooperatively; `cancel` is checked between stages and
/// between decimation batches.
pub async fn optimize_async(
    scene: Scene,
    options: OptimizationOptions,
    cancel: CancellationToken,
) -> Result<Optimized, OptimizeError> {
    OptimizationScheduler::new().run(scene, options, cancel).await
}

/// Runs the blocking pipeline on a tokio blocking worker.
#[cfg(not(target_arch = "wasm32"))]
pub async fn spawn_optimize(scene: Scene, options: OptimizationOptions) -> Result<Optimized, OptimizeError> {
    match tokio::task::spawn_blocking(move || optimize(scene, options)).await {
        Ok(result) => result,
        Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
        Err(err) => Err(OptimizeError::Interrupted(err.to_string())),
    }
}
