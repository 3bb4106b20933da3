//! Mesh decimation using edge collapse with quadric error metrics.
//!
//! Every vertex accumulates the planes of its faces (weighted by area) and,
//! along open edges, a perpendicular constraint plane so borders keep their
//! outline. Edges are collapsed cheapest first; equal costs go to the shorter
//! edge and then to the lowest vertex indices, so flat regions thin out evenly
//! and results are reproducible.

use std::{
    cmp::{Ordering, Reverse},
    collections::{BTreeSet, BinaryHeap, HashMap},
    ops::AddAssign,
    panic::{self, AssertUnwindSafe},
};

use cgmath::{InnerSpace, Vector3};

use crate::{
    context::{OptimizeContext, panic_message},
    data_structures::{
        geometry::{Attribute, AttributeKind, Geometry},
        scene_graph::{GeometryId, Scene},
    },
    error::{DecimateError, GeometryError},
};

/// Stage name used in progress reports and diagnostics.
pub const STAGE: &str = "simplify";

/// Vertex floor below which no mesh is reduced.
pub const DEFAULT_MIN_VERTICES: usize = 50;

const BOUNDARY_WEIGHT: f64 = 100.0;

/// A strategy that reduces a geometry to (about) a vertex budget.
///
/// Implementations must return geometry with at most as many vertices as the
/// input and at least `max(floor, target)`, with every index in range.
pub trait Decimator: Send + Sync {
    fn simplify(&self, geometry: &Geometry, target_vertices: usize) -> Result<Geometry, DecimateError>;
}

/// Quadric edge-collapse decimation.
#[derive(Clone, Copy, Debug)]
pub struct EdgeCollapse {
    pub min_vertices: usize,
}

impl Default for EdgeCollapse {
    fn default() -> Self {
        Self {
            min_vertices: DEFAULT_MIN_VERTICES,
        }
    }
}

impl EdgeCollapse {
    pub fn new(min_vertices: usize) -> Self {
        Self { min_vertices }
    }
}

/// `floor(n * (1 - ratio))`, the vertex budget for removing `ratio` of `n`.
pub fn target_vertex_count(vertex_count: usize, ratio: f32) -> usize {
    let keep = 1.0 - f64::from(ratio.clamp(0.0, 1.0));
    (vertex_count as f64 * keep).floor() as usize
}

impl Decimator for EdgeCollapse {
    fn simplify(&self, geometry: &Geometry, target_vertices: usize) -> Result<Geometry, DecimateError> {
        if !geometry.is_indexed() {
            return Err(DecimateError::NonIndexed);
        }
        geometry.validate()?;
        let vertex_count = geometry.vertex_count();
        let target = target_vertices.max(self.min_vertices).max(1);
        if target >= vertex_count {
            return Ok(geometry.clone());
        }

        let mut mesh = WorkingMesh::new(geometry)?;
        let mut heap = BinaryHeap::new();
        loop {
            // (re)seed with every live edge; candidates rejected earlier may
            // have become valid after collapses elsewhere
            heap.clear();
            for (a, b) in mesh.edges() {
                heap.push(Reverse(mesh.candidate(a, b)));
            }
            let before = mesh.alive;
            while mesh.alive > target {
                let Some(Reverse(candidate)) = heap.pop() else {
                    break;
                };
                if !mesh.is_current(&candidate) || !mesh.can_collapse(&candidate) {
                    continue;
                }
                mesh.collapse(&candidate);
                let keep = candidate.keep;
                for neighbor in mesh.neighbors(keep) {
                    let (a, b) = if keep < neighbor { (keep, neighbor) } else { (neighbor, keep) };
                    heap.push(Reverse(mesh.candidate(a, b)));
                }
            }
            if mesh.alive <= target || mesh.alive == before {
                break;
            }
        }
        log::debug!(
            "decimated {} from {} to {} vertices (target {})",
            geometry.name,
            vertex_count,
            mesh.alive,
            target
        );
        Ok(mesh.into_geometry(geometry))
    }
}

/// Symmetric 4x4 error matrix stored as its upper triangle.
#[derive(Clone, Copy, Debug, Default)]
struct Quadric([f64; 10]);

impl Quadric {
    fn from_plane(normal: Vector3<f64>, d: f64, weight: f64) -> Self {
        let Vector3 { x: a, y: b, z: c } = normal;
        Self([a * a, a * b, a * c, a * d, b * b, b * c, b * d, c * c, c * d, d * d].map(|v| v * weight))
    }

    fn error(&self, p: Vector3<f64>) -> f64 {
        let q = &self.0;
        let Vector3 { x, y, z } = p;
        q[0] * x * x + 2.0 * q[1] * x * y + 2.0 * q[2] * x * z + 2.0 * q[3] * x
            + q[4] * y * y + 2.0 * q[5] * y * z + 2.0 * q[6] * y
            + q[7] * z * z + 2.0 * q[8] * z
            + q[9]
    }
}

impl AddAssign for Quadric {
    fn add_assign(&mut self, other: Self) {
        for (lhs, rhs) in self.0.iter_mut().zip(other.0) {
            *lhs += rhs;
        }
    }
}

/// Where the surviving vertex of a collapse ends up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Placement {
    Keep,
    Removed,
    Midpoint,
}

impl Placement {
    fn t(self) -> f64 {
        match self {
            Placement::Keep => 0.0,
            Placement::Removed => 1.0,
            Placement::Midpoint => 0.5,
        }
    }
}

/// Collapse of `remove` into `keep` (`keep < remove`).
#[derive(Clone, Copy, Debug)]
struct Candidate {
    error: f64,
    length2: f64,
    keep: u32,
    remove: u32,
    stamps: (u32, u32),
    placement: Placement,
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.error
            .total_cmp(&other.error)
            .then(self.length2.total_cmp(&other.length2))
            .then(self.keep.cmp(&other.keep))
            .then(self.remove.cmp(&other.remove))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

struct WorkingMesh {
    positions: Vec<Vector3<f64>>,
    attributes: Vec<(AttributeKind, Attribute)>,
    triangles: Vec<[u32; 3]>,
    triangle_alive: Vec<bool>,
    vertex_triangles: Vec<Vec<usize>>,
    vertex_alive: Vec<bool>,
    boundary: Vec<bool>,
    quadrics: Vec<Quadric>,
    stamps: Vec<u32>,
    alive: usize,
}

impl WorkingMesh {
    fn new(geometry: &Geometry) -> Result<Self, DecimateError> {
        let positions = geometry
            .attribute(AttributeKind::Position)
            .ok_or(GeometryError::MissingPositions)?;
        if positions.item_size != 3 {
            return Err(GeometryError::InconsistentItemSize {
                attribute: AttributeKind::Position.name(),
                expected: 3,
                found: positions.item_size,
            }
            .into());
        }
        let positions: Vec<Vector3<f64>> = positions
            .data
            .chunks(3)
            .map(|p| Vector3::new(f64::from(p[0]), f64::from(p[1]), f64::from(p[2])))
            .collect();
        let vertex_count = positions.len();

        let triangles: Vec<[u32; 3]> = geometry
            .indices()
            .unwrap_or_default()
            .chunks(3)
            .map(|t| [t[0], t[1], t[2]])
            .collect();
        let mut triangle_alive = vec![true; triangles.len()];
        let mut vertex_triangles = vec![Vec::new(); vertex_count];
        let mut quadrics = vec![Quadric::default(); vertex_count];
        let mut edge_faces: HashMap<(u32, u32), Vec<usize>> = HashMap::new();

        for (index, triangle) in triangles.iter().enumerate() {
            let [a, b, c] = *triangle;
            if a == b || b == c || a == c {
                triangle_alive[index] = false;
                continue;
            }
            for &v in triangle {
                vertex_triangles[v as usize].push(index);
            }
            for (u, v) in [(a, b), (b, c), (c, a)] {
                edge_faces.entry((u.min(v), u.max(v))).or_default().push(index);
            }
            let [pa, pb, pc] = triangle.map(|v| positions[v as usize]);
            let normal = (pb - pa).cross(pc - pa);
            let double_area = normal.magnitude();
            if double_area <= f64::EPSILON {
                continue;
            }
            let unit = normal / double_area;
            let plane = Quadric::from_plane(unit, -unit.dot(pa), double_area * 0.5);
            for &v in triangle {
                quadrics[v as usize] += plane;
            }
        }

        let mut boundary = vec![false; vertex_count];
        let mut open_edges: Vec<_> = edge_faces.into_iter().filter(|(_, faces)| faces.len() != 2).collect();
        open_edges.sort_unstable_by_key(|(edge, _)| *edge);
        for ((u, v), faces) in open_edges {
            boundary[u as usize] = true;
            boundary[v as usize] = true;
            let [pa, pb, pc] = triangles[faces[0]].map(|v| positions[v as usize]);
            let face_normal = (pb - pa).cross(pc - pa);
            let edge = positions[v as usize] - positions[u as usize];
            let perpendicular = edge.cross(face_normal);
            if perpendicular.magnitude2() <= f64::EPSILON {
                continue;
            }
            let perpendicular = perpendicular.normalize();
            let d = -perpendicular.dot(positions[u as usize]);
            let plane = Quadric::from_plane(perpendicular, d, BOUNDARY_WEIGHT * edge.magnitude2());
            quadrics[u as usize] += plane;
            quadrics[v as usize] += plane;
        }

        Ok(Self {
            positions,
            attributes: geometry.attributes().map(|(kind, a)| (kind, a.clone())).collect(),
            triangles,
            triangle_alive,
            vertex_triangles,
            vertex_alive: vec![true; vertex_count],
            boundary,
            quadrics,
            stamps: vec![0; vertex_count],
            alive: vertex_count,
        })
    }

    fn live_triangles(&self, v: u32) -> impl Iterator<Item = usize> + '_ {
        self.vertex_triangles[v as usize]
            .iter()
            .copied()
            .filter(|&t| self.triangle_alive[t])
    }

    fn neighbors(&self, v: u32) -> BTreeSet<u32> {
        self.live_triangles(v)
            .flat_map(|t| self.triangles[t])
            .filter(|&other| other != v)
            .collect()
    }

    /// Vertices adjacent to both `a` and `b`.
    fn common_neighbors(&self, a: u32, b: u32) -> usize {
        let around_a = self.neighbors(a);
        self.live_triangles(b)
            .flat_map(|t| self.triangles[t])
            .filter(|v| *v != b && around_a.contains(v))
            .collect::<BTreeSet<_>>()
            .len()
    }

    fn edges(&self) -> BTreeSet<(u32, u32)> {
        let mut edges = BTreeSet::new();
        for (triangle, _) in self.triangles.iter().zip(&self.triangle_alive).filter(|(_, alive)| **alive) {
            let [a, b, c] = *triangle;
            for (u, v) in [(a, b), (b, c), (c, a)] {
                edges.insert((u.min(v), u.max(v)));
            }
        }
        edges
    }

    fn candidate(&self, keep: u32, remove: u32) -> Candidate {
        let mut quadric = self.quadrics[keep as usize];
        quadric += self.quadrics[remove as usize];
        let (pa, pb) = (self.positions[keep as usize], self.positions[remove as usize]);
        let (error, placement) = [Placement::Keep, Placement::Removed, Placement::Midpoint]
            .into_iter()
            .map(|placement| (quadric.error(pa + (pb - pa) * placement.t()), placement))
            .min_by(|(a, _), (b, _)| a.total_cmp(b))
            .unwrap_or((0.0, Placement::Keep));
        Candidate {
            error,
            length2: (pb - pa).magnitude2(),
            keep,
            remove,
            stamps: (self.stamps[keep as usize], self.stamps[remove as usize]),
            placement,
        }
    }

    fn is_current(&self, candidate: &Candidate) -> bool {
        let (keep, remove) = (candidate.keep as usize, candidate.remove as usize);
        self.vertex_alive[keep]
            && self.vertex_alive[remove]
            && candidate.stamps == (self.stamps[keep], self.stamps[remove])
    }

    /// Link condition plus a normal-flip test on every face that survives.
    fn can_collapse(&self, candidate: &Candidate) -> bool {
        let (a, b) = (candidate.keep, candidate.remove);
        let shared: Vec<usize> = self
            .live_triangles(a)
            .filter(|&t| self.triangles[t].contains(&b))
            .collect();
        if shared.is_empty() {
            return false;
        }
        // an interior edge between two border vertices would pinch the mesh
        if shared.len() == 2 && self.boundary[a as usize] && self.boundary[b as usize] {
            return false;
        }
        if self.common_neighbors(a, b) != shared.len() {
            return false;
        }

        let (pa, pb) = (self.positions[a as usize], self.positions[b as usize]);
        let target = pa + (pb - pa) * candidate.placement.t();
        for t in self.live_triangles(a).chain(self.live_triangles(b)) {
            let corners = self.triangles[t];
            if corners.contains(&a) && corners.contains(&b) {
                continue;
            }
            let before = corners.map(|v| self.positions[v as usize]);
            let after = corners.map(|v| if v == a || v == b { target } else { self.positions[v as usize] });
            let n_before = (before[1] - before[0]).cross(before[2] - before[0]);
            let n_after = (after[1] - after[0]).cross(after[2] - after[0]);
            if n_before.magnitude2() > f64::EPSILON && n_before.dot(n_after) <= 0.0 {
                return false;
            }
        }
        true
    }

    fn collapse(&mut self, candidate: &Candidate) {
        let (a, b) = (candidate.keep, candidate.remove);
        let t = candidate.placement.t();
        let (pa, pb) = (self.positions[a as usize], self.positions[b as usize]);
        self.positions[a as usize] = pa + (pb - pa) * t;

        for (kind, attribute) in &mut self.attributes {
            let size = attribute.item_size;
            let (ka, kb) = (a as usize * size, b as usize * size);
            for k in 0..size {
                let (va, vb) = (attribute.data[ka + k], attribute.data[kb + k]);
                attribute.data[ka + k] = va + (vb - va) * t as f32;
            }
            if *kind == AttributeKind::Normal && size >= 3 {
                let n = &mut attribute.data[ka..ka + 3];
                let length = (n[0] * n[0] + n[1] * n[1] + n[2] * n[2]).sqrt();
                if length > f32::EPSILON {
                    n.iter_mut().for_each(|c| *c /= length);
                }
            }
        }

        let removed_quadric = self.quadrics[b as usize];
        self.quadrics[a as usize] += removed_quadric;

        for t in std::mem::take(&mut self.vertex_triangles[b as usize]) {
            if !self.triangle_alive[t] {
                continue;
            }
            let corners = &mut self.triangles[t];
            if corners.contains(&a) {
                self.triangle_alive[t] = false;
            } else {
                corners.iter_mut().filter(|v| **v == b).for_each(|v| *v = a);
                self.vertex_triangles[a as usize].push(t);
            }
        }
        let alive = &self.triangle_alive;
        self.vertex_triangles[a as usize].retain(|&t| alive[t]);

        self.vertex_alive[b as usize] = false;
        self.boundary[a as usize] |= self.boundary[b as usize];
        self.stamps[a as usize] += 1;
        self.stamps[b as usize] += 1;
        self.alive -= 1;
    }

    /// Drops collapsed vertices and dead faces; surviving vertices keep their
    /// relative order.
    fn into_geometry(self, source: &Geometry) -> Geometry {
        let mut remap = vec![u32::MAX; self.vertex_alive.len()];
        let mut next = 0u32;
        for (old, alive) in self.vertex_alive.iter().enumerate() {
            if *alive {
                remap[old] = next;
                next += 1;
            }
        }
        let mut geometry = Geometry::new(&source.name);
        for (kind, attribute) in self.attributes {
            let size = attribute.item_size;
            let data = attribute
                .data
                .chunks(size)
                .zip(&self.vertex_alive)
                .filter(|(_, alive)| **alive)
                .flat_map(|(vertex, _)| vertex.iter().copied())
                .collect();
            geometry.set_attribute(kind, Attribute::new(data, size));
        }
        let indices = self
            .triangles
            .iter()
            .zip(&self.triangle_alive)
            .filter(|(_, alive)| **alive)
            .flat_map(|(triangle, _)| triangle.map(|v| remap[v as usize]))
            .collect();
        geometry.set_indices(Some(indices));
        geometry.compute_bounds();
        geometry
    }
}

/// Runs `decimator`, reporting a panic as an error message.
fn guarded_simplify(decimator: &dyn Decimator, geometry: &Geometry, target: usize) -> Result<Geometry, String> {
    match panic::catch_unwind(AssertUnwindSafe(|| decimator.simplify(geometry, target))) {
        Ok(result) => result.map_err(|err| err.to_string()),
        Err(payload) => Err(format!("decimator panicked: {}", panic_message(payload))),
    }
}

/// Decimates the geometry `id` in place, once per pass. Failures (including a
/// panicking decimator) leave the original untouched and are recorded against
/// `subject`.
pub fn simplify_shared(
    scene: &mut Scene,
    ctx: &mut OptimizeContext,
    decimator: &dyn Decimator,
    id: GeometryId,
    ratio: f32,
    subject: &str,
) {
    if !ctx.decimated_geometries.insert(id) {
        return;
    }
    let Some(geometry) = scene.geometry(id) else {
        return;
    };
    let target = target_vertex_count(geometry.vertex_count(), ratio);
    match guarded_simplify(decimator, geometry, target) {
        Ok(simplified) if simplified.vertex_count() < geometry.vertex_count() => {
            // the previous buffers are dropped here
            scene.replace_geometry(id, simplified);
        }
        Ok(_) => {}
        Err(err) => ctx.diagnose(STAGE, subject, err),
    }
}

/// Decimated copy of `id` as a new arena entry, for building coarser levels
/// without touching the source. Returns `id` itself when nothing changed.
pub fn simplified_copy(
    scene: &mut Scene,
    ctx: &mut OptimizeContext,
    decimator: &dyn Decimator,
    id: GeometryId,
    ratio: f32,
    stage: &'static str,
) -> GeometryId {
    let Some(geometry) = scene.geometry(id) else {
        return id;
    };
    let target = target_vertex_count(geometry.vertex_count(), ratio);
    match guarded_simplify(decimator, geometry, target) {
        Ok(simplified) if simplified.vertex_count() < geometry.vertex_count() => scene.add_geometry(simplified),
        Ok(_) => id,
        Err(err) => {
            let subject = geometry.name.clone();
            ctx.diagnose(stage, subject, err);
            id
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_is_floor_of_kept_fraction() {
        assert_eq!(target_vertex_count(1000, 0.5), 500);
        assert_eq!(target_vertex_count(999, 0.5), 499);
        assert_eq!(target_vertex_count(10, 0.0), 10);
        assert_eq!(target_vertex_count(10, 1.5), 0);
    }

    #[test]
    fn quadric_of_plane_measures_squared_distance() {
        let q = Quadric::from_plane(Vector3::new(0.0, 1.0, 0.0), -2.0, 1.0);
        assert!((q.error(Vector3::new(5.0, 2.0, -3.0))).abs() < 1e-12);
        assert!((q.error(Vector3::new(0.0, 5.0, 0.0)) - 9.0).abs() < 1e-12);
    }

    #[test]
    fn equal_errors_order_by_length_then_lowest_index() {
        let candidate = |keep, remove, length2| Candidate {
            error: 0.0,
            length2,
            keep,
            remove,
            stamps: (0, 0),
            placement: Placement::Keep,
        };
        let mut heap = BinaryHeap::new();
        heap.push(Reverse(candidate(4, 9, 1.0)));
        heap.push(Reverse(candidate(1, 7, 1.0)));
        heap.push(Reverse(candidate(1, 3, 1.0)));
        heap.push(Reverse(candidate(0, 2, 2.0)));
        let order: Vec<_> = std::iter::from_fn(|| heap.pop())
            .map(|Reverse(c)| (c.keep, c.remove))
            .collect();
        assert_eq!(order, [(1, 3), (1, 7), (4, 9), (0, 2)]);
    }
}
