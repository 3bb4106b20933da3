//! Vertex and index buffers on the CPU side.
//!
//! A [`Geometry`] is a set of named, flat `f32` attributes sharing one vertex
//! count, plus an optional triangle-list index buffer.

use std::collections::BTreeMap;

use cgmath::{InnerSpace, Matrix4, Point3, Transform, Vector3};

use crate::{data_structures::instance::normal_matrix, error::GeometryError};

/// Attribute names understood by the pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AttributeKind {
    Position,
    Normal,
    Uv,
    Color,
}

impl AttributeKind {
    pub fn name(&self) -> &'static str {
        match self {
            AttributeKind::Position => "position",
            AttributeKind::Normal => "normal",
            AttributeKind::Uv => "uv",
            AttributeKind::Color => "color",
        }
    }
}

/// One vertex attribute: `data.len() == vertex_count * item_size`.
#[derive(Clone, Debug, PartialEq)]
pub struct Attribute {
    pub data: Vec<f32>,
    pub item_size: usize,
}

impl Attribute {
    pub fn new(data: Vec<f32>, item_size: usize) -> Self {
        Self { data, item_size }
    }

    pub fn count(&self) -> usize {
        if self.item_size == 0 {
            0
        } else {
            self.data.len() / self.item_size
        }
    }

    pub fn get(&self, vertex: usize) -> &[f32] {
        &self.data[vertex * self.item_size..(vertex + 1) * self.item_size]
    }
}

/// Axis-aligned bounding box.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    pub min: [f32; 3],
    pub max: [f32; 3],
}

impl Aabb {
    pub fn center(&self) -> [f32; 3] {
        [
            (self.min[0] + self.max[0]) * 0.5,
            (self.min[1] + self.max[1]) * 0.5,
            (self.min[2] + self.max[2]) * 0.5,
        ]
    }

    pub fn size(&self) -> [f32; 3] {
        [
            self.max[0] - self.min[0],
            self.max[1] - self.min[1],
            self.max[2] - self.min[2],
        ]
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Geometry {
    pub name: String,
    attributes: BTreeMap<AttributeKind, Attribute>,
    indices: Option<Vec<u32>>,
    bounds: Option<Aabb>,
}

impl Geometry {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn with_attribute(mut self, kind: AttributeKind, data: Vec<f32>, item_size: usize) -> Self {
        self.set_attribute(kind, Attribute::new(data, item_size));
        self
    }

    pub fn with_indices(mut self, indices: Vec<u32>) -> Self {
        self.indices = Some(indices);
        self
    }

    pub fn set_attribute(&mut self, kind: AttributeKind, attribute: Attribute) {
        self.attributes.insert(kind, attribute);
        if kind == AttributeKind::Position {
            self.compute_bounds();
        }
    }

    pub fn remove_attribute(&mut self, kind: AttributeKind) -> Option<Attribute> {
        self.attributes.remove(&kind)
    }

    pub fn attribute(&self, kind: AttributeKind) -> Option<&Attribute> {
        self.attributes.get(&kind)
    }

    pub fn attributes(&self) -> impl Iterator<Item = (AttributeKind, &Attribute)> {
        self.attributes.iter().map(|(kind, attribute)| (*kind, attribute))
    }

    pub fn set_indices(&mut self, indices: Option<Vec<u32>>) {
        self.indices = indices;
    }

    pub fn indices(&self) -> Option<&[u32]> {
        self.indices.as_deref()
    }

    pub fn is_indexed(&self) -> bool {
        self.indices.is_some()
    }

    pub fn vertex_count(&self) -> usize {
        self.attribute(AttributeKind::Position)
            .map(Attribute::count)
            .unwrap_or(0)
    }

    pub fn triangle_count(&self) -> usize {
        match &self.indices {
            Some(indices) => indices.len() / 3,
            None => self.vertex_count() / 3,
        }
    }

    pub fn bounds(&self) -> Option<Aabb> {
        self.bounds
    }

    /// Index buffer, or the implicit `0..n` list of a non-indexed triangle soup.
    pub fn indices_or_sequential(&self) -> Vec<u32> {
        match &self.indices {
            Some(indices) => indices.clone(),
            None => (0..self.vertex_count() as u32).collect(),
        }
    }

    pub fn compute_bounds(&mut self) -> Option<Aabb> {
        let positions = self.attribute(AttributeKind::Position)?;
        if positions.item_size < 3 || positions.count() == 0 {
            self.bounds = None;
            return None;
        }
        let mut min = [f32::MAX; 3];
        let mut max = [f32::MIN; 3];
        for vertex in positions.data.chunks(positions.item_size) {
            for axis in 0..3 {
                min[axis] = min[axis].min(vertex[axis]);
                max[axis] = max[axis].max(vertex[axis]);
            }
        }
        self.bounds = Some(Aabb { min, max });
        self.bounds
    }

    /// Checks that all attributes agree on the vertex count and that every
    /// index addresses an existing vertex.
    pub fn validate(&self) -> Result<(), GeometryError> {
        let positions = self
            .attribute(AttributeKind::Position)
            .ok_or(GeometryError::MissingPositions)?;
        let expected = positions.count();
        for (kind, attribute) in self.attributes() {
            if attribute.item_size == 0 || attribute.data.len() % attribute.item_size != 0 {
                return Err(GeometryError::RaggedAttribute {
                    attribute: kind.name(),
                    item_size: attribute.item_size,
                    len: attribute.data.len(),
                });
            }
            if attribute.count() != expected {
                return Err(GeometryError::AttributeCountMismatch {
                    attribute: kind.name(),
                    expected,
                    found: attribute.count(),
                });
            }
        }
        if let Some(indices) = &self.indices {
            if indices.len() % 3 != 0 {
                return Err(GeometryError::IndexCount(indices.len()));
            }
            if let Some(&index) = indices.iter().find(|&&i| i as usize >= expected) {
                return Err(GeometryError::IndexOutOfRange {
                    index,
                    vertex_count: expected,
                });
            }
        }
        Ok(())
    }

    /// Bakes `matrix` into positions (as points) and normals (through the
    /// normal matrix, renormalized).
    pub fn apply_matrix(&mut self, matrix: &Matrix4<f32>) {
        if let Some(positions) = self.attributes.get_mut(&AttributeKind::Position) {
            let item_size = positions.item_size;
            if item_size >= 3 {
                for vertex in positions.data.chunks_mut(item_size) {
                    let p = matrix.transform_point(Point3::new(vertex[0], vertex[1], vertex[2]));
                    vertex[..3].copy_from_slice(&[p.x, p.y, p.z]);
                }
            }
        }
        if let Some(normals) = self.attributes.get_mut(&AttributeKind::Normal) {
            let item_size = normals.item_size;
            if item_size >= 3 {
                let normal_matrix = normal_matrix(matrix);
                for vertex in normals.data.chunks_mut(item_size) {
                    let n = normal_matrix * Vector3::new(vertex[0], vertex[1], vertex[2]);
                    let n = if n.magnitude2() > 0.0 { n.normalize() } else { n };
                    vertex[..3].copy_from_slice(&[n.x, n.y, n.z]);
                }
            }
        }
        self.compute_bounds();
    }

    /// An axis-aligned box centred at the origin with 24 vertices (4 per face,
    /// so normals and uvs stay flat per face) and 12 triangles.
    pub fn cuboid(name: &str, width: f32, height: f32, depth: f32) -> Self {
        let (hx, hy, hz) = (width * 0.5, height * 0.5, depth * 0.5);
        // (normal, u axis, v axis) per face
        let faces: [([f32; 3], [f32; 3], [f32; 3]); 6] = [
            ([1.0, 0.0, 0.0], [0.0, 0.0, -1.0], [0.0, 1.0, 0.0]),
            ([-1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 0.0]),
            ([0.0, 1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, -1.0]),
            ([0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]),
            ([0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
            ([0.0, 0.0, -1.0], [-1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
        ];
        let half = [hx, hy, hz];
        let mut positions = Vec::with_capacity(72);
        let mut normals = Vec::with_capacity(72);
        let mut uvs = Vec::with_capacity(48);
        let mut indices = Vec::with_capacity(36);
        for (face, (n, u, v)) in faces.iter().enumerate() {
            for (su, sv) in [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)] {
                for axis in 0..3 {
                    positions.push((n[axis] + u[axis] * su + v[axis] * sv) * half[axis]);
                }
                normals.extend_from_slice(n);
                uvs.extend_from_slice(&[(su + 1.0) * 0.5, (sv + 1.0) * 0.5]);
            }
            let base = face as u32 * 4;
            indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }
        Geometry::new(name)
            .with_attribute(AttributeKind::Position, positions, 3)
            .with_attribute(AttributeKind::Normal, normals, 3)
            .with_attribute(AttributeKind::Uv, uvs, 2)
            .with_indices(indices)
    }

    /// A flat grid in the XZ plane with `(columns + 1) * (rows + 1)` vertices.
    pub fn plane(name: &str, width: f32, depth: f32, columns: u32, rows: u32) -> Self {
        let columns = columns.max(1);
        let rows = rows.max(1);
        let mut positions = Vec::new();
        let mut normals = Vec::new();
        let mut uvs = Vec::new();
        for row in 0..=rows {
            for column in 0..=columns {
                let u = column as f32 / columns as f32;
                let v = row as f32 / rows as f32;
                positions.extend_from_slice(&[(u - 0.5) * width, 0.0, (v - 0.5) * depth]);
                normals.extend_from_slice(&[0.0, 1.0, 0.0]);
                uvs.extend_from_slice(&[u, v]);
            }
        }
        let stride = columns + 1;
        let mut indices = Vec::new();
        for row in 0..rows {
            for column in 0..columns {
                let a = row * stride + column;
                let b = a + 1;
                let c = a + stride;
                let d = c + 1;
                indices.extend_from_slice(&[a, c, b, b, c, d]);
            }
        }
        Geometry::new(name)
            .with_attribute(AttributeKind::Position, positions, 3)
            .with_attribute(AttributeKind::Normal, normals, 3)
            .with_attribute(AttributeKind::Uv, uvs, 2)
            .with_indices(indices)
    }

    /// A closed sphere: one vertex per pole plus `segments * (rings - 1)`
    /// ring vertices.
    pub fn uv_sphere(name: &str, radius: f32, segments: u32, rings: u32) -> Self {
        let segments = segments.max(3);
        let rings = rings.max(2);
        let mut positions = vec![0.0, radius, 0.0];
        let mut normals = vec![0.0, 1.0, 0.0];
        let mut uvs = vec![0.5, 0.0];
        for ring in 1..rings {
            let theta = std::f32::consts::PI * ring as f32 / rings as f32;
            for segment in 0..segments {
                let phi = 2.0 * std::f32::consts::PI * segment as f32 / segments as f32;
                let n = [theta.sin() * phi.cos(), theta.cos(), theta.sin() * phi.sin()];
                positions.extend_from_slice(&[n[0] * radius, n[1] * radius, n[2] * radius]);
                normals.extend_from_slice(&n);
                uvs.extend_from_slice(&[segment as f32 / segments as f32, ring as f32 / rings as f32]);
            }
        }
        let south = 1 + (rings - 1) * segments;
        positions.extend_from_slice(&[0.0, -radius, 0.0]);
        normals.extend_from_slice(&[0.0, -1.0, 0.0]);
        uvs.extend_from_slice(&[0.5, 1.0]);

        let ring_vertex = |ring: u32, segment: u32| 1 + (ring - 1) * segments + segment % segments;
        let mut indices = Vec::new();
        for segment in 0..segments {
            indices.extend_from_slice(&[0, ring_vertex(1, segment + 1), ring_vertex(1, segment)]);
        }
        for ring in 1..rings - 1 {
            for segment in 0..segments {
                let a = ring_vertex(ring, segment);
                let b = ring_vertex(ring, segment + 1);
                let c = ring_vertex(ring + 1, segment);
                let d = ring_vertex(ring + 1, segment + 1);
                indices.extend_from_slice(&[a, b, c, b, d, c]);
            }
        }
        for segment in 0..segments {
            indices.extend_from_slice(&[
                south,
                ring_vertex(rings - 1, segment),
                ring_vertex(rings - 1, segment + 1),
            ]);
        }
        Geometry::new(name)
            .with_attribute(AttributeKind::Position, positions, 3)
            .with_attribute(AttributeKind::Normal, normals, 3)
            .with_attribute(AttributeKind::Uv, uvs, 2)
            .with_indices(indices)
    }
}

/// Result of concatenating several geometries.
#[derive(Debug)]
pub struct MergedGeometry {
    pub geometry: Geometry,
    /// Attributes dropped because at least one part lacked them.
    pub excluded: Vec<AttributeKind>,
}

/// Concatenates `parts` attribute by attribute, offsetting each part's
/// indices by the number of vertices before it.
///
/// Only attributes present in every part survive; positions are mandatory.
/// The result is indexed whenever any part is (non-indexed parts get their
/// implicit sequential indices).
pub fn merge_geometries(name: &str, parts: &[Geometry]) -> Result<MergedGeometry, GeometryError> {
    let first = parts.first().ok_or(GeometryError::Empty)?;
    for part in parts {
        part.validate()?;
    }

    let mut kept = Vec::new();
    let mut excluded = Vec::new();
    for (kind, attribute) in first.attributes() {
        let mut present_everywhere = true;
        for part in &parts[1..] {
            match part.attribute(kind) {
                Some(other) if other.item_size == attribute.item_size => {}
                Some(other) if kind == AttributeKind::Position => {
                    return Err(GeometryError::InconsistentItemSize {
                        attribute: kind.name(),
                        expected: attribute.item_size,
                        found: other.item_size,
                    });
                }
                _ => present_everywhere = false,
            }
        }
        if present_everywhere {
            kept.push((kind, attribute.item_size));
        } else {
            excluded.push(kind);
        }
    }
    for part in &parts[1..] {
        for (kind, _) in part.attributes() {
            if first.attribute(kind).is_none() && !excluded.contains(&kind) {
                excluded.push(kind);
            }
        }
    }

    let total_vertices: usize = parts.iter().map(Geometry::vertex_count).sum();
    let indexed = parts.iter().any(Geometry::is_indexed);
    let mut merged = Geometry::new(name);
    for (kind, item_size) in kept {
        let mut data = Vec::with_capacity(total_vertices * item_size);
        for part in parts {
            if let Some(attribute) = part.attribute(kind) {
                data.extend_from_slice(&attribute.data);
            }
        }
        merged.set_attribute(kind, Attribute::new(data, item_size));
    }
    if indexed {
        let total_indices: usize = parts.iter().map(|p| p.triangle_count() * 3).sum();
        let mut indices = Vec::with_capacity(total_indices);
        let mut vertex_offset = 0u32;
        for part in parts {
            indices.extend(part.indices_or_sequential().iter().map(|&i| i + vertex_offset));
            vertex_offset += part.vertex_count() as u32;
        }
        merged.set_indices(Some(indices));
    }
    merged.compute_bounds();
    Ok(MergedGeometry {
        geometry: merged,
        excluded,
    })
}
