//! Scene graph and hierarchical scene organization.
//!
//! A [`Scene`] is an arena: it owns every node, geometry, material and
//! texture, and hands out small copyable ids. Sharing a geometry or material
//! between meshes means holding the same id. Anything the pipeline stops
//! referencing is dropped by [`Scene::release_unreferenced`].

use std::{
    collections::{BTreeMap, BTreeSet, HashSet},
    fmt,
    ops::AddAssign,
};

use cgmath::{Matrix4, One, SquareMatrix};

use crate::{
    data_structures::{
        geometry::Geometry,
        instance::{Instance, InstanceRaw},
        material::Material,
        texture::Texture,
    },
    error::OptimizeError,
};

macro_rules! arena_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(u32);

        impl $name {
            pub fn index(&self) -> u32 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

arena_id!(NodeId);
arena_id!(GeometryId);
arena_id!(MaterialId);
arena_id!(TextureId);

/// A drawable: one geometry with one material.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MeshRef {
    pub geometry: GeometryId,
    pub material: MaterialId,
}

/// One geometry and material drawn once per transform.
#[derive(Clone, Debug, PartialEq)]
pub struct InstancedMesh {
    pub geometry: GeometryId,
    pub material: MaterialId,
    /// Per-instance matrices relative to the parent node.
    pub transforms: Vec<Matrix4<f32>>,
}

impl InstancedMesh {
    pub fn count(&self) -> usize {
        self.transforms.len()
    }

    pub fn to_raw(&self) -> Vec<InstanceRaw> {
        self.transforms.iter().map(InstanceRaw::from_matrix).collect()
    }
}

/// Distance-switched levels. Level `i` is the `i`-th child of the node.
#[derive(Clone, Debug, PartialEq)]
pub struct LodContainer {
    pub distances: Vec<f32>,
}

impl LodContainer {
    /// The single active level at `view_distance`: the last one whose switch
    /// distance has been reached. Closer than every level means level 0.
    pub fn select_level(&self, view_distance: f32) -> usize {
        self.distances
            .iter()
            .rposition(|&distance| distance <= view_distance)
            .unwrap_or(0)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum NodeKind {
    Group,
    Mesh(MeshRef),
    Instanced(InstancedMesh),
    Lod(LodContainer),
}

#[derive(Clone, Debug)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    pub local: Instance,
    /// Parent world times local, refreshed by [`Scene::update_world_transforms`].
    pub world: Matrix4<f32>,
    pub kind: NodeKind,
    /// Names of the nodes this one was built from (merged or instanced).
    pub sources: Vec<String>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

impl Node {
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn mesh(&self) -> Option<MeshRef> {
        match &self.kind {
            NodeKind::Mesh(mesh) => Some(*mesh),
            _ => None,
        }
    }

    pub fn instanced(&self) -> Option<&InstancedMesh> {
        match &self.kind {
            NodeKind::Instanced(instanced) => Some(instanced),
            _ => None,
        }
    }
}

/// How many arena entries a release pass dropped.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReleaseStats {
    pub nodes: usize,
    pub geometries: usize,
    pub materials: usize,
    pub textures: usize,
}

impl AddAssign for ReleaseStats {
    fn add_assign(&mut self, other: Self) {
        self.nodes += other.nodes;
        self.geometries += other.geometries;
        self.materials += other.materials;
        self.textures += other.textures;
    }
}

/// Mesh, vertex and triangle totals of what a scene draws.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ModelStats {
    pub meshes: usize,
    pub vertices: usize,
    pub triangles: usize,
}

#[derive(Clone, Debug)]
pub struct Scene {
    root: NodeId,
    nodes: BTreeMap<NodeId, Node>,
    geometries: BTreeMap<GeometryId, Geometry>,
    materials: BTreeMap<MaterialId, Material>,
    textures: BTreeMap<TextureId, Texture>,
    next_id: u32,
}

impl Scene {
    /// An empty scene with a group node as root.
    pub fn new(root_name: &str) -> Self {
        let mut scene = Self {
            root: NodeId(0),
            nodes: BTreeMap::new(),
            geometries: BTreeMap::new(),
            materials: BTreeMap::new(),
            textures: BTreeMap::new(),
            next_id: 0,
        };
        scene.root = scene.add_detached(root_name, Instance::default(), NodeKind::Group);
        scene
    }

    fn allocate(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Makes a parentless node the root. The old root is kept only if it is
    /// reachable from the new one.
    pub fn set_root(&mut self, id: NodeId) -> Result<(), OptimizeError> {
        match self.nodes.get(&id) {
            Some(node) if node.parent.is_none() => {
                self.root = id;
                Ok(())
            }
            Some(_) => Err(OptimizeError::InvalidHierarchy(format!(
                "node {id} has a parent and cannot become the root"
            ))),
            None => Err(OptimizeError::InvalidHierarchy(format!("node {id} does not exist"))),
        }
    }

    pub fn add_geometry(&mut self, geometry: Geometry) -> GeometryId {
        let id = GeometryId(self.allocate());
        self.geometries.insert(id, geometry);
        id
    }

    pub fn geometry(&self, id: GeometryId) -> Option<&Geometry> {
        self.geometries.get(&id)
    }

    /// Swaps in a new buffer under the same id; the old one is returned so
    /// the caller decides when it is released.
    pub fn replace_geometry(&mut self, id: GeometryId, geometry: Geometry) -> Option<Geometry> {
        self.geometries.insert(id, geometry)
    }

    pub fn geometry_count(&self) -> usize {
        self.geometries.len()
    }

    pub fn add_material(&mut self, material: Material) -> MaterialId {
        let id = MaterialId(self.allocate());
        self.materials.insert(id, material);
        id
    }

    pub fn material(&self, id: MaterialId) -> Option<&Material> {
        self.materials.get(&id)
    }

    pub fn material_mut(&mut self, id: MaterialId) -> Option<&mut Material> {
        self.materials.get_mut(&id)
    }

    pub fn material_ids(&self) -> Vec<MaterialId> {
        self.materials.keys().copied().collect()
    }

    pub fn material_count(&self) -> usize {
        self.materials.len()
    }

    pub fn add_texture(&mut self, texture: Texture) -> TextureId {
        let id = TextureId(self.allocate());
        self.textures.insert(id, texture);
        id
    }

    pub fn texture(&self, id: TextureId) -> Option<&Texture> {
        self.textures.get(&id)
    }

    pub fn texture_mut(&mut self, id: TextureId) -> Option<&mut Texture> {
        self.textures.get_mut(&id)
    }

    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    /// Creates a node without a parent.
    pub fn add_detached(&mut self, name: &str, local: Instance, kind: NodeKind) -> NodeId {
        let id = NodeId(self.allocate());
        self.nodes.insert(
            id,
            Node {
                id,
                name: name.to_string(),
                world: local.to_matrix(),
                local,
                kind,
                sources: Vec::new(),
                parent: None,
                children: Vec::new(),
            },
        );
        id
    }

    pub fn add_node(
        &mut self,
        parent: NodeId,
        name: &str,
        local: Instance,
        kind: NodeKind,
    ) -> Result<NodeId, OptimizeError> {
        if !self.nodes.contains_key(&parent) {
            return Err(OptimizeError::InvalidHierarchy(format!(
                "parent node {parent} does not exist"
            )));
        }
        let id = self.add_detached(name, local, kind);
        self.attach(parent, id)?;
        Ok(id)
    }

    pub fn add_group(&mut self, parent: NodeId, name: &str, local: Instance) -> Result<NodeId, OptimizeError> {
        self.add_node(parent, name, local, NodeKind::Group)
    }

    pub fn add_mesh(
        &mut self,
        parent: NodeId,
        name: &str,
        local: Instance,
        geometry: GeometryId,
        material: MaterialId,
    ) -> Result<NodeId, OptimizeError> {
        self.add_node(parent, name, local, NodeKind::Mesh(MeshRef { geometry, material }))
    }

    /// Appends `child` to `parent`'s children, unlinking it from any previous parent.
    pub fn attach(&mut self, parent: NodeId, child: NodeId) -> Result<(), OptimizeError> {
        if parent == child || !self.nodes.contains_key(&parent) || !self.nodes.contains_key(&child) {
            return Err(OptimizeError::InvalidHierarchy(format!(
                "cannot attach node {child} to {parent}"
            )));
        }
        self.unlink(child);
        if let Some(node) = self.nodes.get_mut(&child) {
            node.parent = Some(parent);
        }
        if let Some(node) = self.nodes.get_mut(&parent) {
            node.children.push(child);
        }
        Ok(())
    }

    fn unlink(&mut self, id: NodeId) {
        let parent = self.nodes.get_mut(&id).and_then(|node| node.parent.take());
        if let Some(parent) = parent.and_then(|parent| self.nodes.get_mut(&parent)) {
            parent.children.retain(|&child| child != id);
        }
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Takes a drawable out of the hierarchy. A leaf is unlinked and dropped
    /// from the arena; a node with children stays in place as a plain group so
    /// its subtree keeps its transforms.
    pub fn retire_mesh(&mut self, id: NodeId) {
        let has_children = match self.nodes.get(&id) {
            Some(node) => !node.children.is_empty(),
            None => return,
        };
        if has_children || id == self.root {
            if let Some(node) = self.nodes.get_mut(&id) {
                node.kind = NodeKind::Group;
            }
        } else {
            self.unlink(id);
            self.nodes.remove(&id);
        }
    }

    /// Depth-first pre-order ids below (and including) `start`.
    pub fn traverse_from(&self, start: NodeId) -> Vec<NodeId> {
        let mut order = Vec::new();
        let mut visited = HashSet::new();
        let mut stack = vec![start];
        while let Some(id) = stack.pop() {
            let Some(node) = self.nodes.get(&id) else {
                continue;
            };
            if !visited.insert(id) {
                continue;
            }
            order.push(id);
            stack.extend(node.children.iter().rev().copied());
        }
        order
    }

    pub fn traverse(&self) -> Vec<NodeId> {
        self.traverse_from(self.root)
    }

    /// Mesh nodes below `start` in traversal order.
    pub fn meshes_from(&self, start: NodeId) -> Vec<(NodeId, MeshRef)> {
        self.traverse_from(start)
            .into_iter()
            .filter_map(|id| self.nodes.get(&id).and_then(|node| node.mesh().map(|mesh| (id, mesh))))
            .collect()
    }

    pub fn meshes(&self) -> Vec<(NodeId, MeshRef)> {
        self.meshes_from(self.root)
    }

    /// Recomputes every reachable node's world matrix from its parent's.
    pub fn update_world_transforms(&mut self) {
        let mut stack = vec![(self.root, Matrix4::one())];
        let mut visited = HashSet::new();
        while let Some((id, parent_world)) = stack.pop() {
            if !visited.insert(id) {
                continue;
            }
            let Some(node) = self.nodes.get_mut(&id) else {
                continue;
            };
            node.world = parent_world * node.local.to_matrix();
            let world = node.world;
            stack.extend(node.children.iter().map(|&child| (child, world)));
        }
    }

    /// Maps a world matrix into the root's local frame, so a node attached
    /// directly under the root with this matrix lands where `world` was.
    pub fn relative_to_root(&self, world: &Matrix4<f32>) -> Matrix4<f32> {
        let root_world = self
            .nodes
            .get(&self.root)
            .map(|root| root.world)
            .unwrap_or_else(Matrix4::one);
        root_world.invert().unwrap_or_else(Matrix4::one) * world
    }

    /// Checks that the hierarchy is a tree and that every id it uses resolves.
    pub fn validate(&self) -> Result<(), OptimizeError> {
        let invalid = |message: String| Err(OptimizeError::InvalidHierarchy(message));
        let Some(root) = self.nodes.get(&self.root) else {
            return invalid(format!("root node {} does not exist", self.root));
        };
        if root.parent.is_some() {
            return invalid(format!("root node {} has a parent", self.root));
        }
        let mut seen = HashSet::new();
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                return invalid(format!("node {id} is reachable twice (cycle or shared child)"));
            }
            let Some(node) = self.nodes.get(&id) else {
                return invalid(format!("node {id} is referenced but does not exist"));
            };
            for &child in &node.children {
                match self.nodes.get(&child) {
                    Some(child_node) if child_node.parent == Some(id) => stack.push(child),
                    Some(_) => return invalid(format!("node {child} does not point back to parent {id}")),
                    None => return invalid(format!("child {child} of node {id} does not exist")),
                }
            }
            let (geometry, material) = match &node.kind {
                NodeKind::Group => continue,
                NodeKind::Mesh(mesh) => (mesh.geometry, mesh.material),
                NodeKind::Instanced(instanced) => (instanced.geometry, instanced.material),
                NodeKind::Lod(lod) => {
                    if lod.distances.len() != node.children.len() {
                        return invalid(format!(
                            "LOD node {id} has {} distances but {} levels",
                            lod.distances.len(),
                            node.children.len()
                        ));
                    }
                    continue;
                }
            };
            if !self.geometries.contains_key(&geometry) {
                return invalid(format!("node {id} uses missing geometry {geometry}"));
            }
            let Some(material) = self.materials.get(&material) else {
                return invalid(format!("node {id} uses missing material {material}"));
            };
            if let Some(texture) = material.maps.iter().find(|t| !self.textures.contains_key(t)) {
                return invalid(format!("material {} uses missing texture {texture}", material.name));
            }
        }
        Ok(())
    }

    /// Deep copy of the subtree at `id` with fresh node ids. Geometry and
    /// material ids are shared with the source. The copy has no parent.
    pub fn clone_subtree(&mut self, id: NodeId) -> Option<NodeId> {
        let root_copy = self.copy_node(id)?;
        let mut visited = HashSet::from([id]);
        let mut stack: Vec<(NodeId, NodeId)> = self
            .nodes
            .get(&id)?
            .children
            .iter()
            .rev()
            .map(|&child| (child, root_copy))
            .collect();
        while let Some((source, parent_copy)) = stack.pop() {
            if !visited.insert(source) {
                continue;
            }
            let Some(copy) = self.copy_node(source) else {
                continue;
            };
            self.attach(parent_copy, copy).ok()?;
            let children = &self.nodes.get(&source)?.children;
            stack.extend(children.iter().rev().map(|&child| (child, copy)));
        }
        Some(root_copy)
    }

    /// Detached copy of one node without its children.
    fn copy_node(&mut self, id: NodeId) -> Option<NodeId> {
        let source = self.nodes.get(&id)?;
        let (name, local, kind) = (source.name.clone(), source.local.clone(), source.kind.clone());
        let (world, sources) = (source.world, source.sources.clone());
        let copy = self.add_detached(&name, local, kind);
        if let Some(node) = self.nodes.get_mut(&copy) {
            node.world = world;
            node.sources = sources;
        }
        Some(copy)
    }

    /// Total vertices drawn by the subtree at `id`; instanced geometry counts
    /// once per instance.
    pub fn vertex_count_from(&self, id: NodeId) -> usize {
        self.traverse_from(id)
            .into_iter()
            .filter_map(|id| self.nodes.get(&id))
            .map(|node| match &node.kind {
                NodeKind::Mesh(mesh) => self.geometry(mesh.geometry).map_or(0, Geometry::vertex_count),
                NodeKind::Instanced(instanced) => {
                    self.geometry(instanced.geometry).map_or(0, Geometry::vertex_count) * instanced.count()
                }
                NodeKind::Group | NodeKind::Lod(_) => 0,
            })
            .sum()
    }

    pub fn vertex_count(&self) -> usize {
        self.vertex_count_from(self.root)
    }

    /// Totals over every mesh reachable from the root. An instanced mesh is
    /// one mesh whose vertices and triangles count once per instance.
    pub fn stats(&self) -> ModelStats {
        let mut stats = ModelStats::default();
        for id in self.traverse() {
            let Some(node) = self.nodes.get(&id) else {
                continue;
            };
            let (geometry, copies) = match &node.kind {
                NodeKind::Mesh(mesh) => (mesh.geometry, 1),
                NodeKind::Instanced(instanced) => (instanced.geometry, instanced.count()),
                NodeKind::Group | NodeKind::Lod(_) => continue,
            };
            stats.meshes += 1;
            if let Some(geometry) = self.geometry(geometry) {
                stats.vertices += geometry.vertex_count() * copies;
                stats.triangles += geometry.triangle_count() * copies;
            }
        }
        stats
    }

    /// Drops unreachable nodes, then geometries and materials no reachable
    /// node uses, then textures no remaining material uses.
    pub fn release_unreferenced(&mut self) -> ReleaseStats {
        let reachable: BTreeSet<NodeId> = self.traverse().into_iter().collect();
        let mut stats = ReleaseStats::default();

        let before = self.nodes.len();
        self.nodes.retain(|id, _| reachable.contains(id));
        stats.nodes = before - self.nodes.len();

        let mut geometries = BTreeSet::new();
        let mut materials = BTreeSet::new();
        for node in self.nodes.values() {
            match &node.kind {
                NodeKind::Mesh(mesh) => {
                    geometries.insert(mesh.geometry);
                    materials.insert(mesh.material);
                }
                NodeKind::Instanced(instanced) => {
                    geometries.insert(instanced.geometry);
                    materials.insert(instanced.material);
                }
                NodeKind::Group | NodeKind::Lod(_) => {}
            }
        }

        let before = self.geometries.len();
        self.geometries.retain(|id, _| geometries.contains(id));
        stats.geometries = before - self.geometries.len();

        let before = self.materials.len();
        self.materials.retain(|id, _| materials.contains(id));
        stats.materials = before - self.materials.len();

        let textures: BTreeSet<TextureId> = self.materials.values().flat_map(|m| m.maps.iter()).collect();
        let before = self.textures.len();
        self.textures.retain(|id, _| textures.contains(id));
        stats.textures = before - self.textures.len();

        stats
    }
}
