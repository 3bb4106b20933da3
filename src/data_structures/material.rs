//! Surface materials.
//!
//! A [`Material`] is shared by id between meshes; the pipeline never mutates
//! one in place once it is shared, it produces replacements instead.

use crate::data_structures::scene_graph::TextureId;

/// Extra parameters of the physically based "physical" material model.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PhysicalParams {
    pub clearcoat: f32,
    pub clearcoat_roughness: f32,
    pub sheen: f32,
    pub transmission: f32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MaterialKind {
    /// Unlit
    Basic,
    Standard,
    Physical(PhysicalParams),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Side {
    #[default]
    Front,
    Back,
    Double,
}

/// Texture slots a material may reference.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct MaterialMaps {
    pub map: Option<TextureId>,
    pub normal: Option<TextureId>,
    pub roughness: Option<TextureId>,
    pub metalness: Option<TextureId>,
    pub ao: Option<TextureId>,
    pub emissive: Option<TextureId>,
    pub displacement: Option<TextureId>,
    pub alpha: Option<TextureId>,
}

impl MaterialMaps {
    /// All occupied slots in a fixed order.
    pub fn iter(&self) -> impl Iterator<Item = TextureId> + '_ {
        [
            self.map,
            self.normal,
            self.roughness,
            self.metalness,
            self.ao,
            self.emissive,
            self.displacement,
            self.alpha,
        ]
        .into_iter()
        .flatten()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Material {
    pub name: String,
    pub kind: MaterialKind,
    pub color: [f32; 3],
    pub metalness: f32,
    pub roughness: f32,
    pub opacity: f32,
    pub transparent: bool,
    pub emissive: [f32; 3],
    pub emissive_intensity: f32,
    pub side: Side,
    pub flat_shading: bool,
    pub dithering: bool,
    pub maps: MaterialMaps,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            name: String::new(),
            kind: MaterialKind::Standard,
            color: [1.0, 1.0, 1.0],
            metalness: 0.0,
            roughness: 1.0,
            opacity: 1.0,
            transparent: false,
            emissive: [0.0, 0.0, 0.0],
            emissive_intensity: 1.0,
            side: Side::Front,
            flat_shading: false,
            dithering: false,
            maps: MaterialMaps::default(),
        }
    }
}

impl Material {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn with_kind(mut self, kind: MaterialKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_color(mut self, color: [f32; 3]) -> Self {
        self.color = color;
        self
    }

    pub fn with_maps(mut self, maps: MaterialMaps) -> Self {
        self.maps = maps;
        self
    }

    /// A cheap standard-model copy: color, maps and emission are kept,
    /// clearcoat, sheen and transmission are dropped along with smooth
    /// shading and dithering.
    pub fn simplified(&self) -> Material {
        let kind = match self.kind {
            MaterialKind::Basic => MaterialKind::Basic,
            MaterialKind::Standard | MaterialKind::Physical(_) => MaterialKind::Standard,
        };
        Material {
            name: self.name.clone(),
            kind,
            flat_shading: true,
            dithering: false,
            ..self.clone()
        }
    }

    /// Hashable fingerprint of everything except the name.
    pub fn content_key(&self) -> MaterialKey {
        let bits = |values: &[f32]| values.iter().map(|v| v.to_bits()).collect::<Vec<_>>();
        let (kind, physical) = match self.kind {
            MaterialKind::Basic => (0u8, Vec::new()),
            MaterialKind::Standard => (1, Vec::new()),
            MaterialKind::Physical(p) => (
                2,
                bits(&[p.clearcoat, p.clearcoat_roughness, p.sheen, p.transmission]),
            ),
        };
        let mut scalars = bits(&self.color);
        scalars.extend(bits(&[self.metalness, self.roughness, self.opacity]));
        scalars.extend(bits(&self.emissive));
        scalars.push(self.emissive_intensity.to_bits());
        scalars.extend(physical);
        MaterialKey {
            kind,
            scalars,
            flags: [self.transparent, self.flat_shading, self.dithering],
            side: self.side,
            maps: self.maps.clone(),
        }
    }
}

/// See [`Material::content_key`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MaterialKey {
    kind: u8,
    scalars: Vec<u32>,
    flags: [bool; 3],
    side: Side,
    maps: MaterialMaps,
}
