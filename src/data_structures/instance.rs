//! Transformation data for scene nodes and instanced draws.
//!
//! Every node carries a local [`Instance`] (position, rotation, scale).
//! Instanced primitives keep one world matrix per copy; [`InstanceRaw`] is
//! the packed form of such a matrix as it would be uploaded to the GPU.

use cgmath::{Matrix, Matrix3, Matrix4, One, SquareMatrix};

/// Local transformation: position, rotation (as quaternion), and scale.
#[derive(Clone, Debug, PartialEq)]
pub struct Instance {
    pub position: cgmath::Vector3<f32>,
    pub rotation: cgmath::Quaternion<f32>,
    pub scale: cgmath::Vector3<f32>,
}

impl Instance {
    /// Create a new instance with identity transformation (no move, rotate, or scale).
    pub fn new() -> Self {
        Self {
            position: cgmath::Vector3::new(0.0, 0.0, 0.0),
            // `Quaternion::one()` is the identity quaternion (no rotation)
            rotation: cgmath::Quaternion::one(),
            scale: cgmath::Vector3::new(1.0, 1.0, 1.0),
        }
    }

    pub fn with_scale(mut self, scale: cgmath::Vector3<f32>) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_rotation(mut self, rotation: cgmath::Quaternion<f32>) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn to_matrix(&self) -> Matrix4<f32> {
        Matrix4::from_translation(self.position)
            * Matrix4::from(self.rotation)
            * Matrix4::from_nonuniform_scale(self.scale.x, self.scale.y, self.scale.z)
    }
}

impl From<cgmath::Vector3<f32>> for Instance {
    fn from(position: cgmath::Vector3<f32>) -> Self {
        Instance {
            position,
            ..Default::default()
        }
    }
}

impl Default for Instance {
    fn default() -> Self {
        Self::new()
    }
}

/// Normal matrix (inverse transpose of the upper 3x3) of a world matrix.
///
/// Falls back to the plain upper 3x3 when the matrix is singular.
pub fn normal_matrix(world: &Matrix4<f32>) -> Matrix3<f32> {
    let upper = Matrix3::from_cols(world.x.truncate(), world.y.truncate(), world.z.truncate());
    upper
        .invert()
        .map(|inverse| inverse.transpose())
        .unwrap_or(upper)
}

/**
 * The raw instance is the data an instanced draw reads per copy.
 */
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct InstanceRaw {
    pub model: [[f32; 4]; 4],
    pub normal: [[f32; 3]; 3],
    pub handedness: f32,
}

impl InstanceRaw {
    pub fn from_matrix(world: &Matrix4<f32>) -> Self {
        let handedness = world.determinant().signum();
        InstanceRaw {
            model: (*world).into(),
            normal: normal_matrix(world).into(),
            handedness,
        }
    }
}
