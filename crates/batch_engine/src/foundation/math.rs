//! Math utilities and types
//!
//! Only the types needed to build per-instance payloads live here.

pub use nalgebra::{Matrix4, Vector3, Vector4};

/// 3D vector type
pub type Vec3 = Vector3<f32>;

/// 4D vector type
pub type Vec4 = Vector4<f32>;

/// 4x4 matrix type
pub type Mat4 = Matrix4<f32>;

/// Convert a matrix to the column-major array layout expected by shaders
pub fn to_cols_array(matrix: &Mat4) -> [[f32; 4]; 4] {
    (*matrix).into()
}

/// Build a translation matrix
pub fn translation(offset: Vec3) -> Mat4 {
    Mat4::new_translation(&offset)
}
