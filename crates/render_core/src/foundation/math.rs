//! Math types used by the renderables

pub use nalgebra::{Matrix3, Matrix4, Vector2, Vector3, Vector4};

/// 2D vector type
pub type Vec2 = Vector2<f32>;

/// 3D vector type
pub type Vec3 = Vector3<f32>;

/// 4D vector type
pub type Vec4 = Vector4<f32>;

/// 4x4 matrix type
pub type Mat4 = Matrix4<f32>;

/// Column-major array form of a matrix, as laid out in uniform buffers
pub fn mat4_to_cols(matrix: &Mat4) -> [[f32; 4]; 4] {
    (*matrix).into()
}

/// Inverse-transpose of the upper 3x3, padded back to 4x4 for std140 layout.
///
/// Falls back to identity for singular transforms.
pub fn normal_matrix(model: &Mat4) -> Mat4 {
    let upper: Matrix3<f32> = model.fixed_view::<3, 3>(0, 0).into_owned();
    let normal = upper.try_inverse().map_or_else(Matrix3::identity, |inv| inv.transpose());
    normal.to_homogeneous()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_normal_matrix_of_uniform_scale() {
        let model = Mat4::new_scaling(2.0);
        let normal = normal_matrix(&model);
        assert_relative_eq!(normal[(0, 0)], 0.5);
        assert_relative_eq!(normal[(1, 1)], 0.5);
        assert_relative_eq!(normal[(3, 3)], 1.0);
    }

    #[test]
    fn test_normal_matrix_of_singular_transform_is_identity() {
        let model = Mat4::zeros();
        assert_eq!(normal_matrix(&model), Mat4::identity());
    }

    #[test]
    fn test_translation_lands_in_last_column() {
        let model = Mat4::new_translation(&Vec3::new(1.0, 2.0, 3.0));
        let cols = mat4_to_cols(&model);
        assert_eq!(cols[3], [1.0, 2.0, 3.0, 1.0]);
    }
}
