//! Small math helpers that don't belong to any one component.
//!
//! Grounded on `original_source/src/scene/Camera.cpp`'s `perspective()`,
//! which swaps near and far before building the projection ("the magical
//! properties of reverse-z") so clip-space depth runs from `1` at the
//! near plane to `0` at the far plane, trading the usual precision loss
//! at the far plane for precision where it's actually visible. The
//! matrix below reaches the same near/far boundary values through a
//! direct `A*z+B`, `w=-z` construction rather than composing a
//! GL-convention matrix with a `[-1,1] -> [0,1]` remap.

/// A column-major 4x4 matrix, laid out the way Vulkan/`ash` expect it to
/// be uploaded: `columns[c][r]`.
pub type Mat4 = [[f32; 4]; 4];

pub const IDENTITY: Mat4 = [
    [1.0, 0.0, 0.0, 0.0],
    [0.0, 1.0, 0.0, 0.0],
    [0.0, 0.0, 1.0, 0.0],
    [0.0, 0.0, 0.0, 1.0],
];

/// Builds an infinite-far-plane-free, reverse-Z perspective projection.
///
/// `fov_y_radians` is the full vertical field of view, `aspect` is
/// width/height, and `z_near`/`z_far` are positive distances. At
/// view-space `z = -z_near` the resulting clip-space depth is `1`; at
/// `z = -z_far` it is `0`.
pub fn perspective_reverse_z(fov_y_radians: f32, aspect: f32, z_near: f32, z_far: f32) -> Mat4 {
    assert!(z_near > 0.0 && z_far > z_near, "invalid near/far planes");

    let f = 1.0 / (fov_y_radians / 2.0).tan();
    let a = z_near / (z_far - z_near);
    let b = z_near * z_far / (z_far - z_near);

    let mut m = [[0.0f32; 4]; 4];
    m[0][0] = f / aspect;
    m[1][1] = -f; // Vulkan's clip-space Y points down relative to the view
    m[2][2] = a;
    m[2][3] = -1.0;
    m[3][2] = b;
    m
}

/// Transforms a view-space point through `m` and returns clip space,
/// used by tests to check boundary conditions without a full matrix
/// multiply helper elsewhere in the crate.
pub fn transform_point(m: &Mat4, view: [f32; 3]) -> [f32; 4] {
    let [x, y, z] = view;
    [
        m[0][0] * x + m[1][0] * y + m[2][0] * z + m[3][0],
        m[0][1] * x + m[1][1] * y + m[2][1] * z + m[3][1],
        m[0][2] * x + m[1][2] * y + m[2][2] * z + m[3][2],
        m[0][3] * x + m[1][3] * y + m[2][3] * z + m[3][3],
    ]
}
