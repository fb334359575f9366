//! Camera pose and proxy projection

use serde::{Deserialize, Serialize};

use crate::core::types::{Mat4, Quat, Vec3};

/// Camera orientation and position, the only input of a visibility round
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraPose {
    /// Rotation as quaternion
    pub rotation: Quat,
    /// World position
    pub position: Vec3,
}

impl Default for CameraPose {
    fn default() -> Self {
        Self {
            rotation: Quat::IDENTITY,
            position: Vec3::ZERO,
        }
    }
}

impl CameraPose {
    pub fn new(rotation: Quat, position: Vec3) -> Self {
        Self { rotation, position }
    }

    /// Pose at `position` looking at `target` (Y up)
    pub fn look_at(position: Vec3, target: Vec3) -> Self {
        let dir = target - position;
        let forward = if dir.length_squared() > 1e-12 { dir.normalize() } else { -Vec3::Z };
        let mut right = forward.cross(Vec3::Y);
        if right.length_squared() < 1e-8 {
            // Looking straight up or down
            right = Vec3::X;
        }
        let right = right.normalize();
        let up = right.cross(forward);

        let rotation = Quat::from_mat3(&glam::Mat3::from_cols(right, up, -forward));
        Self { rotation, position }
    }

    /// Pose on a horizontal circle around `center`, looking at it
    pub fn orbit(center: Vec3, radius: f32, height: f32, angle: f32) -> Self {
        let position = center + Vec3::new(angle.cos() * radius, height, angle.sin() * radius);
        Self::look_at(position, center)
    }

    /// Get view matrix (world to camera space)
    pub fn view_matrix(&self) -> Mat4 {
        Mat4::from_quat(self.rotation.conjugate()) * Mat4::from_translation(-self.position)
    }

    /// Get forward direction (negative Z in camera space)
    pub fn forward(&self) -> Vec3 {
        self.rotation * -Vec3::Z
    }
}

/// Perspective used to draw the proxy scene
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyProjection {
    /// Vertical field of view in degrees
    pub fov_y_degrees: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for ProxyProjection {
    fn default() -> Self {
        Self {
            fov_y_degrees: 50.0,
            near: 0.1,
            far: 2000.0,
        }
    }
}

impl ProxyProjection {
    /// Projection matrix (camera to clip space, depth 0..1)
    pub fn matrix(&self, aspect: f32) -> Mat4 {
        Mat4::perspective_rh(self.fov_y_degrees.to_radians(), aspect, self.near, self.far)
    }

    /// Combined view-projection for a pose
    pub fn view_projection(&self, pose: &CameraPose, aspect: f32) -> Mat4 {
        self.matrix(aspect) * pose.view_matrix()
    }
}
