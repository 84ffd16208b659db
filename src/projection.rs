//! Plane Projection Geometry
//!
//! A projection mapping flattens the 3D point cloud onto a plane so pattern
//! generators can address pixels with 2D coordinates. The pixels do not need
//! to be coplanar: every pixel is simply measured against the plane's axes.
//!
//! # Coordinate Systems
//!
//! - **World Space**: pixel positions as loaded from the point cloud.
//!
//! - **Camera Space**: the camera looks down -Z with +Y up. The camera pose
//!   carries the rotation from camera space into world space.
//!
//! - **Screen Space**: normalized device coordinates, x and y in [-1, 1],
//!   +y up, (0, 0) at the center of the view. The placement widget lives here.
//!
//! - **Plane Space**: 2D coordinates on the projection plane, measured from
//!   the plane origin along `x_axis` and `y_axis`.
//!
//! # Building the plane
//!
//! 1. Normal: the camera look vector (0, 0, -1) rotated into world space
//! 2. Y axis: the camera up vector rotated into world space, then rolled
//!    about the normal by the widget angle
//! 3. X axis: normal × y, which gives a right-handed basis on the plane
//! 4. Origin: the ray through the widget's screen position, intersected with
//!    the plane that has that normal and passes through the camera target
//!
//! # Mapping a pixel
//!
//! ```text
//! delta     = position - origin
//! cartesian = (delta · x_axis, delta · y_axis)
//! polar     = (|cartesian|, atan2(cartesian.y, cartesian.x))
//! ```

use glam::{EulerRot, Mat3, Quat, Vec2, Vec3};
use std::f32::consts::PI;

use crate::error::MapError;
use crate::model::{MappingKind, ProjectionPlane, WidgetState};

const EPSILON: f32 = 1e-6;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Lens {
    Perspective { fov_y_rad: f32, aspect: f32 },
    Orthographic { half_height: f32, aspect: f32 },
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CameraPose {
    pub position: Vec3,
    /// Camera space -> world space.
    pub orientation: Quat,
    /// Up vector in camera space, usually +Y.
    pub up: Vec3,
    pub target: Vec3,
    pub lens: Lens,
}

impl Default for CameraPose {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 0.0, 10.0),
            orientation: Quat::IDENTITY,
            up: Vec3::Y,
            target: Vec3::ZERO,
            lens: Lens::Perspective {
                fov_y_rad: 45f32.to_radians(),
                aspect: 1.0,
            },
        }
    }
}

impl CameraPose {
    /// Camera at `position` looking at `target`, rolled so world `up` stays up.
    ///
    /// When the view runs along `up` (a top-down rig camera, say) the first of
    /// -Z, +Y that is not parallel to the view is used as up instead.
    pub fn look_at(position: Vec3, target: Vec3, up: Vec3, lens: Lens) -> Self {
        let forward = (target - position).normalize_or_zero();
        let right = [up, Vec3::NEG_Z, Vec3::Y]
            .into_iter()
            .map(|candidate| forward.cross(candidate))
            .find(|r| r.length_squared() > EPSILON)
            .unwrap_or(Vec3::ZERO)
            .normalize_or_zero();
        let cam_up = right.cross(forward);
        let orientation = Quat::from_mat3(&Mat3::from_cols(right, cam_up, -forward));
        Self {
            position,
            orientation,
            up: Vec3::Y,
            target,
            lens,
        }
    }

    pub fn look_direction(&self) -> Vec3 {
        (self.orientation * Vec3::NEG_Z).normalize()
    }

    /// XYZ euler angles of the orientation, radians.
    pub fn euler(&self) -> Vec3 {
        let (x, y, z) = self.orientation.to_euler(EulerRot::XYZ);
        Vec3::new(x, y, z)
    }

    /// Ray from the camera through a normalized screen point.
    pub fn ray_through(&self, screen: Vec2) -> Ray {
        match self.lens {
            Lens::Perspective { fov_y_rad, aspect } => {
                let tan = (fov_y_rad / 2.0).tan();
                let dir = Vec3::new(screen.x * tan * aspect, screen.y * tan, -1.0);
                Ray {
                    origin: self.position,
                    direction: (self.orientation * dir).normalize(),
                }
            }
            Lens::Orthographic { half_height, aspect } => {
                let offset = Vec3::new(screen.x * half_height * aspect, screen.y * half_height, 0.0);
                Ray {
                    origin: self.position + self.orientation * offset,
                    direction: self.look_direction(),
                }
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Ray {
    pub origin: Vec3,
    pub direction: Vec3,
}

/// Points `p` with `normal · p + constant == 0`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Plane {
    pub normal: Vec3,
    pub constant: f32,
}

impl Plane {
    pub fn from_normal_and_point(normal: Vec3, point: Vec3) -> Self {
        let normal = normal.normalize();
        Self {
            normal,
            constant: -normal.dot(point),
        }
    }

    pub fn distance_to(&self, point: Vec3) -> f32 {
        self.normal.dot(point) + self.constant
    }

    /// `None` when the ray is parallel to the plane or points away from it.
    pub fn intersect(&self, ray: &Ray) -> Option<Vec3> {
        let denom = self.normal.dot(ray.direction);
        if denom.abs() < EPSILON {
            return None;
        }
        let t = -self.distance_to(ray.origin) / denom;
        if t < 0.0 {
            return None;
        }
        Some(ray.origin + ray.direction * t)
    }
}

/// Derives the projection basis from a camera pose and the widget placement.
pub fn compute_plane(camera: &CameraPose, widget: &WidgetState) -> Result<ProjectionPlane, MapError> {
    let normal = camera.look_direction();

    let up_world = camera.orientation * camera.up;
    let y_axis = (Quat::from_axis_angle(normal, widget.angle) * up_world).normalize_or_zero();
    let x_axis = normal.cross(y_axis).normalize_or_zero();
    if x_axis == Vec3::ZERO || y_axis == Vec3::ZERO {
        // Up vector along the look vector leaves the roll undefined.
        return Err(MapError::DegenerateGeometry);
    }

    let plane = Plane::from_normal_and_point(normal, camera.target);
    let ray = camera.ray_through(Vec2::new(widget.x, widget.y));
    let origin = plane.intersect(&ray).ok_or(MapError::DegenerateGeometry)?;

    Ok(ProjectionPlane {
        origin,
        x_axis,
        y_axis,
        normal,
        source_orientation: camera.euler(),
    })
}

pub fn map_cartesian(plane: &ProjectionPlane, position: Vec3) -> Vec2 {
    let delta = position - plane.origin;
    Vec2::new(delta.dot(plane.x_axis), delta.dot(plane.y_axis))
}

/// `(radius, angle)` with the angle in (-π, π]; the origin maps to (0, 0).
pub fn map_polar(plane: &ProjectionPlane, position: Vec3) -> Vec2 {
    let p = map_cartesian(plane, position);
    let mut angle = p.y.atan2(p.x);
    if angle <= -PI {
        angle = PI;
    }
    Vec2::new(p.length(), angle)
}

pub fn map_point(kind: MappingKind, plane: &ProjectionPlane, position: Vec3) -> Vec2 {
    match kind {
        MappingKind::Cartesian2D => map_cartesian(plane, position),
        MappingKind::Polar2D => map_polar(plane, position),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_2;

    fn assert_vec3_near(a: Vec3, b: Vec3, msg: &str) {
        assert!(a.abs_diff_eq(b, 1e-4), "{}: {:?} != {:?}", msg, a, b);
    }

    fn assert_vec2_near(a: Vec2, b: Vec2, msg: &str) {
        assert!(a.abs_diff_eq(b, 1e-4), "{}: {:?} != {:?}", msg, a, b);
    }

    #[test]
    fn test_front_camera_centered_widget() {
        let plane = compute_plane(&CameraPose::default(), &WidgetState::default()).unwrap();

        assert_vec3_near(plane.normal, Vec3::NEG_Z, "Normal should follow the look vector");
        assert_vec3_near(plane.y_axis, Vec3::Y, "Y axis should be camera up");
        assert_vec3_near(plane.x_axis, Vec3::X, "X axis should complete the basis");
        assert_vec3_near(plane.origin, Vec3::ZERO, "Center ray should hit the target");

        let p = Vec3::new(1.0, 2.0, 0.0);
        assert_vec2_near(map_cartesian(&plane, p), Vec2::new(1.0, 2.0), "Cartesian mapping");
        assert_vec2_near(
            map_polar(&plane, p),
            Vec2::new(5f32.sqrt(), 2f32.atan2(1.0)),
            "Polar mapping",
        );
    }

    #[test]
    fn test_depth_is_ignored() {
        let plane = compute_plane(&CameraPose::default(), &WidgetState::default()).unwrap();
        let near = map_cartesian(&plane, Vec3::new(1.0, 2.0, 3.0));
        let far = map_cartesian(&plane, Vec3::new(1.0, 2.0, -7.0));
        assert_vec2_near(near, far, "Pixels need not be coplanar");
    }

    #[test]
    fn test_widget_angle_rolls_axes() {
        let widget = WidgetState { x: 0.0, y: 0.0, angle: FRAC_PI_2 };
        let plane = compute_plane(&CameraPose::default(), &widget).unwrap();

        assert_vec3_near(plane.y_axis, Vec3::X, "Y axis rolled a quarter turn");
        assert_vec3_near(plane.x_axis, Vec3::NEG_Y, "X axis follows the roll");
        assert_vec2_near(
            map_cartesian(&plane, Vec3::new(1.0, 2.0, 0.0)),
            Vec2::new(-2.0, 1.0),
            "Rolled mapping",
        );
    }

    #[test]
    fn test_axes_are_orthonormal_for_arbitrary_pose() {
        let camera = CameraPose::look_at(
            Vec3::new(3.0, -4.0, 5.0),
            Vec3::new(0.5, 0.5, 0.0),
            Vec3::Z,
            Lens::Perspective { fov_y_rad: 1.0, aspect: 1.5 },
        );
        let widget = WidgetState { x: 0.3, y: -0.2, angle: 0.7 };
        let plane = compute_plane(&camera, &widget).unwrap();

        assert!((plane.x_axis.length() - 1.0).abs() < 1e-4);
        assert!((plane.y_axis.length() - 1.0).abs() < 1e-4);
        assert!(plane.x_axis.dot(plane.y_axis).abs() < 1e-4);
        assert!(plane.x_axis.dot(plane.normal).abs() < 1e-4);
        assert!(plane.y_axis.dot(plane.normal).abs() < 1e-4);
        assert_vec3_near(plane.x_axis.cross(plane.y_axis), -plane.normal, "Basis handedness");

        let on_plane = Plane::from_normal_and_point(plane.normal, camera.target);
        assert!(on_plane.distance_to(plane.origin).abs() < 1e-3, "Origin should lie on the plane");
    }

    #[test]
    fn test_offset_widget_perspective() {
        let camera = CameraPose {
            lens: Lens::Perspective { fov_y_rad: FRAC_PI_2, aspect: 1.0 },
            ..CameraPose::default()
        };
        let widget = WidgetState { x: 0.5, y: 0.0, angle: 0.0 };
        let plane = compute_plane(&camera, &widget).unwrap();
        assert_vec3_near(plane.origin, Vec3::new(5.0, 0.0, 0.0), "Origin under the widget");
    }

    #[test]
    fn test_offset_widget_orthographic() {
        let camera = CameraPose {
            lens: Lens::Orthographic { half_height: 2.0, aspect: 1.0 },
            ..CameraPose::default()
        };
        let widget = WidgetState { x: 0.5, y: 0.5, angle: 0.0 };
        let plane = compute_plane(&camera, &widget).unwrap();
        assert_vec3_near(plane.origin, Vec3::new(1.0, 1.0, 0.0), "Origin under the widget");
    }

    #[test]
    fn test_plane_behind_camera_is_degenerate() {
        let camera = CameraPose {
            target: Vec3::new(0.0, 0.0, 20.0),
            ..CameraPose::default()
        };
        assert_eq!(
            compute_plane(&camera, &WidgetState::default()),
            Err(MapError::DegenerateGeometry)
        );
    }

    #[test]
    fn test_up_along_look_is_degenerate() {
        let camera = CameraPose {
            up: Vec3::Z,
            ..CameraPose::default()
        };
        assert_eq!(
            compute_plane(&camera, &WidgetState::default()),
            Err(MapError::DegenerateGeometry)
        );
    }

    #[test]
    fn test_top_down_camera_still_has_a_plane() {
        let camera = CameraPose::look_at(
            Vec3::new(0.0, 10.0, 0.0),
            Vec3::ZERO,
            Vec3::Y,
            Lens::Perspective { fov_y_rad: 1.0, aspect: 1.0 },
        );
        assert_vec3_near(camera.look_direction(), Vec3::NEG_Y, "Looking straight down");

        let plane = compute_plane(&camera, &WidgetState::default()).unwrap();
        assert_vec3_near(plane.normal, Vec3::NEG_Y, "Floor plane");
        assert_vec3_near(plane.origin, Vec3::ZERO, "Center ray should hit the target");
        assert!(plane.x_axis.dot(plane.y_axis).abs() < 1e-4);
        assert!(plane.x_axis.y.abs() < 1e-4 && plane.y_axis.y.abs() < 1e-4, "Axes lie on the floor");
    }

    #[test]
    fn test_parallel_ray_misses() {
        let plane = Plane::from_normal_and_point(Vec3::Z, Vec3::ZERO);
        let ray = Ray {
            origin: Vec3::new(0.0, 0.0, 1.0),
            direction: Vec3::X,
        };
        assert_eq!(plane.intersect(&ray), None);
    }

    #[test]
    fn test_polar_origin_and_negative_x_axis() {
        let plane = compute_plane(&CameraPose::default(), &WidgetState::default()).unwrap();
        assert_vec2_near(map_polar(&plane, Vec3::ZERO), Vec2::ZERO, "Origin maps to (0, 0)");
        let back = map_polar(&plane, Vec3::new(-1.0, 0.0, 0.0));
        assert!((back.y - PI).abs() < 1e-6, "Angle range should include +π, got {}", back.y);
    }
}
