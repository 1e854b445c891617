// SPDX-License-Identifier: GPL-3.0-only

//! Preview quad geometry: aspect fit, mirroring and rotation
//!
//! Geometry is a pure function of the texture size, view bounds, mirroring and
//! rotation. The render surface caches the result and only recomputes it when
//! one of those inputs changes.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Rotation applied to the preview texture (clockwise)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Rotation {
    #[default]
    Rotate0,
    Rotate90,
    Rotate180,
    Rotate270,
}

impl Rotation {
    pub const ALL: [Rotation; 4] = [
        Rotation::Rotate0,
        Rotation::Rotate90,
        Rotation::Rotate180,
        Rotation::Rotate270,
    ];

    pub fn degrees(&self) -> u32 {
        match self {
            Rotation::Rotate0 => 0,
            Rotation::Rotate90 => 90,
            Rotation::Rotate180 => 180,
            Rotation::Rotate270 => 270,
        }
    }

    /// Parse a multiple of 90 degrees (normalised to 0-360)
    pub fn from_degrees(degrees: i32) -> Option<Self> {
        match degrees.rem_euclid(360) {
            0 => Some(Rotation::Rotate0),
            90 => Some(Rotation::Rotate90),
            180 => Some(Rotation::Rotate180),
            270 => Some(Rotation::Rotate270),
            _ => None,
        }
    }

    /// Whether the texture's width maps onto the view's height
    pub fn swaps_dimensions(&self) -> bool {
        matches!(self, Rotation::Rotate90 | Rotation::Rotate270)
    }

    /// Texture coordinates for the quad vertices (bottom-left, bottom-right,
    /// top-left, top-right), texture origin at the top-left
    pub fn texture_coordinates(&self) -> [f32; 8] {
        match self {
            Rotation::Rotate0 => [0.0, 1.0, 1.0, 1.0, 0.0, 0.0, 1.0, 0.0],
            Rotation::Rotate90 => [1.0, 1.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0],
            Rotation::Rotate180 => [1.0, 0.0, 0.0, 0.0, 1.0, 1.0, 0.0, 1.0],
            Rotation::Rotate270 => [0.0, 0.0, 0.0, 1.0, 1.0, 0.0, 1.0, 1.0],
        }
    }
}

impl std::fmt::Display for Rotation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}°", self.degrees())
    }
}

/// Size of the view the preview is drawn into, in points
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ViewBounds {
    pub width: f64,
    pub height: f64,
}

impl ViewBounds {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// 2D affine transform, `x' = a*x + c*y + tx`, `y' = b*x + d*y + ty`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineTransform {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub tx: f64,
    pub ty: f64,
}

impl AffineTransform {
    pub const IDENTITY: AffineTransform = AffineTransform {
        a: 1.0,
        b: 0.0,
        c: 0.0,
        d: 1.0,
        tx: 0.0,
        ty: 0.0,
    };

    pub fn scale(sx: f64, sy: f64) -> Self {
        Self {
            a: sx,
            d: sy,
            ..Self::IDENTITY
        }
    }

    pub fn translation(tx: f64, ty: f64) -> Self {
        Self {
            tx,
            ty,
            ..Self::IDENTITY
        }
    }

    pub fn rotation(angle: f64) -> Self {
        let (sin, cos) = angle.sin_cos();
        Self {
            a: cos,
            b: sin,
            c: -sin,
            d: cos,
            tx: 0.0,
            ty: 0.0,
        }
    }

    /// Apply `self`, then `next`
    pub fn then(&self, next: &AffineTransform) -> Self {
        Self {
            a: self.a * next.a + self.b * next.c,
            b: self.a * next.b + self.b * next.d,
            c: self.c * next.a + self.d * next.c,
            d: self.c * next.b + self.d * next.d,
            tx: self.tx * next.a + self.ty * next.c + next.tx,
            ty: self.tx * next.b + self.ty * next.d + next.ty,
        }
    }

    /// Inverse transform; a singular transform is returned unchanged
    pub fn inverted(&self) -> Self {
        let det = self.a * self.d - self.b * self.c;
        if det == 0.0 {
            return *self;
        }
        Self {
            a: self.d / det,
            b: -self.b / det,
            c: -self.c / det,
            d: self.a / det,
            tx: (self.c * self.ty - self.d * self.tx) / det,
            ty: (self.b * self.tx - self.a * self.ty) / det,
        }
    }

    pub fn apply(&self, point: Point) -> Point {
        Point {
            x: self.a * point.x + self.c * point.y + self.tx,
            y: self.b * point.x + self.d * point.y + self.ty,
        }
    }

    /// Size of the bounding box of the `width` x `height` rect at the origin
    /// after transformation
    pub fn transformed_size(&self, width: f64, height: f64) -> (f64, f64) {
        let corners = [
            self.apply(Point::new(0.0, 0.0)),
            self.apply(Point::new(width, 0.0)),
            self.apply(Point::new(0.0, height)),
            self.apply(Point::new(width, height)),
        ];
        let (mut min_x, mut min_y) = (f64::INFINITY, f64::INFINITY);
        let (mut max_x, mut max_y) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
        for corner in corners {
            min_x = min_x.min(corner.x);
            min_y = min_y.min(corner.y);
            max_x = max_x.max(corner.x);
            max_y = max_y.max(corner.y);
        }
        (max_x - min_x, max_y - min_y)
    }
}

impl Default for AffineTransform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Everything the preview geometry depends on
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeometryInputs {
    pub texture_width: u32,
    pub texture_height: u32,
    pub bounds: ViewBounds,
    pub mirroring: bool,
    pub rotation: Rotation,
}

/// Cached quad geometry for one set of inputs
#[derive(Debug, Clone, PartialEq)]
pub struct RenderGeometry {
    pub inputs: GeometryInputs,
    /// Quad corners as clip-space xyzw (bottom-left, bottom-right, top-left, top-right)
    pub vertices: [f32; 16],
    /// Texture coordinates matching `vertices`
    pub tex_coords: [f32; 8],
    /// Maps view coordinates back into texture pixel coordinates
    pub texture_transform: AffineTransform,
}

impl RenderGeometry {
    pub fn compute(inputs: GeometryInputs) -> Self {
        let texture_width = inputs.texture_width as f64;
        let texture_height = inputs.texture_height as f64;
        let bounds = inputs.bounds;

        let mut scale_x = 1.0f64;
        let mut scale_y = 1.0f64;
        if inputs.texture_width > 0 && inputs.texture_height > 0 {
            if inputs.rotation.swaps_dimensions() {
                scale_x = bounds.width / texture_height;
                scale_y = bounds.height / texture_width;
            } else {
                scale_x = bounds.width / texture_width;
                scale_y = bounds.height / texture_height;
            }
        }

        // Aspect fit: the tighter axis fills the view, the other is letterboxed
        let resize_aspect = scale_x.min(scale_y);
        if scale_x > 0.0 && scale_y > 0.0 {
            if scale_x < scale_y {
                scale_y = scale_x / scale_y;
                scale_x = 1.0;
            } else {
                scale_x = scale_y / scale_x;
                scale_y = 1.0;
            }
        } else {
            // Empty view: collapse the quad
            scale_x = 0.0;
            scale_y = 0.0;
        }

        if inputs.mirroring {
            scale_x = -scale_x;
        }

        let (sx, sy) = (scale_x as f32, scale_y as f32);
        let vertices = [
            -sx, -sy, 0.0, 1.0, //
            sx, -sy, 0.0, 1.0, //
            -sx, sy, 0.0, 1.0, //
            sx, sy, 0.0, 1.0,
        ];
        let tex_coords = inputs.rotation.texture_coordinates();

        let mut transform = AffineTransform::IDENTITY;
        if inputs.mirroring {
            transform = transform
                .then(&AffineTransform::scale(-1.0, 1.0))
                .then(&AffineTransform::translation(texture_width, 0.0));
        }
        transform = match inputs.rotation {
            Rotation::Rotate0 => transform.then(&AffineTransform::rotation(0.0)),
            Rotation::Rotate90 => transform
                .then(&AffineTransform::rotation(PI / 2.0))
                .then(&AffineTransform::translation(texture_height, 0.0)),
            Rotation::Rotate180 => transform
                .then(&AffineTransform::rotation(PI))
                .then(&AffineTransform::translation(texture_width, texture_height)),
            Rotation::Rotate270 => transform
                .then(&AffineTransform::rotation(3.0 * PI / 2.0))
                .then(&AffineTransform::translation(0.0, texture_width)),
        };
        transform = transform.then(&AffineTransform::scale(resize_aspect, resize_aspect));

        let (fitted_width, fitted_height) =
            transform.transformed_size(texture_width, texture_height);
        let x_shift = (bounds.width - fitted_width) / 2.0;
        let y_shift = (bounds.height - fitted_height) / 2.0;
        transform = transform.then(&AffineTransform::translation(x_shift, y_shift));

        Self {
            inputs,
            vertices,
            tex_coords,
            texture_transform: transform.inverted(),
        }
    }

    /// Map a point in view coordinates to texture pixel coordinates
    pub fn view_to_texture(&self, point: Point) -> Point {
        self.texture_transform.apply(point)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(rotation: Rotation, mirroring: bool) -> GeometryInputs {
        GeometryInputs {
            texture_width: 100,
            texture_height: 50,
            bounds: ViewBounds::new(200.0, 200.0),
            mirroring,
            rotation,
        }
    }

    fn assert_close(actual: Point, expected: Point) {
        assert!(
            (actual.x - expected.x).abs() < 1e-9 && (actual.y - expected.y).abs() < 1e-9,
            "{actual:?} != {expected:?}"
        );
    }

    #[test]
    fn test_compute_is_bit_identical() {
        for rotation in Rotation::ALL {
            for mirroring in [false, true] {
                let first = RenderGeometry::compute(inputs(rotation, mirroring));
                let second = RenderGeometry::compute(inputs(rotation, mirroring));
                assert_eq!(first.vertices.map(f32::to_bits), second.vertices.map(f32::to_bits));
                assert_eq!(
                    first.tex_coords.map(f32::to_bits),
                    second.tex_coords.map(f32::to_bits)
                );
                let t1 = first.texture_transform;
                let t2 = second.texture_transform;
                assert_eq!(
                    [t1.a, t1.b, t1.c, t1.d, t1.tx, t1.ty].map(f64::to_bits),
                    [t2.a, t2.b, t2.c, t2.d, t2.tx, t2.ty].map(f64::to_bits)
                );
            }
        }
    }

    #[test]
    fn test_aspect_fit_landscape_in_square() {
        // 100x50 into 200x200 without rotation: full width, half height
        let geometry = RenderGeometry::compute(inputs(Rotation::Rotate0, false));
        assert_eq!(&geometry.vertices[..2], &[-1.0, -0.5]);
        assert_eq!(&geometry.vertices[12..14], &[1.0, 0.5]);
    }

    #[test]
    fn test_rotation_swaps_fit_axes() {
        // Rotated 90 degrees the texture is 50 wide and 100 tall on screen
        let geometry = RenderGeometry::compute(inputs(Rotation::Rotate90, false));
        assert_eq!(&geometry.vertices[..2], &[-0.5, -1.0]);
        assert_eq!(geometry.tex_coords, Rotation::Rotate90.texture_coordinates());
    }

    #[test]
    fn test_mirroring_flips_x() {
        let plain = RenderGeometry::compute(inputs(Rotation::Rotate0, false));
        let mirrored = RenderGeometry::compute(inputs(Rotation::Rotate0, true));
        assert_eq!(mirrored.vertices[0], -plain.vertices[0]);
        assert_eq!(mirrored.vertices[1], plain.vertices[1]);
    }

    #[test]
    fn test_view_center_maps_to_texture_center() {
        for rotation in Rotation::ALL {
            for mirroring in [false, true] {
                let geometry = RenderGeometry::compute(inputs(rotation, mirroring));
                let center = geometry.view_to_texture(Point::new(100.0, 100.0));
                assert_close(center, Point::new(50.0, 25.0));
            }
        }
    }

    #[test]
    fn test_view_corner_maps_to_texture_corner() {
        // Unrotated: the letterboxed image spans y 50..150 in the view
        let geometry = RenderGeometry::compute(inputs(Rotation::Rotate0, false));
        assert_close(geometry.view_to_texture(Point::new(0.0, 50.0)), Point::new(0.0, 0.0));

        // Rotated 90 degrees clockwise the texture origin lands at the top-right
        let geometry = RenderGeometry::compute(inputs(Rotation::Rotate90, false));
        assert_close(geometry.view_to_texture(Point::new(150.0, 0.0)), Point::new(0.0, 0.0));
    }

    #[test]
    fn test_empty_bounds_collapse_quad() {
        let geometry = RenderGeometry::compute(GeometryInputs {
            bounds: ViewBounds::new(0.0, 0.0),
            ..inputs(Rotation::Rotate0, false)
        });
        assert!(geometry.vertices.iter().all(|v| v.is_finite()));
        assert_eq!(geometry.vertices[0], 0.0);
    }

    #[test]
    fn test_affine_inverse() {
        let t = AffineTransform::rotation(0.3)
            .then(&AffineTransform::scale(2.0, 3.0))
            .then(&AffineTransform::translation(5.0, -7.0));
        let p = Point::new(12.5, -4.0);
        assert_close(t.inverted().apply(t.apply(p)), p);
    }

    #[test]
    fn test_rotation_from_degrees() {
        assert_eq!(Rotation::from_degrees(-90), Some(Rotation::Rotate270));
        assert_eq!(Rotation::from_degrees(450), Some(Rotation::Rotate90));
        assert_eq!(Rotation::from_degrees(45), None);
    }
}
