//! Light types for the scene

use bytemuck::{Pod, Zeroable};
use glam::{Vec3, Vec4};

/// A light submitted for one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Light {
    Point {
        position: Vec3,
        color: Vec3,
        intensity: f32,
        radius: f32,
    },
    /// Infinitely distant light, like the sun. Reaches every tile.
    Directional {
        /// Direction the light travels in.
        direction: Vec3,
        color: Vec3,
        intensity: f32,
        cast_shadows: bool,
    },
}

impl Light {
    pub fn point(position: Vec3, color: Vec3, intensity: f32, radius: f32) -> Self {
        Light::Point {
            position,
            color,
            intensity,
            radius,
        }
    }

    pub fn directional(direction: Vec3, color: Vec3, intensity: f32, cast_shadows: bool) -> Self {
        Light::Directional {
            direction: direction.normalize_or_zero(),
            color,
            intensity,
            cast_shadows,
        }
    }

    /// Bounding sphere used by tile culling. `None` for lights without a
    /// finite extent.
    pub fn bounding_sphere(&self) -> Option<(Vec3, f32)> {
        match *self {
            Light::Point {
                position, radius, ..
            } => Some((position, radius)),
            Light::Directional { .. } => None,
        }
    }

    /// Direction of a shadow-casting directional light.
    pub fn shadow_direction(&self) -> Option<Vec3> {
        match *self {
            Light::Directional {
                direction,
                cast_shadows: true,
                ..
            } => Some(direction),
            _ => None,
        }
    }

    /// Convert to GPU data format
    pub fn to_gpu(&self) -> GpuLight {
        match *self {
            Light::Point {
                position,
                color,
                intensity,
                radius,
            } => GpuLight {
                position_radius: position.extend(radius),
                color_intensity: color.extend(intensity),
                direction_kind: Vec4::new(0.0, 0.0, 0.0, GpuLight::POINT),
                params: Vec4::ZERO,
            },
            Light::Directional {
                direction,
                color,
                intensity,
                cast_shadows,
            } => GpuLight {
                position_radius: Vec4::new(0.0, 0.0, 0.0, f32::MAX),
                color_intensity: color.extend(intensity),
                direction_kind: direction.extend(GpuLight::DIRECTIONAL),
                params: Vec4::new(if cast_shadows { 1.0 } else { 0.0 }, 0.0, 0.0, 0.0),
            },
        }
    }
}

/// GPU-friendly light data structure
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuLight {
    /// xyz = position, w = radius
    pub position_radius: Vec4,
    /// xyz = color, w = intensity
    pub color_intensity: Vec4,
    /// xyz = direction, w = light kind
    pub direction_kind: Vec4,
    /// x = casts shadows, yzw = unused
    pub params: Vec4,
}

impl GpuLight {
    pub const POINT: f32 = 0.0;
    pub const DIRECTIONAL: f32 = 1.0;

    pub fn is_directional(&self) -> bool {
        self.direction_kind.w == Self::DIRECTIONAL
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gpu_light_is_64_bytes() {
        assert_eq!(std::mem::size_of::<GpuLight>(), 64);
    }

    #[test]
    fn test_point_light_packing() {
        let light = Light::point(Vec3::new(1.0, 2.0, 3.0), Vec3::ONE, 5.0, 4.0).to_gpu();
        assert_eq!(light.position_radius, Vec4::new(1.0, 2.0, 3.0, 4.0));
        assert_eq!(light.color_intensity.w, 5.0);
        assert!(!light.is_directional());
    }

    #[test]
    fn test_directional_light_shadow_flag() {
        let sun = Light::directional(Vec3::new(0.0, -2.0, 0.0), Vec3::ONE, 1.0, true);
        assert_eq!(sun.shadow_direction(), Some(Vec3::NEG_Y));
        assert!(sun.bounding_sphere().is_none());
        let gpu = sun.to_gpu();
        assert!(gpu.is_directional());
        assert_eq!(gpu.params.x, 1.0);

        let unlit = Light::directional(Vec3::NEG_Y, Vec3::ONE, 1.0, false);
        assert_eq!(unlit.shadow_direction(), None);
    }
}
