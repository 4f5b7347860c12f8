//! Cascaded shadow maps for one directional light.
//!
//! Cascade `i` is an orthographic view of half-extent `base * 2^i`, placed
//! behind the camera position along the light direction and looking at it.
//! All cascades share one depth array texture, one layer each. Draws are
//! collected during the shadow pass and replayed into every cascade when the
//! pass ends.

use glam::{Mat4, Vec3};

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::config::RendererConfig;
use crate::context::GpuContext;
use crate::error::{RenderError, RenderResult};
use crate::pipeline::DEPTH_FORMAT;
use crate::resources::{DrawGeometry, Owned, Texture};
use crate::scene::Light;

/// Recording state of one cascade within a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CascadeState {
    Idle,
    Recording,
    Done,
}

/// Light `projection * view` of every cascade.
///
/// `direction` is the direction the light travels in and must be non-zero.
pub fn compute_cascades(eye: Vec3, direction: Vec3, base_extent: f32, count: u32) -> Vec<Mat4> {
    let direction = direction.normalize();
    let up = if direction.dot(Vec3::Y).abs() > 0.99 {
        Vec3::Z
    } else {
        Vec3::Y
    };
    (0..count)
        .map(|i| {
            let extent = base_extent * 2f32.powi(i as i32);
            let position = eye - direction * extent;
            let view = Mat4::look_at_rh(position, eye, up);
            let projection =
                Mat4::orthographic_rh(-extent, extent, -extent, extent, 0.0, 2.0 * extent);
            projection * view
        })
        .collect()
}

/// Shadow cascades of the renderer, shared by every viewport.
#[derive(Debug)]
pub struct CascadedShadows {
    texture: Texture,
    layer_views: Vec<Owned<TextureViewHandle>>,
    base_extent: f32,
    matrices: Vec<Mat4>,
    states: Vec<CascadeState>,
    direction: Option<Vec3>,
    draws: Vec<(DrawGeometry, Mat4)>,
}

impl CascadedShadows {
    pub fn new<D: RenderDevice>(
        ctx: &mut GpuContext<D>,
        config: &RendererConfig,
    ) -> RenderResult<Self> {
        let count = config.cascade_count;
        let texture = Texture::create_target(
            ctx,
            &TextureDescriptor {
                label: Some("shadow cascades".into()),
                width: config.shadow_map_size,
                height: config.shadow_map_size,
                layers: count,
                mip_levels: 1,
                dimension: TextureDimension::D2Array,
                format: DEPTH_FORMAT,
                usage: TextureUsage::TEXTURE_BINDING | TextureUsage::RENDER_ATTACHMENT,
            },
            TextureViewDimension::D2Array,
        )?;
        let layer_views = (0..count)
            .map(|layer| {
                let view = ctx.device_mut().create_texture_view(
                    texture.handle(),
                    &TextureViewDescriptor::attachment(0, layer),
                )?;
                Ok(ctx.own(view))
            })
            .collect::<RenderResult<Vec<_>>>()?;

        Ok(Self {
            texture,
            layer_views,
            base_extent: config.cascade_base_extent,
            matrices: vec![Mat4::ZERO; count as usize],
            states: vec![CascadeState::Idle; count as usize],
            direction: None,
            draws: Vec::new(),
        })
    }

    pub fn cascade_count(&self) -> u32 {
        self.states.len() as u32
    }

    pub fn texture(&self) -> &Texture {
        &self.texture
    }

    /// Array view over every cascade, for sampling.
    pub fn view(&self) -> TextureViewHandle {
        self.texture.view()
    }

    /// Light matrices of the current frame. Zero when no light casts
    /// shadows.
    pub fn matrices(&self) -> &[Mat4] {
        &self.matrices
    }

    pub fn states(&self) -> &[CascadeState] {
        &self.states
    }

    /// Whether this frame has a shadow-casting light.
    pub fn has_light(&self) -> bool {
        self.direction.is_some()
    }

    /// Start collecting shadow casters for a frame seen from `eye`.
    ///
    /// A light that is missing or does not cast shadows leaves every cascade
    /// cleared.
    pub fn begin(&mut self, light: Option<&Light>, eye: Vec3) -> RenderResult<()> {
        if self.states.iter().any(|s| *s == CascadeState::Recording) {
            return Err(RenderError::InvalidState(
                "shadow cascades are still recording".into(),
            ));
        }
        self.direction = light
            .and_then(Light::shadow_direction)
            .filter(|d| *d != Vec3::ZERO);
        self.matrices = match self.direction {
            Some(direction) => {
                compute_cascades(eye, direction, self.base_extent, self.cascade_count())
            }
            None => vec![Mat4::ZERO; self.states.len()],
        };
        self.states.fill(CascadeState::Idle);
        self.draws.clear();
        Ok(())
    }

    /// Queue one shadow caster. Ignored without a shadow-casting light.
    pub fn queue(&mut self, geometry: DrawGeometry, world: Mat4) {
        if self.direction.is_some() {
            self.draws.push((geometry, world));
        }
    }

    /// Record every cascade back to back. Returns the number of draws.
    ///
    /// Leaves the array readable by fragment shaders.
    pub fn record<D: RenderDevice>(
        &mut self,
        device: &mut D,
        pipeline: RenderPipelineHandle,
    ) -> usize {
        device.pipeline_barrier(&[Barrier::Texture {
            texture: self.texture.handle(),
            range: SubresourceRange::ALL,
            before: TextureState::Undefined,
            after: TextureState::DepthAttachment,
        }]);

        let size = self.texture.width();
        let mut draws = 0;
        for (i, view) in self.layer_views.iter().enumerate() {
            self.states[i] = CascadeState::Recording;
            device.begin_render_pass(&RenderPassDescriptor {
                label: &format!("shadow cascade {i}"),
                color_attachments: &[],
                depth_attachment: Some(DepthAttachment {
                    view: view.handle(),
                    load_op: LoadOp::Clear(1.0),
                    store_op: StoreOp::Store,
                    read_only: false,
                }),
                width: size,
                height: size,
            });
            if !self.draws.is_empty() {
                device.set_render_pipeline(pipeline);
                device.set_viewport(size, size);
                for (geometry, world) in &self.draws {
                    let transform = self.matrices[i] * *world;
                    device.push_constants(ShaderStages::VERTEX, 0, bytemuck::bytes_of(&transform));
                    geometry.record(device);
                    draws += 1;
                }
            }
            device.end_render_pass();
            self.states[i] = CascadeState::Done;
        }

        device.pipeline_barrier(&[Barrier::Texture {
            texture: self.texture.handle(),
            range: SubresourceRange::ALL,
            before: TextureState::DepthAttachment,
            after: TextureState::ShaderRead,
        }]);
        self.draws.clear();
        draws
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyDevice;

    #[test]
    fn test_cascade_extents_double() {
        let eye = Vec3::new(3.0, 1.0, -2.0);
        let cascades = compute_cascades(eye, Vec3::new(0.0, -1.0, -1.0), 10.0, 4);
        assert_eq!(cascades.len(), 4);

        for (i, matrix) in cascades.iter().enumerate() {
            let extent = 10.0 * 2f32.powi(i as i32);
            // The eye sits in the middle of every cascade.
            let centre = matrix.project_point3(eye);
            assert!(centre.x.abs() < 1e-4 && centre.y.abs() < 1e-4);
            assert!((centre.z - 0.5).abs() < 1e-4);

            // A point `extent` to the side lands on the edge.
            let side = Vec3::X * extent;
            let edge = matrix.project_point3(eye + side);
            assert!((edge.x.abs() - 1.0).abs() < 1e-4, "cascade {i}: {edge}");
        }
    }

    #[test]
    fn test_vertical_light_uses_other_up_axis() {
        let cascades = compute_cascades(Vec3::ZERO, Vec3::NEG_Y, 10.0, 1);
        assert!(cascades[0].is_finite());
        let below = cascades[0].project_point3(Vec3::new(0.0, -5.0, 0.0));
        assert!(below.z > 0.5);
    }

    #[test]
    fn test_no_light_records_cleared_cascades() {
        let mut ctx = GpuContext::new(DummyDevice::new(), 3).unwrap();
        let mut shadows = CascadedShadows::new(&mut ctx, &RendererConfig::default()).unwrap();

        shadows.begin(None, Vec3::ZERO).unwrap();
        assert!(!shadows.has_light());
        assert!(shadows.matrices().iter().all(|m| *m == Mat4::ZERO));

        let cb = ctx.device_mut().create_command_buffer().unwrap();
        ctx.device_mut().begin_commands(cb).unwrap();
        // The pipeline is never bound without draws.
        let draws = shadows.record(ctx.device_mut(), RenderPipelineHandle(0));
        ctx.device_mut().end_commands().unwrap();
        ctx.device_mut()
            .submit(&SubmitInfo {
                command_buffer: cb,
                wait: None,
                signal: None,
                fence: None,
            })
            .unwrap();

        assert_eq!(draws, 0);
        assert_eq!(shadows.states(), &[CascadeState::Done; 4]);
        let passes = ctx.device().submissions()[0].render_passes();
        let labels: Vec<_> = passes.iter().map(|p| p.label.as_str()).collect();
        assert_eq!(
            labels,
            ["shadow cascade 0", "shadow cascade 1", "shadow cascade 2", "shadow cascade 3"]
        );
        assert_eq!(
            ctx.device().texture_state(shadows.texture().handle(), 0, 3),
            Some(TextureState::ShaderRead)
        );
        assert!(ctx.device().validation_errors().is_empty());
    }

    #[test]
    fn test_non_casting_light_is_ignored() {
        let mut ctx = GpuContext::new(DummyDevice::new(), 3).unwrap();
        let mut shadows = CascadedShadows::new(&mut ctx, &RendererConfig::default()).unwrap();
        let light = Light::directional(Vec3::NEG_Y, Vec3::ONE, 1.0, false);
        shadows.begin(Some(&light), Vec3::ZERO).unwrap();
        assert!(!shadows.has_light());
    }
}
