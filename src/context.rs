//! Explicit render context.
//!
//! [`GpuContext`] bundles the device with everything created once per device
//! and shared by every pass: the deferred destructor, the shared bind group
//! layouts, the common samplers and a 1x1 white texture used to pad unused
//! material slots. It is passed by reference to whatever needs the device.

use std::sync::Arc;

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::error::RenderResult;
use crate::pipeline::SharedLayouts;
use crate::resources::{DeferredDestructor, Owned, Texture, TextureDesc, TextureKind};

/// Samplers shared by every pass.
#[derive(Debug)]
pub struct SharedSamplers {
    /// Bilinear, clamp to edge. Post-processing, IBL and environment lookups.
    pub linear_clamp: Owned<SamplerHandle>,
    /// Trilinear, repeat. Material textures.
    pub linear_repeat: Owned<SamplerHandle>,
    /// Depth comparison sampler for shadow lookups.
    pub shadow: Owned<SamplerHandle>,
}

impl SharedSamplers {
    fn new<D: RenderDevice>(
        device: &mut D,
        destructor: &Arc<DeferredDestructor>,
    ) -> RenderResult<Self> {
        let linear_clamp = device.create_sampler(&SamplerDescriptor {
            label: Some("linear clamp".into()),
            ..Default::default()
        })?;
        let linear_repeat = device.create_sampler(&SamplerDescriptor {
            label: Some("linear repeat".into()),
            address_mode_u: AddressMode::Repeat,
            address_mode_v: AddressMode::Repeat,
            address_mode_w: AddressMode::Repeat,
            ..Default::default()
        })?;
        let shadow = device.create_sampler(&SamplerDescriptor {
            label: Some("shadow compare".into()),
            mipmap_filter: FilterMode::Nearest,
            compare: Some(CompareFunction::LessEqual),
            ..Default::default()
        })?;
        Ok(Self {
            linear_clamp: Owned::new(linear_clamp, destructor),
            linear_repeat: Owned::new(linear_repeat, destructor),
            shadow: Owned::new(shadow, destructor),
        })
    }
}

/// Device plus the per-device state shared by every renderer component.
pub struct GpuContext<D: RenderDevice> {
    device: D,
    destructor: Arc<DeferredDestructor>,
    layouts: SharedLayouts,
    samplers: SharedSamplers,
    white: Texture,
}

impl<D: RenderDevice> GpuContext<D> {
    /// Wrap `device`, holding dropped objects for `frames_in_flight` frames.
    pub fn new(mut device: D, frames_in_flight: usize) -> RenderResult<Self> {
        let destructor = Arc::new(DeferredDestructor::new(frames_in_flight));
        let layouts = SharedLayouts::new(&mut device, &destructor)?;
        let samplers = SharedSamplers::new(&mut device, &destructor)?;

        let white = Texture::create(
            &mut device,
            &destructor,
            &TextureDesc {
                label: "white",
                width: 1,
                height: 1,
                format: TextureFormat::Rgba8Unorm,
                kind: TextureKind::Flat,
                data: Some(&[255; 4]),
            },
        )?;

        log::info!("GPU context created on the {} backend", device.name());
        Ok(Self {
            device,
            destructor,
            layouts,
            samplers,
            white,
        })
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn layouts(&self) -> &SharedLayouts {
        &self.layouts
    }

    pub fn samplers(&self) -> &SharedSamplers {
        &self.samplers
    }

    /// Texture bound to material slots with no map.
    pub fn white_texture(&self) -> &Texture {
        &self.white
    }

    pub fn destructor(&self) -> &Arc<DeferredDestructor> {
        &self.destructor
    }

    /// Take ownership of a freshly created handle.
    pub fn own<H: Into<AnyHandle> + Copy>(&self, handle: H) -> Owned<H> {
        Owned::new(handle, &self.destructor)
    }

    /// Destroy objects released by the frame slot that is about to be reused.
    ///
    /// Call only after that slot's fence has signalled.
    pub fn retire_frame(&mut self) {
        for handle in self.destructor.advance_frame() {
            self.device.destroy(handle);
        }
    }

    /// Destroy every pending object. The device must be idle.
    pub fn destroy_pending(&mut self) {
        let handles = self.destructor.flush_all();
        if !handles.is_empty() {
            log::debug!("Destroying {} deferred objects", handles.len());
        }
        for handle in handles {
            self.device.destroy(handle);
        }
    }
}
