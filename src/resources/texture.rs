//! Sampled textures and render targets.

use std::sync::Arc;

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::context::GpuContext;
use crate::error::{RenderError, RenderResult};
use crate::resources::{DeferredDestructor, Owned};

/// Shape of a texture created from a [`TextureDesc`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureKind {
    /// A plain 2D image.
    Flat,
    /// Six square faces in +X, -X, +Y, -Y, +Z, -Z order.
    Cube,
}

impl TextureKind {
    pub fn layers(&self) -> u32 {
        match self {
            TextureKind::Flat => 1,
            TextureKind::Cube => 6,
        }
    }
}

/// Description of a sampled texture.
#[derive(Debug, Clone)]
pub struct TextureDesc<'a> {
    pub label: &'a str,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub kind: TextureKind,
    /// Pixels of every layer, layer after layer. `None` uploads zeros.
    pub data: Option<&'a [u8]>,
}

/// Bytes in one layer and in all `layers` of a single-mip texture, or `None`
/// when either does not fit in memory.
fn upload_size(width: u32, height: u32, format: TextureFormat, layers: u32) -> Option<(usize, usize)> {
    let layer = u64::from(width)
        .checked_mul(u64::from(height))?
        .checked_mul(u64::from(format.bytes_per_pixel()))?;
    let total = layer.checked_mul(u64::from(layers))?;
    Some((usize::try_from(layer).ok()?, usize::try_from(total).ok()?))
}

/// A texture with a view over all of its mips and layers.
#[derive(Debug)]
pub struct Texture {
    view: Owned<TextureViewHandle>,
    texture: Owned<TextureHandle>,
    width: u32,
    height: u32,
    mip_levels: u32,
    layers: u32,
    format: TextureFormat,
}

impl Texture {
    /// Create and upload a single-mip texture.
    pub(crate) fn create<D: RenderDevice>(
        device: &mut D,
        destructor: &Arc<DeferredDestructor>,
        desc: &TextureDesc<'_>,
    ) -> RenderResult<Self> {
        if desc.width == 0 || desc.height == 0 {
            return Err(RenderError::resource(
                "texture",
                format!("'{}' has zero size", desc.label),
            ));
        }
        if desc.kind == TextureKind::Cube && desc.width != desc.height {
            return Err(RenderError::resource(
                "texture",
                format!("cube texture '{}' must have square faces", desc.label),
            ));
        }
        if desc.format.is_depth() {
            return Err(RenderError::resource(
                "texture",
                format!("'{}' cannot upload depth data", desc.label),
            ));
        }

        let layers = desc.kind.layers();
        let (layer_size, total_size) = upload_size(desc.width, desc.height, desc.format, layers)
            .ok_or_else(|| {
                RenderError::resource(
                    "texture",
                    format!(
                        "'{}' is too large: {}x{}x{layers}",
                        desc.label, desc.width, desc.height
                    ),
                )
            })?;
        let zeros;
        let data = match desc.data {
            Some(data) => data,
            None => {
                zeros = vec![0u8; total_size];
                &zeros
            }
        };
        if data.len() != total_size {
            return Err(RenderError::resource(
                "texture",
                format!(
                    "'{}' expects {total_size} bytes, got {}",
                    desc.label,
                    data.len()
                ),
            ));
        }

        let (dimension, view_dimension) = match desc.kind {
            TextureKind::Flat => (TextureDimension::D2, TextureViewDimension::D2),
            TextureKind::Cube => (TextureDimension::Cube, TextureViewDimension::Cube),
        };
        let texture = device.create_texture(&TextureDescriptor {
            label: Some(desc.label.to_string()),
            width: desc.width,
            height: desc.height,
            layers,
            mip_levels: 1,
            dimension,
            format: desc.format,
            usage: TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST,
        })?;
        let texture = Owned::new(texture, destructor);

        for (layer, pixels) in data.chunks_exact(layer_size).enumerate() {
            device.write_texture(
                texture.handle(),
                TextureRegion {
                    mip: 0,
                    layer: layer as u32,
                    width: desc.width,
                    height: desc.height,
                },
                pixels,
            )?;
        }

        let view = device.create_texture_view(
            texture.handle(),
            &TextureViewDescriptor::whole(view_dimension),
        )?;

        Ok(Self {
            view: Owned::new(view, destructor),
            texture,
            width: desc.width,
            height: desc.height,
            mip_levels: 1,
            layers,
            format: desc.format,
        })
    }

    /// Create an attachment-capable texture whose contents passes produce.
    pub(crate) fn create_target<D: RenderDevice>(
        ctx: &mut GpuContext<D>,
        desc: &TextureDescriptor,
        view_dimension: TextureViewDimension,
    ) -> RenderResult<Self> {
        let texture = ctx.device_mut().create_texture(desc)?;
        let texture = ctx.own(texture);
        let view = ctx
            .device_mut()
            .create_texture_view(texture.handle(), &TextureViewDescriptor::whole(view_dimension))?;

        Ok(Self {
            view: ctx.own(view),
            texture,
            width: desc.width,
            height: desc.height,
            mip_levels: desc.mip_levels,
            layers: desc.layers,
            format: desc.format,
        })
    }

    pub fn handle(&self) -> TextureHandle {
        self.texture.handle()
    }

    pub fn view(&self) -> TextureViewHandle {
        self.view.handle()
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn mip_levels(&self) -> u32 {
        self.mip_levels
    }

    pub fn layers(&self) -> u32 {
        self.layers
    }

    pub fn format(&self) -> TextureFormat {
        self.format
    }
}

impl<D: RenderDevice> GpuContext<D> {
    /// Create a sampled texture and upload its pixels. Blocks until the
    /// upload has completed.
    pub fn make_texture(&mut self, desc: &TextureDesc<'_>) -> RenderResult<Texture> {
        let destructor = Arc::clone(self.destructor());
        Texture::create(self.device_mut(), &destructor, desc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyDevice;

    fn context() -> GpuContext<DummyDevice> {
        GpuContext::new(DummyDevice::new(), 3).unwrap()
    }

    #[test]
    fn test_flat_texture_is_uploaded_and_readable() {
        let mut ctx = context();
        let texture = ctx
            .make_texture(&TextureDesc {
                label: "checker",
                width: 2,
                height: 2,
                format: TextureFormat::Rgba8Unorm,
                kind: TextureKind::Flat,
                data: Some(&[128; 16]),
            })
            .unwrap();

        assert_eq!(
            ctx.device().texture_state(texture.handle(), 0, 0),
            Some(TextureState::ShaderRead)
        );
        assert_eq!(ctx.device().view_texture(texture.view()), Some(texture.handle()));
    }

    #[test]
    fn test_cube_texture_uploads_six_faces() {
        let mut ctx = context();
        let texture = ctx
            .make_texture(&TextureDesc {
                label: "sky",
                width: 4,
                height: 4,
                format: TextureFormat::Rgba8Unorm,
                kind: TextureKind::Cube,
                data: None,
            })
            .unwrap();
        assert_eq!(texture.layers(), 6);
        for face in 0..6 {
            assert_eq!(
                ctx.device().texture_state(texture.handle(), 0, face),
                Some(TextureState::ShaderRead)
            );
        }
    }

    #[test]
    fn test_rejects_wrong_data_size() {
        let mut ctx = context();
        let result = ctx.make_texture(&TextureDesc {
            label: "short",
            width: 2,
            height: 2,
            format: TextureFormat::Rgba8Unorm,
            kind: TextureKind::Flat,
            data: Some(&[0; 4]),
        });
        assert!(matches!(result, Err(RenderError::ResourceCreation { .. })));
    }

    #[test]
    fn test_rejects_non_square_cube() {
        let mut ctx = context();
        let result = ctx.make_texture(&TextureDesc {
            label: "bad cube",
            width: 4,
            height: 2,
            format: TextureFormat::Rgba8Unorm,
            kind: TextureKind::Cube,
            data: None,
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_upload_size_is_checked() {
        assert_eq!(upload_size(4, 4, TextureFormat::Rgba8Unorm, 6), Some((64, 384)));
        assert_eq!(upload_size(u32::MAX, u32::MAX, TextureFormat::Rgba8Unorm, 1), None);
    }

    #[test]
    fn test_rejects_oversized_texture() {
        let mut ctx = context();
        let live = ctx.device().live_resources();
        let result = ctx.make_texture(&TextureDesc {
            label: "huge",
            width: u32::MAX,
            height: u32::MAX,
            format: TextureFormat::Rgba8Unorm,
            kind: TextureKind::Flat,
            data: None,
        });
        assert!(matches!(result, Err(RenderError::ResourceCreation { .. })));
        assert_eq!(ctx.device().live_resources(), live);
    }
}
