//! Bind group layouts shared by every pass.
//!
//! | Layout | Bindings |
//! |---|---|
//! | `camera` | 0 camera block |
//! | `view` | 0 camera, 1 lights, 2 tile lists, 3 culling params, 4 shadow array, 5 shadow sampler |
//! | `environment` | 0 irradiance, 1 prefiltered specular, 2 BRDF LUT, 3 sampler |
//! | `material_textured` | 0 material block, 1 sampler, 2..=7 maps |
//! | `material_plain` | 0 material block, 1 sampler |
//! | `culling` | 0 camera, 1 culling params, 2 lights, 3 tile lists (rw), 4 depth |
//! | `post` | 0 source, 1 sampler, 2 depth, 3 fill mask, 4 camera |
//! | `ibl` | 0 bake params, 1 source cubemap, 2 sampler |

use std::sync::Arc;

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::error::RenderResult;
use crate::resources::{DeferredDestructor, Owned};

/// Number of texture slots a material can bind.
pub const MATERIAL_TEXTURE_SLOTS: u32 = 6;

/// First binding of the material texture slots.
pub const MATERIAL_TEXTURE_BINDING: u32 = 2;

#[derive(Debug)]
pub struct SharedLayouts {
    pub camera: Owned<BindGroupLayoutHandle>,
    pub view: Owned<BindGroupLayoutHandle>,
    pub environment: Owned<BindGroupLayoutHandle>,
    pub material_textured: Owned<BindGroupLayoutHandle>,
    pub material_plain: Owned<BindGroupLayoutHandle>,
    pub culling: Owned<BindGroupLayoutHandle>,
    pub post: Owned<BindGroupLayoutHandle>,
    pub ibl: Owned<BindGroupLayoutHandle>,
}

impl SharedLayouts {
    pub(crate) fn new<D: RenderDevice>(
        device: &mut D,
        destructor: &Arc<DeferredDestructor>,
    ) -> RenderResult<Self> {
        use BindGroupLayoutEntry as E;
        use ShaderStages as S;
        use TextureViewDimension as V;

        let mut create = |entries: &[BindGroupLayoutEntry]| -> RenderResult<_> {
            Ok(Owned::new(device.create_bind_group_layout(entries)?, destructor))
        };

        let camera = create(&[E::uniform(0, S::VERTEX_FRAGMENT)])?;

        let view = create(&[
            E::uniform(0, S::VERTEX_FRAGMENT),
            E::storage(1, S::FRAGMENT, true),
            E::storage(2, S::FRAGMENT, true),
            E::uniform(3, S::FRAGMENT),
            E::depth_texture(4, S::FRAGMENT, V::D2Array),
            E::sampler(5, S::FRAGMENT, true),
        ])?;

        let environment = create(&[
            E::texture(0, S::FRAGMENT, V::Cube),
            E::texture(1, S::FRAGMENT, V::Cube),
            E::texture(2, S::FRAGMENT, V::D2),
            E::sampler(3, S::FRAGMENT, false),
        ])?;

        let mut textured = vec![E::uniform(0, S::FRAGMENT), E::sampler(1, S::FRAGMENT, false)];
        textured.extend(
            (0..MATERIAL_TEXTURE_SLOTS)
                .map(|slot| E::texture(MATERIAL_TEXTURE_BINDING + slot, S::FRAGMENT, V::D2)),
        );
        let material_textured = create(&textured)?;
        let material_plain = create(&[E::uniform(0, S::FRAGMENT), E::sampler(1, S::FRAGMENT, false)])?;

        let culling = create(&[
            E::uniform(0, S::COMPUTE),
            E::uniform(1, S::COMPUTE),
            E::storage(2, S::COMPUTE, true),
            E::storage(3, S::COMPUTE, false),
            E::depth_texture(4, S::COMPUTE, V::D2),
        ])?;

        let post = create(&[
            E::texture(0, S::FRAGMENT, V::D2),
            E::sampler(1, S::FRAGMENT, false),
            E::depth_texture(2, S::FRAGMENT, V::D2),
            E::texture(3, S::FRAGMENT, V::D2),
            E::uniform(4, S::FRAGMENT),
        ])?;

        let ibl = create(&[
            E::uniform(0, S::FRAGMENT),
            E::texture(1, S::FRAGMENT, V::Cube),
            E::sampler(2, S::FRAGMENT, false),
        ])?;

        Ok(Self {
            camera,
            view,
            environment,
            material_textured,
            material_plain,
            culling,
            post,
            ibl,
        })
    }
}
