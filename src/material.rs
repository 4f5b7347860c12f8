//! Materials and the forward pipeline variant cache.
//!
//! A material's [`MaterialSignature`] records which optional maps it binds
//! and how it blends. The signature is the only key of the
//! [`PipelineVariantCache`]: every material with the same signature shares
//! one forward pipeline, specialized from the single forward shader
//! template.

use std::sync::Arc;

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};
use glam::{Vec3, Vec4};

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::cache::{CacheStats, MemoCache};
use crate::context::GpuContext;
use crate::error::RenderResult;
use crate::pipeline::{
    PipelineBuilder, DEPTH_FORMAT, DRAW_CONSTANTS_SIZE, HDR_FORMAT, MATERIAL_TEXTURE_BINDING,
    MATERIAL_TEXTURE_SLOTS,
};
use crate::resources::{builtin, Owned, Shader, ShaderData, ShaderDataDesc, ShaderDesc, Texture, Vertex};

/// Optional texture maps of a material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureSlot {
    Albedo,
    Normal,
    Roughness,
    Metallic,
    Emissive,
    Occlusion,
}

impl TextureSlot {
    pub const ALL: [TextureSlot; 6] = [
        TextureSlot::Albedo,
        TextureSlot::Normal,
        TextureSlot::Roughness,
        TextureSlot::Metallic,
        TextureSlot::Emissive,
        TextureSlot::Occlusion,
    ];

    pub fn flag(self) -> MaterialSignature {
        match self {
            TextureSlot::Albedo => MaterialSignature::ALBEDO,
            TextureSlot::Normal => MaterialSignature::NORMAL,
            TextureSlot::Roughness => MaterialSignature::ROUGHNESS,
            TextureSlot::Metallic => MaterialSignature::METALLIC,
            TextureSlot::Emissive => MaterialSignature::EMISSIVE,
            TextureSlot::Occlusion => MaterialSignature::OCCLUSION,
        }
    }

    /// Name of the override constant carrying this map's binding index.
    pub fn override_name(self) -> &'static str {
        match self {
            TextureSlot::Albedo => "ALBEDO_SLOT",
            TextureSlot::Normal => "NORMAL_SLOT",
            TextureSlot::Roughness => "ROUGHNESS_SLOT",
            TextureSlot::Metallic => "METALLIC_SLOT",
            TextureSlot::Emissive => "EMISSIVE_SLOT",
            TextureSlot::Occlusion => "OCCLUSION_SLOT",
        }
    }
}

/// How the material's alpha is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AlphaMode {
    #[default]
    Opaque,
    /// Fragments below the cutoff are discarded.
    Mask,
    /// Alpha blended over what is behind, without depth writes.
    Blend,
}

impl AlphaMode {
    fn shader_value(self) -> f32 {
        match self {
            AlphaMode::Opaque => 0.0,
            AlphaMode::Mask => 1.0,
            AlphaMode::Blend => 2.0,
        }
    }
}

bitflags! {
    /// Pipeline-relevant shape of a material.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MaterialSignature: u32 {
        const ALBEDO = 1 << 0;
        const NORMAL = 1 << 1;
        const ROUGHNESS = 1 << 2;
        const METALLIC = 1 << 3;
        const EMISSIVE = 1 << 4;
        const OCCLUSION = 1 << 5;
        const TRANSLUCENT = 1 << 6;
        const DOUBLE_SIDED = 1 << 7;

        const TEXTURES = Self::ALBEDO.bits()
            | Self::NORMAL.bits()
            | Self::ROUGHNESS.bits()
            | Self::METALLIC.bits()
            | Self::EMISSIVE.bits()
            | Self::OCCLUSION.bits();
    }
}

impl MaterialSignature {
    pub fn of(desc: &MaterialDesc) -> Self {
        let mut signature = Self::empty();
        for slot in TextureSlot::ALL {
            if desc.texture(slot).is_some() {
                signature |= slot.flag();
            }
        }
        signature.set(Self::TRANSLUCENT, desc.alpha_mode == AlphaMode::Blend);
        signature.set(Self::DOUBLE_SIDED, desc.double_sided);
        signature
    }

    pub fn has_textures(self) -> bool {
        self.intersects(Self::TEXTURES)
    }

    /// Compact binding index of `slot` among the maps present, in
    /// [`TextureSlot::ALL`] order.
    pub fn slot_index(self, slot: TextureSlot) -> Option<u32> {
        if !self.contains(slot.flag()) {
            return None;
        }
        let before = TextureSlot::ALL
            .iter()
            .take_while(|s| **s != slot)
            .filter(|s| self.contains(s.flag()))
            .count();
        Some(before as u32)
    }

    /// Override constants specializing the forward template for this
    /// signature.
    pub fn constants(self, cascade_count: u32) -> SpecializationConstants {
        let mut constants = SpecializationConstants::new();
        for slot in TextureSlot::ALL {
            let index = self.slot_index(slot).map_or(-1.0, f64::from);
            constants.insert(slot.override_name().to_string(), index);
        }
        let translucent = if self.contains(Self::TRANSLUCENT) { 1.0 } else { 0.0 };
        constants.insert("TRANSLUCENT".to_string(), translucent);
        constants.insert("CASCADE_COUNT".to_string(), f64::from(cascade_count));
        constants
    }
}

/// Description of a material.
#[derive(Debug, Clone)]
pub struct MaterialDesc {
    pub label: String,
    pub base_color: Vec4,
    pub metallic: f32,
    pub roughness: f32,
    pub emissive: Vec3,
    pub alpha_mode: AlphaMode,
    pub alpha_cutoff: f32,
    pub double_sided: bool,
    /// Optional maps, indexed like [`TextureSlot::ALL`].
    pub textures: [Option<Arc<Texture>>; 6],
}

impl Default for MaterialDesc {
    fn default() -> Self {
        Self {
            label: "material".to_string(),
            base_color: Vec4::ONE,
            metallic: 0.0,
            roughness: 0.5,
            emissive: Vec3::ZERO,
            alpha_mode: AlphaMode::Opaque,
            alpha_cutoff: 0.5,
            double_sided: false,
            textures: Default::default(),
        }
    }
}

impl MaterialDesc {
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            ..Default::default()
        }
    }

    pub fn with_base_color(mut self, color: Vec4) -> Self {
        self.base_color = color;
        self
    }

    pub fn with_metallic(mut self, metallic: f32) -> Self {
        self.metallic = metallic;
        self
    }

    pub fn with_roughness(mut self, roughness: f32) -> Self {
        self.roughness = roughness;
        self
    }

    pub fn with_emissive(mut self, emissive: Vec3) -> Self {
        self.emissive = emissive;
        self
    }

    pub fn with_alpha_mode(mut self, alpha_mode: AlphaMode) -> Self {
        self.alpha_mode = alpha_mode;
        self
    }

    pub fn with_alpha_cutoff(mut self, cutoff: f32) -> Self {
        self.alpha_cutoff = cutoff;
        self
    }

    pub fn with_double_sided(mut self, double_sided: bool) -> Self {
        self.double_sided = double_sided;
        self
    }

    pub fn with_texture(mut self, slot: TextureSlot, texture: Arc<Texture>) -> Self {
        self.textures[slot as usize] = Some(texture);
        self
    }

    pub fn texture(&self, slot: TextureSlot) -> Option<&Arc<Texture>> {
        self.textures[slot as usize].as_ref()
    }

    pub fn uniform_data(&self) -> MaterialUniform {
        MaterialUniform {
            base_color: self.base_color,
            emissive_cutoff: self.emissive.extend(self.alpha_cutoff),
            params: Vec4::new(
                self.metallic,
                self.roughness,
                self.alpha_mode.shader_value(),
                0.0,
            ),
        }
    }
}

/// Material uniform data for GPU
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct MaterialUniform {
    pub base_color: Vec4,
    /// xyz = emissive, w = alpha cutoff
    pub emissive_cutoff: Vec4,
    /// x = metallic, y = roughness, z = alpha mode
    pub params: Vec4,
}

/// A material ready to draw: its uniform block, its bind group and the
/// textures the group refers to.
#[derive(Debug)]
pub struct Material {
    label: String,
    signature: MaterialSignature,
    alpha_mode: AlphaMode,
    uniform: ShaderData,
    bind_group: Owned<BindGroupHandle>,
    textures: Vec<Arc<Texture>>,
}

impl Material {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn signature(&self) -> MaterialSignature {
        self.signature
    }

    pub fn alpha_mode(&self) -> AlphaMode {
        self.alpha_mode
    }

    /// Whether the material writes depth and casts shadows.
    pub fn is_opaque(&self) -> bool {
        self.alpha_mode == AlphaMode::Opaque
    }

    pub fn bind_group(&self) -> BindGroupHandle {
        self.bind_group.handle()
    }

    pub fn uniform_buffer(&self) -> BufferHandle {
        self.uniform.buffer()
    }

    /// Bound maps in binding order.
    pub fn textures(&self) -> &[Arc<Texture>] {
        &self.textures
    }
}

impl<D: RenderDevice> GpuContext<D> {
    /// Upload a material's parameters and bind its maps.
    ///
    /// Present maps take consecutive bindings in [`TextureSlot::ALL`] order;
    /// the remaining bindings of the textured layout get the white texture.
    pub fn make_material(&mut self, desc: &MaterialDesc) -> RenderResult<Material> {
        let signature = MaterialSignature::of(desc);
        let uniform_data = desc.uniform_data();
        let uniform = self.make_shader_data(&ShaderDataDesc {
            label: &desc.label,
            size: std::mem::size_of::<MaterialUniform>() as u64,
            contents: Some(bytemuck::bytes_of(&uniform_data)),
        })?;

        let textures: Vec<Arc<Texture>> = TextureSlot::ALL
            .iter()
            .filter_map(|slot| desc.texture(*slot).cloned())
            .collect();

        let mut entries = vec![
            BindGroupEntry::buffer(0, uniform.buffer()),
            BindGroupEntry::sampler(1, self.samplers().linear_repeat.handle()),
        ];
        let layout = if signature.has_textures() {
            let white = self.white_texture().view();
            entries.extend((0..MATERIAL_TEXTURE_SLOTS).map(|slot| {
                let view = textures.get(slot as usize).map_or(white, |t| t.view());
                BindGroupEntry::texture(MATERIAL_TEXTURE_BINDING + slot, view)
            }));
            self.layouts().material_textured.handle()
        } else {
            self.layouts().material_plain.handle()
        };

        let bind_group = self.device_mut().create_bind_group(layout, &entries)?;
        Ok(Material {
            label: desc.label.clone(),
            signature,
            alpha_mode: desc.alpha_mode,
            uniform,
            bind_group: self.own(bind_group),
            textures,
        })
    }
}

/// Key of the forward pipeline layouts: the material group differs between
/// textured and untextured variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LayoutKey {
    pub textured: bool,
}

/// Forward pipelines memoized by material signature.
///
/// A miss compiles a pipeline (and its layout on first use) from the forward
/// template; a hit returns the stored handle. Entries live as long as the
/// cache.
pub struct PipelineVariantCache {
    pipelines: MemoCache<MaterialSignature, Owned<RenderPipelineHandle>>,
    layouts: MemoCache<LayoutKey, Owned<PipelineLayoutHandle>>,
    textured: Shader,
    plain: Shader,
    cascade_count: u32,
}

impl PipelineVariantCache {
    pub fn new<D: RenderDevice>(ctx: &mut GpuContext<D>, cascade_count: u32) -> RenderResult<Self> {
        let textured = ctx.make_shader(&ShaderDesc {
            label: "forward textured",
            source: builtin::FORWARD,
            defines: &["MATERIAL_TEXTURES"],
        })?;
        let plain = ctx.make_shader(&ShaderDesc {
            label: "forward",
            source: builtin::FORWARD,
            defines: &[],
        })?;
        Ok(Self {
            pipelines: MemoCache::new(),
            layouts: MemoCache::new(),
            textured,
            plain,
            cascade_count,
        })
    }

    /// Forward pipeline for `signature`, compiled on first request.
    pub fn get_pipeline<D: RenderDevice>(
        &mut self,
        ctx: &mut GpuContext<D>,
        signature: MaterialSignature,
    ) -> RenderResult<RenderPipelineHandle> {
        let layouts = &mut self.layouts;
        let (textured, plain) = (&self.textured, &self.plain);
        let cascade_count = self.cascade_count;

        let pipeline = self.pipelines.get_or_try_insert_with(signature, |signature| {
            let key = LayoutKey {
                textured: signature.has_textures(),
            };
            let layout = layouts
                .get_or_try_insert_with(key, |key| forward_layout(ctx, key))?
                .handle();
            let shader = if key.textured { textured } else { plain };

            let label = format!("forward {:?}", signature);
            log::debug!("Compiling pipeline variant '{label}'");
            let handle = ctx.device_mut().create_render_pipeline(&RenderPipelineDescriptor {
                label: &label,
                layout,
                vertex: shader.entry("vs_main"),
                fragment: Some(shader.entry("fs_main")),
                state: &forward_state(signature),
                constants: &signature.constants(cascade_count),
            })?;
            Ok(ctx.own(handle))
        })?;
        Ok(pipeline.handle())
    }

    /// Number of compiled variants.
    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }

    pub fn layout_count(&self) -> usize {
        self.layouts.len()
    }

    pub fn stats(&self) -> CacheStats {
        self.pipelines.stats()
    }
}

fn forward_layout<D: RenderDevice>(
    ctx: &mut GpuContext<D>,
    key: LayoutKey,
) -> RenderResult<Owned<PipelineLayoutHandle>> {
    let layouts = ctx.layouts();
    let material = if key.textured {
        layouts.material_textured.handle()
    } else {
        layouts.material_plain.handle()
    };
    let groups = [layouts.view.handle(), layouts.environment.handle(), material];
    let layout = ctx.device_mut().create_pipeline_layout(&PipelineLayoutDescriptor {
        label: if key.textured { "forward textured" } else { "forward" },
        bind_group_layouts: &groups,
        push_constant_ranges: &[PushConstantRange {
            stages: ShaderStages::VERTEX,
            offset: 0,
            size: DRAW_CONSTANTS_SIZE,
        }],
    })?;
    Ok(ctx.own(layout))
}

fn forward_state(signature: MaterialSignature) -> PipelineState {
    let translucent = signature.contains(MaterialSignature::TRANSLUCENT);
    let builder = PipelineBuilder::new()
        .vertex_layout(Vertex::layout())
        .depth(DEPTH_FORMAT, !translucent, CompareFunction::LessEqual);
    let builder = if translucent {
        builder.blended_color_target(HDR_FORMAT)
    } else {
        builder.color_target(HDR_FORMAT)
    };
    if signature.contains(MaterialSignature::DOUBLE_SIDED) {
        builder.cull_mode(CullMode::None).build()
    } else {
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyDevice;
    use crate::resources::{TextureDesc, TextureKind};

    fn context() -> GpuContext<DummyDevice> {
        GpuContext::new(DummyDevice::new(), 3).unwrap()
    }

    fn texture(ctx: &mut GpuContext<DummyDevice>) -> Arc<Texture> {
        Arc::new(
            ctx.make_texture(&TextureDesc {
                label: "map",
                width: 1,
                height: 1,
                format: TextureFormat::Rgba8Unorm,
                kind: TextureKind::Flat,
                data: Some(&[10, 20, 30, 255]),
            })
            .unwrap(),
        )
    }

    #[test]
    fn test_signature_from_desc() {
        let desc = MaterialDesc::new("glass")
            .with_alpha_mode(AlphaMode::Blend)
            .with_double_sided(true);
        let signature = MaterialSignature::of(&desc);
        assert_eq!(
            signature,
            MaterialSignature::TRANSLUCENT | MaterialSignature::DOUBLE_SIDED
        );
        assert!(!signature.has_textures());
    }

    #[test]
    fn test_slot_indices_are_compact() {
        let signature = MaterialSignature::NORMAL | MaterialSignature::EMISSIVE;
        assert_eq!(signature.slot_index(TextureSlot::Albedo), None);
        assert_eq!(signature.slot_index(TextureSlot::Normal), Some(0));
        assert_eq!(signature.slot_index(TextureSlot::Emissive), Some(1));

        let constants = signature.constants(4);
        assert_eq!(constants["ALBEDO_SLOT"], -1.0);
        assert_eq!(constants["NORMAL_SLOT"], 0.0);
        assert_eq!(constants["EMISSIVE_SLOT"], 1.0);
        assert_eq!(constants["TRANSLUCENT"], 0.0);
        assert_eq!(constants["CASCADE_COUNT"], 4.0);
    }

    #[test]
    fn test_material_binds_maps_then_white() {
        let mut ctx = context();
        let map = texture(&mut ctx);
        let material = ctx
            .make_material(
                &MaterialDesc::new("painted").with_texture(TextureSlot::Roughness, map.clone()),
            )
            .unwrap();
        assert_eq!(material.signature(), MaterialSignature::ROUGHNESS);
        assert_eq!(material.textures().len(), 1);
        assert!(Arc::ptr_eq(&material.textures()[0], &map));

        let uniform = ctx.device().buffer_contents(material.uniform_buffer()).unwrap();
        let expected = MaterialDesc::new("painted").uniform_data();
        assert_eq!(uniform, bytemuck::bytes_of(&expected));
    }

    #[test]
    fn test_identical_signatures_share_a_pipeline() {
        let mut ctx = context();
        let mut cache = PipelineVariantCache::new(&mut ctx, 4).unwrap();

        let a = cache.get_pipeline(&mut ctx, MaterialSignature::empty()).unwrap();
        let b = cache.get_pipeline(&mut ctx, MaterialSignature::empty()).unwrap();
        assert_eq!(a, b);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats(), CacheStats { hits: 1, misses: 1 });
    }

    #[test]
    fn test_different_signatures_get_different_pipelines() {
        let mut ctx = context();
        let mut cache = PipelineVariantCache::new(&mut ctx, 4).unwrap();
        let created_before = ctx.device().render_pipelines_created();

        let plain = cache.get_pipeline(&mut ctx, MaterialSignature::empty()).unwrap();
        let blended = cache
            .get_pipeline(&mut ctx, MaterialSignature::TRANSLUCENT)
            .unwrap();
        let textured = cache
            .get_pipeline(&mut ctx, MaterialSignature::ALBEDO | MaterialSignature::NORMAL)
            .unwrap();

        assert_ne!(plain, blended);
        assert_ne!(plain, textured);
        assert_eq!(ctx.device().render_pipelines_created() - created_before, 3);
        // Plain and translucent share the untextured layout.
        assert_eq!(cache.layout_count(), 2);

        let constants = ctx.device().render_pipeline_constants(textured).unwrap();
        assert_eq!(constants["ALBEDO_SLOT"], 0.0);
        assert_eq!(constants["NORMAL_SLOT"], 1.0);
    }

    #[test]
    fn test_forward_state_follows_signature() {
        let opaque = forward_state(MaterialSignature::empty());
        assert!(opaque.depth_stencil.unwrap().depth_write_enabled);
        assert_eq!(opaque.primitive.cull_mode, CullMode::Back);

        let glass = forward_state(MaterialSignature::TRANSLUCENT | MaterialSignature::DOUBLE_SIDED);
        assert!(!glass.depth_stencil.unwrap().depth_write_enabled);
        assert!(glass.color_targets[0].blend.is_some());
        assert_eq!(glass.primitive.cull_mode, CullMode::None);
    }
}
