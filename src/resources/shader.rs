//! Shader sources, composition and shader-visible data blocks.
//!
//! Shaders are WGSL. A source may contain `#ifdef NAME`, `#ifndef NAME`,
//! `#else` and `#endif` lines, resolved by [`ShaderComposer`] before the
//! device parses the module. Per-pipeline variation that does not change the
//! resource interface goes through WGSL `override` constants instead.

use std::collections::BTreeSet;

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::context::GpuContext;
use crate::error::{RenderError, RenderResult};
use crate::resources::Owned;

/// Built-in shader sources.
pub mod builtin {
    /// Depth-only geometry, used by the depth pre-pass and the shadow cascades.
    pub const DEPTH: &str = include_str!("../../shaders/depth.wgsl");
    /// Tiled light culling compute shader.
    pub const LIGHT_CULL: &str = include_str!("../../shaders/light_cull.wgsl");
    /// Forward-lit material template. `#ifdef MATERIAL_TEXTURES` selects the
    /// textured resource interface.
    pub const FORWARD: &str = include_str!("../../shaders/forward.wgsl");
    /// Environment background.
    pub const SKYBOX: &str = include_str!("../../shaders/skybox.wgsl");
    /// Selection mask for the outline overlay.
    pub const FILL: &str = include_str!("../../shaders/fill.wgsl");
    /// Post-process steps and the final blit.
    pub const POSTPROCESS: &str = include_str!("../../shaders/postprocess.wgsl");
    /// Irradiance convolution, specular prefilter and BRDF integration.
    pub const IBL: &str = include_str!("../../shaders/ibl.wgsl");
}

/// Resolves `#ifdef` blocks against a set of defined names.
#[derive(Debug, Clone, Default)]
pub struct ShaderComposer {
    defines: BTreeSet<String>,
}

struct Block {
    parent_active: bool,
    condition: bool,
    in_else: bool,
}

impl Block {
    fn active(&self) -> bool {
        self.parent_active && (self.condition != self.in_else)
    }
}

impl ShaderComposer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define(mut self, name: impl Into<String>) -> Self {
        self.defines.insert(name.into());
        self
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.defines.contains(name)
    }

    /// Strip inactive blocks from `source`.
    ///
    /// Removed lines are replaced by empty lines so that parser diagnostics
    /// keep their line numbers.
    pub fn compose(&self, label: &str, source: &str) -> RenderResult<String> {
        let error = |line: usize, message: &str| RenderError::ShaderCompilation {
            label: label.to_string(),
            message: format!("line {}: {message}", line + 1),
        };

        let mut stack: Vec<Block> = Vec::new();
        let mut output = String::with_capacity(source.len());

        for (number, line) in source.lines().enumerate() {
            let active = stack.last().map_or(true, Block::active);
            let directive = line.trim_start();

            if let Some(name) = directive.strip_prefix("#ifdef ") {
                stack.push(Block {
                    parent_active: active,
                    condition: self.is_defined(name.trim()),
                    in_else: false,
                });
            } else if let Some(name) = directive.strip_prefix("#ifndef ") {
                stack.push(Block {
                    parent_active: active,
                    condition: !self.is_defined(name.trim()),
                    in_else: false,
                });
            } else if directive.starts_with("#else") {
                let block = stack
                    .last_mut()
                    .ok_or_else(|| error(number, "#else without #ifdef"))?;
                if block.in_else {
                    return Err(error(number, "duplicate #else"));
                }
                block.in_else = true;
            } else if directive.starts_with("#endif") {
                stack
                    .pop()
                    .ok_or_else(|| error(number, "#endif without #ifdef"))?;
            } else if active {
                output.push_str(line);
            }
            output.push('\n');
        }

        if !stack.is_empty() {
            return Err(error(source.lines().count(), "unterminated #ifdef"));
        }
        Ok(output)
    }
}

/// Description of a shader module.
#[derive(Debug, Clone)]
pub struct ShaderDesc<'a> {
    pub label: &'a str,
    pub source: &'a str,
    pub defines: &'a [&'a str],
}

/// A parsed shader module.
#[derive(Debug)]
pub struct Shader {
    module: Owned<ShaderModuleHandle>,
    label: String,
}

impl Shader {
    pub fn module(&self) -> ShaderModuleHandle {
        self.module.handle()
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn entry<'a>(&self, name: &'a str) -> EntryPoint<'a> {
        EntryPoint {
            module: self.module(),
            name,
        }
    }
}

/// Description of a block of uniform data.
#[derive(Debug, Clone)]
pub struct ShaderDataDesc<'a> {
    pub label: &'a str,
    pub size: u64,
    pub contents: Option<&'a [u8]>,
}

/// Host-writable uniform buffer.
#[derive(Debug)]
pub struct ShaderData {
    buffer: Owned<BufferHandle>,
    size: u64,
}

impl ShaderData {
    pub fn buffer(&self) -> BufferHandle {
        self.buffer.handle()
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Overwrite part of the block from the host.
    ///
    /// The GPU must not be reading the block; data read by in-flight frames
    /// belongs in per-frame inline updates instead.
    pub fn write<D: RenderDevice>(
        &self,
        ctx: &mut GpuContext<D>,
        offset: u64,
        data: &[u8],
    ) -> RenderResult<()> {
        ctx.device_mut().write_buffer(self.buffer(), offset, data)
    }
}

impl<D: RenderDevice> GpuContext<D> {
    /// Compose and parse a shader module.
    pub fn make_shader(&mut self, desc: &ShaderDesc<'_>) -> RenderResult<Shader> {
        let composer = desc
            .defines
            .iter()
            .fold(ShaderComposer::new(), |composer, name| composer.define(*name));
        let source = composer.compose(desc.label, desc.source)?;

        let module = self.device_mut().create_shader_module(&ShaderModuleDescriptor {
            label: desc.label,
            source: &source,
        })?;
        Ok(Shader {
            module: self.own(module),
            label: desc.label.to_string(),
        })
    }

    /// Create a uniform block, optionally with initial contents.
    pub fn make_shader_data(&mut self, desc: &ShaderDataDesc<'_>) -> RenderResult<ShaderData> {
        if desc.size == 0 || desc.size % 4 != 0 {
            return Err(RenderError::resource(
                "shader data",
                format!("'{}' size {} is not a non-zero multiple of 4", desc.label, desc.size),
            ));
        }
        let buffer = self.device_mut().create_buffer(&BufferDescriptor {
            label: Some(desc.label.to_string()),
            size: desc.size,
            usage: BufferUsage::UNIFORM | BufferUsage::MAP_WRITE,
        })?;
        let buffer = self.own(buffer);
        if let Some(contents) = desc.contents {
            self.device_mut().write_buffer(buffer.handle(), 0, contents)?;
        }
        Ok(ShaderData {
            buffer,
            size: desc.size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyDevice;

    const SOURCE: &str = "a\n#ifdef FOO\nfoo\n#else\nnot foo\n#endif\n#ifndef BAR\nno bar\n#endif\nz";

    #[test]
    fn test_compose_selects_branches() {
        let plain = ShaderComposer::new().compose("t", SOURCE).unwrap();
        let lines: Vec<&str> = plain.lines().filter(|l| !l.is_empty()).collect();
        assert_eq!(lines, ["a", "not foo", "no bar", "z"]);

        let with_foo = ShaderComposer::new()
            .define("FOO")
            .define("BAR")
            .compose("t", SOURCE)
            .unwrap();
        let lines: Vec<&str> = with_foo.lines().filter(|l| !l.is_empty()).collect();
        assert_eq!(lines, ["a", "foo", "z"]);
    }

    #[test]
    fn test_compose_keeps_line_numbers() {
        let composed = ShaderComposer::new().compose("t", SOURCE).unwrap();
        assert_eq!(composed.lines().count(), SOURCE.lines().count());
    }

    #[test]
    fn test_nested_blocks_inherit_inactive_parent() {
        let source = "#ifdef A\n#ifdef B\nboth\n#endif\n#endif\nend";
        let composed = ShaderComposer::new().define("B").compose("t", source).unwrap();
        assert!(!composed.contains("both"));
    }

    #[test]
    fn test_unbalanced_directives_are_errors() {
        let composer = ShaderComposer::new();
        assert!(composer.compose("t", "#ifdef A\nx").is_err());
        assert!(composer.compose("t", "#endif").is_err());
        assert!(composer.compose("t", "#else").is_err());
        assert!(composer.compose("t", "#ifdef A\n#else\n#else\n#endif").is_err());
    }

    #[test]
    fn test_builtin_shaders_parse() {
        let mut ctx = GpuContext::new(DummyDevice::new(), 3).unwrap();
        for (label, source) in [
            ("depth", builtin::DEPTH),
            ("light cull", builtin::LIGHT_CULL),
            ("skybox", builtin::SKYBOX),
            ("fill", builtin::FILL),
            ("postprocess", builtin::POSTPROCESS),
            ("ibl", builtin::IBL),
        ] {
            let result = ctx.make_shader(&ShaderDesc {
                label,
                source,
                defines: &[],
            });
            assert!(result.is_ok(), "{label}: {:?}", result.err());
        }
        for defines in [&[][..], &["MATERIAL_TEXTURES"][..]] {
            let result = ctx.make_shader(&ShaderDesc {
                label: "forward",
                source: builtin::FORWARD,
                defines,
            });
            assert!(result.is_ok(), "forward {defines:?}: {:?}", result.err());
        }
    }

    #[test]
    fn test_shader_data_is_written() {
        let mut ctx = GpuContext::new(DummyDevice::new(), 3).unwrap();
        let data = ctx
            .make_shader_data(&ShaderDataDesc {
                label: "params",
                size: 8,
                contents: Some(&[1, 2, 3, 4, 5, 6, 7, 8]),
            })
            .unwrap();
        data.write(&mut ctx, 4, &[9, 9, 9, 9]).unwrap();
        assert_eq!(
            ctx.device().buffer_contents(data.buffer()),
            Some(&[1, 2, 3, 4, 9, 9, 9, 9][..])
        );
        assert!(ctx
            .make_shader_data(&ShaderDataDesc {
                label: "odd",
                size: 3,
                contents: None
            })
            .is_err());
    }
}
