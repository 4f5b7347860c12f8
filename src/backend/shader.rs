//! WGSL front end shared by the backends.
//!
//! Modules are parsed and validated once at creation. Pipeline-overridable
//! constants are resolved per pipeline, so one module serves every variant.

use std::borrow::Cow;

use naga::valid::{Capabilities, ModuleInfo, ValidationFlags, Validator};

use crate::backend::types::SpecializationConstants;
use crate::error::{RenderError, RenderResult};

/// A parsed and validated WGSL module.
#[derive(Debug)]
pub struct ParsedShader {
    pub label: String,
    pub module: naga::Module,
    pub info: ModuleInfo,
}

impl ParsedShader {
    pub fn parse(label: &str, source: &str) -> RenderResult<Self> {
        let module = naga::front::wgsl::parse_str(source).map_err(|e| {
            RenderError::ShaderCompilation {
                label: label.to_string(),
                message: e.emit_to_string(source),
            }
        })?;

        let info = validator().validate(&module).map_err(|e| RenderError::ShaderCompilation {
            label: label.to_string(),
            message: format!("validation error: {e}"),
        })?;

        Ok(Self {
            label: label.to_string(),
            module,
            info,
        })
    }

    /// Check that `name` is an entry point of the given stage.
    pub fn require_entry_point(&self, name: &str, stage: naga::ShaderStage) -> RenderResult<()> {
        if self
            .module
            .entry_points
            .iter()
            .any(|ep| ep.name == name && ep.stage == stage)
        {
            Ok(())
        } else {
            Err(RenderError::ShaderCompilation {
                label: self.label.clone(),
                message: format!("entry point '{name}' not found for stage {stage:?}"),
            })
        }
    }

    /// Resolve `override` declarations against `constants`.
    pub fn specialize(
        &self,
        constants: &SpecializationConstants,
    ) -> RenderResult<(Cow<'_, naga::Module>, Cow<'_, ModuleInfo>)> {
        let constants: naga::back::PipelineConstants = constants
            .iter()
            .map(|(name, value)| (name.clone(), *value))
            .collect();

        for name in constants.keys() {
            if !self
                .module
                .overrides
                .iter()
                .any(|(_, o)| o.name.as_deref() == Some(name.as_str()))
            {
                return Err(RenderError::ShaderCompilation {
                    label: self.label.clone(),
                    message: format!("unknown override '{name}'"),
                });
            }
        }

        naga::back::pipeline_constants::process_overrides(&self.module, &self.info, &constants)
            .map_err(|e| RenderError::ShaderCompilation {
                label: self.label.clone(),
                message: format!("override error: {e}"),
            })
    }
}

fn validator() -> Validator {
    Validator::new(ValidationFlags::all(), Capabilities::all())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = r#"
override SCALE: f32 = 1.0;
override ENABLED: bool = false;

@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> @builtin(position) vec4<f32> {
    var p = vec2<f32>(f32(index & 1u), f32(index >> 1u)) * SCALE;
    if (ENABLED) {
        p = p * 2.0;
    }
    return vec4<f32>(p, 0.0, 1.0);
}
"#;

    #[test]
    fn test_parse_and_find_entry_point() {
        let shader = ParsedShader::parse("test", SOURCE).unwrap();
        assert!(shader
            .require_entry_point("vs_main", naga::ShaderStage::Vertex)
            .is_ok());
        assert!(shader
            .require_entry_point("vs_main", naga::ShaderStage::Fragment)
            .is_err());
    }

    #[test]
    fn test_specialize_resolves_overrides() {
        let shader = ParsedShader::parse("test", SOURCE).unwrap();
        let mut constants = SpecializationConstants::new();
        constants.insert("SCALE".into(), 2.0);
        constants.insert("ENABLED".into(), 1.0);
        let (module, _) = shader.specialize(&constants).unwrap();
        assert!(matches!(module, Cow::Owned(_)));
    }

    #[test]
    fn test_specialize_rejects_unknown_override() {
        let shader = ParsedShader::parse("test", SOURCE).unwrap();
        let mut constants = SpecializationConstants::new();
        constants.insert("MISSING".into(), 1.0);
        assert!(matches!(
            shader.specialize(&constants),
            Err(RenderError::ShaderCompilation { .. })
        ));
    }

    #[test]
    fn test_parse_error_is_reported() {
        let err = ParsedShader::parse("broken", "fn main( {").unwrap_err();
        assert!(matches!(err, RenderError::ShaderCompilation { label, .. } if label == "broken"));
    }
}
