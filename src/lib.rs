//! Tiled forward render core
//!
//! A hybrid renderer over a thin device abstraction:
//! - **Vulkan**: direct Vulkan API via ash (feature `vulkan-backend`)
//! - **Dummy**: a recording device for tests and headless runs
//!
//! # Features
//! - Depth pre-pass and compute tile light culling (Forward+)
//! - Cascaded shadow maps for one directional light
//! - Forward pass with a memoized pipeline variant per material signature
//! - Image-based lighting baked once per environment
//! - Ping-pong post-process chain (SSAO, FXAA, blur, sharpen, motion blur, outline)
//! - Ring of frames in flight with deferred resource destruction

pub mod backend;
pub mod cache;
pub mod config;
pub mod context;
pub mod culling;
pub mod error;
pub mod frame;
pub mod ibl;
pub mod material;
pub mod pipeline;
pub mod postprocess;
pub mod renderer;
pub mod resources;
pub mod scene;
pub mod shadow;
pub mod viewport;

pub use backend::{DummyDevice, RenderDevice};
#[cfg(feature = "vulkan-backend")]
pub use backend::VulkanDevice;
pub use config::RendererConfig;
pub use context::GpuContext;
pub use error::{OrAbort, RenderError, RenderResult};
pub use frame::FrameStats;
pub use ibl::Environment;
pub use material::{AlphaMode, Material, MaterialDesc, MaterialSignature, TextureSlot};
pub use postprocess::{PostProcessChain, PostStep};
pub use renderer::{Frame, FramePhase, Renderer};
pub use resources::{Mesh, MeshDesc, Texture, TextureDesc, TextureKind};
pub use scene::Light;
pub use viewport::{Viewport, ViewportDesc};
