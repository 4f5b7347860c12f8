//! Backend abstraction layer
//!
//! Provides the [`RenderDevice`] trait with two implementations:
//! - **Vulkan**: direct Vulkan API via ash (feature `vulkan-backend`)
//! - **Dummy**: records commands without a GPU, for tests and headless runs

pub mod dummy;
pub mod shader;
pub mod traits;
pub mod types;

#[cfg(feature = "vulkan-backend")]
pub mod vulkan;

pub use dummy::DummyDevice;
pub use traits::*;
pub use types::*;

#[cfg(feature = "vulkan-backend")]
pub use vulkan::VulkanDevice;
