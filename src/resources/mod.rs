//! Resource management
//!
//! Plain description structs in, owned device objects out: textures, meshes,
//! shaders and shader data. Every object created here is released through the
//! [`DeferredDestructor`] when its owner drops it.

mod mesh;
mod owned;
mod shader;
mod texture;

pub use mesh::*;
pub use owned::*;
pub use shader::*;
pub use texture::*;
