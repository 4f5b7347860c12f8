//! Scene data handed to the renderer each frame.

mod camera;
mod light;

pub use camera::*;
pub use light::*;
