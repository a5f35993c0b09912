mod buffer;
mod image;
mod shader;

pub use buffer::Buffer;
pub use image::{Image, Sampler};
pub use shader::{Shader, compile_startup_shaders};
