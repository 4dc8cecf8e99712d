pub mod gpu;
pub mod shader;
pub mod uniforms;
