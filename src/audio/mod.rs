pub mod decode;
pub mod sampler;
