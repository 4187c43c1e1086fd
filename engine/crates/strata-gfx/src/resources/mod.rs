pub mod buffer;
pub mod handles;
pub mod sampler;
pub mod table;
pub mod texture;
