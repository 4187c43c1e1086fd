pub mod adapter;
pub mod context;
pub mod device;
pub mod info;
