pub mod surface;
pub mod swap_chain;
