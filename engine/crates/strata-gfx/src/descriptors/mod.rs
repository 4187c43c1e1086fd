pub mod descriptor_set;
pub mod layout_cache;
