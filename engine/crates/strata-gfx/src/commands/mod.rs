pub mod command_list;
pub mod submit;
pub mod tracker;
