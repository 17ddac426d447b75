pub mod clock;
pub mod collector;
pub mod config;
pub mod first_byte;
pub mod gate;
pub mod get;
pub mod op;
pub mod source;

pub use objbench_store as store;
