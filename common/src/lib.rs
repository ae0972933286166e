pub mod config;
pub mod frame;
pub mod jpeg;
pub mod record;
pub mod source;
