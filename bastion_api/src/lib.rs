pub mod blob;
pub mod constants;
pub mod error;
pub mod role;
