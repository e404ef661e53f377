pub mod chain;
pub mod chunks;
pub mod gap;
pub mod signature;
pub mod walk;
