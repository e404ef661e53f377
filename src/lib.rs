pub mod builder;
pub mod cli;
pub mod config;
pub mod credentials;
pub mod device;
pub mod fingerprint;
pub mod format;
pub mod logging;
pub mod unlock;
