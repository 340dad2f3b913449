//! Lifecycle coordination.

pub mod shutdown;

pub use shutdown::Shutdown;
