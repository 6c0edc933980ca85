//! Token refresh coordination.

pub mod coordinator;

pub use coordinator::RefreshCoordinator;
