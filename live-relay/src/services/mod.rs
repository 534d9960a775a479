//! Service layer: construction and lifecycle of the running services.

pub mod container;

pub use container::{ContainerOptions, ServiceContainer, ServiceStats};
