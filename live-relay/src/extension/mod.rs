//! Extensions: discovery, dependency download and boot convergence.

pub mod boot;
pub mod manifest;
pub mod registry;
pub mod resolver;

pub use boot::{
    BootInputs, BootOptions, BootOutcome, BootSequence, BootState, ProcessRestarter, Restarter,
    SKIP_DOWNLOAD_FLAG, next_state, relaunch_plan,
};
pub use manifest::{ComponentEntry, Dependency, ExtensionMeta};
pub use registry::{
    ExtensionCatalog, ExtensionRegistry, HandlerRegistry, LoadedExtension, MissingDependencies,
};
pub use resolver::{ArtifactFetcher, DependencyResolver, HttpFetcher};
