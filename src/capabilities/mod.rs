//! # Capabilities
//!
//! Where endpoint metadata comes from and how it is made canonical.
//!
//! ## Discovery flow
//!
//! 1. Compiled [`CapabilityModule`]s describe the endpoints they serve
//! 2. Manifest YAML files add endpoints for those same compiled modules
//! 3. [`MetadataDiscovery::discover`] collects both, isolating failures
//! 4. [`normalize`](normalize::normalize) splits multi-verb descriptors so
//!    each one maps to exactly one `(path, method)` catalog row

pub mod builtin;
pub mod descriptor;
pub mod discovery;
pub mod error;
pub mod manifest;
pub mod module;
pub mod normalize;

pub use descriptor::{CapabilityDescriptor, ExampleSpec, ParameterSpec, ResponseKind};
pub use discovery::{DiscoveryOutcome, MetadataDiscovery};
pub use error::{ModuleLoadError, ValidationError};
pub use manifest::{ManifestEndpoint, ManifestFile};
pub use module::{
    CapabilityModule, DescribeError, EndpointHandler, HandlerError, HandlerRequest,
    HandlerResponse, ModuleRegistration, ModuleSet,
};
pub use normalize::{normalize, NormalizeOutcome};
