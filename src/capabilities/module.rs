//! Compiled capability modules and their request handlers.
//!
//! Every capability is compiled into the binary. A module declares its
//! descriptors and hands out one [`EndpointHandler`] that serves all of them;
//! a reload never swaps code, it only changes which of these handlers are
//! reachable and under what access policy.
//!
//! Modules register themselves at link time:
//!
//! ```rust,ignore
//! fn create() -> Arc<dyn CapabilityModule> { Arc::new(MyModule) }
//! inventory::submit! { ModuleRegistration { create } }
//! ```
//!
//! and [`ModuleSet::linked`] collects them at startup.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::descriptor::CapabilityDescriptor;

/// Boxed error a module may return from [`CapabilityModule::descriptors`].
pub type DescribeError = Box<dyn std::error::Error + Send + Sync>;

// ============================================================================
// Handlers
// ============================================================================

/// A request routed to a capability handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlerRequest {
    /// Request path as matched in the registry.
    pub path: String,
    /// Single HTTP verb.
    pub method: String,
    /// Query parameters merged with the JSON body (body wins).
    #[serde(default)]
    pub params: Value,
}

/// What a handler produces.
#[derive(Debug, Clone, PartialEq)]
pub enum HandlerResponse {
    Json(Value),
    Binary { content_type: String, body: Vec<u8> },
}

/// Handler failures.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The caller sent unusable parameters.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// The third-party service behind the capability failed.
    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Handler error: {0}")]
    Internal(String),
}

/// Serves every descriptor of one module.
#[async_trait]
pub trait EndpointHandler: Send + Sync {
    async fn handle(&self, request: HandlerRequest) -> Result<HandlerResponse, HandlerError>;
}

// ============================================================================
// Modules
// ============================================================================

/// A compiled source module.
pub trait CapabilityModule: Send + Sync {
    /// Stable module identifier, recorded as `source_module_id` in the catalog.
    fn id(&self) -> &str;

    /// Descriptors this module serves. Called once per discovery pass.
    fn descriptors(&self) -> Result<Vec<CapabilityDescriptor>, DescribeError>;

    /// The handler serving every descriptor of this module.
    fn handler(&self) -> Arc<dyn EndpointHandler>;
}

/// Link-time registration entry.
pub struct ModuleRegistration {
    pub create: fn() -> Arc<dyn CapabilityModule>,
}

inventory::collect!(ModuleRegistration);

/// The set of compiled modules discovery enumerates.
///
/// Iteration order is registration order, which keeps discovery output
/// stable across passes.
#[derive(Clone, Default)]
pub struct ModuleSet {
    modules: Vec<Arc<dyn CapabilityModule>>,
    index: HashMap<String, usize>,
}

impl fmt::Debug for ModuleSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleSet")
            .field("modules", &self.ids())
            .finish()
    }
}

impl ModuleSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Collect every module submitted through `inventory`, ordered by id.
    pub fn linked() -> Self {
        let mut modules: Vec<Arc<dyn CapabilityModule>> = inventory::iter::<ModuleRegistration>
            .into_iter()
            .map(|reg| (reg.create)())
            .collect();
        modules.sort_by(|a, b| a.id().cmp(b.id()));

        let mut set = Self::new();
        for module in modules {
            set.register(module);
        }
        tracing::info!(modules = set.len(), "collected linked capability modules");
        set
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, module: Arc<dyn CapabilityModule>) -> Self {
        self.register(module);
        self
    }

    /// Register a module. A second module with an already registered id is
    /// ignored.
    pub fn register(&mut self, module: Arc<dyn CapabilityModule>) {
        let id = module.id().to_string();
        if self.index.contains_key(&id) {
            log::warn!("Ignoring duplicate capability module registration: {}", id);
            return;
        }
        self.index.insert(id, self.modules.len());
        self.modules.push(module);
    }

    pub fn get(&self, id: &str) -> Option<&Arc<dyn CapabilityModule>> {
        self.index.get(id).map(|&i| &self.modules[i])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn CapabilityModule>> {
        self.modules.iter()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.modules.iter().map(|m| m.id()).collect()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Handler table keyed by module id, for the registry builder.
    pub fn handlers(&self) -> HashMap<String, Arc<dyn EndpointHandler>> {
        self.modules
            .iter()
            .map(|m| (m.id().to_string(), m.handler()))
            .collect()
    }
}
