//! Request dispatch against the published snapshot.

use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use super::active::ActiveRegistry;
use crate::capabilities::{HandlerError, HandlerRequest, HandlerResponse};
use crate::catalog::{AccessTier, CallerPlan};
use crate::notify::{AccessTierCache, RateLimitCache};

/// An incoming call to a capability.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub path: String,
    pub method: String,
    pub plan: CallerPlan,
    /// Identity used for rate limiting (API key, or the peer address).
    pub caller: String,
    pub params: Value,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no endpoint at {path}")]
    NotFound { path: String },

    #[error("{method} not allowed on {path}")]
    MethodNotAllowed {
        path: String,
        method: String,
        allowed: Vec<String>,
    },

    #[error("{method} {path} is disabled")]
    Disabled { path: String, method: String },

    #[error("{method} {path} requires the {required} plan")]
    Forbidden {
        path: String,
        method: String,
        required: AccessTier,
    },

    #[error("rate limit exceeded, retry in {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error(transparent)]
    Handler(#[from] HandlerError),
}

/// Resolves requests on the current snapshot and applies access policy.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<ActiveRegistry>,
    tiers: Arc<AccessTierCache>,
    limits: Arc<RateLimitCache>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<ActiveRegistry>,
        tiers: Arc<AccessTierCache>,
        limits: Arc<RateLimitCache>,
    ) -> Self {
        Self {
            registry,
            tiers,
            limits,
        }
    }

    pub async fn dispatch(&self, request: DispatchRequest) -> Result<HandlerResponse, DispatchError> {
        let method = request.method.to_ascii_uppercase();
        // Pinned for the whole request; a concurrent swap does not affect it.
        let snapshot = self.registry.load();

        let Some(entry) = snapshot.resolve(&request.path, &method) else {
            let allowed = snapshot.methods_for(&request.path);
            if allowed.is_empty() {
                return Err(DispatchError::NotFound { path: request.path });
            }
            return Err(DispatchError::MethodNotAllowed {
                path: request.path,
                method,
                allowed,
            });
        };

        let tier = match self.tiers.get(&request.path, &method) {
            Some(cached) if !cached.active => {
                return Err(DispatchError::Disabled {
                    path: request.path,
                    method,
                });
            }
            Some(cached) => cached.tier,
            None => entry.record.access_tier,
        };

        if tier == AccessTier::Disabled {
            return Err(DispatchError::Disabled {
                path: request.path,
                method,
            });
        }
        if !tier.admits(request.plan) {
            return Err(DispatchError::Forbidden {
                path: request.path,
                method,
                required: tier,
            });
        }

        self.limits
            .check(&request.caller, &request.path, &method, tier)
            .map_err(|retry_after_ms| DispatchError::RateLimited { retry_after_ms })?;

        let handler = Arc::clone(&entry.handler);
        let response = handler
            .handle(HandlerRequest {
                path: request.path,
                method,
                params: request.params,
            })
            .await?;
        Ok(response)
    }
}
