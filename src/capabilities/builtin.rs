//! Built-in `meta` module, linked into every binary.

use std::sync::Arc;

use async_trait::async_trait;

use super::descriptor::{CapabilityDescriptor, ExampleSpec, ParameterSpec};
use super::module::{
    CapabilityModule, DescribeError, EndpointHandler, HandlerError, HandlerRequest,
    HandlerResponse, ModuleRegistration,
};

/// Serves `/meta/echo`, returning the request parameters unchanged.
pub struct MetaModule;

struct EchoHandler;

#[async_trait]
impl EndpointHandler for EchoHandler {
    async fn handle(&self, request: HandlerRequest) -> Result<HandlerResponse, HandlerError> {
        Ok(HandlerResponse::Json(serde_json::json!({
            "method": request.method,
            "echo": request.params,
        })))
    }
}

impl CapabilityModule for MetaModule {
    fn id(&self) -> &str {
        "meta"
    }

    fn descriptors(&self) -> Result<Vec<CapabilityDescriptor>, DescribeError> {
        Ok(vec![CapabilityDescriptor::new("/meta/echo", "GET, POST", "Echo")
            .with_description("Returns the request parameters unchanged")
            .with_category("meta")
            .with_parameter(ParameterSpec::optional("text"))
            .with_example(ExampleSpec {
                title: Some("Echo text".to_string()),
                params: serde_json::json!({ "text": "hello" }),
            })])
    }

    fn handler(&self) -> Arc<dyn EndpointHandler> {
        Arc::new(EchoHandler)
    }
}

fn create_meta() -> Arc<dyn CapabilityModule> {
    Arc::new(MetaModule)
}

inventory::submit! {
    ModuleRegistration { create: create_meta }
}
