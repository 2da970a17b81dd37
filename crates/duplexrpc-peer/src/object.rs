use std::collections::HashMap;
use std::sync::Arc;

use crate::control::is_reserved;
use crate::error::{Result, RpcError};
use crate::method::Endpoint;

/// Endpoint table of one service type.
pub struct RpcObject<T: ?Sized> {
    name: String,
    endpoints: HashMap<String, Arc<dyn Endpoint<T>>>,
}

impl<T: ?Sized> RpcObject<T> {
    pub fn builder(name: impl Into<String>) -> RpcObjectBuilder<T> {
        RpcObjectBuilder {
            name: name.into(),
            endpoints: HashMap::new(),
        }
    }

    /// Declared identity of the service type.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn find_endpoint(&self, endpoint: &str) -> Result<&Arc<dyn Endpoint<T>>> {
        self.endpoints
            .get(endpoint)
            .ok_or_else(|| RpcError::EndpointNotFound {
                endpoint: endpoint.to_string(),
                service: self.name.clone(),
            })
    }

    /// Endpoint names in sorted order.
    pub fn endpoint_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.endpoints.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

pub struct RpcObjectBuilder<T: ?Sized> {
    name: String,
    endpoints: HashMap<String, Arc<dyn Endpoint<T>>>,
}

impl<T: ?Sized> RpcObjectBuilder<T> {
    /// Add an endpoint. Names must be unique and must not be reserved.
    pub fn endpoint(mut self, endpoint: Arc<dyn Endpoint<T>>) -> Result<Self> {
        let name = endpoint.name().to_string();
        if is_reserved(&name) {
            return Err(RpcError::ReservedEndpoint(name));
        }
        if self.endpoints.contains_key(&name) {
            return Err(RpcError::DuplicateEndpoint {
                endpoint: name,
                service: self.name,
            });
        }
        self.endpoints.insert(name, endpoint);
        Ok(self)
    }

    pub fn build(self) -> RpcObject<T> {
        RpcObject {
            name: self.name,
            endpoints: self.endpoints,
        }
    }
}
