use std::sync::Arc;

use log::{debug, info};
use parking_lot::RwLock;

use super::handler::{ServiceConfig, ServiceHandler};
use crate::http::{HttpRequest, HttpResponse};
use crate::{OnvifError, Result};

pub const MAX_SERVICES: usize = 16;

/// Registry of hosted services, keyed by name and by XAddr path.
#[derive(Debug, Default)]
pub struct ServiceDispatcher {
    services: RwLock<Vec<Arc<ServiceHandler>>>,
}

impl ServiceDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, handler: Arc<ServiceHandler>) -> Result<()> {
        let mut services = self.services.write();
        if services.iter().any(|s| s.name() == handler.name()) {
            return Err(OnvifError::AlreadyExists(format!("service {}", handler.name())));
        }
        if services
            .iter()
            .any(|s| s.config().xaddr_path == handler.config().xaddr_path)
        {
            return Err(OnvifError::AlreadyExists(format!(
                "service path {}",
                handler.config().xaddr_path
            )));
        }
        if services.len() >= MAX_SERVICES {
            return Err(OnvifError::AlreadyAtCapacity(format!(
                "{} services registered",
                MAX_SERVICES
            )));
        }
        info!(
            "registered {} service at {}",
            handler.name(),
            handler.config().xaddr_path
        );
        services.push(handler);
        Ok(())
    }

    /// Removes a service and tears its handler down.
    pub fn unregister(&self, name: &str) -> Result<()> {
        let handler = {
            let mut services = self.services.write();
            let index = services
                .iter()
                .position(|s| s.name() == name)
                .ok_or_else(|| OnvifError::NotFound(format!("service {}", name)))?;
            services.remove(index)
        };
        handler.cleanup();
        info!("unregistered {} service", name);
        Ok(())
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.services.read().iter().any(|s| s.name() == name)
    }

    pub fn services(&self) -> Vec<ServiceConfig> {
        self.services
            .read()
            .iter()
            .map(|s| s.config().clone())
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<Arc<ServiceHandler>> {
        self.services
            .read()
            .iter()
            .find(|s| s.name() == name)
            .cloned()
    }

    pub fn handler_for_path(&self, path: &str) -> Option<Arc<ServiceHandler>> {
        self.services
            .read()
            .iter()
            .find(|s| s.config().xaddr_path == path)
            .cloned()
    }

    /// Name of the service mounted at `path`.
    pub fn route(&self, path: &str) -> Option<String> {
        self.handler_for_path(path).map(|s| s.name().to_string())
    }

    /// The handler runs without the registry lock held.
    pub fn dispatch(
        &self,
        service: &str,
        action: &str,
        request: &HttpRequest,
    ) -> Result<HttpResponse> {
        let handler = self
            .get(service)
            .ok_or_else(|| OnvifError::NotFound(format!("service {}", service)))?;
        debug!("dispatching {}::{}", service, action);
        handler.handle_request(action, request)
    }

    /// Cleans up every service; used on shutdown.
    pub fn clear(&self) {
        let drained: Vec<_> = self.services.write().drain(..).collect();
        for handler in drained {
            handler.cleanup();
        }
    }
}
