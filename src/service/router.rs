use std::sync::Arc;

use log::{debug, error, warn};

use super::dispatcher::ServiceDispatcher;
use crate::fault::{ErrorContext, FaultTranslator};
use crate::http::{HttpRequest, HttpResponse, RequestHandler};
use crate::security::WsSecurity;
use crate::soap::extract_action;

/// HTTP entry point for every SOAP service.
///
/// Transport problems become 4xx replies; everything past routing becomes
/// either a SOAP result or a SOAP fault, both with status 200.
pub struct SoapRouter {
    dispatcher: Arc<ServiceDispatcher>,
    faults: Arc<FaultTranslator>,
    security: Option<Arc<WsSecurity>>,
}

impl SoapRouter {
    pub fn new(dispatcher: Arc<ServiceDispatcher>, faults: Arc<FaultTranslator>) -> Self {
        Self {
            dispatcher,
            faults,
            security: None,
        }
    }

    /// Requires a UsernameToken for every operation above anonymous level.
    pub fn with_security(mut self, security: Arc<WsSecurity>) -> Self {
        self.security = Some(security);
        self
    }

    fn fault(&self, context: ErrorContext, error: &crate::OnvifError) -> HttpResponse {
        let mut response = HttpResponse::new(500);
        match self.faults.handle_error(&context, error, &mut response) {
            Ok(_) => response,
            Err(e) => {
                error!("fault translation failed: {}", e);
                HttpResponse::error(500)
            }
        }
    }
}

impl RequestHandler for SoapRouter {
    fn handle(&self, request: &HttpRequest) -> HttpResponse {
        let Some(service) = self.dispatcher.handler_for_path(&request.path) else {
            debug!("no service at {}", request.path);
            return HttpResponse::error(404);
        };
        if request.method != "POST" {
            return HttpResponse::error(405).with_header("Allow", "POST");
        }
        let Some(body) = request.body_str() else {
            warn!("non UTF-8 body for {}", service.name());
            return HttpResponse::error(400);
        };

        let Some(action) = extract_action(body) else {
            let err = crate::OnvifError::InvalidInput("missing SOAP action in Body".into());
            return self.fault(ErrorContext::new(service.name(), "Unknown"), &err);
        };

        if let Some(security) = &self.security {
            if let Err(e) = security.authorize(service.name(), &action, body) {
                return self.fault(ErrorContext::new(service.name(), &action), &e);
            }
        }

        match service.handle_request(&action, request) {
            Ok(response) => response,
            Err(e) => self.fault(ErrorContext::new(service.name(), &action), &e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::ErrorPattern;
    use crate::security::{SecurityUser, UserLevel, WsSecurityConfig};
    use crate::service::handler::{action, ServiceConfig, ServiceHandler};
    use crate::OnvifError;

    fn router() -> (SoapRouter, Arc<FaultTranslator>) {
        let dispatcher = Arc::new(ServiceDispatcher::new());
        let config = ServiceConfig::new("Device", "tds", "urn:tds", "/onvif/device_service");
        let actions = vec![
            action("GetHostname", |_, _| Ok("<tds:Name>cam</tds:Name>".into())),
            action("Broken", |_, _| Err(OnvifError::Internal("boom".into()))),
        ];
        dispatcher
            .register(Arc::new(ServiceHandler::init(config, actions).unwrap()))
            .unwrap();
        let faults = Arc::new(FaultTranslator::new());
        (SoapRouter::new(dispatcher, faults.clone()), faults)
    }

    fn envelope(op: &str) -> String {
        format!(
            r#"<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope"><s:Body><{op}/></s:Body></s:Envelope>"#
        )
    }

    fn post(path: &str, body: String) -> HttpRequest {
        HttpRequest::new("POST", path).with_body(body)
    }

    #[test]
    fn test_transport_errors() {
        let (router, _) = router();
        assert_eq!(
            router
                .handle(&post("/onvif/unknown", envelope("GetHostname")))
                .status,
            404
        );
        let get = HttpRequest::new("GET", "/onvif/device_service");
        assert_eq!(router.handle(&get).status, 405);
    }

    #[test]
    fn test_success() {
        let (router, faults) = router();
        let response = router.handle(&post("/onvif/device_service", envelope("GetHostname")));
        assert_eq!(response.status, 200);
        assert!(response.body_str().contains("GetHostnameResponse"));
        assert_eq!(faults.total(), 0);
    }

    #[test]
    fn test_unsupported_action_is_fault() {
        let (router, faults) = router();
        let response = router.handle(&post("/onvif/device_service", envelope("GetUsers")));
        assert_eq!(response.status, 200);
        assert!(response.body_str().contains("soap:Fault"));
        assert_eq!(faults.count(ErrorPattern::NotSupported), 1);
    }

    #[test]
    fn test_handler_error_is_receiver_fault() {
        let (router, faults) = router();
        let response = router.handle(&post("/onvif/device_service", envelope("Broken")));
        assert_eq!(response.status, 200);
        assert!(response.body_str().contains("soap:Receiver"));
        assert_eq!(faults.count(ErrorPattern::InternalError), 1);
    }

    #[test]
    fn test_missing_action_is_fault() {
        let (router, faults) = router();
        let body = r#"<s:Envelope xmlns:s="x"><s:Body></s:Body></s:Envelope>"#.to_string();
        let response = router.handle(&post("/onvif/device_service", body));
        assert_eq!(response.status, 200);
        assert_eq!(faults.count(ErrorPattern::MissingParameter), 1);
    }

    #[test]
    fn test_security_rejects_missing_token() {
        let (router, faults) = router();
        let mut config = WsSecurityConfig::default();
        config.set_user(SecurityUser::new("admin", "admin", UserLevel::Administrator));
        let router = router.with_security(Arc::new(WsSecurity::new(config)));

        let response = router.handle(&post("/onvif/device_service", envelope("GetHostname")));
        assert_eq!(response.status, 200);
        assert!(response.body_str().contains("soap:Fault"));
        assert_eq!(faults.count(ErrorPattern::AuthenticationFailed), 1);
    }
}
