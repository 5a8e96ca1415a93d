use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};

use crate::http::HttpRequest;
use crate::http::HttpResponse;
use crate::soap::{ContextPool, SoapContext, SoapRequest, DEFAULT_OUTPUT_CAPACITY};
use crate::{OnvifError, Result};

const MAX_IDLE_CONTEXTS: usize = 8;

/// Static description of one hosted ONVIF service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub service_type: String,
    pub service_name: String,
    pub namespace_prefix: String,
    pub namespace_uri: String,
    pub xaddr_path: String,
}

impl ServiceConfig {
    pub fn new(service_name: &str, prefix: &str, namespace_uri: &str, xaddr_path: &str) -> Self {
        Self {
            service_type: service_name.to_lowercase(),
            service_name: service_name.to_string(),
            namespace_prefix: prefix.to_string(),
            namespace_uri: namespace_uri.to_string(),
            xaddr_path: xaddr_path.to_string(),
        }
    }
}

/// One named operation of a service.
///
/// `call` returns the XML placed inside the `<ActionResponse>` element.
pub trait ServiceAction: Send + Sync {
    fn name(&self) -> &str;

    fn call(&self, request: &SoapRequest, codec: &mut SoapContext) -> Result<String>;
}

/// Adapts a closure into a [`ServiceAction`].
pub struct FnAction<F> {
    name: String,
    f: F,
}

impl<F> FnAction<F>
where
    F: Fn(&SoapRequest, &mut SoapContext) -> Result<String> + Send + Sync + 'static,
{
    pub fn new(name: &str, f: F) -> Self {
        Self {
            name: name.to_string(),
            f,
        }
    }
}

impl<F> ServiceAction for FnAction<F>
where
    F: Fn(&SoapRequest, &mut SoapContext) -> Result<String> + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn call(&self, request: &SoapRequest, codec: &mut SoapContext) -> Result<String> {
        (self.f)(request, codec)
    }
}

/// Shorthand for building an action table entry from a closure.
pub fn action<F>(name: &str, f: F) -> Arc<dyn ServiceAction>
where
    F: Fn(&SoapRequest, &mut SoapContext) -> Result<String> + Send + Sync + 'static,
{
    Arc::new(FnAction::new(name, f))
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ActionStats {
    pub call_count: u64,
    pub error_count: u64,
    pub avg_response_time: Duration,
}

impl ActionStats {
    fn record(&mut self, elapsed: Duration, failed: bool) {
        self.call_count += 1;
        if failed {
            self.error_count += 1;
        }
        // running mean: avg += (x - avg) / n
        let avg = self.avg_response_time.as_secs_f64();
        let next = avg + (elapsed.as_secs_f64() - avg) / self.call_count as f64;
        self.avg_response_time = Duration::from_secs_f64(next.max(0.0));
    }
}

/// Snapshot of a handler's counters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServiceStats {
    pub total_requests: u64,
    pub total_success: u64,
    pub total_errors: u64,
    pub actions: HashMap<String, ActionStats>,
}

struct ActionEntry {
    action: Arc<dyn ServiceAction>,
    stats: Arc<Mutex<ActionStats>>,
}

impl ActionEntry {
    fn new(action: Arc<dyn ServiceAction>) -> Self {
        Self {
            action,
            stats: Arc::new(Mutex::new(ActionStats::default())),
        }
    }
}

/// Routes actions of one service to their implementations and times them.
///
/// The action table is a `Vec` looked up by exact name; removal shifts the
/// remaining entries down.
pub struct ServiceHandler {
    config: ServiceConfig,
    actions: RwLock<Vec<ActionEntry>>,
    contexts: ContextPool,
    total_requests: AtomicU64,
    total_errors: AtomicU64,
    cleaned: AtomicBool,
}

impl std::fmt::Debug for ServiceHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceHandler")
            .field("config", &self.config)
            .field("actions", &self.action_names())
            .finish()
    }
}

impl ServiceHandler {
    pub fn init(config: ServiceConfig, actions: Vec<Arc<dyn ServiceAction>>) -> Result<Self> {
        if config.service_name.is_empty() {
            return Err(OnvifError::InvalidInput("service name is empty".into()));
        }
        if actions.is_empty() {
            return Err(OnvifError::InvalidInput(format!(
                "{} has an empty action table",
                config.service_name
            )));
        }

        let mut table: Vec<ActionEntry> = Vec::with_capacity(actions.len());
        for action in actions {
            if table.iter().any(|e| e.action.name() == action.name()) {
                return Err(OnvifError::AlreadyExists(format!(
                    "action {} in {}",
                    action.name(),
                    config.service_name
                )));
            }
            table.push(ActionEntry::new(action));
        }

        let contexts = ContextPool::new(DEFAULT_OUTPUT_CAPACITY, MAX_IDLE_CONTEXTS)?;
        info!(
            "{} service initialized with {} actions",
            config.service_name,
            table.len()
        );
        Ok(Self {
            config,
            actions: RwLock::new(table),
            contexts,
            total_requests: AtomicU64::new(0),
            total_errors: AtomicU64::new(0),
            cleaned: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn name(&self) -> &str {
        &self.config.service_name
    }

    pub fn action_names(&self) -> Vec<String> {
        self.actions
            .read()
            .iter()
            .map(|e| e.action.name().to_string())
            .collect()
    }

    pub fn has_action(&self, name: &str) -> bool {
        self.actions.read().iter().any(|e| e.action.name() == name)
    }

    pub fn handle_request(&self, action_name: &str, request: &HttpRequest) -> Result<HttpResponse> {
        let entry = {
            let actions = self.actions.read();
            actions
                .iter()
                .find(|e| e.action.name() == action_name)
                .map(|e| (e.action.clone(), e.stats.clone()))
        };
        let (action, stats) = entry.ok_or_else(|| {
            OnvifError::UnsupportedAction(format!("{}::{}", self.config.service_name, action_name))
        })?;

        self.total_requests.fetch_add(1, Ordering::Relaxed);

        let mut codec = self.contexts.acquire()?;
        let started = Instant::now();
        let result = Self::invoke(&self.config, action.as_ref(), request, &mut codec);
        let elapsed = started.elapsed();

        stats.lock().record(elapsed, result.is_err());
        if let Err(e) = &result {
            self.total_errors.fetch_add(1, Ordering::Relaxed);
            codec.set_error(e.to_string());
            warn!(
                "{}::{} failed after {:?}: {}",
                self.config.service_name, action_name, elapsed, e
            );
        } else {
            debug!(
                "{}::{} completed in {:?}",
                self.config.service_name, action_name, elapsed
            );
        }

        result.map(HttpResponse::soap)
    }

    fn invoke(
        config: &ServiceConfig,
        action: &dyn ServiceAction,
        request: &HttpRequest,
        codec: &mut SoapContext,
    ) -> Result<String> {
        let body = request
            .body_str()
            .ok_or_else(|| OnvifError::Codec("request body is not UTF-8".into()))?;
        let soap = codec.parse_request(body)?;
        let inner = action.call(&soap, codec)?;
        codec.generate_response(
            &config.namespace_prefix,
            &config.namespace_uri,
            action.name(),
            &inner,
        )
    }

    pub fn register_action(&self, action: Arc<dyn ServiceAction>) -> Result<()> {
        let mut actions = self.actions.write();
        if actions.iter().any(|e| e.action.name() == action.name()) {
            return Err(OnvifError::AlreadyExists(format!(
                "action {} in {}",
                action.name(),
                self.config.service_name
            )));
        }
        debug!("{} registered action {}", self.config.service_name, action.name());
        actions.push(ActionEntry::new(action));
        Ok(())
    }

    pub fn unregister_action(&self, name: &str) -> Result<()> {
        let mut actions = self.actions.write();
        let index = actions
            .iter()
            .position(|e| e.action.name() == name)
            .ok_or_else(|| {
                OnvifError::NotFound(format!("action {} in {}", name, self.config.service_name))
            })?;
        actions.remove(index);
        Ok(())
    }

    pub fn stats(&self) -> ServiceStats {
        let actions = self
            .actions
            .read()
            .iter()
            .map(|e| (e.action.name().to_string(), *e.stats.lock()))
            .collect();
        let total_requests = self.total_requests.load(Ordering::Relaxed);
        let total_errors = self.total_errors.load(Ordering::Relaxed);
        ServiceStats {
            total_requests,
            total_success: total_requests.saturating_sub(total_errors),
            total_errors,
            actions,
        }
    }

    /// Drops the action table and the codec contexts. A second call does nothing.
    pub fn cleanup(&self) {
        if self.cleaned.swap(true, Ordering::AcqRel) {
            return;
        }
        self.actions.write().clear();
        self.contexts.close();
        info!("{} service cleaned up", self.config.service_name);
    }

    pub fn is_cleaned_up(&self) -> bool {
        self.cleaned.load(Ordering::Acquire)
    }
}

impl Drop for ServiceHandler {
    fn drop(&mut self) {
        self.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const REQUEST: &str = r#"<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope"><s:Body><tds:Echo xmlns:tds="urn:test"><tds:Text>hello</tds:Text></tds:Echo></s:Body></s:Envelope>"#;

    fn config() -> ServiceConfig {
        ServiceConfig::new("Test", "tds", "urn:test", "/onvif/test_service")
    }

    fn echo() -> Arc<dyn ServiceAction> {
        action("Echo", |req, _| {
            Ok(format!("<tds:Text>{}</tds:Text>", req.required_param("Text")?))
        })
    }

    fn post(body: &str) -> HttpRequest {
        HttpRequest::new("POST", "/onvif/test_service").with_body(body.to_string())
    }

    #[test]
    fn test_init_validation() {
        assert!(matches!(
            ServiceHandler::init(config(), vec![]),
            Err(OnvifError::InvalidInput(_))
        ));
        assert!(matches!(
            ServiceHandler::init(config(), vec![echo(), echo()]),
            Err(OnvifError::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_dispatch_hit_and_miss() {
        let handler = ServiceHandler::init(config(), vec![echo()]).unwrap();

        let response = handler.handle_request("Echo", &post(REQUEST)).unwrap();
        assert_eq!(response.status, 200);
        assert!(response
            .body_str()
            .contains("<tds:EchoResponse><tds:Text>hello</tds:Text></tds:EchoResponse>"));

        let missing = handler.handle_request("Nope", &post(REQUEST));
        assert!(matches!(missing, Err(OnvifError::UnsupportedAction(_))));
        assert_eq!(handler.stats().total_requests, 1);
    }

    #[test]
    fn test_errors_are_counted_per_action() {
        let failing = action("Fail", |_, _| Err(OnvifError::NotFound("thing".into())));
        let handler = ServiceHandler::init(config(), vec![echo(), failing]).unwrap();

        assert!(handler.handle_request("Fail", &post(REQUEST)).is_err());
        handler.handle_request("Echo", &post(REQUEST)).unwrap();
        handler.handle_request("Echo", &post(REQUEST)).unwrap();

        let stats = handler.stats();
        assert_eq!(stats.total_requests, 3);
        assert_eq!(stats.total_errors, 1);
        assert_eq!(stats.total_success, 2);
        assert_eq!(stats.actions["Fail"].error_count, 1);
        assert_eq!(stats.actions["Echo"].call_count, 2);
        assert_eq!(stats.actions["Echo"].error_count, 0);
    }

    #[test]
    fn test_register_and_unregister() {
        let handler = ServiceHandler::init(config(), vec![echo()]).unwrap();
        assert!(matches!(
            handler.register_action(echo()),
            Err(OnvifError::AlreadyExists(_))
        ));
        assert!(handler.has_action("Echo"));

        handler
            .register_action(action("Ping", |_, _| Ok(String::new())))
            .unwrap();
        handler
            .register_action(action("Pong", |_, _| Ok(String::new())))
            .unwrap();
        handler.unregister_action("Ping").unwrap();
        assert_eq!(handler.action_names(), vec!["Echo", "Pong"]);
        assert!(matches!(
            handler.unregister_action("Ping"),
            Err(OnvifError::NotFound(_))
        ));
    }

    #[test]
    fn test_cleanup_is_idempotent() {
        let handler = ServiceHandler::init(config(), vec![echo()]).unwrap();
        handler.cleanup();
        handler.cleanup();
        assert!(handler.is_cleaned_up());
        assert!(matches!(
            handler.handle_request("Echo", &post(REQUEST)),
            Err(OnvifError::UnsupportedAction(_))
        ));
    }

    #[test]
    fn test_malformed_body_is_codec_error() {
        let handler = ServiceHandler::init(config(), vec![echo()]).unwrap();
        let result = handler.handle_request("Echo", &post("<s:Envelope><s:Body>"));
        assert!(matches!(result, Err(OnvifError::Codec(_))));
        assert_eq!(handler.stats().actions["Echo"].error_count, 1);
    }

    #[test]
    fn test_running_average() {
        let mut stats = ActionStats::default();
        stats.record(Duration::from_millis(10), false);
        stats.record(Duration::from_millis(30), true);
        assert_eq!(stats.call_count, 2);
        assert_eq!(stats.error_count, 1);
        let avg = stats.avg_response_time.as_secs_f64();
        assert!((avg - 0.020).abs() < 1e-6);
    }

    #[quickcheck_macros::quickcheck]
    fn prop_stats_count_every_call(calls: Vec<bool>) -> bool {
        let calls = &calls[..calls.len().min(64)];
        let failing = action("Fail", |_, _| Err(OnvifError::NotFound("thing".into())));
        let handler = ServiceHandler::init(config(), vec![echo(), failing]).unwrap();
        for &ok in calls {
            let name = if ok { "Echo" } else { "Fail" };
            assert_eq!(handler.handle_request(name, &post(REQUEST)).is_ok(), ok);
        }
        // a miss is never counted
        let _ = handler.handle_request("Nope", &post(REQUEST));

        let oks = calls.iter().filter(|&&ok| ok).count() as u64;
        let errs = calls.len() as u64 - oks;
        let stats = handler.stats();
        stats.total_requests == calls.len() as u64
            && stats.total_errors == errs
            && stats.total_success == oks
            && stats.actions["Echo"].call_count == oks
            && stats.actions["Echo"].error_count == 0
            && stats.actions["Fail"].call_count == errs
            && stats.actions["Fail"].error_count == errs
    }
}
