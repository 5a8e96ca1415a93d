mod common;

use std::sync::Arc;

use common::{loopback_config, server, soap_post};
use onvif_core::fault::{create_result_from_pattern, ErrorPattern, SoapFaultCode};
use onvif_core::http::RequestHandler;
use onvif_core::service::{
    action, ServiceConfig, ServiceDispatcher, ServiceHandler, SoapRouter, DEVICE_SERVICE_PATH,
};
use onvif_core::OnvifError;
use pretty_assertions::assert_eq;

fn router_for(server: &onvif_core::OnvifServer) -> SoapRouter {
    server.router()
}

#[tokio::test]
async fn test_concurrent_dispatch_counts_every_request() {
    let dispatcher = Arc::new(ServiceDispatcher::new());
    let handler = ServiceHandler::init(
        ServiceConfig::new("Echo", "te", "urn:test:echo", "/onvif/echo"),
        vec![action("Ping", |_, _| Ok("<te:Pong/>".into()))],
    )
    .unwrap();
    dispatcher.register(Arc::new(handler)).unwrap();

    const WORKERS: usize = 8;
    const PER_WORKER: usize = 25;
    let mut tasks = Vec::new();
    for _ in 0..WORKERS {
        let dispatcher = dispatcher.clone();
        tasks.push(tokio::task::spawn_blocking(move || {
            for _ in 0..PER_WORKER {
                let request = soap_post("/onvif/echo", "<te:Ping xmlns:te=\"urn:test:echo\"/>");
                let response = dispatcher.dispatch("Echo", "Ping", &request).unwrap();
                assert_eq!(response.status, 200);
            }
        }));
    }
    for task in futures::future::join_all(tasks).await {
        task.unwrap();
    }

    let stats = dispatcher.get("Echo").unwrap().stats();
    assert_eq!(stats.total_requests, (WORKERS * PER_WORKER) as u64);
    assert_eq!(stats.total_errors, 0);
    assert_eq!(stats.actions["Ping"].call_count, (WORKERS * PER_WORKER) as u64);
}

#[test]
fn test_device_information_through_router() {
    let (server, _) = server(loopback_config());
    let router = router_for(&server);
    let response = router.handle(&soap_post(DEVICE_SERVICE_PATH, "<tds:GetDeviceInformation/>"));
    assert_eq!(response.status, 200);
    let body = response.body_str();
    assert!(body.contains("<tds:GetDeviceInformationResponse>"));
    assert!(body.contains("<tds:Manufacturer>Anyka</tds:Manufacturer>"));
    assert!(body.contains("<tds:Model>AK3918 Camera</tds:Model>"));
}

#[test]
fn test_unknown_action_is_sender_fault() {
    let (server, _) = server(loopback_config());
    let router = router_for(&server);
    let response = router.handle(&soap_post(DEVICE_SERVICE_PATH, "<tds:SetZeroConfiguration/>"));
    assert_eq!(response.status, 200);
    assert!(response.body_str().contains("<soap:Fault>"));
    assert!(response.body_str().contains("soap:Sender"));
    assert_eq!(server.faults().count(ErrorPattern::NotSupported), 1);

    // unknown actions never reach a handler's statistics
    let stats = server.dispatcher().get("Device").unwrap().stats();
    assert_eq!(stats.total_requests, 0);
}

#[test]
fn test_unknown_path_and_method() {
    let (server, _) = server(loopback_config());
    let router = router_for(&server);
    assert_eq!(
        router
            .handle(&soap_post("/onvif/events_service", "<tev:GetEventProperties/>"))
            .status,
        404
    );
    let get = onvif_core::http::HttpRequest::new("GET", DEVICE_SERVICE_PATH);
    let response = router.handle(&get);
    assert_eq!(response.status, 405);
}

#[test]
fn test_every_pattern_resolves() {
    for pattern in ErrorPattern::ALL {
        let result = create_result_from_pattern(pattern, None).unwrap();
        assert_eq!(result.error_code, pattern.code());
        assert!(!result.soap_fault_string.is_empty());
        assert_eq!(ErrorPattern::try_from(pattern.code()).unwrap(), pattern);
    }
    assert_eq!(
        ErrorPattern::InternalError.soap_fault_code(),
        SoapFaultCode::Receiver
    );
    assert!(matches!(
        ErrorPattern::try_from(999),
        Err(OnvifError::NotFound(_))
    ));
}

#[test]
fn test_dispatcher_rejects_duplicate_registration() {
    let (server, _) = server(loopback_config());
    let duplicate = ServiceHandler::init(
        ServiceConfig::new("Device", "tds", "urn:other", "/onvif/other"),
        vec![action("GetHostname", |_, _| Ok(String::new()))],
    )
    .unwrap();
    assert!(matches!(
        server.dispatcher().register(Arc::new(duplicate)),
        Err(OnvifError::AlreadyExists(_))
    ));
    assert!(matches!(
        server.dispatcher().unregister("Events"),
        Err(OnvifError::NotFound(_))
    ));
}
