//! The daemon as one context object: every shared component is owned here
//! and handed to the tasks that need it.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use log::{error, info, warn};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::discovery::DiscoveryResponder;
use crate::fault::FaultTranslator;
use crate::http::{ConnectionRegistry, HttpServer};
use crate::platform::Platform;
use crate::ptz::PtzController;
use crate::rtsp::{default_streams, RtspAuth, RtspServer};
use crate::security::WsSecurity;
use crate::service::device::DeviceService;
use crate::service::imaging::ImagingService;
use crate::service::media::MediaService;
use crate::service::ptz::PtzService;
use crate::service::{DeviceEndpoint, ServiceDispatcher, SoapRouter};
use crate::utils::advertised_ip;
use crate::{OnvifError, Result};

struct Running {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<Result<()>>>,
    http_addr: SocketAddr,
    rtsp_addr: SocketAddr,
}

pub struct OnvifServer {
    config: Config,
    platform: Arc<dyn Platform>,
    endpoint: DeviceEndpoint,
    faults: Arc<FaultTranslator>,
    registry: Arc<ConnectionRegistry>,
    dispatcher: Arc<ServiceDispatcher>,
    ptz: Arc<PtzController>,
    rtsp_auth: Arc<RtspAuth>,
    security: Option<Arc<WsSecurity>>,
    discovery: Option<Arc<DiscoveryResponder>>,
    running: Mutex<Option<Running>>,
}

impl OnvifServer {
    /// Wires the components together and registers the SOAP services.
    ///
    /// Nothing is bound until [`start`](Self::start). A port of 0 binds an
    /// ephemeral port.
    pub fn new(config: Config, platform: Arc<dyn Platform>) -> Result<Self> {
        let ip = advertised_ip(
            config.server.advertised_ip.as_deref(),
            &config.server.bind_address,
        );
        let endpoint = DeviceEndpoint::new(&ip, config.server.http_port, config.server.rtsp_port);

        let ptz = Arc::new(PtzController::with_configuration(
            platform.clone(),
            config.to_ptz_node(),
            config.to_ptz_configuration(),
        ));

        let dispatcher = Arc::new(ServiceDispatcher::new());
        dispatcher.register(Arc::new(
            DeviceService::new(
                config.device.clone(),
                endpoint.clone(),
                platform.clone(),
                &dispatcher,
            )
            .into_handler()?,
        ))?;
        dispatcher.register(Arc::new(
            MediaService::new(endpoint.clone(), platform.clone()).into_handler()?,
        ))?;
        dispatcher.register(Arc::new(PtzService::new(ptz.clone()).into_handler()?))?;
        dispatcher.register(Arc::new(ImagingService::new(platform.clone()).into_handler()?))?;

        let discovery = config.discovery.enabled.then(|| {
            Arc::new(DiscoveryResponder::new(
                &config.device.hostname,
                &ip,
                config.server.http_port,
                Duration::from_secs(config.discovery.hello_interval_secs),
            ))
        });

        Ok(Self {
            endpoint,
            faults: Arc::new(FaultTranslator::new()),
            registry: Arc::new(ConnectionRegistry::new(config.to_connection_config())),
            dispatcher,
            ptz,
            rtsp_auth: Arc::new(RtspAuth::new(config.to_rtsp_auth_config())),
            security: config
                .to_ws_security_config()
                .map(|c| Arc::new(WsSecurity::new(c))),
            discovery,
            platform,
            config,
            running: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn endpoint(&self) -> &DeviceEndpoint {
        &self.endpoint
    }

    pub fn faults(&self) -> &Arc<FaultTranslator> {
        &self.faults
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Arc<ServiceDispatcher> {
        &self.dispatcher
    }

    pub fn ptz(&self) -> &Arc<PtzController> {
        &self.ptz
    }

    pub fn rtsp_auth(&self) -> &Arc<RtspAuth> {
        &self.rtsp_auth
    }

    pub fn security(&self) -> Option<&Arc<WsSecurity>> {
        self.security.as_ref()
    }

    /// The SOAP entry point, with WS-Security when configured.
    pub fn router(&self) -> SoapRouter {
        let router = SoapRouter::new(self.dispatcher.clone(), self.faults.clone());
        match &self.security {
            Some(security) => router.with_security(security.clone()),
            None => router,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    pub fn http_addr(&self) -> Option<SocketAddr> {
        self.running.lock().as_ref().map(|r| r.http_addr)
    }

    pub fn rtsp_addr(&self) -> Option<SocketAddr> {
        self.running.lock().as_ref().map(|r| r.rtsp_addr)
    }

    /// Binds HTTP and RTSP, then starts discovery when enabled.
    pub async fn start(&self) -> Result<()> {
        if self.is_running() {
            return Err(OnvifError::AlreadyExists("server already started".into()));
        }
        let bind = self.config.server.bind_address.as_str();
        let http = TcpListener::bind((bind, self.config.server.http_port)).await?;
        let rtsp = TcpListener::bind((bind, self.config.server.rtsp_port)).await?;
        let http_addr = http.local_addr()?;
        let rtsp_addr = rtsp.local_addr()?;

        let (shutdown, rx) = watch::channel(false);
        let router = Arc::new(self.router());
        let http_server = Arc::new(HttpServer::new(self.registry.clone(), router));
        let rtsp_server = Arc::new(RtspServer::new(
            self.rtsp_auth.clone(),
            self.platform.clone(),
            default_streams(),
            &self.endpoint.ip,
        ));
        let tasks = vec![
            tokio::spawn(http_server.serve(http, rx.clone())),
            tokio::spawn(rtsp_server.serve(rtsp, rx)),
        ];

        if let Some(discovery) = &self.discovery {
            // the camera stays usable over direct addressing without discovery
            if let Err(e) = discovery.start().await {
                warn!("WS-Discovery unavailable: {}", e);
            }
        }

        *self.running.lock() = Some(Running {
            shutdown,
            tasks,
            http_addr,
            rtsp_addr,
        });
        info!(
            "onvif server up: device service at {}, RTSP on {}",
            self.endpoint.xaddr(crate::service::DEVICE_SERVICE_PATH),
            rtsp_addr
        );
        Ok(())
    }

    /// Sends Bye, stops the listeners and waits for them; idempotent.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().take() else {
            return;
        };
        if let Some(discovery) = &self.discovery {
            discovery.stop().await;
        }
        let _ = running.shutdown.send(true);
        for result in join_all(running.tasks).await {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("listener failed: {}", e),
                Err(e) => error!("listener task aborted: {}", e),
            }
        }
        let closed = self.registry.close_all();
        info!("onvif server stopped ({} connections closed)", closed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::SimulatedPlatform;

    fn test_config() -> Config {
        let mut config = Config::default();
        config.server.bind_address = "127.0.0.1".into();
        config.server.http_port = 0;
        config.server.rtsp_port = 0;
        config.discovery.enabled = false;
        config
    }

    #[test]
    fn test_registers_all_services() {
        let server = OnvifServer::new(test_config(), Arc::new(SimulatedPlatform::new())).unwrap();
        let names: Vec<String> = server
            .dispatcher()
            .services()
            .into_iter()
            .map(|s| s.service_name)
            .collect();
        assert_eq!(names, vec!["Device", "Media", "PTZ", "Imaging"]);
        assert_eq!(server.endpoint().ip, "127.0.0.1");
    }

    #[tokio::test]
    async fn test_start_stop() {
        let server = OnvifServer::new(test_config(), Arc::new(SimulatedPlatform::new())).unwrap();
        server.start().await.unwrap();
        assert!(server.http_addr().is_some());
        assert!(server.start().await.is_err());
        server.stop().await;
        assert!(!server.is_running());
        server.stop().await;
    }
}
