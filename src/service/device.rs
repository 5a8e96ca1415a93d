use std::fmt::Write as _;
use std::sync::{Arc, Weak};

use chrono::{DateTime, Datelike, Timelike, Utc};
use log::warn;

use super::dispatcher::ServiceDispatcher;
use super::handler::{action, ServiceConfig, ServiceHandler};
use super::{
    DeviceEndpoint, DEVICE_SERVICE_PATH, IMAGING_SERVICE_PATH, MEDIA_SERVICE_PATH,
    PTZ_SERVICE_PATH,
};
use crate::config::DeviceConfig;
use crate::platform::Platform;
use crate::soap::{xml_escape, NS_DEVICE};
use crate::Result;

const SERVICE_VERSION: (u32, u32) = (2, 5);

/// Device management: identity, capabilities, clock and reboot.
pub struct DeviceService {
    info: DeviceConfig,
    endpoint: DeviceEndpoint,
    platform: Arc<dyn Platform>,
    // weak: the dispatcher owns this service's handler
    dispatcher: Weak<ServiceDispatcher>,
}

impl DeviceService {
    pub fn new(
        info: DeviceConfig,
        endpoint: DeviceEndpoint,
        platform: Arc<dyn Platform>,
        dispatcher: &Arc<ServiceDispatcher>,
    ) -> Self {
        Self {
            info,
            endpoint,
            platform,
            dispatcher: Arc::downgrade(dispatcher),
        }
    }

    pub fn config() -> ServiceConfig {
        ServiceConfig::new("Device", "tds", NS_DEVICE, DEVICE_SERVICE_PATH)
    }

    pub fn into_handler(self) -> Result<ServiceHandler> {
        let this = Arc::new(self);
        let (a, b, c, d, e) = (
            this.clone(),
            this.clone(),
            this.clone(),
            this.clone(),
            this,
        );
        ServiceHandler::init(
            Self::config(),
            vec![
                action("GetDeviceInformation", move |_, _| Ok(a.device_information())),
                action("GetCapabilities", move |_, _| Ok(b.capabilities())),
                action("GetSystemDateAndTime", move |_, _| {
                    Ok(c.system_date_and_time(Utc::now()))
                }),
                action("GetServices", move |_, _| Ok(d.services())),
                action("SystemReboot", move |_, _| e.system_reboot()),
            ],
        )
    }

    pub fn device_information(&self) -> String {
        let info = &self.info;
        format!(
            "<tds:Manufacturer>{}</tds:Manufacturer>\
             <tds:Model>{}</tds:Model>\
             <tds:FirmwareVersion>{}</tds:FirmwareVersion>\
             <tds:SerialNumber>{}</tds:SerialNumber>\
             <tds:HardwareId>{}</tds:HardwareId>",
            xml_escape(&info.manufacturer),
            xml_escape(&info.model),
            xml_escape(&info.firmware_version),
            xml_escape(&info.serial_number),
            xml_escape(&info.hardware_id),
        )
    }

    pub fn capabilities(&self) -> String {
        let ep = &self.endpoint;
        format!(
            "<tds:Capabilities>\
             <tt:Device><tt:XAddr>{}</tt:XAddr>\
             <tt:System><tt:DiscoveryResolve>false</tt:DiscoveryResolve>\
             <tt:DiscoveryBye>true</tt:DiscoveryBye>\
             <tt:RemoteDiscovery>false</tt:RemoteDiscovery>\
             <tt:SystemBackup>false</tt:SystemBackup>\
             <tt:SystemLogging>false</tt:SystemLogging>\
             <tt:FirmwareUpgrade>false</tt:FirmwareUpgrade></tt:System></tt:Device>\
             <tt:Imaging><tt:XAddr>{}</tt:XAddr></tt:Imaging>\
             <tt:Media><tt:XAddr>{}</tt:XAddr>\
             <tt:StreamingCapabilities><tt:RTPMulticast>false</tt:RTPMulticast>\
             <tt:RTP_TCP>true</tt:RTP_TCP><tt:RTP_RTSP_TCP>true</tt:RTP_RTSP_TCP>\
             </tt:StreamingCapabilities></tt:Media>\
             <tt:PTZ><tt:XAddr>{}</tt:XAddr></tt:PTZ>\
             </tds:Capabilities>",
            ep.xaddr(DEVICE_SERVICE_PATH),
            ep.xaddr(IMAGING_SERVICE_PATH),
            ep.xaddr(MEDIA_SERVICE_PATH),
            ep.xaddr(PTZ_SERVICE_PATH),
        )
    }

    pub fn system_date_and_time(&self, now: DateTime<Utc>) -> String {
        format!(
            "<tds:SystemDateAndTime>\
             <tt:DateTimeType>NTP</tt:DateTimeType>\
             <tt:DaylightSavings>false</tt:DaylightSavings>\
             <tt:TimeZone><tt:TZ>UTC</tt:TZ></tt:TimeZone>\
             <tt:UTCDateTime>\
             <tt:Time><tt:Hour>{}</tt:Hour><tt:Minute>{}</tt:Minute><tt:Second>{}</tt:Second></tt:Time>\
             <tt:Date><tt:Year>{}</tt:Year><tt:Month>{}</tt:Month><tt:Day>{}</tt:Day></tt:Date>\
             </tt:UTCDateTime>\
             </tds:SystemDateAndTime>",
            now.hour(),
            now.minute(),
            now.second(),
            now.year(),
            now.month(),
            now.day(),
        )
    }

    /// Lists the services currently registered with the dispatcher.
    pub fn services(&self) -> String {
        let registered = self
            .dispatcher
            .upgrade()
            .map(|d| d.services())
            .unwrap_or_default();
        let mut out = String::new();
        for service in &registered {
            // writing into a String cannot fail
            let _ = write!(
                out,
                "<tds:Service><tds:Namespace>{}</tds:Namespace><tds:XAddr>{}</tds:XAddr>\
                 <tds:Version><tt:Major>{}</tt:Major><tt:Minor>{}</tt:Minor></tds:Version>\
                 </tds:Service>",
                service.namespace_uri,
                self.endpoint.xaddr(&service.xaddr_path),
                SERVICE_VERSION.0,
                SERVICE_VERSION.1
            );
        }
        out
    }

    pub fn system_reboot(&self) -> Result<String> {
        warn!("system reboot requested");
        self.platform.system_reboot()?;
        Ok("<tds:Message>Rebooting</tds:Message>".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{PlatformCall, SimulatedPlatform};
    use chrono::TimeZone;

    fn service(platform: Arc<SimulatedPlatform>) -> DeviceService {
        service_in(platform, &Arc::new(ServiceDispatcher::new()))
    }

    fn service_in(platform: Arc<SimulatedPlatform>, dispatcher: &Arc<ServiceDispatcher>) -> DeviceService {
        DeviceService::new(
            DeviceConfig::default(),
            DeviceEndpoint::new("10.0.0.5", 8080, 554),
            platform,
            dispatcher,
        )
    }

    #[test]
    fn test_device_information_defaults() {
        let out = service(Arc::new(SimulatedPlatform::new())).device_information();
        assert!(out.contains("<tds:Manufacturer>Anyka</tds:Manufacturer>"));
        assert!(out.contains("<tds:Model>AK3918 Camera</tds:Model>"));
        assert!(out.contains("<tds:FirmwareVersion>1.0.0</tds:FirmwareVersion>"));
        assert!(out.contains("<tds:SerialNumber>AK3918-001</tds:SerialNumber>"));
        assert!(out.contains("<tds:HardwareId>1.0</tds:HardwareId>"));
    }

    #[test]
    fn test_capabilities_use_endpoint() {
        let svc = service(Arc::new(SimulatedPlatform::new()));
        assert!(svc
            .capabilities()
            .contains("<tt:XAddr>http://10.0.0.5:8080/onvif/ptz_service</tt:XAddr>"));
    }

    #[test]
    fn test_services_follow_registrations() {
        let dispatcher = Arc::new(ServiceDispatcher::new());
        let svc = Arc::new(service_in(Arc::new(SimulatedPlatform::new()), &dispatcher));
        dispatcher
            .register(Arc::new(
                service_in(Arc::new(SimulatedPlatform::new()), &dispatcher)
                    .into_handler()
                    .unwrap(),
            ))
            .unwrap();
        let media = ServiceConfig::new("Media", "trt", "urn:media", MEDIA_SERVICE_PATH);
        dispatcher
            .register(Arc::new(
                ServiceHandler::init(media, vec![action("GetProfiles", |_, _| Ok(String::new()))])
                    .unwrap(),
            ))
            .unwrap();

        let services = svc.services();
        assert_eq!(services.matches("<tds:Service>").count(), 2);
        assert!(services.contains("<tds:XAddr>http://10.0.0.5:8080/onvif/media_service</tds:XAddr>"));
        assert!(services.contains("<tt:Minor>5</tt:Minor>"));

        dispatcher.unregister("Media").unwrap();
        let services = svc.services();
        assert_eq!(services.matches("<tds:Service>").count(), 1);
        assert!(!services.contains("media_service"));
    }

    #[test]
    fn test_date_and_time() {
        let svc = service(Arc::new(SimulatedPlatform::new()));
        let now = Utc.with_ymd_and_hms(2024, 2, 29, 23, 59, 58).unwrap();
        let out = svc.system_date_and_time(now);
        assert!(out.contains("<tt:Hour>23</tt:Hour>"));
        assert!(out.contains("<tt:Day>29</tt:Day>"));
        assert!(out.contains("<tt:Year>2024</tt:Year>"));
    }

    #[test]
    fn test_reboot_calls_platform() {
        let platform = Arc::new(SimulatedPlatform::new());
        let out = service(platform.clone()).system_reboot().unwrap();
        assert!(out.contains("Rebooting"));
        assert_eq!(platform.calls(), vec![PlatformCall::Reboot]);
    }
}
