use std::fmt::Write as _;
use std::sync::Arc;

use super::handler::{action, ServiceConfig, ServiceHandler};
use super::{format_duration_ms, parse_bool, parse_duration_ms, PTZ_SERVICE_PATH};
use crate::ptz::{
    PtzController, PtzVector, Range, Vector2D, POSITION_SPACE, TRANSLATION_SPACE, VELOCITY_SPACE,
    ZOOM_POSITION_SPACE,
};
use crate::soap::{xml_escape, SoapRequest, XmlElement, NS_PTZ};
use crate::{OnvifError, Result};

/// Reads a `PTZVector`/`PTZSpeed` element: `<PanTilt x y space/>` and `<Zoom x/>`.
fn parse_vector(element: &XmlElement, default_space: &str) -> Result<PtzVector> {
    let mut vector = PtzVector::default().with_space(default_space);
    if let Some(pan_tilt) = element.child("PanTilt") {
        vector.pan_tilt = Vector2D::new(
            pan_tilt.attribute_f32("x")?.unwrap_or(0.0),
            pan_tilt.attribute_f32("y")?.unwrap_or(0.0),
        );
        if let Some(space) = pan_tilt.attribute("space") {
            vector.space = space.to_string();
        }
    }
    if let Some(zoom) = element.child("Zoom") {
        vector.zoom = zoom.attribute_f32("x")?.unwrap_or(0.0);
    }
    Ok(vector)
}

fn required_vector(request: &SoapRequest, name: &str, space: &str) -> Result<PtzVector> {
    let element = request
        .operation()
        .and_then(|op| op.child(name))
        .ok_or_else(|| OnvifError::InvalidInput(format!("missing parameter '{}'", name)))?;
    parse_vector(element, space)
}

fn optional_speed(request: &SoapRequest) -> Result<Option<PtzVector>> {
    request
        .operation()
        .and_then(|op| op.child("Speed"))
        .map(|e| parse_vector(e, VELOCITY_SPACE))
        .transpose()
}

fn write_range(out: &mut String, tag: &str, range: &Range) {
    let _ = write!(
        out,
        "<tt:{tag}><tt:Min>{}</tt:Min><tt:Max>{}</tt:Max></tt:{tag}>",
        range.min,
        range.max,
        tag = tag
    );
}

fn write_space(out: &mut String, tag: &str, uri: &str, x: &Range, y: Option<&Range>) {
    let _ = write!(out, "<tt:{}><tt:URI>{}</tt:URI>", tag, uri);
    write_range(out, "XRange", x);
    if let Some(y) = y {
        write_range(out, "YRange", y);
    }
    let _ = write!(out, "</tt:{}>", tag);
}

fn write_vector(out: &mut String, vector: &PtzVector) {
    let _ = write!(
        out,
        r#"<tt:PanTilt x="{}" y="{}" space="{}"/><tt:Zoom x="{}" space="{}"/>"#,
        vector.pan_tilt.x,
        vector.pan_tilt.y,
        xml_escape(&vector.space),
        vector.zoom,
        ZOOM_POSITION_SPACE
    );
}

/// SOAP surface of the [`PtzController`].
pub struct PtzService {
    controller: Arc<PtzController>,
}

impl PtzService {
    pub fn new(controller: Arc<PtzController>) -> Self {
        Self { controller }
    }

    pub fn config() -> ServiceConfig {
        ServiceConfig::new("PTZ", "tptz", NS_PTZ, PTZ_SERVICE_PATH)
    }

    pub fn into_handler(self) -> Result<ServiceHandler> {
        let this = Arc::new(self);
        type Op = fn(&PtzService, &SoapRequest) -> Result<String>;
        let table: [(&str, Op); 13] = [
            ("GetNodes", |s, _| Ok(s.get_nodes())),
            ("GetConfigurations", |s, _| Ok(s.get_configurations())),
            ("AbsoluteMove", PtzService::absolute_move),
            ("RelativeMove", PtzService::relative_move),
            ("ContinuousMove", PtzService::continuous_move),
            ("Stop", PtzService::stop),
            ("GetStatus", PtzService::get_status),
            ("SetPreset", PtzService::set_preset),
            ("GotoPreset", PtzService::goto_preset),
            ("RemovePreset", PtzService::remove_preset),
            ("GetPresets", PtzService::get_presets),
            ("GotoHomePosition", PtzService::goto_home_position),
            ("SetHomePosition", PtzService::set_home_position),
        ];
        let actions = table
            .into_iter()
            .map(|(name, op)| {
                let this = this.clone();
                action(name, move |req, _| op(&this, req))
            })
            .collect();
        ServiceHandler::init(Self::config(), actions)
    }

    pub fn get_nodes(&self) -> String {
        let node = self.controller.node();
        let mut out = format!(
            r#"<tptz:PTZNode token="{}" FixedHomePosition="false"><tt:Name>{}</tt:Name><tt:SupportedPTZSpaces>"#,
            xml_escape(&node.token),
            xml_escape(&node.name)
        );
        let limits = &node.pan_tilt_limits;
        write_space(&mut out, "AbsolutePanTiltPositionSpace", POSITION_SPACE, limits, Some(limits));
        write_space(
            &mut out,
            "RelativePanTiltTranslationSpace",
            TRANSLATION_SPACE,
            limits,
            Some(limits),
        );
        write_space(
            &mut out,
            "ContinuousPanTiltVelocitySpace",
            VELOCITY_SPACE,
            &Range::NORMALIZED,
            Some(&Range::NORMALIZED),
        );
        write_space(
            &mut out,
            "PanTiltSpeedSpace",
            "http://www.onvif.org/ver10/tptz/PanTiltSpaces/GenericSpeedSpace",
            &Range { min: 0.0, max: 1.0 },
            None,
        );
        let _ = write!(
            out,
            "</tt:SupportedPTZSpaces><tt:MaximumNumberOfPresets>{}</tt:MaximumNumberOfPresets>\
             <tt:HomeSupported>{}</tt:HomeSupported></tptz:PTZNode>",
            node.max_presets, node.home_supported
        );
        out
    }

    pub fn get_configurations(&self) -> String {
        let cfg = self.controller.configuration();
        let mut out = format!(
            r#"<tptz:PTZConfiguration token="{}"><tt:Name>{}</tt:Name><tt:UseCount>2</tt:UseCount><tt:NodeToken>{}</tt:NodeToken>"#,
            xml_escape(&cfg.token),
            xml_escape(&cfg.name),
            xml_escape(&cfg.node_token)
        );
        let _ = write!(
            out,
            r#"<tt:DefaultPTZSpeed><tt:PanTilt x="{}" y="{}" space="{}"/></tt:DefaultPTZSpeed>"#,
            cfg.default_speed.pan_tilt.x,
            cfg.default_speed.pan_tilt.y,
            xml_escape(&cfg.default_speed.space)
        );
        let _ = write!(
            out,
            "<tt:DefaultPTZTimeout>{}</tt:DefaultPTZTimeout><tt:PanTiltLimits>",
            format_duration_ms(cfg.default_timeout_ms)
        );
        write_space(
            &mut out,
            "Range",
            POSITION_SPACE,
            &cfg.pan_tilt_limits,
            Some(&cfg.pan_tilt_limits),
        );
        out.push_str("</tt:PanTiltLimits></tptz:PTZConfiguration>");
        out
    }

    fn absolute_move(&self, request: &SoapRequest) -> Result<String> {
        let profile = request.required_param("ProfileToken")?;
        let position = required_vector(request, "Position", POSITION_SPACE)?;
        let speed = optional_speed(request)?;
        self.controller
            .absolute_move(profile, &position, speed.as_ref())?;
        Ok(String::new())
    }

    fn relative_move(&self, request: &SoapRequest) -> Result<String> {
        let profile = request.required_param("ProfileToken")?;
        let translation = required_vector(request, "Translation", TRANSLATION_SPACE)?;
        let speed = optional_speed(request)?;
        self.controller
            .relative_move(profile, &translation, speed.as_ref())?;
        Ok(String::new())
    }

    /// An absent `Timeout` means move until `Stop`.
    fn continuous_move(&self, request: &SoapRequest) -> Result<String> {
        let profile = request.required_param("ProfileToken")?;
        let velocity = required_vector(request, "Velocity", VELOCITY_SPACE)?;
        let timeout_ms = match request.param("Timeout") {
            Some(text) => parse_duration_ms(text)?,
            None => 0,
        };
        self.controller
            .continuous_move(profile, &velocity, timeout_ms)?;
        Ok(String::new())
    }

    fn stop(&self, request: &SoapRequest) -> Result<String> {
        let profile = request.required_param("ProfileToken")?;
        let pan_tilt = request.param("PanTilt").map(parse_bool).transpose()?;
        let zoom = request.param("Zoom").map(parse_bool).transpose()?;
        self.controller
            .stop(profile, pan_tilt.unwrap_or(true), zoom.unwrap_or(true))?;
        Ok(String::new())
    }

    fn get_status(&self, request: &SoapRequest) -> Result<String> {
        let profile = request.required_param("ProfileToken")?;
        let status = self.controller.get_status(profile)?;
        let mut out = String::from("<tptz:PTZStatus><tt:Position>");
        write_vector(&mut out, &status.position);
        let _ = write!(
            out,
            "</tt:Position><tt:MoveStatus><tt:PanTilt>{}</tt:PanTilt><tt:Zoom>{}</tt:Zoom></tt:MoveStatus>",
            status.move_status.pan_tilt.as_str(),
            status.move_status.zoom.as_str()
        );
        if !status.error.is_empty() {
            let _ = write!(out, "<tt:Error>{}</tt:Error>", xml_escape(&status.error));
        }
        let _ = write!(
            out,
            "<tt:UtcTime>{}</tt:UtcTime></tptz:PTZStatus>",
            status.utc_time_string()
        );
        Ok(out)
    }

    /// A `PresetName` element is required, even if empty.
    fn set_preset(&self, request: &SoapRequest) -> Result<String> {
        let profile = request.required_param("ProfileToken")?;
        let name = request
            .operation()
            .and_then(|op| op.child("PresetName"))
            .map(|e| e.text());
        let token = self.controller.set_preset(profile, name)?;
        Ok(format!(
            "<tptz:PresetToken>{}</tptz:PresetToken>",
            xml_escape(&token)
        ))
    }

    fn goto_preset(&self, request: &SoapRequest) -> Result<String> {
        let profile = request.required_param("ProfileToken")?;
        let token = request.required_param("PresetToken")?;
        let speed = optional_speed(request)?;
        self.controller.goto_preset(profile, token, speed.as_ref())?;
        Ok(String::new())
    }

    fn remove_preset(&self, request: &SoapRequest) -> Result<String> {
        let profile = request.required_param("ProfileToken")?;
        let token = request.required_param("PresetToken")?;
        self.controller.remove_preset(profile, token)?;
        Ok(String::new())
    }

    fn get_presets(&self, request: &SoapRequest) -> Result<String> {
        let profile = request.required_param("ProfileToken")?;
        let mut out = String::new();
        for preset in self.controller.get_presets(profile)? {
            let _ = write!(
                out,
                r#"<tptz:Preset token="{}"><tt:Name>{}</tt:Name><tt:PTZPosition>"#,
                xml_escape(&preset.token),
                xml_escape(&preset.name)
            );
            write_vector(&mut out, &preset.position);
            out.push_str("</tt:PTZPosition></tptz:Preset>");
        }
        Ok(out)
    }

    fn goto_home_position(&self, request: &SoapRequest) -> Result<String> {
        let profile = request.required_param("ProfileToken")?;
        let speed = optional_speed(request)?;
        self.controller.goto_home(profile, speed.as_ref())?;
        Ok(String::new())
    }

    fn set_home_position(&self, request: &SoapRequest) -> Result<String> {
        let profile = request.required_param("ProfileToken")?;
        self.controller.set_home(profile)?;
        Ok(String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{PlatformCall, SimulatedPlatform};
    use crate::ptz::MoveStatus;
    use pretty_assertions::assert_eq;

    fn service() -> (Arc<SimulatedPlatform>, Arc<PtzController>, PtzService) {
        let platform = Arc::new(SimulatedPlatform::new());
        let controller = Arc::new(PtzController::new(platform.clone()));
        (platform, controller.clone(), PtzService::new(controller))
    }

    fn request(op: &str, inner: &str) -> SoapRequest {
        SoapRequest::parse(&format!(
            r#"<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope" xmlns:tptz="http://www.onvif.org/ver20/ptz/wsdl" xmlns:tt="http://www.onvif.org/ver10/schema"><s:Body><tptz:{op}>{inner}</tptz:{op}></s:Body></s:Envelope>"#
        ))
        .unwrap()
    }

    #[test]
    fn test_absolute_move_request() {
        let (platform, _, svc) = service();
        svc.absolute_move(&request(
            "AbsoluteMove",
            r#"<tptz:ProfileToken>MainProfile</tptz:ProfileToken><tptz:Position><tt:PanTilt x="0.5" y="-1"/></tptz:Position><tptz:Speed><tt:PanTilt x="1" y="1"/></tptz:Speed>"#,
        ))
        .unwrap();
        assert_eq!(
            platform.calls(),
            vec![PlatformCall::MoveAbsolute {
                pan: 90.0,
                tilt: -90.0,
                speed: 100
            }]
        );
    }

    #[test]
    fn test_missing_position_is_missing_parameter() {
        let (_, _, svc) = service();
        let err = svc
            .absolute_move(&request(
                "AbsoluteMove",
                "<tptz:ProfileToken>MainProfile</tptz:ProfileToken>",
            ))
            .unwrap_err();
        assert_eq!(err.pattern(), crate::fault::ErrorPattern::MissingParameter);
    }

    #[test]
    fn test_continuous_move_timeout_parsing() {
        let (platform, controller, svc) = service();
        svc.continuous_move(&request(
            "ContinuousMove",
            r#"<tptz:ProfileToken>P</tptz:ProfileToken><tptz:Velocity><tt:PanTilt x="-1" y="0"/></tptz:Velocity><tptz:Timeout>PT2S</tptz:Timeout>"#,
        ))
        .unwrap();
        assert_eq!(
            platform.calls(),
            vec![PlatformCall::MoveContinuous {
                pan: -100,
                tilt: 0,
                timeout_ms: 2000
            }]
        );
        assert_eq!(
            controller.get_status("P").unwrap().move_status.pan_tilt,
            MoveStatus::Moving
        );
        svc.stop(&request(
            "Stop",
            "<tptz:ProfileToken>P</tptz:ProfileToken><tptz:PanTilt>true</tptz:PanTilt><tptz:Zoom>false</tptz:Zoom>",
        ))
        .unwrap();
        assert_eq!(
            controller.get_status("P").unwrap().move_status.pan_tilt,
            MoveStatus::Idle
        );
    }

    #[test]
    fn test_preset_round_trip_over_soap() {
        let (_, _, svc) = service();
        let set = svc
            .set_preset(&request(
                "SetPreset",
                "<tptz:ProfileToken>P</tptz:ProfileToken><tptz:PresetName>Gate &amp; Door</tptz:PresetName>",
            ))
            .unwrap();
        assert_eq!(set, "<tptz:PresetToken>Preset1</tptz:PresetToken>");

        let listed = svc
            .get_presets(&request("GetPresets", "<tptz:ProfileToken>P</tptz:ProfileToken>"))
            .unwrap();
        assert!(listed.contains(r#"<tptz:Preset token="Preset1"><tt:Name>Gate &amp; Door</tt:Name>"#));

        let unnamed = svc.set_preset(&request("SetPreset", "<tptz:ProfileToken>P</tptz:ProfileToken>"));
        assert!(matches!(unnamed, Err(OnvifError::InvalidInput(_))));

        let empty_name = svc
            .set_preset(&request(
                "SetPreset",
                "<tptz:ProfileToken>P</tptz:ProfileToken><tptz:PresetName></tptz:PresetName>",
            ))
            .unwrap();
        assert!(empty_name.contains("Preset2"));
    }

    #[test]
    fn test_status_document() {
        let (_, _, svc) = service();
        let out = svc
            .get_status(&request("GetStatus", "<tptz:ProfileToken>P</tptz:ProfileToken>"))
            .unwrap();
        assert!(out.contains("<tt:PanTilt>IDLE</tt:PanTilt>"));
        assert!(out.contains("<tt:UtcTime>"));
        assert!(!out.contains("<tt:Error>"));
    }

    #[test]
    fn test_node_and_configuration_documents() {
        let (_, _, svc) = service();
        let nodes = svc.get_nodes();
        assert!(nodes.contains(r#"token="PTZNode0""#));
        assert!(nodes.contains("<tt:MaximumNumberOfPresets>10</tt:MaximumNumberOfPresets>"));
        assert!(nodes.contains("<tt:HomeSupported>true</tt:HomeSupported>"));

        let configs = svc.get_configurations();
        assert!(configs.contains("<tt:DefaultPTZTimeout>PT10S</tt:DefaultPTZTimeout>"));
        assert!(configs.contains(r#"<tt:PanTilt x="0.5" y="0.5""#));
    }
}
