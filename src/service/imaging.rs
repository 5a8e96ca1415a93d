use std::sync::Arc;

use log::{debug, info};
use parking_lot::Mutex;

use super::handler::{action, ServiceConfig, ServiceHandler};
use super::{child_f32, IMAGING_SERVICE_PATH};
use crate::platform::{IrLedMode, Platform, VpssEffect};
use crate::service::media::VIDEO_SOURCE_TOKEN;
use crate::soap::{SoapRequest, NS_IMAGING};
use crate::{OnvifError, Result};

const LEVEL_RANGE: (i32, i32) = (-100, 100);
const HUE_RANGE: (i32, i32) = (-180, 180);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImagingSettings {
    pub brightness: i32,
    pub contrast: i32,
    pub saturation: i32,
    pub sharpness: i32,
    pub hue: i32,
    pub ir_cut_filter: IrLedMode,
}

impl Default for ImagingSettings {
    fn default() -> Self {
        Self {
            brightness: 0,
            contrast: 0,
            saturation: 0,
            sharpness: 0,
            hue: 0,
            ir_cut_filter: IrLedMode::Auto,
        }
    }
}

fn ir_mode_name(mode: IrLedMode) -> &'static str {
    match mode {
        IrLedMode::On => "ON",
        IrLedMode::Off => "OFF",
        IrLedMode::Auto => "AUTO",
    }
}

fn parse_ir_mode(text: &str) -> Result<IrLedMode> {
    match text {
        "ON" => Ok(IrLedMode::On),
        "OFF" => Ok(IrLedMode::Off),
        "AUTO" => Ok(IrLedMode::Auto),
        other => Err(OnvifError::InvalidInput(format!("IR cut filter mode '{}'", other))),
    }
}

fn level(field: &str, value: Option<f32>, range: (i32, i32)) -> Result<Option<i32>> {
    let Some(value) = value else {
        return Ok(None);
    };
    let rounded = value.round();
    if !rounded.is_finite() || rounded < range.0 as f32 || rounded > range.1 as f32 {
        return Err(OnvifError::InvalidInput(format!(
            "{} {} outside {}..={}",
            field, value, range.0, range.1
        )));
    }
    Ok(Some(rounded as i32))
}

/// Level as the image pipeline expects it.
pub fn effect_value(effect: VpssEffect, level: i32) -> i32 {
    match effect {
        VpssEffect::Hue => level * 50 / 180,
        _ => level / 2,
    }
}

pub struct ImagingService {
    platform: Arc<dyn Platform>,
    settings: Mutex<ImagingSettings>,
    irled_ready: Mutex<bool>,
}

impl ImagingService {
    pub fn new(platform: Arc<dyn Platform>) -> Self {
        Self {
            platform,
            settings: Mutex::new(ImagingSettings::default()),
            irled_ready: Mutex::new(false),
        }
    }

    pub fn config() -> ServiceConfig {
        ServiceConfig::new("Imaging", "timg", NS_IMAGING, IMAGING_SERVICE_PATH)
    }

    pub fn into_handler(self) -> Result<ServiceHandler> {
        let this = Arc::new(self);
        let getter = this.clone();
        ServiceHandler::init(
            Self::config(),
            vec![
                action("GetImagingSettings", move |req, _| getter.get_imaging_settings(req)),
                action("SetImagingSettings", move |req, _| this.set_imaging_settings(req)),
            ],
        )
    }

    pub fn settings(&self) -> ImagingSettings {
        *self.settings.lock()
    }

    fn check_source(request: &SoapRequest) -> Result<()> {
        let token = request.required_param("VideoSourceToken")?;
        if token != VIDEO_SOURCE_TOKEN {
            return Err(OnvifError::NotFound(format!("video source {}", token)));
        }
        Ok(())
    }

    pub fn get_imaging_settings(&self, request: &SoapRequest) -> Result<String> {
        Self::check_source(request)?;
        let s = self.settings();
        Ok(format!(
            "<timg:ImagingSettings>\
             <tt:Brightness>{}</tt:Brightness>\
             <tt:ColorSaturation>{}</tt:ColorSaturation>\
             <tt:Contrast>{}</tt:Contrast>\
             <tt:IrCutFilter>{}</tt:IrCutFilter>\
             <tt:Sharpness>{}</tt:Sharpness>\
             <tt:Extension><tt:Hue>{}</tt:Hue></tt:Extension>\
             </timg:ImagingSettings>",
            s.brightness,
            s.saturation,
            s.contrast,
            ir_mode_name(s.ir_cut_filter),
            s.sharpness,
            s.hue
        ))
    }

    /// Validates every field first, then applies only the fields present.
    pub fn set_imaging_settings(&self, request: &SoapRequest) -> Result<String> {
        Self::check_source(request)?;
        let settings = request
            .find("ImagingSettings")
            .ok_or_else(|| OnvifError::InvalidInput("missing parameter 'ImagingSettings'".into()))?;

        let updates = [
            (
                VpssEffect::Brightness,
                level("Brightness", child_f32(settings, "Brightness")?, LEVEL_RANGE)?,
            ),
            (
                VpssEffect::Contrast,
                level("Contrast", child_f32(settings, "Contrast")?, LEVEL_RANGE)?,
            ),
            (
                VpssEffect::Saturation,
                level("ColorSaturation", child_f32(settings, "ColorSaturation")?, LEVEL_RANGE)?,
            ),
            (
                VpssEffect::Sharpness,
                level("Sharpness", child_f32(settings, "Sharpness")?, LEVEL_RANGE)?,
            ),
            (
                VpssEffect::Hue,
                level("Hue", child_f32(settings, "Hue")?, HUE_RANGE)?,
            ),
        ];
        let ir_mode = settings
            .find("IrCutFilter")
            .map(|e| parse_ir_mode(e.text()))
            .transpose()?;

        for (effect, value) in updates {
            let Some(value) = value else { continue };
            self.platform.vpss_effect_set(effect, effect_value(effect, value))?;
            let mut current = self.settings.lock();
            match effect {
                VpssEffect::Brightness => current.brightness = value,
                VpssEffect::Contrast => current.contrast = value,
                VpssEffect::Saturation => current.saturation = value,
                VpssEffect::Sharpness => current.sharpness = value,
                VpssEffect::Hue => current.hue = value,
            }
            debug!("imaging {:?} set to {}", effect, value);
        }

        if let Some(mode) = ir_mode {
            self.ensure_irled()?;
            self.platform.irled_set_mode(mode)?;
            self.settings.lock().ir_cut_filter = mode;
            info!("IR cut filter set to {}", ir_mode_name(mode));
        }
        Ok(String::new())
    }

    fn ensure_irled(&self) -> Result<()> {
        let mut ready = self.irled_ready.lock();
        if !*ready {
            self.platform.irled_init()?;
            *ready = true;
        }
        Ok(())
    }
}
