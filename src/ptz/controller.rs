use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use log::{debug, info, warn};
use parking_lot::Mutex;

use super::types::*;
use crate::platform::{Platform, PlatformError};
use crate::{OnvifError, Result};

const PAN_DEGREES: f32 = 180.0;
const TILT_DEGREES: f32 = 90.0;
const MIN_DRIVER_SPEED: f32 = 15.0;
const DRIVER_SPEED_SPAN: f32 = 85.0;

/// Normalized pan/tilt to motor degrees.
pub fn to_degrees(v: Vector2D) -> (f32, f32) {
    (v.x * PAN_DEGREES, v.y * TILT_DEGREES)
}

/// Normalized speed magnitude to driver units (15..=100).
pub fn to_driver_speed(speed: f32) -> u8 {
    let magnitude = Range::NORMALIZED.clamp(speed).abs();
    (MIN_DRIVER_SPEED + magnitude * DRIVER_SPEED_SPAN).round() as u8
}

/// Signed driver speed for a continuous-move velocity component.
fn to_signed_speed(velocity: f32) -> i32 {
    let v = Range::NORMALIZED.clamp(velocity);
    if v == 0.0 {
        0
    } else {
        i32::from(to_driver_speed(v)) * v.signum() as i32
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum AxisMotion {
    Idle,
    /// Absolute or relative move; finished once the hardware reports still.
    Positioning,
    /// Continuous move; `None` runs until stopped.
    Continuous(Option<Instant>),
}

impl AxisMotion {
    fn status(&self) -> MoveStatus {
        match self {
            AxisMotion::Idle => MoveStatus::Idle,
            _ => MoveStatus::Moving,
        }
    }
}

struct MotionState {
    pan_tilt: AxisMotion,
    zoom: AxisMotion,
    last_error: String,
}

/// Presets of one profile. Token numbers only ever increase.
#[derive(Debug, Default)]
struct PresetStore {
    presets: Vec<PtzPreset>,
    next_number: u32,
}

/// PTZ state machine and per-profile preset stores.
pub struct PtzController {
    platform: Arc<dyn Platform>,
    node: PtzNode,
    configuration: PtzConfiguration,
    motion: Mutex<MotionState>,
    stores: Mutex<HashMap<String, Arc<Mutex<PresetStore>>>>,
    home: Mutex<PtzVector>,
}

impl PtzController {
    pub fn new(platform: Arc<dyn Platform>) -> Self {
        Self::with_configuration(platform, PtzNode::default(), PtzConfiguration::default())
    }

    pub fn with_configuration(
        platform: Arc<dyn Platform>,
        node: PtzNode,
        configuration: PtzConfiguration,
    ) -> Self {
        Self {
            platform,
            node,
            configuration,
            motion: Mutex::new(MotionState {
                pan_tilt: AxisMotion::Idle,
                zoom: AxisMotion::Idle,
                last_error: String::new(),
            }),
            stores: Mutex::new(HashMap::new()),
            home: Mutex::new(PtzVector::default()),
        }
    }

    pub fn node(&self) -> &PtzNode {
        &self.node
    }

    pub fn configuration(&self) -> &PtzConfiguration {
        &self.configuration
    }

    fn check_profile(profile: &str) -> Result<()> {
        if profile.trim().is_empty() {
            return Err(OnvifError::InvalidInput("missing profile token".into()));
        }
        Ok(())
    }

    fn store(&self, profile: &str) -> Arc<Mutex<PresetStore>> {
        self.stores
            .lock()
            .entry(profile.to_string())
            .or_default()
            .clone()
    }

    fn speed_for(&self, speed: Option<&PtzVector>) -> u8 {
        let x = speed
            .map(|s| s.pan_tilt.x)
            .unwrap_or(self.configuration.default_speed.pan_tilt.x);
        to_driver_speed(x)
    }

    /// Records the hardware outcome on the status and hands it back unchanged.
    fn finish(&self, result: std::result::Result<(), PlatformError>, motion: AxisMotion) -> Result<()> {
        let mut state = self.motion.lock();
        match result {
            Ok(()) => {
                state.pan_tilt = motion;
                state.last_error.clear();
                Ok(())
            }
            Err(e) => {
                state.last_error = e.to_string();
                Err(e.into())
            }
        }
    }

    pub fn absolute_move(
        &self,
        profile: &str,
        position: &PtzVector,
        speed: Option<&PtzVector>,
    ) -> Result<()> {
        Self::check_profile(profile)?;
        let target = position.clamped(&self.node.pan_tilt_limits);
        let (pan, tilt) = to_degrees(target.pan_tilt);
        let speed = self.speed_for(speed);
        debug!(
            "[{}] absolute move to ({:.3}, {:.3}) speed {}",
            profile, target.pan_tilt.x, target.pan_tilt.y, speed
        );

        self.motion.lock().pan_tilt = AxisMotion::Positioning;
        let result = self.platform.ptz_move_absolute(pan, tilt, speed);
        self.finish(result, AxisMotion::Positioning)
    }

    pub fn relative_move(
        &self,
        profile: &str,
        translation: &PtzVector,
        speed: Option<&PtzVector>,
    ) -> Result<()> {
        Self::check_profile(profile)?;
        let delta = translation.clamped(&self.node.pan_tilt_limits);
        let (pan, tilt) = to_degrees(delta.pan_tilt);
        let speed = self.speed_for(speed);
        debug!(
            "[{}] relative move by ({:.3}, {:.3}) speed {}",
            profile, delta.pan_tilt.x, delta.pan_tilt.y, speed
        );

        self.motion.lock().pan_tilt = AxisMotion::Positioning;
        let result = self.platform.ptz_move_relative(pan, tilt, speed);
        self.finish(result, AxisMotion::Positioning)
    }

    /// A `timeout_ms` of zero keeps moving until [`stop`](Self::stop).
    pub fn continuous_move(&self, profile: &str, velocity: &PtzVector, timeout_ms: u64) -> Result<()> {
        Self::check_profile(profile)?;
        let v = velocity.clamped(&Range::NORMALIZED);
        let pan = to_signed_speed(v.pan_tilt.x);
        let tilt = to_signed_speed(v.pan_tilt.y);
        debug!(
            "[{}] continuous move pan {} tilt {} timeout {}ms",
            profile, pan, tilt, timeout_ms
        );

        let deadline = (timeout_ms > 0).then(|| Instant::now() + Duration::from_millis(timeout_ms));
        let motion = if pan == 0 && tilt == 0 {
            AxisMotion::Idle
        } else {
            AxisMotion::Continuous(deadline)
        };
        self.motion.lock().pan_tilt = motion;
        let result = self.platform.ptz_move_continuous(pan, tilt, timeout_ms);
        self.finish(result, motion)
    }

    /// Stopping zoom on a camera without a zoom motor is a successful no-op.
    pub fn stop(&self, profile: &str, stop_pan_tilt: bool, stop_zoom: bool) -> Result<()> {
        Self::check_profile(profile)?;
        debug!("[{}] stop pan_tilt={} zoom={}", profile, stop_pan_tilt, stop_zoom);

        if stop_pan_tilt {
            let result = self.platform.ptz_stop();
            self.finish(result, AxisMotion::Idle)?;
        }
        if stop_zoom {
            if self.platform.ptz_supports_zoom() {
                self.platform.ptz_zoom_stop()?;
            }
            self.motion.lock().zoom = AxisMotion::Idle;
        }
        Ok(())
    }

    pub fn get_status(&self, profile: &str) -> Result<PtzStatus> {
        Self::check_profile(profile)?;
        let hw = self.platform.ptz_status();
        let mut state = self.motion.lock();
        let hw = match hw {
            Ok(hw) => hw,
            Err(e) => {
                state.last_error = e.to_string();
                return Err(e.into());
            }
        };

        state.pan_tilt = match state.pan_tilt {
            AxisMotion::Positioning if !hw.pan_tilt_moving => AxisMotion::Idle,
            AxisMotion::Continuous(Some(deadline)) if Instant::now() >= deadline => {
                AxisMotion::Idle
            }
            other => other,
        };
        if state.zoom == AxisMotion::Positioning && !hw.zoom_moving {
            state.zoom = AxisMotion::Idle;
        }

        let position = PtzVector::new(
            Range::NORMALIZED.clamp(hw.pan_degrees / PAN_DEGREES),
            Range::NORMALIZED.clamp(hw.tilt_degrees / TILT_DEGREES),
            hw.zoom,
        );
        Ok(PtzStatus {
            position,
            move_status: PtzMoveStatus {
                pan_tilt: state.pan_tilt.status(),
                zoom: state.zoom.status(),
            },
            error: state.last_error.clone(),
            utc_time: Utc::now(),
        })
    }

    /// Stores the current position under the next free token of `profile`.
    pub fn set_preset(&self, profile: &str, name: Option<&str>) -> Result<String> {
        Self::check_profile(profile)?;
        let name = name.ok_or_else(|| OnvifError::InvalidInput("missing preset name".into()))?;
        let position = self.get_status(profile)?.position;

        let store = self.store(profile);
        let mut store = store.lock();
        if store.presets.len() >= self.node.max_presets {
            warn!("[{}] preset store full ({})", profile, self.node.max_presets);
            return Err(OnvifError::AlreadyAtCapacity(format!(
                "profile {} already has {} presets",
                profile, self.node.max_presets
            )));
        }
        store.next_number += 1;
        let token = format!("Preset{}", store.next_number);
        store.presets.push(PtzPreset {
            token: token.clone(),
            name: name.to_string(),
            position,
        });
        info!("[{}] preset {} ('{}') stored", profile, token, name);
        Ok(token)
    }

    pub fn goto_preset(&self, profile: &str, token: &str, speed: Option<&PtzVector>) -> Result<()> {
        Self::check_profile(profile)?;
        let position = {
            let store = self.store(profile);
            let store = store.lock();
            store
                .presets
                .iter()
                .find(|p| p.token == token)
                .map(|p| p.position.clone())
                .ok_or_else(|| OnvifError::NotFound(format!("preset {}", token)))?
        };
        self.absolute_move(profile, &position, speed)
    }

    pub fn remove_preset(&self, profile: &str, token: &str) -> Result<()> {
        Self::check_profile(profile)?;
        let store = self.store(profile);
        let mut store = store.lock();
        let index = store
            .presets
            .iter()
            .position(|p| p.token == token)
            .ok_or_else(|| OnvifError::NotFound(format!("preset {}", token)))?;
        store.presets.remove(index);
        info!("[{}] preset {} removed", profile, token);
        Ok(())
    }

    pub fn get_presets(&self, profile: &str) -> Result<Vec<PtzPreset>> {
        Self::check_profile(profile)?;
        let store = self.store(profile);
        let presets = store.lock().presets.clone();
        Ok(presets)
    }

    pub fn goto_home(&self, profile: &str, speed: Option<&PtzVector>) -> Result<()> {
        let home = self.home.lock().clone();
        self.absolute_move(profile, &home, speed)
    }

    pub fn set_home(&self, profile: &str) -> Result<()> {
        if !self.node.home_supported {
            return Err(OnvifError::NotSupported("home position".into()));
        }
        let position = self.get_status(profile)?.position;
        *self.home.lock() = position;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{PlatformCall, SimulatedPlatform};
    use pretty_assertions::assert_eq;

    fn controller() -> (Arc<SimulatedPlatform>, PtzController) {
        let platform = Arc::new(SimulatedPlatform::new());
        let ctl = PtzController::new(platform.clone());
        (platform, ctl)
    }

    #[test]
    fn test_speed_mapping() {
        assert_eq!(to_driver_speed(0.0), 15);
        assert_eq!(to_driver_speed(1.0), 100);
        assert_eq!(to_driver_speed(-1.0), 100);
        assert_eq!(to_driver_speed(0.5), 58);
        assert_eq!(to_driver_speed(7.0), 100);
        assert_eq!(to_signed_speed(-0.5), -58);
        assert_eq!(to_signed_speed(0.0), 0);
    }

    #[test]
    fn test_absolute_move_clamps_and_maps() {
        let (platform, ctl) = controller();
        ctl.absolute_move("MainProfile", &PtzVector::new(2.0, -0.5, 0.0), None)
            .unwrap();
        assert_eq!(
            platform.calls(),
            vec![PlatformCall::MoveAbsolute {
                pan: 180.0,
                tilt: -45.0,
                speed: 58
            }]
        );
        let status = ctl.get_status("MainProfile").unwrap();
        assert_eq!(status.position.pan_tilt, Vector2D::new(1.0, -0.5));
        assert_eq!(status.move_status.pan_tilt, MoveStatus::Idle);
        assert!(status.error.is_empty());
    }

    #[test]
    fn test_empty_profile_rejected() {
        let (_, ctl) = controller();
        assert!(matches!(
            ctl.absolute_move("", &PtzVector::default(), None),
            Err(OnvifError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_continuous_until_stop() {
        let (_, ctl) = controller();
        ctl.continuous_move("P", &PtzVector::new(0.3, 0.0, 0.0), 0)
            .unwrap();
        for _ in 0..3 {
            let status = ctl.get_status("P").unwrap();
            assert_eq!(status.move_status.pan_tilt, MoveStatus::Moving);
        }
        ctl.stop("P", true, false).unwrap();
        assert_eq!(
            ctl.get_status("P").unwrap().move_status.pan_tilt,
            MoveStatus::Idle
        );
    }

    #[test]
    fn test_continuous_with_timeout_expires() {
        let (_, ctl) = controller();
        ctl.continuous_move("P", &PtzVector::new(0.0, -1.0, 0.0), 20)
            .unwrap();
        assert_eq!(
            ctl.get_status("P").unwrap().move_status.pan_tilt,
            MoveStatus::Moving
        );
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(
            ctl.get_status("P").unwrap().move_status.pan_tilt,
            MoveStatus::Idle
        );
    }

    #[test]
    fn test_zoom_stop_without_zoom_succeeds() {
        let (platform, ctl) = controller();
        ctl.stop("P", false, true).unwrap();
        assert!(platform.calls().is_empty());
    }

    #[test]
    fn test_platform_error_is_reported_in_status() {
        let (platform, ctl) = controller();
        platform.fail_next(PlatformError::Hardware("motor stalled".into()));
        let err = ctl
            .absolute_move("P", &PtzVector::new(0.1, 0.1, 0.0), None)
            .unwrap_err();
        assert!(matches!(err, OnvifError::Platform(_)));
        let status = ctl.get_status("P").unwrap();
        assert_eq!(status.error, "hardware failure: motor stalled");
    }

    #[test]
    fn test_preset_lifecycle() {
        let (_, ctl) = controller();
        let token = ctl.set_preset("ProfileToken1", Some("TestPreset")).unwrap();
        assert_eq!(token, "Preset1");
        ctl.goto_preset("ProfileToken1", "Preset1", None).unwrap();
        ctl.remove_preset("ProfileToken1", "Preset1").unwrap();
        assert!(ctl.get_presets("ProfileToken1").unwrap().is_empty());
    }

    #[test]
    fn test_preset_name_rules() {
        let (_, ctl) = controller();
        assert!(matches!(
            ctl.set_preset("P", None),
            Err(OnvifError::InvalidInput(_))
        ));
        assert!(ctl.set_preset("P", Some("")).is_ok());
        assert!(ctl.set_preset("P", Some("Ünïcødé <&> preset name that is fairly long")).is_ok());
    }

    #[test]
    fn test_tokens_are_not_reused() {
        let (_, ctl) = controller();
        for _ in 0..3 {
            ctl.set_preset("P", Some("x")).unwrap();
        }
        ctl.remove_preset("P", "Preset2").unwrap();
        assert_eq!(ctl.set_preset("P", Some("y")).unwrap(), "Preset4");
        let tokens: Vec<_> = ctl
            .get_presets("P")
            .unwrap()
            .into_iter()
            .map(|p| p.token)
            .collect();
        assert_eq!(tokens, vec!["Preset1", "Preset3", "Preset4"]);
    }

    #[test]
    fn test_stores_are_per_profile() {
        let (_, ctl) = controller();
        ctl.set_preset("A", Some("a")).unwrap();
        assert_eq!(ctl.set_preset("B", Some("b")).unwrap(), "Preset1");
        assert_eq!(ctl.get_presets("A").unwrap().len(), 1);
    }

    #[test]
    fn test_goto_returns_to_stored_position() {
        let (platform, ctl) = controller();
        ctl.absolute_move("P", &PtzVector::new(0.5, 0.5, 0.0), None)
            .unwrap();
        let token = ctl.set_preset("P", Some("door")).unwrap();
        ctl.absolute_move("P", &PtzVector::new(-1.0, 0.0, 0.0), None)
            .unwrap();
        ctl.goto_preset("P", &token, None).unwrap();
        assert_eq!(
            platform.calls().last(),
            Some(&PlatformCall::MoveAbsolute {
                pan: 90.0,
                tilt: 45.0,
                speed: 58
            })
        );
    }

    #[test]
    fn test_home_position() {
        let (_, ctl) = controller();
        ctl.absolute_move("P", &PtzVector::new(0.25, 0.0, 0.0), None)
            .unwrap();
        ctl.set_home("P").unwrap();
        ctl.absolute_move("P", &PtzVector::new(-0.5, 0.0, 0.0), None)
            .unwrap();
        ctl.goto_home("P", None).unwrap();
        assert_eq!(
            ctl.get_status("P").unwrap().position.pan_tilt,
            Vector2D::new(0.25, 0.0)
        );
    }
}
