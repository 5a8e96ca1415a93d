use std::collections::HashMap;
use std::time::{Duration, Instant};

use log::{debug, info};
use parking_lot::Mutex;

use super::{
    AudioEncoderSettings, IrLedMode, Platform, PlatformError, PlatformResult, PtzHardwareStatus,
    VideoCodec, VideoEncoderSettings, VpssEffect,
};

const PAN_LIMIT_DEGREES: f32 = 180.0;
const TILT_LIMIT_DEGREES: f32 = 90.0;

/// A call received by [`SimulatedPlatform`], kept for inspection.
#[derive(Debug, Clone, PartialEq)]
pub enum PlatformCall {
    MoveAbsolute { pan: f32, tilt: f32, speed: u8 },
    MoveRelative { pan: f32, tilt: f32, speed: u8 },
    MoveContinuous { pan: i32, tilt: i32, timeout_ms: u64 },
    Stop,
    Effect { effect: VpssEffect, value: i32 },
    IrLedInit,
    IrLedMode(IrLedMode),
    EncoderSet { channel: u32 },
    Reboot,
}

struct State {
    pan: f32,
    tilt: f32,
    moving: bool,
    move_deadline: Option<Instant>,
    encoders: Vec<VideoEncoderSettings>,
    effects: HashMap<VpssEffect, i32>,
    irled_ready: bool,
    irled_mode: IrLedMode,
    calls: Vec<PlatformCall>,
    fail_next: Option<PlatformError>,
}

/// In-memory camera used by the daemon when no hardware backend is linked, and by tests.
pub struct SimulatedPlatform {
    state: Mutex<State>,
    latency: Duration,
}

impl Default for SimulatedPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedPlatform {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                pan: 0.0,
                tilt: 0.0,
                moving: false,
                move_deadline: None,
                encoders: vec![
                    VideoEncoderSettings {
                        codec: VideoCodec::H264,
                        width: 1280,
                        height: 720,
                        framerate: 25,
                        bitrate_kbps: 2048,
                        gov_length: 50,
                    },
                    VideoEncoderSettings {
                        codec: VideoCodec::H264,
                        width: 640,
                        height: 360,
                        framerate: 25,
                        bitrate_kbps: 800,
                        gov_length: 50,
                    },
                ],
                effects: HashMap::new(),
                irled_ready: false,
                irled_mode: IrLedMode::Auto,
                calls: Vec::new(),
                fail_next: None,
            }),
            latency: Duration::ZERO,
        }
    }

    /// Makes every motor call block for `latency`, like a real driver.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// The next call fails with `error`.
    pub fn fail_next(&self, error: PlatformError) {
        self.state.lock().fail_next = Some(error);
    }

    pub fn calls(&self) -> Vec<PlatformCall> {
        self.state.lock().calls.clone()
    }

    pub fn effect(&self, effect: VpssEffect) -> Option<i32> {
        self.state.lock().effects.get(&effect).copied()
    }

    pub fn irled_mode(&self) -> IrLedMode {
        self.state.lock().irled_mode
    }

    fn record(&self, call: PlatformCall) -> PlatformResult<parking_lot::MutexGuard<'_, State>> {
        let mut state = self.state.lock();
        if let Some(err) = state.fail_next.take() {
            debug!("simulated platform failing {:?}: {}", call, err);
            return Err(err);
        }
        state.calls.push(call);
        Ok(state)
    }

    fn block(&self) {
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }
    }
}

impl Platform for SimulatedPlatform {
    fn ptz_move_absolute(&self, pan: f32, tilt: f32, speed: u8) -> PlatformResult<()> {
        self.block();
        let mut state = self.record(PlatformCall::MoveAbsolute { pan, tilt, speed })?;
        state.pan = pan.clamp(-PAN_LIMIT_DEGREES, PAN_LIMIT_DEGREES);
        state.tilt = tilt.clamp(-TILT_LIMIT_DEGREES, TILT_LIMIT_DEGREES);
        state.moving = false;
        state.move_deadline = None;
        Ok(())
    }

    fn ptz_move_relative(&self, pan: f32, tilt: f32, speed: u8) -> PlatformResult<()> {
        self.block();
        let mut state = self.record(PlatformCall::MoveRelative { pan, tilt, speed })?;
        state.pan = (state.pan + pan).clamp(-PAN_LIMIT_DEGREES, PAN_LIMIT_DEGREES);
        state.tilt = (state.tilt + tilt).clamp(-TILT_LIMIT_DEGREES, TILT_LIMIT_DEGREES);
        state.moving = false;
        state.move_deadline = None;
        Ok(())
    }

    fn ptz_move_continuous(&self, pan: i32, tilt: i32, timeout_ms: u64) -> PlatformResult<()> {
        self.block();
        let mut state = self.record(PlatformCall::MoveContinuous {
            pan,
            tilt,
            timeout_ms,
        })?;
        state.moving = pan != 0 || tilt != 0;
        state.move_deadline =
            (timeout_ms > 0).then(|| Instant::now() + Duration::from_millis(timeout_ms));
        Ok(())
    }

    fn ptz_stop(&self) -> PlatformResult<()> {
        let mut state = self.record(PlatformCall::Stop)?;
        state.moving = false;
        state.move_deadline = None;
        Ok(())
    }

    fn ptz_status(&self) -> PlatformResult<PtzHardwareStatus> {
        let mut state = self.state.lock();
        if let Some(err) = state.fail_next.take() {
            return Err(err);
        }
        if let Some(deadline) = state.move_deadline {
            if Instant::now() >= deadline {
                state.moving = false;
                state.move_deadline = None;
            }
        }
        Ok(PtzHardwareStatus {
            pan_degrees: state.pan,
            tilt_degrees: state.tilt,
            zoom: 0.0,
            pan_tilt_moving: state.moving,
            zoom_moving: false,
        })
    }

    fn vpss_effect_set(&self, effect: VpssEffect, value: i32) -> PlatformResult<()> {
        let mut state = self.record(PlatformCall::Effect { effect, value })?;
        state.effects.insert(effect, value);
        Ok(())
    }

    fn irled_init(&self) -> PlatformResult<()> {
        let mut state = self.record(PlatformCall::IrLedInit)?;
        state.irled_ready = true;
        Ok(())
    }

    fn irled_set_mode(&self, mode: IrLedMode) -> PlatformResult<()> {
        let mut state = self.record(PlatformCall::IrLedMode(mode))?;
        if !state.irled_ready {
            return Err(PlatformError::Unavailable("IR LED not initialized".into()));
        }
        state.irled_mode = mode;
        Ok(())
    }

    fn video_encoder_get(&self, channel: u32) -> PlatformResult<VideoEncoderSettings> {
        self.state
            .lock()
            .encoders
            .get(channel as usize)
            .cloned()
            .ok_or_else(|| PlatformError::InvalidArgument(format!("encoder channel {}", channel)))
    }

    fn video_encoder_set(&self, channel: u32, settings: &VideoEncoderSettings) -> PlatformResult<()> {
        let mut state = self.record(PlatformCall::EncoderSet { channel })?;
        let slot = state
            .encoders
            .get_mut(channel as usize)
            .ok_or_else(|| PlatformError::InvalidArgument(format!("encoder channel {}", channel)))?;
        *slot = settings.clone();
        Ok(())
    }

    fn audio_encoder_get(&self) -> PlatformResult<AudioEncoderSettings> {
        Ok(AudioEncoderSettings {
            codec: "AAC".to_string(),
            bitrate_kbps: 64,
            sample_rate: 16000,
            channels: 1,
        })
    }

    fn system_reboot(&self) -> PlatformResult<()> {
        drop(self.record(PlatformCall::Reboot)?);
        info!("simulated platform reboot requested");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_motion_tracking() {
        let platform = SimulatedPlatform::new();
        platform.ptz_move_absolute(90.0, -45.0, 50).unwrap();
        let status = platform.ptz_status().unwrap();
        assert_eq!(status.pan_degrees, 90.0);
        assert_eq!(status.tilt_degrees, -45.0);
        assert!(!status.pan_tilt_moving);

        platform.ptz_move_relative(120.0, 0.0, 50).unwrap();
        assert_eq!(platform.ptz_status().unwrap().pan_degrees, 180.0);

        platform.ptz_move_continuous(40, 0, 0).unwrap();
        assert!(platform.ptz_status().unwrap().pan_tilt_moving);
        platform.ptz_stop().unwrap();
        assert!(!platform.ptz_status().unwrap().pan_tilt_moving);
    }

    #[test]
    fn test_injected_failure_is_one_shot() {
        let platform = SimulatedPlatform::new();
        platform.fail_next(PlatformError::Busy);
        assert_eq!(platform.ptz_stop(), Err(PlatformError::Busy));
        assert!(platform.ptz_stop().is_ok());
        assert_eq!(platform.calls(), vec![PlatformCall::Stop]);
    }

    #[test]
    fn test_irled_requires_init() {
        let platform = SimulatedPlatform::new();
        assert!(platform.irled_set_mode(IrLedMode::On).is_err());
        platform.irled_init().unwrap();
        platform.irled_set_mode(IrLedMode::On).unwrap();
        assert_eq!(platform.irled_mode(), IrLedMode::On);
    }
}
