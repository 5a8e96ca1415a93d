use chrono::{DateTime, Utc};

pub const PTZ_MAX_PRESETS: usize = 10;

pub const POSITION_SPACE: &str =
    "http://www.onvif.org/ver10/tptz/PanTiltSpaces/PositionGenericSpace";
pub const TRANSLATION_SPACE: &str =
    "http://www.onvif.org/ver10/tptz/PanTiltSpaces/TranslationGenericSpace";
pub const VELOCITY_SPACE: &str =
    "http://www.onvif.org/ver10/tptz/PanTiltSpaces/VelocityGenericSpace";
pub const ZOOM_POSITION_SPACE: &str =
    "http://www.onvif.org/ver10/tptz/ZoomSpaces/PositionGenericSpace";

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vector2D {
    pub x: f32,
    pub y: f32,
}

impl Vector2D {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Position, translation or velocity in a normalized `[-1, 1]` space.
#[derive(Debug, Clone, PartialEq)]
pub struct PtzVector {
    pub pan_tilt: Vector2D,
    pub zoom: f32,
    pub space: String,
}

impl PtzVector {
    pub fn new(x: f32, y: f32, zoom: f32) -> Self {
        Self {
            pan_tilt: Vector2D::new(x, y),
            zoom,
            space: POSITION_SPACE.to_string(),
        }
    }

    pub fn with_space(mut self, space: &str) -> Self {
        self.space = space.to_string();
        self
    }

    /// Copy with every component forced into `range`.
    pub fn clamped(&self, range: &Range) -> Self {
        Self {
            pan_tilt: Vector2D::new(range.clamp(self.pan_tilt.x), range.clamp(self.pan_tilt.y)),
            zoom: range.clamp(self.zoom),
            space: self.space.clone(),
        }
    }
}

impl Default for PtzVector {
    fn default() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Range {
    pub min: f32,
    pub max: f32,
}

impl Range {
    pub const NORMALIZED: Range = Range { min: -1.0, max: 1.0 };

    pub fn clamp(&self, value: f32) -> f32 {
        if value.is_nan() {
            return 0.0_f32.clamp(self.min, self.max);
        }
        value.clamp(self.min, self.max)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PtzPreset {
    pub token: String,
    pub name: String,
    pub position: PtzVector,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveStatus {
    Idle,
    Moving,
}

impl MoveStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MoveStatus::Idle => "IDLE",
            MoveStatus::Moving => "MOVING",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PtzMoveStatus {
    pub pan_tilt: MoveStatus,
    pub zoom: MoveStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PtzStatus {
    pub position: PtzVector,
    pub move_status: PtzMoveStatus,
    pub error: String,
    pub utc_time: DateTime<Utc>,
}

impl PtzStatus {
    pub fn utc_time_string(&self) -> String {
        self.utc_time.format("%Y-%m-%dT%H:%M:%S.000Z").to_string()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PtzNode {
    pub token: String,
    pub name: String,
    pub pan_tilt_limits: Range,
    pub zoom_limits: Option<Range>,
    pub max_presets: usize,
    pub home_supported: bool,
}

impl Default for PtzNode {
    fn default() -> Self {
        Self {
            token: "PTZNode0".to_string(),
            name: "PTZ Node".to_string(),
            pan_tilt_limits: Range::NORMALIZED,
            zoom_limits: None,
            max_presets: PTZ_MAX_PRESETS,
            home_supported: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PtzConfiguration {
    pub token: String,
    pub name: String,
    pub node_token: String,
    pub default_speed: PtzVector,
    pub default_timeout_ms: u64,
    pub pan_tilt_limits: Range,
}

impl Default for PtzConfiguration {
    fn default() -> Self {
        Self {
            token: "PTZConfig0".to_string(),
            name: "PTZ Configuration".to_string(),
            node_token: "PTZNode0".to_string(),
            default_speed: PtzVector::new(0.5, 0.5, 0.0).with_space(VELOCITY_SPACE),
            default_timeout_ms: 10_000,
            pan_tilt_limits: Range::NORMALIZED,
        }
    }
}
