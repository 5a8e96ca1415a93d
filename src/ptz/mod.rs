//! PTZ motion state machine and the bounded preset store.

mod controller;
mod types;

pub use controller::{to_degrees, to_driver_speed, PtzController};
pub use types::{
    MoveStatus, PtzConfiguration, PtzMoveStatus, PtzNode, PtzPreset, PtzStatus, PtzVector, Range,
    Vector2D, POSITION_SPACE, PTZ_MAX_PRESETS, TRANSLATION_SPACE, VELOCITY_SPACE,
    ZOOM_POSITION_SPACE,
};
