use serde::{Deserialize, Serialize};

/// Role of an account allowed to call the SOAP services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserLevel {
    User,
    Operator,
    Administrator,
}

/// Level an operation demands from its caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthLevel {
    Anonymous,
    User,
    Operator,
    Administrator,
}

impl AuthLevel {
    pub fn is_satisfied_by(self, level: Option<UserLevel>) -> bool {
        match self {
            AuthLevel::Anonymous => true,
            AuthLevel::User => level.is_some(),
            AuthLevel::Operator => level >= Some(UserLevel::Operator),
            AuthLevel::Administrator => level == Some(UserLevel::Administrator),
        }
    }
}

/// Level required for `action` of `service`; unknown pairs need an administrator.
pub fn required_level(service: &str, action: &str) -> AuthLevel {
    use AuthLevel::*;

    match (service, action) {
        ("Device", "GetSystemDateAndTime") => Anonymous,
        ("Device", "GetDeviceInformation" | "GetCapabilities" | "GetServices") => User,
        ("Device", "SystemReboot") => Administrator,

        ("Media", "GetProfiles" | "GetStreamUri") => User,
        (
            "Media",
            "CreateProfile"
            | "DeleteProfile"
            | "SetVideoSourceConfiguration"
            | "SetVideoEncoderConfiguration",
        ) => Operator,

        ("PTZ", "GetNodes" | "GetConfigurations" | "GetStatus" | "GetPresets") => User,
        (
            "PTZ",
            "AbsoluteMove" | "RelativeMove" | "ContinuousMove" | "Stop" | "SetPreset"
            | "GotoPreset" | "RemovePreset" | "GotoHomePosition" | "SetHomePosition",
        ) => Operator,

        ("Imaging", "GetImagingSettings") => User,
        ("Imaging", "SetImagingSettings") => Operator,

        _ => Administrator,
    }
}
