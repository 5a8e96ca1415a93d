use std::collections::HashMap;

use base64::Engine as _;
use log::{debug, info, warn};
use md5::{Digest, Md5};
use parking_lot::RwLock;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

use super::session::RtspSession;
use crate::{OnvifError, Result};

pub const DEFAULT_REALM: &str = "RTSP Server";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RtspAuthType {
    #[default]
    None,
    Basic,
    Digest,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RtspUser {
    pub username: String,
    pub password: String,
}

impl RtspUser {
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtspAuthConfig {
    pub auth_type: RtspAuthType,
    pub realm: String,
    pub users: Vec<RtspUser>,
}

impl Default for RtspAuthConfig {
    fn default() -> Self {
        Self {
            auth_type: RtspAuthType::None,
            realm: DEFAULT_REALM.to_string(),
            users: Vec::new(),
        }
    }
}

impl RtspAuthConfig {
    pub fn new(auth_type: RtspAuthType) -> Self {
        Self {
            auth_type,
            ..Self::default()
        }
    }

    pub fn with_realm(mut self, realm: &str) -> Self {
        self.realm = realm.to_string();
        self
    }

    pub fn with_user(mut self, username: &str, password: &str) -> Self {
        self.set_user(username, password);
        self
    }

    /// Adds a user or replaces the password of an existing one.
    pub fn set_user(&mut self, username: &str, password: &str) {
        match self.users.iter_mut().find(|u| u.username == username) {
            Some(user) => user.password = password.to_string(),
            None => self.users.push(RtspUser::new(username, password)),
        }
    }

    pub fn enabled(&self) -> bool {
        self.auth_type != RtspAuthType::None
    }
}

/// Credentials presented in an `Authorization` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    Basic {
        username: String,
        password: String,
    },
    Digest {
        username: String,
        realm: String,
        nonce: String,
        uri: Option<String>,
        response: String,
    },
}

pub(crate) fn md5_hash(s: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(s.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// `MD5(MD5(username:realm:password):nonce:MD5(method:uri))`
pub fn digest_response(
    username: &str,
    realm: &str,
    password: &str,
    nonce: &str,
    method: &str,
    uri: &str,
) -> String {
    let ha1 = md5_hash(&format!("{}:{}:{}", username, realm, password));
    let ha2 = md5_hash(&format!("{}:{}", method, uri));
    md5_hash(&format!("{}:{}:{}", ha1, nonce, ha2))
}

fn generate_nonce() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn ct_equal(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Parses an `Authorization` header value.
pub fn parse_credentials(header: &str) -> Result<Credentials> {
    let header = header.trim();
    if let Some(encoded) = header.strip_prefix("Basic ") {
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|_| OnvifError::AuthenticationFailed)?;
        let decoded = String::from_utf8(decoded).map_err(|_| OnvifError::AuthenticationFailed)?;
        let (username, password) = decoded
            .split_once(':')
            .ok_or(OnvifError::AuthenticationFailed)?;
        return Ok(Credentials::Basic {
            username: username.to_string(),
            password: password.to_string(),
        });
    }

    if let Some(params) = header.strip_prefix("Digest ") {
        let parts: HashMap<_, _> = params
            .split(',')
            .filter_map(|part| {
                let mut parts = part.trim().splitn(2, '=');
                let key = parts.next()?.trim();
                let value = parts.next()?.trim().trim_matches('"');
                Some((key, value))
            })
            .collect();
        let field = |name: &str| {
            parts
                .get(name)
                .map(|v| v.to_string())
                .ok_or(OnvifError::AuthenticationFailed)
        };
        return Ok(Credentials::Digest {
            username: field("username")?,
            realm: field("realm")?,
            nonce: field("nonce")?,
            uri: parts.get("uri").map(|v| v.to_string()),
            response: field("response")?,
        });
    }

    Err(OnvifError::AuthenticationFailed)
}

/// Server-wide RTSP authentication state.
#[derive(Debug, Default)]
pub struct RtspAuth {
    config: RwLock<RtspAuthConfig>,
    nonce: RwLock<Option<String>>,
}

impl RtspAuth {
    pub fn new(config: RtspAuthConfig) -> Self {
        Self {
            config: RwLock::new(config),
            nonce: RwLock::new(None),
        }
    }

    pub fn auth_type(&self) -> RtspAuthType {
        self.config.read().auth_type
    }

    pub fn realm(&self) -> String {
        self.config.read().realm.clone()
    }

    /// Most recently issued server nonce.
    pub fn current_nonce(&self) -> Option<String> {
        self.nonce.read().clone()
    }

    pub fn require_auth(&self, session: &RtspSession) -> bool {
        self.config.read().enabled() && !session.authenticated
    }

    /// Value of a `WWW-Authenticate` header; a Digest challenge carries a fresh nonce.
    pub fn generate_www_authenticate_header(&self, session: &mut RtspSession) -> String {
        let config = self.config.read();
        match config.auth_type {
            RtspAuthType::Digest => {
                let nonce = generate_nonce();
                *self.nonce.write() = Some(nonce.clone());
                session.auth_nonce = Some(nonce.clone());
                format!(
                    r#"Digest realm="{}", nonce="{}", algorithm=MD5"#,
                    config.realm, nonce
                )
            }
            _ => format!(r#"Basic realm="{}""#, config.realm),
        }
    }

    pub fn validate_basic(
        &self,
        session: &mut RtspSession,
        username: &str,
        password: &str,
    ) -> Result<()> {
        let config = self.config.read();
        let matched = config
            .users
            .iter()
            .any(|u| u.username == username && ct_equal(&u.password, password));
        if !matched {
            return Err(OnvifError::AuthenticationFailed);
        }
        session.authenticated = true;
        session.auth_username = Some(username.to_string());
        Ok(())
    }

    /// Checks a Digest response against the nonce issued to this session.
    pub fn validate_digest(
        &self,
        session: &mut RtspSession,
        credentials: &Credentials,
        method: &str,
        request_uri: &str,
    ) -> Result<()> {
        let Credentials::Digest {
            username,
            nonce,
            uri,
            response,
            ..
        } = credentials
        else {
            return Err(OnvifError::AuthenticationFailed);
        };

        let issued = session
            .auth_nonce
            .as_deref()
            .ok_or(OnvifError::AuthenticationFailed)?;
        if !ct_equal(issued, nonce) {
            debug!("digest nonce mismatch for {}", username);
            return Err(OnvifError::AuthenticationFailed);
        }

        let config = self.config.read();
        let user = config
            .users
            .iter()
            .find(|u| &u.username == username)
            .ok_or(OnvifError::AuthenticationFailed)?;
        let uri = uri.as_deref().unwrap_or(request_uri);
        let expected = digest_response(username, &config.realm, &user.password, nonce, method, uri);
        if !ct_equal(&expected, response) {
            return Err(OnvifError::AuthenticationFailed);
        }

        session.authenticated = true;
        session.auth_username = Some(username.clone());
        Ok(())
    }

    /// Validates an `Authorization` header with the configured scheme.
    pub fn authenticate(
        &self,
        session: &mut RtspSession,
        header: &str,
        method: &str,
        request_uri: &str,
    ) -> Result<()> {
        let credentials = parse_credentials(header)?;
        let result = match (self.auth_type(), &credentials) {
            (RtspAuthType::Basic, Credentials::Basic { username, password }) => {
                self.validate_basic(session, username, password)
            }
            (RtspAuthType::Digest, Credentials::Digest { .. }) => {
                self.validate_digest(session, &credentials, method, request_uri)
            }
            _ => Err(OnvifError::AuthenticationFailed),
        };
        if result.is_err() {
            warn!("RTSP authentication failed for {} {}", method, request_uri);
        }
        result
    }

    /// Adds a user; adding an existing username replaces its password.
    pub fn add_user(&self, username: &str, password: &str) {
        self.config.write().set_user(username, password);
        info!("RTSP user {} set", username);
    }

    pub fn remove_user(&self, username: &str) -> Result<()> {
        let mut config = self.config.write();
        let index = config
            .users
            .iter()
            .position(|u| u.username == username)
            .ok_or_else(|| OnvifError::NotFound(format!("user {}", username)))?;
        config.users.remove(index);
        info!("RTSP user {} removed", username);
        Ok(())
    }

    pub fn usernames(&self) -> Vec<String> {
        self.config
            .read()
            .users
            .iter()
            .map(|u| u.username.clone())
            .collect()
    }
}
