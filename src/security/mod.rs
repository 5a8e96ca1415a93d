//! WS-Security UsernameToken checks for the SOAP services.
//!
//! Each operation has a required [`AuthLevel`]. Operations above
//! `Anonymous` need a `wsse:UsernameToken` in the SOAP header whose
//! account level satisfies the requirement.

mod levels;

pub use levels::{required_level, AuthLevel, UserLevel};

use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, TimeDelta, Utc};
use log::{debug, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use subtle::ConstantTimeEq;

use crate::soap::{SoapRequest, XmlElement};
use crate::{OnvifError, Result};

pub const PASSWORD_DIGEST_URI: &str = "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-username-token-profile-1.0#PasswordDigest";
pub const PASSWORD_TEXT_URI: &str = "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-username-token-profile-1.0#PasswordText";

pub const DEFAULT_MAX_TOKEN_AGE_SECS: u64 = 300;
pub const DEFAULT_NONCE_CACHE_SIZE: usize = 10_000;

/// An account allowed to call the SOAP services.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityUser {
    pub username: String,
    pub password: String,
    pub level: UserLevel,
}

impl SecurityUser {
    pub fn new(username: &str, password: &str, level: UserLevel) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
            level,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WsSecurityConfig {
    /// Allowed distance between `Created` and the local clock, both ways.
    pub max_token_age: TimeDelta,
    /// Reject `PasswordText` tokens.
    pub require_digest: bool,
    pub nonce_cache_size: usize,
    pub users: Vec<SecurityUser>,
}

impl Default for WsSecurityConfig {
    fn default() -> Self {
        Self {
            max_token_age: TimeDelta::seconds(DEFAULT_MAX_TOKEN_AGE_SECS as i64),
            require_digest: true,
            nonce_cache_size: DEFAULT_NONCE_CACHE_SIZE,
            users: Vec::new(),
        }
    }
}

impl WsSecurityConfig {
    /// Adds an account; an existing username is replaced.
    pub fn set_user(&mut self, user: SecurityUser) {
        match self.users.iter_mut().find(|u| u.username == user.username) {
            Some(existing) => *existing = user,
            None => self.users.push(user),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasswordType {
    Digest,
    Text,
}

/// `wsse:UsernameToken` as found in a request header.
#[derive(Debug, Clone, PartialEq)]
pub struct UsernameToken {
    pub username: String,
    pub password: String,
    pub password_type: PasswordType,
    pub nonce: Option<String>,
    pub created: Option<String>,
}

impl UsernameToken {
    /// Reads the token from `Header/Security/UsernameToken`, if any.
    pub fn from_header(header: &XmlElement) -> Result<Option<Self>> {
        let Some(token) = header
            .child("Security")
            .and_then(|security| security.child("UsernameToken"))
        else {
            return Ok(None);
        };

        let username = token
            .child_text("Username")
            .ok_or(OnvifError::AuthenticationFailed)?;
        let password = token
            .child("Password")
            .ok_or(OnvifError::AuthenticationFailed)?;
        let password_type = match password.attribute("Type") {
            None => PasswordType::Text,
            Some(t) if t.ends_with("#PasswordText") => PasswordType::Text,
            Some(t) if t.ends_with("#PasswordDigest") => PasswordType::Digest,
            Some(t) => {
                warn!("unknown password type {}", t);
                return Err(OnvifError::AuthenticationFailed);
            }
        };

        Ok(Some(Self {
            username: username.to_string(),
            password: password.text().to_string(),
            password_type,
            nonce: token.child_text("Nonce").map(str::to_string),
            created: token.child_text("Created").map(str::to_string),
        }))
    }
}

/// `Base64(SHA-1(nonce + created + password))`, `nonce` being the decoded bytes.
pub fn password_digest(nonce: &[u8], created: &str, password: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(nonce);
    hasher.update(created.as_bytes());
    hasher.update(password.as_bytes());
    STANDARD.encode(hasher.finalize())
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Validates UsernameTokens and keeps the nonces seen within the token age.
pub struct WsSecurity {
    config: WsSecurityConfig,
    nonces: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl WsSecurity {
    pub fn new(config: WsSecurityConfig) -> Self {
        Self {
            config,
            nonces: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &WsSecurityConfig {
        &self.config
    }

    /// Checks the caller of `service`::`action` against the request `body`.
    ///
    /// Returns the caller's level, `None` for anonymous operations.
    pub fn authorize(&self, service: &str, action: &str, body: &str) -> Result<Option<UserLevel>> {
        let required = required_level(service, action);
        if required == AuthLevel::Anonymous {
            return Ok(None);
        }

        let request = SoapRequest::parse(body)?;
        let token = match request.header() {
            Some(header) => UsernameToken::from_header(header)?,
            None => None,
        };
        let Some(token) = token else {
            debug!("{}::{} without UsernameToken", service, action);
            return Err(OnvifError::AuthenticationFailed);
        };

        let level = self.authenticate_at(&token, Utc::now())?;
        if !required.is_satisfied_by(Some(level)) {
            warn!(
                "{} ({:?}) not allowed to call {}::{}",
                token.username, level, service, action
            );
            return Err(OnvifError::AuthorizationFailed);
        }
        Ok(Some(level))
    }

    /// Verifies `token` as of `now` and returns the account level.
    pub fn authenticate_at(&self, token: &UsernameToken, now: DateTime<Utc>) -> Result<UserLevel> {
        let Some(user) = self
            .config
            .users
            .iter()
            .find(|u| u.username == token.username)
        else {
            warn!("UsernameToken for unknown user {}", token.username);
            return Err(OnvifError::AuthenticationFailed);
        };

        match token.password_type {
            PasswordType::Text => {
                if self.config.require_digest {
                    warn!("PasswordText rejected for {}", token.username);
                    return Err(OnvifError::AuthenticationFailed);
                }
                if !constant_time_eq(&token.password, &user.password) {
                    warn!("wrong password for {}", token.username);
                    return Err(OnvifError::AuthenticationFailed);
                }
            }
            PasswordType::Digest => {
                let (Some(nonce), Some(created)) = (&token.nonce, &token.created) else {
                    warn!("digest token for {} lacks Nonce or Created", token.username);
                    return Err(OnvifError::AuthenticationFailed);
                };
                self.check_created(created, now)?;
                let nonce_bytes = STANDARD
                    .decode(nonce)
                    .map_err(|_| OnvifError::AuthenticationFailed)?;
                let expected = password_digest(&nonce_bytes, created, &user.password);
                if !constant_time_eq(&token.password, &expected) {
                    warn!("wrong password digest for {}", token.username);
                    return Err(OnvifError::AuthenticationFailed);
                }
                self.record_nonce(nonce, now)?;
            }
        }

        debug!("UsernameToken accepted for {}", token.username);
        Ok(user.level)
    }

    fn check_created(&self, created: &str, now: DateTime<Utc>) -> Result<()> {
        let created = DateTime::parse_from_rfc3339(created)
            .map_err(|_| OnvifError::AuthenticationFailed)?
            .with_timezone(&Utc);
        let skew = (now - created).abs();
        if skew > self.config.max_token_age {
            warn!("UsernameToken created {} is outside the allowed window", created);
            return Err(OnvifError::AuthenticationFailed);
        }
        Ok(())
    }

    fn record_nonce(&self, nonce: &str, now: DateTime<Utc>) -> Result<()> {
        let mut nonces = self.nonces.lock();
        if nonces.contains_key(nonce) {
            warn!("replayed nonce {}", nonce);
            return Err(OnvifError::AuthenticationFailed);
        }
        if nonces.len() >= self.config.nonce_cache_size {
            let ttl = self.config.max_token_age;
            nonces.retain(|_, seen| now - *seen <= ttl);
            if nonces.len() >= self.config.nonce_cache_size {
                warn!("nonce cache full, rejecting token");
                return Err(OnvifError::AuthenticationFailed);
            }
        }
        nonces.insert(nonce.to_string(), now);
        Ok(())
    }

    pub fn cached_nonces(&self) -> usize {
        self.nonces.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn security() -> WsSecurity {
        let mut config = WsSecurityConfig::default();
        config.set_user(SecurityUser::new("admin", "admin123", UserLevel::Administrator));
        config.set_user(SecurityUser::new("viewer", "view", UserLevel::User));
        WsSecurity::new(config)
    }

    fn created_at(now: DateTime<Utc>) -> String {
        now.format("%Y-%m-%dT%H:%M:%SZ").to_string()
    }

    fn digest_token(user: &str, password: &str, nonce: &[u8], created: &str) -> UsernameToken {
        UsernameToken {
            username: user.to_string(),
            password: password_digest(nonce, created, password),
            password_type: PasswordType::Digest,
            nonce: Some(STANDARD.encode(nonce)),
            created: Some(created.to_string()),
        }
    }

    fn envelope(header: &str, op: &str) -> String {
        format!(
            r#"<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope"><s:Header>{header}</s:Header><s:Body><{op}/></s:Body></s:Envelope>"#
        )
    }

    fn security_header(token: &UsernameToken) -> String {
        let type_uri = match token.password_type {
            PasswordType::Digest => PASSWORD_DIGEST_URI,
            PasswordType::Text => PASSWORD_TEXT_URI,
        };
        format!(
            r#"<wsse:Security xmlns:wsse="urn:wsse" xmlns:wsu="urn:wsu"><wsse:UsernameToken><wsse:Username>{}</wsse:Username><wsse:Password Type="{}">{}</wsse:Password><wsse:Nonce>{}</wsse:Nonce><wsu:Created>{}</wsu:Created></wsse:UsernameToken></wsse:Security>"#,
            token.username,
            type_uri,
            token.password,
            token.nonce.as_deref().unwrap_or_default(),
            token.created.as_deref().unwrap_or_default(),
        )
    }

    #[test]
    fn test_known_digest() {
        // plain concatenation, nonce first
        let digest = password_digest(b"abc", "2024-01-01T00:00:00Z", "secret");
        let mut hasher = Sha1::new();
        hasher.update(b"abc2024-01-01T00:00:00Zsecret");
        assert_eq!(digest, STANDARD.encode(hasher.finalize()));
        assert_eq!(digest.len(), 28);
    }

    #[test]
    fn test_header_parsing() {
        let created = created_at(Utc::now());
        let token = digest_token("admin", "admin123", b"nonce-1", &created);
        let request = SoapRequest::parse(&envelope(&security_header(&token), "GetProfiles")).unwrap();
        let parsed = UsernameToken::from_header(request.header().unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(parsed, token);

        let request = SoapRequest::parse(&envelope("", "GetProfiles")).unwrap();
        assert_eq!(UsernameToken::from_header(request.header().unwrap()).unwrap(), None);
    }

    #[test]
    fn test_digest_accepted_once() {
        let security = security();
        let now = Utc::now();
        let token = digest_token("admin", "admin123", b"nonce-1", &created_at(now));
        assert_eq!(
            security.authenticate_at(&token, now).unwrap(),
            UserLevel::Administrator
        );
        assert!(matches!(
            security.authenticate_at(&token, now),
            Err(OnvifError::AuthenticationFailed)
        ));
        assert_eq!(security.cached_nonces(), 1);
    }

    #[test]
    fn test_wrong_password_and_unknown_user() {
        let security = security();
        let now = Utc::now();
        let created = created_at(now);
        let wrong = digest_token("admin", "guess", b"n1", &created);
        assert!(security.authenticate_at(&wrong, now).is_err());
        let unknown = digest_token("root", "admin123", b"n2", &created);
        assert!(security.authenticate_at(&unknown, now).is_err());
        // failed attempts do not consume nonces
        assert_eq!(security.cached_nonces(), 0);
    }

    #[test]
    fn test_created_window() {
        let security = security();
        let now = Utc::now();
        let stale = digest_token("admin", "admin123", b"n1", &created_at(now - TimeDelta::seconds(301)));
        assert!(security.authenticate_at(&stale, now).is_err());
        let future = digest_token("admin", "admin123", b"n2", &created_at(now + TimeDelta::seconds(301)));
        assert!(security.authenticate_at(&future, now).is_err());
        let skewed = digest_token("admin", "admin123", b"n3", &created_at(now + TimeDelta::seconds(120)));
        assert!(security.authenticate_at(&skewed, now).is_ok());
        let garbage = digest_token("admin", "admin123", b"n4", "yesterday");
        assert!(security.authenticate_at(&garbage, now).is_err());
    }

    #[test]
    fn test_password_text() {
        let token = UsernameToken {
            username: "viewer".into(),
            password: "view".into(),
            password_type: PasswordType::Text,
            nonce: None,
            created: None,
        };
        assert!(security().authenticate_at(&token, Utc::now()).is_err());

        let mut config = security().config().clone();
        config.require_digest = false;
        let relaxed = WsSecurity::new(config);
        assert_eq!(relaxed.authenticate_at(&token, Utc::now()).unwrap(), UserLevel::User);
    }

    #[test]
    fn test_full_nonce_cache_purges_expired() {
        let mut config = security().config().clone();
        config.nonce_cache_size = 2;
        let security = WsSecurity::new(config);
        let start = Utc::now();
        for nonce in [b"a", b"b"] {
            let token = digest_token("admin", "admin123", nonce, &created_at(start));
            security.authenticate_at(&token, start).unwrap();
        }
        let token = digest_token("admin", "admin123", b"c", &created_at(start));
        assert!(security.authenticate_at(&token, start).is_err());

        let later = start + TimeDelta::seconds(301);
        let token = digest_token("admin", "admin123", b"d", &created_at(later));
        security.authenticate_at(&token, later).unwrap();
        assert_eq!(security.cached_nonces(), 1);
    }

    #[test]
    fn test_authorize_levels() {
        let security = security();
        assert_eq!(
            security
                .authorize("Device", "GetSystemDateAndTime", &envelope("", "GetSystemDateAndTime"))
                .unwrap(),
            None
        );
        assert!(matches!(
            security.authorize("Media", "GetProfiles", &envelope("", "GetProfiles")),
            Err(OnvifError::AuthenticationFailed)
        ));

        let created = created_at(Utc::now());
        let viewer = digest_token("viewer", "view", b"v1", &created);
        let body = envelope(&security_header(&viewer), "SystemReboot");
        assert!(matches!(
            security.authorize("Device", "SystemReboot", &body),
            Err(OnvifError::AuthorizationFailed)
        ));

        let viewer = digest_token("viewer", "view", b"v2", &created);
        let body = envelope(&security_header(&viewer), "GetProfiles");
        assert_eq!(
            security.authorize("Media", "GetProfiles", &body).unwrap(),
            Some(UserLevel::User)
        );
    }
}
