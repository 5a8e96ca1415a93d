#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(rustdoc::missing_crate_level_docs)]

//! # onvif-core - ONVIF control plane for embedded IP cameras
//!
//! `onvif-core` hosts the ONVIF services of a camera behind a small HTTP
//! server, guards the RTSP endpoint with Basic or Digest authentication and
//! answers WS-Discovery probes. Hardware access goes through the
//! [`platform::Platform`] trait; [`platform::SimulatedPlatform`] stands in
//! when no camera backend is linked.
//!
//! ## Features
//!
//! - SOAP dispatch: Device, Media, PTZ and Imaging services with uniform
//!   fault translation
//! - HTTP/1.1 keep-alive connection management with idle sweeping
//! - RTSP OPTIONS/DESCRIBE/SETUP/PLAY/PAUSE/TEARDOWN with Basic and Digest
//! - PTZ absolute, relative and continuous moves plus a bounded preset store
//! - WS-Discovery Hello, Bye and ProbeMatches
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use onvif_core::config::Config;
//! use onvif_core::platform::SimulatedPlatform;
//! use onvif_core::OnvifServer;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load(None)?;
//!     let server = OnvifServer::new(config, Arc::new(SimulatedPlatform::new()))?;
//!     server.start().await?;
//!     tokio::signal::ctrl_c().await?;
//!     server.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Overview
//!
//! - `service`: the service handler framework, the dispatcher and the four
//!   hosted services
//! - `soap`: request parsing, response and fault envelopes, pooled contexts
//! - `http`: request framing, the connection state machine and registry
//! - `rtsp`: RTSP requests, authentication and sessions
//! - `ptz`: motion state machine and preset store
//! - `fault`: error patterns and SOAP fault translation
//! - `security`: WS-Security UsernameToken checks per operation
//! - `discovery`: WS-Discovery responder

/// Daemon configuration (TOML file plus environment)
pub mod config;

/// WS-Discovery responder
pub mod discovery;

/// Error types and utilities
pub mod error;

/// Error patterns and SOAP fault translation
pub mod fault;

/// HTTP server and connection management
pub mod http;

/// Camera hardware abstraction
pub mod platform;

/// PTZ control and presets
pub mod ptz;

/// RTSP control plane
pub mod rtsp;

/// WS-Security UsernameToken authentication
pub mod security;

/// Top-level server context
pub mod server;

/// SOAP services and dispatch
pub mod service;

/// SOAP codec
pub mod soap;

/// Common utilities and helper functions
pub mod utils;

pub use error::{OnvifError, Result};
pub use server::OnvifServer;
