use std::panic::Location;
use std::sync::atomic::{AtomicU64, Ordering};

use log::{log, Level};
use parking_lot::RwLock;

use super::pattern::{create_result_from_pattern, ErrorPattern, ErrorResult};
use crate::http::HttpResponse;
use crate::soap::SoapContext;
use crate::{OnvifError, Result};

const FAULT_OUTPUT_CAPACITY: usize = 1024;

/// Callback invoked for every logged fault with `(error_code, message)`.
pub type ErrorCallback = Box<dyn Fn(i32, &str) + Send + Sync>;

/// Marker returned once a fault body has been written into the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    FaultGenerated,
}

/// Per-request description of where a failure happened.
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub service_name: String,
    pub action_name: String,
    pub error_context: Option<String>,
    pub log_level: Level,
    pub file: &'static str,
    pub line: u32,
}

impl ErrorContext {
    #[track_caller]
    pub fn new(service_name: &str, action_name: &str) -> Self {
        let location = Location::caller();
        Self {
            service_name: service_name.to_string(),
            action_name: action_name.to_string(),
            error_context: None,
            log_level: Level::Error,
            file: location.file(),
            line: location.line(),
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.error_context = Some(context.into());
        self
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.log_level = level;
        self
    }
}

/// One-line summary of a fault, used for logs and alert callbacks.
pub fn create_summary(context: &ErrorContext, result: &ErrorResult) -> String {
    let pattern = ErrorPattern::try_from(result.error_code)
        .map(|p| p.name())
        .unwrap_or("Unknown");
    let mut summary = format!(
        "[{}::{}] {} (Code: {} ({}), SOAP: {})",
        non_empty(&context.service_name),
        non_empty(&context.action_name),
        result.error_message,
        result.error_code,
        pattern,
        result.soap_fault_code
    );
    if let Some(extra) = context.error_context.as_deref() {
        summary.push_str(&format!(" [Context: {}]", extra));
    }
    summary
}

fn non_empty(s: &str) -> &str {
    if s.is_empty() {
        "Unknown"
    } else {
        s
    }
}

/// Turns failures into SOAP 1.2 faults and keeps per-pattern counters.
pub struct FaultTranslator {
    counts: [AtomicU64; 8],
    callback: RwLock<Option<ErrorCallback>>,
}

impl Default for FaultTranslator {
    fn default() -> Self {
        Self::new()
    }
}

impl FaultTranslator {
    pub fn new() -> Self {
        Self {
            counts: Default::default(),
            callback: RwLock::new(None),
        }
    }

    /// Installs the alert callback, replacing any previous one.
    pub fn set_callback<F>(&self, callback: F)
    where
        F: Fn(i32, &str) + Send + Sync + 'static,
    {
        *self.callback.write() = Some(Box::new(callback));
    }

    pub fn clear_callback(&self) {
        *self.callback.write() = None;
    }

    pub fn count(&self, pattern: ErrorPattern) -> u64 {
        self.counts[pattern.code() as usize].load(Ordering::Relaxed)
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().map(|c| c.load(Ordering::Relaxed)).sum()
    }

    pub fn reset_stats(&self) {
        for count in &self.counts {
            count.store(0, Ordering::Relaxed);
        }
    }

    /// Records and logs a result without rendering anything.
    pub fn log_result(&self, context: &ErrorContext, result: &ErrorResult) {
        if let Ok(pattern) = ErrorPattern::try_from(result.error_code) {
            self.counts[pattern.code() as usize].fetch_add(1, Ordering::Relaxed);
        }

        let summary = create_summary(context, result);
        log!(
            context.log_level,
            "{} at {}:{}",
            summary,
            context.file,
            context.line
        );

        if let Some(callback) = self.callback.read().as_ref() {
            callback(result.error_code, &result.error_message);
        }
    }

    /// Writes a SOAP fault for `pattern` into `response`.
    ///
    /// The response always ends up as HTTP 200 with a SOAP content type.
    pub fn handle_pattern(
        &self,
        context: &ErrorContext,
        pattern: ErrorPattern,
        custom_message: Option<&str>,
        response: &mut HttpResponse,
    ) -> Result<Outcome> {
        let mut codec = SoapContext::new();
        codec.init(FAULT_OUTPUT_CAPACITY)?;
        self.handle_pattern_in(&mut codec, context, pattern, custom_message, response)
    }

    /// Same as [`handle_pattern`](Self::handle_pattern) but renders with a
    /// caller's codec, which is left holding the fault and its reason.
    pub fn handle_pattern_in(
        &self,
        codec: &mut SoapContext,
        context: &ErrorContext,
        pattern: ErrorPattern,
        custom_message: Option<&str>,
        response: &mut HttpResponse,
    ) -> Result<Outcome> {
        let result = create_result_from_pattern(pattern, custom_message)?;
        self.log_result(context, &result);

        let body = codec.generate_fault_response(
            result.soap_fault_code,
            &result.soap_fault_string,
            context.error_context.as_deref(),
        )?;
        *response = HttpResponse::soap(body);
        Ok(Outcome::FaultGenerated)
    }

    pub fn handle_system(
        &self,
        context: &ErrorContext,
        error: &OnvifError,
        operation: Option<&str>,
        response: &mut HttpResponse,
    ) -> Result<Outcome> {
        let description = match error {
            OnvifError::NotFound(_) => "Resource not found",
            OnvifError::NotSupported(_) | OnvifError::UnsupportedAction(_) => {
                "Operation not supported"
            }
            OnvifError::AlreadyExists(_) => "Resource already exists",
            OnvifError::InvalidInput(_) => "Invalid parameter",
            OnvifError::AllocationFailure(_) => "Memory allocation failed",
            _ => "Internal error",
        };
        let message = match operation {
            Some(op) => format!("{} during {}", description, op),
            None => description.to_string(),
        };
        self.handle_pattern(context, error.pattern(), Some(&message), response)
    }

    /// Funnels any crate error into a fault, keeping its own message.
    pub fn handle_error(
        &self,
        context: &ErrorContext,
        error: &OnvifError,
        response: &mut HttpResponse,
    ) -> Result<Outcome> {
        if error.pattern() == ErrorPattern::InternalError {
            log!(context.log_level, "{}::{}: {}", context.service_name, context.action_name, error);
            return self.handle_system(context, error, Some(&context.action_name), response);
        }
        let message = error.to_string();
        self.handle_pattern(context, error.pattern(), Some(&message), response)
    }
}
