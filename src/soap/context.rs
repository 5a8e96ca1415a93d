use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, warn};
use parking_lot::Mutex;

use super::envelope::{write_fault, write_response};
use super::parse::SoapRequest;
use crate::fault::SoapFaultCode;
use crate::{OnvifError, Result};

/// Default size reserved for rendered responses.
pub const DEFAULT_OUTPUT_CAPACITY: usize = 8192;

/// Parse/generate state of the XML codec for one request at a time.
#[derive(Debug, Default)]
pub struct SoapContext {
    initialized: bool,
    output: String,
    last_error: Option<String>,
}

impl SoapContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves the output buffer. Calling it again on a live context is a no-op.
    pub fn init(&mut self, capacity: usize) -> Result<()> {
        if self.initialized {
            return Ok(());
        }
        self.output
            .try_reserve(capacity)
            .map_err(|e| OnvifError::AllocationFailure(format!("codec buffer: {}", e)))?;
        self.initialized = true;
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Clears per-request state, keeping the allocated buffer.
    pub fn reset(&mut self) {
        self.output.clear();
        self.last_error = None;
    }

    pub fn cleanup(&mut self) {
        if !self.initialized {
            return;
        }
        self.output = String::new();
        self.last_error = None;
        self.initialized = false;
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn set_error(&mut self, message: impl Into<String>) {
        self.last_error = Some(message.into());
    }

    /// The most recently generated document.
    pub fn output(&self) -> &str {
        &self.output
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.initialized {
            Ok(())
        } else {
            Err(OnvifError::Codec("codec context not initialized".into()))
        }
    }

    pub fn parse_request(&mut self, body: &str) -> Result<SoapRequest> {
        self.ensure_initialized()?;
        SoapRequest::parse(body).map_err(|e| {
            self.last_error = Some(e.to_string());
            e
        })
    }

    pub fn generate_response(
        &mut self,
        prefix: &str,
        namespace: &str,
        action: &str,
        inner: &str,
    ) -> Result<String> {
        self.ensure_initialized()?;
        self.output.clear();
        write_response(&mut self.output, prefix, namespace, action, inner);
        Ok(self.output.clone())
    }

    pub fn generate_fault_response(
        &mut self,
        code: SoapFaultCode,
        reason: &str,
        detail: Option<&str>,
    ) -> Result<String> {
        self.ensure_initialized()?;
        self.output.clear();
        write_fault(&mut self.output, code, reason, detail);
        self.last_error = Some(reason.to_string());
        Ok(self.output.clone())
    }
}

/// Set of initialized contexts handed out one per in-flight request.
#[derive(Debug)]
pub struct ContextPool {
    idle: Mutex<Vec<SoapContext>>,
    capacity: usize,
    max_idle: usize,
    closed: AtomicBool,
}

impl ContextPool {
    /// Creates the pool with one ready context so allocation problems show up at init.
    pub fn new(capacity: usize, max_idle: usize) -> Result<Self> {
        let mut first = SoapContext::new();
        first.init(capacity)?;
        Ok(Self {
            idle: Mutex::new(vec![first]),
            capacity,
            max_idle: max_idle.max(1),
            closed: AtomicBool::new(false),
        })
    }

    /// Hands out a reset context; it returns to the pool when dropped.
    pub fn acquire(&self) -> Result<PooledContext<'_>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(OnvifError::Internal("codec context pool is closed".into()));
        }
        let pooled = self.idle.lock().pop();
        let mut ctx = match pooled {
            Some(ctx) => ctx,
            None => {
                debug!("allocating additional codec context");
                let mut ctx = SoapContext::new();
                ctx.init(self.capacity)?;
                ctx
            }
        };
        ctx.reset();
        Ok(PooledContext { pool: self, ctx })
    }

    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Tears down all idle contexts; later acquisitions fail. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        for mut ctx in self.idle.lock().drain(..) {
            ctx.cleanup();
        }
    }

    fn release(&self, mut ctx: SoapContext) {
        if self.closed.load(Ordering::Acquire) {
            ctx.cleanup();
            return;
        }
        let mut idle = self.idle.lock();
        if idle.len() < self.max_idle {
            idle.push(ctx);
        } else {
            warn!("codec context pool full, dropping context");
            ctx.cleanup();
        }
    }
}

pub struct PooledContext<'a> {
    pool: &'a ContextPool,
    ctx: SoapContext,
}

impl Deref for PooledContext<'_> {
    type Target = SoapContext;

    fn deref(&self) -> &SoapContext {
        &self.ctx
    }
}

impl DerefMut for PooledContext<'_> {
    fn deref_mut(&mut self) -> &mut SoapContext {
        &mut self.ctx
    }
}

impl Drop for PooledContext<'_> {
    fn drop(&mut self) {
        let ctx = std::mem::take(&mut self.ctx);
        self.pool.release(ctx);
    }
}
