//! Scripted adapter for unit tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::adapter::{AdapterError, AdapterRequest, ModelAdapter, ModelDescriptor, RawResponse};

/// Adapter whose availability, latency and failures are set by the test
pub struct ScriptedAdapter {
    descriptor: ModelDescriptor,
    available: AtomicBool,
    failure: Mutex<Option<AdapterError>>,
    call_delay: Mutex<Duration>,
    probe_delay: Mutex<Duration>,
    calls: AtomicUsize,
    probes: AtomicUsize,
}

impl ScriptedAdapter {
    pub fn new(id: &str) -> Arc<Self> {
        Self::with_descriptor(ModelDescriptor::new(id, id))
    }

    pub fn with_descriptor(descriptor: ModelDescriptor) -> Arc<Self> {
        Arc::new(Self {
            descriptor,
            available: AtomicBool::new(true),
            failure: Mutex::new(None),
            call_delay: Mutex::new(Duration::ZERO),
            probe_delay: Mutex::new(Duration::ZERO),
            calls: AtomicUsize::new(0),
            probes: AtomicUsize::new(0),
        })
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn set_failure(&self, failure: Option<AdapterError>) {
        *self.failure.lock() = failure;
    }

    pub fn set_call_delay(&self, delay: Duration) {
        *self.call_delay.lock() = delay;
    }

    pub fn set_probe_delay(&self, delay: Duration) {
        *self.probe_delay.lock() = delay;
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelAdapter for ScriptedAdapter {
    fn capabilities(&self) -> ModelDescriptor {
        self.descriptor.clone()
    }

    async fn is_available(&self) -> bool {
        self.probes.fetch_add(1, Ordering::SeqCst);
        let delay = *self.probe_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.available.load(Ordering::SeqCst)
    }

    async fn call(&self, request: &AdapterRequest) -> Result<RawResponse, AdapterError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.call_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.failure.lock().clone() {
            return Err(err);
        }
        Ok(RawResponse::text(format!("{}: {}", self.descriptor.id, request.prompt)))
    }
}
