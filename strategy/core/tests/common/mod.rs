//! Shared fixtures for strategy-core integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use strategy_core::{AdapterError, AdapterRequest, ModelAdapter, ModelDescriptor, RawResponse};

static TRACING: Once = Once::new();

/// Install a test subscriber once per binary. `RUST_LOG` controls verbosity.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// What a [`MockAdapter`] does when called
#[derive(Clone, Debug)]
pub enum Behavior {
    /// Answer with `"{id}: {prompt}"`
    Echo,
    /// Fail with the given error
    Fail(AdapterError),
    /// Sleep, then echo
    Slow(Duration),
    /// Panic inside the call
    Panic,
}

/// Configurable in-process adapter
pub struct MockAdapter {
    descriptor: ModelDescriptor,
    behavior: Mutex<Behavior>,
    available: AtomicBool,
    calls: AtomicUsize,
}

impl MockAdapter {
    pub fn new(descriptor: ModelDescriptor, behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            descriptor,
            behavior: Mutex::new(behavior),
            available: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn echo(id: &str) -> Arc<Self> {
        Self::new(ModelDescriptor::new(id, id), Behavior::Echo)
    }

    pub fn failing(id: &str) -> Arc<Self> {
        Self::new(
            ModelDescriptor::new(id, id),
            Behavior::Fail(AdapterError::RequestFailed("backend error".into())),
        )
    }

    pub fn descriptor(&self) -> ModelDescriptor {
        self.descriptor.clone()
    }

    pub fn set_behavior(&self, behavior: Behavior) {
        *self.behavior.lock() = behavior;
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelAdapter for MockAdapter {
    fn capabilities(&self) -> ModelDescriptor {
        self.descriptor.clone()
    }

    async fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn call(&self, request: &AdapterRequest) -> Result<RawResponse, AdapterError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let behavior = self.behavior.lock().clone();
        match behavior {
            Behavior::Echo => {}
            Behavior::Fail(err) => return Err(err),
            Behavior::Slow(delay) => tokio::time::sleep(delay).await,
            Behavior::Panic => panic!("adapter {} exploded", self.descriptor.id),
        }
        Ok(RawResponse::text(format!(
            "{}: {}",
            self.descriptor.id, request.prompt
        )))
    }
}
