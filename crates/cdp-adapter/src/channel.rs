//! The injection seam: everything above this crate talks to documents through
//! [`InjectionChannel`].

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use fragment_codec::{Command, Fragment};
use pagebridge_core_types::{BridgeResult, DocumentHandle, Envelope};

use crate::metrics;

/// Executes fragments inside a document's own script context.
///
/// Implementations return the fragment's `data` on success and convert every
/// failure (detached document, thrown exception, malformed reply) into a
/// [`BridgeError`](pagebridge_core_types::BridgeError); nothing panics or
/// escapes across this boundary. Calls on the same handle are not serialized.
#[async_trait]
pub trait InjectionChannel: Send + Sync {
    async fn execute(&self, handle: DocumentHandle, fragment: &Fragment) -> BridgeResult<Value>;

    /// Compile `command` and execute it.
    async fn run(&self, handle: DocumentHandle, command: Command) -> BridgeResult<Value> {
        let fragment = Fragment::compile(command)?;
        self.execute(handle, &fragment).await
    }

    /// [`InjectionChannel::run`] in envelope form.
    async fn run_envelope(&self, handle: DocumentHandle, command: Command) -> Envelope {
        Envelope::from_result(self.run(handle, command).await)
    }
}

pub type SharedChannel = Arc<dyn InjectionChannel>;

#[async_trait]
impl<T> InjectionChannel for Arc<T>
where
    T: InjectionChannel + ?Sized,
{
    async fn execute(&self, handle: DocumentHandle, fragment: &Fragment) -> BridgeResult<Value> {
        (**self).execute(handle, fragment).await
    }
}

/// Wraps a channel with per-verb metrics and debug logging.
pub struct InstrumentedChannel<C> {
    inner: C,
}

impl<C> InstrumentedChannel<C> {
    pub fn new(inner: C) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }
}

#[async_trait]
impl<C> InjectionChannel for InstrumentedChannel<C>
where
    C: InjectionChannel,
{
    async fn execute(&self, handle: DocumentHandle, fragment: &Fragment) -> BridgeResult<Value> {
        let verb = fragment.verb();
        let start = Instant::now();
        metrics::record_fragment(verb.as_str());
        let result = self.inner.execute(handle, fragment).await;
        match &result {
            Ok(_) => metrics::record_fragment_success(verb.as_str(), start.elapsed()),
            Err(err) => {
                metrics::record_fragment_failure(verb.as_str());
                debug!(
                    target: "cdp-adapter",
                    %handle,
                    %verb,
                    kind = err.kind.as_str(),
                    error = %err.message,
                    "fragment failed"
                );
            }
        }
        result
    }
}
