use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use objwire_invoke::ServiceCatalog;
use objwire_proxy::{IdentityRegistry, Transport, TransportError};
use objwire_types::{Categorized, InvocationEnvelope, InvocationResponse, ObjectIdentity};
use tracing::{debug, warn};

use crate::config::SessionConfig;
use crate::error::{SessionError, SessionResult};
use crate::session::Session;

/// Progress of a dispatched call, raced between the worker running the
/// method body and the deadline. Whichever side leaves `RUNNING` first wins.
const RUNNING: u8 = 0;
const COMMITTING: u8 = 1;
const ABANDONED: u8 = 2;

/// Serves inbound calls: one fresh session per call.
///
/// The target is loaded, the method body runs under the call's deadline,
/// and the session commits only when the body succeeded in time. A call
/// that fails or times out leaves the stored state untouched.
pub struct InvocationHandler {
    catalog: Arc<ServiceCatalog>,
    identities: Arc<IdentityRegistry>,
    config: Arc<SessionConfig>,
}

impl InvocationHandler {
    pub fn new(
        catalog: Arc<ServiceCatalog>,
        identities: Arc<IdentityRegistry>,
        config: Arc<SessionConfig>,
    ) -> Self {
        Self {
            catalog,
            identities,
            config,
        }
    }

    /// Handle one call. Every failure becomes a structured response.
    pub async fn handle(&self, target: &ObjectIdentity, envelope: InvocationEnvelope) -> InvocationResponse {
        match self.try_handle(target, envelope).await {
            Ok(payload) => InvocationResponse::ok(payload),
            Err(err) => {
                debug!(
                    class_id = %target.class_id,
                    object_id = target.object_id,
                    category = %err.category(),
                    error = %err,
                    "inbound call failed"
                );
                InvocationResponse::failure(&err.report())
            }
        }
    }

    pub async fn try_handle(
        &self,
        target: &ObjectIdentity,
        envelope: InvocationEnvelope,
    ) -> SessionResult<Vec<u8>> {
        let caller = self.catalog.caller(&target.class_id, &envelope.method_id)?.clone();
        let timeout = caller
            .signature()
            .timeout
            .unwrap_or(self.config.default_call_timeout);
        let method = envelope.method_id.clone();
        let state = Arc::new(AtomicU8::new(RUNNING));

        let mut session = Session::new(
            target.partition_id,
            Arc::clone(&self.catalog),
            Arc::clone(&self.identities),
            Arc::clone(&self.config),
        );
        let target = target.clone();
        let worker_state = Arc::clone(&state);
        let mut work = tokio::task::spawn_blocking(move || -> SessionResult<Vec<u8>> {
            let object = session.load_object(&target.class_id, &target)?;
            let payload = caller.try_invoke(object, &envelope)?;
            if worker_state
                .compare_exchange(RUNNING, COMMITTING, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return Err(SessionError::Timeout {
                    method: envelope.method_id,
                    timeout,
                });
            }
            session.commit().into_result()?;
            Ok(payload)
        });

        let joined = match tokio::time::timeout(timeout, &mut work).await {
            Ok(joined) => joined,
            Err(_) => {
                if state
                    .compare_exchange(RUNNING, ABANDONED, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    warn!(method = %method, timeout_ms = timeout.as_millis() as u64, "call timed out");
                    return Err(SessionError::Timeout { method, timeout });
                }
                // The worker reached its commit first; its result stands.
                debug!(method = %method, "deadline passed during commit");
                work.await
            }
        };
        joined.map_err(|join| SessionError::Join(join.to_string()))?
    }

    pub fn default_timeout(&self) -> Duration {
        self.config.default_call_timeout
    }
}

impl std::fmt::Debug for InvocationHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvocationHandler")
            .field("services", &self.catalog.len())
            .finish()
    }
}

/// Routes proxy calls into an in-process [`InvocationHandler`].
///
/// Built before the handler it serves (the handler's identity registry
/// holds this transport), then bound once the handler exists.
#[derive(Debug, Default)]
pub struct LoopbackTransport {
    handler: OnceLock<Weak<InvocationHandler>>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind the handler. Returns `false` if one was already bound.
    pub fn bind(&self, handler: &Arc<InvocationHandler>) -> bool {
        self.handler.set(Arc::downgrade(handler)).is_ok()
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn invoke(
        &self,
        target: &ObjectIdentity,
        envelope: InvocationEnvelope,
    ) -> Result<InvocationResponse, TransportError> {
        let handler = self
            .handler
            .get()
            .and_then(Weak::upgrade)
            .ok_or(TransportError::Closed)?;
        Ok(handler.handle(target, envelope).await)
    }
}
