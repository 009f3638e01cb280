use std::sync::Arc;

use objwire_invoke::{ServiceCatalog, ServiceDefinition};
use objwire_proxy::{IdentityLike, IdentityRegistry, ReferenceProxy, Transport};
use objwire_session::{
    CommitReport, InvocationHandler, LoopbackTransport, Session, SessionConfig, SessionHandle,
    SessionManager, SessionResult,
};
use objwire_store::{InMemoryStateStore, StateStore};
use objwire_types::{InvocationEnvelope, InvocationResponse, ObjectIdentity};
use tracing::info;

use crate::error::{SdkError, SdkResult};

/// Assembles an [`ObjWire`].
///
/// Without an explicit store the objects live in an
/// [`InMemoryStateStore`]; without an explicit transport, proxies call
/// back into this instance's own [`InvocationHandler`].
#[derive(Default)]
pub struct ObjWireBuilder {
    config: SessionConfig,
    store: Option<Arc<dyn StateStore>>,
    transport: Option<Arc<dyn Transport>>,
    services: Vec<ServiceDefinition>,
}

impl ObjWireBuilder {
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn service(mut self, service: ServiceDefinition) -> Self {
        self.services.push(service);
        self
    }

    pub fn build(self) -> SdkResult<ObjWire> {
        if self.services.is_empty() {
            return Err(SdkError::NoServices);
        }
        self.config.validate()?;
        let config = Arc::new(self.config);
        let catalog = Arc::new(ServiceCatalog::new(self.services)?);
        let store: Arc<dyn StateStore> = match self.store {
            Some(store) => store,
            None => Arc::new(InMemoryStateStore::new()),
        };

        let (transport, loopback) = match self.transport {
            Some(transport) => (transport, None),
            None => {
                let loopback = Arc::new(LoopbackTransport::new());
                let transport: Arc<dyn Transport> = loopback.clone();
                (transport, Some(loopback))
            }
        };

        let identities = Arc::new(
            IdentityRegistry::new(Arc::clone(catalog.registry()), Arc::clone(&store), transport)
                .with_call_timeout(config.default_call_timeout),
        );
        let handler = Arc::new(InvocationHandler::new(
            Arc::clone(&catalog),
            Arc::clone(&identities),
            Arc::clone(&config),
        ));
        if let Some(loopback) = loopback {
            loopback.bind(&handler);
        }
        let manager = Arc::new(SessionManager::new(
            Arc::clone(&catalog),
            Arc::clone(&identities),
            Arc::clone(&config),
        ));

        info!(services = catalog.len(), "objwire ready");
        Ok(ObjWire {
            config,
            store,
            catalog,
            identities,
            handler,
            manager,
        })
    }
}

/// High-level objwire API: the one handle an application holds.
pub struct ObjWire {
    config: Arc<SessionConfig>,
    store: Arc<dyn StateStore>,
    catalog: Arc<ServiceCatalog>,
    identities: Arc<IdentityRegistry>,
    handler: Arc<InvocationHandler>,
    manager: Arc<SessionManager>,
}

impl ObjWire {
    pub fn builder() -> ObjWireBuilder {
        ObjWireBuilder::default()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    pub fn catalog(&self) -> &Arc<ServiceCatalog> {
        &self.catalog
    }

    pub fn identities(&self) -> &Arc<IdentityRegistry> {
        &self.identities
    }

    pub fn manager(&self) -> &Arc<SessionManager> {
        &self.manager
    }

    pub fn handler(&self) -> &Arc<InvocationHandler> {
        &self.handler
    }

    // ---- Sessions ----

    /// Start the auto-commit schedule when the configuration asks for it.
    /// Returns whether it is running.
    pub fn start_auto_commit(&self) -> SdkResult<bool> {
        if !self.config.auto_commit {
            return Ok(false);
        }
        self.manager.start_auto_commit()?;
        Ok(true)
    }

    /// The caller's session in the default partition.
    pub fn session(&self) -> SdkResult<SessionHandle> {
        Ok(self.manager.current()?)
    }

    pub fn session_for_partition(&self, partition_id: u32) -> SdkResult<SessionHandle> {
        Ok(self.manager.session_for_partition(partition_id)?)
    }

    /// Run `f` in the caller's default-partition session and commit.
    pub fn scope<R>(&self, f: impl FnOnce(&mut Session) -> SessionResult<R>) -> SdkResult<R> {
        Ok(self.manager.scope(self.config.default_partition, f)?)
    }

    pub fn commit_all(&self) -> CommitReport {
        self.manager.commit_all()
    }

    // ---- References ----

    /// A proxy for whatever `like` names, typed by the identity's class.
    pub fn proxy<'a>(&self, like: impl Into<IdentityLike<'a>>) -> SdkResult<ReferenceProxy> {
        Ok(self.identities.proxy(like)?)
    }

    /// A proxy for `like`, which must name an object of `class`.
    pub fn proxy_for<'a>(
        &self,
        like: impl Into<IdentityLike<'a>>,
        class: &str,
    ) -> SdkResult<ReferenceProxy> {
        let identity = self.identities.normalize_for(like, class)?;
        Ok(self.identities.materialize(&identity, class)?)
    }

    /// Serve one inbound call.
    pub async fn dispatch(&self, target: &ObjectIdentity, envelope: InvocationEnvelope) -> InvocationResponse {
        self.handler.handle(target, envelope).await
    }

    /// Stop auto-commit and commit every open session.
    pub async fn shutdown(&self) -> CommitReport {
        self.manager.shutdown().await
    }
}

impl std::fmt::Debug for ObjWire {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjWire")
            .field("services", &self.catalog.len())
            .field("sessions", &self.manager.session_count())
            .finish()
    }
}
