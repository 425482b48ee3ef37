//! Provider façade
//!
//! [`NetconfServiceProvider`] owns one session, the schema loaded for it and
//! the encoding selected for it. Everything is fixed at construction; after
//! that the provider only forwards requests to the dispatcher.

use log::{info, warn};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::capabilities::Capabilities;
use crate::dispatcher::Dispatcher;
use crate::encoding::{EncodingFormat, select_encoding};
use crate::error::{NetconfError, Result};
use crate::operation::OperationRequest;
use crate::schema::{Repository, SchemaRoot};
use crate::session::{ConnectionTarget, Connector, Session, SessionGuard};

/// Protocol adapter bound to one NETCONF session
///
/// `invoke` may be called from several threads; requests are serialized on
/// the session.
pub struct NetconfServiceProvider {
    schema: Arc<SchemaRoot>,
    capabilities: Arc<Capabilities>,
    encoding: EncodingFormat,
    dispatcher: Dispatcher,
}

impl NetconfServiceProvider {
    pub fn builder() -> ProviderBuilder {
        ProviderBuilder::default()
    }

    /// Adopt an established session with default options
    pub fn with_session(session: Box<dyn Session>, repository: Repository) -> Result<Self> {
        Self::builder()
            .session(session)
            .repository(repository)
            .build()
    }

    /// Execute one operation and return its result tree
    pub fn invoke(&self, request: &OperationRequest) -> Result<Value> {
        self.dispatcher.dispatch(request)
    }

    pub fn get_root_schema(&self) -> &SchemaRoot {
        &self.schema
    }

    /// Shared handle to the root schema
    pub fn root_schema(&self) -> Arc<SchemaRoot> {
        Arc::clone(&self.schema)
    }

    pub fn get_encoding(&self) -> EncodingFormat {
        self.encoding
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// Close the session, reporting any error from the transport
    ///
    /// Dropping the provider also closes the session, but only logs errors.
    pub fn close(self) -> Result<()> {
        self.dispatcher.close()
    }
}

impl fmt::Debug for NetconfServiceProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetconfServiceProvider")
            .field("encoding", &self.encoding)
            .field("capabilities", &self.capabilities.len())
            .field("modules", &self.schema.modules().count())
            .finish()
    }
}

/// Construction options for [`NetconfServiceProvider`]
#[derive(Default)]
pub struct ProviderBuilder {
    session: Option<Box<dyn Session>>,
    target: Option<ConnectionTarget>,
    connector: Option<Box<dyn Connector>>,
    repository: Option<Repository>,
    encoding: Option<EncodingFormat>,
    commit_candidate: Option<bool>,
}

impl ProviderBuilder {
    /// Use an already established session
    pub fn session(mut self, session: Box<dyn Session>) -> Self {
        self.session = Some(session);
        self
    }

    /// Connect to `target` with the configured connector
    pub fn target(mut self, target: ConnectionTarget) -> Self {
        self.target = Some(target);
        self
    }

    pub fn connector(mut self, connector: impl Connector + 'static) -> Self {
        self.connector = Some(Box::new(connector));
        self
    }

    pub fn repository(mut self, repository: Repository) -> Self {
        self.repository = Some(repository);
        self
    }

    /// Preferred encoding; used only if the peer supports it
    pub fn encoding(mut self, encoding: EncodingFormat) -> Self {
        self.encoding = Some(encoding);
        self
    }

    /// Commit after edits on an implicitly chosen candidate (default true)
    pub fn commit_candidate(mut self, commit: bool) -> Self {
        self.commit_candidate = Some(commit);
        self
    }

    pub fn build(self) -> Result<NetconfServiceProvider> {
        let session = match (self.session, self.target) {
            (Some(session), _) => session,
            (None, Some(target)) => {
                let connector = self.connector.ok_or_else(|| {
                    NetconfError::Initialization(format!("no connector for {}", target))
                })?;
                if !connector.supports(target.transport) {
                    return Err(NetconfError::Initialization(format!(
                        "connector does not support {} transport",
                        target.transport
                    )));
                }
                let session = connector.connect(&target).map_err(|e| {
                    NetconfError::Initialization(format!("cannot connect to {}: {}", target, e))
                })?;
                info!("connected to {}", target);
                session
            }
            (None, None) => {
                return Err(NetconfError::Initialization(
                    "neither a session nor a connection target was given".to_string(),
                ));
            }
        };
        // From here on the guard closes the session on every early return
        let guard = SessionGuard::new(session);

        let capabilities = Arc::new(Capabilities::new(guard.capabilities()));
        if !capabilities.has_base() {
            warn!("peer advertises no NETCONF base capability");
        }

        let repository = self.repository.unwrap_or_default();
        let schema = Arc::new(
            repository
                .root_schema(&capabilities)
                .map_err(|e| NetconfError::Initialization(format!("cannot load schema: {}", e)))?,
        );

        let encoding = select_encoding(self.encoding, &capabilities);
        info!(
            "session ready: {} capabilities, {} modules, {} encoding",
            capabilities.len(),
            schema.modules().count(),
            encoding
        );

        let dispatcher = Dispatcher::new(
            Arc::clone(&schema),
            Arc::clone(&capabilities),
            encoding,
            guard,
            self.commit_candidate.unwrap_or(true),
        );
        Ok(NetconfServiceProvider {
            schema,
            capabilities,
            encoding,
            dispatcher,
        })
    }
}

impl fmt::Debug for ProviderBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderBuilder")
            .field("session", &self.session.is_some())
            .field("target", &self.target)
            .field("connector", &self.connector.is_some())
            .field("encoding", &self.encoding)
            .field("commit_candidate", &self.commit_candidate)
            .finish()
    }
}
