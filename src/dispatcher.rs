//! Operation dispatcher
//!
//! Turns an [`OperationRequest`] into one or more NETCONF exchanges. Every
//! check that can be made locally runs before the session lock is taken;
//! the lock is then held for the whole exchange so replies always pair with
//! their requests.

use log::{debug, trace, warn};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::capabilities::{BASE_1_1, CANDIDATE, Capabilities, STARTUP};
use crate::codec;
use crate::encoding::EncodingFormat;
use crate::envelope::{Envelope, Expect, MessageBuilder};
use crate::error::{NetconfError, ProtocolFailure, Result};
use crate::operation::{Datastore, EditOperation, OperationKind, OperationRequest};
use crate::schema::{OPERATION_ANNOTATION, RpcSchema, SchemaRoot, TreeMode, operation_metadata};
use crate::session::SessionGuard;

/// Executes requests over one session
#[derive(Debug)]
pub(crate) struct Dispatcher {
    schema: Arc<SchemaRoot>,
    capabilities: Arc<Capabilities>,
    encoding: EncodingFormat,
    session: Mutex<SessionGuard>,
    next_id: AtomicU64,
    commit_candidate: bool,
}

impl Dispatcher {
    pub(crate) fn new(
        schema: Arc<SchemaRoot>,
        capabilities: Arc<Capabilities>,
        encoding: EncodingFormat,
        session: SessionGuard,
        commit_candidate: bool,
    ) -> Self {
        Self {
            schema,
            capabilities,
            encoding,
            session: Mutex::new(session),
            next_id: AtomicU64::new(1),
            commit_candidate,
        }
    }

    /// Run one request and return its result tree
    pub(crate) fn dispatch(&self, request: &OperationRequest) -> Result<Value> {
        let kind = self.schema.classify(request.name())?;
        let rpc = self.schema.rpc(request.name()).ok_or_else(|| {
            NetconfError::Validation(format!("operation '{}' is not defined", request.name()))
        })?;
        debug!("dispatching {} as {}", rpc.name, kind);

        let result = match kind {
            OperationKind::Read => self.handle_read(rpc, request),
            OperationKind::Edit => self.handle_edit(rpc, request),
            OperationKind::GenericRpc => self.handle_rpc(rpc, request),
        };
        result.map_err(|e| e.in_operation(&rpc.name, kind))
    }

    /// Close the session; later requests fail with a session error
    pub(crate) fn close(&self) -> Result<()> {
        self.lock_session()?.close()?;
        Ok(())
    }

    fn handle_read(&self, rpc: &RpcSchema, request: &OperationRequest) -> Result<Value> {
        let datastore = request
            .datastore()
            .or(rpc.datastore)
            .unwrap_or(Datastore::Operational);
        self.check_readable(datastore)?;

        let filter = request.payload().filter(|p| !is_empty_tree(p));
        if let Some(filter) = filter {
            self.schema.validate_tree(filter, TreeMode::Filter)?;
        }

        let envelope = if datastore.is_config() {
            Envelope::GetConfig {
                source: datastore,
                filter,
            }
        } else {
            Envelope::Get { filter }
        };
        debug!("reading {} datastore", datastore);

        let mut session = self.lock_session()?;
        self.exchange(&mut session, &envelope, Expect::Data)
    }

    fn handle_edit(&self, rpc: &RpcSchema, request: &OperationRequest) -> Result<Value> {
        let operation = request
            .annotation()
            .or(rpc.default_operation)
            .ok_or_else(|| {
                NetconfError::Validation(
                    "edit carries no annotation and the operation has no default".to_string(),
                )
            })?;
        let payload = request
            .payload()
            .filter(|p| !is_empty_tree(p))
            .ok_or_else(|| NetconfError::Validation("edit requires a payload".to_string()))?;
        self.schema.validate_tree(payload, TreeMode::Config)?;

        let removes = operation == EditOperation::Remove
            || carries_operation(payload, EditOperation::Remove);
        if removes && !self.capabilities.contains(BASE_1_1) {
            return Err(NetconfError::Validation(
                "'remove' requires :base:1.1, which the peer does not advertise".to_string(),
            ));
        }

        let (target, implicit) = self.edit_target(request.datastore())?;
        let (config, default_operation) = match operation {
            EditOperation::None => (payload.clone(), Some(EditOperation::None)),
            op => (annotate(payload, op), None),
        };
        let commit = implicit && target == Datastore::Candidate && self.commit_candidate;
        debug!(
            "editing {} with '{}'{}",
            target,
            operation,
            if commit { ", then commit" } else { "" }
        );

        let edit = Envelope::EditConfig {
            target,
            default_operation,
            config: &config,
        };

        let mut session = self.lock_session()?;
        let result = self.exchange(&mut session, &edit, Expect::Ok)?;
        if commit && let Err(e) = self.exchange(&mut session, &Envelope::Commit, Expect::Ok) {
            if matches!(
                e,
                NetconfError::Protocol {
                    failure: ProtocolFailure::Rejected(_),
                    ..
                }
            ) {
                self.discard_changes(&mut session);
            }
            return Err(e);
        }
        Ok(result)
    }

    fn handle_rpc(&self, rpc: &RpcSchema, request: &OperationRequest) -> Result<Value> {
        let input = request.payload().filter(|p| !is_empty_tree(p));
        if let Some(input) = input {
            codec::validate_rpc_input(rpc, input)?;
        }

        let envelope = Envelope::Rpc { rpc, input };
        let mut session = self.lock_session()?;
        self.exchange(&mut session, &envelope, Expect::Output(rpc))
    }

    fn check_readable(&self, datastore: Datastore) -> Result<()> {
        let required = match datastore {
            Datastore::Candidate => CANDIDATE,
            Datastore::Startup => STARTUP,
            Datastore::Running | Datastore::Operational => return Ok(()),
        };
        if self.capabilities.contains(required) {
            Ok(())
        } else {
            Err(NetconfError::Validation(format!(
                "peer has no {} datastore",
                datastore
            )))
        }
    }

    /// Target datastore of an edit, and whether it was chosen implicitly
    fn edit_target(&self, requested: Option<Datastore>) -> Result<(Datastore, bool)> {
        match requested {
            Some(datastore) if !datastore.is_config() => Err(NetconfError::Validation(
                format!("the {} datastore cannot be edited", datastore),
            )),
            Some(datastore) => {
                self.check_readable(datastore)?;
                Ok((datastore, false))
            }
            None if self.capabilities.contains(CANDIDATE) => Ok((Datastore::Candidate, true)),
            None => Ok((Datastore::Running, true)),
        }
    }

    fn lock_session(&self) -> Result<MutexGuard<'_, SessionGuard>> {
        self.session
            .lock()
            .map_err(|_| NetconfError::Session("session lock poisoned".to_string()))
    }

    /// One request/reply round trip; the caller holds the session lock
    fn exchange(
        &self,
        session: &mut SessionGuard,
        envelope: &Envelope<'_>,
        expect: Expect<'_>,
    ) -> Result<Value> {
        let builder = MessageBuilder::new(&self.schema, self.encoding);
        let message_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = builder.build(message_id, envelope)?;
        trace!("-> [{}] {}", message_id, request);

        let reply = session.send(&request)?;
        trace!("<- [{}] {}", message_id, reply);
        builder.parse_reply(&reply, message_id, expect)
    }

    fn discard_changes(&self, session: &mut SessionGuard) {
        let Some(rpc) = self.schema.rpc("ietf-netconf:discard-changes") else {
            return;
        };
        let envelope = Envelope::Rpc { rpc, input: None };
        match self.exchange(session, &envelope, Expect::Ok) {
            Ok(_) => debug!("discarded uncommitted candidate changes"),
            Err(e) => warn!("cannot discard candidate changes: {}", e),
        }
    }
}

fn is_empty_tree(value: &Value) -> bool {
    value.as_object().is_some_and(Map::is_empty)
}

/// Whether any node of `tree` is annotated with `op`
fn carries_operation(tree: &Value, op: EditOperation) -> bool {
    match tree {
        Value::Object(members) => members.iter().any(|(key, value)| {
            if key.starts_with('@') {
                value.get(OPERATION_ANNOTATION).and_then(Value::as_str) == Some(op.as_str())
            } else {
                carries_operation(value, op)
            }
        }),
        Value::Array(items) => items.iter().any(|item| carries_operation(item, op)),
        _ => false,
    }
}

/// Attach `op` to every top-level node of `payload`
///
/// Nodes already carrying their own annotation keep it.
fn annotate(payload: &Value, op: EditOperation) -> Value {
    let mut tree = payload.clone();
    let Value::Object(members) = &mut tree else {
        return tree;
    };

    let keys: Vec<String> = members
        .keys()
        .filter(|k| !k.starts_with('@'))
        .cloned()
        .collect();
    for key in keys {
        match members.get_mut(&key) {
            Some(Value::Object(node)) => {
                node.entry("@")
                    .or_insert_with(|| operation_metadata(op.as_str()));
                continue;
            }
            Some(Value::Array(entries)) if entries.first().is_some_and(Value::is_object) => {
                for entry in entries.iter_mut() {
                    if let Value::Object(node) = entry {
                        node.entry("@")
                            .or_insert_with(|| operation_metadata(op.as_str()));
                    }
                }
                continue;
            }
            _ => {}
        }
        members
            .entry(format!("@{}", key))
            .or_insert_with(|| operation_metadata(op.as_str()));
    }
    tree
}
