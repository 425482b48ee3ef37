//! Loopback NETCONF peer
//!
//! [`LoopbackSession`] is an in-memory device implementing [`Session`]. It
//! parses request envelopes in either encoding, keeps running, candidate,
//! startup and operational trees, and answers the way a server would.
//!
//! # Example
//!
//! ```
//! use netconf_provider::{LoopbackSession, NetconfServiceProvider, OperationRequest, Repository};
//!
//! let device = LoopbackSession::from_repository(&Repository::new()).unwrap();
//! let handle = device.handle();
//! let provider = NetconfServiceProvider::with_session(Box::new(device), Repository::new()).unwrap();
//!
//! let tree = provider.invoke(&OperationRequest::new("get-config")).unwrap();
//! assert_eq!(tree, serde_json::json!({}));
//! assert_eq!(handle.requests().len(), 1);
//! ```

use log::{debug, info};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::capabilities::{
    BASE_1_0, BASE_1_1, CANDIDATE, Capabilities, ENCODING, STARTUP, VALIDATE, WRITABLE_RUNNING,
};
use crate::codec;
use crate::datastore::{Editor, select};
use crate::encoding::EncodingFormat;
use crate::envelope::{JSON_RPC, error_reply, json_reply, reply_open};
use crate::error::{NetconfError, Result, RpcError, SessionError};
use crate::operation::{Datastore, EditOperation};
use crate::schema::{
    CRUD_MODULE, NETCONF_MODULE, NETCONF_NAMESPACE, Repository, SchemaRoot, TreeMode,
};
use crate::session::Session;
use crate::xml::Element;

/// Server-side implementation of a custom RPC
pub trait RpcHandler: Send {
    fn call(&mut self, input: &Value) -> std::result::Result<Value, RpcError>;
}

impl<F> RpcHandler for F
where
    F: FnMut(&Value) -> std::result::Result<Value, RpcError> + Send,
{
    fn call(&mut self, input: &Value) -> std::result::Result<Value, RpcError> {
        self(input)
    }
}

#[derive(Debug)]
struct DeviceState {
    running: Value,
    candidate: Value,
    startup: Value,
    operational: Value,
    locks: Vec<Datastore>,
    requests: Vec<String>,
    closed: bool,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            running: Value::Object(Map::new()),
            candidate: Value::Object(Map::new()),
            startup: Value::Object(Map::new()),
            operational: Value::Object(Map::new()),
            locks: Vec::new(),
            requests: Vec::new(),
            closed: false,
        }
    }
}

fn lock(state: &Mutex<DeviceState>) -> MutexGuard<'_, DeviceState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Shared view of a loopback device's state
///
/// Stays usable after the session itself was handed to a provider.
#[derive(Clone)]
pub struct LoopbackHandle {
    state: Arc<Mutex<DeviceState>>,
}

impl LoopbackHandle {
    pub fn running(&self) -> Value {
        lock(&self.state).running.clone()
    }

    pub fn candidate(&self) -> Value {
        lock(&self.state).candidate.clone()
    }

    pub fn startup(&self) -> Value {
        lock(&self.state).startup.clone()
    }

    /// Every request document received, in order
    pub fn requests(&self) -> Vec<String> {
        lock(&self.state).requests.clone()
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }
}

impl fmt::Debug for LoopbackHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopbackHandle").finish_non_exhaustive()
    }
}

/// In-memory NETCONF device
pub struct LoopbackSession {
    schema: Arc<SchemaRoot>,
    capabilities: Capabilities,
    state: Arc<Mutex<DeviceState>>,
    handlers: HashMap<String, Box<dyn RpcHandler>>,
}

impl LoopbackSession {
    /// Device serving `schema`
    ///
    /// It announces base 1.0 and 1.1, candidate, validate, both encodings
    /// and one capability per loaded module.
    pub fn new(schema: SchemaRoot) -> Self {
        let mut uris = vec![
            BASE_1_0.to_string(),
            BASE_1_1.to_string(),
            CANDIDATE.to_string(),
            VALIDATE.to_string(),
            WRITABLE_RUNNING.to_string(),
            format!("{}?formats=xml,json", ENCODING),
        ];
        for module in schema.modules() {
            if module.name == NETCONF_MODULE || module.name == CRUD_MODULE {
                continue;
            }
            uris.push(module.capability_uri());
        }

        Self {
            schema: Arc::new(schema),
            capabilities: Capabilities::new(uris),
            state: Arc::new(Mutex::new(DeviceState::default())),
            handlers: HashMap::new(),
        }
    }

    /// Device serving every module of `repository`
    pub fn from_repository(repository: &Repository) -> Result<Self> {
        Ok(Self::new(repository.root_schema(&Capabilities::default())?))
    }

    /// Initial running configuration, also copied to candidate and startup
    pub fn with_running(self, tree: Value) -> Self {
        {
            let mut state = lock(&self.state);
            state.candidate = tree.clone();
            state.startup = tree.clone();
            state.running = tree;
        }
        self
    }

    /// State data returned by `<get>` on top of the running configuration
    pub fn with_operational(self, tree: Value) -> Self {
        lock(&self.state).operational = tree;
        self
    }

    /// Replace the announced capabilities
    pub fn with_capabilities<I, S>(mut self, uris: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = Capabilities::new(uris);
        self
    }

    pub fn with_capability(mut self, uri: impl Into<String>) -> Self {
        let uri = uri.into();
        self.capabilities = Capabilities::new(
            self.capabilities
                .iter()
                .map(String::from)
                .chain(std::iter::once(uri)),
        );
        self
    }

    /// Stop announcing `uri` (query parameters are ignored)
    pub fn without_capability(mut self, uri: &str) -> Self {
        self.capabilities = Capabilities::new(
            self.capabilities
                .iter()
                .filter(|c| c.split('?').next() != Some(uri))
                .map(String::from),
        );
        self
    }

    /// Serve the RPC `name` ("module:rpc") with `handler`
    pub fn with_rpc(mut self, name: impl Into<String>, handler: impl RpcHandler + 'static) -> Self {
        self.handlers.insert(name.into(), Box::new(handler));
        self
    }

    pub fn handle(&self) -> LoopbackHandle {
        LoopbackHandle {
            state: Arc::clone(&self.state),
        }
    }

    fn execute(
        &mut self,
        state: &mut DeviceState,
        request: Request,
    ) -> std::result::Result<Reply, RpcError> {
        let schema = &self.schema;
        match request {
            Request::Get { filter } => {
                let tree = Editor::for_state(schema).apply(
                    &state.running,
                    &state.operational,
                    EditOperation::Merge,
                )?;
                Ok(Reply::Data(filtered(schema, tree, filter)))
            }
            Request::GetConfig { source, filter } => {
                let tree = self.datastore(state, source)?.clone();
                Ok(Reply::Data(filtered(schema, tree, filter)))
            }
            Request::EditConfig {
                target,
                default_operation,
                config,
            } => {
                let current = self.datastore(state, target)?;
                let updated = Editor::new(schema).apply(current, &config, default_operation)?;
                *current = updated;
                debug!("loopback: edited {}", target);
                Ok(Reply::Ok)
            }
            Request::Commit => {
                self.require(CANDIDATE, "commit")?;
                schema
                    .validate_tree(&state.candidate, TreeMode::Config)
                    .map_err(|e| invalid_value(&e))?;
                state.running = state.candidate.clone();
                Ok(Reply::Ok)
            }
            Request::DiscardChanges => {
                self.require(CANDIDATE, "discard-changes")?;
                state.candidate = state.running.clone();
                Ok(Reply::Ok)
            }
            Request::Lock(target) => {
                self.datastore(state, target)?;
                if state.locks.contains(&target) {
                    return Err(RpcError::application(
                        "lock-denied",
                        format!("{} is already locked", target),
                    ));
                }
                state.locks.push(target);
                Ok(Reply::Ok)
            }
            Request::Unlock(target) => {
                let Some(i) = state.locks.iter().position(|l| *l == target) else {
                    return Err(RpcError::application(
                        "operation-failed",
                        format!("{} is not locked", target),
                    ));
                };
                state.locks.remove(i);
                Ok(Reply::Ok)
            }
            Request::Validate(source) => {
                let tree = self.datastore(state, source)?;
                schema
                    .validate_tree(tree, TreeMode::Config)
                    .map_err(|e| invalid_value(&e))?;
                Ok(Reply::Ok)
            }
            Request::CloseSession => {
                state.closed = true;
                Ok(Reply::Ok)
            }
            Request::Custom { name, input } => {
                let handler = self.handlers.get_mut(&name).ok_or_else(|| {
                    RpcError::application(
                        "operation-not-supported",
                        format!("{} is not supported", name),
                    )
                })?;
                let output = handler.call(&input)?;
                let module = name.split_once(':').map(|(m, _)| m).unwrap_or(NETCONF_MODULE);
                Ok(Reply::Output {
                    module: module.to_string(),
                    tree: output,
                })
            }
        }
    }

    fn require(&self, capability: &str, operation: &str) -> std::result::Result<(), RpcError> {
        if self.capabilities.contains(capability) {
            Ok(())
        } else {
            Err(RpcError::application(
                "operation-not-supported",
                format!("{} is not supported", operation),
            ))
        }
    }

    fn datastore<'s>(
        &self,
        state: &'s mut DeviceState,
        datastore: Datastore,
    ) -> std::result::Result<&'s mut Value, RpcError> {
        match datastore {
            Datastore::Running => Ok(&mut state.running),
            Datastore::Candidate => {
                self.require(CANDIDATE, "candidate")?;
                Ok(&mut state.candidate)
            }
            Datastore::Startup => {
                self.require(STARTUP, "startup")?;
                Ok(&mut state.startup)
            }
            Datastore::Operational => Err(RpcError::application(
                "invalid-value",
                "operational is not a configuration datastore",
            )),
        }
    }

    fn render(&self, format: EncodingFormat, message_id: &str, reply: Reply) -> String {
        match (format, reply) {
            (EncodingFormat::Xml, Reply::Ok) => {
                format!("{}<ok/></rpc-reply>", reply_open(message_id))
            }
            (EncodingFormat::Xml, Reply::Data(tree)) => {
                match codec::encode_data(&self.schema, &tree, EncodingFormat::Xml) {
                    Ok(data) => {
                        format!("{}<data>{}</data></rpc-reply>", reply_open(message_id), data)
                    }
                    Err(e) => error_reply(format, message_id, &[operation_failed(&e)]),
                }
            }
            (EncodingFormat::Xml, Reply::Output { module, tree }) => {
                let qualified: Map<String, Value> = tree
                    .as_object()
                    .into_iter()
                    .flatten()
                    .map(|(k, v)| (format!("{}:{}", module, k), v.clone()))
                    .collect();
                let mut out = reply_open(message_id);
                if qualified.is_empty() {
                    out.push_str("<ok/>");
                } else if let Err(e) =
                    codec::write_members(&self.schema, &Value::Object(qualified), None, &mut out)
                {
                    return error_reply(format, message_id, &[operation_failed(&e)]);
                }
                out.push_str("</rpc-reply>");
                out
            }
            (EncodingFormat::Json, Reply::Ok) => {
                json_reply(message_id, [("ok".to_string(), Value::Array(vec![Value::Null]))])
            }
            (EncodingFormat::Json, Reply::Data(tree)) => {
                json_reply(message_id, [("data".to_string(), tree)])
            }
            (EncodingFormat::Json, Reply::Output { tree, .. }) => match tree {
                Value::Object(members) if !members.is_empty() => json_reply(message_id, members),
                _ => json_reply(message_id, [("ok".to_string(), Value::Array(vec![Value::Null]))]),
            },
        }
    }
}

impl Session for LoopbackSession {
    fn send(&mut self, request: &str) -> std::result::Result<String, SessionError> {
        let shared = Arc::clone(&self.state);
        let mut state = lock(&shared);
        if state.closed {
            return Err(SessionError::Closed);
        }
        state.requests.push(request.to_string());

        let format = if request.trim_start().starts_with('<') {
            EncodingFormat::Xml
        } else {
            EncodingFormat::Json
        };
        let parsed = match format {
            EncodingFormat::Xml => parse_xml_request(&self.schema, request),
            EncodingFormat::Json => parse_json_request(&self.schema, request),
        };
        let (message_id, request) = match parsed {
            Ok(parsed) => parsed,
            Err((message_id, error)) => return Ok(error_reply(format, &message_id, &[error])),
        };

        let reply = match self.execute(&mut state, request) {
            Ok(reply) => self.render(format, &message_id, reply),
            Err(error) => error_reply(format, &message_id, &[error]),
        };
        Ok(reply)
    }

    fn capabilities(&self) -> Vec<String> {
        self.capabilities.iter().map(String::from).collect()
    }

    fn close(&mut self) -> std::result::Result<(), SessionError> {
        let mut state = lock(&self.state);
        if !state.closed {
            info!("loopback session closed");
            state.closed = true;
        }
        Ok(())
    }
}

impl fmt::Debug for LoopbackSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopbackSession")
            .field("capabilities", &self.capabilities)
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

/// A decoded request
#[derive(Debug)]
enum Request {
    Get {
        filter: Option<Value>,
    },
    GetConfig {
        source: Datastore,
        filter: Option<Value>,
    },
    EditConfig {
        target: Datastore,
        default_operation: EditOperation,
        config: Value,
    },
    Commit,
    DiscardChanges,
    Lock(Datastore),
    Unlock(Datastore),
    Validate(Datastore),
    CloseSession,
    Custom {
        name: String,
        input: Value,
    },
}

#[derive(Debug)]
enum Reply {
    Ok,
    Data(Value),
    Output { module: String, tree: Value },
}

type Parsed = std::result::Result<(String, Request), (String, RpcError)>;

fn parse_xml_request(schema: &SchemaRoot, text: &str) -> Parsed {
    let root = Element::parse(text).map_err(|e| (String::new(), malformed(e.to_string())))?;
    let message_id = root.attribute("message-id").unwrap_or_default().to_string();
    if root.name != "rpc" {
        return Err((message_id, malformed(format!("unexpected <{}>", root.name))));
    }
    let operation = root
        .children
        .first()
        .ok_or_else(|| (message_id.clone(), malformed("<rpc> is empty")))?;
    let request = xml_operation(schema, operation).map_err(|e| (message_id.clone(), e))?;
    Ok((message_id, request))
}

fn xml_operation(schema: &SchemaRoot, op: &Element) -> std::result::Result<Request, RpcError> {
    if op.namespace.as_deref() != Some(NETCONF_NAMESPACE) {
        let namespace = op.namespace.as_deref().unwrap_or_default();
        let module = schema.module_for_namespace(namespace).ok_or_else(|| {
            RpcError::application("unknown-namespace", format!("unknown namespace '{}'", namespace))
        })?;
        let name = format!("{}:{}", module, op.name);
        let input = codec::rpc_input_to_tree(schema.rpc(&name), &op.children)
            .map_err(|e| invalid_value(&e))?;
        return Ok(Request::Custom { name, input });
    }

    let filter = || -> std::result::Result<Option<Value>, RpcError> {
        op.child("filter")
            .map(|f| codec::elements_to_tree(schema, &f.children, TreeMode::Filter))
            .transpose()
            .map_err(|e| invalid_value(&e))
    };

    let request = match op.name.as_str() {
        "get" => Request::Get { filter: filter()? },
        "get-config" => Request::GetConfig {
            source: xml_datastore(op, "source")?,
            filter: filter()?,
        },
        "edit-config" => {
            let default_operation = match op.child("default-operation") {
                Some(e) => parse_operation(e.text.trim())?,
                None => EditOperation::Merge,
            };
            let config = op.child("config").ok_or_else(|| missing("config"))?;
            Request::EditConfig {
                target: xml_datastore(op, "target")?,
                default_operation,
                config: codec::elements_to_tree(schema, &config.children, TreeMode::Config)
                    .map_err(|e| invalid_value(&e))?,
            }
        }
        "commit" => Request::Commit,
        "discard-changes" => Request::DiscardChanges,
        "lock" => Request::Lock(xml_datastore(op, "target")?),
        "unlock" => Request::Unlock(xml_datastore(op, "target")?),
        "validate" => Request::Validate(xml_datastore(op, "source")?),
        "close-session" => Request::CloseSession,
        other => Request::Custom {
            name: format!("{}:{}", NETCONF_MODULE, other),
            input: codec::rpc_input_to_tree(None, &op.children).map_err(|e| invalid_value(&e))?,
        },
    };
    Ok(request)
}

fn xml_datastore(op: &Element, parameter: &str) -> std::result::Result<Datastore, RpcError> {
    let name = op
        .child(parameter)
        .and_then(|p| p.children.first())
        .map(|d| d.name.as_str())
        .ok_or_else(|| missing(parameter))?;
    parse_datastore(name)
}

fn parse_json_request(schema: &SchemaRoot, text: &str) -> Parsed {
    let document: Value =
        serde_json::from_str(text).map_err(|e| (String::new(), malformed(e.to_string())))?;
    let body = document
        .get(JSON_RPC)
        .or_else(|| document.get("rpc"))
        .and_then(Value::as_object)
        .ok_or_else(|| (String::new(), malformed("expected an rpc object")))?;
    let message_id = match body.get("message-id") {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    };
    let (name, args) = body
        .iter()
        .find(|(k, _)| k.as_str() != "message-id")
        .ok_or_else(|| (message_id.clone(), malformed("rpc names no operation")))?;
    let request = json_operation(schema, name, args).map_err(|e| (message_id.clone(), e))?;
    Ok((message_id, request))
}

fn json_operation(
    schema: &SchemaRoot,
    name: &str,
    args: &Value,
) -> std::result::Result<Request, RpcError> {
    let local = name
        .strip_prefix(NETCONF_MODULE)
        .and_then(|n| n.strip_prefix(':'))
        .unwrap_or(name);

    let tree = |member: &str, mode: TreeMode| -> std::result::Result<Option<Value>, RpcError> {
        match args.get(member) {
            Some(tree) => {
                schema
                    .validate_tree(tree, mode)
                    .map_err(|e| invalid_value(&e))?;
                Ok(Some(tree.clone()))
            }
            None => Ok(None),
        }
    };

    let request = match local {
        "get" => Request::Get {
            filter: tree("filter", TreeMode::Filter)?,
        },
        "get-config" => Request::GetConfig {
            source: json_datastore(args, "source")?,
            filter: tree("filter", TreeMode::Filter)?,
        },
        "edit-config" => Request::EditConfig {
            target: json_datastore(args, "target")?,
            default_operation: match args.get("default-operation").and_then(Value::as_str) {
                Some(op) => parse_operation(op)?,
                None => EditOperation::Merge,
            },
            config: tree("config", TreeMode::Config)?.ok_or_else(|| missing("config"))?,
        },
        "commit" => Request::Commit,
        "discard-changes" => Request::DiscardChanges,
        "lock" => Request::Lock(json_datastore(args, "target")?),
        "unlock" => Request::Unlock(json_datastore(args, "target")?),
        "validate" => Request::Validate(json_datastore(args, "source")?),
        "close-session" => Request::CloseSession,
        _ => {
            let name = if name.contains(':') {
                name.to_string()
            } else {
                format!("{}:{}", NETCONF_MODULE, name)
            };
            if let Some(rpc) = schema.rpc(&name) {
                codec::validate_rpc_input(rpc, args).map_err(|e| invalid_value(&e))?;
            }
            Request::Custom {
                name,
                input: args.clone(),
            }
        }
    };
    Ok(request)
}

/// Datastore parameter as `"running"` or `{"running": [null]}`
fn json_datastore(args: &Value, parameter: &str) -> std::result::Result<Datastore, RpcError> {
    match args.get(parameter) {
        Some(Value::String(name)) => parse_datastore(name),
        Some(Value::Object(map)) => match map.keys().next() {
            Some(name) => parse_datastore(name),
            None => Err(missing(parameter)),
        },
        _ => Err(missing(parameter)),
    }
}

fn filtered(schema: &SchemaRoot, tree: Value, filter: Option<Value>) -> Value {
    match filter {
        Some(filter) => select(schema, &tree, &filter),
        None => tree,
    }
}

fn parse_datastore(name: &str) -> std::result::Result<Datastore, RpcError> {
    name.parse().map_err(|_| {
        RpcError::application("invalid-value", format!("unknown datastore '{}'", name))
    })
}

fn parse_operation(name: &str) -> std::result::Result<EditOperation, RpcError> {
    name.parse().map_err(|_| {
        RpcError::application("invalid-value", format!("unknown operation '{}'", name))
    })
}

fn malformed(message: impl Into<String>) -> RpcError {
    let mut error = RpcError::application("malformed-message", message);
    error.error_type = "rpc".to_string();
    error
}

fn missing(element: &str) -> RpcError {
    let mut error = RpcError::application("missing-element", format!("missing <{}>", element));
    error.error_type = "protocol".to_string();
    error
}

fn invalid_value(err: &NetconfError) -> RpcError {
    RpcError::application("invalid-value", err.to_string())
}

fn operation_failed(err: &NetconfError) -> RpcError {
    RpcError::application("operation-failed", err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const MODULE: &str = r#"{
        "module-name": "example-sys",
        "namespace": "urn:example:system",
        "revision": "2024-03-01",
        "node": [
            {"path": "/example-sys:system", "kind": "container"},
            {"path": "/example-sys:system/hostname", "kind": "leaf", "type": "string"},
            {"path": "/example-sys:system/uptime", "kind": "leaf", "type": "uint32", "config": false}
        ],
        "rpc": [{"name": "ping", "input": {"count": "uint8"}, "output": {"sent": "uint8"}}]
    }"#;

    fn device() -> LoopbackSession {
        let repo = Repository::new().with_module_str(MODULE).unwrap();
        LoopbackSession::from_repository(&repo)
            .unwrap()
            .with_running(json!({"example-sys:system": {"hostname": "r1"}}))
    }

    const NS: &str = "xmlns=\"urn:ietf:params:xml:ns:netconf:base:1.0\"";

    #[test]
    fn test_announces_modules() {
        let caps = device().capabilities();
        assert!(
            caps.iter()
                .any(|c| c == "urn:example:system?module=example-sys&revision=2024-03-01")
        );
        assert!(caps.iter().all(|c| !c.contains("module=ietf-netconf")));
    }

    #[test]
    fn test_get_config_xml() {
        let mut device = device();
        let reply = device
            .send(&format!(
                "<rpc message-id=\"11\" {}><get-config><source><running/></source></get-config></rpc>",
                NS
            ))
            .unwrap();
        assert!(reply.starts_with("<rpc-reply message-id=\"11\""));
        assert!(reply.contains(
            "<data><system xmlns=\"urn:example:system\"><hostname>r1</hostname></system></data>"
        ));
    }

    #[test]
    fn test_edit_candidate_then_commit_json() {
        let mut device = device();
        let handle = device.handle();
        let edit = json!({"ietf-netconf:rpc": {"message-id": "1", "edit-config": {
            "target": "candidate",
            "config": {"example-sys:system": {"hostname": "r2"}}
        }}});
        let reply: Value = serde_json::from_str(&device.send(&edit.to_string()).unwrap()).unwrap();
        assert_eq!(reply["ietf-netconf:rpc-reply"]["message-id"], "1");
        assert!(reply["ietf-netconf:rpc-reply"].get("ok").is_some());
        assert_eq!(handle.running()["example-sys:system"]["hostname"], "r1");

        let commit = json!({"ietf-netconf:rpc": {"message-id": "2", "commit": {}}});
        device.send(&commit.to_string()).unwrap();
        assert_eq!(handle.running()["example-sys:system"]["hostname"], "r2");
    }

    #[test]
    fn test_get_merges_state() {
        let mut device = device().with_operational(json!({"example-sys:system": {"uptime": 42}}));
        let reply = device
            .send(&format!("<rpc message-id=\"3\" {}><get/></rpc>", NS))
            .unwrap();
        assert!(reply.contains("<hostname>r1</hostname><uptime>42</uptime>"));
    }

    #[test]
    fn test_unknown_rpc_not_supported() {
        let mut device = device();
        let reply = device
            .send(&format!(
                "<rpc message-id=\"4\" {}><kill-session><session-id>4</session-id></kill-session></rpc>",
                NS
            ))
            .unwrap();
        assert!(reply.contains("<error-tag>operation-not-supported</error-tag>"));
    }

    #[test]
    fn test_custom_rpc_handler() {
        let mut device = device().with_rpc(
            "example-sys:ping",
            |input: &Value| -> std::result::Result<Value, RpcError> {
                Ok(json!({"sent": input["count"].clone()}))
            },
        );
        let reply = device
            .send(&format!(
                "<rpc message-id=\"5\" {}><ping xmlns=\"urn:example:system\"><count>3</count></ping></rpc>",
                NS
            ))
            .unwrap();
        assert!(reply.contains("<sent xmlns=\"urn:example:system\">3</sent>"));
    }

    #[test]
    fn test_lock_twice_denied() {
        let mut device = device();
        let lock = format!(
            "<rpc message-id=\"6\" {}><lock><target><running/></target></lock></rpc>",
            NS
        );
        assert!(device.send(&lock).unwrap().contains("<ok/>"));
        assert!(device.send(&lock).unwrap().contains("lock-denied"));
    }

    #[test]
    fn test_closed_session_refuses() {
        let mut device = device();
        let handle = device.handle();
        device
            .send(&format!("<rpc message-id=\"7\" {}><close-session/></rpc>", NS))
            .unwrap();
        assert!(handle.is_closed());
        assert!(matches!(device.send("<rpc/>"), Err(SessionError::Closed)));
    }

    #[test]
    fn test_garbage_gets_malformed_message() {
        let mut device = device();
        let reply = device.send("<rpc><unterminated></rpc>").unwrap();
        assert!(reply.contains("malformed-message"));
    }
}
