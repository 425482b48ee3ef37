//! Schema model: module files, the root schema and tree validation
//!
//! Modules are described by small JSON files listing data nodes by path and
//! the RPCs the module defines. A [`Repository`] holds the modules known to
//! the application; [`Repository::root_schema`] assembles the [`SchemaRoot`]
//! for one session from the modules its peer advertises.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use log::{debug, warn};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::capabilities::Capabilities;
use crate::codec;
use crate::encoding::EncodingFormat;
use crate::error::{NetconfError, Result};
use crate::operation::{Datastore, EditOperation, OperationKind};
use crate::types::{YangType, is_empty_value};

/// Module defining the NETCONF base operations
pub const NETCONF_MODULE: &str = "ietf-netconf";
/// NETCONF base namespace, also used for `<rpc>` envelopes
pub const NETCONF_NAMESPACE: &str = "urn:ietf:params:xml:ns:netconf:base:1.0";
/// Module defining the create/read/update/delete shorthands
pub const CRUD_MODULE: &str = "crud";
pub const CRUD_NAMESPACE: &str = "urn:netconf-provider:crud";
/// Qualified name of the edit annotation in RFC 7952 metadata
pub const OPERATION_ANNOTATION: &str = "ietf-netconf:operation";

/// Data node kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeKind {
    Container,
    List,
    Leaf,
    LeafList,
}

/// A data node of a module
#[derive(Debug, Clone)]
pub struct SchemaNode {
    /// Schema path like "/example-if:interfaces/interface"
    pub path: String,
    pub kind: NodeKind,
    /// Leaf and leaf-list type
    pub yang_type: Option<YangType>,
    /// False for state data; inherited by descendants
    pub config: bool,
    /// List keys
    pub keys: Vec<String>,
}

/// An RPC definition
#[derive(Debug, Clone)]
pub struct RpcSchema {
    /// Qualified name "module:rpc"
    pub name: String,
    pub kind: OperationKind,
    /// Datastore read when the request names none
    pub datastore: Option<Datastore>,
    /// Edit annotation applied when the request carries none
    pub default_operation: Option<EditOperation>,
    /// Typed input leaves; `None` leaves the input unchecked
    pub input: Option<BTreeMap<String, YangType>>,
    /// Typed output leaves; `None` decodes the output as plain text
    pub output: Option<BTreeMap<String, YangType>>,
}

impl RpcSchema {
    fn new(module: &str, name: &str, kind: OperationKind) -> Self {
        Self {
            name: format!("{}:{}", module, name),
            kind,
            datastore: None,
            default_operation: None,
            input: None,
            output: None,
        }
    }

    pub fn module(&self) -> &str {
        self.name.split_once(':').map(|(m, _)| m).unwrap_or("")
    }

    pub fn local_name(&self) -> &str {
        self.name
            .split_once(':')
            .map(|(_, n)| n)
            .unwrap_or(&self.name)
    }
}

/// A parsed module file
#[derive(Debug, Clone)]
pub struct ModuleSchema {
    pub name: String,
    pub namespace: String,
    pub revision: Option<String>,
    pub nodes: Vec<SchemaNode>,
    pub rpcs: Vec<RpcSchema>,
}

/// Raw module file structure for deserialization
#[derive(Debug, Deserialize)]
struct RawModule {
    #[serde(rename = "module-name")]
    module_name: String,
    namespace: String,
    #[serde(default)]
    revision: Option<String>,
    #[serde(default, alias = "nodes")]
    node: Vec<RawNode>,
    #[serde(default, alias = "rpcs")]
    rpc: Vec<RawRpc>,
}

#[derive(Debug, Deserialize)]
struct RawNode {
    path: String,
    kind: NodeKind,
    #[serde(rename = "type")]
    node_type: Option<Value>,
    config: Option<bool>,
    #[serde(default)]
    key: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawRpc {
    name: String,
    #[serde(default = "default_rpc_kind")]
    kind: OperationKind,
    datastore: Option<Datastore>,
    #[serde(rename = "default-operation")]
    default_operation: Option<EditOperation>,
    input: Option<Map<String, Value>>,
    output: Option<Map<String, Value>>,
}

fn default_rpc_kind() -> OperationKind {
    OperationKind::GenericRpc
}

impl ModuleSchema {
    /// Parse a module file from the given path
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            NetconfError::Initialization(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&content)
    }

    /// Parse a module file from a JSON string
    pub fn from_json_str(content: &str) -> Result<Self> {
        let raw: RawModule = serde_json::from_str(content)
            .map_err(|e| NetconfError::Initialization(format!("invalid module file: {}", e)))?;
        let prefix = format!("/{}:", raw.module_name);

        // Parents first, so config inheritance can look them up
        let mut raw_nodes = raw.node;
        raw_nodes.sort_by_key(|n| n.path.matches('/').count());

        let mut config_by_path: HashMap<String, bool> = HashMap::with_capacity(raw_nodes.len());
        let mut nodes = Vec::with_capacity(raw_nodes.len());
        for node in raw_nodes {
            if !node.path.starts_with(&prefix) {
                return Err(NetconfError::Initialization(format!(
                    "node '{}' is outside module {}",
                    node.path, raw.module_name
                )));
            }

            let yang_type = match node.kind {
                NodeKind::Leaf | NodeKind::LeafList => Some(
                    node.node_type
                        .as_ref()
                        .map(YangType::from_schema_type)
                        .ok_or_else(|| {
                            NetconfError::Initialization(format!(
                                "leaf '{}' has no type",
                                node.path
                            ))
                        })?,
                ),
                NodeKind::Container | NodeKind::List => None,
            };

            let inherited = node
                .path
                .rsplit_once('/')
                .and_then(|(parent, _)| config_by_path.get(parent).copied())
                .unwrap_or(true);
            let config = node.config.unwrap_or(inherited) && inherited;
            config_by_path.insert(node.path.clone(), config);

            nodes.push(SchemaNode {
                path: node.path,
                kind: node.kind,
                yang_type,
                config,
                keys: node.key,
            });
        }

        let rpcs = raw
            .rpc
            .into_iter()
            .map(|rpc| {
                let name = if rpc.name.contains(':') {
                    rpc.name
                } else {
                    format!("{}:{}", raw.module_name, rpc.name)
                };
                RpcSchema {
                    name,
                    kind: rpc.kind,
                    datastore: rpc.datastore,
                    default_operation: rpc.default_operation,
                    input: rpc.input.map(|m| leaf_types(&m)),
                    output: rpc.output.map(|m| leaf_types(&m)),
                }
            })
            .collect();

        Ok(ModuleSchema {
            name: raw.module_name,
            namespace: raw.namespace,
            revision: raw.revision,
            nodes,
            rpcs,
        })
    }

    /// The NETCONF base operations (RFC 6241)
    pub fn netconf_base() -> Self {
        let mut get = RpcSchema::new(NETCONF_MODULE, "get", OperationKind::Read);
        get.datastore = Some(Datastore::Operational);
        let mut get_config = RpcSchema::new(NETCONF_MODULE, "get-config", OperationKind::Read);
        get_config.datastore = Some(Datastore::Running);
        let edit_config = RpcSchema::new(NETCONF_MODULE, "edit-config", OperationKind::Edit);

        let mut rpcs = vec![get, get_config, edit_config];
        for name in [
            "copy-config",
            "delete-config",
            "lock",
            "unlock",
            "commit",
            "discard-changes",
            "validate",
            "close-session",
            "kill-session",
        ] {
            rpcs.push(RpcSchema::new(NETCONF_MODULE, name, OperationKind::GenericRpc));
        }

        Self {
            name: NETCONF_MODULE.to_string(),
            namespace: NETCONF_NAMESPACE.to_string(),
            revision: Some("2011-06-01".to_string()),
            nodes: Vec::new(),
            rpcs,
        }
    }

    /// Create/read/update/delete shorthands over `<edit-config>` and `<get>`
    pub fn crud() -> Self {
        let mut rpcs = Vec::new();
        for (name, op) in [
            ("create", EditOperation::Create),
            ("update", EditOperation::Merge),
            ("delete", EditOperation::Delete),
        ] {
            let mut rpc = RpcSchema::new(CRUD_MODULE, name, OperationKind::Edit);
            rpc.default_operation = Some(op);
            rpcs.push(rpc);
        }
        rpcs.push(RpcSchema::new(CRUD_MODULE, "read", OperationKind::Read));

        Self {
            name: CRUD_MODULE.to_string(),
            namespace: CRUD_NAMESPACE.to_string(),
            revision: None,
            nodes: Vec::new(),
            rpcs,
        }
    }

    fn is_builtin(&self) -> bool {
        self.name == NETCONF_MODULE || self.name == CRUD_MODULE
    }
}

fn leaf_types(map: &Map<String, Value>) -> BTreeMap<String, YangType> {
    map.iter()
        .map(|(name, t)| (name.clone(), YangType::from_schema_type(t)))
        .collect()
}

/// How strictly [`SchemaRoot::validate_tree`] checks a tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeMode {
    /// Any data node; list keys required
    Data,
    /// Configuration data only; list keys required
    Config,
    /// Subtree filter: null leaves select, valued leaves match
    Filter,
}

/// Identity of a loaded module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleInfo {
    pub name: String,
    pub namespace: String,
    pub revision: Option<String>,
}

impl ModuleInfo {
    /// Capability URI announcing this module in a `<hello>`
    pub fn capability_uri(&self) -> String {
        match &self.revision {
            Some(rev) => format!("{}?module={}&revision={}", self.namespace, self.name, rev),
            None => format!("{}?module={}", self.namespace, self.name),
        }
    }
}

/// Loaded schema of one session, immutable once built
#[derive(Debug, Clone, Default)]
pub struct SchemaRoot {
    modules: BTreeMap<String, ModuleInfo>,
    namespaces: HashMap<String, String>,
    nodes: HashMap<String, SchemaNode>,
    rpcs: HashMap<String, RpcSchema>,
}

impl SchemaRoot {
    pub fn from_modules<'a>(modules: impl IntoIterator<Item = &'a ModuleSchema>) -> Self {
        let mut root = SchemaRoot::default();
        for module in modules {
            root.namespaces
                .insert(module.namespace.clone(), module.name.clone());
            root.modules.insert(
                module.name.clone(),
                ModuleInfo {
                    name: module.name.clone(),
                    namespace: module.namespace.clone(),
                    revision: module.revision.clone(),
                },
            );
            for node in &module.nodes {
                root.nodes.insert(node.path.clone(), node.clone());
            }
            for rpc in &module.rpcs {
                root.rpcs.insert(rpc.name.clone(), rpc.clone());
            }
        }
        root
    }

    pub fn modules(&self) -> impl Iterator<Item = &ModuleInfo> {
        self.modules.values()
    }

    pub fn has_module(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    pub fn namespace(&self, module: &str) -> Option<&str> {
        self.modules.get(module).map(|m| m.namespace.as_str())
    }

    pub fn module_for_namespace(&self, namespace: &str) -> Option<&str> {
        self.namespaces.get(namespace).map(|m| m.as_str())
    }

    pub fn node(&self, path: &str) -> Option<&SchemaNode> {
        self.nodes.get(path)
    }

    /// Look up an RPC by qualified name
    ///
    /// An unqualified name resolves to the base module first, then to the
    /// only loaded module defining it.
    pub fn rpc(&self, name: &str) -> Option<&RpcSchema> {
        if let Some(rpc) = self.rpcs.get(name) {
            return Some(rpc);
        }
        if name.contains(':') {
            return None;
        }
        if let Some(rpc) = self.rpcs.get(&format!("{}:{}", NETCONF_MODULE, name)) {
            return Some(rpc);
        }
        let mut matches = self.rpcs.values().filter(|r| r.local_name() == name);
        match (matches.next(), matches.next()) {
            (Some(rpc), None) => Some(rpc),
            _ => None,
        }
    }

    /// Resolve the kind of an operation from its RPC definition
    pub fn classify(&self, name: &str) -> Result<OperationKind> {
        self.rpc(name).map(|rpc| rpc.kind).ok_or_else(|| {
            NetconfError::Validation(format!("operation '{}' is not defined by the schema", name))
        })
    }

    /// Validate `tree`, then serialize it in `format`
    pub fn validate_and_serialize(
        &self,
        tree: &Value,
        format: EncodingFormat,
        mode: TreeMode,
    ) -> Result<String> {
        self.validate_tree(tree, mode)?;
        codec::encode_data(self, tree, format)
    }

    /// Parse serialized data into a validated tree
    pub fn parse(&self, text: &str, format: EncodingFormat) -> Result<Value> {
        codec::decode_data(self, text, format)
    }

    /// Check a data tree against the loaded modules
    pub fn validate_tree(&self, tree: &Value, mode: TreeMode) -> Result<()> {
        let map = tree.as_object().ok_or_else(|| {
            NetconfError::Validation("data tree must be a JSON object".to_string())
        })?;

        for (key, value) in map {
            if let Some(annotated) = key.strip_prefix('@') {
                validate_metadata(annotated, value)?;
                continue;
            }
            if !key.contains(':') {
                return Err(NetconfError::Validation(format!(
                    "top-level node '{}' must be module-qualified",
                    key
                )));
            }
            let path = format!("/{}", key);
            self.validate_node(&path, value, mode)?;
        }
        Ok(())
    }

    fn validate_node(&self, path: &str, value: &Value, mode: TreeMode) -> Result<()> {
        let node = self
            .node(path)
            .ok_or_else(|| NetconfError::Validation(format!("unknown data node '{}'", path)))?;

        if mode == TreeMode::Config && !node.config {
            return Err(NetconfError::Validation(format!(
                "'{}' is state data and cannot be configured",
                path
            )));
        }
        if mode == TreeMode::Filter && is_empty_value(value) {
            return Ok(());
        }
        // A null leaf in an edit names the leaf to delete
        if mode == TreeMode::Config && value.is_null() && node.kind == NodeKind::Leaf {
            return Ok(());
        }

        match node.kind {
            NodeKind::Container => {
                let children = value.as_object().ok_or_else(|| {
                    NetconfError::Validation(format!("container '{}' must be an object", path))
                })?;
                self.validate_children(path, children, mode)
            }
            NodeKind::List => {
                let entries = value.as_array().ok_or_else(|| {
                    NetconfError::Validation(format!("list '{}' must be an array", path))
                })?;
                for entry in entries {
                    let children = entry.as_object().ok_or_else(|| {
                        NetconfError::Validation(format!(
                            "entry of list '{}' must be an object",
                            path
                        ))
                    })?;
                    if mode != TreeMode::Filter
                        && let Some(missing) =
                            node.keys.iter().find(|k| !children.contains_key(k.as_str()))
                    {
                        return Err(NetconfError::Validation(format!(
                            "entry of list '{}' is missing key '{}'",
                            path, missing
                        )));
                    }
                    self.validate_children(path, children, mode)?;
                }
                Ok(())
            }
            NodeKind::Leaf => {
                let yang_type = node.yang_type.as_ref().ok_or_else(|| {
                    NetconfError::Validation(format!("leaf '{}' has no type", path))
                })?;
                yang_type.validate(value).map_err(|e| at_path(e, path))
            }
            NodeKind::LeafList => {
                let yang_type = node.yang_type.as_ref().ok_or_else(|| {
                    NetconfError::Validation(format!("leaf-list '{}' has no type", path))
                })?;
                let items = value.as_array().ok_or_else(|| {
                    NetconfError::Validation(format!("leaf-list '{}' must be an array", path))
                })?;
                for item in items {
                    yang_type.validate(item).map_err(|e| at_path(e, path))?;
                }
                Ok(())
            }
        }
    }

    fn validate_children(
        &self,
        parent: &str,
        children: &Map<String, Value>,
        mode: TreeMode,
    ) -> Result<()> {
        for (key, value) in children {
            if let Some(annotated) = key.strip_prefix('@') {
                validate_metadata(annotated, value)?;
                continue;
            }
            self.validate_node(&child_path(parent, key), value, mode)?;
        }
        Ok(())
    }
}

/// Schema path of member `key` below `parent`
///
/// A member qualified with the parent's own module is normalized to the
/// unqualified form used by schema paths.
pub fn child_path(parent: &str, key: &str) -> String {
    match key.split_once(':') {
        Some((module, name)) if Some(module) == path_module(parent) => {
            format!("{}/{}", parent, name)
        }
        _ => format!("{}/{}", parent, key),
    }
}

/// Module of the innermost qualified segment of a schema path
pub fn path_module(path: &str) -> Option<&str> {
    path.rsplit('/')
        .find_map(|segment| segment.split_once(':').map(|(m, _)| m))
}

/// RFC 7952 metadata object carrying an edit annotation
pub fn operation_metadata(op: &str) -> Value {
    let mut meta = Map::new();
    meta.insert(
        OPERATION_ANNOTATION.to_string(),
        Value::String(op.to_string()),
    );
    Value::Object(meta)
}

fn validate_metadata(annotated: &str, value: &Value) -> Result<()> {
    let map = value.as_object().ok_or_else(|| {
        NetconfError::Validation(format!("metadata of '{}' must be an object", annotated))
    })?;
    if let Some(op) = map.get(OPERATION_ANNOTATION) {
        let name = op.as_str().ok_or_else(|| {
            NetconfError::Validation("edit annotation must be a string".to_string())
        })?;
        if name.parse::<EditOperation>()? == EditOperation::None {
            return Err(NetconfError::Validation(format!(
                "'none' on '{}' is only valid as the default operation",
                annotated
            )));
        }
    }
    Ok(())
}

fn at_path(err: NetconfError, path: &str) -> NetconfError {
    match err {
        NetconfError::Validation(detail) => {
            NetconfError::Validation(format!("{} at '{}'", detail, path))
        }
        other => other,
    }
}

/// Modules available to providers
#[derive(Debug, Clone)]
pub struct Repository {
    modules: BTreeMap<String, ModuleSchema>,
}

impl Default for Repository {
    fn default() -> Self {
        Self::new()
    }
}

impl Repository {
    /// Repository holding only the built-in base and CRUD modules
    pub fn new() -> Self {
        let mut modules = BTreeMap::new();
        for module in [ModuleSchema::netconf_base(), ModuleSchema::crud()] {
            modules.insert(module.name.clone(), module);
        }
        Self { modules }
    }

    /// Load every `*.json` module file in `dir`
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let entries = fs::read_dir(dir).map_err(|e| {
            NetconfError::Initialization(format!("cannot read {}: {}", dir.display(), e))
        })?;

        let mut repo = Self::new();
        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| NetconfError::Initialization(e.to_string()))?;
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                paths.push(path);
            }
        }
        paths.sort();

        for path in paths {
            debug!("loading module file {}", path.display());
            repo.add_module(ModuleSchema::from_file(&path)?);
        }
        Ok(repo)
    }

    pub fn add_module(&mut self, module: ModuleSchema) {
        self.modules.insert(module.name.clone(), module);
    }

    pub fn add_module_str(&mut self, content: &str) -> Result<()> {
        self.add_module(ModuleSchema::from_json_str(content)?);
        Ok(())
    }

    /// Builder-style variant of [`Repository::add_module_str`]
    pub fn with_module_str(mut self, content: &str) -> Result<Self> {
        self.add_module_str(content)?;
        Ok(self)
    }

    pub fn module(&self, name: &str) -> Option<&ModuleSchema> {
        self.modules.get(name)
    }

    pub fn modules(&self) -> impl Iterator<Item = &ModuleSchema> {
        self.modules.values()
    }

    /// Assemble the root schema for a peer
    ///
    /// Built-in modules are always loaded. When the peer announces modules,
    /// only those are added; otherwise every module in the repository is.
    pub fn root_schema(&self, caps: &Capabilities) -> Result<SchemaRoot> {
        let advertised = caps.advertised_modules();
        if advertised.is_empty() {
            debug!("peer advertises no modules, loading all {}", self.modules.len());
            return Ok(SchemaRoot::from_modules(self.modules.values()));
        }

        let mut selected: Vec<&ModuleSchema> =
            self.modules.values().filter(|m| m.is_builtin()).collect();
        for announced in &advertised {
            if selected.iter().any(|m| m.name == announced.name) {
                continue;
            }
            match self.modules.get(&announced.name) {
                Some(module) => {
                    if module.namespace != announced.namespace {
                        return Err(NetconfError::Initialization(format!(
                            "peer announces {} in namespace {}, repository has {}",
                            module.name, announced.namespace, module.namespace
                        )));
                    }
                    if announced.revision.is_some() && announced.revision != module.revision {
                        warn!(
                            "peer announces {} revision {:?}, repository has {:?}",
                            module.name, announced.revision, module.revision
                        );
                    }
                    selected.push(module);
                }
                None => warn!(
                    "module {} advertised by peer is not in the repository, skipping",
                    announced.name
                ),
            }
        }

        Ok(SchemaRoot::from_modules(selected))
    }
}
