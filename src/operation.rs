//! Operation requests and their classification
//!
//! An [`OperationRequest`] names an RPC from the loaded schema and carries the
//! data the caller wants to send. Its [`OperationKind`] is never supplied by
//! the caller: it comes from the schema definition of the named RPC.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{NetconfError, Result};

/// Semantic kind of an operation, resolved from the schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    /// `<get>` or `<get-config>`
    Read,
    /// `<edit-config>`
    Edit,
    /// Any other RPC, sent verbatim
    #[serde(rename = "rpc")]
    GenericRpc,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Read => f.write_str("read"),
            OperationKind::Edit => f.write_str("edit"),
            OperationKind::GenericRpc => f.write_str("rpc"),
        }
    }
}

/// Edit annotation: how new data combines with existing data (RFC 6241 7.2)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EditOperation {
    Merge,
    Replace,
    Create,
    Delete,
    Remove,
    /// Only valid as the edit's default operation
    None,
}

impl EditOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            EditOperation::Merge => "merge",
            EditOperation::Replace => "replace",
            EditOperation::Create => "create",
            EditOperation::Delete => "delete",
            EditOperation::Remove => "remove",
            EditOperation::None => "none",
        }
    }
}

impl fmt::Display for EditOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EditOperation {
    type Err = NetconfError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "merge" => Ok(EditOperation::Merge),
            "replace" => Ok(EditOperation::Replace),
            "create" => Ok(EditOperation::Create),
            "delete" => Ok(EditOperation::Delete),
            "remove" => Ok(EditOperation::Remove),
            "none" => Ok(EditOperation::None),
            other => Err(NetconfError::Validation(format!(
                "unknown edit operation '{}'",
                other
            ))),
        }
    }
}

/// Target or source datastore of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Datastore {
    Running,
    Candidate,
    Startup,
    /// Operational state, read with `<get>`
    Operational,
}

impl Datastore {
    pub fn as_str(self) -> &'static str {
        match self {
            Datastore::Running => "running",
            Datastore::Candidate => "candidate",
            Datastore::Startup => "startup",
            Datastore::Operational => "operational",
        }
    }

    /// Configuration datastores are read with `<get-config>`
    pub fn is_config(self) -> bool {
        !matches!(self, Datastore::Operational)
    }
}

impl fmt::Display for Datastore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Datastore {
    type Err = NetconfError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "running" => Ok(Datastore::Running),
            "candidate" => Ok(Datastore::Candidate),
            "startup" => Ok(Datastore::Startup),
            "operational" => Ok(Datastore::Operational),
            other => Err(NetconfError::Validation(format!(
                "unknown datastore '{}'",
                other
            ))),
        }
    }
}

/// A named operation with its optional payload, annotation and datastore
///
/// # Example
/// ```
/// use netconf_provider::{Datastore, EditOperation, OperationRequest};
/// use serde_json::json;
///
/// let request = OperationRequest::new("ietf-netconf:edit-config")
///     .with_payload(json!({"example-if:interfaces": {"interface": [{"name": "eth0"}]}}))
///     .with_annotation(EditOperation::Replace)
///     .with_datastore(Datastore::Running);
/// assert_eq!(request.annotation(), Some(EditOperation::Replace));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct OperationRequest {
    name: String,
    payload: Option<Value>,
    annotation: Option<EditOperation>,
    datastore: Option<Datastore>,
}

impl OperationRequest {
    /// Create a request for the RPC `name` ("module:rpc")
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            payload: None,
            annotation: None,
            datastore: None,
        }
    }

    /// Attach the payload tree (edit data, read filter or RPC input)
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_annotation(mut self, annotation: EditOperation) -> Self {
        self.annotation = Some(annotation);
        self
    }

    pub fn with_datastore(mut self, datastore: Datastore) -> Self {
        self.datastore = Some(datastore);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn payload(&self) -> Option<&Value> {
        self.payload.as_ref()
    }

    pub fn annotation(&self) -> Option<EditOperation> {
        self.annotation
    }

    pub fn datastore(&self) -> Option<Datastore> {
        self.datastore
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edit_operation_parse() {
        assert_eq!(
            "replace".parse::<EditOperation>().unwrap(),
            EditOperation::Replace
        );
        assert!("upsert".parse::<EditOperation>().is_err());
    }

    #[test]
    fn test_kind_serde_names() {
        let kind: OperationKind = serde_json::from_str("\"rpc\"").unwrap();
        assert_eq!(kind, OperationKind::GenericRpc);
        assert_eq!(OperationKind::Read.to_string(), "read");
    }

    #[test]
    fn test_datastore_is_config() {
        assert!(Datastore::Candidate.is_config());
        assert!(!Datastore::Operational.is_config());
    }
}
