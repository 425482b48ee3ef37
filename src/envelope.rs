//! NETCONF message envelopes
//!
//! Builds `<rpc>` requests for the read, edit and generic RPC shapes and
//! decodes `<rpc-reply>` documents, in either encoding.

use log::warn;
use serde_json::{Map, Value};

use crate::codec;
use crate::encoding::EncodingFormat;
use crate::error::{NetconfError, Result, RpcError};
use crate::operation::{Datastore, EditOperation};
use crate::schema::{NETCONF_MODULE, NETCONF_NAMESPACE, RpcSchema, SchemaRoot, TreeMode};
use crate::xml::{Element, escape};

/// Root member of a JSON-encoded request
pub const JSON_RPC: &str = "ietf-netconf:rpc";
/// Root member of a JSON-encoded reply
pub const JSON_RPC_REPLY: &str = "ietf-netconf:rpc-reply";

/// Body of one `<rpc>`
#[derive(Debug)]
pub enum Envelope<'a> {
    /// `<get>`: operational state and configuration
    Get { filter: Option<&'a Value> },
    /// `<get-config>` from a configuration datastore
    GetConfig {
        source: Datastore,
        filter: Option<&'a Value>,
    },
    /// `<edit-config>`; annotations are already attached to `config`
    EditConfig {
        target: Datastore,
        default_operation: Option<EditOperation>,
        config: &'a Value,
    },
    Commit,
    /// Any other RPC, input written verbatim
    Rpc {
        rpc: &'a RpcSchema,
        input: Option<&'a Value>,
    },
}

/// Reply shape expected for a request
#[derive(Debug, Clone, Copy)]
pub enum Expect<'a> {
    /// `<data>` holding a data tree
    Data,
    /// `<ok/>`
    Ok,
    /// RPC output members
    Output(&'a RpcSchema),
}

/// Builds requests and decodes replies for one session
#[derive(Debug, Clone, Copy)]
pub struct MessageBuilder<'a> {
    schema: &'a SchemaRoot,
    format: EncodingFormat,
}

impl<'a> MessageBuilder<'a> {
    pub fn new(schema: &'a SchemaRoot, format: EncodingFormat) -> Self {
        Self { schema, format }
    }

    /// Serialize an envelope as a complete request
    pub fn build(&self, message_id: u64, envelope: &Envelope<'_>) -> Result<String> {
        match self.format {
            EncodingFormat::Xml => self.build_xml(message_id, envelope),
            EncodingFormat::Json => self.build_json(message_id, envelope),
        }
    }

    fn build_xml(&self, message_id: u64, envelope: &Envelope<'_>) -> Result<String> {
        let mut out = format!(
            "<rpc message-id=\"{}\" xmlns=\"{}\">",
            message_id, NETCONF_NAMESPACE
        );

        match envelope {
            Envelope::Get { filter } => {
                out.push_str("<get>");
                self.push_filter(*filter, &mut out)?;
                out.push_str("</get>");
            }
            Envelope::GetConfig { source, filter } => {
                out.push_str(&format!("<get-config><source><{}/></source>", source));
                self.push_filter(*filter, &mut out)?;
                out.push_str("</get-config>");
            }
            Envelope::EditConfig {
                target,
                default_operation,
                config,
            } => {
                out.push_str(&format!("<edit-config><target><{}/></target>", target));
                if let Some(op) = default_operation {
                    out.push_str(&format!("<default-operation>{}</default-operation>", op));
                }
                out.push_str("<config>");
                out.push_str(&codec::encode_data(self.schema, config, EncodingFormat::Xml)?);
                out.push_str("</config></edit-config>");
            }
            Envelope::Commit => out.push_str("<commit/>"),
            Envelope::Rpc { rpc, input } => {
                let name = rpc.local_name();
                out.push('<');
                out.push_str(name);
                if rpc.module() != NETCONF_MODULE {
                    let ns = self.schema.namespace(rpc.module()).ok_or_else(|| {
                        NetconfError::Validation(format!(
                            "module of '{}' is not loaded",
                            rpc.name
                        ))
                    })?;
                    out.push_str(&format!(" xmlns=\"{}\"", escape(ns)));
                }
                match input {
                    Some(input) => {
                        out.push('>');
                        let rpc_path = format!("/{}", rpc.name);
                        codec::write_members(self.schema, input, Some(&rpc_path), &mut out)?;
                        out.push_str(&format!("</{}>", name));
                    }
                    None => out.push_str("/>"),
                }
            }
        }

        out.push_str("</rpc>");
        Ok(out)
    }

    fn push_filter(&self, filter: Option<&Value>, out: &mut String) -> Result<()> {
        if let Some(filter) = filter {
            out.push_str("<filter type=\"subtree\">");
            out.push_str(&codec::encode_data(self.schema, filter, EncodingFormat::Xml)?);
            out.push_str("</filter>");
        }
        Ok(())
    }

    fn build_json(&self, message_id: u64, envelope: &Envelope<'_>) -> Result<String> {
        let mut body = Map::new();
        body.insert(
            "message-id".to_string(),
            Value::String(message_id.to_string()),
        );

        match envelope {
            Envelope::Get { filter } => {
                let mut get = Map::new();
                if let Some(filter) = filter {
                    get.insert("filter".to_string(), (*filter).clone());
                }
                body.insert("get".to_string(), Value::Object(get));
            }
            Envelope::GetConfig { source, filter } => {
                let mut get = Map::new();
                get.insert("source".to_string(), Value::String(source.to_string()));
                if let Some(filter) = filter {
                    get.insert("filter".to_string(), (*filter).clone());
                }
                body.insert("get-config".to_string(), Value::Object(get));
            }
            Envelope::EditConfig {
                target,
                default_operation,
                config,
            } => {
                let mut edit = Map::new();
                edit.insert("target".to_string(), Value::String(target.to_string()));
                if let Some(op) = default_operation {
                    edit.insert(
                        "default-operation".to_string(),
                        Value::String(op.to_string()),
                    );
                }
                edit.insert("config".to_string(), (*config).clone());
                body.insert("edit-config".to_string(), Value::Object(edit));
            }
            Envelope::Commit => {
                body.insert("commit".to_string(), Value::Object(Map::new()));
            }
            Envelope::Rpc { rpc, input } => {
                let key = if rpc.module() == NETCONF_MODULE {
                    rpc.local_name().to_string()
                } else {
                    rpc.name.clone()
                };
                let input = input.cloned().unwrap_or_else(|| Value::Object(Map::new()));
                body.insert(key, input);
            }
        }

        let mut root = Map::new();
        root.insert(JSON_RPC.to_string(), Value::Object(body));
        serde_json::to_string(&Value::Object(root))
            .map_err(|e| NetconfError::Validation(format!("cannot serialize request: {}", e)))
    }

    /// Decode a reply into a result tree
    ///
    /// `<rpc-error>` entries with severity `error` fail with
    /// [`NetconfError::rejected`]; anything undecodable fails with
    /// [`NetconfError::malformed`].
    pub fn parse_reply(&self, text: &str, message_id: u64, expect: Expect<'_>) -> Result<Value> {
        if text.trim().is_empty() {
            return match expect {
                Expect::Data => Err(NetconfError::malformed("empty reply")),
                Expect::Ok | Expect::Output(_) => Ok(Value::Object(Map::new())),
            };
        }
        match self.format {
            EncodingFormat::Xml => self.parse_xml_reply(text, message_id, expect),
            EncodingFormat::Json => self.parse_json_reply(text, message_id, expect),
        }
    }

    fn parse_xml_reply(&self, text: &str, message_id: u64, expect: Expect<'_>) -> Result<Value> {
        let root = Element::parse(text).map_err(|e| NetconfError::malformed(e.to_string()))?;
        if root.name != "rpc-reply" {
            return Err(NetconfError::malformed(format!(
                "expected <rpc-reply>, found <{}>",
                root.name
            )));
        }
        check_message_id(root.attribute("message-id"), message_id)?;

        let errors: Vec<RpcError> = root
            .children
            .iter()
            .filter(|c| c.name == "rpc-error")
            .map(rpc_error_from_xml)
            .collect();
        check_errors(errors)?;

        let rest: Vec<&Element> = root
            .children
            .iter()
            .filter(|c| c.name != "rpc-error")
            .collect();
        let is_ok = rest.is_empty() || (rest.len() == 1 && rest[0].name == "ok");

        match expect {
            Expect::Data => match root.child("data") {
                Some(data) => {
                    let tree =
                        codec::elements_to_tree(self.schema, &data.children, TreeMode::Data)?;
                    self.schema.validate_tree(&tree, TreeMode::Data)?;
                    Ok(tree)
                }
                None if is_ok => Ok(Value::Object(Map::new())),
                None => Err(NetconfError::malformed("reply carries no <data>")),
            },
            Expect::Ok if is_ok => Ok(Value::Object(Map::new())),
            Expect::Ok => Err(NetconfError::malformed(format!(
                "expected <ok/>, found <{}>",
                rest[0].name
            ))),
            Expect::Output(_) if is_ok => Ok(Value::Object(Map::new())),
            Expect::Output(rpc) => {
                let elements: Vec<Element> = rest.into_iter().cloned().collect();
                codec::rpc_output_to_tree(Some(rpc), &elements)
            }
        }
    }

    fn parse_json_reply(&self, text: &str, message_id: u64, expect: Expect<'_>) -> Result<Value> {
        let document: Value =
            serde_json::from_str(text).map_err(|e| NetconfError::malformed(e.to_string()))?;
        let body = document
            .get(JSON_RPC_REPLY)
            .or_else(|| document.get("rpc-reply"))
            .and_then(Value::as_object)
            .ok_or_else(|| NetconfError::malformed("expected an rpc-reply object"))?;

        let reply_id = match body.get("message-id") {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };
        check_message_id(reply_id.as_deref(), message_id)?;

        let errors = match body.get("rpc-error") {
            Some(Value::Array(items)) => items.iter().map(rpc_error_from_json).collect(),
            Some(item) => vec![rpc_error_from_json(item)],
            None => Vec::new(),
        };
        check_errors(errors)?;

        let rest: Map<String, Value> = body
            .iter()
            .filter(|(k, _)| !matches!(k.as_str(), "message-id" | "rpc-error"))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let is_ok = rest.is_empty() || (rest.len() == 1 && rest.contains_key("ok"));

        match expect {
            Expect::Data => match rest.get("data") {
                Some(data) => {
                    self.schema.validate_tree(data, TreeMode::Data)?;
                    Ok(data.clone())
                }
                None if is_ok => Ok(Value::Object(Map::new())),
                None => Err(NetconfError::malformed("reply carries no data")),
            },
            Expect::Ok if is_ok => Ok(Value::Object(Map::new())),
            Expect::Ok => Err(NetconfError::malformed("expected an ok reply")),
            Expect::Output(_) if is_ok => Ok(Value::Object(Map::new())),
            Expect::Output(rpc) => {
                if let Some(declared) = &rpc.output {
                    for (name, value) in &rest {
                        if let Some(yang_type) = declared.get(name) {
                            yang_type.validate(value)?;
                        }
                    }
                }
                Ok(Value::Object(rest))
            }
        }
    }
}

fn check_message_id(reply_id: Option<&str>, expected: u64) -> Result<()> {
    match reply_id {
        Some(id) if id.trim() == expected.to_string() => Ok(()),
        Some(id) => Err(NetconfError::malformed(format!(
            "reply message-id {} does not match request {}",
            id, expected
        ))),
        None => {
            warn!("reply to message {} carries no message-id", expected);
            Ok(())
        }
    }
}

/// Fail on any error-severity entry; warnings are only logged
fn check_errors(errors: Vec<RpcError>) -> Result<()> {
    let (warnings, errors): (Vec<RpcError>, Vec<RpcError>) = errors
        .into_iter()
        .partition(|e| e.error_severity == "warning");
    for warning in &warnings {
        warn!("peer warning: {}", warning);
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(NetconfError::rejected(errors))
    }
}

fn rpc_error_from_xml(element: &Element) -> RpcError {
    let field = |name: &str| {
        element
            .child(name)
            .map(|c| c.text.trim().to_string())
            .unwrap_or_default()
    };
    RpcError {
        error_type: field("error-type"),
        error_tag: field("error-tag"),
        error_severity: field("error-severity"),
        error_path: element.child("error-path").map(|c| c.text.trim().to_string()),
        error_message: field("error-message"),
    }
}

fn rpc_error_from_json(value: &Value) -> RpcError {
    serde_json::from_value(value.clone()).unwrap_or_else(|_| RpcError {
        error_message: value.to_string(),
        ..RpcError::default()
    })
}

/// Serialize a list of errors as an `<rpc-reply>` (used by the loopback peer)
pub fn error_reply(format: EncodingFormat, message_id: &str, errors: &[RpcError]) -> String {
    match format {
        EncodingFormat::Xml => {
            let mut out = reply_open(message_id);
            for e in errors {
                out.push_str("<rpc-error>");
                push_text_element(&mut out, "error-type", &e.error_type);
                push_text_element(&mut out, "error-tag", &e.error_tag);
                push_text_element(&mut out, "error-severity", &e.error_severity);
                if let Some(path) = &e.error_path {
                    push_text_element(&mut out, "error-path", path);
                }
                push_text_element(&mut out, "error-message", &e.error_message);
                out.push_str("</rpc-error>");
            }
            out.push_str("</rpc-reply>");
            out
        }
        EncodingFormat::Json => {
            let errors: Vec<Value> = errors
                .iter()
                .filter_map(|e| serde_json::to_value(e).ok())
                .collect();
            json_reply(message_id, [("rpc-error".to_string(), Value::Array(errors))])
        }
    }
}

/// Opening `<rpc-reply>` tag echoing `message_id`
pub fn reply_open(message_id: &str) -> String {
    format!(
        "<rpc-reply message-id=\"{}\" xmlns=\"{}\">",
        escape(message_id),
        NETCONF_NAMESPACE
    )
}

/// JSON reply document with the given members
pub fn json_reply(message_id: &str, members: impl IntoIterator<Item = (String, Value)>) -> String {
    let mut body = Map::new();
    body.insert(
        "message-id".to_string(),
        Value::String(message_id.to_string()),
    );
    body.extend(members);
    let mut root = Map::new();
    root.insert(JSON_RPC_REPLY.to_string(), Value::Object(body));
    Value::Object(root).to_string()
}

fn push_text_element(out: &mut String, name: &str, text: &str) {
    out.push_str(&format!("<{}>{}</{}>", name, escape(text), name));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::Capabilities;
    use crate::schema::Repository;
    use serde_json::json;

    const MODULE: &str = r#"{
        "module-name": "example-sys",
        "namespace": "urn:example:system",
        "node": [
            {"path": "/example-sys:system", "kind": "container"},
            {"path": "/example-sys:system/hostname", "kind": "leaf", "type": "string"}
        ],
        "rpc": [{"name": "reboot", "input": {"delay": "uint32"}, "output": {"eta": "uint32"}}]
    }"#;

    fn schema() -> SchemaRoot {
        Repository::new()
            .with_module_str(MODULE)
            .unwrap()
            .root_schema(&Capabilities::default())
            .unwrap()
    }

    #[test]
    fn test_build_get_config_xml() {
        let schema = schema();
        let builder = MessageBuilder::new(&schema, EncodingFormat::Xml);
        let filter = json!({"example-sys:system": {}});
        let rpc = builder
            .build(
                3,
                &Envelope::GetConfig {
                    source: Datastore::Candidate,
                    filter: Some(&filter),
                },
            )
            .unwrap();
        assert_eq!(
            rpc,
            "<rpc message-id=\"3\" xmlns=\"urn:ietf:params:xml:ns:netconf:base:1.0\">\
             <get-config><source><candidate/></source>\
             <filter type=\"subtree\"><system xmlns=\"urn:example:system\"></system></filter>\
             </get-config></rpc>"
        );
    }

    #[test]
    fn test_build_custom_rpc_xml() {
        let schema = schema();
        let builder = MessageBuilder::new(&schema, EncodingFormat::Xml);
        let input = json!({"delay": 5});
        let rpc = builder
            .build(
                9,
                &Envelope::Rpc {
                    rpc: schema.rpc("example-sys:reboot").unwrap(),
                    input: Some(&input),
                },
            )
            .unwrap();
        assert!(rpc.contains("<reboot xmlns=\"urn:example:system\"><delay>5</delay></reboot>"));
    }

    #[test]
    fn test_build_edit_json() {
        let schema = schema();
        let builder = MessageBuilder::new(&schema, EncodingFormat::Json);
        let config = json!({"example-sys:system": {"hostname": "r1"}});
        let rpc = builder
            .build(
                1,
                &Envelope::EditConfig {
                    target: Datastore::Running,
                    default_operation: Some(EditOperation::None),
                    config: &config,
                },
            )
            .unwrap();
        let parsed: Value = serde_json::from_str(&rpc).unwrap();
        let edit = &parsed[JSON_RPC]["edit-config"];
        assert_eq!(edit["target"], "running");
        assert_eq!(edit["default-operation"], "none");
        assert_eq!(edit["config"], config);
    }

    #[test]
    fn test_parse_data_reply() {
        let schema = schema();
        let builder = MessageBuilder::new(&schema, EncodingFormat::Xml);
        let reply = r#"<rpc-reply message-id="4" xmlns="urn:ietf:params:xml:ns:netconf:base:1.0">
            <data><system xmlns="urn:example:system"><hostname>r1</hostname></system></data>
        </rpc-reply>"#;
        let tree = builder.parse_reply(reply, 4, Expect::Data).unwrap();
        assert_eq!(tree, json!({"example-sys:system": {"hostname": "r1"}}));
    }

    #[test]
    fn test_parse_error_reply() {
        let schema = schema();
        let builder = MessageBuilder::new(&schema, EncodingFormat::Xml);
        let reply = error_reply(
            EncodingFormat::Xml,
            "5",
            &[RpcError::application("lock-denied", "lock held by session 12")],
        );
        let err = builder.parse_reply(&reply, 5, Expect::Ok).unwrap_err();
        assert_eq!(err.rpc_errors()[0].error_message, "lock held by session 12");
        assert_eq!(err.rpc_errors()[0].error_tag, "lock-denied");
    }

    #[test]
    fn test_warnings_do_not_fail() {
        let schema = schema();
        let builder = MessageBuilder::new(&schema, EncodingFormat::Json);
        let mut warning = RpcError::application("partial-operation", "slow commit");
        warning.error_severity = "warning".to_string();
        let reply = json_reply(
            "6",
            [
                (
                    "rpc-error".to_string(),
                    Value::Array(vec![serde_json::to_value(&warning).unwrap()]),
                ),
                ("ok".to_string(), json!([null])),
            ],
        );
        assert_eq!(
            builder.parse_reply(&reply, 6, Expect::Ok).unwrap(),
            json!({})
        );
    }

    #[test]
    fn test_message_id_mismatch_is_malformed() {
        let schema = schema();
        let builder = MessageBuilder::new(&schema, EncodingFormat::Xml);
        let reply = format!("{}<ok/></rpc-reply>", reply_open("8"));
        let err = builder.parse_reply(&reply, 7, Expect::Ok).unwrap_err();
        assert!(matches!(
            err,
            NetconfError::Protocol {
                failure: crate::error::ProtocolFailure::Malformed(_),
                ..
            }
        ));
    }

    #[test]
    fn test_parse_rpc_output() {
        let schema = schema();
        let builder = MessageBuilder::new(&schema, EncodingFormat::Xml);
        let reply = format!(
            "{}<eta xmlns=\"urn:example:system\">30</eta></rpc-reply>",
            reply_open("2")
        );
        let output = builder
            .parse_reply(&reply, 2, Expect::Output(schema.rpc("example-sys:reboot").unwrap()))
            .unwrap();
        assert_eq!(output, json!({"eta": 30}));
    }

    #[test]
    fn test_empty_reply_for_edit_is_success() {
        let schema = schema();
        let builder = MessageBuilder::new(&schema, EncodingFormat::Xml);
        assert_eq!(builder.parse_reply("", 1, Expect::Ok).unwrap(), json!({}));
        assert!(builder.parse_reply("", 1, Expect::Data).is_err());
    }
}
