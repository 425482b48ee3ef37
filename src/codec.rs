//! Data tree codec: RFC 7951 JSON trees to and from XML or JSON text
//!
//! Trees are `serde_json::Value` objects whose top-level members are
//! qualified "module:name". XML output declares each module's namespace on
//! the first element belonging to it. Edit annotations travel as RFC 7952
//! metadata in JSON and as `nc:operation` attributes in XML.

use serde_json::{Map, Value, json};
use std::collections::BTreeMap;

use crate::encoding::EncodingFormat;
use crate::error::{NetconfError, Result};
use crate::schema::{
    NETCONF_NAMESPACE, NodeKind, OPERATION_ANNOTATION, RpcSchema, SchemaRoot, TreeMode,
    child_path, operation_metadata, path_module,
};
use crate::types::{YangType, is_empty_value, to_text};
use crate::xml::{Element, escape};

/// Serialize a (validated) data tree
pub fn encode_data(schema: &SchemaRoot, tree: &Value, format: EncodingFormat) -> Result<String> {
    match format {
        EncodingFormat::Json => serde_json::to_string(tree)
            .map_err(|e| NetconfError::Validation(format!("cannot serialize tree: {}", e))),
        EncodingFormat::Xml => {
            let mut out = String::new();
            write_members(schema, tree, None, &mut out)?;
            Ok(out)
        }
    }
}

/// Parse serialized data into a tree validated in [`TreeMode::Data`]
pub fn decode_data(schema: &SchemaRoot, text: &str, format: EncodingFormat) -> Result<Value> {
    decode_data_with_mode(schema, text, format, TreeMode::Data)
}

pub(crate) fn decode_data_with_mode(
    schema: &SchemaRoot,
    text: &str,
    format: EncodingFormat,
    mode: TreeMode,
) -> Result<Value> {
    let tree = match format {
        EncodingFormat::Json => {
            if text.trim().is_empty() {
                Value::Object(Map::new())
            } else {
                serde_json::from_str(text).map_err(|e| NetconfError::malformed(e.to_string()))?
            }
        }
        EncodingFormat::Xml => {
            let wrapped = format!("<data>{}</data>", text);
            let root =
                Element::parse(&wrapped).map_err(|e| NetconfError::malformed(e.to_string()))?;
            elements_to_tree(schema, &root.children, mode)?
        }
    };
    schema.validate_tree(&tree, mode)?;
    Ok(tree)
}

/// Write the members of an object as XML elements
///
/// `parent_path` is the schema path of the enclosing element. Members in the
/// same module are written without a namespace declaration, and list keys
/// are written before the other members of an entry.
pub(crate) fn write_members(
    schema: &SchemaRoot,
    value: &Value,
    parent_path: Option<&str>,
    out: &mut String,
) -> Result<()> {
    let Some(map) = value.as_object() else {
        return Err(NetconfError::Validation(format!(
            "expected an object, found {}",
            value
        )));
    };

    let parent_module = parent_path.and_then(path_module);
    let keys: &[String] = parent_path
        .and_then(|p| schema.node(p))
        .filter(|n| n.kind == NodeKind::List)
        .map(|n| n.keys.as_slice())
        .unwrap_or(&[]);
    let ordered = keys
        .iter()
        .filter_map(|k| map.get_key_value(k.as_str()))
        .chain(map.iter().filter(|(k, _)| !keys.contains(*k)));

    for (key, member) in ordered {
        if key.starts_with('@') {
            continue;
        }
        let leaf_meta = map.get(&format!("@{}", key));
        let (module, name) = match key.split_once(':') {
            Some((module, name)) => (Some(module), name),
            None => (parent_module, key.as_str()),
        };
        let namespace = match module {
            Some(m) if Some(m) != parent_module => Some(schema.namespace(m).ok_or_else(|| {
                NetconfError::Validation(format!("unknown module '{}' in '{}'", m, key))
            })?),
            _ => None,
        };
        let path = match parent_path {
            Some(parent) => child_path(parent, key),
            None => format!("/{}", key),
        };
        let element = XmlNode {
            name,
            namespace,
            path: &path,
            leaf_meta,
        };

        match member {
            Value::Array(items) if !is_empty_value(member) => {
                for item in items {
                    write_element(schema, &element, item, out)?;
                }
            }
            _ => write_element(schema, &element, member, out)?,
        }
    }
    Ok(())
}

struct XmlNode<'a> {
    name: &'a str,
    namespace: Option<&'a str>,
    path: &'a str,
    leaf_meta: Option<&'a Value>,
}

fn write_element(
    schema: &SchemaRoot,
    element: &XmlNode<'_>,
    value: &Value,
    out: &mut String,
) -> Result<()> {
    out.push('<');
    out.push_str(element.name);
    if let Some(ns) = element.namespace {
        out.push_str(&format!(" xmlns=\"{}\"", escape(ns)));
    }

    let meta = match value {
        Value::Object(map) => map.get("@"),
        _ => element.leaf_meta,
    };
    if let Some(op) = meta
        .and_then(|m| m.get(OPERATION_ANNOTATION))
        .and_then(Value::as_str)
    {
        out.push_str(&format!(
            " xmlns:nc=\"{}\" nc:operation=\"{}\"",
            NETCONF_NAMESPACE,
            escape(op)
        ));
    }

    match value {
        Value::Object(_) => {
            out.push('>');
            write_members(schema, value, Some(element.path), out)?;
        }
        v if is_empty_value(v) => {
            out.push_str("/>");
            return Ok(());
        }
        scalar => {
            out.push('>');
            out.push_str(&escape(&to_text(scalar)));
        }
    }
    out.push_str("</");
    out.push_str(element.name);
    out.push('>');
    Ok(())
}

/// Convert top-level data elements into a tree
pub(crate) fn elements_to_tree(
    schema: &SchemaRoot,
    elements: &[Element],
    mode: TreeMode,
) -> Result<Value> {
    let mut map = Map::new();
    for element in elements {
        let namespace = element.namespace.as_deref().ok_or_else(|| {
            NetconfError::Validation(format!("element <{}> has no namespace", element.name))
        })?;
        let module = schema.module_for_namespace(namespace).ok_or_else(|| {
            NetconfError::Validation(format!("namespace '{}' is not in the schema", namespace))
        })?;
        let key = format!("{}:{}", module, element.name);
        let path = format!("/{}", key);
        insert_element(schema, &mut map, key, &path, element, mode)?;
    }
    Ok(Value::Object(map))
}

fn insert_element(
    schema: &SchemaRoot,
    map: &mut Map<String, Value>,
    key: String,
    path: &str,
    element: &Element,
    mode: TreeMode,
) -> Result<()> {
    let node = schema
        .node(path)
        .ok_or_else(|| NetconfError::Validation(format!("unknown data node '{}'", path)))?;
    let meta = element.attribute("operation").map(operation_metadata);

    match node.kind {
        NodeKind::Container | NodeKind::List => {
            let mut children = Map::new();
            for child in &element.children {
                let child_key = member_key(schema, path, child);
                let member_path = child_path(path, &child_key);
                insert_element(schema, &mut children, child_key, &member_path, child, mode)?;
            }
            if let Some(meta) = meta {
                children.insert("@".to_string(), meta);
            }
            if node.kind == NodeKind::Container {
                map.insert(key, Value::Object(children));
            } else {
                push_item(map, key, Value::Object(children), path)?;
            }
        }
        NodeKind::Leaf | NodeKind::LeafList => {
            let yang_type = node.yang_type.as_ref().ok_or_else(|| {
                NetconfError::Validation(format!("leaf '{}' has no type", path))
            })?;
            let value = leaf_value(yang_type, &element.text, mode)?;
            if let Some(meta) = meta {
                map.insert(format!("@{}", key), meta);
            }
            if node.kind == NodeKind::Leaf {
                map.insert(key, value);
            } else {
                push_item(map, key, value, path)?;
            }
        }
    }
    Ok(())
}

fn leaf_value(yang_type: &YangType, text: &str, mode: TreeMode) -> Result<Value> {
    // Empty leaves select (filters) or name a deletion target (edits)
    if text.is_empty() && mode != TreeMode::Data && *yang_type != YangType::Empty {
        return Ok(Value::Null);
    }
    yang_type.from_text(text)
}

fn push_item(map: &mut Map<String, Value>, key: String, item: Value, path: &str) -> Result<()> {
    match map.entry(key).or_insert_with(|| Value::Array(Vec::new())) {
        Value::Array(items) => {
            items.push(item);
            Ok(())
        }
        _ => Err(NetconfError::Validation(format!(
            "'{}' appears as both a single node and a list",
            path
        ))),
    }
}

/// Member name of a child element: qualified only when it changes module
fn member_key(schema: &SchemaRoot, parent_path: &str, child: &Element) -> String {
    let child_module = child
        .namespace
        .as_deref()
        .and_then(|ns| schema.module_for_namespace(ns));
    match child_module {
        Some(module) if Some(module) != path_module(parent_path) => {
            format!("{}:{}", module, child.name)
        }
        _ => child.name.clone(),
    }
}

/// Convert RPC output elements, using declared output types when present
pub(crate) fn rpc_output_to_tree(rpc: Option<&RpcSchema>, elements: &[Element]) -> Result<Value> {
    typed_members(rpc.and_then(|r| r.output.as_ref()), elements)
}

/// Convert RPC input elements, using declared input types when present
pub(crate) fn rpc_input_to_tree(rpc: Option<&RpcSchema>, elements: &[Element]) -> Result<Value> {
    typed_members(rpc.and_then(|r| r.input.as_ref()), elements)
}

fn typed_members(
    typed: Option<&BTreeMap<String, YangType>>,
    elements: &[Element],
) -> Result<Value> {
    let mut map = Map::new();
    for element in elements {
        let value = match typed.and_then(|t| t.get(&element.name)) {
            Some(yang_type) if element.children.is_empty() => yang_type.from_text(&element.text)?,
            _ => opaque_value(element),
        };
        insert_opaque(&mut map, element.name.clone(), value);
    }
    Ok(Value::Object(map))
}

/// Schema-less conversion: nested elements become objects, repeats arrays
pub(crate) fn opaque_value(element: &Element) -> Value {
    if element.children.is_empty() {
        if element.text.is_empty() {
            return json!([null]);
        }
        return Value::String(element.text.clone());
    }
    let mut map = Map::new();
    for child in &element.children {
        insert_opaque(&mut map, child.name.clone(), opaque_value(child));
    }
    Value::Object(map)
}

fn insert_opaque(map: &mut Map<String, Value>, key: String, value: Value) {
    match map.get_mut(&key) {
        Some(Value::Array(items)) if !items.iter().all(Value::is_null) => items.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, value]);
        }
        None => {
            map.insert(key, value);
        }
    }
}

/// Check RPC input against declared input leaves
pub(crate) fn validate_rpc_input(rpc: &RpcSchema, input: &Value) -> Result<()> {
    let Some(declared) = &rpc.input else {
        return Ok(());
    };
    let map = input.as_object().ok_or_else(|| {
        NetconfError::Validation(format!("input of '{}' must be an object", rpc.name))
    })?;
    for (name, value) in map {
        let yang_type = declared.get(name).ok_or_else(|| {
            NetconfError::Validation(format!("'{}' is not an input of '{}'", name, rpc.name))
        })?;
        yang_type.validate(value).map_err(|e| match e {
            NetconfError::Validation(d) => {
                NetconfError::Validation(format!("input '{}' of '{}': {}", name, rpc.name, d))
            }
            other => other,
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::Capabilities;
    use crate::schema::Repository;
    use crate::xml::Element;

    const MODULE: &str = r#"{
        "module-name": "example-if",
        "namespace": "urn:example:interfaces",
        "node": [
            {"path": "/example-if:interfaces", "kind": "container"},
            {"path": "/example-if:interfaces/interface", "kind": "list", "key": ["name"]},
            {"path": "/example-if:interfaces/interface/name", "kind": "leaf", "type": "string"},
            {"path": "/example-if:interfaces/interface/enabled", "kind": "leaf", "type": "boolean"},
            {"path": "/example-if:interfaces/interface/mtu", "kind": "leaf", "type": "uint16"},
            {"path": "/example-if:interfaces/interface/tag", "kind": "leaf-list", "type": "string"},
            {"path": "/example-if:interfaces/interface/loopback", "kind": "leaf", "type": "empty"}
        ],
        "rpc": [{"name": "reset", "input": {"name": "string"}, "output": {"cleared": "uint32"}}]
    }"#;

    fn schema() -> SchemaRoot {
        Repository::new()
            .with_module_str(MODULE)
            .unwrap()
            .root_schema(&Capabilities::default())
            .unwrap()
    }

    fn sample() -> Value {
        json!({"example-if:interfaces": {"interface": [
            {"name": "eth0", "enabled": true, "mtu": 1500, "tag": ["uplink", "core"]},
            {"name": "lo", "loopback": [null]}
        ]}})
    }

    #[test]
    fn test_encode_xml() {
        let xml = encode_data(&schema(), &sample(), EncodingFormat::Xml).unwrap();
        assert!(xml.starts_with(
            r#"<interfaces xmlns="urn:example:interfaces"><interface><name>eth0</name>"#
        ));
        assert!(xml.contains("<tag>uplink</tag><tag>core</tag>"));
        assert!(xml.contains("<loopback/>"));
    }

    #[test]
    fn test_xml_roundtrip() {
        let schema = schema();
        let xml = schema
            .validate_and_serialize(&sample(), EncodingFormat::Xml, TreeMode::Config)
            .unwrap();
        assert_eq!(schema.parse(&xml, EncodingFormat::Xml).unwrap(), sample());
    }

    #[test]
    fn test_xml_roundtrip_keeps_padded_strings() {
        let schema = schema();
        let tree = json!({"example-if:interfaces": {"interface": [
            {"name": "  banner text  ", "tag": [" a", "b "]}
        ]}});
        let xml = schema
            .validate_and_serialize(&tree, EncodingFormat::Xml, TreeMode::Config)
            .unwrap();
        assert_eq!(schema.parse(&xml, EncodingFormat::Xml).unwrap(), tree);
    }

    #[test]
    fn test_json_roundtrip() {
        let schema = schema();
        let text = schema
            .validate_and_serialize(&sample(), EncodingFormat::Json, TreeMode::Config)
            .unwrap();
        assert_eq!(schema.parse(&text, EncodingFormat::Json).unwrap(), sample());
    }

    #[test]
    fn test_annotation_becomes_attribute() {
        let tree = json!({"example-if:interfaces": {
            "@": {"ietf-netconf:operation": "replace"},
            "interface": [{"name": "eth0", "mtu": 9000, "@mtu": {"ietf-netconf:operation": "merge"}}]
        }});
        let xml = encode_data(&schema(), &tree, EncodingFormat::Xml).unwrap();
        assert!(xml.starts_with(
            r#"<interfaces xmlns="urn:example:interfaces" xmlns:nc="urn:ietf:params:xml:ns:netconf:base:1.0" nc:operation="replace">"#
        ));
        assert!(xml.contains(r#"nc:operation="merge">9000</mtu>"#));

        let back =
            decode_data_with_mode(&schema(), &xml, EncodingFormat::Xml, TreeMode::Config).unwrap();
        assert_eq!(back, tree);
    }

    #[test]
    fn test_decode_rejects_unknown_nodes() {
        let xml = r#"<interfaces xmlns="urn:example:interfaces"><bogus>1</bogus></interfaces>"#;
        let err = schema().parse(xml, EncodingFormat::Xml).unwrap_err();
        assert!(matches!(err, NetconfError::Validation(_)));
    }

    #[test]
    fn test_decode_garbage_is_malformed() {
        let err = schema().parse("{not json", EncodingFormat::Json).unwrap_err();
        assert!(matches!(err, NetconfError::Protocol { .. }));
    }

    #[test]
    fn test_filter_mode_keeps_selection_leaves() {
        let xml = r#"<interfaces xmlns="urn:example:interfaces"><interface><name>eth0</name><mtu/></interface></interfaces>"#;
        let tree =
            decode_data_with_mode(&schema(), xml, EncodingFormat::Xml, TreeMode::Filter).unwrap();
        assert_eq!(
            tree,
            json!({"example-if:interfaces": {"interface": [{"name": "eth0", "mtu": null}]}})
        );
    }

    #[test]
    fn test_rpc_output_typed_and_opaque() {
        let schema = schema();
        let reply = Element::parse(
            "<rpc-reply><cleared>12</cleared><note>done</note><note>again</note></rpc-reply>",
        )
        .unwrap();
        let output = rpc_output_to_tree(schema.rpc("example-if:reset"), &reply.children).unwrap();
        assert_eq!(output, json!({"cleared": 12, "note": ["done", "again"]}));
    }

    #[test]
    fn test_validate_rpc_input() {
        let schema = schema();
        let rpc = schema.rpc("example-if:reset").unwrap();
        assert!(validate_rpc_input(rpc, &json!({"name": "eth0"})).is_ok());
        assert!(validate_rpc_input(rpc, &json!({"name": 5})).is_err());
        assert!(validate_rpc_input(rpc, &json!({"force": true})).is_err());
    }
}
