//! In-memory NETCONF datastore operations
//!
//! Applies `<edit-config>` trees with RFC 6241 operation semantics and
//! evaluates subtree filters. Trees are RFC 7951 JSON values; list entries
//! are matched by the keys the schema declares.

use serde_json::{Map, Value};

use crate::error::RpcError;
use crate::operation::EditOperation;
use crate::schema::{
    NodeKind, OPERATION_ANNOTATION, SchemaNode, SchemaRoot, child_path, path_module,
};
use crate::types::{is_empty_value, to_text};

type EditResult<T> = std::result::Result<T, RpcError>;

/// Applies edits to datastore trees
#[derive(Debug, Clone, Copy)]
pub struct Editor<'a> {
    schema: &'a SchemaRoot,
    /// Reject nodes that are not configuration
    config_only: bool,
}

impl<'a> Editor<'a> {
    /// Editor for `<edit-config>`
    pub fn new(schema: &'a SchemaRoot) -> Self {
        Self {
            schema,
            config_only: true,
        }
    }

    /// Editor that also accepts state data, used to overlay state on config
    pub fn for_state(schema: &'a SchemaRoot) -> Self {
        Self {
            schema,
            config_only: false,
        }
    }

    /// Apply `edit` to a copy of `target`
    ///
    /// The original is left untouched on error, so a failed edit changes
    /// nothing.
    pub fn apply(&self, target: &Value, edit: &Value, default: EditOperation) -> EditResult<Value> {
        let mut result = target.clone();
        let Value::Object(result_map) = &mut result else {
            return Err(RpcError::application("operation-failed", "datastore is not a tree"));
        };
        let edit_map = edit.as_object().ok_or_else(|| {
            RpcError::application("malformed-message", "<config> must hold a data tree")
        })?;
        self.edit_members(None, result_map, edit_map, default)?;
        Ok(result)
    }

    fn edit_members(
        &self,
        parent: Option<&str>,
        target: &mut Map<String, Value>,
        edit: &Map<String, Value>,
        inherited: EditOperation,
    ) -> EditResult<()> {
        for (key, value) in edit {
            if key.starts_with('@') {
                continue;
            }
            let path = member_path(parent, key);
            let node = self.schema.node(&path).ok_or_else(|| {
                RpcError::application("unknown-element", format!("no data node {}", path))
                    .with_path(path.clone())
            })?;
            if self.config_only && !node.config {
                return Err(RpcError::application(
                    "invalid-value",
                    format!("{} is not configuration", path),
                )
                .with_path(path));
            }
            let member = local_key(parent, key);
            let op = match value {
                Value::Object(map) => annotation(map.get("@")),
                _ => annotation(edit.get(&format!("@{}", key))),
            }?
            .unwrap_or(inherited);

            match node.kind {
                NodeKind::Container => self.edit_container(&path, target, member, value, op)?,
                NodeKind::List => self.edit_list(node, target, member, value, op)?,
                NodeKind::Leaf => edit_leaf(&path, target, member, value, op)?,
                NodeKind::LeafList => edit_leaf_list(&path, target, member, value, op)?,
            }
        }
        Ok(())
    }

    fn edit_container(
        &self,
        path: &str,
        target: &mut Map<String, Value>,
        member: String,
        value: &Value,
        op: EditOperation,
    ) -> EditResult<()> {
        let edit = value.as_object().ok_or_else(|| {
            RpcError::application("invalid-value", format!("{} must be a container", path))
                .with_path(path)
        })?;
        match op {
            EditOperation::Delete | EditOperation::Remove => {
                if target.remove(&member).is_none() && op == EditOperation::Delete {
                    return Err(data_missing(path));
                }
            }
            EditOperation::Create if target.contains_key(&member) => {
                return Err(data_exists(path));
            }
            EditOperation::Create | EditOperation::Replace => {
                let mut fresh = Map::new();
                self.edit_members(Some(path), &mut fresh, edit, EditOperation::Merge)?;
                target.insert(member, Value::Object(fresh));
            }
            EditOperation::Merge | EditOperation::None => {
                let existed = target.contains_key(&member);
                let mut current = match target.remove(&member) {
                    Some(Value::Object(map)) => map,
                    _ => Map::new(),
                };
                self.edit_members(Some(path), &mut current, edit, op)?;
                if existed || op == EditOperation::Merge || !current.is_empty() {
                    target.insert(member, Value::Object(current));
                }
            }
        }
        Ok(())
    }

    fn edit_list(
        &self,
        node: &SchemaNode,
        target: &mut Map<String, Value>,
        member: String,
        value: &Value,
        op: EditOperation,
    ) -> EditResult<()> {
        let path = node.path.as_str();
        let entries = value.as_array().ok_or_else(|| {
            RpcError::application("invalid-value", format!("{} must be a list", path))
                .with_path(path)
        })?;

        let mut existing = match target.remove(&member) {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        };
        for entry in entries {
            let edit = entry.as_object().ok_or_else(|| {
                RpcError::application(
                    "invalid-value",
                    format!("entry of {} is not an object", path),
                )
                .with_path(path)
            })?;
            let entry_op = annotation(edit.get("@"))?.unwrap_or(op);
            let position = existing
                .iter()
                .position(|e| e.as_object().is_some_and(|e| same_entry(&node.keys, e, edit)));
            let entry_path = format!("{}{}", path, key_predicate(&node.keys, edit));

            match (entry_op, position) {
                (EditOperation::Delete, None) => return Err(data_missing(&entry_path)),
                (EditOperation::Delete | EditOperation::Remove, Some(i)) => {
                    existing.remove(i);
                }
                (EditOperation::Remove, None) => {}
                (EditOperation::Create, Some(_)) => return Err(data_exists(&entry_path)),
                (EditOperation::Create | EditOperation::Replace, _) => {
                    let mut fresh = Map::new();
                    self.edit_members(Some(path), &mut fresh, edit, EditOperation::Merge)?;
                    match position {
                        Some(i) => existing[i] = Value::Object(fresh),
                        None => existing.push(Value::Object(fresh)),
                    }
                }
                (EditOperation::Merge | EditOperation::None, Some(i)) => {
                    if let Value::Object(current) = &mut existing[i] {
                        self.edit_members(Some(path), current, edit, entry_op)?;
                    }
                }
                (EditOperation::Merge | EditOperation::None, None) => {
                    let mut fresh: Map<String, Value> = node
                        .keys
                        .iter()
                        .filter_map(|k| edit.get(k).map(|v| (k.clone(), v.clone())))
                        .collect();
                    self.edit_members(Some(path), &mut fresh, edit, entry_op)?;
                    if entry_op == EditOperation::Merge || fresh.len() > node.keys.len() {
                        existing.push(Value::Object(fresh));
                    }
                }
            }
        }

        if !existing.is_empty() {
            target.insert(member, Value::Array(existing));
        }
        Ok(())
    }
}

fn edit_leaf(
    path: &str,
    target: &mut Map<String, Value>,
    member: String,
    value: &Value,
    op: EditOperation,
) -> EditResult<()> {
    match op {
        EditOperation::Delete | EditOperation::Remove => {
            if target.remove(&member).is_none() && op == EditOperation::Delete {
                return Err(data_missing(path));
            }
        }
        EditOperation::Create if target.contains_key(&member) => return Err(data_exists(path)),
        EditOperation::None => {}
        EditOperation::Create | EditOperation::Replace | EditOperation::Merge => {
            if value.is_null() {
                return Err(RpcError::application(
                    "missing-element",
                    format!("{} has no value", path),
                )
                .with_path(path));
            }
            target.insert(member, value.clone());
        }
    }
    Ok(())
}

fn edit_leaf_list(
    path: &str,
    target: &mut Map<String, Value>,
    member: String,
    value: &Value,
    op: EditOperation,
) -> EditResult<()> {
    let items: Vec<Value> = match value {
        Value::Array(items) => items.clone(),
        Value::Null => Vec::new(),
        other => vec![other.clone()],
    };
    let mut current = match target.remove(&member) {
        Some(Value::Array(existing)) => existing,
        _ => Vec::new(),
    };

    match op {
        EditOperation::Delete | EditOperation::Remove => {
            if items.is_empty() {
                if current.is_empty() && op == EditOperation::Delete {
                    return Err(data_missing(path));
                }
                current.clear();
            }
            for item in &items {
                match current.iter().position(|c| c == item) {
                    Some(i) => {
                        current.remove(i);
                    }
                    None if op == EditOperation::Delete => return Err(data_missing(path)),
                    None => {}
                }
            }
        }
        EditOperation::Replace => current = items,
        EditOperation::Create | EditOperation::Merge => {
            for item in items {
                if current.contains(&item) {
                    if op == EditOperation::Create {
                        return Err(data_exists(path));
                    }
                } else {
                    current.push(item);
                }
            }
        }
        EditOperation::None => {}
    }

    if !current.is_empty() {
        target.insert(member, Value::Array(current));
    }
    Ok(())
}

/// Evaluate a subtree filter against a data tree
///
/// An empty filter selects nothing; callers send no filter to read the
/// whole tree.
pub fn select(schema: &SchemaRoot, data: &Value, filter: &Value) -> Value {
    match (data.as_object(), filter.as_object()) {
        (Some(data), Some(filter)) => Value::Object(
            filter_object(schema, None, data, filter).unwrap_or_default(),
        ),
        _ => Value::Object(Map::new()),
    }
}

/// Filter one object; `None` when a content match fails
fn filter_object(
    schema: &SchemaRoot,
    parent: Option<&str>,
    data: &Map<String, Value>,
    filter: &Map<String, Value>,
) -> Option<Map<String, Value>> {
    let mut result = Map::new();
    let mut has_selection = false;

    for (key, selector) in filter {
        if key.starts_with('@') {
            continue;
        }
        let member = local_key(parent, key);
        if is_content_match(selector) {
            let value = data.get(&member)?;
            if to_text(value) != to_text(selector) {
                return None;
            }
            result.insert(member, value.clone());
        } else {
            has_selection = true;
        }
    }

    // Only content match nodes: the whole entry is selected
    if !has_selection {
        return Some(data.clone());
    }

    for (key, selector) in filter {
        if key.starts_with('@') || is_content_match(selector) {
            continue;
        }
        let member = local_key(parent, key);
        let Some(value) = data.get(&member) else {
            continue;
        };
        let path = member_path(parent, key);
        if let Some(selected) = filter_member(schema, &path, value, selector) {
            result.insert(member, selected);
        }
    }
    Some(result)
}

fn filter_member(
    schema: &SchemaRoot,
    path: &str,
    value: &Value,
    selector: &Value,
) -> Option<Value> {
    if is_empty_value(selector) {
        return Some(value.clone());
    }
    match (value, selector) {
        (Value::Object(data), Value::Object(sub)) => {
            if sub.keys().all(|k| k.starts_with('@')) {
                return Some(value.clone());
            }
            filter_object(schema, Some(path), data, sub).map(Value::Object)
        }
        (Value::Array(entries), Value::Array(selectors)) => {
            let mut selected = Vec::new();
            for entry in entries {
                let Some(entry_map) = entry.as_object() else {
                    // leaf-list: keep the values the filter names
                    if selectors.contains(entry) {
                        selected.push(entry.clone());
                    }
                    continue;
                };
                for selector in selectors.iter().filter_map(Value::as_object) {
                    let picked = if selector.keys().all(|k| k.starts_with('@')) {
                        Some(entry_map.clone())
                    } else {
                        filter_object(schema, Some(path), entry_map, selector)
                    };
                    if let Some(picked) = picked {
                        selected.push(Value::Object(picked));
                        break;
                    }
                }
            }
            (!selected.is_empty()).then_some(Value::Array(selected))
        }
        // a single entry selector for a list
        (Value::Array(_), Value::Object(_)) => {
            filter_member(schema, path, value, &Value::Array(vec![selector.clone()]))
        }
        _ => None,
    }
}

fn is_content_match(selector: &Value) -> bool {
    matches!(selector, Value::String(_) | Value::Number(_) | Value::Bool(_))
}

fn annotation(meta: Option<&Value>) -> EditResult<Option<EditOperation>> {
    let Some(op) = meta.and_then(|m| m.get(OPERATION_ANNOTATION)) else {
        return Ok(None);
    };
    op.as_str()
        .and_then(|s| s.parse::<EditOperation>().ok())
        .map(Some)
        .ok_or_else(|| {
            RpcError::application("bad-attribute", format!("invalid operation {}", op))
        })
}

fn member_path(parent: Option<&str>, key: &str) -> String {
    match parent {
        Some(parent) => child_path(parent, key),
        None => format!("/{}", key),
    }
}

/// Key a member is stored under: unqualified below its own module
fn local_key(parent: Option<&str>, key: &str) -> String {
    match (parent.and_then(path_module), key.split_once(':')) {
        (Some(parent_module), Some((module, name))) if parent_module == module => name.to_string(),
        _ => key.to_string(),
    }
}

fn same_entry(keys: &[String], existing: &Map<String, Value>, edit: &Map<String, Value>) -> bool {
    !keys.is_empty()
        && keys.iter().all(|k| match (existing.get(k), edit.get(k)) {
            (Some(a), Some(b)) => to_text(a) == to_text(b),
            _ => false,
        })
}

fn key_predicate(keys: &[String], entry: &Map<String, Value>) -> String {
    keys.iter()
        .map(|k| {
            let value = entry.get(k).map(to_text).unwrap_or_default();
            format!("[{}='{}']", k, value)
        })
        .collect()
}

fn data_missing(path: &str) -> RpcError {
    RpcError::application("data-missing", format!("{} does not exist", path)).with_path(path)
}

fn data_exists(path: &str) -> RpcError {
    RpcError::application("data-exists", format!("{} already exists", path)).with_path(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::Capabilities;
    use crate::schema::Repository;
    use serde_json::json;

    const MODULE: &str = r#"{
        "module-name": "example-if",
        "namespace": "urn:example:interfaces",
        "node": [
            {"path": "/example-if:interfaces", "kind": "container"},
            {"path": "/example-if:interfaces/interface", "kind": "list", "key": ["name"]},
            {"path": "/example-if:interfaces/interface/name", "kind": "leaf", "type": "string"},
            {"path": "/example-if:interfaces/interface/mtu", "kind": "leaf", "type": "uint16"},
            {"path": "/example-if:interfaces/interface/enabled", "kind": "leaf", "type": "boolean"},
            {"path": "/example-if:dns", "kind": "container"},
            {"path": "/example-if:dns/server", "kind": "leaf-list", "type": "string"},
            {"path": "/example-if:counters", "kind": "container", "config": false},
            {"path": "/example-if:counters/drops", "kind": "leaf", "type": "uint32"}
        ]
    }"#;

    fn schema() -> SchemaRoot {
        Repository::new()
            .with_module_str(MODULE)
            .unwrap()
            .root_schema(&Capabilities::default())
            .unwrap()
    }

    fn running() -> Value {
        json!({"example-if:interfaces": {"interface": [
            {"name": "eth0", "mtu": 1500, "enabled": true},
            {"name": "eth1", "mtu": 9000}
        ]}})
    }

    #[test]
    fn test_merge_updates_entry() {
        let schema = schema();
        let edit = json!({"example-if:interfaces": {"interface": [{"name": "eth1", "enabled": false}]}});
        let result = Editor::new(&schema)
            .apply(&running(), &edit, EditOperation::Merge)
            .unwrap();
        assert_eq!(
            result["example-if:interfaces"]["interface"][1],
            json!({"name": "eth1", "mtu": 9000, "enabled": false})
        );
    }

    #[test]
    fn test_replace_drops_unlisted_children() {
        let schema = schema();
        let edit = json!({"example-if:interfaces": {"interface": [
            {"name": "eth0", "mtu": 1400, "@": {"ietf-netconf:operation": "replace"}}
        ]}});
        let result = Editor::new(&schema)
            .apply(&running(), &edit, EditOperation::Merge)
            .unwrap();
        assert_eq!(
            result["example-if:interfaces"]["interface"][0],
            json!({"name": "eth0", "mtu": 1400})
        );
    }

    #[test]
    fn test_create_existing_entry_fails() {
        let schema = schema();
        let edit = json!({"example-if:interfaces": {"interface": [{"name": "eth0"}]}});
        let err = Editor::new(&schema)
            .apply(&running(), &edit, EditOperation::Create)
            .unwrap_err();
        // create propagates to the container, which already exists
        assert_eq!(err.error_tag, "data-exists");
    }

    #[test]
    fn test_delete_missing_fails_remove_does_not() {
        let schema = schema();
        let edit = json!({"example-if:interfaces": {"interface": [
            {"name": "eth7", "@": {"ietf-netconf:operation": "delete"}}
        ]}});
        let err = Editor::new(&schema)
            .apply(&running(), &edit, EditOperation::Merge)
            .unwrap_err();
        assert_eq!(err.error_tag, "data-missing");
        assert_eq!(
            err.error_path.as_deref(),
            Some("/example-if:interfaces/interface[name='eth7']")
        );

        let edit = json!({"example-if:interfaces": {"interface": [
            {"name": "eth7", "@": {"ietf-netconf:operation": "remove"}}
        ]}});
        let result = Editor::new(&schema)
            .apply(&running(), &edit, EditOperation::Merge)
            .unwrap();
        assert_eq!(result, running());
    }

    #[test]
    fn test_delete_leaf() {
        let schema = schema();
        let edit = json!({"example-if:interfaces": {"interface": [
            {"name": "eth0", "mtu": null, "@mtu": {"ietf-netconf:operation": "delete"}}
        ]}});
        let result = Editor::new(&schema)
            .apply(&running(), &edit, EditOperation::Merge)
            .unwrap();
        assert_eq!(
            result["example-if:interfaces"]["interface"][0],
            json!({"name": "eth0", "enabled": true})
        );
    }

    #[test]
    fn test_none_leaves_untouched_values() {
        let schema = schema();
        let edit = json!({"example-if:interfaces": {"interface": [
            {"name": "eth0", "mtu": 1280},
            {"name": "eth1", "mtu": 1280, "@mtu": {"ietf-netconf:operation": "merge"}}
        ]}});
        let result = Editor::new(&schema)
            .apply(&running(), &edit, EditOperation::None)
            .unwrap();
        assert_eq!(result["example-if:interfaces"]["interface"][0]["mtu"], 1500);
        assert_eq!(result["example-if:interfaces"]["interface"][1]["mtu"], 1280);
    }

    #[test]
    fn test_leaf_list_merge_and_delete() {
        let schema = schema();
        let start = json!({"example-if:dns": {"server": ["10.0.0.1"]}});
        let editor = Editor::new(&schema);
        let added = json!({"example-if:dns": {"server": ["10.0.0.2"]}});
        let merged = editor.apply(&start, &added, EditOperation::Merge).unwrap();
        assert_eq!(merged["example-if:dns"]["server"], json!(["10.0.0.1", "10.0.0.2"]));

        let edit = json!({"example-if:dns": {"server": ["10.0.0.1"], "@server": {"ietf-netconf:operation": "delete"}}});
        let deleted = editor.apply(&merged, &edit, EditOperation::Merge).unwrap();
        assert_eq!(deleted["example-if:dns"]["server"], json!(["10.0.0.2"]));
    }

    #[test]
    fn test_state_is_rejected_by_config_editor() {
        let schema = schema();
        let state = json!({"example-if:counters": {"drops": 4}});
        let err = Editor::new(&schema)
            .apply(&json!({}), &state, EditOperation::Merge)
            .unwrap_err();
        assert_eq!(err.error_tag, "invalid-value");

        let merged = Editor::for_state(&schema)
            .apply(&running(), &state, EditOperation::Merge)
            .unwrap();
        assert_eq!(merged["example-if:counters"]["drops"], 4);
    }

    #[test]
    fn test_select_by_key_content_match() {
        let schema = schema();
        let filter = json!({"example-if:interfaces": {"interface": [{"name": "eth1"}]}});
        assert_eq!(
            select(&schema, &running(), &filter),
            json!({"example-if:interfaces": {"interface": [{"name": "eth1", "mtu": 9000}]}})
        );
    }

    #[test]
    fn test_select_leaf_of_every_entry() {
        let schema = schema();
        let filter = json!({"example-if:interfaces": {"interface": [{"name": null, "mtu": null}]}});
        assert_eq!(
            select(&schema, &running(), &filter),
            json!({"example-if:interfaces": {"interface": [
                {"name": "eth0", "mtu": 1500},
                {"name": "eth1", "mtu": 9000}
            ]}})
        );
    }

    #[test]
    fn test_select_missing_subtree() {
        let schema = schema();
        let filter = json!({"example-if:dns": {}});
        assert_eq!(select(&schema, &running(), &filter), json!({}));
    }
}
