//! YANG leaf types: validation and XML text conversions

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use serde_json::Value;
use std::collections::HashMap;

use crate::error::{NetconfError, Result};

/// Represents YANG data types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum YangType {
    String,
    Int8,
    Int16,
    Int32,
    Int64,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Decimal64,
    Binary,
    Boolean,
    Empty,
    Identityref,
    Leafref,
    InstanceIdentifier,
    Bits,
    Uri,
    /// Enumeration with name-to-value mapping
    Enumeration(HashMap<String, i64>),
    /// Union of multiple types
    Union(Vec<YangType>),
    /// Unknown/unrecognized type
    Unknown(String),
}

impl YangType {
    /// Parse a YANG type from a schema file `type` field
    pub fn from_schema_type(type_value: &Value) -> Self {
        match type_value {
            Value::String(s) => Self::from_name(s),
            Value::Object(map) => {
                // Enumeration: {"value": "name", ...}
                let enum_map: HashMap<String, i64> = map
                    .iter()
                    .filter_map(|(k, v)| {
                        v.as_str()
                            .map(|name| (name.to_string(), k.parse().unwrap_or(0)))
                    })
                    .collect();
                YangType::Enumeration(enum_map)
            }
            Value::Array(arr) => {
                let types: Vec<YangType> = arr.iter().map(Self::from_schema_type).collect();
                YangType::Union(types)
            }
            _ => YangType::Unknown("invalid".to_string()),
        }
    }

    pub fn from_name(s: &str) -> Self {
        match s {
            "string" => YangType::String,
            "int8" => YangType::Int8,
            "int16" => YangType::Int16,
            "int32" => YangType::Int32,
            "int64" => YangType::Int64,
            "uint8" => YangType::Uint8,
            "uint16" => YangType::Uint16,
            "uint32" => YangType::Uint32,
            "uint64" => YangType::Uint64,
            "decimal64" => YangType::Decimal64,
            "binary" => YangType::Binary,
            "boolean" => YangType::Boolean,
            "empty" => YangType::Empty,
            "identityref" => YangType::Identityref,
            "leafref" => YangType::Leafref,
            "instance-identifier" => YangType::InstanceIdentifier,
            "bits" => YangType::Bits,
            "inet:uri" => YangType::Uri,
            other => YangType::Unknown(other.to_string()),
        }
    }

    /// Check that a JSON leaf value conforms to this type
    pub fn validate(&self, value: &Value) -> Result<()> {
        match self {
            YangType::String
            | YangType::Uri
            | YangType::Identityref
            | YangType::Leafref
            | YangType::InstanceIdentifier
            | YangType::Bits => match value {
                Value::String(_) => Ok(()),
                _ => Err(mismatch(value, self)),
            },

            YangType::Int8 => check_signed(value, i8::MIN as i64, i8::MAX as i64, self),
            YangType::Int16 => check_signed(value, i16::MIN as i64, i16::MAX as i64, self),
            YangType::Int32 => check_signed(value, i32::MIN as i64, i32::MAX as i64, self),
            YangType::Int64 => check_signed(value, i64::MIN, i64::MAX, self),
            YangType::Uint8 => check_unsigned(value, u8::MAX as u64, self),
            YangType::Uint16 => check_unsigned(value, u16::MAX as u64, self),
            YangType::Uint32 => check_unsigned(value, u32::MAX as u64, self),
            YangType::Uint64 => check_unsigned(value, u64::MAX, self),

            YangType::Decimal64 => match value {
                Value::Number(_) => Ok(()),
                Value::String(s) => check_decimal64(s),
                _ => Err(mismatch(value, self)),
            },

            YangType::Binary => {
                let s = value.as_str().ok_or_else(|| mismatch(value, self))?;
                BASE64.decode(s).map(|_| ()).map_err(|e| {
                    NetconfError::Validation(format!("invalid base64 binary: {}", e))
                })
            }

            YangType::Boolean => match value {
                Value::Bool(_) => Ok(()),
                _ => Err(mismatch(value, self)),
            },

            YangType::Empty => {
                if is_empty_value(value) {
                    Ok(())
                } else {
                    Err(mismatch(value, self))
                }
            }

            YangType::Enumeration(enum_map) => {
                let name = value.as_str().ok_or_else(|| mismatch(value, self))?;
                if enum_map.contains_key(name) {
                    Ok(())
                } else {
                    Err(NetconfError::Validation(format!(
                        "'{}' is not a valid enumeration value",
                        name
                    )))
                }
            }

            YangType::Union(types) => {
                if types.iter().any(|t| t.validate(value).is_ok()) {
                    Ok(())
                } else {
                    Err(mismatch(value, self))
                }
            }

            YangType::Unknown(_) => match value {
                Value::Object(_) => Err(mismatch(value, self)),
                _ => Ok(()),
            },
        }
    }

    /// Convert XML element text to its JSON leaf value
    pub fn from_text(&self, text: &str) -> Result<Value> {
        let value = match self {
            YangType::Int8 | YangType::Int16 | YangType::Int32 | YangType::Int64 => {
                let n: i64 = text.trim().parse().map_err(|_| {
                    NetconfError::Validation(format!("cannot parse '{}' as {:?}", text, self))
                })?;
                Value::Number(n.into())
            }

            YangType::Uint8 | YangType::Uint16 | YangType::Uint32 | YangType::Uint64 => {
                let n: u64 = text.trim().parse().map_err(|_| {
                    NetconfError::Validation(format!("cannot parse '{}' as {:?}", text, self))
                })?;
                Value::Number(n.into())
            }

            // RFC 7951 carries decimal64 as a string, kept digit for digit
            YangType::Decimal64 => Value::String(text.trim().to_string()),

            YangType::Boolean => match text.trim() {
                "true" => Value::Bool(true),
                "false" => Value::Bool(false),
                other => {
                    return Err(NetconfError::Validation(format!(
                        "cannot parse '{}' as boolean",
                        other
                    )));
                }
            },

            YangType::Empty => Value::Array(vec![Value::Null]),

            YangType::Union(types) => {
                // Try each type in order
                return types
                    .iter()
                    .find_map(|t| t.from_text(text).ok())
                    .ok_or_else(|| {
                        NetconfError::Validation(format!("'{}' matches no union member", text))
                    });
            }

            _ => Value::String(text.to_string()),
        };
        self.validate(&value)?;
        Ok(value)
    }
}

/// Render a JSON leaf value as XML element text
pub fn to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Null => String::new(),
        // [null] is the JSON form of the empty type
        Value::Array(_) if is_empty_value(value) => String::new(),
        other => other.to_string(),
    }
}

/// `null` or `[null]`
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Array(arr) => arr.len() == 1 && arr[0].is_null(),
        _ => false,
    }
}

fn mismatch(value: &Value, yang_type: &YangType) -> NetconfError {
    NetconfError::Validation(format!(
        "value {} does not match type {:?}",
        value, yang_type
    ))
}

fn check_signed(value: &Value, min: i64, max: i64, yang_type: &YangType) -> Result<()> {
    let n = value_to_i64(value)?;
    if n < min || n > max {
        return Err(NetconfError::Validation(format!(
            "{} out of range for {:?}",
            n, yang_type
        )));
    }
    Ok(())
}

fn check_unsigned(value: &Value, max: u64, yang_type: &YangType) -> Result<()> {
    let n = value_to_u64(value)?;
    if n > max {
        return Err(NetconfError::Validation(format!(
            "{} out of range for {:?}",
            n, yang_type
        )));
    }
    Ok(())
}

fn value_to_i64(value: &Value) -> Result<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| NetconfError::Validation(format!("cannot convert {} to i64", n))),
        // RFC 7951 encodes 64-bit integers as strings
        Value::String(s) => s
            .parse()
            .map_err(|_| NetconfError::Validation(format!("cannot parse '{}' as i64", s))),
        _ => Err(NetconfError::Validation(format!(
            "cannot convert {:?} to i64",
            value
        ))),
    }
}

fn value_to_u64(value: &Value) -> Result<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| NetconfError::Validation(format!("cannot convert {} to u64", n))),
        Value::String(s) => s
            .parse()
            .map_err(|_| NetconfError::Validation(format!("cannot parse '{}' as u64", s))),
        _ => Err(NetconfError::Validation(format!(
            "cannot convert {:?} to u64",
            value
        ))),
    }
}

/// Lexical decimal64: optional sign, at most 18 fraction digits, 19 digits in all
fn check_decimal64(s: &str) -> Result<()> {
    let invalid = || NetconfError::Validation(format!("cannot parse '{}' as decimal64", s));
    let digits = s.strip_prefix('-').unwrap_or(s);
    let (whole, fraction) = digits.split_once('.').unwrap_or((digits, ""));
    let all_digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
    if whole.is_empty() || !all_digits(whole) || !all_digits(fraction) {
        return Err(invalid());
    }
    if digits.contains('.') && fraction.is_empty() {
        return Err(invalid());
    }
    let significant = whole.trim_start_matches('0').len() + fraction.len();
    if fraction.len() > 18 || significant > 19 {
        return Err(NetconfError::Validation(format!(
            "'{}' out of range for decimal64",
            s
        )));
    }
    Ok(())
}
