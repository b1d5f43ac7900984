use serde::{Deserialize, Serialize};

use crate::error::MpvError;
use crate::property::Format;

/// Structured property value.
///
/// Maps keep insertion order, matching the native key/value list layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    None,
    String(String),
    Flag(bool),
    Int64(i64),
    Double(f64),
    Array(Vec<Node>),
    Map(Vec<(String, Node)>),
    ByteArray(Vec<u8>),
}

impl Node {
    pub fn format(&self) -> Format {
        match self {
            Node::None => Format::None,
            Node::String(_) => Format::String,
            Node::Flag(_) => Format::Flag,
            Node::Int64(_) => Format::Int64,
            Node::Double(_) => Format::Double,
            Node::Array(_) => Format::NodeArray,
            Node::Map(_) => Format::NodeMap,
            Node::ByteArray(_) => Format::ByteArray,
        }
    }

    /// Look up a key in a map node.
    pub fn get(&self, key: &str) -> Option<&Node> {
        match self {
            Node::Map(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Convert this value to the requested format, the way the engine does
    /// when a property is read with a format other than its native one.
    ///
    /// Strings can be produced from every scalar; integers and doubles
    /// convert into each other. Everything else must match exactly.
    pub fn convert_to(&self, format: Format) -> Result<Node, MpvError> {
        match (format, self) {
            (Format::None, _) => Ok(Node::None),
            (_, Node::None) => Err(MpvError::PropertyUnavailable),
            (Format::Node, value) => Ok(value.clone()),
            (Format::String | Format::OsdString, value) => {
                value.to_display_string().map(Node::String)
            }
            (Format::Int64, Node::Int64(v)) => Ok(Node::Int64(*v)),
            (Format::Int64, Node::Double(v)) => {
                if v.is_finite() && *v >= i64::MIN as f64 && *v <= i64::MAX as f64 {
                    Ok(Node::Int64(v.trunc() as i64))
                } else {
                    Err(MpvError::PropertyFormat)
                }
            }
            (Format::Double, Node::Double(v)) => Ok(Node::Double(*v)),
            (Format::Double, Node::Int64(v)) => Ok(Node::Double(*v as f64)),
            (Format::Flag, Node::Flag(v)) => Ok(Node::Flag(*v)),
            (Format::NodeArray, Node::Array(items)) => Ok(Node::Array(items.clone())),
            (Format::NodeMap, Node::Map(entries)) => Ok(Node::Map(entries.clone())),
            (Format::ByteArray, Node::ByteArray(bytes)) => Ok(Node::ByteArray(bytes.clone())),
            _ => Err(MpvError::PropertyFormat),
        }
    }

    /// Parse `text` as a value of `format`. Used when a property or option
    /// of a typed kind is set through its string form.
    pub fn parse(format: Format, text: &str) -> Result<Node, MpvError> {
        match format {
            Format::String | Format::OsdString | Format::Node => Ok(Node::String(text.to_string())),
            Format::Flag => match text {
                "yes" => Ok(Node::Flag(true)),
                "no" => Ok(Node::Flag(false)),
                _ => Err(MpvError::PropertyFormat),
            },
            Format::Int64 => text
                .trim()
                .parse::<i64>()
                .map(Node::Int64)
                .map_err(|_| MpvError::PropertyFormat),
            Format::Double => text
                .trim()
                .parse::<f64>()
                .map(Node::Double)
                .map_err(|_| MpvError::PropertyFormat),
            Format::NodeArray => Ok(Node::Array(
                text.split(',')
                    .filter(|item| !item.is_empty())
                    .map(|item| Node::String(item.to_string()))
                    .collect(),
            )),
            Format::None | Format::NodeMap | Format::ByteArray => Err(MpvError::PropertyFormat),
        }
    }

    fn to_display_string(&self) -> Result<String, MpvError> {
        match self {
            Node::String(s) => Ok(s.clone()),
            Node::Flag(v) => Ok(if *v { "yes" } else { "no" }.to_string()),
            Node::Int64(v) => Ok(v.to_string()),
            Node::Double(v) => Ok(format!("{:.6}", v)),
            Node::Array(items) => items
                .iter()
                .map(Node::to_display_string)
                .collect::<Result<Vec<_>, _>>()
                .map(|parts| parts.join(",")),
            Node::None | Node::Map(_) | Node::ByteArray(_) => Err(MpvError::PropertyFormat),
        }
    }
}
