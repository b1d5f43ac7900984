use crate::error::MpvError;
use crate::property::{Format, Node};

/// Marshaling between a Rust type and its boundary representation.
///
/// `FORMAT` is the format requested from the engine on reads; the engine
/// converts the stored value into it, so `from_node` only has to accept
/// the matching variant.
pub trait PropertyCodec: Sized {
    const FORMAT: Format;

    fn into_node(self) -> Node;

    fn from_node(node: Node) -> Result<Self, MpvError>;
}

impl PropertyCodec for i64 {
    const FORMAT: Format = Format::Int64;

    fn into_node(self) -> Node {
        Node::Int64(self)
    }

    fn from_node(node: Node) -> Result<Self, MpvError> {
        match node {
            Node::Int64(v) => Ok(v),
            _ => Err(MpvError::PropertyFormat),
        }
    }
}

impl PropertyCodec for f64 {
    const FORMAT: Format = Format::Double;

    fn into_node(self) -> Node {
        Node::Double(self)
    }

    fn from_node(node: Node) -> Result<Self, MpvError> {
        match node {
            Node::Double(v) => Ok(v),
            _ => Err(MpvError::PropertyFormat),
        }
    }
}

impl PropertyCodec for bool {
    const FORMAT: Format = Format::Flag;

    fn into_node(self) -> Node {
        Node::Flag(self)
    }

    fn from_node(node: Node) -> Result<Self, MpvError> {
        match node {
            Node::Flag(v) => Ok(v),
            _ => Err(MpvError::PropertyFormat),
        }
    }
}

impl PropertyCodec for String {
    const FORMAT: Format = Format::String;

    fn into_node(self) -> Node {
        Node::String(self)
    }

    fn from_node(node: Node) -> Result<Self, MpvError> {
        match node {
            Node::String(v) => Ok(v),
            _ => Err(MpvError::PropertyFormat),
        }
    }
}

impl PropertyCodec for Vec<u8> {
    const FORMAT: Format = Format::ByteArray;

    fn into_node(self) -> Node {
        Node::ByteArray(self)
    }

    fn from_node(node: Node) -> Result<Self, MpvError> {
        match node {
            Node::ByteArray(v) => Ok(v),
            _ => Err(MpvError::PropertyFormat),
        }
    }
}

impl PropertyCodec for Node {
    const FORMAT: Format = Format::Node;

    fn into_node(self) -> Node {
        self
    }

    fn from_node(node: Node) -> Result<Self, MpvError> {
        Ok(node)
    }
}
