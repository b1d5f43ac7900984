//! Typed property values and their wire formats.
//!
//! Every value crossing the boundary is tagged with a [`Format`]. Structured
//! values travel as [`Node`] trees; the scalar Rust types used by the typed
//! getters/setters implement [`PropertyCodec`].

mod codec;
mod node;

pub use codec::PropertyCodec;
pub use node::Node;

use serde::{Deserialize, Serialize};

/// Wire format of a property value. Integer values are stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum Format {
    None = 0,
    String = 1,
    OsdString = 2,
    Flag = 3,
    Int64 = 4,
    Double = 5,
    Node = 6,
    NodeArray = 7,
    NodeMap = 8,
    ByteArray = 9,
}

impl Format {
    pub const ALL: [Format; 10] = [
        Format::None,
        Format::String,
        Format::OsdString,
        Format::Flag,
        Format::Int64,
        Format::Double,
        Format::Node,
        Format::NodeArray,
        Format::NodeMap,
        Format::ByteArray,
    ];

    pub fn from_raw(raw: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|format| *format as i32 == raw)
    }

    pub fn as_raw(self) -> i32 {
        self as i32
    }

    /// Formats a property change notification can carry in a value slot.
    pub fn is_scalar(self) -> bool {
        matches!(
            self,
            Format::String | Format::OsdString | Format::Flag | Format::Int64 | Format::Double
        )
    }
}
