use std::fmt::{self, Debug, Display};

use percent_encoding::{AsciiSet, CONTROLS, percent_decode_str, utf8_percent_encode};
use url::Url;

use crate::{BadJsonPointerSyntax, JsonPointer, JsonPointerSegment};

/// Characters that must be percent-encoded inside a URI fragment,
/// per RFC 3986.
const FRAGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'<')
    .add(b'>')
    .add(b'`')
    .add(b'#')
    .add(b'%')
    .add(b'{')
    .add(b'}')
    .add(b'[')
    .add(b']')
    .add(b'^')
    .add(b'\\')
    .add(b'|');

/// The canonical identity of a JSON location: a document URI plus a
/// JSON Pointer into that document.
///
/// A `NodeId` with an empty pointer denotes the document root, and
/// serializes as the bare URI. Equal canonical strings denote the same
/// location, so equality, ordering and hashing all follow the
/// `(uri, pointer)` pair.
#[derive(Clone, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct NodeId {
    uri: Url,
    pointer: JsonPointer<'static>,
}

impl NodeId {
    /// Constructs the identity of a document's root node.
    pub fn root(uri: Url) -> Self {
        Self {
            uri,
            pointer: JsonPointer::empty(),
        }
    }

    /// Constructs the identity of the node at `pointer` within `uri`.
    pub fn new(uri: Url, pointer: JsonPointer<'static>) -> Self {
        Self { uri, pointer }
    }

    /// Parses a canonical `docUri#pointer` string. A missing or empty
    /// fragment denotes the document root.
    pub fn parse(s: &str) -> Result<Self, BadNodeId> {
        let (uri, fragment) = match s.split_once('#') {
            Some((uri, fragment)) => (uri, Some(fragment)),
            None => (s, None),
        };
        let uri = Url::parse(uri).map_err(BadNodeId::InvalidUri)?;
        let pointer = match fragment {
            None | Some("") => JsonPointer::empty(),
            Some(fragment) => {
                let decoded = percent_decode_str(fragment)
                    .decode_utf8()
                    .map_err(|_| BadNodeId::InvalidEscape(fragment.to_owned()))?;
                JsonPointer::parse_owned(&decoded)?
            }
        };
        Ok(Self { uri, pointer })
    }

    /// Returns the document URI.
    pub fn uri(&self) -> &Url {
        &self.uri
    }

    /// Returns the pointer within the document.
    pub fn pointer(&self) -> &JsonPointer<'static> {
        &self.pointer
    }

    /// Returns `true` if this identity denotes a document root.
    pub fn is_root(&self) -> bool {
        self.pointer.is_empty()
    }

    /// Returns the identity of this node's document root.
    pub fn document(&self) -> NodeId {
        NodeId::root(self.uri.clone())
    }

    /// Returns the identity of a child of this node.
    pub fn child(&self, segment: impl Into<JsonPointerSegment<'static>>) -> NodeId {
        NodeId {
            uri: self.uri.clone(),
            pointer: self.pointer.child(segment),
        }
    }

    /// Splits this identity into its document URI and pointer.
    pub fn into_parts(self) -> (Url, JsonPointer<'static>) {
        (self.uri, self.pointer)
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.pointer.is_empty() {
            write!(f, "{}", self.uri)
        } else {
            let fragment = self.pointer.to_string();
            write!(f, "{}#{}", self.uri, utf8_percent_encode(&fragment, FRAGMENT))
        }
    }
}

impl Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({self})")
    }
}

/// An error that occurs while parsing a canonical node identity.
#[derive(Clone, Debug, thiserror::Error)]
pub enum BadNodeId {
    #[error("invalid document URI: {0}")]
    InvalidUri(url::ParseError),
    #[error("invalid percent-escape in fragment {0:?}")]
    InvalidEscape(String),
    #[error(transparent)]
    InvalidPointer(#[from] BadJsonPointerSyntax),
}
