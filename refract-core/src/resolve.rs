//! Turns `$ref` strings into node identities, with URL join semantics for
//! relative paths and RFC 6901 fragments.

use percent_encoding::percent_decode_str;
use refract_pointer::{JsonPointer, NodeId};
use url::Url;

/// A `$ref` that doesn't resolve. These become values in the reference
/// table; they never abort analysis.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum ResolveError {
    #[error("invalid URI reference {0:?}")]
    InvalidUri(String),
    #[error("unsupported URI scheme {0:?}")]
    UnsupportedUriScheme(String),
    #[error("invalid JSON Pointer syntax in fragment {0:?}")]
    InvalidSyntax(String),
    #[error("invalid percent-escape in fragment {0:?}")]
    InvalidEscape(String),
}

impl ResolveError {
    /// A short tag for content hashing, so that two failures of the same
    /// kind gate downstream recomputes identically.
    pub fn kind(&self) -> &'static str {
        match self {
            ResolveError::InvalidUri(_) => "invalidUri",
            ResolveError::UnsupportedUriScheme(_) => "unsupportedUriScheme",
            ResolveError::InvalidSyntax(_) => "invalidSyntax",
            ResolveError::InvalidEscape(_) => "invalidEscape",
        }
    }
}

/// Resolves `reference` against the document it appears in. `..` segments,
/// bare filenames, and `#`-only fragments all follow URL semantics; the
/// fragment (if any) must be a valid, percent-encoded JSON Pointer.
pub fn resolve_ref(base: &Url, reference: &str) -> Result<NodeId, ResolveError> {
    let joined = base
        .join(reference)
        .map_err(|_| ResolveError::InvalidUri(reference.to_owned()))?;
    let fragment = joined.fragment().map(str::to_owned);
    let mut uri = joined;
    uri.set_fragment(None);
    if uri.scheme() != "file" {
        return Err(ResolveError::UnsupportedUriScheme(uri.scheme().to_owned()));
    }
    let pointer = match fragment.as_deref() {
        None | Some("") => JsonPointer::empty(),
        Some(fragment) => {
            let decoded = percent_decode_str(fragment)
                .decode_utf8()
                .map_err(|_| ResolveError::InvalidEscape(fragment.to_owned()))?;
            JsonPointer::parse_owned(&decoded)
                .map_err(|_| ResolveError::InvalidSyntax(fragment.to_owned()))?
        }
    };
    Ok(NodeId::new(uri, pointer))
}
