use std::{
    borrow::Cow,
    fmt::{Debug, Display},
    ops::Deref,
};

use itertools::Itertools;

mod node_id;

pub use node_id::{BadNodeId, NodeId};

/// A parsed JSON Pointer.
#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct JsonPointer<'a>(Cow<'a, [JsonPointerSegment<'a>]>);

impl JsonPointer<'static> {
    /// Constructs a pointer from an RFC 6901 string,
    /// with segments that own their contents.
    pub fn parse_owned(s: &str) -> Result<Self, BadJsonPointerSyntax> {
        if s.is_empty() {
            return Ok(Self::empty());
        }
        let Some(s) = s.strip_prefix('/') else {
            return Err(BadJsonPointerSyntax::MissingLeadingSlash);
        };
        let segments = s
            .split('/')
            .map(str::to_owned)
            .map(JsonPointerSegment::from_str)
            .collect_vec();
        Ok(Self(segments.into()))
    }
}

impl<'a> JsonPointer<'a> {
    /// Constructs an empty pointer that resolves to the document root.
    pub fn empty() -> Self {
        Self(Cow::Borrowed(&[]))
    }

    /// Constructs a pointer from an RFC 6901 string,
    /// with segments that borrow from the string.
    pub fn parse(s: &'a str) -> Result<Self, BadJsonPointerSyntax> {
        if s.is_empty() {
            return Ok(Self::empty());
        }
        let Some(s) = s.strip_prefix('/') else {
            return Err(BadJsonPointerSyntax::MissingLeadingSlash);
        };
        let segments = s.split('/').map(JsonPointerSegment::from_str).collect_vec();
        Ok(Self(segments.into()))
    }

    /// Returns `true` if this is an empty pointer.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the number of segments in this pointer.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns the first segment of this pointer, or `None`
    /// if this is an empty pointer.
    pub fn head(&self) -> Option<&JsonPointerSegment<'a>> {
        self.0.first()
    }

    /// Returns the last segment of this pointer, or `None`
    /// if this is an empty pointer.
    pub fn last(&self) -> Option<&JsonPointerSegment<'a>> {
        self.0.last()
    }

    /// Returns a new pointer without the first segment of this pointer.
    /// If this pointer has only one segment, or is an empty pointer,
    /// returns an empty pointer.
    pub fn tail(&self) -> JsonPointer<'_> {
        self.0
            .get(1..)
            .map(|tail| JsonPointer(tail.into()))
            .unwrap_or_else(JsonPointer::empty)
    }

    /// Returns the pointer to the parent of the pointed-to node.
    /// The parent of the empty pointer is the empty pointer.
    pub fn parent(&self) -> JsonPointer<'_> {
        match self.0.split_last() {
            Some((_, init)) => JsonPointer(init.into()),
            None => JsonPointer::empty(),
        }
    }

    /// Appends a segment to this pointer.
    pub fn push(&mut self, segment: impl Into<JsonPointerSegment<'a>>) {
        self.0.to_mut().push(segment.into());
    }

    /// Returns a new pointer with `segment` appended.
    pub fn child(&self, segment: impl Into<JsonPointerSegment<'a>>) -> JsonPointer<'a> {
        let mut child = self.clone();
        child.push(segment);
        child
    }

    /// Returns a borrowing iterator over this pointer's segments.
    pub fn segments(&self) -> impl ExactSizeIterator<Item = &JsonPointerSegment<'a>> {
        self.0.iter()
    }

    /// Converts this pointer into one with segments that own their contents.
    pub fn into_owned(self) -> JsonPointer<'static> {
        let segments = self
            .0
            .into_owned()
            .into_iter()
            .map(JsonPointerSegment::into_owned)
            .collect_vec();
        JsonPointer(segments.into())
    }
}

impl<'a> FromIterator<JsonPointerSegment<'a>> for JsonPointer<'a> {
    fn from_iter<I: IntoIterator<Item = JsonPointerSegment<'a>>>(iter: I) -> Self {
        Self(iter.into_iter().collect_vec().into())
    }
}

impl Display for JsonPointer<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &*self.0 {
            [] => Ok(()),
            segments => write!(f, "/{}", segments.iter().format("/")),
        }
    }
}

/// A single segment of a [`JsonPointer`].
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct JsonPointerSegment<'a>(Cow<'a, str>);

impl<'a> JsonPointerSegment<'a> {
    fn from_str(s: impl Into<Cow<'a, str>>) -> Self {
        let s = s.into();
        if s.contains('~') {
            Self(s.replace("~1", "/").replace("~0", "~").into())
        } else {
            Self(s)
        }
    }

    /// Constructs a segment from an already-unescaped string.
    pub fn new(s: impl Into<Cow<'a, str>>) -> Self {
        Self(s.into())
    }

    /// Constructs a segment from an array index.
    pub fn index(index: usize) -> JsonPointerSegment<'static> {
        JsonPointerSegment(index.to_string().into())
    }

    /// Returns the string value of this segment.
    pub fn as_str(&self) -> &str {
        self
    }

    /// Returns the value of this segment as an array index,
    /// or `None` if this segment can't be used as an index.
    pub fn to_index(&self) -> Option<usize> {
        match self.as_bytes() {
            [b'0'] => Some(0),
            [b'1'..=b'9', rest @ ..] if rest.iter().all(|b: &u8| b.is_ascii_digit()) => {
                // `usize::from_str` allows a leading `+`, and
                // ignores leading zeros; RFC 6901 forbids both.
                self.parse().ok()
            }
            _ => None,
        }
    }

    /// Converts this segment into one that owns its contents.
    pub fn into_owned(self) -> JsonPointerSegment<'static> {
        JsonPointerSegment(Cow::Owned(self.0.into_owned()))
    }
}

impl<'a> From<&'a str> for JsonPointerSegment<'a> {
    fn from(s: &'a str) -> Self {
        Self::new(s)
    }
}

impl From<String> for JsonPointerSegment<'static> {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<usize> for JsonPointerSegment<'static> {
    fn from(index: usize) -> Self {
        Self::index(index)
    }
}

impl Deref for JsonPointerSegment<'_> {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Display for JsonPointerSegment<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.replace("~", "~0").replace("/", "~1"))
    }
}

/// An error that occurs during parsing.
#[derive(Clone, Debug, thiserror::Error)]
pub enum BadJsonPointerSyntax {
    #[error("JSON Pointer must start with `/`")]
    MissingLeadingSlash,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pointer() {
        let pointer = JsonPointer::parse("/foo/bar/0").unwrap();
        let segments = pointer.segments().map(|s| s.as_str()).collect_vec();
        assert_eq!(segments, vec!["foo", "bar", "0"]);
    }

    #[test]
    fn test_parse_empty() {
        let pointer = JsonPointer::parse("").unwrap();
        assert!(pointer.is_empty());
        assert_eq!(pointer.to_string(), "");
    }

    #[test]
    fn test_parse_missing_slash() {
        assert!(matches!(
            JsonPointer::parse("foo/bar"),
            Err(BadJsonPointerSyntax::MissingLeadingSlash)
        ));
    }

    #[test]
    fn test_parse_pointer_escaping() {
        let pointer = JsonPointer::parse("/foo~1bar/baz~0qux").unwrap();
        let segments = pointer.segments().map(|s| s.as_str()).collect_vec();
        assert_eq!(segments, vec!["foo/bar", "baz~qux"]);
    }

    #[test]
    fn test_display_escapes() {
        let pointer = JsonPointer::parse("/foo~1bar/baz~0qux").unwrap();
        assert_eq!(pointer.to_string(), "/foo~1bar/baz~0qux");
    }

    #[test]
    fn test_empty_segment() {
        // `/` points to the key `""`, which is distinct from the root.
        let pointer = JsonPointer::parse("/").unwrap();
        assert_eq!(pointer.len(), 1);
        assert_eq!(pointer.head().map(|s| s.as_str()), Some(""));
    }

    #[test]
    fn test_to_index() {
        let pointer = JsonPointer::parse("/0/12/01/+3/x").unwrap();
        let indices = pointer.segments().map(|s| s.to_index()).collect_vec();
        assert_eq!(indices, vec![Some(0), Some(12), None, None, None]);
    }

    #[test]
    fn test_head_tail() {
        let pointer = JsonPointer::parse("/a/b/c").unwrap();
        assert_eq!(pointer.head().map(|s| s.as_str()), Some("a"));
        assert_eq!(pointer.tail().to_string(), "/b/c");
        assert_eq!(pointer.tail().tail().tail().to_string(), "");
    }

    #[test]
    fn test_parent_and_last() {
        let pointer = JsonPointer::parse("/components/schemas/Pet").unwrap();
        assert_eq!(pointer.last().map(|s| s.as_str()), Some("Pet"));
        assert_eq!(pointer.parent().to_string(), "/components/schemas");
        assert_eq!(JsonPointer::empty().parent(), JsonPointer::empty());
    }

    #[test]
    fn test_child() {
        let pointer = JsonPointer::parse("/components").unwrap();
        let child = pointer.child("sche/mas").child(2usize);
        assert_eq!(child.to_string(), "/components/sche~1mas/2");
    }

    #[test]
    fn test_roundtrip_owned() {
        let pointer = {
            let s = String::from("/paths/~1pets/get");
            JsonPointer::parse(&s).unwrap().into_owned()
        };
        assert_eq!(pointer.to_string(), "/paths/~1pets/get");
        assert_eq!(pointer.head().map(|s| s.as_str()), Some("paths"));
        assert_eq!(pointer.segments().nth(1).map(|s| s.as_str()), Some("/pets"));
    }
}
