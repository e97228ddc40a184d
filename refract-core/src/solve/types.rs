//! The solver's input and output type languages: local shapes extracted
//! per node, and the structural types unification produces.

use std::collections::BTreeMap;
use std::fmt::{self, Display};

use indexmap::IndexMap;
use itertools::Itertools;
use refract_pointer::NodeId;

use crate::nominal::Nominal;
use crate::yaml::Scalar;

/// The kind of a JSON primitive.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum PrimKind {
    Null,
    Bool,
    Number,
    String,
}

impl PrimKind {
    pub fn of_scalar(scalar: &Scalar) -> Self {
        match scalar {
            Scalar::Null => PrimKind::Null,
            Scalar::Bool(_) => PrimKind::Bool,
            Scalar::Int(_) | Scalar::Float(_) => PrimKind::Number,
            Scalar::Str(_) => PrimKind::String,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PrimKind::Null => "null",
            PrimKind::Bool => "bool",
            PrimKind::Number => "number",
            PrimKind::String => "string",
        }
    }
}

/// The minimal structural fact about one node, the solver's input.
#[derive(Clone, Debug, PartialEq)]
pub enum LocalShape {
    /// A scalar of the given primitive kind.
    Prim(PrimKind),
    /// A `$ref`: this node is the same value as `target`.
    Ref(NodeId),
    /// A sequence, each item referenced by its stringified index.
    Array(IndexMap<String, NodeId>),
    /// A mapping, each value referenced by its key.
    Object(IndexMap<String, NodeId>),
}

impl LocalShape {
    /// The node identities this shape references.
    pub fn children(&self) -> Box<dyn Iterator<Item = &NodeId> + '_> {
        match self {
            LocalShape::Prim(_) => Box::new(std::iter::empty()),
            LocalShape::Ref(target) => Box::new(std::iter::once(target)),
            LocalShape::Array(fields) | LocalShape::Object(fields) => Box::new(fields.values()),
        }
    }
}

/// A structural type. Object fields are a keyed map, so equality is
/// insensitive to field order.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum JsonType {
    Prim(PrimKind),
    Array(Box<JsonType>),
    Object(BTreeMap<String, JsonType>),
    /// Unresolved: a pure ref cycle, or an external with no incoming info.
    TypeVar,
    /// Reserved for future use.
    Nominal(Nominal),
}

impl JsonType {
    pub fn object(fields: impl IntoIterator<Item = (String, JsonType)>) -> Self {
        JsonType::Object(fields.into_iter().collect())
    }

    pub fn array(elem: JsonType) -> Self {
        JsonType::Array(Box::new(elem))
    }

    pub fn is_typevar(&self) -> bool {
        matches!(self, JsonType::TypeVar)
    }
}

/// Unifies two structural types, or returns `None` when they conflict.
/// The operation is commutative and, where defined, associative; a type
/// variable unifies with anything.
pub fn unify(a: &JsonType, b: &JsonType) -> Option<JsonType> {
    match (a, b) {
        (JsonType::TypeVar, other) | (other, JsonType::TypeVar) => Some(other.clone()),
        (JsonType::Prim(p), JsonType::Prim(q)) => (p == q).then(|| JsonType::Prim(*p)),
        (JsonType::Array(x), JsonType::Array(y)) => Some(JsonType::array(unify(x, y)?)),
        (JsonType::Object(f), JsonType::Object(g)) => {
            if f.len() != g.len() || f.keys().any(|k| !g.contains_key(k)) {
                return None;
            }
            let mut fields = BTreeMap::new();
            for (key, left) in f {
                fields.insert(key.clone(), unify(left, &g[key])?);
            }
            Some(JsonType::Object(fields))
        }
        (JsonType::Nominal(i), JsonType::Nominal(j)) => (i == j).then(|| JsonType::Nominal(*i)),
        _ => None,
    }
}

impl Display for JsonType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JsonType::Prim(kind) => f.write_str(kind.as_str()),
            JsonType::Array(elem) => write!(f, "array<{elem}>"),
            JsonType::Object(fields) => write!(
                f,
                "object{{{}}}",
                fields
                    .iter()
                    .format_with(", ", |(k, v), f| f(&format_args!("{k}: {v}")))
            ),
            JsonType::TypeVar => f.write_str("?"),
            JsonType::Nominal(id) => write!(f, "nominal({id})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obj(fields: &[(&str, JsonType)]) -> JsonType {
        JsonType::object(fields.iter().map(|(k, v)| ((*k).to_owned(), v.clone())))
    }

    #[test]
    fn test_typevar_unifies_with_anything() {
        let ty = obj(&[("name", JsonType::Prim(PrimKind::String))]);
        assert_eq!(unify(&JsonType::TypeVar, &ty), Some(ty.clone()));
        assert_eq!(unify(&ty, &JsonType::TypeVar), Some(ty.clone()));
        assert_eq!(unify(&JsonType::TypeVar, &JsonType::TypeVar), Some(JsonType::TypeVar));
    }

    #[test]
    fn test_prim_kinds_must_match() {
        let s = JsonType::Prim(PrimKind::String);
        let n = JsonType::Prim(PrimKind::Number);
        assert_eq!(unify(&s, &s), Some(s.clone()));
        assert_eq!(unify(&s, &n), None);
    }

    #[test]
    fn test_object_key_sets_must_match() {
        let a = obj(&[("x", JsonType::Prim(PrimKind::Number))]);
        let b = obj(&[
            ("x", JsonType::Prim(PrimKind::Number)),
            ("y", JsonType::Prim(PrimKind::Bool)),
        ]);
        assert_eq!(unify(&a, &b), None);
    }

    #[test]
    fn test_object_fields_unify_recursively() {
        let a = obj(&[("x", JsonType::TypeVar), ("y", JsonType::Prim(PrimKind::Bool))]);
        let b = obj(&[
            ("x", JsonType::Prim(PrimKind::Number)),
            ("y", JsonType::TypeVar),
        ]);
        let expected = obj(&[
            ("x", JsonType::Prim(PrimKind::Number)),
            ("y", JsonType::Prim(PrimKind::Bool)),
        ]);
        assert_eq!(unify(&a, &b), Some(expected));
    }

    #[test]
    fn test_unify_is_commutative() {
        let cases = [
            (JsonType::TypeVar, JsonType::Prim(PrimKind::String)),
            (
                JsonType::array(JsonType::TypeVar),
                JsonType::array(JsonType::Prim(PrimKind::Number)),
            ),
            (
                obj(&[("x", JsonType::TypeVar)]),
                obj(&[("x", JsonType::Prim(PrimKind::Null))]),
            ),
            (
                JsonType::Prim(PrimKind::Bool),
                JsonType::Prim(PrimKind::Number),
            ),
        ];
        for (a, b) in cases {
            assert_eq!(unify(&a, &b), unify(&b, &a));
        }
    }

    #[test]
    fn test_unify_is_associative_where_defined() {
        let a = obj(&[("x", JsonType::TypeVar), ("y", JsonType::TypeVar)]);
        let b = obj(&[("x", JsonType::Prim(PrimKind::Number)), ("y", JsonType::TypeVar)]);
        let c = obj(&[("x", JsonType::TypeVar), ("y", JsonType::Prim(PrimKind::Bool))]);

        let left = unify(&unify(&a, &b).unwrap(), &c);
        let right = unify(&a, &unify(&b, &c).unwrap());
        assert_eq!(left, right);
        assert!(left.is_some());
    }

    #[test]
    fn test_display() {
        let ty = obj(&[
            ("items", JsonType::array(JsonType::Prim(PrimKind::String))),
            ("count", JsonType::Prim(PrimKind::Number)),
        ]);
        assert_eq!(ty.to_string(), "object{count: number, items: array<string>}");
    }
}
