//! The analysis core of the Refract OpenAPI language server.
//!
//! A workspace of YAML/JSON documents linked by `$ref`s is kept in an
//! incrementally-maintained structural model: a dependency-tracking query
//! cache feeds a document graph, Kosaraju condensation groups mutually
//! referencing files into analysis units, and a union-find based solver
//! assigns every JSON node a structural type and an optional OpenAPI role.
//! Hover and go-to-definition read from the solved state.

pub mod analyzer;
pub mod cache;
pub mod connectivity;
pub mod document;
pub mod extract;
pub mod group;
pub mod key;
pub mod nominal;
pub mod query;
pub mod refs;
pub mod resolve;
pub mod solve;
pub mod vfs;
pub mod workspace;
pub mod yaml;

pub use analyzer::Analyzer;
pub use cache::CacheError;
pub use connectivity::{DocumentConnectivity, GroupId};
pub use document::ServerDocument;
pub use group::GroupAnalysis;
pub use nominal::Nominal;
pub use query::{DefinitionLink, HoverPayload};
pub use workspace::{Settings, Workspace};
pub use yaml::{Pos, Span};
