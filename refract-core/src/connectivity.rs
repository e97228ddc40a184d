//! The document graph: root discovery, DFS over `$ref` edges, and the
//! Kosaraju condensation into analysis groups. Mutually-referencing files
//! land in one group and are always solved together.

use std::collections::{BTreeMap, BTreeSet};

use futures::future::BoxFuture;
use petgraph::algo::kosaraju_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use tracing::debug;
use url::Url;

use crate::analyzer::AnalyzerInner;
use crate::cache::{CacheError, LoadCtx, Produced};
use crate::key::{KeyArg, KeyValue};

/// The identity of an analysis group: the lexicographically smallest
/// document URI of its strongly-connected component. Documents outside
/// any multi-document component form singleton groups named after
/// themselves.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct GroupId(Url);

impl GroupId {
    pub fn new(uri: Url) -> Self {
        Self(uri)
    }

    pub fn uri(&self) -> &Url {
        &self.0
    }
}

impl std::fmt::Display for GroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl KeyArg for GroupId {
    fn to_key(&self) -> KeyValue {
        KeyValue::Str(self.0.as_str().to_owned())
    }

    fn from_key(value: &KeyValue) -> Option<Self> {
        match value {
            KeyValue::Str(s) => Url::parse(s).ok().map(GroupId),
            _ => None,
        }
    }
}

/// Root documents found by globbing the workspace folders.
#[derive(Clone, Debug, Default)]
pub struct DiscoveredRoots {
    pub roots: Vec<Url>,
}

/// The reference graph and its group structure.
#[derive(Clone, Debug, Default)]
pub struct DocumentConnectivity {
    /// Directed document references, including edges into tombs.
    graph: BTreeMap<Url, BTreeSet<Url>>,
    /// Members of each multi-document component. Singleton groups are
    /// implied by absence.
    analysis_groups: BTreeMap<GroupId, BTreeSet<Url>>,
    uri_to_group: BTreeMap<Url, GroupId>,
    group_incoming_edges: BTreeMap<GroupId, BTreeSet<GroupId>>,
}

impl DocumentConnectivity {
    /// The group that analyzes `uri`. Documents without a multi-document
    /// component group under their own URI.
    pub fn group_id(&self, uri: &Url) -> GroupId {
        self.uri_to_group
            .get(uri)
            .cloned()
            .unwrap_or_else(|| GroupId(uri.clone()))
    }

    /// The documents a group analyzes together, sorted.
    pub fn members(&self, group: &GroupId) -> Vec<Url> {
        match self.analysis_groups.get(group) {
            Some(members) => members.iter().cloned().collect(),
            None => vec![group.0.clone()],
        }
    }

    /// The groups whose solves feed `group`, sorted.
    pub fn incoming_groups(&self, group: &GroupId) -> Vec<GroupId> {
        self.group_incoming_edges
            .get(group)
            .map(|incoming| incoming.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Every document the DFS discovered.
    pub fn documents(&self) -> impl Iterator<Item = &Url> {
        self.graph.keys()
    }

    pub fn contains(&self, uri: &Url) -> bool {
        self.graph.contains_key(uri)
    }

    /// The outgoing reference edges of `uri`.
    pub fn references_of(&self, uri: &Url) -> impl Iterator<Item = &Url> {
        self.graph.get(uri).into_iter().flatten()
    }

    /// The multi-document groups, keyed by group id.
    pub fn analysis_groups(&self) -> &BTreeMap<GroupId, BTreeSet<Url>> {
        &self.analysis_groups
    }

    fn content_key(&self) -> KeyValue {
        let graph = self
            .graph
            .iter()
            .map(|(uri, targets)| {
                let targets = targets
                    .iter()
                    .map(|t| KeyValue::Str(t.as_str().to_owned()))
                    .collect();
                (uri.as_str().to_owned(), KeyValue::Seq(targets))
            })
            .collect();
        let groups = self
            .analysis_groups
            .iter()
            .map(|(group, members)| {
                let members = members
                    .iter()
                    .map(|m| KeyValue::Str(m.as_str().to_owned()))
                    .collect();
                (group.0.as_str().to_owned(), KeyValue::Seq(members))
            })
            .collect();
        let incoming = self
            .group_incoming_edges
            .iter()
            .map(|(group, sources)| {
                let sources = sources
                    .iter()
                    .map(|s| KeyValue::Str(s.0.as_str().to_owned()))
                    .collect();
                (group.0.as_str().to_owned(), KeyValue::Seq(sources))
            })
            .collect();
        KeyValue::Map(BTreeMap::from([
            ("graph".to_owned(), KeyValue::Map(graph)),
            ("groups".to_owned(), KeyValue::Map(groups)),
            ("incoming".to_owned(), KeyValue::Map(incoming)),
        ]))
    }
}

pub(crate) async fn compute_roots(
    inner: &AnalyzerInner,
) -> Result<Produced<DiscoveredRoots>, CacheError> {
    let mut roots = Vec::new();
    for folder in inner.workspace.folders() {
        match inner.vfs.glob(folder, inner.workspace.globs()).await {
            Ok(mut found) => roots.append(&mut found),
            Err(error) => {
                debug!(target: "refract::connectivity", %folder, %error, "glob failed");
            }
        }
    }
    roots.sort();
    roots.dedup();
    let content_hash = KeyValue::Seq(
        roots
            .iter()
            .map(|uri| KeyValue::Str(uri.as_str().to_owned()))
            .collect(),
    )
    .fingerprint()
    .to_hex();
    Ok(Produced::new(DiscoveredRoots { roots }, content_hash))
}

pub(crate) async fn compute(
    inner: &AnalyzerInner,
    ctx: LoadCtx,
    _key: (),
) -> Result<Produced<DocumentConnectivity>, CacheError> {
    let roots = inner.loaders().roots.load(&ctx, &()).await?;

    let mut graph: BTreeMap<Url, BTreeSet<Url>> = BTreeMap::new();
    for root in &roots.roots {
        dfs(inner, &ctx, &mut graph, root.clone()).await?;
    }

    let connectivity = condense(graph);
    debug!(
        target: "refract::connectivity",
        documents = connectivity.graph.len(),
        groups = connectivity.analysis_groups.len(),
        "connectivity rebuilt"
    );
    let content_hash = connectivity.content_key().fingerprint().to_hex();
    Ok(Produced::new(connectivity, content_hash))
}

/// Depth-first discovery. The adjacency entry is inserted before any
/// neighbor is awaited, so re-entrant discovery of the same document
/// settles on a single node.
fn dfs<'a>(
    inner: &'a AnalyzerInner,
    ctx: &'a LoadCtx,
    graph: &'a mut BTreeMap<Url, BTreeSet<Url>>,
    uri: Url,
) -> BoxFuture<'a, Result<(), CacheError>> {
    Box::pin(async move {
        if graph.contains_key(&uri) {
            return Ok(());
        }
        graph.insert(uri.clone(), BTreeSet::new());

        let references = inner.loaders().references.load(ctx, &uri).await?;
        let mut targets = BTreeSet::new();
        for site in &references.references {
            if let Ok(target) = &site.resolved
                && target.uri() != &uri
            {
                targets.insert(target.uri().clone());
            }
        }
        graph.entry(uri).or_default().extend(targets.iter().cloned());

        for target in targets {
            // Tombs take part in the graph but have no references of
            // their own, so recursing into them is a no-op beyond the
            // node insert.
            dfs(inner, ctx, &mut *graph, target).await?;
        }
        Ok(())
    })
}

/// Kosaraju condensation of the reference graph into analysis groups.
fn condense(graph: BTreeMap<Url, BTreeSet<Url>>) -> DocumentConnectivity {
    let mut dag = DiGraph::<Url, ()>::new();
    let mut indices: BTreeMap<&Url, NodeIndex> = BTreeMap::new();
    for uri in graph.keys() {
        indices.insert(uri, dag.add_node(uri.clone()));
    }
    for (from, targets) in &graph {
        for to in targets {
            if let (Some(&a), Some(&b)) = (indices.get(from), indices.get(to)) {
                dag.add_edge(a, b, ());
            }
        }
    }

    let mut group_of: BTreeMap<Url, GroupId> = BTreeMap::new();
    let mut analysis_groups = BTreeMap::new();
    let mut uri_to_group = BTreeMap::new();
    for component in kosaraju_scc(&dag) {
        let mut members: BTreeSet<Url> =
            component.iter().map(|&index| dag[index].clone()).collect();
        let Some(smallest) = members.iter().next().cloned() else {
            continue;
        };
        let group = GroupId(smallest);
        for member in &members {
            group_of.insert(member.clone(), group.clone());
        }
        if members.len() > 1 {
            for member in &members {
                uri_to_group.insert(member.clone(), group.clone());
            }
            analysis_groups.insert(group, std::mem::take(&mut members));
        }
    }

    let mut group_incoming_edges: BTreeMap<GroupId, BTreeSet<GroupId>> = BTreeMap::new();
    for (from, targets) in &graph {
        for to in targets {
            let (Some(source), Some(target)) = (group_of.get(from), group_of.get(to)) else {
                continue;
            };
            if source != target {
                group_incoming_edges
                    .entry(target.clone())
                    .or_default()
                    .insert(source.clone());
            }
        }
    }

    DocumentConnectivity {
        graph,
        analysis_groups,
        uri_to_group,
        group_incoming_edges,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uri(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn graph(edges: &[(&str, &[&str])]) -> BTreeMap<Url, BTreeSet<Url>> {
        edges
            .iter()
            .map(|(from, targets)| {
                (
                    uri(from),
                    targets.iter().map(|to| uri(to)).collect::<BTreeSet<_>>(),
                )
            })
            .collect()
    }

    #[test]
    fn test_singleton_groups_are_implicit() {
        let connectivity = condense(graph(&[
            ("file:///ws/a.yml", &["file:///ws/b.yml"]),
            ("file:///ws/b.yml", &[]),
        ]));
        assert!(connectivity.analysis_groups().is_empty());
        assert_eq!(
            connectivity.group_id(&uri("file:///ws/a.yml")),
            GroupId::new(uri("file:///ws/a.yml"))
        );
        assert_eq!(
            connectivity.members(&GroupId::new(uri("file:///ws/b.yml"))),
            vec![uri("file:///ws/b.yml")]
        );
    }

    #[test]
    fn test_cycle_condenses_into_one_group() {
        let connectivity = condense(graph(&[
            ("file:///ws/a.yml", &["file:///ws/b.yml"]),
            ("file:///ws/b.yml", &["file:///ws/c.yml"]),
            ("file:///ws/c.yml", &["file:///ws/a.yml"]),
        ]));
        let group = GroupId::new(uri("file:///ws/a.yml"));
        assert_eq!(connectivity.analysis_groups().len(), 1);
        for doc in ["file:///ws/a.yml", "file:///ws/b.yml", "file:///ws/c.yml"] {
            assert_eq!(connectivity.group_id(&uri(doc)), group);
        }
        assert_eq!(
            connectivity.members(&group),
            vec![
                uri("file:///ws/a.yml"),
                uri("file:///ws/b.yml"),
                uri("file:///ws/c.yml"),
            ]
        );
    }

    #[test]
    fn test_incoming_edges_cross_groups_only() {
        // root -> {a, b}; a <-> b form a cycle; b -> leaf.
        let connectivity = condense(graph(&[
            ("file:///ws/root.yml", &["file:///ws/a.yml", "file:///ws/b.yml"]),
            ("file:///ws/a.yml", &["file:///ws/b.yml"]),
            ("file:///ws/b.yml", &["file:///ws/a.yml", "file:///ws/leaf.yml"]),
            ("file:///ws/leaf.yml", &[]),
        ]));
        let root = GroupId::new(uri("file:///ws/root.yml"));
        let cycle = GroupId::new(uri("file:///ws/a.yml"));
        let leaf = GroupId::new(uri("file:///ws/leaf.yml"));

        assert_eq!(connectivity.incoming_groups(&cycle), vec![root.clone()]);
        assert_eq!(connectivity.incoming_groups(&leaf), vec![cycle.clone()]);
        assert_eq!(connectivity.incoming_groups(&root), Vec::<GroupId>::new());
        // The in-cycle edges a<->b produce no self edge.
        assert!(!connectivity.incoming_groups(&cycle).contains(&cycle));
    }

    #[test]
    fn test_content_key_is_stable_across_orderings() {
        let a = condense(graph(&[
            ("file:///ws/a.yml", &["file:///ws/b.yml"]),
            ("file:///ws/b.yml", &[]),
        ]));
        let b = condense(graph(&[
            ("file:///ws/b.yml", &[]),
            ("file:///ws/a.yml", &["file:///ws/b.yml"]),
        ]));
        assert_eq!(
            a.content_key().fingerprint(),
            b.content_key().fingerprint()
        );
    }
}
