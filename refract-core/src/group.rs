//! Per-group analysis: ingest upstream group outputs, extract shapes and
//! nominal labels from every member document, and run the solver. Loading
//! upstream groups through the cache makes the condensation's topological
//! order implicit; leaves compute first.

use std::collections::VecDeque;

use indexmap::IndexMap;
use refract_pointer::{JsonPointer, NodeId};
use rustc_hash::FxHashSet;
use tracing::debug;
use url::Url;

use crate::analyzer::AnalyzerInner;
use crate::cache::{CacheError, LoadCtx, Produced};
use crate::connectivity::GroupId;
use crate::extract::WalkSeed;
use crate::key::KeyValue;
use crate::nominal::Nominal;
use crate::solve::{JsonType, LocalShape, SolveInput, SolveResult, solve};

/// The solved state of one analysis group.
#[derive(Debug)]
pub struct GroupAnalysis {
    pub group_id: GroupId,
    pub solve: SolveResult,
}

pub(crate) async fn compute(
    inner: &AnalyzerInner,
    ctx: LoadCtx,
    group_id: GroupId,
) -> Result<Produced<GroupAnalysis>, CacheError> {
    let loaders = inner.loaders();
    let connectivity = loaders.connectivity.load(&ctx, &()).await?;
    let members: Vec<Url> = connectivity.members(&group_id);

    // Upstream groups export types and nominals for the nodes they
    // reference in this group; gather them per node.
    let mut incoming_types: IndexMap<NodeId, Vec<JsonType>> = IndexMap::new();
    let mut incoming_nominals: IndexMap<NodeId, Vec<Nominal>> = IndexMap::new();
    for upstream in connectivity.incoming_groups(&group_id) {
        let upstream_analysis = loaders.groups.load(&ctx, &upstream).await?;
        for (node, ty) in upstream_analysis.solve.outgoing_types() {
            if members.contains(node.uri()) {
                incoming_types.entry(node).or_default().push(ty);
            }
        }
        for (node, nominal) in upstream_analysis.solve.outgoing_nominals() {
            if members.contains(node.uri()) {
                incoming_nominals.entry(node).or_default().push(nominal);
            }
        }
    }

    // Shapes for every member; nominal walks start at the root of every
    // OpenAPI member and at every incoming nominal. Tombs contribute
    // neither shapes nor walks.
    let mut nodes: IndexMap<NodeId, LocalShape> = IndexMap::new();
    let mut queue: VecDeque<WalkSeed> = VecDeque::new();
    for uri in &members {
        let shapes = loaders.shapes.load(&ctx, uri).await?;
        if shapes.is_tomb() {
            continue;
        }
        nodes.extend(
            shapes
                .shapes
                .iter()
                .map(|(node, shape)| (node.clone(), shape.clone())),
        );
        if shapes.is_openapi_root() {
            queue.push_back(WalkSeed {
                uri: uri.clone(),
                pointer: JsonPointer::empty(),
                nominal: Nominal::Document,
            });
        }
    }
    for (node, nominals) in &incoming_nominals {
        for nominal in nominals {
            queue.push_back(WalkSeed::new(node, *nominal));
        }
    }

    // Walk to a fixed point: in-group ref targets seed further walks, so
    // roles cross member documents until nothing new turns up.
    let mut labels: IndexMap<NodeId, Nominal> = IndexMap::new();
    let mut seen: FxHashSet<(NodeId, Nominal)> = FxHashSet::default();
    while let Some(seed) = queue.pop_front() {
        if !members.contains(&seed.uri) {
            continue;
        }
        if !seen.insert((seed.node_id(), seed.nominal)) {
            continue;
        }
        let walk = loaders.nominal_walk.load(&ctx, &seed).await?;
        for (node, nominal) in &walk.labels {
            labels.entry(node.clone()).or_insert(*nominal);
        }
        for (target, nominal) in &walk.seeds {
            if members.contains(target.uri()) {
                queue.push_back(WalkSeed::new(target, *nominal));
            }
        }
    }

    let input = SolveInput {
        nodes,
        nominals: labels,
        incoming_types,
        incoming_nominals,
        options: Default::default(),
    };
    let result = solve(&input);
    debug!(
        target: "refract::group",
        group = %group_id,
        nodes = input.nodes.len(),
        ok = result.ok(),
        "group solved"
    );

    let content_hash = KeyValue::Seq(vec![
        KeyValue::Str(group_id.to_string()),
        result.content_key(),
    ])
    .fingerprint()
    .to_hex();
    Ok(Produced::new(
        GroupAnalysis {
            group_id,
            solve: result,
        },
        content_hash,
    ))
}
