//! The structural type solver: union-find over `$ref` equivalences, then
//! an iterative structural unification to a fixed point, with nominal
//! bookkeeping and conflict diagnostics along the way.

use std::collections::BTreeMap;

use indexmap::{IndexMap, IndexSet};
use petgraph::unionfind::UnionFind;
use refract_pointer::NodeId;
use rustc_hash::FxHashMap;
use tracing::trace;

use crate::key::KeyValue;
use crate::nominal::Nominal;

mod types;

pub use types::{JsonType, LocalShape, PrimKind, unify};

#[cfg(test)]
mod tests;

/// Everything one solve consumes: per-node shapes and nominals from the
/// group's own documents, plus types and nominals flowing in from
/// upstream groups.
#[derive(Clone, Debug, Default)]
pub struct SolveInput {
    pub nodes: IndexMap<NodeId, LocalShape>,
    pub nominals: IndexMap<NodeId, Nominal>,
    pub incoming_types: IndexMap<NodeId, Vec<JsonType>>,
    pub incoming_nominals: IndexMap<NodeId, Vec<Nominal>>,
    pub options: SolveOptions,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SolveOptions {
    /// Emit [`SolveDiagnostic::MissingTarget`] for refs that point outside
    /// the solve input instead of tracking them silently.
    pub strict_external: bool,
}

/// A numbered equivalence class of nodes.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ClassId(pub u32);

/// A conflict found during solving. Diagnostics never abort analysis; a
/// conflicted class types as a variable and everything else continues.
#[derive(Clone, Debug, PartialEq)]
pub enum SolveDiagnostic {
    NominalConflict {
        a: Nominal,
        b: Nominal,
        proof_a: NodeId,
        proof_b: NodeId,
    },
    StructConflict {
        node: NodeId,
        left: JsonType,
        right: JsonType,
    },
    MissingTarget {
        from: NodeId,
        to: NodeId,
    },
}

impl std::fmt::Display for SolveDiagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SolveDiagnostic::NominalConflict {
                a,
                b,
                proof_a,
                proof_b,
            } => {
                write!(f, "nominal conflict: {a} (from {proof_a}) vs {b} (from {proof_b})")
            }
            SolveDiagnostic::StructConflict { node, left, right } => {
                write!(f, "structural conflict at {node}: {left} vs {right}")
            }
            SolveDiagnostic::MissingTarget { from, to } => {
                write!(f, "ref target {to} of {from} is not in the solve input")
            }
        }
    }
}

/// A lookup against a [`SolveResult`] that the caller got wrong.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum SolveLookupError {
    #[error("node {0} was not part of the solve input")]
    NotInInput(NodeId),
    #[error("node {0} has no equivalence class")]
    NoClass(NodeId),
}

static TYPEVAR: JsonType = JsonType::TypeVar;

/// The outcome of one solve.
#[derive(Debug)]
pub struct SolveResult {
    ok: bool,
    diagnostics: Vec<SolveDiagnostic>,
    input_nodes: IndexSet<NodeId>,
    class_of: FxHashMap<NodeId, ClassId>,
    class_types: FxHashMap<ClassId, JsonType>,
    class_nominals: FxHashMap<ClassId, (Nominal, NodeId)>,
    externals: IndexSet<NodeId>,
}

impl SolveResult {
    /// `false` when any diagnostic was emitted.
    pub fn ok(&self) -> bool {
        self.ok
    }

    pub fn diagnostics(&self) -> &[SolveDiagnostic] {
        &self.diagnostics
    }

    /// The structural type of `node`, which must be an input node.
    /// Unresolved classes answer with a type variable.
    pub fn get_type(&self, node: &NodeId) -> Result<&JsonType, SolveLookupError> {
        if !self.input_nodes.contains(node) {
            return Err(SolveLookupError::NotInInput(node.clone()));
        }
        let class = self
            .class_of
            .get(node)
            .ok_or_else(|| SolveLookupError::NoClass(node.clone()))?;
        Ok(self.class_types.get(class).unwrap_or(&TYPEVAR))
    }

    /// The equivalence class of `node`, which must be an input node.
    pub fn get_class_id(&self, node: &NodeId) -> Result<ClassId, SolveLookupError> {
        if !self.input_nodes.contains(node) {
            return Err(SolveLookupError::NotInInput(node.clone()));
        }
        self.class_of
            .get(node)
            .copied()
            .ok_or_else(|| SolveLookupError::NoClass(node.clone()))
    }

    /// The nominal carried by `node`'s class, if any. Unknown nodes answer
    /// `None`; hover treats them as plain values.
    pub fn get_canonical_nominal(&self, node: &NodeId) -> Option<Nominal> {
        let class = self.class_of.get(node)?;
        self.class_nominals.get(class).map(|(nominal, _)| *nominal)
    }

    /// The nodes referenced by this solve but owned by other groups.
    pub fn externals(&self) -> impl ExactSizeIterator<Item = &NodeId> {
        self.externals.iter()
    }

    /// A snapshot of the types this solve exports for external nodes.
    pub fn outgoing_types(&self) -> IndexMap<NodeId, JsonType> {
        self.externals
            .iter()
            .map(|node| {
                let ty = self
                    .class_of
                    .get(node)
                    .and_then(|class| self.class_types.get(class))
                    .cloned()
                    .unwrap_or(JsonType::TypeVar);
                (node.clone(), ty)
            })
            .collect()
    }

    /// A snapshot of the nominals this solve exports for external nodes.
    pub fn outgoing_nominals(&self) -> IndexMap<NodeId, Nominal> {
        self.externals
            .iter()
            .filter_map(|node| {
                let class = self.class_of.get(node)?;
                let (nominal, _) = self.class_nominals.get(class)?;
                Some((node.clone(), *nominal))
            })
            .collect()
    }

    /// A canonical rendering of everything observable about this result,
    /// used as the group-analysis content hash.
    pub fn content_key(&self) -> KeyValue {
        // Class ids are renumbered by each solve, so classes are keyed by
        // their smallest member instead.
        let mut representatives: FxHashMap<ClassId, String> = FxHashMap::default();
        let mut sorted: Vec<(&NodeId, &ClassId)> = self.class_of.iter().collect();
        sorted.sort();
        for &(node, class) in &sorted {
            representatives
                .entry(*class)
                .or_insert_with(|| node.to_string());
        }

        let nodes: BTreeMap<String, KeyValue> = sorted
            .iter()
            .map(|&(node, class)| {
                let ty = self.class_types.get(class).unwrap_or(&TYPEVAR);
                let nominal = self
                    .class_nominals
                    .get(class)
                    .map(|(nominal, _)| KeyValue::Str(nominal.as_str().to_owned()))
                    .unwrap_or(KeyValue::Null);
                let entry = KeyValue::Seq(vec![
                    KeyValue::Str(representatives[class].clone()),
                    KeyValue::Str(ty.to_string()),
                    nominal,
                ]);
                (node.to_string(), entry)
            })
            .collect();

        KeyValue::Map(BTreeMap::from([
            ("ok".to_owned(), KeyValue::Bool(self.ok)),
            (
                "diagnostics".to_owned(),
                KeyValue::Seq(
                    self.diagnostics
                        .iter()
                        .map(|d| KeyValue::Str(d.to_string()))
                        .collect(),
                ),
            ),
            ("nodes".to_owned(), KeyValue::Map(nodes)),
        ]))
    }
}

/// Runs the solver over `input`. Pure: equal inputs (modulo map order)
/// produce equal results.
pub fn solve(input: &SolveInput) -> SolveResult {
    Solver::new(input).run()
}

struct Solver<'a> {
    input: &'a SolveInput,
    interned: IndexSet<NodeId>,
    externals: IndexSet<NodeId>,
    class_of_index: Vec<ClassId>,
    /// Member intern indices per class, in intern order.
    classes: Vec<Vec<usize>>,
    class_types: FxHashMap<ClassId, JsonType>,
    class_nominals: FxHashMap<ClassId, (Nominal, NodeId)>,
    diagnostics: Vec<SolveDiagnostic>,
}

impl<'a> Solver<'a> {
    fn new(input: &'a SolveInput) -> Self {
        Self {
            input,
            interned: IndexSet::new(),
            externals: IndexSet::new(),
            class_of_index: Vec::new(),
            classes: Vec::new(),
            class_types: FxHashMap::default(),
            class_nominals: FxHashMap::default(),
            diagnostics: Vec::new(),
        }
    }

    fn run(mut self) -> SolveResult {
        self.build_classes();
        self.assign_nominals();
        self.unify_to_fixed_point();

        let class_of = self
            .interned
            .iter()
            .enumerate()
            .map(|(index, node)| (node.clone(), self.class_of_index[index]))
            .collect();
        let ok = self.diagnostics.is_empty();
        SolveResult {
            ok,
            diagnostics: self.diagnostics,
            input_nodes: self.input.nodes.keys().cloned().collect(),
            class_of,
            class_types: self.class_types,
            class_nominals: self.class_nominals,
            externals: self.externals,
        }
    }

    fn class_of(&self, node: &NodeId) -> Option<ClassId> {
        let index = self.interned.get_index_of(node)?;
        Some(self.class_of_index[index])
    }

    /// Phase 1: intern every referenced node, union `$ref` edges, and
    /// enumerate equivalence classes. Ref targets outside the input are
    /// tracked as externals but unioned all the same.
    fn build_classes(&mut self) {
        for (node, shape) in &self.input.nodes {
            self.interned.insert(node.clone());
            for child in shape.children() {
                self.interned.insert(child.clone());
            }
        }

        let mut union_find = UnionFind::<usize>::new(self.interned.len());
        for (node, shape) in &self.input.nodes {
            let LocalShape::Ref(target) = shape else {
                continue;
            };
            if !self.input.nodes.contains_key(target) {
                self.externals.insert(target.clone());
                if self.input.options.strict_external {
                    self.diagnostics.push(SolveDiagnostic::MissingTarget {
                        from: node.clone(),
                        to: target.clone(),
                    });
                }
            }
            let a = self.interned.get_index_of(node).expect("interned");
            let b = self.interned.get_index_of(target).expect("interned");
            union_find.union(a, b);
        }

        let mut class_by_root: FxHashMap<usize, ClassId> = FxHashMap::default();
        for index in 0..self.interned.len() {
            let root = union_find.find_mut(index);
            let class = *class_by_root.entry(root).or_insert_with(|| {
                self.classes.push(Vec::new());
                ClassId((self.classes.len() - 1) as u32)
            });
            self.classes[class.0 as usize].push(index);
            self.class_of_index.push(class);
        }
        trace!(
            target: "refract::solve",
            nodes = self.interned.len(),
            classes = self.classes.len(),
            "classes built"
        );
    }

    /// Phase 1, continued: at most one nominal per class. The first
    /// observed nominal wins; later distinct ones are conflicts.
    fn assign_nominals(&mut self) {
        let local = self
            .input
            .nominals
            .iter()
            .map(|(node, nominal)| (node, *nominal));
        let incoming = self
            .input
            .incoming_nominals
            .iter()
            .flat_map(|(node, nominals)| nominals.iter().map(move |nominal| (node, *nominal)));

        for (node, nominal) in local.chain(incoming) {
            let Some(class) = self.class_of(node) else {
                continue;
            };
            match self.class_nominals.get(&class) {
                None => {
                    self.class_nominals.insert(class, (nominal, node.clone()));
                }
                Some((existing, proof)) if *existing != nominal => {
                    self.diagnostics.push(SolveDiagnostic::NominalConflict {
                        a: *existing,
                        b: nominal,
                        proof_a: proof.clone(),
                        proof_b: node.clone(),
                    });
                }
                Some(_) => {}
            }
        }
    }

    /// Phase 2: structurally unify each class once every class it depends
    /// on has a type. Classes that never become ready (pure ref cycles)
    /// and classes that fail to unify both end as type variables.
    fn unify_to_fixed_point(&mut self) {
        let mut pending: IndexSet<ClassId> =
            (0..self.classes.len() as u32).map(ClassId).collect();
        loop {
            let mut progressed = false;
            for class in pending.iter().copied().collect::<Vec<_>>() {
                if !self.is_ready(class) {
                    continue;
                }
                let ty = self.unify_class(class).unwrap_or(JsonType::TypeVar);
                self.class_types.insert(class, ty);
                pending.shift_remove(&class);
                progressed = true;
            }
            if !progressed {
                break;
            }
        }
        for class in pending {
            self.class_types.insert(class, JsonType::TypeVar);
        }
    }

    /// A class is ready once the classes of every field and element its
    /// members' concrete shapes reference have types.
    fn is_ready(&self, class: ClassId) -> bool {
        self.members_with_shapes(class).all(|(_, shape)| match shape {
            LocalShape::Object(fields) | LocalShape::Array(fields) => fields
                .values()
                .all(|child| match self.class_of(child) {
                    Some(child_class) => self.class_types.contains_key(&child_class),
                    None => false,
                }),
            LocalShape::Prim(_) | LocalShape::Ref(_) => true,
        })
    }

    fn members_with_shapes(
        &self,
        class: ClassId,
    ) -> impl Iterator<Item = (&NodeId, &LocalShape)> {
        self.classes[class.0 as usize].iter().filter_map(|&index| {
            let node = self.interned.get_index(index).expect("interned");
            self.input.nodes.get(node).map(|shape| (node, shape))
        })
    }

    /// Folds incoming types and member shape types together, starting
    /// from a type variable. A failure records a conflict and leaves the
    /// class to type as a variable.
    fn unify_class(&mut self, class: ClassId) -> Option<JsonType> {
        let mut acc = JsonType::TypeVar;
        let members: Vec<usize> = self.classes[class.0 as usize].clone();

        for &index in &members {
            let node = self.interned.get_index(index).expect("interned").clone();
            let Some(incoming) = self.input.incoming_types.get(&node) else {
                continue;
            };
            for ty in incoming {
                match unify(&acc, ty) {
                    Some(unified) => acc = unified,
                    None => {
                        self.diagnostics.push(SolveDiagnostic::StructConflict {
                            node,
                            left: acc,
                            right: ty.clone(),
                        });
                        return None;
                    }
                }
            }
        }

        for index in members {
            let node = self.interned.get_index(index).expect("interned").clone();
            let Some(shape) = self.input.nodes.get(&node) else {
                continue;
            };
            let ty = match self.shape_to_type(&node, shape) {
                Ok(Some(ty)) => ty,
                Ok(None) => continue,
                Err(()) => return None,
            };
            match unify(&acc, &ty) {
                Some(unified) => acc = unified,
                None => {
                    self.diagnostics.push(SolveDiagnostic::StructConflict {
                        node,
                        left: acc,
                        right: ty,
                    });
                    return None;
                }
            }
        }
        Some(acc)
    }

    /// Maps a concrete shape to a structural type using the already-typed
    /// child classes. Array element types are unified across every index.
    fn shape_to_type(
        &mut self,
        node: &NodeId,
        shape: &LocalShape,
    ) -> Result<Option<JsonType>, ()> {
        match shape {
            LocalShape::Prim(kind) => Ok(Some(JsonType::Prim(*kind))),
            LocalShape::Ref(_) => Ok(None),
            LocalShape::Object(fields) => {
                let fields = fields
                    .iter()
                    .map(|(key, child)| (key.clone(), self.child_type(child)))
                    .collect();
                Ok(Some(JsonType::Object(fields)))
            }
            LocalShape::Array(fields) => {
                let mut elem = JsonType::TypeVar;
                for child in fields.values() {
                    let ty = self.child_type(child);
                    match unify(&elem, &ty) {
                        Some(unified) => elem = unified,
                        None => {
                            self.diagnostics.push(SolveDiagnostic::StructConflict {
                                node: node.clone(),
                                left: elem,
                                right: ty,
                            });
                            return Err(());
                        }
                    }
                }
                Ok(Some(JsonType::array(elem)))
            }
        }
    }

    fn child_type(&self, child: &NodeId) -> JsonType {
        self.class_of(child)
            .and_then(|class| self.class_types.get(&class))
            .cloned()
            .unwrap_or(JsonType::TypeVar)
    }
}
