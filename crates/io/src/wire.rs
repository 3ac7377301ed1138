//! Binary serialization of preparable/prepared DAGs via `serde` + `bincode`
//! (spec.md §6), preserving handles across a round trip.
//!
//! Producer *functions* (`PreparedFn`/`PreparableFn`/`ViewFn` impls) are
//! opaque Rust closures/structs — they cannot be serialized directly. What
//! *is* stable across a round trip is each function's `stable_id()`
//! (spec.md §4.1: the reducer's own dedup table already relies on this
//! being a faithful stand-in for the function itself), so the wire format
//! carries stable ids and leaves reconstruction to a caller-supplied
//! [`FnRegistry`] that maps a stable id back to a live implementation —
//! the same "construct from a registered name" pattern `oya-workflow` uses
//! for its step registry.
//!
//! `FnGenerator` producers carry a closure with no stable id at all and are
//! therefore not serializable; a graph containing one fails with
//! [`dagforge_core::Error::Serialization`].

use dagforge_core::{Error, GenericResultExt, Handle, Result};
use dagforge_engine::producer::{
    ConstantDeclaration, ConstantGenerator, PlaceholderNode, PreparableFn, PreparableNode,
    PreparedFn, PreparedNode, Producer, ProducerKind, ViewFn, ViewNode,
};
use dagforge_engine::{Dag, Value};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;

use crate::pipeline::PreparedDag;

const CLASS_PLACEHOLDER: &str = "placeholder";
const CLASS_CONSTANT_GENERATOR: &str = "generator::constant";
const CLASS_PREPARED: &str = "prepared";
const CLASS_PREPARABLE: &str = "preparable";
const CLASS_VIEW: &str = "view";

/// Maps a producer function's `stable_id()` back to a live implementation
/// during deserialization. Implement once per pipeline vocabulary (the set
/// of transformers that vocabulary's DAGs use) and hand the same instance
/// to every `deserialize_dag` call for that vocabulary.
pub trait FnRegistry: Send + Sync {
    fn prepared_fn(&self, stable_id: &str) -> Option<Arc<dyn PreparedFn>>;
    fn preparable_fn(&self, stable_id: &str) -> Option<Arc<dyn PreparableFn>>;
    fn view_fn(&self, stable_id: &str) -> Option<Arc<dyn ViewFn>>;
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
enum WireConstantDeclaration {
    Never,
    Always,
    Transitive,
}

impl From<ConstantDeclaration> for WireConstantDeclaration {
    fn from(value: ConstantDeclaration) -> Self {
        match value {
            ConstantDeclaration::Never => Self::Never,
            ConstantDeclaration::Always => Self::Always,
            ConstantDeclaration::Transitive => Self::Transitive,
        }
    }
}

impl From<WireConstantDeclaration> for ConstantDeclaration {
    fn from(value: WireConstantDeclaration) -> Self {
        match value {
            WireConstantDeclaration::Never => Self::Never,
            WireConstantDeclaration::Always => Self::Always,
            WireConstantDeclaration::Transitive => Self::Transitive,
        }
    }
}

#[derive(Serialize, Deserialize)]
enum WireNode {
    Placeholder {
        bits: u128,
        name: String,
    },
    ConstantGenerator {
        bits: u128,
        value: Value,
    },
    Prepared {
        bits: u128,
        parents: Vec<u128>,
        stable_id: String,
        constant_declaration: WireConstantDeclaration,
    },
    Preparable {
        bits: u128,
        parents: Vec<u128>,
        stable_id: String,
    },
    View {
        bits: u128,
        parent: u128,
        stable_id: String,
        resolved: Option<Value>,
    },
}

impl WireNode {
    const fn bits(&self) -> u128 {
        match self {
            Self::Placeholder { bits, .. }
            | Self::ConstantGenerator { bits, .. }
            | Self::Prepared { bits, .. }
            | Self::Preparable { bits, .. }
            | Self::View { bits, .. } => *bits,
        }
    }

    fn parent_bits(&self) -> Vec<u128> {
        match self {
            Self::Placeholder { .. } | Self::ConstantGenerator { .. } => Vec::new(),
            Self::Prepared { parents, .. } | Self::Preparable { parents, .. } => parents.clone(),
            Self::View { parent, .. } => vec![*parent],
        }
    }
}

#[derive(Serialize, Deserialize)]
struct WireDag {
    nodes: Vec<WireNode>,
    placeholders: Vec<u128>,
    outputs: Vec<u128>,
}

/// Serialize any `Dag` (preparable or already-prepared) to bytes.
pub fn serialize_dag(dag: &Dag) -> Result<Vec<u8>> {
    let wire = to_wire(dag)?;
    Ok(bincode::serialize(&wire)
        .tap_err(|e| tracing::warn!(error = %e, "bincode serialization failed"))?)
}

/// Serialize an already-prepared DAG to bytes.
pub fn serialize_prepared_dag(dag: &PreparedDag) -> Result<Vec<u8>> {
    serialize_dag(dag.dag())
}

/// Deserialize a `Dag` previously produced by [`serialize_dag`], reconstructing
/// every producer function via `registry` and preserving every handle
/// exactly (spec.md §6: a deserialized DAG "must compare equal by handle to
/// the original").
pub fn deserialize_dag(bytes: &[u8], registry: &dyn FnRegistry) -> Result<Dag> {
    let wire: WireDag = bincode::deserialize(bytes)
        .tap_err(|e| tracing::warn!(error = %e, "bincode deserialization failed"))?;
    from_wire(wire, registry)
}

/// Deserialize a `Dag` previously produced by [`serialize_prepared_dag`],
/// failing if the reconstructed graph still contains a preparable producer.
pub fn deserialize_prepared_dag(bytes: &[u8], registry: &dyn FnRegistry) -> Result<PreparedDag> {
    let dag = deserialize_dag(bytes, registry)?;
    if dag.is_preparable() {
        return Err(Error::serialization(
            "deserialized graph still contains a preparable producer",
        ));
    }
    Ok(PreparedDag::from_dag(dag))
}

fn to_wire(dag: &Dag) -> Result<WireDag> {
    let nodes = dag
        .subgraph()
        .iter()
        .map(|p| producer_to_wire(p.as_ref()))
        .collect::<Result<Vec<_>>>()?;
    Ok(WireDag {
        nodes,
        placeholders: dag.placeholders().iter().map(|p| p.handle().bits()).collect(),
        outputs: dag.outputs().iter().map(|p| p.handle().bits()).collect(),
    })
}

fn producer_to_wire(p: &dyn Producer) -> Result<WireNode> {
    let bits = p.handle().bits();
    match p.kind() {
        ProducerKind::Placeholder => {
            let node = p
                .as_any()
                .downcast_ref::<PlaceholderNode>()
                .ok_or_else(|| Error::serialization("placeholder downcast failed"))?;
            Ok(WireNode::Placeholder {
                bits,
                name: node.name().to_string(),
            })
        }
        ProducerKind::Generator => p
            .as_any()
            .downcast_ref::<ConstantGenerator>()
            .map(|node| WireNode::ConstantGenerator {
                bits,
                value: node.value().clone(),
            })
            .ok_or_else(|| {
                Error::serialization(format!(
                    "generator '{}' is not serializable: FnGenerator producers carry an opaque closure with no stable id",
                    p.short_name()
                ))
            }),
        ProducerKind::Prepared => {
            let node = p
                .as_any()
                .downcast_ref::<PreparedNode>()
                .ok_or_else(|| Error::serialization("prepared node downcast failed"))?;
            Ok(WireNode::Prepared {
                bits,
                parents: node.parents().iter().map(|parent| parent.handle().bits()).collect(),
                stable_id: node.func().stable_id(),
                constant_declaration: p.constant_declaration().into(),
            })
        }
        ProducerKind::Preparable => {
            let node = p
                .as_any()
                .downcast_ref::<PreparableNode>()
                .ok_or_else(|| Error::serialization("preparable node downcast failed"))?;
            Ok(WireNode::Preparable {
                bits,
                parents: node.parents().iter().map(|parent| parent.handle().bits()).collect(),
                stable_id: node.func().stable_id(),
            })
        }
        ProducerKind::View => {
            let node = p
                .as_any()
                .downcast_ref::<ViewNode>()
                .ok_or_else(|| Error::serialization("view node downcast failed"))?;
            Ok(WireNode::View {
                bits,
                parent: node.parents()[0].handle().bits(),
                stable_id: node.func().stable_id(),
                resolved: node.resolved_value().ok().cloned(),
            })
        }
        ProducerKind::MissingInput => Err(Error::graph_validation(
            "the missing-input sentinel cannot appear in a serializable graph",
        )),
    }
}

fn topo_sort(nodes: &[WireNode]) -> Result<Vec<usize>> {
    let index_of: FxHashMap<u128, usize> = nodes.iter().enumerate().map(|(i, n)| (n.bits(), i)).collect();
    let mut indegree = vec![0usize; nodes.len()];
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    for (i, node) in nodes.iter().enumerate() {
        for parent_bits in node.parent_bits() {
            let parent_index = *index_of
                .get(&parent_bits)
                .ok_or_else(|| Error::serialization("dangling parent reference in serialized graph"))?;
            children[parent_index].push(i);
            indegree[i] += 1;
        }
    }

    let mut queue: VecDeque<usize> = (0..nodes.len()).filter(|&i| indegree[i] == 0).collect();
    let mut order = Vec::with_capacity(nodes.len());
    while let Some(i) = queue.pop_front() {
        order.push(i);
        for &child in &children[i] {
            indegree[child] -= 1;
            if indegree[child] == 0 {
                queue.push_back(child);
            }
        }
    }

    if order.len() != nodes.len() {
        return Err(Error::serialization("cycle in serialized graph"));
    }
    Ok(order)
}

fn from_wire(wire: WireDag, registry: &dyn FnRegistry) -> Result<Dag> {
    let order = topo_sort(&wire.nodes)?;
    let mut built: FxHashMap<u128, Arc<dyn Producer>> = FxHashMap::default();

    for index in order {
        let producer = wire_node_to_producer(&wire.nodes[index], &built, registry)?;
        built.insert(producer.handle().bits(), producer);
    }

    let resolve = |bits: &u128| -> Result<Arc<dyn Producer>> {
        built
            .get(bits)
            .cloned()
            .ok_or_else(|| Error::serialization("unresolved handle in serialized graph"))
    };

    let placeholders = wire.placeholders.iter().map(resolve).collect::<Result<Vec<_>>>()?;
    let outputs = wire.outputs.iter().map(resolve).collect::<Result<Vec<_>>>()?;

    Dag::new(placeholders).with_outputs(outputs)
}

fn wire_node_to_producer(
    node: &WireNode,
    built: &FxHashMap<u128, Arc<dyn Producer>>,
    registry: &dyn FnRegistry,
) -> Result<Arc<dyn Producer>> {
    let resolve = |bits: u128| -> Result<Arc<dyn Producer>> {
        built
            .get(&bits)
            .cloned()
            .ok_or_else(|| Error::serialization("parent referenced before it was built"))
    };

    match node {
        WireNode::Placeholder { bits, name } => Ok(Arc::new(PlaceholderNode::from_parts(
            Handle::from_parts(*bits, CLASS_PLACEHOLDER),
            name.clone(),
        ))),
        WireNode::ConstantGenerator { bits, value } => Ok(Arc::new(ConstantGenerator::from_parts(
            Handle::from_parts(*bits, CLASS_CONSTANT_GENERATOR),
            value.clone(),
        ))),
        WireNode::Prepared {
            bits,
            parents,
            stable_id,
            constant_declaration,
        } => {
            let parents = parents.iter().map(|&b| resolve(b)).collect::<Result<Vec<_>>>()?;
            let func = registry.prepared_fn(stable_id).ok_or_else(|| {
                Error::serialization(format!("no registered PreparedFn for stable id '{stable_id}'"))
            })?;
            Ok(Arc::new(PreparedNode::from_parts(
                Handle::from_parts(*bits, CLASS_PREPARED),
                parents,
                func,
                (*constant_declaration).into(),
            )))
        }
        WireNode::Preparable {
            bits,
            parents,
            stable_id,
        } => {
            let parents = parents.iter().map(|&b| resolve(b)).collect::<Result<Vec<_>>>()?;
            let func = registry.preparable_fn(stable_id).ok_or_else(|| {
                Error::serialization(format!("no registered PreparableFn for stable id '{stable_id}'"))
            })?;
            Ok(Arc::new(PreparableNode::from_parts(
                Handle::from_parts(*bits, CLASS_PREPARABLE),
                parents,
                func,
            )))
        }
        WireNode::View {
            bits,
            parent,
            stable_id,
            resolved,
        } => {
            let parent = resolve(*parent)?;
            let func = registry.view_fn(stable_id).ok_or_else(|| {
                Error::serialization(format!("no registered ViewFn for stable id '{stable_id}'"))
            })?;
            Ok(Arc::new(ViewNode::from_parts(
                Handle::from_parts(*bits, CLASS_VIEW),
                parent,
                func,
                resolved.clone(),
            )))
        }
    }
}
