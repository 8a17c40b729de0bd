use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

use serde::Serialize;

use crate::primitive::Primitive;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopologyError {
    DuplicatePrimitive { id: String },
    MissingInput { primitive: String, input: String },
    Cycle { remaining: usize },
}

impl fmt::Display for TopologyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TopologyError::DuplicatePrimitive { id } => {
                write!(f, "primitive with id {id} already exists")
            }
            TopologyError::MissingInput { primitive, input } => write!(
                f,
                "input {input} of primitive {primitive} never resolved to a primitive"
            ),
            TopologyError::Cycle { remaining } => write!(
                f,
                "topology contains a dependency cycle ({remaining} primitives unscheduled)"
            ),
        }
    }
}

impl std::error::Error for TopologyError {}

/// Append-only collection of primitives forming a dependency DAG.
///
/// Inputs may reference ids that are added later; [`Topology::validate`]
/// reports any reference that never resolved.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Topology {
    primitives: Vec<Primitive>,
    #[serde(skip)]
    index: HashMap<String, usize>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_primitive(&mut self, primitive: Primitive) -> Result<(), TopologyError> {
        if self.index.contains_key(&primitive.id) {
            return Err(TopologyError::DuplicatePrimitive {
                id: primitive.id.clone(),
            });
        }
        self.index
            .insert(primitive.id.clone(), self.primitives.len());
        self.primitives.push(primitive);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&Primitive> {
        self.index.get(id).map(|&idx| &self.primitives[idx])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Primitives in insertion order.
    pub fn primitives(&self) -> &[Primitive] {
        &self.primitives
    }

    pub fn len(&self) -> usize {
        self.primitives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.primitives.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.primitives.iter().map(|p| p.id.as_str())
    }

    /// Checks that every input reference names a primitive in this topology.
    pub fn validate(&self) -> Result<(), TopologyError> {
        for primitive in &self.primitives {
            for input in &primitive.inputs {
                if !self.index.contains_key(&input.pid) {
                    return Err(TopologyError::MissingInput {
                        primitive: primitive.id.clone(),
                        input: input.pid.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Dependency order, stable with respect to insertion order.
    pub fn execution_order(&self) -> Result<Vec<&Primitive>, TopologyError> {
        self.validate()?;

        let mut pending: Vec<usize> = vec![0; self.primitives.len()];
        let mut users: Vec<Vec<usize>> = vec![Vec::new(); self.primitives.len()];
        for (idx, primitive) in self.primitives.iter().enumerate() {
            let deps: HashSet<usize> = primitive
                .inputs
                .iter()
                .map(|input| self.index[&input.pid])
                .collect();
            pending[idx] = deps.len();
            for dep in deps {
                users[dep].push(idx);
            }
        }

        let mut ready: VecDeque<usize> = (0..self.primitives.len())
            .filter(|&idx| pending[idx] == 0)
            .collect();
        let mut order = Vec::with_capacity(self.primitives.len());
        while let Some(idx) = ready.pop_front() {
            order.push(&self.primitives[idx]);
            for &user in &users[idx] {
                pending[user] -= 1;
                if pending[user] == 0 {
                    ready.push_back(user);
                }
            }
        }

        if order.len() != self.primitives.len() {
            return Err(TopologyError::Cycle {
                remaining: self.primitives.len() - order.len(),
            });
        }
        Ok(order)
    }

    /// Stable content hash (FNV-1a over the bincode encoding), used to key
    /// compiled-program caches.
    /// FNV-1a over the bincode encoding of the topology.
    pub fn fingerprint(&self) -> Result<u64, bincode::Error> {
        let bytes = bincode::serialize(self)?;
        Ok(bytes.iter().fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
            (hash ^ u64::from(*byte)).wrapping_mul(0x0100_0000_01b3)
        }))
    }

    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitive::{ActivationFunc, InputInfo, PrimitiveKind};
    use crate::tensor_utils::tensor_spec_static;
    use crate::types::DType;

    fn input(id: &str) -> Primitive {
        Primitive::new(
            id,
            PrimitiveKind::InputLayout {
                spec: tensor_spec_static(DType::F32, &[2]),
            },
            Vec::new(),
        )
    }

    fn erf(id: &str, src: &str) -> Primitive {
        Primitive::new(
            id,
            PrimitiveKind::Activation {
                func: ActivationFunc::Erf,
            },
            vec![InputInfo::from(src)],
        )
    }

    #[test]
    fn forward_references_resolve_in_execution_order() {
        let mut topology = Topology::new();
        topology.add_primitive(erf("b", "a")).expect("add b");
        topology.add_primitive(input("a")).expect("add a");
        topology.validate().expect("reference resolves");

        let order: Vec<&str> = topology
            .execution_order()
            .expect("order")
            .into_iter()
            .map(|p| p.id.as_str())
            .collect();
        assert_eq!(order, vec!["a", "b"]);
    }

    #[test]
    fn dangling_reference_is_reported() {
        let mut topology = Topology::new();
        topology.add_primitive(erf("b", "ghost")).expect("add b");
        assert_eq!(
            topology.validate(),
            Err(TopologyError::MissingInput {
                primitive: "b".to_string(),
                input: "ghost".to_string(),
            })
        );
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let mut topology = Topology::new();
        topology.add_primitive(input("a")).expect("first add");
        assert!(matches!(
            topology.add_primitive(input("a")),
            Err(TopologyError::DuplicatePrimitive { .. })
        ));
    }

    #[test]
    fn fingerprint_tracks_content() {
        let mut lhs = Topology::new();
        lhs.add_primitive(input("a")).expect("add");
        let mut rhs = Topology::new();
        rhs.add_primitive(input("a")).expect("add");
        let fingerprint = |topology: &Topology| topology.fingerprint().expect("fingerprint");
        assert_eq!(fingerprint(&lhs), fingerprint(&rhs));
        rhs.add_primitive(erf("b", "a")).expect("add");
        assert_ne!(fingerprint(&lhs), fingerprint(&rhs));
        assert_ne!(fingerprint(&Topology::new()), 0xcbf2_9ce4_8422_2325);
    }
}
