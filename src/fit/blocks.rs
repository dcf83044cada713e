//! Parameter blocks.
//!
//! A block is one component's parameter group. Each block gets its own
//! optimizer state and learning rate but all of them minimize the same
//! objective.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockKind {
    Template,
    Rvs,
    BasisVectors,
    BasisWeights,
}

impl BlockKind {
    pub fn name(self) -> &'static str {
        match self {
            BlockKind::Template => "template",
            BlockKind::Rvs => "rvs",
            BlockKind::BasisVectors => "basis vectors",
            BlockKind::BasisWeights => "basis weights",
        }
    }

    pub(crate) fn gradient_name(self) -> &'static str {
        match self {
            BlockKind::Template => "template gradient",
            BlockKind::Rvs => "rv gradient",
            BlockKind::BasisVectors => "basis vector gradient",
            BlockKind::BasisWeights => "basis weight gradient",
        }
    }
}

impl fmt::Display for BlockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A block within a model: the component's position plus the parameter group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId {
    pub component: usize,
    pub kind: BlockKind,
}

/// Shape of one block as declared by a component.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockSpec {
    pub id: BlockId,
    pub len: usize,
    pub learning_rate: f64,
}
