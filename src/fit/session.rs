//! The optimizer session created by `Model::setup`.
//!
//! A session owns one [`Adam`] state per parameter block. It is handed back to
//! the caller and threaded through every `optimize` call. Before use it is
//! checked against the model's current block layout, so a session built for
//! another model (or order) is rejected instead of silently misapplied.

use crate::error::EngineError;
use crate::fit::adam::Adam;
use crate::fit::blocks::{BlockId, BlockSpec};

#[derive(Debug, Clone)]
pub struct SessionBlock {
    pub id: BlockId,
    pub optimizer: Adam,
}

#[derive(Debug, Clone)]
pub struct FitSession {
    order_index: usize,
    blocks: Vec<SessionBlock>,
    iterations: usize,
}

impl FitSession {
    pub(crate) fn new(order_index: usize, specs: &[BlockSpec]) -> Self {
        let blocks = specs
            .iter()
            .map(|s| SessionBlock {
                id: s.id,
                optimizer: Adam::new(s.learning_rate, s.len),
            })
            .collect();
        Self {
            order_index,
            blocks,
            iterations: 0,
        }
    }

    pub fn order_index(&self) -> usize {
        self.order_index
    }

    /// Total optimization iterations run with this session.
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    pub fn blocks(&self) -> &[SessionBlock] {
        &self.blocks
    }

    pub(crate) fn blocks_mut(&mut self) -> &mut [SessionBlock] {
        &mut self.blocks
    }

    pub(crate) fn record_iteration(&mut self) {
        self.iterations += 1;
    }

    /// Verify that this session was built for `order_index` with `specs`.
    pub(crate) fn check(&self, order_index: usize, specs: &[BlockSpec]) -> Result<(), EngineError> {
        if order_index != self.order_index {
            return Err(EngineError::SessionMismatch(format!(
                "session belongs to order index {}, model to {order_index}",
                self.order_index
            )));
        }
        if specs.len() != self.blocks.len() {
            return Err(EngineError::SessionMismatch(format!(
                "{} blocks in session, {} in model",
                self.blocks.len(),
                specs.len()
            )));
        }
        for (block, spec) in self.blocks.iter().zip(specs) {
            if block.id != spec.id || block.optimizer.len() != spec.len {
                return Err(EngineError::SessionMismatch(format!(
                    "block {} of component {} has {} parameters, expected {}",
                    spec.id.kind,
                    spec.id.component,
                    block.optimizer.len(),
                    spec.len
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fit::blocks::BlockKind;

    fn specs() -> Vec<BlockSpec> {
        vec![
            BlockSpec {
                id: BlockId {
                    component: 0,
                    kind: BlockKind::Template,
                },
                len: 30,
                learning_rate: 0.01,
            },
            BlockSpec {
                id: BlockId {
                    component: 0,
                    kind: BlockKind::Rvs,
                },
                len: 5,
                learning_rate: 10.0,
            },
        ]
    }

    #[test]
    fn matching_layout_passes() {
        let session = FitSession::new(2, &specs());
        assert!(session.check(2, &specs()).is_ok());
        assert_eq!(session.blocks()[1].optimizer.learning_rate(), 10.0);
    }

    #[test]
    fn other_order_is_rejected() {
        let session = FitSession::new(2, &specs());
        assert!(matches!(session.check(3, &specs()), Err(EngineError::SessionMismatch(_))));
    }

    #[test]
    fn changed_shape_is_rejected() {
        let session = FitSession::new(0, &specs());
        let mut other = specs();
        other[0].len = 31;
        assert!(session.check(0, &other).is_err());
    }
}
