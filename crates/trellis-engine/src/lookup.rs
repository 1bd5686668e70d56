//! Hierarchical path resolution against the context tree.

use trellis_core::types::ExecutionStatus;
use trellis_expr::{access_path, ExprError, HierarchyLookup, PathSeg};

use crate::context::{ContextArena, ContextId};

/// Resolves dotted paths like `flow.node.outcome.text` for templates.
///
/// Resolution starts at the evaluating context and walks toward the
/// root: the first ancestor whose subtree matches the path head wins,
/// so a sibling reference (`node_a.outcome.text` from `node_b`) finds
/// the nearest `node_a`. A match on a non-terminal component is
/// `NotReady`, which is recoverable through the `||` fallback.
pub struct ContextLookup<'a> {
    arena: &'a ContextArena,
    current: ContextId,
}

impl<'a> ContextLookup<'a> {
    pub fn new(arena: &'a ContextArena, current: ContextId) -> Self {
        Self { arena, current }
    }

    /// Descend from `start` along leading identifier segments. Returns
    /// `None` when the first segment matches nothing here.
    fn try_descend(&self, start: ContextId, segs: &[PathSeg]) -> Option<trellis_expr::Result<serde_json::Value>> {
        let head = match &segs[0] {
            PathSeg::Ident(name) => name.as_str(),
            _ => return None,
        };

        // An absolute path may begin with this component's own id.
        let (mut cursor, mut consumed) = if self.arena.get(start).element_id.as_str() == head {
            (start, 1)
        } else {
            match self.arena.get(start).child(head) {
                Some(child) => (child, 1),
                None => return None,
            }
        };

        // Keep descending while segments name children.
        while consumed < segs.len() {
            let PathSeg::Ident(name) = &segs[consumed] else {
                break;
            };
            match self.arena.get(cursor).child(name) {
                Some(child) => {
                    cursor = child;
                    consumed += 1;
                }
                None => break,
            }
        }

        let target = self.arena.get(cursor);
        let walked = target.path.as_str().to_string();
        if !target.status.is_terminal() {
            return Some(Err(ExprError::NotReady(walked)));
        }
        if target.status == ExecutionStatus::Skipped && target.result().is_none() {
            // Skipped subtree without a marker: treat as absent.
            return Some(Err(ExprError::UnknownPath(walked)));
        }
        let Some(result) = target.result() else {
            return Some(Err(ExprError::NotReady(walked)));
        };
        Some(access_path(&result.as_value(), &segs[consumed..], &walked))
    }
}

impl HierarchyLookup for ContextLookup<'_> {
    fn resolve(&self, segments: &[PathSeg]) -> trellis_expr::Result<serde_json::Value> {
        let mut cursor = Some(self.current);
        while let Some(ctx) = cursor {
            if let Some(outcome) = self.try_descend(ctx, segments) {
                return outcome;
            }
            cursor = self.arena.get(ctx).parent;
        }
        Err(ExprError::UnknownPath(trellis_expr::path_to_string(segments)))
    }
}
