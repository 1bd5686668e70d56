//! Arena-indexed execution context tree.
//!
//! Contexts are addressed by [`ContextId`] handles; parents are indexes,
//! so the tree holds no strong reference cycles. Results are append-only
//! `Arc`s: recording happens exactly once per context and every read
//! returns the identical object.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::Value;

use trellis_core::error::{Result, TrellisError};
use trellis_core::event::DeferredValue;
use trellis_core::types::{
    ComponentPath, ElementId, ExecutionResult, ExecutionStatus, SharedResult,
};
use trellis_expr::Scope;

/// Handle into a [`ContextArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(usize);

/// One live execution context.
pub struct ExecutionContext {
    pub path: ComponentPath,
    pub element_id: ElementId,
    pub status: ExecutionStatus,
    /// Variables bound at this level; effective scope is the merge over
    /// ancestors with this map winning.
    pub variables: Scope,
    pub parent: Option<ContextId>,
    pub created_at: DateTime<Utc>,
    children: Vec<(ElementId, ContextId)>,
    result: Option<SharedResult>,
    deferred: HashMap<String, DeferredValue>,
}

impl ExecutionContext {
    pub fn result(&self) -> Option<SharedResult> {
        self.result.clone()
    }

    pub fn children(&self) -> impl Iterator<Item = (&ElementId, ContextId)> {
        self.children.iter().map(|(id, ctx)| (id, *ctx))
    }

    pub fn child(&self, id: &str) -> Option<ContextId> {
        self.children
            .iter()
            .find(|(cid, _)| cid.as_str() == id)
            .map(|(_, ctx)| *ctx)
    }
}

/// Owns every context of one run.
#[derive(Default)]
pub struct ContextArena {
    contexts: Vec<ExecutionContext>,
    root: Option<ContextId>,
}

impl ContextArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn root(&self) -> Option<ContextId> {
        self.root
    }

    pub fn create_root(&mut self, id: ElementId, variables: Scope) -> ContextId {
        let path = ComponentPath::root(&id);
        let ctx = self.push(path, id, None, variables);
        self.root = Some(ctx);
        ctx
    }

    pub fn create_child(
        &mut self,
        parent: ContextId,
        id: ElementId,
        variables: Scope,
    ) -> ContextId {
        let path = self.get(parent).path.child(&id);
        let ctx = self.push(path, id.clone(), Some(parent), variables);
        self.contexts[parent.0].children.push((id, ctx));
        ctx
    }

    fn push(
        &mut self,
        path: ComponentPath,
        element_id: ElementId,
        parent: Option<ContextId>,
        variables: Scope,
    ) -> ContextId {
        self.contexts.push(ExecutionContext {
            path,
            element_id,
            status: ExecutionStatus::Pending,
            variables,
            parent,
            created_at: Utc::now(),
            children: Vec::new(),
            result: None,
            deferred: HashMap::new(),
        });
        ContextId(self.contexts.len() - 1)
    }

    pub fn get(&self, id: ContextId) -> &ExecutionContext {
        &self.contexts[id.0]
    }

    pub fn get_mut(&mut self, id: ContextId) -> &mut ExecutionContext {
        &mut self.contexts[id.0]
    }

    /// Transition a context's status, enforcing monotonicity. The only
    /// backward edge is WaitingForInput -> Running.
    pub fn set_status(&mut self, id: ContextId, next: ExecutionStatus) -> Result<()> {
        let ctx = &mut self.contexts[id.0];
        if !ctx.status.can_transition_to(next) {
            return Err(TrellisError::InvalidTransition {
                path: ctx.path.clone(),
                from: ctx.status,
                to: next,
            });
        }
        ctx.status = next;
        Ok(())
    }

    /// Record the context's terminal result. A second record for the
    /// same context is an invariant violation.
    pub fn record_result(&mut self, id: ContextId, result: ExecutionResult) -> Result<SharedResult> {
        let ctx = &mut self.contexts[id.0];
        if ctx.result.is_some() {
            return Err(TrellisError::DuplicateResult {
                path: ctx.path.clone(),
            });
        }
        let shared = SharedResult::new(result);
        ctx.result = Some(shared.clone());
        Ok(shared)
    }

    /// Flattened variable view for one context: ancestors first, each
    /// level shadowing the one above it.
    pub fn effective_scope(&self, id: ContextId) -> Scope {
        let mut chain = Vec::new();
        let mut cursor = Some(id);
        while let Some(c) = cursor {
            chain.push(c);
            cursor = self.get(c).parent;
        }
        let mut scope = Scope::new();
        for c in chain.into_iter().rev() {
            for (k, v) in &self.get(c).variables {
                scope.insert(k.clone(), v.clone());
            }
        }
        scope
    }

    pub fn set_variable(&mut self, id: ContextId, name: impl Into<String>, value: Value) {
        self.contexts[id.0].variables.insert(name.into(), value);
    }

    /// Bind a deferred event value at this context, visible to the
    /// whole subtree.
    pub fn bind_deferred(&mut self, id: ContextId, value: DeferredValue) {
        let name = value.binding().to_string();
        self.contexts[id.0].deferred.insert(name, value);
    }

    /// Take the nearest deferred binding with this name, walking from
    /// `id` toward the root. Once taken it must be awaited; the value
    /// re-enters the tree as a plain variable.
    pub fn take_deferred(&mut self, id: ContextId, name: &str) -> Option<(ContextId, DeferredValue)> {
        let mut cursor = Some(id);
        while let Some(c) = cursor {
            if self.contexts[c.0].deferred.contains_key(name) {
                let v = self.contexts[c.0].deferred.remove(name);
                return v.map(|v| (c, v));
            }
            cursor = self.contexts[c.0].parent;
        }
        None
    }

    /// Look up a context by absolute path, descending from the root.
    pub fn find(&self, path: &ComponentPath) -> Option<ContextId> {
        let root = self.root?;
        let mut segs = path.segments();
        if segs.next() != Some(self.get(root).element_id.as_str()) {
            return None;
        }
        let mut cursor = root;
        for seg in segs {
            cursor = self.get(cursor).child(seg)?;
        }
        Some(cursor)
    }

    /// Every context that has not reached a terminal status, leaves
    /// before ancestors. Used when failing a cancelled run.
    pub fn live_contexts(&self) -> Vec<ContextId> {
        let mut live: Vec<ContextId> = (0..self.contexts.len())
            .map(ContextId)
            .filter(|id| !self.get(*id).status.is_terminal())
            .collect();
        live.sort_by_key(|id| std::cmp::Reverse(self.get(*id).path.segments().count()));
        live
    }

    /// All recorded results, keyed by absolute path.
    pub fn results(&self) -> Vec<(ComponentPath, SharedResult)> {
        self.contexts
            .iter()
            .filter_map(|c| c.result.clone().map(|r| (c.path.clone(), r)))
            .collect()
    }
}
