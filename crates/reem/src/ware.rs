//! Ordered middleware stacks.
//!
//! A [`Ware`] runs its plugs strictly in registration order against one shared
//! state. A plug returning `Err` stops the stack and the error is handed back to
//! the caller untouched.

use crate::error::{ReemError, Result};
use crate::tree::{ContentNode, ContentTree, NodeId};

pub trait Plug<S, C> {
    fn call(&mut self, context: &mut C, state: &mut S) -> Result<()>;
}

impl<S, C, F> Plug<S, C> for F
where
    F: FnMut(&mut C, &mut S) -> Result<()>,
{
    fn call(&mut self, context: &mut C, state: &mut S) -> Result<()> {
        self(context, state)
    }
}

pub enum Binding<C> {
    /// Run against whichever context owns the stack.
    Owner,
    Bound(Box<C>),
}

pub struct Ware<S, C> {
    plugs: Vec<Box<dyn Plug<S, C>>>,
    context: Binding<C>,
}

impl<S, C> Default for Ware<S, C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S, C> Ware<S, C> {
    pub fn new() -> Self {
        Self {
            plugs: Vec::new(),
            context: Binding::Owner,
        }
    }

    pub fn bound(context: C) -> Self {
        Self {
            plugs: Vec::new(),
            context: Binding::Bound(Box::new(context)),
        }
    }

    pub fn plug(&mut self, plug: impl Plug<S, C> + 'static) -> &mut Self {
        self.plugs.push(Box::new(plug));
        self
    }

    pub fn len(&self) -> usize {
        self.plugs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugs.is_empty()
    }

    pub fn is_owner_bound(&self) -> bool {
        matches!(self.context, Binding::Owner)
    }

    pub fn context(&self) -> Option<&C> {
        match &self.context {
            Binding::Owner => None,
            Binding::Bound(context) => Some(&**context),
        }
    }

    /// Moves every plug of `other` to the end of this stack.
    pub fn append(&mut self, other: &mut Ware<S, C>) {
        self.plugs.append(&mut other.plugs);
    }

    pub fn run(&mut self, owner: &mut C, state: &mut S) -> Result<()> {
        let Ware { plugs, context } = self;
        let context = match context {
            Binding::Bound(bound) => &mut **bound,
            Binding::Owner => owner,
        };

        for plug in plugs.iter_mut() {
            plug.call(context, state)?;
        }

        Ok(())
    }

    /// Runs a stack that carries its own context.
    pub fn run_bound(&mut self, state: &mut S) -> Result<()> {
        let Ware { plugs, context } = self;
        let Binding::Bound(context) = context else {
            return Err(ReemError::plugin("stack has no bound context"));
        };
        let context = &mut **context;

        for plug in plugs.iter_mut() {
            plug.call(context, state)?;
        }

        Ok(())
    }
}

/// State threaded through the post, file and list stacks: a working tree and the
/// node currently being processed.
#[derive(Debug, Clone)]
pub struct Cursor {
    pub tree: ContentTree,
    pub id: NodeId,
}

impl Cursor {
    pub fn new(tree: ContentTree, id: NodeId) -> Self {
        Self { tree, id }
    }

    pub fn node(&self) -> Result<&ContentNode> {
        self.tree.node(self.id)
    }

    pub fn node_mut(&mut self) -> Result<&mut ContentNode> {
        self.tree.node_mut(self.id)
    }

    pub fn into_tree(self) -> ContentTree {
        self.tree
    }
}
