//! Bins: elements that contain elements.

use super::{Element, ElementImpl, State, StateChange, StateChangeError, StateChangeSuccess};
use crate::bus::Bus;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::pad::{GhostPad, Pad};
use crate::scheduler::Scheduler;
use daggy::{Dag, NodeIndex};
use parking_lot::RwLock;
use std::ops::Deref;
use std::sync::Arc;

struct BinState {
    children: RwLock<Vec<Element>>,
    scheduler: Scheduler,
    bus: Option<Bus>,
    context: Context,
}

/// The [`ElementImpl`] behind every [`Bin`].
///
/// State changes are applied to the children sink-first, bracketed by the
/// bin's scheduler hooks.
pub struct BinImpl {
    state: Arc<BinState>,
}

impl BinImpl {
    /// Bus owned by this bin (pipelines only).
    pub fn bus(&self) -> Option<&Bus> {
        self.state.bus.as_ref()
    }

    /// Scheduler driving the children.
    pub fn scheduler(&self) -> &Scheduler {
        &self.state.scheduler
    }

    /// Children in the order their states are changed: downstream before
    /// upstream, insertion order where links do not decide.
    fn state_order(&self) -> Vec<Element> {
        let children = self.state.children.read().clone();
        let mut dag: Dag<usize, ()> = Dag::new();
        let nodes: Vec<NodeIndex> = (0..children.len()).map(|i| dag.add_node(i)).collect();

        for (i, child) in children.iter().enumerate() {
            for pad in child.src_pads() {
                let Some(owner) = pad.peer().and_then(|p| p.parent_element()) else {
                    continue;
                };
                let Some(j) = children.iter().position(|c| *c == owner) else {
                    continue;
                };
                if i != j && dag.add_edge(nodes[i], nodes[j], ()).is_err() {
                    tracing::debug!(child = %child.name(), "cycle among children, using insertion order");
                }
            }
        }

        let order = match daggy::petgraph::algo::toposort(dag.graph(), None) {
            Ok(sorted) => sorted.into_iter().map(|n| dag[n]).collect::<Vec<_>>(),
            Err(_) => (0..children.len()).collect(),
        };
        order.into_iter().rev().map(|i| children[i].clone()).collect()
    }

    /// A child finished an async step; commit ours once every child has
    /// reached our pending state.
    pub(crate) fn child_async_done(&self, bin: &Element) {
        let Some(pending) = bin.pending_state() else {
            return;
        };
        let done = self
            .state
            .children
            .read()
            .iter()
            .all(|c| c.state() == pending && c.pending_state().is_none());
        if done && let Err(err) = bin.continue_state(Ok(StateChangeSuccess::Success)) {
            tracing::warn!(bin = %bin.name(), %err, "bin could not continue after async child");
        }
    }
}

impl ElementImpl for BinImpl {
    fn change_state(
        &self,
        element: &Element,
        transition: StateChange,
    ) -> std::result::Result<StateChangeSuccess, StateChangeError> {
        let scheduler = &self.state.scheduler;
        scheduler.prepare(transition);

        let mut result = StateChangeSuccess::Success;
        for child in self.state_order() {
            match child.set_state(transition.next()) {
                Ok(StateChangeSuccess::Async) => result = StateChangeSuccess::Async,
                Ok(StateChangeSuccess::NoPreroll) if result == StateChangeSuccess::Success => {
                    result = StateChangeSuccess::NoPreroll;
                }
                Ok(_) => {}
                Err(err) => {
                    return Err(StateChangeError::new(
                        element.name(),
                        transition,
                        format!("child {} failed: {}", child.name(), err.reason),
                    ));
                }
            }
        }

        scheduler.complete(transition);
        Ok(result)
    }
}

/// A container element with its own scheduler.
///
/// Dereferences to its [`Element`].
#[derive(Clone)]
pub struct Bin {
    element: Element,
    state: Arc<BinState>,
}

impl Bin {
    /// Bin using the context's default scheduler.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownFactory`] if the configured scheduler is not
    /// registered.
    pub fn new(context: &Context, name: impl Into<String>) -> Result<Self> {
        let policy = context.config().default_scheduler.clone();
        Self::with_scheduler(context, name, &policy)
    }

    /// Bin using the scheduler factory named `policy`.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownFactory`] if no such factory is registered.
    pub fn with_scheduler(context: &Context, name: impl Into<String>, policy: &str) -> Result<Self> {
        Self::build(context, name.into(), policy, None)
    }

    pub(crate) fn build(context: &Context, name: String, policy: &str, bus: Option<Bus>) -> Result<Self> {
        let scheduler = context.create_scheduler(policy, &name)?;
        let state = Arc::new(BinState {
            children: RwLock::new(Vec::new()),
            scheduler,
            bus,
            context: context.clone(),
        });
        let element = Element::new(
            name,
            BinImpl {
                state: Arc::clone(&state),
            },
        );
        state.scheduler.set_parent_element(&element);
        Ok(Self { element, state })
    }

    /// View `element` as a bin, if it is one.
    pub fn from_element(element: &Element) -> Option<Self> {
        element.downcast_imp::<BinImpl>().map(|imp| Self {
            element: element.clone(),
            state: Arc::clone(&imp.state),
        })
    }

    /// The bin as a plain element.
    pub fn element(&self) -> &Element {
        &self.element
    }

    /// Context the bin was created in.
    pub fn context(&self) -> &Context {
        &self.state.context
    }

    /// Scheduler driving the children.
    pub fn scheduler(&self) -> &Scheduler {
        &self.state.scheduler
    }

    /// Add a child.
    ///
    /// # Errors
    ///
    /// [`Error::Element`] if the name is taken or the element already has
    /// a parent.
    pub fn add(&self, element: &Element) -> Result<()> {
        if *element == self.element {
            return Err(Error::Element(format!("cannot add {} to itself", self.name())));
        }
        {
            let mut children = self.state.children.write();
            if children.iter().any(|c| c.name() == element.name()) {
                return Err(Error::Element(format!(
                    "{} already has a child named {}",
                    self.name(),
                    element.name()
                )));
            }
            element.set_parent(Some(&self.element))?;
            children.push(element.clone());
        }
        element.set_scheduler(Some(&self.state.scheduler));
        self.state.scheduler.add_element(element);
        if let Some(child) = Bin::from_element(element) {
            self.state.scheduler.add_scheduler(child.scheduler());
        }
        tracing::debug!(bin = %self.name(), child = %element.name(), "child added");
        Ok(())
    }

    /// Add several children.
    ///
    /// # Errors
    ///
    /// Stops at the first child that cannot be added.
    pub fn add_many(&self, elements: &[&Element]) -> Result<()> {
        elements.iter().try_for_each(|e| self.add(e))
    }

    /// Remove a child, unlinking its pads.
    ///
    /// # Errors
    ///
    /// [`Error::Element`] if `element` is not a child.
    pub fn remove(&self, element: &Element) -> Result<()> {
        {
            let mut children = self.state.children.write();
            let Some(index) = children.iter().position(|c| c == element) else {
                return Err(Error::Element(format!(
                    "{} is not a child of {}",
                    element.name(),
                    self.name()
                )));
            };
            children.remove(index);
        }
        for pad in element.pads() {
            pad.unlink();
        }
        self.state.scheduler.remove_element(element);
        if let Some(child) = Bin::from_element(element) {
            self.state.scheduler.remove_scheduler(child.scheduler());
        }
        element.set_scheduler(None);
        element.set_parent(None)?;
        tracing::debug!(bin = %self.name(), child = %element.name(), "child removed");
        Ok(())
    }

    /// Children in insertion order.
    pub fn children(&self) -> Vec<Element> {
        self.state.children.read().clone()
    }

    /// Direct child by name.
    pub fn child_by_name(&self, name: &str) -> Option<Element> {
        self.state
            .children
            .read()
            .iter()
            .find(|c| c.name() == name)
            .cloned()
    }

    /// Child at any depth by name.
    pub fn by_name(&self, name: &str) -> Option<Element> {
        self.children().into_iter().find_map(|child| {
            if child.name() == name {
                Some(child)
            } else {
                Bin::from_element(&child).and_then(|b| b.by_name(name))
            }
        })
    }

    /// Expose `target`, a pad of a child, as a pad of this bin.
    ///
    /// # Errors
    ///
    /// [`Error::Element`] if `target` does not belong to a child, or the pad
    /// name is taken.
    pub fn add_ghost_pad(&self, name: impl Into<String>, target: &Pad) -> Result<GhostPad> {
        let owner = target.parent_element();
        if !owner.is_some_and(|o| self.state.children.read().contains(&o)) {
            return Err(Error::Element(format!(
                "{} is not a pad of a child of {}",
                target.path(),
                self.name()
            )));
        }
        let ghost = GhostPad::new(name, target);
        self.element.add_pad(ghost.pad().clone())?;
        Ok(ghost)
    }

    /// Run one scheduling round. False when nothing could make progress.
    pub fn iterate(&self) -> bool {
        self.state.scheduler.iterate()
    }

    /// Bring every child to this bin's current state.
    ///
    /// # Errors
    ///
    /// The first child that fails.
    pub fn sync_children_states(&self) -> std::result::Result<(), StateChangeError> {
        let state = self.state();
        for child in self.children() {
            if child.state() != state {
                child.set_state(state)?;
            }
        }
        Ok(())
    }
}

impl Deref for Bin {
    type Target = Element;

    fn deref(&self) -> &Element {
        &self.element
    }
}

impl std::fmt::Debug for Bin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bin")
            .field("name", &self.name())
            .field("state", &self.state())
            .field("children", &self.state.children.read().len())
            .finish()
    }
}
