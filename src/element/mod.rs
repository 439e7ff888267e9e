//! Elements, bins and pipelines.
//!
//! An [`Element`] owns a set of pads and walks the state machine
//! `Null <-> Ready <-> Paused <-> Playing` one adjacent step at a time.
//! Behaviour comes from an [`ElementImpl`]; the element itself takes care
//! of stepping, pad activation, clock bookkeeping and notification.
//!
//! A [`Bin`] is an element containing other elements, with its own
//! [`Scheduler`]; a [`Pipeline`] is the top-level bin that owns the
//! [`Bus`].

mod bin;
mod imp;
mod pipeline;
mod state;

pub use bin::{Bin, BinImpl};
pub use imp::{ElementImpl, NoopElement};
pub use pipeline::Pipeline;
pub use state::{State, StateChange, StateChangeError, StateChangeSuccess};

use crate::bus::{Bus, Message};
use crate::clock::{Clock, ClockId, ClockReturn, ClockTime};
use crate::error::{Error, ErrorDomain, Result};
use crate::observability::metrics;
use crate::pad::{FlowResult, Pad, PadDirection, PadLinkReturn, PadPresence, PadTemplate};
use crate::scheduler::{Scheduler, WeakScheduler};
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

type StateCallback = Arc<dyn Fn(&Element, State, State) + Send + Sync>;
type PadCallback = Arc<dyn Fn(&Element, &Pad) + Send + Sync>;

#[derive(Default)]
struct Callbacks {
    state_changed: Mutex<Vec<StateCallback>>,
    pad_added: Mutex<Vec<PadCallback>>,
    pad_removed: Mutex<Vec<PadCallback>>,
}

#[derive(Debug, Default)]
struct StateInner {
    current: State,
    pending: Option<State>,
    target: State,
}

struct ElementInner {
    name: String,
    imp: Arc<dyn ElementImpl>,
    imp_any: Arc<dyn Any + Send + Sync>,
    pads: RwLock<Vec<Pad>>,
    parent: Mutex<Option<WeakElement>>,
    /// Serializes state walks.
    state_lock: Mutex<()>,
    state: Mutex<StateInner>,
    clock: Mutex<Option<Arc<dyn Clock>>>,
    base_time: AtomicU64,
    clock_id: Mutex<Option<ClockId>>,
    scheduler: Mutex<WeakScheduler>,
    callbacks: Callbacks,
    pad_counter: AtomicU32,
}

/// Handle to an element. Clones refer to the same element.
#[derive(Clone)]
pub struct Element {
    inner: Arc<ElementInner>,
}

/// Non-owning element handle.
#[derive(Clone, Default)]
pub struct WeakElement(Weak<ElementInner>);

impl WeakElement {
    /// The element, if it still exists.
    pub fn upgrade(&self) -> Option<Element> {
        self.0.upgrade().map(|inner| Element { inner })
    }
}

/// Builder for [`Element`].
#[must_use]
pub struct ElementBuilder {
    element: Element,
    pads: Vec<Pad>,
}

impl ElementBuilder {
    /// Add a pad.
    pub fn pad(mut self, pad: Pad) -> Self {
        self.pads.push(pad);
        self
    }

    /// Finish.
    ///
    /// # Errors
    ///
    /// [`Error::Element`] on duplicate pad names, [`Error::Pad`] if a pad
    /// already has a parent.
    pub fn build(self) -> Result<Element> {
        for pad in self.pads {
            self.element.add_pad(pad)?;
        }
        Ok(self.element)
    }
}

impl Element {
    /// Element without pads.
    pub fn new<T: ElementImpl>(name: impl Into<String>, imp: T) -> Self {
        let imp = Arc::new(imp);
        Self {
            inner: Arc::new(ElementInner {
                name: name.into(),
                imp: imp.clone(),
                imp_any: imp,
                pads: RwLock::new(Vec::new()),
                parent: Mutex::new(None),
                state_lock: Mutex::new(()),
                state: Mutex::new(StateInner::default()),
                clock: Mutex::new(None),
                base_time: AtomicU64::new(0),
                clock_id: Mutex::new(None),
                scheduler: Mutex::new(WeakScheduler::default()),
                callbacks: Callbacks::default(),
                pad_counter: AtomicU32::new(0),
            }),
        }
    }

    /// Start building an element.
    pub fn builder<T: ElementImpl>(name: impl Into<String>, imp: T) -> ElementBuilder {
        ElementBuilder {
            element: Self::new(name, imp),
            pads: Vec::new(),
        }
    }

    /// Name, unique within the parent bin.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Behaviour.
    pub fn imp(&self) -> &dyn ElementImpl {
        self.inner.imp.as_ref()
    }

    /// Behaviour as its concrete type.
    pub fn downcast_imp<T: ElementImpl>(&self) -> Option<&T> {
        self.inner.imp_any.downcast_ref::<T>()
    }

    /// Non-owning handle.
    pub fn downgrade(&self) -> WeakElement {
        WeakElement(Arc::downgrade(&self.inner))
    }

    /// Containing bin.
    pub fn parent(&self) -> Option<Element> {
        self.inner.parent.lock().as_ref().and_then(WeakElement::upgrade)
    }

    pub(crate) fn set_parent(&self, parent: Option<&Element>) -> Result<()> {
        let mut slot = self.inner.parent.lock();
        if parent.is_some()
            && let Some(existing) = slot.as_ref().and_then(WeakElement::upgrade)
        {
            return Err(Error::Element(format!(
                "{} already belongs to {}",
                self.inner.name,
                existing.name()
            )));
        }
        *slot = parent.map(Element::downgrade);
        Ok(())
    }

    /// Whether this element is a bin.
    pub fn is_bin(&self) -> bool {
        self.downcast_imp::<BinImpl>().is_some()
    }

    // ------------------------------------------------------------------
    // Pads
    // ------------------------------------------------------------------

    /// All pads, in insertion order.
    pub fn pads(&self) -> Vec<Pad> {
        self.inner.pads.read().clone()
    }

    /// Pad by name.
    pub fn pad(&self, name: &str) -> Option<Pad> {
        self.inner.pads.read().iter().find(|p| p.name() == name).cloned()
    }

    /// Source pads.
    pub fn src_pads(&self) -> Vec<Pad> {
        self.pads_in(PadDirection::Src)
    }

    /// Sink pads.
    pub fn sink_pads(&self) -> Vec<Pad> {
        self.pads_in(PadDirection::Sink)
    }

    fn pads_in(&self, direction: PadDirection) -> Vec<Pad> {
        self.inner
            .pads
            .read()
            .iter()
            .filter(|p| p.direction() == direction)
            .cloned()
            .collect()
    }

    /// Add a pad.
    ///
    /// # Errors
    ///
    /// [`Error::Element`] if a pad of that name exists, [`Error::Pad`] if
    /// the pad already has a parent.
    pub fn add_pad(&self, pad: Pad) -> Result<()> {
        {
            let mut pads = self.inner.pads.write();
            if pads.iter().any(|p| p.name() == pad.name()) {
                return Err(Error::Element(format!(
                    "{} already has a pad named {}",
                    self.inner.name,
                    pad.name()
                )));
            }
            pad.set_parent(Some(self))?;
            pads.push(pad.clone());
        }
        pad.handler().parent_set(&pad);
        tracing::debug!(element = %self.inner.name, pad = pad.name(), "pad added");
        let callbacks = self.inner.callbacks.pad_added.lock().clone();
        for cb in callbacks {
            cb(self, &pad);
        }
        Ok(())
    }

    /// Remove a pad, unlinking it first.
    ///
    /// # Errors
    ///
    /// [`Error::Element`] if the pad does not belong to this element.
    pub fn remove_pad(&self, pad: &Pad) -> Result<()> {
        if !self.inner.pads.read().contains(pad) {
            return Err(Error::Element(format!(
                "{} is not a pad of {}",
                pad.name(),
                self.inner.name
            )));
        }
        pad.handler().parent_unset(pad);
        pad.unlink();
        self.inner.pads.write().retain(|p| p != pad);
        pad.set_parent(None)?;
        tracing::debug!(element = %self.inner.name, pad = pad.name(), "pad removed");
        let callbacks = self.inner.callbacks.pad_removed.lock().clone();
        for cb in callbacks {
            cb(self, pad);
        }
        Ok(())
    }

    /// Templates of the pads this element can have.
    pub fn pad_templates(&self) -> Vec<PadTemplate> {
        self.inner.imp.pad_templates()
    }

    /// Create and add a pad from a request template.
    ///
    /// # Errors
    ///
    /// [`Error::Element`] if there is no such request template or the
    /// element declines.
    pub fn request_pad(&self, template_name: &str, name: Option<&str>) -> Result<Pad> {
        let template = self
            .pad_templates()
            .into_iter()
            .find(|t| t.name() == template_name && t.presence() == PadPresence::Request)
            .ok_or_else(|| {
                Error::Element(format!(
                    "{} has no request template {template_name}",
                    self.inner.name
                ))
            })?;
        let name = match name {
            Some(name) => name.to_string(),
            None => template.pad_name(self.inner.pad_counter.fetch_add(1, Ordering::Relaxed)),
        };
        let pad = self
            .inner
            .imp
            .request_new_pad(self, &template, &name)
            .ok_or_else(|| Error::Element(format!("{} refused pad {name}", self.inner.name)))?;
        self.add_pad(pad.clone())?;
        Ok(pad)
    }

    /// Give back a request pad.
    ///
    /// # Errors
    ///
    /// [`Error::Element`] if the pad does not belong to this element.
    pub fn release_request_pad(&self, pad: &Pad) -> Result<()> {
        self.inner.imp.release_pad(self, pad);
        self.remove_pad(pad)
    }

    /// Link the first free source pad of this element to the first free
    /// sink pad of `dest` that accepts it.
    ///
    /// # Errors
    ///
    /// [`Error::Element`] if either side has no free pad.
    pub fn link(&self, dest: &Element) -> Result<PadLinkReturn> {
        let src = self
            .src_pads()
            .into_iter()
            .find(|p| !p.is_linked())
            .ok_or_else(|| Error::Element(format!("{} has no free source pad", self.inner.name)))?;
        let sinks: Vec<Pad> = dest.sink_pads().into_iter().filter(|p| !p.is_linked()).collect();
        if sinks.is_empty() {
            return Err(Error::Element(format!("{} has no free sink pad", dest.name())));
        }
        for sink in sinks {
            let ret = src.link(&sink)?;
            if ret.is_linked() {
                return Ok(ret);
            }
        }
        Ok(PadLinkReturn::Refused)
    }

    /// Call `f` whenever a pad is added.
    pub fn connect_pad_added<F>(&self, f: F)
    where
        F: Fn(&Element, &Pad) + Send + Sync + 'static,
    {
        self.inner.callbacks.pad_added.lock().push(Arc::new(f));
    }

    /// Call `f` whenever a pad is removed.
    pub fn connect_pad_removed<F>(&self, f: F)
    where
        F: Fn(&Element, &Pad) + Send + Sync + 'static,
    {
        self.inner.callbacks.pad_removed.lock().push(Arc::new(f));
    }

    /// Call `f(element, old, new)` after every committed state step.
    pub fn connect_state_changed<F>(&self, f: F)
    where
        F: Fn(&Element, State, State) + Send + Sync + 'static,
    {
        self.inner.callbacks.state_changed.lock().push(Arc::new(f));
    }

    // ------------------------------------------------------------------
    // State machine
    // ------------------------------------------------------------------

    /// Current state.
    pub fn state(&self) -> State {
        self.inner.state.lock().current
    }

    /// State of the step in progress, if any.
    pub fn pending_state(&self) -> Option<State> {
        self.inner.state.lock().pending
    }

    /// State the element is walking toward.
    pub fn target_state(&self) -> State {
        self.inner.state.lock().target
    }

    /// Walk to `target` one adjacent step at a time.
    ///
    /// Stops at the first failing step, leaving the element in the last
    /// state it reached, or at the first asynchronous step, leaving it
    /// pending until [`continue_state`](Self::continue_state).
    pub fn set_state(&self, target: State) -> std::result::Result<StateChangeSuccess, StateChangeError> {
        let _walk = self.inner.state_lock.lock();
        self.inner.state.lock().target = target;
        tracing::debug!(element = %self.inner.name, ?target, "setting state");
        self.walk_state()
    }

    /// Finish an asynchronous step with `result` and resume walking toward
    /// the target.
    pub fn continue_state(
        &self,
        result: std::result::Result<StateChangeSuccess, StateChangeError>,
    ) -> std::result::Result<StateChangeSuccess, StateChangeError> {
        let ret = {
            let _walk = self.inner.state_lock.lock();
            let transition = {
                let s = self.inner.state.lock();
                s.pending.and_then(|p| StateChange::new(s.current, p))
            };
            let Some(transition) = transition else {
                return Ok(StateChangeSuccess::Success);
            };
            match result {
                Err(err) => {
                    self.abort_state(&err);
                    return Err(err);
                }
                Ok(_) => {
                    self.commit_state(transition);
                    self.post_message(Message::AsyncDone {
                        source: self.inner.name.clone(),
                    });
                }
            }
            self.walk_state()
        };
        if let Some(parent) = self.parent()
            && let Some(bin) = parent.downcast_imp::<BinImpl>()
        {
            bin.child_async_done(&parent);
        }
        ret
    }

    fn walk_state(&self) -> std::result::Result<StateChangeSuccess, StateChangeError> {
        let mut result = StateChangeSuccess::Success;
        loop {
            let (current, target) = {
                let s = self.inner.state.lock();
                (s.current, s.target)
            };
            let Some(transition) = current
                .next_toward(target)
                .and_then(|next| StateChange::new(current, next))
            else {
                return Ok(result);
            };
            self.inner.state.lock().pending = Some(transition.next());

            match self.run_transition(transition) {
                Ok(StateChangeSuccess::Async) => {
                    tracing::debug!(element = %self.inner.name, ?transition, "state change is async");
                    return Ok(StateChangeSuccess::Async);
                }
                Ok(success) => {
                    self.commit_state(transition);
                    if success == StateChangeSuccess::NoPreroll {
                        result = success;
                    }
                }
                Err(err) => {
                    self.abort_state(&err);
                    return Err(err);
                }
            }
        }
    }

    fn run_transition(
        &self,
        transition: StateChange,
    ) -> std::result::Result<StateChangeSuccess, StateChangeError> {
        if transition == StateChange::ReadyToPaused {
            for pad in self.pads() {
                pad.set_flushing(false);
                pad.clear_eos();
            }
        }
        let result = self.inner.imp.change_state(self, transition);
        if transition == StateChange::PausedToReady && result.is_ok() {
            for pad in self.pads() {
                pad.set_flushing(true);
            }
        }
        result
    }

    fn abort_state(&self, err: &StateChangeError) {
        let mut s = self.inner.state.lock();
        s.pending = None;
        s.target = s.current;
        drop(s);
        tracing::warn!(element = %self.inner.name, %err, "state change failed");
    }

    fn commit_state(&self, transition: StateChange) {
        let (old, new, pending) = {
            let mut s = self.inner.state.lock();
            let old = s.current;
            s.current = transition.next();
            s.pending = None;
            let pending = (s.target != s.current).then_some(s.target);
            (old, s.current, pending)
        };
        tracing::debug!(element = %self.inner.name, ?old, ?new, "state changed");
        metrics::record_state_change(&self.inner.name, new);
        let callbacks = self.inner.callbacks.state_changed.lock().clone();
        for cb in callbacks {
            cb(self, old, new);
        }
        self.post_message(Message::StateChanged {
            source: self.inner.name.clone(),
            old,
            new,
            pending,
        });
    }

    // ------------------------------------------------------------------
    // Scheduling and clocking
    // ------------------------------------------------------------------

    /// Scheduler driving this element (its parent bin's).
    pub fn scheduler(&self) -> Option<Scheduler> {
        self.inner.scheduler.lock().upgrade()
    }

    pub(crate) fn set_scheduler(&self, scheduler: Option<&Scheduler>) {
        *self.inner.scheduler.lock() = scheduler.map(Scheduler::downgrade).unwrap_or_default();
    }

    /// Whether the scheduler should drive [`iterate`](Self::iterate).
    pub fn is_loop_based(&self) -> bool {
        self.inner.imp.is_loop_based()
    }

    /// Run one step of the element's loop.
    pub fn iterate(&self) -> FlowResult {
        self.inner.imp.iterate(self)
    }

    /// Wake up anything blocked inside the element, including a clock wait.
    pub fn unlock(&self) {
        self.inner.imp.unlock(self);
        self.unschedule_clock_wait();
    }

    /// Whether this element offers a clock.
    pub fn provides_clock(&self) -> bool {
        self.inner.imp.provides_clock()
    }

    /// The clock this element offers.
    pub fn provide_clock(&self) -> Option<Arc<dyn Clock>> {
        self.inner.imp.provide_clock()
    }

    /// Preference among clock providers.
    pub fn clock_priority(&self) -> u32 {
        self.inner.imp.clock_priority()
    }

    /// Whether the element wants the pipeline clock.
    pub fn requires_clock(&self) -> bool {
        self.inner.imp.requires_clock()
    }

    /// Clock in use.
    pub fn clock(&self) -> Option<Arc<dyn Clock>> {
        self.inner.clock.lock().clone()
    }

    /// Install (or withdraw) the pipeline clock.
    pub fn set_clock(&self, clock: Option<Arc<dyn Clock>>) {
        self.inner.imp.set_clock(self, clock.as_ref());
        *self.inner.clock.lock() = clock;
    }

    /// Clock time corresponding to running time zero.
    pub fn base_time(&self) -> ClockTime {
        ClockTime::from_nanos(self.inner.base_time.load(Ordering::Acquire))
    }

    /// Set the base time.
    pub fn set_base_time(&self, base: ClockTime) {
        self.inner.base_time.store(base.nanos(), Ordering::Release);
    }

    /// Block until `running_time` on the pipeline clock.
    ///
    /// The wait goes through the scheduler so it can substitute its own
    /// strategy; [`unlock`](Self::unlock) interrupts it.
    pub fn clock_wait(&self, running_time: ClockTime) -> ClockReturn {
        let Some(clock) = self.clock() else {
            return ClockReturn::NoClock;
        };
        if running_time.is_none() {
            return ClockReturn::BadTime;
        }
        let id = ClockId::new(self.base_time().saturating_add(running_time));
        *self.inner.clock_id.lock() = Some(id.clone());
        let ret = match self.scheduler() {
            Some(scheduler) => scheduler.clock_wait(self, clock.as_ref(), &id),
            None => clock.wait(&id),
        };
        self.inner.clock_id.lock().take();
        tracing::trace!(element = %self.inner.name, time = %id.time(), ?ret, "clock wait done");
        ret
    }

    /// Interrupt a clock wait in progress.
    pub fn unschedule_clock_wait(&self) {
        if let Some(id) = self.inner.clock_id.lock().as_ref() {
            id.unschedule();
        }
    }

    // ------------------------------------------------------------------
    // Messages
    // ------------------------------------------------------------------

    /// Bus of the pipeline this element is in.
    pub fn bus(&self) -> Option<Bus> {
        let mut current = Some(self.clone());
        while let Some(element) = current {
            if let Some(bus) = element.downcast_imp::<BinImpl>().and_then(BinImpl::bus) {
                return Some(bus.clone());
            }
            current = element.parent();
        }
        None
    }

    /// Post on the pipeline bus. False if there is no bus.
    pub fn post_message(&self, message: Message) -> bool {
        match self.bus() {
            Some(bus) => {
                bus.post(message);
                true
            }
            None => false,
        }
    }

    /// Report an error to the application.
    pub fn post_error(&self, domain: ErrorDomain, message: impl Into<String>, debug: Option<String>) {
        let message = message.into();
        tracing::error!(element = %self.inner.name, %domain, %message, "element error");
        self.post_message(Message::Error {
            source: self.inner.name.clone(),
            domain,
            message,
            debug,
        });
    }

    /// Report a non-fatal problem to the application.
    pub fn post_warning(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(element = %self.inner.name, %message, "element warning");
        self.post_message(Message::Warning {
            source: self.inner.name.clone(),
            message,
        });
    }

    /// Announce that this sink consumed end-of-stream.
    pub fn post_eos(&self) {
        tracing::debug!(element = %self.inner.name, "eos");
        self.post_message(Message::Eos {
            source: self.inner.name.clone(),
        });
    }
}

impl PartialEq for Element {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Element {}

impl fmt::Debug for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Element")
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .field("pads", &self.inner.pads.read().len())
            .finish()
    }
}
