//! Schedulers decide when element loops run and which clock a bin uses.
//!
//! Every [`Bin`](crate::element::Bin) owns one [`Scheduler`]. The
//! scheduler keeps track of the bin's children, of the links between their
//! pads and of the schedulers of nested bins. How loop-based elements are
//! driven is up to its [`SchedulerPolicy`]: `"basic"` runs them in the
//! caller of [`Scheduler::iterate`], `"threaded"` gives each one a
//! [`Task`].
//!
//! Clock selection and distribution is the same for every policy:
//!
//! - Ready to Paused: the top-level scheduler selects a clock.
//! - Paused to Playing: it selects again, hands the clock and a base time
//!   to every element that wants one (recursing into nested schedulers)
//!   and starts running time.
//! - Playing to Paused: running time stops; the selection is kept.
//!
//! Selection order: a clock forced with [`Scheduler::use_clock`], then a
//! clock found by a nested scheduler, then the best clock provider among
//! the elements, then the system clock.

mod factory;
mod policy;
mod threaded;

pub use factory::{PolicyConstructor, SchedulerFactory, SchedulerRegistry};
pub use policy::{BasicPolicy, SchedulerPolicy};
pub use threaded::{Task, TaskState, ThreadedPolicy};

use crate::bus::Message;
use crate::clock::{Clock, ClockId, ClockReturn, ClockState, ClockTime};
use crate::element::{Element, StateChange, WeakElement};
use crate::error::ErrorDomain;
use crate::pad::{FlowError, Pad, WeakPad};
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};

#[derive(Default)]
struct SchedulerState {
    parent_element: WeakElement,
    parent: WeakScheduler,
    children: Vec<Scheduler>,
    elements: Vec<WeakElement>,
    fixed_clock: Option<Arc<dyn Clock>>,
    clock: Option<Arc<ClockState>>,
    links: Vec<(WeakPad, WeakPad)>,
}

struct SchedulerInner {
    name: String,
    policy: Box<dyn SchedulerPolicy>,
    system_clock: Arc<dyn Clock>,
    state: Mutex<SchedulerState>,
}

/// Scheduler of one bin. Clones refer to the same scheduler.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

/// Non-owning scheduler handle.
#[derive(Clone, Default)]
pub struct WeakScheduler(Weak<SchedulerInner>);

impl WeakScheduler {
    /// The scheduler, if it still exists.
    pub fn upgrade(&self) -> Option<Scheduler> {
        self.0.upgrade().map(|inner| Scheduler { inner })
    }
}

impl Scheduler {
    /// Scheduler driven by `policy`, falling back to `system_clock`.
    pub fn new(
        name: impl Into<String>,
        policy: Box<dyn SchedulerPolicy>,
        system_clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                name: name.into(),
                policy,
                system_clock,
                state: Mutex::new(SchedulerState::default()),
            }),
        }
    }

    /// Name, usually that of the owning bin.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Name of the policy.
    pub fn policy_name(&self) -> &str {
        self.inner.policy.name()
    }

    /// Whether elements run on their own threads.
    pub fn is_threaded(&self) -> bool {
        self.inner.policy.is_threaded()
    }

    /// Non-owning handle.
    pub fn downgrade(&self) -> WeakScheduler {
        WeakScheduler(Arc::downgrade(&self.inner))
    }

    pub(crate) fn set_parent_element(&self, element: &Element) {
        self.inner.state.lock().parent_element = element.downgrade();
    }

    /// The bin owning this scheduler.
    pub fn parent_element(&self) -> Option<Element> {
        self.inner.state.lock().parent_element.upgrade()
    }

    // ------------------------------------------------------------------
    // Membership
    // ------------------------------------------------------------------

    /// Start scheduling `element`.
    pub fn add_element(&self, element: &Element) {
        {
            let mut state = self.inner.state.lock();
            if state.elements.iter().any(|e| e.upgrade().as_ref() == Some(element)) {
                return;
            }
            state.elements.push(element.downgrade());
        }
        tracing::debug!(scheduler = %self.inner.name, element = %element.name(), "element added");
        self.inner.policy.element_added(self, element);
    }

    /// Stop scheduling `element`; links touching its pads are forgotten.
    pub fn remove_element(&self, element: &Element) {
        {
            let mut state = self.inner.state.lock();
            state
                .elements
                .retain(|e| e.upgrade().is_some_and(|e| e != *element));
            let pads = element.pads();
            state.links.retain(|(src, sink)| {
                let owned = |p: &WeakPad| p.upgrade().is_some_and(|p| pads.contains(&p));
                !owned(src) && !owned(sink) && src.upgrade().is_some() && sink.upgrade().is_some()
            });
        }
        self.inner.policy.element_removed(self, element);
        element.set_clock(None);
        tracing::debug!(scheduler = %self.inner.name, element = %element.name(), "element removed");
    }

    /// Live elements, in insertion order.
    pub fn elements(&self) -> Vec<Element> {
        self.inner
            .state
            .lock()
            .elements
            .iter()
            .filter_map(WeakElement::upgrade)
            .collect()
    }

    /// Elements offering a clock.
    pub fn clock_providers(&self) -> Vec<Element> {
        self.elements().into_iter().filter(Element::provides_clock).collect()
    }

    /// Elements wanting the pipeline clock.
    pub fn clock_receivers(&self) -> Vec<Element> {
        self.elements().into_iter().filter(Element::requires_clock).collect()
    }

    /// Nest `child` under this scheduler.
    pub fn add_scheduler(&self, child: &Scheduler) {
        child.inner.state.lock().parent = self.downgrade();
        let mut state = self.inner.state.lock();
        if !state.children.iter().any(|c| c == child) {
            state.children.push(child.clone());
        }
    }

    /// Undo [`add_scheduler`](Self::add_scheduler).
    pub fn remove_scheduler(&self, child: &Scheduler) {
        self.inner.state.lock().children.retain(|c| c != child);
        let mut child_state = child.inner.state.lock();
        child_state.parent = WeakScheduler::default();
        child_state.clock = None;
    }

    /// Enclosing scheduler.
    pub fn parent(&self) -> Option<Scheduler> {
        self.inner.state.lock().parent.upgrade()
    }

    /// Nested schedulers.
    pub fn children(&self) -> Vec<Scheduler> {
        self.inner.state.lock().children.clone()
    }

    /// Number of nested schedulers.
    pub fn child_count(&self) -> usize {
        self.inner.state.lock().children.len()
    }

    pub(crate) fn pad_link(&self, src: &Pad, sink: &Pad) {
        self.inner
            .state
            .lock()
            .links
            .push((src.downgrade(), sink.downgrade()));
    }

    pub(crate) fn pad_unlink(&self, src: &Pad, sink: &Pad) {
        self.inner.state.lock().links.retain(|(s, k)| {
            !(s.upgrade().is_some_and(|s| s == *src) && k.upgrade().is_some_and(|k| k == *sink))
        });
    }

    /// Live links whose source pad belongs to one of this scheduler's
    /// elements.
    pub fn links(&self) -> Vec<(Pad, Pad)> {
        self.inner
            .state
            .lock()
            .links
            .iter()
            .filter_map(|(s, k)| Some((s.upgrade()?, k.upgrade()?)))
            .collect()
    }

    // ------------------------------------------------------------------
    // Clock
    // ------------------------------------------------------------------

    /// Force `clock`, or go back to automatic selection with `None`.
    pub fn use_clock(&self, clock: Option<Arc<dyn Clock>>) {
        self.inner.state.lock().fixed_clock = clock;
    }

    /// Clock selected for the current or last run.
    pub fn clock(&self) -> Option<Arc<dyn Clock>> {
        self.inner.state.lock().clock.as_ref().map(|c| c.clock())
    }

    /// Clock this scheduler would pick without the system fallback.
    pub fn find_clock(&self) -> Option<Arc<dyn Clock>> {
        let (fixed, children) = {
            let state = self.inner.state.lock();
            (state.fixed_clock.clone(), state.children.clone())
        };
        if fixed.is_some() {
            return fixed;
        }
        if let Some(clock) = children.iter().find_map(Scheduler::find_clock) {
            return Some(clock);
        }
        let mut best: Option<(u32, Arc<dyn Clock>)> = None;
        for element in self.clock_providers() {
            let Some(clock) = element.provide_clock() else {
                continue;
            };
            let priority = element.clock_priority();
            if best.as_ref().is_none_or(|(p, _)| priority > *p) {
                best = Some((priority, clock));
            }
        }
        best.map(|(_, clock)| clock)
    }

    /// The clock to use: [`find_clock`](Self::find_clock), else the system
    /// clock.
    pub fn resolve_clock(&self) -> Arc<dyn Clock> {
        self.find_clock()
            .unwrap_or_else(|| Arc::clone(&self.inner.system_clock))
    }

    /// Time spent playing since the clock was selected.
    pub fn running_time(&self) -> ClockTime {
        self.inner
            .state
            .lock()
            .clock
            .as_ref()
            .map_or(ClockTime::ZERO, |c| c.running_time())
    }

    fn is_top_level(&self) -> bool {
        self.parent().is_none()
    }

    fn select_clock(&self) -> Arc<ClockState> {
        let clock = self.resolve_clock();
        let mut state = self.inner.state.lock();
        if let Some(current) = &state.clock
            && Arc::ptr_eq(&current.clock(), &clock)
        {
            return Arc::clone(current);
        }
        let selected = Arc::new(ClockState::new(Arc::clone(&clock)));
        state.clock = Some(Arc::clone(&selected));
        drop(state);
        tracing::info!(scheduler = %self.inner.name, clock = clock.name(), "clock selected");
        if let Some(bin) = self.parent_element() {
            bin.post_message(Message::NewClock {
                clock: clock.name().to_string(),
            });
        }
        selected
    }

    fn distribute(&self, clock: &Arc<ClockState>, base: ClockTime) {
        let children = {
            let mut state = self.inner.state.lock();
            state.clock = Some(Arc::clone(clock));
            state.children.clone()
        };
        for element in self.clock_receivers() {
            element.set_clock(Some(clock.clock()));
            element.set_base_time(base);
        }
        for child in children {
            child.distribute(clock, base);
        }
    }

    /// Wait on behalf of `element`; the policy may replace the blocking
    /// wait.
    pub fn clock_wait(&self, element: &Element, clock: &dyn Clock, id: &ClockId) -> ClockReturn {
        self.inner.policy.clock_wait(self, element, clock, id)
    }

    // ------------------------------------------------------------------
    // State hooks
    // ------------------------------------------------------------------

    /// Work before the bin's children take `transition`.
    pub(crate) fn prepare(&self, transition: StateChange) {
        if transition == StateChange::PausedToPlaying && self.is_top_level() {
            let clock = self.select_clock();
            let base = clock.activate();
            self.distribute(&clock, base);
            tracing::debug!(scheduler = %self.inner.name, %base, "clock distributed");
        }
        if !transition.is_upward() {
            self.inner.policy.state_changed(self, transition);
        }
    }

    /// Work after the bin's children took `transition`.
    pub(crate) fn complete(&self, transition: StateChange) {
        let top = self.is_top_level();
        match transition {
            StateChange::ReadyToPaused if top => {
                self.select_clock();
            }
            StateChange::PlayingToPaused if top => {
                if let Some(clock) = self.inner.state.lock().clock.as_ref() {
                    clock.deactivate();
                }
            }
            StateChange::PausedToReady if top => {
                if let Some(clock) = self.inner.state.lock().clock.as_ref() {
                    clock.reset();
                }
            }
            _ => {}
        }
        if transition.is_upward() {
            self.inner.policy.state_changed(self, transition);
        }
    }

    /// Drive loop-based elements once. False when none made progress.
    pub fn iterate(&self) -> bool {
        self.inner.policy.iterate(self)
    }
}

/// Log or post a flow return that ended an element's loop.
pub(crate) fn report_flow_end(element: &Element, err: FlowError) {
    if err.is_fatal() {
        element.post_error(
            ErrorDomain::Stream,
            format!("streaming stopped, reason {}", err.name()),
            None,
        );
    } else {
        tracing::debug!(element = %element.name(), reason = err.name(), "loop finished");
    }
}

impl PartialEq for Scheduler {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Scheduler {}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("name", &self.inner.name)
            .field("policy", &self.inner.policy.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::element::ElementImpl;

    struct Provider {
        clock: Arc<dyn Clock>,
        priority: u32,
    }

    impl ElementImpl for Provider {
        fn provides_clock(&self) -> bool {
            true
        }

        fn provide_clock(&self) -> Option<Arc<dyn Clock>> {
            Some(Arc::clone(&self.clock))
        }

        fn clock_priority(&self) -> u32 {
            self.priority
        }
    }

    fn scheduler(name: &str) -> Scheduler {
        Scheduler::new(name, Box::new(BasicPolicy::default()), Arc::new(SystemClock::new()))
    }

    fn provider(name: &str, priority: u32) -> (Element, Arc<dyn Clock>) {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock::with_name(name));
        let element = Element::new(
            name,
            Provider {
                clock: Arc::clone(&clock),
                priority,
            },
        );
        (element, clock)
    }

    #[test]
    fn test_system_clock_fallback() {
        let s = scheduler("top");
        assert!(s.find_clock().is_none());
        assert_eq!(s.resolve_clock().name(), "system-monotonic");
    }

    #[test]
    fn test_highest_priority_provider_wins() {
        let s = scheduler("top");
        let (low, _) = provider("low", 1);
        let (high, high_clock) = provider("high", 5);
        let (tie, _) = provider("tie", 5);
        s.add_element(&low);
        s.add_element(&high);
        s.add_element(&tie);
        assert!(Arc::ptr_eq(&s.find_clock().unwrap(), &high_clock));
    }

    #[test]
    fn test_fixed_beats_children_beats_providers() {
        let top = scheduler("top");
        let child = scheduler("child");
        top.add_scheduler(&child);

        let (p, provider_clock) = provider("p", 9);
        top.add_element(&p);
        assert!(Arc::ptr_eq(&top.find_clock().unwrap(), &provider_clock));

        let child_clock: Arc<dyn Clock> = Arc::new(SystemClock::with_name("child"));
        child.use_clock(Some(Arc::clone(&child_clock)));
        assert!(Arc::ptr_eq(&top.find_clock().unwrap(), &child_clock));

        let fixed: Arc<dyn Clock> = Arc::new(SystemClock::with_name("fixed"));
        top.use_clock(Some(Arc::clone(&fixed)));
        assert!(Arc::ptr_eq(&top.find_clock().unwrap(), &fixed));
    }

    #[test]
    fn test_remove_element_forgets_links() {
        let s = scheduler("top");
        let a = Element::builder("a", crate::element::NoopElement)
            .pad(Pad::new("src", crate::pad::PadDirection::Src))
            .build()
            .unwrap();
        let b = Element::builder("b", crate::element::NoopElement)
            .pad(Pad::new("sink", crate::pad::PadDirection::Sink))
            .build()
            .unwrap();
        s.add_element(&a);
        s.add_element(&b);
        s.pad_link(&a.pad("src").unwrap(), &b.pad("sink").unwrap());
        assert_eq!(s.links().len(), 1);

        s.remove_element(&b);
        assert!(s.links().is_empty());
        assert_eq!(s.elements(), [a]);
    }

    #[test]
    fn test_nesting() {
        let top = scheduler("top");
        let child = scheduler("child");
        top.add_scheduler(&child);
        assert_eq!(child.parent(), Some(top.clone()));
        top.remove_scheduler(&child);
        assert!(child.parent().is_none());
        assert_eq!(top.child_count(), 0);
    }
}
