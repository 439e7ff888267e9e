use super::{Scheduler, report_flow_end};
use crate::clock::{Clock, ClockId, ClockReturn};
use crate::element::{Bin, Element, State, StateChange};
use crate::pad::FlowSuccess;
use parking_lot::Mutex;
use std::collections::HashSet;

/// How a [`Scheduler`] drives its elements.
///
/// State hooks run after the bin's children for upward transitions and
/// before them for downward ones, so a policy sees elements already
/// playing when it starts them and still playing when it stops them.
pub trait SchedulerPolicy: Send + Sync {
    /// Factory name.
    fn name(&self) -> &str;

    /// Whether loop-based elements run on their own threads, so an element
    /// may block waiting for a peer.
    fn is_threaded(&self) -> bool {
        false
    }

    /// `element` joined the scheduler.
    fn element_added(&self, _scheduler: &Scheduler, _element: &Element) {}

    /// `element` left the scheduler.
    fn element_removed(&self, _scheduler: &Scheduler, _element: &Element) {}

    /// The owning bin is taking `transition`.
    fn state_changed(&self, _scheduler: &Scheduler, _transition: StateChange) {}

    /// Drive loop-based elements once from the caller's thread. False when
    /// nothing made progress.
    fn iterate(&self, scheduler: &Scheduler) -> bool;

    /// Wait for `id` on behalf of `element`.
    fn clock_wait(
        &self,
        _scheduler: &Scheduler,
        _element: &Element,
        clock: &dyn Clock,
        id: &ClockId,
    ) -> ClockReturn {
        clock.wait(id)
    }
}

/// Cooperative policy: [`Scheduler::iterate`] runs one step of every
/// playing loop-based element, and of nested bins, in the caller.
#[derive(Default)]
pub struct BasicPolicy {
    /// Elements whose loop ended since the last Ready to Paused.
    finished: Mutex<HashSet<String>>,
}

impl SchedulerPolicy for BasicPolicy {
    fn name(&self) -> &str {
        "basic"
    }

    fn element_removed(&self, _scheduler: &Scheduler, element: &Element) {
        self.finished.lock().remove(element.name());
    }

    fn state_changed(&self, _scheduler: &Scheduler, transition: StateChange) {
        if matches!(transition, StateChange::ReadyToPaused | StateChange::PausedToReady) {
            self.finished.lock().clear();
        }
    }

    fn iterate(&self, scheduler: &Scheduler) -> bool {
        let mut progressed = false;
        for element in scheduler.elements() {
            if element.state() != State::Playing {
                continue;
            }
            if let Some(bin) = Bin::from_element(&element) {
                progressed |= bin.iterate();
                continue;
            }
            if !element.is_loop_based() || self.finished.lock().contains(element.name()) {
                continue;
            }
            match element.iterate() {
                Ok(FlowSuccess::Ok) => progressed = true,
                Ok(FlowSuccess::Idle) => {}
                Err(err) => {
                    self.finished.lock().insert(element.name().to_string());
                    report_flow_end(&element, err);
                }
            }
        }
        progressed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::element::ElementImpl;
    use crate::pad::{FlowError, FlowResult, FlowSuccess};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Countdown(AtomicUsize);

    impl ElementImpl for Countdown {
        fn is_loop_based(&self) -> bool {
            true
        }

        fn iterate(&self, _element: &Element) -> FlowResult {
            match self.0.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)) {
                Ok(_) => Ok(FlowSuccess::Ok),
                Err(_) => Err(FlowError::Eos),
            }
        }
    }

    #[test]
    fn test_runs_until_loops_finish() {
        let scheduler = Scheduler::new("s", Box::new(BasicPolicy::default()), Arc::new(SystemClock::new()));
        let element = Element::new("count", Countdown(AtomicUsize::new(3)));
        scheduler.add_element(&element);

        // not playing yet
        assert!(!scheduler.iterate());

        element.set_state(State::Playing).unwrap();
        let mut rounds = 0;
        while scheduler.iterate() {
            rounds += 1;
        }
        assert_eq!(rounds, 3);
        assert!(!scheduler.iterate());
    }
}
