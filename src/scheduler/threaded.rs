//! One streaming thread per loop-based element.

use super::{Scheduler, SchedulerPolicy, report_flow_end};
use crate::element::{Element, StateChange, WeakElement};
use crate::error::Result;
use crate::observability::span_element;
use crate::pad::FlowSuccess;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::thread::JoinHandle;

#[derive(Debug, Clone, Copy)]
enum TaskCommand {
    Start,
    Pause,
    Stop,
}

/// Lifecycle of a [`Task`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Thread alive, loop not running.
    Paused,
    /// Loop running.
    Started,
    /// Thread finished.
    Stopped,
}

impl TaskState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => TaskState::Paused,
            1 => TaskState::Started,
            _ => TaskState::Stopped,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            TaskState::Paused => 0,
            TaskState::Started => 1,
            TaskState::Stopped => 2,
        }
    }
}

/// A thread calling an element's loop function while started.
///
/// The loop pauses itself when an iteration returns a flow error (EOS
/// included); fatal ones are posted on the bus.
pub struct Task {
    element: String,
    commands: kanal::Sender<TaskCommand>,
    state: Arc<AtomicU8>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Task {
    /// Spawn a paused task for `element`.
    ///
    /// # Errors
    ///
    /// [`crate::Error::Io`] if the thread cannot be spawned.
    pub fn spawn(element: &Element, bin: &str) -> Result<Self> {
        let (tx, rx) = kanal::unbounded();
        let state = Arc::new(AtomicU8::new(TaskState::Paused.as_u8()));
        let weak = element.downgrade();
        let thread_state = Arc::clone(&state);
        let span = span_element(bin, element.name());
        let handle = std::thread::Builder::new()
            .name(format!("padflow-{}", element.name()))
            .spawn(move || {
                let _entered = span.entered();
                run(weak, rx, &thread_state);
                thread_state.store(TaskState::Stopped.as_u8(), Ordering::Release);
            })?;
        tracing::debug!(element = %element.name(), "task spawned");
        Ok(Self {
            element: element.name().to_string(),
            commands: tx,
            state,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Name of the driven element.
    pub fn element(&self) -> &str {
        &self.element
    }

    /// Current state.
    pub fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Run the loop.
    pub fn start(&self) {
        self.send(TaskCommand::Start);
    }

    /// Stop calling the loop after the current iteration.
    pub fn pause(&self) {
        self.send(TaskCommand::Pause);
    }

    /// Ask the thread to exit after the current iteration.
    pub fn stop(&self) {
        self.send(TaskCommand::Stop);
    }

    /// Wait for the thread to exit. Call [`stop`](Self::stop) and unblock
    /// the element first.
    pub fn join(&self) {
        if let Some(handle) = self.handle.lock().take()
            && handle.join().is_err()
        {
            tracing::error!(element = %self.element, "task thread panicked");
        }
    }

    fn send(&self, command: TaskCommand) {
        if self.commands.send(command).is_err() {
            tracing::trace!(element = %self.element, ?command, "task already gone");
        }
    }
}

impl Drop for Task {
    fn drop(&mut self) {
        self.send(TaskCommand::Stop);
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("element", &self.element)
            .field("state", &self.state())
            .finish()
    }
}

fn run(element: WeakElement, commands: kanal::Receiver<TaskCommand>, state: &AtomicU8) {
    let mut running = false;
    loop {
        let command = if running {
            match commands.try_recv() {
                Ok(command) => command,
                Err(_) => return,
            }
        } else {
            match commands.recv() {
                Ok(command) => Some(command),
                Err(_) => return,
            }
        };
        match command {
            Some(TaskCommand::Start) => running = true,
            Some(TaskCommand::Pause) => running = false,
            Some(TaskCommand::Stop) => return,
            None => {}
        }
        let current = if running { TaskState::Started } else { TaskState::Paused };
        state.store(current.as_u8(), Ordering::Release);
        if !running {
            continue;
        }

        let Some(element) = element.upgrade() else {
            return;
        };
        match element.iterate() {
            Ok(FlowSuccess::Ok) => {}
            Ok(FlowSuccess::Idle) => std::thread::yield_now(),
            Err(err) => {
                report_flow_end(&element, err);
                running = false;
                state.store(TaskState::Paused.as_u8(), Ordering::Release);
            }
        }
    }
}

/// Policy giving each loop-based element its own [`Task`].
///
/// Tasks are created and started on Paused to Playing, paused on Playing
/// to Paused and joined on Paused to Ready, after the elements were
/// unlocked.
#[derive(Default)]
pub struct ThreadedPolicy {
    tasks: Mutex<Vec<(WeakElement, Task)>>,
}

impl ThreadedPolicy {
    fn start_all(&self, scheduler: &Scheduler) {
        let mut tasks = self.tasks.lock();
        for element in scheduler.elements() {
            if !element.is_loop_based() || element.is_bin() {
                continue;
            }
            if tasks.iter().any(|(e, _)| e.upgrade().as_ref() == Some(&element)) {
                continue;
            }
            match Task::spawn(&element, scheduler.name()) {
                Ok(task) => tasks.push((element.downgrade(), task)),
                Err(err) => element.post_error(
                    crate::error::ErrorDomain::Core,
                    format!("could not start streaming thread: {err}"),
                    None,
                ),
            }
        }
        for (_, task) in tasks.iter() {
            task.start();
        }
    }

    fn stop_all(&self) {
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for (element, task) in &tasks {
            task.stop();
            if let Some(element) = element.upgrade() {
                element.unlock();
            }
        }
        for (_, task) in &tasks {
            task.join();
        }
    }

    /// Number of live tasks.
    pub fn task_count(&self) -> usize {
        self.tasks.lock().len()
    }
}

impl SchedulerPolicy for ThreadedPolicy {
    fn name(&self) -> &str {
        "threaded"
    }

    fn is_threaded(&self) -> bool {
        true
    }

    fn element_removed(&self, _scheduler: &Scheduler, element: &Element) {
        let removed: Vec<(WeakElement, Task)> = {
            let mut tasks = self.tasks.lock();
            let (gone, kept) = std::mem::take(&mut *tasks)
                .into_iter()
                .partition(|(e, _)| e.upgrade().is_none_or(|e| e == *element));
            *tasks = kept;
            gone
        };
        for (_, task) in &removed {
            task.stop();
        }
        element.unlock();
        for (_, task) in &removed {
            task.join();
        }
    }

    fn state_changed(&self, scheduler: &Scheduler, transition: StateChange) {
        match transition {
            StateChange::PausedToPlaying => self.start_all(scheduler),
            StateChange::PlayingToPaused => {
                for (_, task) in self.tasks.lock().iter() {
                    task.pause();
                }
            }
            StateChange::PausedToReady => self.stop_all(),
            _ => {}
        }
    }

    fn iterate(&self, _scheduler: &Scheduler) -> bool {
        self.tasks
            .lock()
            .iter()
            .any(|(_, t)| t.state() == TaskState::Started)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{ElementImpl, State};
    use crate::pad::{FlowError, FlowResult, FlowSuccess};
    use std::sync::atomic::AtomicUsize;
    use std::time::{Duration, Instant};

    struct Counter(Arc<AtomicUsize>, usize);

    impl ElementImpl for Counter {
        fn is_loop_based(&self) -> bool {
            true
        }

        fn iterate(&self, _element: &Element) -> FlowResult {
            if self.0.fetch_add(1, Ordering::SeqCst) + 1 >= self.1 {
                return Err(FlowError::Eos);
            }
            Ok(FlowSuccess::Ok)
        }
    }

    fn wait_for(mut f: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if f() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        false
    }

    #[test]
    fn test_task_runs_until_eos() {
        let count = Arc::new(AtomicUsize::new(0));
        let element = Element::new("counter", Counter(Arc::clone(&count), 10));
        element.set_state(State::Playing).unwrap();

        let task = Task::spawn(&element, "test").unwrap();
        assert_eq!(task.state(), TaskState::Paused);
        task.start();
        assert!(wait_for(|| count.load(Ordering::SeqCst) == 10));
        assert!(wait_for(|| task.state() == TaskState::Paused));

        task.stop();
        task.join();
        assert_eq!(task.state(), TaskState::Stopped);
        assert_eq!(count.load(Ordering::SeqCst), 10);
    }
}
