//! The top-level bin.

use super::{Bin, State, StateChangeError, StateChangeSuccess};
use crate::bus::{Bus, BusReceiver};
use crate::clock::{Clock, ClockTime};
use crate::context::Context;
use crate::error::Result;
use crate::observability::instrument_pipeline;
use std::ops::Deref;
use std::sync::Arc;

/// Top-level bin: owns the [`Bus`] and selects the clock for everything
/// inside it.
///
/// # Example
///
/// ```rust
/// use padflow::prelude::*;
///
/// let ctx = Context::new();
/// let pipeline = Pipeline::new(&ctx, "demo")?;
/// let src = FakeSrc::builder().num_buffers(3).build("src")?;
/// let sink = FakeSink::new("sink")?;
/// pipeline.add_many(&[&src, &sink])?;
/// src.link(&sink)?;
///
/// pipeline.set_state(State::Playing)?;
/// while pipeline.iterate() {}
/// assert_eq!(FakeSink::buffers_received(&sink), 3);
/// pipeline.set_state(State::Null)?;
/// # Ok::<(), padflow::Error>(())
/// ```
#[derive(Clone, Debug)]
pub struct Pipeline {
    bin: Bin,
    bus: Bus,
}

impl Pipeline {
    /// Pipeline using the context's default scheduler.
    ///
    /// # Errors
    ///
    /// [`crate::Error::UnknownFactory`] if the configured scheduler is not
    /// registered.
    pub fn new(context: &Context, name: impl Into<String>) -> Result<Self> {
        let policy = context.config().default_scheduler.clone();
        Self::with_scheduler(context, name, &policy)
    }

    /// Pipeline using the scheduler factory named `policy`.
    ///
    /// # Errors
    ///
    /// [`crate::Error::UnknownFactory`] if no such factory is registered.
    pub fn with_scheduler(context: &Context, name: impl Into<String>, policy: &str) -> Result<Self> {
        let bus = Bus::new(context.config().bus_capacity);
        let bin = Bin::build(context, name.into(), policy, Some(bus.clone()))?;
        Ok(Self { bin, bus })
    }

    /// The message bus.
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Subscribe to the bus.
    pub fn subscribe(&self) -> BusReceiver {
        self.bus.subscribe()
    }

    /// Force `clock` instead of automatic selection; `None` restores it.
    pub fn use_clock(&self, clock: Option<Arc<dyn Clock>>) {
        self.scheduler().use_clock(clock);
    }

    /// Clock selected for the current or last run.
    pub fn clock(&self) -> Option<Arc<dyn Clock>> {
        self.scheduler().clock()
    }

    /// Time spent in `Playing` since the last `Ready`.
    pub fn running_time(&self) -> ClockTime {
        self.scheduler().running_time()
    }

    /// Go to `Playing`.
    pub fn play(&self) -> std::result::Result<StateChangeSuccess, StateChangeError> {
        let _span = instrument_pipeline(self.element().name());
        self.set_state(State::Playing)
    }

    /// Go back to `Null`, stopping all streaming.
    pub fn stop(&self) -> std::result::Result<StateChangeSuccess, StateChangeError> {
        let _span = instrument_pipeline(self.element().name());
        self.set_state(State::Null)
    }
}

impl Deref for Pipeline {
    type Target = Bin;

    fn deref(&self) -> &Bin {
        &self.bin
    }
}
