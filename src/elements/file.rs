//! File-based source and sink elements.

use crate::buffer::Buffer;
use crate::caps::Caps;
use crate::element::{Element, ElementImpl, StateChange, StateChangeError, StateChangeSuccess};
use crate::error::{Error, ErrorDomain, Result};
use crate::event::Event;
use crate::io::{BufferedOutputStream, Cancellable, DEFAULT_BUFFER_SIZE};
use crate::memory::{DEFAULT_MAP_BLOCK, MappedFile};
use crate::pad::{FlowError, FlowResult, FlowSuccess, Pad, PadHandler, PadTemplate};
use parking_lot::Mutex;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn fail_state(element: &Element, transition: StateChange, what: &str, err: &Error) -> StateChangeError {
    element.post_error(ErrorDomain::Resource, what.to_string(), Some(err.to_string()));
    StateChangeError::new(element.name(), transition, format!("{what}: {err}"))
}

// ============================================================================
// FileSrc
// ============================================================================

#[derive(Default)]
struct SrcState {
    file: Option<MappedFile>,
    cursor: u64,
    eos_sent: bool,
}

struct SrcShared {
    location: PathBuf,
    block_size: usize,
    state: Mutex<SrcState>,
}

impl SrcShared {
    fn read(&self, offset: u64, size: usize) -> std::result::Result<Buffer, FlowError> {
        let Some(file) = self.state.lock().file.clone() else {
            return Err(FlowError::Flushing);
        };
        if offset >= file.len() {
            return Err(FlowError::Eos);
        }
        let size = size.min((file.len() - offset) as usize);
        let mut buffer = if size == 0 {
            Buffer::from_vec(Vec::new())
        } else {
            file.map_region(offset, size).map_err(|err| {
                tracing::error!(path = %self.location.display(), offset, size, %err, "mapping failed");
                FlowError::Error
            })?
        };
        let meta = buffer.metadata_mut();
        meta.offset = Some(offset);
        meta.offset_end = Some(offset + size as u64);
        Ok(buffer)
    }
}

struct FileSrcPad(Arc<SrcShared>);

impl PadHandler for FileSrcPad {
    fn get_range(&self, _pad: &Pad, offset: u64, size: usize) -> std::result::Result<Buffer, FlowError> {
        self.0.read(offset, size)
    }
}

/// Source reading a file through memory mappings.
///
/// The file is opened on Ready to Paused and closed on Paused to Ready,
/// which also rewinds the read position. Downstream may pull arbitrary
/// ranges from the `src` pad; unless built with `loop_based(false)` the
/// element also pushes the file in `block_size` chunks from its loop.
pub struct FileSrc {
    shared: Arc<SrcShared>,
    loop_based: bool,
}

/// Settings for a [`FileSrc`].
#[derive(Debug, Clone)]
pub struct FileSrcBuilder {
    location: PathBuf,
    block_size: usize,
    loop_based: bool,
}

impl FileSrcBuilder {
    /// Bytes per pushed buffer (64 KiB by default).
    pub fn block_size(mut self, size: usize) -> Self {
        self.block_size = size.max(1);
        self
    }

    /// Whether the element pushes from its own loop (default) or only
    /// answers pulls.
    pub fn loop_based(mut self, loop_based: bool) -> Self {
        self.loop_based = loop_based;
        self
    }

    /// Create the element.
    ///
    /// # Errors
    ///
    /// Propagates pad registration failures.
    pub fn build(self, name: impl Into<String>) -> Result<Element> {
        let shared = Arc::new(SrcShared {
            location: self.location,
            block_size: self.block_size,
            state: Mutex::new(SrcState::default()),
        });
        let pad = Pad::builder_from_template(&PadTemplate::src("src", Caps::any()), "src")
            .handler(Arc::new(FileSrcPad(Arc::clone(&shared))))
            .build();
        let imp = FileSrc {
            shared,
            loop_based: self.loop_based,
        };
        Element::builder(name, imp).pad(pad).build()
    }
}

impl FileSrc {
    /// Source for `location` with default settings.
    ///
    /// # Errors
    ///
    /// Propagates pad registration failures.
    pub fn new(name: impl Into<String>, location: impl AsRef<Path>) -> Result<Element> {
        Self::builder(location).build(name)
    }

    /// Start configuring a source for `location`.
    pub fn builder(location: impl AsRef<Path>) -> FileSrcBuilder {
        FileSrcBuilder {
            location: location.as_ref().to_path_buf(),
            block_size: DEFAULT_MAP_BLOCK,
            loop_based: true,
        }
    }

    /// Read position of a `FileSrc` element's loop.
    pub fn position(element: &Element) -> u64 {
        element
            .downcast_imp::<FileSrc>()
            .map_or(0, |f| f.shared.state.lock().cursor)
    }
}

impl ElementImpl for FileSrc {
    fn change_state(
        &self,
        element: &Element,
        transition: StateChange,
    ) -> std::result::Result<StateChangeSuccess, StateChangeError> {
        match transition {
            StateChange::ReadyToPaused => {
                let file = MappedFile::open(&self.shared.location)
                    .map_err(|err| fail_state(element, transition, "could not open file for reading", &err))?
                    .with_block_size(self.shared.block_size);
                tracing::debug!(element = %element.name(), path = %self.shared.location.display(), "opened");
                *self.shared.state.lock() = SrcState {
                    file: Some(file),
                    ..SrcState::default()
                };
            }
            StateChange::PausedToReady => {
                *self.shared.state.lock() = SrcState::default();
            }
            _ => {}
        }
        Ok(StateChangeSuccess::Success)
    }

    fn pad_templates(&self) -> Vec<PadTemplate> {
        vec![PadTemplate::src("src", Caps::any())]
    }

    fn is_loop_based(&self) -> bool {
        self.loop_based
    }

    fn iterate(&self, element: &Element) -> FlowResult {
        let pad = element.pad("src").ok_or(FlowError::Error)?;
        let offset = self.shared.state.lock().cursor;
        match self.shared.read(offset, self.shared.block_size) {
            Ok(buffer) => {
                let len = buffer.len() as u64;
                pad.push(buffer)?;
                self.shared.state.lock().cursor = offset + len;
                Ok(FlowSuccess::Ok)
            }
            Err(FlowError::Eos) => {
                let first = !std::mem::replace(&mut self.shared.state.lock().eos_sent, true);
                if first {
                    pad.push_event(Event::Eos);
                }
                Err(FlowError::Eos)
            }
            Err(FlowError::Error) => {
                element.post_error(
                    ErrorDomain::Resource,
                    format!("could not read {}", self.shared.location.display()),
                    None,
                );
                Err(FlowError::Error)
            }
            Err(err) => Err(err),
        }
    }
}

// ============================================================================
// FileSink
// ============================================================================

struct SinkShared {
    location: PathBuf,
    buffer_size: usize,
    stream: Mutex<Option<BufferedOutputStream<File>>>,
    cancellable: Cancellable,
}

struct FileSinkPad(Arc<SinkShared>);

impl PadHandler for FileSinkPad {
    fn chain(&self, pad: &Pad, buffer: Buffer) -> FlowResult {
        let mut stream = self.0.stream.lock();
        let Some(stream) = stream.as_mut() else {
            return Err(FlowError::Flushing);
        };
        match stream.write_buffer(&buffer, Some(&self.0.cancellable)) {
            Ok(()) => Ok(FlowSuccess::Ok),
            Err(Error::Cancelled) => Err(FlowError::Flushing),
            Err(err) => {
                if let Some(element) = pad.parent_element() {
                    element.post_error(
                        ErrorDomain::Resource,
                        format!("error writing {}", self.0.location.display()),
                        Some(err.to_string()),
                    );
                }
                Err(FlowError::Error)
            }
        }
    }

    fn event(&self, pad: &Pad, event: Event) -> bool {
        match event {
            Event::Eos => {
                let flushed = match self.0.stream.lock().as_mut() {
                    Some(stream) => stream.flush(Some(&self.0.cancellable)),
                    None => Ok(()),
                };
                let Some(element) = pad.parent_element() else {
                    return flushed.is_ok();
                };
                if let Err(err) = flushed {
                    element.post_error(ErrorDomain::Resource, "flush on EOS failed", Some(err.to_string()));
                    return false;
                }
                element.post_eos();
                true
            }
            Event::FlushStart => {
                self.0.cancellable.cancel();
                true
            }
            Event::FlushStop => {
                self.0.cancellable.reset();
                true
            }
            other => pad.event_default(other),
        }
    }
}

/// Sink writing every buffer to a file through a [`BufferedOutputStream`].
///
/// The file is created (truncated) on Ready to Paused and flushed and
/// closed on Paused to Ready. A flush or [`Element::unlock`] cancels a
/// write in progress.
pub struct FileSink {
    shared: Arc<SinkShared>,
}

impl FileSink {
    /// Sink for `location` with the default write buffer.
    ///
    /// # Errors
    ///
    /// Propagates pad registration failures.
    pub fn new(name: impl Into<String>, location: impl AsRef<Path>) -> Result<Element> {
        Self::with_buffer_size(name, location, DEFAULT_BUFFER_SIZE)
    }

    /// Sink for `location` buffering `buffer_size` bytes between writes.
    ///
    /// # Errors
    ///
    /// Propagates pad registration failures.
    pub fn with_buffer_size(
        name: impl Into<String>,
        location: impl AsRef<Path>,
        buffer_size: usize,
    ) -> Result<Element> {
        let shared = Arc::new(SinkShared {
            location: location.as_ref().to_path_buf(),
            buffer_size,
            stream: Mutex::new(None),
            cancellable: Cancellable::new(),
        });
        let pad = Pad::builder_from_template(&PadTemplate::sink("sink", Caps::any()), "sink")
            .handler(Arc::new(FileSinkPad(Arc::clone(&shared))))
            .build();
        Element::builder(name, FileSink { shared }).pad(pad).build()
    }
}

impl ElementImpl for FileSink {
    fn change_state(
        &self,
        element: &Element,
        transition: StateChange,
    ) -> std::result::Result<StateChangeSuccess, StateChangeError> {
        match transition {
            StateChange::ReadyToPaused => {
                let file = File::create(&self.shared.location)
                    .map_err(|err| fail_state(element, transition, "could not open file for writing", &Error::from(err)))?;
                self.shared.cancellable.reset();
                *self.shared.stream.lock() =
                    Some(BufferedOutputStream::with_capacity(self.shared.buffer_size, file));
            }
            StateChange::PausedToReady => {
                if let Some(mut stream) = self.shared.stream.lock().take() {
                    self.shared.cancellable.reset();
                    stream
                        .close(None)
                        .map_err(|err| fail_state(element, transition, "could not close file", &err))?;
                }
            }
            _ => {}
        }
        Ok(StateChangeSuccess::Success)
    }

    fn pad_templates(&self) -> Vec<PadTemplate> {
        vec![PadTemplate::sink("sink", Caps::any())]
    }

    fn unlock(&self, _element: &Element) {
        self.shared.cancellable.cancel();
    }
}
