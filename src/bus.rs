//! Pipeline message bus.
//!
//! Elements post [`Message`]s (errors, warnings, EOS, state changes) which
//! the application receives asynchronously. The bus is a broadcast channel:
//! every subscriber sees every message posted after it subscribed.

use crate::element::State;
use crate::error::ErrorDomain;
use std::fmt;
use tokio::sync::broadcast;

/// Default number of messages buffered per subscriber.
pub const DEFAULT_BUS_CAPACITY: usize = 256;

/// Messages posted by elements.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Fatal element error.
    Error {
        /// Posting element.
        source: String,
        /// Error category.
        domain: ErrorDomain,
        /// Human-readable description.
        message: String,
        /// Extra detail for developers.
        debug: Option<String>,
    },
    /// Non-fatal problem.
    Warning {
        /// Posting element.
        source: String,
        /// Human-readable description.
        message: String,
    },
    /// A sink consumed end-of-stream.
    Eos {
        /// Posting element.
        source: String,
    },
    /// An element committed a state.
    StateChanged {
        /// Element whose state changed.
        source: String,
        /// State before the step.
        old: State,
        /// State after the step.
        new: State,
        /// State still to be reached, if any.
        pending: Option<State>,
    },
    /// A clock was selected for the pipeline.
    NewClock {
        /// Clock name.
        clock: String,
    },
    /// An asynchronous state change finished.
    AsyncDone {
        /// Element that finished.
        source: String,
    },
}

impl Message {
    /// Name of the posting element, if any.
    pub fn source(&self) -> Option<&str> {
        match self {
            Message::Error { source, .. }
            | Message::Warning { source, .. }
            | Message::Eos { source }
            | Message::StateChanged { source, .. }
            | Message::AsyncDone { source } => Some(source),
            Message::NewClock { .. } => None,
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Error {
                source,
                domain,
                message,
                ..
            } => write!(f, "{domain} error in {source}: {message}"),
            Message::Warning { source, message } => write!(f, "warning in {source}: {message}"),
            Message::Eos { source } => write!(f, "EOS from {source}"),
            Message::StateChanged {
                source, old, new, ..
            } => write!(f, "{source}: {old:?} -> {new:?}"),
            Message::NewClock { clock } => write!(f, "new clock {clock}"),
            Message::AsyncDone { source } => write!(f, "async-done from {source}"),
        }
    }
}

/// Posting side of the bus. Clones post to the same subscribers.
#[derive(Clone)]
pub struct Bus {
    sender: broadcast::Sender<Message>,
}

impl Bus {
    /// Bus buffering up to `capacity` messages per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Post a message. Returns how many subscribers will see it.
    pub fn post(&self, message: Message) -> usize {
        self.sender.send(message).unwrap_or(0)
    }

    /// New subscriber.
    pub fn subscribe(&self) -> BusReceiver {
        BusReceiver {
            receiver: self.sender.subscribe(),
        }
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}

impl fmt::Debug for Bus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bus")
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}

/// Receiving side of the bus.
pub struct BusReceiver {
    receiver: broadcast::Receiver<Message>,
}

impl BusReceiver {
    /// Next message; `None` once every [`Bus`] handle is gone.
    pub async fn recv(&mut self) -> Option<Message> {
        loop {
            match self.receiver.recv().await {
                Ok(message) => return Some(message),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next message if one is queued.
    pub fn try_recv(&mut self) -> Option<Message> {
        loop {
            match self.receiver.try_recv() {
                Ok(message) => return Some(message),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }

    /// Every queued message.
    pub fn drain(&mut self) -> Vec<Message> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }

    /// Wait for EOS or an error.
    ///
    /// Returns `Ok(())` on EOS and `Err(message)` on error.
    pub async fn wait_eos(&mut self) -> Result<(), String> {
        while let Some(message) = self.recv().await {
            match message {
                Message::Eos { .. } => return Ok(()),
                err @ Message::Error { .. } => return Err(err.to_string()),
                _ => continue,
            }
        }
        Err("bus closed before end of stream".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_every_subscriber_sees_messages() {
        let bus = Bus::new(16);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        assert_eq!(bus.post(Message::Eos { source: "sink".into() }), 2);
        assert!(matches!(a.recv().await, Some(Message::Eos { .. })));
        assert!(matches!(b.recv().await, Some(Message::Eos { .. })));
    }

    #[tokio::test]
    async fn test_wait_eos_reports_errors() {
        let bus = Bus::default();
        let mut rx = bus.subscribe();
        let poster = bus.clone();
        tokio::spawn(async move {
            poster.post(Message::Error {
                source: "filesrc".into(),
                domain: ErrorDomain::Resource,
                message: "no such file".into(),
                debug: None,
            });
        });

        let err = rx.wait_eos().await.unwrap_err();
        assert!(err.contains("no such file"));
        assert!(err.contains("filesrc"));
    }

    #[test]
    fn test_post_without_subscribers() {
        let bus = Bus::new(4);
        assert_eq!(bus.post(Message::NewClock { clock: "system".into() }), 0);
    }

    #[test]
    fn test_drain() {
        let bus = Bus::new(8);
        let mut rx = bus.subscribe();
        bus.post(Message::Warning {
            source: "queue".into(),
            message: "dropping".into(),
        });
        bus.post(Message::Eos { source: "sink".into() });
        let all = rx.drain();
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].source(), Some("sink"));
    }
}
