//! Routing of received envelopes to registered consumers.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use hifc_frame::{record_envelope, Envelope, TraceSink};
use serde::Serialize;
use tracing::{debug, warn};

/// What a consumer did with an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// Dispatch stops here.
    Consumed,
    /// Also mirror the envelope to the trace channel.
    Forward,
}

/// A consumer of envelopes for one handler id.
///
/// Handlers run on the worker thread. They must return promptly and must not
/// wait on synchronous engine operations, which would need the same thread.
pub trait MessageHandler: Send + Sync {
    fn handle(&self, envelope: &Envelope) -> Disposition;
}

impl<F> MessageHandler for F
where
    F: Fn(&Envelope) -> Disposition + Send + Sync,
{
    fn handle(&self, envelope: &Envelope) -> Disposition {
        self(envelope)
    }
}

/// Handle returned by registration, used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct RegistrationId(u64);

struct Registration {
    id: RegistrationId,
    handler_id: u8,
    handler: Arc<dyn MessageHandler>,
}

/// Ordered list of `(handler id, consumer)` pairs.
///
/// The first registration matching an envelope's handler id receives it.
pub struct Registry {
    entries: RwLock<Vec<Registration>>,
    next_id: AtomicU64,
    trace: Arc<dyn TraceSink>,
}

impl Registry {
    pub fn new(trace: Arc<dyn TraceSink>) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            trace,
        }
    }

    pub fn register(&self, handler_id: u8, handler: Arc<dyn MessageHandler>) -> RegistrationId {
        let id = RegistrationId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Registration {
                id,
                handler_id,
                handler,
            });
        debug!(handler_id, registration = id.0, "handler registered");
        id
    }

    /// Remove a registration. Returns whether it existed.
    pub fn unregister(&self, id: RegistrationId) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|entry| entry.id != id);
        before != entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hand `envelope` to its consumer.
    ///
    /// Unclaimed envelopes, and envelopes the consumer forwards, are written
    /// to the trace channel.
    pub fn dispatch(&self, envelope: &Envelope) -> Disposition {
        let handler = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|entry| entry.handler_id == envelope.handler)
            .map(|entry| Arc::clone(&entry.handler));

        let disposition = match handler {
            Some(handler) => handler.handle(envelope),
            None => Disposition::Forward,
        };

        if disposition == Disposition::Forward {
            if let Err(e) = record_envelope(self.trace.as_ref(), envelope) {
                warn!(
                    handler = envelope.handler,
                    kind = envelope.kind.as_str(),
                    error = %e,
                    "failed to trace envelope"
                );
            }
        }
        disposition
    }

    pub fn trace(&self) -> &Arc<dyn TraceSink> {
        &self.trace
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("registrations", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use hifc_frame::{TraceBuffer, TraceReader, RTC, SYSTEM};

    use super::*;

    fn registry() -> (Registry, Arc<TraceBuffer>) {
        let trace = Arc::new(TraceBuffer::new(4096));
        (Registry::new(trace.clone()), trace)
    }

    #[test]
    fn consumed_envelope_is_not_traced() {
        let (registry, trace) = registry();
        registry.register(RTC, Arc::new(|_: &Envelope| Disposition::Consumed));

        let disposition = registry.dispatch(&Envelope::message(RTC, &b"tick"[..]));
        assert_eq!(disposition, Disposition::Consumed);
        assert!(trace.is_empty());
    }

    #[test]
    fn unmatched_and_forwarded_envelopes_are_traced() {
        let (registry, trace) = registry();
        registry.register(RTC, Arc::new(|_: &Envelope| Disposition::Forward));

        registry.dispatch(&Envelope::message(RTC, &b"one"[..]));
        registry.dispatch(&Envelope::message(SYSTEM, &b"two"[..]));

        let captured = trace.drain();
        let envelopes: Vec<Envelope> = TraceReader::new(&captured[..])
            .collect::<hifc_frame::Result<_>>()
            .unwrap();
        assert_eq!(envelopes.len(), 2);
        assert_eq!(envelopes[0].payload.as_ref(), b"one");
        assert_eq!(envelopes[1].handler, SYSTEM);
    }

    #[test]
    fn first_registration_wins() {
        let (registry, _trace) = registry();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        {
            let first = Arc::clone(&first);
            registry.register(
                RTC,
                Arc::new(move |_: &Envelope| {
                    first.fetch_add(1, Ordering::SeqCst);
                    Disposition::Consumed
                }),
            );
        }
        {
            let second = Arc::clone(&second);
            registry.register(
                RTC,
                Arc::new(move |_: &Envelope| {
                    second.fetch_add(1, Ordering::SeqCst);
                    Disposition::Consumed
                }),
            );
        }

        registry.dispatch(&Envelope::message(RTC, &b""[..]));
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unregister_falls_back_to_trace() {
        let (registry, trace) = registry();
        let id = registry.register(RTC, Arc::new(|_: &Envelope| Disposition::Consumed));
        assert!(registry.unregister(id));
        assert!(!registry.unregister(id));
        assert!(registry.is_empty());

        assert_eq!(
            registry.dispatch(&Envelope::message(RTC, &b"x"[..])),
            Disposition::Forward
        );
        assert_eq!(trace.records(), 1);
    }

    #[test]
    fn handler_may_register_during_dispatch() {
        let (registry, _trace) = registry();
        let registry = Arc::new(registry);
        {
            let inner = Arc::clone(&registry);
            registry.register(
                RTC,
                Arc::new(move |_: &Envelope| {
                    inner.register(SYSTEM, Arc::new(|_: &Envelope| Disposition::Consumed));
                    Disposition::Consumed
                }),
            );
        }

        registry.dispatch(&Envelope::message(RTC, &b""[..]));
        assert_eq!(registry.len(), 2);
    }
}
