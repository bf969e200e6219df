//! System handler: controller readiness, version queries and error reports.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use hifc_frame::{handler_name, Envelope, EnvelopeKind, PayloadHeader, PAYLOAD_HEADER_SIZE, SYSTEM};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::engine::Engine;
use crate::error::{EngineError, Result};
use crate::registry::{Disposition, MessageHandler, RegistrationId};

/// Handler readiness announcement.
pub const API_READY: u16 = 0x00;
/// Version query and reply.
pub const API_VERSION: u16 = 0x01;
/// Controller-side error report.
pub const API_REPORT_ERROR: u16 = 0x02;

/// Longest version string the controller returns.
pub const MAX_VERSION_LEN: usize = 32;

/// Which identifier a version query asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionKind {
    Bootloader = 0,
    Firmware = 1,
    Cuid0 = 2,
    Cuid1 = 3,
    Udid0 = 4,
    Udid1 = 5,
}

impl VersionKind {
    pub const ALL: [VersionKind; 6] = [
        Self::Bootloader,
        Self::Firmware,
        Self::Cuid0,
        Self::Cuid1,
        Self::Udid0,
        Self::Udid1,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bootloader => "bootloader",
            Self::Firmware => "firmware",
            Self::Cuid0 => "cuid0",
            Self::Cuid1 => "cuid1",
            Self::Udid0 => "udid0",
            Self::Udid1 => "udid1",
        }
    }
}

impl fmt::Display for VersionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the controller has asked for a reboot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemStatus {
    #[default]
    Normal,
    RebootRequested,
}

/// An error the controller reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ErrorReport {
    pub level: u32,
    pub module: u32,
    pub code: u32,
}

#[derive(Debug, Default)]
struct SystemState {
    ready: HashSet<u8>,
    version: Option<String>,
    status: SystemStatus,
    last_error: Option<ErrorReport>,
}

/// Consumer for [`SYSTEM`] envelopes.
#[derive(Debug, Default)]
pub struct SystemService {
    state: Mutex<SystemState>,
    changed: Condvar,
    // Serializes version queries so replies match requests.
    query: Mutex<()>,
}

impl SystemService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a service and register it on the engine.
    pub fn install(engine: &Engine) -> (Arc<Self>, RegistrationId) {
        let service = Arc::new(Self::new());
        let id = engine.register_arc(SYSTEM, service.clone());
        (service, id)
    }

    pub fn is_ready(&self, handler: u8) -> bool {
        self.lock().ready.contains(&handler)
    }

    /// Wait until `handler` reports ready. Returns `false` on timeout.
    pub fn wait_ready(&self, handler: u8, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        while !state.ready.contains(&handler) {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = self
                .changed
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }

    pub fn status(&self) -> SystemStatus {
        self.lock().status
    }

    pub fn last_error(&self) -> Option<ErrorReport> {
        self.lock().last_error
    }

    /// Ask the controller for a version string and wait for the reply.
    ///
    /// # Errors
    ///
    /// Send failures are returned as-is. A missing reply yields
    /// [`EngineError::Timeout`] and leaves the engine usable: the request
    /// completed on the bus, so nothing is stuck mid-transaction and the
    /// fault flag is not raised. Callers that treat a silent controller as
    /// fatal must escalate themselves, for example by resetting it.
    pub fn query_version(
        &self,
        engine: &Engine,
        kind: VersionKind,
        timeout: Duration,
    ) -> Result<String> {
        let _query = self.query.lock().unwrap_or_else(PoisonError::into_inner);
        self.lock().version = None;

        engine.send(SYSTEM, API_VERSION, &(kind as u32).to_le_bytes())?;

        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if let Some(version) = state.version.take() {
                debug!(%kind, %version, "version reply");
                return Ok(version);
            }
            let now = Instant::now();
            if now >= deadline {
                warn!(%kind, ?timeout, "no version reply");
                return Err(EngineError::Timeout(timeout));
            }
            state = self
                .changed
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    fn on_ready(&self, body: &[u8]) -> Disposition {
        let [handler, ready, ..] = *body else {
            warn!(len = body.len(), "short ready message");
            return Disposition::Forward;
        };
        info!(handler, name = handler_name(handler), ready, "handler readiness");
        if ready != 0 {
            self.lock().ready.insert(handler);
            self.changed.notify_all();
        }
        Disposition::Forward
    }

    fn on_version(&self, body: &[u8]) -> Disposition {
        if body.is_empty() {
            warn!("empty version reply");
            return Disposition::Forward;
        }
        let text = &body[..body.len().min(MAX_VERSION_LEN)];
        let end = text.iter().position(|&b| b == 0).unwrap_or(text.len());
        let version = String::from_utf8_lossy(&text[..end]).into_owned();

        self.lock().version = Some(version);
        self.changed.notify_all();
        Disposition::Consumed
    }

    fn on_error_report(&self, body: &[u8]) -> Disposition {
        if body.len() < 12 {
            warn!(len = body.len(), "short error report");
            return Disposition::Forward;
        }
        let word = |i: usize| u32::from_le_bytes([body[i], body[i + 1], body[i + 2], body[i + 3]]);
        let report = ErrorReport {
            level: word(0),
            module: word(4),
            code: word(8),
        };
        error!(
            level = report.level,
            module = report.module,
            code = report.code,
            "controller reported error, reboot requested"
        );

        let mut state = self.lock();
        state.status = SystemStatus::RebootRequested;
        state.last_error = Some(report);
        Disposition::Forward
    }

    fn lock(&self) -> MutexGuard<'_, SystemState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl MessageHandler for SystemService {
    fn handle(&self, envelope: &Envelope) -> Disposition {
        if envelope.kind != EnvelopeKind::Message {
            return Disposition::Forward;
        }
        let payload = envelope.payload.as_ref();
        let header = match PayloadHeader::parse(payload) {
            Ok(header) => header,
            Err(e) => {
                warn!(error = %e, "malformed system message");
                return Disposition::Forward;
            }
        };
        let body = &payload[PAYLOAD_HEADER_SIZE..];
        if body.len() < usize::from(header.size) {
            warn!(
                declared = header.size,
                actual = body.len(),
                "truncated system message"
            );
            return Disposition::Forward;
        }
        let body = &body[..usize::from(header.size)];

        match header.api {
            API_READY => self.on_ready(body),
            API_VERSION => self.on_version(body),
            API_REPORT_ERROR => self.on_error_report(body),
            api => {
                warn!(api, "unknown system api");
                Disposition::Forward
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use hifc_frame::{build_message, RTC};

    use super::*;
    use crate::config::EngineConfig;
    use crate::irq::{CONTROLLER_READY, READ_READY_0, WRITE_READY_0};
    use crate::testing::FakeBus;

    fn system_message(api: u16, body: &[u8]) -> Envelope {
        Envelope::message(SYSTEM, build_message(SYSTEM, api, 0, body).unwrap().freeze())
    }

    #[test]
    fn ready_is_recorded_and_forwarded() {
        let service = SystemService::new();
        assert!(!service.is_ready(RTC));

        let disposition = service.handle(&system_message(API_READY, &[RTC, 1]));
        assert_eq!(disposition, Disposition::Forward);
        assert!(service.is_ready(RTC));
        assert!(service.wait_ready(RTC, Duration::from_millis(1)));

        service.handle(&system_message(API_READY, &[0x0E, 0]));
        assert!(!service.is_ready(0x0E));
        assert!(!service.wait_ready(0x0E, Duration::from_millis(10)));
    }

    #[test]
    fn error_report_requests_reboot() {
        let service = SystemService::new();
        let mut body = Vec::new();
        for word in [2u32, 7, 0x1234] {
            body.extend_from_slice(&word.to_le_bytes());
        }
        service.handle(&system_message(API_REPORT_ERROR, &body));

        assert_eq!(service.status(), SystemStatus::RebootRequested);
        assert_eq!(
            service.last_error(),
            Some(ErrorReport {
                level: 2,
                module: 7,
                code: 0x1234
            })
        );
    }

    #[test]
    fn version_reply_is_consumed_and_truncated() {
        let service = SystemService::new();
        let mut long = b"fw-".to_vec();
        long.extend_from_slice(&[b'9'; 40]);
        assert_eq!(
            service.handle(&system_message(API_VERSION, &long)),
            Disposition::Consumed
        );
        assert_eq!(service.lock().version.as_deref().map(str::len), Some(32));

        service.handle(&system_message(API_VERSION, b"1.2.3\0junk"));
        assert_eq!(service.lock().version.as_deref(), Some("1.2.3"));
    }

    #[test]
    fn malformed_messages_are_forwarded() {
        let service = SystemService::new();
        let short = Envelope::message(SYSTEM, &[SYSTEM, 0, 1][..]);
        assert_eq!(service.handle(&short), Disposition::Forward);

        // Header declares more body than present.
        let mut lying = build_message(SYSTEM, API_VERSION, 0, b"abc").unwrap();
        lying.truncate(PAYLOAD_HEADER_SIZE + 1);
        let lying = Envelope::message(SYSTEM, lying.freeze());
        assert_eq!(service.handle(&lying), Disposition::Forward);

        assert_eq!(
            service.handle(&system_message(0x77, b"")),
            Disposition::Forward
        );
    }

    #[test]
    fn version_query_round_trip_through_engine() {
        let config = EngineConfig {
            gate_sends_on_write_ready: false,
            ..EngineConfig::default()
        };
        let (bus, handle) = FakeBus::new();
        let engine = Arc::new(Engine::start(bus, config).unwrap());
        let (service, _id) = SystemService::install(&engine);

        handle.raise_events(1 << CONTROLLER_READY);
        assert!(engine.interrupt());
        assert!(engine.wait_idle(Duration::from_secs(2)));

        let reply = build_message(SYSTEM, API_VERSION, 0, b"2.1.0\0").unwrap();
        handle.respond(0x10, (reply.len() as u16).to_le_bytes());
        handle.respond(0xA0, reply.to_vec());

        let query = {
            let engine = Arc::clone(&engine);
            let service = Arc::clone(&service);
            std::thread::spawn(move || {
                service.query_version(&engine, VersionKind::Firmware, Duration::from_secs(2))
            })
        };

        // The request goes out first, then the controller raises the reply.
        let deadline = Instant::now() + Duration::from_secs(2);
        while !handle.sent_opcodes().contains(&0xA2) {
            assert!(Instant::now() < deadline);
            std::thread::sleep(Duration::from_millis(2));
        }
        let request = handle
            .sent()
            .into_iter()
            .find(|c| c.opcode == 0xA2)
            .unwrap();
        assert_eq!(&request.payload[PAYLOAD_HEADER_SIZE..], &1u32.to_le_bytes());

        handle.raise_events((1 << READ_READY_0) | (1 << WRITE_READY_0));
        assert!(engine.interrupt());

        assert_eq!(query.join().unwrap().unwrap(), "2.1.0");
        assert!(engine.wait_idle(Duration::from_secs(2)));
        // Consumed replies never reach the trace.
        assert!(engine.trace_buffer().unwrap().is_empty());
    }

    #[test]
    fn version_query_times_out_without_fault() {
        let config = EngineConfig {
            gate_sends_on_write_ready: false,
            ..EngineConfig::default()
        };
        let (bus, _handle) = FakeBus::new();
        let engine = Engine::start(bus, config).unwrap();
        let (service, _id) = SystemService::install(&engine);

        let err = service
            .query_version(&engine, VersionKind::Bootloader, Duration::from_millis(20))
            .unwrap_err();
        assert!(matches!(err, EngineError::Timeout(_)));
        assert!(!engine.is_faulted());
    }
}
