//! Built-in handler IDs.
//!
//! The first byte of every structured message names the controller-side
//! service it belongs to. Stream bursts are always tagged [`SENSOR`].

/// Controller system service (readiness, version, error reports).
pub const SYSTEM: u8 = 0x00;

/// Sensor hub; also the fixed tag of stream envelopes.
pub const SENSOR: u8 = 0x0B;

/// Activity log service.
pub const ACTIVITY_LOG: u8 = 0x0C;

/// Real-time clock service.
pub const RTC: u8 = 0x0D;

/// Audio service.
pub const AUDIO: u8 = 0x0E;

/// Application-processor storage service.
pub const AP_STORAGE: u8 = 0x0F;

/// Returns a human-readable name for a handler ID.
pub fn handler_name(id: u8) -> &'static str {
    match id {
        SYSTEM => "SYSTEM",
        SENSOR => "SENSOR",
        ACTIVITY_LOG => "ACTIVITY_LOG",
        RTC => "RTC",
        AUDIO => "AUDIO",
        AP_STORAGE => "AP_STORAGE",
        _ => "UNKNOWN",
    }
}

/// Returns true if the handler ID is one of the built-in services.
pub fn is_builtin(id: u8) -> bool {
    matches!(id, SYSTEM | SENSOR..=AP_STORAGE)
}
