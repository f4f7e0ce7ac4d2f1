//! Unified error handling for the heating control core
//!
//! All layers of the control core (sensors, relays, circuits, DHWT, the
//! boiler state machine, the plant orchestrator) return this single error
//! type so that the orchestrator can record a per-object status without
//! needing to match on crate-specific error types.

/// Result type alias using [`Error`]
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for all control-core operations.
///
/// Leaf backends return a concrete kind, and control-phase functions
/// propagate it untouched. The orchestrator never aborts a tick on one
/// of these; it records the kind in the object's status field.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum Error {
    // ------------------------------------------------------------------
    // Generic / structural
    // ------------------------------------------------------------------
    #[error("invalid: {0}")]
    Invalid(String),

    #[error("not configured: {0}")]
    NotConfigured(String),

    #[error("not implemented: {0}")]
    NotImplemented(String),

    #[error("misconfigured: {0}")]
    Misconfigured(String),

    #[error("offline: {0}")]
    Offline(String),

    #[error("out of memory")]
    OutOfMemory,

    #[error("already exists: {0}")]
    Exists(String),

    #[error("{0}")]
    Generic(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unknown error: {0}")]
    Unknown(String),

    // ------------------------------------------------------------------
    // Storage
    // ------------------------------------------------------------------
    #[error("storage error: {0}")]
    Store(String),

    #[error("persisted record version mismatch: {0}")]
    Mismatch(String),

    #[error("storage I/O error: {0}")]
    StoreIo(String),

    // ------------------------------------------------------------------
    // Sensors
    // ------------------------------------------------------------------
    #[error("sensor reading invalid: {0}")]
    SensorInvalid(String),

    #[error("sensor short-circuited: {0}")]
    SensorShort(String),

    #[error("sensor disconnected: {0}")]
    SensorDiscon(String),

    // ------------------------------------------------------------------
    // Safety & runmode
    // ------------------------------------------------------------------
    #[error("safety interlock tripped: {0}")]
    SafetyTripped(String),

    #[error("invalid runmode for this object: {0}")]
    InvalidMode(String),

    // ------------------------------------------------------------------
    // Non-errors that signal "no action this tick"
    // ------------------------------------------------------------------
    #[error("deadzone: no action required")]
    Deadzone,

    #[error("deadband: accumulating, no action this sample")]
    Deadband,
}

impl Error {
    pub fn generic(msg: impl Into<String>) -> Self {
        Self::Generic(msg.into())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }

    pub fn not_configured(msg: impl Into<String>) -> Self {
        Self::NotConfigured(msg.into())
    }

    pub fn offline(msg: impl Into<String>) -> Self {
        Self::Offline(msg.into())
    }

    /// True for the two non-error "no action this tick" signals, which the
    /// orchestrator discards rather than recording as a fault.
    pub fn is_non_error(&self) -> bool {
        matches!(self, Error::Deadzone | Error::Deadband)
    }

    /// True for the handful of kinds the orchestrator treats as routine
    /// ("ignore and move on") rather than alarm-worthy.
    pub fn is_benign(&self) -> bool {
        matches!(
            self,
            Error::Deadzone | Error::Deadband | Error::NotConfigured(_) | Error::Offline(_)
        )
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Generic(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Generic(s)
    }
}

/// Textual descriptor used by the (out of scope) alarm subsystem to
/// deduplicate messages keyed by `(kind, descriptor)`.
impl Error {
    pub fn kind_tag(&self) -> &'static str {
        match self {
            Error::Invalid(_) => "invalid",
            Error::NotConfigured(_) => "not_configured",
            Error::NotImplemented(_) => "not_implemented",
            Error::Misconfigured(_) => "misconfigured",
            Error::Offline(_) => "offline",
            Error::OutOfMemory => "out_of_memory",
            Error::Exists(_) => "exists",
            Error::Generic(_) => "generic",
            Error::NotFound(_) => "not_found",
            Error::Unknown(_) => "unknown",
            Error::Store(_) => "store",
            Error::Mismatch(_) => "mismatch",
            Error::StoreIo(_) => "store_io",
            Error::SensorInvalid(_) => "sensor_invalid",
            Error::SensorShort(_) => "sensor_short",
            Error::SensorDiscon(_) => "sensor_discon",
            Error::SafetyTripped(_) => "safety_tripped",
            Error::InvalidMode(_) => "invalid_mode",
            Error::Deadzone => "deadzone",
            Error::Deadband => "deadband",
        }
    }
}

/// A deduplication key an alarm collaborator would use: `(kind, descriptor)`.
pub fn alarm_key(err: &Error) -> (&'static str, String) {
    (err.kind_tag(), format!("{err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadzone_and_deadband_are_non_errors() {
        assert!(Error::Deadzone.is_non_error());
        assert!(Error::Deadband.is_non_error());
        assert!(!Error::Invalid("x".into()).is_non_error());
    }

    #[test]
    fn alarm_key_dedupes_by_kind_and_text() {
        let a = Error::SensorDiscon("outdoor".into());
        let b = Error::SensorDiscon("outdoor".into());
        assert_eq!(alarm_key(&a), alarm_key(&b));
    }
}
