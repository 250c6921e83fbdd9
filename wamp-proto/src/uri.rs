//! Well-known WAMP URIs used by the session engine.

// Error URIs a router may deliver or a client may send.
pub const NO_SUCH_PROCEDURE: &str = "wamp.error.no_such_procedure";
pub const NO_SUCH_REGISTRATION: &str = "wamp.error.no_such_registration";
pub const NO_SUCH_SUBSCRIPTION: &str = "wamp.error.no_such_subscription";
pub const NO_SUCH_REALM: &str = "wamp.error.no_such_realm";
pub const PROCEDURE_ALREADY_EXISTS: &str = "wamp.error.procedure_already_exists";
pub const INVALID_ARGUMENT: &str = "wamp.error.invalid_argument";
pub const INVALID_URI: &str = "wamp.error.invalid_uri";
pub const RUNTIME_ERROR: &str = "wamp.error.runtime_error";
pub const NOT_AUTHORIZED: &str = "wamp.error.not_authorized";
pub const PROTOCOL_VIOLATION: &str = "wamp.error.protocol_violation";

// GOODBYE / ABORT reasons.
pub const CLOSE_REALM: &str = "wamp.close.close_realm";
pub const GOODBYE_AND_OUT: &str = "wamp.close.goodbye_and_out";
pub const SYSTEM_SHUTDOWN: &str = "wamp.close.system_shutdown";

/// Checks the loose URI rule: non-empty dot-separated components made of
/// lowercase letters, digits and underscores.
pub fn is_valid(uri: &str) -> bool {
    !uri.is_empty()
        && uri.split('.').all(|component| {
            !component.is_empty()
                && component
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        })
}
