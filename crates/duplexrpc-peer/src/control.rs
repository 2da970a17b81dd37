//! Endpoints handled by the connection itself rather than a service.

/// Releases the service registered under the request's channel id.
pub const CLOSE_ENDPOINT: &str = "$close";

/// Endpoint names starting with this character are reserved.
pub const RESERVED_PREFIX: char = '$';

/// Returns true if `endpoint` is reserved for connection control.
pub fn is_reserved(endpoint: &str) -> bool {
    endpoint.starts_with(RESERVED_PREFIX)
}
