use std::error::Error as StdError;
use std::io;

/// Retry eligibility of a network-level failure.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FaultClass {
    /// Temporary network condition; the request may be sent again.
    Transient,
    /// Anything else. Propagates on first occurrence.
    Fatal,
}

impl FaultClass {
    pub fn is_transient(self) -> bool {
        self == Self::Transient
    }
}

/// Classifies a failed send.
///
/// Timeouts and connect-phase failures (refused, unreachable, DNS) are
/// transient, as is any error caused by a low-level socket error further down
/// the source chain. A request or body error without an io cause (the peer
/// closing the connection before a complete response) is transient too.
/// Builder, redirect, decode and status errors are fatal.
pub fn classify(err: &reqwest::Error) -> FaultClass {
    if err.is_builder() || err.is_redirect() || err.is_decode() || err.is_status() {
        return FaultClass::Fatal;
    }
    if err.is_timeout() || err.is_connect() {
        return FaultClass::Transient;
    }
    match io_error_kind(err) {
        Some(kind) => classify_io_kind(kind),
        None if err.is_request() || err.is_body() => FaultClass::Transient,
        None => FaultClass::Fatal,
    }
}

/// Whether the request is known to have failed before any of it reached the
/// server, which makes a resend safe even for non-idempotent requests.
pub fn failed_before_send(err: &reqwest::Error) -> bool {
    err.is_connect()
}

pub(crate) fn classify_io_kind(kind: io::ErrorKind) -> FaultClass {
    use io::ErrorKind::*;
    match kind {
        ConnectionRefused | ConnectionReset | ConnectionAborted | NotConnected | BrokenPipe
        | TimedOut | UnexpectedEof | AddrNotAvailable => FaultClass::Transient,
        _ => FaultClass::Fatal,
    }
}

fn io_error_kind(err: &reqwest::Error) -> Option<io::ErrorKind> {
    let mut source = err.source();
    while let Some(inner) = source {
        if let Some(io_err) = inner.downcast_ref::<io::Error>() {
            return Some(io_err.kind());
        }
        source = inner.source();
    }
    None
}
