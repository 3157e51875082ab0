/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use std::fmt;

/// The kinds of failure a worker can observe, per the error handling
/// design: each carries enough information to synthesize the right
/// SMTP response without the caller re-deriving it.
#[derive(Debug, Clone)]
pub enum ErrorKind {
    /// Syntax, bad command sequence, size exceeded.
    ProtocolViolation { code: u16, enhanced: &'static str },
    /// Failed AUTH exchange.
    AuthenticationFailure,
    /// Blocklist, RBL, scanner, scenario, unreachable proxy destination.
    PolicyRejection {
        code: u16,
        enhanced: &'static str,
        permanent: bool,
    },
    /// Scanner timeout, webhook timeout, DB unavailable, mailbox backend
    /// transient failure. No state change is visible to the client.
    LocalTransient,
    /// Bad configuration, disk full. The worker tears down after this.
    LocalPermanent,
    /// Outbound relay attempt should be retried from the queue.
    RelayTransient,
    /// Outbound relay attempt should bounce.
    RelayPermanent,
    /// A client-behaviour assertion group matched no recorded
    /// transaction; carries the failed group's name and a rendering of
    /// the last transaction observed before the failure (§7).
    ClientAssertionFailure {
        group: String,
        last_transaction: String,
    },
}

#[derive(Debug, Clone)]
pub struct Error {
    pub kind: ErrorKind,
    pub message: String,
}

impl Error {
    pub fn protocol(code: u16, enhanced: &'static str, message: impl Into<String>) -> Self {
        Error {
            kind: ErrorKind::ProtocolViolation { code, enhanced },
            message: message.into(),
        }
    }

    pub fn auth_failure(message: impl Into<String>) -> Self {
        Error {
            kind: ErrorKind::AuthenticationFailure,
            message: message.into(),
        }
    }

    pub fn policy(
        code: u16,
        enhanced: &'static str,
        permanent: bool,
        message: impl Into<String>,
    ) -> Self {
        Error {
            kind: ErrorKind::PolicyRejection {
                code,
                enhanced,
                permanent,
            },
            message: message.into(),
        }
    }

    pub fn local_transient(message: impl Into<String>) -> Self {
        Error {
            kind: ErrorKind::LocalTransient,
            message: message.into(),
        }
    }

    pub fn local_permanent(message: impl Into<String>) -> Self {
        Error {
            kind: ErrorKind::LocalPermanent,
            message: message.into(),
        }
    }

    pub fn relay_transient(message: impl Into<String>) -> Self {
        Error {
            kind: ErrorKind::RelayTransient,
            message: message.into(),
        }
    }

    pub fn relay_permanent(message: impl Into<String>) -> Self {
        Error {
            kind: ErrorKind::RelayPermanent,
            message: message.into(),
        }
    }

    pub fn client_assertion_failure(group: impl Into<String>, last_transaction: impl Into<String>) -> Self {
        let group = group.into();
        Error {
            message: format!("assertion group \"{group}\" matched no recorded transaction"),
            kind: ErrorKind::ClientAssertionFailure {
                group,
                last_transaction: last_transaction.into(),
            },
        }
    }

    /// Render the SMTP response line a server should emit for this
    /// error, per the error-kind table in the error handling design.
    pub fn smtp_reply(&self) -> String {
        match &self.kind {
            ErrorKind::ProtocolViolation { code, enhanced } => {
                format!("{code} {enhanced} {}", self.message)
            }
            ErrorKind::AuthenticationFailure => format!("535 5.7.8 {}", self.message),
            ErrorKind::PolicyRejection {
                code,
                enhanced,
                permanent: _,
            } => format!("{code} {enhanced} {}", self.message),
            ErrorKind::LocalTransient => format!("451 4.3.0 {}", self.message),
            ErrorKind::LocalPermanent => format!("554 5.3.0 {}", self.message),
            ErrorKind::RelayTransient | ErrorKind::RelayPermanent => {
                format!("{}", self.message)
            }
            ErrorKind::ClientAssertionFailure { .. } => format!("{}", self.message),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::LocalTransient
                | ErrorKind::RelayTransient
                | ErrorKind::PolicyRejection {
                    permanent: false,
                    ..
                }
        )
    }

    pub fn counts_toward_error_limit(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::ProtocolViolation { .. } | ErrorKind::AuthenticationFailure
        )
    }

    /// The failed group name and last transaction rendering, when this
    /// error is a client assertion failure (§7 "surfaced as a single
    /// typed error carrying the failed group and the last observed
    /// transaction").
    pub fn assertion_failure(&self) -> Option<(&str, &str)> {
        match &self.kind {
            ErrorKind::ClientAssertionFailure { group, last_transaction } => {
                Some((group.as_str(), last_transaction.as_str()))
            }
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::local_transient(err.to_string())
    }
}
