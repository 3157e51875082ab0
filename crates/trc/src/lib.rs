/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Structured event logging and the typed error model shared by every
//! subsystem. Subsystems never format ad-hoc `tracing::info!` lines for
//! anything that matters operationally; they emit an [`Event`] through
//! [`Event::log`], which carries a stable [`EventType`] plus key/value
//! fields a metrics exporter or a log shipper can key off.

pub mod error;
pub mod fields;
pub mod subscriber;

pub use error::{Error, ErrorKind};

use std::fmt;

use ahash::AHashMap;
use tracing::Level as TracingLevel;

/// Coarse severity, independent of the `tracing` crate so callers can
/// reason about it without pulling in `tracing::Level` everywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl Level {
    fn to_tracing(self) -> TracingLevel {
        match self {
            Level::Trace => TracingLevel::TRACE,
            Level::Debug => TracingLevel::DEBUG,
            Level::Info => TracingLevel::INFO,
            Level::Warn => TracingLevel::WARN,
            Level::Error => TracingLevel::ERROR,
        }
    }
}

/// The stable identifier of an event. New variants are additive; never
/// reuse a retired one, dashboards key off the name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(non_camel_case_types)]
pub enum EventType {
    ListenerAccept,
    ListenerReject,
    SessionStart,
    SessionEnd,
    SessionError,
    TlsHandshakeStart,
    TlsHandshakeSuccess,
    TlsHandshakeError,
    SlowTransfer,
    Ehlo,
    AuthSuccess,
    AuthFailure,
    MailFrom,
    RcptTo,
    RcptReject,
    DataStart,
    DataEnd,
    BdatChunk,
    ScenarioOverride,
    WebhookCall,
    WebhookError,
    ScanStart,
    ScanVirus,
    ScanSpam,
    ChaosForced,
    StorageReject,
    MailboxDeliver,
    MailboxError,
    RelayAttempt,
    RelaySuccess,
    RelayTransientFailure,
    RelayPermanentFailure,
    QueueEnqueue,
    QueueDequeue,
    QueueBounce,
    MxLookup,
    MtaStsPolicy,
    ProxyRoute,
    BotDispatch,
    BotDispatchFailed,
    ConfigReload,
    ClientAssertion,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::ListenerAccept => "listener.accept",
            EventType::ListenerReject => "listener.reject",
            EventType::SessionStart => "session.start",
            EventType::SessionEnd => "session.end",
            EventType::SessionError => "session.error",
            EventType::TlsHandshakeStart => "tls.start",
            EventType::TlsHandshakeSuccess => "tls.success",
            EventType::TlsHandshakeError => "tls.error",
            EventType::SlowTransfer => "session.slow-transfer",
            EventType::Ehlo => "smtp.ehlo",
            EventType::AuthSuccess => "auth.success",
            EventType::AuthFailure => "auth.failure",
            EventType::MailFrom => "smtp.mail-from",
            EventType::RcptTo => "smtp.rcpt-to",
            EventType::RcptReject => "smtp.rcpt-reject",
            EventType::DataStart => "smtp.data-start",
            EventType::DataEnd => "smtp.data-end",
            EventType::BdatChunk => "smtp.bdat-chunk",
            EventType::ScenarioOverride => "scenario.override",
            EventType::WebhookCall => "webhook.call",
            EventType::WebhookError => "webhook.error",
            EventType::ScanStart => "scan.start",
            EventType::ScanVirus => "scan.virus",
            EventType::ScanSpam => "scan.spam",
            EventType::ChaosForced => "chaos.forced",
            EventType::StorageReject => "storage.reject",
            EventType::MailboxDeliver => "mailbox.deliver",
            EventType::MailboxError => "mailbox.error",
            EventType::RelayAttempt => "relay.attempt",
            EventType::RelaySuccess => "relay.success",
            EventType::RelayTransientFailure => "relay.transient-failure",
            EventType::RelayPermanentFailure => "relay.permanent-failure",
            EventType::QueueEnqueue => "queue.enqueue",
            EventType::QueueDequeue => "queue.dequeue",
            EventType::QueueBounce => "queue.bounce",
            EventType::MxLookup => "resolver.mx",
            EventType::MtaStsPolicy => "resolver.mta-sts",
            EventType::ProxyRoute => "proxy.route",
            EventType::BotDispatch => "bot.dispatch",
            EventType::BotDispatchFailed => "bot.dispatch-failed",
            EventType::ConfigReload => "config.reload",
            EventType::ClientAssertion => "client.assertion",
        }
    }

    /// Default severity for events that are logged without an explicit
    /// level override.
    pub fn default_level(self) -> Level {
        match self {
            EventType::SessionError
            | EventType::TlsHandshakeError
            | EventType::AuthFailure
            | EventType::RcptReject
            | EventType::WebhookError
            | EventType::ScanVirus
            | EventType::ScanSpam
            | EventType::StorageReject
            | EventType::MailboxError
            | EventType::RelayPermanentFailure
            | EventType::QueueBounce
            | EventType::BotDispatchFailed => Level::Warn,
            EventType::RelayTransientFailure | EventType::SlowTransfer => Level::Info,
            _ => Level::Debug,
        }
    }
}

/// A single structured event, ready to be logged or forwarded to a
/// metrics counter.
pub struct Event {
    pub typ: EventType,
    pub level: Level,
    pub fields: AHashMap<&'static str, String>,
}

impl Event {
    pub fn new(typ: EventType) -> Self {
        Event {
            typ,
            level: typ.default_level(),
            fields: AHashMap::new(),
        }
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn ctx(mut self, key: &'static str, value: impl fmt::Display) -> Self {
        self.fields.insert(key, value.to_string());
        self
    }

    /// Emit the event through `tracing`, at the severity recorded on
    /// the event. Each field becomes a `tracing` field so a JSON log
    /// shipper can index on it without re-parsing a message string.
    pub fn log(self) {
        let name = self.typ.as_str();
        macro_rules! emit {
            ($lvl:expr) => {
                tracing::event!($lvl, event = name, fields = ?self.fields)
            };
        }
        match self.level.to_tracing() {
            TracingLevel::TRACE => emit!(TracingLevel::TRACE),
            TracingLevel::DEBUG => emit!(TracingLevel::DEBUG),
            TracingLevel::INFO => emit!(TracingLevel::INFO),
            TracingLevel::WARN => emit!(TracingLevel::WARN),
            TracingLevel::ERROR => emit!(TracingLevel::ERROR),
        }
    }
}

/// Shorthand for `Event::new(ty).log()` with inline context pairs:
/// `trc::event!(EventType::RcptReject, "address" = addr, "reason" = why);`
#[macro_export]
macro_rules! event {
    ($ty:expr $(, $key:literal = $val:expr)* $(,)?) => {{
        #[allow(unused_mut)]
        let mut ev = $crate::Event::new($ty);
        $(ev = ev.ctx($key, $val);)*
        ev.log();
    }};
}
