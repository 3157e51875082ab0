/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Storage/processor chain (§4.5): `SpamScan -> AVScan -> LocalFile ->
//! Mailbox`. Each processor returns a [`ProcessorOutcome`] instead of
//! raising an exception (§9); a [`ChaosDecorator`] wraps every real
//! processor and, when chaos headers are enabled, short-circuits with
//! the forced value without running the real processor or producing
//! any side effect (§8 property 6).

pub mod av;
pub mod local_file;
pub mod mailbox;
pub mod spam;

use async_trait::async_trait;
use common::chaos::ChaosDirective;
use trc::Error;

use crate::envelope::Envelope;

/// Replaces exceptions for control flow inside processors (§9).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessorOutcome {
    Continue,
    RejectPermanent(String),
    RejectTransient(String),
    Discard,
}

#[async_trait]
pub trait Processor: Send + Sync {
    fn name(&self) -> &'static str;

    /// The response a chaos header forcing `return=false` should
    /// produce; each processor names its own default (§6: "default
    /// 554 virus / 550 spam").
    fn reject_response(&self) -> &'static str {
        "554 5.7.1 rejected"
    }

    async fn process(&self, envelope: &mut Envelope) -> Result<ProcessorOutcome, Error>;
}

/// Wraps a real processor and checks `X-Robin-Chaos` headers first
/// when `chaos_headers` is enabled (§4.5, §9 "decorator wrapping
/// every real processor").
pub struct ChaosDecorator<P> {
    inner: P,
    chaos_headers: bool,
}

impl<P: Processor> ChaosDecorator<P> {
    pub fn new(inner: P, chaos_headers: bool) -> Self {
        ChaosDecorator { inner, chaos_headers }
    }
}

#[async_trait]
impl<P: Processor> Processor for ChaosDecorator<P> {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn reject_response(&self) -> &'static str {
        self.inner.reject_response()
    }

    async fn process(&self, envelope: &mut Envelope) -> Result<ProcessorOutcome, Error> {
        if self.chaos_headers {
            if let Some(outcome) = forced_outcome(envelope, self.inner.name(), self.inner.reject_response()) {
                trc::event!(trc::EventType::ChaosForced, "processor" = self.inner.name());
                return Ok(outcome);
            }
        }
        self.inner.process(envelope).await
    }
}

fn forced_outcome(
    envelope: &Envelope,
    processor: &str,
    reject_response: &'static str,
) -> Option<ProcessorOutcome> {
    envelope
        .headers
        .iter()
        .filter(|(name, _)| name.eq_ignore_ascii_case("X-Robin-Chaos"))
        .filter_map(|(_, value)| ChaosDirective::parse(value))
        .find_map(|directive| {
            let (forced_processor, forced_return) = directive.processor_outcome()?;
            (forced_processor == processor).then(|| {
                if forced_return {
                    ProcessorOutcome::Continue
                } else {
                    ProcessorOutcome::RejectPermanent(reject_response.to_string())
                }
            })
        })
}

/// Runs the configured processors in order, stopping at the first
/// non-`Continue` outcome (§4.5 "A failed AV or spam result ... aborts
/// the chain").
pub struct Chain {
    processors: Vec<Box<dyn Processor>>,
}

impl Chain {
    pub fn new(processors: Vec<Box<dyn Processor>>) -> Self {
        Chain { processors }
    }

    pub async fn run(&self, envelope: &mut Envelope) -> Result<ProcessorOutcome, Error> {
        for processor in &self.processors {
            match processor.process(envelope).await? {
                ProcessorOutcome::Continue => continue,
                other => return Ok(other),
            }
        }
        Ok(ProcessorOutcome::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysReject;

    #[async_trait]
    impl Processor for AlwaysReject {
        fn name(&self) -> &'static str {
            "AVStorageProcessor"
        }

        fn reject_response(&self) -> &'static str {
            "554 5.7.1 virus rejected"
        }

        async fn process(&self, _envelope: &mut Envelope) -> Result<ProcessorOutcome, Error> {
            Ok(ProcessorOutcome::RejectPermanent("554 5.7.1 virus rejected".into()))
        }
    }

    #[tokio::test]
    async fn chaos_header_forces_outcome_without_running_real_processor() {
        let mut envelope = Envelope::default();
        envelope.headers.push((
            "X-Robin-Chaos".into(),
            "LocalStorageClient; processor=AVStorageProcessor; return=false".into(),
        ));
        let decorated = ChaosDecorator::new(AlwaysReject, true);
        let outcome = decorated.process(&mut envelope).await.unwrap();
        assert_eq!(
            outcome,
            ProcessorOutcome::RejectPermanent("554 5.7.1 virus rejected".into())
        );
    }

    #[tokio::test]
    async fn chaos_return_true_forces_continue() {
        let mut envelope = Envelope::default();
        envelope.headers.push((
            "X-Robin-Chaos".into(),
            "LocalStorageClient; processor=AVStorageProcessor; return=true".into(),
        ));
        let decorated = ChaosDecorator::new(AlwaysReject, true);
        let outcome = decorated.process(&mut envelope).await.unwrap();
        assert_eq!(outcome, ProcessorOutcome::Continue);
    }

    #[tokio::test]
    async fn chain_stops_at_first_rejection() {
        let chain = Chain::new(vec![Box::new(AlwaysReject)]);
        let mut envelope = Envelope::default();
        let outcome = chain.run(&mut envelope).await.unwrap();
        assert!(matches!(outcome, ProcessorOutcome::RejectPermanent(_)));
    }
}
