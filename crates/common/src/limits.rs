/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Per-session and per-listener resource limits (§3, §4.2, §4.9).

/// Resolves the §9 open question on `transactionsLimit` vs
/// `envelopeLimit`: the two are kept as distinct counters rather than
/// conflated. `envelope_limit` bounds how many envelopes may be
/// *committed* on one session (§3's invariant). `transactions_limit`
/// bounds how many MAIL transactions may be *attempted*, including
/// ones later discarded by RSET or a permanent RCPT/DATA failure, and
/// is therefore always >= `envelope_limit`.
#[derive(Debug, Clone)]
pub struct Limits {
    pub message_size_limit: u64,
    pub recipients_limit: usize,
    pub envelope_limit: usize,
    pub transactions_limit: usize,
    pub error_limit: u32,
    pub command_flood_limit: u32,
    pub minimum_pool_size: usize,
    pub maximum_pool_size: usize,
}

impl Limits {
    /// §9 open question on `concurrencyScale`: the source's comment
    /// "sum of all pool sizes plus 2" is enforced as a hard bound, not
    /// a hint.
    pub fn concurrency_scale(pool_sizes: &[usize]) -> usize {
        pool_sizes.iter().sum::<usize>() + 2
    }
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            message_size_limit: 25 * 1024 * 1024,
            recipients_limit: 100,
            envelope_limit: 10,
            transactions_limit: 20,
            error_limit: 10,
            command_flood_limit: 100,
            minimum_pool_size: 4,
            maximum_pool_size: 64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concurrency_scale_is_sum_plus_two() {
        assert_eq!(Limits::concurrency_scale(&[4, 8, 16]), 30);
        assert_eq!(Limits::concurrency_scale(&[]), 2);
    }

    #[test]
    fn transactions_limit_defaults_above_envelope_limit() {
        let limits = Limits::default();
        assert!(limits.transactions_limit >= limits.envelope_limit);
    }
}
