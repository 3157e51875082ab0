/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! The `mta-sts <domain>` subcommand (§6): fetches and prints a
//! domain's MTA-STS policy (§4.7), the same lookup the outbound relay
//! performs before resolving MX records.

use hickory_resolver::{config::ResolverConfig, TokioAsyncResolver};
use serde::Serialize;
use trc::Error;

use smtp::resolver::mta_sts::{fetch_policy, MtaStsMode};

#[derive(Serialize)]
struct PolicyView {
    domain: String,
    published: bool,
    mode: Option<&'static str>,
    mx_patterns: Vec<String>,
    max_age: Option<u64>,
}

pub async fn run(domain: &str) -> Result<(), Error> {
    let dns = TokioAsyncResolver::tokio(ResolverConfig::default(), Default::default());
    let policy = fetch_policy(&dns, domain).await?;

    let view = match policy {
        Some(policy) => PolicyView {
            domain: domain.to_string(),
            published: true,
            mode: Some(match policy.mode {
                MtaStsMode::Enforce => "enforce",
                MtaStsMode::Testing => "testing",
                MtaStsMode::None => "none",
            }),
            mx_patterns: policy.mx_patterns,
            max_age: Some(policy.max_age),
        },
        None => PolicyView {
            domain: domain.to_string(),
            published: false,
            mode: None,
            mx_patterns: Vec::new(),
            max_age: None,
        },
    };

    println!("{}", serde_json::to_string_pretty(&view).unwrap_or_default());
    Ok(())
}
