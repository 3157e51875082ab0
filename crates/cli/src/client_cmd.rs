/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! The `client <case-file> [-c <client-config>]` subcommand (§6). A
//! client-config file carries the same route fields as a case's
//! `route` object; any field it sets overrides the case file's,
//! letting one case run against different hosts without editing it.

use std::path::Path;

use client::{
    case::TestCase,
    route::{AuthConfig, Protocol, Route, TlsMode},
    report::CaseReport,
};
use client::external::NullExternalLookup;
use serde::Deserialize;
use trc::Error;

#[derive(Debug, Deserialize, Default)]
struct RouteOverride {
    host: Option<String>,
    port: Option<u16>,
    protocol: Option<Protocol>,
    tls: Option<TlsMode>,
    auth: Option<AuthConfig>,
    local_hostname: Option<String>,
}

fn apply_override(route: &mut Route, over: RouteOverride) {
    if let Some(host) = over.host {
        route.host = host;
    }
    if let Some(port) = over.port {
        route.port = port;
    }
    if let Some(protocol) = over.protocol {
        route.protocol = protocol;
    }
    if let Some(tls) = over.tls {
        route.tls = tls;
    }
    if over.auth.is_some() {
        route.auth = over.auth;
    }
    if let Some(local_hostname) = over.local_hostname {
        route.local_hostname = local_hostname;
    }
}

/// Runs one test case and prints its report as JSON. The returned
/// error (if any) is the first failing assertion group, or the
/// connection/parse failure that kept the case from running at all
/// (§6, §7); the caller maps it to an exit code.
pub async fn run(case_file: &Path, client_config: Option<&Path>) -> Result<(), Error> {
    let text = std::fs::read_to_string(case_file)
        .map_err(|e| Error::local_permanent(format!("cannot read case file {}: {e}", case_file.display())))?;
    let mut case = TestCase::from_json(&text)?;

    if let Some(path) = client_config {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::local_permanent(format!("cannot read client config {}: {e}", path.display())))?;
        let over: RouteOverride = serde_json::from_str(&text)
            .map_err(|e| Error::local_permanent(format!("invalid client config {}: {e}", path.display())))?;
        apply_override(&mut case.route, over);
    }

    let lookup = NullExternalLookup;
    let mut report = CaseReport::new();
    let outcome = client::behaviour::run(&case, &lookup, &mut report).await;
    println!("{}", serde_json::to_string_pretty(&report).unwrap_or_default());
    outcome
}
