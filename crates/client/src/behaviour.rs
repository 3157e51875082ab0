/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Drives the client side of one case (§4.12): connects per the
//! route, runs the extended greeting, optional STARTTLS/AUTH, then
//! each envelope's MAIL/RCPT/DATA, recording every exchange into the
//! caller's [`CaseReport`] before evaluating assertion groups in
//! order. The first failing group is surfaced as a typed error; every
//! group's outcome (pass or fail) is still recorded in the report.

use std::time::Duration;

use rand::RngCore;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use trc::Error;
use utils::lineio;

use crate::assertions::{evaluate_mta, evaluate_smtp, AssertionGroup};
use crate::case::{render_body, Envelope, TestCase};
use crate::external::ExternalLookup;
use crate::report::{AssertionOutcome, CaseReport, Transaction};
use crate::route::{AuthConfig, AuthMechanism, Protocol, TlsMode};
use crate::tls;

const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_LINE: usize = 8192;

/// Blanket stream trait so a plain `TcpStream` can be replaced in
/// place by a `tokio_rustls::client::TlsStream` after STARTTLS or an
/// implicit-TLS connect, without threading a generic through the
/// whole dialogue.
pub trait ClientStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> ClientStream for T {}

async fn write_line(stream: &mut (dyn ClientStream), line: &str) -> Result<(), Error> {
    stream.write_all(line.as_bytes()).await?;
    stream.write_all(b"\r\n").await?;
    Ok(())
}

/// Reads one reply line (CRLF stripped).
async fn read_line_from(stream: &mut (dyn ClientStream), buf: &mut Vec<u8>) -> Result<String, Error> {
    let line = lineio::read_line(stream, buf, MAX_LINE, COMMAND_TIMEOUT)
        .await?
        .ok_or_else(|| Error::local_transient("connection closed before a reply"))?;
    Ok(String::from_utf8_lossy(&line).into_owned())
}

/// Reads a (possibly multi-line) SMTP reply, joining continuation
/// lines (`250-...`) with `\n` into one rendering for the transaction
/// log.
async fn read_reply(stream: &mut (dyn ClientStream), buf: &mut Vec<u8>) -> Result<String, Error> {
    let mut lines = Vec::new();
    loop {
        let line = read_line_from(stream, buf).await?;
        let is_final = line.len() < 4 || line.as_bytes()[3] != b'-';
        lines.push(line);
        if is_final {
            break;
        }
    }
    Ok(lines.join("\n"))
}

async fn command(
    stream: &mut (dyn ClientStream),
    buf: &mut Vec<u8>,
    report: &mut CaseReport,
    verb: &str,
    line: &str,
) -> Result<String, Error> {
    write_line(stream, line).await?;
    let response = read_reply(stream, buf).await?;
    report.record(Transaction::new(verb, line, response.clone()));
    Ok(response)
}

fn is_positive(response: &str) -> bool {
    response.split('\n').next().is_some_and(|first| first.starts_with('2') || first.starts_with('3'))
}

async fn authenticate(
    stream: &mut Box<dyn ClientStream>,
    buf: &mut Vec<u8>,
    report: &mut CaseReport,
    auth: &AuthConfig,
) -> Result<(), Error> {
    use base64::{engine::general_purpose::STANDARD, Engine};

    match auth.mechanism {
        AuthMechanism::Plain => {
            let creds = format!("\0{}\0{}", auth.username, auth.password);
            let encoded = STANDARD.encode(creds.as_bytes());
            let response = command(
                stream.as_mut(),
                buf,
                report,
                "AUTH",
                &format!("AUTH PLAIN {encoded}"),
            )
            .await?;
            if !response.starts_with('2') {
                return Err(Error::auth_failure(format!("AUTH PLAIN rejected: {response}")));
            }
        }
        AuthMechanism::Login => {
            let prompt = command(stream.as_mut(), buf, report, "AUTH", "AUTH LOGIN").await?;
            if !prompt.starts_with("334") {
                return Err(Error::auth_failure(format!("AUTH LOGIN not offered: {prompt}")));
            }
            let username = STANDARD.encode(auth.username.as_bytes());
            let prompt = command(stream.as_mut(), buf, report, "AUTH", &username).await?;
            if !prompt.starts_with("334") {
                return Err(Error::auth_failure(format!("AUTH LOGIN rejected username: {prompt}")));
            }
            let password = STANDARD.encode(auth.password.as_bytes());
            let response = command(stream.as_mut(), buf, report, "AUTH", &password).await?;
            if !response.starts_with('2') {
                return Err(Error::auth_failure(format!("AUTH LOGIN rejected: {response}")));
            }
        }
        AuthMechanism::DigestMd5 => {
            let challenge = command(stream.as_mut(), buf, report, "AUTH", "AUTH DIGEST-MD5").await?;
            if !challenge.starts_with("334") {
                return Err(Error::auth_failure(format!("AUTH DIGEST-MD5 not offered: {challenge}")));
            }
            let mut cnonce_bytes = [0u8; 8];
            rand::thread_rng().fill_bytes(&mut cnonce_bytes);
            let cnonce = hex::encode(cnonce_bytes);
            let reply = format!(
                "username=\"{}\",nonce=\"{}\",cnonce=\"{}\",nc=00000001,qop=auth",
                auth.username, cnonce, cnonce
            );
            let encoded = STANDARD.encode(reply.as_bytes());
            let response = command(stream.as_mut(), buf, report, "AUTH", &encoded).await?;
            if !response.starts_with('2') {
                return Err(Error::auth_failure(format!("AUTH DIGEST-MD5 rejected: {response}")));
            }
        }
    }
    Ok(())
}

/// Writes a DATA body with dot-stuffing (a leading `.` on any body
/// line is doubled) and the terminating bare-dot line.
async fn send_data_body(stream: &mut (dyn ClientStream), body: &[u8]) -> Result<(), Error> {
    for line in body.split(|&b| b == b'\n') {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.first() == Some(&b'.') {
            stream.write_all(b".").await?;
        }
        stream.write_all(line).await?;
        stream.write_all(b"\r\n").await?;
    }
    stream.write_all(b".\r\n").await?;
    Ok(())
}

async fn run_envelope(
    stream: &mut Box<dyn ClientStream>,
    buf: &mut Vec<u8>,
    report: &mut CaseReport,
    mail: &str,
    envelope: &Envelope,
) -> Result<(), Error> {
    let response = command(
        stream.as_mut(),
        buf,
        report,
        "MAIL",
        &format!("MAIL FROM:<{mail}>"),
    )
    .await?;
    if !is_positive(&response) {
        return Ok(());
    }

    let mut any_accepted = false;
    for rcpt in &envelope.rcpt {
        let response = command(
            stream.as_mut(),
            buf,
            report,
            "RCPT",
            &format!("RCPT TO:<{rcpt}>"),
        )
        .await?;
        any_accepted |= is_positive(&response);
    }
    if !any_accepted {
        return Ok(());
    }

    let response = command(stream.as_mut(), buf, report, "DATA", "DATA").await?;
    if !response.starts_with('3') {
        return Ok(());
    }
    let body = render_body(mail, envelope.mime.as_ref())?;
    send_data_body(stream.as_mut(), &body).await?;
    let response = read_reply(stream.as_mut(), buf).await?;
    report.record(Transaction::new("DATA-END", "<body>", response));
    Ok(())
}

async fn dial(route: &crate::route::Route) -> Result<Box<dyn ClientStream>, Error> {
    let tcp = TcpStream::connect((route.host.as_str(), route.port))
        .await
        .map_err(|e| Error::local_transient(format!("connect to {}:{} failed: {e}", route.host, route.port)))?;
    if route.tls == TlsMode::Implicit {
        let connector = tls::build_connector();
        let upgraded = tls::connect(&connector, &route.host, tcp).await?;
        Ok(Box::new(upgraded))
    } else {
        Ok(Box::new(tcp))
    }
}

/// Runs `case` end to end, appending every command/response to
/// `report` and evaluating each assertion group (session-level first,
/// then one per envelope, in declaration order) against the final
/// log. Returns the first group's failure as a typed error (§7); all
/// groups' pass/fail outcomes are recorded in `report` regardless.
pub async fn run(
    case: &TestCase,
    external: &dyn ExternalLookup,
    report: &mut CaseReport,
) -> Result<(), Error> {
    let mut stream = dial(&case.route).await?;
    let mut buf = Vec::new();

    let greeting = read_reply(stream.as_mut(), &mut buf).await?;
    report.record(Transaction::new("CONNECT", "<connect>", greeting));

    let greeting_verb = case.route.protocol.greeting_verb();
    command(
        stream.as_mut(),
        &mut buf,
        report,
        greeting_verb,
        &format!("{greeting_verb} {}", case.route.local_hostname),
    )
    .await?;

    if case.route.tls == TlsMode::Starttls && case.route.protocol != Protocol::Lmtp {
        let response = command(stream.as_mut(), &mut buf, report, "STARTTLS", "STARTTLS").await?;
        if response.starts_with('2') {
            let connector = tls::build_connector();
            let upgraded = tls::connect(&connector, &case.route.host, stream).await?;
            stream = Box::new(upgraded);
            buf.clear();
            command(
                stream.as_mut(),
                &mut buf,
                report,
                greeting_verb,
                &format!("{greeting_verb} {}", case.route.local_hostname),
            )
            .await?;
        }
    }

    if let Some(auth) = &case.route.auth {
        authenticate(&mut stream, &mut buf, report, auth).await?;
    }

    let mut first_failure: Option<Error> = None;

    if !case.assertions.is_empty() {
        let outcome = evaluate_smtp("session", &case.assertions, &report.transactions).await;
        report.assertions.push(AssertionOutcome {
            group: "session".to_string(),
            passed: outcome.is_ok(),
            detail: outcome.as_ref().err().map(|e| e.message.clone()),
        });
        if let Err(e) = outcome {
            first_failure.get_or_insert(e);
        }
    }

    for (index, envelope) in case.all_envelopes().iter().enumerate() {
        run_envelope(&mut stream, &mut buf, report, &case.mail, envelope).await?;

        let name = format!("envelope-{index}");
        if !envelope.assertions.is_empty() {
            let outcome = evaluate_smtp(&name, &envelope.assertions, &report.transactions).await;
            report.assertions.push(AssertionOutcome {
                group: name.clone(),
                passed: outcome.is_ok(),
                detail: outcome.as_ref().err().map(|e| e.message.clone()),
            });
            if let Err(e) = outcome {
                first_failure.get_or_insert(e);
            }
        }
        if let Some(mta) = &envelope.assertions.mta {
            let outcome = evaluate_mta(&name, mta, external).await;
            report.assertions.push(AssertionOutcome {
                group: format!("{name}-mta"),
                passed: outcome.is_ok(),
                detail: outcome.as_ref().err().map(|e| e.message.clone()),
            });
            if let Err(e) = outcome {
                first_failure.get_or_insert(e);
            }
        }
    }

    command(stream.as_mut(), &mut buf, report, "QUIT", "QUIT").await.ok();

    match first_failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::case::MimeSpec;
    use crate::external::NullExternalLookup;
    use crate::route::Route;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::{TcpListener, TcpStream as TokioTcpStream};

    fn route(port: u16) -> Route {
        Route {
            host: "127.0.0.1".to_string(),
            port,
            protocol: Protocol::Esmtp,
            tls: TlsMode::None,
            auth: None,
            local_hostname: "client.test".to_string(),
        }
    }

    async fn serve_minimal(stream: TokioTcpStream) {
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        write_half.write_all(b"220 mx.test ready\r\n").await.unwrap();
        loop {
            let mut line = String::new();
            let n = reader.read_line(&mut line).await.unwrap();
            if n == 0 {
                break;
            }
            let verb = line.split_whitespace().next().unwrap_or("").to_ascii_uppercase();
            let response: &[u8] = match verb.as_str() {
                "EHLO" => b"250-mx.test\r\n250 PIPELINING\r\n",
                "MAIL" => b"250 2.1.0 OK\r\n",
                "RCPT" => b"250 2.1.5 OK\r\n",
                "DATA" => b"354 go ahead\r\n",
                "QUIT" => {
                    write_half.write_all(b"221 2.0.0 bye\r\n").await.unwrap();
                    break;
                }
                _ => b"250 2.0.0 OK\r\n",
            };
            write_half.write_all(response).await.unwrap();
            if verb == "DATA" {
                loop {
                    let mut body_line = String::new();
                    reader.read_line(&mut body_line).await.unwrap();
                    if body_line == ".\r\n" {
                        break;
                    }
                }
                write_half.write_all(b"250 2.0.0 message accepted\r\n").await.unwrap();
            }
        }
    }

    #[tokio::test]
    async fn runs_a_full_case_against_a_real_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            serve_minimal(stream).await;
        });

        let case = TestCase {
            route: route(port),
            mail: "s@x.com".to_string(),
            rcpt: vec!["r@y.com".to_string()],
            mime: Some(MimeSpec::Raw {
                raw: "Subject: hi\r\n\r\nhello\r\n".to_string(),
            }),
            assertions: AssertionGroup {
                delay: None,
                wait: None,
                retry: 1,
                smtp: vec![("EHLO".into(), "250".into())],
                mta: None,
            },
            envelopes: vec![],
        };

        let mut report = CaseReport::new();
        let lookup = NullExternalLookup;
        run(&case, &lookup, &mut report).await.unwrap();
        server.await.unwrap();

        assert!(report.passed());
        assert!(report.transactions.iter().any(|t| t.verb == "DATA-END" && t.response.starts_with("250")));
        assert!(report.transactions.iter().any(|t| t.verb == "QUIT"));
    }

    #[tokio::test]
    async fn surfaces_the_first_failing_assertion_group_as_a_typed_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            serve_minimal(stream).await;
        });

        let case = TestCase {
            route: route(port),
            mail: "s@x.com".to_string(),
            rcpt: vec!["r@y.com".to_string()],
            mime: None,
            assertions: AssertionGroup {
                delay: None,
                wait: None,
                retry: 1,
                smtp: vec![("EHLO".into(), "^550".into())],
                mta: None,
            },
            envelopes: vec![],
        };

        let mut report = CaseReport::new();
        let lookup = NullExternalLookup;
        let err = run(&case, &lookup, &mut report).await.unwrap_err();
        assert!(err.assertion_failure().is_some());
        assert!(!report.passed());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn dot_stuffing_escapes_leading_dot_lines_and_terminates_with_bare_dot() {
        use tokio::io::AsyncReadExt;

        let (mut client, mut server) = tokio::io::duplex(4096);
        let body = b"normal line\r\n.hidden\r\nend".to_vec();
        send_data_body(&mut client, &body).await.unwrap();
        drop(client);

        let mut written = Vec::new();
        server.read_to_end(&mut written).await.unwrap();
        let text = String::from_utf8(written).unwrap();
        assert_eq!(text, "normal line\r\n..hidden\r\nend\r\n.\r\n");
    }
}
