/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Dovecot SASL client over a Unix domain socket (§6). Speaks the
//! tab-separated line protocol directly: `VERSION`/`CPID` handshake,
//! then one `AUTH` request per attempt, expecting `OK`/`FAIL`/`CONT`.

use async_trait::async_trait;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::UnixStream,
};
use trc::Error;

use crate::{Directory, Principal};

pub struct DovecotAuth {
    socket_path: String,
    pid: u32,
}

#[derive(Debug, PartialEq, Eq)]
pub enum DovecotReply {
    Ok,
    Fail,
    Continue(String),
}

impl DovecotAuth {
    pub fn new(socket_path: impl Into<String>) -> Self {
        DovecotAuth {
            socket_path: socket_path.into(),
            pid: std::process::id(),
        }
    }

    async fn connect(&self) -> Result<BufReader<UnixStream>, Error> {
        let stream = UnixStream::connect(&self.socket_path)
            .await
            .map_err(|e| Error::local_transient(format!("dovecot socket connect: {e}")))?;
        let mut stream = BufReader::new(stream);
        stream
            .get_mut()
            .write_all(format!("VERSION\t1\t2\nCPID\t{}\n", self.pid).as_bytes())
            .await?;
        Ok(stream)
    }

    /// Runs one PLAIN/LOGIN/DIGEST-MD5 exchange identified by `mech`,
    /// with the client's initial response already base64-encoded.
    pub async fn authenticate(
        &self,
        mech: &str,
        local: &str,
        remote: &str,
        secured: bool,
        initial_response: Option<&str>,
    ) -> Result<DovecotReply, Error> {
        let mut stream = self.connect().await?;
        let mut request = format!(
            "AUTH\t1\t{mech}\tservice=smtp\tlip={local}\trip={remote}"
        );
        if secured {
            request.push_str("\tsecured");
        }
        if let Some(resp) = initial_response {
            request.push_str(&format!("\tresp={resp}"));
        }
        request.push('\n');
        stream.get_mut().write_all(request.as_bytes()).await?;

        let mut line = String::new();
        loop {
            line.clear();
            let read = stream.read_line(&mut line).await?;
            if read == 0 {
                return Err(Error::local_transient("dovecot socket closed"));
            }
            let line = line.trim_end();
            if line.starts_with("VERSION") || line.starts_with("MECH") || line.starts_with("SPID") {
                continue;
            }
            let mut parts = line.split('\t');
            return match parts.next() {
                Some("OK") => Ok(DovecotReply::Ok),
                Some("FAIL") => Ok(DovecotReply::Fail),
                Some("CONT") => Ok(DovecotReply::Continue(
                    parts.next().unwrap_or_default().to_string(),
                )),
                _ => Err(Error::local_transient("unrecognized dovecot reply")),
            };
        }
    }
}

#[async_trait]
impl Directory for DovecotAuth {
    async fn authenticate(&self, username: &str, secret: &str) -> Result<bool, Error> {
        use base64::Engine;
        let resp = base64::engine::general_purpose::STANDARD
            .encode(format!("\0{username}\0{secret}"));
        Ok(matches!(
            self.authenticate("PLAIN", "127.0.0.1", "127.0.0.1", true, Some(&resp))
                .await?,
            DovecotReply::Ok
        ))
    }

    async fn lookup(&self, _address: &str) -> Result<Option<Principal>, Error> {
        // Dovecot's SASL socket only authenticates; it has no user
        // directory lookup of its own.
        Ok(None)
    }

    fn name(&self) -> &str {
        "dovecot"
    }
}

#[cfg(test)]
mod tests {
    use super::DovecotReply;

    #[test]
    fn reply_kinds_are_distinguishable() {
        assert_ne!(DovecotReply::Ok, DovecotReply::Fail);
        assert_eq!(
            DovecotReply::Continue("abc".into()),
            DovecotReply::Continue("abc".into())
        );
    }
}
