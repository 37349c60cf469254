//! The SMTP receive-side state machine: accepts a connection, drives it
//! through `Greet -> MailFrom -> RcptTo -> Data -> Done`, and hands each
//! accepted message off to the relay dispatcher. Modeled on the teacher's
//! `kumod::smtp_server::SmtpServer`, trimmed to the single-domain,
//! no-TLS, no-Lua-callback shape this spec calls for.

use crate::config::Config;
use mailingset_core::{dispatch_expression, validate_recipient, AcceptedExpression, RelayClient};
use mailparsing::{Header, HeaderMap};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const MAX_LINE_LEN: usize = 4096;

enum ReadLine {
    Line(String),
    TooLong,
    TimedOut,
    Disconnected,
}

/// The transaction state accumulated across `MAIL FROM`/`RCPT TO`
/// commands for the message currently being assembled, mirroring the
/// teacher's `TransactionState`.
#[derive(Default)]
struct Transaction {
    sender: Option<String>,
    accepted: Vec<AcceptedExpression>,
}

pub struct Connection {
    socket: TcpStream,
    peer_addr: SocketAddr,
    read_buffer: Vec<u8>,
    txn: Transaction,
    universe: Arc<mailingset_core::Universe>,
    config: Arc<Config>,
    relay: Arc<dyn RelayClient>,
}

impl Connection {
    pub fn new(
        socket: TcpStream,
        peer_addr: SocketAddr,
        universe: Arc<mailingset_core::Universe>,
        config: Arc<Config>,
        relay: Arc<dyn RelayClient>,
    ) -> Self {
        Self {
            socket,
            peer_addr,
            read_buffer: Vec::with_capacity(1024),
            txn: Transaction::default(),
            universe,
            config,
            relay,
        }
    }

    async fn write_response(&mut self, code: u16, message: impl AsRef<str>) -> std::io::Result<()> {
        let text = format!("{code} {}\r\n", message.as_ref());
        self.socket.write_all(text.as_bytes()).await?;
        self.socket.flush().await
    }

    async fn read_line(&mut self) -> std::io::Result<ReadLine> {
        let mut too_long = false;
        loop {
            if let Some(pos) = self.read_buffer.windows(2).position(|w| w == b"\r\n") {
                if too_long {
                    self.read_buffer.drain(0..pos + 2);
                    return Ok(ReadLine::TooLong);
                }
                let line = String::from_utf8_lossy(&self.read_buffer[0..pos]).into_owned();
                self.read_buffer.drain(0..pos + 2);
                return Ok(ReadLine::Line(line));
            }
            if self.read_buffer.len() > MAX_LINE_LEN {
                self.read_buffer.clear();
                too_long = true;
            }

            let mut buf = [0u8; 1024];
            tokio::select! {
                _ = tokio::time::sleep(self.config.incoming.idle_timeout) => {
                    return Ok(ReadLine::TimedOut);
                }
                n = self.socket.read(&mut buf) => {
                    match n {
                        Ok(0) | Err(_) => return Ok(ReadLine::Disconnected),
                        Ok(n) => self.read_buffer.extend_from_slice(&buf[..n]),
                    }
                }
            }
        }
    }

    /// Drives the connection until it disconnects, is reset by the peer,
    /// or times out. Socket errors end the connection silently; every
    /// SMTP-level outcome is expressed as a reply code, not a `Result`.
    #[tracing::instrument(skip(self), fields(peer = %self.peer_addr))]
    pub async fn run(mut self) {
        if let Some(accept_from) = &self.config.incoming.accept_from {
            if !accept_from.is_empty() && !accept_from.contains(self.peer_addr.ip()) {
                tracing::warn!("refusing connection from {}: not in accept_from", self.peer_addr);
                self.write_response(554, "5.7.1 Connection refused").await.ok();
                return;
            }
        }

        if self.write_response(220, "mailingset ESMTP ready").await.is_err() {
            return;
        }

        loop {
            let line = match self.read_line().await {
                Ok(ReadLine::Line(line)) => line,
                Ok(ReadLine::TooLong) => {
                    self.write_response(503, "5.5.1 line too long").await.ok();
                    continue;
                }
                Ok(ReadLine::TimedOut) => {
                    self.write_response(421, "4.4.2 idle too long").await.ok();
                    return;
                }
                Ok(ReadLine::Disconnected) => return,
                Err(_) => return,
            };

            if !self.dispatch_command(&line).await {
                return;
            }
        }
    }

    /// Handles one command line. Returns `false` when the connection
    /// should close (`QUIT`, a fatal write error, or an unrecoverable
    /// read during `DATA`).
    async fn dispatch_command(&mut self, line: &str) -> bool {
        let command = match rfc5321::Command::parse(line) {
            Ok(cmd) => cmd,
            Err(reason) => {
                return self
                    .write_response(503, format!("5.5.2 {reason}"))
                    .await
                    .is_ok();
            }
        };

        use rfc5321::Command;
        match command {
            Command::Ehlo(_) | Command::Helo(_) => self.write_response(250, "mailingset").await.is_ok(),
            Command::MailFrom { address, .. } => {
                self.txn = Transaction {
                    sender: Some(address.to_string()),
                    accepted: Vec::new(),
                };
                self.write_response(250, format!("OK <{}>", address.to_string())).await.is_ok()
            }
            Command::RcptTo { address, .. } => self.handle_rcpt_to(address).await,
            Command::Data => self.handle_data().await,
            Command::Rset => {
                self.txn = Transaction::default();
                self.write_response(250, "Reset").await.is_ok()
            }
            Command::Noop(_) => self.write_response(250, "OK").await.is_ok(),
            Command::Quit => {
                self.write_response(221, "Bye").await.ok();
                false
            }
            _ => self.write_response(503, "5.5.1 Command not implemented").await.is_ok(),
        }
    }

    async fn handle_rcpt_to(&mut self, address: rfc5321::ForwardPath) -> bool {
        if self.txn.sender.is_none() {
            return self
                .write_response(503, "5.5.0 MAIL FROM must be issued first")
                .await
                .is_ok();
        }

        // RFC 5321 §4.5.1 requires accepting the domain-less `Postmaster`
        // form; read it as addressed to this server's own domain rather
        // than round-tripping through `ForwardPath::to_string()` (which
        // renders it with no '@' at all) and re-splitting.
        let (local_part, domain) = match &address {
            rfc5321::ForwardPath::Postmaster => {
                ("postmaster".to_string(), self.config.incoming.domain.clone())
            }
            rfc5321::ForwardPath::Path(path) => (
                path.mailbox.local_part.clone(),
                path.mailbox.domain.to_string(),
            ),
        };

        if !domain.eq_ignore_ascii_case(&self.config.incoming.domain) {
            return self
                .write_response(550, "5.1.2 relay domain not served here")
                .await
                .is_ok();
        }

        match validate_recipient(&self.universe, &local_part) {
            Ok(accepted) => {
                let ok = self
                    .write_response(250, format!("OK <{}>", address.to_string()))
                    .await
                    .is_ok();
                self.txn.accepted.push(accepted);
                ok
            }
            Err(err) => self
                .write_response(err.smtp_code(), format!("{} {err}", enhanced(err.smtp_code())))
                .await
                .is_ok(),
        }
    }

    async fn handle_data(&mut self) -> bool {
        if self.txn.sender.is_none() {
            return self
                .write_response(503, "5.5.0 MAIL FROM must be issued first")
                .await
                .is_ok();
        }
        if self.txn.accepted.is_empty() {
            return self
                .write_response(503, "5.5.1 RCPT TO must be issued first")
                .await
                .is_ok();
        }

        if self.write_response(354, "Send message, end with <CRLF>.<CRLF>").await.is_err() {
            return false;
        }

        let mut data = Vec::new();
        let mut too_long = false;
        loop {
            let line = match self.read_line().await {
                Ok(ReadLine::Line(line)) => line,
                Ok(ReadLine::TooLong) => {
                    too_long = true;
                    continue;
                }
                Ok(ReadLine::TimedOut) => {
                    self.write_response(421, "4.4.2 idle too long").await.ok();
                    return false;
                }
                Ok(ReadLine::Disconnected) => return false,
                Err(_) => return false,
            };
            if line == "." {
                break;
            }
            let line = line.strip_prefix('.').unwrap_or(&line);
            if data.len() + line.len() + 2 > self.config.incoming.max_message_size {
                too_long = true;
                continue;
            }
            data.extend_from_slice(line.as_bytes());
            data.extend_from_slice(b"\r\n");
        }

        let txn = std::mem::take(&mut self.txn);

        if too_long {
            return self.write_response(550, "5.3.4 message too large").await.is_ok();
        }

        let sender = txn.sender.expect("checked non-empty above");
        match self.relay_message(&sender, txn.accepted, &data).await {
            Ok(()) => self.write_response(250, "2.0.0 queued").await.is_ok(),
            Err(reason) => self.write_response(451, format!("4.3.0 {reason}")).await.is_ok(),
        }
    }

    /// Builds one tagged copy of the message per accepted `RCPT TO`
    /// expression and hands each off to its own relay task. Returns as
    /// soon as hand-off is committed (the tasks are spawned, not
    /// joined) so the caller can reply `250 queued` without waiting on
    /// the outbound relay; a disconnect after that reply must not
    /// cancel relay, so nothing here blocks on the spawned tasks.
    async fn relay_message(
        &self,
        sender: &str,
        accepted: Vec<AcceptedExpression>,
        raw: &[u8],
    ) -> Result<(), String> {
        let parsed =
            Header::parse_headers(raw).map_err(|err| format!("parsing message headers: {err}"))?;
        let body = &raw[parsed.body_offset..];

        // Carried alongside `sender` as the bounce-attribution pair: a
        // delivery failure reported by the relay is logged against
        // whoever the message claims to be from, not just the envelope
        // sender recorded at `MAIL FROM`.
        let from_header = parsed
            .headers
            .get_first("From")
            .map(|h| h.get_raw_value().to_string())
            .unwrap_or_default();

        let owned_headers: Vec<Header<'static>> = parsed
            .headers
            .iter()
            .map(|h| Header::new_unstructured(h.get_name().to_string(), h.get_raw_value().to_string()))
            .collect();

        for expr in accepted {
            let mut headers: HeaderMap<'static> = HeaderMap::new(owned_headers.clone());
            mailingset_core::tagger::apply(
                &mut headers,
                &expr.expr,
                &self.universe,
                &expr.local_part,
                &self.config.incoming.domain,
            );

            let mut message = Vec::with_capacity(raw.len());
            for header in headers.iter() {
                header
                    .write_header(&mut message)
                    .map_err(|err| format!("rendering headers: {err}"))?;
            }
            message.extend_from_slice(b"\r\n");
            message.extend_from_slice(body);

            let relay = Arc::clone(&self.relay);
            let envelope_sender = self.config.outgoing.envelope_sender.clone();
            let archive_addr = self.config.outgoing.archive_addr.clone();
            let recipients = expr.resolved.clone();
            let sender = sender.to_string();
            let from_header = from_header.clone();

            tokio::spawn(async move {
                let outcome = dispatch_expression(
                    relay.as_ref(),
                    &envelope_sender,
                    &recipients,
                    archive_addr.as_deref(),
                    &message,
                )
                .await;
                for (recipient, reason) in &outcome.failed {
                    tracing::warn!(
                        "relay delivery to {recipient} failed: {reason} (envelope sender {sender}, From: {from_header})"
                    );
                }
                tracing::info!(
                    "relayed message from {sender}: {} delivered, {} failed",
                    outcome.delivered.len(),
                    outcome.failed.len()
                );
            });
        }

        Ok(())
    }
}

fn enhanced(code: u16) -> &'static str {
    match code {
        550 => "5.1.1",
        451 => "4.3.0",
        _ => "5.5.0",
    }
}

pub async fn serve(
    config: Arc<Config>,
    universe: Arc<mailingset_core::Universe>,
    relay: Arc<dyn RelayClient>,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.incoming.port)).await?;
    tracing::info!(port = config.incoming.port, "listening");

    loop {
        let (socket, peer_addr) = listener.accept().await?;
        let config = Arc::clone(&config);
        let universe = Arc::clone(&universe);
        let relay = Arc::clone(&relay);

        tokio::spawn(async move {
            let conn = Connection::new(socket, peer_addr, universe, config, relay);
            conn.run().await;
        });
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn enhanced_code_matches_table() {
        k9::assert_equal!(enhanced(550), "5.1.1");
        k9::assert_equal!(enhanced(451), "4.3.0");
        k9::assert_equal!(enhanced(421), "5.5.0");
    }
}
