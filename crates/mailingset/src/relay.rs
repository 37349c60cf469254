//! Default outbound SMTP client wired up as the core's `RelayClient`.
//!
//! The outbound client is explicitly an external collaborator per the
//! core spec: the core crate only knows about the `RelayClient` trait. This
//! module supplies a plain (non-TLS), single-connection-per-call
//! implementation built from `rfc5321::Command`'s encoder, matching the
//! teacher's own split between the wire grammar (`rfc5321`) and the thing
//! that drives a socket with it (normally `rfc5321::client`, simplified
//! here since DANE/MX-routing/TLS are out of scope for this relay).
//!
//! `apply_dot_stuffing` is ported from that same teacher module: the
//! receive side un-stuffs incoming DATA lines, so the outbound side must
//! stuff them back before the `.\r\n` terminator or a body line that
//! legitimately starts with `.` would be mistaken for end-of-message.

use async_trait::async_trait;
use mailingset_core::RelayClient;
use memchr::memmem::Finder;
use rfc5321::{Command, Domain, EsmtpParameter, ForwardPath, Mailbox, ReversePath};
use std::sync::LazyLock;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Escapes any line that begins with `.` by doubling the leading dot, so
/// the DATA terminator (a lone `.` line) can never be confused with a
/// line of message content. Returns `None` when the input needs no
/// escaping at all, so the caller can skip the copy in the common case.
fn apply_dot_stuffing(data: &[u8]) -> Option<Vec<u8>> {
    static LFDOT: LazyLock<Finder> = LazyLock::new(|| Finder::new(b"\n."));

    if !data.starts_with(b".") && LFDOT.find(data).is_none() {
        return None;
    }

    let mut stuffed = vec![];
    if data.starts_with(b".") {
        stuffed.push(b'.');
    }
    let mut last_idx = 0;
    for i in LFDOT.find_iter(data) {
        stuffed.extend_from_slice(&data[last_idx..=i]);
        stuffed.push(b'.');
        last_idx = i + 1;
    }
    stuffed.extend_from_slice(&data[last_idx..]);
    Some(stuffed)
}

pub struct SmtpRelayClient {
    pub server: String,
    pub port: u16,
    pub connect_timeout: Duration,
}

fn forward_path(addr: &str) -> Result<ForwardPath, String> {
    let (local, domain) = addr
        .split_once('@')
        .ok_or_else(|| format!("{addr} is not a valid address"))?;
    Ok(ForwardPath::Path(rfc5321::MailPath {
        at_domain_list: vec![],
        mailbox: Mailbox {
            local_part: local.to_string(),
            domain: Domain::Name(domain.to_string()),
        },
    }))
}

fn reverse_path(addr: &str) -> Result<ReversePath, String> {
    if addr.is_empty() {
        return Ok(ReversePath::NullSender);
    }
    let (local, domain) = addr
        .split_once('@')
        .ok_or_else(|| format!("{addr} is not a valid address"))?;
    Ok(ReversePath::Path(rfc5321::MailPath {
        at_domain_list: vec![],
        mailbox: Mailbox {
            local_part: local.to_string(),
            domain: Domain::Name(domain.to_string()),
        },
    }))
}

/// Reads one (possibly multi-line) SMTP reply, returning its status code.
/// `250-foo\r\n250 bar\r\n` is one reply; the loop continues so long as
/// the 4th character is `-`.
async fn read_reply<R: AsyncBufReadExt + Unpin>(reader: &mut R) -> Result<u16, String> {
    let mut code = None;
    loop {
        let mut line = String::new();
        reader
            .read_line(&mut line)
            .await
            .map_err(|err| format!("reading reply: {err}"))?;
        if line.is_empty() {
            return Err("connection closed while awaiting reply".to_string());
        }
        let line = line.trim_end();
        if line.len() < 3 {
            return Err(format!("malformed reply line {line:?}"));
        }
        let this_code: u16 = line[0..3]
            .parse()
            .map_err(|_| format!("malformed reply code in {line:?}"))?;
        code.get_or_insert(this_code);
        let is_final = line.as_bytes().get(3) != Some(&b'-');
        if is_final {
            return Ok(code.unwrap());
        }
    }
}

impl SmtpRelayClient {
    async fn send_impl(
        &self,
        envelope_sender: &str,
        recipient: &str,
        message: &[u8],
    ) -> Result<(), String> {
        let stream = timeout(
            self.connect_timeout,
            TcpStream::connect((self.server.as_str(), self.port)),
        )
        .await
        .map_err(|_| "connect timed out".to_string())?
        .map_err(|err| format!("connect to {}:{}: {err}", self.server, self.port))?;

        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        // Greeting.
        read_reply(&mut reader).await?;

        write_half
            .write_all(Command::Ehlo(Domain::Name("mailingset".to_string())).encode().as_bytes())
            .await
            .map_err(|err| err.to_string())?;
        read_reply(&mut reader).await?;

        let mail_from = Command::MailFrom {
            address: reverse_path(envelope_sender)?,
            parameters: Vec::<EsmtpParameter>::new(),
        };
        write_half
            .write_all(mail_from.encode().as_bytes())
            .await
            .map_err(|err| err.to_string())?;
        let code = read_reply(&mut reader).await?;
        if code / 100 != 2 {
            return Err(format!("MAIL FROM rejected with {code}"));
        }

        let rcpt_to = Command::RcptTo {
            address: forward_path(recipient)?,
            parameters: Vec::<EsmtpParameter>::new(),
        };
        write_half
            .write_all(rcpt_to.encode().as_bytes())
            .await
            .map_err(|err| err.to_string())?;
        let code = read_reply(&mut reader).await?;
        if code / 100 != 2 {
            return Err(format!("RCPT TO rejected with {code}"));
        }

        write_half
            .write_all(Command::Data.encode().as_bytes())
            .await
            .map_err(|err| err.to_string())?;
        let code = read_reply(&mut reader).await?;
        if code != 354 {
            return Err(format!("DATA rejected with {code}"));
        }

        let stuffed;
        let message = match apply_dot_stuffing(message) {
            Some(s) => {
                stuffed = s;
                stuffed.as_slice()
            }
            None => message,
        };

        write_half
            .write_all(message)
            .await
            .map_err(|err| err.to_string())?;
        if !message.ends_with(b"\r\n") {
            write_half
                .write_all(b"\r\n")
                .await
                .map_err(|err| err.to_string())?;
        }
        write_half
            .write_all(b".\r\n")
            .await
            .map_err(|err| err.to_string())?;
        let code = read_reply(&mut reader).await?;
        if code / 100 != 2 {
            return Err(format!("message rejected with {code}"));
        }

        write_half
            .write_all(Command::Quit.encode().as_bytes())
            .await
            .ok();

        Ok(())
    }
}

#[async_trait]
impl RelayClient for SmtpRelayClient {
    async fn send(
        &self,
        envelope_sender: &str,
        recipient: &str,
        message: &[u8],
    ) -> Result<(), String> {
        self.send_impl(envelope_sender, recipient, message).await
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_stuffing() {
        assert_eq!(apply_dot_stuffing(b"foo"), None);
        assert_eq!(apply_dot_stuffing(b".foo").unwrap(), b"..foo");
        assert_eq!(apply_dot_stuffing(b"foo\n.bar").unwrap(), b"foo\n..bar");
        assert_eq!(
            apply_dot_stuffing(b"foo\n.bar\n..baz\n").unwrap(),
            b"foo\n..bar\n...baz\n"
        );
    }
}
