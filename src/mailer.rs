//! Minimal SMTP submission client (implicit TLS, AUTH PLAIN).
//!
//! One connection per message: greeting, EHLO, AUTH, MAIL FROM, RCPT TO,
//! DATA, QUIT. Every read and write is bounded by the configured timeout.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Local};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use uuid::Uuid;

use crate::notify::Notifier;

#[derive(Error, Debug)]
pub enum MailError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TLS error: {0}")]
    Tls(#[from] native_tls::Error),
    #[error("{0} timed out")]
    Timeout(&'static str),
    #[error("server closed the connection")]
    ConnectionClosed,
    #[error("malformed server reply: {0}")]
    Malformed(String),
    #[error("{command} rejected with {code}: {message}")]
    Rejected {
        command: String,
        code: u16,
        message: String,
    },
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Reply {
    code: u16,
    message: String,
}

pub struct SmtpMailer {
    config: SmtpConfig,
    connector: tokio_native_tls::TlsConnector,
}

impl SmtpMailer {
    pub fn new(config: SmtpConfig) -> Result<Self, MailError> {
        let connector = native_tls::TlsConnector::new()?;
        Ok(Self {
            config,
            connector: connector.into(),
        })
    }

    pub async fn deliver(&self, recipient: &str, subject: &str, body: &str) -> Result<(), MailError> {
        let limit = self.config.timeout;
        let tcp = timeout(
            limit,
            TcpStream::connect((self.config.host.as_str(), self.config.port)),
        )
        .await
        .map_err(|_| MailError::Timeout("connect"))??;

        let tls = timeout(limit, self.connector.connect(&self.config.host, tcp))
            .await
            .map_err(|_| MailError::Timeout("TLS handshake"))??;

        let message = format_message(
            &self.config.from,
            recipient,
            subject,
            body,
            Local::now(),
            &format!("<{}@{}>", Uuid::new_v4(), self.config.host),
        );

        let mut stream = BufReader::new(tls);
        run_session(&mut stream, &self.config, recipient, &message).await
    }
}

#[async_trait]
impl Notifier for SmtpMailer {
    async fn send(&self, recipient: &str, body: &str, subject: &str) {
        match self.deliver(recipient, subject, body).await {
            Ok(()) => log::info!("Email sent to {} | Subject: {}", recipient, subject),
            Err(e) => log::error!("Email error: failed to send to {}: {}", recipient, e),
        }
    }
}

async fn run_session<S>(
    stream: &mut S,
    config: &SmtpConfig,
    recipient: &str,
    message: &str,
) -> Result<(), MailError>
where
    S: AsyncBufRead + AsyncWrite + Unpin,
{
    let limit = config.timeout;

    let greeting = read_reply(stream, limit).await?;
    if greeting.code != 220 {
        return Err(MailError::Rejected {
            command: "greeting".to_string(),
            code: greeting.code,
            message: greeting.message,
        });
    }

    command(stream, "EHLO medminder", 250, limit).await?;

    let credentials = BASE64.encode(format!("\0{}\0{}", config.username, config.password));
    command(stream, &format!("AUTH PLAIN {}", credentials), 235, limit).await?;

    command(stream, &format!("MAIL FROM:<{}>", config.from), 250, limit).await?;
    command(stream, &format!("RCPT TO:<{}>", recipient), 250, limit).await?;
    command(stream, "DATA", 354, limit).await?;

    write_all(stream, message.as_bytes(), limit).await?;
    write_all(stream, b"\r\n.\r\n", limit).await?;
    expect(stream, "DATA", 250, limit).await?;

    // The message is accepted at this point; a failed QUIT changes nothing.
    if let Err(e) = command(stream, "QUIT", 221, limit).await {
        log::debug!("QUIT failed after delivery: {}", e);
    }
    Ok(())
}

async fn command<S>(stream: &mut S, line: &str, code: u16, limit: Duration) -> Result<Reply, MailError>
where
    S: AsyncBufRead + AsyncWrite + Unpin,
{
    write_all(stream, format!("{}\r\n", line).as_bytes(), limit).await?;
    let verb = line.split_whitespace().next().unwrap_or(line);
    expect(stream, verb, code, limit).await
}

async fn expect<S>(stream: &mut S, verb: &str, code: u16, limit: Duration) -> Result<Reply, MailError>
where
    S: AsyncBufRead + Unpin,
{
    let reply = read_reply(stream, limit).await?;
    if reply.code != code {
        return Err(MailError::Rejected {
            command: verb.to_string(),
            code: reply.code,
            message: reply.message,
        });
    }
    Ok(reply)
}

async fn write_all<S>(stream: &mut S, data: &[u8], limit: Duration) -> Result<(), MailError>
where
    S: AsyncWrite + Unpin,
{
    timeout(limit, stream.write_all(data))
        .await
        .map_err(|_| MailError::Timeout("write"))??;
    timeout(limit, stream.flush())
        .await
        .map_err(|_| MailError::Timeout("flush"))??;
    Ok(())
}

/// Reads one possibly multi-line reply (`250-...` continues, `250 ...` ends).
async fn read_reply<S>(stream: &mut S, limit: Duration) -> Result<Reply, MailError>
where
    S: AsyncBufRead + Unpin,
{
    let mut lines = Vec::new();
    loop {
        let mut line = String::new();
        let read = timeout(limit, stream.read_line(&mut line))
            .await
            .map_err(|_| MailError::Timeout("read"))??;
        if read == 0 {
            return Err(MailError::ConnectionClosed);
        }
        let line = line.trim_end().to_string();
        let more = line.as_bytes().get(3) == Some(&b'-');
        lines.push(line);
        if !more {
            break;
        }
    }
    parse_reply(&lines)
}

fn parse_reply(lines: &[String]) -> Result<Reply, MailError> {
    let last = lines
        .last()
        .ok_or_else(|| MailError::Malformed("empty reply".to_string()))?;
    let code = last
        .get(..3)
        .and_then(|c| c.parse::<u16>().ok())
        .ok_or_else(|| MailError::Malformed(last.clone()))?;
    let message = lines
        .iter()
        .map(|l| l.get(4..).unwrap_or(""))
        .collect::<Vec<_>>()
        .join("\n");
    Ok(Reply { code, message })
}

/// Builds an RFC 5322 plain-text message, dot-stuffed for the DATA phase.
pub fn format_message(
    from: &str,
    to: &str,
    subject: &str,
    body: &str,
    date: DateTime<Local>,
    message_id: &str,
) -> String {
    let mut out = format!(
        "From: {from}\r\nTo: {to}\r\nSubject: {subject}\r\nDate: {date}\r\nMessage-ID: {message_id}\r\n\
         MIME-Version: 1.0\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Transfer-Encoding: 8bit\r\n\r\n",
        date = date.to_rfc2822(),
    );
    let lines: Vec<&str> = body.lines().collect();
    for (i, line) in lines.iter().enumerate() {
        if line.starts_with('.') {
            out.push('.');
        }
        out.push_str(line);
        if i + 1 < lines.len() {
            out.push_str("\r\n");
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tokio::io::{duplex, split, AsyncBufReadExt, AsyncWriteExt, BufReader};

    fn config() -> SmtpConfig {
        SmtpConfig {
            host: "smtp.test".to_string(),
            port: 465,
            username: "user".to_string(),
            password: "pass".to_string(),
            from: "bot@test".to_string(),
            timeout: Duration::from_secs(5),
        }
    }

    /// Scripted server: answers each command, returns every line it read.
    async fn fake_server(stream: tokio::io::DuplexStream, auth_code: u16) -> Vec<String> {
        let (r, mut w) = split(stream);
        let mut r = BufReader::new(r);
        let mut seen = Vec::new();
        w.write_all(b"220 smtp.test ready\r\n").await.unwrap();

        loop {
            let mut line = String::new();
            if r.read_line(&mut line).await.unwrap() == 0 {
                break;
            }
            seen.push(line.trim_end().to_string());
            let reply: &[u8] = match line.split_whitespace().next().unwrap_or("") {
                "EHLO" => b"250-smtp.test\r\n250 AUTH PLAIN LOGIN\r\n",
                "AUTH" if auth_code == 235 => b"235 2.7.0 Accepted\r\n",
                "AUTH" => b"535 5.7.8 Bad credentials\r\n",
                "MAIL" | "RCPT" => b"250 OK\r\n",
                "DATA" => {
                    w.write_all(b"354 Go ahead\r\n").await.unwrap();
                    loop {
                        let mut data = String::new();
                        r.read_line(&mut data).await.unwrap();
                        if data == ".\r\n" {
                            break;
                        }
                        seen.push(data.trim_end().to_string());
                    }
                    b"250 Queued\r\n"
                }
                "QUIT" => {
                    w.write_all(b"221 Bye\r\n").await.unwrap();
                    break;
                }
                _ => b"500 Unknown\r\n",
            };
            w.write_all(reply).await.unwrap();
        }
        seen
    }

    #[test]
    fn multi_line_reply_keeps_final_code() {
        let reply = parse_reply(&["250-smtp.test".to_string(), "250 AUTH PLAIN".to_string()]).unwrap();
        assert_eq!(reply.code, 250);
        assert_eq!(reply.message, "smtp.test\nAUTH PLAIN");
        assert!(parse_reply(&["hello".to_string()]).is_err());
    }

    #[test]
    fn body_lines_starting_with_a_dot_are_stuffed() {
        let date = Local.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        let message = format_message("a@x", "b@y", "Hi", "first\n.second", date, "<id@x>");
        assert!(message.starts_with("From: a@x\r\nTo: b@y\r\nSubject: Hi\r\n"));
        assert!(message.ends_with("\r\n\r\nfirst\r\n..second"));
    }

    #[tokio::test]
    async fn session_walks_the_full_submission_dialogue() {
        let (client, server) = duplex(4096);
        let server = tokio::spawn(fake_server(server, 235));

        let mut stream = BufReader::new(client);
        run_session(&mut stream, &config(), "ann@example.com", "Subject: x\r\n\r\n.dot")
            .await
            .unwrap();
        drop(stream);

        let seen = server.await.unwrap();
        let auth = format!("AUTH PLAIN {}", BASE64.encode("\0user\0pass"));
        assert_eq!(seen[0], "EHLO medminder");
        assert_eq!(seen[1], auth);
        assert_eq!(seen[2], "MAIL FROM:<bot@test>");
        assert_eq!(seen[3], "RCPT TO:<ann@example.com>");
        assert_eq!(seen[4], "DATA");
        assert!(seen.contains(&".dot".to_string()));
        assert_eq!(seen.last().map(String::as_str), Some("QUIT"));
    }

    #[tokio::test]
    async fn rejected_credentials_abort_the_session() {
        let (client, server) = duplex(4096);
        let server = tokio::spawn(fake_server(server, 535));

        let mut stream = BufReader::new(client);
        let err = run_session(&mut stream, &config(), "ann@example.com", "body")
            .await
            .unwrap_err();
        drop(stream);
        server.await.unwrap();

        match err {
            MailError::Rejected { command, code, .. } => {
                assert_eq!(command, "AUTH");
                assert_eq!(code, 535);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
