//! DAP Content-Length framing over async byte streams.
//! - read_message: parse one Content-Length payload
//! - write_message: emit one payload
//! - spawn_stream_channel: bridge a reader/writer pair onto a Channel

use std::io;

use serde_json::Value;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::sync::mpsc;
use tracing::warn;

use super::channel::Channel;

const CONTENT_LENGTH: &str = "Content-Length";

pub async fn read_message<R: AsyncBufRead + Unpin>(reader: &mut R) -> io::Result<Option<String>> {
    let mut content_length = None;
    let mut line = String::new();

    loop {
        line.clear();
        let bytes = reader.read_line(&mut line).await?;
        if bytes == 0 {
            return Ok(None);
        }
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            break;
        }
        if let Some((name, value)) = trimmed.split_once(':') {
            if name.trim().eq_ignore_ascii_case(CONTENT_LENGTH) {
                if let Ok(length) = value.trim().parse::<usize>() {
                    content_length = Some(length);
                }
            }
        }
    }

    let length = content_length.ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidData, "missing Content-Length header")
    })?;

    let mut buffer = vec![0u8; length];
    reader.read_exact(&mut buffer).await?;
    let payload = String::from_utf8(buffer)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "invalid utf-8 payload"))?;
    Ok(Some(payload))
}

pub async fn write_message<W: AsyncWrite + Unpin>(writer: &mut W, payload: &str) -> io::Result<()> {
    let header = format!("{CONTENT_LENGTH}: {}\r\n\r\n", payload.len());
    writer.write_all(header.as_bytes()).await?;
    writer.write_all(payload.as_bytes()).await?;
    writer.flush().await
}

/// Spawn reader/writer tasks that move framed JSON between a byte stream
/// and the returned channel. The channel's incoming side closes on EOF or
/// on the first framing error.
pub fn spawn_stream_channel<R, W>(reader: R, writer: W) -> Channel
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (incoming_tx, incoming_rx) = mpsc::unbounded_channel::<Value>();
    let (outgoing_tx, mut outgoing_rx) = mpsc::unbounded_channel::<Value>();

    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        loop {
            let payload = match read_message(&mut reader).await {
                Ok(Some(payload)) => payload,
                Ok(None) => break,
                Err(err) => {
                    warn!("engine stream read failed: {err}");
                    break;
                }
            };
            match serde_json::from_str::<Value>(&payload) {
                Ok(message) => {
                    if incoming_tx.send(message).is_err() {
                        break;
                    }
                }
                Err(err) => warn!("dropping non-JSON engine payload: {err}"),
            }
        }
    });

    tokio::spawn(async move {
        let mut writer = writer;
        while let Some(message) = outgoing_rx.recv().await {
            let payload = message.to_string();
            if let Err(err) = write_message(&mut writer, &payload).await {
                warn!("engine stream write failed: {err}");
                break;
            }
        }
    });

    Channel::new(outgoing_tx, incoming_rx)
}

#[cfg(test)]
mod tests {
    use super::{read_message, spawn_stream_channel, write_message};
    use serde_json::json;
    use tokio::io::BufReader;

    #[tokio::test(flavor = "current_thread")]
    async fn framing_roundtrip() {
        let payload = r#"{"seq":1,"type":"request","command":"initialize"}"#;
        let mut buffer = Vec::new();
        write_message(&mut buffer, payload).await.unwrap();

        let mut reader = BufReader::new(&buffer[..]);
        let read = read_message(&mut reader).await.unwrap().unwrap();
        assert_eq!(read, payload);
        assert!(read_message(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn missing_content_length_is_rejected() {
        let mut reader = BufReader::new(&b"X-Other: 3\r\n\r\n{}"[..]);
        assert!(read_message(&mut reader).await.is_err());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn stream_channel_moves_messages_both_ways() {
        let (client_io, engine_io) = tokio::io::duplex(4096);
        let (client_read, client_write) = tokio::io::split(client_io);
        let (engine_read, mut engine_write) = tokio::io::split(engine_io);
        let mut channel = spawn_stream_channel(client_read, client_write);

        assert!(channel.send(json!({"seq": 1, "type": "request", "command": "threads"})));
        let mut engine_reader = BufReader::new(engine_read);
        let sent = read_message(&mut engine_reader).await.unwrap().unwrap();
        assert!(sent.contains("\"threads\""));

        write_message(&mut engine_write, r#"{"seq":1,"type":"event","event":"initialized"}"#)
            .await
            .unwrap();
        let received = channel.recv().await.unwrap();
        assert_eq!(received["event"], "initialized");
    }
}
