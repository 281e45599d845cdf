// DAP framing
//
// Each message is a JSON body preceded by HTTP-style headers:
//
//     Content-Length: <bytes>\r\n
//     \r\n
//     <JSON body>

use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Read one message body. Returns `Ok(None)` on a clean end of stream.
pub async fn read_message<R: AsyncBufRead + Unpin>(reader: &mut R) -> io::Result<Option<String>> {
    let mut content_length: Option<usize> = None;
    let mut saw_header = false;

    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            if saw_header {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "stream ended inside message headers",
                ));
            }
            return Ok(None);
        }

        if line == "\r\n" || line == "\n" {
            if saw_header {
                break;
            }
            continue;
        }
        saw_header = true;

        if let Some(value) = line.trim().strip_prefix("Content-Length:") {
            let len = value.trim().parse().map_err(|_| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("invalid Content-Length: {}", value.trim()),
                )
            })?;
            content_length = Some(len);
        }
    }

    let len = content_length
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "missing Content-Length header"))?;
    if len > MAX_MESSAGE_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("message too large: {} bytes", len),
        ));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;

    String::from_utf8(body)
        .map(Some)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

pub async fn write_message<W: AsyncWrite + Unpin>(writer: &mut W, json: &str) -> io::Result<()> {
    let header = format!("Content-Length: {}\r\n\r\n", json.len());

    writer.write_all(header.as_bytes()).await?;
    writer.write_all(json.as_bytes()).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn test_read_two_messages_then_eof() {
        let data = b"Content-Length: 13\r\n\r\n{\"test\":true}Content-Length: 2\r\nContent-Type: application/json\r\n\r\n{}";
        let mut reader = BufReader::new(Cursor::new(data.to_vec()));

        assert_eq!(read_message(&mut reader).await.unwrap().unwrap(), "{\"test\":true}");
        assert_eq!(read_message(&mut reader).await.unwrap().unwrap(), "{}");
        assert!(read_message(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_length_is_invalid() {
        let data = b"Content-Type: application/json\r\n\r\n{}";
        let mut reader = BufReader::new(Cursor::new(data.to_vec()));

        let err = read_message(&mut reader).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn test_truncated_body() {
        let data = b"Content-Length: 10\r\n\r\n{}";
        let mut reader = BufReader::new(Cursor::new(data.to_vec()));

        let err = read_message(&mut reader).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn test_write_message() {
        let mut output = Vec::new();
        write_message(&mut output, "{\"a\":\"é\"}").await.unwrap();

        // Length counts bytes, not chars
        assert_eq!(
            String::from_utf8(output).unwrap(),
            "Content-Length: 10\r\n\r\n{\"a\":\"é\"}"
        );
    }
}
