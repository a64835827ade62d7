//! Transfer wire protocol message serialization and deserialization.
//!
//! ```text
//! frame             := len:u32 kind:u8 body        (len counts kind + body)
//! upload request    := 1  name_len:u16 name  content_len:u32 content
//! download request  := 2  name_len:u16 name
//! upload response   := 3  ok:u8  msg_len:u16 msg
//! download response := 4  ok:u8  msg_len:u16 msg  content_len:u32 content
//! ```
//!
//! All integers are big-endian; names and messages are UTF-8.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::{DownloadResponse, TransferError, UploadResponse};

const KIND_UPLOAD_REQUEST: u8 = 1;
const KIND_DOWNLOAD_REQUEST: u8 = 2;
const KIND_UPLOAD_RESPONSE: u8 = 3;
const KIND_DOWNLOAD_RESPONSE: u8 = 4;

/// A single message on the transfer surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferMessage {
    UploadRequest { filename: String, content: Bytes },
    DownloadRequest { filename: String },
    UploadResponse(UploadResponse),
    DownloadResponse(DownloadResponse),
}

impl TransferMessage {
    pub(crate) fn kind_name(&self) -> &'static str {
        match self {
            TransferMessage::UploadRequest { .. } => "upload request",
            TransferMessage::DownloadRequest { .. } => "download request",
            TransferMessage::UploadResponse(_) => "upload response",
            TransferMessage::DownloadResponse(_) => "download response",
        }
    }
}

/// Frame serialization utilities for the transfer protocol.
pub struct FrameCodec;

impl FrameCodec {
    /// Serializes a message into a complete frame including the length prefix.
    ///
    /// Messages longer than the 16-bit length field are cut at a character boundary.
    ///
    /// # Errors
    ///
    /// - `TransferError::ProtocolError` - Filename longer than 65535 bytes
    /// - `TransferError::FrameTooLarge` - Content does not fit a 32-bit frame
    pub fn encode(message: &TransferMessage) -> Result<Bytes, TransferError> {
        let mut body = BytesMut::new();

        match message {
            TransferMessage::UploadRequest { filename, content } => {
                body.put_u8(KIND_UPLOAD_REQUEST);
                put_name(&mut body, filename)?;
                put_blob(&mut body, content)?;
            }
            TransferMessage::DownloadRequest { filename } => {
                body.put_u8(KIND_DOWNLOAD_REQUEST);
                put_name(&mut body, filename)?;
            }
            TransferMessage::UploadResponse(response) => {
                body.put_u8(KIND_UPLOAD_RESPONSE);
                body.put_u8(u8::from(response.ok));
                put_message(&mut body, &response.message);
            }
            TransferMessage::DownloadResponse(response) => {
                body.put_u8(KIND_DOWNLOAD_RESPONSE);
                body.put_u8(u8::from(response.ok));
                put_message(&mut body, &response.message);
                put_blob(&mut body, &response.content)?;
            }
        }

        let length = u32::try_from(body.len()).map_err(|_| TransferError::FrameTooLarge {
            size: body.len(),
            max: u32::MAX as usize,
        })?;
        let mut frame = BytesMut::with_capacity(4 + body.len());
        frame.put_u32(length);
        frame.extend_from_slice(&body);
        Ok(frame.freeze())
    }

    /// Deserializes the payload of a frame (kind byte and body).
    ///
    /// # Errors
    ///
    /// - `TransferError::ProtocolError` - Truncated payload, unknown kind, trailing bytes
    ///   or invalid UTF-8
    fn decode_payload(mut payload: Bytes) -> Result<TransferMessage, TransferError> {
        let kind = take_u8(&mut payload)?;

        let message = match kind {
            KIND_UPLOAD_REQUEST => TransferMessage::UploadRequest {
                filename: take_string_u16(&mut payload)?,
                content: take_blob(&mut payload)?,
            },
            KIND_DOWNLOAD_REQUEST => TransferMessage::DownloadRequest {
                filename: take_string_u16(&mut payload)?,
            },
            KIND_UPLOAD_RESPONSE => TransferMessage::UploadResponse(UploadResponse {
                ok: take_u8(&mut payload)? != 0,
                message: take_string_u16(&mut payload)?,
            }),
            KIND_DOWNLOAD_RESPONSE => {
                let ok = take_u8(&mut payload)? != 0;
                let message = take_string_u16(&mut payload)?;
                let content = take_blob(&mut payload)?;
                TransferMessage::DownloadResponse(DownloadResponse {
                    ok,
                    content,
                    message,
                })
            }
            other => return Err(protocol(format!("Unknown message kind {other}"))),
        };

        if payload.has_remaining() {
            return Err(protocol(format!(
                "{} bytes trailing a {}",
                payload.remaining(),
                message.kind_name()
            )));
        }
        Ok(message)
    }

    /// Reads one message from `reader`.
    ///
    /// Returns `None` when the peer closed the connection between frames.
    ///
    /// # Errors
    ///
    /// - `TransferError::FrameTooLarge` - Announced frame exceeds `max_frame_size`
    /// - `TransferError::Io` - Connection failed mid-frame
    /// - `TransferError::ProtocolError` - Frame could not be decoded
    pub async fn read_message<R: AsyncRead + Unpin>(
        reader: &mut R,
        max_frame_size: usize,
    ) -> Result<Option<TransferMessage>, TransferError> {
        let mut prefix = [0u8; 4];
        match reader.read_exact(&mut prefix).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let length = u32::from_be_bytes(prefix) as usize;
        if length > max_frame_size {
            return Err(TransferError::FrameTooLarge {
                size: length,
                max: max_frame_size,
            });
        }

        let mut payload = vec![0u8; length];
        reader.read_exact(&mut payload).await?;
        Self::decode_payload(Bytes::from(payload)).map(Some)
    }

    /// Writes one message to `writer` and flushes it.
    ///
    /// # Errors
    ///
    /// - `TransferError::Io` - Connection failed
    /// - Any error from [`FrameCodec::encode`]
    pub async fn write_message<W: AsyncWrite + Unpin>(
        writer: &mut W,
        message: &TransferMessage,
    ) -> Result<(), TransferError> {
        let frame = Self::encode(message)?;
        writer.write_all(&frame).await?;
        writer.flush().await?;
        Ok(())
    }
}

fn protocol(message: impl Into<String>) -> TransferError {
    TransferError::ProtocolError {
        message: message.into(),
    }
}

fn put_name(buf: &mut BytesMut, name: &str) -> Result<(), TransferError> {
    let length = u16::try_from(name.len())
        .map_err(|_| protocol(format!("Filename of {} bytes is too long", name.len())))?;
    buf.put_u16(length);
    buf.extend_from_slice(name.as_bytes());
    Ok(())
}

fn put_message(buf: &mut BytesMut, message: &str) {
    let mut end = message.len().min(u16::MAX as usize);
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    buf.put_u16(end as u16);
    buf.extend_from_slice(&message.as_bytes()[..end]);
}

fn put_blob(buf: &mut BytesMut, content: &[u8]) -> Result<(), TransferError> {
    let length = u32::try_from(content.len()).map_err(|_| TransferError::FrameTooLarge {
        size: content.len(),
        max: u32::MAX as usize,
    })?;
    buf.put_u32(length);
    buf.extend_from_slice(content);
    Ok(())
}

fn ensure_remaining(buf: &Bytes, needed: usize) -> Result<(), TransferError> {
    if buf.remaining() < needed {
        return Err(protocol(format!(
            "Truncated frame: needed {needed} bytes, {} left",
            buf.remaining()
        )));
    }
    Ok(())
}

fn take_u8(buf: &mut Bytes) -> Result<u8, TransferError> {
    ensure_remaining(buf, 1)?;
    Ok(buf.get_u8())
}

fn take_string_u16(buf: &mut Bytes) -> Result<String, TransferError> {
    ensure_remaining(buf, 2)?;
    let length = buf.get_u16() as usize;
    ensure_remaining(buf, length)?;
    let raw = buf.split_to(length);
    String::from_utf8(raw.to_vec()).map_err(|_| protocol("String field is not valid UTF-8"))
}

fn take_blob(buf: &mut Bytes) -> Result<Bytes, TransferError> {
    ensure_remaining(buf, 4)?;
    let length = buf.get_u32() as usize;
    ensure_remaining(buf, length)?;
    Ok(buf.split_to(length))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_request_layout() {
        let frame = FrameCodec::encode(&TransferMessage::UploadRequest {
            filename: "x.txt".to_string(),
            content: Bytes::from_static(b"hi"),
        })
        .unwrap();

        let expected: &[u8] = &[
            0, 0, 0, 14, // length
            1,  // kind
            0, 5, b'x', b'.', b't', b'x', b't', // name
            0, 0, 0, 2, b'h', b'i', // content
        ];
        assert_eq!(&frame[..], expected);
    }

    #[tokio::test]
    async fn test_download_response_survives_decode() {
        let message = TransferMessage::DownloadResponse(DownloadResponse::found(vec![0u8, 1, 2]));
        let frame = FrameCodec::encode(&message).unwrap();
        let mut reader = &frame[..];

        let decoded = FrameCodec::read_message(&mut reader, 1024).await.unwrap();

        assert_eq!(decoded, Some(message));
    }

    #[tokio::test]
    async fn test_read_message_rejects_frame_cut_mid_payload() {
        let frame = FrameCodec::encode(&TransferMessage::DownloadRequest {
            filename: "x.txt".to_string(),
        })
        .unwrap();
        let mut reader = &frame[..frame.len() - 1];

        let result = FrameCodec::read_message(&mut reader, 1024).await;

        assert!(matches!(result, Err(TransferError::Io(_))));
    }

    #[test]
    fn test_decode_rejects_lying_inner_length() {
        // Name length claims 200 bytes but only 3 follow.
        let payload = Bytes::from_static(&[2, 0, 200, b'a', b'b', b'c']);

        let result = FrameCodec::decode_payload(payload);

        assert!(matches!(result, Err(TransferError::ProtocolError { .. })));
    }

    #[test]
    fn test_decode_rejects_unknown_kind_and_trailing_bytes() {
        assert!(FrameCodec::decode_payload(Bytes::from_static(&[9])).is_err());
        assert!(FrameCodec::decode_payload(Bytes::from_static(&[3, 1, 0, 0, 0xFF])).is_err());
    }

    #[tokio::test]
    async fn test_long_messages_are_cut_on_char_boundary() {
        let message = "é".repeat(40_000); // 80_000 bytes
        let frame = FrameCodec::encode(&TransferMessage::UploadResponse(UploadResponse::failed(
            message,
        )))
        .unwrap();
        let mut reader = &frame[..];

        match FrameCodec::read_message(&mut reader, frame.len()).await.unwrap() {
            Some(TransferMessage::UploadResponse(response)) => {
                assert!(response.message.len() <= u16::MAX as usize);
                assert!(response.message.chars().all(|c| c == 'é'));
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_read_message_enforces_frame_limit() {
        let frame = FrameCodec::encode(&TransferMessage::UploadRequest {
            filename: "big.bin".to_string(),
            content: Bytes::from(vec![0u8; 1024]),
        })
        .unwrap();
        let mut reader = &frame[..];

        let result = FrameCodec::read_message(&mut reader, 512).await;

        assert!(matches!(result, Err(TransferError::FrameTooLarge { .. })));
    }

    #[tokio::test]
    async fn test_read_message_returns_none_on_clean_eof() {
        let mut reader: &[u8] = &[];

        assert!(
            FrameCodec::read_message(&mut reader, 1024)
                .await
                .unwrap()
                .is_none()
        );
    }
}
