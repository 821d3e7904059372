use cql_protocol::compression::Compression;
use cql_protocol::error;
use cql_protocol::frame::{Frame, FrameHeader, StreamId, Version};
use tokio::io::{AsyncRead, AsyncReadExt};

// large enough for any supported header
const MAX_HEADER_LEN: usize = 9;

/// A frame read off the wire.
#[derive(Debug)]
pub enum ParsedFrame {
    Frame(Frame),
    /// Header was valid, but the body could not be decoded (e.g. decompression failed). Only the
    /// request waiting on `stream_id` is affected.
    BadBody {
        stream_id: StreamId,
        error: error::Error,
    },
}

/// Reads a single frame. An error means the stream is no longer in sync and the connection
/// cannot be used any more.
pub async fn parse_frame<T: AsyncRead + Unpin>(
    reader: &mut T,
    compression: Compression,
) -> error::Result<ParsedFrame> {
    let mut header_bytes = [0; MAX_HEADER_LEN];

    // NOTE: the first byte determines header length
    reader.read_exact(&mut header_bytes[..1]).await?;

    let header_len = Version::try_from(header_bytes[0])?.header_len();
    reader.read_exact(&mut header_bytes[1..header_len]).await?;

    let header = FrameHeader::decode(&header_bytes[..header_len])?;

    let mut body = vec![0; header.body_len];
    reader.read_exact(&mut body).await?;

    Ok(match Frame::from_parts(header, body, compression) {
        Ok(frame) => ParsedFrame::Frame(frame),
        Err(error) => ParsedFrame::BadBody {
            stream_id: header.stream_id,
            error,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cql_protocol::frame::Opcode;

    async fn parse(bytes: &[u8], compression: Compression) -> error::Result<ParsedFrame> {
        let mut reader = bytes;
        parse_frame(&mut reader, compression).await
    }

    #[tokio::test]
    async fn should_parse_v4_frame() {
        let frame = Frame::new_response(Version::V4, Opcode::Ready, 300, vec![]);
        let bytes = frame.encode_with(Compression::None).unwrap();

        match parse(&bytes, Compression::None).await.unwrap() {
            ParsedFrame::Frame(parsed) => {
                assert_eq!(parsed.stream_id, 300);
                assert_eq!(parsed.opcode, Opcode::Ready);
                assert_eq!(parsed.version, Version::V4);
            }
            ParsedFrame::BadBody { .. } => panic!("unexpected bad body"),
        }
    }

    #[tokio::test]
    async fn should_parse_v2_frame_with_short_header() {
        let frame = Frame::new_response(Version::V2, Opcode::Result, 100, vec![0, 0, 0, 1]);
        let bytes = frame.encode_with(Compression::None).unwrap();
        assert_eq!(bytes.len(), 8 + 4);

        match parse(&bytes, Compression::None).await.unwrap() {
            ParsedFrame::Frame(parsed) => {
                assert_eq!(parsed.stream_id, 100);
                assert_eq!(parsed.body, vec![0, 0, 0, 1]);
            }
            ParsedFrame::BadBody { .. } => panic!("unexpected bad body"),
        }
    }

    #[tokio::test]
    async fn should_decompress_body() {
        let frame = Frame::new_response(Version::V4, Opcode::Result, 7, vec![0, 0, 0, 1]);
        let bytes = frame.encode_with(Compression::Lz4).unwrap();

        match parse(&bytes, Compression::Lz4).await.unwrap() {
            ParsedFrame::Frame(parsed) => assert_eq!(parsed.body, vec![0, 0, 0, 1]),
            ParsedFrame::BadBody { .. } => panic!("unexpected bad body"),
        }
    }

    #[tokio::test]
    async fn should_isolate_bad_body() {
        let frame = Frame::new_response(Version::V4, Opcode::Result, 7, vec![0, 0, 0, 1]);
        let mut bytes = frame.encode_with(Compression::Snappy).unwrap();

        // corrupt compressed body
        for byte in bytes.iter_mut().skip(9) {
            *byte = 0xff;
        }

        match parse(&bytes, Compression::Snappy).await.unwrap() {
            ParsedFrame::BadBody { stream_id, .. } => assert_eq!(stream_id, 7),
            ParsedFrame::Frame(_) => panic!("expected bad body"),
        }
    }

    #[tokio::test]
    async fn should_fail_on_truncated_frame() {
        let frame = Frame::new_response(Version::V4, Opcode::Result, 7, vec![0, 0, 0, 1]);
        let bytes = frame.encode_with(Compression::None).unwrap();

        assert!(parse(&bytes[..bytes.len() - 1], Compression::None)
            .await
            .is_err());
        assert!(parse(&[0x05], Compression::None).await.is_err());
    }
}
