//! HTTP/2 frame codec: encode/decode frames over a byte socket per
//! RFC 7540 §4.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::errors::{Error, ErrorCode};
use super::flags::{ContinuationFlags, DataFlags, HeadersFlags, PingFlags, PushPromiseFlags, SettingsFlags};
use super::settings::SettingId;

pub type StreamId = u32;

/// The 24-bit length is the hard wire limit; `MAX_FRAME_SIZE` is negotiated
/// up to this via SETTINGS.
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16_384;
pub const MAX_FRAME_SIZE_UPPER_BOUND: u32 = (1 << 24) - 1;
pub const FRAME_HEADER_LEN: usize = 9;

pub const CLIENT_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Data,
    Headers,
    Priority,
    RstStream,
    Settings,
    PushPromise,
    Ping,
    GoAway,
    WindowUpdate,
    Continuation,
    /// Unknown types MUST be skipped per RFC 7540 §4.1.
    Unknown(u8),
}

impl FrameType {
    fn from_u8(v: u8) -> FrameType {
        match v {
            0x0 => FrameType::Data,
            0x1 => FrameType::Headers,
            0x2 => FrameType::Priority,
            0x3 => FrameType::RstStream,
            0x4 => FrameType::Settings,
            0x5 => FrameType::PushPromise,
            0x6 => FrameType::Ping,
            0x7 => FrameType::GoAway,
            0x8 => FrameType::WindowUpdate,
            0x9 => FrameType::Continuation,
            other => FrameType::Unknown(other),
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            FrameType::Data => 0x0,
            FrameType::Headers => 0x1,
            FrameType::Priority => 0x2,
            FrameType::RstStream => 0x3,
            FrameType::Settings => 0x4,
            FrameType::PushPromise => 0x5,
            FrameType::Ping => 0x6,
            FrameType::GoAway => 0x7,
            FrameType::WindowUpdate => 0x8,
            FrameType::Continuation => 0x9,
            FrameType::Unknown(v) => v,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PriorityParams {
    pub dependency: StreamId,
    pub exclusive: bool,
    pub weight: u8,
}

#[derive(Debug)]
pub enum Frame {
    Data { stream_id: StreamId, end_stream: bool, data: Bytes },
    Headers {
        stream_id: StreamId,
        end_stream: bool,
        end_headers: bool,
        priority: Option<PriorityParams>,
        header_block: Bytes,
    },
    Priority { stream_id: StreamId, params: PriorityParams },
    RstStream { stream_id: StreamId, error_code: ErrorCode },
    Settings { ack: bool, params: Vec<(SettingId, u32)> },
    PushPromise {
        stream_id: StreamId,
        end_headers: bool,
        promised_stream_id: StreamId,
        header_block: Bytes,
    },
    Ping { ack: bool, payload: [u8; 8] },
    GoAway { last_stream_id: StreamId, error_code: ErrorCode, debug_data: Bytes },
    WindowUpdate { stream_id: StreamId, increment: u32 },
    Continuation { stream_id: StreamId, end_headers: bool, header_block: Bytes },
    /// Skipped on read (no payload retained); never written.
    Unknown,
}

impl Frame {
    pub fn stream_id(&self) -> StreamId {
        match self {
            Frame::Data { stream_id, .. }
            | Frame::Headers { stream_id, .. }
            | Frame::Priority { stream_id, .. }
            | Frame::RstStream { stream_id, .. }
            | Frame::PushPromise { stream_id, .. }
            | Frame::WindowUpdate { stream_id, .. }
            | Frame::Continuation { stream_id, .. } => *stream_id,
            Frame::Settings { .. } | Frame::Ping { .. } | Frame::GoAway { .. } | Frame::Unknown => 0,
        }
    }

    /// Reads one frame from `reader`. `max_frame_size` is the locally
    /// negotiated readable limit. Padding is stripped before the payload is
    /// surfaced.
    pub async fn read_from<R: AsyncRead + Unpin>(
        reader: &mut R,
        max_frame_size: u32,
    ) -> Result<Frame, Error> {
        let mut header = [0u8; FRAME_HEADER_LEN];
        reader.read_exact(&mut header).await?;
        let length = u32::from_be_bytes([0, header[0], header[1], header[2]]);
        let kind = FrameType::from_u8(header[3]);
        let flags = header[4];
        let stream_id = u32::from_be_bytes([header[5], header[6], header[7], header[8]]) & 0x7FFF_FFFF;

        if length > max_frame_size {
            return Err(Error::Protocol(format!(
                "frame length {length} exceeds max_frame_size {max_frame_size}"
            )));
        }

        let mut payload = BytesMut::zeroed(length as usize);
        reader.read_exact(&mut payload).await?;
        let mut payload = payload.freeze();

        match kind {
            FrameType::Unknown(_) => Ok(Frame::Unknown),
            FrameType::Data => {
                if stream_id == 0 {
                    return Err(Error::Protocol("DATA on stream 0".into()));
                }
                let data = strip_padding(&mut payload, flags & DataFlags::PADDED.bits() != 0)?;
                Ok(Frame::Data { stream_id, end_stream: flags & DataFlags::END_STREAM.bits() != 0, data })
            }
            FrameType::Headers => {
                if stream_id == 0 {
                    return Err(Error::Protocol("HEADERS on stream 0".into()));
                }
                let mut body = strip_padding(&mut payload, flags & HeadersFlags::PADDED.bits() != 0)?;
                let priority = if flags & HeadersFlags::PRIORITY.bits() != 0 {
                    if body.len() < 5 {
                        return Err(Error::Protocol("HEADERS priority field truncated".into()));
                    }
                    let dep_raw = u32::from_be_bytes([body[0], body[1], body[2], body[3]]);
                    let weight = body[4];
                    body.advance(5);
                    Some(PriorityParams {
                        dependency: dep_raw & 0x7FFF_FFFF,
                        exclusive: dep_raw & 0x8000_0000 != 0,
                        weight,
                    })
                } else {
                    None
                };
                Ok(Frame::Headers {
                    stream_id,
                    end_stream: flags & HeadersFlags::END_STREAM.bits() != 0,
                    end_headers: flags & HeadersFlags::END_HEADERS.bits() != 0,
                    priority,
                    header_block: body,
                })
            }
            FrameType::Priority => {
                if length != 5 {
                    return Err(Error::Protocol("PRIORITY frame must have length 5".into()));
                }
                if stream_id == 0 {
                    return Err(Error::Protocol("PRIORITY on stream 0".into()));
                }
                let dep_raw = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
                Ok(Frame::Priority {
                    stream_id,
                    params: PriorityParams {
                        dependency: dep_raw & 0x7FFF_FFFF,
                        exclusive: dep_raw & 0x8000_0000 != 0,
                        weight: payload[4],
                    },
                })
            }
            FrameType::RstStream => {
                if length != 4 {
                    return Err(Error::Protocol("RST_STREAM frame must have length 4".into()));
                }
                if stream_id == 0 {
                    return Err(Error::Protocol("RST_STREAM on stream 0".into()));
                }
                let code = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
                Ok(Frame::RstStream { stream_id, error_code: ErrorCode::from_u32(code) })
            }
            FrameType::Settings => {
                let ack = flags & SettingsFlags::ACK.bits() != 0;
                if ack && length != 0 {
                    return Err(Error::Protocol("SETTINGS ack must be empty".into()));
                }
                if length % 6 != 0 {
                    return Err(Error::Protocol("SETTINGS length must be a multiple of 6".into()));
                }
                let mut params = Vec::with_capacity(payload.len() / 6);
                for chunk in payload.chunks(6) {
                    let id = u16::from_be_bytes([chunk[0], chunk[1]]);
                    let value = u32::from_be_bytes([chunk[2], chunk[3], chunk[4], chunk[5]]);
                    if let Some(id) = SettingId::from_u16(id) {
                        validate_setting(id, value)?;
                        params.push((id, value));
                    }
                    // unknown settings identifiers MUST be ignored (RFC 7540 §6.5.2)
                }
                Ok(Frame::Settings { ack, params })
            }
            FrameType::PushPromise => {
                if stream_id == 0 {
                    return Err(Error::Protocol("PUSH_PROMISE on stream 0".into()));
                }
                let mut body = strip_padding(&mut payload, flags & PushPromiseFlags::PADDED.bits() != 0)?;
                if body.len() < 4 {
                    return Err(Error::Protocol("PUSH_PROMISE truncated".into()));
                }
                let promised = u32::from_be_bytes([body[0], body[1], body[2], body[3]]) & 0x7FFF_FFFF;
                body.advance(4);
                Ok(Frame::PushPromise {
                    stream_id,
                    end_headers: flags & PushPromiseFlags::END_HEADERS.bits() != 0,
                    promised_stream_id: promised,
                    header_block: body,
                })
            }
            FrameType::Ping => {
                if length != 8 {
                    return Err(Error::Protocol("PING frame must have length 8".into()));
                }
                if stream_id != 0 {
                    return Err(Error::Protocol("PING on non-zero stream".into()));
                }
                let mut buf = [0u8; 8];
                buf.copy_from_slice(&payload[..8]);
                Ok(Frame::Ping { ack: flags & PingFlags::ACK.bits() != 0, payload: buf })
            }
            FrameType::GoAway => {
                if length < 8 {
                    return Err(Error::Protocol("GOAWAY frame truncated".into()));
                }
                let last = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]) & 0x7FFF_FFFF;
                let code = u32::from_be_bytes([payload[4], payload[5], payload[6], payload[7]]);
                Ok(Frame::GoAway {
                    last_stream_id: last,
                    error_code: ErrorCode::from_u32(code),
                    debug_data: payload.slice(8..),
                })
            }
            FrameType::WindowUpdate => {
                if length != 4 {
                    return Err(Error::Protocol("WINDOW_UPDATE frame must have length 4".into()));
                }
                let increment = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]) & 0x7FFF_FFFF;
                if increment == 0 {
                    return Err(Error::Protocol("WINDOW_UPDATE increment of 0".into()));
                }
                Ok(Frame::WindowUpdate { stream_id, increment })
            }
            FrameType::Continuation => {
                if stream_id == 0 {
                    return Err(Error::Protocol("CONTINUATION on stream 0".into()));
                }
                Ok(Frame::Continuation {
                    stream_id,
                    end_headers: flags & ContinuationFlags::END_HEADERS.bits() != 0,
                    header_block: payload,
                })
            }
        }
    }

    /// Writes one frame. A HEADERS/PUSH_PROMISE block larger than
    /// `max_frame_size` is spilled across CONTINUATION frames, all under
    /// the caller's writer lock so no other frame interleaves.
    pub async fn write_into<W: AsyncWrite + Unpin>(
        &self,
        writer: &mut W,
        max_frame_size: u32,
    ) -> Result<(), Error> {
        match self {
            Frame::Data { stream_id, end_stream, data } => {
                let flags = if *end_stream { DataFlags::END_STREAM.bits() } else { 0 };
                write_raw(writer, FrameType::Data, flags, *stream_id, data).await
            }
            Frame::Headers { stream_id, end_stream, end_headers: _, priority, header_block } => {
                write_headers_like(
                    writer,
                    FrameType::Headers,
                    *stream_id,
                    *end_stream,
                    priority,
                    header_block,
                    max_frame_size,
                )
                .await
            }
            Frame::Priority { stream_id, params } => {
                let mut payload = BytesMut::with_capacity(5);
                let dep = params.dependency | if params.exclusive { 0x8000_0000 } else { 0 };
                payload.put_u32(dep);
                payload.put_u8(params.weight);
                write_raw(writer, FrameType::Priority, 0, *stream_id, &payload.freeze()).await
            }
            Frame::RstStream { stream_id, error_code } => {
                let mut payload = BytesMut::with_capacity(4);
                payload.put_u32(error_code.to_u32());
                write_raw(writer, FrameType::RstStream, 0, *stream_id, &payload.freeze()).await
            }
            Frame::Settings { ack, params } => {
                let mut payload = BytesMut::with_capacity(params.len() * 6);
                for (id, value) in params {
                    payload.put_u16(id.to_u16());
                    payload.put_u32(*value);
                }
                let flags = if *ack { SettingsFlags::ACK.bits() } else { 0 };
                write_raw(writer, FrameType::Settings, flags, 0, &payload.freeze()).await
            }
            Frame::PushPromise { stream_id, end_headers, promised_stream_id, header_block } => {
                let mut payload = BytesMut::with_capacity(4 + header_block.len());
                payload.put_u32(*promised_stream_id);
                payload.extend_from_slice(header_block);
                let flags = if *end_headers { PushPromiseFlags::END_HEADERS.bits() } else { 0 };
                write_raw(writer, FrameType::PushPromise, flags, *stream_id, &payload.freeze()).await
            }
            Frame::Ping { ack, payload } => {
                let flags = if *ack { PingFlags::ACK.bits() } else { 0 };
                write_raw(writer, FrameType::Ping, flags, 0, payload).await
            }
            Frame::GoAway { last_stream_id, error_code, debug_data } => {
                let mut payload = BytesMut::with_capacity(8 + debug_data.len());
                payload.put_u32(*last_stream_id);
                payload.put_u32(error_code.to_u32());
                payload.extend_from_slice(debug_data);
                write_raw(writer, FrameType::GoAway, 0, 0, &payload.freeze()).await
            }
            Frame::WindowUpdate { stream_id, increment } => {
                let mut payload = BytesMut::with_capacity(4);
                payload.put_u32(*increment);
                write_raw(writer, FrameType::WindowUpdate, 0, *stream_id, &payload.freeze()).await
            }
            Frame::Continuation { stream_id, end_headers, header_block } => {
                let flags = if *end_headers { ContinuationFlags::END_HEADERS.bits() } else { 0 };
                write_raw(writer, FrameType::Continuation, flags, *stream_id, header_block).await
            }
            Frame::Unknown => Ok(()),
        }
    }
}

async fn write_headers_like<W: AsyncWrite + Unpin>(
    writer: &mut W,
    kind: FrameType,
    stream_id: StreamId,
    end_stream: bool,
    priority: &Option<PriorityParams>,
    header_block: &Bytes,
    max_frame_size: u32,
) -> Result<(), Error> {
    let max = max_frame_size as usize;
    let mut prefix = BytesMut::new();
    let mut flags = if end_stream { HeadersFlags::END_STREAM.bits() } else { 0 };
    if let Some(p) = priority {
        flags |= HeadersFlags::PRIORITY.bits();
        let dep = p.dependency | if p.exclusive { 0x8000_0000 } else { 0 };
        prefix.put_u32(dep);
        prefix.put_u8(p.weight);
    }
    let budget = max.saturating_sub(prefix.len()).max(1);
    let (first_chunk, rest) = if header_block.len() <= budget {
        (header_block.clone(), None)
    } else {
        (header_block.slice(..budget), Some(header_block.slice(budget..)))
    };
    if rest.is_none() {
        flags |= HeadersFlags::END_HEADERS.bits();
    }
    let mut payload = BytesMut::with_capacity(prefix.len() + first_chunk.len());
    payload.extend_from_slice(&prefix);
    payload.extend_from_slice(&first_chunk);
    write_raw(writer, kind, flags, stream_id, &payload.freeze()).await?;

    if let Some(mut remaining) = rest {
        loop {
            let chunk_len = remaining.len().min(max);
            let chunk = remaining.slice(..chunk_len);
            remaining.advance(chunk_len);
            let end_headers = remaining.is_empty();
            let cont_flags = if end_headers { ContinuationFlags::END_HEADERS.bits() } else { 0 };
            write_raw(writer, FrameType::Continuation, cont_flags, stream_id, &chunk).await?;
            if end_headers {
                break;
            }
        }
    }
    Ok(())
}

async fn write_raw<W: AsyncWrite + Unpin>(
    writer: &mut W,
    kind: FrameType,
    flags: u8,
    stream_id: StreamId,
    payload: &[u8],
) -> Result<(), Error> {
    if payload.len() as u64 > MAX_FRAME_SIZE_UPPER_BOUND as u64 {
        return Err(Error::Protocol("frame payload exceeds 2^24-1".into()));
    }
    let mut header = BytesMut::with_capacity(FRAME_HEADER_LEN);
    let len = payload.len() as u32;
    header.put_u8((len >> 16) as u8);
    header.put_u8((len >> 8) as u8);
    header.put_u8(len as u8);
    header.put_u8(kind.to_u8());
    header.put_u8(flags);
    header.put_u32(stream_id & 0x7FFF_FFFF);
    writer.write_all(&header).await?;
    writer.write_all(payload).await?;
    Ok(())
}

fn strip_padding(payload: &mut Bytes, padded: bool) -> Result<Bytes, Error> {
    if !padded {
        return Ok(payload.clone());
    }
    if payload.is_empty() {
        return Err(Error::Protocol("PADDED flag set but no pad length byte".into()));
    }
    let pad_len = payload[0] as usize;
    let mut body = payload.slice(1..);
    if pad_len > body.len() {
        return Err(Error::Protocol("pad length exceeds frame payload".into()));
    }
    let content_len = body.len() - pad_len;
    Ok(body.split_to(content_len))
}

fn validate_setting(id: SettingId, value: u32) -> Result<(), Error> {
    match id {
        SettingId::EnablePush if value > 1 => {
            Err(Error::Protocol("SETTINGS_ENABLE_PUSH must be 0 or 1".into()))
        }
        SettingId::InitialWindowSize if value > 0x7FFF_FFFF => {
            Err(Error::Protocol("SETTINGS_INITIAL_WINDOW_SIZE exceeds 2^31-1".into()))
        }
        SettingId::MaxFrameSize if !(DEFAULT_MAX_FRAME_SIZE..=MAX_FRAME_SIZE_UPPER_BOUND).contains(&value) => {
            Err(Error::Protocol("SETTINGS_MAX_FRAME_SIZE out of range".into()))
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    async fn roundtrip(frame: Frame) -> Frame {
        let mut buf = Vec::new();
        frame.write_into(&mut buf, DEFAULT_MAX_FRAME_SIZE).await.unwrap();
        let mut cursor = Cursor::new(buf);
        Frame::read_from(&mut cursor, DEFAULT_MAX_FRAME_SIZE).await.unwrap()
    }

    #[tokio::test]
    async fn ping_roundtrip() {
        let frame = Frame::Ping { ack: false, payload: *b"abcdefgh" };
        match roundtrip(frame).await {
            Frame::Ping { ack, payload } => {
                assert!(!ack);
                assert_eq!(&payload, b"abcdefgh");
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[tokio::test]
    async fn window_update_roundtrip() {
        let frame = Frame::WindowUpdate { stream_id: 1, increment: 5 };
        match roundtrip(frame).await {
            Frame::WindowUpdate { stream_id, increment } => {
                assert_eq!(stream_id, 1);
                assert_eq!(increment, 5);
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[tokio::test]
    async fn settings_ack_roundtrip() {
        let frame = Frame::Settings { ack: true, params: vec![] };
        match roundtrip(frame).await {
            Frame::Settings { ack, params } => {
                assert!(ack);
                assert!(params.is_empty());
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[tokio::test]
    async fn oversized_length_is_protocol_error() {
        let mut header = [0u8; FRAME_HEADER_LEN];
        header[0] = 0xFF;
        header[1] = 0xFF;
        header[2] = 0xFF;
        let mut cursor = Cursor::new(header.to_vec());
        let err = Frame::read_from(&mut cursor, DEFAULT_MAX_FRAME_SIZE).await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[tokio::test]
    async fn unknown_frame_type_is_skipped() {
        let mut bytes = BytesMut::new();
        bytes.put_u8(0);
        bytes.put_u8(0);
        bytes.put_u8(3);
        bytes.put_u8(0xEE); // unknown type
        bytes.put_u8(0);
        bytes.put_u32(0);
        bytes.extend_from_slice(b"xyz");
        let mut cursor = Cursor::new(bytes.to_vec());
        let frame = Frame::read_from(&mut cursor, DEFAULT_MAX_FRAME_SIZE).await.unwrap();
        assert!(matches!(frame, Frame::Unknown));
    }

    #[tokio::test]
    async fn headers_larger_than_max_frame_size_spills_into_continuation() {
        let header_block = Bytes::from(vec![0x42u8; 40]);
        let frame = Frame::Headers {
            stream_id: 1,
            end_stream: false,
            end_headers: true,
            priority: None,
            header_block: header_block.clone(),
        };
        let mut buf = Vec::new();
        frame.write_into(&mut buf, 16).await.unwrap();
        let mut cursor = Cursor::new(buf);
        let first = Frame::read_from(&mut cursor, 16).await.unwrap();
        let mut reassembled = BytesMut::new();
        match first {
            Frame::Headers { end_headers, header_block, .. } => {
                assert!(!end_headers);
                reassembled.extend_from_slice(&header_block);
            }
            other => panic!("unexpected {other:?}"),
        }
        loop {
            match Frame::read_from(&mut cursor, 16).await.unwrap() {
                Frame::Continuation { end_headers, header_block, .. } => {
                    reassembled.extend_from_slice(&header_block);
                    if end_headers {
                        break;
                    }
                }
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(reassembled.freeze(), header_block);
    }
}
