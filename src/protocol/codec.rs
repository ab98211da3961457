use crate::protocol::error::{ProtocolError, ProtocolResult};
use crate::protocol::types::{
    Packet, PacketType, ReachableAddr, DATA_HEADER_LEN, FRAME_PREFIX_LEN, HANDSHAKE_HEADER_LEN,
    MAX_FRAME_LEN,
};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Encode a packet into one wire frame
pub fn encode(packet: &Packet) -> ProtocolResult<Bytes> {
    let length = packet.encoded_len();
    if length > MAX_FRAME_LEN {
        return match packet {
            Packet::Data { payload, .. } => Err(ProtocolError::PayloadTooLarge(payload.len())),
            _ => Err(ProtocolError::InvalidLength {
                kind: packet.packet_type().name(),
                length,
            }),
        };
    }

    let mut buf = BytesMut::with_capacity(length);
    buf.put_u8(packet.packet_type() as u8);
    buf.put_u16(length as u16);
    buf.put_u32(packet.session_id());

    match packet {
        Packet::Hello { .. } | Packet::Goodbye { .. } => {}
        Packet::HelloAck { addrs, .. } => {
            for addr in addrs {
                if addr.addr.len() > u8::MAX as usize {
                    return Err(ProtocolError::AddressTooLong(addr.addr.len()));
                }
                buf.put_u8(addr.kind);
                buf.put_u8(addr.addr.len() as u8);
                buf.put_slice(&addr.addr);
            }
        }
        Packet::Data {
            path_id,
            sequence,
            payload,
            ..
        } => {
            buf.put_u8(*path_id);
            buf.put_u32(*sequence);
            buf.put_slice(payload);
        }
    }

    Ok(buf.freeze())
}

/// Decode exactly one frame; `frame` must hold the whole packet and nothing else
pub fn decode(frame: &[u8]) -> ProtocolResult<Packet> {
    if frame.len() < FRAME_PREFIX_LEN {
        return Err(ProtocolError::Truncated {
            needed: FRAME_PREFIX_LEN,
            available: frame.len(),
        });
    }

    let mut buf = frame;
    let kind = PacketType::try_from(buf.get_u8())?;
    let declared = buf.get_u16() as usize;

    if declared > frame.len() {
        return Err(ProtocolError::Truncated {
            needed: declared,
            available: frame.len(),
        });
    }
    if declared < frame.len() {
        return Err(ProtocolError::LengthMismatch {
            declared,
            actual: frame.len(),
        });
    }

    let min_len = match kind {
        PacketType::Data => DATA_HEADER_LEN,
        _ => HANDSHAKE_HEADER_LEN,
    };
    let exact = matches!(kind, PacketType::Hello | PacketType::Goodbye);
    if declared < min_len || (exact && declared != min_len) {
        return Err(ProtocolError::InvalidLength {
            kind: kind.name(),
            length: declared,
        });
    }

    let session_id = buf.get_u32();

    let packet = match kind {
        PacketType::Hello => Packet::Hello { session_id },
        PacketType::Goodbye => Packet::Goodbye { session_id },
        PacketType::HelloAck => {
            let mut addrs = Vec::new();
            while buf.has_remaining() {
                if buf.remaining() < 2 {
                    return Err(ProtocolError::Truncated {
                        needed: 2,
                        available: buf.remaining(),
                    });
                }
                let addr_kind = buf.get_u8();
                let addr_len = buf.get_u8() as usize;
                if buf.remaining() < addr_len {
                    return Err(ProtocolError::Truncated {
                        needed: addr_len,
                        available: buf.remaining(),
                    });
                }
                addrs.push(ReachableAddr::new(addr_kind, buf[..addr_len].to_vec()));
                buf.advance(addr_len);
            }
            Packet::HelloAck { session_id, addrs }
        }
        PacketType::Data => {
            let path_id = buf.get_u8();
            let sequence = buf.get_u32();
            Packet::Data {
                session_id,
                path_id,
                sequence,
                payload: Bytes::copy_from_slice(buf),
            }
        }
    };

    Ok(packet)
}

/// Read the next frame from a path stream.
///
/// Returns `Ok(None)` when the stream ends cleanly on a frame boundary.
pub async fn read_packet<R>(reader: &mut R) -> ProtocolResult<Option<Packet>>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; FRAME_PREFIX_LEN];
    if reader.read(&mut prefix[..1]).await? == 0 {
        return Ok(None);
    }
    reader.read_exact(&mut prefix[1..]).await?;

    // reject before reading a body that cannot be valid
    let kind = PacketType::try_from(prefix[0])?;
    let length = u16::from_be_bytes([prefix[1], prefix[2]]) as usize;
    if length < HANDSHAKE_HEADER_LEN {
        return Err(ProtocolError::InvalidLength {
            kind: kind.name(),
            length,
        });
    }

    let mut frame = vec![0u8; length];
    frame[..FRAME_PREFIX_LEN].copy_from_slice(&prefix);
    reader.read_exact(&mut frame[FRAME_PREFIX_LEN..]).await?;

    decode(&frame).map(Some)
}

/// Encode and write one frame, returning the number of bytes written
pub async fn write_packet<W>(writer: &mut W, packet: &Packet) -> ProtocolResult<usize>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode(packet)?;
    writer.write_all(&frame).await?;
    Ok(frame.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::{DEFAULT_CHUNK_SIZE, MAX_DATA_PAYLOAD};
    use std::net::SocketAddr;

    fn data_packet(len: usize) -> Packet {
        Packet::Data {
            session_id: 0xDEAD_BEEF,
            path_id: 1,
            sequence: 42,
            payload: Bytes::from((0..len).map(|i| (i % 251) as u8).collect::<Vec<_>>()),
        }
    }

    #[test]
    fn test_hello_wire_format() {
        let frame = encode(&Packet::Hello {
            session_id: 0x0102_0304,
        })
        .unwrap();
        assert_eq!(&frame[..], &[1, 0, 7, 1, 2, 3, 4]);
    }

    #[test]
    fn test_goodbye_wire_format() {
        let frame = encode(&Packet::Goodbye { session_id: 9 }).unwrap();
        assert_eq!(&frame[..], &[4, 0, 7, 0, 0, 0, 9]);
    }

    #[test]
    fn test_data_wire_format() {
        let frame = encode(&Packet::Data {
            session_id: 7,
            path_id: 2,
            sequence: 0x0A0B_0C0D,
            payload: Bytes::from_static(b"hi"),
        })
        .unwrap();
        assert_eq!(
            &frame[..],
            &[3, 0, 14, 0, 0, 0, 7, 2, 0x0A, 0x0B, 0x0C, 0x0D, b'h', b'i']
        );
    }

    #[test]
    fn test_hello_ack_wire_format() {
        let frame = encode(&Packet::HelloAck {
            session_id: 5,
            addrs: vec![ReachableAddr::new(0, b"a:1".to_vec())],
        })
        .unwrap();
        assert_eq!(&frame[..], &[2, 0, 12, 0, 0, 0, 5, 0, 3, b'a', b':', b'1']);
    }

    #[test]
    fn test_roundtrip_every_kind() {
        let addr: SocketAddr = "127.0.0.1:4242".parse().unwrap();
        let packets = vec![
            Packet::Hello { session_id: 0 },
            Packet::Hello {
                session_id: u32::MAX,
            },
            Packet::HelloAck {
                session_id: 77,
                addrs: vec![],
            },
            Packet::HelloAck {
                session_id: 77,
                addrs: vec![ReachableAddr::text(addr), ReachableAddr::binary(addr)],
            },
            data_packet(0),
            data_packet(DEFAULT_CHUNK_SIZE - 1),
            data_packet(DEFAULT_CHUNK_SIZE),
            Packet::Goodbye { session_id: 3 },
        ];

        for packet in packets {
            let frame = encode(&packet).unwrap();
            assert_eq!(frame.len(), packet.encoded_len());
            assert_eq!(decode(&frame).unwrap(), packet);
        }
    }

    #[test]
    fn test_decode_unknown_type() {
        let err = decode(&[9, 0, 7, 0, 0, 0, 1]).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownPacketType(9)));
    }

    #[test]
    fn test_decode_truncated() {
        assert!(matches!(
            decode(&[1, 0]),
            Err(ProtocolError::Truncated { needed: 3, .. })
        ));

        let frame = encode(&data_packet(10)).unwrap();
        let err = decode(&frame[..frame.len() - 1]).unwrap_err();
        assert!(matches!(err, ProtocolError::Truncated { needed: 22, available: 21 }));
    }

    #[test]
    fn test_decode_trailing_bytes() {
        let mut frame = encode(&Packet::Goodbye { session_id: 1 }).unwrap().to_vec();
        frame.push(0);
        assert!(matches!(
            decode(&frame),
            Err(ProtocolError::LengthMismatch {
                declared: 7,
                actual: 8
            })
        ));
    }

    #[test]
    fn test_decode_bad_fixed_lengths() {
        // Hello claiming 8 bytes
        assert!(matches!(
            decode(&[1, 0, 8, 0, 0, 0, 1, 0]),
            Err(ProtocolError::InvalidLength { .. })
        ));
        // Data shorter than its header
        assert!(matches!(
            decode(&[3, 0, 7, 0, 0, 0, 1]),
            Err(ProtocolError::InvalidLength { .. })
        ));
    }

    #[test]
    fn test_decode_truncated_address() {
        // descriptor claims 5 bytes, only 2 present
        let frame = [2, 0, 11, 0, 0, 0, 1, 0, 5, b'a', b'b'];
        assert!(matches!(
            decode(&frame),
            Err(ProtocolError::Truncated { needed: 5, .. })
        ));
    }

    #[test]
    fn test_encode_limits() {
        assert!(matches!(
            encode(&data_packet(MAX_DATA_PAYLOAD + 1)),
            Err(ProtocolError::PayloadTooLarge(_))
        ));
        assert!(encode(&data_packet(MAX_DATA_PAYLOAD)).is_ok());

        let long = Packet::HelloAck {
            session_id: 1,
            addrs: vec![ReachableAddr::new(0, vec![b'x'; 256])],
        };
        assert!(matches!(
            encode(&long),
            Err(ProtocolError::AddressTooLong(256))
        ));
    }

    #[tokio::test]
    async fn test_stream_framing() {
        let (mut client, mut server) = tokio::io::duplex(64 * 1024);
        let sent = vec![
            Packet::Hello { session_id: 0 },
            data_packet(1000),
            data_packet(0),
            Packet::Goodbye { session_id: 11 },
        ];

        for packet in &sent {
            write_packet(&mut client, packet).await.unwrap();
        }
        drop(client);

        for packet in &sent {
            let got = read_packet(&mut server).await.unwrap().unwrap();
            assert_eq!(&got, packet);
        }
        assert!(read_packet(&mut server).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stream_cut_mid_frame() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let frame = encode(&data_packet(100)).unwrap();
        tokio::io::AsyncWriteExt::write_all(&mut client, &frame[..50])
            .await
            .unwrap();
        drop(client);

        assert!(matches!(
            read_packet(&mut server).await,
            Err(ProtocolError::Io(_))
        ));
    }

    #[tokio::test]
    async fn test_stream_rejects_unknown_tag() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        tokio::io::AsyncWriteExt::write_all(&mut client, &[0xFF, 0, 7])
            .await
            .unwrap();
        assert!(matches!(
            read_packet(&mut server).await,
            Err(ProtocolError::UnknownPacketType(0xFF))
        ));
    }
}
