//! Frame codec
//!
//! Fixed little-endian layout shared by data and ack packets:
//!
//! ```text
//! bytes  0..2   system/group identifier (u16)
//! bytes  2..6   destination port (u32)
//! bytes  6..10  packet type: 0 = DATA, 1 = ACK (u32)
//! bytes 10..14  sender port (u32)
//! bytes 14..18  this message id (u32)
//! bytes 18..22  reply-to id, 0 when not a reply (u32)
//! bytes 22..26  body length (u32)
//! bytes 26..    body (absent for ACK)
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::{MsgId, Port, MAX_MSG_SIZE};
use crate::error::NetError;

/// Header bytes preceding the body
pub const HEADER_LEN: usize = 26;

const NET_TYPE_DATA: u32 = 0;
const NET_TYPE_ACK: u32 = 1;

/// One message, used both in mailbox queues and as the data portion of a
/// packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Msg {
    pub to: Port,
    pub from: Port,
    pub this_id: MsgId,
    pub reply_to: MsgId,
    pub body: Bytes,
}

/// Header-only acknowledgement of one data message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckHeader {
    pub to: Port,
    pub from: Port,
    pub reply_to: MsgId,
}

/// Decoded packet body
#[derive(Debug, Clone)]
pub enum Packet {
    Data(Msg),
    Ack(AckHeader),
}

/// Decoded frame: group identifier plus packet
#[derive(Debug, Clone)]
pub struct Frame {
    pub system_id: u16,
    pub packet: Packet,
}

/// Encode a data message; only the prefix through the body is transmitted
pub fn encode_data(system_id: u16, msg: &Msg) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + msg.body.len());
    buf.put_u16_le(system_id);
    buf.put_u32_le(msg.to.0);
    buf.put_u32_le(NET_TYPE_DATA);
    buf.put_u32_le(msg.from.0);
    buf.put_u32_le(msg.this_id.0);
    buf.put_u32_le(msg.reply_to.0);
    buf.put_u32_le(msg.body.len() as u32);
    buf.put_slice(&msg.body);
    buf.to_vec()
}

/// Encode an acknowledgement
pub fn encode_ack(system_id: u16, ack: &AckHeader) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(HEADER_LEN);
    buf.put_u16_le(system_id);
    buf.put_u32_le(ack.to.0);
    buf.put_u32_le(NET_TYPE_ACK);
    buf.put_u32_le(ack.from.0);
    buf.put_u32_le(0); // this_id unused on acks
    buf.put_u32_le(ack.reply_to.0);
    buf.put_u32_le(0);
    buf.to_vec()
}

/// Decode one frame, copying the body out of the arrival buffer
pub fn decode(mut buf: &[u8]) -> Result<Frame, NetError> {
    if buf.len() < HEADER_LEN {
        return Err(NetError::Malformed("frame shorter than header"));
    }
    let system_id = buf.get_u16_le();
    let to = Port(buf.get_u32_le());
    let net_type = buf.get_u32_le();
    let from = Port(buf.get_u32_le());
    let this_id = MsgId(buf.get_u32_le());
    let reply_to = MsgId(buf.get_u32_le());
    let body_len = buf.get_u32_le() as usize;
    let packet = match net_type {
        NET_TYPE_ACK => Packet::Ack(AckHeader { to, from, reply_to }),
        NET_TYPE_DATA => {
            if body_len > MAX_MSG_SIZE {
                return Err(NetError::Malformed("body length exceeds maximum"));
            }
            if buf.remaining() < body_len {
                return Err(NetError::Malformed("truncated body"));
            }
            let body = Bytes::copy_from_slice(&buf[..body_len]);
            Packet::Data(Msg { to, from, this_id, reply_to, body })
        }
        _ => return Err(NetError::Malformed("unknown packet type")),
    };
    Ok(Frame { system_id, packet })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_round_trip() {
        let msg = Msg {
            to: Port(2040),
            from: Port(2041),
            this_id: MsgId(7),
            reply_to: MsgId(0),
            body: Bytes::from_static(b"hello"),
        };
        let frame = encode_data(0x4d53, &msg);
        assert_eq!(frame.len(), HEADER_LEN + 5);
        let decoded = decode(&frame).unwrap();
        assert_eq!(decoded.system_id, 0x4d53);
        match decoded.packet {
            Packet::Data(d) => assert_eq!(d, msg),
            Packet::Ack(_) => panic!("expected data"),
        }
    }

    #[test]
    fn test_header_layout() {
        let msg = Msg {
            to: Port(0x01020304),
            from: Port(0x0a0b0c0d),
            this_id: MsgId(1),
            reply_to: MsgId(2),
            body: Bytes::from_static(&[0xff]),
        };
        let frame = encode_data(0xbeef, &msg);
        assert_eq!(&frame[0..2], &[0xef, 0xbe]);
        assert_eq!(&frame[2..6], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(&frame[6..10], &[0, 0, 0, 0]);
        assert_eq!(&frame[10..14], &[0x0d, 0x0c, 0x0b, 0x0a]);
        assert_eq!(&frame[14..18], &[1, 0, 0, 0]);
        assert_eq!(&frame[18..22], &[2, 0, 0, 0]);
        assert_eq!(&frame[22..26], &[1, 0, 0, 0]);
        assert_eq!(frame[26], 0xff);
    }

    #[test]
    fn test_ack_round_trip() {
        let ack = AckHeader { to: Port(9), from: Port(10), reply_to: MsgId(3) };
        let frame = encode_ack(7, &ack);
        assert_eq!(frame.len(), HEADER_LEN);
        match decode(&frame).unwrap().packet {
            Packet::Ack(a) => assert_eq!(a, ack),
            Packet::Data(_) => panic!("expected ack"),
        }
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode(&[0u8; 10]).is_err());
        // unknown packet type
        let mut frame = encode_ack(7, &AckHeader { to: Port(1), from: Port(2), reply_to: MsgId(0) });
        frame[6] = 9;
        assert!(decode(&frame).is_err());
        // truncated body
        let msg = Msg {
            to: Port(1),
            from: Port(2),
            this_id: MsgId(1),
            reply_to: MsgId(0),
            body: Bytes::from_static(b"abcdef"),
        };
        let mut frame = encode_data(7, &msg);
        frame.truncate(frame.len() - 2);
        assert!(decode(&frame).is_err());
    }
}
