//! Wire format of the datagrams exchanged between two peers once the NAT binding is open.
//!
//! All numbers are in network byte order:
//!
//! ```ascii
//! 0: protocol version (u8), currently 1
//! 1: kind (u8):
//!    * 0 heartbeat - keeps NAT bindings alive, carries no data
//!    * 1 message - application payload, must be acknowledged
//!    * 2 acknowledgment - confirms receipt of the message with the same sequence number
//! 2: sequence number (u64 varint) - 0 for heartbeats
//! *: payload (varint length + UTF-8 bytes) - empty for anything but messages
//! ```
//!
//! NB: Sequence numbers are assigned per sender and session, starting at 1. They are not
//!      persisted, so a restarted peer starts over.

use anyhow::{anyhow, bail};
use bytes::{Buf, BufMut, BytesMut};
use bytes_varint::{VarIntSupport, VarIntSupportMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::util::buf::{put_string, try_get_string};

#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, TryFromPrimitive, IntoPrimitive)]
pub enum PacketKind {
    Heartbeat = 0,
    Message = 1,
    Acknowledgment = 2,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Packet {
    pub kind: PacketKind,
    pub sequence: u64,
    pub payload: String,
}

impl Packet {
    pub const PROTOCOL_VERSION_1: u8 = 1;

    pub fn heartbeat() -> Packet {
        Packet {
            kind: PacketKind::Heartbeat,
            sequence: 0,
            payload: String::new(),
        }
    }

    pub fn message(sequence: u64, payload: impl Into<String>) -> Packet {
        Packet {
            kind: PacketKind::Message,
            sequence,
            payload: payload.into(),
        }
    }

    /// The acknowledgment for a message always echoes the message's sequence number
    pub fn acknowledgment(sequence: u64) -> Packet {
        Packet {
            kind: PacketKind::Acknowledgment,
            sequence,
            payload: String::new(),
        }
    }

    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u8(Self::PROTOCOL_VERSION_1);
        buf.put_u8(self.kind.into());
        buf.put_u64_varint(self.sequence);
        match self.kind {
            PacketKind::Message => put_string(buf, &self.payload),
            PacketKind::Heartbeat | PacketKind::Acknowledgment => put_string(buf, ""),
        }
    }

    pub fn to_bytes(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(12 + self.payload.len());
        self.ser(&mut buf);
        buf
    }

    pub fn try_deser(buf: &mut impl Buf) -> anyhow::Result<Packet> {
        let version = buf.try_get_u8()?;
        if version != Self::PROTOCOL_VERSION_1 {
            bail!("unsupported protocol version {}", version);
        }

        let raw_kind = buf.try_get_u8()?;
        let kind = PacketKind::try_from(raw_kind)
            .map_err(|_| anyhow!("invalid packet kind {}", raw_kind))?;

        let sequence = buf.try_get_u64_varint()?;
        let payload = try_get_string(buf)?;

        if buf.has_remaining() {
            bail!("{} trailing bytes after packet", buf.remaining());
        }

        if kind != PacketKind::Message && !payload.is_empty() {
            bail!("{:?} packet must not carry a payload", kind);
        }

        Ok(Packet {
            kind,
            sequence,
            payload,
        })
    }
}
