use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

use crate::header::{
    Channel, DataCommand, MessageHeader, NetworkCommand, MESSAGE_HEADER_SIZE,
    MESSAGE_PAYLOAD_MAX_SIZE,
};
use crate::messages::Message;
use forknet_types::DecodeError;

#[derive(Error, Debug)]
pub enum ProtoError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("header check failed")]
    BadHeader,
    #[error("magic mismatch")]
    BadMagic,
    #[error("payload checksum mismatch")]
    BadChecksum,
    #[error("unknown channel or command, type byte {0:#04x}")]
    UnknownCommand(u8),
    #[error("malformed payload: {0}")]
    Payload(#[from] DecodeError),
}

/// Stream codec framing [`Message`]s with [`MessageHeader`]s.
///
/// Both CRC checks must pass before a payload byte is interpreted; a frame
/// failing either check poisons the connection, so decode errors are
/// terminal.
#[derive(Clone, Copy, Debug)]
pub struct MessageCodec {
    magic: u32,
}

impl MessageCodec {
    pub fn new(magic: u32) -> Self {
        MessageCodec { magic }
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = ProtoError;

    fn encode(&mut self, message: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let mut payload = BytesMut::new();
        message.encode_payload(&mut payload);

        let typ = MessageHeader::message_type(message.channel(), message.command());
        let header = MessageHeader::new(
            self.magic,
            typ,
            payload.len() as u32,
            crc32fast::hash(&payload),
        );

        dst.reserve(MESSAGE_HEADER_SIZE + payload.len());
        let mut raw = [0u8; MESSAGE_HEADER_SIZE];
        header.write_to(&mut raw);
        dst.put_slice(&raw);
        dst.put_slice(&payload);
        Ok(())
    }
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = ProtoError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, Self::Error> {
        if src.len() < MESSAGE_HEADER_SIZE {
            return Ok(None);
        }
        let mut raw = [0u8; MESSAGE_HEADER_SIZE];
        raw.copy_from_slice(&src[..MESSAGE_HEADER_SIZE]);
        let header = MessageHeader::read_from(&raw);

        if !header.verify() {
            return Err(ProtoError::BadHeader);
        }
        if header.magic != self.magic {
            return Err(ProtoError::BadMagic);
        }

        let payload_size = header.payload_size as usize;
        debug_assert!(payload_size <= MESSAGE_PAYLOAD_MAX_SIZE);
        if src.len() < MESSAGE_HEADER_SIZE + payload_size {
            src.reserve(MESSAGE_HEADER_SIZE + payload_size - src.len());
            return Ok(None);
        }

        src.advance(MESSAGE_HEADER_SIZE);
        let payload = src.split_to(payload_size);
        if crc32fast::hash(&payload) != header.payload_checksum {
            return Err(ProtoError::BadChecksum);
        }

        let message = if header.channel() == Channel::Network as u8 {
            let command = NetworkCommand::from_u8(header.command())
                .ok_or(ProtoError::UnknownCommand(header.typ))?;
            Message::decode_network(command, &payload)?
        } else if header.channel() == Channel::Data as u8 {
            let command = DataCommand::from_u8(header.command())
                .ok_or(ProtoError::UnknownCommand(header.typ))?;
            Message::decode_data(command, &payload)?
        } else {
            return Err(ProtoError::UnknownCommand(header.typ));
        };
        Ok(Some(message))
    }
}
