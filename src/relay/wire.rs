// Fixed-layout binary messages exchanged between clients and the relay

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Capacity of the sender and target name fields, terminator included
pub const NAME_LEN: usize = 20;
/// Capacity of the data field
pub const DATA_LEN: usize = 1024;
/// Size of one encoded frame on the wire
pub const FRAME_LEN: usize = 4 + NAME_LEN + NAME_LEN + DATA_LEN + 4;

/// Sender name used on every frame the relay originates
pub const SERVER_NAME: &str = "SERVER";

/// Errors raised while framing messages
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("payload length {0} outside 0..=1024")]
    PayloadLength(i32),
    #[error("payload of {0} bytes does not fit in one frame")]
    PayloadTooLarge(usize),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Message kinds, with the raw values used on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Login,
    LoginOk,
    LoginFail,
    Chat,
    FileUpload,
    FileDownload,
    FileReady,
    FileData,
    FileEnd,
    Exit,
    Error,
    DirectMessage,
    DirectMessageFail,
    ListRequest,
    ListResponse,
    KickNotice,
    /// A value this relay does not know; kept so the dispatcher can log it
    Unknown(i32),
}

impl MessageKind {
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            1 => Self::Login,
            2 => Self::LoginOk,
            3 => Self::LoginFail,
            4 => Self::Chat,
            5 => Self::FileUpload,
            6 => Self::FileDownload,
            7 => Self::FileReady,
            8 => Self::FileData,
            9 => Self::FileEnd,
            10 => Self::Exit,
            11 => Self::Error,
            12 => Self::DirectMessage,
            13 => Self::DirectMessageFail,
            20 => Self::ListRequest,
            21 => Self::ListResponse,
            99 => Self::KickNotice,
            other => Self::Unknown(other),
        }
    }

    pub fn raw(self) -> i32 {
        match self {
            Self::Login => 1,
            Self::LoginOk => 2,
            Self::LoginFail => 3,
            Self::Chat => 4,
            Self::FileUpload => 5,
            Self::FileDownload => 6,
            Self::FileReady => 7,
            Self::FileData => 8,
            Self::FileEnd => 9,
            Self::Exit => 10,
            Self::Error => 11,
            Self::DirectMessage => 12,
            Self::DirectMessageFail => 13,
            Self::ListRequest => 20,
            Self::ListResponse => 21,
            Self::KickNotice => 99,
            Self::Unknown(raw) => raw,
        }
    }
}

/// One wire frame. Every field is always present; unused ones are empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub kind: MessageKind,
    pub sender: String,
    pub target: String,
    /// Raw data bytes, at most `DATA_LEN`
    pub data: Vec<u8>,
    /// Meaningful only for `FileData`
    pub data_len: i32,
}

impl Message {
    /// Create an empty message of the given kind
    pub fn new(kind: MessageKind, sender: &str) -> Self {
        Self {
            kind,
            sender: sender.to_string(),
            target: String::new(),
            data: Vec::new(),
            data_len: 0,
        }
    }

    /// Create a message carrying a NUL-terminated text payload
    pub fn text(kind: MessageKind, sender: &str, text: &str) -> Self {
        let mut msg = Self::new(kind, sender);
        msg.data = text.as_bytes().to_vec();
        msg
    }

    /// Shorthand for a text reply originating from the relay
    pub fn notice(kind: MessageKind, text: &str) -> Self {
        Self::text(kind, SERVER_NAME, text)
    }

    /// Create a direct message addressed to `target`
    pub fn direct(sender: &str, target: &str, payload: &[u8]) -> Self {
        let mut msg = Self::new(MessageKind::DirectMessage, sender);
        msg.target = target.to_string();
        msg.data = payload.to_vec();
        msg
    }

    /// Create a file chunk; the length is carried in `data_len`
    pub fn chunk(sender: &str, bytes: &[u8]) -> Result<Self, WireError> {
        if bytes.len() > DATA_LEN {
            return Err(WireError::PayloadTooLarge(bytes.len()));
        }
        let mut msg = Self::new(MessageKind::FileData, sender);
        msg.data = bytes.to_vec();
        msg.data_len = bytes.len() as i32;
        Ok(msg)
    }

    /// Payload interpreted as NUL-terminated text
    pub fn text_payload(&self) -> String {
        String::from_utf8_lossy(self.text_bytes()).into_owned()
    }

    /// Payload interpreted as a chunk of `data_len` bytes
    pub fn chunk_payload(&self) -> &[u8] {
        let len = (self.data_len.max(0) as usize).min(self.data.len());
        &self.data[..len]
    }

    /// Payload up to the first NUL, as raw bytes
    pub fn text_bytes(&self) -> &[u8] {
        until_nul(&self.data)
    }

    /// Serialize into exactly `FRAME_LEN` bytes
    pub fn encode_into(&self, dst: &mut BytesMut) -> Result<(), WireError> {
        if self.data.len() > DATA_LEN {
            return Err(WireError::PayloadTooLarge(self.data.len()));
        }
        if !(0..=DATA_LEN as i32).contains(&self.data_len) {
            return Err(WireError::PayloadLength(self.data_len));
        }

        dst.reserve(FRAME_LEN);
        dst.put_i32_le(self.kind.raw());
        put_name(dst, &self.sender);
        put_name(dst, &self.target);

        // Text payloads need room for their terminator; binary chunks use the whole field.
        let data = if self.kind == MessageKind::FileData {
            &self.data[..]
        } else {
            &self.data[..self.data.len().min(DATA_LEN - 1)]
        };
        dst.put_slice(data);
        dst.put_bytes(0, DATA_LEN - data.len());
        dst.put_i32_le(self.data_len);
        Ok(())
    }

    /// Parse one complete frame
    pub fn decode_frame(frame: &[u8]) -> Result<Self, WireError> {
        debug_assert_eq!(frame.len(), FRAME_LEN);

        let (mut kind_raw, rest) = frame.split_at(4);
        let (sender, rest) = rest.split_at(NAME_LEN);
        let (target, rest) = rest.split_at(NAME_LEN);
        let (data_field, mut len_raw) = rest.split_at(DATA_LEN);

        let kind = MessageKind::from_raw(kind_raw.get_i32_le());
        let data_len = len_raw.get_i32_le();
        if !(0..=DATA_LEN as i32).contains(&data_len) {
            return Err(WireError::PayloadLength(data_len));
        }

        let data = if kind == MessageKind::FileData {
            data_field[..data_len as usize].to_vec()
        } else {
            until_nul(data_field).to_vec()
        };

        Ok(Self {
            kind,
            sender: String::from_utf8_lossy(until_nul(sender)).into_owned(),
            target: String::from_utf8_lossy(until_nul(target)).into_owned(),
            data,
            data_len,
        })
    }
}

fn put_name(dst: &mut BytesMut, name: &str) {
    let mut bytes = name.as_bytes();
    if bytes.len() > NAME_LEN - 1 {
        bytes = &bytes[..NAME_LEN - 1];
    }
    dst.put_slice(bytes);
    dst.put_bytes(0, NAME_LEN - bytes.len());
}

fn until_nul(field: &[u8]) -> &[u8] {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    &field[..end]
}

/// Tokio codec splitting a byte stream into fixed-size frames
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameCodec;

impl Decoder for FrameCodec {
    type Item = Message;
    type Error = WireError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, WireError> {
        if src.len() < FRAME_LEN {
            src.reserve(FRAME_LEN - src.len());
            return Ok(None);
        }
        let frame = src.split_to(FRAME_LEN);
        Message::decode_frame(&frame).map(Some)
    }
}

impl Encoder<Message> for FrameCodec {
    type Error = WireError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), WireError> {
        item.encode_into(dst)
    }
}
