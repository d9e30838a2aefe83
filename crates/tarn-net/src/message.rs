//! Wire message types and frame codec for the Tarn P2P protocol.
//!
//! Frames are `magic(4) || length(u32 BE) || bincode payload`. The length
//! is checked against [`MAX_MESSAGE_SIZE`] before any payload is read or
//! decoded, and structural caps (locator size, inventory size, headers per
//! message) are enforced on both encode and decode. Never JSON for
//! consensus-adjacent data.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use tarn_core::error::NetError;
use tarn_core::types::{Block, BlockHeader, Hash256, Transaction};

/// Maximum encoded payload size.
pub const MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

/// Maximum hashes in a locator.
pub const MAX_LOCATOR_SIZE: usize = 64;

/// Maximum headers in one `Headers` message.
pub const MAX_HEADERS_PER_MESSAGE: usize = 2000;

/// Maximum items in one inventory or data request.
pub const MAX_INV_PER_MESSAGE: usize = 1024;

/// The kind of object an inventory item refers to.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash,
    bincode::Encode, bincode::Decode,
)]
pub enum InvKind {
    /// A full block, addressed by header hash.
    Block,
    /// A transaction, addressed by txid.
    Tx,
}

/// One advertised or requested object.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash,
    bincode::Encode, bincode::Decode,
)]
pub struct InvItem {
    /// Object kind.
    pub kind: InvKind,
    /// Object hash.
    pub hash: Hash256,
}

impl InvItem {
    /// Inventory item for a block hash.
    pub fn block(hash: Hash256) -> Self {
        Self { kind: InvKind::Block, hash }
    }

    /// Inventory item for a transaction id.
    pub fn tx(hash: Hash256) -> Self {
        Self { kind: InvKind::Tx, hash }
    }
}

/// A message exchanged between Tarn peers.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub enum Message {
    /// Handshake opener: who we are and how much chain we have.
    Version {
        /// Protocol version supported by the sender.
        protocol_version: u64,
        /// Height of the sender's best chain.
        best_height: u64,
        /// Random connection nonce for self-connection detection.
        nonce: u64,
        /// Free-form client identifier.
        user_agent: String,
    },
    /// Handshake acknowledgement.
    Verack,
    /// Liveness probe.
    Ping(u64),
    /// Liveness reply echoing the ping payload.
    Pong(u64),
    /// Request headers following the sender's locator.
    GetHeaders {
        /// Sparse list of the sender's block hashes, densest near its tip.
        locator: Vec<Hash256>,
    },
    /// Batch of headers following the locator's fork point.
    Headers(Vec<BlockHeader>),
    /// Request full objects by hash.
    GetData(Vec<InvItem>),
    /// Announce objects available from the sender.
    Inv(Vec<InvItem>),
    /// A full block, answering `GetData` or announcing fresh work.
    Block(Block),
    /// A transaction, answering `GetData` or relaying.
    Tx(Transaction),
    /// Requested objects the sender does not have.
    NotFound(Vec<InvItem>),
}

impl Message {
    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Message::Version { .. } => "version",
            Message::Verack => "verack",
            Message::Ping(_) => "ping",
            Message::Pong(_) => "pong",
            Message::GetHeaders { .. } => "getheaders",
            Message::Headers(_) => "headers",
            Message::GetData(_) => "getdata",
            Message::Inv(_) => "inv",
            Message::Block(_) => "block",
            Message::Tx(_) => "tx",
            Message::NotFound(_) => "notfound",
        }
    }

    /// Enforce structural caps before encoding or after decoding.
    pub fn validate(&self) -> Result<(), NetError> {
        match self {
            Message::GetHeaders { locator } if locator.len() > MAX_LOCATOR_SIZE => {
                Err(NetError::BadMessage(format!(
                    "locator too large: {} > {MAX_LOCATOR_SIZE}",
                    locator.len()
                )))
            }
            Message::Headers(headers) if headers.len() > MAX_HEADERS_PER_MESSAGE => {
                Err(NetError::BadMessage(format!(
                    "too many headers: {} > {MAX_HEADERS_PER_MESSAGE}",
                    headers.len()
                )))
            }
            Message::GetData(items) | Message::Inv(items) | Message::NotFound(items)
                if items.len() > MAX_INV_PER_MESSAGE =>
            {
                Err(NetError::BadMessage(format!(
                    "too many inventory items: {} > {MAX_INV_PER_MESSAGE}",
                    items.len()
                )))
            }
            _ => Ok(()),
        }
    }
}

/// Frame codec bound to one network's magic bytes.
#[derive(Debug, Clone)]
pub struct Codec {
    magic: [u8; 4],
}

impl Codec {
    /// Codec for the given network magic.
    pub fn new(magic: [u8; 4]) -> Self {
        Self { magic }
    }

    /// Encode a message as `magic || length || payload`.
    pub fn encode(&self, msg: &Message) -> Result<Vec<u8>, NetError> {
        msg.validate()?;
        let payload = bincode::encode_to_vec(msg, bincode::config::standard())
            .map_err(|e| NetError::BadMessage(e.to_string()))?;
        if payload.len() > MAX_MESSAGE_SIZE {
            return Err(NetError::MessageTooLarge {
                size: payload.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }
        let mut buf = Vec::with_capacity(8 + payload.len());
        buf.extend_from_slice(&self.magic);
        buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        buf.extend_from_slice(&payload);
        Ok(buf)
    }

    /// Decode a payload previously framed by [`encode`](Self::encode),
    /// after the magic and length have been consumed.
    pub fn decode_payload(&self, payload: &[u8]) -> Result<Message, NetError> {
        if payload.len() > MAX_MESSAGE_SIZE {
            return Err(NetError::MessageTooLarge {
                size: payload.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }
        let (msg, _): (Message, usize) =
            bincode::decode_from_slice(payload, bincode::config::standard())
                .map_err(|e| NetError::BadMessage(e.to_string()))?;
        msg.validate()?;
        Ok(msg)
    }

    /// Read one framed message.
    ///
    /// The size cap is enforced from the length prefix, before the payload
    /// is read or decoded.
    pub async fn read_message<R>(&self, io: &mut R) -> Result<Message, NetError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut magic = [0u8; 4];
        io.read_exact(&mut magic)
            .await
            .map_err(|e| NetError::Io(e.to_string()))?;
        if magic != self.magic {
            return Err(NetError::BadMagic);
        }

        let mut len_buf = [0u8; 4];
        io.read_exact(&mut len_buf)
            .await
            .map_err(|e| NetError::Io(e.to_string()))?;
        let len = u32::from_be_bytes(len_buf) as usize;
        if len > MAX_MESSAGE_SIZE {
            return Err(NetError::MessageTooLarge { size: len, max: MAX_MESSAGE_SIZE });
        }

        let mut payload = vec![0u8; len];
        io.read_exact(&mut payload)
            .await
            .map_err(|e| NetError::Io(e.to_string()))?;
        self.decode_payload(&payload)
    }

    /// Write one framed message and flush.
    pub async fn write_message<W>(&self, io: &mut W, msg: &Message) -> Result<(), NetError>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let buf = self.encode(msg)?;
        io.write_all(&buf)
            .await
            .map_err(|e| NetError::Io(e.to_string()))?;
        io.flush().await.map_err(|e| NetError::Io(e.to_string()))
    }
}
