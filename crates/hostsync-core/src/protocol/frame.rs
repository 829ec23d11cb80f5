//! Channel frame (JSON).

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::error::{HostSyncError, Result};
use crate::ids::PlayerId;

/// Current wire protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Reserved channel for connection-level control frames.
pub const SYS_CHANNEL: &str = "sys";

/// Frame kind (field name is `type` in JSON).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameKind {
    /// Client announces its stable identity after connecting.
    Hello,
    /// Replica asks the authority to initialize (or resend) a value.
    InitReq,
    /// Authority publishes a committed value.
    Value,
    /// Replica proposes an input the authority may apply.
    Propose,
}

impl FrameKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FrameKind::Hello => "hello",
            FrameKind::InitReq => "init_req",
            FrameKind::Value => "value",
            FrameKind::Propose => "propose",
        }
    }
}

/// One message on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Frame {
    /// Protocol version.
    pub v: u8,
    /// Target channel name (e.g. "theme").
    pub ch: String,
    /// Message kind.
    #[serde(rename = "type")]
    pub kind: FrameKind,
    /// Monotonic value version, present on `value` frames.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    /// Optional payload, stored as raw JSON (lazy parsing).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Box<RawValue>>,
}

/// Payload of `sys/hello`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Hello {
    pub player_id: PlayerId,
}

impl Frame {
    pub fn new(ch: impl Into<String>, kind: FrameKind) -> Self {
        Self {
            v: PROTOCOL_VERSION,
            ch: ch.into(),
            kind,
            version: None,
            data: None,
        }
    }

    pub fn hello(player_id: PlayerId) -> Result<Self> {
        Frame::new(SYS_CHANNEL, FrameKind::Hello).with_data(&Hello { player_id })
    }

    pub fn with_version(mut self, version: u64) -> Self {
        self.version = Some(version);
        self
    }

    pub fn with_data<T: Serialize + ?Sized>(mut self, data: &T) -> Result<Self> {
        let raw = serde_json::value::to_raw_value(data)
            .map_err(|e| HostSyncError::BadRequest(format!("json encode failed: {e}")))?;
        self.data = Some(raw);
        Ok(self)
    }

    /// Parse the payload into `T`. A missing payload is a bad request.
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<T> {
        let raw = self.data.as_ref().ok_or_else(|| {
            HostSyncError::BadRequest(format!("{}/{} requires data", self.ch, self.kind.as_str()))
        })?;
        serde_json::from_str(raw.get()).map_err(|e| {
            HostSyncError::BadRequest(format!(
                "{}/{} invalid data: {e}",
                self.ch,
                self.kind.as_str()
            ))
        })
    }

    /// Serialize once; the resulting `Bytes` is cheap to clone per recipient.
    pub fn encode(&self) -> Result<Bytes> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(|e| HostSyncError::Internal(format!("frame encode failed: {e}")))
    }
}

/// Decode a frame from bytes.
pub fn decode_frame(buf: &[u8]) -> Result<Frame> {
    let frame: Frame = serde_json::from_slice(buf)
        .map_err(|e| HostSyncError::BadRequest(format!("invalid frame json: {e}")))?;
    if frame.v != PROTOCOL_VERSION {
        return Err(HostSyncError::UnsupportedVersion);
    }
    if frame.ch.is_empty() {
        return Err(HostSyncError::BadRequest("frame channel must not be empty".into()));
    }
    Ok(frame)
}
