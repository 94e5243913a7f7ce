/// Control and data messages exchanged with a viewer.
///
/// Every frame is a JSON envelope `{"Type": ..., "Data": ...}` where `Data` is the
/// base64 encoding of a second JSON document holding the message payload. Terminal
/// output travels to the viewer as `Write` messages; the viewer sends `Write`
/// (keystrokes) and `WinSize` (geometry) back.
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};

use crate::protocol::{ConnectionError, ConnectionResult};

pub const MSG_WIN_SIZE: &str = "WinSize";
pub const MSG_WRITE: &str = "Write";
pub const MSG_TERMINATE: &str = "Terminate";

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    #[serde(rename = "Type")]
    kind: String,
    #[serde(rename = "Data", default)]
    data: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WinSizePayload {
    cols: u16,
    rows: u16,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WritePayload {
    size: u32,
    #[serde(default)]
    data: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct TerminatePayload {}

/// A decoded protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TtyMessage {
    /// New terminal geometry requested by the viewer.
    WinSize { rows: u16, cols: u16 },
    /// Raw terminal bytes. Only the authoritative `Size` prefix is kept on decode.
    Write(Vec<u8>),
    /// The session has ended; the viewer should not reconnect.
    Terminate,
    /// A well-formed envelope carrying a type tag this side does not understand.
    Unknown(String),
}

impl TtyMessage {
    /// The wire type tag of this message.
    pub fn kind(&self) -> &str {
        match self {
            TtyMessage::WinSize { .. } => MSG_WIN_SIZE,
            TtyMessage::Write(_) => MSG_WRITE,
            TtyMessage::Terminate => MSG_TERMINATE,
            TtyMessage::Unknown(kind) => kind.as_str(),
        }
    }

    /// Serialize into a text frame.
    pub fn encode(&self) -> ConnectionResult<String> {
        let payload = match self {
            TtyMessage::WinSize { rows, cols } => serde_json::to_vec(&WinSizePayload {
                cols: *cols,
                rows: *rows,
            }),
            TtyMessage::Write(data) => {
                let size = u32::try_from(data.len()).map_err(|_| {
                    ConnectionError::Serialization(format!("write of {} bytes is too large", data.len()))
                })?;
                serde_json::to_vec(&WritePayload {
                    size,
                    data: Some(BASE64.encode(data)),
                })
            }
            TtyMessage::Terminate => serde_json::to_vec(&TerminatePayload {}),
            TtyMessage::Unknown(kind) => {
                return Err(ConnectionError::Serialization(format!(
                    "cannot encode unknown message type {:?}",
                    kind
                )));
            }
        }
        .map_err(|e| ConnectionError::Serialization(e.to_string()))?;

        let envelope = Envelope {
            kind: self.kind().to_string(),
            data: Some(BASE64.encode(payload)),
        };
        serde_json::to_string(&envelope).map_err(|e| ConnectionError::Serialization(e.to_string()))
    }

    /// Parse one frame received from a viewer.
    pub fn decode(frame: &[u8]) -> ConnectionResult<Self> {
        let envelope: Envelope = serde_json::from_slice(frame)
            .map_err(|e| ConnectionError::MalformedFrame(format!("bad envelope: {}", e)))?;

        match envelope.kind.as_str() {
            MSG_WIN_SIZE => {
                let payload: WinSizePayload = decode_payload(envelope.data.as_deref())?;
                Ok(TtyMessage::WinSize {
                    rows: payload.rows,
                    cols: payload.cols,
                })
            }
            MSG_WRITE => {
                let payload: WritePayload = decode_payload(envelope.data.as_deref())?;
                let mut data = decode_base64(payload.data.as_deref().unwrap_or_default())?;
                let size = payload.size as usize;
                if size > data.len() {
                    return Err(ConnectionError::MalformedFrame(format!(
                        "write declares {} bytes but carries {}",
                        size,
                        data.len()
                    )));
                }
                data.truncate(size);
                Ok(TtyMessage::Write(data))
            }
            MSG_TERMINATE => Ok(TtyMessage::Terminate),
            other => Ok(TtyMessage::Unknown(other.to_string())),
        }
    }
}

fn decode_base64(data: &str) -> ConnectionResult<Vec<u8>> {
    BASE64
        .decode(data)
        .map_err(|e| ConnectionError::MalformedFrame(format!("bad base64: {}", e)))
}

fn decode_payload<T: for<'de> Deserialize<'de>>(data: Option<&str>) -> ConnectionResult<T> {
    let raw = decode_base64(data.unwrap_or_default())?;
    serde_json::from_slice(&raw)
        .map_err(|e| ConnectionError::MalformedFrame(format!("bad payload: {}", e)))
}
