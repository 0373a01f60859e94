//! Log events
//!
//! A log event is a 26-byte packed header followed by a body whose schema
//! depends on the type. The header carries epoch, tick, type, body size
//! (24-bit), the epoch-monotone log id, and a 64-bit body digest. Bodies
//! are parsed lazily; unknown types stay opaque and render as hex.

use bytes::{Buf, BufMut, BytesMut};
use serde::Serialize;

use crate::identity::identity_from_public_key;
use crate::{PublicKey, TickwatchError, TickwatchResult, DIGEST_SIZE};

/// Packed header length.
pub const LOG_HEADER_SIZE: usize = 26;

/// Contract log types below this value are not indexed or subscribable.
pub const SUBSCRIBABLE_CONTRACT_LOG_TYPE_FLOOR: u32 = 100_000;

/// Known log event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LogType {
    QuTransfer = 0,
    AssetIssuance = 1,
    AssetOwnershipChange = 2,
    AssetPossessionChange = 3,
    ContractError = 4,
    ContractWarning = 5,
    ContractInformation = 6,
    ContractDebug = 7,
    Burning = 8,
    DustBurning = 9,
    SpectrumStats = 10,
    AssetOwnershipManagingContractChange = 11,
    AssetPossessionManagingContractChange = 12,
    CustomMessage = 255,
}

impl LogType {
    pub fn from_u8(raw: u8) -> Option<Self> {
        Some(match raw {
            0 => Self::QuTransfer,
            1 => Self::AssetIssuance,
            2 => Self::AssetOwnershipChange,
            3 => Self::AssetPossessionChange,
            4 => Self::ContractError,
            5 => Self::ContractWarning,
            6 => Self::ContractInformation,
            7 => Self::ContractDebug,
            8 => Self::Burning,
            9 => Self::DustBurning,
            10 => Self::SpectrumStats,
            11 => Self::AssetOwnershipManagingContractChange,
            12 => Self::AssetPossessionManagingContractChange,
            255 => Self::CustomMessage,
            _ => return None,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::QuTransfer => "QU_TRANSFER",
            Self::AssetIssuance => "ASSET_ISSUANCE",
            Self::AssetOwnershipChange => "ASSET_OWNERSHIP_CHANGE",
            Self::AssetPossessionChange => "ASSET_POSSESSION_CHANGE",
            Self::ContractError => "CONTRACT_ERROR_MESSAGE",
            Self::ContractWarning => "CONTRACT_WARNING_MESSAGE",
            Self::ContractInformation => "CONTRACT_INFORMATION_MESSAGE",
            Self::ContractDebug => "CONTRACT_DEBUG_MESSAGE",
            Self::Burning => "BURNING",
            Self::DustBurning => "DUST_BURNING",
            Self::SpectrumStats => "SPECTRUM_STATS",
            Self::AssetOwnershipManagingContractChange => "ASSET_OWNERSHIP_MANAGING_CONTRACT_CHANGE",
            Self::AssetPossessionManagingContractChange => "ASSET_POSSESSION_MANAGING_CONTRACT_CHANGE",
            Self::CustomMessage => "CUSTOM_MESSAGE",
        }
    }

    fn is_contract_message(&self) -> bool {
        matches!(
            self,
            Self::ContractError | Self::ContractWarning | Self::ContractInformation | Self::ContractDebug
        )
    }
}

/// Decoded header of a log event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogHeader {
    pub epoch: u16,
    pub tick: u32,
    pub log_type: u8,
    pub body_size: u32,
    pub log_id: u64,
    pub log_digest: u64,
}

impl LogHeader {
    pub fn decode(bytes: &[u8]) -> TickwatchResult<Self> {
        if bytes.len() < LOG_HEADER_SIZE {
            return Err(TickwatchError::Decode(format!(
                "log header is {} bytes, expected {}",
                bytes.len(),
                LOG_HEADER_SIZE
            )));
        }
        let mut buf = bytes;
        let epoch = buf.get_u16_le();
        let tick = buf.get_u32_le();
        let log_type = buf.get_u8();
        let body_size = u32::from_le_bytes([buf[0], buf[1], buf[2], 0]);
        buf.advance(3);
        let log_id = buf.get_u64_le();
        let log_digest = buf.get_u64_le();
        Ok(Self {
            epoch,
            tick,
            log_type,
            body_size,
            log_id,
            log_digest,
        })
    }
}

/// A complete log event (header + raw body).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEvent {
    pub epoch: u16,
    pub tick: u32,
    pub log_type: u8,
    pub log_id: u64,
    pub log_digest: u64,
    pub body: Vec<u8>,
}

/// QU transfer body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuTransfer {
    pub source_public_key: PublicKey,
    pub destination_public_key: PublicKey,
    pub amount: i64,
}

/// Parsed log body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogBody {
    QuTransfer(QuTransfer),
    AssetIssuance {
        issuer_public_key: PublicKey,
        number_of_shares: i64,
        managing_contract_index: u32,
        name: [u8; 7],
        number_of_decimal_places: u8,
        unit_of_measurement: [u8; 7],
    },
    AssetOwnershipChange {
        source_public_key: PublicKey,
        destination_public_key: PublicKey,
        name: [u8; 7],
        number_of_shares: i64,
    },
    AssetPossessionChange {
        source_public_key: PublicKey,
        destination_public_key: PublicKey,
        name: [u8; 7],
        number_of_shares: i64,
    },
    Burning {
        source_public_key: PublicKey,
        amount: i64,
    },
    ContractMessage {
        sc_index: u32,
        sc_log_type: u32,
        content: Vec<u8>,
    },
    CustomMessage(u64),
    Opaque(Vec<u8>),
}

impl LogEvent {
    /// Decode a packed log event; the slice must contain exactly the
    /// header plus the declared body.
    pub fn decode(bytes: &[u8]) -> TickwatchResult<Self> {
        let header = LogHeader::decode(bytes)?;
        let total = LOG_HEADER_SIZE + header.body_size as usize;
        if bytes.len() < total {
            return Err(TickwatchError::Decode(format!(
                "log body truncated: have {} bytes, header declares {}",
                bytes.len() - LOG_HEADER_SIZE,
                header.body_size
            )));
        }
        Ok(Self {
            epoch: header.epoch,
            tick: header.tick,
            log_type: header.log_type,
            log_id: header.log_id,
            log_digest: header.log_digest,
            body: bytes[LOG_HEADER_SIZE..total].to_vec(),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(LOG_HEADER_SIZE + self.body.len());
        buf.put_u16_le(self.epoch);
        buf.put_u32_le(self.tick);
        buf.put_u8(self.log_type);
        buf.put_slice(&(self.body.len() as u32).to_le_bytes()[..3]);
        buf.put_u64_le(self.log_id);
        buf.put_u64_le(self.log_digest);
        buf.put_slice(&self.body);
        buf.to_vec()
    }

    /// Total persisted size: header plus body. The reconciler sums this
    /// against the peer-declared aggregate byte size.
    pub fn byte_len(&self) -> usize {
        LOG_HEADER_SIZE + self.body.len()
    }

    pub fn kind(&self) -> Option<LogType> {
        LogType::from_u8(self.log_type)
    }

    /// Parse the body according to the type. Unknown types and bodies
    /// shorter than their schema stay opaque.
    pub fn parse_body(&self) -> LogBody {
        let Some(kind) = self.kind() else {
            return LogBody::Opaque(self.body.clone());
        };
        let b = &self.body[..];
        match kind {
            LogType::QuTransfer if b.len() >= 72 => LogBody::QuTransfer(QuTransfer {
                source_public_key: take_key(b, 0),
                destination_public_key: take_key(b, 32),
                amount: i64::from_le_bytes(b[64..72].try_into().unwrap()),
            }),
            LogType::AssetIssuance if b.len() >= 59 => LogBody::AssetIssuance {
                issuer_public_key: take_key(b, 0),
                number_of_shares: i64::from_le_bytes(b[32..40].try_into().unwrap()),
                managing_contract_index: u32::from_le_bytes(b[40..44].try_into().unwrap()),
                name: b[44..51].try_into().unwrap(),
                number_of_decimal_places: b[51],
                unit_of_measurement: b[52..59].try_into().unwrap(),
            },
            LogType::AssetOwnershipChange if b.len() >= 79 => LogBody::AssetOwnershipChange {
                source_public_key: take_key(b, 0),
                destination_public_key: take_key(b, 32),
                name: b[64..71].try_into().unwrap(),
                number_of_shares: i64::from_le_bytes(b[71..79].try_into().unwrap()),
            },
            LogType::AssetPossessionChange if b.len() >= 79 => LogBody::AssetPossessionChange {
                source_public_key: take_key(b, 0),
                destination_public_key: take_key(b, 32),
                name: b[64..71].try_into().unwrap(),
                number_of_shares: i64::from_le_bytes(b[71..79].try_into().unwrap()),
            },
            LogType::Burning if b.len() >= 40 => LogBody::Burning {
                source_public_key: take_key(b, 0),
                amount: i64::from_le_bytes(b[32..40].try_into().unwrap()),
            },
            kind if kind.is_contract_message() && b.len() >= 8 => LogBody::ContractMessage {
                sc_index: u32::from_le_bytes(b[0..4].try_into().unwrap()),
                sc_log_type: u32::from_le_bytes(b[4..8].try_into().unwrap()),
                content: b[8..].to_vec(),
            },
            LogType::CustomMessage if b.len() == 8 => {
                LogBody::CustomMessage(u64::from_le_bytes(b.try_into().unwrap()))
            }
            _ => LogBody::Opaque(self.body.clone()),
        }
    }

    /// The (scIndex, logType) pair this event dispatches under, or None
    /// when the event is not subscribable. Core events dispatch under
    /// contract index 0; contract messages under their embedded pair when
    /// the embedded log type is at or above the indexed floor.
    pub fn subscription_key(&self) -> Option<(u32, u32)> {
        let kind = self.kind()?;
        match kind {
            LogType::QuTransfer
            | LogType::AssetIssuance
            | LogType::AssetOwnershipChange
            | LogType::AssetPossessionChange
            | LogType::Burning
            | LogType::AssetOwnershipManagingContractChange
            | LogType::AssetPossessionManagingContractChange => Some((0, self.log_type as u32)),
            _ if kind.is_contract_message() => match self.parse_body() {
                LogBody::ContractMessage {
                    sc_index,
                    sc_log_type,
                    ..
                } if sc_log_type >= SUBSCRIBABLE_CONTRACT_LOG_TYPE_FLOOR => {
                    Some((sc_index, sc_log_type))
                }
                _ => None,
            },
            _ => None,
        }
    }

    /// Up to three topic keys embedded at the start of an indexed contract
    /// message body.
    pub fn topics(&self) -> Vec<PublicKey> {
        let LogBody::ContractMessage { content, .. } = self.parse_body() else {
            return Vec::new();
        };
        content
            .chunks_exact(DIGEST_SIZE)
            .take(3)
            .map(|chunk| {
                let mut key = [0u8; DIGEST_SIZE];
                key.copy_from_slice(chunk);
                key
            })
            .collect()
    }

    /// The transfer amount, when this is a QU transfer.
    pub fn transfer_amount(&self) -> Option<i64> {
        match self.parse_body() {
            LogBody::QuTransfer(t) => Some(t.amount),
            _ => None,
        }
    }

    /// Render to the JSON shape served by the HTTP and WebSocket surfaces.
    pub fn to_json(&self) -> serde_json::Value {
        let rendered = RenderedLog {
            ok: true,
            epoch: self.epoch,
            tick: self.tick,
            log_type: self.log_type,
            log_typename: self.kind().map(|k| k.name()),
            log_id: self.log_id,
            log_digest: self.log_digest,
            body_size: self.body.len() as u32,
            body: self.render_body(),
        };
        serde_json::to_value(rendered).unwrap_or_else(|_| serde_json::json!({"ok": false}))
    }

    fn render_body(&self) -> RenderedBody {
        match self.parse_body() {
            LogBody::QuTransfer(t) => RenderedBody::Transfer {
                from: identity_from_public_key(&t.source_public_key, false),
                to: identity_from_public_key(&t.destination_public_key, false),
                amount: t.amount,
            },
            LogBody::AssetIssuance {
                issuer_public_key,
                number_of_shares,
                managing_contract_index,
                name,
                number_of_decimal_places,
                unit_of_measurement,
            } => RenderedBody::Issuance {
                issuer: identity_from_public_key(&issuer_public_key, false),
                number_of_shares,
                managing_contract_index,
                name: asset_name(&name),
                number_of_decimal_places,
                unit_of_measurement: asset_name(&unit_of_measurement),
            },
            LogBody::AssetOwnershipChange {
                source_public_key,
                destination_public_key,
                name,
                number_of_shares,
            }
            | LogBody::AssetPossessionChange {
                source_public_key,
                destination_public_key,
                name,
                number_of_shares,
            } => RenderedBody::AssetChange {
                from: identity_from_public_key(&source_public_key, false),
                to: identity_from_public_key(&destination_public_key, false),
                asset_name: asset_name(&name),
                number_of_shares,
            },
            LogBody::Burning {
                source_public_key,
                amount,
            } => RenderedBody::Burning {
                public_key: identity_from_public_key(&source_public_key, false),
                amount,
            },
            LogBody::ContractMessage {
                sc_index,
                sc_log_type,
                content,
            } => RenderedBody::Contract {
                sc_index,
                sc_log_type,
                content: hex::encode(content),
            },
            LogBody::CustomMessage(value) => RenderedBody::Custom {
                custom_message: value,
            },
            LogBody::Opaque(bytes) => RenderedBody::Opaque {
                hex: hex::encode(bytes),
            },
        }
    }
}

/// Typed JSON shape of a rendered log; the single serializer for both
/// the REST and the WebSocket surface.
#[derive(Debug, Serialize)]
struct RenderedLog {
    ok: bool,
    epoch: u16,
    tick: u32,
    #[serde(rename = "type")]
    log_type: u8,
    #[serde(rename = "logTypename", skip_serializing_if = "Option::is_none")]
    log_typename: Option<&'static str>,
    #[serde(rename = "logId")]
    log_id: u64,
    #[serde(rename = "logDigest")]
    log_digest: u64,
    #[serde(rename = "bodySize")]
    body_size: u32,
    body: RenderedBody,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum RenderedBody {
    Transfer {
        from: String,
        to: String,
        amount: i64,
    },
    Issuance {
        issuer: String,
        #[serde(rename = "numberOfShares")]
        number_of_shares: i64,
        #[serde(rename = "managingContractIndex")]
        managing_contract_index: u32,
        name: String,
        #[serde(rename = "numberOfDecimalPlaces")]
        number_of_decimal_places: u8,
        #[serde(rename = "unitOfMeasurement")]
        unit_of_measurement: String,
    },
    AssetChange {
        from: String,
        to: String,
        #[serde(rename = "assetName")]
        asset_name: String,
        #[serde(rename = "numberOfShares")]
        number_of_shares: i64,
    },
    Burning {
        #[serde(rename = "publicKey")]
        public_key: String,
        amount: i64,
    },
    Contract {
        #[serde(rename = "scIndex")]
        sc_index: u32,
        #[serde(rename = "scLogType")]
        sc_log_type: u32,
        content: String,
    },
    Custom {
        #[serde(rename = "customMessage")]
        custom_message: u64,
    },
    Opaque {
        hex: String,
    },
}

fn asset_name(raw: &[u8; 7]) -> String {
    raw.iter()
        .take_while(|c| **c != 0)
        .map(|c| *c as char)
        .collect()
}

fn take_key(bytes: &[u8], offset: usize) -> PublicKey {
    let mut key = [0u8; DIGEST_SIZE];
    key.copy_from_slice(&bytes[offset..offset + DIGEST_SIZE]);
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transfer_body(amount: i64) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&[1u8; 32]);
        body.extend_from_slice(&[2u8; 32]);
        body.extend_from_slice(&amount.to_le_bytes());
        body
    }

    fn event(log_type: LogType, log_id: u64, body: Vec<u8>) -> LogEvent {
        LogEvent {
            epoch: 100,
            tick: 1000,
            log_type: log_type as u8,
            log_id,
            log_digest: 7,
            body,
        }
    }

    #[test]
    fn codec_round_trip() {
        let log = event(LogType::QuTransfer, 42, transfer_body(500));
        let decoded = LogEvent::decode(&log.encode()).unwrap();
        assert_eq!(decoded, log);
        assert_eq!(decoded.byte_len(), LOG_HEADER_SIZE + 72);
    }

    #[test]
    fn truncated_body_rejected() {
        let mut bytes = event(LogType::QuTransfer, 42, transfer_body(500)).encode();
        bytes.truncate(bytes.len() - 1);
        assert!(LogEvent::decode(&bytes).is_err());
    }

    #[test]
    fn transfer_parses() {
        let log = event(LogType::QuTransfer, 1, transfer_body(12345));
        match log.parse_body() {
            LogBody::QuTransfer(t) => {
                assert_eq!(t.amount, 12345);
                assert_eq!(t.source_public_key, [1u8; 32]);
            }
            other => panic!("unexpected body: {:?}", other),
        }
        assert_eq!(log.transfer_amount(), Some(12345));
        assert_eq!(log.subscription_key(), Some((0, 0)));
    }

    #[test]
    fn short_transfer_stays_opaque() {
        let log = event(LogType::QuTransfer, 1, vec![0u8; 10]);
        assert!(matches!(log.parse_body(), LogBody::Opaque(_)));
    }

    #[test]
    fn contract_message_key_and_topics() {
        let mut body = Vec::new();
        body.extend_from_slice(&5u32.to_le_bytes());
        body.extend_from_slice(&100_001u32.to_le_bytes());
        body.extend_from_slice(&[9u8; 32]);
        body.extend_from_slice(&[8u8; 32]);
        let log = event(LogType::ContractInformation, 2, body);
        assert_eq!(log.subscription_key(), Some((5, 100_001)));
        assert_eq!(log.topics(), vec![[9u8; 32], [8u8; 32]]);
    }

    #[test]
    fn low_contract_log_type_not_subscribable() {
        let mut body = Vec::new();
        body.extend_from_slice(&5u32.to_le_bytes());
        body.extend_from_slice(&42u32.to_le_bytes());
        let log = event(LogType::ContractDebug, 3, body);
        assert_eq!(log.subscription_key(), None);
    }

    #[test]
    fn render_parse_round_trip_for_transfer() {
        let log = event(LogType::QuTransfer, 9, transfer_body(777));
        let json = log.to_json();
        assert_eq!(json["ok"], true);
        assert_eq!(json["logId"], 9);
        assert_eq!(json["body"]["amount"], 777);
        let from = json["body"]["from"].as_str().unwrap();
        assert_eq!(
            crate::identity::public_key_from_identity(from).unwrap(),
            [1u8; 32]
        );
    }

    #[test]
    fn custom_message_renders_value() {
        let log = event(LogType::CustomMessage, 4, 0xABCDu64.to_le_bytes().to_vec());
        assert_eq!(log.to_json()["body"]["customMessage"], 0xABCD);
    }
}
