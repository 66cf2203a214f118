//! WebSocket message types for the streaming endpoint.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::snapshot::SnapshotFields;
use crate::symbols::Symbol;

/// Server -> client messages on a stream connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamMessage {
    /// Full current state. First message on any subscription, re-sent on
    /// resync.
    Snapshot {
        symbol: Symbol,
        seq: u64,
        #[serde(with = "crate::timestamp::micros")]
        ts: DateTime<Utc>,
        fields: SnapshotFields,
    },
    /// Changed fields only.
    Delta {
        symbol: Symbol,
        seq: u64,
        #[serde(with = "crate::timestamp::micros")]
        ts: DateTime<Utc>,
        fields: SnapshotFields,
    },
    /// Liveness probe; carries the last sequence sent on the connection.
    Keepalive {
        symbol: Symbol,
        seq: u64,
        #[serde(with = "crate::timestamp::micros")]
        ts: DateTime<Utc>,
    },
}

impl StreamMessage {
    pub fn symbol(&self) -> &Symbol {
        match self {
            StreamMessage::Snapshot { symbol, .. }
            | StreamMessage::Delta { symbol, .. }
            | StreamMessage::Keepalive { symbol, .. } => symbol,
        }
    }

    pub fn seq(&self) -> u64 {
        match self {
            StreamMessage::Snapshot { seq, .. }
            | StreamMessage::Delta { seq, .. }
            | StreamMessage::Keepalive { seq, .. } => *seq,
        }
    }

    pub fn is_snapshot(&self) -> bool {
        matches!(self, StreamMessage::Snapshot { .. })
    }

    pub fn is_delta(&self) -> bool {
        matches!(self, StreamMessage::Delta { .. })
    }
}

/// Client -> server messages on a stream connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Acknowledge receipt up to `seq`. Optional; counts as liveness.
    Ack { seq: u64 },
    /// Liveness probe from the client.
    Ping,
    /// Orderly close; the server drains pending messages first.
    Close,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::SnapshotFields;
    use chrono::TimeZone;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    #[test]
    fn snapshot_wire_shape_matches_protocol() {
        let msg = StreamMessage::Snapshot {
            symbol: Symbol::from("NQZ25"),
            seq: 1,
            ts: Utc.with_ymd_and_hms(2025, 9, 10, 14, 0, 0).unwrap(),
            fields: SnapshotFields {
                last: Some(Decimal::from_str("23500.25").unwrap()),
                bid: Some(Decimal::from_str("23500.00").unwrap()),
                ask: Some(Decimal::from_str("23500.50").unwrap()),
                volume: Some(1),
                ..Default::default()
            },
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "snapshot");
        assert_eq!(json["symbol"], "NQZ25");
        assert_eq!(json["seq"], 1);
        assert_eq!(json["ts"], "2025-09-10T14:00:00.000000Z");
        assert_eq!(json["fields"]["last"], serde_json::json!(23500.25));
    }

    #[test]
    fn keepalive_has_no_fields_key() {
        let msg = StreamMessage::Keepalive {
            symbol: Symbol::from("NQZ25"),
            seq: 7,
            ts: Utc.with_ymd_and_hms(2025, 9, 10, 14, 0, 0).unwrap(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "keepalive");
        assert!(json.get("fields").is_none());
    }

    #[test]
    fn client_messages_round_trip() {
        let ack: ClientMessage = serde_json::from_str(r#"{"type":"ack","seq":3}"#).unwrap();
        assert_eq!(ack, ClientMessage::Ack { seq: 3 });
        let ping: ClientMessage = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(ping, ClientMessage::Ping);
        assert_eq!(
            serde_json::to_string(&ClientMessage::Close).unwrap(),
            r#"{"type":"close"}"#
        );
    }
}
