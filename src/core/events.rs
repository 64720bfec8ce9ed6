// Copyright 2022 ComposableFi
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::{
    core::{
        error::Error,
        packets::types::{AckWithMeta, Acknowledgement, Packet, PacketWithMeta},
    },
    primitives::Height,
};
use serde::{Deserialize, Serialize};

pub const SEND_PACKET: &str = "send_packet";
pub const RECV_PACKET: &str = "recv_packet";
pub const WRITE_ACK: &str = "write_acknowledgement";
pub const ACK_PACKET: &str = "acknowledge_packet";
pub const TIMEOUT_PACKET: &str = "timeout_packet";
pub const CREATE_CLIENT: &str = "create_client";
pub const UPDATE_CLIENT: &str = "update_client";
pub const CONNECTION_OPEN_INIT: &str = "connection_open_init";
pub const CONNECTION_OPEN_TRY: &str = "connection_open_try";
pub const CONNECTION_OPEN_ACK: &str = "connection_open_ack";
pub const CONNECTION_OPEN_CONFIRM: &str = "connection_open_confirm";
pub const CHANNEL_OPEN_INIT: &str = "channel_open_init";
pub const CHANNEL_OPEN_TRY: &str = "channel_open_try";
pub const CHANNEL_OPEN_ACK: &str = "channel_open_ack";
pub const CHANNEL_OPEN_CONFIRM: &str = "channel_open_confirm";

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct EventAttribute {
    pub key: String,
    pub value: String,
}

/// A raw chain event as indexed by the node: a kind plus ordered key/value attributes.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub kind: String,
    pub attributes: Vec<EventAttribute>,
}

impl Event {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            attributes: vec![],
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push(EventAttribute {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    /// Value of the last attribute named `key`.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .rev()
            .find(|attr| attr.key == key)
            .map(|attr| attr.value.as_str())
    }
}

/// An event together with the height of the block it was emitted in.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct IbcEventWithHeight {
    pub event: Event,
    pub height: u64,
}

/// Packet attributes recognised on `send_packet` and `write_acknowledgement` events.
/// Unknown keys are ignored and a repeated key overwrites the earlier value.
#[derive(Default)]
struct PacketAttributes<'a> {
    sequence: Option<&'a str>,
    src_port: Option<&'a str>,
    src_channel: Option<&'a str>,
    dst_port: Option<&'a str>,
    dst_channel: Option<&'a str>,
    data: Option<&'a str>,
    data_hex: Option<&'a str>,
    timeout_height: Option<&'a str>,
    timeout_timestamp: Option<&'a str>,
    ack: Option<&'a str>,
    ack_hex: Option<&'a str>,
}

impl<'a> PacketAttributes<'a> {
    fn decode(event: &'a Event) -> Self {
        let mut attrs = Self::default();
        for attr in &event.attributes {
            let value = Some(attr.value.as_str());
            match attr.key.as_str() {
                "packet_sequence" => attrs.sequence = value,
                "packet_src_port" => attrs.src_port = value,
                "packet_src_channel" => attrs.src_channel = value,
                "packet_dst_port" => attrs.dst_port = value,
                "packet_dst_channel" => attrs.dst_channel = value,
                "packet_data" => attrs.data = value,
                "packet_data_hex" => attrs.data_hex = value,
                "packet_timeout_height" => attrs.timeout_height = value,
                "packet_timeout_timestamp" => attrs.timeout_timestamp = value,
                "packet_ack" => attrs.ack = value,
                "packet_ack_hex" => attrs.ack_hex = value,
                _ => {}
            }
        }
        attrs
    }

    fn packet(&self, kind: &str) -> Result<Packet, Error> {
        let required = |value: Option<&str>, key: &str| {
            value
                .map(str::to_string)
                .ok_or_else(|| Error::Parse(format!("{} event is missing `{}`", kind, key)))
        };
        let sequence = self
            .sequence
            .ok_or_else(|| Error::Parse(format!("{} event is missing `packet_sequence`", kind)))?;
        let sequence = sequence.parse::<u64>().map_err(|e| {
            Error::Parse(format!("invalid packet_sequence `{}`: {}", sequence, e))
        })?;
        let timeout_timestamp = match self.timeout_timestamp {
            None => None,
            Some(ts) => match ts.parse::<u64>() {
                Ok(0) => None,
                Ok(ts) => Some(ts),
                Err(e) => {
                    return Err(Error::Parse(format!(
                        "invalid packet_timeout_timestamp `{}`: {}",
                        ts, e
                    )))
                }
            },
        };
        Ok(Packet {
            sequence,
            source_port: required(self.src_port, "packet_src_port")?,
            source_channel: required(self.src_channel, "packet_src_channel")?,
            destination_port: required(self.dst_port, "packet_dst_port")?,
            destination_channel: required(self.dst_channel, "packet_dst_channel")?,
            data: bytes_attribute(self.data, self.data_hex, "packet_data_hex")?,
            timeout_height: parse_height_attribute(self.timeout_height),
            timeout_timestamp,
        })
    }
}

/// Prefers the utf-8 attribute, falls back to the hex encoded one, and yields empty bytes when
/// neither is present.
fn bytes_attribute(utf8: Option<&str>, hex: Option<&str>, hex_key: &str) -> Result<Vec<u8>, Error> {
    match (utf8, hex) {
        (Some(value), _) => Ok(value.as_bytes().to_vec()),
        (None, Some(value)) => hex::decode(value)
            .map_err(|e| Error::Parse(format!("invalid {} `{}`: {}", hex_key, value, e))),
        (None, None) => Ok(vec![]),
    }
}

/// Parses a `"<revision_number>-<revision_height>"` timeout height attribute.
///
/// Returns `None` (no height timeout) if the attribute is absent, either part is missing or
/// empty, or the revision height is zero. Non numeric parts are read as zero, so a malformed
/// height silently means "no height timeout" rather than an error.
pub fn parse_height_attribute(attribute: Option<&str>) -> Option<Height> {
    let mut parts = attribute?.split('-');
    let revision_number = parts.next().filter(|part| !part.is_empty())?;
    let revision_height = parts.next().filter(|part| !part.is_empty())?;
    let revision_height = revision_height.parse::<u64>().unwrap_or(0);
    if revision_height == 0 {
        return None;
    }
    Some(Height::new(
        revision_number.parse::<u64>().unwrap_or(0),
        revision_height,
    ))
}

pub fn parse_packet(event: &Event) -> Result<Packet, Error> {
    if event.kind != SEND_PACKET {
        return Err(Error::Parse(format!(
            "cannot parse event of type {} as a packet",
            event.kind
        )));
    }
    PacketAttributes::decode(event).packet(SEND_PACKET)
}

pub fn parse_ack(event: &Event) -> Result<Acknowledgement, Error> {
    if event.kind != WRITE_ACK {
        return Err(Error::Parse(format!(
            "cannot parse event of type {} as an acknowledgement",
            event.kind
        )));
    }
    let attrs = PacketAttributes::decode(event);
    Ok(Acknowledgement {
        acknowledgement: bytes_attribute(attrs.ack, attrs.ack_hex, "packet_ack_hex")?,
        original_packet: attrs.packet(WRITE_ACK)?,
    })
}

pub fn parse_packets_from_events(events: &[Event]) -> Result<Vec<Packet>, Error> {
    events
        .iter()
        .filter(|event| event.kind == SEND_PACKET)
        .map(parse_packet)
        .collect()
}

pub fn parse_acks_from_events(events: &[Event]) -> Result<Vec<Acknowledgement>, Error> {
    events
        .iter()
        .filter(|event| event.kind == WRITE_ACK)
        .map(parse_ack)
        .collect()
}

pub fn parse_packets_with_height(
    events: &[IbcEventWithHeight],
) -> Result<Vec<PacketWithMeta>, Error> {
    events
        .iter()
        .filter(|ev| ev.event.kind == SEND_PACKET)
        .map(|ev| {
            Ok(PacketWithMeta {
                packet: parse_packet(&ev.event)?,
                height: ev.height,
            })
        })
        .collect()
}

pub fn parse_acks_with_height(events: &[IbcEventWithHeight]) -> Result<Vec<AckWithMeta>, Error> {
    events
        .iter()
        .filter(|ev| ev.event.kind == WRITE_ACK)
        .map(|ev| {
            Ok(AckWithMeta {
                ack: parse_ack(&ev.event)?,
                height: ev.height,
            })
        })
        .collect()
}

fn find_attribute(events: &[Event], kind: &str, key: &str) -> Result<String, Error> {
    events
        .iter()
        .filter(|event| event.kind == kind)
        .find_map(|event| event.attribute(key))
        .map(str::to_string)
        .ok_or_else(|| Error::Parse(format!("no {} event carrying `{}`", kind, key)))
}

/// Client id assigned by a `MsgCreateClient` transaction.
pub fn parse_client_id(events: &[Event]) -> Result<String, Error> {
    find_attribute(events, CREATE_CLIENT, "client_id")
}

/// Connection id assigned by a connection open init or try transaction.
pub fn parse_connection_id(events: &[Event], kind: &str) -> Result<String, Error> {
    find_attribute(events, kind, "connection_id")
}

/// Channel id assigned by a channel open init or try transaction.
pub fn parse_channel_id(events: &[Event], kind: &str) -> Result<String, Error> {
    find_attribute(events, kind, "channel_id")
}

/// Builds the `send_packet` (or `write_acknowledgement`) attribute list for `packet`, the
/// inverse of [`parse_packet`].
pub fn packet_event(kind: &str, packet: &Packet) -> Event {
    Event::new(kind)
        .with_attribute("packet_sequence", packet.sequence.to_string())
        .with_attribute("packet_src_port", packet.source_port.clone())
        .with_attribute("packet_src_channel", packet.source_channel.clone())
        .with_attribute("packet_dst_port", packet.destination_port.clone())
        .with_attribute("packet_dst_channel", packet.destination_channel.clone())
        .with_attribute("packet_data_hex", hex::encode(&packet.data))
        .with_attribute(
            "packet_timeout_height",
            packet.timeout_height.unwrap_or_default().to_string(),
        )
        .with_attribute(
            "packet_timeout_timestamp",
            packet.timeout_timestamp.unwrap_or(0).to_string(),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transfer_event(kind: &str) -> Event {
        Event::new(kind)
            .with_attribute("packet_sequence", "5")
            .with_attribute("packet_src_port", "transfer")
            .with_attribute("packet_src_channel", "channel-0")
            .with_attribute("packet_dst_port", "transfer")
            .with_attribute("packet_dst_channel", "channel-1")
            .with_attribute("packet_timeout_height", "0-100")
            .with_attribute("packet_timeout_timestamp", "0")
    }

    #[test]
    fn parses_send_packet_event() {
        let packet = parse_packet(&transfer_event(SEND_PACKET)).unwrap();
        assert_eq!(packet.sequence, 5);
        assert_eq!(packet.source_port, "transfer");
        assert_eq!(packet.source_channel, "channel-0");
        assert_eq!(packet.destination_port, "transfer");
        assert_eq!(packet.destination_channel, "channel-1");
        assert_eq!(packet.timeout_height, Some(Height::new(0, 100)));
        assert_eq!(packet.timeout_timestamp, None);
        assert!(packet.data.is_empty());
    }

    #[test]
    fn rejects_wrong_event_kind() {
        let err = parse_packet(&transfer_event("recv_packet")).unwrap_err();
        match err {
            Error::Parse(msg) => assert!(msg.contains("recv_packet"), "{}", msg),
            other => panic!("unexpected error {:?}", other),
        }
        let err = parse_ack(&transfer_event(SEND_PACKET)).unwrap_err();
        assert!(err.to_string().contains(SEND_PACKET));
    }

    #[test]
    fn zero_revision_height_means_no_timeout() {
        assert_eq!(parse_height_attribute(Some("5-0")), None);
        assert_eq!(parse_height_attribute(Some("0-0")), None);
        assert_eq!(parse_height_attribute(Some("3-")), None);
        assert_eq!(parse_height_attribute(Some("-3")), None);
        assert_eq!(parse_height_attribute(Some("12")), None);
        assert_eq!(parse_height_attribute(None), None);
        assert_eq!(parse_height_attribute(Some("x-7")), Some(Height::new(0, 7)));
        assert_eq!(parse_height_attribute(Some("1-y")), None);
        assert_eq!(parse_height_attribute(Some("2-17")), Some(Height::new(2, 17)));
    }

    #[test]
    fn last_duplicate_attribute_wins_and_unknown_keys_are_ignored() {
        let event = transfer_event(SEND_PACKET)
            .with_attribute("packet_sequence", "9")
            .with_attribute("packet_connection", "connection-0")
            .with_attribute("packet_data", "hello");
        let packet = parse_packet(&event).unwrap();
        assert_eq!(packet.sequence, 9);
        assert_eq!(packet.data, b"hello".to_vec());
    }

    #[test]
    fn falls_back_to_hex_data() {
        let event = transfer_event(SEND_PACKET).with_attribute("packet_data_hex", "cafe");
        assert_eq!(parse_packet(&event).unwrap().data, vec![0xca, 0xfe]);
        let bad = transfer_event(SEND_PACKET).with_attribute("packet_data_hex", "zz");
        assert!(matches!(parse_packet(&bad), Err(Error::Parse(_))));
    }

    #[test]
    fn missing_sequence_is_a_parse_error() {
        let event = Event::new(SEND_PACKET).with_attribute("packet_src_port", "transfer");
        assert!(matches!(parse_packet(&event), Err(Error::Parse(_))));
    }

    #[test]
    fn parses_ack_with_original_packet() {
        let event = transfer_event(WRITE_ACK).with_attribute("packet_ack", "{\"result\":\"AQ==\"}");
        let ack = parse_ack(&event).unwrap();
        assert_eq!(ack.acknowledgement, b"{\"result\":\"AQ==\"}".to_vec());
        assert_eq!(ack.original_packet.sequence, 5);
        assert!(ack.original_packet.data.is_empty());
    }

    #[test]
    fn filters_by_kind_and_keeps_order() {
        let events = vec![
            transfer_event(SEND_PACKET).with_attribute("packet_sequence", "1"),
            transfer_event(WRITE_ACK).with_attribute("packet_ack", "ok"),
            Event::new("message").with_attribute("module", "ibc_channel"),
            transfer_event(SEND_PACKET).with_attribute("packet_sequence", "2"),
            transfer_event(SEND_PACKET).with_attribute("packet_sequence", "1"),
        ];
        let seqs: Vec<u64> = parse_packets_from_events(&events)
            .unwrap()
            .into_iter()
            .map(|p| p.sequence)
            .collect();
        assert_eq!(seqs, vec![1, 2, 1]);
        assert_eq!(parse_acks_from_events(&events).unwrap().len(), 1);
    }

    #[test]
    fn packet_event_round_trips_through_the_parser() {
        let packet = Packet {
            sequence: 3,
            source_port: "transfer".into(),
            source_channel: "channel-2".into(),
            destination_port: "transfer".into(),
            destination_channel: "channel-7".into(),
            data: vec![1, 2, 3],
            timeout_height: None,
            timeout_timestamp: Some(42),
        };
        assert_eq!(parse_packet(&packet_event(SEND_PACKET, &packet)).unwrap(), packet);
    }

    #[test]
    fn extracts_assigned_identifiers() {
        let events = vec![
            Event::new("message").with_attribute("action", "create_client"),
            Event::new(CREATE_CLIENT).with_attribute("client_id", "07-tendermint-3"),
        ];
        assert_eq!(parse_client_id(&events).unwrap(), "07-tendermint-3");
        assert!(parse_connection_id(&events, CONNECTION_OPEN_INIT).is_err());
    }
}
