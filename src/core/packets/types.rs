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

use crate::primitives::Height;
use ibc_proto::ibc::core::channel::v1::Packet as RawPacket;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    /// Packet sequence
    pub sequence: u64,
    /// Source port
    pub source_port: String,
    /// Source channel
    pub source_channel: String,
    /// Destination port
    pub destination_port: String,
    /// Destination channel
    pub destination_channel: String,
    /// Opaque packet data
    pub data: Vec<u8>,
    /// Timeout height, `None` when no height timeout is set
    pub timeout_height: Option<Height>,
    /// Timeout timestamp in nanoseconds, `None` when no timestamp timeout is set
    pub timeout_timestamp: Option<u64>,
}

impl From<Packet> for RawPacket {
    fn from(packet: Packet) -> Self {
        RawPacket {
            sequence: packet.sequence,
            source_port: packet.source_port,
            source_channel: packet.source_channel,
            destination_port: packet.destination_port,
            destination_channel: packet.destination_channel,
            data: packet.data,
            timeout_height: Some(packet.timeout_height.unwrap_or_default().into()),
            timeout_timestamp: packet.timeout_timestamp.unwrap_or(0),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Acknowledgement {
    /// Acknowledgement bytes written by the receiving chain
    pub acknowledgement: Vec<u8>,
    /// The packet this acknowledgement answers
    pub original_packet: Packet,
}

/// A packet together with the height of the block that emitted its `send_packet` event.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct PacketWithMeta {
    pub packet: Packet,
    pub height: u64,
}

/// An acknowledgement together with the height of the block that emitted it.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct AckWithMeta {
    pub ack: Acknowledgement,
    pub height: u64,
}
