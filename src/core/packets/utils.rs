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

use super::types::{Packet, PacketWithMeta};
use crate::primitives::{
    funcs::{height_greater, time_greater},
    Height,
};

/// Pending packets partitioned against the destination chain's current height and time.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SplitPackets {
    /// Packets that can still be received on the destination
    pub to_submit: Vec<PacketWithMeta>,
    /// Packets whose height or timestamp timeout has passed
    pub to_timeout: Vec<PacketWithMeta>,
}

/// A packet stays submittable while both its height and timestamp timeouts lie strictly in
/// the future of the destination. Order is preserved in both halves.
pub fn split_pending_packets(
    current_height: &Height,
    current_time_sec: u64,
    packets: Vec<PacketWithMeta>,
) -> SplitPackets {
    let (to_submit, to_timeout) = packets.into_iter().partition(|meta| {
        height_greater(meta.packet.timeout_height.as_ref(), current_height)
            && time_greater(meta.packet.timeout_timestamp, current_time_sec)
    });
    SplitPackets {
        to_submit,
        to_timeout,
    }
}

pub enum KeyPathType {
    SeqRecv,
    ReceiptPath,
    CommitmentPath,
    AcksPath,
}

/// Store path of the packet's state. Commitments are keyed by the source end, everything
/// else by the destination end.
pub fn get_key_path(key_path_type: KeyPathType, packet: &Packet) -> String {
    match key_path_type {
        KeyPathType::SeqRecv => {
            next_sequence_recv_path(&packet.destination_port, &packet.destination_channel)
        }
        KeyPathType::ReceiptPath => format!(
            "receipts/ports/{}/channels/{}/sequences/{}",
            packet.destination_port, packet.destination_channel, packet.sequence
        ),
        KeyPathType::CommitmentPath => format!(
            "commitments/ports/{}/channels/{}/sequences/{}",
            packet.source_port, packet.source_channel, packet.sequence
        ),
        KeyPathType::AcksPath => format!(
            "acks/ports/{}/channels/{}/sequences/{}",
            packet.destination_port, packet.destination_channel, packet.sequence
        ),
    }
}

pub fn next_sequence_recv_path(port_id: &str, channel_id: &str) -> String {
    format!("nextSequenceRecv/ports/{}/channels/{}", port_id, channel_id)
}

pub fn channel_path(port_id: &str, channel_id: &str) -> String {
    format!("channelEnds/ports/{}/channels/{}", port_id, channel_id)
}

pub fn connection_path(connection_id: &str) -> String {
    format!("connections/{}", connection_id)
}

pub fn client_state_path(client_id: &str) -> String {
    format!("clients/{}/clientState", client_id)
}

pub fn consensus_state_path(client_id: &str, height: &Height) -> String {
    format!(
        "clients/{}/consensusStates/{}-{}",
        client_id, height.revision_number, height.revision_height
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(
        sequence: u64,
        timeout_height: Option<Height>,
        timeout_timestamp: Option<u64>,
    ) -> PacketWithMeta {
        PacketWithMeta {
            packet: Packet {
                sequence,
                source_port: "transfer".into(),
                source_channel: "channel-0".into(),
                destination_port: "transfer".into(),
                destination_channel: "channel-1".into(),
                data: vec![],
                timeout_height,
                timeout_timestamp,
            },
            height: 10,
        }
    }

    fn sequences(packets: &[PacketWithMeta]) -> Vec<u64> {
        packets.iter().map(|p| p.packet.sequence).collect()
    }

    #[test]
    fn packets_without_timeouts_are_always_submitted() {
        let split = split_pending_packets(
            &Height::new(u64::MAX, u64::MAX),
            u64::MAX,
            vec![packet(1, None, None), packet(2, Some(Height::zero()), Some(0))],
        );
        assert_eq!(sequences(&split.to_submit), vec![1, 2]);
        assert!(split.to_timeout.is_empty());
    }

    #[test]
    fn splits_on_height_and_time() {
        let now = 1_000;
        let packets = vec![
            packet(1, Some(Height::new(1, 51)), None),
            packet(2, Some(Height::new(1, 50)), None),
            packet(3, None, Some(1_001 * 1_000_000_000)),
            packet(4, None, Some(1_000 * 1_000_000_000)),
            packet(5, Some(Height::new(1, 100)), Some(1)),
            packet(6, Some(Height::new(2, 1)), None),
        ];
        let split = split_pending_packets(&Height::new(1, 50), now, packets);
        assert_eq!(sequences(&split.to_submit), vec![1, 3, 6]);
        assert_eq!(sequences(&split.to_timeout), vec![2, 4, 5]);
    }

    #[test]
    fn key_paths_follow_store_layout() {
        let meta = packet(7, None, None);
        assert_eq!(
            get_key_path(KeyPathType::CommitmentPath, &meta.packet),
            "commitments/ports/transfer/channels/channel-0/sequences/7"
        );
        assert_eq!(
            get_key_path(KeyPathType::AcksPath, &meta.packet),
            "acks/ports/transfer/channels/channel-1/sequences/7"
        );
        assert_eq!(
            get_key_path(KeyPathType::ReceiptPath, &meta.packet),
            "receipts/ports/transfer/channels/channel-1/sequences/7"
        );
        assert_eq!(
            get_key_path(KeyPathType::SeqRecv, &meta.packet),
            "nextSequenceRecv/ports/transfer/channels/channel-1"
        );
        assert_eq!(
            consensus_state_path("07-tendermint-0", &Height::new(1, 12)),
            "clients/07-tendermint-0/consensusStates/1-12"
        );
    }
}
