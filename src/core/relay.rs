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
        events::{
            parse_acks_from_events, parse_acks_with_height, parse_packets_with_height,
            ACK_PACKET, RECV_PACKET, TIMEOUT_PACKET,
        },
        handshake::query_proof_at,
        link::{prepare_proofs, Endpoint, Link, Side},
        msgs::IbcMsg,
        packets::{
            types::{AckWithMeta, Acknowledgement, PacketWithMeta},
            utils::{get_key_path, split_pending_packets, KeyPathType, SplitPackets},
        },
        queue::flush_message_batch,
        types::{ChannelEnd, Order},
    },
    primitives::{funcs::time_to_seconds, Chain},
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Summary of one relay pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RelayInfo {
    /// Packets sent from A that were received on B or timed out on A
    pub packets_from_a: usize,
    /// Packets sent from B that were received on A or timed out on B
    pub packets_from_b: usize,
    /// Acknowledgements written on A for packets from B
    pub acks_from_a: Vec<Acknowledgement>,
    /// Acknowledgements written on B for packets from A
    pub acks_from_b: Vec<Acknowledgement>,
}

/// Last block heights scanned on each side, so a following pass only scans newer blocks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayedHeights {
    pub packet_height_a: Option<u64>,
    pub packet_height_b: Option<u64>,
    pub ack_height_a: Option<u64>,
    pub ack_height_b: Option<u64>,
}

type ChannelKey = (String, String);

/// Caches channel ends of `end` while scanning events.
struct ChannelCache<'a, C> {
    end: &'a Endpoint<C>,
    channels: HashMap<ChannelKey, Option<ChannelEnd>>,
}

impl<'a, C: Chain> ChannelCache<'a, C> {
    fn new(end: &'a Endpoint<C>) -> Self {
        Self {
            end,
            channels: HashMap::new(),
        }
    }

    async fn get(&mut self, port_id: &str, channel_id: &str) -> Result<Option<&ChannelEnd>, Error> {
        let key = (port_id.to_string(), channel_id.to_string());
        if !self.channels.contains_key(&key) {
            let channel = self.end.chain.query_channel_end(port_id, channel_id).await?;
            self.channels.insert(key.clone(), channel);
        }
        Ok(self.channels.get(&key).and_then(Option::as_ref))
    }

    /// Returns true if the channel runs over the endpoint's connection.
    async fn is_ours(&mut self, port_id: &str, channel_id: &str) -> Result<bool, Error> {
        let connection_id = self.end.connection_id.clone();
        Ok(self
            .get(port_id, channel_id)
            .await?
            .map_or(false, |channel| channel.connection_hops.first() == Some(&connection_id)))
    }

    async fn is_open(&mut self, port_id: &str, channel_id: &str) -> Result<bool, Error> {
        Ok(self
            .get(port_id, channel_id)
            .await?
            .map_or(false, |channel| channel.state.is_open()))
    }
}

fn block_range(end_height: u64, min_height: Option<u64>) -> Option<(u64, u64)> {
    let start = min_height.unwrap_or(1).max(1);
    (start <= end_height).then_some((start, end_height))
}

/// Packets sent from `src` over the link's connection since `min_height` that are still
/// committed on `src` and not yet received on `dest`.
pub async fn pending_packets<S: Chain, D: Chain>(
    src: &Endpoint<S>,
    dest: &Endpoint<D>,
    min_height: Option<u64>,
) -> Result<Vec<PacketWithMeta>, Error> {
    let latest = src.latest_height().await?.revision_height;
    let (from, to) = match block_range(latest, min_height) {
        Some(range) => range,
        None => return Ok(vec![]),
    };
    let events = src.chain.query_events_in_block_range(from, to).await?;

    let mut channels = ChannelCache::new(src);
    let mut packets = vec![];
    for meta in parse_packets_with_height(&events)? {
        let p = &meta.packet;
        // a closed source channel accepts neither acks nor timeouts
        if channels.is_ours(&p.source_port, &p.source_channel).await?
            && channels.is_open(&p.source_port, &p.source_channel).await?
        {
            packets.push(meta);
        }
    }

    let mut by_channel: BTreeMap<(String, String, String, String), Vec<u64>> = BTreeMap::new();
    for meta in &packets {
        let p = &meta.packet;
        by_channel
            .entry((
                p.source_port.clone(),
                p.source_channel.clone(),
                p.destination_port.clone(),
                p.destination_channel.clone(),
            ))
            .or_default()
            .push(p.sequence);
    }

    let mut pending = HashSet::new();
    for ((src_port, src_channel, dest_port, dest_channel), seqs) in by_channel {
        let (committed, unreceived) = futures::try_join!(
            src.chain
                .query_unreceived_acknowledgements(&src_port, &src_channel, seqs.clone()),
            dest.chain
                .query_unreceived_packets(&dest_port, &dest_channel, seqs)
        )?;
        let committed = committed.into_iter().collect::<HashSet<_>>();
        for seq in unreceived.into_iter().filter(|seq| committed.contains(seq)) {
            pending.insert((src_port.clone(), src_channel.clone(), seq));
        }
    }

    packets.retain(|meta| {
        let p = &meta.packet;
        pending.contains(&(p.source_port.clone(), p.source_channel.clone(), p.sequence))
    });
    Ok(packets)
}

/// Acknowledgements written on `src` since `min_height` for packets sent from `dest`, which
/// `dest` has not processed yet.
pub async fn pending_acks<S: Chain, D: Chain>(
    src: &Endpoint<S>,
    dest: &Endpoint<D>,
    min_height: Option<u64>,
) -> Result<Vec<AckWithMeta>, Error> {
    let latest = src.latest_height().await?.revision_height;
    let (from, to) = match block_range(latest, min_height) {
        Some(range) => range,
        None => return Ok(vec![]),
    };
    let events = src.chain.query_events_in_block_range(from, to).await?;

    let mut channels = ChannelCache::new(src);
    let mut acks = vec![];
    for meta in parse_acks_with_height(&events)? {
        let p = &meta.ack.original_packet;
        if channels
            .is_ours(&p.destination_port, &p.destination_channel)
            .await?
        {
            acks.push(meta);
        }
    }

    let mut by_channel: BTreeMap<ChannelKey, Vec<u64>> = BTreeMap::new();
    for meta in &acks {
        let p = &meta.ack.original_packet;
        by_channel
            .entry((p.source_port.clone(), p.source_channel.clone()))
            .or_default()
            .push(p.sequence);
    }

    let mut pending = HashSet::new();
    for ((port_id, channel_id), seqs) in by_channel {
        for seq in dest
            .chain
            .query_unreceived_acknowledgements(&port_id, &channel_id, seqs)
            .await?
        {
            pending.insert((port_id.clone(), channel_id.clone(), seq));
        }
    }

    acks.retain(|meta| {
        let p = &meta.ack.original_packet;
        pending.contains(&(p.source_port.clone(), p.source_channel.clone(), p.sequence))
    });
    Ok(acks)
}

/// Delivers `packets` sent from `src` to `dest` and returns the acknowledgements `dest` wrote
/// while receiving them.
pub async fn relay_packets_to<S: Chain, D: Chain>(
    src: &Endpoint<S>,
    dest: &Endpoint<D>,
    packets: Vec<PacketWithMeta>,
) -> Result<Vec<AckWithMeta>, Error> {
    if packets.is_empty() {
        return Ok(vec![]);
    }
    let (proof_height, query_height) = prepare_proofs(src, dest).await?;

    let mut msgs = Vec::with_capacity(packets.len());
    for meta in packets {
        let path = get_key_path(KeyPathType::CommitmentPath, &meta.packet);
        let proof_commitment = query_proof_at(&src.chain, query_height, path).await?;
        msgs.push(IbcMsg::RecvPacket {
            packet: meta.packet,
            proof_commitment,
            proof_height,
            signer: dest.chain.account_id(),
        });
    }
    log::info!(target: "ibc-link", "🧾 {} packets to be received on {}", msgs.len(), dest.chain.name());

    let mut acks = vec![];
    for response in flush_message_batch(msgs, &dest.chain, RECV_PACKET).await? {
        for ack in parse_acks_from_events(&response.events)? {
            acks.push(AckWithMeta {
                ack,
                height: response.height,
            });
        }
    }
    Ok(acks)
}

/// Delivers acknowledgements written on `src` back to `dest`, where the packets originated.
pub async fn relay_acks_to<S: Chain, D: Chain>(
    src: &Endpoint<S>,
    dest: &Endpoint<D>,
    acks: Vec<AckWithMeta>,
) -> Result<usize, Error> {
    if acks.is_empty() {
        return Ok(0);
    }
    let (proof_height, query_height) = prepare_proofs(src, dest).await?;

    let mut msgs = Vec::with_capacity(acks.len());
    for meta in acks {
        let path = get_key_path(KeyPathType::AcksPath, &meta.ack.original_packet);
        let proof_acked = query_proof_at(&src.chain, query_height, path).await?;
        msgs.push(IbcMsg::Acknowledgement {
            packet: meta.ack.original_packet,
            acknowledgement: meta.ack.acknowledgement,
            proof_acked,
            proof_height,
            signer: dest.chain.account_id(),
        });
    }
    let count = msgs.len();
    log::info!(target: "ibc-link", "🧾 {} acknowledgements to be sent to {}", count, dest.chain.name());
    flush_message_batch(msgs, &dest.chain, ACK_PACKET).await?;
    Ok(count)
}

/// Times out `packets` sent from `src` that can no longer be received on `dest`, proving
/// their absence on `dest`.
pub async fn timeout_packets_on<S: Chain, D: Chain>(
    src: &Endpoint<S>,
    dest: &Endpoint<D>,
    packets: Vec<PacketWithMeta>,
) -> Result<usize, Error> {
    if packets.is_empty() {
        return Ok(0);
    }
    let (proof_height, query_height) = prepare_proofs(dest, src).await?;

    let mut channels = ChannelCache::new(dest);
    let mut msgs = Vec::with_capacity(packets.len());
    for meta in packets {
        let packet = meta.packet;
        let ordering = channels
            .get(&packet.destination_port, &packet.destination_channel)
            .await?
            .map(|channel| channel.ordering)
            .ok_or_else(|| {
                Error::not_found(
                    dest.chain_id(),
                    format!(
                        "channel {}/{}",
                        packet.destination_port, packet.destination_channel
                    ),
                )
            })?;
        let path = match ordering {
            Order::Ordered => get_key_path(KeyPathType::SeqRecv, &packet),
            Order::Unordered => get_key_path(KeyPathType::ReceiptPath, &packet),
        };
        let (proof_unreceived, next_sequence_recv) = futures::try_join!(
            query_proof_at(&dest.chain, query_height, path),
            dest.chain
                .query_next_sequence_recv(&packet.destination_port, &packet.destination_channel)
        )?;
        msgs.push(IbcMsg::Timeout {
            packet,
            next_sequence_recv,
            proof_unreceived,
            proof_height,
            signer: src.chain.account_id(),
        });
    }
    let count = msgs.len();
    log::info!(target: "ibc-link", "🧾 {} timeouts to be sent to {}", count, src.chain.name());
    flush_message_batch(msgs, &src.chain, TIMEOUT_PACKET).await?;
    Ok(count)
}

/// A timeout on an ordered channel closes it, so nothing after the first timed out sequence
/// can be received anymore. Removes those packets from `to_submit`.
async fn drop_after_ordered_timeouts<C: Chain>(
    src: &Endpoint<C>,
    split: &mut SplitPackets,
) -> Result<(), Error> {
    let mut channels = ChannelCache::new(src);
    let mut first_timeout: HashMap<ChannelKey, u64> = HashMap::new();
    for meta in &split.to_timeout {
        let p = &meta.packet;
        let ordered = channels
            .get(&p.source_port, &p.source_channel)
            .await?
            .map_or(false, |channel| channel.ordering == Order::Ordered);
        if ordered {
            let sequence = first_timeout
                .entry((p.source_port.clone(), p.source_channel.clone()))
                .or_insert(p.sequence);
            *sequence = (*sequence).min(p.sequence);
        }
    }
    if first_timeout.is_empty() {
        return Ok(());
    }

    let before = split.to_submit.len();
    split.to_submit.retain(|meta| {
        let p = &meta.packet;
        first_timeout
            .get(&(p.source_port.clone(), p.source_channel.clone()))
            .map_or(true, |sequence| p.sequence < *sequence)
    });
    let dropped = before - split.to_submit.len();
    if dropped > 0 {
        log::info!(
            target: "ibc-link",
            "🧾 Skipping {} packets on {} queued behind an ordered timeout",
            dropped,
            src.chain.name()
        );
    }
    Ok(())
}

impl<A: Chain, B: Chain> Link<A, B> {
    /// Packets sent from `source` that still have to be received or timed out.
    pub async fn get_pending_packets(
        &self,
        source: Side,
        min_height: Option<u64>,
    ) -> Result<Vec<PacketWithMeta>, Error> {
        match source {
            Side::A => pending_packets(&self.end_a, &self.end_b, min_height).await,
            Side::B => pending_packets(&self.end_b, &self.end_a, min_height).await,
        }
    }

    /// Acknowledgements written on `source` that still have to be relayed back.
    pub async fn get_pending_acks(
        &self,
        source: Side,
        min_height: Option<u64>,
    ) -> Result<Vec<AckWithMeta>, Error> {
        match source {
            Side::A => pending_acks(&self.end_a, &self.end_b, min_height).await,
            Side::B => pending_acks(&self.end_b, &self.end_a, min_height).await,
        }
    }

    /// Receives packets sent from `source` on the other chain.
    pub async fn relay_packets(
        &mut self,
        source: Side,
        packets: Vec<PacketWithMeta>,
    ) -> Result<Vec<AckWithMeta>, Error> {
        match source {
            Side::A => relay_packets_to(&self.end_a, &self.end_b, packets).await,
            Side::B => relay_packets_to(&self.end_b, &self.end_a, packets).await,
        }
    }

    /// Relays acknowledgements written on `source` to the other chain.
    pub async fn relay_acks(
        &mut self,
        source: Side,
        acks: Vec<AckWithMeta>,
    ) -> Result<usize, Error> {
        match source {
            Side::A => relay_acks_to(&self.end_a, &self.end_b, acks).await,
            Side::B => relay_acks_to(&self.end_b, &self.end_a, acks).await,
        }
    }

    /// Times out packets sent from `source` on `source`.
    pub async fn timeout_packets(
        &mut self,
        source: Side,
        packets: Vec<PacketWithMeta>,
    ) -> Result<usize, Error> {
        match source {
            Side::A => timeout_packets_on(&self.end_a, &self.end_b, packets).await,
            Side::B => timeout_packets_on(&self.end_b, &self.end_a, packets).await,
        }
    }

    /// Relays everything pending on the link, scanning all blocks of both chains.
    pub async fn relay_all(&mut self) -> Result<RelayInfo, Error> {
        let (_, info) = self.do_check_and_relay(RelayedHeights::default()).await?;
        Ok(info)
    }

    /// One relay pass over the blocks after `relay_from`. Returns the heights to resume from.
    pub async fn check_and_relay_packets_and_acks(
        &mut self,
        relay_from: RelayedHeights,
    ) -> Result<RelayedHeights, Error> {
        let (heights, _) = self.do_check_and_relay(relay_from).await?;
        Ok(heights)
    }

    async fn do_check_and_relay(
        &mut self,
        relay_from: RelayedHeights,
    ) -> Result<(RelayedHeights, RelayInfo), Error> {
        let ((height_a, time_a), (height_b, time_b)) = futures::try_join!(
            self.end_a.chain.latest_height_and_timestamp(),
            self.end_b.chain.latest_height_and_timestamp()
        )?;
        let next = |height: Option<u64>| height.map(|h| h + 1);

        let (packets_a, packets_b) = futures::try_join!(
            self.get_pending_packets(Side::A, next(relay_from.packet_height_a)),
            self.get_pending_packets(Side::B, next(relay_from.packet_height_b))
        )?;
        let mut split_a = split_pending_packets(&height_b, time_to_seconds(time_b), packets_a);
        let mut split_b = split_pending_packets(&height_a, time_to_seconds(time_a), packets_b);
        drop_after_ordered_timeouts(&self.end_a, &mut split_a).await?;
        drop_after_ordered_timeouts(&self.end_b, &mut split_b).await?;
        let packets_from_a = split_a.to_submit.len() + split_a.to_timeout.len();
        let packets_from_b = split_b.to_submit.len() + split_b.to_timeout.len();
        log::info!(
            target: "ibc-link",
            "🧾 Pending packets: {} from {}, {} from {}",
            packets_from_a,
            self.end_a.chain.name(),
            packets_from_b,
            self.end_b.chain.name()
        );

        self.relay_packets(Side::A, split_a.to_submit).await?;
        self.relay_packets(Side::B, split_b.to_submit).await?;

        // acks written above are picked up here as well
        let (acks_a, acks_b) = futures::try_join!(
            self.get_pending_acks(Side::A, next(relay_from.ack_height_a)),
            self.get_pending_acks(Side::B, next(relay_from.ack_height_b))
        )?;
        let acks_from_a = acks_a.iter().map(|meta| meta.ack.clone()).collect();
        let acks_from_b = acks_b.iter().map(|meta| meta.ack.clone()).collect();
        self.relay_acks(Side::A, acks_a).await?;
        self.relay_acks(Side::B, acks_b).await?;

        self.timeout_packets(Side::A, split_a.to_timeout).await?;
        self.timeout_packets(Side::B, split_b.to_timeout).await?;

        let heights = RelayedHeights {
            packet_height_a: Some(height_a.revision_height),
            packet_height_b: Some(height_b.revision_height),
            ack_height_a: Some(height_a.revision_height),
            ack_height_b: Some(height_b.revision_height),
        };
        let info = RelayInfo {
            packets_from_a,
            packets_from_b,
            acks_from_a,
            acks_from_b,
        };
        Ok((heights, info))
    }
}
