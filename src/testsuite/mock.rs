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

//! An in-memory chain running a minimal IBC module, used to drive a [`crate::core::link::Link`]
//! end to end without nodes.
//!
//! Every transaction produces one block, `wait_one_block` produces an empty one. The set of
//! provable store paths is kept for every height, so proofs can be checked for membership at
//! the height they were queried at. A proof is the text `chain_id|height|path|present`: it is
//! accepted by the counterparty if the client it is verified with tracks `chain_id`, holds a
//! consensus state at `height + 1` (the proof height) and the path matches the expected one.

use crate::{
    core::{
        client::{build_consensus_state, ClientState, ConsensusState, Header},
        config::ChainConfig,
        error::Error,
        events::{self, packet_event, Event, IbcEventWithHeight},
        msgs::IbcMsg,
        packets::{
            types::Packet,
            utils::{
                channel_path, client_state_path, connection_path, consensus_state_path,
                get_key_path, next_sequence_recv_path, KeyPathType,
            },
        },
        types::{ChannelEnd, ConnectionCounterparty, ConnectionEnd, Order, State},
    },
    primitives::{
        funcs::{parse_revision_number, time_to_nanos},
        Chain, Height, IbcProvider, KeyProvider, TestProvider, TxResponse,
    },
};
use ibc_proto::google::protobuf::Any;
use std::{
    collections::{hash_map::DefaultHasher, BTreeMap, BTreeSet},
    hash::{Hash, Hasher},
    sync::Arc,
    time::Duration,
};
use tendermint::Time;
use tokio::sync::Mutex;

const GENESIS_TIME: i64 = 1_700_000_000;
const UNBONDING_PERIOD: Duration = Duration::from_secs(21 * 24 * 3600);
const TENDERMINT_HEADER_TYPE_URL: &str = "/ibc.lightclients.tendermint.v1.Header";
/// Acknowledgement written by the mock application for every received packet
pub const SUCCESS_ACK: &[u8] = br#"{"result":"AQ=="}"#;

const CODE_INSUFFICIENT_FEE: u32 = 13;
const CODE_IBC_FAILURE: u32 = 1;

#[derive(Clone, Debug)]
struct ClientRecord {
    client_state: ClientState,
    consensus_states: BTreeMap<Height, ConsensusState>,
}

type ChannelKey = (String, String);
type PacketKey = (String, String, u64);

#[derive(Clone, Debug, Default)]
struct IbcStore {
    clients: BTreeMap<String, ClientRecord>,
    connections: BTreeMap<String, ConnectionEnd>,
    channels: BTreeMap<ChannelKey, ChannelEnd>,
    next_sequence_send: BTreeMap<ChannelKey, u64>,
    next_sequence_recv: BTreeMap<ChannelKey, u64>,
    commitments: BTreeMap<PacketKey, Vec<u8>>,
    receipts: BTreeSet<PacketKey>,
    acks: BTreeMap<PacketKey, Vec<u8>>,
    /// Every path a proof can be produced for
    paths: BTreeSet<String>,
}

#[derive(Clone, Debug)]
struct MockState {
    chain_id: String,
    revision_number: u64,
    block_secs: i64,
    min_gas_price: f64,
    height: u64,
    headers: BTreeMap<u64, Header>,
    events: BTreeMap<u64, Vec<Event>>,
    history: BTreeMap<u64, BTreeSet<String>>,
    tx_count: u64,
    store: IbcStore,
}

/// An in-memory chain. Clones share the same state.
#[derive(Clone)]
pub struct MockChain {
    config: ChainConfig,
    state: Arc<Mutex<MockState>>,
}

impl MockChain {
    /// Starts a chain at height 1 whose nodes accept any gas price.
    pub fn new(config: ChainConfig) -> Result<Self, Error> {
        Self::with_min_gas_price(config, 0.0)
    }

    /// Starts a chain at height 1 whose nodes reject transactions paying less than
    /// `min_gas_price` per unit of gas.
    pub fn with_min_gas_price(config: ChainConfig, min_gas_price: f64) -> Result<Self, Error> {
        let mut state = MockState {
            chain_id: config.chain_id.clone(),
            revision_number: parse_revision_number(&config.chain_id),
            block_secs: config.block_time.as_secs().max(1) as i64,
            min_gas_price,
            height: 0,
            headers: BTreeMap::new(),
            events: BTreeMap::new(),
            history: BTreeMap::new(),
            tx_count: 0,
            store: IbcStore::default(),
        };
        state.produce_block(vec![])?;
        Ok(Self {
            config,
            state: Arc::new(Mutex::new(state)),
        })
    }

    pub async fn connection_count(&self) -> usize {
        self.state.lock().await.store.connections.len()
    }

    pub async fn client_count(&self) -> usize {
        self.state.lock().await.store.clients.len()
    }

    pub async fn has_commitment(&self, port_id: &str, channel_id: &str, sequence: u64) -> bool {
        let key = (port_id.to_string(), channel_id.to_string(), sequence);
        self.state.lock().await.store.commitments.contains_key(&key)
    }

    pub async fn has_receipt(&self, port_id: &str, channel_id: &str, sequence: u64) -> bool {
        let key = (port_id.to_string(), channel_id.to_string(), sequence);
        self.state.lock().await.store.receipts.contains(&key)
    }
}

fn channel_key(port_id: &str, channel_id: &str) -> ChannelKey {
    (port_id.to_string(), channel_id.to_string())
}

fn packet_key(port_id: &str, channel_id: &str, sequence: u64) -> PacketKey {
    (port_id.to_string(), channel_id.to_string(), sequence)
}

impl MockState {
    fn height_at(&self, revision_height: u64) -> Height {
        Height::new(self.revision_number, revision_height)
    }

    fn time_at(&self, revision_height: u64) -> Result<Time, Error> {
        Time::from_unix_timestamp(GENESIS_TIME + self.block_secs * revision_height as i64, 0)
            .map_err(|e| Error::Custom(format!("invalid block time: {}", e)))
    }

    fn header_at(&self, revision_height: u64) -> Result<Header, Error> {
        Ok(Header {
            chain_id: self.chain_id.clone(),
            height: self.height_at(revision_height),
            time: self.time_at(revision_height)?,
            app_hash: format!("{}/app/{}", self.chain_id, revision_height).into_bytes(),
            next_validators_hash: format!("{}/validators", self.chain_id).into_bytes(),
            client_message: Some(Any {
                type_url: TENDERMINT_HEADER_TYPE_URL.to_string(),
                value: format!("{}:{}", self.chain_id, revision_height).into_bytes(),
            }),
        })
    }

    fn produce_block(&mut self, events: Vec<Event>) -> Result<(), Error> {
        self.height += 1;
        let header = self.header_at(self.height)?;
        self.headers.insert(self.height, header);
        self.events.insert(self.height, events);
        self.history.insert(self.height, self.store.paths.clone());
        Ok(())
    }

    fn proof(&self, at: Height, path: &str) -> Result<Vec<u8>, Error> {
        let paths = self.history.get(&at.revision_height).ok_or_else(|| {
            Error::Custom(format!("{} has no state at height {}", self.chain_id, at))
        })?;
        let present = paths.contains(path);
        Ok(format!(
            "{}|{}|{}|{}",
            self.chain_id,
            at.revision_height,
            path,
            if present { 1 } else { 0 }
        )
        .into_bytes())
    }

    /// Checks `proof` of `path` against the consensus state of `client_id` at `proof_height`.
    fn verify(
        &self,
        client_id: &str,
        proof: &[u8],
        proof_height: Height,
        path: &str,
        present: bool,
    ) -> Result<(), String> {
        let client = self
            .store
            .clients
            .get(client_id)
            .ok_or_else(|| format!("client {} not found", client_id))?;
        if !client.consensus_states.contains_key(&proof_height) {
            return Err(format!(
                "client {} has no consensus state at proof height {}",
                client_id, proof_height
            ));
        }
        let proof = String::from_utf8_lossy(proof);
        let parts = proof.splitn(4, '|').collect::<Vec<_>>();
        let (chain_id, height, proven_path, proven_present) = match parts.as_slice() {
            [chain_id, height, path, present] => (*chain_id, *height, *path, *present),
            _ => return Err(format!("malformed proof `{}`", proof)),
        };
        if chain_id != client.client_state.chain_id {
            return Err(format!(
                "proof from {} verified with client of {}",
                chain_id, client.client_state.chain_id
            ));
        }
        let height = height
            .parse::<u64>()
            .map_err(|e| format!("malformed proof height: {}", e))?;
        if height + 1 != proof_height.revision_height {
            return Err(format!(
                "proof queried at {} does not match proof height {}",
                height, proof_height
            ));
        }
        if proven_path != path {
            return Err(format!("proof of {} where {} was expected", proven_path, path));
        }
        if (proven_present == "1") != present {
            let kind = if present { "membership" } else { "non-membership" };
            return Err(format!("{} proof failed for {}", kind, path));
        }
        Ok(())
    }

    fn connection_client(&self, connection_id: &str) -> Result<(String, ConnectionEnd), String> {
        let connection = self
            .store
            .connections
            .get(connection_id)
            .cloned()
            .ok_or_else(|| format!("connection {} not found", connection_id))?;
        Ok((connection.client_id.clone(), connection))
    }

    fn channel(&self, port_id: &str, channel_id: &str) -> Result<ChannelEnd, String> {
        self.store
            .channels
            .get(&channel_key(port_id, channel_id))
            .cloned()
            .ok_or_else(|| format!("channel {}/{} not found", port_id, channel_id))
    }

    /// Client backing the connection of an open channel.
    fn channel_client(
        &self,
        port_id: &str,
        channel_id: &str,
    ) -> Result<(String, ChannelEnd), String> {
        let channel = self.channel(port_id, channel_id)?;
        let connection_id = channel
            .connection_hops
            .first()
            .ok_or_else(|| format!("channel {}/{} has no connection", port_id, channel_id))?;
        let (client_id, _) = self.connection_client(connection_id)?;
        Ok((client_id, channel))
    }

    fn set_connection(&mut self, connection_id: &str, end: ConnectionEnd) {
        self.store.paths.insert(connection_path(connection_id));
        self.store.connections.insert(connection_id.to_string(), end);
    }

    fn set_channel(&mut self, port_id: &str, channel_id: &str, end: ChannelEnd) {
        self.store.paths.insert(channel_path(port_id, channel_id));
        self.store
            .channels
            .insert(channel_key(port_id, channel_id), end);
    }

    fn open_channel_sequences(&mut self, port_id: &str, channel_id: &str) {
        let key = channel_key(port_id, channel_id);
        self.store.next_sequence_send.insert(key.clone(), 1);
        self.store.next_sequence_recv.insert(key.clone(), 1);
        self.store
            .paths
            .insert(next_sequence_recv_path(port_id, channel_id));
    }

    fn insert_consensus_state(
        &mut self,
        client_id: &str,
        height: Height,
        consensus_state: ConsensusState,
    ) -> Result<(), String> {
        let client = self
            .store
            .clients
            .get_mut(client_id)
            .ok_or_else(|| format!("client {} not found", client_id))?;
        if let Some(existing) = client.consensus_states.get(&height) {
            if *existing != consensus_state {
                return Err(format!(
                    "conflicting consensus state for client {} at {}",
                    client_id, height
                ));
            }
            return Ok(());
        }
        client.consensus_states.insert(height, consensus_state);
        if height > client.client_state.latest_height {
            client.client_state.latest_height = height;
        }
        self.store
            .paths
            .insert(consensus_state_path(client_id, &height));
        Ok(())
    }

    fn check_counterparty_client_state(&self, client_state: &ClientState) -> Result<(), String> {
        if client_state.chain_id != self.chain_id {
            return Err(format!(
                "counterparty client tracks {}, not {}",
                client_state.chain_id, self.chain_id
            ));
        }
        Ok(())
    }

    fn deliver(&mut self, msg: IbcMsg) -> Result<Vec<Event>, String> {
        match msg {
            IbcMsg::CreateClient {
                client_state,
                consensus_state,
                ..
            } => {
                let client_id = format!("07-tendermint-{}", self.store.clients.len());
                let height = client_state.latest_height;
                self.store.clients.insert(
                    client_id.clone(),
                    ClientRecord {
                        client_state,
                        consensus_states: BTreeMap::new(),
                    },
                );
                self.store.paths.insert(client_state_path(&client_id));
                self.insert_consensus_state(&client_id, height, consensus_state)?;
                Ok(vec![Event::new(events::CREATE_CLIENT)
                    .with_attribute("client_id", client_id)
                    .with_attribute("client_type", "07-tendermint")
                    .with_attribute("consensus_height", height.to_string())])
            }
            IbcMsg::UpdateClient {
                client_id, header, ..
            } => {
                let tracked = self
                    .store
                    .clients
                    .get(&client_id)
                    .map(|client| client.client_state.chain_id.clone())
                    .ok_or_else(|| format!("client {} not found", client_id))?;
                if header.chain_id != tracked {
                    return Err(format!(
                        "header of {} submitted to client of {}",
                        header.chain_id, tracked
                    ));
                }
                if header.client_message.is_none() {
                    return Err("header without client message".to_string());
                }
                let height = header.height;
                self.insert_consensus_state(&client_id, height, build_consensus_state(&header))?;
                Ok(vec![Event::new(events::UPDATE_CLIENT)
                    .with_attribute("client_id", client_id)
                    .with_attribute("consensus_height", height.to_string())])
            }
            IbcMsg::ConnectionOpenInit {
                client_id,
                counterparty_client_id,
                counterparty_prefix,
                version,
                delay_period,
                ..
            } => {
                if !self.store.clients.contains_key(&client_id) {
                    return Err(format!("client {} not found", client_id));
                }
                let connection_id = format!("connection-{}", self.store.connections.len());
                self.set_connection(
                    &connection_id,
                    ConnectionEnd {
                        state: State::Init,
                        client_id: client_id.clone(),
                        counterparty: ConnectionCounterparty {
                            client_id: counterparty_client_id.clone(),
                            connection_id: None,
                            prefix: counterparty_prefix,
                        },
                        versions: vec![version],
                        delay_period,
                    },
                );
                Ok(vec![Event::new(events::CONNECTION_OPEN_INIT)
                    .with_attribute("connection_id", connection_id)
                    .with_attribute("client_id", client_id)
                    .with_attribute("counterparty_client_id", counterparty_client_id)])
            }
            IbcMsg::ConnectionOpenTry {
                client_id,
                counterparty_client_id,
                counterparty_connection_id,
                counterparty_prefix,
                counterparty_versions,
                client_state,
                delay_period,
                proof_height,
                proof_init,
                proof_client,
                proof_consensus,
                consensus_height,
                ..
            } => {
                self.check_counterparty_client_state(&client_state)?;
                self.verify(
                    &client_id,
                    &proof_init,
                    proof_height,
                    &connection_path(&counterparty_connection_id),
                    true,
                )?;
                self.verify(
                    &client_id,
                    &proof_client,
                    proof_height,
                    &client_state_path(&counterparty_client_id),
                    true,
                )?;
                self.verify(
                    &client_id,
                    &proof_consensus,
                    proof_height,
                    &consensus_state_path(&counterparty_client_id, &consensus_height),
                    true,
                )?;
                let connection_id = format!("connection-{}", self.store.connections.len());
                self.set_connection(
                    &connection_id,
                    ConnectionEnd {
                        state: State::TryOpen,
                        client_id: client_id.clone(),
                        counterparty: ConnectionCounterparty {
                            client_id: counterparty_client_id.clone(),
                            connection_id: Some(counterparty_connection_id.clone()),
                            prefix: counterparty_prefix,
                        },
                        versions: counterparty_versions.into_iter().take(1).collect(),
                        delay_period,
                    },
                );
                Ok(vec![Event::new(events::CONNECTION_OPEN_TRY)
                    .with_attribute("connection_id", connection_id)
                    .with_attribute("client_id", client_id)
                    .with_attribute("counterparty_client_id", counterparty_client_id)
                    .with_attribute("counterparty_connection_id", counterparty_connection_id)])
            }
            IbcMsg::ConnectionOpenAck {
                connection_id,
                counterparty_connection_id,
                version,
                client_state,
                proof_height,
                proof_try,
                proof_client,
                proof_consensus,
                consensus_height,
                ..
            } => {
                let (client_id, mut connection) = self.connection_client(&connection_id)?;
                if connection.state != State::Init {
                    return Err(format!("connection {} is {}", connection_id, connection.state));
                }
                self.check_counterparty_client_state(&client_state)?;
                let counterparty_client_id = connection.counterparty.client_id.clone();
                self.verify(
                    &client_id,
                    &proof_try,
                    proof_height,
                    &connection_path(&counterparty_connection_id),
                    true,
                )?;
                self.verify(
                    &client_id,
                    &proof_client,
                    proof_height,
                    &client_state_path(&counterparty_client_id),
                    true,
                )?;
                self.verify(
                    &client_id,
                    &proof_consensus,
                    proof_height,
                    &consensus_state_path(&counterparty_client_id, &consensus_height),
                    true,
                )?;
                connection.state = State::Open;
                connection.counterparty.connection_id = Some(counterparty_connection_id.clone());
                connection.versions = vec![version];
                self.set_connection(&connection_id, connection);
                Ok(vec![Event::new(events::CONNECTION_OPEN_ACK)
                    .with_attribute("connection_id", connection_id)
                    .with_attribute("counterparty_connection_id", counterparty_connection_id)])
            }
            IbcMsg::ConnectionOpenConfirm {
                connection_id,
                proof_ack,
                proof_height,
                ..
            } => {
                let (client_id, mut connection) = self.connection_client(&connection_id)?;
                if connection.state != State::TryOpen {
                    return Err(format!("connection {} is {}", connection_id, connection.state));
                }
                let counterparty_connection_id = connection
                    .counterparty
                    .connection_id
                    .clone()
                    .unwrap_or_default();
                self.verify(
                    &client_id,
                    &proof_ack,
                    proof_height,
                    &connection_path(&counterparty_connection_id),
                    true,
                )?;
                connection.state = State::Open;
                self.set_connection(&connection_id, connection);
                Ok(vec![Event::new(events::CONNECTION_OPEN_CONFIRM)
                    .with_attribute("connection_id", connection_id)
                    .with_attribute("counterparty_connection_id", counterparty_connection_id)])
            }
            IbcMsg::ChannelOpenInit {
                port_id, channel, ..
            } => {
                let connection_id = channel.connection_hops.first().cloned().unwrap_or_default();
                let (_, connection) = self.connection_client(&connection_id)?;
                if !connection.state.is_open() {
                    return Err(format!("connection {} is {}", connection_id, connection.state));
                }
                let channel_id = format!("channel-{}", self.store.channels.len());
                let counterparty_port_id = channel.counterparty.port_id.clone();
                self.set_channel(&port_id, &channel_id, ChannelEnd {
                    state: State::Init,
                    ..channel
                });
                self.open_channel_sequences(&port_id, &channel_id);
                Ok(vec![Event::new(events::CHANNEL_OPEN_INIT)
                    .with_attribute("port_id", port_id)
                    .with_attribute("channel_id", channel_id)
                    .with_attribute("counterparty_port_id", counterparty_port_id)
                    .with_attribute("connection_id", connection_id)])
            }
            IbcMsg::ChannelOpenTry {
                port_id,
                channel,
                proof_init,
                proof_height,
                ..
            } => {
                let connection_id = channel.connection_hops.first().cloned().unwrap_or_default();
                let (client_id, connection) = self.connection_client(&connection_id)?;
                if !connection.state.is_open() {
                    return Err(format!("connection {} is {}", connection_id, connection.state));
                }
                let counterparty_port_id = channel.counterparty.port_id.clone();
                let counterparty_channel_id =
                    channel.counterparty.channel_id.clone().unwrap_or_default();
                self.verify(
                    &client_id,
                    &proof_init,
                    proof_height,
                    &channel_path(&counterparty_port_id, &counterparty_channel_id),
                    true,
                )?;
                let channel_id = format!("channel-{}", self.store.channels.len());
                self.set_channel(&port_id, &channel_id, ChannelEnd {
                    state: State::TryOpen,
                    ..channel
                });
                self.open_channel_sequences(&port_id, &channel_id);
                Ok(vec![Event::new(events::CHANNEL_OPEN_TRY)
                    .with_attribute("port_id", port_id)
                    .with_attribute("channel_id", channel_id)
                    .with_attribute("counterparty_port_id", counterparty_port_id)
                    .with_attribute("counterparty_channel_id", counterparty_channel_id)
                    .with_attribute("connection_id", connection_id)])
            }
            IbcMsg::ChannelOpenAck {
                port_id,
                channel_id,
                counterparty_channel_id,
                counterparty_version,
                proof_try,
                proof_height,
                ..
            } => {
                let (client_id, mut channel) = self.channel_client(&port_id, &channel_id)?;
                if channel.state != State::Init {
                    return Err(format!("channel {}/{} is {}", port_id, channel_id, channel.state));
                }
                self.verify(
                    &client_id,
                    &proof_try,
                    proof_height,
                    &channel_path(&channel.counterparty.port_id, &counterparty_channel_id),
                    true,
                )?;
                channel.state = State::Open;
                channel.counterparty.channel_id = Some(counterparty_channel_id.clone());
                channel.version = counterparty_version;
                self.set_channel(&port_id, &channel_id, channel);
                Ok(vec![Event::new(events::CHANNEL_OPEN_ACK)
                    .with_attribute("port_id", port_id)
                    .with_attribute("channel_id", channel_id)
                    .with_attribute("counterparty_channel_id", counterparty_channel_id)])
            }
            IbcMsg::ChannelOpenConfirm {
                port_id,
                channel_id,
                proof_ack,
                proof_height,
                ..
            } => {
                let (client_id, mut channel) = self.channel_client(&port_id, &channel_id)?;
                if channel.state != State::TryOpen {
                    return Err(format!("channel {}/{} is {}", port_id, channel_id, channel.state));
                }
                let counterparty_channel_id =
                    channel.counterparty.channel_id.clone().unwrap_or_default();
                self.verify(
                    &client_id,
                    &proof_ack,
                    proof_height,
                    &channel_path(&channel.counterparty.port_id, &counterparty_channel_id),
                    true,
                )?;
                channel.state = State::Open;
                self.set_channel(&port_id, &channel_id, channel);
                Ok(vec![Event::new(events::CHANNEL_OPEN_CONFIRM)
                    .with_attribute("port_id", port_id)
                    .with_attribute("channel_id", channel_id)])
            }
            IbcMsg::RecvPacket {
                packet,
                proof_commitment,
                proof_height,
                ..
            } => self.recv_packet(packet, proof_commitment, proof_height),
            IbcMsg::Acknowledgement {
                packet,
                proof_acked,
                proof_height,
                ..
            } => {
                let (client_id, _) =
                    self.channel_client(&packet.source_port, &packet.source_channel)?;
                let key = packet_key(&packet.source_port, &packet.source_channel, packet.sequence);
                if !self.store.commitments.contains_key(&key) {
                    // already acknowledged or timed out
                    return Ok(vec![]);
                }
                self.verify(
                    &client_id,
                    &proof_acked,
                    proof_height,
                    &get_key_path(KeyPathType::AcksPath, &packet),
                    true,
                )?;
                self.store.commitments.remove(&key);
                self.store
                    .paths
                    .remove(&get_key_path(KeyPathType::CommitmentPath, &packet));
                Ok(vec![packet_event(events::ACK_PACKET, &packet)])
            }
            IbcMsg::Timeout {
                packet,
                next_sequence_recv,
                proof_unreceived,
                proof_height,
                ..
            } => self.timeout_packet(packet, next_sequence_recv, proof_unreceived, proof_height),
        }
    }

    fn recv_packet(
        &mut self,
        packet: Packet,
        proof_commitment: Vec<u8>,
        proof_height: Height,
    ) -> Result<Vec<Event>, String> {
        let (client_id, channel) =
            self.channel_client(&packet.destination_port, &packet.destination_channel)?;
        if !channel.state.is_open() {
            return Err(format!(
                "channel {}/{} is {}",
                packet.destination_port, packet.destination_channel, channel.state
            ));
        }
        if channel.counterparty.port_id != packet.source_port
            || channel.counterparty.channel_id.as_deref() != Some(packet.source_channel.as_str())
        {
            return Err("packet source does not match channel counterparty".to_string());
        }
        self.verify(
            &client_id,
            &proof_commitment,
            proof_height,
            &get_key_path(KeyPathType::CommitmentPath, &packet),
            true,
        )?;

        let block_height = self.height_at(self.height + 1);
        let block_time = self.time_at(self.height + 1).map_err(|e| e.to_string())?;
        if let Some(timeout_height) = packet.timeout_height.filter(|h| !h.is_zero()) {
            if block_height >= timeout_height {
                return Err(format!("packet timed out at height {}", timeout_height));
            }
        }
        if let Some(timeout_timestamp) = packet.timeout_timestamp.filter(|ts| *ts != 0) {
            if time_to_nanos(block_time) >= timeout_timestamp {
                return Err(format!("packet timed out at {}", timeout_timestamp));
            }
        }

        let key = packet_key(
            &packet.destination_port,
            &packet.destination_channel,
            packet.sequence,
        );
        match channel.ordering {
            Order::Unordered => {
                if self.store.receipts.contains(&key) {
                    return Ok(vec![]);
                }
            }
            Order::Ordered => {
                let channel = channel_key(&packet.destination_port, &packet.destination_channel);
                let next = self.store.next_sequence_recv.get(&channel).copied().unwrap_or(1);
                if packet.sequence < next {
                    return Ok(vec![]);
                }
                if packet.sequence != next {
                    return Err(format!(
                        "packet sequence {} != next receive sequence {}",
                        packet.sequence, next
                    ));
                }
                self.store.next_sequence_recv.insert(channel, next + 1);
            }
        }
        self.store.receipts.insert(key.clone());
        self.store.acks.insert(key, SUCCESS_ACK.to_vec());
        self.store
            .paths
            .insert(get_key_path(KeyPathType::ReceiptPath, &packet));
        self.store
            .paths
            .insert(get_key_path(KeyPathType::AcksPath, &packet));

        Ok(vec![
            packet_event(events::RECV_PACKET, &packet),
            packet_event(events::WRITE_ACK, &packet)
                .with_attribute("packet_ack", String::from_utf8_lossy(SUCCESS_ACK)),
        ])
    }

    fn timeout_packet(
        &mut self,
        packet: Packet,
        next_sequence_recv: u64,
        proof_unreceived: Vec<u8>,
        proof_height: Height,
    ) -> Result<Vec<Event>, String> {
        let (client_id, mut channel) =
            self.channel_client(&packet.source_port, &packet.source_channel)?;
        let key = packet_key(&packet.source_port, &packet.source_channel, packet.sequence);
        if !self.store.commitments.contains_key(&key) {
            return Ok(vec![]);
        }

        let consensus_state = self
            .store
            .clients
            .get(&client_id)
            .and_then(|client| client.consensus_states.get(&proof_height))
            .cloned()
            .ok_or_else(|| format!("no consensus state at proof height {}", proof_height))?;
        let height_passed = packet
            .timeout_height
            .map_or(false, |h| !h.is_zero() && proof_height >= h);
        let time_passed = packet.timeout_timestamp.map_or(false, |ts| {
            ts != 0 && time_to_nanos(consensus_state.timestamp) >= ts
        });
        if !height_passed && !time_passed {
            return Err(format!(
                "packet {} has not timed out at proof height {}",
                packet.sequence, proof_height
            ));
        }

        match channel.ordering {
            Order::Unordered => self.verify(
                &client_id,
                &proof_unreceived,
                proof_height,
                &get_key_path(KeyPathType::ReceiptPath, &packet),
                false,
            )?,
            Order::Ordered => {
                if next_sequence_recv > packet.sequence {
                    return Err(format!("packet {} was already received", packet.sequence));
                }
                self.verify(
                    &client_id,
                    &proof_unreceived,
                    proof_height,
                    &get_key_path(KeyPathType::SeqRecv, &packet),
                    true,
                )?;
                channel.state = State::Closed;
                self.set_channel(&packet.source_port, &packet.source_channel, channel);
            }
        }
        self.store.commitments.remove(&key);
        self.store
            .paths
            .remove(&get_key_path(KeyPathType::CommitmentPath, &packet));
        Ok(vec![packet_event(events::TIMEOUT_PACKET, &packet)])
    }

    fn send_packet(
        &mut self,
        port_id: &str,
        channel_id: &str,
        data: Vec<u8>,
        timeout_height: Option<Height>,
        timeout_timestamp: Option<u64>,
    ) -> Result<Packet, String> {
        let channel = self.channel(port_id, channel_id)?;
        if !channel.state.is_open() {
            return Err(format!("channel {}/{} is {}", port_id, channel_id, channel.state));
        }
        let key = channel_key(port_id, channel_id);
        let sequence = self.store.next_sequence_send.get(&key).copied().unwrap_or(1);
        self.store.next_sequence_send.insert(key, sequence + 1);
        let packet = Packet {
            sequence,
            source_port: port_id.to_string(),
            source_channel: channel_id.to_string(),
            destination_port: channel.counterparty.port_id.clone(),
            destination_channel: channel.counterparty.channel_id.clone().unwrap_or_default(),
            data,
            timeout_height,
            timeout_timestamp,
        };
        self.store
            .commitments
            .insert(packet_key(port_id, channel_id, sequence), packet.data.clone());
        self.store
            .paths
            .insert(get_key_path(KeyPathType::CommitmentPath, &packet));
        Ok(packet)
    }

    fn tx_hash(&mut self, encoded: &[Any]) -> String {
        self.tx_count += 1;
        let mut hasher = DefaultHasher::new();
        self.chain_id.hash(&mut hasher);
        self.tx_count.hash(&mut hasher);
        for any in encoded {
            any.type_url.hash(&mut hasher);
            any.value.hash(&mut hasher);
        }
        format!("{:016X}", hasher.finish())
    }
}

#[async_trait::async_trait]
impl IbcProvider for MockChain {
    async fn latest_height_and_timestamp(&self) -> Result<(Height, Time), Error> {
        let state = self.state.lock().await;
        Ok((state.height_at(state.height), state.time_at(state.height)?))
    }

    async fn query_header(&self, height: Height) -> Result<Header, Error> {
        let state = self.state.lock().await;
        state
            .headers
            .get(&height.revision_height)
            .cloned()
            .ok_or_else(|| Error::not_found(&state.chain_id, format!("header {}", height)))
    }

    async fn query_unbonding_period(&self) -> Result<Duration, Error> {
        Ok(UNBONDING_PERIOD)
    }

    async fn query_client_state(&self, client_id: &str) -> Result<Option<ClientState>, Error> {
        let state = self.state.lock().await;
        Ok(state
            .store
            .clients
            .get(client_id)
            .map(|client| client.client_state.clone()))
    }

    async fn query_consensus_state(
        &self,
        client_id: &str,
        consensus_height: Height,
    ) -> Result<Option<ConsensusState>, Error> {
        let state = self.state.lock().await;
        Ok(state
            .store
            .clients
            .get(client_id)
            .and_then(|client| client.consensus_states.get(&consensus_height))
            .cloned())
    }

    async fn query_connection_end(
        &self,
        connection_id: &str,
    ) -> Result<Option<ConnectionEnd>, Error> {
        let state = self.state.lock().await;
        Ok(state.store.connections.get(connection_id).cloned())
    }

    async fn query_channel_end(
        &self,
        port_id: &str,
        channel_id: &str,
    ) -> Result<Option<ChannelEnd>, Error> {
        let state = self.state.lock().await;
        Ok(state
            .store
            .channels
            .get(&channel_key(port_id, channel_id))
            .cloned())
    }

    async fn query_proof(&self, at: Height, keys: Vec<Vec<u8>>) -> Result<Vec<u8>, Error> {
        let prefix = self.connection_prefix();
        let key = keys
            .first()
            .ok_or_else(|| Error::Custom("no key to prove".to_string()))?;
        let path = key
            .strip_prefix(prefix.as_slice())
            .ok_or_else(|| Error::Custom("key outside of the ibc store".to_string()))?;
        let path = String::from_utf8_lossy(path);
        self.state.lock().await.proof(at, &path)
    }

    async fn query_unreceived_packets(
        &self,
        port_id: &str,
        channel_id: &str,
        seqs: Vec<u64>,
    ) -> Result<Vec<u64>, Error> {
        let state = self.state.lock().await;
        let channel = state
            .store
            .channels
            .get(&channel_key(port_id, channel_id))
            .ok_or_else(|| {
                Error::not_found(&state.chain_id, format!("channel {}/{}", port_id, channel_id))
            })?;
        let next_recv = state
            .store
            .next_sequence_recv
            .get(&channel_key(port_id, channel_id))
            .copied()
            .unwrap_or(1);
        Ok(seqs
            .into_iter()
            .filter(|seq| match channel.ordering {
                Order::Unordered => !state
                    .store
                    .receipts
                    .contains(&packet_key(port_id, channel_id, *seq)),
                Order::Ordered => *seq >= next_recv,
            })
            .collect())
    }

    async fn query_unreceived_acknowledgements(
        &self,
        port_id: &str,
        channel_id: &str,
        seqs: Vec<u64>,
    ) -> Result<Vec<u64>, Error> {
        let state = self.state.lock().await;
        Ok(seqs
            .into_iter()
            .filter(|seq| {
                state
                    .store
                    .commitments
                    .contains_key(&packet_key(port_id, channel_id, *seq))
            })
            .collect())
    }

    async fn query_next_sequence_recv(
        &self,
        port_id: &str,
        channel_id: &str,
    ) -> Result<u64, Error> {
        let state = self.state.lock().await;
        state
            .store
            .next_sequence_recv
            .get(&channel_key(port_id, channel_id))
            .copied()
            .ok_or_else(|| {
                Error::not_found(&state.chain_id, format!("channel {}/{}", port_id, channel_id))
            })
    }

    async fn query_events_in_block_range(
        &self,
        min_height: u64,
        max_height: u64,
    ) -> Result<Vec<IbcEventWithHeight>, Error> {
        let state = self.state.lock().await;
        if min_height > max_height {
            return Ok(vec![]);
        }
        Ok(state
            .events
            .range(min_height..=max_height)
            .flat_map(|(height, events)| {
                events.iter().cloned().map(move |event| IbcEventWithHeight {
                    event,
                    height: *height,
                })
            })
            .collect())
    }

    fn connection_prefix(&self) -> Vec<u8> {
        self.config.store_prefix.as_bytes().to_vec()
    }
}

impl KeyProvider for MockChain {
    fn account_id(&self) -> String {
        format!("{}1relayer", self.config.account_prefix)
    }
}

#[async_trait::async_trait]
impl Chain for MockChain {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn config(&self) -> &ChainConfig {
        &self.config
    }

    async fn submit(&self, messages: Vec<IbcMsg>) -> Result<TxResponse, Error> {
        let encoded = messages
            .iter()
            .map(IbcMsg::to_any)
            .collect::<Result<Vec<_>, _>>()?;
        let mut state = self.state.lock().await;
        let transaction_hash = state.tx_hash(&encoded);

        if self.config.gas_price.price < state.min_gas_price {
            return Ok(TxResponse {
                transaction_hash,
                height: state.height,
                code: CODE_INSUFFICIENT_FEE,
                raw_log: format!(
                    "insufficient fees; got: {} required: {}{}",
                    self.config.gas_price, state.min_gas_price, self.config.gas_price.denom
                ),
                events: vec![],
            });
        }

        let mut next = state.clone();
        let mut events = vec![];
        for msg in messages {
            let type_url = msg.type_url();
            match next.deliver(msg) {
                Ok(evs) => events.extend(evs),
                Err(reason) => {
                    // the failed transaction is still included in a block
                    state.produce_block(vec![])?;
                    return Ok(TxResponse {
                        transaction_hash,
                        height: state.height,
                        code: CODE_IBC_FAILURE,
                        raw_log: format!("failed to execute message {}: {}", type_url, reason),
                        events: vec![],
                    });
                }
            }
        }
        next.produce_block(events.clone())?;
        *state = next;
        Ok(TxResponse {
            transaction_hash,
            height: state.height,
            code: 0,
            raw_log: String::new(),
            events,
        })
    }

    async fn wait_one_block(&self) -> Result<(), Error> {
        self.state.lock().await.produce_block(vec![])
    }
}

#[async_trait::async_trait]
impl TestProvider for MockChain {
    async fn send_packet(
        &self,
        port_id: &str,
        channel_id: &str,
        data: Vec<u8>,
        timeout_height: Option<Height>,
        timeout_timestamp: Option<u64>,
    ) -> Result<u64, Error> {
        let mut state = self.state.lock().await;
        let packet = state
            .send_packet(port_id, channel_id, data, timeout_height, timeout_timestamp)
            .map_err(|reason| Error::chain(&state.chain_id, reason))?;
        state.produce_block(vec![packet_event(events::SEND_PACKET, &packet)])?;
        Ok(packet.sequence)
    }

    async fn advance_blocks(&self, blocks: u64) -> Result<(), Error> {
        let mut state = self.state.lock().await;
        for _ in 0..blocks {
            state.produce_block(vec![])?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{client::build_create_client_args, config::GasPrice};

    fn chain(chain_id: &str) -> MockChain {
        MockChain::new(ChainConfig {
            name: chain_id.to_string(),
            chain_id: chain_id.to_string(),
            ..Default::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn starts_at_height_one() {
        let chain = chain("mock-a-2");
        let (height, time) = chain.latest_height_and_timestamp().await.unwrap();
        assert_eq!(height, Height::new(2, 1));
        assert_eq!(chain.query_header(height).await.unwrap().time, time);
        chain.advance_blocks(2).await.unwrap();
        let (height, _) = chain.latest_height_and_timestamp().await.unwrap();
        assert_eq!(height.revision_height, 3);
    }

    #[tokio::test]
    async fn failed_transaction_leaves_state_untouched() {
        let host = chain("mock-a-1");
        let tracked = chain("mock-b-1");
        let args = build_create_client_args(&tracked, None).await.unwrap();
        let create = IbcMsg::CreateClient {
            client_state: args.client_state,
            consensus_state: args.consensus_state,
            signer: host.account_id(),
        };
        let bad_update = IbcMsg::UpdateClient {
            client_id: "07-tendermint-7".to_string(),
            header: tracked.query_header(Height::new(1, 1)).await.unwrap(),
            signer: host.account_id(),
        };

        let response = host.submit(vec![create, bad_update]).await.unwrap();
        assert_eq!(response.code, CODE_IBC_FAILURE);
        assert!(response.raw_log.contains("07-tendermint-7"), "{}", response.raw_log);
        assert_eq!(response.height, 2);
        assert_eq!(host.client_count().await, 0);
    }

    #[tokio::test]
    async fn low_fee_is_rejected_without_a_block() {
        let config = ChainConfig {
            name: "a".to_string(),
            chain_id: "mock-a-1".to_string(),
            gas_price: GasPrice::new(0.001, "stake"),
            ..Default::default()
        };
        let chain = MockChain::with_min_gas_price(config, 0.01).unwrap();
        let response = chain.submit(vec![]).await.unwrap();
        assert_eq!(response.code, CODE_INSUFFICIENT_FEE);
        assert_eq!(response.height, 1);
    }

    #[tokio::test]
    async fn proofs_reflect_the_queried_height() {
        let host = chain("mock-a-1");
        let tracked = chain("mock-b-1");
        let args = build_create_client_args(&tracked, None).await.unwrap();
        let response = host
            .submit(vec![IbcMsg::CreateClient {
                client_state: args.client_state,
                consensus_state: args.consensus_state,
                signer: host.account_id(),
            }])
            .await
            .unwrap();
        assert_eq!(response.code, 0);

        let key = |path: &str| {
            let mut key = b"ibc".to_vec();
            key.extend_from_slice(path.as_bytes());
            vec![key]
        };
        let path = client_state_path("07-tendermint-0");
        let before = host.query_proof(Height::new(1, 1), key(&path)).await.unwrap();
        let after = host.query_proof(Height::new(1, 2), key(&path)).await.unwrap();
        assert!(before.ends_with(b"|0"));
        assert!(after.ends_with(b"|1"));
        assert!(host.query_proof(Height::new(1, 9), key(&path)).await.is_err());
    }
}
