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
        client::{ClientState, ConsensusState, Header},
        config::ChainConfig,
        error::Error,
        events::{Event, IbcEventWithHeight},
        msgs::IbcMsg,
        types::{ChannelEnd, ConnectionEnd},
    },
    primitives::Height,
};
use std::time::Duration;
use tendermint::Time;

/// Outcome of a committed transaction.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TxResponse {
    pub transaction_hash: String,
    pub height: u64,
    /// Zero on success
    pub code: u32,
    pub raw_log: String,
    pub events: Vec<Event>,
}

#[async_trait::async_trait]
pub trait Chain: IbcProvider + KeyProvider + Send + Sync {
    /// Name of this chain, used in logs.
    fn name(&self) -> &str;

    fn chain_id(&self) -> &str {
        &self.config().chain_id
    }

    fn config(&self) -> &ChainConfig;

    /// Signs and broadcasts `messages` as a single transaction and waits for it to be
    /// committed. A transaction rejected by the chain is returned with a non-zero code rather
    /// than as an error.
    async fn submit(&self, messages: Vec<IbcMsg>) -> Result<TxResponse, Error>;

    /// Resolves once the chain has produced at least one block after the call.
    async fn wait_one_block(&self) -> Result<(), Error>;
}

/// Provides an interface for querying the Ibc state of a chain.
#[async_trait::async_trait]
pub trait IbcProvider {
    /// Latest committed height and the time of that block
    async fn latest_height_and_timestamp(&self) -> Result<(Height, Time), Error>;

    /// Header of the block at `height`, including the client message used to update a
    /// counterparty client to it
    async fn query_header(&self, height: Height) -> Result<Header, Error>;

    async fn query_unbonding_period(&self) -> Result<Duration, Error>;

    async fn query_client_state(&self, client_id: &str) -> Result<Option<ClientState>, Error>;

    async fn query_consensus_state(
        &self,
        client_id: &str,
        consensus_height: Height,
    ) -> Result<Option<ConsensusState>, Error>;

    async fn query_connection_end(
        &self,
        connection_id: &str,
    ) -> Result<Option<ConnectionEnd>, Error>;

    async fn query_channel_end(
        &self,
        port_id: &str,
        channel_id: &str,
    ) -> Result<Option<ChannelEnd>, Error>;

    /// Query proof for provided key path
    async fn query_proof(&self, at: Height, keys: Vec<Vec<u8>>) -> Result<Vec<u8>, Error>;

    /// Given a list of packet sequences sent from the counterparty, returns the ones not yet
    /// received on `port_id`/`channel_id` of this chain
    async fn query_unreceived_packets(
        &self,
        port_id: &str,
        channel_id: &str,
        seqs: Vec<u64>,
    ) -> Result<Vec<u64>, Error>;

    /// Given a list of sequences sent from this chain on `port_id`/`channel_id`, returns the
    /// ones whose acknowledgement has not been received yet
    async fn query_unreceived_acknowledgements(
        &self,
        port_id: &str,
        channel_id: &str,
        seqs: Vec<u64>,
    ) -> Result<Vec<u64>, Error>;

    async fn query_next_sequence_recv(&self, port_id: &str, channel_id: &str)
        -> Result<u64, Error>;

    /// All events of the blocks in `min_height..=max_height`, each tagged with its block height
    async fn query_events_in_block_range(
        &self,
        min_height: u64,
        max_height: u64,
    ) -> Result<Vec<IbcEventWithHeight>, Error>;

    /// Prefix of the IBC store, prepended to every proof key
    fn connection_prefix(&self) -> Vec<u8>;
}

/// Provides an interface for managing key management for signing.
pub trait KeyProvider {
    /// Should return the relayer's account id on the host chain as a string in the expected format
    /// Could be a hexadecimal, bech32 or ss58 string, any format the chain supports
    fn account_id(&self) -> String;
}

/// Hooks the test suite uses to drive a chain directly.
#[async_trait::async_trait]
pub trait TestProvider: Chain + Clone + 'static {
    /// Send an application packet from `port_id`/`channel_id`, returning its sequence.
    async fn send_packet(
        &self,
        port_id: &str,
        channel_id: &str,
        data: Vec<u8>,
        timeout_height: Option<Height>,
        timeout_timestamp: Option<u64>,
    ) -> Result<u64, Error>;

    /// Produce `blocks` empty blocks.
    async fn advance_blocks(&self, blocks: u64) -> Result<(), Error>;
}
