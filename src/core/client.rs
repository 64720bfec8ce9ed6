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

//! Tendermint light client state as created and updated by the link.

use crate::{
    core::error::Error,
    primitives::{
        funcs::{parse_revision_number, timestamp_from_time},
        traits::Chain,
        Height,
    },
};
use ibc_proto::{
    google::protobuf::{Any, Duration as RawDuration},
    ibc::{
        core::commitment::v1::MerkleRoot,
        lightclients::tendermint::v1::{
            ClientState as RawClientState, ConsensusState as RawConsensusState, Fraction,
        },
    },
    ics23::{HashOp, InnerSpec, LeafOp, LengthOp, ProofSpec},
};
use prost::Message;
use std::time::Duration;
use tendermint::Time;

pub const TENDERMINT_CLIENT_STATE_TYPE_URL: &str = "/ibc.lightclients.tendermint.v1.ClientState";
pub const TENDERMINT_CONSENSUS_STATE_TYPE_URL: &str =
    "/ibc.lightclients.tendermint.v1.ConsensusState";

/// Allowed drift between the host clock and the counterparty header time.
pub const MAX_CLOCK_DRIFT: Duration = Duration::from_secs(20);

/// The consensus-relevant part of a counterparty block header.
#[derive(Clone, Debug, PartialEq)]
pub struct Header {
    pub chain_id: String,
    pub height: Height,
    pub time: Time,
    pub app_hash: Vec<u8>,
    pub next_validators_hash: Vec<u8>,
    /// Encoded client message submitted by `MsgUpdateClient`. Supplied by the chain
    /// adapter since the light block format is chain specific.
    pub client_message: Option<Any>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TrustThreshold {
    pub numerator: u64,
    pub denominator: u64,
}

impl TrustThreshold {
    pub const ONE_THIRD: Self = Self {
        numerator: 1,
        denominator: 3,
    };
}

#[derive(Clone, Debug, PartialEq)]
pub struct ClientState {
    pub chain_id: String,
    pub trust_level: TrustThreshold,
    pub trusting_period: Duration,
    pub unbonding_period: Duration,
    pub max_clock_drift: Duration,
    pub latest_height: Height,
    pub upgrade_path: Vec<String>,
    pub allow_update_after_expiry: bool,
    pub allow_update_after_misbehaviour: bool,
}

impl ClientState {
    pub fn to_any(&self) -> Any {
        Any {
            type_url: TENDERMINT_CLIENT_STATE_TYPE_URL.to_string(),
            value: RawClientState::from(self.clone()).encode_to_vec(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConsensusState {
    pub timestamp: Time,
    pub root: Vec<u8>,
    pub next_validators_hash: Vec<u8>,
}

impl ConsensusState {
    pub fn to_any(&self) -> Any {
        Any {
            type_url: TENDERMINT_CONSENSUS_STATE_TYPE_URL.to_string(),
            value: RawConsensusState::from(self.clone()).encode_to_vec(),
        }
    }

    /// Returns true if this state commits to the same block as `header`.
    pub fn matches(&self, header: &Header) -> bool {
        self.timestamp == header.time
            && self.root == header.app_hash
            && self.next_validators_hash == header.next_validators_hash
    }
}

/// Everything needed for a `MsgCreateClient` tracking some chain.
#[derive(Clone, Debug, PartialEq)]
pub struct CreateClientArgs {
    pub client_state: ClientState,
    pub consensus_state: ConsensusState,
}

fn raw_duration(duration: Duration) -> RawDuration {
    RawDuration {
        seconds: duration.as_secs() as i64,
        nanos: duration.subsec_nanos() as i32,
    }
}

impl From<ClientState> for RawClientState {
    #[allow(deprecated)]
    fn from(value: ClientState) -> Self {
        RawClientState {
            chain_id: value.chain_id,
            trust_level: Some(Fraction {
                numerator: value.trust_level.numerator,
                denominator: value.trust_level.denominator,
            }),
            trusting_period: Some(raw_duration(value.trusting_period)),
            unbonding_period: Some(raw_duration(value.unbonding_period)),
            max_clock_drift: Some(raw_duration(value.max_clock_drift)),
            frozen_height: Some(Height::zero().into()),
            latest_height: Some(value.latest_height.into()),
            proof_specs: proof_specs(),
            upgrade_path: value.upgrade_path,
            allow_update_after_expiry: value.allow_update_after_expiry,
            allow_update_after_misbehaviour: value.allow_update_after_misbehaviour,
        }
    }
}

impl From<ConsensusState> for RawConsensusState {
    fn from(value: ConsensusState) -> Self {
        RawConsensusState {
            timestamp: Some(timestamp_from_time(value.timestamp)),
            root: Some(MerkleRoot { hash: value.root }),
            next_validators_hash: value.next_validators_hash,
        }
    }
}

/// ICS-23 specs for the IAVL store tree and the Tendermint multistore tree, in that order.
pub fn proof_specs() -> Vec<ProofSpec> {
    let iavl = ProofSpec {
        leaf_spec: Some(LeafOp {
            hash: HashOp::Sha256.into(),
            prehash_key: HashOp::NoHash.into(),
            prehash_value: HashOp::Sha256.into(),
            length: LengthOp::VarProto.into(),
            prefix: vec![0],
        }),
        inner_spec: Some(InnerSpec {
            child_order: vec![0, 1],
            child_size: 33,
            min_prefix_length: 4,
            max_prefix_length: 12,
            empty_child: vec![],
            hash: HashOp::Sha256.into(),
        }),
        max_depth: 0,
        min_depth: 0,
        ..Default::default()
    };
    let tendermint = ProofSpec {
        leaf_spec: Some(LeafOp {
            hash: HashOp::Sha256.into(),
            prehash_key: HashOp::NoHash.into(),
            prehash_value: HashOp::Sha256.into(),
            length: LengthOp::VarProto.into(),
            prefix: vec![0],
        }),
        inner_spec: Some(InnerSpec {
            child_order: vec![0, 1],
            child_size: 32,
            min_prefix_length: 1,
            max_prefix_length: 1,
            empty_child: vec![],
            hash: HashOp::Sha256.into(),
        }),
        max_depth: 0,
        min_depth: 0,
        ..Default::default()
    };
    vec![iavl, tendermint]
}

pub fn build_consensus_state(header: &Header) -> ConsensusState {
    ConsensusState {
        timestamp: header.time,
        root: header.app_hash.clone(),
        next_validators_hash: header.next_validators_hash.clone(),
    }
}

pub fn build_client_state(
    chain_id: &str,
    unbonding_period_sec: u64,
    trust_period_sec: u64,
    height: Height,
) -> ClientState {
    ClientState {
        chain_id: chain_id.to_string(),
        trust_level: TrustThreshold::ONE_THIRD,
        trusting_period: Duration::from_secs(trust_period_sec),
        unbonding_period: Duration::from_secs(unbonding_period_sec),
        max_clock_drift: MAX_CLOCK_DRIFT,
        latest_height: height,
        upgrade_path: vec!["upgrade".to_string(), "upgradedIBCState".to_string()],
        allow_update_after_expiry: false,
        allow_update_after_misbehaviour: false,
    }
}

/// Default trusting period: two thirds of the unbonding period, rounded down.
pub fn default_trust_period(unbonding_period_sec: u64) -> u64 {
    unbonding_period_sec * 2 / 3
}

/// Builds the client and consensus state of a new client tracking `src` at its latest height.
pub async fn build_create_client_args<C: Chain>(
    src: &C,
    trust_period_sec: Option<u64>,
) -> Result<CreateClientArgs, Error> {
    let (latest_height, _) = src.latest_height_and_timestamp().await?;
    let header = src.query_header(latest_height).await?;
    let unbonding_period_sec = src.query_unbonding_period().await?.as_secs();
    let trust_period_sec =
        trust_period_sec.unwrap_or_else(|| default_trust_period(unbonding_period_sec));
    let chain_id = src.chain_id();
    let height = Height::new(
        parse_revision_number(chain_id),
        header.height.revision_height,
    );
    Ok(CreateClientArgs {
        client_state: build_client_state(chain_id, unbonding_period_sec, trust_period_sec, height),
        consensus_state: build_consensus_state(&header),
    })
}
