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
        error::Error,
        packets::types::Packet,
        types::{ChannelEnd, ConnectionVersion},
    },
    primitives::Height,
};
use ibc_proto::{
    google::protobuf::Any,
    ibc::core::{
        channel::v1::{
            MsgAcknowledgement, MsgChannelOpenAck, MsgChannelOpenConfirm, MsgChannelOpenInit,
            MsgChannelOpenTry, MsgRecvPacket, MsgTimeout,
        },
        client::v1::{MsgCreateClient, MsgUpdateClient},
        commitment::v1::MerklePrefix,
        connection::v1::{
            Counterparty as RawConnectionCounterparty, MsgConnectionOpenAck,
            MsgConnectionOpenConfirm, MsgConnectionOpenInit, MsgConnectionOpenTry,
        },
    },
};
use prost::Message;

/// A message the link submits to one of its chains.
///
/// Chain adapters either encode these with [`IbcMsg::to_any`] and wrap them in their own
/// transaction envelope, or handle them directly.
#[derive(Clone, Debug, PartialEq)]
pub enum IbcMsg {
    CreateClient {
        client_state: ClientState,
        consensus_state: ConsensusState,
        signer: String,
    },
    UpdateClient {
        client_id: String,
        header: Header,
        signer: String,
    },
    ConnectionOpenInit {
        client_id: String,
        counterparty_client_id: String,
        counterparty_prefix: Vec<u8>,
        version: ConnectionVersion,
        delay_period: u64,
        signer: String,
    },
    ConnectionOpenTry {
        client_id: String,
        counterparty_client_id: String,
        counterparty_connection_id: String,
        counterparty_prefix: Vec<u8>,
        counterparty_versions: Vec<ConnectionVersion>,
        client_state: ClientState,
        delay_period: u64,
        proof_height: Height,
        proof_init: Vec<u8>,
        proof_client: Vec<u8>,
        proof_consensus: Vec<u8>,
        consensus_height: Height,
        signer: String,
    },
    ConnectionOpenAck {
        connection_id: String,
        counterparty_connection_id: String,
        version: ConnectionVersion,
        client_state: ClientState,
        proof_height: Height,
        proof_try: Vec<u8>,
        proof_client: Vec<u8>,
        proof_consensus: Vec<u8>,
        consensus_height: Height,
        signer: String,
    },
    ConnectionOpenConfirm {
        connection_id: String,
        proof_ack: Vec<u8>,
        proof_height: Height,
        signer: String,
    },
    ChannelOpenInit {
        port_id: String,
        channel: ChannelEnd,
        signer: String,
    },
    ChannelOpenTry {
        port_id: String,
        channel: ChannelEnd,
        counterparty_version: String,
        proof_init: Vec<u8>,
        proof_height: Height,
        signer: String,
    },
    ChannelOpenAck {
        port_id: String,
        channel_id: String,
        counterparty_channel_id: String,
        counterparty_version: String,
        proof_try: Vec<u8>,
        proof_height: Height,
        signer: String,
    },
    ChannelOpenConfirm {
        port_id: String,
        channel_id: String,
        proof_ack: Vec<u8>,
        proof_height: Height,
        signer: String,
    },
    RecvPacket {
        packet: Packet,
        proof_commitment: Vec<u8>,
        proof_height: Height,
        signer: String,
    },
    Acknowledgement {
        packet: Packet,
        acknowledgement: Vec<u8>,
        proof_acked: Vec<u8>,
        proof_height: Height,
        signer: String,
    },
    Timeout {
        packet: Packet,
        next_sequence_recv: u64,
        proof_unreceived: Vec<u8>,
        proof_height: Height,
        signer: String,
    },
}

fn connection_counterparty(
    client_id: String,
    connection_id: String,
    prefix: Vec<u8>,
) -> Option<RawConnectionCounterparty> {
    Some(RawConnectionCounterparty {
        client_id,
        connection_id,
        prefix: Some(MerklePrefix { key_prefix: prefix }),
    })
}

impl IbcMsg {
    pub fn type_url(&self) -> &'static str {
        match self {
            IbcMsg::CreateClient { .. } => "/ibc.core.client.v1.MsgCreateClient",
            IbcMsg::UpdateClient { .. } => "/ibc.core.client.v1.MsgUpdateClient",
            IbcMsg::ConnectionOpenInit { .. } => "/ibc.core.connection.v1.MsgConnectionOpenInit",
            IbcMsg::ConnectionOpenTry { .. } => "/ibc.core.connection.v1.MsgConnectionOpenTry",
            IbcMsg::ConnectionOpenAck { .. } => "/ibc.core.connection.v1.MsgConnectionOpenAck",
            IbcMsg::ConnectionOpenConfirm { .. } => {
                "/ibc.core.connection.v1.MsgConnectionOpenConfirm"
            }
            IbcMsg::ChannelOpenInit { .. } => "/ibc.core.channel.v1.MsgChannelOpenInit",
            IbcMsg::ChannelOpenTry { .. } => "/ibc.core.channel.v1.MsgChannelOpenTry",
            IbcMsg::ChannelOpenAck { .. } => "/ibc.core.channel.v1.MsgChannelOpenAck",
            IbcMsg::ChannelOpenConfirm { .. } => "/ibc.core.channel.v1.MsgChannelOpenConfirm",
            IbcMsg::RecvPacket { .. } => "/ibc.core.channel.v1.MsgRecvPacket",
            IbcMsg::Acknowledgement { .. } => "/ibc.core.channel.v1.MsgAcknowledgement",
            IbcMsg::Timeout { .. } => "/ibc.core.channel.v1.MsgTimeout",
        }
    }

    /// Protobuf encoding of the message as the ibc-go module expects it.
    #[allow(deprecated)]
    pub fn to_any(&self) -> Result<Any, Error> {
        let value = match self.clone() {
            IbcMsg::CreateClient {
                client_state,
                consensus_state,
                signer,
            } => MsgCreateClient {
                client_state: Some(client_state.to_any()),
                consensus_state: Some(consensus_state.to_any()),
                signer,
            }
            .encode_to_vec(),
            IbcMsg::UpdateClient {
                client_id,
                header,
                signer,
            } => {
                let client_message = header.client_message.ok_or_else(|| {
                    Error::Custom(format!(
                        "header {} of {} carries no client message",
                        header.height, header.chain_id
                    ))
                })?;
                MsgUpdateClient {
                    client_id,
                    client_message: Some(client_message),
                    signer,
                }
                .encode_to_vec()
            }
            IbcMsg::ConnectionOpenInit {
                client_id,
                counterparty_client_id,
                counterparty_prefix,
                version,
                delay_period,
                signer,
            } => MsgConnectionOpenInit {
                client_id,
                counterparty: connection_counterparty(
                    counterparty_client_id,
                    String::new(),
                    counterparty_prefix,
                ),
                version: Some(version.into()),
                delay_period,
                signer,
            }
            .encode_to_vec(),
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
                signer,
            } => MsgConnectionOpenTry {
                client_id,
                client_state: Some(client_state.to_any()),
                counterparty: connection_counterparty(
                    counterparty_client_id,
                    counterparty_connection_id,
                    counterparty_prefix,
                ),
                delay_period,
                counterparty_versions: counterparty_versions.into_iter().map(Into::into).collect(),
                proof_height: Some(proof_height.into()),
                proof_init,
                proof_client,
                proof_consensus,
                consensus_height: Some(consensus_height.into()),
                signer,
                ..Default::default()
            }
            .encode_to_vec(),
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
                signer,
            } => MsgConnectionOpenAck {
                connection_id,
                counterparty_connection_id,
                version: Some(version.into()),
                client_state: Some(client_state.to_any()),
                proof_height: Some(proof_height.into()),
                proof_try,
                proof_client,
                proof_consensus,
                consensus_height: Some(consensus_height.into()),
                signer,
                ..Default::default()
            }
            .encode_to_vec(),
            IbcMsg::ConnectionOpenConfirm {
                connection_id,
                proof_ack,
                proof_height,
                signer,
            } => MsgConnectionOpenConfirm {
                connection_id,
                proof_ack,
                proof_height: Some(proof_height.into()),
                signer,
            }
            .encode_to_vec(),
            IbcMsg::ChannelOpenInit {
                port_id,
                channel,
                signer,
            } => MsgChannelOpenInit {
                port_id,
                channel: Some(channel.into()),
                signer,
            }
            .encode_to_vec(),
            IbcMsg::ChannelOpenTry {
                port_id,
                channel,
                counterparty_version,
                proof_init,
                proof_height,
                signer,
            } => MsgChannelOpenTry {
                port_id,
                channel: Some(channel.into()),
                counterparty_version,
                proof_init,
                proof_height: Some(proof_height.into()),
                signer,
                ..Default::default()
            }
            .encode_to_vec(),
            IbcMsg::ChannelOpenAck {
                port_id,
                channel_id,
                counterparty_channel_id,
                counterparty_version,
                proof_try,
                proof_height,
                signer,
            } => MsgChannelOpenAck {
                port_id,
                channel_id,
                counterparty_channel_id,
                counterparty_version,
                proof_try,
                proof_height: Some(proof_height.into()),
                signer,
            }
            .encode_to_vec(),
            IbcMsg::ChannelOpenConfirm {
                port_id,
                channel_id,
                proof_ack,
                proof_height,
                signer,
            } => MsgChannelOpenConfirm {
                port_id,
                channel_id,
                proof_ack,
                proof_height: Some(proof_height.into()),
                signer,
            }
            .encode_to_vec(),
            IbcMsg::RecvPacket {
                packet,
                proof_commitment,
                proof_height,
                signer,
            } => MsgRecvPacket {
                packet: Some(packet.into()),
                proof_commitment,
                proof_height: Some(proof_height.into()),
                signer,
            }
            .encode_to_vec(),
            IbcMsg::Acknowledgement {
                packet,
                acknowledgement,
                proof_acked,
                proof_height,
                signer,
            } => MsgAcknowledgement {
                packet: Some(packet.into()),
                acknowledgement,
                proof_acked,
                proof_height: Some(proof_height.into()),
                signer,
            }
            .encode_to_vec(),
            IbcMsg::Timeout {
                packet,
                next_sequence_recv,
                proof_unreceived,
                proof_height,
                signer,
            } => MsgTimeout {
                packet: Some(packet.into()),
                proof_unreceived,
                proof_height: Some(proof_height.into()),
                next_sequence_recv,
                signer,
            }
            .encode_to_vec(),
        };
        Ok(Any {
            type_url: self.type_url().to_string(),
            value,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tendermint::Time;

    #[test]
    fn recv_packet_encodes_proof_height() {
        let packet = Packet {
            sequence: 1,
            source_port: "transfer".into(),
            source_channel: "channel-0".into(),
            destination_port: "transfer".into(),
            destination_channel: "channel-0".into(),
            data: b"{}".to_vec(),
            timeout_height: None,
            timeout_timestamp: None,
        };
        let msg = IbcMsg::RecvPacket {
            packet,
            proof_commitment: vec![7],
            proof_height: Height::new(0, 12),
            signer: "relayer".into(),
        };
        let any = msg.to_any().unwrap();
        assert_eq!(any.type_url, "/ibc.core.channel.v1.MsgRecvPacket");
        let decoded = MsgRecvPacket::decode(any.value.as_slice()).unwrap();
        assert_eq!(decoded.proof_height.unwrap().revision_height, 12);
        let raw_packet = decoded.packet.unwrap();
        assert_eq!(raw_packet.timeout_height.unwrap().revision_height, 0);
        assert_eq!(raw_packet.timeout_timestamp, 0);
    }

    #[test]
    fn update_client_needs_a_client_message() {
        let msg = IbcMsg::UpdateClient {
            client_id: "07-tendermint-0".into(),
            header: Header {
                chain_id: "simd-1".into(),
                height: Height::new(1, 3),
                time: Time::from_unix_timestamp(0, 0).unwrap(),
                app_hash: vec![],
                next_validators_hash: vec![],
                client_message: None,
            },
            signer: "relayer".into(),
        };
        assert!(matches!(msg.to_any(), Err(Error::Custom(_))));
    }
}
