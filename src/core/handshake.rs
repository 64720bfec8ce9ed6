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

//! Connection and channel handshakes.
//!
//! Every step after the first consumes proofs of the previous step, so it waits for a new
//! block on the proving chain, updates that chain's client on the submitting chain and queries
//! the proofs one block below the new client height.

use crate::{
    core::{
        client::ClientState,
        error::Error,
        events::{
            parse_channel_id, parse_connection_id, Event, CHANNEL_OPEN_INIT, CHANNEL_OPEN_TRY,
            CONNECTION_OPEN_INIT, CONNECTION_OPEN_TRY,
        },
        link::{prepare_proofs, Endpoint},
        msgs::IbcMsg,
        packets::utils::{channel_path, client_state_path, connection_path, consensus_state_path},
        queue::flush_message_batch,
        types::{
            ChannelCounterparty, ChannelEnd, ChannelInfo, ChannelPair, ConnectionVersion, Order,
            State,
        },
    },
    primitives::{funcs::apply_prefix, Chain, Height, TxResponse},
};

pub(crate) async fn query_proof_at(
    chain: &impl Chain,
    at: Height,
    path: String,
) -> Result<Vec<u8>, Error> {
    let key = apply_prefix(chain.connection_prefix(), path);
    chain.query_proof(at, vec![key]).await
}

fn events_of(responses: Vec<TxResponse>) -> Vec<Event> {
    responses.into_iter().flat_map(|r| r.events).collect()
}

/// Client state of the counterparty's client on `chain`, with the proofs of that client state
/// and of its latest consensus state at `query_height`.
async fn client_proofs<C: Chain>(
    end: &Endpoint<C>,
    query_height: Height,
) -> Result<(ClientState, Vec<u8>, Vec<u8>), Error> {
    let client_state = end
        .chain
        .query_client_state(&end.client_id)
        .await?
        .ok_or_else(|| Error::not_found(end.chain_id(), format!("client {}", end.client_id)))?;
    let (proof_client, proof_consensus) = futures::try_join!(
        query_proof_at(&end.chain, query_height, client_state_path(&end.client_id)),
        query_proof_at(
            &end.chain,
            query_height,
            consensus_state_path(&end.client_id, &client_state.latest_height)
        )
    )?;
    Ok((client_state, proof_client, proof_consensus))
}

/// Runs the four step connection handshake between the clients of `end_a` and `end_b`,
/// initiated on `end_a`. Returns the connection ids on A and B.
pub async fn create_connection<A: Chain, B: Chain>(
    end_a: &Endpoint<A>,
    end_b: &Endpoint<B>,
) -> Result<(String, String), Error> {
    log::info!(target: "ibc-link", "🏗️ Connection handshake between {} and {}", end_a.chain.name(), end_b.chain.name());

    let msg = IbcMsg::ConnectionOpenInit {
        client_id: end_a.client_id.clone(),
        counterparty_client_id: end_b.client_id.clone(),
        counterparty_prefix: end_b.chain.connection_prefix(),
        version: ConnectionVersion::default(),
        delay_period: 0,
        signer: end_a.chain.account_id(),
    };
    let responses = flush_message_batch(vec![msg], &end_a.chain, CONNECTION_OPEN_INIT).await?;
    let connection_a = parse_connection_id(&events_of(responses), CONNECTION_OPEN_INIT)?;

    // Try on B with proofs from A
    let (proof_height, query_height) = prepare_proofs(end_a, end_b).await?;
    let (client_state, proof_client, proof_consensus) = client_proofs(end_a, query_height).await?;
    let proof_init =
        query_proof_at(&end_a.chain, query_height, connection_path(&connection_a)).await?;
    let msg = IbcMsg::ConnectionOpenTry {
        client_id: end_b.client_id.clone(),
        counterparty_client_id: end_a.client_id.clone(),
        counterparty_connection_id: connection_a.clone(),
        counterparty_prefix: end_a.chain.connection_prefix(),
        counterparty_versions: vec![ConnectionVersion::default()],
        consensus_height: client_state.latest_height,
        client_state,
        delay_period: 0,
        proof_height,
        proof_init,
        proof_client,
        proof_consensus,
        signer: end_b.chain.account_id(),
    };
    let responses = flush_message_batch(vec![msg], &end_b.chain, CONNECTION_OPEN_TRY).await?;
    let connection_b = parse_connection_id(&events_of(responses), CONNECTION_OPEN_TRY)?;

    // Ack on A with proofs from B
    let (proof_height, query_height) = prepare_proofs(end_b, end_a).await?;
    let (client_state, proof_client, proof_consensus) = client_proofs(end_b, query_height).await?;
    let proof_try =
        query_proof_at(&end_b.chain, query_height, connection_path(&connection_b)).await?;
    let msg = IbcMsg::ConnectionOpenAck {
        connection_id: connection_a.clone(),
        counterparty_connection_id: connection_b.clone(),
        version: ConnectionVersion::default(),
        consensus_height: client_state.latest_height,
        client_state,
        proof_height,
        proof_try,
        proof_client,
        proof_consensus,
        signer: end_a.chain.account_id(),
    };
    flush_message_batch(vec![msg], &end_a.chain, "connection_open_ack").await?;

    // Confirm on B with proof from A
    let (proof_height, query_height) = prepare_proofs(end_a, end_b).await?;
    let proof_ack =
        query_proof_at(&end_a.chain, query_height, connection_path(&connection_a)).await?;
    let msg = IbcMsg::ConnectionOpenConfirm {
        connection_id: connection_b.clone(),
        proof_ack,
        proof_height,
        signer: end_b.chain.account_id(),
    };
    flush_message_batch(vec![msg], &end_b.chain, "connection_open_confirm").await?;

    log::info!(target: "ibc-link", "🤝 Connection open: {} on {} <-> {} on {}", connection_a, end_a.chain.name(), connection_b, end_b.chain.name());
    Ok((connection_a, connection_b))
}

/// Runs the four step channel handshake over the connection of `src` and `dest`, initiated
/// on `src`.
pub async fn create_channel<S: Chain, D: Chain>(
    src: &Endpoint<S>,
    dest: &Endpoint<D>,
    src_port: &str,
    dest_port: &str,
    ordering: Order,
    version: &str,
) -> Result<ChannelPair, Error> {
    log::info!(target: "ibc-link", "🏗️ Channel handshake {}:{} -> {}:{}", src.chain.name(), src_port, dest.chain.name(), dest_port);

    let msg = IbcMsg::ChannelOpenInit {
        port_id: src_port.to_string(),
        channel: ChannelEnd {
            state: State::Init,
            ordering,
            counterparty: ChannelCounterparty {
                port_id: dest_port.to_string(),
                channel_id: None,
            },
            connection_hops: vec![src.connection_id.clone()],
            version: version.to_string(),
        },
        signer: src.chain.account_id(),
    };
    let responses = flush_message_batch(vec![msg], &src.chain, CHANNEL_OPEN_INIT).await?;
    let src_channel = parse_channel_id(&events_of(responses), CHANNEL_OPEN_INIT)?;

    let (proof_height, query_height) = prepare_proofs(src, dest).await?;
    let proof_init =
        query_proof_at(&src.chain, query_height, channel_path(src_port, &src_channel)).await?;
    let msg = IbcMsg::ChannelOpenTry {
        port_id: dest_port.to_string(),
        channel: ChannelEnd {
            state: State::TryOpen,
            ordering,
            counterparty: ChannelCounterparty {
                port_id: src_port.to_string(),
                channel_id: Some(src_channel.clone()),
            },
            connection_hops: vec![dest.connection_id.clone()],
            version: version.to_string(),
        },
        counterparty_version: version.to_string(),
        proof_init,
        proof_height,
        signer: dest.chain.account_id(),
    };
    let responses = flush_message_batch(vec![msg], &dest.chain, CHANNEL_OPEN_TRY).await?;
    let dest_channel = parse_channel_id(&events_of(responses), CHANNEL_OPEN_TRY)?;

    let (proof_height, query_height) = prepare_proofs(dest, src).await?;
    let proof_try =
        query_proof_at(&dest.chain, query_height, channel_path(dest_port, &dest_channel)).await?;
    let msg = IbcMsg::ChannelOpenAck {
        port_id: src_port.to_string(),
        channel_id: src_channel.clone(),
        counterparty_channel_id: dest_channel.clone(),
        counterparty_version: version.to_string(),
        proof_try,
        proof_height,
        signer: src.chain.account_id(),
    };
    flush_message_batch(vec![msg], &src.chain, "channel_open_ack").await?;

    let (proof_height, query_height) = prepare_proofs(src, dest).await?;
    let proof_ack =
        query_proof_at(&src.chain, query_height, channel_path(src_port, &src_channel)).await?;
    let msg = IbcMsg::ChannelOpenConfirm {
        port_id: dest_port.to_string(),
        channel_id: dest_channel.clone(),
        proof_ack,
        proof_height,
        signer: dest.chain.account_id(),
    };
    flush_message_batch(vec![msg], &dest.chain, "channel_open_confirm").await?;

    log::info!(target: "ibc-link", "🤝 Channel open: {}/{} <-> {}/{}", src_port, src_channel, dest_port, dest_channel);
    Ok(ChannelPair {
        src: ChannelInfo {
            port_id: src_port.to_string(),
            channel_id: src_channel,
        },
        dest: ChannelInfo {
            port_id: dest_port.to_string(),
            channel_id: dest_channel,
        },
    })
}
