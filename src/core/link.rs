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
        client::build_create_client_args,
        error::Error,
        events::parse_client_id,
        handshake::{create_channel, create_connection},
        msgs::IbcMsg,
        queue::flush_message_batch,
        types::{ChannelPair, ConnectionEnd, Order},
    },
    primitives::{funcs::time_to_seconds, Chain, Height},
};

/// One end of a [`Link`]: a chain together with the client and connection that live on it.
/// `client_id` tracks the counterparty chain.
pub struct Endpoint<C> {
    pub chain: C,
    pub client_id: String,
    pub connection_id: String,
}

impl<C: Chain> Endpoint<C> {
    pub fn new(chain: C, client_id: impl Into<String>, connection_id: impl Into<String>) -> Self {
        Self {
            chain,
            client_id: client_id.into(),
            connection_id: connection_id.into(),
        }
    }

    pub fn chain_id(&self) -> &str {
        self.chain.chain_id()
    }

    pub async fn latest_height(&self) -> Result<Height, Error> {
        Ok(self.chain.latest_height_and_timestamp().await?.0)
    }
}

/// Selects one end of a [`Link`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Side {
    A,
    B,
}

/// A pair of chains joined by an open connection, each running a light client of the other.
pub struct Link<A, B> {
    pub end_a: Endpoint<A>,
    pub end_b: Endpoint<B>,
}

/// Creates a client tracking `tracked` on `host` and returns its id.
pub async fn create_client(host: &impl Chain, tracked: &impl Chain) -> Result<String, Error> {
    let args = build_create_client_args(tracked, tracked.config().trusting_period).await?;
    let msg = IbcMsg::CreateClient {
        client_state: args.client_state,
        consensus_state: args.consensus_state,
        signer: host.account_id(),
    };
    let responses = flush_message_batch(vec![msg], host, "create_client").await?;
    let events = responses
        .into_iter()
        .flat_map(|response| response.events)
        .collect::<Vec<_>>();
    let client_id = parse_client_id(&events)?;
    log::info!(target: "ibc-link", "🤝 Created client {} of {} on {}", client_id, tracked.name(), host.name());
    Ok(client_id)
}

/// Updates the client of `src` that lives on `dest` to the latest height of `src`, unless it
/// is already there. Returns the height the client is at afterwards.
pub async fn update_client_on<S: Chain, D: Chain>(
    src: &Endpoint<S>,
    dest: &Endpoint<D>,
) -> Result<Height, Error> {
    let (src_height, client_state) = futures::try_join!(
        src.latest_height(),
        dest.chain.query_client_state(&dest.client_id)
    )?;
    let client_state = client_state.ok_or_else(|| {
        Error::not_found(dest.chain_id(), format!("client {}", dest.client_id))
    })?;
    if client_state.latest_height >= src_height {
        return Ok(client_state.latest_height);
    }

    let header = src.chain.query_header(src_height).await?;
    let height = header.height;
    let msg = IbcMsg::UpdateClient {
        client_id: dest.client_id.clone(),
        header,
        signer: dest.chain.account_id(),
    };
    flush_message_batch(vec![msg], &dest.chain, "update_client").await?;
    log::debug!(target: "ibc-link", "Updated client {} on {} to {}", dest.client_id, dest.chain.name(), height);
    Ok(height)
}

/// Waits for a fresh block on `src` and brings its client on `dest` up to it.
///
/// Returns `(proof_height, query_height)`: proofs queried on `src` at `query_height` are
/// verified on `dest` against the consensus state at `proof_height`.
pub async fn prepare_proofs<S: Chain, D: Chain>(
    src: &Endpoint<S>,
    dest: &Endpoint<D>,
) -> Result<(Height, Height), Error> {
    src.chain.wait_one_block().await?;
    let proof_height = update_client_on(src, dest).await?;
    let query_height = proof_height.decrement().ok_or_else(|| {
        Error::Custom(format!(
            "cannot query proofs below height {} on {}",
            proof_height,
            src.chain_id()
        ))
    })?;
    Ok((proof_height, query_height))
}

/// Updates the client of `src` on `dest` if its latest consensus state is older than
/// `max_age_sec` relative to the latest block time of `src`.
pub async fn update_client_if_stale_on<S: Chain, D: Chain>(
    src: &Endpoint<S>,
    dest: &Endpoint<D>,
    max_age_sec: u64,
) -> Result<Option<Height>, Error> {
    let client_state = dest
        .chain
        .query_client_state(&dest.client_id)
        .await?
        .ok_or_else(|| Error::not_found(dest.chain_id(), format!("client {}", dest.client_id)))?;
    let consensus_state = dest
        .chain
        .query_consensus_state(&dest.client_id, client_state.latest_height)
        .await?
        .ok_or_else(|| {
            Error::not_found(
                dest.chain_id(),
                format!(
                    "consensus state {} of client {}",
                    client_state.latest_height, dest.client_id
                ),
            )
        })?;
    let (_, src_time) = src.chain.latest_height_and_timestamp().await?;
    let known = time_to_seconds(consensus_state.timestamp);
    if known.saturating_add(max_age_sec) >= time_to_seconds(src_time) {
        return Ok(None);
    }
    update_client_on(src, dest).await.map(Some)
}

fn check_connection(
    chain_id: &str,
    connection_id: &str,
    end: &ConnectionEnd,
    counterparty_client_id: &str,
    counterparty_connection_id: &str,
) -> Result<(), Error> {
    let step = "validate_connection";
    if !end.state.is_open() {
        return Err(Error::protocol(
            chain_id,
            step,
            format!("connection {} is {}, expected OPEN", connection_id, end.state),
        ));
    }
    if end.counterparty.client_id != counterparty_client_id {
        return Err(Error::protocol(
            chain_id,
            step,
            format!(
                "connection {} has counterparty client {}, expected {}",
                connection_id, end.counterparty.client_id, counterparty_client_id
            ),
        ));
    }
    if end.counterparty.connection_id.as_deref() != Some(counterparty_connection_id) {
        return Err(Error::protocol(
            chain_id,
            step,
            format!(
                "connection {} has counterparty connection {:?}, expected {}",
                connection_id, end.counterparty.connection_id, counterparty_connection_id
            ),
        ));
    }
    Ok(())
}

/// Checks that the latest consensus state of the client on `host` commits to the matching
/// header of `src`.
async fn check_client<S: Chain, H: Chain>(
    src: &Endpoint<S>,
    host: &Endpoint<H>,
) -> Result<(), Error> {
    let client_state = host
        .chain
        .query_client_state(&host.client_id)
        .await?
        .ok_or_else(|| Error::not_found(host.chain_id(), format!("client {}", host.client_id)))?;
    if client_state.chain_id != src.chain_id() {
        return Err(Error::protocol(
            host.chain_id(),
            "validate_client",
            format!(
                "client {} tracks {}, expected {}",
                host.client_id,
                client_state.chain_id,
                src.chain_id()
            ),
        ));
    }
    let height = client_state.latest_height;
    let (consensus_state, header) = futures::try_join!(
        host.chain.query_consensus_state(&host.client_id, height),
        src.chain.query_header(height)
    )?;
    let consensus_state = consensus_state.ok_or_else(|| {
        Error::not_found(
            host.chain_id(),
            format!("consensus state {} of client {}", height, host.client_id),
        )
    })?;
    if !consensus_state.matches(&header) {
        return Err(Error::protocol(
            host.chain_id(),
            "validate_client",
            format!(
                "consensus state {} of client {} does not match the header of {}",
                height,
                host.client_id,
                src.chain_id()
            ),
        ));
    }
    Ok(())
}

impl<A: Chain, B: Chain> Link<A, B> {
    /// Creates a client of each chain on the other one, then opens a new connection between
    /// them.
    pub async fn create_with_new_connections(node_a: A, node_b: B) -> Result<Self, Error> {
        node_a.config().validate()?;
        node_b.config().validate()?;

        log::info!(target: "ibc-link", "🏗️ Creating clients between {} and {}", node_a.name(), node_b.name());
        let (client_a, client_b) =
            futures::try_join!(create_client(&node_a, &node_b), create_client(&node_b, &node_a))?;

        let mut end_a = Endpoint::new(node_a, client_a, "");
        let mut end_b = Endpoint::new(node_b, client_b, "");
        let (connection_a, connection_b) = create_connection(&end_a, &end_b).await?;
        end_a.connection_id = connection_a;
        end_b.connection_id = connection_b;

        log::info!(
            target: "ibc-link",
            "🤝 Link established: {} ({}, {}) <-> {} ({}, {})",
            end_a.chain.name(),
            end_a.client_id,
            end_a.connection_id,
            end_b.chain.name(),
            end_b.client_id,
            end_b.connection_id
        );
        Ok(Self { end_a, end_b })
    }

    /// Builds a link on top of an already open connection pair after checking that both ends
    /// agree with each other and that both clients track the right chain.
    pub async fn create_with_existing_connections(
        node_a: A,
        node_b: B,
        connection_a: &str,
        connection_b: &str,
    ) -> Result<Self, Error> {
        let (end_a, end_b) = futures::try_join!(
            node_a.query_connection_end(connection_a),
            node_b.query_connection_end(connection_b)
        )?;
        let end_a = end_a.ok_or_else(|| {
            Error::not_found(node_a.chain_id(), format!("connection {}", connection_a))
        })?;
        let end_b = end_b.ok_or_else(|| {
            Error::not_found(node_b.chain_id(), format!("connection {}", connection_b))
        })?;

        check_connection(
            node_a.chain_id(),
            connection_a,
            &end_a,
            &end_b.client_id,
            connection_b,
        )?;
        check_connection(
            node_b.chain_id(),
            connection_b,
            &end_b,
            &end_a.client_id,
            connection_a,
        )?;

        let link = Self {
            end_a: Endpoint::new(node_a, end_a.client_id, connection_a),
            end_b: Endpoint::new(node_b, end_b.client_id, connection_b),
        };
        futures::try_join!(
            check_client(&link.end_b, &link.end_a),
            check_client(&link.end_a, &link.end_b)
        )?;
        log::info!(
            target: "ibc-link",
            "🤝 Reusing connections {} on {} and {} on {}",
            connection_a,
            link.end_a.chain.name(),
            connection_b,
            link.end_b.chain.name()
        );
        Ok(link)
    }

    /// Opens a channel over the link's connection, starting the handshake on `src`.
    pub async fn create_channel(
        &mut self,
        src: Side,
        src_port: &str,
        dest_port: &str,
        ordering: Order,
        version: &str,
    ) -> Result<ChannelPair, Error> {
        match src {
            Side::A => {
                create_channel(&self.end_a, &self.end_b, src_port, dest_port, ordering, version)
                    .await
            }
            Side::B => {
                create_channel(&self.end_b, &self.end_a, src_port, dest_port, ordering, version)
                    .await
            }
        }
    }

    /// Updates the client of `source` on the other chain to the latest height of `source`.
    pub async fn update_client(&mut self, source: Side) -> Result<Height, Error> {
        match source {
            Side::A => update_client_on(&self.end_a, &self.end_b).await,
            Side::B => update_client_on(&self.end_b, &self.end_a).await,
        }
    }

    /// Like [`Link::update_client`], but only if the last known header of `source` is more than
    /// `max_age_sec` seconds old. Returns the new client height if an update was sent.
    pub async fn update_client_if_stale(
        &mut self,
        source: Side,
        max_age_sec: u64,
    ) -> Result<Option<Height>, Error> {
        match source {
            Side::A => update_client_if_stale_on(&self.end_a, &self.end_b, max_age_sec).await,
            Side::B => update_client_if_stale_on(&self.end_b, &self.end_a, max_age_sec).await,
        }
    }
}
