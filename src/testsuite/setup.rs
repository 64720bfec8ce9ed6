use super::mock::MockChain;
use anyhow::Context;
use crate::{
    core::{
        config::{ChainConfig, GasPrice},
        link::{Link, Side},
        types::{ChannelPair, Order},
    },
    primitives::TestProvider,
};
use std::{future::Future, time::Duration};

pub const TRANSFER_PORT: &str = "transfer";
pub const TRANSFER_VERSION: &str = "ics20-1";

/// Minimum gas price accepted by the in-memory nodes.
pub const NODE_MIN_GAS_PRICE: f64 = 0.01;

pub async fn timeout_future<T: Future>(future: T, secs: u64, reason: String) -> T::Output {
    let duration = Duration::from_secs(secs);
    match tokio::time::timeout(duration, future).await {
        Ok(output) => output,
        Err(_) => panic!("Future didn't finish within {duration:?}, {reason}"),
    }
}

pub fn chain_config(name: &str, chain_id: &str) -> ChainConfig {
    ChainConfig {
        name: name.to_string(),
        chain_id: chain_id.to_string(),
        gas_price: GasPrice::new(0.025, "stake"),
        block_time: Duration::from_secs(5),
        ..Default::default()
    }
}

/// Two fresh chains, `chain_a` (`mock-a-1`) and `chain_b` (`mock-b-1`).
pub fn setup_chains() -> anyhow::Result<(MockChain, MockChain)> {
    log::info!(target: "ibc-link", "============================== Starting Test ==============================");
    setup_chains_with(chain_config("chain_a", "mock-a-1"), chain_config("chain_b", "mock-b-1"))
}

pub fn setup_chains_with(
    config_a: ChainConfig,
    config_b: ChainConfig,
) -> anyhow::Result<(MockChain, MockChain)> {
    let chain_a = MockChain::with_min_gas_price(config_a, NODE_MIN_GAS_PRICE)
        .context("chain_a failed to start")?;
    let chain_b = MockChain::with_min_gas_price(config_b, NODE_MIN_GAS_PRICE)
        .context("chain_b failed to start")?;
    Ok((chain_a, chain_b))
}

/// Creates clients and a new connection between the two chains, then opens an unordered
/// ics20 channel initiated on A.
pub async fn setup_link_and_channel<A, B>(chain_a: A, chain_b: B) -> (Link<A, B>, ChannelPair)
where
    A: TestProvider,
    B: TestProvider,
{
    let mut link = timeout_future(
        Link::create_with_new_connections(chain_a, chain_b),
        60,
        "connection handshake".to_string(),
    )
    .await
    .expect("link should be created");
    log::info!(
        target: "ibc-link",
        "============ Connection handshake completed: {} <-> {} ============",
        link.end_a.connection_id,
        link.end_b.connection_id
    );

    let channels = link
        .create_channel(Side::A, TRANSFER_PORT, TRANSFER_PORT, Order::Unordered, TRANSFER_VERSION)
        .await
        .expect("channel should be opened");
    log::info!(
        target: "ibc-link",
        "============ Channel handshake completed: {} <-> {} ============",
        channels.src.channel_id,
        channels.dest.channel_id
    );
    (link, channels)
}
