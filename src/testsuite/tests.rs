#![allow(clippy::all)]
use super::{
    mock::SUCCESS_ACK,
    setup::{
        chain_config, setup_chains, setup_chains_with, setup_link_and_channel, timeout_future,
        TRANSFER_PORT,
    },
};
use crate::{
    core::{
        config::GasPrice,
        error::Error,
        link::{Link, Side},
        relay::{RelayInfo, RelayedHeights},
        types::{ChannelInfo, Order, State},
    },
    primitives::{funcs::time_to_nanos, Chain, IbcProvider, TestProvider},
};

const PACKET_DATA: &[u8] = br#"{"amount":"100","denom":"stake"}"#;

/// Sends a packet with generous timeouts and returns its sequence.
async fn send_packet<C: TestProvider, D: Chain>(
    chain: &C,
    counterparty: &D,
    channel: &ChannelInfo,
) -> u64 {
    let (height, time) = counterparty
        .latest_height_and_timestamp()
        .await
        .expect("Couldn't fetch latest_height_and_timestamp");
    let timeout_height = height.add(2000);
    let timeout_timestamp = time_to_nanos(time) + 600 * 60 * 1_000_000_000;
    log::info!(target: "ibc-link", "📡 Sending packet from {} to {}", chain.name(), counterparty.name());
    chain
        .send_packet(
            &channel.port_id,
            &channel.channel_id,
            PACKET_DATA.to_vec(),
            Some(timeout_height),
            Some(timeout_timestamp),
        )
        .await
        .expect("Failed to send packet")
}

async fn relay_all<A: Chain, B: Chain>(link: &mut Link<A, B>) -> RelayInfo {
    timeout_future(link.relay_all(), 60, "relay pass".to_string())
        .await
        .expect("relay pass failed")
}

async fn assert_nothing_pending<A: Chain, B: Chain>(link: &mut Link<A, B>) {
    assert_eq!(relay_all(link).await, RelayInfo::default());
}

/// A packet from each side is received and acknowledged; a second pass has nothing left.
pub async fn ibc_messaging_packet_and_ack<A: TestProvider, B: TestProvider>(
    chain_a: A,
    chain_b: B,
) {
    let (mut link, channels) = setup_link_and_channel(chain_a, chain_b).await;

    let sequence = send_packet(&link.end_a.chain, &link.end_b.chain, &channels.src).await;
    assert_eq!(sequence, 1);
    let info = relay_all(&mut link).await;
    assert_eq!(info.packets_from_a, 1);
    assert_eq!(info.packets_from_b, 0);
    assert!(info.acks_from_a.is_empty());
    assert_eq!(info.acks_from_b.len(), 1);
    let ack = &info.acks_from_b[0];
    assert_eq!(ack.original_packet.sequence, 1);
    assert_eq!(ack.original_packet.data, PACKET_DATA);
    assert_eq!(ack.acknowledgement, SUCCESS_ACK);

    // commitment cleared on A once the ack was relayed back
    let committed = link
        .end_a
        .chain
        .query_unreceived_acknowledgements(&channels.src.port_id, &channels.src.channel_id, vec![1])
        .await
        .unwrap();
    assert!(committed.is_empty());
    assert_nothing_pending(&mut link).await;

    send_packet(&link.end_b.chain, &link.end_a.chain, &channels.dest).await;
    let info = relay_all(&mut link).await;
    assert_eq!(info.packets_from_a, 0);
    assert_eq!(info.packets_from_b, 1);
    assert_eq!(info.acks_from_a.len(), 1);
    assert!(info.acks_from_b.is_empty());
    assert_nothing_pending(&mut link).await;
    log::info!(target: "ibc-link", "🙌🙌🙌 Packets relayed and acknowledged in both directions");
}

/// A packet whose height timeout passed on B is timed out on A instead of being received.
pub async fn ibc_messaging_packet_height_timeout<A: TestProvider, B: TestProvider>(
    chain_a: A,
    chain_b: B,
) {
    let (mut link, channels) = setup_link_and_channel(chain_a, chain_b).await;

    let (height_b, _) = link.end_b.chain.latest_height_and_timestamp().await.unwrap();
    link.end_a
        .chain
        .send_packet(
            &channels.src.port_id,
            &channels.src.channel_id,
            PACKET_DATA.to_vec(),
            Some(height_b.add(2)),
            None,
        )
        .await
        .unwrap();
    link.end_b.chain.advance_blocks(3).await.unwrap();

    let info = relay_all(&mut link).await;
    assert_eq!(info.packets_from_a, 1);
    assert!(info.acks_from_b.is_empty());
    let unreceived = link
        .end_b
        .chain
        .query_unreceived_packets(&channels.dest.port_id, &channels.dest.channel_id, vec![1])
        .await
        .unwrap();
    assert_eq!(unreceived, vec![1]);
    let committed = link
        .end_a
        .chain
        .query_unreceived_acknowledgements(&channels.src.port_id, &channels.src.channel_id, vec![1])
        .await
        .unwrap();
    assert!(committed.is_empty());
    assert_nothing_pending(&mut link).await;
    log::info!(target: "ibc-link", "🙌🙌🙌 Packet timed out on height");
}

/// Same as the height timeout, driven by the timestamp of B instead.
pub async fn ibc_messaging_packet_timestamp_timeout<A: TestProvider, B: TestProvider>(
    chain_a: A,
    chain_b: B,
) {
    let (mut link, channels) = setup_link_and_channel(chain_a, chain_b).await;

    let (_, time_b) = link.end_b.chain.latest_height_and_timestamp().await.unwrap();
    let block_time = link.end_b.chain.config().block_time.as_secs();
    let timeout_timestamp = time_to_nanos(time_b) + block_time * 1_000_000_000;
    link.end_a
        .chain
        .send_packet(
            &channels.src.port_id,
            &channels.src.channel_id,
            PACKET_DATA.to_vec(),
            None,
            Some(timeout_timestamp),
        )
        .await
        .unwrap();
    link.end_b.chain.advance_blocks(3).await.unwrap();

    let info = relay_all(&mut link).await;
    assert_eq!(info.packets_from_a, 1);
    assert!(info.acks_from_b.is_empty());
    assert_nothing_pending(&mut link).await;
    log::info!(target: "ibc-link", "🙌🙌🙌 Packet timed out on timestamp");
}

/// Ordered channels deliver in sequence, and a timeout closes the channel on the sender.
pub async fn ibc_messaging_ordered_channel<A: TestProvider, B: TestProvider>(
    chain_a: A,
    chain_b: B,
) {
    let (mut link, _) = setup_link_and_channel(chain_a, chain_b).await;
    let channels = link
        .create_channel(Side::A, "ordered", "ordered", Order::Ordered, "ordered-1")
        .await
        .expect("ordered channel should be opened");

    send_packet(&link.end_a.chain, &link.end_b.chain, &channels.src).await;
    send_packet(&link.end_a.chain, &link.end_b.chain, &channels.src).await;
    let info = relay_all(&mut link).await;
    assert_eq!(info.packets_from_a, 2);
    let mut sequences = info
        .acks_from_b
        .iter()
        .map(|ack| ack.original_packet.sequence)
        .collect::<Vec<_>>();
    sequences.sort();
    assert_eq!(sequences, vec![1, 2]);
    let next = link
        .end_b
        .chain
        .query_next_sequence_recv(&channels.dest.port_id, &channels.dest.channel_id)
        .await
        .unwrap();
    assert_eq!(next, 3);

    let (height_b, _) = link.end_b.chain.latest_height_and_timestamp().await.unwrap();
    let sequence = link
        .end_a
        .chain
        .send_packet(
            &channels.src.port_id,
            &channels.src.channel_id,
            PACKET_DATA.to_vec(),
            Some(height_b.add(1)),
            None,
        )
        .await
        .unwrap();
    assert_eq!(sequence, 3);
    link.end_b.chain.advance_blocks(2).await.unwrap();
    let info = relay_all(&mut link).await;
    assert_eq!(info.packets_from_a, 1);
    let channel = link
        .end_a
        .chain
        .query_channel_end(&channels.src.port_id, &channels.src.channel_id)
        .await
        .unwrap()
        .expect("channel exists");
    assert_eq!(channel.state, State::Closed);

    // a timed out packet is not held up by a later one on the same ordered channel
    let channels = link
        .create_channel(Side::A, "ordered", "ordered", Order::Ordered, "ordered-1")
        .await
        .expect("ordered channel should be opened");
    let (height_b, _) = link.end_b.chain.latest_height_and_timestamp().await.unwrap();
    let sequence = link
        .end_a
        .chain
        .send_packet(
            &channels.src.port_id,
            &channels.src.channel_id,
            PACKET_DATA.to_vec(),
            Some(height_b.add(1)),
            None,
        )
        .await
        .unwrap();
    assert_eq!(sequence, 1);
    assert_eq!(send_packet(&link.end_a.chain, &link.end_b.chain, &channels.src).await, 2);
    link.end_b.chain.advance_blocks(2).await.unwrap();

    let info = relay_all(&mut link).await;
    assert_eq!(info.packets_from_a, 1);
    assert!(info.acks_from_b.is_empty());
    let channel = link
        .end_a
        .chain
        .query_channel_end(&channels.src.port_id, &channels.src.channel_id)
        .await
        .unwrap()
        .expect("channel exists");
    assert_eq!(channel.state, State::Closed);
    let next = link
        .end_b
        .chain
        .query_next_sequence_recv(&channels.dest.port_id, &channels.dest.channel_id)
        .await
        .unwrap();
    assert_eq!(next, 1);
    // packets left on the closed channel are not relayed anymore
    assert_nothing_pending(&mut link).await;
    log::info!(target: "ibc-link", "🙌🙌🙌 Ordered channel relayed and closed on timeout");
}

/// More packets than fit into one transaction are split over several transactions and all of
/// their acknowledgements are collected.
pub async fn ibc_messaging_batched_packets<A: TestProvider, B: TestProvider>(
    chain_a: A,
    chain_b: B,
) {
    let (mut link, channels) = setup_link_and_channel(chain_a, chain_b).await;
    for _ in 0..5 {
        send_packet(&link.end_a.chain, &link.end_b.chain, &channels.src).await;
    }
    let info = relay_all(&mut link).await;
    assert_eq!(info.packets_from_a, 5);
    assert_eq!(info.acks_from_b.len(), 5);
    assert_nothing_pending(&mut link).await;
}

/// Acknowledgements of packets received outside of a relay pass are relayed back and reported
/// by the next pass.
pub async fn ibc_messaging_acks_of_received_packets<A: TestProvider, B: TestProvider>(
    chain_a: A,
    chain_b: B,
) {
    let (mut link, channels) = setup_link_and_channel(chain_a, chain_b).await;
    send_packet(&link.end_a.chain, &link.end_b.chain, &channels.src).await;
    let pending = link.get_pending_packets(Side::A, None).await.unwrap();
    assert_eq!(pending.len(), 1);
    link.relay_packets(Side::A, pending).await.unwrap();

    let info = relay_all(&mut link).await;
    assert_eq!(info.packets_from_a, 0);
    assert_eq!(info.acks_from_b.len(), 1);
    assert_eq!(info.acks_from_b[0].original_packet.sequence, 1);
    assert!(info.acks_from_a.is_empty());
    assert!(link.get_pending_acks(Side::B, None).await.unwrap().is_empty());
    assert_nothing_pending(&mut link).await;
}

/// Relay passes resume from the returned heights and still pick up new packets.
pub async fn ibc_messaging_resume_from_heights<A: TestProvider, B: TestProvider>(
    chain_a: A,
    chain_b: B,
) {
    let (mut link, channels) = setup_link_and_channel(chain_a, chain_b).await;

    send_packet(&link.end_a.chain, &link.end_b.chain, &channels.src).await;
    let heights = link
        .check_and_relay_packets_and_acks(RelayedHeights::default())
        .await
        .unwrap();
    let (height_a, _) = link.end_a.chain.latest_height_and_timestamp().await.unwrap();
    assert!(heights.packet_height_a.unwrap() < height_a.revision_height);
    let unreceived = link
        .end_b
        .chain
        .query_unreceived_packets(&channels.dest.port_id, &channels.dest.channel_id, vec![1])
        .await
        .unwrap();
    assert!(unreceived.is_empty());

    send_packet(&link.end_a.chain, &link.end_b.chain, &channels.src).await;
    let next_heights = link.check_and_relay_packets_and_acks(heights).await.unwrap();
    assert!(next_heights.packet_height_a > heights.packet_height_a);
    assert!(next_heights.ack_height_b > heights.ack_height_b);
    let unreceived = link
        .end_b
        .chain
        .query_unreceived_packets(&channels.dest.port_id, &channels.dest.channel_id, vec![2])
        .await
        .unwrap();
    assert!(unreceived.is_empty());
    let committed = link
        .end_a
        .chain
        .query_unreceived_acknowledgements(
            &channels.src.port_id,
            &channels.src.channel_id,
            vec![1, 2],
        )
        .await
        .unwrap();
    assert!(committed.is_empty());
}

/// Reusing open connections checks both ends against each other.
pub async fn link_with_existing_connections<A: TestProvider, B: TestProvider>(
    chain_a: A,
    chain_b: B,
) {
    let (link, _) = setup_link_and_channel(chain_a.clone(), chain_b.clone()).await;
    let connection_a = link.end_a.connection_id.clone();
    let connection_b = link.end_b.connection_id.clone();

    let reused = Link::create_with_existing_connections(
        chain_a.clone(),
        chain_b.clone(),
        &connection_a,
        &connection_b,
    )
    .await
    .expect("existing connections should be accepted");
    assert_eq!(reused.end_a.client_id, link.end_a.client_id);
    assert_eq!(reused.end_b.client_id, link.end_b.client_id);

    match Link::create_with_existing_connections(
        chain_a.clone(),
        chain_b.clone(),
        "connection-9",
        &connection_b,
    )
    .await
    {
        Err(Error::NotFound { chain_id, .. }) => assert_eq!(chain_id, chain_a.chain_id()),
        other => panic!("expected NotFound, got {:?}", other.map(|_| ())),
    }

    // a second, unrelated connection pair
    let second = Link::create_with_new_connections(chain_a.clone(), chain_b.clone())
        .await
        .expect("second link should be created");
    match Link::create_with_existing_connections(
        chain_a.clone(),
        chain_b.clone(),
        &connection_a,
        &second.end_b.connection_id,
    )
    .await
    {
        Err(Error::Protocol { step, .. }) => assert_eq!(step, "validate_connection"),
        other => panic!("expected Protocol, got {:?}", other.map(|_| ())),
    }
}

/// Clients are only refreshed once their latest header is older than the allowed age.
pub async fn update_client_only_when_stale<A: TestProvider, B: TestProvider>(
    chain_a: A,
    chain_b: B,
) {
    let (mut link, _) = setup_link_and_channel(chain_a, chain_b).await;

    let updated = link.update_client_if_stale(Side::A, 3600).await.unwrap();
    assert_eq!(updated, None);

    link.end_a.chain.advance_blocks(20).await.unwrap();
    let (height_a, _) = link.end_a.chain.latest_height_and_timestamp().await.unwrap();
    let updated = link.update_client_if_stale(Side::A, 30).await.unwrap();
    assert_eq!(updated, Some(height_a));

    // already up to date
    let height = link.update_client(Side::A).await.unwrap();
    assert_eq!(height, height_a);
    let client = link
        .end_b
        .chain
        .query_client_state(&link.end_b.client_id)
        .await
        .unwrap()
        .expect("client exists");
    assert_eq!(client.latest_height, height_a);
}

/// A signer paying less than the node's minimum gas price cannot open a link, and no
/// connection is left behind.
pub async fn link_fails_with_insufficient_fee() -> anyhow::Result<()> {
    let mut config_a = chain_config("chain_a", "mock-a-1");
    config_a.gas_price = GasPrice::new(0.001, "stake");
    let (chain_a, chain_b) = setup_chains_with(config_a, chain_config("chain_b", "mock-b-1"))?;

    match Link::create_with_new_connections(chain_a.clone(), chain_b.clone()).await {
        Err(Error::Chain { chain_id, reason }) => {
            assert_eq!(chain_id, "mock-a-1");
            assert!(reason.contains("insufficient fee"), "{}", reason);
        }
        other => panic!("expected Chain error, got {:?}", other.map(|_| ())),
    }
    assert_eq!(chain_a.connection_count().await, 0);
    assert_eq!(chain_b.connection_count().await, 0);
    assert_eq!(chain_a.client_count().await, 0);
    Ok(())
}

/// A packet that was already received is not delivered twice.
pub async fn relay_is_idempotent() -> anyhow::Result<()> {
    let (chain_a, chain_b) = setup_chains()?;
    let (mut link, channels) = setup_link_and_channel(chain_a.clone(), chain_b.clone()).await;

    send_packet(&chain_a, &chain_b, &channels.src).await;
    let pending = link.get_pending_packets(Side::A, None).await.unwrap();
    assert_eq!(pending.len(), 1);
    let acks = link.relay_packets(Side::A, pending.clone()).await?;
    assert_eq!(acks.len(), 1);
    assert!(chain_b.has_receipt(TRANSFER_PORT, &channels.dest.channel_id, 1).await);

    // the packet is no longer pending, and replaying it emits nothing
    assert!(link.get_pending_packets(Side::A, None).await.unwrap().is_empty());
    let replayed = link.relay_packets(Side::A, pending).await.unwrap();
    assert!(replayed.is_empty());

    let pending_acks = link.get_pending_acks(Side::B, None).await.unwrap();
    assert_eq!(pending_acks.len(), 1);
    assert_eq!(link.relay_acks(Side::B, pending_acks).await.unwrap(), 1);
    assert!(!chain_a.has_commitment(TRANSFER_PORT, &channels.src.channel_id, 1).await);
    assert!(link.get_pending_acks(Side::B, None).await?.is_empty());
    Ok(())
}
