use ibc_link::core::logging;
use ibc_link::testsuite::{
    setup::{chain_config, setup_chains, setup_chains_with},
    tests::{
        ibc_messaging_acks_of_received_packets, ibc_messaging_batched_packets, ibc_messaging_ordered_channel,
        ibc_messaging_packet_and_ack, ibc_messaging_packet_height_timeout,
        ibc_messaging_packet_timestamp_timeout, ibc_messaging_resume_from_heights,
        link_fails_with_insufficient_fee, link_with_existing_connections, relay_is_idempotent,
        update_client_only_when_stale,
    },
};

#[tokio::test(flavor = "multi_thread")]
async fn mock_mock_packets_and_acks() -> anyhow::Result<()> {
    logging::setup_logging();
    let (chain_a, chain_b) = setup_chains()?;
    ibc_messaging_packet_and_ack(chain_a, chain_b).await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn mock_mock_timeouts() -> anyhow::Result<()> {
    logging::setup_logging();
    let (chain_a, chain_b) = setup_chains()?;
    ibc_messaging_packet_height_timeout(chain_a, chain_b).await;

    let (chain_a, chain_b) = setup_chains()?;
    ibc_messaging_packet_timestamp_timeout(chain_a, chain_b).await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn mock_mock_ordered_channel() -> anyhow::Result<()> {
    logging::setup_logging();
    let (chain_a, chain_b) = setup_chains()?;
    ibc_messaging_ordered_channel(chain_a, chain_b).await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn mock_mock_batched_packets() -> anyhow::Result<()> {
    logging::setup_logging();
    let mut config_a = chain_config("chain_a", "mock-a-1");
    let mut config_b = chain_config("chain_b", "mock-b-1");
    config_a.max_msg_num = 2;
    config_b.max_msg_num = 2;
    let (chain_a, chain_b) = setup_chains_with(config_a, config_b)?;
    ibc_messaging_batched_packets(chain_a, chain_b).await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn mock_mock_acks_of_received_packets() -> anyhow::Result<()> {
    logging::setup_logging();
    let (chain_a, chain_b) = setup_chains()?;
    ibc_messaging_acks_of_received_packets(chain_a, chain_b).await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn mock_mock_resume_from_heights() -> anyhow::Result<()> {
    logging::setup_logging();
    let (chain_a, chain_b) = setup_chains()?;
    ibc_messaging_resume_from_heights(chain_a, chain_b).await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn mock_mock_existing_connections() -> anyhow::Result<()> {
    logging::setup_logging();
    let (chain_a, chain_b) = setup_chains()?;
    link_with_existing_connections(chain_a, chain_b).await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn mock_mock_stale_client_update() -> anyhow::Result<()> {
    logging::setup_logging();
    let (chain_a, chain_b) = setup_chains()?;
    update_client_only_when_stale(chain_a, chain_b).await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn mock_mock_insufficient_fee() -> anyhow::Result<()> {
    logging::setup_logging();
    link_fails_with_insufficient_fee().await
}

#[tokio::test(flavor = "multi_thread")]
async fn mock_mock_relay_is_idempotent() -> anyhow::Result<()> {
    logging::setup_logging();
    relay_is_idempotent().await
}
