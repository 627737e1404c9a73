//! Walkthrough against the in-memory mock node.
//!
//! Run: `cargo run --example mock_walkthrough`
//!
//! This example shows:
//! - Client configuration and connection with failover
//! - Typed storage reads and the found / not-found distinction
//! - Submitting writes and inspecting their outcome
//! - Distributing a file as erasure-coded fragments

// Examples are allowed to use expect/unwrap for brevity
#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::{sync::Arc, time::Duration};

use cess_sdk::{
    ChainClient, ClientConfig, Ed25519Signer, OutcomeKind, Result, Role,
    file::{FileDistributor, Segmenter},
    mock::{MemoryTransport, MockChain, MockCodec, MockConnector, MockEvent, SubmitBehavior},
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("cess_sdk=debug").init();

    // -------------------------------------------------------------------------
    // 1. Connect; the first endpoint is down, so the client fails over
    // -------------------------------------------------------------------------
    let chain = MockChain::new();
    chain.set_endpoint_up("ws://primary:9944", false);

    let config = ClientConfig::builder()
        .with_endpoints(["ws://primary:9944", "ws://secondary:9944"])
        .with_tx_timeout(Duration::from_secs(10))
        .build()?;
    let client = ChainClient::connect(
        config,
        Arc::new(MockConnector::new(Arc::clone(&chain))),
        Arc::new(MockCodec),
        Arc::new(Ed25519Signer::from_seed([0x11; 32])),
    )
    .await?;
    let me = client.account_id();
    println!("connected to {} as {me}", client.connection().current().unwrap().endpoint);

    // -------------------------------------------------------------------------
    // 2. Reads
    // -------------------------------------------------------------------------
    let account = client.query_account(&me).await;
    println!("own account found: {}", account.is_found());

    let role: Role = "deoss".parse().expect("known alias");
    println!("registered as {role}: {}", client.is_registered(role, &me).await?);

    // -------------------------------------------------------------------------
    // 3. Writes
    // -------------------------------------------------------------------------
    chain.push_behavior(SubmitBehavior::include([MockEvent::new("FileBank", "CreateBucket")]));
    let outcome = client.create_bucket(&me, "holiday-photos").await?;
    println!("create_bucket: {} (nonce {}, tx {})", outcome.kind.label(), outcome.nonce, outcome.tx_hash);

    // No success event this time.
    chain.push_behavior(SubmitBehavior::include([]));
    let outcome = client.delete_bucket(&me, "holiday-photos").await?;
    if let OutcomeKind::Failure(reason) = &outcome.kind {
        println!("delete_bucket failed: {reason}");
    }

    // -------------------------------------------------------------------------
    // 4. File distribution
    // -------------------------------------------------------------------------
    let transport = MemoryTransport::new();
    let distributor = FileDistributor::new(transport.clone())
        .with_segmenter(Segmenter::new(64 * 1024)?);
    let peers: Vec<String> = (1..=6).map(|i| format!("/ip4/10.0.0.{i}/tcp/4001")).collect();

    let file: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
    let manifest = distributor.distribute(&file, &peers).await?;
    println!(
        "distributed {} bytes as {} fragments, root {}",
        manifest.size,
        manifest.fragment_count(),
        hex::encode(manifest.root),
    );

    transport.set_peer_down(&peers[0], true);
    let restored = distributor.retrieve(&manifest).await?;
    assert_eq!(restored, file);
    println!("retrieved file with one peer offline");

    client.shutdown();
    Ok(())
}
