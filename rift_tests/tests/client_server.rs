//! Full socket-based integration tests for client ↔ server flows.

mod common;

use std::time::{Duration, Instant};

use common::{init_tracing, test_config, TestClient};
use rift_server::physics::{filter, KinematicWorld};
use rift_server::server::{bind_ephemeral, bind_ephemeral_with_physics};
use rift_shared::math::Vec3;
use rift_shared::messages::{ClientMessage, RiftStepIntent, ServerMessage};
use rift_shared::wire::PacketFlags;

/// Ping answers with the echoed timestamp well under 100 ms on localhost.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn ping_round_trip_is_fast() -> anyhow::Result<()> {
    init_tracing();
    let mut server = bind_ephemeral(test_config()).await?;
    server.start();

    let mut client = TestClient::connect(server.local_addr()).await?;
    let sent_at = Instant::now();
    client
        .send_unreliable(&ClientMessage::Ping { client_ts_ms: 1000 })
        .await?;

    let msg = client
        .recv_until(Duration::from_secs(1), |m| {
            matches!(m, ServerMessage::Pong { .. })
        })
        .await?
        .expect("pong");
    let rtt = sent_at.elapsed();

    match msg {
        ServerMessage::Pong {
            client_ts_ms,
            server_ts_ms,
        } => {
            assert_eq!(client_ts_ms, 1000);
            assert!(server_ts_ms > 0);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(rtt < Duration::from_millis(100), "rtt = {rtt:?}");

    server.stop().await;
    Ok(())
}

/// Join yields a fresh player id and the tick rate; a duplicate join from
/// the same endpoint fails with code 1.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn join_flow_and_duplicate_join() -> anyhow::Result<()> {
    init_tracing();
    let mut server = bind_ephemeral(test_config()).await?;
    server.start();

    let mut client = TestClient::connect(server.local_addr()).await?;
    client
        .send_reliable(&ClientMessage::JoinRequest {
            character_id: Some("hero_1".into()),
        })
        .await?;

    let msg = client
        .recv_until(Duration::from_secs(2), |m| {
            matches!(m, ServerMessage::JoinSuccess { .. })
        })
        .await?
        .expect("join success");
    let joined_id = match msg {
        ServerMessage::JoinSuccess {
            player_id,
            tick_rate_hz,
            welcome_text,
        } => {
            assert!(player_id > 0);
            assert_eq!(tick_rate_hz, 100);
            assert!(!welcome_text.is_empty());
            player_id
        }
        other => panic!("unexpected {other:?}"),
    };
    assert!(server.players().contains(joined_id));

    client
        .send_reliable(&ClientMessage::JoinRequest {
            character_id: Some("hero_1".into()),
        })
        .await?;
    let msg = client
        .recv_until(Duration::from_secs(2), |m| {
            matches!(m, ServerMessage::JoinFailed { .. })
        })
        .await?
        .expect("join failed");
    match msg {
        ServerMessage::JoinFailed { code, .. } => assert_eq!(code, 1),
        other => panic!("unexpected {other:?}"),
    }

    server.stop().await;
    Ok(())
}

/// Reliable commands delayed within the 32-sequence window still arrive;
/// only true duplicates are suppressed.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn out_of_order_commands_are_delivered() -> anyhow::Result<()> {
    init_tracing();
    let mut server = bind_ephemeral(test_config()).await?;
    server.start();

    let mut client = TestClient::connect(server.local_addr()).await?;
    let player_id = client.join(None).await?;

    let turn = |deg: f32| ClientMessage::TurnIntent {
        client_ts_ms: 1,
        delta_degrees: deg,
    };

    // Craft sequences 100..=102 and deliver 101 last.
    client.state.next_outbound_seq = 100;
    let first = client.build(&turn(90.0), PacketFlags::RELIABLE);
    let delayed = client.build(&turn(90.0), PacketFlags::RELIABLE);
    let third = client.build(&turn(90.0), PacketFlags::RELIABLE);

    client.send_bytes(&first).await?;
    client.send_bytes(&third).await?;
    tokio::time::sleep(Duration::from_millis(50)).await;
    client.send_bytes(&delayed).await?;
    // A straggler copy of an already-delivered sequence must be discarded.
    client.send_bytes(&third).await?;
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Three quarter turns land the facing at +X; a fourth would go back to +Y.
    server.players().with_table(|table| {
        let forward = table[&player_id].orientation.forward();
        assert!(
            (forward.x - 1.0).abs() < 1e-3,
            "forward after 3 turns = {forward:?}"
        );
    });

    server.stop().await;
    Ok(())
}

/// A forward rift step into a dense wall stops at the sweep contact; the
/// broadcast carries both the intended and the actual positions.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rift_step_blocked_by_dense_wall() -> anyhow::Result<()> {
    init_tracing();
    let mut world = KinematicWorld::new();
    world.add_aabb_obstacle(
        9000,
        Vec3::new(-5.0, 3.0, -1.0),
        Vec3::new(5.0, 3.5, 3.0),
        filter::DENSE,
    );
    let mut server = bind_ephemeral_with_physics(test_config(), Box::new(world)).await?;
    server.start();

    let mut client = TestClient::connect(server.local_addr()).await?;
    let player_id = client.join(None).await?;

    client
        .send_reliable(&ClientMessage::RiftStepActivation {
            client_ts_ms: 1,
            intent: RiftStepIntent::Forward,
        })
        .await?;

    let msg = client
        .recv_until(Duration::from_secs(2), |m| {
            matches!(m, ServerMessage::RiftStepInitiated { .. })
        })
        .await?
        .expect("rift step broadcast");
    match msg {
        ServerMessage::RiftStepInitiated {
            intended_position,
            actual_position,
            travel_duration_sec,
            ..
        } => {
            assert!((intended_position.y - 5.0).abs() < 1e-3);
            assert!(
                (actual_position.y - 2.7).abs() < 1e-2,
                "actual = {actual_position:?}"
            );
            assert!(travel_duration_sec > 0.0);
        }
        other => panic!("unexpected {other:?}"),
    }

    server.players().with_table(|table| {
        assert!((table[&player_id].position.y - 2.7).abs() < 1e-2);
    });

    server.stop().await;
    Ok(())
}

/// Movement input shows up in the player's streamed state update.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn movement_streams_entity_state_updates() -> anyhow::Result<()> {
    init_tracing();
    let mut server = bind_ephemeral(test_config()).await?;
    server.start();

    let mut client = TestClient::connect(server.local_addr()).await?;
    let player_id = client.join(None).await?;

    client
        .send_reliable(&ClientMessage::MovementInput {
            client_ts_ms: 1,
            local_direction: Vec3::new(0.0, 1.0, 0.0),
            is_sprinting: false,
        })
        .await?;

    let msg = client
        .recv_until(Duration::from_secs(2), |m| {
            matches!(
                m,
                ServerMessage::EntityStateUpdate { position, .. } if position.y > 0.0
            )
        })
        .await?
        .expect("state update");
    match msg {
        ServerMessage::EntityStateUpdate {
            player_id: id,
            health,
            max_health,
            server_ts_ms,
            ..
        } => {
            assert_eq!(id, player_id);
            assert_eq!((health, max_health), (100, 100));
            assert!(server_ts_ms > 0);
        }
        other => panic!("unexpected {other:?}"),
    }

    server.stop().await;
    Ok(())
}
