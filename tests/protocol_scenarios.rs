//! End-to-end protocol scenarios against a live server

mod support;

use std::time::Duration;

use support::{mobile_in, TestServer};
use surviveler_server::net::protocol::{ActionData, Joined, Leave, Message, Move, Ping, Stay};

#[tokio::test]
async fn handshake_is_accepted() {
    let server = TestServer::start().await;
    let mut alice = server.connect().await;

    alice.join("alice", 0).await;
    assert_eq!(
        alice.recv().await,
        Message::Stay(Stay {
            id: 1,
            players: Default::default(),
        })
    );
    let joined = alice
        .recv_until(|m| matches!(m, Message::Joined(_)))
        .await;
    assert_eq!(
        joined,
        Message::Joined(Joined {
            id: 1,
            name: "alice".into(),
            r#type: 0,
        })
    );

    server.stop().await;
}

#[tokio::test]
async fn short_name_is_rejected() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;

    client.join("al", 0).await;
    assert_eq!(
        client.recv().await,
        Message::Leave(Leave {
            id: 1,
            reason: "Name is too short!".into(),
        })
    );
    client.expect_closed().await;

    server.stop().await;
}

#[tokio::test]
async fn ping_is_answered_with_server_time() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;

    client
        .send(&Message::Ping(Ping {
            id: 42,
            tstamp: 1000,
        }))
        .await;
    match client.recv_within(Duration::from_millis(100)).await {
        Some(Ok(Message::Pong(pong))) => {
            assert_eq!(pong.id, 42);
            assert!(pong.tstamp > 1000);
        }
        other => panic!("expected Pong, got {other:?}"),
    }

    server.stop().await;
}

#[tokio::test]
async fn move_command_shows_in_snapshots() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;
    client.join("walker", 0).await;
    let Message::Stay(stay) = client.recv().await else {
        panic!("expected Stay");
    };
    let id = stay.id;

    // the entity exists once the join event went through a logic tick
    client.recv_until(|m| mobile_in(m, id).is_some()).await;
    client
        .send(&Message::Move(Move {
            xpos: 1.5,
            ypos: 0.5,
        }))
        .await;

    let mut saw_move = false;
    client
        .recv_until(|m| match mobile_in(m, id) {
            Some(player) => {
                saw_move |= matches!(player.action, ActionData::Move { .. });
                player.xpos >= 1.5 - 1e-3
            }
            None => false,
        })
        .await;
    assert!(saw_move, "no snapshot reported the Move action");

    server.stop().await;
}

#[tokio::test]
async fn oversize_frame_closes_the_session() {
    let server = TestServer::start().await;
    let mut watcher = server.connect().await;
    watcher.join("watcher", 0).await;
    watcher.recv_until(|m| matches!(m, Message::Joined(_))).await;

    let mut offender = server.connect().await;
    let mut header = Vec::new();
    header.extend_from_slice(&0u16.to_be_bytes());
    header.extend_from_slice(&2000u32.to_be_bytes());
    offender.send_raw(&header).await;
    offender.expect_closed().await;

    let seen = watcher.drain_events(Duration::from_millis(300)).await;
    assert!(seen.is_empty(), "unexpected broadcast: {seen:?}");

    server.stop().await;
}

#[tokio::test]
async fn snapshots_reach_every_client() {
    let server = TestServer::start().await;
    let mut a = server.connect().await;
    a.join("alpha", 0).await;
    let Message::Stay(stay) = a.recv().await else {
        panic!("expected Stay");
    };
    let a_id = stay.id;

    let mut b = server.connect().await;
    b.join("bravo", 1).await;
    let Message::Stay(stay) = b.recv().await else {
        panic!("expected Stay");
    };
    assert_eq!(stay.players.get(&a_id).map(String::as_str), Some("alpha"));

    a.recv_until(|m| mobile_in(m, a_id).is_some()).await;
    a.send(&Message::Move(Move {
        xpos: 1.5,
        ypos: 1.5,
    }))
    .await;

    let arrived = |m: &Message| {
        mobile_in(m, a_id)
            .map(|p| p.xpos >= 1.5 - 1e-3 && p.ypos >= 1.5 - 1e-3)
            .unwrap_or(false)
    };
    a.recv_until(arrived).await;
    b.recv_until(arrived).await;

    server.stop().await;
}
