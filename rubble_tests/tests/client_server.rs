//! Full socket-based integration test: a client connects, verifies, joins,
//! completes the staged onboarding and receives per-tick delta frames.

use std::time::Duration;

use rubble_server::server::bind_ephemeral;
use rubble_shared::msg::{ClientMsg, ServerMsg};
use rubble_shared::net::{WireConn, WirePacket};
use rubble_shared::protocol::Frame;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn client_onboards_and_receives_frames() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init();

    let (mut server, cfg) = bind_ephemeral().await?;
    let addr = cfg.listen_addr.parse()?;

    let server_handle = tokio::spawn(async move {
        server.start_accept_loop();
        // Enough ticks for verification, join, nine onboarding stages with
        // pauses, and a stretch of live delta frames.
        server.run_for_ticks(80).await?;
        Ok::<_, anyhow::Error>(())
    });

    tokio::time::sleep(Duration::from_millis(20)).await;
    let mut conn = WireConn::connect(addr).await?;

    // The server opens with a verification challenge.
    let first = tokio::time::timeout(Duration::from_secs(2), conn.recv()).await??;
    assert_eq!(
        first.parse_control::<ServerMsg>()?,
        ServerMsg::VerifyRequest
    );

    conn.send(&WirePacket::control(&ClientMsg::Verify)?).await?;
    conn.send(&WirePacket::control(&ClientMsg::Join {
        name: "itest".to_string(),
    })?)
    .await?;

    let mut saw_self_id = None;
    let mut saw_tiles = false;
    let mut decoded_frames = 0u32;
    let mut own_add_seen = false;

    while decoded_frames < 5 {
        let pkt = tokio::time::timeout(Duration::from_secs(3), conn.recv()).await??;
        match pkt {
            WirePacket::Control(_) => match pkt.parse_control::<ServerMsg>()? {
                ServerMsg::SelfId { id } => saw_self_id = Some(id),
                ServerMsg::TileInit { tiles } => {
                    saw_tiles = saw_tiles || !tiles.is_empty();
                }
                _ => {}
            },
            WirePacket::Delta(bytes) => {
                let frame = Frame::decode(&bytes)?;
                if let Some(own) = saw_self_id {
                    if frame.add_players.iter().any(|p| p.id == own) {
                        own_add_seen = true;
                        assert_eq!(
                            frame.add_players.iter().find(|p| p.id == own).unwrap().name,
                            "itest"
                        );
                    }
                }
                decoded_frames += 1;
            }
            WirePacket::Leaderboard(bytes) => {
                let entries = rubble_shared::protocol::decode_leaderboard(&bytes)?;
                assert!(entries.iter().any(|e| e.name == "itest"));
            }
        }
    }

    assert!(saw_self_id.is_some(), "onboarding names the client's own id");
    assert!(saw_tiles, "onboarding carries the static tile layout");
    assert!(own_add_seen, "some chunk packet adds the client's own avatar");

    drop(conn);
    server_handle.await??;
    Ok(())
}
