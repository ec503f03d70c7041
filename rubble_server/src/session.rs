//! Session bookkeeping and transport plumbing.
//!
//! Each accepted connection gets two tokio tasks: a reader that parses wire
//! packets and forwards control messages to the game loop's event queue, and
//! a writer that drains the session's outgoing channel. Neither task touches
//! world state; every mutation happens when the loop drains the queue between
//! ticks. Malformed control payloads are dropped silently.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};

use tokio::sync::mpsc;
use tracing::{debug, trace};

use rubble_shared::msg::ClientMsg;
use rubble_shared::net::{WireConn, WirePacket};
use rubble_shared::protocol::PlayerId;

/// Identifies one connection for the lifetime of the process.
pub type SessionId = u32;

static NEXT_SESSION_ID: AtomicU32 = AtomicU32::new(1);

pub fn next_session_id() -> SessionId {
    NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed)
}

/// Liveness budget: onboarding ticks a connection may stay unverified.
pub const VERIFY_BUDGET_TICKS: u32 = 100;
/// Ticks between staged onboarding chunk packets.
pub const ONBOARD_STAGE_PAUSE: u8 = 2;
/// Number of staged onboarding steps (the 3x3 neighborhood).
pub const ONBOARD_STAGES: u8 = 9;

/// Transport-to-loop events, drained at the start of every tick.
#[derive(Debug)]
pub enum SessionEvent {
    Connected {
        session: SessionId,
        addr: SocketAddr,
        tx: mpsc::UnboundedSender<WirePacket>,
    },
    Msg {
        session: SessionId,
        msg: ClientMsg,
    },
    Disconnected {
        session: SessionId,
    },
}

/// Loop-side state of one connection.
#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    tx: mpsc::UnboundedSender<WirePacket>,
    /// Completed the verification handshake.
    pub verified: bool,
    /// Remaining liveness budget while unverified.
    pub life: u32,
    /// Next staged onboarding step, 0..=8.
    pub stage: u8,
    pub stage_timer: u8,
    /// Onboarding finished; per-tick delta frames flow from here on.
    pub initialized: bool,
    pub player: Option<PlayerId>,
}

impl Session {
    pub fn new(id: SessionId, tx: mpsc::UnboundedSender<WirePacket>) -> Self {
        Self {
            id,
            tx,
            verified: false,
            life: VERIFY_BUDGET_TICKS,
            stage: 0,
            stage_timer: 0,
            initialized: false,
            player: None,
        }
    }

    /// Queues a packet for the writer task. Send failures mean the writer is
    /// gone; the disconnect event will clean the session up.
    pub fn send(&self, pkt: WirePacket) {
        let _ = self.tx.send(pkt);
    }
}

/// Wires a fresh connection into the event queue and spawns its IO tasks.
pub fn spawn_session_tasks(
    conn: WireConn,
    addr: SocketAddr,
    events: mpsc::UnboundedSender<SessionEvent>,
) -> SessionId {
    let session = next_session_id();
    let (tx, mut rx) = mpsc::unbounded_channel::<WirePacket>();
    let _ = events.send(SessionEvent::Connected { session, addr, tx });

    let (mut reader, mut writer) = conn.into_split();

    tokio::spawn(async move {
        while let Some(pkt) = rx.recv().await {
            if writer.send(&pkt).await.is_err() {
                break;
            }
        }
    });

    tokio::spawn(async move {
        loop {
            match reader.recv().await {
                Ok(pkt @ WirePacket::Control(_)) => match pkt.parse_control::<ClientMsg>() {
                    Ok(msg) => {
                        if events.send(SessionEvent::Msg { session, msg }).is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        // Protocol/input errors never mutate anything.
                        debug!(session, %err, "Dropping malformed control message");
                    }
                },
                Ok(other) => {
                    trace!(session, ?other, "Ignoring non-control packet from client");
                }
                Err(_) => break,
            }
        }
        let _ = events.send(SessionEvent::Disconnected { session });
    });

    session
}
