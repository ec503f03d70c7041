//! Server implementation.
//!
//! An authoritative fixed-tick game loop. Each tick, strictly in order:
//! drain queued session input, step physics (collision rules fire inside),
//! progress staged client onboarding, tick players, top up and tick rocks,
//! then flush one delta frame per onboarded session. Ticks never overlap: a
//! pass completes fully before the next is scheduled, and `step` itself
//! never suspends.
//!
//! Determinism notes:
//! - Keep simulation in a fixed timestep.
//! - Avoid wall-clock-dependent branching in gameplay code.
//! - Use stable ordering when iterating collections.

use std::{collections::HashMap, net::SocketAddr, time::Duration};

use anyhow::Context;
use tokio::{sync::mpsc, time::Instant};
use tracing::{debug, info, warn};

use rubble_shared::config::GameConfig;
use rubble_shared::msg::{ClientMsg, ServerMsg};
use rubble_shared::net::{WireListener, WirePacket};
use rubble_shared::protocol::{assemble_frame, encode_leaderboard, DeltaBatch, LeaderboardEntry};

use crate::session::{
    spawn_session_tasks, Session, SessionEvent, SessionId, ONBOARD_STAGES, ONBOARD_STAGE_PAUSE,
};
use crate::world::World;

/// Leaderboard frames go out every this many ticks.
const LEADERBOARD_INTERVAL: u32 = 5;

/// Game server: the world plus every connected session.
pub struct GameServer {
    pub cfg: GameConfig,
    pub world: World,
    sessions: HashMap<SessionId, Session>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: mpsc::UnboundedReceiver<SessionEvent>,
    listener: Option<WireListener>,
}

impl GameServer {
    /// Binds the listener and builds the world.
    pub async fn bind(cfg: GameConfig) -> anyhow::Result<Self> {
        cfg.validate()?;
        let addr: SocketAddr = cfg.listen_addr.parse().context("parse listen_addr")?;
        let listener = WireListener::bind(addr).await?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let world = World::new(cfg.clone())?;
        Ok(Self {
            cfg,
            world,
            sessions: HashMap::new(),
            events_tx,
            events_rx,
            listener: Some(listener),
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        self.listener
            .as_ref()
            .context("listener already handed to the accept loop")?
            .local_addr()
    }

    /// Moves the listener into a background accept task. Accepted
    /// connections appear to the loop as queued session events.
    pub fn start_accept_loop(&mut self) {
        let Some(listener) = self.listener.take() else {
            return;
        };
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((conn, addr)) => {
                        spawn_session_tasks(conn, addr, events.clone());
                    }
                    Err(err) => {
                        warn!(%err, "Accept failed; stopping accept loop");
                        break;
                    }
                }
            }
        });
    }

    /// Runs the loop forever at the configured tick rate.
    pub async fn run(mut self) -> anyhow::Result<()> {
        self.start_accept_loop();
        let dt = Duration::from_secs_f32(1.0 / self.cfg.tick_hz as f32);
        let mut next = Instant::now();
        loop {
            self.step();
            next += dt;
            tokio::time::sleep_until(next).await;
        }
    }

    /// Runs a bounded number of ticks (tests, tools).
    pub async fn run_for_ticks(&mut self, ticks: u32) -> anyhow::Result<()> {
        let dt = Duration::from_secs_f32(1.0 / self.cfg.tick_hz as f32);
        let mut next = Instant::now();
        for _ in 0..ticks {
            self.step();
            next += dt;
            tokio::time::sleep_until(next).await;
        }
        Ok(())
    }

    /// Executes one full tick. Synchronous on purpose: nothing in a tick
    /// suspends, so a pass always completes before the next is scheduled.
    pub fn step(&mut self) {
        self.drain_events();
        self.world.step_physics();
        self.progress_onboarding();
        self.world.tick_entities();
        self.flush();
        self.world.end_tick();
    }

    // ─── Session events ───

    fn drain_events(&mut self) {
        while let Ok(event) = self.events_rx.try_recv() {
            match event {
                SessionEvent::Connected { session, addr, tx } => {
                    let s = Session::new(session, tx);
                    if let Ok(pkt) = WirePacket::control(&ServerMsg::VerifyRequest) {
                        s.send(pkt);
                    }
                    info!(session, %addr, "Client connected");
                    self.sessions.insert(session, s);
                }
                SessionEvent::Msg { session, msg } => self.handle_msg(session, msg),
                SessionEvent::Disconnected { session } => {
                    if self.sessions.contains_key(&session) {
                        info!(session, "Client disconnected");
                        self.drop_session(session);
                    }
                }
            }
        }
    }

    /// Resolves a control message to a mutation on exactly one player, or
    /// drops it.
    fn handle_msg(&mut self, sid: SessionId, msg: ClientMsg) {
        match msg {
            ClientMsg::Verify => {
                if let Some(s) = self.sessions.get_mut(&sid) {
                    if !s.verified {
                        debug!(session = sid, "Client verified");
                    }
                    s.verified = true;
                }
            }
            ClientMsg::Join { name } => {
                let Some(s) = self.sessions.get(&sid) else {
                    return;
                };
                if s.player.is_some() {
                    return;
                }
                let pid = self.world.spawn_player(&name);
                let joined = self
                    .world
                    .players
                    .get(&pid)
                    .map(|p| p.name.clone())
                    .unwrap_or_default();
                if let Some(s) = self.sessions.get_mut(&sid) {
                    s.player = Some(pid);
                }
                self.world
                    .replication
                    .push_chat("SERVER".to_string(), format!("{joined} has connected!"));
            }
            ClientMsg::Key { key, state } => {
                if let Some(pid) = self.sessions.get(&sid).and_then(|s| s.player) {
                    self.world.apply_key(pid, key, state);
                }
            }
            ClientMsg::Shoot { x, y, state } => {
                if let Some(pid) = self.sessions.get(&sid).and_then(|s| s.player) {
                    self.world.apply_shoot(pid, x, y, state);
                }
            }
            ClientMsg::Chat { message } => {
                let Some(pid) = self.sessions.get(&sid).and_then(|s| s.player) else {
                    return;
                };
                let Some(name) = self.world.players.get(&pid).map(|p| p.name.clone()) else {
                    return;
                };
                self.world.replication.push_chat(name, message);
            }
        }
    }

    fn drop_session(&mut self, sid: SessionId) {
        if let Some(session) = self.sessions.remove(&sid) {
            if let Some(pid) = session.player {
                self.world.despawn_player(pid);
            }
        }
    }

    // ─── Onboarding ───

    /// Progresses clients through verification and the staged 3x3 chunk
    /// bootstrap: one chunk per stage, a short pause between stages,
    /// out-of-grid cells skipped.
    fn progress_onboarding(&mut self) {
        let row_len = self.world.grid.row_len() as isize;
        let ids: Vec<SessionId> = self.sessions.keys().copied().collect();
        for sid in ids {
            match self.sessions.get_mut(&sid) {
                Some(s) if s.initialized => continue,
                Some(s) => {
                    if !s.verified {
                        s.life -= 1;
                        if s.life == 0 {
                            warn!(session = sid, "Rogue client never verified; disconnecting");
                            self.drop_session(sid);
                            continue;
                        }
                    }
                }
                None => continue,
            }

            let Some(pid) = self.sessions.get(&sid).and_then(|s| s.player) else {
                continue;
            };
            {
                let Some(s) = self.sessions.get_mut(&sid) else {
                    continue;
                };
                if s.stage_timer > 0 {
                    s.stage_timer -= 1;
                    continue;
                }
            }
            let Some(player_chunk) = self.world.players.get(&pid).map(|p| p.chunk) else {
                continue;
            };

            // Find the next stage whose cell is inside the grid.
            let target = {
                let Some(s) = self.sessions.get_mut(&sid) else {
                    continue;
                };
                let mut stage = s.stage;
                let mut target = None;
                while stage < ONBOARD_STAGES {
                    let dx = (stage % 3) as isize - 1;
                    let dy = (stage / 3) as isize - 1;
                    let col = (player_chunk as isize % row_len) + dx;
                    let row = (player_chunk as isize / row_len) + dy;
                    if col >= 0 && col < row_len && row >= 0 && row < row_len {
                        target = Some((row * row_len + col) as usize);
                        break;
                    }
                    stage += 1;
                }
                match target {
                    Some(_) => {
                        s.stage = stage + 1;
                        s.stage_timer = ONBOARD_STAGE_PAUSE;
                    }
                    None => {
                        s.initialized = true;
                        info!(session = sid, "Onboarding complete");
                    }
                }
                target
            };

            if let Some(chunk) = target {
                let tiles = self.world.tiles_in_chunk(chunk);
                let batch = self.world.chunk_add_batch(chunk);
                let frame = assemble_frame(self.world.tick, &[&batch]);
                if let Some(s) = self.sessions.get(&sid) {
                    if let Ok(pkt) = WirePacket::control(&ServerMsg::TileInit { tiles }) {
                        s.send(pkt);
                    }
                    s.send(WirePacket::Delta(frame));
                    if let Ok(pkt) = WirePacket::control(&ServerMsg::SelfId { id: pid }) {
                        s.send(pkt);
                    }
                }
            }
        }
    }

    // ─── Flushing ───

    /// Sends each onboarded session its frame for this tick: full-state adds
    /// for chunks entering its interest set, deletes for chunks leaving it,
    /// and the accumulated deltas of its current 3x3 neighborhood.
    fn flush(&mut self) {
        let tick = self.world.tick;

        let leaderboard = if tick % LEADERBOARD_INTERVAL == 0 {
            let mut entries: Vec<LeaderboardEntry> = self
                .world
                .players
                .values()
                .map(|p| LeaderboardEntry {
                    id: p.id,
                    radius: p.radius as u16,
                    name: p.name.clone(),
                })
                .collect();
            entries.sort_by(|a, b| b.radius.cmp(&a.radius).then(a.id.cmp(&b.id)));
            Some(WirePacket::Leaderboard(encode_leaderboard(&entries)))
        } else {
            None
        };

        let chat_pkts: Vec<WirePacket> = self
            .world
            .replication
            .take_chat()
            .into_iter()
            .filter_map(|line| {
                WirePacket::control(&ServerMsg::Chat {
                    name: line.name,
                    message: line.message,
                })
                .ok()
            })
            .collect();

        let ids: Vec<SessionId> = self.sessions.keys().copied().collect();
        for sid in ids {
            let pid = {
                let Some(session) = self.sessions.get(&sid) else {
                    continue;
                };
                if !session.initialized {
                    continue;
                }
                let Some(pid) = session.player else {
                    continue;
                };
                if let Some(lb) = &leaderboard {
                    session.send(lb.clone());
                }
                for pkt in &chat_pkts {
                    session.send(pkt.clone());
                }
                pid
            };

            let (added, removed, interest) = match self.world.players.get_mut(&pid) {
                Some(p) => (
                    std::mem::take(&mut p.chunk_add),
                    std::mem::take(&mut p.chunk_delete),
                    p.interest.clone(),
                ),
                None => continue,
            };
            let mut owned: Vec<DeltaBatch> = Vec::new();
            for chunk in added {
                owned.push(self.world.chunk_add_batch(chunk));
            }
            for chunk in removed {
                owned.push(self.world.chunk_delete_batch(chunk));
            }
            let mut refs: Vec<&DeltaBatch> = owned.iter().collect();
            for chunk in &interest {
                if let Some(batch) = self.world.replication.batch_for(*chunk) {
                    refs.push(batch);
                }
            }
            let frame = assemble_frame(tick, &refs);
            if let Some(session) = self.sessions.get(&sid) {
                session.send(WirePacket::Delta(frame));
            }
        }
    }
}

/// Helper for tests: bind to an ephemeral port.
pub async fn bind_ephemeral() -> anyhow::Result<(GameServer, GameConfig)> {
    let cfg = GameConfig {
        listen_addr: "127.0.0.1:0".to_string(),
        ..Default::default()
    };
    let mut server = GameServer::bind(cfg).await?;
    let addr = server.local_addr()?;
    server.cfg.listen_addr = addr.to_string();
    let cfg = server.cfg.clone();
    Ok((server, cfg))
}
