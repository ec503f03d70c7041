//! Human-readable control messages.
//!
//! Everything that is not the per-tick binary delta frame rides this JSON
//! channel: the verification handshake, join/input/chat events from the
//! client, and the one-shot bootstrap records (static tiles, assigned id)
//! sent during staged onboarding. These are simple pass-through structures;
//! the simulation only ever sees them as mutations on a single player.

use serde::{Deserialize, Serialize};

use crate::protocol::PlayerId;

/// Movement keys a client can hold down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Key {
    Up,
    Down,
    Left,
    Right,
    Boost,
}

/// Client → server control messages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ClientMsg {
    /// Acknowledges the verification challenge; completes onboarding liveness.
    Verify,
    /// Requests a player with the given display name.
    Join { name: String },
    /// A movement key changed state.
    Key { key: Key, state: bool },
    /// Shoot-charge state with an aim offset relative to the player.
    Shoot { x: f32, y: f32, state: bool },
    /// Chat line from a bound player.
    Chat { message: String },
}

/// One static backdrop tile, replicated once during onboarding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TileInfo {
    pub id: u32,
    /// Fixed-point x100, matching the binary records.
    pub x: i32,
    pub y: i32,
    pub length: i32,
    pub color: u8,
    pub alert: bool,
}

/// Server → client control messages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ServerMsg {
    /// Sent on connect; the client must answer with [`ClientMsg::Verify`].
    VerifyRequest,
    /// Static tile layout for one chunk of the initial neighborhood.
    TileInit { tiles: Vec<TileInfo> },
    /// Tells the client which entity id is its own avatar.
    SelfId { id: PlayerId },
    /// Chat broadcast.
    Chat { name: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_msg_roundtrip() {
        let msg = ClientMsg::Shoot {
            x: 1.5,
            y: -2.0,
            state: true,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(serde_json::from_str::<ClientMsg>(&json).unwrap(), msg);
    }

    #[test]
    fn server_msg_roundtrip() {
        let msg = ServerMsg::SelfId { id: PlayerId(17) };
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(serde_json::from_str::<ServerMsg>(&json).unwrap(), msg);
    }
}
