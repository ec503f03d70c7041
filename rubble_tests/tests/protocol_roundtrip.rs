//! Pure encode/decode tests for the binary protocol, independent of the
//! simulation: a client decoding a frame must reconstruct every record with
//! byte-exact field values.

use rubble_shared::protocol::{
    decode_leaderboard, encode_leaderboard, quant_coarse, quant_fine, quant_theta, EntityFlags,
    Frame, LeaderboardEntry, PlayerAdd, PlayerId, PlayerUpdate, RockAdd, RockId, RockUpdate,
};

fn rock_add(id: u32, x: f32, y: f32) -> RockAdd {
    RockAdd {
        id: RockId(id),
        x: quant_coarse(x),
        y: quant_coarse(y),
        scale: 123,
        vertices: vec![(900, 100), (-400, 800), (-600, -700), (500, -500)],
        health: 36,
        max_health: 36,
        theta: quant_theta(2.2),
        texture: 2,
        flags: EntityFlags::empty(),
    }
}

#[test]
fn frame_with_mixed_sections_reconstructs_exactly() {
    let frame = Frame {
        tick: 100_000,
        add_rocks: vec![
            rock_add(1, 21.5, 42.25),
            rock_add(2, 150.0, 150.0),
            rock_add(3, 279.99, 20.01),
        ],
        add_players: vec![PlayerAdd {
            id: PlayerId(40),
            x: quant_coarse(150.0),
            y: quant_coarse(150.0),
            radius: 54,
            name: "unnamed friend".to_string(),
            vertices: vec![(1000, 0), (-500, 866), (-500, -866)],
            health: 100,
            max_health: 100,
            theta: quant_theta(-1.2),
            level: 1,
            flags: EntityFlags::VULNERABLE | EntityFlags::SHOOTING,
        }],
        update_rocks: vec![
            RockUpdate {
                id: RockId(1),
                x: quant_fine(21.5001),
                y: quant_fine(42.2503),
                health: 20,
                theta: quant_theta(2.21),
            },
            RockUpdate {
                id: RockId(2),
                x: quant_fine(150.0),
                y: quant_fine(150.0),
                health: 0,
                theta: 0,
            },
        ],
        update_players: vec![PlayerUpdate {
            id: PlayerId(40),
            x: quant_fine(150.02),
            y: quant_fine(149.98),
            radius: 54,
            health: 73,
            max_health: 100,
            shoot_meter: 12,
            theta: quant_theta(0.5),
            level: 1,
            flags: EntityFlags::SHOOTING,
        }],
        delete_rocks: vec![RockId(7), RockId(8), RockId(9), RockId(10)],
        delete_players: vec![PlayerId(41), PlayerId(42)],
    };

    let bytes = frame.encode();
    let decoded = Frame::decode(&bytes).expect("frame decodes");

    assert_eq!(decoded.add_rocks.len(), 3);
    assert_eq!(decoded.update_rocks.len(), 2);
    assert_eq!(decoded.delete_rocks.len(), 4);
    assert_eq!(decoded, frame);
    assert_eq!(decoded.encode(), bytes);
}

#[test]
fn empty_and_single_section_frames_roundtrip() {
    let empty = Frame {
        tick: 7,
        ..Default::default()
    };
    assert_eq!(Frame::decode(&empty.encode()).unwrap(), empty);

    let deletes_only = Frame {
        tick: 8,
        delete_players: vec![PlayerId(1)],
        ..Default::default()
    };
    assert_eq!(Frame::decode(&deletes_only.encode()).unwrap(), deletes_only);
}

#[test]
fn corrupt_terminator_is_rejected() {
    let frame = Frame {
        tick: 9,
        ..Default::default()
    };
    let mut bytes = frame.encode().to_vec();
    let last = bytes.len() - 1;
    bytes[last] = 0xff;
    assert!(Frame::decode(&bytes).is_err());
}

#[test]
fn leaderboard_roundtrip_preserves_order_and_names() {
    let entries = vec![
        LeaderboardEntry {
            id: PlayerId(3),
            radius: 210,
            name: "big".to_string(),
        },
        LeaderboardEntry {
            id: PlayerId(1),
            radius: 54,
            name: "unnamed friend".to_string(),
        },
    ];
    let decoded = decode_leaderboard(&encode_leaderboard(&entries)).unwrap();
    assert_eq!(decoded, entries);
}
