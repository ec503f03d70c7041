//! Binary delta-frame protocol.
//!
//! One frame per tick per viewer: a tick counter, then six record sections in
//! fixed order (add-rocks, add-players, update-rocks, update-players,
//! delete-rocks, delete-players), then a zero terminator. Rock sections carry
//! a u16 count, player sections a u8 count.
//!
//! Records store wire-domain integers (fixed-point positions, millivertices),
//! so encode/decode round-trips are byte-exact. Add records use x100
//! positions; the denser update records use x10000.
//!
//! The server accumulates pre-encoded sections per chunk ([`DeltaBatch`]) and
//! concatenates the batches in a viewer's interest set into a single frame,
//! so records are encoded once no matter how many viewers see the chunk.

use anyhow::Context;
use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::math::Vec2;

/// Identifies a player entity on the wire.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct PlayerId(pub u32);

/// Identifies a rock entity on the wire.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct RockId(pub u32);

bitflags! {
    /// Per-entity flag byte carried by add and update records.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct EntityFlags: u8 {
        const VULNERABLE = 0x01;
        const SHOOTING = 0x10;
    }
}

/// Position quantizer for add records.
pub fn quant_coarse(v: f32) -> u32 {
    (v * 100.0) as u32
}

/// Position quantizer for update records.
pub fn quant_fine(v: f32) -> u32 {
    (v * 10000.0) as u32
}

/// Orientation quantizer.
pub fn quant_theta(v: f32) -> i16 {
    (v * 100.0) as i16
}

/// Local-space vertex quantizer.
pub fn quant_vertex(v: Vec2) -> (i16, i16) {
    ((v.x * 1000.0) as i16, (v.y * 1000.0) as i16)
}

/// Health fields are u16 on the wire; negative interim values clamp to zero.
pub fn quant_health(v: f32) -> u16 {
    v.max(0.0).min(u16::MAX as f32) as u16
}

/// Full-state record for a rock entering a viewer's interest set.
#[derive(Debug, Clone, PartialEq)]
pub struct RockAdd {
    pub id: RockId,
    pub x: u32,
    pub y: u32,
    pub scale: u16,
    pub vertices: Vec<(i16, i16)>,
    pub health: u16,
    pub max_health: u16,
    pub theta: i16,
    pub texture: u8,
    pub flags: EntityFlags,
}

/// Full-state record for a player entering a viewer's interest set.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerAdd {
    pub id: PlayerId,
    pub x: u32,
    pub y: u32,
    pub radius: u16,
    pub name: String,
    pub vertices: Vec<(i16, i16)>,
    pub health: u16,
    pub max_health: u16,
    pub theta: i16,
    pub level: u8,
    pub flags: EntityFlags,
}

/// Mutable-field record for a rock already known to the viewer.
#[derive(Debug, Clone, PartialEq)]
pub struct RockUpdate {
    pub id: RockId,
    pub x: u32,
    pub y: u32,
    pub health: u16,
    pub theta: i16,
}

/// Mutable-field record for a player already known to the viewer.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerUpdate {
    pub id: PlayerId,
    pub x: u32,
    pub y: u32,
    pub radius: u16,
    pub health: u16,
    pub max_health: u16,
    pub shoot_meter: u8,
    pub theta: i16,
    pub level: u8,
    pub flags: EntityFlags,
}

fn put_name(buf: &mut BytesMut, name: &str) {
    let bytes = name.as_bytes();
    let len = bytes.len().min(u8::MAX as usize);
    buf.put_u8(len as u8);
    buf.put_slice(&bytes[..len]);
}

fn put_vertices(buf: &mut BytesMut, vertices: &[(i16, i16)]) {
    let len = vertices.len().min(u8::MAX as usize);
    buf.put_u8(len as u8);
    for &(x, y) in &vertices[..len] {
        buf.put_i16_le(x);
        buf.put_i16_le(y);
    }
}

impl RockAdd {
    fn write(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.id.0);
        buf.put_u32_le(self.x);
        buf.put_u32_le(self.y);
        buf.put_u16_le(self.scale);
        put_vertices(buf, &self.vertices);
        buf.put_u16_le(self.health);
        buf.put_u16_le(self.max_health);
        buf.put_i16_le(self.theta);
        buf.put_u8(self.texture);
        buf.put_u8(self.flags.bits());
    }
}

impl PlayerAdd {
    fn write(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.id.0);
        buf.put_u32_le(self.x);
        buf.put_u32_le(self.y);
        buf.put_u16_le(self.radius);
        put_name(buf, &self.name);
        put_vertices(buf, &self.vertices);
        buf.put_u16_le(self.health);
        buf.put_u16_le(self.max_health);
        buf.put_i16_le(self.theta);
        buf.put_u8(self.level);
        buf.put_u8(self.flags.bits());
    }
}

impl RockUpdate {
    fn write(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.id.0);
        buf.put_u32_le(self.x);
        buf.put_u32_le(self.y);
        buf.put_u16_le(self.health);
        buf.put_i16_le(self.theta);
    }
}

impl PlayerUpdate {
    fn write(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.id.0);
        buf.put_u32_le(self.x);
        buf.put_u32_le(self.y);
        buf.put_u16_le(self.radius);
        buf.put_u16_le(self.health);
        buf.put_u16_le(self.max_health);
        buf.put_u8(self.shoot_meter);
        buf.put_i16_le(self.theta);
        buf.put_u8(self.level);
        buf.put_u8(self.flags.bits());
    }
}

/// One pre-encoded record section: a running count plus concatenated bytes.
#[derive(Debug, Clone, Default)]
pub struct Section {
    count: u32,
    buf: BytesMut,
}

impl Section {
    pub fn count(&self) -> u32 {
        self.count
    }

    fn push(&mut self, write: impl FnOnce(&mut BytesMut)) {
        write(&mut self.buf);
        self.count += 1;
    }
}

/// Per-chunk accumulator for one tick's deltas.
#[derive(Debug, Clone, Default)]
pub struct DeltaBatch {
    pub add_rocks: Section,
    pub add_players: Section,
    pub update_rocks: Section,
    pub update_players: Section,
    pub delete_rocks: Section,
    pub delete_players: Section,
}

impl DeltaBatch {
    pub fn push_add_rock(&mut self, rec: &RockAdd) {
        self.add_rocks.push(|b| rec.write(b));
    }

    pub fn push_add_player(&mut self, rec: &PlayerAdd) {
        self.add_players.push(|b| rec.write(b));
    }

    pub fn push_update_rock(&mut self, rec: &RockUpdate) {
        self.update_rocks.push(|b| rec.write(b));
    }

    pub fn push_update_player(&mut self, rec: &PlayerUpdate) {
        self.update_players.push(|b| rec.write(b));
    }

    pub fn push_delete_rock(&mut self, id: RockId) {
        self.delete_rocks.push(|b| b.put_u32_le(id.0));
    }

    pub fn push_delete_player(&mut self, id: PlayerId) {
        self.delete_players.push(|b| b.put_u32_le(id.0));
    }

    pub fn is_empty(&self) -> bool {
        self.add_rocks.count == 0
            && self.add_players.count == 0
            && self.update_rocks.count == 0
            && self.update_players.count == 0
            && self.delete_rocks.count == 0
            && self.delete_players.count == 0
    }
}

fn put_rock_section<'a>(out: &mut BytesMut, sections: impl Iterator<Item = &'a Section>) {
    let mut count: u32 = 0;
    let mut bytes = BytesMut::new();
    for s in sections {
        count += s.count;
        bytes.extend_from_slice(&s.buf);
    }
    out.put_u16_le(count as u16);
    out.extend_from_slice(&bytes);
}

fn put_player_section<'a>(out: &mut BytesMut, sections: impl Iterator<Item = &'a Section>) {
    let mut count: u32 = 0;
    let mut bytes = BytesMut::new();
    for s in sections {
        count += s.count;
        bytes.extend_from_slice(&s.buf);
    }
    out.put_u8(count as u8);
    out.extend_from_slice(&bytes);
}

/// Concatenates the given batches into one frame, section by section.
pub fn assemble_frame(tick: u32, batches: &[&DeltaBatch]) -> Bytes {
    let mut out = BytesMut::new();
    out.put_u32_le(tick);
    put_rock_section(&mut out, batches.iter().map(|b| &b.add_rocks));
    put_player_section(&mut out, batches.iter().map(|b| &b.add_players));
    put_rock_section(&mut out, batches.iter().map(|b| &b.update_rocks));
    put_player_section(&mut out, batches.iter().map(|b| &b.update_players));
    put_rock_section(&mut out, batches.iter().map(|b| &b.delete_rocks));
    put_player_section(&mut out, batches.iter().map(|b| &b.delete_players));
    out.put_u8(0);
    out.freeze()
}

/// A fully decoded frame, as a client reconstructs it.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Frame {
    pub tick: u32,
    pub add_rocks: Vec<RockAdd>,
    pub add_players: Vec<PlayerAdd>,
    pub update_rocks: Vec<RockUpdate>,
    pub update_players: Vec<PlayerUpdate>,
    pub delete_rocks: Vec<RockId>,
    pub delete_players: Vec<PlayerId>,
}

impl Frame {
    pub fn encode(&self) -> Bytes {
        let mut batch = DeltaBatch::default();
        for r in &self.add_rocks {
            batch.push_add_rock(r);
        }
        for p in &self.add_players {
            batch.push_add_player(p);
        }
        for r in &self.update_rocks {
            batch.push_update_rock(r);
        }
        for p in &self.update_players {
            batch.push_update_player(p);
        }
        for &id in &self.delete_rocks {
            batch.push_delete_rock(id);
        }
        for &id in &self.delete_players {
            batch.push_delete_player(id);
        }
        assemble_frame(self.tick, &[&batch])
    }

    pub fn decode(mut buf: &[u8]) -> anyhow::Result<Frame> {
        let mut frame = Frame {
            tick: read_u32(&mut buf).context("frame tick")?,
            ..Default::default()
        };

        let n = read_u16(&mut buf).context("add-rocks count")?;
        for _ in 0..n {
            frame.add_rocks.push(read_rock_add(&mut buf)?);
        }
        let n = read_u8(&mut buf).context("add-players count")?;
        for _ in 0..n {
            frame.add_players.push(read_player_add(&mut buf)?);
        }
        let n = read_u16(&mut buf).context("update-rocks count")?;
        for _ in 0..n {
            frame.update_rocks.push(read_rock_update(&mut buf)?);
        }
        let n = read_u8(&mut buf).context("update-players count")?;
        for _ in 0..n {
            frame.update_players.push(read_player_update(&mut buf)?);
        }
        let n = read_u16(&mut buf).context("delete-rocks count")?;
        for _ in 0..n {
            frame
                .delete_rocks
                .push(RockId(read_u32(&mut buf).context("delete-rock id")?));
        }
        let n = read_u8(&mut buf).context("delete-players count")?;
        for _ in 0..n {
            frame
                .delete_players
                .push(PlayerId(read_u32(&mut buf).context("delete-player id")?));
        }

        let term = read_u8(&mut buf).context("terminator")?;
        if term != 0 {
            anyhow::bail!("bad frame terminator: {term}");
        }
        Ok(frame)
    }
}

/// One leaderboard line: id, replicated radius, display name.
#[derive(Debug, Clone, PartialEq)]
pub struct LeaderboardEntry {
    pub id: PlayerId,
    pub radius: u16,
    pub name: String,
}

/// u8 count, then per entry: u32 id, u16 radius, length-prefixed name.
pub fn encode_leaderboard(entries: &[LeaderboardEntry]) -> Bytes {
    let mut out = BytesMut::new();
    let count = entries.len().min(u8::MAX as usize);
    out.put_u8(count as u8);
    for e in &entries[..count] {
        out.put_u32_le(e.id.0);
        out.put_u16_le(e.radius);
        put_name(&mut out, &e.name);
    }
    out.freeze()
}

pub fn decode_leaderboard(mut buf: &[u8]) -> anyhow::Result<Vec<LeaderboardEntry>> {
    let count = read_u8(&mut buf).context("leaderboard count")?;
    let mut entries = Vec::with_capacity(count as usize);
    for _ in 0..count {
        entries.push(LeaderboardEntry {
            id: PlayerId(read_u32(&mut buf).context("leaderboard id")?),
            radius: read_u16(&mut buf).context("leaderboard radius")?,
            name: read_name(&mut buf)?,
        });
    }
    Ok(entries)
}

// ─── Decode primitives ───

fn need(buf: &[u8], n: usize) -> anyhow::Result<()> {
    if buf.remaining() < n {
        anyhow::bail!("truncated frame: wanted {n} bytes, had {}", buf.remaining());
    }
    Ok(())
}

fn read_u8(buf: &mut &[u8]) -> anyhow::Result<u8> {
    need(buf, 1)?;
    Ok(buf.get_u8())
}

fn read_u16(buf: &mut &[u8]) -> anyhow::Result<u16> {
    need(buf, 2)?;
    Ok(buf.get_u16_le())
}

fn read_i16(buf: &mut &[u8]) -> anyhow::Result<i16> {
    need(buf, 2)?;
    Ok(buf.get_i16_le())
}

fn read_u32(buf: &mut &[u8]) -> anyhow::Result<u32> {
    need(buf, 4)?;
    Ok(buf.get_u32_le())
}

fn read_name(buf: &mut &[u8]) -> anyhow::Result<String> {
    let len = read_u8(buf)? as usize;
    need(buf, len)?;
    let mut bytes = vec![0u8; len];
    buf.copy_to_slice(&mut bytes);
    String::from_utf8(bytes).context("name not utf-8")
}

fn read_vertices(buf: &mut &[u8]) -> anyhow::Result<Vec<(i16, i16)>> {
    let len = read_u8(buf)? as usize;
    let mut vertices = Vec::with_capacity(len);
    for _ in 0..len {
        vertices.push((read_i16(buf)?, read_i16(buf)?));
    }
    Ok(vertices)
}

fn read_rock_add(buf: &mut &[u8]) -> anyhow::Result<RockAdd> {
    Ok(RockAdd {
        id: RockId(read_u32(buf)?),
        x: read_u32(buf)?,
        y: read_u32(buf)?,
        scale: read_u16(buf)?,
        vertices: read_vertices(buf)?,
        health: read_u16(buf)?,
        max_health: read_u16(buf)?,
        theta: read_i16(buf)?,
        texture: read_u8(buf)?,
        flags: EntityFlags::from_bits_truncate(read_u8(buf)?),
    })
}

fn read_player_add(buf: &mut &[u8]) -> anyhow::Result<PlayerAdd> {
    Ok(PlayerAdd {
        id: PlayerId(read_u32(buf)?),
        x: read_u32(buf)?,
        y: read_u32(buf)?,
        radius: read_u16(buf)?,
        name: read_name(buf)?,
        vertices: read_vertices(buf)?,
        health: read_u16(buf)?,
        max_health: read_u16(buf)?,
        theta: read_i16(buf)?,
        level: read_u8(buf)?,
        flags: EntityFlags::from_bits_truncate(read_u8(buf)?),
    })
}

fn read_rock_update(buf: &mut &[u8]) -> anyhow::Result<RockUpdate> {
    Ok(RockUpdate {
        id: RockId(read_u32(buf)?),
        x: read_u32(buf)?,
        y: read_u32(buf)?,
        health: read_u16(buf)?,
        theta: read_i16(buf)?,
    })
}

fn read_player_update(buf: &mut &[u8]) -> anyhow::Result<PlayerUpdate> {
    Ok(PlayerUpdate {
        id: PlayerId(read_u32(buf)?),
        x: read_u32(buf)?,
        y: read_u32(buf)?,
        radius: read_u16(buf)?,
        health: read_u16(buf)?,
        max_health: read_u16(buf)?,
        shoot_meter: read_u8(buf)?,
        theta: read_i16(buf)?,
        level: read_u8(buf)?,
        flags: EntityFlags::from_bits_truncate(read_u8(buf)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_rock_add(id: u32) -> RockAdd {
        RockAdd {
            id: RockId(id),
            x: quant_coarse(150.25),
            y: quant_coarse(32.5),
            scale: 180,
            vertices: vec![(1000, 0), (-500, 866), (-500, -866)],
            health: 246,
            max_health: 246,
            theta: quant_theta(1.57),
            texture: 3,
            flags: EntityFlags::empty(),
        }
    }

    fn sample_player_add(id: u32) -> PlayerAdd {
        PlayerAdd {
            id: PlayerId(id),
            x: quant_coarse(150.0),
            y: quant_coarse(150.0),
            radius: 54,
            name: "tester".to_string(),
            vertices: vec![(1000, 0), (-500, 866), (-500, -866)],
            health: 100,
            max_health: 100,
            theta: 0,
            level: 1,
            flags: EntityFlags::SHOOTING,
        }
    }

    #[test]
    fn frame_roundtrip_is_byte_exact() {
        let frame = Frame {
            tick: 4242,
            add_rocks: vec![sample_rock_add(1), sample_rock_add(2)],
            add_players: vec![sample_player_add(7)],
            update_rocks: vec![RockUpdate {
                id: RockId(1),
                x: quant_fine(150.2501),
                y: quant_fine(32.5002),
                health: 120,
                theta: -157,
            }],
            update_players: vec![PlayerUpdate {
                id: PlayerId(7),
                x: quant_fine(150.0),
                y: quant_fine(150.0),
                radius: 54,
                health: 88,
                max_health: 100,
                shoot_meter: 30,
                theta: 314,
                level: 2,
                flags: EntityFlags::VULNERABLE,
            }],
            delete_rocks: vec![RockId(3), RockId(4), RockId(5)],
            delete_players: vec![PlayerId(9)],
        };

        let bytes = frame.encode();
        let back = Frame::decode(&bytes).unwrap();
        assert_eq!(frame, back);
        // Re-encoding the decoded frame reproduces the exact byte stream.
        assert_eq!(bytes, back.encode());
    }

    #[test]
    fn empty_frame_is_header_counts_terminator() {
        let frame = Frame {
            tick: 1,
            ..Default::default()
        };
        let bytes = frame.encode();
        // u32 tick + 3 u16 rock counts + 3 u8 player counts + terminator.
        assert_eq!(bytes.len(), 4 + 6 + 3 + 1);
        assert_eq!(Frame::decode(&bytes).unwrap(), frame);
    }

    #[test]
    fn multi_batch_assembly_merges_counts() {
        let mut a = DeltaBatch::default();
        a.push_add_rock(&sample_rock_add(1));
        let mut b = DeltaBatch::default();
        b.push_add_rock(&sample_rock_add(2));
        b.push_delete_rock(RockId(3));

        let bytes = assemble_frame(9, &[&a, &b]);
        let frame = Frame::decode(&bytes).unwrap();
        assert_eq!(frame.tick, 9);
        assert_eq!(frame.add_rocks.len(), 2);
        assert_eq!(frame.delete_rocks, vec![RockId(3)]);
    }

    #[test]
    fn truncated_frame_is_an_error() {
        let bytes = Frame {
            tick: 3,
            add_rocks: vec![sample_rock_add(1)],
            ..Default::default()
        }
        .encode();
        assert!(Frame::decode(&bytes[..bytes.len() - 4]).is_err());
    }

    #[test]
    fn leaderboard_roundtrip() {
        let entries = vec![
            LeaderboardEntry {
                id: PlayerId(1),
                radius: 54,
                name: "alpha".into(),
            },
            LeaderboardEntry {
                id: PlayerId(2),
                radius: 120,
                name: "unnamed friend".into(),
            },
        ];
        let bytes = encode_leaderboard(&entries);
        assert_eq!(decode_leaderboard(&bytes).unwrap(), entries);
    }
}
