//! Per-chunk replication accumulators.
//!
//! Entity lifecycle code pushes records here as things happen; once per tick
//! the session layer assembles each viewer's frame from the accumulators of
//! its interest set and the accumulators are cleared. Records are encoded
//! exactly once per tick regardless of viewer count.

use std::collections::HashMap;

use rubble_shared::protocol::{
    DeltaBatch, PlayerAdd, PlayerId, PlayerUpdate, RockAdd, RockId, RockUpdate,
};

/// A chat line queued for global broadcast this tick.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatLine {
    pub name: String,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct Replication {
    batches: HashMap<usize, DeltaBatch>,
    chat: Vec<ChatLine>,
}

impl Replication {
    pub fn new() -> Self {
        Self::default()
    }

    fn batch(&mut self, chunk: usize) -> &mut DeltaBatch {
        self.batches.entry(chunk).or_default()
    }

    pub fn add_player(&mut self, chunk: usize, rec: &PlayerAdd) {
        self.batch(chunk).push_add_player(rec);
    }

    pub fn update_player(&mut self, chunk: usize, rec: &PlayerUpdate) {
        self.batch(chunk).push_update_player(rec);
    }

    pub fn delete_player(&mut self, chunk: usize, id: PlayerId) {
        self.batch(chunk).push_delete_player(id);
    }

    pub fn add_rock(&mut self, chunk: usize, rec: &RockAdd) {
        self.batch(chunk).push_add_rock(rec);
    }

    pub fn update_rock(&mut self, chunk: usize, rec: &RockUpdate) {
        self.batch(chunk).push_update_rock(rec);
    }

    pub fn delete_rock(&mut self, chunk: usize, id: RockId) {
        self.batch(chunk).push_delete_rock(id);
    }

    pub fn batch_for(&self, chunk: usize) -> Option<&DeltaBatch> {
        self.batches.get(&chunk)
    }

    pub fn push_chat(&mut self, name: String, message: String) {
        self.chat.push(ChatLine { name, message });
    }

    pub fn take_chat(&mut self) -> Vec<ChatLine> {
        std::mem::take(&mut self.chat)
    }

    /// Clears the tick's accumulators after every viewer was flushed.
    pub fn reset(&mut self) {
        self.batches.clear();
        self.chat.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rubble_shared::protocol::assemble_frame;
    use rubble_shared::protocol::Frame;

    #[test]
    fn batches_accumulate_per_chunk() {
        let mut rep = Replication::new();
        rep.delete_rock(3, RockId(1));
        rep.delete_rock(3, RockId(2));
        rep.delete_player(4, PlayerId(9));

        assert!(rep.batch_for(0).is_none());
        let frame = assemble_frame(1, &[rep.batch_for(3).unwrap(), rep.batch_for(4).unwrap()]);
        let decoded = Frame::decode(&frame).unwrap();
        assert_eq!(decoded.delete_rocks, vec![RockId(1), RockId(2)]);
        assert_eq!(decoded.delete_players, vec![PlayerId(9)]);

        rep.reset();
        assert!(rep.batch_for(3).is_none());
    }
}
