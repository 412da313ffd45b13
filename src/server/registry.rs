//! Room membership table.
//!
//! Pure data structure owned by the hub task. Rooms are created by the first
//! `add` and dropped as soon as their last member is removed.

use std::collections::HashMap;

pub type MemberId = u64;

pub struct RoomRegistry<M> {
    rooms: HashMap<String, HashMap<MemberId, M>>,
}

impl<M> RoomRegistry<M> {
    pub fn new() -> Self {
        Self {
            rooms: HashMap::new(),
        }
    }

    pub fn add(&mut self, room: &str, id: MemberId, member: M) {
        self.rooms
            .entry(room.to_string())
            .or_default()
            .insert(id, member);
    }

    /// Removes one member. Unknown rooms or members are ignored.
    pub fn remove(&mut self, room: &str, id: MemberId) -> Option<M> {
        let members = self.rooms.get_mut(room)?;
        let removed = members.remove(&id);
        if members.is_empty() {
            self.rooms.remove(room);
        }
        removed
    }

    pub fn members_of(&self, room: &str) -> impl Iterator<Item = (MemberId, &M)> + '_ {
        self.rooms
            .get(room)
            .into_iter()
            .flat_map(|members| members.iter().map(|(id, m)| (*id, m)))
    }

    pub fn members_of_mut(
        &mut self,
        room: &str,
    ) -> impl Iterator<Item = (MemberId, &mut M)> + '_ {
        self.rooms
            .get_mut(room)
            .into_iter()
            .flat_map(|members| members.iter_mut().map(|(id, m)| (*id, m)))
    }

    pub fn contains_room(&self, room: &str) -> bool {
        self.rooms.contains_key(room)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn member_count(&self) -> usize {
        self.rooms.values().map(HashMap::len).sum()
    }

    /// Empties the registry, handing back every member.
    pub fn drain(&mut self) -> Vec<(String, MemberId, M)> {
        self.rooms
            .drain()
            .flat_map(|(room, members)| {
                members
                    .into_iter()
                    .map(move |(id, m)| (room.clone(), id, m))
            })
            .collect()
    }
}

impl<M> Default for RoomRegistry<M> {
    fn default() -> Self {
        Self::new()
    }
}
