//! SSRC routing tables
//!
//! Groups live in an arena; every SSRC a group owns maps to its slot. A
//! [`GroupId`] carries the slot generation so that an id kept past the
//! removal of its group never resolves to a later occupant of the slot.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::error::Error;
use crate::group::SourceGroup;
use crate::{Result, RtpSsrc};

/// Handle to a registered group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupId {
    index: usize,
    generation: u64,
}

#[derive(Debug)]
struct Slot<G> {
    generation: u64,
    group: Option<G>,
}

/// Arena of source groups indexed by SSRC
#[derive(Debug)]
pub struct SourceGroupRegistry<G> {
    slots: Vec<Slot<G>>,
    free: Vec<usize>,
    ssrcs: HashMap<RtpSsrc, usize>,
}

impl<G> Default for SourceGroupRegistry<G> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            ssrcs: HashMap::new(),
        }
    }
}

impl<G: SourceGroup> SourceGroupRegistry<G> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a group under each SSRC it owns
    ///
    /// An SSRC already owned by another group is taken over by this one.
    pub fn add(&mut self, group: G) -> Result<GroupId> {
        let info = group.info();
        if info.media_ssrc == 0 {
            return Err(Error::Configuration("Source group media SSRC must not be zero".to_string()));
        }
        let ssrcs = group.ssrcs();

        let index = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index];
                slot.generation += 1;
                slot.group = Some(group);
                index
            }
            None => {
                self.slots.push(Slot { generation: 0, group: Some(group) });
                self.slots.len() - 1
            }
        };

        for ssrc in ssrcs {
            if let Some(previous) = self.ssrcs.insert(ssrc, index) {
                if previous != index {
                    warn!("SSRC {:#010x} re-registered, previous group loses it", ssrc);
                }
            }
        }

        debug!(
            "Registered {} source group media={:#010x} rtx={:#010x} fec={:#010x}",
            info.media_type, info.media_ssrc, info.rtx_ssrc, info.fec_ssrc
        );

        Ok(GroupId {
            index,
            generation: self.slots[index].generation,
        })
    }

    /// Unregister a group from all its SSRCs and hand it back
    pub fn remove(&mut self, id: GroupId) -> Option<G> {
        let slot = self.slots.get_mut(id.index)?;
        if slot.generation != id.generation {
            return None;
        }
        let group = slot.group.take()?;

        // Mappings taken over by another group stay with that group
        self.ssrcs.retain(|_, index| *index != id.index);
        self.free.push(id.index);

        let info = group.info();
        debug!("Unregistered {} source group media={:#010x}", info.media_type, info.media_ssrc);
        Some(group)
    }

    /// Group owning `ssrc`
    pub fn lookup(&self, ssrc: RtpSsrc) -> Option<GroupId> {
        let index = *self.ssrcs.get(&ssrc)?;
        let slot = &self.slots[index];
        slot.group.as_ref().map(|_| GroupId {
            index,
            generation: slot.generation,
        })
    }

    pub fn get(&self, id: GroupId) -> Option<&G> {
        self.slots
            .get(id.index)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.group.as_ref())
    }

    pub fn get_mut(&mut self, id: GroupId) -> Option<&mut G> {
        self.slots
            .get_mut(id.index)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.group.as_mut())
    }

    /// Group owning `ssrc`, borrowed mutably
    pub fn lookup_mut(&mut self, ssrc: RtpSsrc) -> Option<&mut G> {
        let index = *self.ssrcs.get(&ssrc)?;
        self.slots[index].group.as_mut()
    }

    /// Earliest registered group still present
    pub fn first(&self) -> Option<&G> {
        self.slots.iter().find_map(|slot| slot.group.as_ref())
    }

    pub fn iter(&self) -> impl Iterator<Item = &G> {
        self.slots.iter().filter_map(|slot| slot.group.as_ref())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut G> {
        self.slots.iter_mut().filter_map(|slot| slot.group.as_mut())
    }

    /// Number of registered groups
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.first().is_none()
    }
}
