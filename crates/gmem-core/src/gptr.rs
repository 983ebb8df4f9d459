//! Global pointer

use crate::types::{SegmentId, TeamIndex, UnitId, LOCAL_POOL_SEGMENT, TEAM_ALL, UNDEFINED_UNIT};

/// Opaque reference to memory owned by some unit.
///
/// `unit_id` is relative to the team named by `team`; the executor maps it
/// to a process-global unit before resolving `segment_id`. `offset` is a
/// byte offset into the segment as registered on that unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GlobalPtr {
    pub unit_id: UnitId,
    pub segment_id: SegmentId,
    pub team: TeamIndex,
    pub offset: u64,
}

impl GlobalPtr {
    /// Pointer that references nothing
    pub const NULL: GlobalPtr = GlobalPtr {
        unit_id: UNDEFINED_UNIT,
        segment_id: LOCAL_POOL_SEGMENT,
        team: TEAM_ALL,
        offset: 0,
    };

    pub const fn new(unit_id: UnitId, segment_id: SegmentId, team: TeamIndex, offset: u64) -> Self {
        Self {
            unit_id,
            segment_id,
            team,
            offset,
        }
    }

    /// Pointer into the local allocation pool of `unit_id`
    pub const fn local_pool(unit_id: UnitId, offset: u64) -> Self {
        Self::new(unit_id, LOCAL_POOL_SEGMENT, TEAM_ALL, offset)
    }

    pub const fn is_null(&self) -> bool {
        self.unit_id == UNDEFINED_UNIT
    }

    /// Whether the pointer targets the non-collective local pool
    pub const fn is_local_pool(&self) -> bool {
        self.segment_id == LOCAL_POOL_SEGMENT
    }

    /// Same unit and segment, different offset
    pub const fn with_offset(&self, offset: u64) -> Self {
        Self { offset, ..*self }
    }

    /// Advance by `bytes`, `None` on overflow
    pub fn checked_add(&self, bytes: u64) -> Option<Self> {
        self.offset.checked_add(bytes).map(|offset| self.with_offset(offset))
    }
}

impl std::fmt::Display for GlobalPtr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "GlobalPtr(unit={}, seg={}, team={}, off=0x{:x})",
            self.unit_id, self.segment_id, self.team, self.offset
        )
    }
}
