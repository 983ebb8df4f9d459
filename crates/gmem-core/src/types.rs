//! Identifier types shared across the crate

/// Process-global or team-relative unit (process) id
pub type UnitId = u32;

/// Segment id as carried in a global pointer.
///
/// Id 0 is the per-process local allocation pool; collective allocations
/// use positive ids.
pub type SegmentId = i16;

/// Index of the team a global pointer's unit id is relative to (0 = all units)
pub type TeamIndex = u16;

/// Segment id understood by the network backend
pub type BackendSegment = u8;

/// Hardware transfer queue index
pub type QueueId = usize;

/// Marker for an unset unit id
pub const UNDEFINED_UNIT: UnitId = UnitId::MAX;

/// Segment id of the process-local allocation pool
pub const LOCAL_POOL_SEGMENT: SegmentId = 0;

/// Team index of the team containing every unit
pub const TEAM_ALL: TeamIndex = 0;
