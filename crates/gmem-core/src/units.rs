//! Team-relative to process-global unit translation

use crate::types::{TeamIndex, UnitId, TEAM_ALL};
use crate::{Error, Result};
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

/// Maps team-relative unit ids to process-global ones and back
pub trait UnitMapper: Send + Sync {
    fn local_to_global(&self, team: TeamIndex, unit: UnitId) -> Result<UnitId>;
    fn global_to_local(&self, team: TeamIndex, unit: UnitId) -> Result<UnitId>;
}

/// Mapper that only knows the all-units team
#[derive(Debug, Default, Clone, Copy)]
pub struct Identity;

impl UnitMapper for Identity {
    fn local_to_global(&self, team: TeamIndex, unit: UnitId) -> Result<UnitId> {
        match team {
            TEAM_ALL => Ok(unit),
            _ => Err(Error::UnknownUnit { unit, team }),
        }
    }

    fn global_to_local(&self, team: TeamIndex, unit: UnitId) -> Result<UnitId> {
        self.local_to_global(team, unit)
    }
}

struct Members {
    l2g: Vec<UnitId>,
    g2l: HashMap<UnitId, UnitId>,
}

/// Membership tables for teams other than [`TEAM_ALL`].
///
/// Team 0 always translates as the identity.
#[derive(Default)]
pub struct TeamUnits {
    teams: RwLock<BTreeMap<TeamIndex, Members>>,
}

impl TeamUnits {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the global ids of `team`'s members, ordered by local id
    pub fn insert(&self, team: TeamIndex, members: Vec<UnitId>) -> Result<()> {
        if team == TEAM_ALL {
            return Err(Error::invalid("the all-units team cannot be redefined"));
        }
        let g2l = members
            .iter()
            .enumerate()
            .map(|(local, global)| (*global, local as UnitId))
            .collect::<HashMap<_, _>>();
        if g2l.len() != members.len() {
            return Err(Error::InvalidArgument(format!(
                "team {team} lists a unit more than once"
            )));
        }
        self.teams
            .write()?
            .insert(team, Members { l2g: members, g2l });
        Ok(())
    }

    pub fn remove(&self, team: TeamIndex) -> Result<bool> {
        Ok(self.teams.write()?.remove(&team).is_some())
    }
}

impl UnitMapper for TeamUnits {
    fn local_to_global(&self, team: TeamIndex, unit: UnitId) -> Result<UnitId> {
        if team == TEAM_ALL {
            return Ok(unit);
        }
        self.teams
            .read()?
            .get(&team)
            .and_then(|m| m.l2g.get(unit as usize).copied())
            .ok_or(Error::UnknownUnit { unit, team })
    }

    fn global_to_local(&self, team: TeamIndex, unit: UnitId) -> Result<UnitId> {
        if team == TEAM_ALL {
            return Ok(unit);
        }
        self.teams
            .read()?
            .get(&team)
            .and_then(|m| m.g2l.get(&unit).copied())
            .ok_or(Error::UnknownUnit { unit, team })
    }
}
