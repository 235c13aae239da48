//! Race state machine
//!
//! Races are opt-in competitions layered on top of the normal status flow:
//! the owner collects an ordered list of areas, starts the race, and every
//! member is sent through the areas in order. The first player in a race's
//! member list owns it.
//!
//! The manager never touches the network. Every operation returns the
//! [`RaceEffect`]s the server should apply (chat lines and forced moves), and
//! the start sequence is advanced by [`RaceManager::tick`] from a timer task:
//!
//! ```text
//! Forming ─start─▶ Warning ─▶ AwaitMenu ─all in menu─▶ Countdown 3,2,1 ─▶ Started ─▶ Finished
//! ```

use crate::config::RaceTiming;
use log::{debug, info};
use shared::chunks::{AreaMode, ChunkMPlayer, LevelExit};
use shared::ConnectionId;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::{Duration, Instant};
use thiserror::Error;

pub type RaceId = u32;

/// Countdown numbers announced before the race begins.
const COUNTDOWN_FROM: u8 = 3;

/// One area a race passes through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Waypoint {
    pub sid: String,
    pub mode: AreaMode,
}

impl Waypoint {
    pub fn new(sid: impl Into<String>, mode: AreaMode) -> Self {
        Self {
            sid: sid.into(),
            mode,
        }
    }
}

impl fmt::Display for Waypoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.sid, self.mode)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RacerState {
    Waiting,
    Racing,
    Finished { time: Duration, rank: u32 },
}

#[derive(Debug, Clone)]
pub struct Racer {
    pub id: ConnectionId,
    pub name: String,
    pub state: RacerState,
    /// Index into the waypoint list; -1 while held in the menu.
    pub waypoint: i32,
    /// Whether the player has reported being at `waypoint` since the last move.
    arrived: bool,
    /// Whether the latest known status puts the player in the menu.
    in_menu: bool,
}

impl Racer {
    fn new(id: ConnectionId, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            state: RacerState::Waiting,
            waypoint: -1,
            arrived: false,
            in_menu: false,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, RacerState::Finished { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RacePhase {
    Forming,
    /// Start announced; members get moved to the menu at `until`.
    Warning { until: Instant },
    /// Waiting for every member to report being in the menu.
    AwaitMenu { deadline: Instant },
    Countdown { next: Instant, remaining: u8 },
    Started { since: Instant },
    Finished,
}

impl RacePhase {
    pub fn label(&self) -> &'static str {
        match self {
            RacePhase::Forming => "forming",
            RacePhase::Warning { .. } | RacePhase::AwaitMenu { .. } | RacePhase::Countdown { .. } => {
                "starting"
            }
            RacePhase::Started { .. } => "running",
            RacePhase::Finished => "finished",
        }
    }
}

/// Something the server has to do on behalf of the race manager.
#[derive(Debug, Clone, PartialEq)]
pub enum RaceEffect {
    Chat { to: Vec<ConnectionId>, text: String },
    /// `None` sends the player to the menu.
    Move {
        player: ConnectionId,
        to: Option<Waypoint>,
    },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RaceError {
    #[error("you are not in a race")]
    NotInRace,
    #[error("you are already in race #{0}")]
    AlreadyInRace(RaceId),
    #[error("race #{0} does not exist")]
    NoSuchRace(RaceId),
    #[error("only the race owner can do that")]
    NotOwner,
    #[error("race #{0} has already started")]
    AlreadyStarted(RaceId),
    #[error("add at least one area before starting")]
    NoWaypoints,
    #[error("the race has no area number {0}")]
    NoSuchWaypoint(usize),
}

enum StatusOutcome {
    Keep,
    Drop(&'static str),
}

#[derive(Debug, Clone)]
pub struct Race {
    pub id: RaceId,
    racers: Vec<Racer>,
    waypoints: Vec<Waypoint>,
    phase: RacePhase,
    finished: u32,
}

impl Race {
    fn new(id: RaceId, owner: ConnectionId, name: &str) -> Self {
        Self {
            id,
            racers: vec![Racer::new(owner, name)],
            waypoints: Vec::new(),
            phase: RacePhase::Forming,
            finished: 0,
        }
    }

    pub fn owner(&self) -> Option<ConnectionId> {
        self.racers.first().map(|racer| racer.id)
    }

    pub fn racers(&self) -> &[Racer] {
        &self.racers
    }

    pub fn racer(&self, id: ConnectionId) -> Option<&Racer> {
        self.racers.iter().find(|racer| racer.id == id)
    }

    pub fn waypoints(&self) -> &[Waypoint] {
        &self.waypoints
    }

    pub fn phase(&self) -> RacePhase {
        self.phase
    }

    pub fn member_ids(&self) -> Vec<ConnectionId> {
        self.racers.iter().map(|racer| racer.id).collect()
    }

    fn position(&self, id: ConnectionId) -> Option<usize> {
        self.racers.iter().position(|racer| racer.id == id)
    }

    fn announce(&self, effects: &mut Vec<RaceEffect>, text: String) {
        effects.push(RaceEffect::Chat {
            to: self.member_ids(),
            text,
        });
    }

    fn tick(
        &mut self,
        now: Instant,
        timing: &RaceTiming,
        effects: &mut Vec<RaceEffect>,
        late: &mut Vec<ConnectionId>,
    ) {
        match self.phase {
            RacePhase::Warning { until } if now >= until => {
                for racer in &mut self.racers {
                    racer.waypoint = -1;
                    // already there, so no new status will follow the move
                    racer.arrived = racer.in_menu;
                    racer.state = RacerState::Waiting;
                    effects.push(RaceEffect::Move {
                        player: racer.id,
                        to: None,
                    });
                }
                self.phase = RacePhase::AwaitMenu {
                    deadline: now + timing.menu_timeout,
                };
                debug!("Race #{} waiting for members to reach the menu", self.id);
            }
            RacePhase::AwaitMenu { deadline } => {
                if self.racers.iter().all(|racer| racer.arrived) {
                    self.announce(effects, COUNTDOWN_FROM.to_string());
                    self.phase = RacePhase::Countdown {
                        next: now + timing.countdown_step,
                        remaining: COUNTDOWN_FROM - 1,
                    };
                } else if now >= deadline {
                    late.extend(
                        self.racers
                            .iter()
                            .filter(|racer| !racer.arrived)
                            .map(|racer| racer.id),
                    );
                }
            }
            RacePhase::Countdown { next, remaining } if now >= next => {
                if remaining > 0 {
                    self.announce(effects, remaining.to_string());
                    self.phase = RacePhase::Countdown {
                        next: now + timing.countdown_step,
                        remaining: remaining - 1,
                    };
                    return;
                }
                let first = self.waypoints[0].clone();
                for racer in &mut self.racers {
                    racer.waypoint = 0;
                    racer.arrived = false;
                    racer.state = RacerState::Racing;
                    effects.push(RaceEffect::Move {
                        player: racer.id,
                        to: Some(first.clone()),
                    });
                }
                self.announce(effects, "GO!".to_string());
                self.phase = RacePhase::Started { since: now };
                info!("Race #{} started with {} players", self.id, self.racers.len());
            }
            _ => {}
        }
    }

    fn on_status(
        &mut self,
        player: ConnectionId,
        status: &ChunkMPlayer,
        now: Instant,
        effects: &mut Vec<RaceEffect>,
    ) -> StatusOutcome {
        let members = self.member_ids();
        let Some(index) = self.position(player) else {
            return StatusOutcome::Keep;
        };
        let racer = &mut self.racers[index];
        if !status.name.is_empty() {
            racer.name.clone_from(&status.name);
        }
        racer.in_menu = status.in_menu();

        match self.phase {
            RacePhase::AwaitMenu { .. } => {
                if racer.waypoint < 0 && status.in_menu() {
                    racer.arrived = true;
                }
                StatusOutcome::Keep
            }
            RacePhase::Started { since } => {
                if racer.state != RacerState::Racing {
                    return StatusOutcome::Keep;
                }
                if status.level_exit.map_or(false, LevelExit::is_abandon) {
                    return StatusOutcome::Drop("gave up");
                }
                let Some(current) = usize::try_from(racer.waypoint)
                    .ok()
                    .and_then(|index| self.waypoints.get(index))
                else {
                    return StatusOutcome::Keep;
                };

                let here = status.is_in_area(&current.sid, current.mode);
                if !racer.arrived {
                    if !here {
                        return StatusOutcome::Keep;
                    }
                    racer.arrived = true;
                } else if !here {
                    return StatusOutcome::Drop("left the race area");
                }
                if !status.level_completed {
                    return StatusOutcome::Keep;
                }

                let next = racer.waypoint as usize + 1;
                if let Some(waypoint) = self.waypoints.get(next) {
                    racer.waypoint = next as i32;
                    racer.arrived = false;
                    effects.push(RaceEffect::Move {
                        player,
                        to: Some(waypoint.clone()),
                    });
                    effects.push(RaceEffect::Chat {
                        to: vec![player],
                        text: format!(
                            "Area {}/{}: {}",
                            next + 1,
                            self.waypoints.len(),
                            waypoint
                        ),
                    });
                } else {
                    self.finished += 1;
                    let time = now.saturating_duration_since(since);
                    racer.state = RacerState::Finished {
                        time,
                        rank: self.finished,
                    };
                    effects.push(RaceEffect::Chat {
                        to: members,
                        text: format!(
                            "{} finished #{} in {}",
                            racer.name,
                            self.finished,
                            format_time(time)
                        ),
                    });
                    self.check_finished(effects);
                }
                StatusOutcome::Keep
            }
            _ => StatusOutcome::Keep,
        }
    }

    /// Moves a running race to Finished once every remaining racer is done.
    fn check_finished(&mut self, effects: &mut Vec<RaceEffect>) {
        if !matches!(self.phase, RacePhase::Started { .. })
            || self.racers.is_empty()
            || !self.racers.iter().all(Racer::is_finished)
        {
            return;
        }
        self.phase = RacePhase::Finished;
        info!("Race #{} finished", self.id);

        let mut results: Vec<(u32, Duration, &str)> = self
            .racers
            .iter()
            .filter_map(|racer| match racer.state {
                RacerState::Finished { time, rank } => Some((rank, time, racer.name.as_str())),
                _ => None,
            })
            .collect();
        results.sort_by_key(|(rank, _, _)| *rank);

        let mut text = format!("Race #{} results:", self.id);
        for (rank, time, name) in results {
            text.push_str(&format!("\n{}. {} {}", rank, name, format_time(time)));
        }
        self.announce(effects, text);
    }
}

/// All races on the server plus the player → race lookup
#[derive(Debug)]
pub struct RaceManager {
    timing: RaceTiming,
    races: BTreeMap<RaceId, Race>,
    membership: HashMap<ConnectionId, RaceId>,
    next_id: RaceId,
}

impl RaceManager {
    pub fn new(timing: RaceTiming) -> Self {
        Self {
            timing,
            races: BTreeMap::new(),
            membership: HashMap::new(),
            next_id: 1,
        }
    }

    pub fn race(&self, id: RaceId) -> Option<&Race> {
        self.races.get(&id)
    }

    pub fn race_of(&self, player: ConnectionId) -> Option<&Race> {
        self.membership
            .get(&player)
            .and_then(|id| self.races.get(id))
    }

    pub fn races(&self) -> impl Iterator<Item = &Race> {
        self.races.values()
    }

    pub fn is_empty(&self) -> bool {
        self.races.is_empty()
    }

    fn check_free(&self, player: ConnectionId) -> Result<(), RaceError> {
        match self.membership.get(&player) {
            Some(&id) => Err(RaceError::AlreadyInRace(id)),
            None => Ok(()),
        }
    }

    /// The race `player` owns while it is still forming.
    fn owned_forming(&mut self, player: ConnectionId) -> Result<&mut Race, RaceError> {
        let id = *self.membership.get(&player).ok_or(RaceError::NotInRace)?;
        let race = self.races.get_mut(&id).ok_or(RaceError::NoSuchRace(id))?;
        if race.owner() != Some(player) {
            return Err(RaceError::NotOwner);
        }
        if race.phase != RacePhase::Forming {
            return Err(RaceError::AlreadyStarted(id));
        }
        Ok(race)
    }

    pub fn create(&mut self, owner: ConnectionId, name: &str) -> Result<RaceId, RaceError> {
        self.check_free(owner)?;
        let id = self.next_id;
        self.next_id += 1;
        self.races.insert(id, Race::new(id, owner, name));
        self.membership.insert(owner, id);
        info!("{} created race #{}", name, id);
        Ok(id)
    }

    pub fn join(
        &mut self,
        player: ConnectionId,
        name: &str,
        id: RaceId,
    ) -> Result<Vec<RaceEffect>, RaceError> {
        self.check_free(player)?;
        let race = self.races.get_mut(&id).ok_or(RaceError::NoSuchRace(id))?;
        if race.phase != RacePhase::Forming {
            return Err(RaceError::AlreadyStarted(id));
        }
        race.racers.push(Racer::new(player, name));
        self.membership.insert(player, id);

        let mut effects = Vec::new();
        race.announce(&mut effects, format!("{} joined race #{}", name, id));
        Ok(effects)
    }

    /// Records a member's current status without treating it as progress.
    /// Used for statuses that arrived before the player joined.
    pub fn note_status(&mut self, player: ConnectionId, status: &ChunkMPlayer) {
        let Some(race) = self
            .membership
            .get(&player)
            .and_then(|id| self.races.get_mut(id))
        else {
            return;
        };
        if let Some(index) = race.position(player) {
            race.racers[index].in_menu = status.in_menu();
        }
    }

    pub fn leave(&mut self, player: ConnectionId) -> Result<Vec<RaceEffect>, RaceError> {
        if !self.membership.contains_key(&player) {
            return Err(RaceError::NotInRace);
        }
        Ok(self.remove_player(player, "left the race"))
    }

    /// Appends an area and returns the new waypoint count.
    pub fn add_waypoint(
        &mut self,
        player: ConnectionId,
        waypoint: Waypoint,
    ) -> Result<usize, RaceError> {
        let race = self.owned_forming(player)?;
        race.waypoints.push(waypoint);
        Ok(race.waypoints.len())
    }

    /// Removes the waypoint at `index`, or the last one.
    pub fn remove_waypoint(
        &mut self,
        player: ConnectionId,
        index: Option<usize>,
    ) -> Result<Waypoint, RaceError> {
        let race = self.owned_forming(player)?;
        let index = match index {
            Some(index) if index < race.waypoints.len() => index,
            Some(index) => return Err(RaceError::NoSuchWaypoint(index)),
            None => race
                .waypoints
                .len()
                .checked_sub(1)
                .ok_or(RaceError::NoWaypoints)?,
        };
        Ok(race.waypoints.remove(index))
    }

    pub fn start(
        &mut self,
        player: ConnectionId,
        now: Instant,
    ) -> Result<Vec<RaceEffect>, RaceError> {
        let warning = self.timing.warning;
        let race = self.owned_forming(player)?;
        if race.waypoints.is_empty() {
            return Err(RaceError::NoWaypoints);
        }
        race.phase = RacePhase::Warning {
            until: now + warning,
        };
        info!("Race #{} starting", race.id);

        let mut effects = Vec::new();
        race.announce(
            &mut effects,
            format!(
                "Race #{} starts in {} seconds, you will be sent to the menu",
                race.id,
                warning.as_secs()
            ),
        );
        Ok(effects)
    }

    /// Advances every race's start sequence.
    pub fn tick(&mut self, now: Instant) -> Vec<RaceEffect> {
        let mut effects = Vec::new();
        let mut late = Vec::new();
        for race in self.races.values_mut() {
            race.tick(now, &self.timing, &mut effects, &mut late);
        }
        for player in late {
            effects.extend(self.remove_player(player, "did not reach the menu in time"));
        }
        effects
    }

    /// Feeds a player's new status into their race, if any.
    pub fn on_status(
        &mut self,
        player: ConnectionId,
        status: &ChunkMPlayer,
        now: Instant,
    ) -> Vec<RaceEffect> {
        let Some(race) = self
            .membership
            .get(&player)
            .and_then(|id| self.races.get_mut(id))
        else {
            return Vec::new();
        };

        let mut effects = Vec::new();
        if let StatusOutcome::Drop(reason) = race.on_status(player, status, now, &mut effects) {
            effects.extend(self.remove_player(player, reason));
        }
        effects
    }

    /// Drops a player from whatever race they are in. Empty races are torn
    /// down; ownership passes to the next member in line.
    pub fn remove_player(&mut self, player: ConnectionId, reason: &str) -> Vec<RaceEffect> {
        let mut effects = Vec::new();
        let Some(id) = self.membership.remove(&player) else {
            return effects;
        };
        let Some(race) = self.races.get_mut(&id) else {
            return effects;
        };
        let Some(index) = race.position(player) else {
            return effects;
        };

        let racer = race.racers.remove(index);
        let mut to = race.member_ids();
        to.push(player);
        effects.push(RaceEffect::Chat {
            to,
            text: format!("{} {}", racer.name, reason),
        });

        if race.racers.is_empty() {
            self.races.remove(&id);
            info!("Race #{} closed", id);
            return effects;
        }
        if index == 0 {
            let owner = race.racers[0].name.clone();
            race.announce(&mut effects, format!("{} now owns race #{}", owner, id));
        }
        race.check_finished(&mut effects);
        effects
    }
}

/// `m:ss.mmm`
pub fn format_time(time: Duration) -> String {
    let ms = time.as_millis();
    format!("{}:{:02}.{:03}", ms / 60_000, (ms / 1000) % 60, ms % 1000)
}
