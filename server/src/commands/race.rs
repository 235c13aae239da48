//! `race` and `rc` commands

use super::{ChatCommand, CommandContext, CommandError, CommandRegistry};
use crate::error::ServerError;
use crate::race::{format_time, Race, RaceError, RaceId, RaceManager, RacerState, Waypoint};
use async_trait::async_trait;
use log::debug;
use shared::chunks::{AreaMode, ChunkRListAreas, Color};
use shared::ConnectionId;
use std::sync::Arc;
use std::time::Instant;

pub(super) fn register(registry: &mut CommandRegistry) {
    registry.register(Arc::new(RaceCommand));
    registry.register(Arc::new(RaceChat));
}

const RACE_USAGE: &str = "[+ [sid] [a|b|c] | - [n] | start | join <id> | leave | list | areas [id] | players [id]]";

struct RaceCommand;

impl RaceCommand {
    /// `+ [sid] [mode]`: appends an area, creating a race first if needed.
    /// Without a SID the invoker's current area is used.
    async fn add(&self, ctx: &CommandContext) -> Result<(), CommandError> {
        let player = ctx.player()?;
        let waypoint = match ctx.line.arg(1) {
            Some(sid) => {
                let mode = match ctx.line.arg(2) {
                    Some(mode) => AreaMode::parse(mode.raw())
                        .ok_or_else(|| CommandError::Failed(format!("unknown side {}", mode)))?,
                    None => AreaMode::Normal,
                };
                self.check_area(ctx, player, sid.raw()).await?;
                Waypoint::new(sid.raw(), mode)
            }
            None => {
                let status = ctx
                    .server
                    .status_of(player)
                    .await
                    .filter(|status| !status.in_menu())
                    .ok_or_else(|| {
                        CommandError::Failed("Enter an area or name one to add it".to_string())
                    })?;
                Waypoint::new(status.sid, status.mode)
            }
        };

        let name = ctx.server.player_name(player).await;
        let status = ctx.server.status_of(player).await;
        let (id, count) = {
            let mut races = ctx.server.races().lock().await;
            let id = match races.race_of(player) {
                Some(race) => race.id,
                None => {
                    let id = races.create(player, &name)?;
                    if let Some(status) = &status {
                        races.note_status(player, status);
                    }
                    id
                }
            };
            (id, races.add_waypoint(player, waypoint.clone())?)
        };
        ctx.reply(format!("Race #{}: area {} is {}", id, count, waypoint))
            .await;
        Ok(())
    }

    /// Asks the invoker's client which areas it has, so typos are caught
    /// before the race starts. Clients that do not answer are trusted.
    async fn check_area(
        &self,
        ctx: &CommandContext,
        player: ConnectionId,
        sid: &str,
    ) -> Result<(), CommandError> {
        let timeout = ctx.server.settings().request_timeout;
        match ctx.server.request::<ChunkRListAreas>(player, timeout).await {
            Ok(areas) if !areas.areas.is_empty() && !areas.contains(sid) => {
                Err(CommandError::Failed(format!("Unknown area {}", sid)))
            }
            Ok(_) => Ok(()),
            Err(ServerError::RequestTimeout { .. }) => {
                debug!("No area list from {}, accepting {}", player, sid);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn remove(&self, ctx: &CommandContext) -> Result<(), CommandError> {
        let player = ctx.player()?;
        let index = match ctx.line.arg(1) {
            Some(arg) => {
                let number = arg
                    .as_int()
                    .filter(|n| *n >= 1)
                    .ok_or_else(|| ctx.usage("- [n]"))?;
                Some(number as usize - 1)
            }
            None => None,
        };
        let removed = ctx
            .server
            .races()
            .lock()
            .await
            .remove_waypoint(player, index)?;
        ctx.reply(format!("Removed {}", removed)).await;
        Ok(())
    }

    async fn start(&self, ctx: &CommandContext) -> Result<(), CommandError> {
        let player = ctx.player()?;
        let effects = ctx
            .server
            .races()
            .lock()
            .await
            .start(player, Instant::now())?;
        ctx.server.apply_race_effects(effects).await;
        Ok(())
    }

    async fn join(&self, ctx: &CommandContext) -> Result<(), CommandError> {
        let player = ctx.player()?;
        let id = ctx
            .line
            .arg(1)
            .and_then(|arg| arg.as_int())
            .and_then(|id| RaceId::try_from(id).ok())
            .ok_or_else(|| ctx.usage("join <id>"))?;
        let name = ctx.server.player_name(player).await;
        let status = ctx.server.status_of(player).await;
        let effects = {
            let mut races = ctx.server.races().lock().await;
            let effects = races.join(player, &name, id)?;
            if let Some(status) = &status {
                races.note_status(player, status);
            }
            effects
        };
        ctx.server.apply_race_effects(effects).await;
        Ok(())
    }

    async fn leave(&self, ctx: &CommandContext) -> Result<(), CommandError> {
        let player = ctx.player()?;
        let effects = ctx.server.races().lock().await.leave(player)?;
        ctx.server.apply_race_effects(effects).await;
        Ok(())
    }

    async fn list(&self, ctx: &CommandContext) -> Result<(), CommandError> {
        let lines: Vec<String> = {
            let races = ctx.server.races().lock().await;
            races
                .races()
                .map(|race| {
                    let owner = race
                        .racers()
                        .first()
                        .map(|racer| racer.name.as_str())
                        .unwrap_or("nobody");
                    format!(
                        "#{} ({}) by {}: {} players, {} areas",
                        race.id,
                        race.phase().label(),
                        owner,
                        race.racers().len(),
                        race.waypoints().len()
                    )
                })
                .collect()
        };
        if lines.is_empty() {
            ctx.reply("No races").await;
        } else {
            ctx.reply(lines.join("\n")).await;
        }
        Ok(())
    }

    /// The race named by the second argument, or the invoker's own race.
    fn pick<'a>(
        &self,
        ctx: &CommandContext,
        races: &'a RaceManager,
    ) -> Result<&'a Race, CommandError> {
        match ctx.line.arg(1).and_then(|arg| arg.as_int()) {
            Some(id) => {
                let id = RaceId::try_from(id).map_err(|_| ctx.usage("areas [id]"))?;
                races
                    .race(id)
                    .ok_or(CommandError::Race(RaceError::NoSuchRace(id)))
            }
            None => {
                let player = ctx.player()?;
                races
                    .race_of(player)
                    .ok_or(CommandError::Race(RaceError::NotInRace))
            }
        }
    }

    async fn areas(&self, ctx: &CommandContext) -> Result<(), CommandError> {
        let text = {
            let races = ctx.server.races().lock().await;
            let race = self.pick(ctx, &races)?;
            if race.waypoints().is_empty() {
                format!("Race #{} has no areas yet", race.id)
            } else {
                let mut text = format!("Race #{} areas:", race.id);
                for (index, waypoint) in race.waypoints().iter().enumerate() {
                    text.push_str(&format!("\n{}. {}", index + 1, waypoint));
                }
                text
            }
        };
        ctx.reply(text).await;
        Ok(())
    }

    async fn players(&self, ctx: &CommandContext) -> Result<(), CommandError> {
        let text = {
            let races = ctx.server.races().lock().await;
            let race = self.pick(ctx, &races)?;
            let mut text = format!("Race #{} players:", race.id);
            for racer in race.racers() {
                let state = match racer.state {
                    RacerState::Waiting => "waiting".to_string(),
                    RacerState::Racing => format!(
                        "area {}/{}",
                        racer.waypoint.max(0) + 1,
                        race.waypoints().len()
                    ),
                    RacerState::Finished { time, rank } => {
                        format!("#{} in {}", rank, format_time(time))
                    }
                };
                text.push_str(&format!("\n{} ({})", racer.name, state));
            }
            text
        };
        ctx.reply(text).await;
        Ok(())
    }
}

#[async_trait]
impl ChatCommand for RaceCommand {
    fn name(&self) -> &'static str {
        "race"
    }

    fn args(&self) -> &'static str {
        RACE_USAGE
    }

    fn help(&self) -> &'static str {
        "Creates, joins and runs races"
    }

    async fn run(&self, ctx: &CommandContext) -> Result<(), CommandError> {
        let sub = ctx
            .line
            .arg(0)
            .map(|arg| arg.raw().to_lowercase())
            .unwrap_or_else(|| "list".to_string());
        match sub.as_str() {
            "+" | "add" => self.add(ctx).await,
            "-" | "remove" => self.remove(ctx).await,
            "start" => self.start(ctx).await,
            "join" => self.join(ctx).await,
            "leave" => self.leave(ctx).await,
            "list" => self.list(ctx).await,
            "areas" => self.areas(ctx).await,
            "players" => self.players(ctx).await,
            _ => Err(ctx.usage(RACE_USAGE)),
        }
    }
}

/// Chat visible only to the members of the invoker's race.
struct RaceChat;

#[async_trait]
impl ChatCommand for RaceChat {
    fn name(&self) -> &'static str {
        "rc"
    }

    fn args(&self) -> &'static str {
        "<text>"
    }

    fn help(&self) -> &'static str {
        "Talks to the players in your race"
    }

    async fn run(&self, ctx: &CommandContext) -> Result<(), CommandError> {
        let player = ctx.player()?;
        if ctx.line.rest.is_empty() {
            return Err(ctx.usage(self.args()));
        }
        let (id, members) = {
            let races = ctx.server.races().lock().await;
            let race = races
                .race_of(player)
                .ok_or(CommandError::Race(RaceError::NotInRace))?;
            (race.id, race.member_ids())
        };
        let name = ctx.server.player_name(player).await;
        ctx.server
            .send_chat_to(
                &members,
                format!("[Race #{}] {}: {}", id, name, ctx.line.rest),
                Color::ORANGE,
            )
            .await;
        Ok(())
    }
}
