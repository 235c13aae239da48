//! General-purpose commands

use super::{ChatCommand, CommandContext, CommandError, CommandRegistry, Invoker};
use crate::error::ServerError;
use async_trait::async_trait;
use log::{debug, info};
use shared::chunks::{ChunkMEmote, ChunkMMoveTo, ChunkMSession, Color};
use shared::Frame;
use std::sync::Arc;

pub(super) fn register(registry: &mut CommandRegistry) {
    registry.register(Arc::new(Help));
    registry.register(Arc::new(Op));
    registry.register(Arc::new(Kick));
    registry.register(Arc::new(Broadcast));
    registry.register(Arc::new(Teleport));
    registry.register(Arc::new(Emote));
}

struct Help;

#[async_trait]
impl ChatCommand for Help {
    fn name(&self) -> &'static str {
        "help"
    }

    fn args(&self) -> &'static str {
        "[command]"
    }

    fn help(&self) -> &'static str {
        "Lists commands, or describes one"
    }

    async fn run(&self, ctx: &CommandContext) -> Result<(), CommandError> {
        let prefix = &ctx.server.settings().command_prefix;
        let describe = |command: &Arc<dyn ChatCommand>| {
            let op = if command.requires_op() { " (OP)" } else { "" };
            format!(
                "{}{} {}{}: {}",
                prefix,
                command.name(),
                command.args(),
                op,
                command.help()
            )
            .replace("  ", " ")
        };

        if let Some(verb) = ctx.line.arg(0) {
            let verb = verb.raw().trim_start_matches(prefix.as_str()).to_lowercase();
            let command = ctx
                .server
                .commands()
                .get(&verb)
                .ok_or(CommandError::UnknownCommand(verb))?;
            ctx.reply(describe(&command)).await;
            return Ok(());
        }

        let lines: Vec<String> = ctx.server.commands().iter().map(describe).collect();
        ctx.reply(lines.join("\n")).await;
        Ok(())
    }
}

struct Op;

#[async_trait]
impl ChatCommand for Op {
    fn name(&self) -> &'static str {
        "op"
    }

    fn args(&self) -> &'static str {
        "<player>"
    }

    fn help(&self) -> &'static str {
        "Grants OP privileges"
    }

    fn requires_op(&self) -> bool {
        true
    }

    async fn run(&self, ctx: &CommandContext) -> Result<(), CommandError> {
        let target = ctx.target(0, self.args()).await?;
        let name = ctx.server.player_name(target).await;
        if !ctx.server.grant_op(target).await {
            return Err(CommandError::Failed(format!("{} already is an OP", name)));
        }
        info!("{} made {} an OP", ctx.invoker_name().await, name);
        ctx.server
            .send_chat(target, "You are now an OP", Color::GOLD)
            .await;
        ctx.reply(format!("{} is now an OP", name)).await;
        Ok(())
    }
}

struct Kick;

#[async_trait]
impl ChatCommand for Kick {
    fn name(&self) -> &'static str {
        "kick"
    }

    fn args(&self) -> &'static str {
        "<player>"
    }

    fn help(&self) -> &'static str {
        "Disconnects a player"
    }

    fn requires_op(&self) -> bool {
        true
    }

    async fn run(&self, ctx: &CommandContext) -> Result<(), CommandError> {
        let target = ctx.target(0, self.args()).await?;
        let name = ctx.server.player_name(target).await;
        if ctx.invoker == Invoker::Player(target) || !ctx.server.can_kick(ctx.invoker, target).await {
            return Err(CommandError::CannotKick(name));
        }

        ctx.server.kick(target).await;
        ctx.server
            .broadcast_chat(format!("{} was kicked", name), Color::ORANGE)
            .await;
        Ok(())
    }
}

struct Broadcast;

#[async_trait]
impl ChatCommand for Broadcast {
    fn name(&self) -> &'static str {
        "broadcast"
    }

    fn args(&self) -> &'static str {
        "<text>"
    }

    fn help(&self) -> &'static str {
        "Sends a message from the server to everyone"
    }

    fn requires_op(&self) -> bool {
        true
    }

    async fn run(&self, ctx: &CommandContext) -> Result<(), CommandError> {
        if ctx.line.rest.is_empty() {
            return Err(ctx.usage(self.args()));
        }
        ctx.server
            .broadcast_chat(ctx.line.rest.clone(), Color::GOLD)
            .await;
        Ok(())
    }
}

/// Moves the invoker to another player's area, room and position, taking
/// over their session so collectibles and flags line up.
struct Teleport;

#[async_trait]
impl ChatCommand for Teleport {
    fn name(&self) -> &'static str {
        "tp"
    }

    fn args(&self) -> &'static str {
        "<player>"
    }

    fn help(&self) -> &'static str {
        "Teleports you to another player"
    }

    async fn run(&self, ctx: &CommandContext) -> Result<(), CommandError> {
        let player = ctx.player()?;
        let target = ctx.target(0, self.args()).await?;
        let name = ctx.server.player_name(target).await;
        if target == player {
            return Err(CommandError::Failed("You are already there".to_string()));
        }

        let status = ctx
            .server
            .status_of(target)
            .await
            .filter(|status| !status.in_menu())
            .ok_or_else(|| CommandError::Failed(format!("{} is not in an area", name)))?;

        let timeout = ctx.server.settings().request_timeout;
        let session = match ctx.server.request::<ChunkMSession>(target, timeout).await {
            Ok(session) if session.in_session => Some(session),
            Ok(_) => None,
            Err(ServerError::RequestTimeout { .. }) => {
                debug!("{} did not send a session, teleporting without one", name);
                None
            }
            Err(e) => return Err(e.into()),
        };
        let position = ctx
            .server
            .last_update_of(target)
            .await
            .map(|update| update.position);

        let move_to = ChunkMMoveTo {
            sid: status.sid.clone(),
            mode: status.mode,
            level: Some(status.level.clone()),
            session,
            position,
            force: false,
        };
        ctx.server.send_frame(player, Frame::with(move_to)).await;
        ctx.reply(format!("Teleporting to {}", name)).await;
        Ok(())
    }
}

struct Emote;

#[async_trait]
impl ChatCommand for Emote {
    fn name(&self) -> &'static str {
        "emote"
    }

    fn args(&self) -> &'static str {
        "<text | i:image>"
    }

    fn help(&self) -> &'static str {
        "Shows an emote above your head"
    }

    async fn run(&self, ctx: &CommandContext) -> Result<(), CommandError> {
        let player = ctx.player()?;
        let emote = ChunkMEmote {
            value: ctx.line.rest.clone(),
        };
        if emote.value.trim().is_empty() {
            return Err(ctx.usage(self.args()));
        }
        ctx.server.relay_emote(player, emote, true).await;
        Ok(())
    }
}
