//! Levels, moderation, players, settings, lists and votes.

use std::collections::HashSet;

use civgate_protocol::{AccessLevel, ConnectionId, EventKind, GamePhase};

use super::{CommandStatus, Ctx};
use crate::{Ballot, IgnorePattern, NewPlayer, PlayerMode, Removal, SettingsError};

/// `/cmdlevel [level [new|first|connection]]`
pub(super) fn cmdlevel(ctx: &mut Ctx<'_>, args: &[String]) -> CommandStatus {
    const USAGE: &str = "Usage: /cmdlevel [level [new|first|connection-name]]";
    let Some((level_name, rest)) = args.split_first() else {
        return list_levels(ctx);
    };
    let Some(level) = AccessLevel::from_name(level_name) else {
        return ctx.syntax(format!("Bad command access level '{level_name}'."));
    };
    if level > ctx.level {
        return ctx.forbidden(format!(
            "Cannot increase command access level to '{level}'; you only have '{}' yourself.",
            ctx.level
        ));
    }

    match rest {
        [] => {
            let targets: Vec<ConnectionId> = ctx.session.conns.established().to_vec();
            for conn in targets {
                if Some(conn) == ctx.caller {
                    continue;
                }
                let granted = ctx
                    .session
                    .conns
                    .get(conn)
                    .map(|c| c.granted_access_level)
                    .unwrap_or(AccessLevel::None);
                if granted <= ctx.level {
                    set_level(ctx, conn, level);
                }
            }
            ctx.session.default_access_level = level;
            if ctx.session.first_access_level < level {
                ctx.session.first_access_level = level;
            }
            ctx.ok(format!(
                "Command access level set to '{level}' for all connections and new players."
            ))
        }
        [which] if which.eq_ignore_ascii_case("new") => {
            ctx.session.default_access_level = level;
            if ctx.session.first_access_level < level {
                ctx.session.first_access_level = level;
            }
            ctx.ok(format!("Command access level set to '{level}' for new players."))
        }
        [which] if which.eq_ignore_ascii_case("first") => {
            ctx.session.first_access_level = level;
            if ctx.session.default_access_level > level {
                ctx.session.default_access_level = level;
            }
            ctx.ok(format!(
                "Command access level set to '{level}' for the first player to grab it."
            ))
        }
        [name] => {
            let conn = match ctx.find_conn(name) {
                Ok(conn) => conn,
                Err(status) => return status,
            };
            let (username, granted) = match ctx.session.conns.get(conn) {
                Some(c) => (c.username.clone(), c.granted_access_level),
                None => return ctx.fail("That connection is gone."),
            };
            if ctx.caller != Some(conn) && granted > ctx.level {
                return ctx.forbidden(format!(
                    "Cannot decrease command access level '{granted}' for connection \
                     '{username}'; you only have '{}'.",
                    ctx.level
                ));
            }
            set_level(ctx, conn, level);
            ctx.ok(format!(
                "Command access level set to '{level}' for connection {username}."
            ))
        }
        _ => ctx.syntax(USAGE),
    }
}

fn set_level(ctx: &mut Ctx<'_>, conn: ConnectionId, level: AccessLevel) {
    ctx.session.grant_access(conn, level);
    if ctx.caller != Some(conn) {
        let by = ctx.caller_name();
        ctx.session.notify_conn(
            conn,
            EventKind::Connection,
            &format!("{by} changed your command access level to '{level}'."),
        );
    }
}

fn list_levels(ctx: &mut Ctx<'_>) -> CommandStatus {
    ctx.info("Command access levels in effect:");
    let lines: Vec<String> = ctx
        .session
        .conns
        .established()
        .iter()
        .filter_map(|c| ctx.session.conns.get(*c))
        .map(|c| format!("  {:<6} {}", c.access_level.name(), c.username))
        .collect();
    for line in lines {
        ctx.info(line);
    }
    let (default, first) = (
        ctx.session.default_access_level,
        ctx.session.first_access_level,
    );
    ctx.info(format!("Command access level for new connections: {default}"));
    ctx.ok(format!(
        "Command access level for the first player to grab it: {first}"
    ))
}

/// `/kick <user>`
///
/// Put to a vote, it needs at least three distinct addresses online and
/// may not target the caller's own address.
pub(super) fn kick(ctx: &mut Ctx<'_>, args: &[String]) -> CommandStatus {
    let [name] = args else {
        return ctx.syntax("Usage: /kick <user>");
    };
    let target = match ctx.find_conn(name) {
        Ok(conn) => conn,
        Err(status) => return status,
    };
    let Some(target_addr) = ctx.session.conns.get(target).map(|c| c.addr.clone()) else {
        return ctx.fail("That connection is gone.");
    };

    if ctx.voting {
        let addrs: HashSet<&str> = ctx
            .session
            .conns
            .established()
            .iter()
            .filter_map(|c| ctx.session.conns.get(*c))
            .map(|c| c.addr.as_str())
            .collect();
        if addrs.len() < 3 {
            return ctx.fail(
                "There must be at least 3 unique connections to the server for this \
                 command to be valid.",
            );
        }
        let caller_addr = ctx
            .caller
            .and_then(|c| ctx.session.conns.get(c))
            .map(|c| c.addr.clone());
        if caller_addr.as_deref() == Some(target_addr.as_str()) {
            return ctx.fail("You may not kick yourself.");
        }
        return CommandStatus::Ok;
    }

    let username = ctx.username(target);
    ctx.session.notify_all(
        EventKind::Connection,
        &format!("{username} has been kicked from the server."),
    );
    ctx.session.kick(target, ctx.now);
    ctx.ok(format!("Kicked {username}."))
}

/// `/cut <connection>`
pub(super) fn cut(ctx: &mut Ctx<'_>, args: &[String]) -> CommandStatus {
    let [name] = args else {
        return ctx.syntax("Usage: /cut <connection-name>");
    };
    let target = match ctx.find_conn(name) {
        Ok(conn) => conn,
        Err(status) => return status,
    };
    let describe = ctx
        .session
        .conns
        .get(target)
        .map(|c| c.describe())
        .unwrap_or_default();
    ctx.session
        .close_connection(target, "Your connection was cut by the server.");
    ctx.ok(format!("Cutting connection {describe}."))
}

/// `/create <name> [ai|human]`
///
/// Created players are reserved: they survive their controller leaving.
pub(super) fn create(ctx: &mut Ctx<'_>, args: &[String]) -> CommandStatus {
    const USAGE: &str = "Usage: /create <player-name> [ai|human]";
    let (name, mode) = match args {
        [name] => (name, PlayerMode::Human),
        [name, mode] if mode.eq_ignore_ascii_case("ai") => (name, PlayerMode::Ai),
        [name, mode] if mode.eq_ignore_ascii_case("human") => (name, PlayerMode::Human),
        _ => return ctx.syntax(USAGE),
    };
    if name.is_empty() {
        return ctx.syntax(USAGE);
    }
    if ctx.session.players.player_by_name(name).is_some() {
        return ctx.fail(format!("A player named '{name}' already exists."));
    }
    if ctx.session.game.was_started() {
        return ctx.fail("Players can only be created before the game starts.");
    }

    let new = NewPlayer {
        mode,
        is_new_game: ctx.session.game.is_new_game,
        ..NewPlayer::human()
    };
    let limits = ctx.session.create_limits();
    let p = match ctx.session.players.create_player(new, limits) {
        Ok(p) => p,
        Err(e) => return ctx.fail(format!("Can't create player '{name}': {e}.")),
    };
    if let Some(player) = ctx.session.players.get_mut(p) {
        player.name = name.clone();
        player.was_created = true;
    }
    ctx.session.send_player_info_all(p);
    let info = ctx.session.game_info();
    ctx.session
        .broadcast(civgate_protocol::Packet::GameInfo(info));
    tracing::info!(player = %p, %name, "player created");
    ctx.ok(format!("Player '{name}' created."))
}

/// `/remove <player>`
pub(super) fn remove(ctx: &mut Ctx<'_>, args: &[String]) -> CommandStatus {
    let [name] = args else {
        return ctx.syntax("Usage: /remove <player-name>");
    };
    let p = match ctx.find_player(name) {
        Ok(p) => p,
        Err(status) => return status,
    };
    let name = ctx.player_name(p);
    match ctx.session.remove_player(p, Removal::Explicit(ctx.level)) {
        Ok(()) => {
            ctx.session
                .notify_all(EventKind::Player, &format!("{name} has been removed."));
            if !ctx.session.game.was_started() {
                ctx.session.aifill();
            }
            ctx.ok(format!("Removed player {name} from the game."))
        }
        Err(e) => ctx.fail(format!("Can't remove {name}: {e}.")),
    }
}

/// `/set <setting> <value>`
pub(super) fn set(ctx: &mut Ctx<'_>, args: &[String]) -> CommandStatus {
    let Some((name, value)) = args.split_first() else {
        return ctx.syntax("Usage: /set <setting-name> <value>");
    };
    if value.is_empty() {
        return ctx.syntax("Usage: /set <setting-name> <value>");
    }
    let value = value.join(" ");
    match ctx.session.change_setting(name, &value, ctx.level) {
        Ok(change) => ctx.ok(format!("Option {} is now {}.", change.name, change.new)),
        Err(e @ SettingsError::Forbidden { .. }) => ctx.forbidden(e.to_string()),
        Err(e) => ctx.fail(e.to_string()),
    }
}

/// `/start`
pub(super) fn start(ctx: &mut Ctx<'_>, args: &[String]) -> CommandStatus {
    if !args.is_empty() {
        return ctx.syntax("Usage: /start");
    }
    if ctx.session.game.phase != GamePhase::Pregame {
        return ctx.fail("The game is already running.");
    }
    ctx.session.start_game();
    ctx.ok("Starting the game.")
}

/// `/list [players|connections|votes]`
pub(super) fn list(ctx: &mut Ctx<'_>, args: &[String]) -> CommandStatus {
    let what = args.first().map(|s| s.to_ascii_lowercase());
    let lines: Vec<String> = match what.as_deref() {
        None | Some("players") => {
            let mut lines = vec![format!("List of players ({}):", ctx.session.players.player_count())];
            lines.extend(ctx.session.players.iter().map(|p| {
                let mut flags = vec![if p.is_ai() { "AI" } else { "human" }];
                if p.is_connected {
                    flags.push("connected");
                }
                if p.is_protected() {
                    flags.push("delegated");
                }
                if p.was_created {
                    flags.push("reserved");
                }
                format!("  {} [{}] ({})", p.name, p.username, flags.join(", "))
            }));
            lines
        }
        Some("connections") => {
            let conns = &ctx.session.conns;
            let mut lines = vec![format!("List of connections ({}):", conns.established().len())];
            lines.extend(conns.established().iter().filter_map(|c| conns.get(*c)).map(|c| {
                let binding = match c.binding.player() {
                    Some(p) => {
                        let name = ctx
                            .session
                            .players
                            .get(p)
                            .map(|p| p.name.as_str())
                            .unwrap_or("?");
                        if c.binding.is_observer() {
                            format!("observing {name}")
                        } else {
                            format!("playing {name}")
                        }
                    }
                    None if c.binding.is_global_observer() => "observing".to_string(),
                    None => "detached".to_string(),
                };
                format!("  {} [{}] {}", c.describe(), c.access_level, binding)
            }));
            lines
        }
        Some("votes") => {
            let votes = ctx.session.votes.running();
            if votes.is_empty() {
                vec!["There are no votes running.".to_string()]
            } else {
                votes
                    .iter()
                    .map(|v| format!("  Vote {}: \"{}\" by {}", v.vote_no, v.command, v.caller_name))
                    .collect()
            }
        }
        _ => return ctx.syntax("Usage: /list [players|connections|votes]"),
    };
    let Some((last, rest)) = lines.split_last() else {
        return CommandStatus::Ok;
    };
    for line in rest {
        ctx.info(line.clone());
    }
    ctx.ok(last.clone())
}

/// `/ignore [user=<glob>|host=<glob>]`; without argument shows the list.
pub(super) fn ignore(ctx: &mut Ctx<'_>, args: &[String]) -> CommandStatus {
    let conn = match ctx.require_caller() {
        Ok(conn) => conn,
        Err(status) => return status,
    };
    let patterns = ctx
        .session
        .conns
        .get(conn)
        .map(|c| c.ignore.clone())
        .unwrap_or_default();
    if args.is_empty() {
        if patterns.is_empty() {
            return ctx.ok("Your ignore list is empty.");
        }
        ctx.info("Your ignore list:");
        for (n, pattern) in patterns.iter().enumerate() {
            ctx.info(format!("  {}: {pattern}", n + 1));
        }
        return CommandStatus::Ok;
    }

    let Some(pattern) = IgnorePattern::parse(&args.join(" ")) else {
        return ctx.syntax("Usage: /ignore [user=<pattern>|host=<pattern>]");
    };
    if patterns.contains(&pattern) {
        return ctx.fail(format!("{pattern} is already in your ignore list."));
    }
    let Some(record) = ctx.session.conns.get_mut(conn) else {
        return ctx.fail("That connection is gone.");
    };
    record.ignore.push(pattern.clone());
    let n = record.ignore.len();
    ctx.ok(format!("Added pattern {pattern} as entry {n} to your ignore list."))
}

/// `/unignore <n>`
pub(super) fn unignore(ctx: &mut Ctx<'_>, args: &[String]) -> CommandStatus {
    let conn = match ctx.require_caller() {
        Ok(conn) => conn,
        Err(status) => return status,
    };
    let Some(n) = args.first().and_then(|a| a.parse::<usize>().ok()) else {
        return ctx.syntax("Usage: /unignore <entry-number>");
    };
    let Some(record) = ctx.session.conns.get_mut(conn) else {
        return ctx.fail("That connection is gone.");
    };
    if n == 0 || n > record.ignore.len() {
        let len = record.ignore.len();
        return ctx.fail(format!("Your ignore list has {len} entries; there is no entry {n}."));
    }
    let pattern = record.ignore.remove(n - 1);
    ctx.ok(format!("Removed pattern {pattern} (entry {n}) from your ignore list."))
}

/// `/vote yes|no|abstain [vote-number]`
pub(super) fn vote(ctx: &mut Ctx<'_>, args: &[String]) -> CommandStatus {
    const USAGE: &str = "Usage: /vote yes|no|abstain [vote-number]";
    let conn = match ctx.require_caller() {
        Ok(conn) => conn,
        Err(status) => return status,
    };
    let (ballot, number) = match args {
        [ballot] => (ballot, None),
        [ballot, number] => match number.parse::<u32>() {
            Ok(n) => (ballot, Some(n)),
            Err(_) => return ctx.syntax(USAGE),
        },
        _ => return ctx.syntax(USAGE),
    };
    let Some(ballot) = Ballot::parse(ballot) else {
        return ctx.syntax(USAGE);
    };
    let vote_no = match ctx.session.votes.pick(number) {
        Ok(n) => n,
        Err(e) => return ctx.fail(e.to_string()),
    };
    match ctx.session.cast_ballot(conn, vote_no, ballot, ctx.now) {
        Ok(()) => {
            let choice = match ballot {
                Ballot::Yes => "yes",
                Ballot::No => "no",
                Ballot::Abstain => "abstain",
            };
            ctx.ok(format!("You voted {choice} on vote {vote_no}."))
        }
        Err(e) => ctx.fail(e.to_string()),
    }
}
