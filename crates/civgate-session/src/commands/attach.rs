//! `/observe`, `/take` and `/detach`.

use civgate_protocol::{AccessLevel, ConnectionId, PlayerId};

use super::{CommandStatus, Ctx};
use crate::{Binding, allow_take};

const DELEGATION_ACTIVE: &str =
    "Can't do that while controlling a delegated player; use '/delegate restore' first.";

/// Resolves the optional leading connection argument. A console caller
/// must always name one.
fn target_conn(
    ctx: &mut Ctx<'_>,
    conn_name: Option<&str>,
    usage: &str,
) -> Result<ConnectionId, CommandStatus> {
    let target = match (conn_name, ctx.caller) {
        (Some(name), _) => ctx.find_conn(name)?,
        (None, Some(caller)) => caller,
        (None, None) => return Err(ctx.syntax(usage)),
    };
    if !ctx.may_act_on(target) {
        return Err(ctx.forbidden("You can only do that for your own connection."));
    }
    Ok(target)
}

/// Checks `allowtake`; `Admin` and above are not bound by it.
fn allowed_to_take(
    ctx: &mut Ctx<'_>,
    player: Option<PlayerId>,
    will_observe: bool,
) -> Result<(), CommandStatus> {
    if ctx.level >= AccessLevel::Admin {
        return Ok(());
    }
    let session = &ctx.session;
    let verdict = allow_take::check(
        session.settings.allow_take(),
        player.and_then(|p| session.players.get(p)),
        will_observe,
        session.game.is_new_game,
    );
    verdict.map_err(|reason| ctx.fail(reason))
}

/// `/observe [connection] [player]`
pub(super) fn observe(ctx: &mut Ctx<'_>, args: &[String]) -> CommandStatus {
    const USAGE: &str = "Usage: /observe [connection-name] [player-name]";
    let (conn_name, player_name) = match (args, ctx.is_console()) {
        ([], _) => (None, None),
        ([player], false) => (None, Some(player.as_str())),
        ([conn], true) => (Some(conn.as_str()), None),
        ([conn, player], _) => (Some(conn.as_str()), Some(player.as_str())),
        _ => return ctx.syntax(USAGE),
    };
    let target = match target_conn(ctx, conn_name, USAGE) {
        Ok(conn) => conn,
        Err(status) => return status,
    };
    let player = match player_name.map(|name| ctx.find_player(name)).transpose() {
        Ok(player) => player,
        Err(status) => return status,
    };
    if let Err(status) = allowed_to_take(ctx, player, true) {
        return status;
    }

    let Some(record) = ctx.session.conns.get(target) else {
        return ctx.fail("That connection is gone.");
    };
    let username = record.username.clone();
    if record.delegation.is_some() {
        return ctx.fail(DELEGATION_ACTIVE);
    }
    let old = record.binding;
    let what = match player {
        Some(p) => ctx.player_name(p),
        None => "the whole game".to_string(),
    };
    if old == Binding::Observing(player) {
        return ctx.fail(format!("{username} already observes {what}."));
    }

    // Watching one's own player must not free its slot on the way.
    let remove_unused = old.controlled() != player;
    ctx.session.detach(target, remove_unused);
    match ctx.session.attach(target, player, true) {
        Ok(()) => ctx.ok(format!("{username} now observes {what}.")),
        Err(e) => ctx.fail(format!("{username} failed to observe {what}: {e}.")),
    }
}

/// `/take [connection] <player|->`
///
/// `-` takes any uncontrolled player, or a new one in pregame.
pub(super) fn take(ctx: &mut Ctx<'_>, args: &[String]) -> CommandStatus {
    const USAGE: &str = "Usage: /take [connection-name] <player-name|->";
    let (conn_name, player_name) = match (args, ctx.is_console()) {
        ([player], false) => (None, player.as_str()),
        ([conn, player], _) => (Some(conn.as_str()), player.as_str()),
        _ => return ctx.syntax(USAGE),
    };
    let target = match target_conn(ctx, conn_name, USAGE) {
        Ok(conn) => conn,
        Err(status) => return status,
    };
    let player = if player_name == "-" {
        None
    } else {
        match ctx.find_player(player_name) {
            Ok(p) => Some(p),
            Err(status) => return status,
        }
    };

    let Some(record) = ctx.session.conns.get(target) else {
        return ctx.fail("That connection is gone.");
    };
    let username = record.username.clone();
    if record.delegation.is_some() {
        return ctx.fail(DELEGATION_ACTIVE);
    }
    let old = record.binding;

    match player {
        Some(p) => {
            let name = ctx.player_name(p);
            if ctx.session.players.get(p).is_some_and(|p| p.is_protected()) {
                return ctx.fail(format!(
                    "A delegation is active for player '{name}'; /take is not possible."
                ));
            }
            if old == Binding::Controlling(p) {
                return ctx.fail(format!("{username} already controls {name}."));
            }
        }
        None if ctx.session.game.was_started()
            && ctx.session.players.find_uncontrolled_player().is_none() =>
        {
            return ctx.fail("There is no free player to take.");
        }
        None => {}
    }
    if let Err(status) = allowed_to_take(ctx, player, false) {
        return status;
    }

    if let Some(p) = player {
        if let Some(other) = ctx.session.conns.controller_of(p) {
            ctx.session.notify_detached(other, p);
            ctx.session.detach(other, false);
        }
    }
    // A player being switched away from is only removed when it is not
    // the one about to be taken.
    let remove_unused = old.controlled() != player;
    ctx.session.detach(target, remove_unused);

    match ctx.session.attach(target, player, false) {
        Ok(()) => {
            let name = ctx
                .session
                .conns
                .get(target)
                .and_then(|r| r.binding.controlled())
                .map(|p| ctx.player_name(p))
                .unwrap_or_default();
            ctx.ok(format!("{username} now controls {name}."))
        }
        Err(e) => ctx.fail(format!("{username} failed to attach: {e}.")),
    }
}

/// `/detach [connection]`
pub(super) fn detach(ctx: &mut Ctx<'_>, args: &[String]) -> CommandStatus {
    const USAGE: &str = "Usage: /detach [connection-name]";
    let conn_name = match args {
        [] => None,
        [conn] => Some(conn.as_str()),
        _ => return ctx.syntax(USAGE),
    };
    let target = match target_conn(ctx, conn_name, USAGE) {
        Ok(conn) => conn,
        Err(status) => return status,
    };
    let Some(record) = ctx.session.conns.get(target) else {
        return ctx.fail("That connection is gone.");
    };
    let username = record.username.clone();
    let binding = record.binding;
    if binding.is_unbound() {
        return ctx.fail(format!("{username} is not attached to any player."));
    }
    if record.delegation.is_some() {
        return ctx.fail(DELEGATION_ACTIVE);
    }

    let what = match binding.player() {
        Some(p) => ctx.player_name(p),
        None => "the game".to_string(),
    };
    ctx.session.detach(target, true);
    ctx.ok(format!("{username} detaching from {what}."))
}
