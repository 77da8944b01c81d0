//! `/delegate to|take|restore|cancel|show`.

use civgate_protocol::{AccessLevel, EventKind, PlayerId};

use super::{CommandStatus, Ctx, NameMatch, match_name};
use crate::{AttachError, DelegationError, is_valid_username};

const USAGE: &str = "Usage: /delegate to <username> [player-name] | take <player-name> \
                     | restore | cancel [player-name] | show [player-name]";

const SUBCOMMANDS: [&str; 5] = ["to", "take", "restore", "cancel", "show"];

pub(super) fn delegate(ctx: &mut Ctx<'_>, args: &[String]) -> CommandStatus {
    let Some((sub, rest)) = args.split_first() else {
        return ctx.syntax(USAGE);
    };
    let candidates = SUBCOMMANDS.iter().map(|s| (*s, *s));
    let sub = match match_name(candidates, sub) {
        Ok(sub) => sub,
        Err(NameMatch::NotFound | NameMatch::Ambiguous) => return ctx.syntax(USAGE),
    };
    match (sub, rest) {
        ("to", [user]) => to(ctx, user, None),
        ("to", [user, player]) => to(ctx, user, Some(player)),
        ("take", [player]) => take(ctx, player),
        ("restore", []) => restore(ctx),
        ("cancel", []) => cancel(ctx, None),
        ("cancel", [player]) => cancel(ctx, Some(player)),
        ("show", []) => show(ctx, None),
        ("show", [player]) => show(ctx, Some(player)),
        _ => ctx.syntax(USAGE),
    }
}

/// The named player, or the caller's own player when no name is given.
///
/// Naming someone else's player takes `Admin`.
fn owned_player(ctx: &mut Ctx<'_>, name: Option<&str>) -> Result<PlayerId, CommandStatus> {
    let own = ctx.caller.and_then(|c| ctx.session.own_player(c));
    let player = match name {
        Some(name) => ctx.find_player(name)?,
        None => match own {
            Some(p) => p,
            None if ctx.is_console() => return Err(ctx.syntax(USAGE)),
            None => return Err(ctx.fail("You do not control a player.")),
        },
    };
    if own != Some(player) && ctx.level < AccessLevel::Admin {
        return Err(ctx.forbidden("You can only manage the delegation of your own player."));
    }
    Ok(player)
}

/// `/delegate to <username> [player]`
fn to(ctx: &mut Ctx<'_>, user: &str, player: Option<&String>) -> CommandStatus {
    let p = match owned_player(ctx, player.map(String::as_str)) {
        Ok(p) => p,
        Err(status) => return status,
    };
    let name = ctx.player_name(p);
    let owner = ctx
        .session
        .players
        .get(p)
        .map(|p| p.orig_username.clone().unwrap_or_else(|| p.username.clone()))
        .unwrap_or_default();
    if !is_valid_username(user) {
        return ctx.fail(format!("'{user}' is not a valid username."));
    }
    if owner.eq_ignore_ascii_case(user) {
        return ctx.fail("Can't delegate control to yourself.");
    }
    if let Err(e) = ctx.session.set_delegate(p, Some(user)) {
        return ctx.fail(e.to_string());
    }
    if let Some(delegate) = ctx.session.conns.by_username(user) {
        ctx.session.notify_conn(
            delegate,
            EventKind::Delegation,
            &format!("Control of player '{name}' has been delegated to you."),
        );
        ctx.session.send_delegation_info(delegate);
    }
    ctx.ok(format!("Control of player '{name}' delegated to user {user}."))
}

/// `/delegate take <player>`
fn take(ctx: &mut Ctx<'_>, player: &str) -> CommandStatus {
    let conn = match ctx.require_caller() {
        Ok(conn) => conn,
        Err(status) => return status,
    };
    let p = match ctx.find_player(player) {
        Ok(p) => p,
        Err(status) => return status,
    };
    let name = ctx.player_name(p);
    let username = ctx.username(conn);
    let granted = ctx
        .session
        .players
        .get(p)
        .and_then(|p| p.delegate_to.as_deref())
        .is_some_and(|d| d.eq_ignore_ascii_case(&username));
    if !granted && ctx.level < AccessLevel::Admin {
        return ctx.forbidden(format!(
            "Control of player '{name}' has not been delegated to you."
        ));
    }

    match ctx.session.delegate_take(conn, p) {
        Ok(()) => ctx.ok(format!(
            "You are now controlling player '{name}'. \
             Use '/delegate restore' to relinquish control."
        )),
        Err(DelegationError::AlreadyDelegating(_)) => ctx.fail(
            "You are already controlling a delegated player. \
             Use '/delegate restore' to relinquish control first.",
        ),
        Err(DelegationError::PlayerDelegated(_)) => {
            ctx.fail(format!("Player '{name}' is already under delegated control."))
        }
        Err(DelegationError::AlreadyControlling(_)) => {
            ctx.fail(format!("You already control player '{name}'."))
        }
        Err(DelegationError::Attach(AttachError::PlayerControlled(_))) => ctx.fail(format!(
            "Player '{name}' is being played by someone else right now."
        )),
        Err(e) => ctx.fail(format!("Taking player '{name}' failed: {e}.")),
    }
}

/// `/delegate restore`
fn restore(ctx: &mut Ctx<'_>) -> CommandStatus {
    let conn = match ctx.require_caller() {
        Ok(conn) => conn,
        Err(status) => return status,
    };
    let delegated = ctx
        .session
        .conns
        .get(conn)
        .filter(|r| r.delegation.is_some())
        .and_then(|r| r.binding.controlled());
    let name = delegated.map(|p| ctx.player_name(p)).unwrap_or_default();

    match ctx.session.delegate_restore(conn) {
        Ok(()) => ctx.ok(format!("Control of player '{name}' returned to its owner.")),
        Err(DelegationError::NotDelegating(_)) => {
            ctx.fail("You are not currently controlling a delegated player.")
        }
        Err(e) => ctx.fail(format!("Could not restore your original connection: {e}.")),
    }
}

/// `/delegate cancel [player]`
///
/// A delegate currently playing the player is sent back first.
fn cancel(ctx: &mut Ctx<'_>, player: Option<&String>) -> CommandStatus {
    let p = match owned_player(ctx, player.map(String::as_str)) {
        Ok(p) => p,
        Err(status) => return status,
    };
    let name = ctx.player_name(p);
    let Some(delegate_to) = ctx.session.players.get(p).and_then(|p| p.delegate_to.clone())
    else {
        return ctx.fail(format!("No delegation defined for player '{name}'."));
    };

    if let Some(delegate) = ctx.session.conns.delegate_of(p) {
        if let Err(e) = ctx.session.delegate_restore(delegate) {
            return ctx.fail(format!(
                "Could not take player '{name}' back from {delegate_to}: {e}."
            ));
        }
        ctx.session.notify_conn(
            delegate,
            EventKind::Delegation,
            &format!("Control of player '{name}' was returned to its owner."),
        );
    }
    if let Err(e) = ctx.session.set_delegate(p, None) {
        return ctx.fail(e.to_string());
    }
    if let Some(conn) = ctx.session.conns.by_username(&delegate_to) {
        ctx.session.send_delegation_info(conn);
    }
    ctx.ok(format!("Delegation of player '{name}' cancelled."))
}

/// `/delegate show [player]`
fn show(ctx: &mut Ctx<'_>, player: Option<&String>) -> CommandStatus {
    let p = match player {
        Some(name) => match ctx.find_player(name) {
            Ok(p) => p,
            Err(status) => return status,
        },
        None => match ctx.caller.and_then(|c| ctx.session.own_player(c)) {
            Some(p) => p,
            None => return ctx.fail("You do not control a player."),
        },
    };
    let name = ctx.player_name(p);
    let Some(delegate_to) = ctx.session.players.get(p).and_then(|p| p.delegate_to.clone())
    else {
        return ctx.ok(format!("No delegation defined for player '{name}'."));
    };
    if let Some(delegate) = ctx.session.conns.delegate_of(p) {
        let playing = ctx.username(delegate);
        ctx.info(format!("Player '{name}' is currently played by {playing}."));
    }
    ctx.ok(format!(
        "Control of player '{name}' is delegated to user {delegate_to}."
    ))
}
