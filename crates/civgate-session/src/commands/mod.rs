//! Server commands.
//!
//! A chat line starting with `/`, or a line typed on the server console,
//! is a command. [`Session::execute_command`] splits it into words,
//! finds the command by name or unambiguous prefix, checks the caller's
//! access level and runs the handler.
//!
//! Commands that change bindings (`/observe`, `/take`, `/detach`,
//! `/delegate`) live in their own modules; they translate session errors
//! into the text the issuer sees.
//!
//! A caller whose level is too low for a votable command starts a vote
//! instead. If the vote passes, the command runs as if typed on the
//! console.

mod admin;
mod attach;
mod delegate;

use std::time::Instant;

use civgate_protocol::{AccessLevel, ConnectionId, EventKind, Packet, PlayerId};

use crate::{Ballot, Session, VoteStatus};

/// Result class of a command, as reported to the issuer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    Ok,
    /// Well-formed but could not be carried out.
    Fail,
    /// Malformed: unknown command, wrong arguments.
    Syntax,
    /// The caller's level is too low.
    Forbidden,
}

/// What a command produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    pub status: CommandStatus,
    /// Replies for the issuer, in order. Connected callers have already
    /// been sent these as chat messages.
    pub messages: Vec<String>,
}

type Handler = fn(&mut Ctx<'_>, &[String]) -> CommandStatus;

struct Command {
    name: &'static str,
    level: AccessLevel,
    /// Level at which the command can be put to a vote instead.
    vote_level: Option<AccessLevel>,
    handler: Handler,
}

static COMMANDS: [Command; 15] = [
    Command {
        name: "observe",
        level: AccessLevel::Info,
        vote_level: None,
        handler: attach::observe,
    },
    Command {
        name: "take",
        level: AccessLevel::Info,
        vote_level: None,
        handler: attach::take,
    },
    Command {
        name: "detach",
        level: AccessLevel::Info,
        vote_level: None,
        handler: attach::detach,
    },
    Command {
        name: "delegate",
        level: AccessLevel::Info,
        vote_level: None,
        handler: delegate::delegate,
    },
    Command {
        name: "cmdlevel",
        level: AccessLevel::Admin,
        vote_level: None,
        handler: admin::cmdlevel,
    },
    Command {
        name: "kick",
        level: AccessLevel::Admin,
        vote_level: Some(AccessLevel::Basic),
        handler: admin::kick,
    },
    Command {
        name: "cut",
        level: AccessLevel::Ctrl,
        vote_level: None,
        handler: admin::cut,
    },
    Command {
        name: "create",
        level: AccessLevel::Ctrl,
        vote_level: None,
        handler: admin::create,
    },
    Command {
        name: "remove",
        level: AccessLevel::Ctrl,
        vote_level: None,
        handler: admin::remove,
    },
    Command {
        name: "set",
        level: AccessLevel::Ctrl,
        vote_level: None,
        handler: admin::set,
    },
    Command {
        name: "start",
        level: AccessLevel::Ctrl,
        vote_level: None,
        handler: admin::start,
    },
    Command {
        name: "list",
        level: AccessLevel::Info,
        vote_level: None,
        handler: admin::list,
    },
    Command {
        name: "ignore",
        level: AccessLevel::Info,
        vote_level: None,
        handler: admin::ignore,
    },
    Command {
        name: "unignore",
        level: AccessLevel::Info,
        vote_level: None,
        handler: admin::unignore,
    },
    Command {
        name: "vote",
        level: AccessLevel::Basic,
        vote_level: None,
        handler: admin::vote,
    },
];

/// State of one command execution.
pub(crate) struct Ctx<'a> {
    pub(crate) session: &'a mut Session,
    /// `None` for the server console.
    pub(crate) caller: Option<ConnectionId>,
    pub(crate) level: AccessLevel,
    pub(crate) now: Instant,
    /// Only check whether the command could run; a vote is about to
    /// be started for it.
    pub(crate) voting: bool,
    messages: Vec<String>,
}

impl Ctx<'_> {
    fn reply(&mut self, status: CommandStatus, message: impl Into<String>) -> CommandStatus {
        self.messages.push(message.into());
        status
    }

    pub(crate) fn ok(&mut self, message: impl Into<String>) -> CommandStatus {
        self.reply(CommandStatus::Ok, message)
    }

    pub(crate) fn fail(&mut self, message: impl Into<String>) -> CommandStatus {
        self.reply(CommandStatus::Fail, message)
    }

    pub(crate) fn syntax(&mut self, message: impl Into<String>) -> CommandStatus {
        self.reply(CommandStatus::Syntax, message)
    }

    pub(crate) fn forbidden(&mut self, message: impl Into<String>) -> CommandStatus {
        self.reply(CommandStatus::Forbidden, message)
    }

    /// Extra reply line that does not decide the status.
    pub(crate) fn info(&mut self, message: impl Into<String>) {
        self.messages.push(message.into());
    }

    pub(crate) fn is_console(&self) -> bool {
        self.caller.is_none()
    }

    /// The calling connection, or a failure reply for the console.
    pub(crate) fn require_caller(&mut self) -> Result<ConnectionId, CommandStatus> {
        match self.caller {
            Some(conn) => Ok(conn),
            None => Err(self.fail("This command is only available to connected users.")),
        }
    }

    pub(crate) fn caller_name(&self) -> String {
        self.caller
            .and_then(|c| self.session.conns.get(c))
            .map(|c| c.username.clone())
            .unwrap_or_else(|| "(server prompt)".to_string())
    }

    pub(crate) fn username(&self, conn: ConnectionId) -> String {
        self.session
            .conns
            .get(conn)
            .map(|c| c.username.clone())
            .unwrap_or_default()
    }

    pub(crate) fn player_name(&self, player: PlayerId) -> String {
        self.session
            .players
            .get(player)
            .map(|p| p.name.clone())
            .unwrap_or_default()
    }

    /// Acting on a connection other than one's own takes `Admin`.
    pub(crate) fn may_act_on(&self, target: ConnectionId) -> bool {
        self.caller == Some(target) || self.level >= AccessLevel::Admin
    }

    /// Established connection by username, exact or unique prefix.
    pub(crate) fn find_conn(&mut self, name: &str) -> Result<ConnectionId, CommandStatus> {
        let candidates = self
            .session
            .conns
            .established()
            .iter()
            .filter_map(|c| self.session.conns.get(*c))
            .map(|c| (c.id, c.username.as_str()));
        match match_name(candidates, name) {
            Ok(conn) => Ok(conn),
            Err(NameMatch::NotFound) => {
                Err(self.fail(format!("No connection by the name '{name}'.")))
            }
            Err(NameMatch::Ambiguous) => {
                Err(self.fail(format!("Connection name '{name}' is ambiguous.")))
            }
        }
    }

    /// Player by name, exact or unique prefix.
    pub(crate) fn find_player(&mut self, name: &str) -> Result<PlayerId, CommandStatus> {
        let candidates = self.session.players.iter().map(|p| (p.id, p.name.as_str()));
        match match_name(candidates, name) {
            Ok(p) => Ok(p),
            Err(NameMatch::NotFound) => Err(self.fail(format!("No player by the name '{name}'."))),
            Err(NameMatch::Ambiguous) => {
                Err(self.fail(format!("Player name '{name}' is ambiguous.")))
            }
        }
    }
}

enum NameMatch {
    NotFound,
    Ambiguous,
}

/// Exact match (ignoring case) first, then a unique prefix.
fn match_name<'a, T: Copy>(
    candidates: impl Iterator<Item = (T, &'a str)>,
    name: &str,
) -> Result<T, NameMatch> {
    let wanted = name.to_ascii_lowercase();
    let mut prefixed = Vec::new();
    for (id, candidate) in candidates {
        let candidate = candidate.to_ascii_lowercase();
        if candidate == wanted {
            return Ok(id);
        }
        if candidate.starts_with(&wanted) {
            prefixed.push(id);
        }
    }
    match prefixed.as_slice() {
        [id] => Ok(*id),
        [] => Err(NameMatch::NotFound),
        _ => Err(NameMatch::Ambiguous),
    }
}

/// Splits a command line into words. Double quotes group words.
pub fn tokenize(line: &str) -> Result<Vec<String>, String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quoted = false;
    for c in line.chars() {
        match c {
            '"' => {
                quoted = !quoted;
                in_word = true;
            }
            c if c.is_whitespace() && !quoted => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            c => {
                current.push(c);
                in_word = true;
            }
        }
    }
    if quoted {
        return Err("Unterminated quote.".into());
    }
    if in_word {
        words.push(current);
    }
    Ok(words)
}

fn find_command(name: &str) -> Result<&'static Command, String> {
    let candidates = COMMANDS.iter().enumerate().map(|(i, c)| (i, c.name));
    match match_name(candidates, name) {
        Ok(i) => Ok(&COMMANDS[i]),
        Err(NameMatch::NotFound) => Err(format!("Unknown command '/{name}'.")),
        Err(NameMatch::Ambiguous) => Err(format!("Ambiguous command '/{name}'.")),
    }
}

impl Session {
    /// Runs a command line (without the leading `/`). `caller` is
    /// `None` for the console, which has `Hack` level.
    pub fn execute_command(
        &mut self,
        caller: Option<ConnectionId>,
        line: &str,
        now: Instant,
    ) -> CommandOutcome {
        let level = match caller {
            None => AccessLevel::Hack,
            Some(conn) => match self.conns.get(conn) {
                Some(record) => record.access_level,
                None => {
                    return CommandOutcome {
                        status: CommandStatus::Fail,
                        messages: Vec::new(),
                    };
                }
            },
        };
        let mut ctx = Ctx {
            session: self,
            caller,
            level,
            now,
            voting: false,
            messages: Vec::new(),
        };
        let status = run(&mut ctx, line);
        let messages = ctx.messages;

        tracing::debug!(caller = ?caller, line, ?status, "command executed");
        if let Some(conn) = caller {
            for message in &messages {
                self.notify_conn(conn, EventKind::CommandReply, message);
            }
        }
        CommandOutcome { status, messages }
    }

    // -- Votes --

    fn start_vote(&mut self, caller: ConnectionId, command: &str, now: Instant) -> u32 {
        let name = self
            .conns
            .get(caller)
            .map(|c| c.username.clone())
            .unwrap_or_default();
        let (vote_no, replaced) = self.votes.start(caller, &name, command);
        if let Some(old) = replaced {
            self.broadcast(Packet::VoteRemove { vote_no: old });
        }
        let voters = self.voter_count();
        if let Some(vote) = self.votes.get(vote_no) {
            let packets = [vote.new_packet(voters), vote.update_packet(voters)];
            for packet in packets {
                self.broadcast(packet);
            }
        }
        tracing::info!(%caller, vote_no, command, "vote started");
        self.notify_all(
            EventKind::Vote,
            &format!("New vote (number {vote_no}) by {name}: {command}."),
        );
        let status = self.votes.check(vote_no, voters);
        self.settle_vote(vote_no, command, status, now);
        vote_no
    }

    /// Records a ballot and settles the vote if it is decided.
    pub fn cast_ballot(
        &mut self,
        voter: ConnectionId,
        vote_no: u32,
        ballot: Ballot,
        now: Instant,
    ) -> Result<(), crate::VoteError> {
        if !self.voters().contains(&voter) {
            return Err(crate::VoteError::NotEligible);
        }
        let command = self
            .votes
            .get(vote_no)
            .map(|v| v.command.clone())
            .ok_or(crate::VoteError::NotFound(vote_no))?;
        let voters = self.voter_count();
        let status = self.votes.cast(vote_no, voter, ballot, voters)?;
        self.settle_vote(vote_no, &command, Some(status), now);
        Ok(())
    }

    /// Re-evaluates every running vote, e.g. after a voter left.
    pub fn recheck_votes(&mut self) {
        let voters = self.voter_count();
        let running: Vec<(u32, String)> = self
            .votes
            .running()
            .iter()
            .map(|v| (v.vote_no, v.command.clone()))
            .collect();
        for (vote_no, command) in running {
            let status = self.votes.check(vote_no, voters);
            self.settle_vote(vote_no, &command, status, Instant::now());
        }
    }

    fn settle_vote(
        &mut self,
        vote_no: u32,
        command: &str,
        status: Option<VoteStatus>,
        now: Instant,
    ) {
        let voters = self.voter_count();
        match status {
            None => {}
            Some(VoteStatus::Running) => {
                if let Some(packet) = self.votes.get(vote_no).map(|v| v.update_packet(voters)) {
                    self.broadcast(packet);
                }
            }
            Some(VoteStatus::Passed(command)) => {
                self.broadcast(Packet::VoteResolve {
                    vote_no,
                    passed: true,
                });
                self.broadcast(Packet::VoteRemove { vote_no });
                self.notify_all(
                    EventKind::Vote,
                    &format!("Vote {vote_no} \"{command}\" is passed."),
                );
                tracing::info!(vote_no, command, "vote passed");
                let outcome = self.execute_command(None, &command, now);
                for message in outcome.messages {
                    tracing::info!(vote_no, message, "voted command reply");
                }
            }
            Some(VoteStatus::Failed) => {
                self.broadcast(Packet::VoteResolve {
                    vote_no,
                    passed: false,
                });
                self.broadcast(Packet::VoteRemove { vote_no });
                self.notify_all(
                    EventKind::Vote,
                    &format!("Vote {vote_no} \"{command}\" failed."),
                );
                tracing::info!(vote_no, command, "vote failed");
            }
        }
    }

    fn voter_count(&self) -> u32 {
        u32::try_from(self.voters().len()).unwrap_or(u32::MAX)
    }
}

fn run(ctx: &mut Ctx<'_>, line: &str) -> CommandStatus {
    let words = match tokenize(line) {
        Ok(words) => words,
        Err(e) => return ctx.syntax(e),
    };
    let Some((name, args)) = words.split_first() else {
        return ctx.syntax("Empty command.");
    };
    let command = match find_command(name) {
        Ok(command) => command,
        Err(e) => return ctx.syntax(e),
    };

    if ctx.level >= command.level {
        return (command.handler)(ctx, args);
    }
    match (command.vote_level, ctx.caller) {
        (Some(vote_level), Some(caller)) if ctx.level >= vote_level => {
            ctx.voting = true;
            let status = (command.handler)(ctx, args);
            ctx.voting = false;
            if status != CommandStatus::Ok {
                return status;
            }
            let line = std::iter::once(command.name.to_string())
                .chain(args.iter().map(|a| quote(a)))
                .collect::<Vec<_>>()
                .join(" ");
            let vote_no = ctx.session.start_vote(caller, &line, ctx.now);
            ctx.ok(format!("Your vote number {vote_no} has been started."))
        }
        _ => ctx.forbidden(format!(
            "You are not allowed to use '/{}'; it requires '{}'.",
            command.name, command.level
        )),
    }
}

fn quote(word: &str) -> String {
    if word.chars().any(char::is_whitespace) {
        format!("\"{word}\"")
    } else {
        word.to_string()
    }
}
