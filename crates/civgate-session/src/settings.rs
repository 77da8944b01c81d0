//! Game settings store.
//!
//! The session consults a handful of settings (`maxplayers`, `allowtake`,
//! `autotoggle`, `kicktime`, `aifill`, `connectmsg`). Each has a type, a
//! level needed to see it and a level needed to change it. Changes go
//! through [`Settings::set`], and whoever cares is told through the
//! [`SettingsObserver`] trait.

use std::fmt;
use std::time::Duration;

use civgate_protocol::{AccessLevel, SettingInfo};
use serde::{Deserialize, Serialize};

use crate::{SettingsError, allow_take};

/// A setting's value.
///
/// `#[serde(untagged)]` lets config files write plain literals:
/// `maxplayers = 8`, `autotoggle = true`, `allowtake = "HAhad"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl fmt::Display for SettingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingValue::Bool(b) => write!(f, "{}", if *b { "enabled" } else { "disabled" }),
            SettingValue::Int(i) => write!(f, "{i}"),
            SettingValue::Str(s) => write!(f, "\"{s}\""),
        }
    }
}

/// Receives setting changes.
pub trait SettingsObserver {
    fn on_setting_changed(&mut self, name: &str, value: &SettingValue);
}

#[derive(Clone, Copy)]
enum Kind {
    Bool,
    Int { min: i64, max: i64 },
    Str { validate: fn(&str) -> Result<(), String> },
}

/// Default values, in a form usable in a `static`.
#[derive(Clone, Copy)]
enum Literal {
    Bool(bool),
    Int(i64),
    Str(&'static str),
}

impl Literal {
    fn value(self) -> SettingValue {
        match self {
            Literal::Bool(b) => SettingValue::Bool(b),
            Literal::Int(i) => SettingValue::Int(i),
            Literal::Str(s) => SettingValue::Str(s.to_string()),
        }
    }
}

struct Definition {
    name: &'static str,
    category: &'static str,
    help: &'static str,
    kind: Kind,
    default: Literal,
    view_level: AccessLevel,
    change_level: AccessLevel,
}

fn any_string(_: &str) -> Result<(), String> {
    Ok(())
}

const CATEGORIES: [&str; 3] = ["players", "connection", "moderation"];

static DEFINITIONS: [Definition; 6] = [
    Definition {
        name: "maxplayers",
        category: "players",
        help: "Maximum number of players",
        kind: Kind::Int { min: 1, max: 512 },
        default: Literal::Int(32),
        view_level: AccessLevel::Info,
        change_level: AccessLevel::Ctrl,
    },
    Definition {
        name: "aifill",
        category: "players",
        help: "Fill the game with AI players up to this many in pregame",
        kind: Kind::Int { min: 0, max: 512 },
        default: Literal::Int(0),
        view_level: AccessLevel::Info,
        change_level: AccessLevel::Ctrl,
    },
    Definition {
        name: "allowtake",
        category: "players",
        help: "Which players may be taken or observed",
        kind: Kind::Str {
            validate: allow_take::validate,
        },
        default: Literal::Str(allow_take::DEFAULT_ALLOW_TAKE),
        view_level: AccessLevel::Info,
        change_level: AccessLevel::Ctrl,
    },
    Definition {
        name: "autotoggle",
        category: "players",
        help: "Hand players to the AI while nobody controls them",
        kind: Kind::Bool,
        default: Literal::Bool(false),
        view_level: AccessLevel::Info,
        change_level: AccessLevel::Ctrl,
    },
    Definition {
        name: "kicktime",
        category: "moderation",
        help: "Seconds before a kicked user may reconnect",
        kind: Kind::Int { min: 0, max: 86400 },
        default: Literal::Int(1800),
        view_level: AccessLevel::Ctrl,
        change_level: AccessLevel::Admin,
    },
    Definition {
        name: "connectmsg",
        category: "connection",
        help: "Message sent to every user on connect",
        kind: Kind::Str {
            validate: any_string,
        },
        default: Literal::Str(""),
        view_level: AccessLevel::Info,
        change_level: AccessLevel::Ctrl,
    },
];

/// A successful change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingChange {
    pub name: &'static str,
    pub old: SettingValue,
    pub new: SettingValue,
}

/// The current value of every setting.
#[derive(Debug, Clone)]
pub struct Settings {
    values: Vec<SettingValue>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            values: DEFINITIONS.iter().map(|d| d.default.value()).collect(),
        }
    }
}

impl Settings {
    fn index(name: &str) -> Result<usize, SettingsError> {
        DEFINITIONS
            .iter()
            .position(|d| d.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| SettingsError::Unknown(name.to_string()))
    }

    pub fn get(&self, name: &str) -> Option<&SettingValue> {
        Self::index(name).ok().map(|i| &self.values[i])
    }

    fn int(&self, name: &str) -> i64 {
        match self.get(name) {
            Some(SettingValue::Int(i)) => *i,
            _ => 0,
        }
    }

    fn string(&self, name: &str) -> &str {
        match self.get(name) {
            Some(SettingValue::Str(s)) => s,
            _ => "",
        }
    }

    pub fn max_players(&self) -> usize {
        usize::try_from(self.int("maxplayers")).unwrap_or(0)
    }

    pub fn aifill(&self) -> usize {
        usize::try_from(self.int("aifill")).unwrap_or(0)
    }

    pub fn allow_take(&self) -> &str {
        self.string("allowtake")
    }

    pub fn auto_ai_toggle(&self) -> bool {
        matches!(self.get("autotoggle"), Some(SettingValue::Bool(true)))
    }

    pub fn kick_time(&self) -> Duration {
        Duration::from_secs(u64::try_from(self.int("kicktime")).unwrap_or(0))
    }

    pub fn connect_message(&self) -> &str {
        self.string("connectmsg")
    }

    /// Number of settings, for the setting-control packet.
    pub fn count(&self) -> usize {
        DEFINITIONS.len()
    }

    pub fn categories(&self) -> Vec<String> {
        CATEGORIES.iter().map(|c| c.to_string()).collect()
    }

    /// Names of all settings, in definition order.
    pub fn names(&self) -> impl Iterator<Item = &'static str> {
        DEFINITIONS.iter().map(|d| d.name)
    }

    /// The category of a setting.
    pub fn category(&self, name: &str) -> Option<&'static str> {
        Self::index(name).ok().map(|i| DEFINITIONS[i].category)
    }

    /// How a setting looks to a connection with `level`.
    pub fn info_for(&self, name: &str, level: AccessLevel) -> Option<SettingInfo> {
        let i = Self::index(name).ok()?;
        let def = &DEFINITIONS[i];
        let visible = level >= def.view_level;
        Some(SettingInfo {
            name: def.name.to_string(),
            value: if visible {
                plain(&self.values[i])
            } else {
                String::new()
            },
            help: def.help.to_string(),
            visible,
            changeable: level >= def.change_level,
        })
    }

    /// Settings that become visible or hidden when a connection moves
    /// between `a` and `b`, in either direction.
    pub fn visibility_changes(&self, a: AccessLevel, b: AccessLevel) -> Vec<&'static str> {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        DEFINITIONS
            .iter()
            .filter(|d| {
                let seen_low = low >= d.view_level;
                let seen_high = high >= d.view_level;
                let change_low = low >= d.change_level;
                let change_high = high >= d.change_level;
                seen_low != seen_high || change_low != change_high
            })
            .map(|d| d.name)
            .collect()
    }

    /// Changes a setting on behalf of a caller with `level`.
    pub fn set(
        &mut self,
        name: &str,
        raw: &str,
        level: AccessLevel,
    ) -> Result<SettingChange, SettingsError> {
        let i = Self::index(name)?;
        let def = &DEFINITIONS[i];
        if level < def.change_level {
            return Err(SettingsError::Forbidden {
                name: def.name.to_string(),
                required: def.change_level,
            });
        }
        let value = parse(def, raw)?;
        Ok(self.store(i, value))
    }

    /// Sets an initial value from configuration, without level checks.
    pub fn set_initial(
        &mut self,
        name: &str,
        value: SettingValue,
    ) -> Result<(), SettingsError> {
        let i = Self::index(name)?;
        let def = &DEFINITIONS[i];
        let value = match (def.kind, value) {
            (Kind::Bool, v @ SettingValue::Bool(_)) => v,
            (_, SettingValue::Bool(b)) => parse(def, if b { "true" } else { "false" })?,
            (_, SettingValue::Int(n)) => parse(def, &n.to_string())?,
            (_, SettingValue::Str(s)) => parse(def, &s)?,
        };
        self.store(i, value);
        Ok(())
    }

    fn store(&mut self, i: usize, value: SettingValue) -> SettingChange {
        let old = std::mem::replace(&mut self.values[i], value.clone());
        SettingChange {
            name: DEFINITIONS[i].name,
            old,
            new: value,
        }
    }
}

fn plain(value: &SettingValue) -> String {
    match value {
        SettingValue::Bool(b) => b.to_string(),
        SettingValue::Int(i) => i.to_string(),
        SettingValue::Str(s) => s.clone(),
    }
}

fn parse(def: &Definition, raw: &str) -> Result<SettingValue, SettingsError> {
    let invalid = |reason: String| SettingsError::Invalid {
        name: def.name.to_string(),
        reason,
    };
    let raw = raw.trim();
    match def.kind {
        Kind::Bool => match raw.to_ascii_lowercase().as_str() {
            "1" | "on" | "true" | "enabled" | "yes" => Ok(SettingValue::Bool(true)),
            "0" | "off" | "false" | "disabled" | "no" => Ok(SettingValue::Bool(false)),
            _ => Err(invalid(format!("'{raw}' is not a boolean"))),
        },
        Kind::Int { min, max } => {
            let n: i64 = raw
                .parse()
                .map_err(|_| invalid(format!("'{raw}' is not a number")))?;
            if n < min || n > max {
                return Err(invalid(format!("{n} is outside {min}..={max}")));
            }
            Ok(SettingValue::Int(n))
        }
        Kind::Str { validate } => {
            let text = raw.trim_matches('"');
            validate(text).map_err(invalid)?;
            Ok(SettingValue::Str(text.to_string()))
        }
    }
}
