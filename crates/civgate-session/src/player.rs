//! Player slots.
//!
//! The game has a fixed-size table of player slots. A slot is either free
//! or holds one [`Player`]. [`PlayerSlots`] hands slots out, finds players
//! nobody controls, and frees slots again. It knows nothing about
//! connections: which connections are bound to a player is derived by
//! scanning the connection arena (see [`crate::Connections::bound_to`]).

use civgate_protocol::{NationId, PlayerId, PlayerInfo, Rgb};

use crate::PlayerError;

/// Username carried by a player nobody has claimed.
pub const ANON_USER_NAME: &str = "Unassigned";

/// Name given to a fresh player until it is renamed.
pub const DEFAULT_PLAYER_NAME: &str = "noname";

/// Who makes the decisions for a player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerMode {
    Human,
    Ai,
}

/// One player slot's occupant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    /// The user this player belongs to, or [`ANON_USER_NAME`].
    pub username: String,
    pub unassigned_user: bool,
    /// True iff a connection controls this player (observers don't count).
    pub is_connected: bool,
    /// Created explicitly by an admin; survives its controller leaving.
    pub was_created: bool,
    pub is_alive: bool,
    pub mode: PlayerMode,
    pub barbarian: bool,
    pub nation: Option<NationId>,
    pub team: u16,
    pub color: Rgb,
    /// Turns played by the current user.
    pub user_turns: u32,
    /// User allowed to take this player over with `/delegate take`.
    pub delegate_to: Option<String>,
    /// Set while the player is delegated or put aside; holds the name
    /// that [`Player::username`] must return to on restore.
    pub orig_username: Option<String>,
}

impl Player {
    fn new(id: PlayerId, mode: PlayerMode, nation: Option<NationId>) -> Self {
        Self {
            id,
            name: DEFAULT_PLAYER_NAME.to_string(),
            username: ANON_USER_NAME.to_string(),
            unassigned_user: true,
            is_connected: false,
            was_created: false,
            is_alive: false,
            mode,
            barbarian: false,
            nation,
            team: id.0,
            color: slot_color(id),
            user_turns: 0,
            delegate_to: None,
            orig_username: None,
        }
    }

    pub fn is_ai(&self) -> bool {
        self.mode == PlayerMode::Ai
    }

    pub fn is_human(&self) -> bool {
        self.mode == PlayerMode::Human
    }

    /// True while the player is delegated or put aside by its owner.
    /// Nobody but the delegation machinery may take or rename it then.
    pub fn is_protected(&self) -> bool {
        self.orig_username.is_some()
    }

    /// The public view sent to clients.
    pub fn info(&self) -> PlayerInfo {
        PlayerInfo {
            id: self.id,
            name: self.name.clone(),
            username: self.username.clone(),
            unassigned_user: self.unassigned_user,
            is_connected: self.is_connected,
            is_alive: self.is_alive,
            ai: self.is_ai(),
            barbarian: self.barbarian,
            nation: self.nation,
            team: self.team,
            color: self.color,
            was_created: self.was_created,
            delegate_to: self.delegate_to.clone(),
            delegated: self.is_protected(),
        }
    }
}

const PALETTE: [Rgb; 8] = [
    Rgb { r: 255, g: 0, b: 0 },
    Rgb { r: 0, g: 0, b: 255 },
    Rgb { r: 0, g: 160, b: 0 },
    Rgb { r: 255, g: 200, b: 0 },
    Rgb { r: 160, g: 0, b: 160 },
    Rgb { r: 0, g: 200, b: 200 },
    Rgb { r: 255, g: 128, b: 0 },
    Rgb { r: 128, g: 128, b: 128 },
];

fn slot_color(id: PlayerId) -> Rgb {
    PALETTE[id.index() % PALETTE.len()]
}

/// Limits that apply when a new player is allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreateLimits {
    /// The `maxplayers` setting.
    pub max_players: usize,
    /// Nations that may be played under the current nation set.
    pub playable_nations: usize,
}

/// Parameters of a new player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewPlayer {
    /// Use this slot instead of the first free one.
    pub requested_slot: Option<PlayerId>,
    pub mode: PlayerMode,
    pub barbarian: bool,
    pub nation: Option<NationId>,
    /// Players of a fresh game are alive right away. Players recreated
    /// while a saved game is loaded stay dead until the loader fills them.
    pub is_new_game: bool,
}

impl NewPlayer {
    /// A human player in the first free slot of a fresh game.
    pub fn human() -> Self {
        Self {
            requested_slot: None,
            mode: PlayerMode::Human,
            barbarian: false,
            nation: None,
            is_new_game: true,
        }
    }

    /// An AI player in the first free slot of a fresh game.
    pub fn ai() -> Self {
        Self {
            mode: PlayerMode::Ai,
            ..Self::human()
        }
    }
}

/// The fixed-size player table.
#[derive(Debug, Clone)]
pub struct PlayerSlots {
    slots: Vec<Option<Player>>,
}

impl PlayerSlots {
    /// Creates a table with `capacity` empty slots.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.min(usize::from(u16::MAX));
        Self {
            slots: vec![None; capacity],
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn get(&self, id: PlayerId) -> Option<&Player> {
        self.slots.get(id.index()).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, id: PlayerId) -> Option<&mut Player> {
        self.slots.get_mut(id.index()).and_then(Option::as_mut)
    }

    pub fn contains(&self, id: PlayerId) -> bool {
        self.get(id).is_some()
    }

    /// Occupied slots in slot order.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Player> {
        self.slots.iter().flatten()
    }

    pub fn iter_mut(&mut self) -> impl DoubleEndedIterator<Item = &mut Player> {
        self.slots.iter_mut().flatten()
    }

    /// Ids of all players, in slot order.
    pub fn ids(&self) -> Vec<PlayerId> {
        self.iter().map(|p| p.id).collect()
    }

    pub fn player_count(&self) -> usize {
        self.iter().count()
    }

    /// Players that are not barbarians.
    pub fn normal_player_count(&self) -> usize {
        self.iter().filter(|p| !p.barbarian).count()
    }

    /// First player, in slot order, that no connection controls and no
    /// admin created explicitly.
    pub fn find_uncontrolled_player(&self) -> Option<PlayerId> {
        self.iter()
            .find(|p| !p.is_connected && !p.was_created && !p.is_protected())
            .map(|p| p.id)
    }

    /// The player owned by `username`, compared case-insensitively.
    pub fn player_by_user(&self, username: &str) -> Option<PlayerId> {
        self.iter()
            .find(|p| p.username.eq_ignore_ascii_case(username))
            .map(|p| p.id)
    }

    /// The player whose true owner is `username` while it is delegated.
    pub fn delegated_player_of(&self, username: &str) -> Option<PlayerId> {
        self.iter()
            .find(|p| {
                p.orig_username
                    .as_deref()
                    .is_some_and(|u| u.eq_ignore_ascii_case(username))
            })
            .map(|p| p.id)
    }

    /// Player by exact name, ignoring case.
    pub fn player_by_name(&self, name: &str) -> Option<PlayerId> {
        self.iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
            .map(|p| p.id)
    }

    /// Allocates a slot and initializes a player in it.
    ///
    /// # Errors
    /// - [`PlayerError::SlotTaken`] if `requested_slot` is occupied
    /// - [`PlayerError::NoFreeSlot`] if the table is full
    /// - [`PlayerError::MaxPlayersReached`] / [`PlayerError::NationsExhausted`]
    ///   for a non-barbarian beyond the limits
    /// - [`PlayerError::NationTaken`] if another non-barbarian plays `nation`
    pub fn create_player(
        &mut self,
        new: NewPlayer,
        limits: CreateLimits,
    ) -> Result<PlayerId, PlayerError> {
        if !new.barbarian {
            let normal = self.normal_player_count();
            if normal >= limits.max_players {
                return Err(PlayerError::MaxPlayersReached(limits.max_players));
            }
            if normal >= limits.playable_nations {
                return Err(PlayerError::NationsExhausted);
            }
            if let Some(nation) = new.nation {
                if self
                    .iter()
                    .any(|p| !p.barbarian && p.nation == Some(nation))
                {
                    return Err(PlayerError::NationTaken(nation));
                }
            }
        }

        let index = match new.requested_slot {
            Some(id) => match self.slots.get(id.index()) {
                Some(None) => id.index(),
                Some(Some(_)) => return Err(PlayerError::SlotTaken(id)),
                None => return Err(PlayerError::NoFreeSlot),
            },
            None => self
                .slots
                .iter()
                .position(Option::is_none)
                .ok_or(PlayerError::NoFreeSlot)?,
        };

        // Capacity is clamped to u16::MAX in `new`.
        let id = PlayerId(index as u16);
        let mut player = Player::new(id, new.mode, new.nation);
        player.barbarian = new.barbarian;
        player.is_alive = new.is_new_game;
        self.slots[index] = Some(player);
        tracing::debug!(player = %id, "player slot allocated");
        Ok(id)
    }

    /// Frees a slot and returns its occupant.
    pub fn remove_player(&mut self, id: PlayerId) -> Result<Player, PlayerError> {
        let slot = self
            .slots
            .get_mut(id.index())
            .ok_or(PlayerError::UnknownPlayer(id))?;
        let player = slot.take().ok_or(PlayerError::UnknownPlayer(id))?;
        tracing::debug!(player = %id, "player slot freed");
        Ok(player)
    }
}
