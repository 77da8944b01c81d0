//! The `allowtake` setting.
//!
//! A compact string of category letters, each optionally followed by one
//! restriction digit. Which players may be taken or observed is decided
//! by the first letter in the string matching the player's category:
//!
//! | letter  | category                                |
//! |---------|-----------------------------------------|
//! | `H` `h` | human players                           |
//! | `A` `a` | AI players                              |
//! | `d`     | dead players                            |
//! | `b`     | barbarians                              |
//! | `O` `o` | observing globally (no player)          |
//!
//! Upper-case letters apply while the game is new, lower-case letters
//! after that (`d` and `b` have only one form). The digit after the
//! matched letter restricts it further:
//!
//! | digit | meaning                                            |
//! |-------|----------------------------------------------------|
//! | `1`   | may not take a player someone is connected to      |
//! | `2`   | may not observe                                    |
//! | `3`   | neither of the two above                           |
//! | `4`   | may only observe, never take                       |
//!
//! Absence of the category letter forbids both taking and observing.

use crate::Player;

/// Default value of the setting.
pub const DEFAULT_ALLOW_TAKE: &str = "HAhadOo";

const VALID_CHARS: &str = "HhAadbOo1234";

/// Validates an `allowtake` string.
pub fn validate(pattern: &str) -> Result<(), String> {
    if pattern.starts_with(|c: char| c.is_ascii_digit()) {
        return Err("the string may not start with a digit".into());
    }
    if let Some(bad) = pattern.chars().find(|c| !VALID_CHARS.contains(*c)) {
        return Err(format!("'{bad}' is not one of \"{VALID_CHARS}\""));
    }
    Ok(())
}

/// Checks whether a player may be taken or observed under `pattern`.
///
/// `player == None` means global observation when `will_observe` is set
/// and "any free player" otherwise; the latter is always allowed here.
///
/// The error string is the user-facing reason.
pub fn check(
    pattern: &str,
    player: Option<&Player>,
    will_observe: bool,
    is_new_game: bool,
) -> Result<(), String> {
    let verb = if will_observe { "observe" } else { "take" };

    let (letter, refusal) = match player {
        // Taking any free player is bounded by slots, not by this setting.
        None if !will_observe => return Ok(()),
        None => (
            if is_new_game { 'O' } else { 'o' },
            "Sorry, one can't observe globally in this game.".to_string(),
        ),
        Some(p) if p.barbarian => (
            'b',
            format!("Sorry, one can't {verb} barbarians in this game."),
        ),
        Some(p) if !p.is_alive => (
            'd',
            format!("Sorry, one can't {verb} dead players in this game."),
        ),
        Some(p) if p.is_ai() => (
            if is_new_game { 'A' } else { 'a' },
            format!("Sorry, one can't {verb} AI players in this game."),
        ),
        Some(_) => (
            if is_new_game { 'H' } else { 'h' },
            format!("Sorry, one can't {verb} human players in this game."),
        ),
    };

    let Some(at) = pattern.find(letter) else {
        return Err(refusal);
    };
    let modifier = pattern[at + letter.len_utf8()..].chars().next();

    if will_observe && matches!(modifier, Some('2' | '3')) {
        return Err("Sorry, one can't observe in this game.".into());
    }
    if !will_observe && modifier == Some('4') {
        return Err("Sorry, one can't take players in this game.".into());
    }
    if !will_observe
        && player.is_some_and(|p| p.is_connected)
        && matches!(modifier, Some('1' | '3'))
    {
        return Err("Sorry, one can't steal connected players in this game.".into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CreateLimits, NewPlayer, PlayerSlots};
    use civgate_protocol::PlayerId;

    fn slots_with(new: NewPlayer) -> (PlayerSlots, PlayerId) {
        let mut slots = PlayerSlots::new(4);
        let limits = CreateLimits {
            max_players: 4,
            playable_nations: 4,
        };
        let id = slots.create_player(new, limits).unwrap();
        (slots, id)
    }

    #[test]
    fn test_validate_accepts_default() {
        assert!(validate(DEFAULT_ALLOW_TAKE).is_ok());
        assert!(validate("").is_ok());
    }

    #[test]
    fn test_validate_rejects_leading_digit_and_unknown_letters() {
        assert!(validate("1H").is_err());
        assert!(validate("Hx").is_err());
    }

    #[test]
    fn test_check_default_allows_taking_human_in_new_game() {
        let (slots, id) = slots_with(NewPlayer::human());
        assert!(check(DEFAULT_ALLOW_TAKE, slots.get(id), false, true).is_ok());
    }

    #[test]
    fn test_check_case_selects_game_phase() {
        let (slots, id) = slots_with(NewPlayer::human());
        // Only the post-start letter is present.
        let err = check("h", slots.get(id), false, true).unwrap_err();
        assert_eq!(err, "Sorry, one can't take human players in this game.");
        assert!(check("h", slots.get(id), false, false).is_ok());
    }

    #[test]
    fn test_check_global_observe_needs_o() {
        assert!(check("Hh", None, true, true).is_err());
        assert!(check("O", None, true, true).is_ok());
        assert!(check("O", None, true, false).is_err());
    }

    #[test]
    fn test_check_take_any_ignores_observer_letter() {
        assert!(check("HAhad", None, false, true).is_ok());
        assert!(check("O4", None, false, true).is_ok());
        assert!(check("HAhad", None, true, true).is_err());
    }

    #[test]
    fn test_check_modifier_one_forbids_stealing_connected() {
        let (mut slots, id) = slots_with(NewPlayer::human());
        slots.get_mut(id).unwrap().is_connected = true;
        let err = check("H1", slots.get(id), false, true).unwrap_err();
        assert_eq!(err, "Sorry, one can't steal connected players in this game.");
        // Observing is still fine.
        assert!(check("H1", slots.get(id), true, true).is_ok());
    }

    #[test]
    fn test_check_modifier_two_forbids_observing() {
        let (slots, id) = slots_with(NewPlayer::ai());
        let err = check("A2", slots.get(id), true, true).unwrap_err();
        assert_eq!(err, "Sorry, one can't observe in this game.");
        assert!(check("A2", slots.get(id), false, true).is_ok());
    }

    #[test]
    fn test_check_modifier_four_observe_only() {
        let (slots, id) = slots_with(NewPlayer::ai());
        assert!(check("A4", slots.get(id), false, true).is_err());
        assert!(check("A4", slots.get(id), true, true).is_ok());
    }

    #[test]
    fn test_check_first_matching_letter_wins() {
        let (slots, id) = slots_with(NewPlayer::ai());
        // The first 'A' has no modifier; a later "A4" is never consulted.
        assert!(check("AhA4", slots.get(id), false, true).is_ok());
    }

    #[test]
    fn test_check_barbarian_and_dead_categories() {
        let barbarian = NewPlayer {
            barbarian: true,
            ..NewPlayer::ai()
        };
        let (slots, id) = slots_with(barbarian);
        assert!(check("HAhadOo", slots.get(id), false, true).is_err());
        assert!(check("b", slots.get(id), false, true).is_ok());

        let dead = NewPlayer {
            is_new_game: false,
            ..NewPlayer::human()
        };
        let (slots, id) = slots_with(dead);
        let err = check("Hh", slots.get(id), true, false).unwrap_err();
        assert_eq!(err, "Sorry, one can't observe dead players in this game.");
        assert!(check("d", slots.get(id), true, false).is_ok());
    }
}
