/* Button macros and the keycode view.
 *
 * A macro is an ordered list of key press/release/wait events, capped at
 * MAX_MACRO_EVENTS. Clients that only want "key X with modifiers Y" use the
 * keycode view: `macro_from_keycode` expands a (key, modifiers) pair into
 * the canonical event sequence and `keycode_from_macro` folds such a
 * sequence back. Both directions live here so the canonical modifier order
 * stays in one place. */

use crate::error::{SqueakError, SqueakResult};

pub const MAX_MACRO_EVENTS: usize = 256;

/* Linux input-event key codes for the eight modifier keys. */
pub const KEY_RESERVED: u32 = 0;
pub const KEY_LEFTCTRL: u32 = 29;
pub const KEY_LEFTSHIFT: u32 = 42;
pub const KEY_RIGHTSHIFT: u32 = 54;
pub const KEY_LEFTALT: u32 = 56;
pub const KEY_RIGHTCTRL: u32 = 97;
pub const KEY_RIGHTALT: u32 = 100;
pub const KEY_LEFTMETA: u32 = 125;
pub const KEY_RIGHTMETA: u32 = 126;

pub const MODIFIER_LEFTCTRL: u32 = 1 << 0;
pub const MODIFIER_LEFTSHIFT: u32 = 1 << 1;
pub const MODIFIER_LEFTALT: u32 = 1 << 2;
pub const MODIFIER_LEFTMETA: u32 = 1 << 3;
pub const MODIFIER_RIGHTCTRL: u32 = 1 << 4;
pub const MODIFIER_RIGHTSHIFT: u32 = 1 << 5;
pub const MODIFIER_RIGHTALT: u32 = 1 << 6;
pub const MODIFIER_RIGHTMETA: u32 = 1 << 7;

/* Canonical order: left-ctrl, left-shift, left-alt, left-meta, then the
 * right-hand variants. Encoding presses modifiers in this order and
 * releases them in the same order. */
const MODIFIER_MAPPING: [(u32, u32); 8] = [
    (MODIFIER_LEFTCTRL, KEY_LEFTCTRL),
    (MODIFIER_LEFTSHIFT, KEY_LEFTSHIFT),
    (MODIFIER_LEFTALT, KEY_LEFTALT),
    (MODIFIER_LEFTMETA, KEY_LEFTMETA),
    (MODIFIER_RIGHTCTRL, KEY_RIGHTCTRL),
    (MODIFIER_RIGHTSHIFT, KEY_RIGHTSHIFT),
    (MODIFIER_RIGHTALT, KEY_RIGHTALT),
    (MODIFIER_RIGHTMETA, KEY_RIGHTMETA),
];

pub fn key_is_modifier(key: u32) -> bool {
    MODIFIER_MAPPING.iter().any(|&(_, k)| k == key)
}

fn modifier_mask_for_key(key: u32) -> Option<u32> {
    MODIFIER_MAPPING
        .iter()
        .find(|&&(_, k)| k == key)
        .map(|&(mask, _)| mask)
}

/* Wire values of the event tags, part of the DBus ABI. */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacroEvent {
    None,
    KeyPressed(u32),
    KeyReleased(u32),
    Wait(u32),
}

impl MacroEvent {
    pub fn to_raw(self) -> (u32, u32) {
        match self {
            MacroEvent::None => (0, 0),
            MacroEvent::KeyPressed(key) => (1, key),
            MacroEvent::KeyReleased(key) => (2, key),
            MacroEvent::Wait(ms) => (3, ms),
        }
    }

    pub fn from_raw(kind: u32, value: u32) -> Option<Self> {
        match kind {
            0 => Some(MacroEvent::None),
            1 => Some(MacroEvent::KeyPressed(value)),
            2 => Some(MacroEvent::KeyReleased(value)),
            3 => Some(MacroEvent::Wait(value)),
            _ => None,
        }
    }
}

/* An event sequence with a fixed capacity. Events past the capacity are
 * dropped on construction and push, never an error: devices truncate
 * silently and so do we. */
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Macro {
    events: Vec<MacroEvent>,
}

impl Macro {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_events<I: IntoIterator<Item = MacroEvent>>(events: I) -> Self {
        Self {
            events: events.into_iter().take(MAX_MACRO_EVENTS).collect(),
        }
    }

    /* Build from the DBus a(uu) representation, skipping malformed pairs
     * and stopping at an explicit None terminator. */
    pub fn from_raw_entries(entries: &[(u32, u32)]) -> Self {
        let mut m = Self::new();
        for &(kind, value) in entries {
            match MacroEvent::from_raw(kind, value) {
                Some(MacroEvent::None) => break,
                Some(event) => m.push(event),
                None => continue,
            }
        }
        m
    }

    pub fn to_raw_entries(&self) -> Vec<(u32, u32)> {
        self.events.iter().map(|e| e.to_raw()).collect()
    }

    pub fn push(&mut self, event: MacroEvent) {
        if self.events.len() < MAX_MACRO_EVENTS {
            self.events.push(event);
        }
    }

    pub fn events(&self) -> &[MacroEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/* Expand (key, modifiers) into the canonical macro: press each set
 * modifier, press the key, release the key, release the modifiers in the
 * same order. */
pub fn macro_from_keycode(key: u32, modifiers: u32) -> Macro {
    let mut m = Macro::new();

    for &(mask, modkey) in &MODIFIER_MAPPING {
        if modifiers & mask != 0 {
            m.push(MacroEvent::KeyPressed(modkey));
        }
    }

    m.push(MacroEvent::KeyPressed(key));
    m.push(MacroEvent::KeyReleased(key));

    for &(mask, modkey) in &MODIFIER_MAPPING {
        if modifiers & mask != 0 {
            m.push(MacroEvent::KeyReleased(modkey));
        }
    }

    m
}

fn non_modifier_press_count(m: &Macro) -> usize {
    m.events()
        .iter()
        .filter(|e| matches!(e, MacroEvent::KeyPressed(k) if !key_is_modifier(*k)))
        .count()
}

/* A macro consisting of a single modifier press and nothing else still has
 * a keycode view: the modifier is the key, with no modifiers held. */
fn is_single_modifier_key(m: &Macro) -> bool {
    let modifier_presses = m
        .events()
        .iter()
        .filter(|e| matches!(e, MacroEvent::KeyPressed(k) if key_is_modifier(*k)))
        .count();

    modifier_presses == 1 && non_modifier_press_count(m) == 0
}

/* Fold a macro back into (key, modifiers).
 *
 * Walks the events tracking the held-modifier mask; the payload key is the
 * one non-modifier press, terminated by its matching release. Wait events
 * are tolerated and ignored. Anything else fails with Value: more than one
 * payload key, a mismatched release, or a press left hanging. */
pub fn keycode_from_macro(m: &Macro) -> SqueakResult<(u32, u32)> {
    if m.is_empty() {
        return Err(SqueakError::Value);
    }

    if is_single_modifier_key(m) {
        let key = m
            .events()
            .iter()
            .find_map(|e| match e {
                MacroEvent::KeyPressed(k) => Some(*k),
                _ => None,
            })
            .ok_or(SqueakError::Value)?;
        return Ok((key, 0));
    }

    if non_modifier_press_count(m) != 1 {
        return Err(SqueakError::Value);
    }

    let mut key = KEY_RESERVED;
    let mut modifiers = 0u32;

    for event in m.events() {
        match *event {
            MacroEvent::KeyPressed(k) => {
                if let Some(mask) = modifier_mask_for_key(k) {
                    modifiers |= mask;
                } else {
                    if key != KEY_RESERVED {
                        return Err(SqueakError::Value);
                    }
                    key = k;
                }
            }
            MacroEvent::KeyReleased(k) => {
                if let Some(mask) = modifier_mask_for_key(k) {
                    modifiers &= !mask;
                } else if k != key {
                    return Err(SqueakError::Value);
                } else {
                    return Ok((key, modifiers));
                }
            }
            MacroEvent::Wait(_) => {}
            MacroEvent::None => return Err(SqueakError::Value),
        }
    }

    /* Payload key pressed but never released. */
    Err(SqueakError::Value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_plain_key() {
        let m = macro_from_keycode(30, 0); /* KEY_A */
        assert_eq!(m.len(), 2);
        assert_eq!(keycode_from_macro(&m).unwrap(), (30, 0));
    }

    #[test]
    fn test_roundtrip_all_modifier_masks() {
        for mask in 0..=0xffu32 {
            let m = macro_from_keycode(30, mask);
            assert_eq!(
                keycode_from_macro(&m).unwrap(),
                (30, mask),
                "mask {mask:#04x}"
            );
        }
    }

    #[test]
    fn test_encode_order_is_canonical() {
        let m = macro_from_keycode(30, MODIFIER_LEFTSHIFT | MODIFIER_LEFTCTRL);
        assert_eq!(
            m.events(),
            &[
                MacroEvent::KeyPressed(KEY_LEFTCTRL),
                MacroEvent::KeyPressed(KEY_LEFTSHIFT),
                MacroEvent::KeyPressed(30),
                MacroEvent::KeyReleased(30),
                MacroEvent::KeyReleased(KEY_LEFTCTRL),
                MacroEvent::KeyReleased(KEY_LEFTSHIFT),
            ]
        );
    }

    #[test]
    fn test_single_modifier_press_decodes_as_key() {
        let m = Macro::from_events([MacroEvent::KeyPressed(KEY_LEFTCTRL)]);
        assert_eq!(keycode_from_macro(&m).unwrap(), (KEY_LEFTCTRL, 0));
    }

    #[test]
    fn test_wait_events_are_ignored() {
        let m = Macro::from_events([
            MacroEvent::KeyPressed(KEY_LEFTSHIFT),
            MacroEvent::Wait(50),
            MacroEvent::KeyPressed(30),
            MacroEvent::Wait(50),
            MacroEvent::KeyReleased(30),
            MacroEvent::KeyReleased(KEY_LEFTSHIFT),
        ]);
        assert_eq!(keycode_from_macro(&m).unwrap(), (30, MODIFIER_LEFTSHIFT));
    }

    #[test]
    fn test_two_payload_keys_rejected() {
        let m = Macro::from_events([
            MacroEvent::KeyPressed(30),
            MacroEvent::KeyReleased(30),
            MacroEvent::KeyPressed(31),
            MacroEvent::KeyReleased(31),
        ]);
        assert_eq!(keycode_from_macro(&m), Err(SqueakError::Value));
    }

    #[test]
    fn test_mismatched_release_rejected() {
        let m = Macro::from_events([MacroEvent::KeyPressed(30), MacroEvent::KeyReleased(31)]);
        assert_eq!(keycode_from_macro(&m), Err(SqueakError::Value));
    }

    #[test]
    fn test_hanging_press_rejected() {
        let m = Macro::from_events([MacroEvent::KeyPressed(30)]);
        assert_eq!(keycode_from_macro(&m), Err(SqueakError::Value));
    }

    #[test]
    fn test_empty_macro_rejected() {
        assert_eq!(keycode_from_macro(&Macro::new()), Err(SqueakError::Value));
    }

    #[test]
    fn test_capacity_truncates() {
        let m = Macro::from_events(
            std::iter::repeat(MacroEvent::Wait(1)).take(MAX_MACRO_EVENTS + 40),
        );
        assert_eq!(m.len(), MAX_MACRO_EVENTS);
    }

    #[test]
    fn test_raw_entries_roundtrip() {
        let m = macro_from_keycode(30, MODIFIER_RIGHTALT);
        let raw = m.to_raw_entries();
        assert_eq!(Macro::from_raw_entries(&raw), m);
    }

    #[test]
    fn test_raw_entries_stop_at_none() {
        let m = Macro::from_raw_entries(&[(1, 30), (0, 0), (2, 30)]);
        assert_eq!(m.events(), &[MacroEvent::KeyPressed(30)]);
    }
}
