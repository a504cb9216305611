//! Standard keyboard layout
//!
//! Also known as the Dai Chien (大千) layout. It's the default layout on
//! almost all platforms and the most commonly used one. The same state
//! machine drives every layout where a key maps to exactly one symbol
//! (IBM, Gin-Yieh, ET, Dvorak, Carpalx), differing only in the key table.

use crate::editor::keymap::{
    phone_from_key, tone_from_key, KeyEvent, KeyTable, KEY_STR_CARPALX, KEY_STR_DVORAK,
    KEY_STR_ET, KEY_STR_GIN_YIEH, KEY_STR_IBM, KEY_STR_STANDARD,
};
use crate::zhuyin::{Bopomofo, Syllable};

use super::{KeyBehavior, SyllableEditor};

#[derive(Debug)]
pub struct Standard {
    syllable: Syllable,
    table: &'static KeyTable,
}

impl Standard {
    pub fn new() -> Standard {
        Standard {
            syllable: Syllable::new(),
            table: KEY_STR_STANDARD,
        }
    }
    pub fn ibm() -> Standard {
        Standard {
            table: KEY_STR_IBM,
            ..Standard::new()
        }
    }
    pub fn gin_yieh() -> Standard {
        Standard {
            table: KEY_STR_GIN_YIEH,
            ..Standard::new()
        }
    }
    pub fn et() -> Standard {
        Standard {
            table: KEY_STR_ET,
            ..Standard::new()
        }
    }
    pub fn dvorak() -> Standard {
        Standard {
            table: KEY_STR_DVORAK,
            ..Standard::new()
        }
    }
    pub fn carpalx() -> Standard {
        Standard {
            table: KEY_STR_CARPALX,
            ..Standard::new()
        }
    }

    fn is_end_key(&self, key: u8) -> bool {
        key == b' ' || tone_from_key(self.table, key).is_some()
    }
}

impl Default for Standard {
    fn default() -> Standard {
        Standard::new()
    }
}

impl SyllableEditor for Standard {
    fn key_press(&mut self, key: KeyEvent) -> KeyBehavior {
        let ascii = key.ascii;
        if self.is_end_key(ascii) && !self.syllable.is_empty() {
            let had_tone = self.syllable.has_tone();
            if let Some(tone) = tone_from_key(self.table, ascii) {
                self.syllable.update(tone);
            }
            if had_tone && ascii != b' ' {
                return KeyBehavior::NoWord;
            }
            return KeyBehavior::Commit;
        }
        match phone_from_key(self.table, ascii, 1) {
            Some(Bopomofo::TONE1) => KeyBehavior::KeyError,
            Some(bopomofo) => {
                self.syllable.update(bopomofo);
                KeyBehavior::Absorb
            }
            None => KeyBehavior::KeyError,
        }
    }

    fn is_entering(&self) -> bool {
        !self.syllable.is_empty()
    }

    fn pop(&mut self) -> Option<Bopomofo> {
        self.syllable.pop()
    }

    fn clear(&mut self) {
        self.syllable.clear();
    }

    fn observe(&self) -> Syllable {
        self.syllable
    }
}

#[cfg(test)]
mod tests {
    use crate::editor::keymap::{IdentityKeymap, Keymap, QWERTY};
    use crate::editor::syllable::{KeyBehavior, SyllableEditor};
    use crate::zhuyin::Bopomofo;

    use super::Standard;

    #[test]
    fn space_on_empty_buffer_is_an_error() {
        let mut editor = Standard::new();
        let keymap = IdentityKeymap::new(QWERTY);
        let behavior = editor.key_press(keymap.map_ascii(b' '));
        assert_eq!(KeyBehavior::KeyError, behavior);
    }

    #[test]
    fn type_ni_third_tone() {
        let mut editor = Standard::new();
        let keymap = IdentityKeymap::new(QWERTY);
        assert_eq!(KeyBehavior::Absorb, editor.key_press(keymap.map_ascii(b's')));
        assert_eq!(KeyBehavior::Absorb, editor.key_press(keymap.map_ascii(b'u')));
        assert_eq!(KeyBehavior::Commit, editor.key_press(keymap.map_ascii(b'3')));
        let result = editor.observe();
        assert_eq!(Some(Bopomofo::N), result.initial);
        assert_eq!(Some(Bopomofo::I), result.medial);
        assert_eq!(Some(Bopomofo::TONE3), result.tone);
    }

    #[test]
    fn overwriting_a_slot_keeps_the_last_key() {
        let mut editor = Standard::new();
        let keymap = IdentityKeymap::new(QWERTY);
        editor.key_press(keymap.map_ascii(b's'));
        editor.key_press(keymap.map_ascii(b'c'));
        assert_eq!(Some(Bopomofo::H), editor.observe().initial);
    }

    #[test]
    fn non_end_keys_leave_the_tone_untouched() {
        let mut editor = Standard::new();
        let keymap = IdentityKeymap::new(QWERTY);
        // tone typed first on an empty buffer is absorbed into the slot
        editor.key_press(keymap.map_ascii(b'c'));
        editor.key_press(keymap.map_ascii(b'l'));
        let before = editor.observe();
        assert_eq!(None, before.tone);
        assert_eq!(Some(Bopomofo::H), before.initial);
        assert_eq!(Some(Bopomofo::AU), before.rime);
    }

    #[test]
    fn space_commits_without_tone() {
        let mut editor = Standard::new();
        let keymap = IdentityKeymap::new(QWERTY);
        editor.key_press(keymap.map_ascii(b'c'));
        editor.key_press(keymap.map_ascii(b'l'));
        assert_eq!(KeyBehavior::Commit, editor.key_press(keymap.map_ascii(b' ')));
        assert_eq!(None, editor.observe().tone);
    }

    #[test]
    fn dvorak_table_types_the_same_syllable() {
        let mut editor = Standard::dvorak();
        let keymap = IdentityKeymap::new(QWERTY);
        // ㄋ is on the QWERTY 's' position which a Dvorak board labels 'o'
        editor.key_press(keymap.map_ascii(b'o'));
        assert_eq!(Some(Bopomofo::N), editor.observe().initial);
    }
}
