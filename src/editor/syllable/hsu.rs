//! Hsu keyboard layout

use crate::editor::keymap::{KeyCode, KeyEvent};
use crate::zhuyin::{Bopomofo, BopomofoKind, Syllable};

use super::{KeyBehavior, SyllableEditor};

#[derive(Debug)]
pub struct Hsu {
    syllable: Syllable,
}

impl Hsu {
    pub fn new() -> Hsu {
        Hsu {
            syllable: Syllable::new(),
        }
    }
    fn is_hsu_end_key(&self, key: KeyEvent) -> bool {
        match key.code {
            KeyCode::S | KeyCode::D | KeyCode::F | KeyCode::J | KeyCode::Space => {
                self.syllable.has_initial() || self.syllable.has_medial() || self.syllable.has_rime()
            }
            _ => false,
        }
    }
    fn has_initial_or_medial(&self) -> bool {
        self.syllable.has_initial() || self.syllable.has_medial()
    }
}

impl Default for Hsu {
    fn default() -> Hsu {
        Hsu::new()
    }
}

impl SyllableEditor for Hsu {
    fn key_press(&mut self, key: KeyEvent) -> KeyBehavior {
        if self.is_hsu_end_key(key) {
            if !self.syllable.has_medial() && !self.syllable.has_rime() {
                match self.syllable.initial {
                    Some(Bopomofo::J) => {
                        self.syllable.update(Bopomofo::ZH);
                    }
                    Some(Bopomofo::Q) => {
                        self.syllable.update(Bopomofo::CH);
                    }
                    Some(Bopomofo::X) => {
                        self.syllable.update(Bopomofo::SH);
                    }
                    Some(Bopomofo::H) => {
                        self.syllable.remove_initial();
                        self.syllable.update(Bopomofo::O);
                    }
                    Some(Bopomofo::G) => {
                        self.syllable.remove_initial();
                        self.syllable.update(Bopomofo::E);
                    }
                    Some(Bopomofo::M) => {
                        self.syllable.remove_initial();
                        self.syllable.update(Bopomofo::AN);
                    }
                    Some(Bopomofo::N) => {
                        self.syllable.remove_initial();
                        self.syllable.update(Bopomofo::EN);
                    }
                    Some(Bopomofo::K) => {
                        self.syllable.remove_initial();
                        self.syllable.update(Bopomofo::ANG);
                    }
                    Some(Bopomofo::L) => {
                        self.syllable.remove_initial();
                        self.syllable.update(Bopomofo::ER);
                    }
                    _ => (),
                }
            }

            // fuzzy ㄍㄧ to ㄐㄧ and ㄍㄩ to ㄐㄩ
            if self.syllable.initial == Some(Bopomofo::G)
                && matches!(self.syllable.medial, Some(Bopomofo::I) | Some(Bopomofo::IU))
            {
                self.syllable.update(Bopomofo::J);
            }

            let tone = match key.code {
                KeyCode::D => Some(Bopomofo::TONE2),
                KeyCode::F => Some(Bopomofo::TONE3),
                KeyCode::J => Some(Bopomofo::TONE4),
                KeyCode::S => Some(Bopomofo::TONE5),
                _ => None,
            };
            if let Some(tone) = tone {
                self.syllable.update(tone);
            }
            KeyBehavior::Commit
        } else {
            let bopomofo = match key.code {
                KeyCode::A => {
                    if self.has_initial_or_medial() {
                        Bopomofo::EI
                    } else {
                        Bopomofo::C
                    }
                }
                KeyCode::B => Bopomofo::B,
                KeyCode::C => Bopomofo::SH,
                KeyCode::D => Bopomofo::D,
                KeyCode::E => Bopomofo::I,
                KeyCode::F => Bopomofo::F,
                KeyCode::G => {
                    if self.has_initial_or_medial() {
                        Bopomofo::E
                    } else {
                        Bopomofo::G
                    }
                }
                KeyCode::H => {
                    if self.has_initial_or_medial() {
                        Bopomofo::O
                    } else {
                        Bopomofo::H
                    }
                }
                KeyCode::I => Bopomofo::AI,
                KeyCode::J => Bopomofo::ZH,
                KeyCode::K => {
                    if self.has_initial_or_medial() {
                        Bopomofo::ANG
                    } else {
                        Bopomofo::K
                    }
                }
                KeyCode::L => {
                    if self.has_initial_or_medial() {
                        Bopomofo::ENG
                    } else {
                        Bopomofo::L
                    }
                }
                KeyCode::M => {
                    if self.has_initial_or_medial() {
                        Bopomofo::AN
                    } else {
                        Bopomofo::M
                    }
                }
                KeyCode::N => {
                    if self.has_initial_or_medial() {
                        Bopomofo::EN
                    } else {
                        Bopomofo::N
                    }
                }
                KeyCode::O => Bopomofo::OU,
                KeyCode::P => Bopomofo::P,
                KeyCode::R => Bopomofo::R,
                KeyCode::S => Bopomofo::S,
                KeyCode::T => Bopomofo::T,
                KeyCode::U => Bopomofo::IU,
                KeyCode::V => Bopomofo::CH,
                KeyCode::W => Bopomofo::AU,
                KeyCode::X => Bopomofo::U,
                KeyCode::Y => Bopomofo::A,
                KeyCode::Z => Bopomofo::Z,
                _ => return KeyBehavior::NoWord,
            };
            let kind = bopomofo.kind();

            // fuzzy ㄍㄧ to ㄐㄧ and ㄍㄩ to ㄐㄩ
            if self.syllable.initial == Some(Bopomofo::G)
                && matches!(self.syllable.medial, Some(Bopomofo::I) | Some(Bopomofo::IU))
            {
                self.syllable.update(Bopomofo::J);
            }

            // ㄐㄑㄒ must be followed by ㄧ or ㄩ. If not, convert them to ㄓㄔㄕ
            if (kind == BopomofoKind::Medial && bopomofo == Bopomofo::U)
                || (kind == BopomofoKind::Rime && !self.syllable.has_medial())
            {
                match self.syllable.initial {
                    Some(Bopomofo::J) => {
                        self.syllable.update(Bopomofo::ZH);
                    }
                    Some(Bopomofo::Q) => {
                        self.syllable.update(Bopomofo::CH);
                    }
                    Some(Bopomofo::X) => {
                        self.syllable.update(Bopomofo::SH);
                    }
                    _ => (),
                }
            }

            // Likewise, when ㄓㄔㄕ is followed by ㄧ or ㄩ, convert them to ㄐㄑㄒ
            if bopomofo == Bopomofo::I || bopomofo == Bopomofo::IU {
                match self.syllable.initial {
                    Some(Bopomofo::ZH) => {
                        self.syllable.update(Bopomofo::J);
                    }
                    Some(Bopomofo::CH) => {
                        self.syllable.update(Bopomofo::Q);
                    }
                    Some(Bopomofo::SH) => {
                        self.syllable.update(Bopomofo::X);
                    }
                    _ => (),
                }
            }

            self.syllable.update(bopomofo);
            KeyBehavior::Absorb
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
    use crate::editor::keymap::{IdentityKeymap, KeyCode, Keymap, QWERTY};
    use crate::editor::syllable::{KeyBehavior, SyllableEditor};
    use crate::zhuyin::Bopomofo;

    use super::Hsu;

    #[test]
    fn cen_resolves_to_xien() {
        let mut hsu = Hsu::new();
        let keymap = IdentityKeymap::new(QWERTY);
        hsu.key_press(keymap.map_key(KeyCode::C));
        hsu.key_press(keymap.map_key(KeyCode::E));
        hsu.key_press(keymap.map_key(KeyCode::N));
        hsu.key_press(keymap.map_key(KeyCode::Space));
        let result = hsu.observe();
        assert_eq!(Some(Bopomofo::X), result.initial);
        assert_eq!(Some(Bopomofo::I), result.medial);
        assert_eq!(Some(Bopomofo::EN), result.rime);
    }

    #[test]
    fn lone_n_becomes_en_on_end_key() {
        let mut hsu = Hsu::new();
        let keymap = IdentityKeymap::new(QWERTY);
        hsu.key_press(keymap.map_key(KeyCode::N));
        assert_eq!(
            KeyBehavior::Commit,
            hsu.key_press(keymap.map_key(KeyCode::F))
        );
        let result = hsu.observe();
        assert_eq!(None, result.initial);
        assert_eq!(Some(Bopomofo::EN), result.rime);
        assert_eq!(Some(Bopomofo::TONE3), result.tone);
    }

    #[test]
    fn lone_j_becomes_zh_on_end_key() {
        let mut hsu = Hsu::new();
        let keymap = IdentityKeymap::new(QWERTY);
        hsu.key_press(keymap.map_key(KeyCode::J));
        assert_eq!(
            KeyBehavior::Commit,
            hsu.key_press(keymap.map_key(KeyCode::F))
        );
        let result = hsu.observe();
        assert_eq!(Some(Bopomofo::ZH), result.initial);
        assert_eq!(Some(Bopomofo::TONE3), result.tone);
    }

    #[test]
    fn zh_followed_by_i_becomes_j() {
        let mut hsu = Hsu::new();
        let keymap = IdentityKeymap::new(QWERTY);
        hsu.key_press(keymap.map_key(KeyCode::J));
        hsu.key_press(keymap.map_key(KeyCode::E));
        let result = hsu.observe();
        assert_eq!(Some(Bopomofo::J), result.initial);
        assert_eq!(Some(Bopomofo::I), result.medial);
    }

    #[test]
    fn lone_h_becomes_o_on_end_key() {
        let mut hsu = Hsu::new();
        let keymap = IdentityKeymap::new(QWERTY);
        hsu.key_press(keymap.map_key(KeyCode::H));
        hsu.key_press(keymap.map_key(KeyCode::Space));
        let result = hsu.observe();
        assert_eq!(None, result.initial);
        assert_eq!(Some(Bopomofo::O), result.rime);
    }
}
