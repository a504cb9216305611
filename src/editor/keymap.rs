//! Keyboard events and per-layout key tables
//!
//! Traditionally the keyboards sold in Chinese speaking regions have both
//! the English alphabet and Zhuyin symbols printed on the keys. Like
//! English keyboards can have different layouts (QWERTY, Dvorak, etc.),
//! Zhuyin keyboards also have different layouts.
//!
//! People usually practice Zhuyin typing independently from English
//! typing, so they acquire separate muscle memory. This module maps host
//! key events to layout independent key indexes and, for the table-driven
//! layouts, from keys to phonetic symbols.

use crate::zhuyin::Bopomofo;

/// Layout independent key index
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[rustfmt::skip]
pub enum KeyIndex {
    K0 = 0,
//  1   2   3   4   5   6   7   8   9   0    -    =    \    `
    K1, K2, K3, K4, K5, K6, K7, K8, K9, K10, K11, K12, K13, K14,
//    Q    W    E    R    T    Y    U    I    O    P    [    ]
      K15, K16, K17, K18, K19, K20, K21, K22, K23, K24, K25, K26,
//      A    S    D    F    G    H    J    K    L    ;   '
        K27, K28, K29, K30, K31, K32, K33, K34, K35, K36, K37,
//        Z    X    C    V    B    N    M    ,    .    /    SPC
          K38, K39, K40, K41, K42, K43, K44, K45, K46, K47, K48
}

/// USB HID style key codes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[rustfmt::skip]
pub enum KeyCode {
    Unknown = 0,
    N1, N2, N3, N4, N5, N6, N7, N8, N9, N0, Minus, Equal, BSlash, Grave,
      Q, W, E, R, T, Y, U, I, O, P, LBracket, RBracket,
       A, S, D, F, G, H, J, K, L, SColon, Quote,
        Z, X, C, V, B, N, M, Comma, Dot, Slash, Space
}

/// A physical key press mapped to a layout independent position.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KeyEvent {
    pub index: KeyIndex,
    pub code: KeyCode,
    pub ascii: u8,
}

use KeyCode::*;
use KeyIndex::*;

#[rustfmt::skip]
pub const QWERTY: [KeyCode; 48] = [
    N1, N2, N3, N4, N5, N6, N7, N8, N9, N0, Minus, Equal, BSlash, Grave,
      Q, W, E, R, T, Y, U, I, O, P, LBracket, RBracket,
       A, S, D, F, G, H, J, K, L, SColon, Quote,
        Z, X, C, V, B, N, M, Comma, Dot, Slash, Space
];

#[rustfmt::skip]
const QWERTY_ASCII: [u8; 48] = [
    b'1', b'2', b'3', b'4', b'5', b'6', b'7', b'8', b'9', b'0', b'-', b'=', b'\\', b'`',
      b'q', b'w', b'e', b'r', b't', b'y', b'u', b'i', b'o', b'p', b'[', b']',
       b'a', b's', b'd', b'f', b'g', b'h', b'j', b'k', b'l', b';', b'\'',
        b'z', b'x', b'c', b'v', b'b', b'n', b'm', b',', b'.', b'/', b' ',
];

/// Maps a lowercased ascii byte to its QWERTY key position.
pub fn key_index_from_ascii(ascii: u8) -> KeyIndex {
    match QWERTY_ASCII.iter().position(|&k| k == ascii) {
        Some(pos) => INDEX_BY_POSITION[pos],
        None => K0,
    }
}

#[rustfmt::skip]
const INDEX_BY_POSITION: [KeyIndex; 48] = [
    K1, K2, K3, K4, K5, K6, K7, K8, K9, K10, K11, K12, K13, K14,
      K15, K16, K17, K18, K19, K20, K21, K22, K23, K24, K25, K26,
        K27, K28, K29, K30, K31, K32, K33, K34, K35, K36, K37,
          K38, K39, K40, K41, K42, K43, K44, K45, K46, K47, K48,
];

/// Maps host key events to layout independent positions.
pub trait Keymap {
    fn map_key(&self, code: KeyCode) -> KeyEvent;
    fn map_ascii(&self, ascii: u8) -> KeyEvent;
}

/// A keymap for hosts that already deliver QWERTY scan results.
#[derive(Debug)]
pub struct IdentityKeymap {
    codes: [KeyCode; 48],
}

impl IdentityKeymap {
    pub fn new(codes: [KeyCode; 48]) -> IdentityKeymap {
        IdentityKeymap { codes }
    }
}

impl Keymap for IdentityKeymap {
    fn map_key(&self, code: KeyCode) -> KeyEvent {
        let position = self.codes.iter().position(|&c| c == code).unwrap_or(0);
        KeyEvent {
            index: INDEX_BY_POSITION[position],
            code,
            ascii: QWERTY_ASCII[position],
        }
    }
    fn map_ascii(&self, ascii: u8) -> KeyEvent {
        let index = key_index_from_ascii(ascii);
        let code = match index {
            K0 => KeyCode::Unknown,
            _ => self.codes[index as usize - 1],
        };
        KeyEvent { index, code, ascii }
    }
}

/// Remaps a received character to the one a Dvorak keyboard produces on
/// the same physical key.
///
/// Used by the Dvorak and Dvorak-Hsu layouts before their state machines
/// run.
pub fn dvorak_remap(key: u8) -> u8 {
    const DVORAK: &[u8] = b"',.pyfgcrl/=aoeuidhtns-;qjkxbmwvz\"<>PYFGCRL?+AOEUIDHTNS_:QJKXBMWVZ";
    const QWERTY_KEYS: &[u8] = b"qwertyuiop[]asdfghjkl;'zxcvbnm,./QWERTYUIOP{}ASDFGHJKL:\"ZXCVBNM<>?";
    match QWERTY_KEYS.iter().position(|&k| k == key) {
        Some(pos) => DVORAK[pos],
        None => key,
    }
}

/// The 41 phonetic symbols in packed-index order: 21 initials, 3 medials,
/// 13 rimes, then the 4 written tones.
#[rustfmt::skip]
const SYMBOL_ORDER: [Bopomofo; 41] = [
    Bopomofo::B, Bopomofo::P, Bopomofo::M, Bopomofo::F, Bopomofo::D,
    Bopomofo::T, Bopomofo::N, Bopomofo::L, Bopomofo::G, Bopomofo::K,
    Bopomofo::H, Bopomofo::J, Bopomofo::Q, Bopomofo::X, Bopomofo::ZH,
    Bopomofo::CH, Bopomofo::SH, Bopomofo::R, Bopomofo::Z, Bopomofo::C,
    Bopomofo::S,
    Bopomofo::I, Bopomofo::U, Bopomofo::IU,
    Bopomofo::A, Bopomofo::O, Bopomofo::E, Bopomofo::EH, Bopomofo::AI,
    Bopomofo::EI, Bopomofo::AU, Bopomofo::OU, Bopomofo::AN, Bopomofo::EN,
    Bopomofo::ANG, Bopomofo::ENG, Bopomofo::ER,
    Bopomofo::TONE5, Bopomofo::TONE2, Bopomofo::TONE3, Bopomofo::TONE4,
];

/// A key table is 41 bytes, one key per symbol of [`SYMBOL_ORDER`].
pub type KeyTable = [u8; 41];

pub const KEY_STR_STANDARD: &KeyTable = b"1qaz2wsxedcrfv5tgbyhnujm8ik,9ol.0p;/-7634";
pub const KEY_STR_IBM: &KeyTable = b"1234567890-qwertyuiopasdfghjkl;zxcvbn/m,.";
pub const KEY_STR_GIN_YIEH: &KeyTable = b"2wsx3edcrfvtgb6yhnujm8ik,9ol.0p;/-['=1qaz";
pub const KEY_STR_ET: &KeyTable = b"bpmfdtnlvkhg7c,./j;'sexuaorwiqzy890-=1234";
pub const KEY_STR_DVORAK: &KeyTable = b"1'a;2,oq.ejpuk5yixfdbghm8ctw9rnv0lsz[7634";
// The standard table transposed onto the Carpalx (QGMLWY) letter
// arrangement, position by position.
pub const KEY_STR_CARPALX: &KeyTable = b"1qdz2gsxmtclnv5wrjyikfap8ue,9bo.0;h/-7634";
pub const KEY_STR_HSU: &KeyTable = b"bpmfdtnlgkhjvcjvcrzasexuyhgeiawomnkllsdfj";
pub const KEY_STR_ET26: &KeyTable = b"bpmfdtnlvkhgvcgycjqwsexuaorwiqzpmntlhdfjk";
pub const KEY_STR_DACHEN_CP26: &KeyTable = b"qqazwwsxedcrfvttgbyhnujmuikbiolmoplnpyerd";

/// Finds the phonetic symbol a key produces under a key table.
///
/// `search_rank` selects the n-th match for keys that are overloaded with
/// several symbols, counted from 1.
pub fn phone_from_key(table: &KeyTable, key: u8, search_rank: usize) -> Option<Bopomofo> {
    table
        .iter()
        .enumerate()
        .filter(|(_, &k)| k == key)
        .nth(search_rank.saturating_sub(1))
        .map(|(pos, _)| SYMBOL_ORDER[pos])
}

/// Finds the written tone a key produces under a key table, if any.
pub fn tone_from_key(table: &KeyTable, key: u8) -> Option<Bopomofo> {
    phone_from_key(table, key, 1).filter(|b| {
        matches!(
            b,
            Bopomofo::TONE2 | Bopomofo::TONE3 | Bopomofo::TONE4 | Bopomofo::TONE5
        )
    })
}

#[cfg(test)]
mod tests {
    use crate::zhuyin::Bopomofo;

    use super::{
        dvorak_remap, key_index_from_ascii, phone_from_key, tone_from_key, IdentityKeymap,
        KeyCode, KeyIndex, Keymap, KEY_STR_HSU, KEY_STR_STANDARD, QWERTY,
    };

    #[test]
    fn ascii_to_key_index() {
        assert_eq!(KeyIndex::K15, key_index_from_ascii(b'q'));
        assert_eq!(KeyIndex::K48, key_index_from_ascii(b' '));
        assert_eq!(KeyIndex::K0, key_index_from_ascii(b'!'));
    }

    #[test]
    fn identity_keymap_round_trips() {
        let keymap = IdentityKeymap::new(QWERTY);
        let event = keymap.map_ascii(b'u');
        assert_eq!(KeyCode::U, event.code);
        assert_eq!(KeyIndex::K21, event.index);
        assert_eq!(event, keymap.map_key(KeyCode::U));
    }

    #[test]
    fn standard_table_lookup() {
        assert_eq!(
            Some(Bopomofo::H),
            phone_from_key(KEY_STR_STANDARD, b'c', 1)
        );
        assert_eq!(
            Some(Bopomofo::AU),
            phone_from_key(KEY_STR_STANDARD, b'l', 1)
        );
        assert_eq!(
            Some(Bopomofo::TONE3),
            tone_from_key(KEY_STR_STANDARD, b'3')
        );
        assert_eq!(None, tone_from_key(KEY_STR_STANDARD, b'q'));
    }

    #[test]
    fn hsu_table_search_rank() {
        assert_eq!(Some(Bopomofo::J), phone_from_key(KEY_STR_HSU, b'j', 1));
        assert_eq!(Some(Bopomofo::ZH), phone_from_key(KEY_STR_HSU, b'j', 2));
        assert_eq!(Some(Bopomofo::TONE4), phone_from_key(KEY_STR_HSU, b'j', 3));
        assert_eq!(None, phone_from_key(KEY_STR_HSU, b'j', 4));
    }

    #[test]
    fn dvorak_remap_follows_physical_keys() {
        assert_eq!(b'\'', dvorak_remap(b'q'));
        assert_eq!(b'o', dvorak_remap(b's'));
        assert_eq!(b'5', dvorak_remap(b'5'));
    }
}
