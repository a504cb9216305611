//! Conversion from key events to phonetic syllables
//!
//! This module contains the syllable editors for all supported keyboard
//! layouts. The most widely used Zhuyin layout is the one printed directly
//! on the keyboards, a one to one mapping from keys to symbols. Some
//! layouts have smarter mappings that take advantage of impossible
//! combinations to reduce the total keys required, and the pinyin layouts
//! spell whole syllables in Latin letters before converting them.

use std::fmt::Debug;

use crate::zhuyin::{Bopomofo, Syllable};

use super::keymap::KeyEvent;

pub use self::{
    dc26::DaiChien26,
    et26::Et26,
    hsu::Hsu,
    pinyin::{Pinyin, PinyinKeyMapping, PinyinVariant},
    standard::Standard,
};

mod dc26;
mod et26;
mod hsu;
mod pinyin;
mod standard;

/// All supported keyboard layouts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyboardLayoutCompat {
    Default = 0,
    Hsu,
    Ibm,
    GinYieh,
    Et,
    Et26,
    Dvorak,
    DvorakHsu,
    DachenCp26,
    HanyuPinyin,
    ThlPinyin,
    Mps2Pinyin,
    Carpalx,
}

/// How a syllable editor responded to a key press.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyBehavior {
    Ignore = 0,
    Absorb,
    Commit,
    KeyError,
    Error,
    NoWord,
    OpenSymbolTable,
}

/// A state machine that assembles one phonetic syllable from key presses.
pub trait SyllableEditor: Debug {
    /// Handles a key press event and returns the behavior of the layout.
    fn key_press(&mut self, key: KeyEvent) -> KeyBehavior;
    /// Returns whether the editor contains any input.
    fn is_entering(&self) -> bool;
    /// Removes the last phonetic key from the buffer and returns it, or
    /// [`None`] if it is empty.
    fn pop(&mut self) -> Option<Bopomofo>;
    /// Clears the phonetic key buffer, removing all values.
    fn clear(&mut self);
    /// Returns the current syllable buffer without changing it.
    fn observe(&self) -> Syllable;
    /// Returns the alternative reading produced by ambiguous spellings.
    ///
    /// Only the pinyin layouts ever differ from [`observe`][Self::observe].
    fn observe_alt(&self) -> Syllable {
        self.observe()
    }
    /// Returns the pending Latin key sequence, for the pinyin layouts.
    fn key_seq(&self) -> Option<String> {
        None
    }
}
