//! Zhuyin phonetic data model: bopomofo symbols and packed syllables.

mod bopomofo;
mod syllable;

pub use bopomofo::{Bopomofo, BopomofoKind, ParseBopomofoError};
pub use syllable::{parse_syllables, DecodeSyllableError, Syllable, SyllableBuilder};
