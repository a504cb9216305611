use std::fmt::{Display, Write};
use std::str::FromStr;

use thiserror::Error;

use super::{Bopomofo, BopomofoKind, ParseBopomofoError};

/// The consonants and vowels that are taken together to make a single sound.
///
/// <https://en.m.wikipedia.org/wiki/Syllable#Chinese_model>
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Syllable {
    pub initial: Option<Bopomofo>,
    pub medial: Option<Bopomofo>,
    pub rime: Option<Bopomofo>,
    pub tone: Option<Bopomofo>,
}

impl Syllable {
    pub const fn new() -> Syllable {
        Syllable {
            initial: None,
            medial: None,
            rime: None,
            tone: None,
        }
    }

    pub const fn builder() -> SyllableBuilder {
        SyllableBuilder {
            syllable: Syllable::new(),
        }
    }
    pub fn is_empty(&self) -> bool {
        self.initial.is_none()
            && self.medial.is_none()
            && self.rime.is_none()
            && self.tone.is_none()
    }
    pub fn has_initial(&self) -> bool {
        self.initial.is_some()
    }
    pub fn has_medial(&self) -> bool {
        self.medial.is_some()
    }
    pub fn has_rime(&self) -> bool {
        self.rime.is_some()
    }
    pub fn has_tone(&self) -> bool {
        self.tone.is_some()
    }
    /// Returns the `Syllable` encoded in a u16 integer.
    ///
    /// An empty syllable encodes to 0. The data layout used:
    ///
    /// ```text
    ///  0                   1
    ///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5
    /// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
    /// |   Initial   | M | Rime  |Tone |
    /// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
    /// ```
    pub fn to_u16(&self) -> u16 {
        let initial = self.initial.map_or(0, |v| v.index());
        let medial = self.medial.map_or(0, |v| v.index());
        let rime = self.rime.map_or(0, |v| v.index());
        let tone = self.tone.map_or(0, |v| v.index());

        (initial << 9) | (medial << 7) | (rime << 3) | tone
    }
    /// Replaces the slot matching the symbol's kind.
    pub fn update(&mut self, bopomofo: Bopomofo) {
        match bopomofo.kind() {
            BopomofoKind::Initial => self.initial.replace(bopomofo),
            BopomofoKind::Medial => self.medial.replace(bopomofo),
            BopomofoKind::Rime => self.rime.replace(bopomofo),
            BopomofoKind::Tone => self.tone.replace(bopomofo),
        };
    }
    pub fn remove_initial(&mut self) -> Option<Bopomofo> {
        self.initial.take()
    }
    pub fn remove_medial(&mut self) -> Option<Bopomofo> {
        self.medial.take()
    }
    pub fn remove_rime(&mut self) -> Option<Bopomofo> {
        self.rime.take()
    }
    /// Removes the highest slot in filling order and returns it.
    pub fn pop(&mut self) -> Option<Bopomofo> {
        for bopomofo in [
            &mut self.tone,
            &mut self.rime,
            &mut self.medial,
            &mut self.initial,
        ] {
            if bopomofo.is_some() {
                return bopomofo.take();
            }
        }
        None
    }
    pub fn clear(&mut self) {
        *self = Syllable::new()
    }
}

impl From<Syllable> for u16 {
    fn from(syl: Syllable) -> Self {
        syl.to_u16()
    }
}

impl TryFrom<u16> for Syllable {
    type Error = DecodeSyllableError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        let initial = value >> 9;
        let medial = (value & 0b00000001_10000000) >> 7;
        let rime = (value & 0b00000000_01111000) >> 3;
        let tone = value & 0b00000000_00000111;
        let initial = match initial {
            0 => None,
            _ => Some(Bopomofo::from_initial(initial)?),
        };
        let medial = match medial {
            0 => None,
            _ => Some(Bopomofo::from_medial(medial)?),
        };
        let rime = match rime {
            0 => None,
            _ => Some(Bopomofo::from_rime(rime)?),
        };
        let tone = match tone {
            0 => None,
            _ => Some(Bopomofo::from_tone(tone)?),
        };

        Ok(Syllable {
            initial,
            medial,
            rime,
            tone,
        })
    }
}

impl Display for Syllable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for &bopomofo in [&self.initial, &self.medial, &self.rime, &self.tone] {
            if let Some(bopomofo) = bopomofo {
                f.write_char(bopomofo.into())?;
            }
        }
        Ok(())
    }
}

impl FromStr for Syllable {
    type Err = DecodeSyllableError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut syllable = Syllable::new();
        for c in s.chars() {
            let bopomofo = Bopomofo::try_from(c)?;
            if bopomofo == Bopomofo::TONE1 {
                // first tone has no packed representation
                continue;
            }
            syllable.update(bopomofo);
        }
        if syllable.is_empty() {
            return Err(DecodeSyllableError::Empty);
        }
        Ok(syllable)
    }
}

/// Parses a space-separated sequence of bopomofo syllables.
///
/// This is the textual form used by the user phrase management API, e.g.
/// `"ㄘㄜˋ ㄕˋ"`.
pub fn parse_syllables(input: &str) -> Result<Vec<Syllable>, DecodeSyllableError> {
    input.split_whitespace().map(Syllable::from_str).collect()
}

pub struct SyllableBuilder {
    syllable: Syllable,
}

impl SyllableBuilder {
    pub const fn insert(mut self, bopomofo: Bopomofo) -> SyllableBuilder {
        match bopomofo.kind() {
            BopomofoKind::Initial => {
                if self.syllable.initial.is_some() {
                    panic!("multiple initial bopomofo");
                }
                self.syllable.initial = Some(bopomofo);
            }
            BopomofoKind::Medial => {
                if self.syllable.medial.is_some() {
                    panic!("multiple medial bopomofo");
                }
                self.syllable.medial = Some(bopomofo);
            }
            BopomofoKind::Rime => {
                if self.syllable.rime.is_some() {
                    panic!("multiple rime bopomofo");
                }
                self.syllable.rime = Some(bopomofo);
            }
            BopomofoKind::Tone => {
                if self.syllable.tone.is_some() {
                    panic!("multiple tone bopomofo");
                }
                self.syllable.tone = Some(bopomofo);
            }
        };
        self
    }
    pub const fn build(self) -> Syllable {
        self.syllable
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DecodeSyllableError {
    #[error("syllable decode error: {0}")]
    Bopomofo(#[from] ParseBopomofoError),
    #[error("empty syllable")]
    Empty,
}

#[macro_export]
macro_rules! syl {
    () => { $crate::zhuyin::Syllable::new() };
    ($($bopomofo:expr),+) => {
        {
            let mut builder = $crate::zhuyin::Syllable::builder();
            $(builder = builder.insert($bopomofo);)+
            builder.build()
        }
    };
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::{parse_syllables, Bopomofo, Syllable};

    #[test]
    fn syllable_hsu_sdf_as_u16() {
        let syl = Syllable::builder().insert(Bopomofo::S).build();
        assert_eq!(0x2A00, syl.to_u16());

        let syl = Syllable::builder().insert(Bopomofo::D).build();
        assert_eq!(0xA00, syl.to_u16());

        let syl = Syllable::builder().insert(Bopomofo::F).build();
        assert_eq!(0x800, syl.to_u16());
    }

    #[test]
    fn empty_syllable_as_u16() {
        assert_eq!(0, Syllable::builder().build().to_u16());
    }

    #[test]
    fn syllable_as_u16_roundtrip() {
        for syl in [
            syl![Bopomofo::S],
            syl![Bopomofo::H, Bopomofo::AU, Bopomofo::TONE3],
            syl![Bopomofo::X, Bopomofo::I, Bopomofo::EN, Bopomofo::TONE4],
            syl![Bopomofo::ER],
        ] {
            assert_eq!(syl, syl.to_u16().try_into().unwrap());
        }
    }

    #[test]
    fn display_and_parse_roundtrip() {
        for text in ["ㄏㄠˇ", "ㄉㄜ˙", "ㄓㄤ", "ㄦˋ", "ㄒㄩㄢ"] {
            let syl = Syllable::from_str(text).unwrap();
            assert_eq!(text, syl.to_string());
        }
    }

    #[test]
    fn parse_syllable_sequence() {
        let syllables = parse_syllables("ㄘㄜˋ ㄕˋ").unwrap();
        assert_eq!(
            vec![
                syl![Bopomofo::C, Bopomofo::E, Bopomofo::TONE4],
                syl![Bopomofo::SH, Bopomofo::TONE4],
            ],
            syllables
        );
        assert!(parse_syllables("ㄘㄜˋ x").is_err());
    }

    #[test]
    fn syl_macro_rules() {
        let syl = syl![];
        assert_eq!(Syllable::new(), syl);

        let syl = syl![Bopomofo::S];
        assert_eq!(Syllable::builder().insert(Bopomofo::S).build(), syl);

        let syl = syl![Bopomofo::S, Bopomofo::I, Bopomofo::EN, Bopomofo::TONE4];
        assert_eq!(
            Syllable::builder()
                .insert(Bopomofo::S)
                .insert(Bopomofo::I)
                .insert(Bopomofo::EN)
                .insert(Bopomofo::TONE4)
                .build(),
            syl
        );
    }

    #[test]
    #[should_panic]
    fn syl_macro_rules_fool_proof() {
        syl![Bopomofo::S, Bopomofo::D];
    }

    #[test]
    fn syl_macro_rules_compiles_in_const() {
        const SYLLABLE: Syllable = syl![Bopomofo::S, Bopomofo::I, Bopomofo::EN];
        assert_eq!(
            Syllable::builder()
                .insert(Bopomofo::S)
                .insert(Bopomofo::I)
                .insert(Bopomofo::EN)
                .build(),
            SYLLABLE
        );
    }

    #[test]
    fn new_and_pop_bopomofo() {
        let mut syl = syl![Bopomofo::S, Bopomofo::I, Bopomofo::EN, Bopomofo::TONE4];
        assert_eq!(Some(Bopomofo::TONE4), syl.pop());
        assert_eq!(Some(Bopomofo::EN), syl.pop());
        assert_eq!(Some(Bopomofo::I), syl.pop());
        assert_eq!(Some(Bopomofo::S), syl.pop());
        assert_eq!(None, syl.pop());
        assert_eq!(syl![], syl);
    }
}
