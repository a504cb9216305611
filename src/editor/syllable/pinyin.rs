//! Pinyin layouts
//!
//! Pinyin typists spell a whole syllable in Latin letters and finish it
//! with a tone digit or space. The accumulated spelling is translated to
//! one bopomofo syllable, or two when the romanization is ambiguous, and
//! the result is committed like any other layout.

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use thiserror::Error;

use crate::editor::keymap::{phone_from_key, KeyCode, KeyEvent, KEY_STR_STANDARD};
use crate::zhuyin::{Bopomofo, BopomofoKind, Syllable};

use super::{KeyBehavior, SyllableEditor};

const MAX_PINYIN_LEN: usize = 10;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PinyinVariant {
    #[default]
    HanyuPinyin,
    ThlPinyin,
    Mps2Pinyin,
}

#[derive(Default, Debug)]
pub struct Pinyin {
    key_seq: String,
    syllable: Syllable,
    syllable_alt: Syllable,
    variant: PinyinVariant,
    mapping: Option<PinyinKeyMapping>,
}

impl Pinyin {
    pub fn new() -> Pinyin {
        Default::default()
    }
    pub fn hanyu() -> Pinyin {
        Pinyin {
            variant: PinyinVariant::HanyuPinyin,
            ..Default::default()
        }
    }
    pub fn thl() -> Pinyin {
        Pinyin {
            variant: PinyinVariant::ThlPinyin,
            ..Default::default()
        }
    }
    pub fn mps2() -> Pinyin {
        Pinyin {
            variant: PinyinVariant::Mps2Pinyin,
            ..Default::default()
        }
    }
    /// Overrides the built-in initial and final tables with a mapping
    /// loaded from a `pinyin.tab` style file.
    pub fn with_mapping(mut self, mapping: PinyinKeyMapping) -> Pinyin {
        self.mapping = Some(mapping);
        self
    }

    fn lookup_initial(&self, seq: &str) -> Option<(usize, Bopomofo)> {
        if let Some(mapping) = &self.mapping {
            return mapping
                .initials
                .iter()
                .find(|(pinyin, _)| seq.starts_with(pinyin.as_str()))
                .map(|(pinyin, initial)| (pinyin.len(), *initial));
        }
        table::INITIAL_MAPPING
            .iter()
            .find(|entry| seq.starts_with(entry.pinyin))
            .map(|entry| (entry.pinyin.len(), entry.initial))
    }

    fn lookup_final(&self, seq: &str) -> Option<(Option<Bopomofo>, Option<Bopomofo>)> {
        if let Some(mapping) = &self.mapping {
            return mapping
                .finals
                .iter()
                .find(|(pinyin, _, _)| seq == pinyin)
                .map(|(_, medial, rime)| (*medial, *rime));
        }
        table::FINAL_MAPPING
            .iter()
            .find(|entry| seq == entry.pinyin)
            .map(|entry| (entry.medial, entry.rime))
    }
}

impl SyllableEditor for Pinyin {
    fn key_press(&mut self, key: KeyEvent) -> KeyBehavior {
        if ![
            KeyCode::Space,
            KeyCode::N1,
            KeyCode::N2,
            KeyCode::N3,
            KeyCode::N4,
            KeyCode::N5,
        ]
        .contains(&key.code)
        {
            if self.key_seq.len() == MAX_PINYIN_LEN {
                // buffer is full, ignore this keystroke
                return KeyBehavior::NoWord;
            }
            if !key.ascii.is_ascii_lowercase() {
                return KeyBehavior::KeyError;
            }
            self.key_seq.push(char::from(key.ascii));
            return KeyBehavior::Absorb;
        }

        if self.key_seq.is_empty() {
            return KeyBehavior::KeyError;
        }

        let tone = match key.code {
            // space and 1 mean the unmarked first tone
            KeyCode::N2 => Some(Bopomofo::TONE2),
            KeyCode::N3 => Some(Bopomofo::TONE3),
            KeyCode::N4 => Some(Bopomofo::TONE4),
            KeyCode::N5 => Some(Bopomofo::TONE5),
            _ => None,
        };

        if let Some(entry) = match self.variant {
            PinyinVariant::HanyuPinyin => table::HANYU_PINYIN_MAPPING.iter(),
            PinyinVariant::ThlPinyin => table::THL_PINYIN_MAPPING.iter(),
            PinyinVariant::Mps2Pinyin => table::MPS2_PINYIN_MAPPING.iter(),
        }
        .find(|entry| entry.pinyin == self.key_seq)
        {
            self.key_seq.clear();
            self.syllable = entry.primary;
            self.syllable.tone = tone;
            self.syllable_alt = entry.alt;
            self.syllable_alt.tone = tone;
            return KeyBehavior::Commit;
        }

        if let Some(entry) = table::COMMON_MAPPING
            .iter()
            .find(|entry| entry.pinyin == self.key_seq)
        {
            self.key_seq.clear();
            self.syllable = entry.primary;
            self.syllable.tone = tone;
            self.syllable_alt = entry.alt;
            self.syllable_alt.tone = tone;
            return KeyBehavior::Commit;
        }

        let initial = self.lookup_initial(&self.key_seq);
        let final_seq = match initial {
            Some((prefix_len, _)) => &self.key_seq[prefix_len..],
            None => self.key_seq.as_str(),
        };
        let fina = self.lookup_final(final_seq);

        if initial.is_none() && fina.is_none() {
            self.key_seq.clear();
            return KeyBehavior::Absorb;
        }

        let mut initial = initial.map(|(_, i)| i);
        let mut medial = fina.and_then(|f| f.0);
        let mut rime = fina.and_then(|f| f.1);

        // the empty rime of ㄓㄔㄕㄖㄗㄘㄙ is spelled "i"
        if let Some(Bopomofo::I) = rime {
            match initial {
                Some(Bopomofo::ZH) | Some(Bopomofo::CH) | Some(Bopomofo::SH)
                | Some(Bopomofo::R) | Some(Bopomofo::Z) | Some(Bopomofo::C)
                | Some(Bopomofo::S) => {
                    medial.take();
                    rime.take();
                }
                _ => (),
            }
        }

        // ㄐㄑㄒ spell ㄩ as "u"
        if let Some(Bopomofo::J) | Some(Bopomofo::Q) | Some(Bopomofo::X) = initial {
            match (medial, rime) {
                (Some(Bopomofo::U), Some(Bopomofo::AN))
                | (Some(Bopomofo::U), Some(Bopomofo::EN))
                | (Some(Bopomofo::U), None) => {
                    medial.replace(Bopomofo::IU);
                }
                _ => (),
            };
        }

        match medial {
            Some(Bopomofo::I) | Some(Bopomofo::IU) => {
                match initial {
                    Some(Bopomofo::S) | Some(Bopomofo::SH) => {
                        initial.replace(Bopomofo::X);
                    }
                    Some(Bopomofo::C) | Some(Bopomofo::CH) => {
                        initial.replace(Bopomofo::Q);
                    }
                    _ => (),
                };
            }
            _ => {
                if initial == Some(Bopomofo::J) {
                    initial.replace(Bopomofo::ZH);
                }
            }
        }

        // ㄅㄆㄇㄈ drop the medial of ㄨㄛ and ㄨㄥ
        if let Some(Bopomofo::B) | Some(Bopomofo::P) | Some(Bopomofo::M) | Some(Bopomofo::F) =
            initial
        {
            match (medial, rime) {
                (Some(Bopomofo::U), Some(Bopomofo::ENG)) | (Some(Bopomofo::U), Some(Bopomofo::O)) => {
                    medial.take();
                }
                _ => (),
            };
        }

        self.key_seq.clear();
        self.syllable = Syllable {
            initial,
            medial,
            rime,
            tone,
        };
        self.syllable_alt = self.syllable;
        KeyBehavior::Commit
    }

    fn is_entering(&self) -> bool {
        !self.key_seq.is_empty()
    }

    fn pop(&mut self) -> Option<Bopomofo> {
        self.key_seq.pop();
        None
    }

    fn clear(&mut self) {
        self.key_seq.clear();
        self.syllable.clear();
        self.syllable_alt.clear();
    }

    fn observe(&self) -> Syllable {
        self.syllable
    }

    fn observe_alt(&self) -> Syllable {
        self.syllable_alt
    }

    fn key_seq(&self) -> Option<String> {
        Some(self.key_seq.clone())
    }
}

/// A pinyin to bopomofo mapping loaded from the text table format: an
/// initial count followed by that many `pinyin keys` lines, then a final
/// count and lines likewise. The key column uses standard layout keys.
#[derive(Debug, Default)]
pub struct PinyinKeyMapping {
    initials: Vec<(String, Bopomofo)>,
    finals: Vec<(String, Option<Bopomofo>, Option<Bopomofo>)>,
}

#[derive(Error, Debug)]
pub enum ParsePinyinMappingError {
    #[error("io error")]
    Io(#[from] std::io::Error),
    #[error("malformed pinyin mapping table")]
    Malformed,
}

impl PinyinKeyMapping {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<PinyinKeyMapping, ParsePinyinMappingError> {
        Self::read_from(File::open(path)?)
    }

    pub fn read_from<R: Read>(reader: R) -> Result<PinyinKeyMapping, ParsePinyinMappingError> {
        let mut lines = BufReader::new(reader).lines();
        let mut next_line = move || -> Result<String, ParsePinyinMappingError> {
            loop {
                match lines.next() {
                    Some(line) => {
                        let line = line?;
                        if !line.trim().is_empty() {
                            return Ok(line);
                        }
                    }
                    None => return Err(ParsePinyinMappingError::Malformed),
                }
            }
        };

        let initial_count: usize = next_line()?
            .trim()
            .parse()
            .map_err(|_| ParsePinyinMappingError::Malformed)?;
        let mut initials = Vec::with_capacity(initial_count);
        for _ in 0..initial_count {
            let line = next_line()?;
            let (pinyin, keys) = split_entry(&line)?;
            let initial = phones_from_keys(keys)?
                .into_iter()
                .find(|b| b.kind() == BopomofoKind::Initial)
                .ok_or(ParsePinyinMappingError::Malformed)?;
            initials.push((pinyin, initial));
        }
        // longest prefix must win
        initials.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

        let final_count: usize = next_line()?
            .trim()
            .parse()
            .map_err(|_| ParsePinyinMappingError::Malformed)?;
        let mut finals = Vec::with_capacity(final_count);
        for _ in 0..final_count {
            let line = next_line()?;
            let (pinyin, keys) = split_entry(&line)?;
            let mut medial = None;
            let mut rime = None;
            for phone in phones_from_keys(keys)? {
                match phone.kind() {
                    BopomofoKind::Medial => medial = Some(phone),
                    BopomofoKind::Rime => rime = Some(phone),
                    _ => return Err(ParsePinyinMappingError::Malformed),
                }
            }
            finals.push((pinyin, medial, rime));
        }

        Ok(PinyinKeyMapping { initials, finals })
    }
}

fn split_entry(line: &str) -> Result<(String, &str), ParsePinyinMappingError> {
    let mut parts = line.split_whitespace();
    let pinyin = parts.next().ok_or(ParsePinyinMappingError::Malformed)?;
    let keys = parts.next().ok_or(ParsePinyinMappingError::Malformed)?;
    Ok((pinyin.to_owned(), keys))
}

fn phones_from_keys(keys: &str) -> Result<Vec<Bopomofo>, ParsePinyinMappingError> {
    keys.bytes()
        .map(|key| {
            phone_from_key(KEY_STR_STANDARD, key, 1).ok_or(ParsePinyinMappingError::Malformed)
        })
        .collect()
}

struct AmbiguousMapEntry {
    pinyin: &'static str,
    primary: Syllable,
    alt: Syllable,
}

macro_rules! amb {
    ($pinyin:expr, $primary:expr, $alt:expr ) => {
        AmbiguousMapEntry {
            pinyin: $pinyin,
            primary: $primary,
            alt: $alt,
        }
    };
}

struct InitialMapEntry {
    pinyin: &'static str,
    initial: Bopomofo,
}

macro_rules! ini {
    ($pinyin:expr, $bopomofo:expr) => {
        InitialMapEntry {
            pinyin: $pinyin,
            initial: $bopomofo,
        }
    };
}

struct FinalMapEntry {
    pinyin: &'static str,
    medial: Option<Bopomofo>,
    rime: Option<Bopomofo>,
}

macro_rules! fin {
    ($pinyin:expr, $medial:expr, $rime:expr) => {
        FinalMapEntry {
            pinyin: $pinyin,
            medial: $medial,
            rime: $rime,
        }
    };
}

mod table {

    use crate::{
        syl,
        zhuyin::{Bopomofo::*, Syllable},
    };

    use super::{AmbiguousMapEntry, FinalMapEntry, InitialMapEntry};

    pub(super) const COMMON_MAPPING: [AmbiguousMapEntry; 18] = [
        // Special cases for WG
        amb!("tzu", syl![Z], syl![Z, U]),
        amb!("ssu", syl![S], syl![S, U]),
        amb!("szu", syl![S], syl![S, U]),
        // Common multiple mapping
        amb!("e", syl![E], syl![EH]),
        amb!("ch", syl![CH], syl![Q]),
        amb!("sh", syl![SH], syl![X]),
        amb!("c", syl![C], syl![Q]),
        amb!("s", syl![S], syl![X]),
        amb!("nu", syl![N, U], syl![N, IU]),
        amb!("lu", syl![L, U], syl![L, IU]),
        amb!("luan", syl![L, U, AN], syl![L, IU, AN]),
        amb!("niu", syl![N, I, OU], syl![N, IU]),
        amb!("liu", syl![L, I, OU], syl![L, IU]),
        amb!("jiu", syl![J, I, OU], syl![J, IU]),
        amb!("chiu", syl![Q, I, OU], syl![Q, IU]),
        amb!("shiu", syl![X, I, OU], syl![X, IU]),
        amb!("ju", syl![J, IU], syl![ZH, U]),
        amb!("juan", syl![J, IU, AN], syl![ZH, U, AN]),
    ];

    pub(super) const HANYU_PINYIN_MAPPING: [AmbiguousMapEntry; 4] = [
        amb!("chi", syl![CH], syl![Q, I]),
        amb!("shi", syl![SH], syl![X, I]),
        amb!("ci", syl![C], syl![Q, I]),
        amb!("si", syl![S], syl![X, I]),
    ];

    pub(super) const THL_PINYIN_MAPPING: [AmbiguousMapEntry; 4] = [
        amb!("chi", syl![Q, I], syl![CH]),
        amb!("shi", syl![X, I], syl![SH]),
        amb!("ci", syl![Q, I], syl![C]),
        amb!("si", syl![X, I], syl![S]),
    ];

    pub(super) const MPS2_PINYIN_MAPPING: [AmbiguousMapEntry; 13] = [
        amb!("chi", syl![Q, I], syl![CH]),
        amb!("shi", syl![X, I], syl![SH]),
        amb!("ci", syl![Q, I], syl![C]),
        amb!("si", syl![X, I], syl![S]),
        amb!("niu", syl![N, IU], syl![N, I, OU]),
        amb!("liu", syl![L, IU], syl![L, I, OU]),
        amb!("jiu", syl![J, IU], syl![J, I, OU]),
        amb!("chiu", syl![Q, IU], syl![Q, I, OU]),
        amb!("shiu", syl![X, IU], syl![X, I, OU]),
        amb!("ju", syl![ZH, U], syl![J, IU]),
        amb!("juan", syl![ZH, U, AN], syl![J, IU, AN]),
        amb!("juen", syl![ZH, U, EN], syl![J, IU, EN]),
        amb!("tzu", syl![Z, U], syl![Z]),
    ];

    pub(super) const INITIAL_MAPPING: [InitialMapEntry; 25] = [
        ini!("tz", Z),
        ini!("b", B),
        ini!("p", P),
        ini!("m", M),
        ini!("f", F),
        ini!("d", D),
        ini!("ts", C),
        ini!("t", T),
        ini!("n", N),
        ini!("l", L),
        ini!("g", G),
        ini!("k", K),
        ini!("hs", X),
        ini!("h", H),
        ini!("jh", ZH),
        ini!("j", J),
        ini!("q", Q),
        ini!("x", X),
        ini!("zh", ZH),
        ini!("ch", CH),
        ini!("sh", SH),
        ini!("r", R),
        ini!("z", Z),
        ini!("c", C),
        ini!("s", S),
    ];

    pub(super) const FINAL_MAPPING: [FinalMapEntry; 88] = [
        fin!("uang", Some(U), Some(ANG)),
        fin!("wang", Some(U), Some(ANG)),
        fin!("weng", Some(U), Some(ENG)),
        fin!("wong", Some(U), Some(ENG)),
        fin!("ying", Some(I), Some(ENG)),
        fin!("yung", Some(IU), Some(ENG)),
        fin!("yong", Some(IU), Some(ENG)),
        fin!("iung", Some(IU), Some(ENG)),
        fin!("iong", Some(IU), Some(ENG)),
        fin!("iang", Some(I), Some(ANG)),
        fin!("yang", Some(I), Some(ANG)),
        fin!("yuan", Some(IU), Some(AN)),
        fin!("iuan", Some(IU), Some(AN)),
        fin!("ing", Some(I), Some(ENG)),
        fin!("iao", Some(I), Some(AU)),
        fin!("iau", Some(I), Some(AU)),
        fin!("yao", Some(I), Some(AU)),
        fin!("yau", Some(I), Some(AU)),
        fin!("yun", Some(IU), Some(EN)),
        fin!("iun", Some(IU), Some(EN)),
        fin!("vn", Some(IU), Some(EN)),
        fin!("iou", Some(I), Some(OU)),
        fin!("iu", Some(I), Some(OU)),
        fin!("you", Some(I), Some(OU)),
        fin!("io", Some(I), Some(O)),
        fin!("yo", Some(I), Some(O)),
        fin!("ian", Some(I), Some(AN)),
        fin!("ien", Some(I), Some(AN)),
        fin!("yan", Some(I), Some(AN)),
        fin!("yen", Some(I), Some(AN)),
        fin!("yin", Some(I), Some(EN)),
        fin!("ang", None, Some(ANG)),
        fin!("eng", None, Some(ENG)),
        fin!("uei", Some(U), Some(EI)),
        fin!("ui", Some(U), Some(EI)),
        fin!("wei", Some(U), Some(EI)),
        fin!("uen", Some(U), Some(EN)),
        fin!("yueh", Some(IU), Some(EH)),
        fin!("yue", Some(IU), Some(EH)),
        fin!("iue", Some(IU), Some(EH)),
        fin!("ueh", Some(IU), Some(EH)),
        fin!("ue", Some(IU), Some(EH)),
        fin!("ve", Some(IU), Some(EH)),
        fin!("uai", Some(U), Some(AI)),
        fin!("wai", Some(U), Some(AI)),
        fin!("uan", Some(U), Some(AN)),
        fin!("wan", Some(U), Some(AN)),
        fin!("un", Some(U), Some(EN)),
        fin!("wen", Some(U), Some(EN)),
        fin!("wun", Some(U), Some(EN)),
        fin!("ung", Some(U), Some(ENG)),
        fin!("ong", Some(U), Some(ENG)),
        fin!("van", Some(IU), Some(AN)),
        fin!("er", None, Some(ER)),
        fin!("ai", None, Some(AI)),
        fin!("ei", None, Some(EI)),
        fin!("ao", None, Some(AU)),
        fin!("au", None, Some(AU)),
        fin!("ou", None, Some(OU)),
        fin!("an", None, Some(AN)),
        fin!("en", None, Some(EN)),
        fin!("yi", None, Some(I)),
        fin!("ia", Some(I), Some(A)),
        fin!("ya", Some(I), Some(A)),
        fin!("ieh", Some(I), Some(EH)),
        fin!("ie", Some(I), Some(EH)),
        fin!("yeh", Some(I), Some(EH)),
        fin!("ye", Some(I), Some(EH)),
        fin!("in", Some(I), Some(EN)),
        fin!("wu", Some(U), None),
        fin!("ua", Some(U), Some(A)),
        fin!("wa", Some(U), Some(A)),
        fin!("uo", Some(U), Some(O)),
        fin!("wo", Some(U), Some(O)),
        fin!("yu", Some(IU), None),
        fin!("ih", None, None),
        fin!("a", None, Some(A)),
        fin!("o", None, Some(O)),
        fin!("eh", None, Some(EH)),
        fin!("e", None, Some(E)),
        fin!("v", Some(IU), None),
        fin!("i", Some(I), None),
        fin!("u", Some(U), None),
        fin!("E", None, Some(EH)),
        fin!("n", None, Some(EN)),
        fin!("ng", None, Some(ENG)),
        fin!("r", None, None),
        fin!("z", None, None),
    ];
}

#[cfg(test)]
mod tests {
    use crate::editor::keymap::{IdentityKeymap, Keymap, QWERTY};
    use crate::editor::syllable::{KeyBehavior, SyllableEditor};
    use crate::zhuyin::Bopomofo;

    use super::{Pinyin, PinyinKeyMapping};

    fn type_seq(editor: &mut Pinyin, seq: &[u8]) -> KeyBehavior {
        let keymap = IdentityKeymap::new(QWERTY);
        let mut last = KeyBehavior::Ignore;
        for &key in seq {
            last = editor.key_press(keymap.map_ascii(key));
        }
        last
    }

    #[test]
    fn zhang_first_tone() {
        let mut editor = Pinyin::hanyu();
        assert_eq!(KeyBehavior::Commit, type_seq(&mut editor, b"zhang1"));
        let syl = editor.observe();
        assert_eq!(Some(Bopomofo::ZH), syl.initial);
        assert_eq!(Some(Bopomofo::ANG), syl.rime);
        assert_eq!(None, syl.tone);
        assert_eq!(syl, editor.observe_alt());
    }

    #[test]
    fn hanyu_chi_has_alternative() {
        let mut editor = Pinyin::hanyu();
        assert_eq!(KeyBehavior::Commit, type_seq(&mut editor, b"chi4"));
        assert_eq!(Some(Bopomofo::CH), editor.observe().initial);
        let alt = editor.observe_alt();
        assert_eq!(Some(Bopomofo::Q), alt.initial);
        assert_eq!(Some(Bopomofo::I), alt.medial);
        assert_eq!(Some(Bopomofo::TONE4), alt.tone);
    }

    #[test]
    fn thl_swaps_the_primary_reading() {
        let mut editor = Pinyin::thl();
        assert_eq!(KeyBehavior::Commit, type_seq(&mut editor, b"chi4"));
        assert_eq!(Some(Bopomofo::Q), editor.observe().initial);
        assert_eq!(Some(Bopomofo::CH), editor.observe_alt().initial);
    }

    #[test]
    fn ju_spells_the_rounded_medial() {
        let mut editor = Pinyin::hanyu();
        assert_eq!(KeyBehavior::Commit, type_seq(&mut editor, b"jun1"));
        let syl = editor.observe();
        assert_eq!(Some(Bopomofo::J), syl.initial);
        assert_eq!(Some(Bopomofo::IU), syl.medial);
        assert_eq!(Some(Bopomofo::EN), syl.rime);
    }

    #[test]
    fn unknown_spelling_clears_the_buffer() {
        let mut editor = Pinyin::hanyu();
        assert_eq!(KeyBehavior::Absorb, type_seq(&mut editor, b"wvx1"));
        assert!(!editor.is_entering());
    }

    #[test]
    fn remove_last_pops_the_key_seq() {
        let mut editor = Pinyin::hanyu();
        type_seq(&mut editor, b"zhan");
        editor.pop();
        assert_eq!(Some("zha".to_string()), editor.key_seq());
    }

    #[test]
    fn mapping_file_overlay() {
        let table = "2\nzh 5\nb 1\n2\nang ;\nan 0\n";
        let mapping = PinyinKeyMapping::read_from(table.as_bytes()).unwrap();
        let mut editor = Pinyin::hanyu().with_mapping(mapping);
        assert_eq!(KeyBehavior::Commit, type_seq(&mut editor, b"zhang2"));
        let syl = editor.observe();
        assert_eq!(Some(Bopomofo::ZH), syl.initial);
        assert_eq!(Some(Bopomofo::ANG), syl.rime);
        assert_eq!(Some(Bopomofo::TONE2), syl.tone);
    }
}
