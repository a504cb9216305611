//! The preedit editor.
//!
//! The editor owns the authoritative state of one input context: the
//! syllable state machine, the phonetic and preedit buffers, the cursor,
//! the break and connect hints, pinned selections and the candidate
//! selector. Every host key event funnels through one of the `handle_*`
//! methods which mutate the state, re-run the segmenter when anything it
//! depends on changed, and produce an output snapshot.

use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

use indexmap::IndexMap;
use thiserror::Error;
use tracing::{debug, warn};

use crate::conversion::{
    Break, ChewingConversionEngine, ChineseSequence, Connect, ConversionEngine, Interval,
};
use crate::dictionary::{
    Dictionary, LayeredDictionary, SqliteDictionary, SqliteDictionaryError, TreeDictionary,
    TreeDictionaryError, UserPhraseCursor, UserUpdate,
};
use crate::zhuyin::{parse_syllables, DecodeSyllableError, Syllable};

use self::estimate::UserFreqEstimate;
use self::keymap::{dvorak_remap, IdentityKeymap, KeyEvent, Keymap, QWERTY};
use self::syllable::{
    DaiChien26, Et26, Hsu, KeyBehavior, KeyboardLayoutCompat, Pinyin, Standard, SyllableEditor,
};

pub mod estimate;
pub mod keymap;
pub mod syllable;

/// The hard ceiling on the phonetic buffer.
pub const MAX_PREEDIT_LEN: usize = 50;
/// The longest phrase the engine handles, in syllables.
const MAX_PHRASE_LEN: usize = 11;
/// The manual selection range is bounded to this many characters.
const MAX_RANGE_LEN: i32 = 9;

/// Common full width symbols offered by the symbol table key.
const SYMBOL_TABLE: &[char] = &[
    '，', '、', '。', '？', '！', '；', '：', '…', '—', '（', '）', '「', '」', '『', '』',
    '《', '》', '〈', '〉', '．', '～', '＄', '％', '＆', '＃', '＊', '＠',
];

/// The per-keystroke result flags reported to the host.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct KeystrokeFlags(u8);

impl KeystrokeFlags {
    pub const IGNORE: KeystrokeFlags = KeystrokeFlags(1);
    pub const COMMIT: KeystrokeFlags = KeystrokeFlags(2);
    pub const BELL: KeystrokeFlags = KeystrokeFlags(4);
    pub const ABSORB: KeystrokeFlags = KeystrokeFlags(8);

    pub fn contains(&self, other: KeystrokeFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for KeystrokeFlags {
    type Output = KeystrokeFlags;
    fn bitor(self, rhs: KeystrokeFlags) -> KeystrokeFlags {
        KeystrokeFlags(self.0 | rhs.0)
    }
}

impl std::fmt::Debug for KeystrokeFlags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names = vec![];
        if self.contains(KeystrokeFlags::IGNORE) {
            names.push("Ignore");
        }
        if self.contains(KeystrokeFlags::COMMIT) {
            names.push("Commit");
        }
        if self.contains(KeystrokeFlags::BELL) {
            names.push("Bell");
        }
        if self.contains(KeystrokeFlags::ABSORB) {
            names.push("Absorb");
        }
        write!(f, "KeystrokeFlags({})", names.join("|"))
    }
}

/// Which way `Ctrl+<digit>` collects syllables from the cursor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddPhraseDirection {
    /// The digit names the syllables preceding the cursor.
    Forward,
    /// The digit names the syllables following the cursor.
    Backward,
}

/// Host configurable editor behavior.
#[derive(Clone, Debug)]
pub struct EditorOptions {
    pub candidates_per_page: usize,
    pub max_preedit_len: usize,
    pub selection_keys: Vec<u8>,
    pub add_phrase_direction: AddPhraseDirection,
    pub space_as_selection: bool,
    pub esc_clean_all_buffer: bool,
    pub auto_shift_cursor: bool,
    pub easy_symbol_input: bool,
    pub phrase_choice_rearward: bool,
}

impl Default for EditorOptions {
    fn default() -> EditorOptions {
        EditorOptions {
            candidates_per_page: 10,
            max_preedit_len: MAX_PREEDIT_LEN,
            selection_keys: b"1234567890".to_vec(),
            add_phrase_direction: AddPhraseDirection::Forward,
            space_as_selection: false,
            esc_clean_all_buffer: false,
            auto_shift_cursor: false,
            easy_symbol_input: false,
            phrase_choice_rearward: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
enum PreeditEntry {
    Chinese {
        phone: Syllable,
        phone_alt: Syllable,
        display: char,
    },
    Symbol(char),
}

impl PreeditEntry {
    fn is_chinese(&self) -> bool {
        matches!(self, PreeditEntry::Chinese { .. })
    }
    fn display(&self) -> char {
        match self {
            PreeditEntry::Chinese { display, .. } => *display,
            PreeditEntry::Symbol(c) => *c,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CandidateSource {
    /// Phrase candidates over a span of syllables.
    Phrase,
    /// The symbol table, inserting a new symbol at the cursor.
    SymbolInsert,
    /// The symbol table, replacing the symbol under the cursor.
    SymbolUpdate,
}

#[derive(Debug)]
struct CandidateSelector {
    source: CandidateSource,
    choices: Vec<String>,
    page: usize,
    /// Available spans (phone positions), shortest first.
    avail: Vec<(usize, usize)>,
    current_avail: usize,
    origin_cursor: usize,
}

impl CandidateSelector {
    fn total_pages(&self, page_size: usize) -> usize {
        ((self.choices.len() + page_size - 1) / page_size).max(1)
    }
}

/// A view of the candidate selector for the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidatePage {
    pub candidates: Vec<String>,
    pub page: usize,
    pub total_pages: usize,
    pub total_choices: usize,
}

/// The state snapshot produced after every key event.
#[derive(Debug, Clone, Default)]
pub struct EditorOutput {
    pub preedit: String,
    pub cursor: usize,
    pub intervals: Vec<Interval>,
    pub breaks: Vec<bool>,
    pub commit: String,
    pub bopomofo: String,
    pub aux: String,
    pub candidates: Option<CandidatePage>,
    pub flags: KeystrokeFlags,
}

#[derive(Debug, Error)]
pub enum EditorOpenError {
    #[error("system dictionary error")]
    Tree(#[from] TreeDictionaryError),
    #[error("user store error")]
    User(#[from] SqliteDictionaryError),
}

/// One input method engine context.
pub struct Editor {
    layout: KeyboardLayoutCompat,
    syllable_editor: Box<dyn SyllableEditor>,
    keymap: IdentityKeymap,
    layered: Rc<RefCell<LayeredDictionary>>,
    user_dict: Rc<RefCell<SqliteDictionary>>,
    conversion: ChewingConversionEngine,
    estimate: UserFreqEstimate,
    options: EditorOptions,

    entries: Vec<PreeditEntry>,
    cursor: usize,
    breaks: Vec<bool>,
    connects: Vec<bool>,
    selections: Vec<Interval>,
    intervals: Vec<Interval>,
    num_cut: usize,
    candidates: Option<CandidateSelector>,
    range_start: Option<usize>,
    range_end: i32,

    chinese_mode: bool,
    full_shape: bool,
    commit_buffer: String,
    aux: String,
    flags: KeystrokeFlags,
}

impl Editor {
    /// Creates an engine over explicit dictionary handles.
    pub fn new(
        sys_dict: Rc<RefCell<dyn Dictionary>>,
        user_dict: Rc<RefCell<SqliteDictionary>>,
    ) -> Editor {
        let estimate = {
            let user = user_dict.borrow();
            UserFreqEstimate::open(&user).unwrap_or_default()
        };
        let user_layer: Rc<RefCell<dyn Dictionary>> = user_dict.clone();
        let layered = Rc::new(RefCell::new(LayeredDictionary::new(vec![
            sys_dict, user_layer,
        ])));
        let conversion_dict: Rc<RefCell<dyn Dictionary>> = layered.clone();
        let conversion = ChewingConversionEngine::new(conversion_dict);
        Editor {
            layout: KeyboardLayoutCompat::Default,
            syllable_editor: Box::new(Standard::new()),
            keymap: IdentityKeymap::new(QWERTY),
            layered,
            user_dict,
            conversion,
            estimate,
            options: EditorOptions::default(),
            entries: vec![],
            cursor: 0,
            breaks: vec![false],
            connects: vec![false],
            selections: vec![],
            intervals: vec![],
            num_cut: 0,
            candidates: None,
            range_start: None,
            range_end: 0,
            chinese_mode: true,
            full_shape: false,
            commit_buffer: String::new(),
            aux: String::new(),
            flags: KeystrokeFlags::default(),
        }
    }

    /// Opens an engine from a system data directory and a user store
    /// path.
    pub fn open<P: AsRef<Path>, Q: AsRef<Path>>(
        sys_path: P,
        user_path: Q,
    ) -> Result<Editor, EditorOpenError> {
        let tree = TreeDictionary::open_shared(sys_path)?;
        let user = SqliteDictionary::open(user_path)?;
        struct SharedTree(Rc<TreeDictionary>);
        impl Dictionary for SharedTree {
            fn lookup_phrase(&self, syllables: &[Syllable]) -> crate::dictionary::Phrases {
                self.0.lookup_phrase(syllables)
            }
            fn entries(&self) -> crate::dictionary::DictEntries {
                self.0.entries()
            }
            fn about(&self) -> crate::dictionary::DictionaryInfo {
                self.0.about()
            }
            fn as_mut_dict(&mut self) -> Option<&mut dyn crate::dictionary::DictionaryMut> {
                None
            }
        }
        Ok(Editor::new(
            Rc::new(RefCell::new(SharedTree(tree))),
            Rc::new(RefCell::new(user)),
        ))
    }

    /// Clears every transient buffer, keeping configuration and stores.
    pub fn reset(&mut self) {
        self.syllable_editor.clear();
        self.entries.clear();
        self.cursor = 0;
        self.breaks = vec![false];
        self.connects = vec![false];
        self.selections.clear();
        self.intervals.clear();
        self.num_cut = 0;
        self.candidates = None;
        self.range_start = None;
        self.range_end = 0;
        self.commit_buffer.clear();
        self.aux.clear();
        self.flags = KeystrokeFlags::default();
    }

    /// Persists the lifetime delta; called automatically on drop.
    pub fn close(&mut self) {
        let user = self.user_dict.borrow();
        self.estimate.flush(&user);
    }

    pub fn options(&self) -> &EditorOptions {
        &self.options
    }

    pub fn set_options(&mut self, options: EditorOptions) {
        self.options = options;
    }

    pub fn layout(&self) -> KeyboardLayoutCompat {
        self.layout
    }

    /// Switches the keyboard layout, clearing the half-typed syllable.
    pub fn set_layout(&mut self, layout: KeyboardLayoutCompat) {
        self.layout = layout;
        self.syllable_editor = match layout {
            KeyboardLayoutCompat::Default => Box::new(Standard::new()),
            KeyboardLayoutCompat::Hsu | KeyboardLayoutCompat::DvorakHsu => Box::new(Hsu::new()),
            KeyboardLayoutCompat::Ibm => Box::new(Standard::ibm()),
            KeyboardLayoutCompat::GinYieh => Box::new(Standard::gin_yieh()),
            KeyboardLayoutCompat::Et => Box::new(Standard::et()),
            KeyboardLayoutCompat::Et26 => Box::new(Et26::new()),
            KeyboardLayoutCompat::Dvorak => Box::new(Standard::dvorak()),
            KeyboardLayoutCompat::DachenCp26 => Box::new(DaiChien26::new()),
            KeyboardLayoutCompat::HanyuPinyin => Box::new(Pinyin::hanyu()),
            KeyboardLayoutCompat::ThlPinyin => Box::new(Pinyin::thl()),
            KeyboardLayoutCompat::Mps2Pinyin => Box::new(Pinyin::mps2()),
            KeyboardLayoutCompat::Carpalx => Box::new(Standard::carpalx()),
        };
    }

    pub fn chinese_mode(&self) -> bool {
        self.chinese_mode
    }

    pub fn set_chinese_mode(&mut self, chinese: bool) {
        self.syllable_editor.clear();
        self.chinese_mode = chinese;
    }

    pub fn full_shape(&self) -> bool {
        self.full_shape
    }

    pub fn set_full_shape(&mut self, full: bool) {
        self.full_shape = full;
    }

    fn is_entering(&self) -> bool {
        !self.entries.is_empty() || self.syllable_editor.is_entering() || self.candidates.is_some()
    }

    fn is_selecting(&self) -> bool {
        self.candidates.is_some()
    }

    fn phone_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_chinese()).count()
    }

    /// The phone position matching the preedit cursor.
    fn phone_cursor(&self) -> usize {
        self.entries[..self.cursor]
            .iter()
            .filter(|e| e.is_chinese())
            .count()
    }

    /// The preedit index holding the n-th phone.
    fn entry_of_phone(&self, phone_pos: usize) -> usize {
        let mut seen = 0;
        for (index, entry) in self.entries.iter().enumerate() {
            if entry.is_chinese() {
                if seen == phone_pos {
                    return index;
                }
                seen += 1;
            }
        }
        self.entries.len()
    }

    fn syllables(&self) -> Vec<Syllable> {
        self.entries
            .iter()
            .filter_map(|entry| match entry {
                PreeditEntry::Chinese { phone, .. } => Some(*phone),
                PreeditEntry::Symbol(_) => None,
            })
            .collect()
    }

    fn chinese_sequence(&self) -> ChineseSequence {
        let mut breaks: Vec<Break> = self
            .breaks
            .iter()
            .enumerate()
            .filter(|(_, &b)| b)
            .map(|(i, _)| Break(i))
            .collect();
        // a symbol between two phones always forces a boundary
        let mut phone_pos = 0;
        for entry in &self.entries {
            match entry {
                PreeditEntry::Chinese { .. } => phone_pos += 1,
                PreeditEntry::Symbol(_) => breaks.push(Break(phone_pos)),
            }
        }
        ChineseSequence {
            syllables: self.syllables(),
            selections: self.selections.clone(),
            breaks,
            connects: self
                .connects
                .iter()
                .enumerate()
                .filter(|(_, &c)| c)
                .map(|(i, _)| Connect(i))
                .collect(),
        }
    }

    /// Re-runs the segmenter and refreshes the preedit display.
    fn reconvert(&mut self) {
        let sequence = self.chinese_sequence();
        self.intervals = self.conversion.convert_next(&sequence, self.num_cut);
        for interval in &self.intervals {
            let mut chars = interval.phrase.chars();
            for phone_pos in interval.start..interval.end {
                let index = self.entry_of_phone(phone_pos);
                if let (Some(PreeditEntry::Chinese { display, .. }), Some(c)) =
                    (self.entries.get_mut(index), chars.next())
                {
                    *display = c;
                }
            }
        }
    }

    /// Pins the boundaries chosen by Tab cycling as hard break points.
    fn pin_cycled_segmentation(&mut self) {
        if self.num_cut == 0 {
            return;
        }
        for interval in &self.intervals {
            if interval.start < self.breaks.len() {
                self.breaks[interval.start] = true;
            }
            if interval.end < self.breaks.len() {
                self.breaks[interval.end] = true;
            }
        }
        self.breaks[0] = false;
        if let Some(last) = self.breaks.last_mut() {
            *last = false;
        }
        self.num_cut = 0;
    }

    fn check_and_reset_range(&mut self) {
        self.range_start = None;
        self.range_end = 0;
    }

    fn insert_entry(&mut self, entry: PreeditEntry) {
        let is_chinese = entry.is_chinese();
        let phone_pos = self.phone_cursor();
        self.entries.insert(self.cursor, entry);
        self.cursor += 1;
        if is_chinese {
            self.breaks.insert(phone_pos, false);
            self.connects.insert(phone_pos, false);
            self.shift_selections(phone_pos, 1);
        }
    }

    fn remove_entry(&mut self, index: usize) {
        let entry = self.entries.remove(index);
        if entry.is_chinese() {
            let phone_pos = self.entries[..index]
                .iter()
                .filter(|e| e.is_chinese())
                .count();
            self.breaks.remove(phone_pos);
            self.connects.remove(phone_pos);
            self.drop_selections_at(phone_pos);
        }
        if self.cursor > index {
            self.cursor -= 1;
        }
    }

    fn shift_selections(&mut self, phone_pos: usize, delta: isize) {
        self.selections.retain_mut(|sel| {
            if sel.start >= phone_pos {
                sel.start = (sel.start as isize + delta) as usize;
                sel.end = (sel.end as isize + delta) as usize;
                true
            } else {
                // an insert inside a pinned phrase unpins it
                sel.end <= phone_pos
            }
        });
    }

    fn drop_selections_at(&mut self, phone_pos: usize) {
        self.selections.retain_mut(|sel| {
            if sel.start > phone_pos {
                sel.start -= 1;
                sel.end -= 1;
                true
            } else {
                sel.end <= phone_pos
            }
        });
    }

    fn full_shape_char(&self, c: char) -> char {
        if !self.full_shape {
            return c;
        }
        match c {
            ' ' => '\u{3000}',
            '!'..='~' => char::from_u32(c as u32 + 0xFEE0).unwrap_or(c),
            _ => c,
        }
    }

    /// Inserts a printable key as a symbol, or commits it directly when
    /// the preedit is empty.
    fn symbol_input(&mut self, c: char) {
        let c = self.full_shape_char(c);
        if self.entries.is_empty() {
            // quick commit
            self.commit_buffer.push(c);
            self.flags = self.flags | KeystrokeFlags::COMMIT;
            return;
        }
        if self.entries.len() >= self.options.max_preedit_len {
            self.flags = self.flags | KeystrokeFlags::BELL;
            return;
        }
        self.insert_entry(PreeditEntry::Symbol(c));
        self.flags = self.flags | KeystrokeFlags::ABSORB;
    }

    /// Appends the committed syllable to the buffer after the dictionary
    /// check, advancing the cursor.
    fn add_chinese(&mut self, phone: Syllable, phone_alt: Syllable) {
        if self.entries.len() >= self.options.max_preedit_len {
            self.syllable_editor.clear();
            self.flags = self.flags | KeystrokeFlags::BELL;
            return;
        }
        let has_word = self
            .layered
            .borrow()
            .lookup_word(phone)
            .next()
            .is_some();
        if !has_word {
            // no such reading, clear to avoid a wedged buffer
            debug!(phone = phone.to_u16(), "syllable has no reading");
            self.syllable_editor.clear();
            self.flags = self.flags | KeystrokeFlags::BELL | KeystrokeFlags::ABSORB;
            return;
        }
        self.syllable_editor.clear();
        self.insert_entry(PreeditEntry::Chinese {
            phone,
            phone_alt,
            display: '□',
        });
        self.flags = self.flags | KeystrokeFlags::ABSORB;
    }

    fn preedit_string(&self) -> String {
        self.entries.iter().map(|e| e.display()).collect()
    }

    /// Maps phone-space intervals onto preedit positions for display.
    fn display_intervals(&self) -> Vec<Interval> {
        self.intervals
            .iter()
            .map(|interval| Interval {
                start: self.entry_of_phone(interval.start),
                end: self.entry_of_phone(interval.end - 1) + 1,
                phrase: interval.phrase.clone(),
            })
            .collect()
    }

    fn make_output(&self) -> EditorOutput {
        EditorOutput {
            preedit: self.preedit_string(),
            cursor: self.cursor,
            intervals: self.display_intervals(),
            breaks: self.breaks.clone(),
            commit: self.commit_buffer.clone(),
            bopomofo: self
                .syllable_editor
                .key_seq()
                .unwrap_or_else(|| self.syllable_editor.observe().to_string()),
            aux: self.aux.clone(),
            candidates: self.candidate_page(),
            flags: self.flags,
        }
    }

    fn begin_key(&mut self) {
        self.estimate.tick();
        self.commit_buffer.clear();
        self.aux.clear();
        self.flags = KeystrokeFlags::default();
    }

    // === candidate machinery ===

    fn candidate_page(&self) -> Option<CandidatePage> {
        let selector = self.candidates.as_ref()?;
        let page_size = self.options.candidates_per_page;
        let start = selector.page * page_size;
        let slice = selector
            .choices
            .iter()
            .skip(start)
            .take(page_size)
            .cloned()
            .collect();
        Some(CandidatePage {
            candidates: slice,
            page: selector.page,
            total_pages: selector.total_pages(page_size),
            total_choices: selector.choices.len(),
        })
    }

    fn phones_are_contiguous(&self, start: usize, end: usize) -> bool {
        debug_assert!(start < end);
        self.entry_of_phone(end - 1) - self.entry_of_phone(start) == end - 1 - start
    }

    /// Collects the candidate spans covering the target phone position,
    /// shortest first.
    fn avail_spans(&self, phone_pos: usize) -> Vec<(usize, usize)> {
        let count = self.phone_count();
        let syllables = self.syllables();
        let mut avail = vec![];
        for len in 1..=MAX_PHRASE_LEN {
            let (start, end) = if self.options.phrase_choice_rearward {
                if phone_pos + 1 < len {
                    break;
                }
                (phone_pos + 1 - len, phone_pos + 1)
            } else {
                (phone_pos, phone_pos + len)
            };
            if end > count {
                break;
            }
            if !self.phones_are_contiguous(start, end) {
                break;
            }
            if self
                .layered
                .borrow()
                .lookup_phrase(&syllables[start..end])
                .next()
                .is_none()
            {
                continue;
            }
            avail.push((start, end));
        }
        avail
    }

    fn choices_for_span(&self, start: usize, end: usize) -> Vec<String> {
        let syllables = self.syllables();
        let mut merged: IndexMap<String, u32> = IndexMap::new();
        for phrase in self
            .layered
            .borrow()
            .lookup_phrase(&syllables[start..end])
        {
            merged.insert(phrase.as_str().to_string(), phrase.freq());
        }
        merged.into_keys().collect()
    }

    /// Opens phrase or symbol candidates around the cursor.
    fn open_candidates(&mut self) {
        if self.entries.is_empty() {
            self.flags = self.flags | KeystrokeFlags::IGNORE;
            return;
        }
        let target = if self.cursor == self.entries.len() {
            self.cursor - 1
        } else {
            self.cursor
        };
        match &self.entries[target] {
            PreeditEntry::Chinese { .. } => {
                let phone_pos = self.entries[..target]
                    .iter()
                    .filter(|e| e.is_chinese())
                    .count();
                let avail = self.avail_spans(phone_pos);
                if avail.is_empty() {
                    self.flags = self.flags | KeystrokeFlags::BELL;
                    return;
                }
                let current_avail = avail.len() - 1;
                let (start, end) = avail[current_avail];
                self.candidates = Some(CandidateSelector {
                    source: CandidateSource::Phrase,
                    choices: self.choices_for_span(start, end),
                    page: 0,
                    avail,
                    current_avail,
                    origin_cursor: self.cursor,
                });
            }
            PreeditEntry::Symbol(_) => {
                self.candidates = Some(CandidateSelector {
                    source: CandidateSource::SymbolUpdate,
                    choices: SYMBOL_TABLE.iter().map(|c| c.to_string()).collect(),
                    page: 0,
                    avail: vec![],
                    current_avail: 0,
                    origin_cursor: self.cursor,
                });
            }
        }
        self.flags = self.flags | KeystrokeFlags::ABSORB;
    }

    fn open_symbol_table(&mut self) {
        self.candidates = Some(CandidateSelector {
            source: CandidateSource::SymbolInsert,
            choices: SYMBOL_TABLE.iter().map(|c| c.to_string()).collect(),
            page: 0,
            avail: vec![],
            current_avail: 0,
            origin_cursor: self.cursor,
        });
        self.flags = self.flags | KeystrokeFlags::ABSORB;
    }

    /// Cycles the candidate list through the available phrase lengths.
    fn cycle_candidate_length(&mut self) {
        let Some(selector) = self.candidates.as_mut() else {
            return;
        };
        if selector.source != CandidateSource::Phrase || selector.avail.is_empty() {
            return;
        }
        selector.current_avail = if selector.current_avail == 0 {
            selector.avail.len() - 1
        } else {
            selector.current_avail - 1
        };
        selector.page = 0;
        let (start, end) = selector.avail[selector.current_avail];
        let choices = self.choices_for_span(start, end);
        if let Some(selector) = self.candidates.as_mut() {
            selector.choices = choices;
        }
    }

    fn close_candidates(&mut self, restore_cursor: bool) {
        if let Some(selector) = self.candidates.take() {
            if restore_cursor {
                self.cursor = selector.origin_cursor;
            }
        }
    }

    /// Applies the picked candidate.
    fn select_candidate(&mut self, index: usize) {
        let Some(selector) = self.candidates.as_ref() else {
            return;
        };
        let Some(choice) = selector.choices.get(index).cloned() else {
            self.flags = self.flags | KeystrokeFlags::BELL;
            return;
        };
        match selector.source {
            CandidateSource::Phrase => {
                let (start, end) = selector.avail[selector.current_avail];
                self.selections
                    .retain(|sel| sel.end <= start || sel.start >= end);
                self.selections.push(Interval {
                    start,
                    end,
                    phrase: choice,
                });
                self.candidates = None;
                if self.options.auto_shift_cursor && self.cursor < self.entries.len() {
                    let advance = if self.options.phrase_choice_rearward {
                        1
                    } else {
                        end - start
                    };
                    self.cursor = (self.cursor + advance).min(self.entries.len());
                }
                self.reconvert();
            }
            CandidateSource::SymbolInsert => {
                self.candidates = None;
                let symbol = choice.chars().next().unwrap_or(' ');
                if self.entries.len() >= self.options.max_preedit_len {
                    self.flags = self.flags | KeystrokeFlags::BELL;
                    return;
                }
                self.insert_entry(PreeditEntry::Symbol(symbol));
                self.reconvert();
            }
            CandidateSource::SymbolUpdate => {
                let target = if selector.origin_cursor == self.entries.len() {
                    selector.origin_cursor - 1
                } else {
                    selector.origin_cursor
                };
                self.candidates = None;
                let symbol = choice.chars().next().unwrap_or(' ');
                if let Some(entry) = self.entries.get_mut(target) {
                    *entry = PreeditEntry::Symbol(symbol);
                }
                self.reconvert();
            }
        }
        self.flags = self.flags | KeystrokeFlags::ABSORB;
    }

    fn selection_key_index(&self, key: u8) -> Option<usize> {
        self.options
            .selection_keys
            .iter()
            .position(|&k| k == key)
    }

    /// Key dispatch while the candidate window is open.
    fn handle_key_selecting(&mut self, c: char) {
        let key = c as u8;
        if key == b' ' {
            self.next_candidate_page();
            return;
        }
        if let Some(num) = self.selection_key_index(key) {
            let page_size = self.options.candidates_per_page;
            let page = self.candidates.as_ref().map(|s| s.page).unwrap_or(0);
            self.select_candidate(page * page_size + num);
            return;
        }
        match key.to_ascii_lowercase() {
            b'j' => {
                if self.cursor > 0 {
                    self.cursor -= 1;
                    self.reopen_candidates_at_cursor();
                }
            }
            b'k' => {
                if self.cursor < self.entries.len() {
                    self.cursor += 1;
                    self.reopen_candidates_at_cursor();
                }
            }
            _ => {
                self.flags = self.flags | KeystrokeFlags::BELL;
            }
        }
        self.flags = self.flags | KeystrokeFlags::ABSORB;
    }

    fn reopen_candidates_at_cursor(&mut self) {
        self.candidates = None;
        self.open_candidates();
    }

    fn next_candidate_page(&mut self) {
        let page_size = self.options.candidates_per_page;
        if let Some(selector) = self.candidates.as_mut() {
            if selector.page + 1 < selector.total_pages(page_size) {
                selector.page += 1;
            } else {
                selector.page = 0;
            }
        }
        self.flags = self.flags | KeystrokeFlags::ABSORB;
    }

    fn prev_candidate_page(&mut self) {
        let page_size = self.options.candidates_per_page;
        if let Some(selector) = self.candidates.as_mut() {
            if selector.page > 0 {
                selector.page -= 1;
            } else {
                selector.page = selector.total_pages(page_size) - 1;
            }
        }
        self.flags = self.flags | KeystrokeFlags::ABSORB;
    }

    // === named key handlers ===

    /// Handles a printable key.
    pub fn handle_default(&mut self, c: char) -> EditorOutput {
        self.begin_key();
        if !c.is_ascii() || (c != ' ' && !c.is_ascii_graphic()) {
            self.flags = KeystrokeFlags::IGNORE;
            return self.make_output();
        }
        self.check_and_reset_range();
        self.pin_cycled_segmentation();

        if self.is_selecting() {
            self.handle_key_selecting(c);
            return self.make_output();
        }

        if self.chinese_mode {
            let key = if self.layout == KeyboardLayoutCompat::DvorakHsu {
                dvorak_remap(c as u8)
            } else {
                c as u8
            };
            if key == b'`' {
                self.open_symbol_table();
                return self.make_output();
            }
            let event: KeyEvent = self.keymap.map_ascii(key);
            let behavior = self.syllable_editor.key_press(event);
            match behavior {
                KeyBehavior::Absorb => {
                    self.flags = self.flags | KeystrokeFlags::ABSORB;
                }
                KeyBehavior::Commit => {
                    let phone = self.syllable_editor.observe();
                    let phone_alt = self.syllable_editor.observe_alt();
                    self.add_chinese(phone, phone_alt);
                    self.reconvert();
                }
                KeyBehavior::NoWord => {
                    self.flags = self.flags | KeystrokeFlags::BELL | KeystrokeFlags::ABSORB;
                }
                KeyBehavior::OpenSymbolTable => {
                    self.open_symbol_table();
                }
                KeyBehavior::KeyError | KeyBehavior::Ignore | KeyBehavior::Error => {
                    self.symbol_input(c.to_ascii_lowercase());
                    self.reconvert();
                }
            }
        } else {
            self.symbol_input(c);
            self.reconvert();
        }
        self.make_output()
    }

    /// Space either feeds the state machine or drives the candidates.
    pub fn handle_space(&mut self) -> EditorOutput {
        if !self.options.space_as_selection
            || !self.chinese_mode
            || self.syllable_editor.is_entering()
        {
            return self.handle_default(' ');
        }
        self.begin_key();
        self.check_and_reset_range();
        if self.is_selecting() {
            self.next_candidate_page();
        } else {
            self.open_candidates();
        }
        self.make_output()
    }

    pub fn handle_esc(&mut self) -> EditorOutput {
        self.begin_key();
        self.check_and_reset_range();
        if !self.is_entering() {
            self.flags = KeystrokeFlags::IGNORE;
        } else if self.is_selecting() {
            self.close_candidates(true);
            self.flags = KeystrokeFlags::ABSORB;
        } else if self.syllable_editor.is_entering() {
            self.syllable_editor.clear();
            self.flags = KeystrokeFlags::ABSORB;
        } else if self.options.esc_clean_all_buffer {
            self.reset();
            self.flags = KeystrokeFlags::ABSORB;
        } else {
            self.flags = KeystrokeFlags::ABSORB;
        }
        self.make_output()
    }

    /// Commits the preedit, or learns the phrase under the manual range.
    pub fn handle_enter(&mut self) -> EditorOutput {
        self.begin_key();
        if !self.is_entering() {
            self.flags = KeystrokeFlags::IGNORE;
        } else if self.is_selecting() {
            self.flags = KeystrokeFlags::ABSORB | KeystrokeFlags::BELL;
        } else if let (Some(start), true) = (self.range_start.take(), self.range_end != 0) {
            let len = self.range_end.unsigned_abs() as usize;
            let phone_start = if self.range_end > 0 {
                self.entries[..start].iter().filter(|e| e.is_chinese()).count()
            } else {
                self.phone_cursor()
            };
            self.range_end = 0;
            if len > 1 {
                self.add_user_phrase_span(phone_start, len);
                self.reconvert();
            }
            self.flags = self.flags | KeystrokeFlags::ABSORB;
        } else {
            self.reconvert();
            let commit = self.preedit_string();
            self.auto_learn();
            let options = self.options.clone();
            self.reset();
            self.options = options;
            self.commit_buffer = commit;
            self.flags = KeystrokeFlags::COMMIT;
        }
        self.make_output()
    }

    pub fn handle_del(&mut self) -> EditorOutput {
        self.begin_key();
        self.check_and_reset_range();
        if !self.is_entering() {
            self.flags = KeystrokeFlags::IGNORE;
            return self.make_output();
        }
        if !self.is_selecting() {
            if !self.syllable_editor.is_entering() && self.cursor < self.entries.len() {
                self.remove_entry(self.cursor);
                self.reconvert();
            }
            self.flags = self.flags | KeystrokeFlags::ABSORB;
        }
        self.make_output()
    }

    pub fn handle_backspace(&mut self) -> EditorOutput {
        self.begin_key();
        self.check_and_reset_range();
        if !self.is_entering() {
            self.flags = KeystrokeFlags::IGNORE;
            return self.make_output();
        }
        if self.is_selecting() {
            self.close_candidates(true);
        } else if self.syllable_editor.is_entering() {
            self.syllable_editor.pop();
        } else if self.cursor > 0 {
            self.remove_entry(self.cursor - 1);
            self.reconvert();
        }
        self.flags = self.flags | KeystrokeFlags::ABSORB;
        self.make_output()
    }

    pub fn handle_up(&mut self) -> EditorOutput {
        self.begin_key();
        self.check_and_reset_range();
        if !self.is_entering() {
            self.flags = KeystrokeFlags::IGNORE;
        } else if self.is_selecting() {
            self.close_candidates(true);
            self.flags = KeystrokeFlags::ABSORB;
        } else {
            self.flags = KeystrokeFlags::ABSORB;
        }
        self.make_output()
    }

    pub fn handle_down(&mut self) -> EditorOutput {
        self.begin_key();
        self.check_and_reset_range();
        if !self.is_entering() {
            self.flags = KeystrokeFlags::IGNORE;
            return self.make_output();
        }
        self.open_candidates();
        self.make_output()
    }

    pub fn handle_left(&mut self) -> EditorOutput {
        self.begin_key();
        if !self.is_entering() {
            self.flags = KeystrokeFlags::IGNORE;
            return self.make_output();
        }
        if self.is_selecting() {
            self.prev_candidate_page();
        } else if !self.syllable_editor.is_entering() && self.cursor > 0 {
            self.check_and_reset_range();
            self.cursor -= 1;
            self.flags = KeystrokeFlags::ABSORB;
        } else {
            self.flags = KeystrokeFlags::ABSORB;
        }
        self.make_output()
    }

    pub fn handle_right(&mut self) -> EditorOutput {
        self.begin_key();
        if !self.is_entering() {
            self.flags = KeystrokeFlags::IGNORE;
            return self.make_output();
        }
        if self.is_selecting() {
            self.next_candidate_page();
        } else if !self.syllable_editor.is_entering() && self.cursor < self.entries.len() {
            self.check_and_reset_range();
            self.cursor += 1;
            self.flags = KeystrokeFlags::ABSORB;
        } else {
            self.flags = KeystrokeFlags::ABSORB;
        }
        self.make_output()
    }

    /// Extends the manual phrase range one position to the left.
    pub fn handle_shift_left(&mut self) -> EditorOutput {
        self.begin_key();
        if !self.is_entering() {
            self.flags = KeystrokeFlags::IGNORE;
            return self.make_output();
        }
        if !self.is_selecting()
            && !self.syllable_editor.is_entering()
            && self.cursor > 0
            && self.range_end > -MAX_RANGE_LEN
        {
            if self.range_start.is_none() {
                self.range_start = Some(self.cursor);
            }
            self.cursor -= 1;
            if self.entries[self.cursor].is_chinese() {
                self.range_end -= 1;
            }
            if self.range_end == 0 {
                self.range_start = None;
            }
        }
        self.flags = KeystrokeFlags::ABSORB;
        self.make_output()
    }

    /// Extends the manual phrase range one position to the right.
    pub fn handle_shift_right(&mut self) -> EditorOutput {
        self.begin_key();
        if !self.is_entering() {
            self.flags = KeystrokeFlags::IGNORE;
            return self.make_output();
        }
        if !self.is_selecting()
            && !self.syllable_editor.is_entering()
            && self.cursor < self.entries.len()
            && self.range_end < MAX_RANGE_LEN
        {
            if self.range_start.is_none() {
                self.range_start = Some(self.cursor);
            }
            if self.entries[self.cursor].is_chinese() {
                self.range_end += 1;
            }
            self.cursor += 1;
            if self.range_end == 0 {
                self.range_start = None;
            }
        }
        self.flags = KeystrokeFlags::ABSORB;
        self.make_output()
    }

    /// Re-segments at end of buffer, or toggles break/connect hints at
    /// the cursor.
    pub fn handle_tab(&mut self) -> EditorOutput {
        self.begin_key();
        self.check_and_reset_range();
        if !self.is_entering() {
            self.flags = KeystrokeFlags::IGNORE;
            return self.make_output();
        }
        if !self.is_selecting() {
            if self.cursor == self.entries.len() {
                self.num_cut += 1;
                self.reconvert();
            } else if self.cursor > 0 && self.entries[self.cursor - 1].is_chinese() {
                let pos = self.phone_cursor();
                let inside_phrase = self
                    .intervals
                    .iter()
                    .any(|it| it.start < pos && pos < it.end);
                if inside_phrase {
                    self.breaks[pos] = true;
                    self.connects[pos] = false;
                } else {
                    self.breaks[pos] = false;
                    self.connects[pos] = true;
                }
                self.reconvert();
            }
            self.flags = KeystrokeFlags::ABSORB;
        }
        self.make_output()
    }

    /// Clears both hints at the cursor.
    pub fn handle_dbl_tab(&mut self) -> EditorOutput {
        self.begin_key();
        self.check_and_reset_range();
        if !self.is_entering() {
            self.flags = KeystrokeFlags::IGNORE;
            return self.make_output();
        }
        if !self.is_selecting() {
            let pos = self.phone_cursor();
            if pos < self.breaks.len() {
                self.breaks[pos] = false;
                self.connects[pos] = false;
            }
            self.reconvert();
        }
        self.flags = KeystrokeFlags::ABSORB;
        self.make_output()
    }

    pub fn handle_capslock(&mut self) -> EditorOutput {
        self.begin_key();
        self.set_chinese_mode(!self.chinese_mode);
        self.flags = KeystrokeFlags::ABSORB;
        self.make_output()
    }

    pub fn handle_shift_space(&mut self) -> EditorOutput {
        self.begin_key();
        if !self.is_selecting() {
            self.check_and_reset_range();
        }
        self.full_shape = !self.full_shape;
        self.flags = KeystrokeFlags::ABSORB;
        self.make_output()
    }

    pub fn handle_home(&mut self) -> EditorOutput {
        self.begin_key();
        self.check_and_reset_range();
        if !self.is_entering() {
            self.flags = KeystrokeFlags::IGNORE;
        } else if !self.is_selecting() {
            self.cursor = 0;
            self.flags = KeystrokeFlags::ABSORB;
        }
        self.make_output()
    }

    pub fn handle_end(&mut self) -> EditorOutput {
        self.begin_key();
        self.check_and_reset_range();
        if !self.is_entering() {
            self.flags = KeystrokeFlags::IGNORE;
        } else if !self.is_selecting() {
            self.cursor = self.entries.len();
            self.flags = KeystrokeFlags::ABSORB;
        }
        self.make_output()
    }

    pub fn handle_page_up(&mut self) -> EditorOutput {
        self.begin_key();
        self.check_and_reset_range();
        if self.is_selecting() {
            self.prev_candidate_page();
        } else {
            self.flags = KeystrokeFlags::IGNORE;
        }
        self.make_output()
    }

    pub fn handle_page_down(&mut self) -> EditorOutput {
        self.begin_key();
        self.check_and_reset_range();
        if self.is_selecting() {
            self.next_candidate_page();
        } else {
            self.flags = KeystrokeFlags::IGNORE;
        }
        self.make_output()
    }

    /// `Ctrl+<digit>` adds a user phrase of that length at the cursor.
    pub fn handle_ctrl_num(&mut self, digit: u8) -> EditorOutput {
        self.begin_key();
        self.check_and_reset_range();
        if self.is_selecting() {
            return self.make_output();
        }
        if digit < 2 || digit > 9 {
            self.open_symbol_table();
            return self.make_output();
        }
        self.reconvert();
        let len = digit as usize;
        let cursor = self.phone_cursor();
        let phone_start = match self.options.add_phrase_direction {
            AddPhraseDirection::Forward => {
                if cursor < len {
                    self.flags = KeystrokeFlags::BELL;
                    return self.make_output();
                }
                cursor - len
            }
            AddPhraseDirection::Backward => {
                if cursor + len > self.phone_count() {
                    self.flags = KeystrokeFlags::BELL;
                    return self.make_output();
                }
                cursor
            }
        };
        self.add_user_phrase_span(phone_start, len);
        self.reconvert();
        self.flags = self.flags | KeystrokeFlags::ABSORB;
        self.make_output()
    }

    /// Numeric keypad keys select candidates or type symbols directly.
    pub fn handle_numlock(&mut self, digit: u8) -> EditorOutput {
        if self.is_selecting() {
            self.begin_key();
            let num = match digit {
                1..=9 => digit as usize - 1,
                0 => 9,
                _ => {
                    self.flags = KeystrokeFlags::BELL;
                    return self.make_output();
                }
            };
            let page_size = self.options.candidates_per_page;
            let page = self.candidates.as_ref().map(|s| s.page).unwrap_or(0);
            self.select_candidate(page * page_size + num);
            self.make_output()
        } else {
            self.handle_default(char::from(b'0' + digit))
        }
    }

    fn add_user_phrase_span(&mut self, phone_start: usize, len: usize) {
        let count = self.phone_count();
        if len < 1 || phone_start + len > count {
            self.flags = self.flags | KeystrokeFlags::BELL;
            return;
        }
        if !self.phones_are_contiguous(phone_start, phone_start + len) {
            self.flags = self.flags | KeystrokeFlags::BELL;
            return;
        }
        let syllables: Vec<Syllable> =
            self.syllables()[phone_start..phone_start + len].to_vec();
        let phrase: String = (phone_start..phone_start + len)
            .map(|pos| self.entries[self.entry_of_phone(pos)].display())
            .collect();
        let now = self.estimate.now();
        let result = self
            .user_dict
            .borrow_mut()
            .upsert(&syllables, &phrase, now);
        match result {
            Ok(UserUpdate::Insert) => self.aux = format!("加入：{}", phrase),
            Ok(UserUpdate::Modify) => self.aux = format!("已有：{}", phrase),
            Err(error) => {
                warn!(%error, "unable to add user phrase");
                self.flags = self.flags | KeystrokeFlags::BELL;
                return;
            }
        }
        // the new phrase overrides old boundaries within its span
        for pos in phone_start + 1..phone_start + len {
            if pos < self.breaks.len() {
                self.breaks[pos] = false;
            }
        }
    }

    /// Feeds every phrase of the committed segmentation back into the
    /// user store.
    fn auto_learn(&mut self) {
        let now = self.estimate.now();
        let syllables = self.syllables();
        for interval in &self.intervals {
            if interval.len() < 2 {
                continue;
            }
            if interval.phrase.chars().count() != interval.len() {
                // placeholder text, not a real reading
                continue;
            }
            let span = &syllables[interval.start..interval.end];
            if let Err(error) = self
                .user_dict
                .borrow_mut()
                .upsert(span, &interval.phrase, now)
            {
                warn!(%error, phrase = %interval.phrase, "auto learn failed");
            }
        }
    }

    // === candidate control API ===

    pub fn cand_open(&mut self) -> EditorOutput {
        self.handle_down()
    }

    pub fn cand_close(&mut self) -> EditorOutput {
        self.begin_key();
        self.close_candidates(true);
        self.flags = KeystrokeFlags::ABSORB;
        self.make_output()
    }

    pub fn cand_list_first(&mut self) -> bool {
        if let Some(selector) = self.candidates.as_mut() {
            if selector.source == CandidateSource::Phrase && !selector.avail.is_empty() {
                selector.current_avail = selector.avail.len() - 1;
                selector.page = 0;
                let (start, end) = selector.avail[selector.current_avail];
                let choices = self.choices_for_span(start, end);
                if let Some(selector) = self.candidates.as_mut() {
                    selector.choices = choices;
                }
                return true;
            }
        }
        false
    }

    pub fn cand_list_last(&mut self) -> bool {
        if let Some(selector) = self.candidates.as_mut() {
            if selector.source == CandidateSource::Phrase && !selector.avail.is_empty() {
                selector.current_avail = 0;
                selector.page = 0;
                let (start, end) = selector.avail[selector.current_avail];
                let choices = self.choices_for_span(start, end);
                if let Some(selector) = self.candidates.as_mut() {
                    selector.choices = choices;
                }
                return true;
            }
        }
        false
    }

    pub fn cand_list_has_next(&self) -> bool {
        self.candidates
            .as_ref()
            .map(|s| s.source == CandidateSource::Phrase && s.current_avail > 0)
            .unwrap_or(false)
    }

    pub fn cand_list_has_prev(&self) -> bool {
        self.candidates
            .as_ref()
            .map(|s| {
                s.source == CandidateSource::Phrase
                    && !s.avail.is_empty()
                    && s.current_avail < s.avail.len() - 1
            })
            .unwrap_or(false)
    }

    /// Moves to the next (shorter) phrase length, wrapping around.
    pub fn cand_list_next(&mut self) -> bool {
        if self.candidates.is_some() {
            self.cycle_candidate_length();
            true
        } else {
            false
        }
    }

    pub fn cand_list_prev(&mut self) -> bool {
        if let Some(selector) = self.candidates.as_mut() {
            if selector.source != CandidateSource::Phrase || selector.avail.is_empty() {
                return false;
            }
            selector.current_avail = (selector.current_avail + 1) % selector.avail.len();
            selector.page = 0;
            let (start, end) = selector.avail[selector.current_avail];
            let choices = self.choices_for_span(start, end);
            if let Some(selector) = self.candidates.as_mut() {
                selector.choices = choices;
            }
            true
        } else {
            false
        }
    }

    pub fn cand_choose_by_index(&mut self, index: usize) -> EditorOutput {
        self.begin_key();
        self.select_candidate(index);
        self.make_output()
    }

    pub fn cand_total_choices(&self) -> usize {
        self.candidates
            .as_ref()
            .map(|s| s.choices.len())
            .unwrap_or(0)
    }

    // === inspection ===

    pub fn preedit(&self) -> String {
        self.preedit_string()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn commit_string(&self) -> &str {
        &self.commit_buffer
    }

    pub fn aux_string(&self) -> &str {
        &self.aux
    }

    /// The half-typed syllable, or the pending pinyin letters.
    pub fn bopomofo_display(&self) -> String {
        self.syllable_editor
            .key_seq()
            .unwrap_or_else(|| self.syllable_editor.observe().to_string())
    }

    pub fn intervals(&self) -> Vec<Interval> {
        self.display_intervals()
    }

    pub fn output(&self) -> EditorOutput {
        self.make_output()
    }

    // === user phrase management ===

    pub fn user_phrases(&self) -> Option<UserPhraseCursor> {
        match self.user_dict.borrow().enumerate_all() {
            Ok(cursor) => Some(cursor),
            Err(error) => {
                warn!(%error, "unable to enumerate user phrases");
                None
            }
        }
    }

    pub fn add_user_phrase(
        &mut self,
        phrase: &str,
        bopomofo: &str,
    ) -> Result<UserUpdate, UserPhraseError> {
        let syllables = parse_syllables(bopomofo)?;
        let now = self.estimate.now();
        Ok(self.user_dict.borrow_mut().upsert(&syllables, phrase, now)?)
    }

    pub fn remove_user_phrase(
        &mut self,
        phrase: &str,
        bopomofo: &str,
    ) -> Result<bool, UserPhraseError> {
        let syllables = parse_syllables(bopomofo)?;
        Ok(self
            .user_dict
            .borrow_mut()
            .remove_phrase(&syllables, phrase)?)
    }

    pub fn has_user_phrase(&self, phrase: &str, bopomofo: &str) -> bool {
        match parse_syllables(bopomofo) {
            Ok(syllables) => self
                .user_dict
                .borrow()
                .lookup_exact(&syllables, phrase)
                .unwrap_or(false),
            Err(_) => false,
        }
    }
}

impl Drop for Editor {
    fn drop(&mut self) {
        self.close();
    }
}

#[derive(Debug, Error)]
pub enum UserPhraseError {
    #[error("invalid bopomofo string")]
    Syllables(#[from] DecodeSyllableError),
    #[error("user store error")]
    Store(#[from] SqliteDictionaryError),
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::rc::Rc;

    use crate::dictionary::{Dictionary, Phrase, SqliteDictionary};
    use crate::syl;
    use crate::zhuyin::Bopomofo::*;
    use crate::zhuyin::Syllable;

    use super::{
        AddPhraseDirection, Editor, EditorOptions, KeyboardLayoutCompat, KeystrokeFlags,
    };

    // ㄋㄧˇ ㄕˋ ㄉㄜ˙ plus a handful of phrases; this is the reference
    // dictionary the end-to-end scenarios run against
    fn test_sys_dict() -> Rc<RefCell<dyn Dictionary>> {
        let dict: HashMap<Vec<Syllable>, Vec<Phrase>> = HashMap::from([
            (
                vec![syl![N, I, TONE3]],
                vec![("你", 100).into(), ("妳", 80).into()],
            ),
            (
                vec![syl![SH, TONE4]],
                vec![("是", 500).into(), ("事", 300).into()],
            ),
            (vec![syl![H, AU, TONE3]], vec![("好", 400).into()]),
            (
                vec![syl![N, I, TONE3], syl![SH, TONE4]],
                vec![("你是", 900).into()],
            ),
            (
                vec![syl![N, I, TONE3], syl![H, AU, TONE3]],
                vec![("你好", 800).into()],
            ),
            (
                vec![syl![ZH, ANG]],
                vec![("張", 60).into(), ("章", 40).into()],
            ),
            (vec![syl![D, E, TONE5]], vec![("的", 1000).into()]),
            (
                vec![syl![SH, TONE4], syl![D, E, TONE5]],
                vec![("是的", 700).into()],
            ),
            (vec![syl![ZH, TONE3]], vec![("指", 30).into()]),
        ]);
        Rc::new(RefCell::new(dict))
    }

    fn editor() -> Editor {
        let user = Rc::new(RefCell::new(SqliteDictionary::open_in_memory().unwrap()));
        Editor::new(test_sys_dict(), user)
    }

    fn type_keys(editor: &mut Editor, keys: &str) {
        for c in keys.chars() {
            editor.handle_default(c);
        }
    }

    #[test]
    fn type_one_syllable_then_enter_commits() {
        let mut editor = editor();
        // standard layout: s=ㄋ u=ㄧ 3=ˇ
        type_keys(&mut editor, "su3");
        assert_eq!("你", editor.preedit());
        let output = editor.handle_enter();
        assert!(output.flags.contains(KeystrokeFlags::COMMIT));
        assert_eq!("你", output.commit);
        assert_eq!("", editor.preedit());
    }

    #[test]
    fn ambiguous_pair_commits_the_best_phrase_and_learns_it() {
        let mut editor = editor();
        // ㄋㄧˇ then ㄕˋ
        type_keys(&mut editor, "su3g4");
        assert_eq!("你是", editor.preedit());
        let output = editor.handle_enter();
        assert_eq!("你是", output.commit);
        // auto-learn upserted the two-character phrase
        assert!(editor.has_user_phrase("你是", "ㄋㄧˇ ㄕˋ"));
    }

    #[test]
    fn hsu_lone_j_commits_zh() {
        let mut editor = editor();
        editor.set_layout(KeyboardLayoutCompat::Hsu);
        type_keys(&mut editor, "jf");
        // lone ㄐ rewrites to ㄓ, the end key adds the third tone
        assert_eq!("指", editor.preedit());
    }

    #[test]
    fn dachen_cp26_q_toggles_initial() {
        let mut editor = editor();
        editor.set_layout(KeyboardLayoutCompat::DachenCp26);
        let first = editor.handle_default('q');
        assert!(first.flags.contains(KeystrokeFlags::ABSORB));
        assert_eq!("ㄅ", editor.bopomofo_display());
        let second = editor.handle_default('q');
        assert!(second.flags.contains(KeystrokeFlags::ABSORB));
        assert_eq!("ㄆ", editor.bopomofo_display());
    }

    #[test]
    fn hanyu_pinyin_zhang_commits() {
        let mut editor = editor();
        editor.set_layout(KeyboardLayoutCompat::HanyuPinyin);
        type_keys(&mut editor, "zhang1");
        assert_eq!("張", editor.preedit());
        let output = editor.handle_enter();
        assert_eq!("張", output.commit);
    }

    #[test]
    fn ctrl_num_adds_the_preceding_phones_as_a_phrase() {
        let mut editor = editor();
        // 你是的 = three syllables
        type_keys(&mut editor, "su3g42k7");
        assert_eq!(3, editor.preedit().chars().count());
        let output = editor.handle_ctrl_num(3);
        assert!(!output.aux.is_empty());
        let preedit = editor.preedit();
        assert!(editor.has_user_phrase(&preedit, "ㄋㄧˇ ㄕˋ ㄉㄜ˙"));
    }

    #[test]
    fn backspace_pops_the_syllable_buffer_first() {
        let mut editor = editor();
        type_keys(&mut editor, "su");
        assert_eq!("ㄋㄧ", editor.bopomofo_display());
        editor.handle_backspace();
        assert_eq!("ㄋ", editor.bopomofo_display());
        editor.handle_backspace();
        assert_eq!("", editor.bopomofo_display());
    }

    #[test]
    fn backspace_then_deletes_preedit_items() {
        let mut editor = editor();
        type_keys(&mut editor, "su3g4");
        assert_eq!(2, editor.preedit().chars().count());
        editor.handle_backspace();
        assert_eq!(1, editor.preedit().chars().count());
    }

    #[test]
    fn unknown_reading_bells_and_clears() {
        let mut editor = editor();
        // ㄅˇ has no reading in the test dictionary
        let _ = editor.handle_default('1');
        let output = editor.handle_default('3');
        assert!(output.flags.contains(KeystrokeFlags::BELL));
        assert_eq!("", editor.bopomofo_display());
        assert_eq!("", editor.preedit());
    }

    #[test]
    fn symbol_quick_commit_on_empty_buffer() {
        let mut editor = editor();
        // '=' is not a phonetic key under the standard layout
        let output = editor.handle_default('=');
        assert!(output.flags.contains(KeystrokeFlags::COMMIT));
        assert_eq!("=", output.commit);
        assert_eq!("", editor.preedit());
    }

    #[test]
    fn full_shape_symbols() {
        let mut editor = editor();
        editor.handle_shift_space();
        assert!(editor.full_shape());
        type_keys(&mut editor, "su3");
        let output = editor.handle_default('!');
        assert_eq!("你！", output.preedit);
    }

    #[test]
    fn capslock_switches_to_english_mode() {
        let mut editor = editor();
        type_keys(&mut editor, "su");
        editor.handle_capslock();
        assert!(!editor.chinese_mode());
        assert_eq!("", editor.bopomofo_display());
        let output = editor.handle_default('a');
        assert_eq!("a", output.commit);
    }

    #[test]
    fn candidates_open_with_the_longest_phrase_first() {
        let mut editor = editor();
        type_keys(&mut editor, "su3g4");
        editor.handle_home();
        let output = editor.handle_down();
        let page = output.candidates.expect("candidate window");
        assert_eq!(vec!["你是".to_string()], page.candidates);
        // cycling moves to the single character list
        editor.cand_list_next();
        let page = editor.output().candidates.expect("candidate window");
        assert_eq!(vec!["你".to_string(), "妳".to_string()], page.candidates);
    }

    #[test]
    fn selecting_a_candidate_pins_it() {
        let mut editor = editor();
        type_keys(&mut editor, "su3");
        editor.handle_home();
        editor.handle_down();
        editor.cand_list_next();
        let page = editor.output().candidates.unwrap();
        let index = page
            .candidates
            .iter()
            .position(|c| c == "妳")
            .expect("妳 in candidates");
        editor.cand_choose_by_index(index);
        assert_eq!("妳", editor.preedit());
        let output = editor.handle_enter();
        assert_eq!("妳", output.commit);
    }

    #[test]
    fn candidate_digit_selection_uses_selection_keys() {
        let mut editor = editor();
        type_keys(&mut editor, "su3");
        editor.handle_home();
        editor.handle_down();
        editor.cand_list_next();
        editor.handle_default('2');
        assert_eq!("妳", editor.preedit());
    }

    #[test]
    fn esc_closes_the_candidate_window() {
        let mut editor = editor();
        type_keys(&mut editor, "su3");
        editor.handle_down();
        assert!(editor.output().candidates.is_some());
        editor.handle_esc();
        assert!(editor.output().candidates.is_none());
    }

    #[test]
    fn tab_toggles_a_break_point_inside_a_phrase() {
        let mut editor = editor();
        type_keys(&mut editor, "su3g4");
        assert_eq!(1, editor.intervals().len());
        editor.handle_left();
        editor.handle_tab();
        // the phrase is now split at the cursor
        assert_eq!(2, editor.intervals().len());
        editor.handle_dbl_tab();
        assert_eq!(1, editor.intervals().len());
    }

    #[test]
    fn tab_at_end_cycles_the_segmentation() {
        let mut editor = editor();
        type_keys(&mut editor, "su3g4");
        let before = editor.intervals();
        editor.handle_tab();
        let after = editor.intervals();
        assert_ne!(before, after);
    }

    #[test]
    fn symbol_table_inserts_full_width_punctuation() {
        let mut editor = editor();
        type_keys(&mut editor, "su3");
        editor.handle_default('`');
        let output = editor.output();
        assert!(output.candidates.is_some());
        editor.cand_choose_by_index(0);
        assert_eq!("你，", editor.preedit());
    }

    #[test]
    fn symbols_break_phrases_apart() {
        let mut editor = editor();
        type_keys(&mut editor, "su3");
        editor.handle_default('`');
        editor.cand_choose_by_index(0);
        type_keys(&mut editor, "g4");
        // 你，是 cannot form the 你是 phrase across the symbol
        assert_eq!("你，是", editor.preedit());
        assert!(editor
            .intervals()
            .iter()
            .all(|interval| interval.end - interval.start == 1));
    }

    #[test]
    fn manual_range_enter_learns_the_phrase() {
        let mut editor = editor();
        type_keys(&mut editor, "su3g4");
        editor.handle_shift_left();
        editor.handle_shift_left();
        let output = editor.handle_enter();
        assert!(!output.flags.contains(KeystrokeFlags::COMMIT));
        assert!(editor.has_user_phrase("你是", "ㄋㄧˇ ㄕˋ"));
    }

    #[test]
    fn buffer_full_rejects_with_bell() {
        let mut editor = editor();
        let options = EditorOptions {
            max_preedit_len: 2,
            ..Default::default()
        };
        editor.set_options(options);
        type_keys(&mut editor, "su3g4");
        editor.handle_default('c');
        editor.handle_default('l');
        let output = editor.handle_default('3');
        assert!(output.flags.contains(KeystrokeFlags::BELL));
        assert_eq!(2, editor.preedit().chars().count());
    }

    #[test]
    fn reset_is_idempotent() {
        let mut editor = editor();
        type_keys(&mut editor, "su3g4");
        editor.reset();
        let first = editor.output();
        editor.reset();
        let second = editor.output();
        assert_eq!(first.preedit, second.preedit);
        assert_eq!(first.cursor, second.cursor);
        assert!(first.preedit.is_empty());
    }

    #[test]
    fn identical_key_sequences_yield_identical_snapshots() {
        let run = || {
            let mut editor = editor();
            type_keys(&mut editor, "su3g42k7");
            let output = editor.handle_enter();
            (output.commit, output.cursor)
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn backward_direction_takes_following_phones() {
        let mut editor = editor();
        let options = EditorOptions {
            add_phrase_direction: AddPhraseDirection::Backward,
            ..Default::default()
        };
        editor.set_options(options);
        type_keys(&mut editor, "su3g4");
        editor.handle_home();
        editor.handle_ctrl_num(2);
        assert!(editor.has_user_phrase("你是", "ㄋㄧˇ ㄕˋ"));
    }

    #[test]
    fn selection_keys_can_be_customized() {
        let mut editor = editor();
        let options = EditorOptions {
            selection_keys: b"asdfghjkl;".to_vec(),
            ..Default::default()
        };
        editor.set_options(options);
        type_keys(&mut editor, "su3");
        editor.handle_down();
        editor.cand_list_next();
        editor.handle_default('s');
        assert_eq!("妳", editor.preedit());
    }

    #[test]
    fn alt_phone_from_pinyin_is_stored() {
        let mut editor = editor();
        editor.set_layout(KeyboardLayoutCompat::HanyuPinyin);
        type_keys(&mut editor, "shi4");
        // primary reading ㄕˋ resolves against the dictionary
        assert_eq!("是", editor.preedit());
        let entry = editor.entries.first().cloned();
        match entry {
            Some(super::PreeditEntry::Chinese { phone, phone_alt, .. }) => {
                assert_eq!(phone, syl![SH, TONE4]);
                assert_eq!(phone_alt, syl![X, I, TONE4]);
            }
            other => panic!("expected a Chinese entry, got {other:?}"),
        }
    }

    #[test]
    fn user_phrase_management_roundtrip() {
        let mut editor = editor();
        editor.add_user_phrase("你好", "ㄋㄧˇ ㄏㄠˇ").unwrap();
        assert!(editor.has_user_phrase("你好", "ㄋㄧˇ ㄏㄠˇ"));
        let all: Vec<_> = editor.user_phrases().unwrap().collect();
        assert_eq!(1, all.len());
        assert!(editor.remove_user_phrase("你好", "ㄋㄧˇ ㄏㄠˇ").unwrap());
        assert!(!editor.remove_user_phrase("你好", "ㄋㄧˇ ㄏㄠˇ").unwrap());
    }

    #[test]
    fn learned_phrases_win_later_conversions() {
        let mut editor = editor();
        type_keys(&mut editor, "su3");
        editor.handle_home();
        editor.handle_down();
        editor.cand_list_next();
        let page = editor.output().candidates.unwrap();
        let index = page.candidates.iter().position(|c| c == "妳").unwrap();
        editor.cand_choose_by_index(index);
        editor.handle_enter();
        // learning happened only for multi-character phrases, but the
        // pinned single still committed
        assert_eq!("", editor.preedit());
    }

    #[test]
    fn open_from_disk_dictionaries() {
        use crate::dictionary::TreeDictionaryBuilder;

        let dir = tempfile::tempdir().unwrap();
        let mut builder = TreeDictionaryBuilder::new();
        builder.insert(&[syl![N, I, TONE3]], "你", 100).unwrap();
        builder.write_to_dir(dir.path()).unwrap();

        let mut editor =
            Editor::open(dir.path(), dir.path().join("user.sqlite3")).unwrap();
        type_keys(&mut editor, "su3");
        assert_eq!("你", editor.preedit());
        let output = editor.handle_enter();
        assert_eq!("你", output.commit);
    }

    #[test]
    fn shared_dictionary_handles_are_deduplicated() {
        use crate::dictionary::{TreeDictionary, TreeDictionaryBuilder};

        let dir = tempfile::tempdir().unwrap();
        let mut builder = TreeDictionaryBuilder::new();
        builder.insert(&[syl![N, I, TONE3]], "你", 100).unwrap();
        builder.write_to_dir(dir.path()).unwrap();

        let first = TreeDictionary::open_shared(dir.path()).unwrap();
        let second = TreeDictionary::open_shared(dir.path()).unwrap();
        assert!(Rc::ptr_eq(&first, &second));
    }

    #[test]
    fn snapshot_invariants_hold() {
        let mut editor = editor();
        type_keys(&mut editor, "su3g42k7");
        let output = editor.output();
        let len = output.preedit.chars().count();
        assert_eq!(3, len);
        assert!(output.cursor <= len);
        assert_eq!(len + 1, output.breaks.len());
        let mut covered = vec![false; len];
        for interval in &output.intervals {
            for slot in &mut covered[interval.start..interval.end] {
                assert!(!*slot, "intervals must not overlap");
                *slot = true;
            }
        }
        assert!(covered.iter().all(|&c| c));
    }
}
