use std::cell::RefCell;
use std::cmp::Ordering;
use std::rc::Rc;

use crate::dictionary::{Dictionary, Phrase};
use crate::zhuyin::Syllable;

use super::{Break, ChineseSequence, Connect, ConversionEngine, Interval};

/// The longest phrase the segmenter considers, in syllables.
const MAX_PHRASE_LEN: usize = 11;

/// Makes a longer phrase beat any concatenation of shorter phrases that
/// has the same raw frequency sum.
const LENGTH_BONUS: i64 = 1000;

/// Single syllable words count much less than phrases.
const SINGLE_REDUCTION: i64 = 512;

/// Alternative covers kept per position when cycling segmentations.
const MAX_ALTERNATIVES: usize = 64;

/// The standard conversion engine.
///
/// Enumerates candidate intervals over the dictionary, honoring break
/// points, connect hints and pinned selections, then runs a best-path
/// search over positions with the deterministic tie-break chain.
pub struct ChewingConversionEngine {
    dict: Rc<RefCell<dyn Dictionary>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PossibleInterval {
    start: usize,
    end: usize,
    phrase: Phrase,
}

impl PossibleInterval {
    fn len(&self) -> usize {
        self.end - self.start
    }
    fn score(&self) -> i64 {
        let freq = i64::from(self.phrase.freq());
        let base = if self.len() == 1 {
            freq / SINGLE_REDUCTION
        } else {
            freq
        };
        base + LENGTH_BONUS * (self.len() as i64 - 1)
    }
}

#[derive(Debug, Clone, Default)]
struct PathRecord {
    intervals: Vec<usize>,
    score: i64,
    connects_crossed: usize,
    user_freq_sum: u64,
}

impl ChewingConversionEngine {
    pub fn new(dict: Rc<RefCell<dyn Dictionary>>) -> ChewingConversionEngine {
        ChewingConversionEngine { dict }
    }

    fn find_best_phrase(
        &self,
        offset: usize,
        syllables: &[Syllable],
        selections: &[Interval],
        breaks: &[Break],
    ) -> Option<Phrase> {
        let start = offset;
        let end = offset + syllables.len();

        for br in breaks.iter() {
            if br.0 > start && br.0 < end {
                // a break point forbids connecting these syllables
                return None;
            }
        }

        let mut best_phrase: Option<Phrase> = None;
        'next_phrase: for phrase in self.dict.borrow().lookup_phrase(syllables) {
            // If a user selection is a sub-interval of this phrase but the
            // substring differs, the phrase cannot be used.
            for selection in selections.iter() {
                if start <= selection.start && end >= selection.end {
                    let offset = selection.start - start;
                    let len = selection.end - selection.start;
                    let substring: String =
                        phrase.as_str().chars().skip(offset).take(len).collect();
                    if substring != selection.phrase {
                        continue 'next_phrase;
                    }
                }
            }

            let better = match &best_phrase {
                None => true,
                Some(best) => match (phrase.is_user_phrase(), best.is_user_phrase()) {
                    (true, false) => true,
                    (false, true) => false,
                    _ => match phrase.freq().cmp(&best.freq()) {
                        Ordering::Greater => true,
                        Ordering::Less => false,
                        Ordering::Equal => phrase.as_str() < best.as_str(),
                    },
                },
            };
            if better {
                best_phrase = Some(phrase);
            }
        }

        best_phrase
    }

    fn overlaps_selection_boundary(interval: (usize, usize), selections: &[Interval]) -> bool {
        let (start, end) = interval;
        selections.iter().any(|sel| {
            let disjoint = end <= sel.start || start >= sel.end;
            let contains = start <= sel.start && end >= sel.end;
            let equals = start == sel.start && end == sel.end;
            !disjoint && !contains && !equals
        })
    }

    fn find_intervals(&self, seq: &ChineseSequence) -> Vec<PossibleInterval> {
        let len = seq.syllables.len();
        let mut intervals = vec![];
        for begin in 0..len {
            for end in (begin + 1)..=len.min(begin + MAX_PHRASE_LEN) {
                if Self::overlaps_selection_boundary((begin, end), &seq.selections) {
                    continue;
                }
                if let Some(phrase) = self.find_best_phrase(
                    begin,
                    &seq.syllables[begin..end],
                    &seq.selections,
                    &seq.breaks,
                ) {
                    intervals.push(PossibleInterval {
                        start: begin,
                        end,
                        phrase,
                    });
                }
            }
        }
        // a pinned selection is always a usable edge, even when its phrase
        // vanished from the dictionaries
        for sel in &seq.selections {
            if !intervals
                .iter()
                .any(|it| it.start == sel.start && it.end == sel.end)
            {
                intervals.push(PossibleInterval {
                    start: sel.start,
                    end: sel.end,
                    phrase: Phrase::new(sel.phrase.clone(), 0),
                });
            }
        }
        // every position needs at least a syllable-shaped placeholder so
        // a full cover always exists
        for pos in 0..len {
            if !intervals.iter().any(|it| (it.start, it.end) == (pos, pos + 1)) {
                let covered_by_selection = seq
                    .selections
                    .iter()
                    .any(|sel| sel.start <= pos && pos < sel.end);
                if !covered_by_selection {
                    intervals.push(PossibleInterval {
                        start: pos,
                        end: pos + 1,
                        phrase: Phrase::new(seq.syllables[pos].to_string(), 0),
                    });
                }
            }
        }
        intervals
    }

    fn connects_inside(start: usize, end: usize, connects: &[Connect]) -> usize {
        connects
            .iter()
            .filter(|c| c.0 > start && c.0 < end)
            .count()
    }

    fn user_freq_of(phrase: &Phrase) -> u64 {
        if phrase.is_user_phrase() {
            u64::from(phrase.freq())
        } else {
            0
        }
    }

    /// The deterministic preference order between two full covers.
    fn better(a: &PathRecord, b: &PathRecord, intervals: &[PossibleInterval]) -> bool {
        if a.score != b.score {
            return a.score > b.score;
        }
        if a.connects_crossed != b.connects_crossed {
            return a.connects_crossed > b.connects_crossed;
        }
        let leftmost = |record: &PathRecord| {
            record
                .intervals
                .first()
                .map(|&i| intervals[i].len())
                .unwrap_or(0)
        };
        let (left_a, left_b) = (leftmost(a), leftmost(b));
        if left_a != left_b {
            return left_a > left_b;
        }
        if a.user_freq_sum != b.user_freq_sum {
            return a.user_freq_sum > b.user_freq_sum;
        }
        let phrase_of = |record: &PathRecord| {
            record
                .intervals
                .iter()
                .map(|&i| intervals[i].phrase.as_str())
                .collect::<String>()
        };
        phrase_of(a) < phrase_of(b)
    }

    /// Keeps the `MAX_ALTERNATIVES` best covers per position.
    fn best_paths(&self, seq: &ChineseSequence, intervals: &[PossibleInterval]) -> Vec<PathRecord> {
        let len = seq.syllables.len();
        let mut table: Vec<Vec<PathRecord>> = vec![vec![]; len + 1];
        table[0].push(PathRecord::default());

        for pos in 1..=len {
            let mut records: Vec<PathRecord> = vec![];
            for (index, interval) in intervals
                .iter()
                .enumerate()
                .filter(|(_, it)| it.end == pos)
            {
                for prefix in &table[interval.start] {
                    let mut record = prefix.clone();
                    record.intervals.push(index);
                    record.score += interval.score();
                    record.connects_crossed +=
                        Self::connects_inside(interval.start, interval.end, &seq.connects);
                    record.user_freq_sum += Self::user_freq_of(&interval.phrase);
                    records.push(record);
                }
            }
            records.sort_by(|a, b| {
                if Self::better(a, b, intervals) {
                    Ordering::Less
                } else if Self::better(b, a, intervals) {
                    Ordering::Greater
                } else {
                    Ordering::Equal
                }
            });
            records.dedup_by(|a, b| a.intervals == b.intervals);
            records.truncate(MAX_ALTERNATIVES);
            table[pos] = records;
        }

        table.pop().unwrap_or_default()
    }

    fn to_intervals(record: &PathRecord, intervals: &[PossibleInterval]) -> Vec<Interval> {
        record
            .intervals
            .iter()
            .map(|&i| Interval {
                start: intervals[i].start,
                end: intervals[i].end,
                phrase: intervals[i].phrase.as_str().to_string(),
            })
            .collect()
    }
}

impl ConversionEngine for ChewingConversionEngine {
    fn convert(&self, sequence: &ChineseSequence) -> Vec<Interval> {
        self.convert_next(sequence, 0)
    }

    fn convert_next(&self, sequence: &ChineseSequence, next: usize) -> Vec<Interval> {
        if sequence.syllables.is_empty() {
            return vec![];
        }
        let intervals = self.find_intervals(sequence);
        let paths = self.best_paths(sequence, &intervals);
        if paths.is_empty() {
            return vec![];
        }
        let record = &paths[next % paths.len()];
        Self::to_intervals(record, &intervals)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::rc::Rc;

    use crate::conversion::{
        Break, ChineseSequence, Connect, ConversionEngine, Interval,
    };
    use crate::dictionary::{Dictionary, Phrase};
    use crate::syl;
    use crate::zhuyin::Bopomofo::*;

    use super::ChewingConversionEngine;

    fn test_dictionary() -> Rc<RefCell<dyn Dictionary>> {
        let dict: HashMap<Vec<crate::zhuyin::Syllable>, Vec<Phrase>> = HashMap::from([
            (vec![syl![G, U, O, TONE2]], vec![("國", 1).into()]),
            (vec![syl![M, I, EN, TONE2]], vec![("民", 1).into()]),
            (vec![syl![D, A, TONE4]], vec![("大", 1).into()]),
            (vec![syl![H, U, EI, TONE4]], vec![("會", 1).into()]),
            (vec![syl![D, AI, TONE4]], vec![("代", 1).into()]),
            (vec![syl![B, I, AU, TONE3]], vec![("表", 1).into()]),
            (
                vec![syl![G, U, O, TONE2], syl![M, I, EN, TONE2]],
                vec![("國民", 200).into()],
            ),
            (
                vec![syl![D, A, TONE4], syl![H, U, EI, TONE4]],
                vec![("大會", 200).into()],
            ),
            (
                vec![syl![D, AI, TONE4], syl![B, I, AU, TONE3]],
                vec![("代表", 200).into(), ("戴錶", 100).into()],
            ),
            (vec![syl![X, I, EN]], vec![("心", 1).into()]),
            (
                vec![syl![K, U, TONE4], syl![I, EN]],
                vec![("庫音", 300).into()],
            ),
            (
                vec![syl![X, I, EN], syl![K, U, TONE4], syl![I, EN]],
                vec![("新酷音", 200).into()],
            ),
        ]);
        Rc::new(RefCell::new(dict))
    }

    fn sequence(syllables: Vec<crate::zhuyin::Syllable>) -> ChineseSequence {
        ChineseSequence {
            syllables,
            ..Default::default()
        }
    }

    fn guo_min_da_hui_dai_biau() -> Vec<crate::zhuyin::Syllable> {
        vec![
            syl![G, U, O, TONE2],
            syl![M, I, EN, TONE2],
            syl![D, A, TONE4],
            syl![H, U, EI, TONE4],
            syl![D, AI, TONE4],
            syl![B, I, AU, TONE3],
        ]
    }

    fn interval(start: usize, end: usize, phrase: &str) -> Interval {
        Interval {
            start,
            end,
            phrase: phrase.to_string(),
        }
    }

    #[test]
    fn convert_empty_sequence() {
        let engine = ChewingConversionEngine::new(test_dictionary());
        assert_eq!(
            Vec::<Interval>::new(),
            engine.convert(&sequence(vec![]))
        );
    }

    #[test]
    fn convert_simple_chinese_sequence() {
        let engine = ChewingConversionEngine::new(test_dictionary());
        assert_eq!(
            vec![
                interval(0, 2, "國民"),
                interval(2, 4, "大會"),
                interval(4, 6, "代表"),
            ],
            engine.convert(&sequence(guo_min_da_hui_dai_biau()))
        );
    }

    #[test]
    fn breaks_forbid_phrases_spanning_them() {
        let engine = ChewingConversionEngine::new(test_dictionary());
        let mut seq = sequence(guo_min_da_hui_dai_biau());
        seq.breaks = vec![Break(1), Break(5)];
        assert_eq!(
            vec![
                interval(0, 1, "國"),
                interval(1, 2, "民"),
                interval(2, 4, "大會"),
                interval(4, 5, "代"),
                interval(5, 6, "表"),
            ],
            engine.convert(&seq)
        );
    }

    #[test]
    fn selection_pins_the_phrase() {
        let engine = ChewingConversionEngine::new(test_dictionary());
        let mut seq = sequence(guo_min_da_hui_dai_biau());
        seq.selections = vec![interval(4, 6, "戴錶")];
        assert_eq!(
            vec![
                interval(0, 2, "國民"),
                interval(2, 4, "大會"),
                interval(4, 6, "戴錶"),
            ],
            engine.convert(&seq)
        );
    }

    #[test]
    fn substring_selection_keeps_the_containing_phrase() {
        let engine = ChewingConversionEngine::new(test_dictionary());
        let mut seq = sequence(vec![syl![X, I, EN], syl![K, U, TONE4], syl![I, EN]]);
        seq.selections = vec![interval(1, 3, "酷音")];
        assert_eq!(
            vec![interval(0, 3, "新酷音")],
            engine.convert(&seq)
        );
    }

    #[test]
    fn user_phrase_outranks_the_dictionary() {
        let dict = test_dictionary();
        dict.borrow_mut()
            .as_mut_dict()
            .unwrap()
            .insert(
                &[syl![D, AI, TONE4], syl![B, I, AU, TONE3]],
                Phrase::with_time("帶錶", 3, 42),
            )
            .unwrap();
        let engine = ChewingConversionEngine::new(dict);
        let result = engine.convert(&sequence(guo_min_da_hui_dai_biau()));
        assert_eq!(interval(4, 6, "帶錶"), result[2]);
    }

    #[test]
    fn connect_hint_breaks_score_ties_first() {
        // 甲+乙丙 and 甲乙+丙 tie on score, so the leftmost-length rule
        // would pick 甲乙+丙 unless a connect hint crosses position 2
        let small: HashMap<Vec<crate::zhuyin::Syllable>, Vec<Phrase>> = HashMap::from([
            (vec![syl![B, A]], vec![("甲", 0).into()]),
            (vec![syl![B, O]], vec![("乙", 0).into()]),
            (vec![syl![B, AI]], vec![("丙", 0).into()]),
            (vec![syl![B, A], syl![B, O]], vec![("甲乙", 100).into()]),
            (vec![syl![B, O], syl![B, AI]], vec![("乙丙", 100).into()]),
        ]);
        let dict: Rc<RefCell<dyn Dictionary>> = Rc::new(RefCell::new(small));
        let engine = ChewingConversionEngine::new(dict);
        let mut seq = sequence(vec![syl![B, A], syl![B, O], syl![B, AI]]);
        assert_eq!(
            vec![interval(0, 2, "甲乙"), interval(2, 3, "丙")],
            engine.convert(&seq)
        );
        seq.connects = vec![Connect(2)];
        assert_eq!(
            vec![interval(0, 1, "甲"), interval(1, 3, "乙丙")],
            engine.convert(&seq)
        );
    }

    #[test]
    fn convert_cycles_alternative_covers() {
        let engine = ChewingConversionEngine::new(test_dictionary());
        let seq = sequence(guo_min_da_hui_dai_biau());
        let best = engine.convert_next(&seq, 0);
        let second = engine.convert_next(&seq, 1);
        assert_ne!(best, second);
        // the cycle is deterministic
        assert_eq!(second, engine.convert_next(&seq, 1));
        assert_eq!(best, engine.convert_next(&seq, 0));
    }

    #[test]
    fn unknown_syllable_falls_back_to_its_spelling() {
        let engine = ChewingConversionEngine::new(test_dictionary());
        let seq = sequence(vec![syl![ZH, ANG]]);
        assert_eq!(
            vec![interval(0, 1, "ㄓㄤ")],
            engine.convert(&seq)
        );
    }
}
