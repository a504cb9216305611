//! Dictionaries for looking up phrases.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt::Display;
use std::rc::Rc;

use thiserror::Error;

use crate::zhuyin::Syllable;

pub use sqlite::{SqliteDictionary, SqliteDictionaryError, UserPhraseCursor, UserUpdate};
pub use tree::{TreeDictionary, TreeDictionaryBuilder, TreeDictionaryError};

mod sqlite;
mod tree;

/// The error type which is returned from updating a dictionary.
#[derive(Error, Debug)]
#[error("update dictionary failed")]
pub struct DictionaryUpdateError {
    #[from]
    pub source: Box<dyn std::error::Error + Send + Sync>,
}

/// The error type which is returned from building or updating a dictionary.
#[derive(Error, Debug)]
#[error("found duplicated phrases")]
pub struct DuplicatePhraseError;

/// A collection of metadata of a dictionary.
///
/// The dictionary version and copyright information can be used in
/// configuration applications.
#[derive(Clone, Debug, Default)]
pub struct DictionaryInfo {
    /// The name of the dictionary.
    pub name: Option<String>,
    /// The copyright information of the dictionary.
    pub copyright: Option<String>,
    /// The license information of the dictionary.
    pub license: Option<String>,
    /// The version of the dictionary.
    pub version: Option<String>,
    /// The name of the software used to generate the dictionary.
    pub software: Option<String>,
}

/// A phrase and its usage statistics.
///
/// System dictionary rows carry only a frequency. Rows from the user store
/// also record when they were last used, measured by the lifetime clock;
/// that field doubles as the provenance marker between the two.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Phrase {
    phrase: String,
    freq: u32,
    last_used: Option<u64>,
}

impl Phrase {
    pub fn new<S: Into<String>>(phrase: S, freq: u32) -> Phrase {
        Phrase {
            phrase: phrase.into(),
            freq,
            last_used: None,
        }
    }
    pub fn with_time<S: Into<String>>(phrase: S, freq: u32, last_used: u64) -> Phrase {
        Phrase {
            phrase: phrase.into(),
            freq,
            last_used: Some(last_used),
        }
    }
    pub fn as_str(&self) -> &str {
        &self.phrase
    }
    pub fn freq(&self) -> u32 {
        self.freq
    }
    pub fn last_used(&self) -> Option<u64> {
        self.last_used
    }
    /// Whether the row came from the user store.
    pub fn is_user_phrase(&self) -> bool {
        self.last_used.is_some()
    }
}

impl From<(&str, u32)> for Phrase {
    fn from(value: (&str, u32)) -> Phrase {
        Phrase::new(value.0, value.1)
    }
}

impl From<(String, u32)> for Phrase {
    fn from(value: (String, u32)) -> Phrase {
        Phrase::new(value.0, value.1)
    }
}

impl Display for Phrase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A generic iterator over the phrases matched in a dictionary.
pub type Phrases<'a> = Box<dyn Iterator<Item = Phrase> + 'a>;

/// A generic iterator over every entry of a dictionary.
pub type DictEntries<'a> = Box<dyn Iterator<Item = (Vec<Syllable>, Phrase)> + 'a>;

/// An interface for looking up dictionaries.
///
/// # Examples
///
/// The std [`HashMap`] implements the `Dictionary` trait so it can be used
/// in tests.
///
/// ```
/// use std::collections::HashMap;
///
/// use zhuin::{dictionary::{Dictionary, Phrase}, syl, zhuyin::{Bopomofo, Syllable}};
///
/// let dict: HashMap<Vec<Syllable>, Vec<Phrase>> = HashMap::from([
///     (
///         vec![syl![Bopomofo::C, Bopomofo::E, Bopomofo::TONE4]],
///         vec![("測", 100).into()],
///     ),
/// ]);
///
/// for phrase in dict.lookup_word(syl![Bopomofo::C, Bopomofo::E, Bopomofo::TONE4]) {
///     assert_eq!("測", phrase.as_str());
///     assert_eq!(100, phrase.freq());
/// }
/// ```
pub trait Dictionary {
    /// Returns an iterator to all phrases matched by the syllables, if any.
    fn lookup_phrase(&self, syllables: &[Syllable]) -> Phrases;
    /// Returns an iterator to all single syllable words matched by the
    /// syllable, if any.
    fn lookup_word(&self, syllable: Syllable) -> Phrases {
        self.lookup_phrase(&[syllable])
    }
    /// Returns an iterator over all entries of the dictionary.
    fn entries(&self) -> DictEntries;
    /// Returns information about the dictionary instance.
    fn about(&self) -> DictionaryInfo;
    /// Returns a mutable reference to the dictionary if the underlying
    /// implementation allows updates.
    fn as_mut_dict(&mut self) -> Option<&mut dyn DictionaryMut>;
}

/// An interface for updating dictionaries.
pub trait DictionaryMut {
    fn insert(&mut self, syllables: &[Syllable], phrase: Phrase)
        -> Result<(), DictionaryUpdateError>;
    fn remove(&mut self, syllables: &[Syllable], phrase_str: &str)
        -> Result<(), DictionaryUpdateError>;
}

impl Dictionary for HashMap<Vec<Syllable>, Vec<Phrase>> {
    fn lookup_phrase(&self, syllables: &[Syllable]) -> Phrases {
        self.get(syllables)
            .cloned()
            .map(|v| Box::new(v.into_iter()) as Phrases)
            .unwrap_or_else(|| Box::new(std::iter::empty()))
    }

    fn entries(&self) -> DictEntries {
        Box::new(
            self.iter()
                .flat_map(|(k, v)| v.iter().map(|phrase| (k.clone(), phrase.clone()))),
        )
    }

    fn about(&self) -> DictionaryInfo {
        Default::default()
    }

    fn as_mut_dict(&mut self) -> Option<&mut dyn DictionaryMut> {
        Some(self)
    }
}

impl DictionaryMut for HashMap<Vec<Syllable>, Vec<Phrase>> {
    fn insert(
        &mut self,
        syllables: &[Syllable],
        phrase: Phrase,
    ) -> Result<(), DictionaryUpdateError> {
        let vec = self.entry(syllables.to_vec()).or_default();
        if vec.iter().any(|it| it.as_str() == phrase.as_str()) {
            return Err(DictionaryUpdateError {
                source: Box::new(DuplicatePhraseError),
            });
        }
        vec.push(phrase);
        Ok(())
    }

    fn remove(
        &mut self,
        syllables: &[Syllable],
        phrase_str: &str,
    ) -> Result<(), DictionaryUpdateError> {
        if let Some(vec) = self.get_mut(syllables) {
            vec.retain(|it| it.as_str() != phrase_str);
        }
        Ok(())
    }
}

/// A collection of dictionaries that returns the union of the lookup
/// results.
///
/// The first layer is the base. Rows from later layers replace base rows
/// carrying the same phrase, so a learned user frequency shadows the
/// system frequency while new user phrases are appended after the system
/// ones.
#[derive(Clone)]
pub struct LayeredDictionary {
    inner: Vec<Rc<RefCell<dyn Dictionary>>>,
}

impl LayeredDictionary {
    pub fn new(dictionaries: Vec<Rc<RefCell<dyn Dictionary>>>) -> LayeredDictionary {
        LayeredDictionary {
            inner: dictionaries,
        }
    }
}

impl Dictionary for LayeredDictionary {
    fn lookup_phrase(&self, syllables: &[Syllable]) -> Phrases {
        let (base, layers) = match self.inner.split_first() {
            Some(d) => d,
            None => return Box::new(std::iter::empty()),
        };
        let mut phrases = base.borrow().lookup_phrase(syllables).collect::<Vec<_>>();
        for d in layers {
            for phrase in d.borrow().lookup_phrase(syllables) {
                match phrases.iter_mut().find(|it| it.as_str() == phrase.as_str()) {
                    Some(ph) => *ph = phrase,
                    None => phrases.push(phrase),
                }
            }
        }
        Box::new(phrases.into_iter())
    }

    fn entries(&self) -> DictEntries {
        let mut entries = vec![];
        for d in &self.inner {
            entries.extend(d.borrow().entries().collect::<Vec<_>>());
        }
        Box::new(entries.into_iter())
    }

    fn about(&self) -> DictionaryInfo {
        DictionaryInfo {
            name: Some("Layered dictionary".to_string()),
            ..Default::default()
        }
    }

    fn as_mut_dict(&mut self) -> Option<&mut dyn DictionaryMut> {
        None
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::rc::Rc;

    use crate::syl;
    use crate::zhuyin::Bopomofo;

    use super::{Dictionary, LayeredDictionary, Phrase};

    #[test]
    fn user_layer_shadows_the_base() {
        let mut sys_dict = HashMap::new();
        let mut user_dict = HashMap::new();
        sys_dict.insert(
            vec![syl![Bopomofo::C, Bopomofo::E, Bopomofo::TONE4]],
            vec![("測", 100).into(), ("冊", 50).into()],
        );
        user_dict.insert(
            vec![syl![Bopomofo::C, Bopomofo::E, Bopomofo::TONE4]],
            vec![
                Phrase::with_time("策", 80, 1),
                Phrase::with_time("冊", 200, 2),
            ],
        );

        let dict = LayeredDictionary::new(vec![
            Rc::new(RefCell::new(sys_dict)),
            Rc::new(RefCell::new(user_dict)),
        ]);
        let phrases = dict
            .lookup_phrase(&[syl![Bopomofo::C, Bopomofo::E, Bopomofo::TONE4]])
            .collect::<Vec<_>>();
        assert_eq!(
            vec![
                Phrase::new("測", 100),
                Phrase::with_time("冊", 200, 2),
                Phrase::with_time("策", 80, 1),
            ],
            phrases
        );
        assert!(phrases[1].is_user_phrase());
        assert!(!phrases[0].is_user_phrase());
    }
}
