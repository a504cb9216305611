//! The persistent user phrase store.
//!
//! User phrases live in a relational file with two tables. `userphrase_v1`
//! keys rows by the padded phone sequence plus the phrase and carries the
//! frequency columns used by the decay law. `config_v1` holds the
//! monotone lifetime counter under id 0.

use std::iter::Peekable;
use std::path::Path;

use binary_layout::prelude::*;
use rusqlite::{params, params_from_iter, Connection};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::editor::estimate::decayed_increment;
use crate::zhuyin::Syllable;

use super::{
    DictEntries, Dictionary, DictionaryInfo, DictionaryMut, DictionaryUpdateError, Phrase, Phrases,
};

/// The longest phrase the store accepts, in syllables.
pub const MAX_PHRASE_LEN: usize = 11;

const CONFIG_ID_LIFETIME: u32 = 0;
const FREQ_INIT_VALUE: u32 = 1;

const LEGACY_HASH_NAME: &str = "uhash.dat";
const LEGACY_HASH_OLD_NAME: &str = "uhash.old";
const LEGACY_HASH_SIGNATURE: &[u8; 4] = b"CBiH";
const LEGACY_FIELD_SIZE: usize = 125;

define_layout!(legacy_hash_header, LittleEndian, {
    signature: [u8; 4],
    lifetime: u32,
});

define_layout!(legacy_hash_record, LittleEndian, {
    user_freq: u32,
    recent_time: u32,
    max_freq: u32,
    orig_freq: u32,
    payload: [u8; 109],
});

#[derive(Debug, Error)]
pub enum SqliteDictionaryError {
    #[error("sqlite error")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error")]
    Io(#[from] std::io::Error),
    #[error("phrase length does not match the phone sequence")]
    PhraseMismatch,
}

/// Whether an upsert created a row or bumped an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserUpdate {
    Insert,
    Modify,
}

/// The SQLite backed user phrase store.
pub struct SqliteDictionary {
    conn: Connection,
}

impl std::fmt::Debug for SqliteDictionary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteDictionary").finish()
    }
}

impl SqliteDictionary {
    /// Opens or creates the user store, migrating legacy data if found
    /// next to it.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<SqliteDictionary, SqliteDictionaryError> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        Self::initialize_tables(&conn)?;
        let mut dict = SqliteDictionary { conn };
        info!(path = %path.display(), "user phrase store opened");
        if let Some(dir) = path.parent() {
            if let Err(error) = dict.migrate_legacy_hash(dir) {
                // migration failure must not invalidate the live store
                warn!(%error, "legacy user phrase migration failed");
            }
        }
        Ok(dict)
    }

    /// Opens a transient in-memory store, mostly useful for tests.
    pub fn open_in_memory() -> Result<SqliteDictionary, SqliteDictionaryError> {
        let conn = Connection::open_in_memory()?;
        Self::initialize_tables(&conn)?;
        Ok(SqliteDictionary { conn })
    }

    fn initialize_tables(conn: &Connection) -> Result<(), SqliteDictionaryError> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS userphrase_v1 (
                time INTEGER,
                orig_freq INTEGER,
                max_freq INTEGER,
                user_freq INTEGER,
                length INTEGER,
                phrase TEXT,
                phone_0 INTEGER,
                phone_1 INTEGER,
                phone_2 INTEGER,
                phone_3 INTEGER,
                phone_4 INTEGER,
                phone_5 INTEGER,
                phone_6 INTEGER,
                phone_7 INTEGER,
                phone_8 INTEGER,
                phone_9 INTEGER,
                phone_10 INTEGER,
                PRIMARY KEY (
                    phone_0, phone_1, phone_2, phone_3, phone_4, phone_5,
                    phone_6, phone_7, phone_8, phone_9, phone_10, phrase
                )
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS config_v1 (
                id INTEGER,
                value INTEGER,
                PRIMARY KEY (id)
            )",
            [],
        )?;
        conn.execute(
            "INSERT OR IGNORE INTO config_v1 (id, value) VALUES (?, 0)",
            [CONFIG_ID_LIFETIME],
        )?;
        Ok(())
    }

    /// Reads the persisted lifetime counter.
    pub fn lifetime(&self) -> Result<u64, SqliteDictionaryError> {
        let value = self.conn.query_row(
            "SELECT value FROM config_v1 WHERE id = ?",
            [CONFIG_ID_LIFETIME],
            |row| row.get::<_, u64>(0),
        )?;
        Ok(value)
    }

    /// Adds the keystrokes counted since open to the persisted lifetime.
    pub fn advance_lifetime(&self, delta: u64) -> Result<(), SqliteDictionaryError> {
        self.conn.execute(
            "UPDATE config_v1 SET value = value + ? WHERE id = ?",
            params![delta, CONFIG_ID_LIFETIME],
        )?;
        Ok(())
    }

    fn padded_phones(syllables: &[Syllable]) -> [u16; MAX_PHRASE_LEN] {
        let mut phones = [0u16; MAX_PHRASE_LEN];
        for (slot, syllable) in phones.iter_mut().zip(syllables) {
            *slot = syllable.to_u16();
        }
        phones
    }

    fn check_phrase(syllables: &[Syllable], phrase: &str) -> Result<(), SqliteDictionaryError> {
        if syllables.is_empty()
            || syllables.len() > MAX_PHRASE_LEN
            || phrase.chars().count() != syllables.len()
        {
            return Err(SqliteDictionaryError::PhraseMismatch);
        }
        Ok(())
    }

    /// Inserts a new phrase or increments an existing one under the decay
    /// law, using `now` as the current lifetime.
    pub fn upsert(
        &mut self,
        syllables: &[Syllable],
        phrase: &str,
        now: u64,
    ) -> Result<UserUpdate, SqliteDictionaryError> {
        Self::check_phrase(syllables, phrase)?;
        let phones = Self::padded_phones(syllables);

        let existing = self
            .conn
            .query_row(
                "SELECT time, orig_freq, max_freq, user_freq FROM userphrase_v1
                 WHERE phrase = ?1
                   AND phone_0 = ?2 AND phone_1 = ?3 AND phone_2 = ?4 AND phone_3 = ?5
                   AND phone_4 = ?6 AND phone_5 = ?7 AND phone_6 = ?8 AND phone_7 = ?9
                   AND phone_8 = ?10 AND phone_9 = ?11 AND phone_10 = ?12",
                params![
                    phrase, phones[0], phones[1], phones[2], phones[3], phones[4], phones[5],
                    phones[6], phones[7], phones[8], phones[9], phones[10],
                ],
                |row| {
                    Ok((
                        row.get::<_, u64>(0)?,
                        row.get::<_, u32>(1)?,
                        row.get::<_, u32>(2)?,
                        row.get::<_, u32>(3)?,
                    ))
                },
            )
            .map(Some)
            .or_else(|err| match err {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                err => Err(err),
            })?;

        match existing {
            Some((time, orig_freq, max_freq, user_freq)) => {
                let delta = now.saturating_sub(time);
                let user_freq = decayed_increment(user_freq, delta, max_freq, orig_freq);
                let max_freq = max_freq.max(user_freq);
                self.conn.execute(
                    "UPDATE userphrase_v1
                     SET time = ?1, max_freq = ?2, user_freq = ?3
                     WHERE phrase = ?4
                       AND phone_0 = ?5 AND phone_1 = ?6 AND phone_2 = ?7 AND phone_3 = ?8
                       AND phone_4 = ?9 AND phone_5 = ?10 AND phone_6 = ?11 AND phone_7 = ?12
                       AND phone_8 = ?13 AND phone_9 = ?14 AND phone_10 = ?15",
                    params![
                        now, max_freq, user_freq, phrase, phones[0], phones[1], phones[2],
                        phones[3], phones[4], phones[5], phones[6], phones[7], phones[8],
                        phones[9], phones[10],
                    ],
                )?;
                debug!(phrase, user_freq, "user phrase updated");
                Ok(UserUpdate::Modify)
            }
            None => {
                let baseline = self
                    .conn
                    .query_row(
                        "SELECT MAX(user_freq) FROM userphrase_v1
                         WHERE phone_0 = ?1 AND phone_1 = ?2 AND phone_2 = ?3 AND phone_3 = ?4
                           AND phone_4 = ?5 AND phone_5 = ?6 AND phone_6 = ?7 AND phone_7 = ?8
                           AND phone_8 = ?9 AND phone_9 = ?10 AND phone_10 = ?11",
                        params![
                            phones[0], phones[1], phones[2], phones[3], phones[4], phones[5],
                            phones[6], phones[7], phones[8], phones[9], phones[10],
                        ],
                        |row| row.get::<_, Option<u32>>(0),
                    )?
                    .unwrap_or(FREQ_INIT_VALUE);
                self.conn.execute(
                    "INSERT INTO userphrase_v1 (
                        time, orig_freq, max_freq, user_freq, length, phrase,
                        phone_0, phone_1, phone_2, phone_3, phone_4, phone_5,
                        phone_6, phone_7, phone_8, phone_9, phone_10
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
                    params![
                        now,
                        baseline,
                        baseline,
                        baseline,
                        syllables.len(),
                        phrase,
                        phones[0],
                        phones[1],
                        phones[2],
                        phones[3],
                        phones[4],
                        phones[5],
                        phones[6],
                        phones[7],
                        phones[8],
                        phones[9],
                        phones[10],
                    ],
                )?;
                debug!(phrase, baseline, "user phrase inserted");
                Ok(UserUpdate::Insert)
            }
        }
    }

    /// Deletes the exact row and reports whether it existed.
    pub fn remove_phrase(
        &mut self,
        syllables: &[Syllable],
        phrase: &str,
    ) -> Result<bool, SqliteDictionaryError> {
        let phones = Self::padded_phones(syllables);
        let removed = self.conn.execute(
            "DELETE FROM userphrase_v1
             WHERE phrase = ?1
               AND phone_0 = ?2 AND phone_1 = ?3 AND phone_2 = ?4 AND phone_3 = ?5
               AND phone_4 = ?6 AND phone_5 = ?7 AND phone_6 = ?8 AND phone_7 = ?9
               AND phone_8 = ?10 AND phone_9 = ?11 AND phone_10 = ?12",
            params![
                phrase, phones[0], phones[1], phones[2], phones[3], phones[4], phones[5],
                phones[6], phones[7], phones[8], phones[9], phones[10],
            ],
        )?;
        Ok(removed > 0)
    }

    /// Whether the exact (phones, phrase) key exists.
    pub fn lookup_exact(
        &self,
        syllables: &[Syllable],
        phrase: &str,
    ) -> Result<bool, SqliteDictionaryError> {
        let phones = Self::padded_phones(syllables);
        let found = self.conn.query_row(
            "SELECT EXISTS (
                SELECT 1 FROM userphrase_v1
                WHERE phrase = ?1
                  AND phone_0 = ?2 AND phone_1 = ?3 AND phone_2 = ?4 AND phone_3 = ?5
                  AND phone_4 = ?6 AND phone_5 = ?7 AND phone_6 = ?8 AND phone_7 = ?9
                  AND phone_8 = ?10 AND phone_9 = ?11 AND phone_10 = ?12
            )",
            params![
                phrase, phones[0], phones[1], phones[2], phones[3], phones[4], phones[5],
                phones[6], phones[7], phones[8], phones[9], phones[10],
            ],
            |row| row.get::<_, bool>(0),
        )?;
        Ok(found)
    }

    fn rows_for_phones(
        &self,
        syllables: &[Syllable],
    ) -> Result<Vec<Phrase>, SqliteDictionaryError> {
        let phones = Self::padded_phones(syllables);
        let mut stmt = self.conn.prepare_cached(
            "SELECT phrase, user_freq, time FROM userphrase_v1
             WHERE phone_0 = ?1 AND phone_1 = ?2 AND phone_2 = ?3 AND phone_3 = ?4
               AND phone_4 = ?5 AND phone_5 = ?6 AND phone_6 = ?7 AND phone_7 = ?8
               AND phone_8 = ?9 AND phone_9 = ?10 AND phone_10 = ?11
             ORDER BY user_freq DESC, phrase ASC",
        )?;
        let rows = stmt
            .query_map(params_from_iter(phones.iter()), |row| {
                Ok(Phrase::with_time(
                    row.get::<_, String>(0)?,
                    row.get::<_, u32>(1)?,
                    row.get::<_, u64>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Streams every row of the store, ordered by the primary key.
    pub fn enumerate_all(&self) -> Result<UserPhraseCursor, SqliteDictionaryError> {
        let mut stmt = self.conn.prepare(
            "SELECT phrase, user_freq, time, length,
                    phone_0, phone_1, phone_2, phone_3, phone_4, phone_5,
                    phone_6, phone_7, phone_8, phone_9, phone_10
             FROM userphrase_v1
             ORDER BY phone_0, phone_1, phone_2, phone_3, phone_4, phone_5,
                      phone_6, phone_7, phone_8, phone_9, phone_10, phrase",
        )?;
        let rows = stmt
            .query_map([], |row| {
                let phrase = Phrase::with_time(
                    row.get::<_, String>(0)?,
                    row.get::<_, u32>(1)?,
                    row.get::<_, u64>(2)?,
                );
                let mut syllables = vec![];
                for i in 0..MAX_PHRASE_LEN {
                    let phone: u16 = row.get(4 + i)?;
                    if phone == 0 {
                        break;
                    }
                    if let Ok(syllable) = Syllable::try_from(phone) {
                        syllables.push(syllable);
                    }
                }
                Ok((syllables, phrase))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(UserPhraseCursor {
            rows: rows.into_iter().peekable(),
        })
    }

    /// One-shot import of the pre-relational `uhash.dat` format.
    fn migrate_legacy_hash(&mut self, dir: &Path) -> Result<(), SqliteDictionaryError> {
        let legacy = dir.join(LEGACY_HASH_NAME);
        let bytes = match std::fs::read(&legacy) {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(error) => return Err(error.into()),
        };
        if bytes.len() < legacy_hash_header::SIZE.unwrap_or(8)
            || &bytes[0..4] != LEGACY_HASH_SIGNATURE
        {
            warn!(path = %legacy.display(), "legacy hash signature mismatch, skipping");
            return Ok(());
        }
        info!(path = %legacy.display(), "migrating legacy user phrases");
        let now = self.lifetime()?;
        let mut migrated = 0;
        for record in bytes[8..].chunks_exact(LEGACY_FIELD_SIZE) {
            let view = legacy_hash_record::View::new(record);
            let payload: &[u8] = view.payload();
            let phone_len = payload[0] as usize;
            if phone_len < 1 || phone_len > MAX_PHRASE_LEN {
                warn!(phone_len, "skipping legacy record with bad length");
                continue;
            }
            let mut syllables = Vec::with_capacity(phone_len);
            let mut valid = true;
            for i in 0..phone_len {
                let phone = u16::from_le_bytes([payload[1 + 2 * i], payload[2 + 2 * i]]);
                match Syllable::try_from(phone) {
                    Ok(syllable) if phone != 0 => syllables.push(syllable),
                    _ => {
                        valid = false;
                        break;
                    }
                }
            }
            if !valid {
                warn!("skipping legacy record with invalid phone");
                continue;
            }
            let phrase_len = payload[1 + 2 * phone_len] as usize;
            let phrase_start = 2 + 2 * phone_len;
            let phrase_bytes = match payload.get(phrase_start..phrase_start + phrase_len) {
                Some(bytes) => bytes,
                None => {
                    warn!("skipping legacy record with out of range phrase");
                    continue;
                }
            };
            let phrase = match std::str::from_utf8(phrase_bytes) {
                Ok(phrase) => phrase,
                Err(_) => {
                    warn!("skipping legacy record with invalid UTF-8 phrase");
                    continue;
                }
            };
            if self.upsert(&syllables, phrase, now).is_ok() {
                migrated += 1;
            }
        }
        info!(migrated, "legacy user phrases migrated");
        std::fs::rename(&legacy, dir.join(LEGACY_HASH_OLD_NAME))?;
        Ok(())
    }
}

/// A caller-owned cursor over every user phrase.
pub struct UserPhraseCursor {
    rows: Peekable<std::vec::IntoIter<(Vec<Syllable>, Phrase)>>,
}

impl UserPhraseCursor {
    pub fn has_next(&mut self) -> bool {
        self.rows.peek().is_some()
    }
}

impl Iterator for UserPhraseCursor {
    type Item = (Vec<Syllable>, Phrase);

    fn next(&mut self) -> Option<Self::Item> {
        self.rows.next()
    }
}

impl Dictionary for SqliteDictionary {
    fn lookup_phrase(&self, syllables: &[Syllable]) -> Phrases {
        if syllables.is_empty() || syllables.len() > MAX_PHRASE_LEN {
            return Box::new(std::iter::empty());
        }
        match self.rows_for_phones(syllables) {
            Ok(rows) => Box::new(rows.into_iter()),
            Err(error) => {
                warn!(%error, "user phrase lookup failed");
                Box::new(std::iter::empty())
            }
        }
    }

    fn entries(&self) -> DictEntries {
        match self.enumerate_all() {
            Ok(cursor) => Box::new(cursor),
            Err(error) => {
                warn!(%error, "user phrase enumeration failed");
                Box::new(std::iter::empty())
            }
        }
    }

    fn about(&self) -> DictionaryInfo {
        DictionaryInfo {
            name: Some("User phrase store".to_string()),
            ..Default::default()
        }
    }

    fn as_mut_dict(&mut self) -> Option<&mut dyn DictionaryMut> {
        Some(self)
    }
}

impl DictionaryMut for SqliteDictionary {
    fn insert(
        &mut self,
        syllables: &[Syllable],
        phrase: Phrase,
    ) -> Result<(), DictionaryUpdateError> {
        let now = phrase.last_used().unwrap_or_default();
        self.upsert(syllables, phrase.as_str(), now)
            .map(|_| ())
            .map_err(|err| DictionaryUpdateError {
                source: Box::new(err),
            })
    }

    fn remove(
        &mut self,
        syllables: &[Syllable],
        phrase_str: &str,
    ) -> Result<(), DictionaryUpdateError> {
        self.remove_phrase(syllables, phrase_str)
            .map(|_| ())
            .map_err(|err| DictionaryUpdateError {
                source: Box::new(err),
            })
    }
}

#[cfg(test)]
mod tests {
    use crate::dictionary::{Dictionary, UserUpdate};
    use crate::syl;
    use crate::zhuyin::Bopomofo::*;

    use super::SqliteDictionary;

    #[test]
    fn upsert_inserts_then_modifies() {
        let mut dict = SqliteDictionary::open_in_memory().unwrap();
        let syllables = [syl![C, E, TONE4], syl![SH, TONE4]];
        assert_eq!(
            UserUpdate::Insert,
            dict.upsert(&syllables, "測試", 10).unwrap()
        );
        assert_eq!(
            UserUpdate::Modify,
            dict.upsert(&syllables, "測試", 11).unwrap()
        );
        assert!(dict.lookup_exact(&syllables, "測試").unwrap());
        assert!(!dict.lookup_exact(&syllables, "策士").unwrap());
    }

    #[test]
    fn repeated_hits_strictly_increase_the_frequency() {
        let mut dict = SqliteDictionary::open_in_memory().unwrap();
        let syllables = [syl![C, E, TONE4]];
        dict.upsert(&syllables, "測", 0).unwrap();
        let first = dict.lookup_phrase(&syllables).next().unwrap().freq();
        dict.upsert(&syllables, "測", 0).unwrap();
        let second = dict.lookup_phrase(&syllables).next().unwrap().freq();
        dict.upsert(&syllables, "測", 0).unwrap();
        let third = dict.lookup_phrase(&syllables).next().unwrap().freq();
        assert!(second > first);
        assert!(third > second);
    }

    #[test]
    fn new_homophone_starts_from_the_sibling_baseline() {
        let mut dict = SqliteDictionary::open_in_memory().unwrap();
        let syllables = [syl![C, E, TONE4], syl![SH, TONE4]];
        for now in 0..5 {
            dict.upsert(&syllables, "測試", now).unwrap();
        }
        let top = dict.lookup_phrase(&syllables).next().unwrap().freq();
        dict.upsert(&syllables, "策士", 5).unwrap();
        let rows = dict.lookup_phrase(&syllables).collect::<Vec<_>>();
        assert_eq!(2, rows.len());
        assert!(rows.iter().any(|p| p.as_str() == "策士" && p.freq() >= top));
    }

    #[test]
    fn remove_is_idempotent() {
        let mut dict = SqliteDictionary::open_in_memory().unwrap();
        let syllables = [syl![SH, TONE4]];
        dict.upsert(&syllables, "是", 1).unwrap();
        assert!(dict.remove_phrase(&syllables, "是").unwrap());
        assert!(!dict.remove_phrase(&syllables, "是").unwrap());
    }

    #[test]
    fn phrase_length_must_match_phones() {
        let mut dict = SqliteDictionary::open_in_memory().unwrap();
        assert!(dict.upsert(&[syl![SH, TONE4]], "測試", 1).is_err());
        assert!(dict.upsert(&[], "測", 1).is_err());
    }

    #[test]
    fn lifetime_counter_accumulates() {
        let dict = SqliteDictionary::open_in_memory().unwrap();
        assert_eq!(0, dict.lifetime().unwrap());
        dict.advance_lifetime(42).unwrap();
        dict.advance_lifetime(8).unwrap();
        assert_eq!(50, dict.lifetime().unwrap());
    }

    #[test]
    fn enumerate_streams_every_row() {
        let mut dict = SqliteDictionary::open_in_memory().unwrap();
        dict.upsert(&[syl![SH, TONE4]], "是", 1).unwrap();
        dict.upsert(&[syl![C, E, TONE4], syl![SH, TONE4]], "測試", 2)
            .unwrap();
        let mut cursor = dict.enumerate_all().unwrap();
        assert!(cursor.has_next());
        assert_eq!(2, cursor.count());
    }

    #[test]
    fn legacy_hash_migration() {
        let dir = tempfile::tempdir().unwrap();
        let mut legacy = vec![];
        legacy.extend_from_slice(b"CBiH");
        legacy.extend_from_slice(&7u32.to_le_bytes());
        // one valid record for 是 (ㄕˋ)
        let mut record = vec![0u8; 125];
        record[0..4].copy_from_slice(&10u32.to_le_bytes());
        record[4..8].copy_from_slice(&3u32.to_le_bytes());
        record[8..12].copy_from_slice(&10u32.to_le_bytes());
        record[12..16].copy_from_slice(&1u32.to_le_bytes());
        record[16] = 1;
        let phone = crate::syl![SH, TONE4].to_u16();
        record[17..19].copy_from_slice(&phone.to_le_bytes());
        let phrase = "是".as_bytes();
        record[19] = phrase.len() as u8;
        record[20..20 + phrase.len()].copy_from_slice(phrase);
        legacy.extend_from_slice(&record);
        // one record with a bogus length that must be skipped
        let mut bad = vec![0u8; 125];
        bad[16] = 99;
        legacy.extend_from_slice(&bad);
        std::fs::write(dir.path().join("uhash.dat"), legacy).unwrap();

        let dict = SqliteDictionary::open(dir.path().join("user.sqlite3")).unwrap();
        assert!(dict
            .lookup_exact(&[crate::syl![SH, TONE4]], "是")
            .unwrap());
        assert!(!dir.path().join("uhash.dat").exists());
        assert!(dir.path().join("uhash.old").exists());
    }
}
