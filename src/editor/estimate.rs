//! User frequency estimation.
//!
//! The user store keeps a monotone lifetime counter as a logical clock.
//! Every processed keystroke advances an in-memory shadow of it, and the
//! difference is persisted when the editor closes. Frequency updates use
//! the clock to favor recently used phrases while old usage decays back
//! toward the original frequency.

use tracing::warn;

use crate::dictionary::{SqliteDictionary, SqliteDictionaryError};

/// Usage within this window counts as consecutive.
const SHORT_LIFETIME: u64 = 4000;
/// Past this window the accumulated usage is fully forgotten.
const FORGET_HORIZON: u64 = 100_000;

/// Conservative frequency bump with age based decay.
///
/// The returned value always exceeds the decayed base by at least one, so
/// back-to-back hits strictly grow the frequency, and it never exceeds
/// ten times the ceiling frequency.
pub fn decayed_increment(user_freq: u32, delta: u64, max_freq: u32, orig_freq: u32) -> u32 {
    let cap = max_freq.saturating_mul(10).max(orig_freq);
    let spread = user_freq.saturating_sub(orig_freq);
    let (base, boost) = if delta < SHORT_LIFETIME {
        (user_freq, (max_freq - orig_freq.min(max_freq)) / 5 + 1)
    } else if delta < FORGET_HORIZON {
        // linear fade of the accumulated usage over the horizon
        let keep = (FORGET_HORIZON - delta) as u128;
        let window = (FORGET_HORIZON - SHORT_LIFETIME) as u128;
        let kept = (u128::from(spread) * keep / window) as u32;
        (orig_freq + kept, (max_freq - orig_freq.min(max_freq)) / 10 + 1)
    } else {
        (orig_freq, 1)
    };
    base.saturating_add(boost).min(cap)
}

/// The lifetime clock, loaded from and flushed to the user store.
#[derive(Debug)]
pub struct UserFreqEstimate {
    original_lifetime: u64,
    new_lifetime: u64,
}

impl UserFreqEstimate {
    /// Reads the persisted lifetime from the store.
    pub fn open(dict: &SqliteDictionary) -> Result<UserFreqEstimate, SqliteDictionaryError> {
        let lifetime = dict.lifetime()?;
        Ok(UserFreqEstimate {
            original_lifetime: lifetime,
            new_lifetime: lifetime,
        })
    }

    /// A clock that starts at zero, for engines without a user store.
    pub fn new() -> UserFreqEstimate {
        UserFreqEstimate {
            original_lifetime: 0,
            new_lifetime: 0,
        }
    }

    /// Advances the clock by one keystroke.
    pub fn tick(&mut self) {
        self.new_lifetime += 1;
    }

    /// The current logical time.
    pub fn now(&self) -> u64 {
        self.new_lifetime
    }

    /// Persists the keystrokes counted since open or the last flush.
    ///
    /// A write failure is logged and the unflushed delta is kept, so the
    /// in-memory state stays valid.
    pub fn flush(&mut self, dict: &SqliteDictionary) {
        let delta = self.new_lifetime - self.original_lifetime;
        if delta == 0 {
            return;
        }
        match dict.advance_lifetime(delta) {
            Ok(()) => self.original_lifetime = self.new_lifetime,
            Err(error) => warn!(%error, "unable to persist lifetime"),
        }
    }
}

impl Default for UserFreqEstimate {
    fn default() -> UserFreqEstimate {
        UserFreqEstimate::new()
    }
}
