use std::{fmt, num::NonZeroU32, str::FromStr};

use rand::Rng;
use thiserror::Error;
use tracing::{instrument, warn};

use crate::url_repo::UrlRepository;

/// The set of symbols a slug is drawn from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Alphabet(&'static [u8]);

impl Alphabet {
    /// `A-Z`, `a-z` and `0-9`.
    pub const STANDARD: Self =
        Self(b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789");

    /// The alphabet early deployments issued slugs from.
    /// `S`, `T`, `U` and `V` never occur in it.
    pub const LEGACY: Self = Self(b"ABCDEFGHIJKLMNOPQRXWYZabcdefghijklmnopqrstuvwxyz1234567890");

    #[must_use]
    pub const fn symbols(&self) -> &'static [u8] {
        self.0
    }

    #[must_use]
    pub fn contains(&self, c: char) -> bool {
        u8::try_from(c).is_ok_and(|byte| self.0.contains(&byte))
    }
}

impl fmt::Display for Alphabet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::STANDARD => f.write_str("standard"),
            Self::LEGACY => f.write_str("legacy"),
            Self(symbols) => f.write_str(&String::from_utf8_lossy(symbols)),
        }
    }
}

#[derive(Debug, Error)]
#[error("unknown slug alphabet {0:?}; expected \"standard\" or \"legacy\"")]
pub struct UnknownAlphabetError(String);

impl FromStr for Alphabet {
    type Err = UnknownAlphabetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "standard" => Ok(Self::STANDARD),
            "legacy" => Ok(Self::LEGACY),
            _ => Err(UnknownAlphabetError(s.to_owned())),
        }
    }
}

#[derive(Debug, Error)]
pub enum AllocationError {
    #[error("no free slug found after {attempts} attempts")]
    Exhausted { attempts: u32 },
    #[error("failed to check slug availability: {0}")]
    Storage(anyhow::Error),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlugAllocator {
    pub alphabet: Alphabet,
    pub length: usize,
    pub max_attempts: NonZeroU32,
    /// Grow the candidate length by one after this many collisions.
    pub grow_after: Option<NonZeroU32>,
}

const SLUG_LENGTH: usize = 8;
const MAX_ATTEMPTS: NonZeroU32 = match NonZeroU32::new(10) {
    Some(attempts) => attempts,
    None => unreachable!(),
};

impl Default for SlugAllocator {
    fn default() -> Self {
        Self {
            alphabet: Alphabet::STANDARD,
            length: SLUG_LENGTH,
            max_attempts: MAX_ATTEMPTS,
            grow_after: None,
        }
    }
}

impl SlugAllocator {
    /// Draws `length` symbols uniformly (with replacement) from the alphabet.
    pub fn generate_slug<R: Rng>(&self, rng: &mut R, length: usize) -> String {
        let symbols = self.alphabet.symbols();
        (0..length)
            .map(|_| char::from(symbols[rng.random_range(0..symbols.len())]))
            .collect()
    }

    /// Candidate length for the given zero-based attempt number.
    #[must_use]
    pub fn length_for_attempt(&self, attempt: u32) -> usize {
        self.grow_after.map_or(self.length, |grow_after| {
            self.length
                .saturating_add(usize::try_from(attempt / grow_after.get()).unwrap_or(usize::MAX))
        })
    }

    /// Generates slugs until one is not present in `repo`.
    ///
    /// The existence check only avoids obvious collisions: another writer may
    /// still claim the returned slug before it is inserted, so callers must
    /// treat the insert as the final word on uniqueness.
    ///
    /// # Errors
    /// [`AllocationError::Exhausted`] when every attempt collided, and
    /// [`AllocationError::Storage`] as soon as an existence check fails.
    #[instrument(skip(self, rng, repo))]
    pub async fn generate_unique_slug<R: Rng + Send>(
        &self,
        rng: &mut R,
        repo: &dyn UrlRepository,
    ) -> Result<String, AllocationError> {
        for attempt in 0..self.max_attempts.get() {
            let slug = self.generate_slug(rng, self.length_for_attempt(attempt));
            match repo.slug_exists(&slug).await {
                Ok(false) => return Ok(slug),
                Ok(true) => warn!(attempt, slug, "Generated slug that was already taken"),
                Err(err) => return Err(AllocationError::Storage(err)),
            }
        }

        Err(AllocationError::Exhausted {
            attempts: self.max_attempts.get(),
        })
    }
}
