//! Short entry identifiers derived from the publish timestamp.
//!
//! An [`Id`] is a 7-character numeral in a 24-symbol alphabet chosen to
//! avoid visually ambiguous glyphs (no `0`/`O`, no `1`/`l`/`I`). The value
//! encoded is the Unix publish second truncated to 32 bits, so ids are
//! deterministic, roughly time-ordered and short enough for URLs.
//!
//! Legacy Shaarli installations used 6-character base64url tokens; those
//! decode to the same 32-bit space and are migrated on feed load.

use base64::alphabet::URL_SAFE;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use chrono::{DateTime, FixedOffset};
use std::fmt;
use thiserror::Error;

use crate::atom::Feed;

/// The output alphabet, ordered by digit value. Excludes easily-confused
/// glyphs (0/O, 1/l/I, 5/S lookalikes stay because the font risk is low).
pub const ALPHABET: &[u8; 24] = b"23456789abcdefghkrstuxyz";

/// Number of digits in a generated id. 24^7 > 2^32, so every truncated
/// Unix second has a unique rendering.
pub const ID_LEN: usize = 7;

/// Upper bound on +1s probes when resolving a collision.
const MAX_PROBES: u32 = 1_000;

/// Decoder for legacy tokens. Shaarli's 6-character tokens are not
/// canonical base64 (the final symbol carries non-zero trailing bits),
/// so the strict stock engine would reject them.
const LEGACY_B64: GeneralPurpose = GeneralPurpose::new(
    &URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::RequireNone)
        .with_decode_allow_trailing_bits(true),
);

#[derive(Debug, Error)]
pub enum IdError {
    /// Every probed second already has an entry. Practically unreachable
    /// outside of tests that pin the clock.
    #[error("No free identifier within {MAX_PROBES} seconds of {0}")]
    Exhausted(i64),

    /// A legacy token that is not 6 base64url characters.
    #[error("Invalid legacy identifier {0:?}")]
    BadLegacy(String),
}

/// Opaque short identifier of an [`crate::atom::Entry`], unique within a feed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Id(String);

impl Id {
    /// Derive the id for a publish instant. Pure in the truncated Unix
    /// second: two calls with the same second yield the same id.
    pub fn new(at: DateTime<FixedOffset>) -> Self {
        Id(encode_base24x7(at.timestamp() as u32))
    }

    /// Derive an id that does not collide with any entry of `feed`.
    ///
    /// Two bookmarks in the same second are rare but real (double-submit,
    /// imports), so a collision retries with the timestamp perturbed by
    /// one second instead of failing outright.
    pub fn new_unique(feed: &Feed, at: DateTime<FixedOffset>) -> Result<Self, IdError> {
        let base = at.timestamp();
        for probe in 0..MAX_PROBES {
            let id = Id(encode_base24x7(base.wrapping_add(i64::from(probe)) as u32));
            if feed.find_by_id(&id).is_none() {
                if probe > 0 {
                    tracing::warn!(id = %id, probes = probe, "identifier collision, perturbed timestamp");
                }
                return Ok(id);
            }
        }
        Err(IdError::Exhausted(base))
    }

    /// Translate a legacy 6-character base64url token into the current
    /// alphabet. 6 base64 characters decode to exactly 4 bytes, read as a
    /// big-endian u32 and re-rendered in base 24.
    pub fn from_legacy_base64(token: &str) -> Result<Self, IdError> {
        if token.chars().count() != 6 {
            return Err(IdError::BadLegacy(token.to_owned()));
        }
        let bytes = LEGACY_B64
            .decode(token)
            .map_err(|_| IdError::BadLegacy(token.to_owned()))?;
        let raw: [u8; 4] = bytes
            .try_into()
            .map_err(|_| IdError::BadLegacy(token.to_owned()))?;
        Ok(Id(encode_base24x7(u32::from_be_bytes(raw))))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Id {
    fn from(s: &str) -> Self {
        Id(s.to_owned())
    }
}

impl From<String> for Id {
    fn from(s: String) -> Self {
        Id(s)
    }
}

/// Render `v` as a 7-digit base-24 numeral, left-padded with the zero
/// digit of [`ALPHABET`].
fn encode_base24x7(mut v: u32) -> String {
    let mut buf = [ALPHABET[0]; ID_LEN];
    for slot in buf.iter_mut().rev() {
        *slot = ALPHABET[(v % 24) as usize];
        v /= 24;
    }
    // 24^7 exceeds u32::MAX, so v is exhausted here.
    debug_assert_eq!(v, 0);
    String::from_utf8_lossy(&buf).into_owned()
}
