//! Opaque cursor pagination.
//!
//! Cursors encode a `(updated_at, id)` tuple; list endpoints sort descending
//! by `updated_at` with the id as tie-breaker, so a cursor names the last
//! item the caller has already seen.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::DateTime;
use chrono::Utc;
use uuid::Uuid;

use crate::error::RegistryError;
use crate::error::Result;

/// Smallest accepted page size once clamped.
pub const MIN_PAGE_SIZE: usize = 1;
/// Largest accepted page size.
pub const MAX_PAGE_SIZE: usize = 100;
/// Page size when the caller does not ask for one.
pub const DEFAULT_PAGE_SIZE: usize = 20;

/// Clamp a requested page size into `[1, 100]`, defaulting to 20.
///
/// A requested size of zero is honored as zero: the caller gets an empty,
/// well-formed page.
pub fn clamp_limit(requested: Option<u32>) -> usize {
    match requested {
        None => DEFAULT_PAGE_SIZE,
        Some(0) => 0,
        Some(n) => (n as usize).clamp(MIN_PAGE_SIZE, MAX_PAGE_SIZE),
    }
}

/// Position in a `(updated_at desc, id desc)` ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    /// `updated_at` of the last seen item.
    pub updated_at: DateTime<Utc>,
    /// Id of the last seen item, breaking timestamp ties.
    pub id: Uuid,
}

impl Cursor {
    /// Encode into the opaque wire form.
    pub fn encode(&self) -> String {
        let raw = format!("{}:{}", self.updated_at.timestamp_micros(), self.id);
        URL_SAFE_NO_PAD.encode(raw.as_bytes())
    }

    /// Decode from the opaque wire form.
    pub fn decode(encoded: &str) -> Result<Self> {
        let raw = URL_SAFE_NO_PAD
            .decode(encoded.as_bytes())
            .map_err(|_| RegistryError::InvalidCursor)?;
        let raw = String::from_utf8(raw).map_err(|_| RegistryError::InvalidCursor)?;
        let (micros, id) = raw.split_once(':').ok_or(RegistryError::InvalidCursor)?;
        let micros: i64 = micros.parse().map_err(|_| RegistryError::InvalidCursor)?;
        let updated_at =
            DateTime::from_timestamp_micros(micros).ok_or(RegistryError::InvalidCursor)?;
        let id = Uuid::parse_str(id).map_err(|_| RegistryError::InvalidCursor)?;
        Ok(Self { updated_at, id })
    }

    /// Whether an item at `(updated_at, id)` sorts strictly after this cursor
    /// in the descending ordering, i.e. belongs to a later page.
    pub fn admits(&self, updated_at: DateTime<Utc>, id: Uuid) -> bool {
        (updated_at, id) < (self.updated_at, self.id)
    }
}

/// One page of results plus the cursor for the next page, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    /// The items of this page, already ordered.
    pub items: Vec<T>,
    /// Cursor for the following page; `None` when exhausted.
    pub next_cursor: Option<String>,
}

impl<T> Page<T> {
    /// An empty, exhausted page.
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            next_cursor: None,
        }
    }

    /// Map the items, keeping the cursor.
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            next_cursor: self.next_cursor,
        }
    }
}
