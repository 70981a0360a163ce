//! Document numbers for stock transactions.
//!
//! A number has the shape `<PREFIX>-<DATEPART>-<SEQ>`. `DATEPART` is
//! `YYMMDD` for the high-volume daily kinds (purchases and sales) and
//! `YYYYMMDD` for everything else. `SEQ` counts from 1 per
//! `(prefix, datepart)` pair and is zero-padded to four digits.
//!
//! Counters live behind a [`SequenceStore`]. [`MemorySequences`] keeps them
//! for the lifetime of the process; the daemon uses the SQLite-backed store
//! in [`crate::db`] so numbers stay unique across restarts.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;

use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::StoirError;

/// Prefixes whose date part is rendered as `YYMMDD`.
pub const SHORT_DATE_PREFIXES: [&str; 2] = ["PO", "SL"];

const ISO_DATE: &str = "%Y-%m-%d";

/// Hands out the next sequence value for a `(prefix, date_part)` key.
///
/// Implementations must return `1` on the first call for a key and exactly
/// one more than the previous value on every later call, even when called
/// from several threads.
pub trait SequenceStore {
    fn next_seq(&self, prefix: &str, date_part: &str) -> Result<u64, StoirError>;
}

impl<S: SequenceStore + ?Sized> SequenceStore for &S {
    fn next_seq(&self, prefix: &str, date_part: &str) -> Result<u64, StoirError> {
        (**self).next_seq(prefix, date_part)
    }
}

/// Process-lifetime counters, one lock over the whole map.
#[derive(Debug, Default)]
pub struct MemorySequences {
    counters: Mutex<HashMap<(String, String), u64>>,
}

impl MemorySequences {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last value handed out for a key, `None` if the key was never used.
    pub fn current(&self, prefix: &str, date_part: &str) -> Option<u64> {
        let counters = self.counters.lock().ok()?;
        counters
            .get(&(prefix.to_string(), date_part.to_string()))
            .copied()
    }
}

impl SequenceStore for MemorySequences {
    fn next_seq(&self, prefix: &str, date_part: &str) -> Result<u64, StoirError> {
        let mut counters = self
            .counters
            .lock()
            .map_err(|_| StoirError::Internal("sequence counters poisoned".to_string()))?;
        let counter = counters
            .entry((prefix.to_string(), date_part.to_string()))
            .or_insert(0);
        *counter += 1;
        Ok(*counter)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct TransactionNumber {
    pub prefix: String,
    pub date_part: String,
    pub seq: u64,
}

impl fmt::Display for TransactionNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{:04}", self.prefix, self.date_part, self.seq)
    }
}

impl FromStr for TransactionNumber {
    type Err = StoirError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || StoirError::InvalidArgument(format!("malformed transaction number: {s}"));

        // Split from the right: prefixes are free-form, may contain '-' and
        // may be empty.
        let mut parts = s.rsplitn(3, '-');
        let seq = parts.next().ok_or_else(invalid)?;
        let date_part = parts.next().ok_or_else(invalid)?;
        let prefix = parts.next().ok_or_else(invalid)?;

        let digits = |v: &str, widths: &[usize]| {
            widths.contains(&v.len()) && v.bytes().all(|b| b.is_ascii_digit())
        };
        if !digits(date_part, &[6, 8]) || seq.len() < 4 {
            return Err(invalid());
        }
        let seq: u64 = seq.parse().map_err(|_| invalid())?;
        if seq == 0 {
            return Err(invalid());
        }

        Ok(TransactionNumber {
            prefix: prefix.to_string(),
            date_part: date_part.to_string(),
            seq,
        })
    }
}

impl From<TransactionNumber> for String {
    fn from(number: TransactionNumber) -> Self {
        number.to_string()
    }
}

impl TryFrom<String> for TransactionNumber {
    type Error = StoirError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

pub fn is_short_date_prefix(prefix: &str) -> bool {
    SHORT_DATE_PREFIXES.contains(&prefix)
}

pub fn date_part(prefix: &str, date: NaiveDate) -> String {
    if is_short_date_prefix(prefix) {
        date.format("%y%m%d").to_string()
    } else {
        date.format("%Y%m%d").to_string()
    }
}

/// Strict `YYYY-MM-DD`. Surrounding whitespace is ignored.
pub fn parse_reference_date(raw: &str) -> Result<NaiveDate, StoirError> {
    let trimmed = raw.trim();
    if trimmed.len() != 10 {
        return Err(StoirError::InvalidDate(raw.to_string()));
    }
    NaiveDate::parse_from_str(trimmed, ISO_DATE).map_err(|_| StoirError::InvalidDate(raw.to_string()))
}

/// `None` means "today"; a present value must parse.
pub fn resolve_reference_date(raw: Option<&str>) -> Result<NaiveDate, StoirError> {
    match raw {
        Some(raw) => parse_reference_date(raw),
        None => Ok(today()),
    }
}

pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

pub struct TransactionNumberGenerator<S = MemorySequences> {
    store: S,
}

impl TransactionNumberGenerator<MemorySequences> {
    pub fn in_memory() -> Self {
        Self::new(MemorySequences::new())
    }
}

impl<S: SequenceStore> TransactionNumberGenerator<S> {
    pub fn new(store: S) -> Self {
        TransactionNumberGenerator { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Allocates the next number for `prefix` on `reference_date`
    /// (`YYYY-MM-DD`). A malformed date is rejected before any counter moves.
    pub fn generate(
        &self,
        prefix: &str,
        reference_date: &str,
    ) -> Result<TransactionNumber, StoirError> {
        let date = parse_reference_date(reference_date)?;
        self.generate_for_date(prefix, date)
    }

    pub fn generate_for_date(
        &self,
        prefix: &str,
        date: NaiveDate,
    ) -> Result<TransactionNumber, StoirError> {
        let date_part = date_part(prefix, date);
        let seq = self.store.next_seq(prefix, &date_part)?;
        Ok(TransactionNumber {
            prefix: prefix.to_string(),
            date_part,
            seq,
        })
    }

    pub fn generate_today(&self, prefix: &str) -> Result<TransactionNumber, StoirError> {
        self.generate_for_date(prefix, today())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn gen_str(g: &TransactionNumberGenerator, prefix: &str, date: &str) -> String {
        g.generate(prefix, date).unwrap().to_string()
    }

    #[test]
    fn purchase_prefix_uses_short_date() {
        let g = TransactionNumberGenerator::in_memory();
        assert_eq!(gen_str(&g, "PO", "2026-01-06"), "PO-260106-0001");
        assert_eq!(gen_str(&g, "PO", "2026-01-06"), "PO-260106-0002");
    }

    #[test]
    fn sale_prefix_uses_short_date() {
        let g = TransactionNumberGenerator::in_memory();
        assert_eq!(gen_str(&g, "SL", "2026-01-06"), "SL-260106-0001");
        assert_eq!(gen_str(&g, "SL", "2026-01-06"), "SL-260106-0002");
    }

    #[test]
    fn other_prefixes_keep_full_date() {
        let g = TransactionNumberGenerator::in_memory();
        assert_eq!(gen_str(&g, "SO", "2026-01-06"), "SO-20260106-0001");
        assert_eq!(gen_str(&g, "CL", "2026-01-06"), "CL-20260106-0001");
    }

    #[test]
    fn new_date_restarts_sequence() {
        let g = TransactionNumberGenerator::in_memory();
        gen_str(&g, "PO", "2026-01-06");
        gen_str(&g, "PO", "2026-01-06");
        assert_eq!(gen_str(&g, "PO", "2026-01-07"), "PO-260107-0001");
        assert_eq!(gen_str(&g, "PO", "2026-01-06"), "PO-260106-0003");
    }

    #[test]
    fn interleaved_kinds_do_not_share_counters() {
        let g = TransactionNumberGenerator::in_memory();
        let d = "2026-01-06";
        assert_eq!(gen_str(&g, "PO", d), "PO-260106-0001");
        assert_eq!(gen_str(&g, "SL", d), "SL-260106-0001");
        assert_eq!(gen_str(&g, "PO", d), "PO-260106-0002");
        assert_eq!(gen_str(&g, "SO", d), "SO-20260106-0001");
        assert_eq!(gen_str(&g, "SL", d), "SL-260106-0002");
    }

    #[test]
    fn prefix_match_is_case_sensitive() {
        let g = TransactionNumberGenerator::in_memory();
        assert_eq!(gen_str(&g, "po", "2026-01-06"), "po-20260106-0001");
        assert_eq!(gen_str(&g, "PO", "2026-01-06"), "PO-260106-0001");
    }

    #[test]
    fn unknown_prefix_is_accepted() {
        let g = TransactionNumberGenerator::in_memory();
        assert_eq!(gen_str(&g, "ZZZ", "2026-01-06"), "ZZZ-20260106-0001");
    }

    #[test]
    fn sequence_widens_past_four_digits() {
        let g = TransactionNumberGenerator::in_memory();
        let mut last = String::new();
        for _ in 0..10_000 {
            last = gen_str(&g, "SO", "2026-01-06");
        }
        assert_eq!(last, "SO-20260106-10000");
    }

    #[test]
    fn malformed_date_is_rejected_without_consuming() {
        let g = TransactionNumberGenerator::in_memory();
        for bad in ["", "2026-13-01", "2026/01/06", "06-01-2026", "2026-1-6", "tomorrow"] {
            let err = g.generate("PO", bad).unwrap_err();
            assert!(matches!(err, StoirError::InvalidDate(_)), "{bad}: {err:?}");
        }
        assert!(g.store().current("PO", "260106").is_none());
        assert_eq!(gen_str(&g, "PO", "2026-01-06"), "PO-260106-0001");
    }

    #[test]
    fn missing_date_defaults_to_today() {
        let g = TransactionNumberGenerator::in_memory();
        let number = g.generate_today("SL").unwrap();
        assert_eq!(number.date_part, date_part("SL", today()));
        assert_eq!(number.seq, 1);
        assert_eq!(resolve_reference_date(None).unwrap(), today());
    }

    #[test]
    fn concurrent_callers_never_collide() {
        let g = Arc::new(TransactionNumberGenerator::in_memory());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let g = Arc::clone(&g);
                thread::spawn(move || {
                    (0..250)
                        .map(|_| g.generate("PO", "2026-01-06").unwrap().seq)
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seqs: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        seqs.sort_unstable();
        assert_eq!(seqs, (1..=2000).collect::<Vec<_>>());
    }

    #[test]
    fn parse_round_trips_display() {
        let n: TransactionNumber = "PO-260106-0042".parse().unwrap();
        assert_eq!(n.prefix, "PO");
        assert_eq!(n.date_part, "260106");
        assert_eq!(n.seq, 42);
        assert_eq!(n.to_string(), "PO-260106-0042");

        let wide: TransactionNumber = "SO-20260106-10000".parse().unwrap();
        assert_eq!(wide.seq, 10_000);
    }

    #[test]
    fn any_generated_number_parses_back() {
        let g = TransactionNumberGenerator::in_memory();
        for prefix in ["", "PO", "SO", "RET-X", "po"] {
            let number = g.generate(prefix, "2026-01-06").unwrap();
            let text = serde_json::to_string(&number).unwrap();
            let back: TransactionNumber = serde_json::from_str(&text).unwrap();
            assert_eq!(back, number, "{prefix:?}");
        }
        assert_eq!(
            g.generate("", "2026-01-06").unwrap().to_string(),
            "-20260106-0002"
        );
    }

    #[test]
    fn parse_rejects_garbage() {
        for bad in ["", "PO", "PO-260106", "PO-2601-0001", "PO-260106-01", "PO-260106-0000"] {
            assert!(bad.parse::<TransactionNumber>().is_err(), "{bad}");
        }
    }

    #[test]
    fn generator_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<TransactionNumberGenerator>();
    }
}
