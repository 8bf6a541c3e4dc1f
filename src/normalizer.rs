//! Usage event normalizer
//!
//! Turns raw usage rows into a clean, time-ordered [`UsageEvent`] sequence:
//! stream filtering, epoch conversion, window selection, app canonicalization,
//! open-interval closing, and removal of zero-length and duplicate intervals.
//! Bad rows are skipped and counted, never fatal.

use crate::canonical::AppCatalog;
use crate::config::EngineConfig;
use crate::error::MalformedRecordError;
use crate::schema::RawUsageRow;
use crate::types::UsageEvent;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

/// Per-row malformed details kept in the warnings ledger
pub const MAX_MALFORMED_DETAILS: usize = 50;

/// A skipped row and why
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MalformedRow {
    pub index: usize,
    pub reason: String,
}

/// Everything the normalizer dropped or could not resolve
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizationWarnings {
    /// Rows skipped as malformed; each row is counted once
    pub malformed_rows: usize,
    /// First few malformed rows, for diagnostics
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub malformed: Vec<MalformedRow>,
    pub filtered_stream_rows: usize,
    pub out_of_window_rows: usize,
    pub zero_length_dropped: usize,
    pub duplicates_dropped: usize,
    /// Identifiers that matched nothing in the catalog and were passed through
    pub unresolved_identifiers: Vec<String>,
}

impl NormalizationWarnings {
    /// True when the run should report success-with-warnings
    pub fn has_warnings(&self) -> bool {
        self.malformed_rows > 0 || !self.unresolved_identifiers.is_empty()
    }

    fn record_malformed(&mut self, index: usize, error: &MalformedRecordError) {
        self.malformed_rows += 1;
        if self.malformed.len() < MAX_MALFORMED_DETAILS {
            self.malformed.push(MalformedRow {
                index,
                reason: error.to_string(),
            });
        }
    }
}

/// The analysis window actually used
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisWindow {
    pub days: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
}

/// Output of normalization
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedUsage {
    pub events: Vec<UsageEvent>,
    pub window: AnalysisWindow,
    pub warnings: NormalizationWarnings,
}

// A row that parsed, before its open end is closed
struct PendingEvent<'a> {
    index: usize,
    raw_app: &'a str,
    start: DateTime<Utc>,
    end: Option<DateTime<Utc>>,
}

/// Usage row normalizer
pub struct UsageNormalizer;

impl UsageNormalizer {
    /// Normalize raw rows into a sorted event sequence.
    ///
    /// Deterministic for a given input: ties on `start` keep row order.
    pub fn normalize(
        rows: &[RawUsageRow],
        config: &EngineConfig,
        catalog: &AppCatalog,
    ) -> NormalizedUsage {
        let mut warnings = NormalizationWarnings::default();

        // Stage 1: stream filter and field parsing
        let mut pending: Vec<PendingEvent<'_>> = Vec::with_capacity(rows.len());
        for (index, row) in rows.iter().enumerate() {
            if !config.stream_tag.is_empty() {
                if let Some(stream) = row.stream_str() {
                    if stream != config.stream_tag {
                        warnings.filtered_stream_rows += 1;
                        continue;
                    }
                }
            }

            match parse_row(row, config.epoch_offset_secs) {
                Ok(event) => pending.push(PendingEvent { index, ..event }),
                Err(e) => {
                    log::debug!("Skipping malformed row {index}: {e}");
                    warnings.record_malformed(index, &e);
                }
            }
        }

        // Stage 2: analysis window
        let window_end = config
            .window_end
            .or_else(|| pending.iter().map(|p| p.start).max());
        let window = AnalysisWindow {
            days: config.window_days,
            start: window_end
                .and_then(|end| end.checked_sub_signed(Duration::days(i64::from(config.window_days)))),
            end: window_end,
        };
        if let (Some(start), Some(end)) = (window.start, window.end) {
            let before = pending.len();
            pending.retain(|p| p.start >= start && p.start <= end);
            warnings.out_of_window_rows = before - pending.len();
        }

        // Stage 3: stable sort by start, ties keep row order
        pending.sort_by_key(|p| p.start);

        // Stage 4: close open intervals, drop zero-length and duplicates, resolve apps
        let mut events = Vec::with_capacity(pending.len());
        let mut seen: HashSet<(String, DateTime<Utc>, DateTime<Utc>)> = HashSet::new();
        let mut unresolved: BTreeSet<String> = BTreeSet::new();

        for (i, event) in pending.iter().enumerate() {
            let end = match event.end {
                Some(end) => end,
                None => match pending.get(i + 1) {
                    Some(next) => next.start,
                    None => event.start,
                },
            };
            if end <= event.start {
                warnings.zero_length_dropped += 1;
                continue;
            }

            let resolved = catalog.resolve(event.raw_app);
            if !seen.insert((resolved.name.clone(), event.start, end)) {
                warnings.duplicates_dropped += 1;
                continue;
            }
            if !resolved.resolved {
                unresolved.insert(resolved.name.clone());
            }

            events.push(UsageEvent {
                app_id: resolved.name,
                start: event.start,
                end,
                source_index: event.index,
            });
        }

        warnings.unresolved_identifiers = unresolved.into_iter().collect();

        if warnings.malformed_rows > 0 {
            log::warn!("Skipped {} malformed usage rows", warnings.malformed_rows);
        }
        if !warnings.unresolved_identifiers.is_empty() {
            log::warn!(
                "{} app identifiers not in the catalog: {}",
                warnings.unresolved_identifiers.len(),
                warnings.unresolved_identifiers.join(", ")
            );
        }
        log::debug!(
            "Normalized {} rows into {} events ({} out of window, {} zero-length, {} duplicates)",
            rows.len(),
            events.len(),
            warnings.out_of_window_rows,
            warnings.zero_length_dropped,
            warnings.duplicates_dropped
        );

        NormalizedUsage {
            events,
            window,
            warnings,
        }
    }
}

fn parse_row(row: &RawUsageRow, epoch_offset_secs: i64) -> Result<PendingEvent<'_>, MalformedRecordError> {
    let parsed = row.parse()?;
    let start = offset_to_utc(parsed.start_secs, epoch_offset_secs)?;
    let end = parsed
        .end_secs
        .map(|secs| offset_to_utc(secs, epoch_offset_secs))
        .transpose()?;

    Ok(PendingEvent {
        index: 0,
        raw_app: parsed.app,
        start,
        end,
    })
}

/// Convert a reference-epoch offset to UTC with millisecond precision
pub fn offset_to_utc(offset_secs: f64, epoch_offset_secs: i64) -> Result<DateTime<Utc>, MalformedRecordError> {
    let unix_ms = ((offset_secs + epoch_offset_secs as f64) * 1000.0).round();
    if !unix_ms.is_finite() || unix_ms.abs() > i64::MAX as f64 {
        return Err(MalformedRecordError::OutOfRange(offset_secs));
    }
    Utc.timestamp_millis_opt(unix_ms as i64)
        .single()
        .ok_or(MalformedRecordError::OutOfRange(offset_secs))
}
