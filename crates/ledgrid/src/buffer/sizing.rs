// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ledgrid contributors

//! Dynamic batch sizing from controller fullness reports.
//!
//! The batch cap adapts to the slowest reporting controller: the fuller its
//! buffer, the smaller the batches everyone gets. Unreported controllers do
//! not constrain the size.

use super::record::ControllerRecord;

/// Fullness band thresholds and the caps they impose.
const BAND_HIGH: f32 = 0.8;
const BAND_HIGH_CAP: usize = 30;
const BAND_MID: f32 = 0.6;
const BAND_MID_CAP: usize = 60;
const BAND_LOW: f32 = 0.4;
const BAND_LOW_CAP: usize = 90;

/// Cap imposed by a single controller's fullness.
fn band_cap(fullness: f32, batch_size_max: usize) -> usize {
    if fullness > BAND_HIGH {
        BAND_HIGH_CAP
    } else if fullness > BAND_MID {
        BAND_MID_CAP
    } else if fullness > BAND_LOW {
        BAND_LOW_CAP
    } else {
        batch_size_max
    }
}

/// Minimum band over all reporting controllers, clamped to
/// `batch_size_max`. With no reports yet, the full size is allowed.
pub fn dynamic_batch_size<'a>(
    records: impl Iterator<Item = &'a ControllerRecord>,
    batch_size_max: usize,
) -> usize {
    records
        .filter(|r| r.has_reported)
        .map(|r| band_cap(r.reported_fullness, batch_size_max))
        .min()
        .unwrap_or(batch_size_max)
        .min(batch_size_max)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn reporting(id: &str, fullness: f32) -> ControllerRecord {
        let mut rec = ControllerRecord::new(id);
        rec.reported_fullness = fullness;
        rec.has_reported = true;
        rec
    }

    #[test]
    fn test_no_reports_uses_max() {
        let records: Vec<ControllerRecord> = vec![ControllerRecord::new("silent")];
        assert_eq!(dynamic_batch_size(records.iter(), 120), 120);
    }

    #[test]
    fn test_bands() {
        assert_eq!(band_cap(0.9, 120), 30);
        assert_eq!(band_cap(0.7, 120), 60);
        assert_eq!(band_cap(0.5, 120), 90);
        assert_eq!(band_cap(0.3, 120), 120);
        // Boundary values fall into the laxer band.
        assert_eq!(band_cap(0.8, 120), 60);
        assert_eq!(band_cap(0.4, 120), 120);
    }

    #[test]
    fn test_slowest_controller_wins() {
        let records = vec![reporting("fast", 0.1), reporting("slow", 0.9)];
        assert_eq!(dynamic_batch_size(records.iter(), 120), 30);
    }

    #[test]
    fn test_unreported_controller_does_not_constrain() {
        let records = vec![reporting("ok", 0.5), ControllerRecord::new("new")];
        assert_eq!(dynamic_batch_size(records.iter(), 120), 90);
    }

    #[test]
    fn test_band_never_exceeds_configured_max() {
        let records = vec![reporting("c", 0.5)];
        assert_eq!(dynamic_batch_size(records.iter(), 40), 40);
    }
}
