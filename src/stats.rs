//! Run statistics: human-readable duration formatting plus an append-mode
//! JSON stats collector (spec §6 "perf_output").
//!
//! `PrettyDuration` is carried over from the teacher crate's own timing
//! helper; the JSON stats file is new ambient scaffolding built with
//! `serde`/`serde_json`, the crates the rest of the pack reaches for
//! whenever a result needs a stable on-disk shape instead of ad hoc text.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A wrapper struct for `std::time::Duration` to provide pretty-printing of
/// durations.
#[doc(hidden)]
pub struct PrettyDuration(pub Duration);

impl fmt::Display for PrettyDuration {
    /// Durations are formatted as follows:
    /// - If the duration is greater than or equal to 1 second, it is formatted in seconds (s).
    /// - If the duration is greater than or equal to 1 millisecond but less than 1 second, it is formatted in milliseconds (ms).
    /// - If the duration is less than 1 millisecond, it is formatted in microseconds (µs).
    ///   In the case of seconds & milliseconds, the duration is always printed with a precision of two decimal places.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let duration = self.0;
        if duration.as_secs() > 0 {
            let seconds =
                duration.as_secs() as f64 + f64::from(duration.subsec_nanos()) / 1_000_000_000.0;
            write!(f, "{seconds:.2}s ")
        } else if duration.subsec_millis() > 0 {
            let milliseconds =
                duration.as_millis() as f64 + f64::from(duration.subsec_micros() % 1_000) / 1_000.0;
            write!(f, "{milliseconds:.2}ms")
        } else {
            let microseconds = duration.as_micros();
            write!(f, "{microseconds}µs")
        }
    }
}

/// One run's timing breakdown, written once per run by rank 0 (spec §6
/// `-save_results`: "append-mode JSON array fragment written by rank 0").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStats {
    pub rank: usize,
    pub world_size: usize,
    pub iterations: u32,
    pub batch_size: u64,
    pub embedding_dim: usize,
    pub total_seconds: f64,
    pub comm_seconds: f64,
    pub compute_seconds: f64,
}

impl RunStats {
    /// Append this run's stats to `path` as one more element of a JSON
    /// array, without ever holding the whole array in memory or rewriting
    /// the file: the file's content is always `elem0,elem1,...,elemN` — a
    /// valid JSON array once wrapped in `[...]` by whatever reads it back,
    /// but never written with the brackets here, since appending to a
    /// bracketed array in place isn't possible without a rewrite. The first
    /// write to a new/empty file has no leading comma; every later call
    /// prepends one.
    pub fn append_to_file(&self, path: &str) -> crate::error::Result<()> {
        use std::io::Write;
        let object = serde_json::to_string(self)
            .map_err(|e| crate::error::DistEmbedError::IoError(e.to_string()))?;
        let needs_comma = std::fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false);
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| crate::error::DistEmbedError::IoError(e.to_string()))?;
        if needs_comma {
            write!(file, ",{object}").map_err(|e| crate::error::DistEmbedError::IoError(e.to_string()))
        } else {
            write!(file, "{object}").map_err(|e| crate::error::DistEmbedError::IoError(e.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pretty_duration_picks_the_right_unit() {
        assert_eq!(PrettyDuration(Duration::from_micros(500)).to_string(), "500µs");
        assert_eq!(PrettyDuration(Duration::from_millis(5)).to_string(), "5.00ms");
        assert_eq!(PrettyDuration(Duration::from_millis(1500)).to_string(), "1.50s ");
    }

    #[test]
    fn append_to_file_produces_a_valid_array_fragment() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("distembed_stats_{}.json", std::process::id()));
        std::fs::remove_file(&path).ok();

        let stats = RunStats {
            rank: 0,
            world_size: 1,
            iterations: 1,
            batch_size: 8,
            embedding_dim: 4,
            total_seconds: 1.0,
            comm_seconds: 0.1,
            compute_seconds: 0.9,
        };
        stats.append_to_file(path.to_str().unwrap()).unwrap();
        stats.append_to_file(path.to_str().unwrap()).unwrap();

        let fragment = std::fs::read_to_string(&path).unwrap();
        let wrapped = format!("[{fragment}]");
        let parsed: Vec<RunStats> = serde_json::from_str(&wrapped).unwrap();
        assert_eq!(parsed.len(), 2);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn run_stats_round_trip_json() {
        let stats = RunStats {
            rank: 0,
            world_size: 4,
            iterations: 10,
            batch_size: 128,
            embedding_dim: 128,
            total_seconds: 12.3,
            comm_seconds: 1.1,
            compute_seconds: 11.2,
        };
        let json = serde_json::to_string(&stats).unwrap();
        assert!(json.contains("\"rank\":0"));
    }
}
