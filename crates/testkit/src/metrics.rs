//! Metrics reports for worldtests.
//!
//! Each worldtest writes one JSON report under `target/metrics/` so CI can
//! track generation cost, residency churn and persistence throughput.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tileworld_world::LifecycleReport;

/// One worldtest run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsReport {
    /// Name of the worldtest.
    pub test_name: String,
    /// When the report was built, RFC 3339.
    pub timestamp: String,
    /// Commit under test, when the runner knows it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_hash: Option<String>,
    /// Verdict.
    pub result: TestResult,
    /// Tile generation section.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terrain: Option<TerrainMetrics>,
    /// Residency churn section.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lifecycle: Option<LifecycleMetrics>,
    /// Save/load section.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistence: Option<PersistenceMetrics>,
    /// Timing and assertion counts.
    pub test_execution: TestExecutionMetrics,
}

/// Worldtest verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestResult {
    /// Every validation held.
    Pass,
    /// At least one validation failed.
    Fail,
    /// The run did not apply on this machine.
    Skip,
}

impl TestResult {
    /// `Pass` when `passed`, `Fail` otherwise.
    pub fn from_passed(passed: bool) -> Self {
        if passed {
            TestResult::Pass
        } else {
            TestResult::Fail
        }
    }
}

/// Tile generation cost and quality.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TerrainMetrics {
    /// Tiles generated.
    pub tiles_generated: usize,
    /// Height samples across all tiles.
    pub vertices_generated: usize,
    /// Mean time per tile, microseconds.
    pub avg_gen_time_us: f64,
    /// Fastest tile, microseconds.
    pub min_gen_time_us: u128,
    /// Slowest tile, microseconds.
    pub max_gen_time_us: u128,
    /// Sum over all tiles, milliseconds.
    pub total_gen_time_ms: f64,
    /// Throughput.
    pub tiles_per_second: f64,
    /// Distinct biomes seen.
    pub unique_biomes: usize,
    /// Continuity of shared edges.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seam_validation: Option<SeamValidation>,
}

impl TerrainMetrics {
    /// Timing statistics over per-tile generation times in microseconds.
    pub fn from_timings(gen_times_us: &[u128], vertices_generated: usize, unique_biomes: usize) -> Self {
        let total_us: u128 = gen_times_us.iter().sum();
        let tiles = gen_times_us.len();
        Self {
            tiles_generated: tiles,
            vertices_generated,
            avg_gen_time_us: total_us as f64 / tiles.max(1) as f64,
            min_gen_time_us: gen_times_us.iter().copied().min().unwrap_or_default(),
            max_gen_time_us: gen_times_us.iter().copied().max().unwrap_or_default(),
            total_gen_time_ms: total_us as f64 / 1_000.0,
            tiles_per_second: tiles as f64 * 1_000_000.0 / total_us.max(1) as f64,
            unique_biomes,
            seam_validation: None,
        }
    }
}

/// Shared-edge continuity results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeamValidation {
    /// Edges checked.
    pub total_seams: usize,
    /// Edges within tolerance.
    pub seams_valid: usize,
    /// Edges outside tolerance.
    pub seams_failed: usize,
    /// Largest height step across an edge, metres.
    pub max_seam_diff: f64,
}

/// Residency churn across a scripted run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LifecycleMetrics {
    /// Passes run.
    pub passes: usize,
    /// Largest resident table after any pass.
    pub peak_resident: usize,
    /// Tiles built from noise.
    pub tiles_generated: usize,
    /// Tiles brought back from the outbox or archive.
    pub tiles_restored: usize,
    /// Tiles read from a store.
    pub tiles_loaded: usize,
    /// Tiles dropped from residency.
    pub tiles_evicted: usize,
    /// Mean pass time, microseconds.
    pub avg_pass_time_us: f64,
}

impl LifecycleMetrics {
    /// Fold one pass into the totals.
    pub fn record(&mut self, report: &LifecycleReport, elapsed: Duration) {
        let total_us = self.avg_pass_time_us * self.passes as f64 + elapsed.as_micros() as f64;
        self.passes += 1;
        self.avg_pass_time_us = total_us / self.passes as f64;
        self.peak_resident = self.peak_resident.max(report.resident);
        self.tiles_generated += report.generated;
        self.tiles_restored += report.restored;
        self.tiles_loaded += report.loaded;
        self.tiles_evicted += report.evicted;
    }
}

/// Save/load throughput.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersistenceMetrics {
    /// Records written.
    pub tiles_saved: usize,
    /// Records read back.
    pub tiles_loaded: usize,
    /// Writes that failed and were requeued.
    pub failed_writes: usize,
    /// Mean write time per record, microseconds.
    pub avg_save_time_us: f64,
    /// Mean read time per record, microseconds.
    pub avg_load_time_us: f64,
    /// Size of the save directory after the run.
    pub bytes_written: u64,
    /// World version of the last snapshot.
    pub world_version: u64,
}

/// Timing and assertion counts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestExecutionMetrics {
    /// Wall time of the whole test, seconds.
    pub duration_seconds: f64,
    /// Checks performed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assertions_checked: Option<usize>,
    /// Checks that held.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validations_passed: Option<usize>,
}

impl TestExecutionMetrics {
    /// Execution summary with `failed` of `checked` checks failing.
    pub fn counted(elapsed: Duration, checked: usize, failed: usize) -> Self {
        Self {
            duration_seconds: elapsed.as_secs_f64(),
            assertions_checked: Some(checked),
            validations_passed: Some(checked.saturating_sub(failed)),
        }
    }
}

/// Chained construction of a [`MetricsReport`]. Starts as a passing report
/// with no sections.
pub struct MetricsReportBuilder {
    report: MetricsReport,
}

impl MetricsReportBuilder {
    /// Report for `test_name`, stamped now.
    pub fn new(test_name: impl Into<String>) -> Self {
        Self {
            report: MetricsReport {
                test_name: test_name.into(),
                timestamp: chrono::Utc::now().to_rfc3339(),
                commit_hash: None,
                result: TestResult::Pass,
                terrain: None,
                lifecycle: None,
                persistence: None,
                test_execution: TestExecutionMetrics::default(),
            },
        }
    }

    /// Verdict.
    pub fn result(mut self, result: TestResult) -> Self {
        self.report.result = result;
        self
    }

    /// Commit under test.
    pub fn commit_hash(mut self, hash: impl Into<String>) -> Self {
        self.report.commit_hash = Some(hash.into());
        self
    }

    /// Attach the terrain section.
    pub fn terrain(mut self, metrics: TerrainMetrics) -> Self {
        self.report.terrain = Some(metrics);
        self
    }

    /// Attach the lifecycle section.
    pub fn lifecycle(mut self, metrics: LifecycleMetrics) -> Self {
        self.report.lifecycle = Some(metrics);
        self
    }

    /// Attach the persistence section.
    pub fn persistence(mut self, metrics: PersistenceMetrics) -> Self {
        self.report.persistence = Some(metrics);
        self
    }

    /// Timing and assertion counts.
    pub fn execution(mut self, metrics: TestExecutionMetrics) -> Self {
        self.report.test_execution = metrics;
        self
    }

    /// Finished report.
    pub fn build(self) -> MetricsReport {
        self.report
    }
}

/// Writes reports as pretty JSON to one file.
pub struct MetricsSink {
    path: PathBuf,
}

impl MetricsSink {
    /// Sink writing to `path`; parent directories are created.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        Ok(Self { path })
    }

    /// Sink at `<target>/metrics/<test_name>.json`, honouring
    /// `CARGO_TARGET_DIR` and falling back to `./target`.
    pub fn for_test(test_name: &str) -> Result<Self> {
        let target = match std::env::var_os("CARGO_TARGET_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => std::env::current_dir()?.join("target"),
        };
        Self::create(target.join("metrics").join(format!("{test_name}.json")))
    }

    /// Where reports land.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the file with `report`. Readers never see a half-written file.
    pub fn write(&self, report: &MetricsReport) -> Result<()> {
        let json = serde_json::to_vec_pretty(report)?;
        let staged = self.path.with_extension("json.tmp");
        fs::write(&staged, json).with_context(|| format!("Failed to write {}", staged.display()))?;
        fs::rename(&staged, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::temp_world_dir;

    #[test]
    fn timing_stats_cover_the_samples() {
        let metrics = TerrainMetrics::from_timings(&[400, 900, 2_000], 3 * 1024, 2);
        assert_eq!(metrics.tiles_generated, 3);
        assert_eq!(metrics.min_gen_time_us, 400);
        assert_eq!(metrics.max_gen_time_us, 2_000);
        assert!((metrics.avg_gen_time_us - 1_100.0).abs() < 1e-9);
        assert!((metrics.total_gen_time_ms - 3.3).abs() < 1e-9);

        let empty = TerrainMetrics::from_timings(&[], 0, 0);
        assert_eq!(empty.avg_gen_time_us, 0.0);
        assert_eq!(empty.max_gen_time_us, 0);
    }

    #[test]
    fn lifecycle_totals_accumulate() {
        let mut metrics = LifecycleMetrics::default();
        let first = LifecycleReport {
            generated: 25,
            resident: 25,
            ..LifecycleReport::default()
        };
        let second = LifecycleReport {
            generated: 5,
            evicted: 5,
            resident: 25,
            ..LifecycleReport::default()
        };
        metrics.record(&first, Duration::from_micros(300));
        metrics.record(&second, Duration::from_micros(100));

        assert_eq!(metrics.passes, 2);
        assert_eq!(metrics.tiles_generated, 30);
        assert_eq!(metrics.tiles_evicted, 5);
        assert_eq!(metrics.peak_resident, 25);
        assert!((metrics.avg_pass_time_us - 200.0).abs() < 1e-9);
    }

    #[test]
    fn sink_writes_only_present_sections() {
        let dir = temp_world_dir("metrics");
        let sink = MetricsSink::create(dir.join("nested/report.json")).unwrap();
        let report = MetricsReportBuilder::new("sink_test")
            .result(TestResult::Skip)
            .lifecycle(LifecycleMetrics {
                passes: 4,
                ..LifecycleMetrics::default()
            })
            .execution(TestExecutionMetrics::counted(Duration::from_millis(5), 3, 1))
            .build();
        sink.write(&report).unwrap();

        let contents = fs::read_to_string(sink.path()).unwrap();
        assert!(contents.contains("\"result\": \"skip\""));
        assert!(!contents.contains("terrain"));
        let parsed: MetricsReport = serde_json::from_str(&contents).unwrap();
        assert_eq!(parsed.lifecycle.unwrap().passes, 4);
        assert_eq!(parsed.test_execution.validations_passed, Some(2));

        fs::remove_dir_all(&dir).ok();
    }
}
