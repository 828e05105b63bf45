// src/bench.rs
// Repeated-execution benchmark harness for pipelines

use crate::document::Document;
use crate::error::{PipeError, Result};
use crate::log_info;
use crate::pipeline::Pipeline;
use crate::store::DocumentStore;
use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};

/// One timed pipeline execution
#[derive(Debug, Clone)]
pub struct Sample {
    pub iteration: usize,
    pub elapsed: Duration,
    pub result_count: usize,
}

/// Aggregate timing report over all iterations
#[derive(Debug, Clone)]
pub struct BenchmarkReport {
    pub samples: Vec<Sample>,
    pub mean: Duration,
    pub min: Duration,
    pub max: Duration,
    pub mean_result_count: f64,
}

impl BenchmarkReport {
    fn from_samples(samples: Vec<Sample>) -> Self {
        let total: Duration = samples.iter().map(|s| s.elapsed).sum();
        let mean = total / samples.len() as u32;
        let min = samples.iter().map(|s| s.elapsed).min().unwrap_or_default();
        let max = samples.iter().map(|s| s.elapsed).max().unwrap_or_default();
        let mean_result_count = samples.iter().map(|s| s.result_count as f64).sum::<f64>()
            / samples.len() as f64;
        BenchmarkReport {
            samples,
            mean,
            min,
            max,
            mean_result_count,
        }
    }
}

/// Run `pipeline` against `source` a fixed number of times, timing each
/// execution wall-clock.
///
/// Each iteration fixes its own "now", so relative-date windows track
/// the clock across a long benchmark run. Fails fast on the first
/// iteration error; zero iterations is an error rather than an empty
/// report.
pub fn run_benchmark(
    store: &DocumentStore,
    pipeline: &Pipeline,
    source: &str,
    iterations: usize,
) -> Result<BenchmarkReport> {
    if iterations == 0 {
        return Err(PipeError::Benchmark(
            "iteration count must be at least 1".to_string(),
        ));
    }

    let mut samples = Vec::with_capacity(iterations);
    for iteration in 0..iterations {
        let (elapsed, results) = time_run(store, pipeline, source, Utc::now())?;
        log_info!(
            "iteration {}: {} ms, {} results",
            iteration + 1,
            elapsed.as_millis(),
            results.len()
        );
        samples.push(Sample {
            iteration,
            elapsed,
            result_count: results.len(),
        });
    }
    Ok(BenchmarkReport::from_samples(samples))
}

/// Single timed execution with an injected clock.
pub fn time_run(
    store: &DocumentStore,
    pipeline: &Pipeline,
    source: &str,
    now: DateTime<Utc>,
) -> Result<(Duration, Vec<Document>)> {
    let start = Instant::now();
    let results = pipeline.run_at(store, source, now)?;
    Ok((start.elapsed(), results))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;
    use serde_json::json;

    fn tiny_store() -> DocumentStore {
        let mut store = DocumentStore::new();
        store.insert_collection(
            "orders",
            vec![
                doc! { "productName" => "A", "price" => 20.0 },
                doc! { "productName" => "B", "price" => 5.0 },
            ],
        );
        store
    }

    fn count_pipeline() -> Pipeline {
        Pipeline::from_json(&json!([
            {"$match": {"price": {"$gt": 10}}},
            {"$group": {"_id": "$productName", "totalOrders": {"$sum": 1}}}
        ]))
        .unwrap()
    }

    #[test]
    fn test_zero_iterations_rejected() {
        let result = run_benchmark(&tiny_store(), &count_pipeline(), "orders", 0);
        assert!(matches!(result, Err(PipeError::Benchmark(_))));
    }

    #[test]
    fn test_report_shape() {
        let report = run_benchmark(&tiny_store(), &count_pipeline(), "orders", 5).unwrap();
        assert_eq!(report.samples.len(), 5);
        assert!(report.min <= report.mean);
        assert!(report.mean <= report.max);
        assert_eq!(report.mean_result_count, 1.0);
        for (i, sample) in report.samples.iter().enumerate() {
            assert_eq!(sample.iteration, i);
            assert_eq!(sample.result_count, 1);
        }
    }

    #[test]
    fn test_benchmark_propagates_pipeline_errors() {
        let report = run_benchmark(&tiny_store(), &count_pipeline(), "missing", 3);
        assert!(matches!(report, Err(PipeError::CollectionNotFound(_))));
    }
}
