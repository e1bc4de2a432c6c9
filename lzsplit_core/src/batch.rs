//! Many independent passes at once.
//!
//! Each job gets its own [`Pipeline`] (and so its own cursor and index);
//! jobs share nothing but the providers, the codec and the cancel token.

use std::path::Path;
use std::sync::Arc;

use rayon::prelude::*;
use tracing::{info, warn};

use crate::cancel::CancelToken;
use crate::codec::Codec;
use crate::config::Settings;
use crate::error::{Error, Result};
use crate::pipeline::{ArtifactPair, Pipeline, PipelineFailure};
use crate::storage::StreamProvider;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchJob {
    pub source_path: String,
    pub destination_path: String,
}

#[derive(Debug)]
pub struct BatchOutcome {
    pub job: BatchJob,
    pub result: std::result::Result<ArtifactPair, PipelineFailure>,
}

impl BatchOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// One job per regular file directly inside `src_dir`, sorted by file name.
/// Each destination is `dest_dir/<file name>`.
pub fn jobs_for_dir(src_dir: impl AsRef<Path>, dest_dir: impl AsRef<Path>) -> Result<Vec<BatchJob>> {
    let (src_dir, dest_dir) = (src_dir.as_ref(), dest_dir.as_ref());
    let mut jobs = Vec::new();
    for entry in std::fs::read_dir(src_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name();
        let source = entry.path();
        let dest = dest_dir.join(&name);
        let (Some(source), Some(dest)) = (source.to_str(), dest.to_str()) else {
            return Err(Error::Config(format!(
                "non UTF-8 file name in {}: {name:?}",
                src_dir.display()
            )));
        };
        jobs.push(BatchJob {
            source_path: source.to_string(),
            destination_path: dest.to_string(),
        });
    }
    jobs.sort_by(|a, b| a.source_path.cmp(&b.source_path));
    Ok(jobs)
}

/// Run `jobs` on a pool of `settings.batch.parallelism` threads.
///
/// Outcomes come back in job order. A failed job does not stop the others;
/// cancelling `cancel` stops them all.
pub fn run_batch(
    jobs: Vec<BatchJob>,
    settings: &Settings,
    codec: Arc<dyn Codec>,
    source: Arc<dyn StreamProvider>,
    sink: Arc<dyn StreamProvider>,
    cancel: &CancelToken,
) -> Result<Vec<BatchOutcome>> {
    settings.validate()?;
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(settings.batch.parallelism)
        .thread_name(|i| format!("lzsplit-batch-{i}"))
        .build()
        .map_err(|e| Error::Config(format!("cannot build batch pool: {e}")))?;

    info!(
        jobs = jobs.len(),
        parallelism = settings.batch.parallelism,
        codec = codec.name(),
        "starting batch"
    );
    let outcomes: Vec<BatchOutcome> = pool.install(|| {
        jobs.into_par_iter()
            .map(|job| {
                let config = settings.pipeline_config(&job.source_path, &job.destination_path);
                let mut pipeline = Pipeline::new(config, codec.clone(), source.clone(), sink.clone());
                let result = pipeline.run(cancel);
                if let Err(failure) = &result {
                    warn!(source = %job.source_path, %failure, "batch job failed");
                }
                BatchOutcome { job, result }
            })
            .collect()
    });

    let failed = outcomes.iter().filter(|o| !o.is_ok()).count();
    info!(total = outcomes.len(), failed, "batch finished");
    Ok(outcomes)
}
