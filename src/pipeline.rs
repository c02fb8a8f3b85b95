//! Pipeline orchestration: partition catalogues into page jobs and drain
//! them through a bounded worker pool.
//!
//! A fixed number of workers pull [`PageJob`]s from a shared queue. Each
//! worker fetches its page, classifies record references, resolves
//! matching ones against the map service, optionally validates the
//! resolved layer, and sends the flattened batch over an mpsc channel to
//! the single writer task that owns the CSV sink. Batches may arrive in
//! any order; row order within a batch follows the page's record order.

use anyhow::{bail, Result};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

use crate::config::{Config, GetMapConfig};
use crate::csw::{CatalogueClient, ProbeResult};
use crate::matcher::resolve;
use crate::models::{ServiceType, ValidationResult};
use crate::sink::{flatten_row, CsvSink, HarvestRow, OUTPUT_CSV};
use crate::validate::validate;
use crate::wms::{MapClient, RenderRequest};

/// Per-run options fixed at start; the only state shared between jobs.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Service type a reference must classify as to be resolved.
    pub target: ServiceType,
    /// Cap on records harvested per catalogue. 0 means no limit.
    pub record_limit: u64,
    /// Issue sample GetMap requests for resolved layers.
    pub validate_layers: bool,
    pub out_dir: PathBuf,
}

/// Counts reported at the end of a run.
#[derive(Debug)]
pub struct RunSummary {
    pub endpoints: usize,
    pub endpoints_failed: usize,
    pub jobs: usize,
    pub jobs_failed: u64,
    pub rows_written: u64,
    /// Map-service URLs that appeared in more than one output row.
    pub duplicate_services: Vec<String>,
    pub output_csv: PathBuf,
}

/// Lifecycle of one page job, for log visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobStage {
    Queued,
    Fetching,
    Classifying,
    Resolving,
    Validating,
    Flattened,
    Delivered,
    Failed,
}

impl fmt::Display for JobStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStage::Queued => "queued",
            JobStage::Fetching => "fetching",
            JobStage::Classifying => "classifying",
            JobStage::Resolving => "resolving",
            JobStage::Validating => "validating",
            JobStage::Flattened => "flattened",
            JobStage::Delivered => "delivered",
            JobStage::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// One catalogue endpoint in a run. A page-fetch failure flips `failed`
/// and ends that endpoint's harvest; sibling jobs short-circuit.
struct Endpoint {
    url: String,
    failed: AtomicBool,
}

/// One page of one endpoint's catalogue, independent of all other jobs.
struct PageJob {
    endpoint: Arc<Endpoint>,
    offset: u64,
    page_size: u64,
}

/// Partition a probed catalogue into `(offset, page_size)` pairs.
///
/// A caller-supplied limit smaller than the discovered total caps the
/// total; a limit smaller than the page size also shrinks the per-page
/// size so small requests do not over-fetch.
pub fn plan_pages(probe: &ProbeResult, limit: u64) -> Vec<(u64, u64)> {
    let mut total = probe.total_matches;
    let mut page_size = probe.page_size.max(1);

    if limit > 0 {
        if limit < total {
            total = limit;
        }
        if limit < page_size {
            page_size = limit;
        }
    }

    (0..total)
        .step_by(page_size as usize)
        .map(|offset| (offset, page_size.min(total - offset)))
        .collect()
}

/// Create the output directory, optionally purging anything left in it
/// from a previous run.
pub fn prepare_output_dir(path: &Path, purge: bool) -> Result<()> {
    std::fs::create_dir_all(path)?;
    if purge {
        for entry in std::fs::read_dir(path)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                std::fs::remove_dir_all(entry.path())?;
            } else {
                std::fs::remove_file(entry.path())?;
            }
        }
    }
    Ok(())
}

/// Shared read-only context handed to every worker.
struct WorkerContext {
    target: ServiceType,
    validate_layers: bool,
    out_dir: PathBuf,
    getmap: GetMapConfig,
    jobs_failed: AtomicU64,
}

/// Run the full harvest over all endpoints.
///
/// Always produces a (possibly partial) CSV; the run fails only when
/// every configured endpoint fails its probe.
pub async fn run_harvest(
    catalogue: Arc<dyn CatalogueClient>,
    maps: Arc<dyn MapClient>,
    config: &Config,
    endpoints: &[String],
    options: &RunOptions,
) -> Result<RunSummary> {
    if endpoints.is_empty() {
        bail!("no catalogue endpoints configured");
    }

    // Probe each endpoint and build the job queue up front.
    let mut jobs: VecDeque<PageJob> = VecDeque::new();
    let mut endpoints_failed = 0usize;
    for url in endpoints {
        match catalogue.probe(url).await {
            Ok(probe) => {
                let pages = plan_pages(&probe, options.record_limit);
                info!(
                    endpoint = url.as_str(),
                    total = probe.total_matches,
                    page_size = probe.page_size,
                    jobs = pages.len(),
                    "catalogue probed"
                );
                let endpoint = Arc::new(Endpoint {
                    url: url.clone(),
                    failed: AtomicBool::new(false),
                });
                for (offset, page_size) in pages {
                    debug!(endpoint = url.as_str(), offset, page_size, stage = %JobStage::Queued, "page job planned");
                    jobs.push_back(PageJob {
                        endpoint: Arc::clone(&endpoint),
                        offset,
                        page_size,
                    });
                }
            }
            Err(e) => {
                warn!(endpoint = url.as_str(), error = %e, "catalogue unavailable, skipping");
                endpoints_failed += 1;
            }
        }
    }

    if endpoints_failed == endpoints.len() {
        bail!("all {} catalogue endpoint(s) were unavailable", endpoints.len());
    }

    let job_count = jobs.len();
    let output_csv = options.out_dir.join(OUTPUT_CSV);
    let sink = CsvSink::create(&output_csv)?;

    let workers = config.harvest.workers.max(1);
    let (tx, mut rx) = mpsc::channel::<Vec<HarvestRow>>(workers * 2);

    // Single writer task owns the sink; no lock around the file.
    let writer = tokio::spawn(async move {
        let mut sink = sink;
        let mut rows_written = 0u64;
        let mut service_counts: HashMap<String, u64> = HashMap::new();
        while let Some(batch) = rx.recv().await {
            for row in &batch {
                *service_counts.entry(row.wms_url.clone()).or_insert(0) += 1;
            }
            match sink.append(&batch) {
                Ok(()) => rows_written += batch.len() as u64,
                Err(e) => error!(error = %e, "failed to append batch"),
            }
        }
        let mut duplicates: Vec<String> = service_counts
            .into_iter()
            .filter(|(_, count)| *count > 1)
            .map(|(url, _)| url)
            .collect();
        duplicates.sort();
        (rows_written, duplicates)
    });

    let queue = Arc::new(Mutex::new(jobs));
    let context = Arc::new(WorkerContext {
        target: options.target,
        validate_layers: options.validate_layers,
        out_dir: options.out_dir.clone(),
        getmap: config.getmap.clone(),
        jobs_failed: AtomicU64::new(0),
    });

    let mut handles = Vec::with_capacity(workers);
    for worker_id in 0..workers {
        let queue = Arc::clone(&queue);
        let context = Arc::clone(&context);
        let catalogue = Arc::clone(&catalogue);
        let maps = Arc::clone(&maps);
        let tx = tx.clone();
        handles.push(tokio::spawn(async move {
            loop {
                let job = { queue.lock().await.pop_front() };
                let Some(job) = job else { break };

                if job.endpoint.failed.load(Ordering::SeqCst) {
                    debug!(
                        worker = worker_id,
                        endpoint = job.endpoint.url.as_str(),
                        offset = job.offset,
                        stage = %JobStage::Failed,
                        "endpoint already failed, skipping page"
                    );
                    context.jobs_failed.fetch_add(1, Ordering::SeqCst);
                    continue;
                }

                match process_job(&*catalogue, &*maps, &context, &job).await {
                    Ok(rows) => {
                        if !rows.is_empty() && tx.send(rows).await.is_err() {
                            break;
                        }
                        debug!(
                            worker = worker_id,
                            endpoint = job.endpoint.url.as_str(),
                            offset = job.offset,
                            stage = %JobStage::Delivered,
                            "page job done"
                        );
                    }
                    Err(e) => {
                        warn!(
                            worker = worker_id,
                            endpoint = job.endpoint.url.as_str(),
                            offset = job.offset,
                            stage = %JobStage::Failed,
                            error = %e,
                            "page fetch failed, ending this endpoint's harvest"
                        );
                        job.endpoint.failed.store(true, Ordering::SeqCst);
                        context.jobs_failed.fetch_add(1, Ordering::SeqCst);
                    }
                }
            }
        }));
    }
    drop(tx);

    for handle in handles {
        let _ = handle.await;
    }
    let (rows_written, duplicate_services) = writer.await?;

    Ok(RunSummary {
        endpoints: endpoints.len(),
        endpoints_failed,
        jobs: job_count,
        jobs_failed: context.jobs_failed.load(Ordering::SeqCst),
        rows_written,
        duplicate_services,
        output_csv,
    })
}

/// Process one page: fetch, classify, resolve, validate, flatten.
async fn process_job(
    catalogue: &dyn CatalogueClient,
    maps: &dyn MapClient,
    context: &WorkerContext,
    job: &PageJob,
) -> Result<Vec<HarvestRow>, crate::error::CatalogueError> {
    let endpoint = job.endpoint.url.as_str();
    debug!(endpoint, offset = job.offset, stage = %JobStage::Fetching, "page job started");

    let records = catalogue
        .fetch_page(endpoint, job.offset, job.page_size)
        .await?;

    debug!(
        endpoint,
        offset = job.offset,
        records = records.len(),
        stage = %JobStage::Classifying,
        "page fetched"
    );

    let mut rows = Vec::new();
    for record in &records {
        let title = record.title.as_deref().unwrap_or_default();
        for reference in &record.references {
            if reference.service_type != context.target {
                debug!(
                    url = reference.url.as_str(),
                    service_type = %reference.service_type,
                    "reference skipped"
                );
                continue;
            }

            debug!(endpoint, url = reference.url.as_str(), stage = %JobStage::Resolving, "resolving reference");
            let layer_match = resolve(maps, &reference.url, title).await;

            let validation = if !context.validate_layers {
                ValidationResult::skipped()
            } else {
                match (&layer_match.name, &layer_match.native_bbox) {
                    (Some(name), Some(native)) if !native.srs.is_empty() => {
                        debug!(endpoint, layer = name.as_str(), stage = %JobStage::Validating, "validating layer");
                        let request = RenderRequest {
                            layer: name.clone(),
                            bbox: native.bbox,
                            srs: native.srs.clone(),
                            width: context.getmap.width,
                            height: context.getmap.height,
                            format: context.getmap.format.clone(),
                        };
                        validate(maps, &reference.url, &request, &context.out_dir).await
                    }
                    // No usable layer or SRS: not requestable, not an error.
                    _ => ValidationResult::skipped(),
                }
            };

            rows.push(flatten_row(
                endpoint,
                record,
                reference,
                &layer_match,
                &validation,
            ));
        }
    }

    debug!(endpoint, offset = job.offset, rows = rows.len(), stage = %JobStage::Flattened, "page flattened");
    Ok(rows)
}
