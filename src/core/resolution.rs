//! Batch resolution runs
//!
//! A run validates and fingerprints the incoming records, reads everything it
//! needs from the store up front, clusters blocks in parallel and then commits
//! block by block in key order. Once clustering starts no block reads shared
//! mutable state, so results do not depend on block or record order.

use crate::core::blocking::{partition, BlockKey, BlockLimits, Blockable, OversizedBlock};
use crate::core::cluster::{resolve_block, BlockResolution, CanonicalStatus, ClusterSettings};
use crate::core::embedding::{EmbeddingScorer, EmbeddingService};
use crate::core::fingerprint::Fingerprint;
use crate::core::record::{Observation, RawRecord, SkipReason};
use crate::core::service::{ResolutionConfig, ServiceError};
use crate::core::similarity::{FallbackScorer, SimilarityScorer};
use crate::core::store::RecordStore;
use crate::events::{EventBus, ResolutionEvent};
use chrono::Utc;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Counts reported at the end of a resolution run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolutionSummary {
    pub run_id: String,

    /// Records received
    pub processed: usize,

    /// Records excluded for missing required fields
    pub skipped: usize,
    pub skipped_by_reason: BTreeMap<SkipReason, usize>,

    /// Records whose fingerprint was already known
    pub exact_duplicates: usize,

    pub blocks: usize,
    pub comparisons: usize,

    /// Clusters containing at least one new record
    pub clusters: usize,

    pub new_canonicals: usize,

    /// Records folded into a canonical they did not found
    pub merged: usize,

    /// Existing canonicals whose field values changed
    pub updated: usize,

    /// Existing canonicals with only sources, timestamps or audit data changed
    pub refreshed: usize,

    pub unchanged: usize,
    pub overlaps: usize,
    pub oversized_blocks: Vec<OversizedBlock>,
}

/// Everything a run needs besides its input
pub struct ResolutionContext<'a> {
    pub store: &'a dyn RecordStore,
    pub scorer: Arc<dyn SimilarityScorer>,
    pub embeddings: Option<Arc<dyn EmbeddingService>>,
    pub config: &'a ResolutionConfig,
    pub events: Option<&'a EventBus>,
    pub cancel: CancellationToken,
}

/// Resolve a batch of raw records against the store
pub async fn run_resolution(
    records: Vec<RawRecord>,
    ctx: ResolutionContext<'_>,
) -> Result<ResolutionSummary, ServiceError> {
    let run_id = uuid::Uuid::new_v4().to_string();
    let now = Utc::now();
    let mut summary = ResolutionSummary {
        run_id: run_id.clone(),
        processed: records.len(),
        ..Default::default()
    };

    info!(run_id = %run_id, records = records.len(), "Starting resolution run");

    let mut observations = Vec::with_capacity(records.len());
    for record in records {
        match Observation::new(record, now) {
            Ok(observation) => observations.push(observation),
            Err(reason) => {
                debug!("Skipping record: {}", reason);
                summary.skipped += 1;
                *summary.skipped_by_reason.entry(reason).or_insert(0) += 1;
            }
        }
    }
    if summary.skipped > 0 {
        warn!(skipped = summary.skipped, "Skipped records with missing required fields");
    }

    if ctx.cancel.is_cancelled() {
        return Err(cancelled(Vec::new(), &observations));
    }

    // Exact-duplicate fast path, within the batch and against the store
    let distinct: BTreeSet<&Fingerprint> = observations.iter().map(|o| &o.fingerprint).collect();
    let known = if ctx.config.exact_match_fast_path {
        let distinct: Vec<Fingerprint> = distinct.into_iter().cloned().collect();
        ctx.store.get_existing_by_fingerprint(&distinct).await?
    } else {
        Default::default()
    };
    let mut seen: HashSet<&Fingerprint> = HashSet::new();
    for observation in &observations {
        let repeat = !seen.insert(&observation.fingerprint);
        if repeat || known.contains_key(&observation.fingerprint) {
            summary.exact_duplicates += 1;
        }
    }

    // Block snapshot, read once
    let keys: Vec<BlockKey> = observations
        .iter()
        .map(Blockable::block_key)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let existing = if keys.is_empty() {
        Vec::new()
    } else {
        ctx.store.get_canonicals_by_block(&keys).await?
    };
    debug!(blocks = keys.len(), existing = existing.len(), "Loaded block snapshot");

    let scorer = match &ctx.embeddings {
        Some(service) => {
            let titles = observations
                .iter()
                .map(|o| o.title().to_string())
                .chain(existing.iter().map(|c| c.title.clone()));
            let cached = EmbeddingScorer::prefetch(service.as_ref(), titles).await?;
            Arc::new(FallbackScorer::new(Arc::new(cached), ctx.scorer.clone()))
                as Arc<dyn SimilarityScorer>
        }
        None => ctx.scorer.clone(),
    };

    let limits = BlockLimits {
        warn: ctx.config.block_size_warn,
        cap: ctx.config.block_size_cap,
    };
    let plan = partition(observations, existing, limits);
    summary.blocks = plan.blocks.len();
    summary.oversized_blocks = plan.oversized;

    let settings = ClusterSettings {
        threshold: ctx.config.title_similarity_threshold,
        policy: ctx.config.merge_conflict_policy,
        exact_match_fast_path: ctx.config.exact_match_fast_path,
    };
    let blocks = plan.blocks;
    let resolutions: Vec<BlockResolution> = tokio::task::spawn_blocking(move || {
        blocks
            .par_iter()
            .map(|block| resolve_block(block, scorer.as_ref(), &settings))
            .collect()
    })
    .await
    .map_err(|e| ServiceError::Custom(format!("Clustering task failed: {}", e)))?;

    commit(&run_id, resolutions, &ctx, &mut summary).await?;

    info!(
        run_id = %run_id,
        processed = summary.processed,
        skipped = summary.skipped,
        exact_duplicates = summary.exact_duplicates,
        new_canonicals = summary.new_canonicals,
        merged = summary.merged,
        updated = summary.updated,
        "Resolution run complete"
    );
    if let Some(events) = ctx.events {
        events
            .publish_event(ResolutionEvent::RunCompleted {
                run_id: run_id.clone(),
                processed: summary.processed,
                new_canonicals: summary.new_canonicals,
                merged: summary.merged,
            })
            .await;
    }

    Ok(summary)
}

/// Write each block's records in key order, stopping at the first failure
async fn commit(
    run_id: &str,
    resolutions: Vec<BlockResolution>,
    ctx: &ResolutionContext<'_>,
    summary: &mut ResolutionSummary,
) -> Result<(), ServiceError> {
    let mut committed: Vec<Fingerprint> = Vec::new();

    for (position, resolution) in resolutions.iter().enumerate() {
        if ctx.cancel.is_cancelled() {
            let pending = pending_fingerprints(&resolutions[position..]);
            warn!(
                run_id,
                committed = committed.len(),
                pending = pending.len(),
                "Resolution run cancelled"
            );
            return Err(ServiceError::Cancelled { committed, pending });
        }

        let upserts: Vec<_> = resolution.upserts().cloned().collect();
        if !upserts.is_empty() {
            if let Err(e) = ctx.store.upsert_canonicals(&upserts).await {
                let pending = pending_fingerprints(&resolutions[position..]);
                warn!(
                    run_id,
                    block = %resolution.key,
                    committed = committed.len(),
                    pending = pending.len(),
                    "Store write failed, aborting run: {}",
                    e
                );
                return Err(ServiceError::RunAborted {
                    reason: e.to_string(),
                    committed,
                    pending,
                });
            }
        }
        committed.extend(resolution.fingerprints().cloned());

        tally(resolution, summary);
        if let Some(events) = ctx.events {
            publish_block(run_id, resolution, upserts.len(), events).await;
        }
    }

    Ok(())
}

fn tally(resolution: &BlockResolution, summary: &mut ResolutionSummary) {
    summary.comparisons += resolution.comparisons;
    summary.overlaps += resolution.overlaps.len();
    for canonical in &resolution.canonicals {
        summary.clusters += 1;
        match canonical.status {
            CanonicalStatus::Created => {
                summary.new_canonicals += 1;
                // the founding observation is not a merge
                summary.merged += canonical.merged.len().saturating_sub(1);
            }
            CanonicalStatus::Updated => {
                summary.updated += 1;
                summary.merged += canonical.merged.len();
            }
            CanonicalStatus::Refreshed => {
                summary.refreshed += 1;
                summary.merged += canonical.merged.len();
            }
            CanonicalStatus::Unchanged => summary.unchanged += 1,
        }
    }
}

async fn publish_block(run_id: &str, resolution: &BlockResolution, upserts: usize, events: &EventBus) {
    for canonical in &resolution.canonicals {
        let event = match canonical.status {
            CanonicalStatus::Created => ResolutionEvent::CanonicalCreated {
                run_id: run_id.to_string(),
                job_id: canonical.record.id.clone(),
                members: canonical.merged.clone(),
            },
            CanonicalStatus::Updated | CanonicalStatus::Refreshed => {
                ResolutionEvent::CanonicalMerged {
                    run_id: run_id.to_string(),
                    job_id: canonical.record.id.clone(),
                    members: canonical.merged.clone(),
                    changed_fields: canonical.changed_fields.clone(),
                }
            }
            CanonicalStatus::Unchanged => continue,
        };
        events.publish_event(event).await;
    }

    for overlap in &resolution.overlaps {
        events
            .publish_event(ResolutionEvent::CanonicalOverlap {
                run_id: run_id.to_string(),
                kept: overlap.kept.clone(),
                others: overlap.others.clone(),
            })
            .await;
    }

    events
        .publish_event(ResolutionEvent::BlockCommitted {
            run_id: run_id.to_string(),
            block: resolution.key.clone(),
            chunk: resolution.chunk,
            upserts,
        })
        .await;
}

fn pending_fingerprints(resolutions: &[BlockResolution]) -> Vec<Fingerprint> {
    resolutions
        .iter()
        .flat_map(|r| r.fingerprints().cloned())
        .collect()
}

fn cancelled(committed: Vec<Fingerprint>, observations: &[Observation]) -> ServiceError {
    ServiceError::Cancelled {
        committed,
        pending: observations.iter().map(|o| o.fingerprint.clone()).collect(),
    }
}
