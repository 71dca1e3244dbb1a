//! Cluster resolution within a block
//!
//! Members of a block are connected when their fingerprints are equal or
//! their titles score at or above the threshold. Connected components are
//! clusters; each cluster gets exactly one canonical record, and every new
//! member of the cluster is merged into it.

use crate::core::blocking::{Block, BlockKey};
use crate::core::fingerprint::Fingerprint;
use crate::core::merge::{merge_into, MemberRank, MergeChange, MergeConflictPolicy};
use crate::core::record::{CanonicalRecord, JobField, JobId, Observation};
use crate::core::similarity::{ScoreOutcome, SimilarityScorer, Threshold};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, warn};

/// Arena-backed disjoint-set forest
#[derive(Debug, Clone)]
pub struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl UnionFind {
    pub fn new(size: usize) -> Self {
        Self {
            parent: (0..size).collect(),
            rank: vec![0; size],
        }
    }

    pub fn find(&mut self, mut node: usize) -> usize {
        while self.parent[node] != node {
            self.parent[node] = self.parent[self.parent[node]];
            node = self.parent[node];
        }
        node
    }

    /// Join two sets, returning false when they were already joined
    pub fn union(&mut self, a: usize, b: usize) -> bool {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return false;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            std::cmp::Ordering::Less => self.parent[ra] = rb,
            std::cmp::Ordering::Greater => self.parent[rb] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] = self.rank[ra].saturating_add(1);
            }
        }
        true
    }

    /// Members grouped by set, each group and the group list in ascending order
    pub fn groups(&mut self) -> Vec<Vec<usize>> {
        let mut by_root: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for node in 0..self.parent.len() {
            let root = self.find(node);
            by_root.entry(root).or_default().push(node);
        }
        let mut groups: Vec<Vec<usize>> = by_root.into_values().collect();
        groups.sort_by_key(|group| group.first().copied());
        groups
    }
}

/// Clustering parameters
#[derive(Debug, Clone, Copy)]
pub struct ClusterSettings {
    pub threshold: Threshold,
    pub policy: MergeConflictPolicy,

    /// Skip scoring for members already matched by fingerprint
    pub exact_match_fast_path: bool,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            threshold: Threshold::TITLE_DEFAULT,
            policy: MergeConflictPolicy::default(),
            exact_match_fast_path: true,
        }
    }
}

/// A block member, addressed by its arena index
#[derive(Debug, Clone, Copy)]
pub enum Member<'a> {
    Existing(&'a CanonicalRecord),
    New(&'a Observation),
}

impl Member<'_> {
    pub fn title(&self) -> &str {
        match self {
            Member::Existing(record) => &record.title,
            Member::New(observation) => observation.title(),
        }
    }

    pub fn is_existing(&self) -> bool {
        matches!(self, Member::Existing(_))
    }

    pub fn rank(&self) -> MemberRank {
        match self {
            Member::Existing(record) => record.rank(),
            Member::New(observation) => observation.rank(),
        }
    }
}

/// Pair of members scored at or above the threshold
#[derive(Debug, Clone, PartialEq)]
pub struct MatchCandidate {
    pub left: usize,
    pub right: usize,
    pub score: f64,
}

/// Index of the canonical member: existing first, then by member rank
pub fn select_canonical(members: &[Member<'_>], cluster: &[usize]) -> Option<usize> {
    cluster
        .iter()
        .copied()
        .max_by(|a, b| {
            let (ma, mb) = (&members[*a], &members[*b]);
            (ma.is_existing(), ma.rank()).cmp(&(mb.is_existing(), mb.rank()))
        })
}

/// How a canonical record fared in a block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalStatus {
    Created,
    /// Field values changed
    Updated,
    /// Only sources, timestamps or audit data changed
    Refreshed,
    Unchanged,
}

/// Canonical record produced or touched by a cluster
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedCanonical {
    pub record: CanonicalRecord,
    pub status: CanonicalStatus,

    /// Fingerprints of the new observations folded into the record
    pub merged: Vec<Fingerprint>,

    pub changed_fields: BTreeSet<JobField>,
}

/// Cluster holding more than one existing canonical record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalOverlap {
    pub kept: JobId,
    pub others: Vec<JobId>,
}

/// Everything decided for one block
#[derive(Debug, Clone, PartialEq)]
pub struct BlockResolution {
    pub key: BlockKey,
    pub chunk: usize,

    /// One entry per cluster with new members, ordered by record id
    pub canonicals: Vec<ResolvedCanonical>,

    pub comparisons: usize,
    pub overlaps: Vec<CanonicalOverlap>,
}

impl BlockResolution {
    /// Records the store must write
    pub fn upserts(&self) -> impl Iterator<Item = &CanonicalRecord> {
        self.canonicals
            .iter()
            .filter(|c| c.status != CanonicalStatus::Unchanged)
            .map(|c| &c.record)
    }

    /// Fingerprints of every new observation in the block
    pub fn fingerprints(&self) -> impl Iterator<Item = &Fingerprint> {
        self.canonicals.iter().flat_map(|c| c.merged.iter())
    }
}

/// Connect members into clusters, returning the clusters and the number of scored pairs
pub fn find_clusters(
    members: &[Member<'_>],
    scorer: &dyn SimilarityScorer,
    settings: &ClusterSettings,
) -> (Vec<Vec<usize>>, usize) {
    let mut forest = UnionFind::new(members.len());
    let mut scored = vec![true; members.len()];

    let mut owners: HashMap<&Fingerprint, usize> = HashMap::new();
    for (index, member) in members.iter().enumerate() {
        match member {
            Member::Existing(record) => {
                for fingerprint in &record.member_fingerprints {
                    owners.entry(fingerprint).or_insert(index);
                }
            }
            Member::New(observation) => match owners.get(&observation.fingerprint) {
                Some(&owner) => {
                    forest.union(owner, index);
                    scored[index] = !settings.exact_match_fast_path;
                    debug!(
                        fingerprint = observation.fingerprint.short(),
                        "Exact fingerprint match"
                    );
                }
                None => {
                    owners.insert(&observation.fingerprint, index);
                }
            },
        }
    }

    let mut comparisons = 0;
    for i in 0..members.len() {
        if !scored[i] {
            continue;
        }
        for j in (i + 1)..members.len() {
            if !scored[j] || (members[i].is_existing() && members[j].is_existing()) {
                continue;
            }
            if forest.find(i) == forest.find(j) {
                continue;
            }

            comparisons += 1;
            let outcome = scorer.score(members[i].title(), members[j].title());
            let score = match &outcome {
                ScoreOutcome::Matched(score) => *score,
                ScoreOutcome::Unavailable(reason) => {
                    debug!(
                        scorer = scorer.name(),
                        "Score unavailable for '{}' / '{}': {}",
                        members[i].title(),
                        members[j].title(),
                        reason
                    );
                    0.0
                }
            };

            if settings.threshold.accepts(score) {
                debug!(
                    score,
                    "Matched '{}' with '{}'",
                    members[i].title(),
                    members[j].title()
                );
                forest.union(i, j);
            }
        }
    }

    (forest.groups(), comparisons)
}

/// Resolve one block into canonical records
pub fn resolve_block(
    block: &Block,
    scorer: &dyn SimilarityScorer,
    settings: &ClusterSettings,
) -> BlockResolution {
    let members: Vec<Member<'_>> = block
        .existing
        .iter()
        .map(Member::Existing)
        .chain(block.new.iter().map(Member::New))
        .collect();

    let (clusters, comparisons) = find_clusters(&members, scorer, settings);

    let mut canonicals = Vec::new();
    let mut overlaps = Vec::new();

    for cluster in clusters {
        let mut new_members: Vec<&Observation> = cluster
            .iter()
            .filter_map(|index| match members[*index] {
                Member::New(observation) => Some(observation),
                Member::Existing(_) => None,
            })
            .collect();
        if new_members.is_empty() {
            continue;
        }
        new_members.sort_by(|a, b| a.fingerprint.cmp(&b.fingerprint));

        let Some(chosen) = select_canonical(&members, &cluster) else {
            continue;
        };

        let extra_existing: Vec<JobId> = cluster
            .iter()
            .filter(|index| **index != chosen)
            .filter_map(|index| match members[*index] {
                Member::Existing(record) => Some(record.id.clone()),
                Member::New(_) => None,
            })
            .collect();

        let (mut record, mut status) = match members[chosen] {
            Member::Existing(record) => (record.clone(), CanonicalStatus::Unchanged),
            Member::New(observation) => (
                CanonicalRecord::from_observation(observation),
                CanonicalStatus::Created,
            ),
        };

        if !extra_existing.is_empty() {
            warn!(
                block = %block.key,
                kept = %record.id,
                others = extra_existing.len(),
                "Cluster spans several existing canonical records, leaving the others unchanged"
            );
            overlaps.push(CanonicalOverlap {
                kept: record.id.clone(),
                others: extra_existing,
            });
        }

        // A stored fingerprint without a connector timestamp is a re-sighting,
        // merged as of the canonical's last sighting
        let stored = match members[chosen] {
            Member::Existing(existing) => {
                Some((&existing.member_fingerprints, existing.last_seen))
            }
            Member::New(_) => None,
        };

        let mut total = MergeChange::default();
        for observation in &new_members {
            let resighting = stored.and_then(|(fingerprints, last_seen)| {
                (observation.record.observed_at.is_none()
                    && fingerprints.contains(&observation.fingerprint))
                .then(|| Observation {
                    observed_at: last_seen,
                    ..Observation::clone(observation)
                })
            });
            let member = resighting.as_ref().unwrap_or(*observation);
            let change = merge_into(&mut record, member, settings.policy);
            total.fields.extend(change.fields);
            total.bookkeeping |= change.bookkeeping;
        }

        if status == CanonicalStatus::Unchanged {
            status = if total.changes_fields() {
                CanonicalStatus::Updated
            } else if total.bookkeeping {
                CanonicalStatus::Refreshed
            } else {
                CanonicalStatus::Unchanged
            };
        }

        canonicals.push(ResolvedCanonical {
            record,
            status,
            merged: new_members.iter().map(|o| o.fingerprint.clone()).collect(),
            changed_fields: total.fields.into_iter().collect(),
        });
    }

    canonicals.sort_by(|a, b| a.record.id.cmp(&b.record.id));

    BlockResolution {
        key: block.key.clone(),
        chunk: block.chunk,
        canonicals,
        comparisons,
        overlaps,
    }
}
