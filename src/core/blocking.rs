//! Blocking index
//!
//! Records are only ever compared with records that share a coarse block key,
//! `(company_key, canton)`. Postings of the same company in different cantons,
//! or of companies whose names normalize differently, are never considered
//! duplicates of each other.

use crate::core::fingerprint::Fingerprint;
use crate::core::normalize::{canton_code, company_key};
use crate::core::record::{CanonicalRecord, Observation, RawRecord};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

/// Coarse comparison key
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockKey {
    pub company: String,
    pub canton: String,
}

impl BlockKey {
    pub fn new(company_name: Option<&str>, canton: Option<&str>) -> Self {
        Self {
            company: company_name.map(company_key).unwrap_or_default(),
            canton: canton_code(canton),
        }
    }

    pub fn of_record(record: &RawRecord) -> Self {
        Self::new(record.company_name.as_deref(), record.canton.as_deref())
    }
}

impl std::fmt::Display for BlockKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}|{}", self.company, self.canton)
    }
}

/// Anything that can be placed in a block
pub trait Blockable {
    fn block_key(&self) -> BlockKey;
}

impl Blockable for RawRecord {
    fn block_key(&self) -> BlockKey {
        BlockKey::of_record(self)
    }
}

impl Blockable for Observation {
    fn block_key(&self) -> BlockKey {
        BlockKey::of_record(&self.record)
    }
}

impl Blockable for CanonicalRecord {
    fn block_key(&self) -> BlockKey {
        self.block_key.clone()
    }
}

/// Block key of a record
pub fn block_key<T: Blockable>(record: &T) -> BlockKey {
    record.block_key()
}

/// Group records by block key
pub fn build_blocks<T: Blockable>(records: impl IntoIterator<Item = T>) -> BTreeMap<BlockKey, Vec<T>> {
    let mut blocks: BTreeMap<BlockKey, Vec<T>> = BTreeMap::new();
    for record in records {
        blocks.entry(record.block_key()).or_default().push(record);
    }
    blocks
}

/// Size limits applied while partitioning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockLimits {
    /// Blocks above this size are logged
    pub warn: usize,

    /// Blocks above this size are split into chunks of at most this many members
    pub cap: Option<usize>,
}

impl Default for BlockLimits {
    fn default() -> Self {
        Self {
            warn: 500,
            cap: None,
        }
    }
}

/// Unit of clustering work: new observations plus the canonicals they may join
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub key: BlockKey,

    /// Position of this chunk when the block was split, 0 otherwise
    pub chunk: usize,

    pub existing: Vec<CanonicalRecord>,
    pub new: Vec<Observation>,
}

impl Block {
    pub fn len(&self) -> usize {
        self.existing.len() + self.new.len()
    }

    pub fn is_empty(&self) -> bool {
        self.existing.is_empty() && self.new.is_empty()
    }
}

/// Block that exceeded the warning size
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OversizedBlock {
    pub key: BlockKey,
    pub size: usize,
    pub chunks: usize,
}

/// Result of partitioning a run into blocks
#[derive(Debug, Clone, Default)]
pub struct BlockPlan {
    /// Blocks in key order, chunks in chunk order
    pub blocks: Vec<Block>,
    pub oversized: Vec<OversizedBlock>,
}

/// Partition new observations into blocks alongside the existing canonicals
///
/// Blocks without any new observation are dropped since there is nothing to
/// resolve in them. Oversized blocks are split deterministically, existing
/// canonicals first (by id) and then new observations (by fingerprint). A new
/// observation always shares its chunk with the canonical or observation it
/// repeats, so a chunk can exceed the cap by its exact duplicates.
pub fn partition(
    observations: Vec<Observation>,
    existing: Vec<CanonicalRecord>,
    limits: BlockLimits,
) -> BlockPlan {
    let new_by_key = build_blocks(observations);
    let mut existing_by_key = build_blocks(existing);

    let mut plan = BlockPlan::default();
    for (key, mut new) in new_by_key {
        let mut existing = existing_by_key.remove(&key).unwrap_or_default();
        existing.sort_by(|a, b| a.id.cmp(&b.id));
        new.sort_by(|a, b| a.fingerprint.cmp(&b.fingerprint));

        let size = existing.len() + new.len();
        let cap = limits.cap.filter(|cap| *cap > 0 && size > *cap);

        let Some(cap) = cap else {
            if size > limits.warn {
                warn!(block = %key, size, "Oversized block");
                plan.oversized.push(OversizedBlock {
                    key: key.clone(),
                    size,
                    chunks: 1,
                });
            }
            plan.blocks.push(Block {
                key,
                chunk: 0,
                existing,
                new,
            });
            continue;
        };

        let chunks = split_block(&key, existing, new, cap);
        warn!(
            block = %key,
            size,
            cap,
            chunks = chunks.len(),
            "Oversized block split, members of different chunks are not compared"
        );
        plan.oversized.push(OversizedBlock {
            key,
            size,
            chunks: chunks.len(),
        });
        plan.blocks.extend(chunks);
    }

    plan
}

/// Members that must land in the same chunk: an existing canonical with the
/// new observations carrying one of its fingerprints, or new observations
/// sharing a fingerprint
struct Unit {
    existing: Option<CanonicalRecord>,
    new: Vec<Observation>,
}

impl Unit {
    fn len(&self) -> usize {
        usize::from(self.existing.is_some()) + self.new.len()
    }
}

fn group_units(existing: Vec<CanonicalRecord>, new: Vec<Observation>) -> Vec<Unit> {
    let mut owners: HashMap<Fingerprint, usize> = HashMap::new();
    let mut units: Vec<Unit> = Vec::new();

    for canonical in existing {
        for fingerprint in &canonical.member_fingerprints {
            owners.entry(fingerprint.clone()).or_insert(units.len());
        }
        units.push(Unit {
            existing: Some(canonical),
            new: Vec::new(),
        });
    }
    for observation in new {
        match owners.get(&observation.fingerprint) {
            Some(&owner) => units[owner].new.push(observation),
            None => {
                owners.insert(observation.fingerprint.clone(), units.len());
                units.push(Unit {
                    existing: None,
                    new: vec![observation],
                });
            }
        }
    }
    units
}

fn split_block(
    key: &BlockKey,
    existing: Vec<CanonicalRecord>,
    new: Vec<Observation>,
    cap: usize,
) -> Vec<Block> {
    let mut chunks: Vec<Block> = Vec::new();
    let mut current = Block {
        key: key.clone(),
        chunk: 0,
        existing: Vec::new(),
        new: Vec::new(),
    };

    for unit in group_units(existing, new) {
        if !current.is_empty() && current.len() + unit.len() > cap {
            let next = Block {
                key: key.clone(),
                chunk: current.chunk + 1,
                existing: Vec::new(),
                new: Vec::new(),
            };
            chunks.push(std::mem::replace(&mut current, next));
        }
        if unit.len() > cap {
            debug!(
                block = %key,
                size = unit.len(),
                cap,
                "Exact duplicates kept together above cap"
            );
        }
        current.existing.extend(unit.existing);
        current.new.extend(unit.new);
    }
    if !current.is_empty() {
        chunks.push(current);
    }

    // A chunk holding only existing canonicals has nothing to resolve
    chunks.retain(|chunk| !chunk.new.is_empty());
    chunks
}
