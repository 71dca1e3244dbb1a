//! Field-level merge of cluster members into their canonical record
//!
//! Every field value on a canonical record carries a [`FieldProvenance`]:
//! whether the canonical had the value itself or adopted it from a member,
//! and the rank of whoever supplied it. Conflicts are decided by comparing
//! provenance, never by arrival order, so merging the same members in any
//! order yields the same record.

use crate::core::fingerprint::Fingerprint;
use crate::core::record::{CanonicalRecord, JobField, Observation};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::{Ordering, Reverse};

/// How conflicting values are reconciled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeConflictPolicy {
    /// Values the canonical had itself are never replaced
    #[default]
    KeepCanonical,

    /// The most recently observed value wins
    PreferMostRecent,
}

impl std::str::FromStr for MergeConflictPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "keep_canonical" => Ok(Self::KeepCanonical),
            "prefer_most_recent" => Ok(Self::PreferMostRecent),
            other => Err(format!("Unknown merge conflict policy: {}", other)),
        }
    }
}

/// Total precedence among cluster members
///
/// More complete beats less complete, then more recent beats older, then the
/// smaller fingerprint wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberRank {
    pub completeness: usize,
    pub observed_at: DateTime<Utc>,
    pub fingerprint: Fingerprint,
}

impl Ord for MemberRank {
    fn cmp(&self, other: &Self) -> Ordering {
        self.completeness
            .cmp(&other.completeness)
            .then(self.observed_at.cmp(&other.observed_at))
            .then_with(|| other.fingerprint.cmp(&self.fingerprint))
    }
}

impl PartialOrd for MemberRank {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Origin of a canonical field value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldProvenance {
    /// False when the value came with the canonical's founding observation
    pub adopted: bool,
    pub rank: MemberRank,
}

impl FieldProvenance {
    pub fn original(rank: MemberRank) -> Self {
        Self {
            adopted: false,
            rank,
        }
    }

    pub fn adopted(rank: MemberRank) -> Self {
        Self {
            adopted: true,
            rank,
        }
    }
}

/// Merge a member into a canonical record, returning the merged record
pub fn merge(
    mut canonical: CanonicalRecord,
    member: &Observation,
    policy: MergeConflictPolicy,
) -> CanonicalRecord {
    merge_into(&mut canonical, member, policy);
    canonical
}

/// What a merge changed on the canonical record
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeChange {
    /// Fields whose value changed
    pub fields: Vec<JobField>,

    /// Sources, fingerprints, timestamps, provenance or alternates changed
    pub bookkeeping: bool,
}

impl MergeChange {
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && !self.bookkeeping
    }

    pub fn changes_fields(&self) -> bool {
        !self.fields.is_empty()
    }
}

/// Merge a member into a canonical record in place
///
/// Merging a member that was already merged changes nothing.
pub fn merge_into(
    canonical: &mut CanonicalRecord,
    member: &Observation,
    policy: MergeConflictPolicy,
) -> MergeChange {
    let rank = member.rank();
    let mut change = MergeChange::default();

    for field in JobField::ALL {
        if let Some(value) = member.record.field(field) {
            match merge_field(canonical, field, value, &rank, policy) {
                FieldChange::Value => change.fields.push(field),
                FieldChange::Bookkeeping => change.bookkeeping = true,
                FieldChange::Unchanged => {}
            }
        }
    }

    let source = member.record.source.trim();
    if !source.is_empty() {
        change.bookkeeping |= canonical.sources.insert(source.to_string());
    }
    change.bookkeeping |= canonical
        .member_fingerprints
        .insert(member.fingerprint.clone());

    if member.observed_at < canonical.first_seen {
        canonical.first_seen = member.observed_at;
        change.bookkeeping = true;
    }
    if member.observed_at > canonical.last_seen {
        canonical.last_seen = member.observed_at;
        change.bookkeeping = true;
    }

    change
}

enum FieldChange {
    Unchanged,
    Bookkeeping,
    Value,
}

fn merge_field(
    canonical: &mut CanonicalRecord,
    field: JobField,
    value: &str,
    rank: &MemberRank,
    policy: MergeConflictPolicy,
) -> FieldChange {
    let incoming = FieldProvenance::adopted(rank.clone());

    let Some(current) = canonical.field(field).map(str::to_string) else {
        canonical.set_field(field, value.to_string());
        canonical.provenance.insert(field, incoming);
        if let Some(alternates) = canonical.alternates.get_mut(&field) {
            alternates.remove(value);
        }
        return FieldChange::Value;
    };

    // Values stored without provenance are treated as the canonical's own
    let held = canonical.provenance.get(&field).cloned().unwrap_or_else(|| {
        FieldProvenance::original(MemberRank {
            completeness: 0,
            observed_at: canonical.first_seen,
            fingerprint: canonical.founding_fingerprint(),
        })
    });

    if !outranks(policy, &incoming, value, &held, &current) {
        let recorded = current != value
            && canonical
                .alternates
                .entry(field)
                .or_default()
                .insert(value.to_string());
        return if recorded {
            FieldChange::Bookkeeping
        } else {
            FieldChange::Unchanged
        };
    }

    canonical.provenance.insert(field, incoming);
    if current == value {
        return FieldChange::Bookkeeping;
    }

    let alternates = canonical.alternates.entry(field).or_default();
    alternates.insert(current);
    alternates.remove(value);
    canonical.set_field(field, value.to_string());
    FieldChange::Value
}

/// Whether an incoming value should displace the held one
fn outranks(
    policy: MergeConflictPolicy,
    incoming: &FieldProvenance,
    incoming_value: &str,
    held: &FieldProvenance,
    held_value: &str,
) -> bool {
    match policy {
        MergeConflictPolicy::KeepCanonical => {
            (!incoming.adopted, &incoming.rank, Reverse(incoming_value))
                > (!held.adopted, &held.rank, Reverse(held_value))
        }
        MergeConflictPolicy::PreferMostRecent => {
            (incoming.rank.observed_at, incoming_value, &incoming.rank)
                > (held.rank.observed_at, held_value, &held.rank)
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::core::record::RawRecord;
    use chrono::TimeZone;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, 9, 0, 0).unwrap()
    }

    fn observe(record: RawRecord, day: u32) -> Observation {
        Observation::new(record, at(day)).unwrap()
    }

    fn base() -> CanonicalRecord {
        let record = RawRecord::new("Software Engineer", "Google", "jobs.ch").with_canton("ZH");
        CanonicalRecord::from_observation(&observe(record, 1))
    }

    #[test]
    fn test_empty_field_adopts_member_value() {
        let member = observe(
            RawRecord::new("Software Engineer", "Google, Inc.", "linkedin")
                .with_canton("ZH")
                .with_date_posted("2024-03-02")
                .with_description("Build things"),
            2,
        );
        let merged = merge(base(), &member, MergeConflictPolicy::KeepCanonical);

        assert_eq!(merged.description.as_deref(), Some("Build things"));
        assert!(merged.provenance[&JobField::Description].adopted);
        assert!(merged.sources.contains("linkedin"));
        assert!(merged.sources.contains("jobs.ch"));
        assert_eq!(merged.member_fingerprints.len(), 2);
        assert_eq!(merged.last_seen, at(2));
        assert_eq!(merged.first_seen, at(1));
        assert_eq!(merged.company_name, "Google");
        assert!(merged.alternates[&JobField::CompanyName].contains("Google, Inc."));
    }

    #[test]
    fn test_conflict_keeps_canonical_value_and_records_alternate() {
        let member = observe(
            RawRecord::new("Senior Software Engineer", "Google", "linkedin").with_canton("ZH"),
            2,
        );
        let merged = merge(base(), &member, MergeConflictPolicy::KeepCanonical);

        assert_eq!(merged.title, "Software Engineer");
        assert!(merged.alternates[&JobField::Title].contains("Senior Software Engineer"));
    }

    #[test]
    fn test_prefer_most_recent_replaces_value() {
        let member = observe(
            RawRecord::new("Senior Software Engineer", "Google", "linkedin").with_canton("ZH"),
            2,
        );
        let merged = merge(base(), &member, MergeConflictPolicy::PreferMostRecent);
        assert_eq!(merged.title, "Senior Software Engineer");
        assert!(merged.alternates[&JobField::Title].contains("Software Engineer"));

        let older = observe(
            RawRecord::new("Staff Software Engineer", "Google", "indeed").with_canton("ZH"),
            1,
        );
        let merged = merge(merged, &older, MergeConflictPolicy::PreferMostRecent);
        assert_eq!(merged.title, "Senior Software Engineer");
        assert!(merged.alternates[&JobField::Title].contains("Staff Software Engineer"));
    }

    #[test]
    fn test_merge_is_idempotent() {
        let member = observe(
            RawRecord::new("Software Engineer", "Google", "linkedin")
                .with_canton("ZH")
                .with_url("https://linkedin.com/jobs/1"),
            3,
        );
        let mut canonical = base();
        let first = merge_into(&mut canonical, &member, MergeConflictPolicy::KeepCanonical);
        assert_eq!(first.fields, vec![JobField::Url]);
        let snapshot = canonical.clone();
        let second = merge_into(&mut canonical, &member, MergeConflictPolicy::KeepCanonical);
        assert!(second.is_empty());
        assert_eq!(canonical, snapshot);
    }

    #[test]
    fn test_merge_order_independent() {
        let m1 = observe(
            RawRecord::new("Software Engineer", "Google", "a")
                .with_canton("ZH")
                .with_description("Short"),
            2,
        );
        let m2 = observe(
            RawRecord::new("Software Engineer", "Google", "b")
                .with_canton("ZH")
                .with_description("A much longer description")
                .with_url("https://b.example/1"),
            3,
        );
        let m3 = observe(
            RawRecord::new("Software Engineer", "Google", "c")
                .with_canton("ZH")
                .with_description("Third take")
                .with_url("https://c.example/1")
                .with_location("Zurich"),
            2,
        );

        let orders = [
            [&m1, &m2, &m3],
            [&m1, &m3, &m2],
            [&m2, &m1, &m3],
            [&m2, &m3, &m1],
            [&m3, &m1, &m2],
            [&m3, &m2, &m1],
        ];
        for policy in [
            MergeConflictPolicy::KeepCanonical,
            MergeConflictPolicy::PreferMostRecent,
        ] {
            let results: Vec<CanonicalRecord> = orders
                .iter()
                .map(|order| {
                    order
                        .iter()
                        .fold(base(), |acc, member| merge(acc, member, policy))
                })
                .collect();
            for result in &results[1..] {
                assert_eq!(result, &results[0], "policy {:?}", policy);
            }
        }
    }

    #[test]
    fn test_member_rank_order() {
        let fp_a = Fingerprint::from_hex(&"a".repeat(64)).unwrap();
        let fp_b = Fingerprint::from_hex(&"b".repeat(64)).unwrap();
        let rank = |completeness, day, fp: &Fingerprint| MemberRank {
            completeness,
            observed_at: at(day),
            fingerprint: fp.clone(),
        };

        assert!(rank(4, 1, &fp_a) > rank(3, 9, &fp_a));
        assert!(rank(3, 2, &fp_b) > rank(3, 1, &fp_a));
        assert!(rank(3, 1, &fp_a) > rank(3, 1, &fp_b));
    }

    #[test]
    fn test_policy_from_str() {
        assert_eq!(
            "prefer_most_recent".parse::<MergeConflictPolicy>().unwrap(),
            MergeConflictPolicy::PreferMostRecent
        );
        assert!("newest".parse::<MergeConflictPolicy>().is_err());
    }
}
