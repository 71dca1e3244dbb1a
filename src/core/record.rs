//! Record types flowing through the resolution engine
//!
//! A [`RawRecord`] is what a connector hands over. Once it passes validation it
//! becomes an [`Observation`], carrying its fingerprint and observation time.
//! Resolved postings are stored as [`CanonicalRecord`]s, companies as
//! [`CompanyEntity`]s.

use crate::core::blocking::BlockKey;
use crate::core::fingerprint::{fingerprint, Fingerprint};
use crate::core::merge::{FieldProvenance, MemberRank};
use crate::core::normalize::{canton_from_text, company_key, normalize_url};
use crate::core::service::ServiceError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Job posting as observed at a single source
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RawRecord {
    #[serde(default)]
    pub title: Option<String>,

    #[serde(default, alias = "company")]
    pub company_name: Option<String>,

    #[serde(default)]
    pub location: Option<String>,

    #[serde(default)]
    pub canton: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default, alias = "created")]
    pub date_posted: Option<String>,

    #[serde(default)]
    pub url: Option<String>,

    /// Connector name ("jobs.ch", "adzuna", ...)
    #[serde(default)]
    pub source: String,

    /// Identifier the source assigned to the posting, if any
    #[serde(default)]
    pub external_id: Option<String>,

    #[serde(default)]
    pub observed_at: Option<DateTime<Utc>>,
}

impl RawRecord {
    /// Minimal record with the required fields set
    pub fn new(
        title: impl Into<String>,
        company_name: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            title: Some(title.into()),
            company_name: Some(company_name.into()),
            source: source.into(),
            ..Default::default()
        }
    }

    pub fn with_canton(mut self, canton: impl Into<String>) -> Self {
        self.canton = Some(canton.into());
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_date_posted(mut self, date: impl Into<String>) -> Self {
        self.date_posted = Some(date.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_observed_at(mut self, observed_at: DateTime<Utc>) -> Self {
        self.observed_at = Some(observed_at);
        self
    }

    /// Non-blank value of a field
    pub fn field(&self, field: JobField) -> Option<&str> {
        let value = match field {
            JobField::Title => self.title.as_deref(),
            JobField::CompanyName => self.company_name.as_deref(),
            JobField::Location => self.location.as_deref(),
            JobField::Canton => self.canton.as_deref(),
            JobField::Description => self.description.as_deref(),
            JobField::DatePosted => self.date_posted.as_deref(),
            JobField::Url => self.url.as_deref(),
        };
        value.map(str::trim).filter(|v| !v.is_empty())
    }

    /// Number of non-blank mergeable fields
    pub fn completeness(&self) -> usize {
        JobField::ALL
            .iter()
            .filter(|f| self.field(**f).is_some())
            .count()
    }
}

/// Why a raw record was left out of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    MissingTitle,
    MissingCompany,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::MissingTitle => write!(f, "missing title"),
            SkipReason::MissingCompany => write!(f, "missing company name"),
        }
    }
}

/// Validated record ready for resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub record: RawRecord,
    pub fingerprint: Fingerprint,
    pub observed_at: DateTime<Utc>,
}

impl Observation {
    /// Validate a raw record, stamping it with `now` when the connector gave no time
    pub fn new(record: RawRecord, now: DateTime<Utc>) -> Result<Self, SkipReason> {
        if record.field(JobField::Title).is_none() {
            return Err(SkipReason::MissingTitle);
        }
        match record.field(JobField::CompanyName) {
            Some(name) if !company_key(name).is_empty() => {}
            _ => return Err(SkipReason::MissingCompany),
        }

        let record = fill_gaps(record);
        let observed_at = record.observed_at.unwrap_or(now);
        Ok(Self {
            fingerprint: fingerprint(&record),
            observed_at,
            record,
        })
    }

    pub fn title(&self) -> &str {
        self.record.field(JobField::Title).unwrap_or_default()
    }

    pub fn company_name(&self) -> &str {
        self.record.field(JobField::CompanyName).unwrap_or_default()
    }

    pub fn rank(&self) -> MemberRank {
        MemberRank {
            completeness: self.record.completeness(),
            observed_at: self.observed_at,
            fingerprint: self.fingerprint.clone(),
        }
    }
}

/// Infer a missing canton from the location or title and give bare URLs a scheme
fn fill_gaps(mut record: RawRecord) -> RawRecord {
    if record.field(JobField::Canton).is_none() {
        let inferred = record
            .field(JobField::Location)
            .and_then(canton_from_text)
            .or_else(|| record.field(JobField::Title).and_then(canton_from_text));
        if let Some(canton) = inferred {
            record.canton = Some(canton.to_string());
        }
    }

    let url = record.field(JobField::Url).map(|u| normalize_url(Some(u)));
    if url.is_some() {
        record.url = url;
    }
    record
}

/// Mergeable job fields
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum JobField {
    Title,
    CompanyName,
    Location,
    Canton,
    Description,
    DatePosted,
    Url,
}

impl JobField {
    pub const ALL: [JobField; 7] = [
        JobField::Title,
        JobField::CompanyName,
        JobField::Location,
        JobField::Canton,
        JobField::Description,
        JobField::DatePosted,
        JobField::Url,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobField::Title => "title",
            JobField::CompanyName => "company_name",
            JobField::Location => "location",
            JobField::Canton => "canton",
            JobField::Description => "description",
            JobField::DatePosted => "date_posted",
            JobField::Url => "url",
        }
    }
}

impl std::fmt::Display for JobField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable identifier of a canonical job posting
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: String) -> Result<Self, ServiceError> {
        if id.trim().is_empty() {
            return Err(ServiceError::Validation("Job ID cannot be empty".to_string()));
        }
        if id.len() > 255 {
            return Err(ServiceError::Validation(
                "Job ID too long (max 255 characters)".to_string(),
            ));
        }
        Ok(Self(id))
    }

    /// Identity derived from the founding member's fingerprint
    pub fn from_fingerprint(fingerprint: &Fingerprint) -> Self {
        Self(fingerprint.as_str().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for JobId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl serde::Serialize for JobId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for JobId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        JobId::new(s).map_err(serde::de::Error::custom)
    }
}

/// Stable identifier of a company entity
///
/// `uid:<UID>` when the commercial register id is known, otherwise
/// `name:<company key>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CompanyId(String);

impl CompanyId {
    pub fn new(id: String) -> Result<Self, ServiceError> {
        let Some((kind, rest)) = id.split_once(':') else {
            return Err(ServiceError::Validation(format!(
                "Company ID '{}' must start with 'uid:' or 'name:'",
                id
            )));
        };
        if !matches!(kind, "uid" | "name") {
            return Err(ServiceError::Validation(format!(
                "Unknown company ID kind '{}'",
                kind
            )));
        }
        if rest.trim().is_empty() {
            return Err(ServiceError::Validation(
                "Company ID cannot be empty".to_string(),
            ));
        }
        Ok(Self(id))
    }

    /// Derive the identifier from a registry UID or, failing that, the name
    pub fn derive(name: &str, external_uid: Option<&str>) -> Result<Self, ServiceError> {
        if let Some(uid) = external_uid.map(str::trim).filter(|u| !u.is_empty()) {
            return Ok(Self(format!("uid:{}", uid.to_uppercase())));
        }
        let key = company_key(name);
        if key.is_empty() {
            return Err(ServiceError::Validation(format!(
                "Company name '{}' has no usable characters",
                name
            )));
        }
        Ok(Self(format!("name:{}", key)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CompanyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for CompanyId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for CompanyId {
    type Error = ServiceError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        CompanyId::new(s)
    }
}

impl serde::Serialize for CompanyId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for CompanyId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        CompanyId::new(s).map_err(serde::de::Error::custom)
    }
}

/// Durable identity of a job posting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub id: JobId,
    pub block_key: BlockKey,
    pub title: String,
    pub company_name: String,
    pub location: Option<String>,
    pub canton: Option<String>,
    pub description: Option<String>,
    pub date_posted: Option<String>,
    pub url: Option<String>,
    pub sources: BTreeSet<String>,
    pub member_fingerprints: BTreeSet<Fingerprint>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,

    /// Who supplied each field value
    #[serde(default)]
    pub provenance: BTreeMap<JobField, FieldProvenance>,

    /// Conflicting values seen for each field, the current value excluded
    #[serde(default)]
    pub alternates: BTreeMap<JobField, BTreeSet<String>>,

    #[serde(default)]
    pub company_id: Option<CompanyId>,

    #[serde(default)]
    pub company_link_score: Option<f64>,
}

impl CanonicalRecord {
    /// Found a canonical record from its first observation
    pub fn from_observation(observation: &Observation) -> Self {
        let record = &observation.record;
        let rank = observation.rank();
        let owned = |field: JobField| record.field(field).map(str::to_string);

        let provenance = JobField::ALL
            .iter()
            .filter(|f| record.field(**f).is_some())
            .map(|f| (*f, FieldProvenance::original(rank.clone())))
            .collect();

        let mut sources = BTreeSet::new();
        if !record.source.trim().is_empty() {
            sources.insert(record.source.trim().to_string());
        }

        Self {
            id: JobId::from_fingerprint(&observation.fingerprint),
            block_key: BlockKey::of_record(record),
            title: observation.title().to_string(),
            company_name: observation.company_name().to_string(),
            location: owned(JobField::Location),
            canton: owned(JobField::Canton),
            description: owned(JobField::Description),
            date_posted: owned(JobField::DatePosted),
            url: owned(JobField::Url),
            sources,
            member_fingerprints: BTreeSet::from([observation.fingerprint.clone()]),
            first_seen: observation.observed_at,
            last_seen: observation.observed_at,
            provenance,
            alternates: BTreeMap::new(),
            company_id: None,
            company_link_score: None,
        }
    }

    pub fn field(&self, field: JobField) -> Option<&str> {
        let value = match field {
            JobField::Title => Some(self.title.as_str()),
            JobField::CompanyName => Some(self.company_name.as_str()),
            JobField::Location => self.location.as_deref(),
            JobField::Canton => self.canton.as_deref(),
            JobField::Description => self.description.as_deref(),
            JobField::DatePosted => self.date_posted.as_deref(),
            JobField::Url => self.url.as_deref(),
        };
        value.filter(|v| !v.is_empty())
    }

    pub(crate) fn set_field(&mut self, field: JobField, value: String) {
        match field {
            JobField::Title => self.title = value,
            JobField::CompanyName => self.company_name = value,
            JobField::Location => self.location = Some(value),
            JobField::Canton => self.canton = Some(value),
            JobField::Description => self.description = Some(value),
            JobField::DatePosted => self.date_posted = Some(value),
            JobField::Url => self.url = Some(value),
        }
    }

    pub fn completeness(&self) -> usize {
        JobField::ALL
            .iter()
            .filter(|f| self.field(**f).is_some())
            .count()
    }

    /// Rank of the canonical as a cluster member
    pub fn rank(&self) -> MemberRank {
        MemberRank {
            completeness: self.completeness(),
            observed_at: self.last_seen,
            fingerprint: self.founding_fingerprint(),
        }
    }

    /// Fingerprint the canonical was created from
    pub fn founding_fingerprint(&self) -> Fingerprint {
        Fingerprint::from_hex(self.id.as_str())
            .or_else(|| self.member_fingerprints.iter().next().cloned())
            .unwrap_or_default()
    }

    pub fn is_linked(&self) -> bool {
        self.company_id.is_some()
    }
}

/// Canonical company profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanyEntity {
    pub id: CompanyId,
    pub name: String,

    /// Commercial register UID ("CHE-123.456.789")
    #[serde(default)]
    pub external_uid: Option<String>,

    #[serde(default)]
    pub legal_form: Option<String>,

    #[serde(default)]
    pub address: Option<String>,

    #[serde(default)]
    pub location: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub offers_sponsorship: bool,

    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl CompanyEntity {
    pub fn new(name: impl Into<String>, external_uid: Option<String>) -> Result<Self, ServiceError> {
        let name = name.into();
        let id = CompanyId::derive(&name, external_uid.as_deref())?;
        Ok(Self {
            id,
            name,
            external_uid,
            legal_form: None,
            address: None,
            location: None,
            description: None,
            offers_sponsorship: false,
            tags: BTreeSet::new(),
        })
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Key used when matching job company names against this entity
    pub fn key(&self) -> String {
        company_key(&self.name)
    }

    /// Fill blank fields from another profile of the same company
    ///
    /// Returns true when anything changed.
    pub fn absorb(&mut self, other: &CompanyEntity) -> bool {
        fn fill(slot: &mut Option<String>, value: &Option<String>) -> bool {
            let blank = slot.as_deref().map(str::trim).unwrap_or_default().is_empty();
            match value {
                Some(v) if blank && !v.trim().is_empty() => {
                    *slot = Some(v.clone());
                    true
                }
                _ => false,
            }
        }

        let mut changed = false;
        changed |= fill(&mut self.external_uid, &other.external_uid);
        changed |= fill(&mut self.legal_form, &other.legal_form);
        changed |= fill(&mut self.address, &other.address);
        changed |= fill(&mut self.location, &other.location);
        changed |= fill(&mut self.description, &other.description);
        if other.offers_sponsorship && !self.offers_sponsorship {
            self.offers_sponsorship = true;
            changed = true;
        }
        for tag in &other.tags {
            changed |= self.tags.insert(tag.clone());
        }
        changed
    }
}
