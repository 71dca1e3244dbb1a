//! Event bus for resolution events
//!
//! Runs publish what they decide so callers can follow progress and collect
//! items that need human review (ambiguous company matches, overlapping
//! canonical records).

use crate::core::blocking::BlockKey;
use crate::core::fingerprint::Fingerprint;
use crate::core::record::{CompanyId, JobField, JobId};
use crate::core::service::ServiceError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

/// Type alias for event handlers map to reduce complexity
type EventHandlersMap = HashMap<String, Vec<Arc<dyn EventHandler>>>;

/// Events published by resolution and linking runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResolutionEvent {
    /// A block's records were written
    BlockCommitted {
        run_id: String,
        block: BlockKey,
        chunk: usize,
        upserts: usize,
    },

    /// A new canonical job was created
    CanonicalCreated {
        run_id: String,
        job_id: JobId,
        members: Vec<Fingerprint>,
    },

    /// New observations were merged into an existing canonical job
    CanonicalMerged {
        run_id: String,
        job_id: JobId,
        members: Vec<Fingerprint>,
        changed_fields: BTreeSet<JobField>,
    },

    /// A cluster contained several existing canonical jobs
    CanonicalOverlap {
        run_id: String,
        kept: JobId,
        others: Vec<JobId>,
    },

    /// Several companies matched a job's company name equally well
    AmbiguousCompanyMatch {
        job_id: JobId,
        company_name: String,
        chosen: CompanyId,
        tied_with: Vec<CompanyId>,
        score: f64,
    },

    /// A run finished
    RunCompleted {
        run_id: String,
        processed: usize,
        new_canonicals: usize,
        merged: usize,
    },
}

impl ResolutionEvent {
    /// Key used for handler lookup
    pub fn event_type(&self) -> &'static str {
        match self {
            ResolutionEvent::BlockCommitted { .. } => "block:committed",
            ResolutionEvent::CanonicalCreated { .. } => "canonical:created",
            ResolutionEvent::CanonicalMerged { .. } => "canonical:merged",
            ResolutionEvent::CanonicalOverlap { .. } => "review:overlap",
            ResolutionEvent::AmbiguousCompanyMatch { .. } => "review:ambiguous-company",
            ResolutionEvent::RunCompleted { .. } => "run:completed",
        }
    }

    /// Whether a person should look at this
    pub fn needs_review(&self) -> bool {
        matches!(
            self,
            ResolutionEvent::CanonicalOverlap { .. }
                | ResolutionEvent::AmbiguousCompanyMatch { .. }
        )
    }
}

/// Event handler trait
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle_event(&self, event: ResolutionEvent) -> Result<(), ServiceError>;
}

/// Event bus for resolution events
pub struct EventBus {
    /// Broadcast sender for events
    sender: broadcast::Sender<ResolutionEvent>,

    handlers: Arc<RwLock<EventHandlersMap>>,

    /// Most recent events, oldest first
    event_history: Arc<RwLock<VecDeque<(ResolutionEvent, DateTime<Utc>)>>>,

    max_history_size: usize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_history_size(1000)
    }

    pub fn with_history_size(max_history_size: usize) -> Self {
        let (sender, _) = broadcast::channel(1000);

        Self {
            sender,
            handlers: Arc::new(RwLock::new(HashMap::new())),
            event_history: Arc::new(RwLock::new(VecDeque::new())),
            max_history_size,
        }
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<ResolutionEvent> {
        self.sender.subscribe()
    }

    /// Register an event handler for an event type ("review:overlap", "run:completed", ...)
    pub async fn register_handler<H: EventHandler + 'static>(&self, event_type: &str, handler: H) {
        self.register_shared_handler(event_type, Arc::new(handler)).await;
    }

    /// Register a handler the caller keeps a reference to
    pub async fn register_shared_handler(&self, event_type: &str, handler: Arc<dyn EventHandler>) {
        let mut handlers = self.handlers.write().await;
        handlers
            .entry(event_type.to_string())
            .or_default()
            .push(handler);

        debug!("Registered event handler for event type: {}", event_type);
    }

    /// Publish an event, returning the number of live subscribers
    pub async fn publish_event(&self, event: ResolutionEvent) -> usize {
        {
            let mut history = self.event_history.write().await;
            history.push_back((event.clone(), Utc::now()));
            while history.len() > self.max_history_size {
                history.pop_front();
            }
        }

        // No subscribers is not an error
        let subscriber_count = self.sender.send(event.clone()).unwrap_or(0);

        self.notify_handlers(&event).await;

        subscriber_count
    }

    async fn notify_handlers(&self, event: &ResolutionEvent) {
        let handlers = self.handlers.read().await;

        if let Some(event_handlers) = handlers.get(event.event_type()) {
            for handler in event_handlers {
                if let Err(e) = handler.handle_event(event.clone()).await {
                    warn!("Event handler failed to process event: {}", e);
                }
            }
        }
    }

    pub async fn get_event_history(&self) -> Vec<(ResolutionEvent, DateTime<Utc>)> {
        self.event_history.read().await.iter().cloned().collect()
    }

    /// Events in the history that need review
    pub async fn review_items(&self) -> Vec<ResolutionEvent> {
        self.event_history
            .read()
            .await
            .iter()
            .filter(|(event, _)| event.needs_review())
            .map(|(event, _)| event.clone())
            .collect()
    }

    pub async fn clear_event_history(&self) {
        self.event_history.write().await.clear();
    }

    pub async fn get_registered_handlers(&self) -> HashMap<String, usize> {
        let handlers = self.handlers.read().await;
        handlers.iter().map(|(k, v)| (k.clone(), v.len())).collect()
    }
}

/// Logs every event it receives
#[derive(Debug, Default)]
pub struct LoggingEventHandler;

#[async_trait]
impl EventHandler for LoggingEventHandler {
    async fn handle_event(&self, event: ResolutionEvent) -> Result<(), ServiceError> {
        match event {
            ResolutionEvent::BlockCommitted {
                block, upserts, ..
            } => {
                debug!("Committed block {} ({} upserts)", block, upserts);
            }
            ResolutionEvent::CanonicalCreated {
                job_id, members, ..
            } => {
                info!("Created {} from {} observations", job_id, members.len());
            }
            ResolutionEvent::CanonicalMerged {
                job_id, members, ..
            } => {
                info!("Merged {} observations into {}", members.len(), job_id);
            }
            ResolutionEvent::CanonicalOverlap { kept, others, .. } => {
                warn!("[REVIEW] {} overlaps {} other canonical jobs", kept, others.len());
            }
            ResolutionEvent::AmbiguousCompanyMatch {
                job_id,
                company_name,
                chosen,
                tied_with,
                ..
            } => {
                warn!(
                    "[REVIEW] {} '{}' linked to {} over {} tied companies",
                    job_id,
                    company_name,
                    chosen,
                    tied_with.len()
                );
            }
            ResolutionEvent::RunCompleted {
                run_id, processed, ..
            } => {
                info!("Run {} completed, {} records processed", run_id, processed);
            }
        }
        Ok(())
    }
}

/// Counts events per type
#[derive(Debug, Default)]
pub struct MetricsEventHandler {
    event_counts: RwLock<HashMap<String, usize>>,
}

impl MetricsEventHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_event_counts(&self) -> HashMap<String, usize> {
        self.event_counts.read().await.clone()
    }
}

#[async_trait]
impl EventHandler for MetricsEventHandler {
    async fn handle_event(&self, event: ResolutionEvent) -> Result<(), ServiceError> {
        let mut counts = self.event_counts.write().await;
        *counts.entry(event.event_type().to_string()).or_insert(0) += 1;
        Ok(())
    }
}
