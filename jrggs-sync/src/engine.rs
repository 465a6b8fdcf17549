//! Engine facade
//!
//! Owns every long-lived piece (store handle, locks, event bus, contributor
//! directory, one processing queue per item kind, one ingestion driver per
//! source) and exposes the inbound operations. Every operation that changes
//! an item's inputs marks it PENDING and wakes its queue.

use std::sync::Arc;
use tracing::info;

use jrggs_common::config::AppConfig;
use jrggs_common::events::EventBus;

use crate::change_requests::ChangeRequestService;
use crate::db::contributors::Contributor;
use crate::db::items::{self, ItemFilter};
use crate::db::{overrides, Store};
use crate::directory::ContributorDirectory;
use crate::error::{SyncError, SyncResult};
use crate::linking::LinkExtractor;
use crate::models::{
    Actor, ChangeRequest, ChangeRequestStatus, ItemKind, Override, OverridePatch,
    ProposedChange, SyncParams, WorkItem,
};
use crate::settings::EngineSettings;
use crate::source::{BitbucketSource, JiraSource, SourceAdapter};
use crate::sync::{
    BatchStats, IssueProcessor, ItemProcessor, ProcessingQueue, PullRequestProcessor, QueueSet,
    SyncOutcome, WatermarkSync,
};
use crate::utils::NamedLocks;

/// Capacity of the engine's event bus
pub const EVENT_BUS_CAPACITY: usize = 256;

pub struct Engine {
    store: Store,
    settings: Arc<EngineSettings>,
    events: EventBus,
    queues: QueueSet,
    // Strong references; `QueueSet` only holds weak ones
    processing: Vec<Arc<ProcessingQueue>>,
    ingestion: Vec<Arc<WatermarkSync>>,
    directory: Arc<ContributorDirectory>,
    change_requests: ChangeRequestService,
}

impl Engine {
    /// Wire an engine over an initialized store and a set of sources
    ///
    /// At most one source per item kind.
    pub fn new(
        store: Store,
        settings: EngineSettings,
        events: EventBus,
        sources: Vec<Arc<dyn SourceAdapter>>,
    ) -> SyncResult<Self> {
        let settings = Arc::new(settings);
        let locks = NamedLocks::new();
        let queues = QueueSet::new();
        let directory = Arc::new(ContributorDirectory::new(
            store.clone(),
            settings.reviewer_roles.clone(),
        ));
        let links = LinkExtractor::new(&settings.link_prefixes)?;

        let mut processing = Vec::new();
        let mut ingestion = Vec::new();
        for source in sources {
            let kind = source.kind();
            if processing
                .iter()
                .any(|q: &Arc<ProcessingQueue>| q.kind() == kind)
            {
                return Err(SyncError::Validation(format!(
                    "More than one {} source configured",
                    kind.as_str()
                )));
            }

            let processor: Arc<dyn ItemProcessor> = match kind {
                ItemKind::Issue => Arc::new(IssueProcessor::new(
                    store.clone(),
                    source.clone(),
                    directory.clone(),
                    settings.clone(),
                )),
                ItemKind::PullRequest => Arc::new(PullRequestProcessor::new(
                    store.clone(),
                    source.clone(),
                    links.clone(),
                    settings.clone(),
                )),
            };
            processing.push(ProcessingQueue::new(
                store.clone(),
                processor,
                locks.clone(),
                events.clone(),
                queues.clone(),
                settings.batch_size,
            ));
            ingestion.push(Arc::new(WatermarkSync::new(
                store.clone(),
                source,
                locks.clone(),
                events.clone(),
                queues.clone(),
                settings.clone(),
            )));
        }

        let change_requests = ChangeRequestService::new(
            store.clone(),
            locks,
            events.clone(),
            queues.clone(),
            links,
            settings.clone(),
        );

        Ok(Self {
            store,
            settings,
            events,
            queues,
            processing,
            ingestion,
            directory,
            change_requests,
        })
    }

    /// Build the HTTP sources named in `config` and wire an engine over them
    ///
    /// Link prefixes default to the Jira project key when none are set.
    pub fn from_config(config: &AppConfig, store: Store) -> SyncResult<Self> {
        let mut settings: EngineSettings = config.engine_section()?;
        let timeout = settings.fetch_timeout();
        let mut sources: Vec<Arc<dyn SourceAdapter>> = Vec::new();

        if let Some(jira) = &config.jira {
            if settings.link_prefixes.is_empty() {
                settings.link_prefixes = vec![jira.project_key.clone()];
            }
            let source = JiraSource::new(jira, timeout).map_err(config_error)?;
            sources.push(Arc::new(source));
        }
        if let Some(bitbucket) = &config.bitbucket {
            let source = BitbucketSource::new(bitbucket, timeout).map_err(config_error)?;
            sources.push(Arc::new(source));
        }

        info!(sources = sources.len(), "Engine configured");
        Self::new(store, settings, EventBus::new(EVENT_BUS_CAPACITY), sources)
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn queue(&self, kind: ItemKind) -> Option<Arc<ProcessingQueue>> {
        self.queues.get(kind)
    }

    pub fn processing_queues(&self) -> &[Arc<ProcessingQueue>] {
        &self.processing
    }

    pub fn ingestion(&self) -> &[Arc<WatermarkSync>] {
        &self.ingestion
    }

    pub async fn item(&self, key: &str) -> SyncResult<WorkItem> {
        items::get(self.store.pool()?, key)
            .await?
            .ok_or_else(|| SyncError::NotFound(format!("Work item {}", key)))
    }

    pub async fn items(&self, filter: &ItemFilter) -> SyncResult<Vec<WorkItem>> {
        Ok(items::list(self.store.pool()?, filter).await?)
    }

    pub async fn override_for(&self, key: &str) -> SyncResult<Override> {
        Ok(overrides::get(self.store.pool()?, key).await?)
    }

    /// Reset one item to PENDING; this is also how FAILED items are retried
    pub async fn mark_pending(&self, key: &str, params: SyncParams) -> SyncResult<()> {
        let kind = items::mark_pending(self.store.pool()?, key, params)
            .await?
            .ok_or_else(|| SyncError::NotFound(format!("Work item {}", key)))?;
        self.queues.wake(kind);
        Ok(())
    }

    /// Patch one override field and schedule a recompute
    pub async fn set_override(&self, key: &str, patch: OverridePatch) -> SyncResult<Override> {
        let pool = self.store.pool()?;
        if items::get(pool, key).await?.is_none() {
            return Err(SyncError::NotFound(format!("Work item {}", key)));
        }

        let updated = overrides::modify(pool, key, move |o| o.apply(patch)).await?;
        self.mark_pending(key, SyncParams::light()).await?;
        info!(key, "Override updated");
        Ok(updated)
    }

    /// Mark every item of `scope` PENDING with a history refetch from zero
    pub async fn force_resync(&self, scope: &str) -> SyncResult<u64> {
        let params = SyncParams {
            refresh_history: true,
            ..SyncParams::full()
        };
        let marked = items::mark_scope_pending(self.store.pool()?, scope, params).await?;
        info!(scope, marked, "Forced resync");
        for queue in &self.processing {
            queue.wake();
        }
        Ok(marked)
    }

    /// Run one ingestion pass for `scope`
    pub async fn sync_scope(&self, scope: &str) -> SyncResult<SyncOutcome> {
        let driver = self
            .ingestion
            .iter()
            .find(|d| d.scope() == scope)
            .ok_or_else(|| SyncError::NotFound(format!("Ingestion scope {}", scope)))?;
        driver.sync(scope).await
    }

    /// Drain the queue for `kind` now
    pub async fn process_pending(&self, kind: ItemKind) -> SyncResult<BatchStats> {
        let queue = self
            .queues
            .get(kind)
            .ok_or_else(|| SyncError::NotFound(format!("No {} queue", kind.as_str())))?;
        queue.check_to_process().await
    }

    pub async fn upsert_contributor(&self, contributor: &Contributor) -> SyncResult<()> {
        self.directory.upsert(contributor).await
    }

    pub async fn refresh_contributors(&self) -> SyncResult<()> {
        self.directory.refresh().await?;
        Ok(())
    }

    pub async fn create_change_request(
        &self,
        actor: &Actor,
        target_key: &str,
        change: ProposedChange,
        justification: &str,
    ) -> SyncResult<ChangeRequest> {
        self.change_requests
            .create(actor, target_key, change, justification)
            .await
    }

    pub async fn cancel_change_request(&self, actor: &Actor, id: &str) -> SyncResult<ChangeRequest> {
        self.change_requests.cancel(actor, id).await
    }

    pub async fn reject_change_request(
        &self,
        actor: &Actor,
        id: &str,
        reason: &str,
    ) -> SyncResult<ChangeRequest> {
        self.change_requests.reject(actor, id, reason).await
    }

    pub async fn approve_change_request(
        &self,
        actor: &Actor,
        id: &str,
    ) -> SyncResult<ChangeRequest> {
        self.change_requests.approve(actor, id).await
    }

    pub async fn change_request(&self, id: &str) -> SyncResult<ChangeRequest> {
        self.change_requests.get(id).await
    }

    pub async fn change_requests(
        &self,
        status: ChangeRequestStatus,
    ) -> SyncResult<Vec<ChangeRequest>> {
        self.change_requests.list(status).await
    }
}

fn config_error(err: crate::source::SourceError) -> SyncError {
    SyncError::Common(jrggs_common::Error::Config(format!(
        "Source client setup failed: {}",
        err
    )))
}
