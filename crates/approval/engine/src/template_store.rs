//! Template store: versioned, immutable workflow templates
//!
//! Published templates never change. Registering a template for a
//! request type that already has one publishes the next version; running
//! instances keep the snapshot they were submitted with. Reads take a
//! lock-free snapshot of the catalog, writers swap in a new one.

use crate::resolver::ApproverResolver;
use crate::storage::{ApprovalStore, TemplateStorage};
use approval_types::{
    ApprovalError, ApprovalResult, RequestType, TemplateDraft, TemplateId, WorkflowTemplate,
};
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Published versions per request type, oldest first
type Catalog = HashMap<RequestType, Vec<Arc<WorkflowTemplate>>>;

/// Registry of published template versions
pub struct TemplateStore {
    catalog: ArcSwap<Catalog>,
    /// Serializes writers; readers never take it
    publish_lock: Mutex<()>,
    resolver: Arc<dyn ApproverResolver>,
    store: Arc<dyn ApprovalStore>,
}

impl TemplateStore {
    /// Create an empty store
    pub fn new(store: Arc<dyn ApprovalStore>, resolver: Arc<dyn ApproverResolver>) -> Self {
        Self {
            catalog: ArcSwap::from_pointee(Catalog::new()),
            publish_lock: Mutex::new(()),
            resolver,
            store,
        }
    }

    /// Create a store pre-populated with every version already persisted
    pub fn load(
        store: Arc<dyn ApprovalStore>,
        resolver: Arc<dyn ApproverResolver>,
    ) -> ApprovalResult<Self> {
        let mut catalog = Catalog::new();
        for template in store.list_templates()? {
            catalog
                .entry(template.request_type.clone())
                .or_default()
                .push(Arc::new(template));
        }
        for versions in catalog.values_mut() {
            versions.sort_by_key(|t| t.version);
        }

        let loaded: usize = catalog.values().map(Vec::len).sum();
        tracing::debug!(templates = loaded, "Template catalog loaded");

        Ok(Self {
            catalog: ArcSwap::from_pointee(catalog),
            publish_lock: Mutex::new(()),
            resolver,
            store,
        })
    }

    /// Register a template as the next version for its request type.
    ///
    /// Validates structure and that every required step's approver type
    /// is supported by a resolver strategy. The caller's id and version
    /// are replaced.
    pub fn register(&self, mut template: WorkflowTemplate) -> ApprovalResult<Arc<WorkflowTemplate>> {
        template.validate_with(|t| self.resolver.supports(t))?;

        let _guard = self.publish_lock.lock();
        let current = self.catalog.load_full();

        let latest = current
            .get(&template.request_type)
            .and_then(|versions| versions.last())
            .map(|t| t.version)
            .unwrap_or(0);
        template.version = latest + 1;
        template.id = TemplateId::generate();

        self.store.save_template(&template)?;

        let published = Arc::new(template);
        let mut next = (*current).clone();
        next.entry(published.request_type.clone())
            .or_default()
            .push(Arc::clone(&published));
        self.catalog.store(Arc::new(next));

        tracing::info!(
            template_id = %published.id,
            request_type = %published.request_type,
            version = published.version,
            steps = published.step_count(),
            "Template registered"
        );
        Ok(published)
    }

    /// Build a draft and register the result
    pub fn publish(&self, draft: &TemplateDraft) -> ApprovalResult<Arc<WorkflowTemplate>> {
        self.register(draft.build()?)
    }

    /// The current version for a request type
    pub fn get_latest(&self, request_type: &RequestType) -> ApprovalResult<Arc<WorkflowTemplate>> {
        self.catalog
            .load()
            .get(request_type)
            .and_then(|versions| versions.last())
            .cloned()
            .ok_or_else(|| ApprovalError::TemplateNotFound(request_type.clone()))
    }

    /// A specific version
    pub fn get(&self, request_type: &RequestType, version: u32) -> Option<Arc<WorkflowTemplate>> {
        self.catalog
            .load()
            .get(request_type)
            .and_then(|versions| versions.iter().find(|t| t.version == version))
            .cloned()
    }

    /// All versions of a request type, oldest first
    pub fn versions(&self, request_type: &RequestType) -> Vec<Arc<WorkflowTemplate>> {
        self.catalog
            .load()
            .get(request_type)
            .cloned()
            .unwrap_or_default()
    }

    /// Request types with at least one published version
    pub fn request_types(&self) -> Vec<RequestType> {
        let mut types: Vec<_> = self.catalog.load().keys().cloned().collect();
        types.sort();
        types
    }

    /// Total number of published versions
    pub fn count(&self) -> usize {
        self.catalog.load().values().map(Vec::len).sum()
    }
}
