//! Report Pipeline - Single Entry Point
//!
//! Orchestrates the stages in the fixed order: context build, loop
//! expansion, outer conditionals, substitution + sanitize, then optional
//! document assembly. Everything the stages read (descriptors, prices,
//! resolver) arrives as an argument; the pipeline holds only the template
//! registry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::assemble::{
    assemble_document, AssetError, AssetResolver, DocumentBackend, DocumentOptions, PageSetup,
};
use crate::context::{build_audit_context, FieldDescriptors, DamageRecord, PriceTable, RawRecord};
use crate::render::{apply_totals, process_conditionals, process_loop, substitute, LoopTotals};
use crate::template::{Template, TemplateRegistry};
use crate::DAMAGE_RECORDS_COLLECTION;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    #[error("Template {0} has no content")]
    EmptyTemplate(String),

    #[error("Document export failed: {0}")]
    ExportFailed(#[from] AssetError),

    #[error("Record store error: {0}")]
    StoreFailed(#[from] StoreError),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Record query failed: {0}")]
    Query(String),

    #[error("Record write failed: {0}")]
    Write(String),
}

/// Row-query boundary to whatever datastore holds audits and their damage
/// records. The engine depends on these signatures only, never on a
/// backend's query language.
pub trait RecordStore {
    fn fetch_records_by_parent(&self, parent_id: &str) -> Result<Vec<DamageRecord>, StoreError>;

    fn upsert_record(
        &mut self,
        table: &str,
        record: serde_json::Value,
    ) -> Result<serde_json::Value, StoreError>;
}

/// Caller-resolved presentation choices for one render.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderOptions {
    /// Display text for records without an assigned reference number.
    /// Wording ("Not assigned" vs. "Will be assigned on save") is chosen by
    /// the calling view, never by the engine.
    pub reference_fallback: String,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            reference_fallback: "Not assigned".to_string(),
        }
    }
}

/// Output of one render pass. No identity beyond this invocation; callers
/// persist or discard it whole.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderedReport {
    pub id: Uuid,
    pub template_id: String,
    /// Engine that produced this output, for stored-report provenance.
    pub engine_version: String,
    pub created_at: DateTime<Utc>,
    pub html: String,
    pub totals: LoopTotals,
    /// Fail-soft events (photo/logo resolution failures) for the caller to
    /// log; they are never surfaced inline in the output.
    pub warnings: Vec<String>,
}

/// The report pipeline - single entry point for template rendering.
pub struct ReportPipeline {
    registry: TemplateRegistry,
}

impl ReportPipeline {
    pub fn new(registry: TemplateRegistry) -> Self {
        Self { registry }
    }

    pub fn list_templates(&self) -> Vec<&Template> {
        self.registry.list()
    }

    pub fn list_visible_templates(&self) -> Vec<&Template> {
        self.registry.list_visible()
    }

    pub fn get_template(&self, id: &str) -> Option<&Template> {
        self.registry.get(id)
    }

    /// Merge one audit (plus its damage records) into a template.
    ///
    /// Returns the processed body HTML with all tokens resolved and
    /// sanitized. Missing fields, malformed spans, unparseable costs, and
    /// asset failures all degrade per stage policy; the only hard errors
    /// are an unknown template id and a template with no content.
    #[allow(clippy::too_many_arguments)]
    pub fn render_report(
        &self,
        template_id: &str,
        audit: &RawRecord,
        records: &[DamageRecord],
        descriptors: &FieldDescriptors,
        prices: &PriceTable,
        resolver: &dyn AssetResolver,
        options: &RenderOptions,
    ) -> Result<RenderedReport, RenderError> {
        let template = self
            .registry
            .get(template_id)
            .ok_or_else(|| RenderError::TemplateNotFound(template_id.to_string()))?;
        if template.content.trim().is_empty() {
            return Err(RenderError::EmptyTemplate(template_id.to_string()));
        }

        let mut ctx = build_audit_context(audit, descriptors, records, prices);
        let mut warnings = Vec::new();

        // Loop first: its interior resolves against per-item contexts only,
        // and its totals must exist before the outer region substitutes.
        let (content, totals) = process_loop(
            &template.content,
            DAMAGE_RECORDS_COLLECTION,
            records,
            prices,
            resolver,
            &options.reference_fallback,
            &mut warnings,
        );
        apply_totals(&mut ctx, &totals);

        let content = process_conditionals(&content, &ctx);
        let html = substitute(&content, &ctx);

        Ok(RenderedReport {
            id: Uuid::new_v4(),
            template_id: template.id.clone(),
            engine_version: crate::ENGINE_VERSION.to_string(),
            created_at: Utc::now(),
            html,
            totals,
            warnings,
        })
    }

    /// Render against records fetched from a datastore instead of an
    /// in-memory slice. The audit row's `id` column keys the query.
    #[allow(clippy::too_many_arguments)]
    pub fn render_report_from_store(
        &self,
        template_id: &str,
        audit: &RawRecord,
        store: &dyn RecordStore,
        descriptors: &FieldDescriptors,
        prices: &PriceTable,
        resolver: &dyn AssetResolver,
        options: &RenderOptions,
    ) -> Result<RenderedReport, RenderError> {
        let audit_id = audit.get("id").and_then(|v| v.as_str()).unwrap_or_default();
        let records = store.fetch_records_by_parent(audit_id)?;
        self.render_report(
            template_id,
            audit,
            &records,
            descriptors,
            prices,
            resolver,
            options,
        )
    }

    /// Render and wrap into a self-contained document (title, inline
    /// styles, embedded logo). Assembly failures are soft and land in
    /// `warnings`.
    #[allow(clippy::too_many_arguments)]
    pub fn render_document(
        &self,
        template_id: &str,
        audit: &RawRecord,
        records: &[DamageRecord],
        descriptors: &FieldDescriptors,
        prices: &PriceTable,
        resolver: &dyn AssetResolver,
        options: &RenderOptions,
        document: &DocumentOptions,
    ) -> Result<RenderedReport, RenderError> {
        let mut report = self.render_report(
            template_id,
            audit,
            records,
            descriptors,
            prices,
            resolver,
            options,
        )?;
        report.html = assemble_document(&report.html, document, resolver, &mut report.warnings);
        Ok(report)
    }

    /// Hand assembled HTML to an export backend. Backend failures propagate
    /// as a single error; no partial file is produced.
    pub fn export(
        &self,
        html: &str,
        backend: &dyn DocumentBackend,
        setup: &PageSetup,
    ) -> Result<Vec<u8>, RenderError> {
        Ok(backend.export(html, setup)?)
    }
}

impl Default for ReportPipeline {
    fn default() -> Self {
        Self::new(TemplateRegistry::default())
    }
}
