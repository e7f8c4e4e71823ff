//! Rack Audit Report Engine - Template Processing Core
//!
//! # The Engine Rules (Non-Negotiable)
//! 1. Templates Are Data, Never Code
//! 2. Rendering Is Pure - All Inputs Passed Explicitly
//! 3. Missing Data Degrades, Never Crashes
//! 4. Output Never Leaks Template Syntax
//! 5. Item Order In Is Item Order Out
//! 6. Print And PDF Receive Identical HTML

pub mod format;
pub mod context;
pub mod template;
pub mod parse;
pub mod render;
pub mod assemble;
pub mod pipeline;

pub use format::FieldType;
pub use context::{
    DamageRecord, FieldDescriptor, FieldDescriptors, FieldValue, PriceTable, RawRecord,
    RenderContext,
};
pub use template::{Template, TemplateId, TemplateRegistry};
pub use parse::{parse, Node};
pub use render::{LoopTotals, GST_RATE};
pub use assemble::{
    AssetError, AssetResolver, DocumentBackend, DocumentOptions, ExportTarget, PageSetup,
    PassthroughResolver,
};
pub use pipeline::{
    RecordStore, RenderError, RenderOptions, RenderedReport, ReportPipeline, StoreError,
};

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// The one collection name the loop stage recognizes today.
pub const DAMAGE_RECORDS_COLLECTION: &str = "damage_records";
