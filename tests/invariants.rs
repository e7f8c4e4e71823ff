//! Engine Invariant Tests
//!
//! These tests verify the rendering guarantees end to end.

use serde_json::json;

use rackreport_core::{
    AssetError, AssetResolver, DamageRecord, DocumentBackend, DocumentOptions, ExportTarget,
    FieldDescriptor, FieldDescriptors, FieldType, PageSetup, PassthroughResolver, PriceTable,
    RawRecord, RenderError, RenderOptions, ReportPipeline, Template, TemplateRegistry,
};

fn make_template(content: &str) -> Template {
    Template {
        id: "audit-report".to_string(),
        name: "Audit Report".to_string(),
        content: content.to_string(),
        hidden: false,
        updated_at: None,
    }
}

fn make_pipeline(content: &str) -> ReportPipeline {
    let mut registry = TemplateRegistry::new();
    registry.register(make_template(content));
    ReportPipeline::new(registry)
}

fn audit_row() -> RawRecord {
    json!({
        "audit_date": "2025-03-14",
        "reference_number": "1042",
        "site_name": "Acme Warehouse",
        "auditor_name": "J. Doe"
    })
    .as_object()
    .cloned()
    .unwrap()
}

fn record(damage_type: &str, risk: &str, product: f64, install: f64) -> DamageRecord {
    DamageRecord {
        damage_type: damage_type.to_string(),
        risk_level: risk.to_string(),
        product_cost: json!(product),
        installation_cost: json!(install),
        ..Default::default()
    }
}

fn render(pipeline: &ReportPipeline, audit: &RawRecord, records: &[DamageRecord]) -> String {
    pipeline
        .render_report(
            "audit-report",
            audit,
            records,
            &FieldDescriptors::new(),
            &PriceTable::new(),
            &PassthroughResolver,
            &RenderOptions::default(),
        )
        .unwrap()
        .html
}

struct FailingResolver;
impl AssetResolver for FailingResolver {
    fn resolve(&self, reference: &str) -> Result<Option<Vec<u8>>, AssetError> {
        Err(AssetError::Fetch(reference.to_string()))
    }
}

#[test]
fn invariant_end_to_end_scenario() {
    let pipeline = make_pipeline(
        "{{#each damage_records}}<p>{{damage_type}}:{{risk_level}}</p>{{/each}} Total: {{totalWithGst}}",
    );
    let records = vec![record("Upright Damaged", "RED", 100.0, 50.0)];

    let html = render(&pipeline, &audit_row(), &records);
    assert_eq!(html, "<p>Upright Damaged:RED</p> Total: 165.00");
}

#[test]
fn invariant_totals_correctness() {
    let pipeline = make_pipeline(
        "{{#each damage_records}}{{/each}}{{totalMaterialsCost}}|{{totalInstallationCost}}|{{subtotal}}|{{gst}}|{{totalWithGst}}",
    );
    let records = vec![
        record("a", "red", 10.0, 5.0),
        record("b", "green", 0.0, 0.0),
        record("c", "amber", 7.5, 2.5),
    ];

    let html = render(&pipeline, &audit_row(), &records);
    assert_eq!(html, "17.50|7.50|25.00|2.50|27.50");
}

#[test]
fn invariant_compliance_rating_formula() {
    let pipeline = make_pipeline("{{#each damage_records}}{{/each}}rating={{compliance_rating}}");
    let records = vec![record("a", "red", 0.0, 0.0), record("b", "GREEN", 0.0, 0.0)];

    let html = render(&pipeline, &audit_row(), &records);
    assert_eq!(html, "rating=33");
}

#[test]
fn invariant_compliance_rating_defaults_to_100() {
    // No records means no computed rating; the substitution default holds.
    let pipeline = make_pipeline("rating={{compliance_rating}}");
    let html = render(&pipeline, &audit_row(), &[]);
    assert_eq!(html, "rating=100");
}

#[test]
fn invariant_supplied_rating_wins() {
    let pipeline = make_pipeline("{{#each damage_records}}{{/each}}rating={{compliance_rating}}");
    let mut audit = audit_row();
    audit.insert("compliance_rating".to_string(), json!("88"));
    let records = vec![record("a", "red", 0.0, 0.0)];

    let html = render(&pipeline, &audit, &records);
    assert_eq!(html, "rating=88");
}

#[test]
fn invariant_loop_order_preserved() {
    let pipeline = make_pipeline("{{#each damage_records}}[{{damage_type}}]{{/each}}");
    let records = vec![
        record("A", "red", 0.0, 0.0),
        record("B", "amber", 0.0, 0.0),
        record("C", "green", 0.0, 0.0),
    ];

    let html = render(&pipeline, &audit_row(), &records);
    assert_eq!(html, "[A][B][C]");
}

#[test]
fn invariant_loop_inside_conditional_expands() {
    let pipeline = make_pipeline(
        "{{#if site_name}}{{#each damage_records}}[{{damage_type}}]{{/each}}{{/if}} T:{{totalWithGst}}",
    );
    let records = vec![record("Upright Damaged", "RED", 100.0, 50.0)];

    let html = render(&pipeline, &audit_row(), &records);
    assert_eq!(html, "[Upright Damaged] T:165.00");
}

#[test]
fn invariant_totals_present_without_loop_block() {
    // No loop block in the template; the records still drive the totals.
    let pipeline = make_pipeline("T:{{totalWithGst}}");
    let records = vec![record("Upright Damaged", "RED", 100.0, 50.0)];

    let html = render(&pipeline, &audit_row(), &records);
    assert_eq!(html, "T:165.00");
}

#[test]
fn invariant_conditional_truthiness_law() {
    let mut descriptors = FieldDescriptors::new();
    descriptors.insert(
        "load_signs_fitted".to_string(),
        FieldDescriptor {
            field_type: FieldType::Radio,
            label: "Load Signs Fitted".to_string(),
            ..Default::default()
        },
    );

    for (stored, expected) in [("yes", "IF"), ("YES", "IF"), ("nO", "ELSE"), ("No", "ELSE")] {
        let pipeline = make_pipeline("{{#if load_signs_fitted}}IF{{else}}ELSE{{/if}}");
        let mut audit = audit_row();
        audit.insert("load_signs_fitted".to_string(), json!(stored));

        let html = pipeline
            .render_report(
                "audit-report",
                &audit,
                &[],
                &descriptors,
                &PriceTable::new(),
                &PassthroughResolver,
                &RenderOptions::default(),
            )
            .unwrap()
            .html;
        assert_eq!(html, expected, "stored value {:?}", stored);
    }
}

#[test]
fn invariant_missing_field_renders_empty() {
    let pipeline = make_pipeline("[{{nonexistent_field}}]");
    let html = render(&pipeline, &audit_row(), &[]);
    assert_eq!(html, "[]");
}

#[test]
fn invariant_substitution_idempotent() {
    let pipeline = make_pipeline("{{site_name}} {{missing}} {{#if absent}}x{{/if}} done");
    let html = render(&pipeline, &audit_row(), &[]);
    assert!(!html.contains("{{"));
    assert!(html.contains("Acme Warehouse"));

    // A second pass over the output changes nothing.
    let ctx = rackreport_core::RenderContext::new();
    assert_eq!(rackreport_core::render::substitute(&html, &ctx), html);
}

#[test]
fn invariant_photo_failure_degrades_per_item() {
    let pipeline = make_pipeline(
        "{{#each damage_records}}<div>{{damage_type}}{{#if photo_url}}<img src=\"{{photo_url}}\" alt=\"Damage Photo\">{{/if}}</div>{{/each}}",
    );
    let mut with_photo = record("Beam Bent", "amber", 0.0, 0.0);
    with_photo.photo_url = Some("missing.jpg".to_string());
    let records = vec![with_photo, record("Upright Damaged", "red", 0.0, 0.0)];

    let report = pipeline
        .render_report(
            "audit-report",
            &audit_row(),
            &records,
            &FieldDescriptors::new(),
            &PriceTable::new(),
            &FailingResolver,
            &RenderOptions::default(),
        )
        .unwrap();

    // The failed photo block is absent; sibling fields still render.
    assert_eq!(
        report.html,
        "<div>Beam Bent</div><div>Upright Damaged</div>"
    );
    assert_eq!(report.warnings.len(), 1);
    assert!(report.warnings[0].contains("missing.jpg"));
}

#[test]
fn invariant_photo_embedded_when_resolved() {
    struct JpegResolver;
    impl AssetResolver for JpegResolver {
        fn resolve(&self, _r: &str) -> Result<Option<Vec<u8>>, AssetError> {
            Ok(Some(vec![0xFF, 0xD8, 0x00]))
        }
    }

    let pipeline = make_pipeline(
        "{{#each damage_records}}{{#if photo_url}}<img src=\"{{photo_url}}\" alt=\"Damage Photo\">{{/if}}{{/each}}",
    );
    let mut rec = record("Beam Bent", "amber", 0.0, 0.0);
    rec.photo_url = Some("photo.jpg".to_string());

    let report = pipeline
        .render_report(
            "audit-report",
            &audit_row(),
            &[rec],
            &FieldDescriptors::new(),
            &PriceTable::new(),
            &JpegResolver,
            &RenderOptions::default(),
        )
        .unwrap();

    assert!(report.html.contains("data:image/jpeg;base64,"));
    assert!(report.warnings.is_empty());
}

#[test]
fn invariant_malformed_block_does_not_crash() {
    let pipeline = make_pipeline("before {{#if notes}} dangling");
    let html = render(&pipeline, &audit_row(), &[]);
    // The unbalanced span degrades to text, then sanitization removes the
    // tag itself; rendering completes.
    assert_eq!(html, "before  dangling");
}

#[test]
fn invariant_template_not_found_error() {
    let pipeline = make_pipeline("x");
    let err = pipeline
        .render_report(
            "nonexistent",
            &audit_row(),
            &[],
            &FieldDescriptors::new(),
            &PriceTable::new(),
            &PassthroughResolver,
            &RenderOptions::default(),
        )
        .unwrap_err();
    assert!(matches!(err, RenderError::TemplateNotFound(_)));
    assert!(err.to_string().contains("Template not found"));
}

#[test]
fn invariant_empty_template_error() {
    let pipeline = make_pipeline("   ");
    let err = pipeline
        .render_report(
            "audit-report",
            &audit_row(),
            &[],
            &FieldDescriptors::new(),
            &PriceTable::new(),
            &PassthroughResolver,
            &RenderOptions::default(),
        )
        .unwrap_err();
    assert!(matches!(err, RenderError::EmptyTemplate(_)));
}

#[test]
fn invariant_export_paths_get_identical_html() {
    use std::cell::RefCell;

    struct CapturingBackend {
        target: ExportTarget,
        seen: RefCell<String>,
    }
    impl DocumentBackend for CapturingBackend {
        fn target(&self) -> ExportTarget {
            self.target
        }
        fn export(&self, html: &str, _setup: &PageSetup) -> Result<Vec<u8>, AssetError> {
            *self.seen.borrow_mut() = html.to_string();
            Ok(html.as_bytes().to_vec())
        }
    }

    let pipeline = make_pipeline("<h1>{{site_name}}</h1>");
    let document = DocumentOptions {
        title: "Audit Report".to_string(),
        styles: "h1{color:#333}".to_string(),
        logo_reference: None,
    };

    let report = pipeline
        .render_document(
            "audit-report",
            &audit_row(),
            &[],
            &FieldDescriptors::new(),
            &PriceTable::new(),
            &PassthroughResolver,
            &RenderOptions::default(),
            &document,
        )
        .unwrap();

    let print = CapturingBackend { target: ExportTarget::Print, seen: RefCell::new(String::new()) };
    let pdf = CapturingBackend { target: ExportTarget::Pdf, seen: RefCell::new(String::new()) };

    pipeline.export(&report.html, &print, &PageSetup::default()).unwrap();
    pipeline.export(&report.html, &pdf, &PageSetup::default()).unwrap();

    assert_eq!(*print.seen.borrow(), *pdf.seen.borrow());
    assert!(report.html.starts_with("<!DOCTYPE html>"));
    assert!(report.html.contains("<h1>Acme Warehouse</h1>"));
}

#[test]
fn invariant_reference_fallback_is_caller_supplied() {
    let pipeline = make_pipeline("{{#each damage_records}}{{reference_number}}{{/each}}");
    let records = vec![record("a", "red", 0.0, 0.0)];

    let html = pipeline
        .render_report(
            "audit-report",
            &audit_row(),
            &records,
            &FieldDescriptors::new(),
            &PriceTable::new(),
            &PassthroughResolver,
            &RenderOptions {
                reference_fallback: "Will be assigned on save".to_string(),
            },
        )
        .unwrap()
        .html;
    assert_eq!(html, "Will be assigned on save");
}

#[test]
fn invariant_store_backed_render() {
    use rackreport_core::{RecordStore, StoreError};
    use std::collections::HashMap;

    struct MemoryStore {
        by_parent: HashMap<String, Vec<DamageRecord>>,
    }
    impl RecordStore for MemoryStore {
        fn fetch_records_by_parent(&self, parent_id: &str) -> Result<Vec<DamageRecord>, StoreError> {
            Ok(self.by_parent.get(parent_id).cloned().unwrap_or_default())
        }
        fn upsert_record(
            &mut self,
            _table: &str,
            record: serde_json::Value,
        ) -> Result<serde_json::Value, StoreError> {
            Ok(record)
        }
    }

    let mut by_parent = HashMap::new();
    by_parent.insert("audit-7".to_string(), vec![record("Upright Damaged", "RED", 100.0, 50.0)]);
    let store = MemoryStore { by_parent };

    let pipeline = make_pipeline("{{#each damage_records}}{{damage_type}}{{/each}}={{totalWithGst}}");
    let mut audit = audit_row();
    audit.insert("id".to_string(), json!("audit-7"));

    let report = pipeline
        .render_report_from_store(
            "audit-report",
            &audit,
            &store,
            &FieldDescriptors::new(),
            &PriceTable::new(),
            &PassthroughResolver,
            &RenderOptions::default(),
        )
        .unwrap();
    assert_eq!(report.html, "Upright Damaged=165.00");
}

#[test]
fn invariant_report_carries_engine_version() {
    let pipeline = make_pipeline("x");
    let report = pipeline
        .render_report(
            "audit-report",
            &audit_row(),
            &[],
            &FieldDescriptors::new(),
            &PriceTable::new(),
            &PassthroughResolver,
            &RenderOptions::default(),
        )
        .unwrap();
    assert_eq!(report.engine_version, rackreport_core::ENGINE_VERSION);
}

#[test]
fn invariant_registry_loads_from_dir() {
    let dir = tempfile::tempdir().unwrap();
    let visible = serde_json::json!({
        "id": "t1",
        "name": "Visible",
        "content": "{{site_name}}"
    });
    let hidden = serde_json::json!({
        "id": "t2",
        "name": "Hidden",
        "content": "x",
        "hidden": true
    });
    std::fs::write(dir.path().join("t1.json"), visible.to_string()).unwrap();
    std::fs::write(dir.path().join("t2.json"), hidden.to_string()).unwrap();
    std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

    let registry = TemplateRegistry::load_from_dir(dir.path()).unwrap();
    assert_eq!(registry.list().len(), 2);
    assert_eq!(registry.list_visible().len(), 1);
    assert!(registry.get("t2").is_some());
}
