//! Field Context Builder
//!
//! Turns raw audit rows and damage records into the normalized
//! name -> {label, value} mapping the processing stages consume.
//! Price tables and field descriptors are always passed in explicitly;
//! nothing here reads ambient state.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::format::{self, FieldType, NOT_AVAILABLE};

/// Raw stored row, keyed by column name.
pub type RawRecord = serde_json::Map<String, Value>;

/// Per-field configuration, as managed in settings.
pub type FieldDescriptors = BTreeMap<String, FieldDescriptor>;

/// Damage-type -> unit price lookup.
pub type PriceTable = BTreeMap<String, f64>;

/// Display prefix for audit reference numbers.
pub const REFERENCE_PREFIX: &str = "RA-";

/// Sentinel selections meaning "none" for dependent fields.
pub const NO_HANDRAIL: &str = "No Handrail";
pub const NO_GATE: &str = "No Gate";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDescriptor {
    #[serde(rename = "type", default)]
    pub field_type: FieldType,
    pub label: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub options: Option<Vec<String>>,
    #[serde(default)]
    pub depends_on: Option<String>,
}

/// A resolved field: display label plus display value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldValue {
    pub label: String,
    pub value: String,
}

impl FieldValue {
    pub fn new(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
        }
    }
}

/// The name -> field mapping for one render pass. Built fresh per render,
/// discarded afterwards; downstream stages only read it.
#[derive(Debug, Clone, Default)]
pub struct RenderContext {
    fields: BTreeMap<String, FieldValue>,
}

impl RenderContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, field: FieldValue) {
        self.fields.insert(name.into(), field);
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    pub fn value_of(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(|f| f.value.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<FieldValue> {
        self.fields.remove(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldValue)> {
        self.fields.iter()
    }
}

/// One reported defect tied to an audit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DamageRecord {
    #[serde(default)]
    pub reference_number: Option<String>,
    #[serde(default)]
    pub damage_type: String,
    #[serde(default)]
    pub risk_level: String,
    #[serde(default)]
    pub location_details: String,
    #[serde(default)]
    pub building_area: String,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub recommendation: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub photo_url: Option<String>,
    // Stored as string or number depending on how the row was saved.
    #[serde(default)]
    pub product_cost: Value,
    #[serde(default)]
    pub installation_cost: Value,
}

impl DamageRecord {
    pub fn product_cost(&self) -> f64 {
        cost_to_f64(&self.product_cost)
    }

    pub fn installation_cost(&self) -> f64 {
        cost_to_f64(&self.installation_cost)
    }
}

/// Lenient numeric parse for cost fields: numbers pass through, numeric
/// strings parse, everything else counts as zero.
pub fn cost_to_f64(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    }
}

/// Scalar JSON -> display string. `Null` counts as absent.
fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

fn raw_str<'a>(audit: &'a RawRecord, key: &str) -> Option<&'a str> {
    audit.get(key).and_then(|v| v.as_str()).filter(|s| !s.is_empty())
}

/// Build the outer (audit-level) render context.
///
/// Derived fields are computed first; every remaining audit column is then
/// either formatted through its descriptor or wrapped as an unformatted
/// passthrough. The input row is never mutated.
pub fn build_audit_context(
    audit: &RawRecord,
    descriptors: &FieldDescriptors,
    records: &[DamageRecord],
    prices: &PriceTable,
) -> RenderContext {
    let mut ctx = RenderContext::new();

    ctx.insert(
        "date",
        FieldValue::new("Date", format_audit_date(audit.get("audit_date"))),
    );

    let reference = raw_str(audit, "reference_number").unwrap_or("");
    ctx.insert(
        "referenceNumber",
        FieldValue::new("Reference", format!("{}{}", REFERENCE_PREFIX, reference)),
    );

    // `Sum<f64>` uses -0.0 as its identity, which an empty record set would
    // render as "$-0.00"; fold from +0.0 so zero totals format as "$0.00".
    let price_sum: f64 = records
        .iter()
        .map(|r| prices.get(&r.damage_type).copied().unwrap_or(0.0))
        .fold(0.0, |acc, x| acc + x);
    ctx.insert(
        "totalPrice",
        FieldValue::new("Total Price (excl. GST)", format::format_currency(price_sum)),
    );

    ctx.insert("handrail", FieldValue::new("Handrail", handrail_display(audit)));

    let gate = access_gate_display(audit);
    ctx.insert("accessGate", FieldValue::new("Access Gate", gate.clone()));
    ctx.insert("accessGateType", FieldValue::new("Access Gate Type", gate));

    for (key, value) in audit {
        if ctx.contains(key) {
            continue;
        }
        let field = match descriptors.get(key) {
            Some(desc) => {
                // A dependent field only carries its stored value while the
                // parent selection is real; otherwise it formats as absent.
                let raw = if dependency_met(audit, desc.depends_on.as_deref()) {
                    value_to_string(value)
                } else {
                    None
                };
                FieldValue::new(
                    desc.label.clone(),
                    format::format_value(desc.field_type, raw.as_deref()),
                )
            }
            // Fallback path: unformatted passthrough keyed by column name.
            None => FieldValue::new(
                key.clone(),
                value_to_string(value).unwrap_or_default(),
            ),
        };
        ctx.insert(key.clone(), field);
    }

    // Risk counts: stored audit columns win; otherwise counted from the
    // records, case-insensitively.
    let count_pairs = [
        ("red_risks", "red", "Red Risks"),
        ("amber_risks", "amber", "Amber Risks"),
        ("green_risks", "green", "Green Risks"),
    ];
    for (name, level, label) in count_pairs {
        if !ctx.contains(name) {
            let count = records
                .iter()
                .filter(|r| r.risk_level.eq_ignore_ascii_case(level))
                .count();
            ctx.insert(name, FieldValue::new(label, count.to_string()));
        }
    }

    ctx
}

/// Build the per-item context for one damage record. Loop-body substitution
/// reads from this context only; outer-scope names are not visible inside
/// the loop.
///
/// `reference_fallback` is the already-resolved text for records without an
/// assigned reference number (wording is a caller concern).
pub fn build_record_context(
    record: &DamageRecord,
    prices: &PriceTable,
    reference_fallback: &str,
) -> RenderContext {
    let mut ctx = RenderContext::new();

    let product = record.product_cost();
    let installation = record.installation_cost();

    let reference = record
        .reference_number
        .as_deref()
        .filter(|s| !s.is_empty())
        .unwrap_or(reference_fallback);
    ctx.insert("reference_number", FieldValue::new("Reference", reference));
    ctx.insert("damage_type", FieldValue::new("Damage Type", record.damage_type.clone()));
    ctx.insert("risk_level", FieldValue::new("Risk Level", record.risk_level.clone()));
    ctx.insert(
        "location_details",
        FieldValue::new("Location", record.location_details.clone()),
    );
    ctx.insert(
        "building_area",
        FieldValue::new("Building/Area", record.building_area.clone()),
    );
    ctx.insert(
        "brand",
        FieldValue::new(
            "Brand",
            record
                .brand
                .as_deref()
                .filter(|s| !s.is_empty())
                .unwrap_or("Not specified"),
        ),
    );
    ctx.insert(
        "recommendation",
        FieldValue::new("Recommendation", record.recommendation.clone()),
    );
    ctx.insert("notes", FieldValue::new("Notes", record.notes.clone()));

    if let Some(url) = record.photo_url.as_deref().filter(|s| !s.is_empty()) {
        ctx.insert("photo_url", FieldValue::new("Photo", url));
    }

    let unit_price = prices.get(&record.damage_type).copied().unwrap_or(0.0);
    ctx.insert("price", FieldValue::new("Price", format::format_cost(unit_price)));
    ctx.insert(
        "product_cost",
        FieldValue::new("Materials", format::format_cost(product)),
    );
    ctx.insert(
        "installation_cost",
        FieldValue::new("Installation", format::format_cost(installation)),
    );
    ctx.insert(
        "total_cost",
        FieldValue::new("Total", format::format_cost(product + installation)),
    );

    ctx
}

/// Audit date -> DD/MM/YYYY. Accepts a date-only column or a full
/// timestamp; anything unparseable displays as empty.
fn format_audit_date(value: Option<&Value>) -> String {
    let raw = match value.and_then(|v| v.as_str()) {
        Some(s) if !s.is_empty() => s,
        _ => return String::new(),
    };

    if let Ok(date) = chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date.format("%d/%m/%Y").to_string();
    }
    if let Ok(ts) = chrono::DateTime::parse_from_rfc3339(raw) {
        return ts.date_naive().format("%d/%m/%Y").to_string();
    }
    String::new()
}

/// "2.4m of Standard Handrail", or just the type when there is no length,
/// or the sentinel when no handrail was selected.
fn handrail_display(audit: &RawRecord) -> String {
    let handrail_type = raw_str(audit, "handrail_type");
    let length = raw_str(audit, "handrail_length");

    match (handrail_type, length) {
        (Some(t), Some(len)) if t != NO_HANDRAIL => format!("{}m of {}", len, t),
        (Some(t), _) => t.to_string(),
        (None, _) => NO_HANDRAIL.to_string(),
    }
}

/// Whether a descriptor's `depends_on` parent holds a real selection in
/// this row. A missing, empty, "n/a", or sentinel "none" parent value
/// leaves the dependent field unsatisfied.
fn dependency_met(audit: &RawRecord, parent: Option<&str>) -> bool {
    match parent {
        None => true,
        Some(parent) => match raw_str(audit, parent) {
            Some(v) => v != NO_HANDRAIL && v != NO_GATE && v != NOT_AVAILABLE,
            None => false,
        },
    }
}

fn access_gate_display(audit: &RawRecord) -> String {
    match raw_str(audit, "access_gate") {
        Some(g) if g != NO_GATE => g.to_string(),
        _ => NO_GATE.to_string(),
    }
}

/// Truthiness used by the conditional stage, with dependent-field sentinel
/// handling ahead of the generic rules.
pub fn is_truthy(name: &str, ctx: &RenderContext) -> bool {
    let field = match ctx.get(name) {
        Some(f) => f,
        None => return false,
    };
    let value = field.value.as_str();

    match name {
        // Dependent fields: a sentinel "none" selection is false.
        "handrail" | "handrail_type" | "handrailType" => {
            !value.is_empty() && value != NO_HANDRAIL
        }
        "handrail_length" | "handrailLength" => {
            !value.is_empty() && value != "0" && value != NOT_AVAILABLE
        }
        "accessGate" | "accessGateType" | "access_gate" => {
            !value.is_empty() && value != NO_GATE
        }
        _ => match value {
            // Tri-state yes/no answers (post radio normalization).
            "Yes" => true,
            "No" => false,
            v => !v.is_empty() && v != NOT_AVAILABLE,
        },
    }
}
