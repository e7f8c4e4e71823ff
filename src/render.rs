//! Processing Stages - Loop, Conditionals, Substitution
//!
//! Evaluates the parsed template against render contexts. Stage order for a
//! full render is: loop expansion, then outer conditionals, then variable
//! substitution with the final sanitization pass. Every stage recovers
//! locally from missing data; none of them return errors.

use serde::{Deserialize, Serialize};

use crate::assemble::{data_uri, AssetResolver};
use crate::context::{
    build_record_context, is_truthy, DamageRecord, PriceTable, RenderContext,
};
use crate::format::format_cost;
use crate::parse::{parse, write_nodes, Node};

/// GST applied to the repair subtotal.
pub const GST_RATE: f64 = 0.10;

/// Optional fields that substitute to a fixed default instead of being
/// stripped when absent from context.
const DEFAULT_FIELDS: &[(&str, &str)] = &[
    ("total_racks", "0"),
    ("compliance_rating", "100"),
    ("next_audit_due", ""),
    ("address", ""),
    ("contact_person", ""),
    ("contact_email", ""),
    ("contact_phone", ""),
    ("auditor_email", ""),
    ("auditor_phone", ""),
];

/// Cross-iteration aggregates accumulated by the loop stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopTotals {
    pub total_materials_cost: f64,
    pub total_installation_cost: f64,
    pub subtotal: f64,
    pub gst: f64,
    pub total_with_gst: f64,
    pub total_damages: usize,
    /// 0-100 risk-weighted score; `None` when there were no records.
    pub compliance_rating: Option<i64>,
}

impl LoopTotals {
    pub fn from_records(records: &[DamageRecord]) -> Self {
        let total_materials_cost: f64 = records.iter().map(|r| r.product_cost()).sum();
        let total_installation_cost: f64 = records.iter().map(|r| r.installation_cost()).sum();
        let subtotal = total_materials_cost + total_installation_cost;
        let gst = subtotal * GST_RATE;
        Self {
            total_materials_cost,
            total_installation_cost,
            subtotal,
            gst,
            total_with_gst: subtotal + gst,
            total_damages: records.len(),
            compliance_rating: compliance_rating(records),
        }
    }
}

/// Risk-weighted compliance score over the whole collection.
///
/// red=3, amber=2, green=1, classified case-insensitively; the worst case is
/// every record red. An all-green collection therefore scores below 100 -
/// that is the literal formula, preserved intentionally.
pub fn compliance_rating(records: &[DamageRecord]) -> Option<i64> {
    if records.is_empty() {
        return None;
    }
    let weight = |level: &str| match level.to_ascii_lowercase().as_str() {
        "red" => 3,
        "amber" => 2,
        "green" => 1,
        _ => 0,
    };
    let weighted_issues: i64 = records.iter().map(|r| weight(&r.risk_level)).sum();
    let max_possible = records.len() as i64 * 3;
    Some((100.0 - (weighted_issues as f64 / max_possible as f64 * 100.0)).round() as i64)
}

/// Expand every `{{#each <collection>}}` block, one fragment per record, in
/// input order. Blocks nested inside an outer `{{#if}}` expand too; the
/// conditional markup around them is re-emitted for the next stage.
///
/// Totals come from the supplied records whether or not the template carries
/// a loop block, so the outer region can reference them either way. A record
/// whose photo reference fails to resolve renders with its photo block
/// absent; the failure goes into `warnings` for the caller to log.
pub fn process_loop(
    content: &str,
    collection: &str,
    records: &[DamageRecord],
    prices: &PriceTable,
    resolver: &dyn AssetResolver,
    reference_fallback: &str,
    warnings: &mut Vec<String>,
) -> (String, LoopTotals) {
    let nodes = parse(content);
    let totals = LoopTotals::from_records(records);
    let mut out = String::with_capacity(content.len());
    loop_walk(
        &nodes,
        collection,
        records,
        prices,
        resolver,
        reference_fallback,
        warnings,
        &mut out,
    );
    (out, totals)
}

#[allow(clippy::too_many_arguments)]
fn loop_walk(
    nodes: &[Node],
    collection: &str,
    records: &[DamageRecord],
    prices: &PriceTable,
    resolver: &dyn AssetResolver,
    reference_fallback: &str,
    warnings: &mut Vec<String>,
    out: &mut String,
) {
    for node in nodes {
        match node {
            Node::Each { name, body } if name == collection => {
                for record in records {
                    let ctx = item_context(record, prices, resolver, reference_fallback, warnings);
                    render_resolved(body, &ctx, out);
                }
            }
            Node::If {
                name,
                then_branch,
                else_branch,
            } => {
                // Keep the conditional markup standing; only its interior
                // loops are expanded here. The conditional stage decides
                // which branch survives.
                out.push_str("{{#if ");
                out.push_str(name);
                out.push_str("}}");
                loop_walk(
                    then_branch,
                    collection,
                    records,
                    prices,
                    resolver,
                    reference_fallback,
                    warnings,
                    out,
                );
                if !else_branch.is_empty() {
                    out.push_str("{{else}}");
                    loop_walk(
                        else_branch,
                        collection,
                        records,
                        prices,
                        resolver,
                        reference_fallback,
                        warnings,
                        out,
                    );
                }
                out.push_str("{{/if}}");
            }
            other => write_nodes(std::slice::from_ref(other), out),
        }
    }
}

/// Per-item context, with the photo reference swapped for embeddable data
/// when the resolver produces bytes and dropped entirely when it fails.
fn item_context(
    record: &DamageRecord,
    prices: &PriceTable,
    resolver: &dyn AssetResolver,
    reference_fallback: &str,
    warnings: &mut Vec<String>,
) -> RenderContext {
    let mut ctx = build_record_context(record, prices, reference_fallback);
    if let Some(reference) = ctx.value_of("photo_url").map(str::to_string) {
        match resolver.resolve(&reference) {
            Ok(Some(bytes)) => {
                let label = ctx.get("photo_url").map(|f| f.label.clone()).unwrap_or_default();
                ctx.insert("photo_url", crate::context::FieldValue::new(label, data_uri(&bytes)));
            }
            Ok(None) => {}
            Err(e) => {
                ctx.remove("photo_url");
                warnings.push(format!("photo asset {}: {}", reference, e));
            }
        }
    }
    ctx
}

/// Fully resolve a loop-body fragment against the per-item context. Inner
/// conditionals follow the standard truthiness rules; inner variables only
/// see the per-item context, and unknown names render empty.
fn render_resolved(nodes: &[Node], ctx: &RenderContext, out: &mut String) {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Variable(name) => {
                if let Some(value) = ctx.value_of(name) {
                    out.push_str(value);
                }
            }
            Node::If {
                name,
                then_branch,
                else_branch,
            } => {
                let branch = if is_truthy(name, ctx) { then_branch } else { else_branch };
                render_resolved(branch, ctx, out);
            }
            // Nested loops are not supported; the span is dropped.
            Node::Each { .. } => {}
        }
    }
}

/// Resolve `{{#if}}` blocks outside the loop span against the outer context.
/// Loop blocks are re-emitted untouched; their interiors are per-item
/// territory. Variables are left for the substitution stage.
pub fn process_conditionals(content: &str, ctx: &RenderContext) -> String {
    let nodes = parse(content);
    let mut out = String::with_capacity(content.len());
    conditionals_walk(&nodes, ctx, &mut out);
    out
}

fn conditionals_walk(nodes: &[Node], ctx: &RenderContext, out: &mut String) {
    for node in nodes {
        match node {
            Node::If {
                name,
                then_branch,
                else_branch,
            } => {
                let branch = if is_truthy(name, ctx) { then_branch } else { else_branch };
                conditionals_walk(branch, ctx, out);
            }
            other => write_nodes(std::slice::from_ref(other), out),
        }
    }
}

/// Replace every remaining `{{name}}` token from the context, applying the
/// fixed defaults for well-known optional fields, then strip whatever
/// template syntax is still standing. The output never contains `{{...}}`
/// spans; running `substitute` on its own output is a no-op.
pub fn substitute(content: &str, ctx: &RenderContext) -> String {
    let nodes = parse(content);
    let mut out = String::with_capacity(content.len());
    substitute_walk(&nodes, ctx, &mut out);
    sanitize(&out)
}

fn substitute_walk(nodes: &[Node], ctx: &RenderContext, out: &mut String) {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Variable(name) => {
                if let Some(value) = ctx.value_of(name) {
                    out.push_str(value);
                } else if let Some((_, default)) =
                    DEFAULT_FIELDS.iter().find(|(field, _)| field == name)
                {
                    out.push_str(default);
                }
                // Unknown name: stripped.
            }
            // A conditional that survived to this stage never matched a
            // real field; the whole span is dropped.
            Node::If { .. } => {}
            // Loop tags left standing lose their markers but keep their
            // interior text, with variables substituted in place.
            Node::Each { body, .. } => substitute_walk(body, ctx, out),
        }
    }
}

/// Final sanitization: remove any remaining `{{...}}` spans so template
/// syntax never reaches the rendered document. Hides authoring bugs by
/// design; that trade-off is accepted.
pub fn sanitize(content: &str) -> String {
    let mut out = String::with_capacity(content.len());
    let mut rest = content;
    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        match rest[open + 2..].find("}}") {
            Some(close) => rest = &rest[open + 2 + close + 2..],
            None => {
                // No closing braces: not a token, keep it.
                out.push_str(&rest[open..]);
                return out;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Inject the loop totals into the outer context so the surrounding
/// (non-loop) template region can reference them.
pub fn apply_totals(ctx: &mut RenderContext, totals: &LoopTotals) {
    use crate::context::FieldValue;

    ctx.insert(
        "totalMaterialsCost",
        FieldValue::new("Materials", format_cost(totals.total_materials_cost)),
    );
    ctx.insert(
        "totalInstallationCost",
        FieldValue::new("Installation", format_cost(totals.total_installation_cost)),
    );
    ctx.insert("subtotal", FieldValue::new("Subtotal", format_cost(totals.subtotal)));
    ctx.insert("gst", FieldValue::new("GST", format_cost(totals.gst)));
    ctx.insert(
        "totalWithGst",
        FieldValue::new("Total (incl. GST)", format_cost(totals.total_with_gst)),
    );
    ctx.insert(
        "total_damages",
        FieldValue::new("Total Damages", totals.total_damages.to_string()),
    );

    // Only when the caller did not supply a rating of their own.
    if !ctx.contains("compliance_rating") {
        if let Some(rating) = totals.compliance_rating {
            ctx.insert(
                "compliance_rating",
                FieldValue::new("Compliance Rating", rating.to_string()),
            );
        }
    }
}
