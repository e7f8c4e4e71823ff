//! RackReport CLI - Bridge interface for the front end
//!
//! Commands: templates, render
//! Outputs JSON to stdout
//! Returns non-zero on render failure

use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::path::PathBuf;
use std::process::ExitCode;

use rackreport_core::{
    DamageRecord, DocumentOptions, FieldDescriptors, PassthroughResolver, PriceTable, RawRecord,
    RenderOptions, ReportPipeline, TemplateRegistry,
};

#[derive(Parser)]
#[command(name = "rackreport-cli")]
#[command(about = "RackReport CLI - Rack Audit Report Engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to templates directory
    #[arg(short, long, default_value = "templates")]
    templates_dir: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// List available templates
    Templates {
        /// Include hidden templates
        #[arg(long)]
        all: bool,
    },

    /// Render a report
    Render {
        /// Template ID
        #[arg(short = 'T', long)]
        template: String,

        /// JSON payload (RenderPayload)
        #[arg(short, long)]
        payload: String,

        /// Print only the processed HTML instead of the JSON envelope
        #[arg(long)]
        html_only: bool,
    },
}

#[derive(Deserialize)]
struct RenderPayload {
    audit: RawRecord,
    #[serde(default)]
    damage_records: Vec<DamageRecord>,
    #[serde(default)]
    field_descriptors: FieldDescriptors,
    #[serde(default)]
    damage_prices: PriceTable,
    #[serde(default)]
    options: Option<RenderOptions>,
    #[serde(default)]
    document: Option<DocumentOptions>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Load templates
    let registry = match TemplateRegistry::load_from_dir(&cli.templates_dir) {
        Ok(r) => r,
        Err(e) => {
            eprintln!(r#"{{"error": "Failed to load templates: {}"}}"#, e);
            return ExitCode::FAILURE;
        }
    };

    let pipeline = ReportPipeline::new(registry);

    match cli.command {
        Commands::Templates { all } => {
            let templates = if all {
                pipeline.list_templates()
            } else {
                pipeline.list_visible_templates()
            };
            let listing: Vec<_> = templates
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "id": t.id,
                        "name": t.name,
                        "hidden": t.hidden,
                        "updated_at": t.updated_at,
                    })
                })
                .collect();

            println!("{}", serde_json::to_string_pretty(&listing).unwrap());
            ExitCode::SUCCESS
        }

        Commands::Render {
            template,
            payload,
            html_only,
        } => {
            let payload: RenderPayload = match serde_json::from_str(&payload) {
                Ok(p) => p,
                Err(e) => {
                    println!(r#"{{"success": false, "error": "Invalid payload: {}"}}"#, e);
                    return ExitCode::FAILURE;
                }
            };

            let options = payload.options.unwrap_or_default();
            let resolver = PassthroughResolver;

            let result = match payload.document.as_ref() {
                Some(document) => pipeline.render_document(
                    &template,
                    &payload.audit,
                    &payload.damage_records,
                    &payload.field_descriptors,
                    &payload.damage_prices,
                    &resolver,
                    &options,
                    document,
                ),
                None => pipeline.render_report(
                    &template,
                    &payload.audit,
                    &payload.damage_records,
                    &payload.field_descriptors,
                    &payload.damage_prices,
                    &resolver,
                    &options,
                ),
            };

            match result {
                Ok(report) => {
                    if html_only {
                        println!("{}", report.html);
                    } else {
                        let output = serde_json::json!({
                            "success": true,
                            "report": report,
                        });
                        println!("{}", serde_json::to_string_pretty(&output).unwrap());
                    }
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    let output = serde_json::json!({
                        "success": false,
                        "error": e.to_string(),
                    });
                    println!("{}", serde_json::to_string(&output).unwrap());
                    ExitCode::from(2) // Render failure
                }
            }
        }
    }
}
