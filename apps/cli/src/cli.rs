use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Args as ClapArgs, Parser, Subcommand};
use packgen_template::mapping::{CUSTOMER, DATE, DRAWING_NO, PURCHASE_ORDER, SERIAL_NO};
use packgen_template::{classify, export, Catalog, CellTarget, ExportOutcome, FormState};
use packgen_xlsx::XlsxPackage;

#[derive(Parser)]
#[command(
    name = "packgen",
    version,
    about = "Fill packing list and ITP spreadsheet templates with order details."
)]
pub struct Cli {
    /// Directory holding the template files of the built-in catalog.
    #[arg(long, global = true, value_name = "DIR", default_value = ".")]
    templates_dir: PathBuf,

    /// JSON catalog to use instead of the built-in table.
    #[arg(long, global = true, value_name = "PATH")]
    catalog: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List document types and the equipment offered for each.
    List,
    /// Fill a template and save the result.
    Export(ExportArgs),
    /// Print the default output file name for a selection.
    SuggestName(Selection),
    /// Print the mapped fields of a produced (or template) workbook.
    Inspect {
        /// Workbook to read.
        file: PathBuf,
        /// Document type whose field mapping to use.
        #[arg(long = "type", value_name = "TYPE")]
        document_type: Option<String>,
    },
}

#[derive(ClapArgs)]
struct Selection {
    /// Document type (defaults to "Packing List").
    #[arg(long = "type", value_name = "TYPE")]
    document_type: Option<String>,

    /// Equipment variant (defaults to the first one offered for the type).
    #[arg(long)]
    equipment: Option<String>,
}

#[derive(ClapArgs)]
struct ExportArgs {
    #[command(flatten)]
    selection: Selection,

    #[arg(long, default_value = "")]
    customer: String,

    #[arg(long, default_value = "")]
    purchase_order: String,

    /// dd/mm/YYYY; today when omitted or blank.
    #[arg(long, default_value = "")]
    date: String,

    #[arg(long, default_value = "")]
    drawing_no: String,

    #[arg(long, default_value = "")]
    serial_no: String,

    /// Output path (defaults to the suggested name in the current directory).
    #[arg(long, short = 'o', value_name = "PATH")]
    output: Option<PathBuf>,

    /// Print the write report as JSON after a successful export.
    #[arg(long)]
    json: bool,
}

pub fn run(cli: Cli, today: NaiveDate) -> Result<ExitCode> {
    let catalog = match &cli.catalog {
        Some(path) => Catalog::load(path)
            .with_context(|| format!("failed to load catalog {}", path.display()))?,
        None => Catalog::builtin(&cli.templates_dir),
    };
    log::debug!(
        "catalog: {} document type(s), {} template(s)",
        catalog.document_types().count(),
        catalog.entries().count()
    );

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    match cli.command {
        Command::List => {
            for document_type in catalog.document_types() {
                writeln!(out, "{document_type}")?;
                for equipment in catalog.options_for(document_type)? {
                    writeln!(out, "  {equipment}")?;
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::SuggestName(selection) => {
            let form = form_for(&catalog, &selection, today)?;
            writeln!(out, "{}", form.suggested_file_name(today))?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Export(args) => {
            let mut form = form_for(&catalog, &args.selection, today)?;
            form.set_field(CUSTOMER, args.customer);
            form.set_field(PURCHASE_ORDER, args.purchase_order);
            form.set_field(DATE, args.date);
            form.set_field(DRAWING_NO, args.drawing_no);
            form.set_field(SERIAL_NO, args.serial_no);

            let request = form.to_request(today);
            let destination = args
                .output
                .unwrap_or_else(|| PathBuf::from(form.suggested_file_name(today)));

            let outcome = export(&catalog, &request, &destination);
            match &outcome {
                ExportOutcome::Saved { report, .. } => {
                    writeln!(out, "{}", outcome.message())?;
                    if args.json {
                        serde_json::to_writer_pretty(&mut out, report)?;
                        writeln!(out)?;
                    }
                    Ok(ExitCode::SUCCESS)
                }
                ExportOutcome::Failed { title, message } => {
                    eprintln!("{title}: {message}");
                    Ok(ExitCode::FAILURE)
                }
            }
        }
        Command::Inspect {
            file,
            document_type,
        } => {
            inspect(&catalog, &file, document_type.as_deref(), today, &mut out)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn form_for<'a>(
    catalog: &'a Catalog,
    selection: &Selection,
    today: NaiveDate,
) -> Result<FormState<'a>> {
    let mut form = FormState::new(catalog, today);
    if let Some(document_type) = &selection.document_type {
        form.set_document_type(document_type)?;
    }
    if let Some(equipment) = &selection.equipment {
        form.set_equipment(equipment)?;
    }
    Ok(form)
}

/// Print each mapped field of `file`'s primary sheet, following merges the same way a
/// write would.
fn inspect(
    catalog: &Catalog,
    file: &Path,
    document_type: Option<&str>,
    today: NaiveDate,
    out: &mut impl Write,
) -> Result<()> {
    let form = FormState::new(catalog, today);
    let document_type = document_type.unwrap_or(form.document_type());
    let mapping = catalog.field_mapping(document_type)?;

    let bytes = std::fs::read(file).with_context(|| format!("failed to read {}", file.display()))?;
    let package = XlsxPackage::from_bytes(&bytes)
        .with_context(|| format!("failed to open {}", file.display()))?;
    let sheet = package.primary_worksheet()?;
    let merges = package.merged_regions(&sheet.worksheet_part)?;
    let cells = package.worksheet_cells(&sheet.worksheet_part)?;

    writeln!(out, "sheet: {}", sheet.name)?;
    for field in mapping.iter() {
        let value = match classify(&field.cell, &merges) {
            CellTarget::Direct(cell) | CellTarget::Anchor { anchor: cell, .. } => {
                cells.get(&cell).cloned().unwrap_or_default()
            }
            CellTarget::Unresolved { reason } => format!("<unresolved: {reason}>"),
        };
        writeln!(out, "{} ({}): {value}", field.field, field.cell)?;
    }
    Ok(())
}
