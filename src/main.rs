//! sheet2table - print the sheets of an Excel workbook as tables

use anyhow::Context;
use anyhow::Result;
use clap::ArgGroup;
use clap::Parser;
use clap::ValueEnum;
use sheet_table::Dataset;
use sheet_table::Table;
use sheet_table::Workbook;
use std::io;
use std::io::BufWriter;
use std::io::Write;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "sheet2table")]
#[command(author, version, about = "Print the sheets of an .xls or .xlsx workbook as tables")]
#[command(group(ArgGroup::new("selector").args(["sheet", "index", "list"])))]
struct Cli {
    /// Input workbook (xls, xlsx)
    file: PathBuf,

    /// Only print the sheet with this name
    #[arg(short, long)]
    sheet: Option<String>,

    /// Only print the sheet at this position (0-based)
    #[arg(short, long)]
    index: Option<usize>,

    /// List the sheet names and exit
    #[arg(short, long)]
    list: bool,

    /// Treat the first row as data and name the columns Column1, Column2, ...
    #[arg(long)]
    no_header: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Tsv)]
    format: OutputFormat,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// Tab-separated values, one block per table
    Tsv,
    /// A single JSON document
    Json,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logger(cli.verbose);

    let header = !cli.no_header;
    let path = &cli.file;
    let mut output = BufWriter::new(io::stdout().lock());

    if cli.list {
        let workbook = Workbook::open(path)
            .with_context(|| format!("Failed to open '{}'", path.display()))?;
        for name in workbook.sheet_names() {
            writeln!(output, "{name}")?;
        }
        return Ok(output.flush()?);
    }

    let dataset = if let Some(name) = &cli.sheet {
        let table = sheet_table::read_table_by_name(path, name, header)
            .with_context(|| format!("Failed to read sheet '{}' of '{}'", name, path.display()))?;
        Dataset { tables: vec![table] }
    } else if let Some(index) = cli.index {
        let table = sheet_table::read_table_by_index(path, index, header)
            .with_context(|| format!("Failed to read sheet {} of '{}'", index, path.display()))?;
        Dataset { tables: vec![table] }
    } else {
        sheet_table::read_dataset(path, header)
            .with_context(|| format!("Failed to read '{}'", path.display()))?
    };

    match cli.format {
        OutputFormat::Tsv => write_tsv(&mut output, &dataset)?,
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut output, &dataset).context("Failed to write JSON")?;
            writeln!(output)?;
        }
    }
    Ok(output.flush()?)
}

/// `RUST_LOG` wins over `-v`; without either only warnings are shown.
fn init_logger(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();
}

fn write_tsv<W: Write>(output: &mut W, dataset: &Dataset) -> Result<()> {
    for (position, table) in dataset.tables.iter().enumerate() {
        if position > 0 {
            writeln!(output)?;
        }
        write_table(output, table)?;
    }
    Ok(())
}

fn write_table<W: Write>(output: &mut W, table: &Table) -> Result<()> {
    writeln!(output, "# {}", table.name)?;
    write_line(output, &table.columns)?;
    for row in &table.rows {
        write_line(output, row)?;
    }
    Ok(())
}

fn write_line<W: Write>(output: &mut W, values: &[String]) -> Result<()> {
    let line = values.iter().map(|value| escape(value)).collect::<Vec<_>>().join("\t");
    writeln!(output, "{line}")?;
    Ok(())
}

/// Escapes the characters that would break the TSV layout
fn escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for character in value.chars() {
        match character {
            '\\' => escaped.push_str("\\\\"),
            '\t' => escaped.push_str("\\t"),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            _ => escaped.push(character),
        }
    }
    escaped
}
