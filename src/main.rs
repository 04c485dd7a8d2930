//! Purpose: `csvtable` CLI entry point: query and mutate one CSV file from the shell.
//! Role: Binary crate root; parses args, runs one store operation, emits JSON on stdout.
//! Invariants: Mutating commands save the whole file once, after the mutation succeeds.
//! Invariants: Non-interactive errors are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
use std::io::{self, IsTerminal};
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum, ValueHint};
use serde_json::{Map, Value as JsonValue, json};
use std::error::Error as StdError;
use tracing_subscriber::EnvFilter;

use csvtable::api::{
    Error, ErrorKind, ExprUpdate, Row, SaveOptions, SchemaPolicy, Store, StoreOptions,
    UnknownColumns, Update, Updates, Value, compile_where_clause, to_exit_code,
};

#[derive(Parser)]
#[command(
    name = "csvtable",
    version,
    about = "Query and edit a CSV file as a table",
    long_about = None,
    after_help = r#"EXAMPLES
  $ csvtable people.csv info
  $ csvtable people.csv query --where '.Age > 30' --columns ID,Name
  $ csvtable people.csv add ID=3 Name=Cy Age=41
  $ csvtable people.csv add --json '{"ID": 4, "Name": "Di"}'
  $ csvtable people.csv update --where '.Age > 30' --compute 'Age=.Age + 1' --set Status=senior
  $ csvtable people.csv delete --where '.ID == 1'

Expressions are jq filters evaluated against each row as a JSON object.
Set RUST_LOG=info (or debug) to see load/save and mutation logs on stderr."#,
    arg_required_else_help = true
)]
struct Cli {
    #[arg(help = "Backing CSV file", value_hint = ValueHint::FilePath)]
    file: PathBuf,
    #[arg(long, help = "Advisory row-identifier column")]
    index: Option<String>,
    #[arg(long, help = "Start from an empty table if the file does not exist")]
    create: bool,
    #[arg(
        long,
        default_value = ",",
        value_parser = parse_delimiter,
        help = "Field delimiter (single ASCII character)"
    )]
    delimiter: u8,
    #[arg(long, help = "Keep every field as a string (no number/bool inference)")]
    raw: bool,
    #[arg(long, default_value = "auto", help = "Colorize error output")]
    color: ColorMode,
    #[command(subcommand)]
    command: Command,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ColorMode {
    Auto,
    Always,
    Never,
}

impl ColorMode {
    fn use_color(self, is_tty: bool) -> bool {
        match self {
            ColorMode::Auto => is_tty,
            ColorMode::Always => true,
            ColorMode::Never => false,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    #[command(about = "Print path, columns, and row count")]
    Info,
    #[command(about = "Print matching rows as JSON lines")]
    Query {
        #[arg(long = "where", value_name = "EXPR", help = "Row filter (repeatable, AND-ed)")]
        wheres: Vec<String>,
        #[arg(
            long,
            value_delimiter = ',',
            value_name = "COLS",
            help = "Only output these columns, in this order"
        )]
        columns: Vec<String>,
    },
    #[command(about = "Append one row and save")]
    Add {
        #[arg(required_unless_present = "json", value_name = "COL=VALUE")]
        fields: Vec<String>,
        #[arg(long, value_name = "OBJECT", conflicts_with = "fields", help = "Row as a JSON object")]
        json: Option<String>,
        #[arg(long, help = "Reject columns the table does not already have")]
        strict: bool,
    },
    #[command(about = "Update matching rows and save")]
    Update {
        #[arg(long = "where", required = true, value_name = "EXPR")]
        wheres: Vec<String>,
        #[arg(long, value_name = "COL=VALUE", help = "Assign a literal value")]
        set: Vec<String>,
        #[arg(long, value_name = "COL=EXPR", help = "Assign the result of an expression")]
        compute: Vec<String>,
        #[arg(long, help = "Create columns the table does not already have")]
        extend: bool,
    },
    #[command(about = "Delete matching rows and save")]
    Delete {
        #[arg(long = "where", required = true, value_name = "EXPR")]
        wheres: Vec<String>,
    },
}

fn main() {
    init_tracing();
    let cli = Cli::parse();
    let color_mode = cli.color;
    let exit_code = match run(cli) {
        Ok(()) => 0,
        Err(err) => {
            let err = add_hint(err);
            emit_error(&err, color_mode);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

fn run(cli: Cli) -> Result<(), Error> {
    let mut options = StoreOptions::new()
        .with_create_if_missing(cli.create)
        .with_delimiter(cli.delimiter)
        .with_infer_types(!cli.raw);
    if let Some(index) = &cli.index {
        options = options.with_index_column(index.clone());
    }
    let field = |text: &str| {
        if cli.raw {
            Value::raw(text)
        } else {
            Value::infer(text)
        }
    };

    match cli.command {
        Command::Info => {
            let store = Store::open_with(&cli.file, options)?;
            emit_json(json!({
                "path": store.path().display().to_string(),
                "columns": store.columns(),
                "rows": store.len(),
                "index": store.index_column(),
            }));
        }
        Command::Query { wheres, columns } => {
            let store = Store::open_with(&cli.file, options)?;
            let clause = compile_where_clause(&wheres)?;
            let rows = if columns.is_empty() {
                store.query(&clause)
            } else {
                let columns: Vec<&str> = columns.iter().map(String::as_str).collect();
                store.query_columns(&clause, &columns)
            };
            for row in rows {
                println!("{}", row.to_json());
            }
        }
        Command::Add {
            fields,
            json,
            strict,
        } => {
            if strict {
                options = options.with_schema_policy(SchemaPolicy::strict());
            }
            let row = match json {
                Some(text) => parse_json_row(&text)?,
                None => fields
                    .iter()
                    .map(|arg| parse_assignment(arg).map(|(column, text)| (column, field(text))))
                    .collect::<Result<Row, _>>()?,
            };
            let mut store = Store::open_with(&cli.file, options)?;
            store.add_row(row)?;
            store.save_changes(&SaveOptions::new())?;
            emit_json(json!({ "added": 1, "rows": store.len() }));
        }
        Command::Update {
            wheres,
            set,
            compute,
            extend,
        } => {
            if extend {
                options = options.with_schema_policy(SchemaPolicy {
                    update: UnknownColumns::Extend,
                    ..SchemaPolicy::new()
                });
            }
            let clause = compile_where_clause(&wheres)?;
            let mut updates = Updates::new();
            for arg in &set {
                let (column, text) = parse_assignment(arg)?;
                updates.insert(column, Update::literal(field(text)));
            }
            for arg in &compute {
                let (column, expr) = parse_assignment(arg)?;
                updates.insert(column, Update::computed(ExprUpdate::compile(expr)?));
            }
            if updates.is_empty() {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message("nothing to update")
                    .with_hint("Pass at least one --set COL=VALUE or --compute COL=EXPR."));
            }
            let mut store = Store::open_with(&cli.file, options)?;
            let updated = store.update_data(&clause, &updates)?;
            store.save_changes(&SaveOptions::new())?;
            emit_json(json!({ "updated": updated }));
        }
        Command::Delete { wheres } => {
            let clause = compile_where_clause(&wheres)?;
            let mut store = Store::open_with(&cli.file, options)?;
            let deleted = store.delete_rows(&clause);
            store.save_changes(&SaveOptions::new())?;
            emit_json(json!({ "deleted": deleted }));
        }
    }
    Ok(())
}

fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value.as_bytes() {
        [byte] if byte.is_ascii() => Ok(*byte),
        _ if value == "\\t" => Ok(b'\t'),
        _ => Err("delimiter must be a single ASCII character".to_string()),
    }
}

fn parse_assignment(arg: &str) -> Result<(String, &str), Error> {
    match arg.split_once('=') {
        Some((column, value)) if !column.is_empty() => Ok((column.to_string(), value)),
        _ => Err(Error::new(ErrorKind::Usage)
            .with_message(format!("expected COL=VALUE, got `{arg}`"))
            .with_hint("Example: Age=42 or Name=\"Ann Lee\"")),
    }
}

fn parse_json_row(text: &str) -> Result<Row, Error> {
    let value: JsonValue = serde_json::from_str(text).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message("invalid JSON row")
            .with_hint("Example: --json '{\"ID\": 3, \"Name\": \"Cy\"}'")
            .with_source(err)
    })?;
    match value.as_object() {
        Some(object) => Ok(Row::from_json(object)),
        None => Err(Error::new(ErrorKind::Usage)
            .with_message("JSON row must be an object")
            .with_hint("Example: --json '{\"ID\": 3, \"Name\": \"Cy\"}'")),
    }
}

fn add_hint(err: Error) -> Error {
    if err.hint().is_some() {
        return err;
    }
    match err.kind() {
        ErrorKind::NotFound => err.with_hint("File does not exist. Pass --create to start empty."),
        ErrorKind::MalformedInput => err.with_hint(
            "Every row needs as many fields as the header. Check --delimiter and quoting.",
        ),
        ErrorKind::UnknownColumn => err.with_hint(
            "Check column names with `csvtable FILE info`; update --extend creates new columns.",
        ),
        ErrorKind::SchemaMismatch => {
            err.with_hint("Drop --strict to let new columns extend the table.")
        }
        ErrorKind::Io => err.with_hint("I/O error. Check the path, permissions, and disk space."),
        _ => err,
    }
}

fn emit_json(value: JsonValue) {
    let json = if io::stdout().is_terminal() {
        serde_json::to_string_pretty(&value)
    } else {
        serde_json::to_string(&value)
    };
    println!(
        "{}",
        json.unwrap_or_else(|_| "{\"error\":\"json encode failed\"}".to_string())
    );
}

#[derive(Copy, Clone, Debug)]
enum AnsiColor {
    Red,
    Yellow,
}

fn colorize_label(label: &str, enabled: bool, color: AnsiColor) -> String {
    if !enabled {
        return label.to_string();
    }
    let code = match color {
        AnsiColor::Red => "31",
        AnsiColor::Yellow => "33",
    };
    format!("\u{1b}[{code}m{label}\u{1b}[0m")
}

fn emit_error(err: &Error, color_mode: ColorMode) {
    let is_tty = io::stderr().is_terminal();
    if is_tty {
        eprintln!("{}", error_text(err, color_mode.use_color(is_tty)));
        return;
    }
    let json = serde_json::to_string(&error_json(err)).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn error_message(err: &Error) -> String {
    if let Some(message) = err.message() {
        return message.to_string();
    }
    match err.kind() {
        ErrorKind::Internal => "internal error".to_string(),
        ErrorKind::Usage => "usage error".to_string(),
        ErrorKind::NotFound => "not found".to_string(),
        ErrorKind::MalformedInput => "malformed input".to_string(),
        ErrorKind::SchemaMismatch => "schema mismatch".to_string(),
        ErrorKind::UnknownColumn => "unknown column".to_string(),
        ErrorKind::Io => "i/o error".to_string(),
    }
}

fn error_causes(err: &Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut cur = err.source();
    while let Some(source) = cur {
        causes.push(source.to_string());
        cur = source.source();
    }
    causes
}

fn error_json(err: &Error) -> JsonValue {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert("message".to_string(), json!(error_message(err)));
    if let Some(hint) = err.hint() {
        inner.insert("hint".to_string(), json!(hint));
    }
    if let Some(path) = err.path() {
        inner.insert("path".to_string(), json!(path.display().to_string()));
    }
    if let Some(column) = err.column() {
        inner.insert("column".to_string(), json!(column));
    }
    if let Some(line) = err.line() {
        inner.insert("line".to_string(), json!(line));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), JsonValue::Object(inner));
    JsonValue::Object(outer)
}

fn error_text(err: &Error, use_color: bool) -> String {
    let mut lines = vec![format!(
        "{} {}",
        colorize_label("error:", use_color, AnsiColor::Red),
        error_message(err)
    )];
    let mut detail = |label: &str, value: String| {
        lines.push(format!(
            "{} {value}",
            colorize_label(label, use_color, AnsiColor::Yellow)
        ));
    };
    if let Some(hint) = err.hint() {
        detail("hint:", hint.to_string());
    }
    if let Some(path) = err.path() {
        detail("path:", path.display().to_string());
    }
    if let Some(column) = err.column() {
        detail("column:", column.to_string());
    }
    if let Some(line) = err.line() {
        detail("line:", line.to_string());
    }
    if let Some(cause) = error_causes(err).first() {
        detail("caused by:", cause.clone());
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::{error_json, error_text, parse_assignment, parse_delimiter, parse_json_row};
    use csvtable::api::{Error, ErrorKind, Row, Value};

    #[test]
    fn error_text_respects_color_flag() {
        let err = Error::new(ErrorKind::Usage).with_message("bad input");
        let colored = error_text(&err, true);
        let plain = error_text(&err, false);
        assert!(colored.contains("\u{1b}[31merror:\u{1b}[0m"));
        assert!(plain.starts_with("error: bad input"));
    }

    #[test]
    fn error_json_includes_column() {
        let err = Error::new(ErrorKind::UnknownColumn)
            .with_message("update references unknown column `X`")
            .with_column("X");
        let value = error_json(&err);
        assert_eq!(value["error"]["kind"], "UnknownColumn");
        assert_eq!(value["error"]["column"], "X");
    }

    #[test]
    fn assignments_split_on_first_equals() {
        assert_eq!(parse_assignment("Note=a=b").unwrap(), ("Note".to_string(), "a=b"));
        assert_eq!(parse_assignment("Name=").unwrap(), ("Name".to_string(), ""));
        assert_eq!(
            parse_assignment("=1").unwrap_err().kind(),
            ErrorKind::Usage
        );
        assert!(parse_assignment("Age").is_err());
    }

    #[test]
    fn json_rows_keep_value_kinds() {
        let row = parse_json_row(r#"{"ID": 3, "Score": 9.5, "Name": "Cy", "Tag": null}"#).unwrap();
        assert_eq!(
            row,
            Row::new()
                .with("ID", 3)
                .with("Score", 9.5)
                .with("Name", "Cy")
                .with("Tag", Value::Null)
        );
        assert_eq!(parse_json_row("[1]").unwrap_err().kind(), ErrorKind::Usage);
        assert_eq!(parse_json_row("{").unwrap_err().kind(), ErrorKind::Usage);
    }

    #[test]
    fn delimiter_parsing() {
        assert_eq!(parse_delimiter(";"), Ok(b';'));
        assert_eq!(parse_delimiter("\\t"), Ok(b'\t'));
        assert!(parse_delimiter("ab").is_err());
    }
}
