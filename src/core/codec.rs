// Delimited-text load and save for the backing file.
// Save writes a sibling temp file and renames it over the target, so a failed
// save never leaves a truncated backing file behind.
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::Path;

use tempfile::NamedTempFile;

use crate::core::error::{Error, ErrorKind};
use crate::core::table::{Schema, Table};
use crate::core::value::Value;

pub const DEFAULT_DELIMITER: u8 = b',';

#[derive(Clone, Debug)]
pub struct LoadOptions {
    /// Advisory row-identifier column; must exist in the header when set.
    pub index_column: Option<String>,
    /// Treat an absent backing file as an empty table with no columns.
    pub create_if_missing: bool,
    pub delimiter: u8,
    /// Type fields (`Int`, `Float`, `Bool`); otherwise every field is a string.
    pub infer_types: bool,
}

impl LoadOptions {
    pub fn new() -> Self {
        Self {
            index_column: None,
            create_if_missing: false,
            delimiter: DEFAULT_DELIMITER,
            infer_types: true,
        }
    }

    pub fn with_index_column(mut self, column: impl Into<String>) -> Self {
        self.index_column = Some(column.into());
        self
    }

    pub fn with_create_if_missing(mut self, create: bool) -> Self {
        self.create_if_missing = create;
        self
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn with_infer_types(mut self, infer: bool) -> Self {
        self.infer_types = infer;
        self
    }
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Debug, Default)]
pub struct SaveOptions {
    /// Emit a 0-based positional identifier as an extra leading column.
    pub write_row_identifier: bool,
    /// Header of the identifier column; empty by default.
    pub row_identifier_header: String,
}

impl SaveOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_row_identifier(mut self, header: impl Into<String>) -> Self {
        self.write_row_identifier = true;
        self.row_identifier_header = header.into();
        self
    }
}

/// Reads `path` into a table. A missing file is `NotFound` unless
/// `create_if_missing` is set.
pub fn load(path: &Path, options: &LoadOptions) -> Result<Table, Error> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::NotFound && options.create_if_missing => {
            return Ok(Table::default());
        }
        Err(err) => {
            return Err(Error::io(path, err).with_message("failed to open backing file"));
        }
    };
    decode(file, options).map_err(|err| err.with_path(path))
}

/// Replaces `path` with the serialized table. A symlinked `path` is followed,
/// and an existing file keeps its permissions.
pub fn save(table: &Table, path: &Path, delimiter: u8, options: &SaveOptions) -> Result<(), Error> {
    let target = match fs::canonicalize(path) {
        Ok(resolved) => resolved,
        Err(err) if err.kind() == io::ErrorKind::NotFound => path.to_path_buf(),
        Err(err) => {
            return Err(save_error(path, err).with_message("failed to resolve backing file"));
        }
    };
    let dir = match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir).map_err(|err| {
        save_error(path, err).with_message("failed to create temporary file")
    })?;
    encode(table, &mut tmp, delimiter, options).map_err(|err| err.with_path(path))?;
    match fs::metadata(&target) {
        Ok(meta) => tmp
            .as_file()
            .set_permissions(meta.permissions())
            .map_err(|err| save_error(path, err).with_message("failed to copy permissions"))?,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => {
            return Err(save_error(path, err).with_message("failed to read backing file metadata"));
        }
    }
    tmp.as_file()
        .sync_all()
        .map_err(|err| save_error(path, err).with_message("failed to sync temporary file"))?;
    tmp.persist(&target)
        .map_err(|err| save_error(path, err.error).with_message("failed to replace backing file"))?;
    Ok(())
}

fn save_error(path: &Path, err: io::Error) -> Error {
    Error::new(ErrorKind::Io).with_path(path).with_source(err)
}

pub(crate) fn decode<R: Read>(input: R, options: &LoadOptions) -> Result<Table, Error> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(options.delimiter)
        .has_headers(true)
        .flexible(false)
        .from_reader(input);

    let headers = reader.headers().map_err(read_error)?.clone();
    if headers.is_empty() {
        return Ok(Table::default());
    }
    let schema = Schema::new(headers.iter())?;

    let field: fn(&str) -> Value = if options.infer_types {
        Value::infer
    } else {
        Value::raw
    };
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(read_error)?;
        rows.push(record.iter().map(field).collect());
    }
    Ok(Table::from_parts(schema, rows))
}

pub(crate) fn encode<W: Write>(
    table: &Table,
    output: W,
    delimiter: u8,
    options: &SaveOptions,
) -> Result<(), Error> {
    let schema = table.schema();
    if schema.is_empty() {
        return Ok(());
    }
    let mut writer = csv::WriterBuilder::new()
        .delimiter(delimiter)
        .from_writer(output);

    let mut header: Vec<&str> = Vec::with_capacity(schema.len() + 1);
    if options.write_row_identifier {
        header.push(&options.row_identifier_header);
    }
    header.extend(schema.columns().iter().map(String::as_str));
    writer.write_record(&header).map_err(write_error)?;

    let mut fields: Vec<String> = Vec::with_capacity(header.len());
    for (idx, row) in table.rows().enumerate() {
        fields.clear();
        if options.write_row_identifier {
            fields.push(idx.to_string());
        }
        fields.extend(row.iter().map(|(_, value)| value.render()));
        writer.write_record(&fields).map_err(write_error)?;
    }
    writer
        .flush()
        .map_err(|err| Error::new(ErrorKind::Io).with_source(err))?;
    Ok(())
}

fn read_error(err: csv::Error) -> Error {
    let line = err.position().map(|pos| pos.line());
    let mut out = if err.is_io_error() {
        Error::new(ErrorKind::Io).with_message("failed to read backing file")
    } else {
        let message = match err.kind() {
            csv::ErrorKind::UnequalLengths {
                expected_len, len, ..
            } => format!("row has {len} fields, header has {expected_len}"),
            csv::ErrorKind::Utf8 { .. } => "invalid UTF-8".to_string(),
            _ => "unparseable delimited text".to_string(),
        };
        Error::new(ErrorKind::MalformedInput).with_message(message)
    };
    if let Some(line) = line {
        out = out.with_line(line);
    }
    out.with_source(err)
}

fn write_error(err: csv::Error) -> Error {
    Error::new(ErrorKind::Io)
        .with_message("failed to write delimited text")
        .with_source(err)
}

#[cfg(test)]
mod tests {
    use super::{LoadOptions, SaveOptions, decode, encode, load, save};
    use crate::core::error::ErrorKind;
    use crate::core::value::Value;

    fn decode_str(input: &str) -> crate::core::table::Table {
        decode(input.as_bytes(), &LoadOptions::new()).expect("decode")
    }

    fn encode_string(table: &crate::core::table::Table, options: &SaveOptions) -> String {
        let mut out = Vec::new();
        encode(table, &mut out, b',', options).expect("encode");
        String::from_utf8(out).expect("utf8")
    }

    #[test]
    fn decode_infers_types_and_nulls() {
        let table = decode_str("ID,Name,Age,Active\n1,Ann,25.5,true\n2,,,false\n");
        assert_eq!(table.schema().columns(), ["ID", "Name", "Age", "Active"]);
        let first = table.row(0).unwrap();
        assert_eq!(first["ID"], Value::Int(1));
        assert_eq!(first["Age"], Value::Float(25.5));
        assert_eq!(first["Active"], Value::Bool(true));
        let second = table.row(1).unwrap();
        assert_eq!(second["Name"], Value::Null);
        assert_eq!(second["Age"], Value::Null);
    }

    #[test]
    fn decode_without_inference_keeps_strings() {
        let options = LoadOptions::new().with_infer_types(false);
        let table = decode("ID\n1\n".as_bytes(), &options).unwrap();
        assert_eq!(table.row(0).unwrap()["ID"], Value::from("1"));
    }

    #[test]
    fn ragged_rows_are_malformed() {
        let err = decode("a,b\n1,2\n3\n".as_bytes(), &LoadOptions::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedInput);
        assert_eq!(err.line(), Some(3));
    }

    #[test]
    fn invalid_utf8_is_malformed() {
        let input: &[u8] = b"a,b\n1,\xff\xfe\n";
        let err = decode(input, &LoadOptions::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedInput);
    }

    #[test]
    fn duplicate_header_is_malformed() {
        let err = decode("a,a\n1,2\n".as_bytes(), &LoadOptions::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedInput);
    }

    #[test]
    fn empty_input_is_empty_table() {
        let table = decode_str("");
        assert!(table.schema().is_empty());
        assert!(table.is_empty());
        assert_eq!(encode_string(&table, &SaveOptions::new()), "");
    }

    #[test]
    fn encode_quotes_and_round_trips() {
        let input = "ID,Note\n1,\"a, b\"\n2,\"say \"\"hi\"\"\"\n3,\n";
        let table = decode_str(input);
        assert_eq!(table.row(1).unwrap()["Note"], Value::from("say \"hi\""));
        assert_eq!(encode_string(&table, &SaveOptions::new()), input);
    }

    #[test]
    fn encode_with_row_identifier() {
        let table = decode_str("ID,Age\n7,30\n9,40\n");
        let out = encode_string(&table, &SaveOptions::new().with_row_identifier(""));
        assert_eq!(out, ",ID,Age\n0,7,30\n1,9,40\n");
    }

    #[test]
    fn custom_delimiter() {
        let options = LoadOptions::new().with_delimiter(b';');
        let table = decode("a;b\n1;x,y\n".as_bytes(), &options).unwrap();
        assert_eq!(table.row(0).unwrap()["b"], Value::from("x,y"));
        let mut out = Vec::new();
        encode(&table, &mut out, b';', &SaveOptions::new()).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "a;b\n1;x,y\n");
    }

    #[test]
    fn load_missing_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("absent.csv");
        let err = load(&path, &LoadOptions::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.path(), Some(path.as_path()));

        let table = load(&path, &LoadOptions::new().with_create_if_missing(true)).unwrap();
        assert!(table.schema().is_empty());
    }

    #[test]
    fn save_replaces_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("data.csv");
        std::fs::write(&path, "x\n1\n2\n").expect("write");
        let table = load(&path, &LoadOptions::new()).unwrap();
        std::fs::write(&path, "garbage that is longer than the table\n").expect("write");
        save(&table, &path, b',', &SaveOptions::new()).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "x\n1\n2\n");
    }

    #[cfg(unix)]
    #[test]
    fn save_keeps_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("data.csv");
        std::fs::write(&path, "x\n1\n").expect("write");
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).expect("chmod");
        let table = load(&path, &LoadOptions::new()).unwrap();
        save(&table, &path, b',', &SaveOptions::new()).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o644);
    }

    #[cfg(unix)]
    #[test]
    fn save_follows_symlink() {
        let dir = tempfile::tempdir().expect("tempdir");
        let real = dir.path().join("real.csv");
        let link = dir.path().join("link.csv");
        std::fs::write(&real, "x\n1\n").expect("write");
        std::os::unix::fs::symlink(&real, &link).expect("symlink");
        let table = decode_str("x\n1\n2\n");
        save(&table, &link, b',', &SaveOptions::new()).unwrap();
        assert!(std::fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
        assert_eq!(std::fs::read_to_string(&real).unwrap(), "x\n1\n2\n");
    }

    #[test]
    fn save_into_missing_directory_is_io() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nope").join("data.csv");
        let table = decode_str("x\n1\n");
        let err = save(&table, &path, b',', &SaveOptions::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
        assert!(!path.exists());
    }
}
