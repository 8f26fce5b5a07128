use crate::data::{Cell, Table};
use crate::error::{DashboardError, Result};
use crate::schema;
use calamine::{open_workbook_auto, open_workbook_auto_from_rs, Data, Range, Reader};
use once_cell::sync::OnceCell;
use serde::Deserialize;
use std::fmt;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Spreadsheet published with the export records.
pub const DEFAULT_URL: &str = "https://drive.google.com/uc?id=1HxVhrT5bwke_2XkPtUDNmO8iPtCTDdLT";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    Url(String),
    Path(PathBuf),
}

impl DataSource {
    /// Anything starting with `http://` or `https://` is a URL, everything
    /// else a local file.
    pub fn parse(s: &str) -> Self {
        if s.starts_with("http://") || s.starts_with("https://") {
            DataSource::Url(s.to_string())
        } else {
            DataSource::Path(PathBuf::from(s))
        }
    }
}

impl Default for DataSource {
    fn default() -> Self {
        DataSource::Url(DEFAULT_URL.to_string())
    }
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataSource::Url(u) => write!(f, "{}", u),
            DataSource::Path(p) => write!(f, "{}", p.display()),
        }
    }
}

/// Loads the dataset once and hands out the same immutable snapshot after.
pub struct DatasetLoader {
    source: DataSource,
    timeout: Duration,
    snapshot: OnceCell<Arc<Table>>,
}

impl DatasetLoader {
    pub fn new(source: DataSource, timeout: Duration) -> Self {
        Self {
            source,
            timeout,
            snapshot: OnceCell::new(),
        }
    }

    pub fn source(&self) -> &DataSource {
        &self.source
    }

    pub fn is_loaded(&self) -> bool {
        self.snapshot.get().is_some()
    }

    /// Fetch, parse and validate the dataset on first call; return the cached
    /// snapshot afterwards. A failed load is not cached.
    pub fn load(&self) -> Result<Arc<Table>> {
        self.snapshot
            .get_or_try_init(|| {
                let started = Instant::now();
                let raw = match &self.source {
                    DataSource::Url(url) => parse_spreadsheet(fetch(url, self.timeout)?)?,
                    DataSource::Path(path) => read_path(path)?,
                };
                let table = schema::validate(raw)?;
                info!(
                    source = %self.source,
                    rows = table.height(),
                    columns = table.width(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "dataset loaded"
                );
                Ok(Arc::new(table))
            })
            .cloned()
    }
}

/// HTTP GET with an explicit timeout. Non-2xx responses are fetch errors.
pub fn fetch(url: &str, timeout: Duration) -> Result<Vec<u8>> {
    debug!(url, timeout_secs = timeout.as_secs(), "fetching dataset");
    let client = reqwest::blocking::Client::builder().timeout(timeout).build()?;
    let response = client.get(url).send()?.error_for_status()?;
    let bytes = response.bytes()?;
    debug!(bytes = bytes.len(), "dataset downloaded");
    Ok(bytes.to_vec())
}

/// Parse the first worksheet of an in-memory workbook (xlsx, xls, xlsb, ods).
pub fn parse_spreadsheet(bytes: Vec<u8>) -> Result<Table> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| DashboardError::Parse("Workbook has no worksheets".into()))??;
    range_to_table(&range)
}

fn read_path(path: &Path) -> Result<Table> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    let unreadable = |e: std::io::Error| DashboardError::Fetch(format!("{}: {}", path.display(), e));
    // Missing files are fetch errors whatever the format
    std::fs::metadata(path).map_err(unreadable)?;
    let open = || std::fs::File::open(path).map_err(unreadable);

    match extension.as_deref() {
        Some("csv") => return parse_csv(open()?),
        Some("json") => {
            // An array of records, one object per row
            let value: serde_json::Value = serde_json::from_reader(std::io::BufReader::new(open()?))
                .map_err(|e| DashboardError::Parse(format!("{}: {}", path.display(), e)))?;
            return Table::from_json(&value);
        }
        _ => {}
    }

    let mut workbook = open_workbook_auto(path)?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| DashboardError::Parse(format!("{} has no worksheets", path.display())))??;
    range_to_table(&range)
}

/// First row is the header; every later row is a record.
fn range_to_table(range: &Range<Data>) -> Result<Table> {
    let mut rows = range.rows();
    let header = rows
        .next()
        .ok_or_else(|| DashboardError::Parse("Worksheet is empty".into()))?;
    let headers: Vec<String> = header.iter().map(|c| c.to_string().trim().to_string()).collect();

    let records: Vec<Vec<Cell>> = rows.map(|row| row.iter().map(convert_cell).collect()).collect();
    Table::from_rows(headers, records)
}

fn convert_cell(cell: &Data) -> Cell {
    match cell {
        Data::Empty | Data::Error(_) => Cell::Null,
        Data::Int(v) => Cell::number(*v as f64),
        Data::Float(v) => Cell::number(*v),
        Data::String(s) if s.trim().is_empty() => Cell::Null,
        Data::String(s) => Cell::Text(s.clone()),
        other => Cell::Text(other.to_string()),
    }
}

/// Read CSV with a header row. Every field stays text; empty fields are null.
pub fn parse_csv<R: Read>(reader: R) -> Result<Table> {
    let mut rdr = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
    let headers: Vec<String> = rdr.headers()?.iter().map(|h| h.trim().to_string()).collect();

    let mut rows = Vec::new();
    for record in rdr.records() {
        let record = record?;
        rows.push(
            record
                .iter()
                .map(|field| {
                    if field.trim().is_empty() {
                        Cell::Null
                    } else {
                        Cell::text(field)
                    }
                })
                .collect(),
        );
    }

    if headers.is_empty() {
        return Err(DashboardError::Parse("CSV has no header row".into()));
    }
    Table::from_rows(headers, rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::{TcpListener, TcpStream};
    use std::thread;

    #[test]
    fn test_data_source_parse() {
        assert_eq!(
            DataSource::parse("https://example.com/x.xlsx"),
            DataSource::Url("https://example.com/x.xlsx".into())
        );
        assert_eq!(DataSource::parse("data/x.csv"), DataSource::Path("data/x.csv".into()));
    }

    #[test]
    fn test_parse_csv() {
        let csv = "NOMBRE_PAIS, PNK\nPerú,12\nChile,\n";
        let table = parse_csv(csv.as_bytes()).unwrap();
        assert_eq!(table.column_names(), vec!["NOMBRE_PAIS", "PNK"]);
        assert_eq!(table.cells("PNK").unwrap(), &[Cell::text("12"), Cell::Null]);
    }

    #[test]
    fn test_parse_spreadsheet_rejects_garbage() {
        let err = parse_spreadsheet(b"definitely not a workbook".to_vec()).unwrap_err();
        assert!(matches!(err, DashboardError::Parse(_)));
    }

    #[test]
    fn test_read_json_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exports.json");
        std::fs::write(&path, r#"[{"NOMBRE_PAIS": "Perú", "PNK": 12}, {"NOMBRE_PAIS": "Chile", "PNK": null}]"#).unwrap();
        let table = read_path(&path).unwrap();
        assert_eq!(table.height(), 2);
        assert_eq!(table.cells("PNK").unwrap(), &[Cell::Number(12.0), Cell::Null]);
    }

    #[test]
    fn test_convert_cell() {
        assert_eq!(convert_cell(&Data::Int(3)), Cell::Number(3.0));
        assert_eq!(convert_cell(&Data::String("  ".into())), Cell::Null);
        assert_eq!(convert_cell(&Data::Bool(true)), Cell::text("true"));
        assert_eq!(convert_cell(&Data::Empty), Cell::Null);
    }

    #[test]
    fn test_missing_file_is_fetch_error() {
        let loader = DatasetLoader::new(DataSource::parse("/nonexistent/exports.csv"), Duration::from_secs(1));
        assert!(matches!(loader.load(), Err(DashboardError::Fetch(_))));
        assert!(!loader.is_loaded());
    }

    #[test]
    fn test_missing_workbook_is_fetch_error() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["exports.xlsx", "exports.ods"] {
            let err = read_path(&dir.path().join(name)).unwrap_err();
            assert!(matches!(err, DashboardError::Fetch(ref msg) if msg.contains(name)), "{:?}", err);
        }
    }

    /// Serve one connection on a local port with `handler`.
    fn serve_once(handler: impl FnOnce(TcpStream) + Send + 'static) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/exports.xlsx", listener.local_addr().unwrap());
        thread::spawn(move || {
            if let Ok((stream, _)) = listener.accept() {
                handler(stream);
            }
        });
        url
    }

    fn read_request(stream: &mut TcpStream) {
        let mut request = Vec::new();
        let mut buf = [0u8; 512];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            match stream.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => request.extend_from_slice(&buf[..n]),
            }
        }
    }

    #[test]
    fn test_fetch_error_status() {
        let url = serve_once(|mut stream| {
            read_request(&mut stream);
            let _ = stream.write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
        });
        let err = fetch(&url, Duration::from_secs(5)).unwrap_err();
        assert!(matches!(err, DashboardError::Fetch(ref msg) if msg.contains("404")), "{:?}", err);
    }

    #[test]
    fn test_fetch_times_out() {
        let url = serve_once(|mut stream| {
            // Never answer; return once the client hangs up
            read_request(&mut stream);
            let mut buf = [0u8; 64];
            while matches!(stream.read(&mut buf), Ok(n) if n > 0) {}
        });
        let started = Instant::now();
        let err = fetch(&url, Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, DashboardError::Fetch(_)), "{:?}", err);
        assert!(started.elapsed() >= Duration::from_secs(1));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_url_loader_failure_is_not_memoized() {
        let url = serve_once(|mut stream| {
            read_request(&mut stream);
            let _ = stream.write_all(b"HTTP/1.1 500 Internal Server Error\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
        });
        let loader = DatasetLoader::new(DataSource::Url(url), Duration::from_secs(5));
        assert!(matches!(loader.load(), Err(DashboardError::Fetch(_))));
        assert!(!loader.is_loaded());
    }
}
