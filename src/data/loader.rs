use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use calamine::{open_workbook_auto, Data, Reader};
use thiserror::Error;
use zip::result::ZipError;
use zip::ZipArchive;

use super::model::{CellValue, HeartRateExport, RawSubjectRecord, SwellSheet};
use super::pickle::{self, PickleError, PyValue};
use crate::error::ProcessingError;

// ---------------------------------------------------------------------------
// WESAD subject pickle
// ---------------------------------------------------------------------------

/// Ways a decoded WESAD dump can fail to match the expected layout.
#[derive(Debug, Error, PartialEq)]
pub enum SchemaError {
    #[error("top-level object is a {0}, expected dict")]
    NotADict(&'static str),

    #[error("missing key '{0}'")]
    MissingKey(String),

    #[error("'{key}' is a {found}, expected numpy.ndarray")]
    NotAnArray { key: String, found: &'static str },

    #[error("'{key}' has shape {shape:?}, expected a single channel")]
    NotOneDimensional { key: String, shape: Vec<usize> },

    #[error("'{0}' holds non-integer values")]
    NonIntegerLabels(String),
}

/// The chest channels read from `signal.chest`, in output column order.
pub const CHEST_CHANNELS: [&str; 4] = ["EDA", "Temp", "ECG", "Resp"];

/// Load `<subject>.pkl` into a validated [`RawSubjectRecord`].
pub fn load_wesad_subject(path: &Path) -> Result<RawSubjectRecord, ProcessingError> {
    if !path.is_file() {
        return Err(ProcessingError::MissingInput { path: path.to_path_buf() });
    }
    let file = File::open(path).map_err(|e| ProcessingError::io(path, e))?;
    let value = pickle::from_reader(file).map_err(|e| match e {
        PickleError::Io(source) => ProcessingError::io(path, source),
        other => ProcessingError::malformed(path, other),
    })?;
    subject_record(&value).map_err(|e| ProcessingError::malformed(path, e))
}

/// Validate the decoded structure: `signal.chest.{EDA,Temp,ECG,Resp}` and
/// `label`. Other keys (`ACC`, `EMG`, `wrist`, `subject`) are ignored.
pub fn subject_record(value: &PyValue) -> Result<RawSubjectRecord, SchemaError> {
    if !matches!(value, PyValue::Dict(_)) {
        return Err(SchemaError::NotADict(value.type_name()));
    }
    let signal = value
        .get("signal")
        .ok_or_else(|| SchemaError::MissingKey("signal".into()))?;
    let chest = signal
        .get("chest")
        .ok_or_else(|| SchemaError::MissingKey("signal.chest".into()))?;

    let channel = |name: &str| -> Result<Vec<f64>, SchemaError> {
        let key = format!("signal.chest.{name}");
        let array = vector_array(chest.get(name), &key)?;
        Ok(array.to_f64_vec())
    };

    let [eda, temp, ecg, resp] = CHEST_CHANNELS;
    let labels = vector_array(value.get("label"), "label")?
        .to_i64_vec()
        .ok_or_else(|| SchemaError::NonIntegerLabels("label".into()))?;

    Ok(RawSubjectRecord {
        eda: channel(eda)?,
        temp: channel(temp)?,
        ecg: channel(ecg)?,
        resp: channel(resp)?,
        labels,
    })
}

fn vector_array<'a>(
    value: Option<&'a PyValue>,
    key: &str,
) -> Result<&'a pickle::NdArray, SchemaError> {
    let value = value.ok_or_else(|| SchemaError::MissingKey(key.to_string()))?;
    let array = value.as_array().ok_or_else(|| SchemaError::NotAnArray {
        key: key.to_string(),
        found: value.type_name(),
    })?;
    if !array.is_vector_like() {
        return Err(SchemaError::NotOneDimensional {
            key: key.to_string(),
            shape: array.shape.clone(),
        });
    }
    Ok(array)
}

// ---------------------------------------------------------------------------
// SWELL spreadsheet
// ---------------------------------------------------------------------------

/// Load the first worksheet of a spreadsheet.  Dispatch by extension.
///
/// Supported formats:
/// * `.xlsx` / `.xlsm` / `.xlsb` / `.xls` / `.ods` – via calamine
/// * `.csv` – header row plus data rows, cells typed by [`CellValue::guess`]
pub fn load_spreadsheet(path: &Path) -> Result<SwellSheet, ProcessingError> {
    if !path.is_file() {
        return Err(ProcessingError::MissingInput { path: path.to_path_buf() });
    }
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    match ext.as_str() {
        "xlsx" | "xlsm" | "xlsb" | "xls" | "ods" => load_workbook(path),
        "csv" => load_csv_sheet(path),
        other => Err(ProcessingError::malformed(
            path,
            format!("unsupported spreadsheet extension: .{other}"),
        )),
    }
}

fn load_workbook(path: &Path) -> Result<SwellSheet, ProcessingError> {
    let mut workbook = open_workbook_auto(path).map_err(|e| ProcessingError::malformed(path, e))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| ProcessingError::malformed(path, "workbook has no worksheets"))?
        .map_err(|e| ProcessingError::malformed(path, e))?;

    let mut rows = range.rows();
    let header = rows
        .next()
        .ok_or_else(|| ProcessingError::malformed(path, "worksheet is empty"))?;
    let headers = header_names(header.iter().map(cell_value));
    let rows = rows.map(|row| row.iter().map(cell_value).collect::<Vec<_>>()).collect();

    Ok(SwellSheet { headers, rows })
}

fn load_csv_sheet(path: &Path) -> Result<SwellSheet, ProcessingError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(|e| ProcessingError::malformed(path, e))?;
    let headers = reader
        .headers()
        .map_err(|e| ProcessingError::malformed(path, e))?
        .iter()
        .map(|h| match h {
            "" => CellValue::Null,
            h => CellValue::String(h.to_string()),
        })
        .collect::<Vec<_>>();
    let headers = header_names(headers.into_iter());

    let mut rows: Vec<Vec<CellValue>> = Vec::new();
    for (row_no, result) in reader.records().enumerate() {
        let record = result
            .map_err(|e| ProcessingError::malformed(path, format!("row {row_no}: {e}")))?;
        rows.push(record.iter().map(CellValue::guess).collect());
    }

    Ok(SwellSheet { headers, rows })
}

/// Header cells as column names; blank headers become `Unnamed: <i>`.
fn header_names(cells: impl Iterator<Item = CellValue>) -> Vec<String> {
    cells
        .enumerate()
        .map(|(i, cell)| match cell {
            CellValue::Null => format!("Unnamed: {i}"),
            other => other.to_string(),
        })
        .collect()
}

fn cell_value(cell: &Data) -> CellValue {
    match cell {
        Data::Empty => CellValue::Null,
        Data::String(s) => CellValue::String(s.clone()),
        Data::Int(i) => CellValue::Integer(*i),
        Data::Float(f) => CellValue::Float(*f),
        Data::Bool(b) => CellValue::Bool(*b),
        Data::DateTime(dt) => match dt.as_datetime() {
            Some(dt) => CellValue::Date(dt.to_string()),
            None => CellValue::Float(dt.as_f64()),
        },
        Data::DateTimeIso(s) | Data::DurationIso(s) => CellValue::Date(s.clone()),
        Data::Error(e) => CellValue::String(e.to_string()),
    }
}

// ---------------------------------------------------------------------------
// AffectiveROAD device archive
// ---------------------------------------------------------------------------

/// First archive from `names` that exists inside `folder`.
pub fn locate_archive(folder: &Path, names: &[String]) -> Option<PathBuf> {
    names
        .iter()
        .map(|name| folder.join(name))
        .find(|path| path.is_file())
}

/// Read a single-channel E4 export straight out of a zip archive.
pub fn load_archive_member(
    archive_path: &Path,
    member: &str,
) -> Result<HeartRateExport, ProcessingError> {
    let file = File::open(archive_path).map_err(|e| ProcessingError::io(archive_path, e))?;
    let mut archive =
        ZipArchive::new(file).map_err(|e| ProcessingError::malformed(archive_path, e))?;
    let entry = match archive.by_name(member) {
        Ok(entry) => entry,
        Err(ZipError::FileNotFound) => {
            return Err(ProcessingError::MissingMember {
                archive: archive_path.to_path_buf(),
                member: member.to_string(),
            })
        }
        Err(e) => return Err(ProcessingError::malformed(archive_path, e)),
    };
    parse_single_channel(entry, &archive_path.join(member))
}

/// E4 single-channel layout: no header row, one value per record.
/// Record 1 is the start time, record 2 the sample rate, the rest samples.
pub fn parse_single_channel<R: Read>(
    reader: R,
    source: &Path,
) -> Result<HeartRateExport, ProcessingError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(reader);

    let mut values = Vec::new();
    for (row_no, result) in reader.records().enumerate() {
        let record = result
            .map_err(|e| ProcessingError::malformed(source, format!("record {row_no}: {e}")))?;
        if record.len() != 1 {
            return Err(ProcessingError::malformed(
                source,
                format!("record {row_no} has {} columns, expected 1", record.len()),
            ));
        }
        let field = record[0].trim();
        let value: f64 = field.parse().map_err(|_| {
            let reason = format!("record {row_no}: '{field}' is not a number");
            ProcessingError::malformed(source, reason)
        })?;
        values.push(value);
    }

    if values.len() < 2 {
        return Err(ProcessingError::malformed(
            source,
            format!("expected start time and sample rate records, found {}", values.len()),
        ));
    }
    let samples = values.split_off(2);
    let (start_time, sample_rate) = (values[0], values[1]);
    if !(sample_rate.is_finite() && sample_rate > 0.0) {
        return Err(ProcessingError::malformed(source, format!("sample rate is {sample_rate}")));
    }

    Ok(HeartRateExport { start_time, sample_rate, samples })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::pickle::NdArray;
    use crate::error::UnitStatus;
    use std::io::Write;
    use zip::write::FileOptions;

    fn chest_dict(skip: Option<&str>) -> PyValue {
        let mut chest = Vec::new();
        for name in ["ACC", "ECG", "EMG", "EDA", "Temp", "Resp"] {
            if Some(name) == skip {
                continue;
            }
            let values: Vec<f64> = (0..5).map(|i| i as f64 * 0.1).collect();
            chest.push((PyValue::text(name), PyValue::Array(NdArray::column_f64(values).into())));
        }
        PyValue::Dict(vec![
            (
                PyValue::text("signal"),
                PyValue::Dict(vec![
                    (PyValue::text("chest"), PyValue::Dict(chest)),
                    (PyValue::text("wrist"), PyValue::Dict(Vec::new())),
                ]),
            ),
            (
                PyValue::text("label"),
                PyValue::Array(NdArray::vector_i32(vec![0, 1, 1, 2, 7]).into()),
            ),
            (PyValue::text("subject"), PyValue::text("S2")),
        ])
    }

    #[test]
    fn subject_record_reads_chest_channels() {
        let record = subject_record(&chest_dict(None)).unwrap();
        assert_eq!(record.eda.len(), 5);
        assert_eq!(record.resp[4], 0.4);
        assert_eq!(record.labels, vec![0, 1, 1, 2, 7]);
        assert!(record.is_aligned());
    }

    #[test]
    fn missing_channel_is_a_schema_error() {
        let err = subject_record(&chest_dict(Some("Resp"))).unwrap_err();
        assert_eq!(err, SchemaError::MissingKey("signal.chest.Resp".into()));
        let err = subject_record(&PyValue::List(Vec::new())).unwrap_err();
        assert_eq!(err, SchemaError::NotADict("list"));
    }

    #[test]
    fn multi_axis_channel_is_rejected() {
        let acc = NdArray { shape: vec![2, 3], ..NdArray::column_f64(vec![0.0; 6]) };
        let key = "signal.chest.EDA";
        let value = PyValue::Array(acc.into());
        let err = vector_array(Some(&value), key).unwrap_err();
        assert_eq!(err, SchemaError::NotOneDimensional { key: key.into(), shape: vec![2, 3] });
    }

    #[test]
    fn load_wesad_subject_maps_failures() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("S9.pkl");
        let err = load_wesad_subject(&missing).unwrap_err();
        assert_eq!(err.status(), UnitStatus::SkippedMissing);

        let garbage = dir.path().join("S10.pkl");
        std::fs::write(&garbage, b"not a pickle").unwrap();
        let err = load_wesad_subject(&garbage).unwrap_err();
        assert_eq!(err.status(), UnitStatus::SkippedMalformed);

        let good = dir.path().join("S2.pkl");
        std::fs::write(&good, pickle::to_vec(&chest_dict(None))).unwrap();
        let record = load_wesad_subject(&good).unwrap();
        assert_eq!(record.aligned_len(), 5);
    }

    #[test]
    fn parses_e4_header_and_samples() {
        let data = "1000.000000\n4.000000\n80.0\n81.5\n";
        let export = parse_single_channel(data.as_bytes(), Path::new("HR.csv")).unwrap();
        assert_eq!(export.start_time, 1000.0);
        assert_eq!(export.sample_rate, 4.0);
        assert_eq!(export.samples, vec![80.0, 81.5]);
    }

    #[test]
    fn rejects_bad_e4_exports() {
        for data in ["1000.0\n", "1000.0\n0.0\n70\n", "1000.0\n1.0\nabc\n", "1000.0,1\n1.0\n"] {
            let err = parse_single_channel(data.as_bytes(), Path::new("HR.csv")).unwrap_err();
            assert_eq!(err.status(), UnitStatus::SkippedMalformed, "input {data:?}");
        }
    }

    fn write_zip(path: &Path, members: &[(&str, &str)]) {
        let file = File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        for (name, content) in members {
            let options: FileOptions<'_, ()> = FileOptions::default();
            zip.start_file(*name, options).unwrap();
            zip.write_all(content.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn archive_member_is_read_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Left.zip");
        write_zip(&path, &[("ACC.csv", "1\n32\n1,2,3\n"), ("HR.csv", "1000\n1\n70\n71\n")]);

        let export = load_archive_member(&path, "HR.csv").unwrap();
        assert_eq!(export.samples, vec![70.0, 71.0]);

        let err = load_archive_member(&path, "BVP.csv").unwrap_err();
        assert!(matches!(err, ProcessingError::MissingMember { .. }));
    }

    #[test]
    fn archive_preference_follows_configured_order() {
        let dir = tempfile::tempdir().unwrap();
        let names = vec!["Left.zip".to_string(), "Right.zip".to_string()];
        assert_eq!(locate_archive(dir.path(), &names), None);

        write_zip(&dir.path().join("Right.zip"), &[]);
        assert_eq!(locate_archive(dir.path(), &names), Some(dir.path().join("Right.zip")));

        write_zip(&dir.path().join("Left.zip"), &[]);
        assert_eq!(locate_archive(dir.path(), &names), Some(dir.path().join("Left.zip")));
    }

    #[test]
    fn csv_sheet_is_typed_and_unnamed_headers_filled() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("swell.csv");
        std::fs::write(&path, "PP,,SCL\nPP1,N,5.5\nPP2,T,6\n").unwrap();

        let sheet = load_spreadsheet(&path).unwrap();
        assert_eq!(sheet.headers, vec!["PP", "Unnamed: 1", "SCL"]);
        assert_eq!(sheet.rows[0][2], CellValue::Float(5.5));
        assert_eq!(sheet.rows[1][2], CellValue::Integer(6));
    }

    #[test]
    fn unknown_spreadsheet_extension_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("swell.txt");
        std::fs::write(&path, "x").unwrap();
        let err = load_spreadsheet(&path).unwrap_err();
        assert_eq!(err.status(), UnitStatus::SkippedMalformed);
        let err = load_spreadsheet(&dir.path().join("absent.xlsx")).unwrap_err();
        assert_eq!(err.status(), UnitStatus::SkippedMissing);
    }
}
