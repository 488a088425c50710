use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow::array::{ArrayRef, BooleanArray, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use log::debug;
use parquet::arrow::ArrowWriter;

use super::model::{CellValue, RoadSample, SwellSheet, UnifiedSample};
use crate::config::OutputFormat;

// ---------------------------------------------------------------------------
// Table – anything that can be written as one output table
// ---------------------------------------------------------------------------

pub trait Table {
    fn row_count(&self) -> usize;

    /// Header row followed by every data row.
    fn write_csv<W: Write>(&self, writer: &mut csv::Writer<W>) -> Result<()>;

    fn record_batch(&self) -> Result<RecordBatch>;
}

/// Write `table` to `path` in the given format, creating the parent
/// directory if needed. The file appears only once fully written.
pub fn write_table<T: Table + ?Sized>(table: &T, path: &Path, format: OutputFormat) -> Result<()> {
    ensure_parent_dir(path)?;
    let partial = partial_path(path);
    debug!("writing {} rows to {}", table.row_count(), partial.display());

    let written = match format {
        OutputFormat::Csv => write_csv_file(table, &partial),
        OutputFormat::Parquet => write_parquet_file(table, &partial),
    };
    if let Err(e) = written {
        let _ = fs::remove_file(&partial);
        return Err(e.context(format!("writing {}", path.display())));
    }

    fs::rename(&partial, path)
        .with_context(|| format!("moving {} into place", partial.display()))?;
    Ok(())
}

pub fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating output directory {}", parent.display()))?;
    }
    Ok(())
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".partial");
    path.with_file_name(name)
}

fn write_csv_file<T: Table + ?Sized>(table: &T, path: &Path) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .context("creating CSV file")?;
    table.write_csv(&mut writer)?;
    writer.flush().context("flushing CSV file")?;
    Ok(())
}

fn write_parquet_file<T: Table + ?Sized>(table: &T, path: &Path) -> Result<()> {
    let batch = table.record_batch().context("building record batch")?;
    let file = File::create(path).context("creating parquet file")?;
    let mut writer =
        ArrowWriter::try_new(file, batch.schema(), None).context("creating parquet writer")?;
    writer.write(&batch).context("writing record batch")?;
    writer.close().context("closing parquet writer")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// WESAD
// ---------------------------------------------------------------------------

impl Table for [UnifiedSample] {
    fn row_count(&self) -> usize {
        self.len()
    }

    fn write_csv<W: Write>(&self, writer: &mut csv::Writer<W>) -> Result<()> {
        writer.write_record(UnifiedSample::COLUMNS)?;
        for row in self {
            writer.serialize(row)?;
        }
        Ok(())
    }

    fn record_batch(&self) -> Result<RecordBatch> {
        let [subject, eda, temp, ecg, resp, code, condition] = UnifiedSample::COLUMNS;
        let schema = Arc::new(Schema::new(vec![
            Field::new(subject, DataType::Utf8, false),
            Field::new(eda, DataType::Float64, false),
            Field::new(temp, DataType::Float64, false),
            Field::new(ecg, DataType::Float64, false),
            Field::new(resp, DataType::Float64, false),
            Field::new(code, DataType::Int64, false),
            Field::new(condition, DataType::Utf8, false),
        ]));
        let columns: Vec<ArrayRef> = vec![
            Arc::new(StringArray::from_iter_values(self.iter().map(|r| r.subject_id.as_str()))),
            Arc::new(Float64Array::from_iter_values(self.iter().map(|r| r.eda))),
            Arc::new(Float64Array::from_iter_values(self.iter().map(|r| r.temperature))),
            Arc::new(Float64Array::from_iter_values(self.iter().map(|r| r.ecg))),
            Arc::new(Float64Array::from_iter_values(self.iter().map(|r| r.respiration))),
            Arc::new(Int64Array::from_iter_values(self.iter().map(|r| r.label_code))),
            Arc::new(StringArray::from_iter_values(self.iter().map(|r| r.condition_name))),
        ];
        Ok(RecordBatch::try_new(schema, columns)?)
    }
}

// ---------------------------------------------------------------------------
// AffectiveROAD
// ---------------------------------------------------------------------------

impl Table for [RoadSample] {
    fn row_count(&self) -> usize {
        self.len()
    }

    fn write_csv<W: Write>(&self, writer: &mut csv::Writer<W>) -> Result<()> {
        writer.write_record(RoadSample::COLUMNS)?;
        for row in self {
            writer.serialize(row)?;
        }
        Ok(())
    }

    fn record_batch(&self) -> Result<RecordBatch> {
        let [drive, time, hr, dataset] = RoadSample::COLUMNS;
        let schema = Arc::new(Schema::new(vec![
            Field::new(drive, DataType::Utf8, false),
            Field::new(time, DataType::Float64, false),
            Field::new(hr, DataType::Float64, false),
            Field::new(dataset, DataType::Utf8, false),
        ]));
        let columns: Vec<ArrayRef> = vec![
            Arc::new(StringArray::from_iter_values(self.iter().map(|r| r.drive_id.as_str()))),
            Arc::new(Float64Array::from_iter_values(self.iter().map(|r| r.relative_time_seconds))),
            Arc::new(Float64Array::from_iter_values(self.iter().map(|r| r.heart_rate))),
            Arc::new(StringArray::from_iter_values(self.iter().map(|r| r.dataset))),
        ];
        Ok(RecordBatch::try_new(schema, columns)?)
    }
}

// ---------------------------------------------------------------------------
// SWELL – arbitrary columns, typed by inference for parquet
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Integer,
    Float,
    Bool,
    Text,
}

/// Float cells holding a whole number, as spreadsheet readers report them.
fn integral(v: f64) -> Option<i64> {
    (v.fract() == 0.0 && v.abs() < 9.0e15).then_some(v as i64)
}

/// Narrowest type holding every non-null cell of a column. Whole-number
/// floats count as integers.
fn infer_kind<'a>(cells: impl Iterator<Item = &'a CellValue>) -> ColumnKind {
    let mut kind: Option<ColumnKind> = None;
    for cell in cells {
        let cell_kind = match cell {
            CellValue::Null => continue,
            CellValue::Integer(_) => ColumnKind::Integer,
            CellValue::Float(v) if integral(*v).is_some() => ColumnKind::Integer,
            CellValue::Float(_) => ColumnKind::Float,
            CellValue::Bool(_) => ColumnKind::Bool,
            CellValue::String(_) | CellValue::Date(_) => return ColumnKind::Text,
        };
        kind = Some(match (kind, cell_kind) {
            (None, k) => k,
            (Some(a), b) if a == b => a,
            (Some(ColumnKind::Integer), ColumnKind::Float)
            | (Some(ColumnKind::Float), ColumnKind::Integer) => ColumnKind::Float,
            _ => return ColumnKind::Text,
        });
    }
    kind.unwrap_or(ColumnKind::Text)
}

impl Table for SwellSheet {
    fn row_count(&self) -> usize {
        self.len()
    }

    fn write_csv<W: Write>(&self, writer: &mut csv::Writer<W>) -> Result<()> {
        let kinds: Vec<ColumnKind> = (0..self.headers.len())
            .map(|i| infer_kind(self.rows.iter().filter_map(|row| row.get(i))))
            .collect();

        writer.write_record(&self.headers)?;
        for row in &self.rows {
            writer.write_record(row.iter().zip(&kinds).map(|(cell, kind)| match (cell, kind) {
                (CellValue::Float(v), ColumnKind::Integer) => {
                    integral(*v).map_or_else(|| cell.to_string(), |n| n.to_string())
                }
                (CellValue::Integer(n), ColumnKind::Float) => {
                    CellValue::Float(*n as f64).to_string()
                }
                _ => cell.to_string(),
            }))?;
        }
        Ok(())
    }

    fn record_batch(&self) -> Result<RecordBatch> {
        let mut fields = Vec::with_capacity(self.headers.len());
        let mut columns: Vec<ArrayRef> = Vec::with_capacity(self.headers.len());

        for (i, name) in self.headers.iter().enumerate() {
            let cells = || self.rows.iter().map(move |row| row.get(i).unwrap_or(&CellValue::Null));
            let (data_type, array): (DataType, ArrayRef) = match infer_kind(cells()) {
                ColumnKind::Integer => (
                    DataType::Int64,
                    Arc::new(
                        cells()
                            .map(|c| match c {
                                CellValue::Integer(v) => Some(*v),
                                CellValue::Float(v) => integral(*v),
                                _ => None,
                            })
                            .collect::<Int64Array>(),
                    ),
                ),
                ColumnKind::Float => (
                    DataType::Float64,
                    Arc::new(cells().map(CellValue::as_f64).collect::<Float64Array>()),
                ),
                ColumnKind::Bool => (
                    DataType::Boolean,
                    Arc::new(
                        cells()
                            .map(|c| match c {
                                CellValue::Bool(b) => Some(*b),
                                _ => None,
                            })
                            .collect::<BooleanArray>(),
                    ),
                ),
                ColumnKind::Text => (
                    DataType::Utf8,
                    Arc::new(
                        cells()
                            .map(|c| match c {
                                CellValue::Null => None,
                                other => Some(other.to_string()),
                            })
                            .collect::<StringArray>(),
                    ),
                ),
            };
            fields.push(Field::new(name, data_type, true));
            columns.push(array);
        }

        Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Array, AsArray};
    use arrow::datatypes::{Float64Type, Int64Type};
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

    fn road_rows() -> Vec<RoadSample> {
        (0..3)
            .map(|i| RoadSample {
                drive_id: "Drv1".into(),
                relative_time_seconds: i as f64 * 0.25,
                heart_rate: 70.0 + i as f64,
                dataset: RoadSample::DATASET,
            })
            .collect()
    }

    #[test]
    fn csv_has_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/road.csv");
        write_table(road_rows().as_slice(), &path, OutputFormat::Csv).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "DriveID,RelativeTimeSeconds,HeartRate,Dataset");
        assert_eq!(lines[1], "Drv1,0.0,70.0,AffectiveROAD");
        assert_eq!(lines[2], "Drv1,0.25,71.0,AffectiveROAD");
        assert_eq!(lines.len(), 4);
        assert!(!partial_path(&path).exists());
    }

    #[test]
    fn empty_table_still_gets_a_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wesad.csv");
        let rows: Vec<UnifiedSample> = Vec::new();
        write_table(rows.as_slice(), &path, OutputFormat::Csv).unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap().trim_end(),
            "SubjectID,EDA,Temperature,ECG,Respiration,LabelCode,ConditionName"
        );
    }

    #[test]
    fn wesad_parquet_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wesad.parquet");
        let rows = vec![UnifiedSample {
            subject_id: "S2".into(),
            eda: 1.25,
            temperature: 33.5,
            ecg: -0.1,
            respiration: 2.0,
            label_code: 2,
            condition_name: "Stress",
        }];
        write_table(rows.as_slice(), &path, OutputFormat::Parquet).unwrap();

        let file = File::open(&path).unwrap();
        let reader = ParquetRecordBatchReaderBuilder::try_new(file).unwrap().build().unwrap();
        let batches: Vec<RecordBatch> = reader.map(|b| b.unwrap()).collect();
        assert_eq!(batches.len(), 1);
        let batch = &batches[0];
        assert_eq!(batch.num_rows(), 1);
        assert_eq!(batch.schema().field(5).name(), "LabelCode");
        assert_eq!(batch.column(5).as_primitive::<Int64Type>().value(0), 2);
        assert_eq!(batch.column(2).as_primitive::<Float64Type>().value(0), 33.5);
        assert_eq!(batch.column(6).as_string::<i32>().value(0), "Stress");
    }

    #[test]
    fn swell_columns_are_inferred() {
        let sheet = SwellSheet {
            headers: vec!["PP".into(), "Minute".into(), "SCL".into(), "Mixed".into()],
            rows: vec![
                vec![
                    CellValue::String("PP1".into()),
                    CellValue::Integer(1),
                    CellValue::Integer(5),
                    CellValue::Integer(1),
                ],
                vec![
                    CellValue::String("PP1".into()),
                    CellValue::Null,
                    CellValue::Float(5.5),
                    CellValue::Bool(true),
                ],
            ],
        }
        .with_dataset_tag();

        let batch = sheet.record_batch().unwrap();
        let schema = batch.schema();
        let types: Vec<&DataType> = schema.fields().iter().map(|f| f.data_type()).collect();
        assert_eq!(
            types,
            vec![
                &DataType::Utf8,
                &DataType::Int64,
                &DataType::Float64,
                &DataType::Utf8,
                &DataType::Utf8,
            ]
        );
        assert!(batch.column(1).is_null(1));
        assert_eq!(batch.column(3).as_string::<i32>().value(1), "True");
        assert_eq!(batch.column(4).as_string::<i32>().value(0), "SWELL");
    }

    #[test]
    fn swell_csv_passes_cells_through() {
        let sheet = SwellSheet {
            headers: vec!["PP".into(), "SCL".into()],
            rows: vec![vec![CellValue::String("PP1".into()), CellValue::Float(5.5)]],
        }
        .with_dataset_tag();

        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(Vec::new());
        sheet.write_csv(&mut writer).unwrap();
        let text = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        assert_eq!(text, "PP,SCL,Dataset\nPP1,5.5,SWELL\n");
    }

    #[test]
    fn whole_number_float_columns_are_written_as_integers() {
        // Spreadsheet readers hand back every number as a float.
        let sheet = SwellSheet {
            headers: vec!["Blok".into(), "SCL".into(), "Gap".into()],
            rows: vec![
                vec![CellValue::Float(1.0), CellValue::Float(5.0), CellValue::Float(2.0)],
                vec![CellValue::Float(2.0), CellValue::Float(5.5), CellValue::Null],
                vec![CellValue::Integer(3), CellValue::Integer(6), CellValue::Float(-4.0)],
            ],
        };

        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(Vec::new());
        sheet.write_csv(&mut writer).unwrap();
        let text = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        assert_eq!(text, "Blok,SCL,Gap\n1,5.0,2\n2,5.5,\n3,6.0,-4\n");

        let batch = sheet.record_batch().unwrap();
        assert_eq!(batch.schema().field(0).data_type(), &DataType::Int64);
        assert_eq!(batch.schema().field(1).data_type(), &DataType::Float64);
        assert_eq!(batch.column(0).as_primitive::<Int64Type>().value(1), 2);
        assert_eq!(batch.column(2).as_primitive::<Int64Type>().value(2), -4);
        assert!(batch.column(2).is_null(1));
    }
}
