use anyhow::{Context, Result};
use arrow::{
    array::{ArrayRef, Date32Builder, Int64Builder, StringBuilder},
    datatypes::{DataType, Field, Schema},
    record_batch::RecordBatch,
};
use chrono::{Datelike, NaiveDate};
use parquet::arrow::arrow_writer::ArrowWriter;
use parquet::{basic::Compression, file::properties::WriterProperties};
use std::{
    fs::{self, File},
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::common::{ensure_parent_dir, move_into_place, tmp_path_for};

/// Days from 0001-01-01 to 1970-01-01.
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Int64,
    Utf8,
    Date32,
}

impl ColumnType {
    fn data_type(self) -> DataType {
        match self {
            ColumnType::Int64 => DataType::Int64,
            ColumnType::Utf8 => DataType::Utf8,
            ColumnType::Date32 => DataType::Date32,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellValue<'a> {
    Int(Option<i64>),
    Text(Option<&'a str>),
    Date(Option<NaiveDate>),
}

impl CellValue<'_> {
    /// Text rendering used by the CSV export. Absent values render empty.
    pub fn render(&self) -> String {
        match self {
            CellValue::Int(v) => v.map(|x| x.to_string()).unwrap_or_default(),
            CellValue::Text(v) => v.unwrap_or_default().to_string(),
            CellValue::Date(v) => v
                .map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_default(),
        }
    }
}

enum ColumnBuilder {
    Int64(Int64Builder),
    Utf8(StringBuilder),
    Date32(Date32Builder),
}

impl ColumnBuilder {
    fn new(column_type: ColumnType) -> Self {
        match column_type {
            ColumnType::Int64 => ColumnBuilder::Int64(Int64Builder::new()),
            ColumnType::Utf8 => ColumnBuilder::Utf8(StringBuilder::new()),
            ColumnType::Date32 => ColumnBuilder::Date32(Date32Builder::new()),
        }
    }

    fn append(&mut self, value: &CellValue<'_>) -> Result<()> {
        match (self, value) {
            (ColumnBuilder::Int64(b), CellValue::Int(v)) => b.append_option(*v),
            (ColumnBuilder::Utf8(b), CellValue::Text(v)) => b.append_option(*v),
            (ColumnBuilder::Date32(b), CellValue::Date(v)) => {
                b.append_option(v.map(|d| d.num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE))
            }
            (_, other) => anyhow::bail!("Cell {other:?} does not match its column type"),
        }
        Ok(())
    }

    fn finish(&mut self) -> ArrayRef {
        match self {
            ColumnBuilder::Int64(b) => Arc::new(b.finish()),
            ColumnBuilder::Utf8(b) => Arc::new(b.finish()),
            ColumnBuilder::Date32(b) => Arc::new(b.finish()),
        }
    }
}

/// Streaming Parquet writer with a fixed typed schema.
///
/// Rows are buffered into Arrow builders and flushed every `batch_size` rows. The file is
/// written next to the destination and only renamed into place by [`TypedParquetWriter::finish`].
pub struct TypedParquetWriter {
    output_path: PathBuf,
    tmp_path: PathBuf,
    schema: Arc<Schema>,
    writer: ArrowWriter<File>,
    builders: Vec<ColumnBuilder>,
    rows_in_batch: usize,
    batch_size: usize,
}

impl TypedParquetWriter {
    pub fn try_new(
        output_path: &Path,
        columns: &[(&str, ColumnType)],
        batch_size: usize,
    ) -> Result<Self> {
        ensure_parent_dir(output_path)?;
        let tmp_path = tmp_path_for(output_path, "output.parquet");

        let fields: Vec<Field> = columns
            .iter()
            .map(|(name, column_type)| Field::new(*name, column_type.data_type(), true))
            .collect();
        let schema = Arc::new(Schema::new(fields));

        let props = WriterProperties::builder()
            .set_compression(Compression::SNAPPY)
            .build();

        let file = File::create(&tmp_path)
            .with_context(|| format!("Failed creating {}", tmp_path.display()))?;
        let writer = ArrowWriter::try_new(file, Arc::clone(&schema), Some(props))
            .context("Failed creating Parquet ArrowWriter")?;

        let builders = columns
            .iter()
            .map(|(_, column_type)| ColumnBuilder::new(*column_type))
            .collect();

        Ok(Self {
            output_path: output_path.to_path_buf(),
            tmp_path,
            schema,
            writer,
            builders,
            rows_in_batch: 0,
            batch_size: batch_size.max(1),
        })
    }

    pub fn push_row(&mut self, values: &[CellValue<'_>]) -> Result<()> {
        anyhow::ensure!(
            values.len() == self.builders.len(),
            "push_row expected {} columns, got {}",
            self.builders.len(),
            values.len()
        );

        for (idx, value) in values.iter().enumerate() {
            let column = self.schema.field(idx).name();
            self.builders[idx]
                .append(value)
                .with_context(|| format!("Invalid value for column {column}"))?;
        }
        self.rows_in_batch += 1;
        if self.rows_in_batch >= self.batch_size {
            self.flush_batch()?;
        }
        Ok(())
    }

    pub fn finish(mut self) -> Result<()> {
        self.flush_batch()?;
        self.writer
            .close()
            .context("Failed closing Parquet writer")?;
        move_into_place(&self.tmp_path, &self.output_path)
    }

    pub fn abort(self) {
        // Never replace the destination with a partial file.
        let _ = self.writer.close();
        let _ = fs::remove_file(&self.tmp_path);
    }

    fn flush_batch(&mut self) -> Result<()> {
        if self.rows_in_batch == 0 {
            return Ok(());
        }

        let arrays: Vec<ArrayRef> = self
            .builders
            .iter_mut()
            .map(ColumnBuilder::finish)
            .collect();
        let batch = RecordBatch::try_new(Arc::clone(&self.schema), arrays)
            .context("Failed creating RecordBatch for Parquet write")?;
        self.writer
            .write(&batch)
            .context("Failed writing Parquet RecordBatch")?;
        self.rows_in_batch = 0;
        Ok(())
    }
}
