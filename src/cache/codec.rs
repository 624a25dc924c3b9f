// src/cache/codec.rs

use arrow::{
    compute::concat_batches,
    csv::{reader::Format, ReaderBuilder, WriterBuilder},
    datatypes::{DataType, Field, Schema},
    record_batch::RecordBatch,
};
use bytes::Bytes;
use parquet::{
    arrow::{arrow_reader::ParquetRecordBatchReaderBuilder, ArrowWriter},
    basic::Compression,
    file::properties::WriterProperties,
};
use std::{io::Cursor, path::Path, sync::Arc};

use crate::error::{Result, RxError};

/// On-disk representation of a cached table, picked from the key's extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableCodec {
    /// Header row + delimited text. Columns come back as Utf8.
    Csv,
    /// Column types survive the round trip.
    Parquet,
}

fn cache_err(what: &str, e: impl std::fmt::Display) -> RxError {
    RxError::Cache(format!("{}: {}", what, e))
}

impl TableCodec {
    pub fn for_key(key: &str) -> Result<Self> {
        match Path::new(key)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            Some("csv") => Ok(TableCodec::Csv),
            Some("parquet") => Ok(TableCodec::Parquet),
            _ => Err(RxError::Cache(format!(
                "cache key {:?} needs a .csv or .parquet extension",
                key
            ))),
        }
    }

    pub fn encode(&self, batch: &RecordBatch) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        match self {
            TableCodec::Csv => {
                let mut writer = WriterBuilder::new().with_header(true).build(&mut buf);
                writer
                    .write(batch)
                    .map_err(|e| cache_err("encoding csv", e))?;
            }
            TableCodec::Parquet => {
                let props = WriterProperties::builder()
                    .set_compression(Compression::SNAPPY)
                    .build();
                let mut writer = ArrowWriter::try_new(&mut buf, batch.schema(), Some(props))
                    .map_err(|e| cache_err("creating parquet writer", e))?;
                writer
                    .write(batch)
                    .map_err(|e| cache_err("writing parquet batch", e))?;
                writer
                    .close()
                    .map_err(|e| cache_err("closing parquet writer", e))?;
            }
        }
        Ok(buf)
    }

    pub fn decode(&self, data: Vec<u8>) -> Result<RecordBatch> {
        match self {
            TableCodec::Csv => decode_csv(data),
            TableCodec::Parquet => decode_parquet(data),
        }
    }
}

fn decode_csv(data: Vec<u8>) -> Result<RecordBatch> {
    let format = Format::default().with_header(true);
    let (inferred, _) = format
        .infer_schema(Cursor::new(&data), Some(0))
        .map_err(|e| cache_err("reading csv header", e))?;
    // Keep cells verbatim; typing belongs to the record layer.
    let schema = Arc::new(Schema::new(
        inferred
            .fields()
            .iter()
            .map(|f| Field::new(f.name(), DataType::Utf8, true))
            .collect::<Vec<_>>(),
    ));
    let reader = ReaderBuilder::new(schema.clone())
        .with_format(format)
        .build(Cursor::new(data))
        .map_err(|e| cache_err("opening csv reader", e))?;
    let batches = reader
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| cache_err("reading csv rows", e))?;
    concat_batches(&schema, &batches).map_err(|e| cache_err("joining csv batches", e))
}

fn decode_parquet(data: Vec<u8>) -> Result<RecordBatch> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(Bytes::from(data))
        .map_err(|e| cache_err("opening parquet", e))?;
    let schema = builder.schema().clone();
    let reader = builder
        .with_batch_size(8192)
        .build()
        .map_err(|e| cache_err("building parquet reader", e))?;
    let batches = reader
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| cache_err("reading parquet batches", e))?;
    concat_batches(&schema, &batches).map_err(|e| cache_err("joining parquet batches", e))
}
