// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Renders query rows into an in-memory delimited text file.
//!
//! Output is raw concatenation: values are joined with the separator and each
//! line ends with `\n`. Nothing is quoted or escaped, so a value containing the
//! separator or a newline is written as is.

use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, TimeZone};
use core_types::Schema;
use futures::StreamExt;
use row_source::{RowSource, RowStream, SourceError};
use std::fmt;
use thiserror::Error;

pub const DEFAULT_SEPARATOR: &[u8] = b",";
pub const LINE_SEPARATOR: &[u8] = b"\n";
pub const FILE_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";
pub const FILE_EXTENSION: &str = ".csv";

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("row {row}: {source}")]
    Source {
        row: usize,
        #[source]
        source: SourceError,
    },
    #[error("row {row} has {actual} values for {expected} columns")]
    RowWidth {
        row: usize,
        expected: usize,
        actual: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderOptions {
    pub with_header: bool,
    pub separator: Vec<u8>,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            with_header: false,
            separator: DEFAULT_SEPARATOR.to_vec(),
        }
    }
}

/// Rendered export, alive for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedFile {
    name: String,
    content: Bytes,
    rows: usize,
}

impl RenderedFile {
    pub fn new(name: impl Into<String>, content: Bytes, rows: usize) -> Self {
        Self {
            name: name.into(),
            content,
            rows,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Cheap to clone; every delivery attempt shares the same buffer.
    pub fn content(&self) -> &Bytes {
        &self.content
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}

/// `{prefix}{YYYYMMDDHHMMSS}.csv` in the zone of `at`.
pub fn file_name<Tz: TimeZone>(prefix: &str, at: &DateTime<Tz>) -> String
where
    Tz::Offset: fmt::Display,
{
    format!("{prefix}{}{FILE_EXTENSION}", at.format(FILE_TIMESTAMP_FORMAT))
}

/// Drains `rows` into a delimited buffer. Stream errors abort rendering.
pub async fn serialize(
    with_header: bool,
    separator: &[u8],
    schema: &Schema,
    rows: RowStream,
) -> Result<Bytes, RenderError> {
    serialize_counted(with_header, separator, schema, rows)
        .await
        .map(|(content, _)| content)
}

async fn serialize_counted(
    with_header: bool,
    separator: &[u8],
    schema: &Schema,
    mut rows: RowStream,
) -> Result<(Bytes, usize), RenderError> {
    let mut buffer = BytesMut::new();
    if with_header {
        write_line(
            &mut buffer,
            separator,
            schema.fields().iter().map(|field| field.as_bytes()),
        );
    }

    let mut count = 0usize;
    while let Some(next) = rows.next().await {
        let row = next.map_err(|source| RenderError::Source { row: count, source })?;
        if row.len() != schema.len() {
            return Err(RenderError::RowWidth {
                row: count,
                expected: schema.len(),
                actual: row.len(),
            });
        }
        let cells: Vec<String> = row.values().iter().map(ToString::to_string).collect();
        write_line(&mut buffer, separator, cells.iter().map(|cell| cell.as_bytes()));
        count += 1;
    }
    Ok((buffer.freeze(), count))
}

fn write_line<'a>(buffer: &mut BytesMut, separator: &[u8], cells: impl Iterator<Item = &'a [u8]>) {
    for (idx, cell) in cells.enumerate() {
        if idx > 0 {
            buffer.put_slice(separator);
        }
        buffer.put_slice(cell);
    }
    buffer.put_slice(LINE_SEPARATOR);
}

/// Renders a whole source under `name`.
pub async fn render(
    options: &RenderOptions,
    name: impl Into<String>,
    source: Box<dyn RowSource>,
) -> Result<RenderedFile, RenderError> {
    let schema = source.schema().clone();
    let (content, rows) =
        serialize_counted(options.with_header, &options.separator, &schema, source.into_rows())
            .await?;
    Ok(RenderedFile::new(name, content, rows))
}
