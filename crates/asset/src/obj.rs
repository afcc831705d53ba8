//! Minimal OBJ reader: vertex positions and triangle faces only.
//!
//! Lines are bucketed by a single-character prefix test (`v` / `f`), then each
//! record is tokenized into typed fields before it is stored.

use std::{
    fs::File,
    io::{self, BufRead, BufReader},
    path::Path,
    str::FromStr,
};

use corelib::{CoreError, CoreResult, ParseErrorKind};

use crate::mesh::MeshData;

/// Marker plus three values.
const MIN_FIELDS: usize = 4;

/// Path reported for read failures outside `load_obj_from_path`.
const READER_PATH: &str = "<reader>";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordKind {
    Vertex,
    Face,
}

impl RecordKind {
    /// Prefix-only classification on the raw line bytes. Anything starting
    /// with `v` is a vertex record, so `vn`/`vt` lines land in the vertex
    /// bucket as well.
    pub fn classify(line: &[u8]) -> Option<Self> {
        match line.first() {
            Some(b'v') => Some(RecordKind::Vertex),
            Some(b'f') => Some(RecordKind::Face),
            _ => None,
        }
    }
}

/// Typed OBJ record.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ObjRecord {
    Vertex { x: f32, y: f32, z: f32 },
    /// 0-based vertex indices.
    Face { a: u16, b: u16, c: u16 },
}

/// One classified line, kept verbatim together with its 1-based line number.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawRecord {
    pub line: usize,
    pub text: String,
}

impl RawRecord {
    pub fn new(line: usize, text: impl Into<String>) -> Self {
        Self {
            line,
            text: text.into(),
        }
    }

    pub fn tokenize(&self, kind: RecordKind) -> CoreResult<ObjRecord> {
        match kind {
            RecordKind::Vertex => {
                let [x, y, z] = self.tokenize_vertex()?;
                Ok(ObjRecord::Vertex { x, y, z })
            }
            RecordKind::Face => {
                let [a, b, c] = self.tokenize_face()?;
                Ok(ObjRecord::Face { a, b, c })
            }
        }
    }

    /// Fields 1..=3 as `x, y, z`; trailing fields are ignored.
    fn tokenize_vertex(&self) -> CoreResult<[f32; 3]> {
        let fields = self.fields()?;
        Ok([
            self.parse_field(&fields, 1)?,
            self.parse_field(&fields, 2)?,
            self.parse_field(&fields, 3)?,
        ])
    }

    /// Fields 1..=3 as 1-based indices, returned 0-based.
    fn tokenize_face(&self) -> CoreResult<[u16; 3]> {
        let fields = self.fields()?;
        Ok([
            self.parse_index(&fields, 1)?,
            self.parse_index(&fields, 2)?,
            self.parse_index(&fields, 3)?,
        ])
    }

    fn fields(&self) -> CoreResult<Vec<&str>> {
        let fields: Vec<&str> = self.text.split_whitespace().collect();
        if fields.len() < MIN_FIELDS {
            return Err(self.error(ParseErrorKind::MissingFields {
                expected: MIN_FIELDS,
                found: fields.len(),
            }));
        }
        Ok(fields)
    }

    fn parse_field<T: FromStr>(&self, fields: &[&str], index: usize) -> CoreResult<T> {
        let token = fields[index];
        token.parse::<T>().map_err(|_| {
            self.error(ParseErrorKind::InvalidNumber {
                index,
                token: token.to_owned(),
            })
        })
    }

    // Only representability is checked here, not the vertex count.
    fn parse_index(&self, fields: &[&str], index: usize) -> CoreResult<u16> {
        let raw: i64 = self.parse_field(fields, index)?;
        raw.checked_sub(1)
            .and_then(|zero_based| u16::try_from(zero_based).ok())
            .ok_or_else(|| self.error(ParseErrorKind::IndexOutOfRange { value: raw }))
    }

    fn error(&self, kind: ParseErrorKind) -> CoreError {
        CoreError::Parse {
            line: self.line,
            text: self.text.clone(),
            kind,
        }
    }
}

/// Vertex and face records in file order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RawRecords {
    pub vertices: Vec<RawRecord>,
    pub faces: Vec<RawRecord>,
}

impl RawRecords {
    /// Bucket every line of `reader`; lines that are neither `v…` nor `f…` are
    /// dropped before decoding, so their encoding does not matter.
    pub fn classify<R: BufRead>(mut reader: R) -> CoreResult<Self> {
        let mut records = RawRecords::default();
        let mut foreign_markers = 0usize;
        let mut buf = Vec::new();
        let mut line_no = 0usize;

        loop {
            buf.clear();
            let read = reader
                .read_until(b'\n', &mut buf)
                .map_err(|source| CoreError::AssetRead {
                    path: READER_PATH.to_owned(),
                    source,
                })?;
            if read == 0 {
                break;
            }
            line_no += 1;

            let bytes = trim_line_ending(&buf);
            let Some(kind) = RecordKind::classify(bytes) else {
                continue;
            };
            let text = String::from_utf8(bytes.to_vec()).map_err(|_| CoreError::Parse {
                line: line_no,
                text: String::from_utf8_lossy(bytes).into_owned(),
                kind: ParseErrorKind::InvalidUtf8,
            })?;
            let record = RawRecord::new(line_no, text);
            match kind {
                RecordKind::Vertex => {
                    if record.text.split_whitespace().next() != Some("v") {
                        foreign_markers += 1;
                    }
                    records.vertices.push(record);
                }
                RecordKind::Face => records.faces.push(record),
            }
        }

        if foreign_markers > 0 {
            log::warn!(
                "{} record(s) with a marker other than `v` were classified as vertices",
                foreign_markers
            );
        }
        Ok(records)
    }

    /// Allocate exactly one triple per record and fill it from the typed
    /// records. Nothing is returned unless every record tokenizes.
    pub fn build(&self) -> CoreResult<MeshData> {
        let mut positions = Vec::with_capacity(self.vertices.len());
        let mut indices = Vec::with_capacity(self.faces.len());

        let tagged = self
            .vertices
            .iter()
            .map(|r| (RecordKind::Vertex, r))
            .chain(self.faces.iter().map(|r| (RecordKind::Face, r)));
        for (kind, record) in tagged {
            match record.tokenize(kind)? {
                ObjRecord::Vertex { x, y, z } => positions.push([x, y, z]),
                ObjRecord::Face { a, b, c } => indices.push([a, b, c]),
            }
        }

        Ok(MeshData::new(positions, indices))
    }
}

/// Strip `\n` or `\r\n`.
fn trim_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Load an OBJ mesh from a file path.
pub fn load_obj_from_path(path: impl AsRef<Path>) -> CoreResult<MeshData> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| CoreError::AssetRead {
        path: path.display().to_string(),
        source,
    })?;
    let records = RawRecords::classify(BufReader::new(file)).map_err(|err| match err {
        CoreError::AssetRead { source, .. } => CoreError::AssetRead {
            path: path.display().to_string(),
            source,
        },
        other => other,
    })?;
    let mesh = records.build()?;

    log::info!(
        "Loaded OBJ {}: {} vertices, {} faces",
        path.display(),
        mesh.vertex_count(),
        mesh.face_count()
    );
    Ok(mesh)
}

/// Load an OBJ mesh from a [`BufRead`] implementation.
pub fn load_obj_from_reader<R: BufRead>(reader: R) -> CoreResult<MeshData> {
    RawRecords::classify(reader)?.build()
}

/// Convenience helper to parse an OBJ string literal.
pub fn load_obj_from_str(contents: &str) -> CoreResult<MeshData> {
    load_obj_from_reader(io::Cursor::new(contents))
}
