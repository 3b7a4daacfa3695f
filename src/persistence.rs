//! On-disk format for a [`crate::vector_index::VectorIndex`]: `<name>.npz`
//! (a zip archive of two NPY arrays) plus a `<name>.json` metadata sidecar.
//!
//! Both files are written atomically: build the full byte buffer in memory,
//! write it to a temporary path next to the target, then rename into place.
//! A reader never observes a partially-written file.

use std::fs;
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};

use half::f16;
use serde::{Deserialize, Serialize};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{Error, Result};
use crate::vector_index::{Distance, VectorIndex};

const FORMAT_VERSION: u32 = 1;
const VECTORS_ENTRY: &str = "vectors.npy";
const DOC_IDS_ENTRY: &str = "doc_ids.npy";

#[derive(Debug, Serialize, Deserialize)]
struct IndexMetadata {
    dimension: usize,
    count: usize,
    embedder_id: String,
    distance: String,
    format_version: u32,
}

fn npz_path(stem: &Path) -> PathBuf {
    with_appended_extension(stem, "npz")
}

fn json_path(stem: &Path) -> PathBuf {
    with_appended_extension(stem, "json")
}

/// Whether any persisted artifact for `stem` exists at all. Callers that
/// resolve a user-supplied index name use this to distinguish "no such
/// index" (`Error::UnknownIndex`) from "index exists but a file under it is
/// missing or corrupt" (`Error::MissingFile`, raised by [`load_index`]).
pub fn index_exists(stem: &Path) -> bool {
    npz_path(stem).exists() || json_path(stem).exists()
}

fn with_appended_extension(stem: &Path, ext: &str) -> PathBuf {
    let mut s = stem.as_os_str().to_owned();
    s.push(".");
    s.push(ext);
    PathBuf::from(s)
}

/// Write `path`'s contents atomically: a temp file in the same directory,
/// then a rename. Never leaves a half-written file at `path`.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp_path = with_appended_extension(path, "tmp");
    {
        let mut tmp = fs::File::create(&tmp_path)?;
        tmp.write_all(bytes)?;
        tmp.sync_all()?;
    }
    fs::rename(&tmp_path, path)?;
    Ok(())
}

pub fn save_index(stem: &Path, index: &VectorIndex) -> Result<()> {
    let npz_bytes = build_npz(index.dimension(), index.raw_rows(), index.doc_ids())?;
    write_atomic(&npz_path(stem), &npz_bytes)?;

    let metadata = IndexMetadata {
        dimension: index.dimension(),
        count: index.len(),
        embedder_id: index.embedder_id().to_string(),
        distance: index.distance().as_str().to_string(),
        format_version: FORMAT_VERSION,
    };
    let json_bytes = serde_json::to_vec_pretty(&metadata)
        .map_err(|e| Error::Corrupt(format!("failed to serialize metadata: {e}")))?;
    write_atomic(&json_path(stem), &json_bytes)?;

    Ok(())
}

/// Load a persisted index, optionally requiring it to have been built with a
/// specific embedder. Pass `None` to skip the check (the caller doesn't care,
/// or doesn't yet know, which embedder it was built with).
pub fn load_index(stem: &Path, expected_embedder_id: Option<&str>) -> Result<VectorIndex> {
    let npz_file_path = npz_path(stem);
    let json_file_path = json_path(stem);

    if !npz_file_path.exists() {
        return Err(Error::MissingFile(npz_file_path));
    }
    if !json_file_path.exists() {
        return Err(Error::MissingFile(json_file_path));
    }

    let json_bytes = fs::read(&json_file_path)?;
    let metadata: IndexMetadata = serde_json::from_slice(&json_bytes)
        .map_err(|e| Error::Corrupt(format!("invalid metadata json: {e}")))?;
    if metadata.format_version != FORMAT_VERSION {
        return Err(Error::VersionMismatch(metadata.format_version));
    }
    if let Some(expected) = expected_embedder_id {
        if expected != metadata.embedder_id {
            return Err(Error::EmbedderMismatch {
                expected: expected.to_string(),
                got: metadata.embedder_id.clone(),
            });
        }
    }
    let distance = Distance::from_str(&metadata.distance)
        .ok_or_else(|| Error::Corrupt(format!("unknown distance kind: {}", metadata.distance)))?;

    let npz_bytes = fs::read(&npz_file_path)?;
    let (rows, doc_ids) = read_npz(&npz_bytes)?;

    if doc_ids.len() != metadata.count {
        return Err(Error::ShapeMismatch(format!(
            "metadata declares {} docs, doc_ids array has {}",
            metadata.count,
            doc_ids.len()
        )));
    }
    if rows.len() != metadata.count * metadata.dimension {
        return Err(Error::ShapeMismatch(format!(
            "metadata declares {} x {}, vectors array has {} values",
            metadata.count,
            metadata.dimension,
            rows.len()
        )));
    }

    VectorIndex::from_parts(metadata.dimension, distance, metadata.embedder_id, doc_ids, rows)
}

fn build_npz(dimension: usize, rows: &[f16], doc_ids: &[String]) -> Result<Vec<u8>> {
    let count = doc_ids.len();
    let vectors_npy = write_npy_f16_2d(count, dimension, rows);
    let doc_ids_npy = write_npy_unicode_1d(doc_ids);

    let buf = Cursor::new(Vec::new());
    let mut writer = ZipWriter::new(buf);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    writer
        .start_file(VECTORS_ENTRY, options)
        .map_err(|e| Error::Corrupt(format!("npz write failed: {e}")))?;
    writer
        .write_all(&vectors_npy)
        .map_err(|e| Error::Corrupt(format!("npz write failed: {e}")))?;

    writer
        .start_file(DOC_IDS_ENTRY, options)
        .map_err(|e| Error::Corrupt(format!("npz write failed: {e}")))?;
    writer
        .write_all(&doc_ids_npy)
        .map_err(|e| Error::Corrupt(format!("npz write failed: {e}")))?;

    let cursor = writer
        .finish()
        .map_err(|e| Error::Corrupt(format!("npz finalize failed: {e}")))?;
    Ok(cursor.into_inner())
}

fn read_npz(bytes: &[u8]) -> Result<(Vec<f16>, Vec<String>)> {
    let mut archive =
        ZipArchive::new(Cursor::new(bytes)).map_err(|e| Error::Corrupt(format!("not a valid npz: {e}")))?;

    let mut vectors_bytes = Vec::new();
    archive
        .by_name(VECTORS_ENTRY)
        .map_err(|_| Error::Corrupt(format!("npz missing entry {VECTORS_ENTRY}")))?
        .read_to_end(&mut vectors_bytes)?;

    let mut doc_ids_bytes = Vec::new();
    archive
        .by_name(DOC_IDS_ENTRY)
        .map_err(|_| Error::Corrupt(format!("npz missing entry {DOC_IDS_ENTRY}")))?
        .read_to_end(&mut doc_ids_bytes)?;

    let (_, _, rows) = read_npy_f16_2d(&vectors_bytes)?;
    let doc_ids = read_npy_unicode_1d(&doc_ids_bytes)?;
    Ok((rows, doc_ids))
}

const NPY_MAGIC: &[u8] = b"\x93NUMPY";

/// Pad an NPY header so `len(magic) + len(version) + len(header_len_field) + header_len`
/// is a multiple of 64, as the NPY v1.0 spec requires.
fn npy_header_bytes(dict_body: &str) -> Vec<u8> {
    let prefix_len = NPY_MAGIC.len() + 2 /* version */ + 2 /* header len field, v1.0 */;
    let mut header = format!("{{{dict_body}}}");
    let unpadded_total = prefix_len + header.len() + 1; // +1 for trailing '\n'
    let pad = (64 - unpadded_total % 64) % 64;
    header.push_str(&" ".repeat(pad));
    header.push('\n');

    let mut out = Vec::with_capacity(prefix_len + header.len());
    out.extend_from_slice(NPY_MAGIC);
    out.push(1); // major version
    out.push(0); // minor version
    out.extend_from_slice(&(header.len() as u16).to_le_bytes());
    out.extend_from_slice(header.as_bytes());
    out
}

fn write_npy_f16_2d(count: usize, dimension: usize, rows: &[f16]) -> Vec<u8> {
    let dict = format!(
        "'descr': '<f2', 'fortran_order': False, 'shape': ({count}, {dimension}), "
    );
    let mut out = npy_header_bytes(&dict);
    out.reserve(rows.len() * 2);
    for v in rows {
        out.extend_from_slice(&v.to_bits().to_le_bytes());
    }
    out
}

fn write_npy_unicode_1d(doc_ids: &[String]) -> Vec<u8> {
    let max_len = doc_ids.iter().map(|s| s.chars().count()).max().unwrap_or(0);
    let dict = format!(
        "'descr': '<U{max_len}', 'fortran_order': False, 'shape': ({}, ), ",
        doc_ids.len()
    );
    let mut out = npy_header_bytes(&dict);
    out.reserve(doc_ids.len() * max_len * 4);
    for id in doc_ids {
        let chars: Vec<char> = id.chars().collect();
        for i in 0..max_len {
            let code = chars.get(i).copied().unwrap_or('\0') as u32;
            out.extend_from_slice(&code.to_le_bytes());
        }
    }
    out
}

/// Minimal NPY v1.0 header parser: extracts `descr`, `shape` from the dict
/// literal this module itself writes. Not a general-purpose NPY reader.
struct NpyHeader {
    descr: String,
    shape: Vec<usize>,
    data_offset: usize,
}

fn parse_npy_header(bytes: &[u8]) -> Result<NpyHeader> {
    if bytes.len() < 10 || &bytes[0..6] != NPY_MAGIC {
        return Err(Error::Corrupt("not an NPY file (bad magic)".into()));
    }
    let header_len = u16::from_le_bytes([bytes[8], bytes[9]]) as usize;
    let header_start = 10;
    let header_end = header_start + header_len;
    if bytes.len() < header_end {
        return Err(Error::Corrupt("truncated NPY header".into()));
    }
    let header_str = std::str::from_utf8(&bytes[header_start..header_end])
        .map_err(|e| Error::Corrupt(format!("non-utf8 NPY header: {e}")))?;

    let descr = extract_dict_str_value(header_str, "descr")
        .ok_or_else(|| Error::Corrupt("NPY header missing descr".into()))?;
    let shape = extract_shape(header_str)
        .ok_or_else(|| Error::Corrupt("NPY header missing shape".into()))?;

    Ok(NpyHeader {
        descr,
        shape,
        data_offset: header_end,
    })
}

fn extract_dict_str_value(header: &str, key: &str) -> Option<String> {
    let needle = format!("'{key}':");
    let after = header.split_once(&needle)?.1.trim_start();
    let after = after.strip_prefix('\'')?;
    let end = after.find('\'')?;
    Some(after[..end].to_string())
}

fn extract_shape(header: &str) -> Option<Vec<usize>> {
    let after = header.split_once("'shape':")?.1.trim_start();
    let after = after.strip_prefix('(')?;
    let end = after.find(')')?;
    let inner = &after[..end];
    inner
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<usize>().ok())
        .collect()
}

fn read_npy_f16_2d(bytes: &[u8]) -> Result<(usize, usize, Vec<f16>)> {
    let header = parse_npy_header(bytes)?;
    if header.descr != "<f2" {
        return Err(Error::Corrupt(format!(
            "expected NPY dtype '<f2', got '{}'",
            header.descr
        )));
    }
    let (count, dimension) = match header.shape.as_slice() {
        [c, d] => (*c, *d),
        other => {
            return Err(Error::Corrupt(format!(
                "expected a 2-D shape, got {other:?}"
            )))
        }
    };

    let data = &bytes[header.data_offset..];
    let expected_len = count * dimension;
    if data.len() != expected_len * 2 {
        return Err(Error::ShapeMismatch(format!(
            "NPY payload has {} bytes, expected {} for shape ({count}, {dimension})",
            data.len(),
            expected_len * 2
        )));
    }

    let rows = data
        .chunks_exact(2)
        .map(|c| f16::from_bits(u16::from_le_bytes([c[0], c[1]])))
        .collect();
    Ok((count, dimension, rows))
}

fn read_npy_unicode_1d(bytes: &[u8]) -> Result<Vec<String>> {
    let header = parse_npy_header(bytes)?;
    let width: usize = header
        .descr
        .strip_prefix("<U")
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::Corrupt(format!("expected a '<U*' dtype, got '{}'", header.descr)))?;
    let count = match header.shape.as_slice() {
        [c] => *c,
        other => {
            return Err(Error::Corrupt(format!(
                "expected a 1-D shape, got {other:?}"
            )))
        }
    };

    let data = &bytes[header.data_offset..];
    let bytes_per_entry = width * 4;
    if data.len() != count * bytes_per_entry {
        return Err(Error::ShapeMismatch(format!(
            "NPY payload has {} bytes, expected {} for {count} strings of width {width}",
            data.len(),
            count * bytes_per_entry
        )));
    }

    let mut out = Vec::with_capacity(count);
    for entry in data.chunks_exact(bytes_per_entry) {
        let mut s = String::with_capacity(width);
        for code_bytes in entry.chunks_exact(4) {
            let code = u32::from_le_bytes([code_bytes[0], code_bytes[1], code_bytes[2], code_bytes[3]]);
            if code == 0 {
                break;
            }
            let c = char::from_u32(code)
                .ok_or_else(|| Error::Corrupt(format!("invalid unicode scalar {code:#x} in doc_ids")))?;
            s.push(c);
        }
        out.push(s);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector_index::{Distance, VectorIndex};

    #[test]
    fn round_trips_through_tempfile() {
        let dir = tempfile::tempdir().unwrap();
        let stem = dir.path().join("myindex");

        let mut idx = VectorIndex::new(3, Distance::Cosine, "fnv1a-3");
        idx.add("a", &[1.0, 0.0, 0.0]).unwrap();
        idx.add("b", &[0.0, 1.0, 0.0]).unwrap();
        idx.add("c", &[0.0, 0.0, 1.0]).unwrap();

        save_index(&stem, &idx).unwrap();
        assert!(npz_path(&stem).exists());
        assert!(json_path(&stem).exists());

        let loaded = load_index(&stem, None).unwrap();
        assert_eq!(loaded.dimension(), 3);
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded.embedder_id(), "fnv1a-3");
        assert_eq!(loaded.distance(), Distance::Cosine);
        assert_eq!(loaded.doc_ids(), idx.doc_ids());
        assert_eq!(loaded.raw_rows(), idx.raw_rows());
    }

    #[test]
    fn round_trips_unicode_doc_ids() {
        let dir = tempfile::tempdir().unwrap();
        let stem = dir.path().join("unicode");

        let mut idx = VectorIndex::new(2, Distance::Dot, "fnv1a-2");
        idx.add("caf\u{e9}-\u{1f600}", &[1.0, 2.0]).unwrap();
        idx.add("short", &[3.0, 4.0]).unwrap();

        save_index(&stem, &idx).unwrap();
        let loaded = load_index(&stem, None).unwrap();
        assert_eq!(loaded.doc_ids(), idx.doc_ids());
    }

    #[test]
    fn missing_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let stem = dir.path().join("absent");
        let err = load_index(&stem, None).unwrap_err();
        assert!(matches!(err, Error::MissingFile(_)));
    }

    #[test]
    fn version_mismatch_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let stem = dir.path().join("versioned");

        let idx = VectorIndex::new(1, Distance::Dot, "fnv1a-1");
        save_index(&stem, &idx).unwrap();

        let mut metadata: serde_json::Value =
            serde_json::from_slice(&fs::read(json_path(&stem)).unwrap()).unwrap();
        metadata["format_version"] = serde_json::json!(99);
        fs::write(json_path(&stem), serde_json::to_vec(&metadata).unwrap()).unwrap();

        let err = load_index(&stem, None).unwrap_err();
        assert!(matches!(err, Error::VersionMismatch(99)));
    }

    #[test]
    fn embedder_mismatch_is_reported_when_requested() {
        let dir = tempfile::tempdir().unwrap();
        let stem = dir.path().join("embedded");

        let idx = VectorIndex::new(2, Distance::Cosine, "fnv1a-2");
        save_index(&stem, &idx).unwrap();

        let err = load_index(&stem, Some("fnv1a-384")).unwrap_err();
        assert!(matches!(
            err,
            Error::EmbedderMismatch { ref expected, ref got }
                if expected == "fnv1a-384" && got == "fnv1a-2"
        ));

        // Unchecked and matching-checked loads both still succeed.
        assert!(load_index(&stem, None).is_ok());
        assert!(load_index(&stem, Some("fnv1a-2")).is_ok());
    }

    #[test]
    fn index_exists_reflects_presence_of_persisted_files() {
        let dir = tempfile::tempdir().unwrap();
        let stem = dir.path().join("maybe");
        assert!(!index_exists(&stem));

        let idx = VectorIndex::new(1, Distance::Dot, "fnv1a-1");
        save_index(&stem, &idx).unwrap();
        assert!(index_exists(&stem));
    }

    #[test]
    fn npy_f16_round_trip() {
        let rows = vec![f16::from_f32(1.5), f16::from_f32(-2.25), f16::from_f32(0.0)];
        let bytes = write_npy_f16_2d(1, 3, &rows);
        let (count, dim, decoded) = read_npy_f16_2d(&bytes).unwrap();
        assert_eq!((count, dim), (1, 3));
        assert_eq!(decoded, rows);
    }

    #[test]
    fn npy_unicode_round_trip() {
        let ids = vec!["a".to_string(), "longer-id".to_string(), "x".to_string()];
        let bytes = write_npy_unicode_1d(&ids);
        let decoded = read_npy_unicode_1d(&bytes).unwrap();
        assert_eq!(decoded, ids);
    }

    #[test]
    fn round_trips_a_thousand_vectors_at_production_dimension() {
        let dir = tempfile::tempdir().unwrap();
        let stem = dir.path().join("bulk");

        const DIMENSION: usize = 384;
        const COUNT: usize = 1000;

        let mut idx = VectorIndex::new(DIMENSION, Distance::Cosine, "fnv1a-384");
        for i in 0..COUNT {
            let mut v = vec![0.0_f32; DIMENSION];
            for (j, slot) in v.iter_mut().enumerate() {
                *slot = ((i * 31 + j * 7) % 101) as f32 - 50.0;
            }
            idx.add(format!("doc-{i:04}"), &v).unwrap();
        }

        save_index(&stem, &idx).unwrap();
        let loaded = load_index(&stem, None).unwrap();

        assert_eq!(loaded.dimension(), DIMENSION);
        assert_eq!(loaded.len(), COUNT);
        assert_eq!(loaded.doc_ids(), idx.doc_ids());
        assert_eq!(loaded.raw_rows(), idx.raw_rows());
    }
}
