//! Binary encoding of index content and crash-safe file writes.
//!
//! Exported index bytes are `[bincode payload][magic][u32 CRC32 BE]`. Documents
//! are written sorted by id, so two engines with the same content export the
//! same bytes. [`write_atomic`] writes through a temp file, fsyncs, and renames,
//! so readers only ever see a complete old or a complete new file.

use crate::document::Document;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;

/// Magic bytes before the CRC32 footer of an exported index.
pub const EXPORT_MAGIC: &[u8; 4] = b"LDX1";

const EXPORT_VERSION: u32 = 1;

#[derive(Serialize)]
struct ExportRef<'a> {
    version: u32,
    documents: Vec<&'a Document>,
}

#[derive(Deserialize)]
struct Export {
    version: u32,
    documents: Vec<Document>,
}

fn invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

/// Appends `[magic][CRC32 BE]` over `payload`.
pub fn seal(mut payload: Vec<u8>, magic: &[u8; 4]) -> Vec<u8> {
    let crc = crc32fast::hash(&payload);
    payload.reserve(8);
    payload.extend_from_slice(magic);
    payload.extend_from_slice(&crc.to_be_bytes());
    payload
}

/// Verifies the footer written by [`seal`] and returns the payload.
pub fn unseal<'a>(raw: &'a [u8], magic: &[u8; 4]) -> io::Result<&'a [u8]> {
    if raw.len() < 8 || &raw[raw.len() - 8..raw.len() - 4] != magic {
        return Err(invalid("missing checksum footer"));
    }
    let (payload, footer) = raw.split_at(raw.len() - 8);
    let stored = u32::from_be_bytes([footer[4], footer[5], footer[6], footer[7]]);
    let computed = crc32fast::hash(payload);
    if stored != computed {
        return Err(invalid(format!(
            "CRC32 mismatch: expected {stored:#010x}, got {computed:#010x}"
        )));
    }
    Ok(payload)
}

/// Encodes documents, which must already be sorted by id.
pub fn encode_documents<'a>(documents: impl IntoIterator<Item = &'a Document>) -> io::Result<Vec<u8>> {
    let export = ExportRef {
        version: EXPORT_VERSION,
        documents: documents.into_iter().collect(),
    };
    let bytes = bincode::serialize(&export).map_err(|e| io::Error::other(e.to_string()))?;
    Ok(seal(bytes, EXPORT_MAGIC))
}

/// Decodes and checks bytes produced by [`encode_documents`].
///
/// Rejects bad checksums, unknown versions, unsorted or duplicate ids, and
/// documents that fail validation.
pub fn decode_documents(raw: &[u8]) -> io::Result<Vec<Document>> {
    let payload = unseal(raw, EXPORT_MAGIC)?;
    let export: Export = bincode::deserialize(payload).map_err(|e| invalid(e.to_string()))?;
    if export.version != EXPORT_VERSION {
        return Err(invalid(format!("unsupported export version {}", export.version)));
    }
    for pair in export.documents.windows(2) {
        if pair[0].id >= pair[1].id {
            return Err(invalid(format!(
                "documents out of order at '{}'",
                pair[1].id
            )));
        }
    }
    for doc in &export.documents {
        doc.validate().map_err(|e| invalid(e.to_string()))?;
    }
    Ok(export.documents)
}

/// Writes `bytes` to `path` atomically: temp file, fsync, rename, directory fsync.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no parent"))?;
    fs::create_dir_all(dir)?;
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = Path::new(&tmp_name);

    {
        let mut file = File::create(tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(tmp_path, fs::Permissions::from_mode(0o600))?;
    }
    fs::rename(tmp_path, path)?;
    #[cfg(unix)]
    {
        if let Ok(d) = File::open(dir) {
            let _ = d.sync_all();
        }
    }
    Ok(())
}
