//! File binding: read-only mapping, encoding detection, atomic save.
//!
//! Opening a file maps it read-only and inspects the head for a byte-order
//! mark. Plain UTF-8 content is edited directly out of the mapping (no copy);
//! UTF-16 and latin-1 content is converted into an owned UTF-8 buffer first so
//! the mapping could be released. Saving streams the piece sequence to
//! `<path>.tmp` and renames it over the target, so a crash mid-save never
//! corrupts the original file.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::storage::{OriginalSource, PieceTable};

/// UTF-8 byte-order mark.
const BOM_UTF8: [u8; 3] = [0xEF, 0xBB, 0xBF];
/// UTF-16 little-endian byte-order mark.
const BOM_UTF16_LE: [u8; 2] = [0xFF, 0xFE];
/// UTF-16 big-endian byte-order mark.
const BOM_UTF16_BE: [u8; 2] = [0xFE, 0xFF];

/// Detected source encoding of an opened file.
///
/// Detection is BOM-based. Files without a BOM are treated as UTF-8 when they
/// validate, and as latin-1 otherwise; a BOM-less multibyte encoding will be
/// reinterpreted as latin-1 and written back as UTF-8 on save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// UTF-8 without a byte-order mark.
    Utf8,
    /// UTF-8 with a byte-order mark (re-emitted on save).
    Utf8Bom,
    /// UTF-16 little-endian (converted to UTF-8 on open, saved as UTF-8).
    Utf16Le,
    /// UTF-16 big-endian (converted to UTF-8 on open, saved as UTF-8).
    Utf16Be,
    /// Single-byte latin-1 fallback (converted to UTF-8 on open).
    Latin1,
}

impl Encoding {
    /// Short human-readable label for status displays.
    pub fn label(self) -> &'static str {
        match self {
            Self::Utf8 => "UTF-8",
            Self::Utf8Bom => "UTF-8 BOM",
            Self::Utf16Le => "UTF-16 LE",
            Self::Utf16Be => "UTF-16 BE",
            Self::Latin1 => "Latin-1",
        }
    }
}

/// Errors surfaced by the file binding. Every other core operation is total;
/// opening and saving are the only fallible paths.
#[derive(Debug, thiserror::Error)]
pub enum FileError {
    /// The file could not be opened or mapped.
    #[error("failed to open {}: {source}", path.display())]
    OpenFailed {
        /// The path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// The temporary save file could not be created.
    #[error("failed to create temporary file {}: {source}", path.display())]
    TempCreateFailed {
        /// The temporary path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Writing the document to the temporary file failed.
    #[error("failed to write {}: {source}", path.display())]
    WriteFailed {
        /// The temporary path being written.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Renaming the temporary file over the target failed.
    #[error("failed to replace {}: {source}", path.display())]
    RenameFailed {
        /// The target path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

/// A read-only memory mapping of a file.
///
/// The `File` handle is kept alive for the lifetime of the mapping and only
/// immutable byte access is exposed. A zero-length file carries no mapping at
/// all (mapping an empty file is not portable).
#[derive(Debug)]
pub struct MappedFile {
    _file: File,
    map: Option<memmap2::Mmap>,
}

impl MappedFile {
    /// Map `path` read-only.
    pub fn open(path: &Path) -> std::io::Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();

        let map = if len == 0 {
            None
        } else {
            // SAFETY: the file is opened read-only, the handle lives as long
            // as the mapping, and callers only ever see an immutable slice.
            Some(unsafe { memmap2::Mmap::map(&file)? })
        };

        Ok(Self { _file: file, map })
    }

    /// The mapped bytes (empty for a zero-length file).
    pub fn as_bytes(&self) -> &[u8] {
        self.map.as_deref().unwrap_or(&[])
    }

    /// Length of the mapped region in bytes.
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    /// Whether the mapped region is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Detect the encoding of raw file bytes by BOM, falling back to UTF-8
/// validation and then latin-1.
pub fn detect_encoding(bytes: &[u8]) -> Encoding {
    if bytes.starts_with(&BOM_UTF8) {
        Encoding::Utf8Bom
    } else if bytes.starts_with(&BOM_UTF16_LE) {
        Encoding::Utf16Le
    } else if bytes.starts_with(&BOM_UTF16_BE) {
        Encoding::Utf16Be
    } else if std::str::from_utf8(bytes).is_ok() {
        Encoding::Utf8
    } else {
        Encoding::Latin1
    }
}

/// Open `path`, detect its encoding, and produce the original-text source for
/// a piece table.
///
/// UTF-8 content (with or without BOM) is served straight from the mapping;
/// everything else is decoded into an owned UTF-8 buffer.
pub fn open_document(path: &Path) -> Result<(OriginalSource, Encoding), FileError> {
    let mapped = MappedFile::open(path).map_err(|source| FileError::OpenFailed {
        path: path.to_path_buf(),
        source,
    })?;

    let bytes = mapped.as_bytes();
    let encoding = detect_encoding(bytes);
    log::debug!(
        "opened {} ({} bytes, {})",
        path.display(),
        bytes.len(),
        encoding.label()
    );

    let source = match encoding {
        Encoding::Utf8 => OriginalSource::mapped(mapped, 0),
        Encoding::Utf8Bom => OriginalSource::mapped(mapped, BOM_UTF8.len()),
        Encoding::Utf16Le => OriginalSource::owned(decode_utf16_bytes(&bytes[2..], true)),
        Encoding::Utf16Be => OriginalSource::owned(decode_utf16_bytes(&bytes[2..], false)),
        Encoding::Latin1 => OriginalSource::owned(decode_latin1(bytes)),
    };

    Ok((source, encoding))
}

fn decode_utf16_bytes(bytes: &[u8], little_endian: bool) -> Vec<u8> {
    let units = bytes.chunks_exact(2).map(|pair| {
        if little_endian {
            u16::from_le_bytes([pair[0], pair[1]])
        } else {
            u16::from_be_bytes([pair[0], pair[1]])
        }
    });

    let mut out = String::with_capacity(bytes.len() / 2);
    for ch in char::decode_utf16(units) {
        out.push(ch.unwrap_or(char::REPLACEMENT_CHARACTER));
    }
    // A trailing odd byte cannot form a code unit and is dropped.
    out.into_bytes()
}

fn decode_latin1(bytes: &[u8]) -> Vec<u8> {
    let mut out = String::with_capacity(bytes.len());
    for &b in bytes {
        out.push(b as char);
    }
    out.into_bytes()
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(".tmp");
    PathBuf::from(os)
}

/// Write the full document to `<path>.tmp`, then atomically rename it over
/// `path`. The temporary file is removed on every failure path.
///
/// The document is written as UTF-8; a UTF-8 BOM is re-emitted when the file
/// was opened with one. UTF-16 and latin-1 sources are rewritten as UTF-8.
pub fn save_document(path: &Path, table: &PieceTable, encoding: Encoding) -> Result<(), FileError> {
    let temp = temp_path_for(path);

    let mut file = File::create(&temp).map_err(|source| FileError::TempCreateFailed {
        path: temp.clone(),
        source,
    })?;

    let write_result = (|| {
        if encoding == Encoding::Utf8Bom {
            file.write_all(&BOM_UTF8)?;
        }
        // Stream pieces directly so a gigabyte document is never materialized.
        for piece in table.pieces() {
            file.write_all(table.piece_bytes(piece))?;
        }
        file.sync_all()
    })();

    drop(file);

    if let Err(source) = write_result {
        let _ = fs::remove_file(&temp);
        return Err(FileError::WriteFailed { path: temp, source });
    }

    if let Err(rename_err) = fs::rename(&temp, path) {
        // Cross-volume fallback: copy the finished temp file, then drop it.
        match fs::copy(&temp, path) {
            Ok(_) => {
                let _ = fs::remove_file(&temp);
            }
            Err(_) => {
                let _ = fs::remove_file(&temp);
                log::warn!("save of {} failed during rename: {rename_err}", path.display());
                return Err(FileError::RenameFailed {
                    path: path.to_path_buf(),
                    source: rename_err,
                });
            }
        }
    }

    log::debug!("saved {} ({} bytes)", path.display(), table.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_utf8() {
        assert_eq!(detect_encoding(b"plain ascii"), Encoding::Utf8);
        assert_eq!(detect_encoding("héllo".as_bytes()), Encoding::Utf8);
        assert_eq!(detect_encoding(b""), Encoding::Utf8);
    }

    #[test]
    fn test_detect_boms() {
        assert_eq!(detect_encoding(&[0xEF, 0xBB, 0xBF, b'a']), Encoding::Utf8Bom);
        assert_eq!(detect_encoding(&[0xFF, 0xFE, b'a', 0]), Encoding::Utf16Le);
        assert_eq!(detect_encoding(&[0xFE, 0xFF, 0, b'a']), Encoding::Utf16Be);
    }

    #[test]
    fn test_detect_latin1_fallback() {
        // 0xE9 alone is not valid UTF-8.
        assert_eq!(detect_encoding(&[b'c', b'a', b'f', 0xE9]), Encoding::Latin1);
    }

    #[test]
    fn test_decode_utf16_le() {
        // "ab" in UTF-16LE.
        let decoded = decode_utf16_bytes(&[0x61, 0x00, 0x62, 0x00], true);
        assert_eq!(decoded, b"ab");
    }

    #[test]
    fn test_decode_utf16_be_surrogate_pair() {
        // U+1F600 as a BE surrogate pair.
        let decoded = decode_utf16_bytes(&[0xD8, 0x3D, 0xDE, 0x00], false);
        assert_eq!(String::from_utf8(decoded).unwrap(), "\u{1F600}");
    }

    #[test]
    fn test_decode_latin1() {
        let decoded = decode_latin1(&[b'c', b'a', b'f', 0xE9]);
        assert_eq!(String::from_utf8(decoded).unwrap(), "café");
    }

    #[test]
    fn test_temp_path_appends_suffix() {
        let temp = temp_path_for(Path::new("/tmp/notes.txt"));
        assert_eq!(temp, Path::new("/tmp/notes.txt.tmp"));
    }
}
