//! Archive sniffing and normalization to tar.

use dockyard_core::{Error, Result};
use flate2::read::GzDecoder;
use std::io::{Cursor, Read};
use std::time::{SystemTime, UNIX_EPOCH};
use tar::{EntryType, Header};
use zip::ZipArchive;

const TAR_MAGIC: &[u8] = b"ustar";
const TAR_MAGIC_OFFSET: usize = 257;

/// Archive formats accepted for upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Tar,
    Gzip,
    Zip,
}

impl ArchiveKind {
    /// Classify a buffer by its magic bytes. The declared file name is never trusted.
    pub fn sniff(buffer: &[u8]) -> Result<Self> {
        if buffer.is_empty() {
            return Err(Error::BadInput("archive is empty".to_string()));
        }
        if buffer.starts_with(b"PK\x03\x04") || buffer.starts_with(b"PK\x05\x06") {
            return Ok(ArchiveKind::Zip);
        }
        if buffer.starts_with(&[0x1f, 0x8b]) {
            return Ok(ArchiveKind::Gzip);
        }
        let magic_end = TAR_MAGIC_OFFSET + TAR_MAGIC.len();
        if buffer.len() >= magic_end && &buffer[TAR_MAGIC_OFFSET..magic_end] == TAR_MAGIC {
            return Ok(ArchiveKind::Tar);
        }
        Err(Error::BadInput(
            "unsupported archive type, expected tar, gzip or zip".to_string(),
        ))
    }
}

/// Convert a zip, gzip or tar buffer into an uncompressed tar stream.
pub fn normalize(buffer: &[u8]) -> Result<Vec<u8>> {
    let tar = match ArchiveKind::sniff(buffer)? {
        ArchiveKind::Zip => zip_to_tar(buffer)?,
        ArchiveKind::Gzip => gunzip_tar(buffer)?,
        ArchiveKind::Tar => buffer.to_vec(),
    };
    validate_tar(&tar)?;
    Ok(tar)
}

fn zip_to_tar(buffer: &[u8]) -> Result<Vec<u8>> {
    let mut zip = ZipArchive::new(Cursor::new(buffer)).map_err(bad_zip)?;
    // zip entries carry no usable ownership, so entries belong to this process
    let (uid, gid) = process_owner();
    let mtime = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    let mut builder = tar::Builder::new(Vec::new());
    for index in 0..zip.len() {
        let mut file = zip.by_index(index).map_err(bad_zip)?;
        let path = file.enclosed_name().ok_or_else(|| {
            Error::BadInput(format!("zip entry '{}' escapes the archive root", file.name()))
        })?;

        let mut header = Header::new_gnu();
        header.set_uid(uid);
        header.set_gid(gid);
        header.set_mtime(mtime);

        if file.is_dir() {
            header.set_entry_type(EntryType::Directory);
            header.set_mode(file.unix_mode().map(|m| m & 0o7777).unwrap_or(0o755));
            header.set_size(0);
            builder
                .append_data(&mut header, &path, std::io::empty())
                .map_err(bad_zip_entry)?;
        } else {
            // declared sizes come from the submitter, so the buffer grows as data arrives
            let mut data = Vec::new();
            file.read_to_end(&mut data).map_err(bad_zip_entry)?;
            header.set_entry_type(EntryType::Regular);
            header.set_mode(file.unix_mode().map(|m| m & 0o7777).unwrap_or(0o644));
            header.set_size(data.len() as u64);
            builder
                .append_data(&mut header, &path, data.as_slice())
                .map_err(bad_zip_entry)?;
        }
    }

    builder.into_inner().map_err(bad_zip_entry)
}

fn gunzip_tar(buffer: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(buffer);
    let mut tar = Vec::new();
    decoder
        .read_to_end(&mut tar)
        .map_err(|e| Error::BadInput(format!("corrupt gzip archive: {}", e)))?;

    if ArchiveKind::sniff(&tar).ok() != Some(ArchiveKind::Tar) {
        return Err(Error::BadInput(
            "gzip archive does not contain a tar stream".to_string(),
        ));
    }
    Ok(tar)
}

/// Walk every header so truncated or garbled archives are rejected up front.
fn validate_tar(tar: &[u8]) -> Result<()> {
    let mut archive = tar::Archive::new(Cursor::new(tar));
    let entries = archive.entries().map_err(bad_tar)?;
    for entry in entries {
        entry.map_err(bad_tar)?;
    }
    Ok(())
}

#[cfg(unix)]
fn process_owner() -> (u64, u64) {
    // SAFETY: geteuid and getegid are always successful and touch no memory.
    unsafe { (libc::geteuid() as u64, libc::getegid() as u64) }
}

#[cfg(not(unix))]
fn process_owner() -> (u64, u64) {
    (0, 0)
}

fn bad_zip(e: zip::result::ZipError) -> Error {
    Error::BadInput(format!("corrupt zip archive: {}", e))
}

fn bad_zip_entry(e: std::io::Error) -> Error {
    Error::BadInput(format!("failed to repack zip entry: {}", e))
}

fn bad_tar(e: std::io::Error) -> Error {
    Error::BadInput(format!("corrupt tar archive: {}", e))
}

#[cfg(test)]
pub(crate) mod fixtures {
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;
    use tar::{EntryType, Header};
    use zip::write::SimpleFileOptions;

    /// (path, contents); `None` marks a directory.
    pub const TREE: &[(&str, Option<&[u8]>)] = &[
        ("src", None),
        ("src/main.py", Some(b"print('hello')\n")),
        ("README.md", Some(b"# bot\n")),
        ("assets", None),
        ("assets/data.bin", Some(&[0, 1, 2, 3, 255])),
    ];

    pub fn tar_bytes() -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (path, contents) in TREE {
            let mut header = Header::new_gnu();
            match contents {
                None => {
                    header.set_entry_type(EntryType::Directory);
                    header.set_mode(0o755);
                    header.set_size(0);
                    builder.append_data(&mut header, path, std::io::empty()).unwrap();
                }
                Some(data) => {
                    header.set_entry_type(EntryType::Regular);
                    header.set_mode(0o644);
                    header.set_size(data.len() as u64);
                    builder.append_data(&mut header, path, *data).unwrap();
                }
            }
        }
        builder.into_inner().unwrap()
    }

    pub fn gzip_bytes() -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&tar_bytes()).unwrap();
        encoder.finish().unwrap()
    }

    pub fn zip_bytes() -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        for (path, contents) in TREE {
            match contents {
                None => writer.add_directory(format!("{}/", path), options).unwrap(),
                Some(data) => {
                    writer.start_file(*path, options).unwrap();
                    writer.write_all(data).unwrap();
                }
            }
        }
        writer.finish().unwrap().into_inner()
    }
}
