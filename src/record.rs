//! Mapping a verified info dictionary to the record the crawler emits.

use crate::bencode::Value;
use crate::info_hash::InfoHash;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("info is not a dictionary")]
    NotADictionary,

    #[error("missing or invalid name")]
    MissingName,

    /// Neither `length` nor `files` is present.
    #[error("missing length and files")]
    MissingLayout,

    #[error("invalid file entry: {0}")]
    InvalidFile(String),
}

/// One file of a multi-file torrent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileEntry {
    pub path: Vec<String>,
    pub length: u64,
}

/// What the crawler learned about one torrent.
///
/// Single-file torrents carry `length` and no files; multi-file torrents
/// carry a non-empty `files` list and no `length`. Serializes as
///
/// ```json
/// {"infohash":"<40 hex>","name":"a.txt","length":100}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TorrentRecord {
    #[serde(rename = "infohash")]
    pub info_hash: InfoHash,
    pub name: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<FileEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub length: Option<u64>,
}

impl TorrentRecord {
    pub fn from_metadata(info_hash: InfoHash, info: &Value) -> Result<Self, RecordError> {
        if info.as_dict().is_none() {
            return Err(RecordError::NotADictionary);
        }

        let name = preferred_text(info, b"name.utf-8", b"name").ok_or(RecordError::MissingName)?;

        if let Some(files) = info.get(b"files") {
            let files = parse_files(files)?;
            return Ok(Self {
                info_hash,
                name,
                files,
                length: None,
            });
        }

        match info.get(b"length") {
            Some(length) => {
                let length = length
                    .as_integer()
                    .and_then(|l| u64::try_from(l).ok())
                    .ok_or(RecordError::MissingLayout)?;
                Ok(Self {
                    info_hash,
                    name,
                    files: Vec::new(),
                    length: Some(length),
                })
            }
            None => Err(RecordError::MissingLayout),
        }
    }

    /// Sum of the file lengths, or the single-file length.
    pub fn total_length(&self) -> u64 {
        match self.length {
            Some(length) => length,
            None => self.files.iter().map(|f| f.length).sum(),
        }
    }
}

fn parse_files(value: &Value) -> Result<Vec<FileEntry>, RecordError> {
    let list = value
        .as_list()
        .ok_or_else(|| RecordError::InvalidFile("files is not a list".into()))?;

    if list.is_empty() {
        return Err(RecordError::InvalidFile("files is empty".into()));
    }

    list.iter()
        .enumerate()
        .map(|(i, entry)| {
            parse_file(entry).ok_or_else(|| RecordError::InvalidFile(format!("entry {}", i)))
        })
        .collect()
}

fn parse_file(entry: &Value) -> Option<FileEntry> {
    entry.as_dict()?;

    let length = u64::try_from(entry.get(b"length")?.as_integer()?).ok()?;

    let path = entry
        .get(b"path.utf-8")
        .and_then(utf8_path)
        .or_else(|| lossy_path(entry.get(b"path")?))?;

    Some(FileEntry { path, length })
}

fn utf8_path(value: &Value) -> Option<Vec<String>> {
    let parts = value.as_list()?;
    let path: Vec<String> = parts
        .iter()
        .map(|p| p.as_str().map(String::from))
        .collect::<Option<_>>()?;
    (!path.is_empty()).then_some(path)
}

fn lossy_path(value: &Value) -> Option<Vec<String>> {
    let parts = value.as_list()?;
    let path: Vec<String> = parts
        .iter()
        .map(|p| p.as_bytes().map(|b| String::from_utf8_lossy(b).into_owned()))
        .collect::<Option<_>>()?;
    (!path.is_empty()).then_some(path)
}

/// `preferred` when it is valid UTF-8, else `fallback` decoded lossily.
fn preferred_text(info: &Value, preferred: &[u8], fallback: &[u8]) -> Option<String> {
    let fallback = info.get(fallback)?.as_bytes()?;
    let text = info
        .get(preferred)
        .and_then(|v| v.as_str())
        .map(String::from)
        .unwrap_or_else(|| String::from_utf8_lossy(fallback).into_owned());
    Some(text)
}
