//! Parsing of the fetch tool's track listing output.

use serde::{Deserialize, Serialize};

use super::FetchError;

/// One entry of a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackEntry {
    /// 1-based position as printed by the tool.
    pub index: u32,
    pub title: String,
}

/// Collection metadata shown to the user before a selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackListing {
    pub title: String,
    pub artist: String,
    pub tracks: Vec<TrackEntry>,
}

const UNKNOWN: &str = "Unknown";

fn is_separator(line: &str) -> bool {
    line.starts_with('+') && line.chars().all(|c| matches!(c, '+' | '-' | '='))
}

fn key_value<'a>(line: &'a str, keys: &[&str]) -> Option<&'a str> {
    let (key, value) = line.split_once(':')?;
    let key = key.trim();
    keys.iter()
        .any(|k| key.eq_ignore_ascii_case(k))
        .then(|| value.trim())
}

/// Parse the info-mode output.
///
/// Lines before the first table separator carry the collection title and
/// artist, either bare (title first) or as `Album: ...` / `Artist: ...`.
/// Table rows look like `| 3 | Song name | ... |`; rows whose first cell is
/// not a number (column headers) are ignored.
pub fn parse_track_listing(output: &str) -> Result<TrackListing, FetchError> {
    let mut title: Option<String> = None;
    let mut artist: Option<String> = None;
    let mut tracks = Vec::new();
    let mut in_table = false;

    for raw in output.lines() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }

        if is_separator(line) {
            in_table = true;
            continue;
        }

        if line.starts_with('|') {
            let cells: Vec<&str> = line
                .trim_matches('|')
                .split('|')
                .map(str::trim)
                .collect();
            if cells.len() < 2 {
                continue;
            }
            if let Ok(index) = cells[0].parse::<u32>() {
                tracks.push(TrackEntry {
                    index,
                    title: cells[1].to_string(),
                });
            }
            continue;
        }

        if in_table {
            continue;
        }

        if let Some(value) = key_value(line, &["album", "title"]) {
            title = Some(value.to_string());
        } else if let Some(value) = key_value(line, &["artist"]) {
            artist = Some(value.to_string());
        } else if title.is_none() {
            title = Some(line.to_string());
        } else if artist.is_none() {
            artist = Some(line.to_string());
        }
    }

    if tracks.is_empty() {
        return Err(FetchError::parse_error("no tracks found in listing"));
    }

    Ok(TrackListing {
        title: title.unwrap_or_else(|| UNKNOWN.to_string()),
        artist: artist.unwrap_or_else(|| UNKNOWN.to_string()),
        tracks,
    })
}
