//! Purpose: Location-directory defaults and `name@mapset` map reference parsing.
//! Exports: `default_location_dir`, `parse_map_ref`, `search_path`, `MapRefError`.
//! Role: Keep CLI map-name semantics in one place.
//! Invariants: Default location is `$CELLMAP_LOCATION`, else `~/.cellmap/location`.
//! Invariants: Map and mapset names never contain path separators or start with `.`.

use std::path::PathBuf;

pub(crate) const PERMANENT: &str = "PERMANENT";

#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum MapRefError {
    Empty,
    IllegalName(String),
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct MapRef {
    pub name: String,
    pub mapset: Option<String>,
}

pub(crate) fn default_location_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os("CELLMAP_LOCATION") {
        return PathBuf::from(dir);
    }
    let home = std::env::var_os("HOME").unwrap_or_default();
    PathBuf::from(home).join(".cellmap").join("location")
}

pub(crate) fn parse_map_ref(input: &str) -> Result<MapRef, MapRefError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(MapRefError::Empty);
    }
    let (name, mapset) = match input.split_once('@') {
        Some((name, mapset)) => (name, Some(mapset)),
        None => (input, None),
    };
    check_legal(name)?;
    if let Some(mapset) = mapset {
        check_legal(mapset)?;
    }
    Ok(MapRef {
        name: name.to_string(),
        mapset: mapset.map(str::to_string),
    })
}

pub(crate) fn check_legal(name: &str) -> Result<(), MapRefError> {
    let illegal = name.is_empty()
        || name.starts_with('.')
        || name
            .chars()
            .any(|c| c.is_whitespace() || c.is_control() || "/\"'@,=*\\".contains(c));
    if illegal {
        return Err(MapRefError::IllegalName(name.to_string()));
    }
    Ok(())
}

/// Mapsets searched for unqualified names: the current mapset, then PERMANENT.
pub(crate) fn search_path(current: &str) -> Vec<String> {
    let mut path = vec![current.to_string()];
    if current != PERMANENT {
        path.push(PERMANENT.to_string());
    }
    path
}
