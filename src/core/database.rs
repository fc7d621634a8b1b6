// File-backed raster store over a location directory of mapsets.
//
// Layout: <location>/<mapset>/{cell,cellhd,colr,cats}/<name>
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use libc::{EACCES, EPERM};

use crate::core::colors::ColorTable;
use crate::core::error::{Error, ErrorKind};
use crate::core::store::RasterStore;

const CELL_DIR: &str = "cell";
const CELLHD_DIR: &str = "cellhd";
const COLR_DIR: &str = "colr";
const CATS_DIR: &str = "cats";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CellHeader {
    pub rows: u32,
    pub cols: u32,
    pub format: Option<i32>,
    pub compressed: Option<bool>,
}

impl CellHeader {
    pub fn parse(text: &str) -> Result<Self, Error> {
        let mut rows = None;
        let mut cols = None;
        let mut format = None;
        let mut compressed = None;

        for line in text.lines() {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();
            match key.trim() {
                "rows" => rows = Some(parse_dimension(value, "rows")?),
                "cols" => cols = Some(parse_dimension(value, "cols")?),
                "format" => {
                    format = Some(value.parse::<i32>().map_err(|_| {
                        Error::new(ErrorKind::Corrupt).with_message("invalid format in cell header")
                    })?)
                }
                "compressed" => compressed = Some(value != "0"),
                _ => {}
            }
        }

        match (rows, cols) {
            (Some(rows), Some(cols)) => Ok(Self {
                rows,
                cols,
                format,
                compressed,
            }),
            _ => Err(Error::new(ErrorKind::Corrupt)
                .with_message("cell header is missing rows or cols")),
        }
    }
}

fn parse_dimension(value: &str, field: &str) -> Result<u32, Error> {
    match value.parse::<u32>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(Error::new(ErrorKind::Corrupt)
            .with_message(format!("invalid {field} in cell header"))),
    }
}

/// Raster data file opened for reading under a shared advisory lock.
#[derive(Debug)]
pub struct CellFile {
    path: PathBuf,
    file: File,
    header: CellHeader,
}

impl CellFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> CellHeader {
        self.header
    }

    pub fn data_len(&self) -> Result<u64, Error> {
        self.file
            .metadata()
            .map(|meta| meta.len())
            .map_err(|err| Error::new(io_error_kind(&err)).with_path(&self.path).with_source(err))
    }
}

#[derive(Clone, Debug)]
pub struct Location {
    root: PathBuf,
}

impl Location {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let root = path.as_ref().to_path_buf();
        let meta = fs::metadata(&root).map_err(|err| {
            Error::new(io_error_kind(&err))
                .with_message("location directory not found")
                .with_path(&root)
                .with_hint("Pass --location or set CELLMAP_LOCATION.")
                .with_source(err)
        })?;
        if !meta.is_dir() {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("location is not a directory")
                .with_path(&root));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Mapset directory names, sorted.
    pub fn mapsets(&self) -> Result<Vec<String>, Error> {
        let entries = fs::read_dir(&self.root).map_err(|err| {
            Error::new(io_error_kind(&err))
                .with_path(&self.root)
                .with_source(err)
        })?;
        let mut mapsets = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| {
                Error::new(ErrorKind::Io)
                    .with_path(&self.root)
                    .with_source(err)
            })?;
            let is_dir = entry.file_type().map(|ty| ty.is_dir()).unwrap_or(false);
            if !is_dir {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if !name.starts_with('.') {
                    mapsets.push(name.to_string());
                }
            }
        }
        mapsets.sort();
        Ok(mapsets)
    }

    /// First mapset in `search_path` holding a raster called `name`.
    pub fn find_mapset<'a>(&self, name: &str, search_path: &'a [String]) -> Option<&'a str> {
        search_path
            .iter()
            .find(|mapset| {
                self.element_path(mapset, CELL_DIR, name)
                    .map(|path| path.is_file())
                    .unwrap_or(false)
            })
            .map(String::as_str)
    }

    fn element_path(&self, mapset: &str, element: &str, name: &str) -> Result<PathBuf, Error> {
        for part in [mapset, name] {
            if part.is_empty() || part.starts_with('.') || part.contains(['/', '\\']) {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message(format!("illegal map or mapset name: {part:?}")));
            }
        }
        Ok(self.root.join(mapset).join(element).join(name))
    }

    fn read_element(
        &self,
        mapset: &str,
        element: &str,
        name: &str,
    ) -> Result<(PathBuf, String), Error> {
        let path = self.element_path(mapset, element, name)?;
        let text = fs::read_to_string(&path)
            .map_err(|err| Error::new(io_error_kind(&err)).with_path(&path).with_source(err))?;
        Ok((path, text))
    }
}

impl RasterStore for Location {
    type Handle = CellFile;

    fn open_raster(&self, name: &str, mapset: &str) -> Result<CellFile, Error> {
        let (header_path, header_text) = self.read_element(mapset, CELLHD_DIR, name)?;
        let header = CellHeader::parse(&header_text).map_err(|err| err.with_path(&header_path))?;

        let path = self.element_path(mapset, CELL_DIR, name)?;
        let file = File::open(&path)
            .map_err(|err| Error::new(io_error_kind(&err)).with_path(&path).with_source(err))?;
        FileExt::try_lock_shared(&file).map_err(|err| {
            Error::new(lock_error_kind(&err))
                .with_path(&path)
                .with_source(err)
        })?;
        tracing::debug!(
            path = %path.display(),
            rows = header.rows,
            cols = header.cols,
            "cell file opened"
        );

        Ok(CellFile { path, file, header })
    }

    fn close_raster(&self, handle: CellFile) {
        let _ = FileExt::unlock(&handle.file);
        tracing::debug!(path = %handle.path.display(), "cell file closed");
    }

    fn read_colors(&self, name: &str, mapset: &str) -> Result<ColorTable, Error> {
        let (path, text) = self.read_element(mapset, COLR_DIR, name)?;
        ColorTable::parse(&text).map_err(|err| err.with_path(path))
    }

    // Line 1 of the cats file is the category count; line 2 is the title.
    fn cell_title(&self, name: &str, mapset: &str) -> String {
        match self.read_element(mapset, CATS_DIR, name) {
            Ok((_, text)) => text.lines().nth(1).unwrap_or_default().to_string(),
            Err(_) => String::new(),
        }
    }
}

fn io_error_kind(err: &io::Error) -> ErrorKind {
    match err.kind() {
        io::ErrorKind::NotFound => ErrorKind::NotFound,
        io::ErrorKind::PermissionDenied => ErrorKind::Permission,
        _ => ErrorKind::Io,
    }
}

fn lock_error_kind(err: &io::Error) -> ErrorKind {
    let errno = err.raw_os_error().unwrap_or_default();
    if errno == EACCES || errno == EPERM {
        return ErrorKind::Permission;
    }
    match err.kind() {
        io::ErrorKind::WouldBlock => ErrorKind::Busy,
        io::ErrorKind::PermissionDenied => ErrorKind::Permission,
        _ => ErrorKind::Io,
    }
}

#[cfg(test)]
mod tests {
    use super::{CellHeader, Location};
    use crate::core::error::ErrorKind;
    use crate::core::store::RasterStore;
    use fs2::FileExt;
    use std::fs;
    use std::path::Path;

    const CELLHD: &str = "proj: 0\nzone: 0\nnorth: 10\nsouth: 0\n\
                          rows: 10\ncols: 20\nformat: 1\ncompressed: 0\n";

    fn write(root: &Path, mapset: &str, element: &str, name: &str, text: &str) {
        let dir = root.join(mapset).join(element);
        fs::create_dir_all(&dir).expect("mkdir");
        fs::write(dir.join(name), text).expect("write");
    }

    fn raster(root: &Path, mapset: &str, name: &str) {
        write(root, mapset, "cellhd", name, CELLHD);
        write(root, mapset, "cell", name, "\0\0\0\0");
        write(root, mapset, "colr", name, "% 0 255\n0:0 255:255\n");
    }

    #[test]
    fn opens_raster_and_reads_header() {
        let dir = tempfile::tempdir().expect("tempdir");
        raster(dir.path(), "PERMANENT", "elevation");
        let location = Location::open(dir.path()).expect("open location");

        let cell = location.open_raster("elevation", "PERMANENT").expect("open");
        assert_eq!(cell.header().rows, 10);
        assert_eq!(cell.header().cols, 20);
        assert_eq!(cell.header().format, Some(1));
        assert_eq!(cell.header().compressed, Some(false));
        assert_eq!(cell.data_len().expect("len"), 4);
        location.close_raster(cell);

        let colors = location.read_colors("elevation", "PERMANENT").expect("colors");
        assert_eq!(colors.int_range(), (0, 255));
    }

    #[test]
    fn missing_location_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = Location::open(dir.path().join("nope")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(err.hint().is_some());
    }

    #[test]
    fn missing_pieces_map_to_error_kinds() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "PERMANENT", "cell", "nohdr", "");
        write(dir.path(), "PERMANENT", "cellhd", "badhdr", "rows: 0\ncols: 5\n");
        write(dir.path(), "PERMANENT", "colr", "badcolr", "0:0:0\n");
        let location = Location::open(dir.path()).expect("open location");

        let err = location.open_raster("nohdr", "PERMANENT").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = location.open_raster("badhdr", "PERMANENT").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Corrupt);
        assert!(err.path().unwrap().ends_with("cellhd/badhdr"));

        let err = location.read_colors("badcolr", "PERMANENT").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Corrupt);

        let err = location.read_colors("ghost", "PERMANENT").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = location.read_colors("../escape", "PERMANENT").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn exclusive_lock_makes_open_busy() {
        let dir = tempfile::tempdir().expect("tempdir");
        raster(dir.path(), "PERMANENT", "elevation");
        let location = Location::open(dir.path()).expect("open location");

        let holder = fs::File::open(dir.path().join("PERMANENT/cell/elevation")).expect("file");
        FileExt::lock_exclusive(&holder).expect("lock");
        let err = location.open_raster("elevation", "PERMANENT").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Busy);

        FileExt::unlock(&holder).expect("unlock");
        let cell = location.open_raster("elevation", "PERMANENT").expect("open");
        location.close_raster(cell);
    }

    #[test]
    fn title_comes_from_second_cats_line() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cats = "# 5 categories\n  Elevation Model  \n";
        write(dir.path(), "PERMANENT", "cats", "elevation", cats);
        write(dir.path(), "PERMANENT", "cats", "short", "# 0 categories\n");
        let location = Location::open(dir.path()).expect("open location");

        assert_eq!(location.cell_title("elevation", "PERMANENT"), "  Elevation Model  ");
        assert_eq!(location.cell_title("short", "PERMANENT"), "");
        assert_eq!(location.cell_title("ghost", "PERMANENT"), "");
    }

    #[test]
    fn mapsets_and_search_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        raster(dir.path(), "PERMANENT", "elevation");
        raster(dir.path(), "user1", "soils");
        raster(dir.path(), "user1", "elevation");
        fs::write(dir.path().join("DEFAULT_WIND"), "").expect("write");
        let location = Location::open(dir.path()).expect("open location");

        assert_eq!(location.mapsets().expect("mapsets"), vec!["PERMANENT", "user1"]);

        let search = vec!["user1".to_string(), "PERMANENT".to_string()];
        assert_eq!(location.find_mapset("elevation", &search), Some("user1"));
        assert_eq!(location.find_mapset("soils", &search[1..]), None);
        assert_eq!(location.find_mapset("ghost", &search), None);
    }

    #[test]
    fn cell_header_requires_dimensions() {
        let err = CellHeader::parse("north: 1\n").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Corrupt);

        let header = CellHeader::parse("rows: 3\ncols: 4\n").expect("parse");
        assert_eq!(header.format, None);
        assert_eq!(header.compressed, None);
    }

    #[test]
    fn lock_errors_map_to_expected_kinds() {
        let err = std::io::Error::from_raw_os_error(libc::EWOULDBLOCK);
        assert_eq!(super::lock_error_kind(&err), ErrorKind::Busy);

        let err = std::io::Error::from_raw_os_error(libc::EACCES);
        assert_eq!(super::lock_error_kind(&err), ErrorKind::Permission);

        let err = std::io::Error::from_raw_os_error(libc::EBADF);
        assert_eq!(super::lock_error_kind(&err), ErrorKind::Io);
    }
}
