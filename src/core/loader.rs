// Raster loading into a caller-owned context, with scoped release of handles and colors.
use std::error::Error as StdError;
use std::fmt;
use std::ops::Deref;

use crate::core::colors::ColorTable;
use crate::core::error::{Error, ErrorKind};
use crate::core::store::RasterStore;

/// Open raster handle that is closed through its store when dropped.
pub struct OpenCell<'s, S: RasterStore + ?Sized> {
    store: &'s S,
    handle: Option<S::Handle>,
}

impl<'s, S: RasterStore + ?Sized> OpenCell<'s, S> {
    fn new(store: &'s S, handle: S::Handle) -> Self {
        Self {
            store,
            handle: Some(handle),
        }
    }
}

impl<S: RasterStore + ?Sized> Deref for OpenCell<'_, S> {
    type Target = S::Handle;

    fn deref(&self) -> &S::Handle {
        // Only `drop` takes the handle out.
        self.handle.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl<S: RasterStore + ?Sized> Drop for OpenCell<'_, S> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.store.close_raster(handle);
        }
    }
}

/// Loaded color table that is freed through its store when dropped.
pub struct HeldColors<'s, S: RasterStore + ?Sized> {
    store: &'s S,
    colors: Option<ColorTable>,
}

impl<'s, S: RasterStore + ?Sized> HeldColors<'s, S> {
    fn new(store: &'s S, colors: ColorTable) -> Self {
        Self {
            store,
            colors: Some(colors),
        }
    }
}

impl<S: RasterStore + ?Sized> Deref for HeldColors<'_, S> {
    type Target = ColorTable;

    fn deref(&self) -> &ColorTable {
        self.colors.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl<S: RasterStore + ?Sized> Drop for HeldColors<'_, S> {
    fn drop(&mut self) {
        if let Some(colors) = self.colors.take() {
            self.store.free_colors(colors);
        }
    }
}

// Field order is release order: the cell closes before its colors are freed.
struct LoadedRaster<'s, S: RasterStore + ?Sized> {
    cell: OpenCell<'s, S>,
    colors: HeldColors<'s, S>,
    name: String,
    mapset: String,
    min_color: i32,
    max_color: i32,
    title: String,
}

#[derive(Debug)]
pub enum LoadError {
    ColorTableUnreadable { map: String, source: Error },
    RasterUnopenable { map: String, source: Error },
}

impl LoadError {
    /// The `"<name> in <mapset>"` identifier of the map that failed.
    pub fn map(&self) -> &str {
        match self {
            LoadError::ColorTableUnreadable { map, .. }
            | LoadError::RasterUnopenable { map, .. } => map,
        }
    }

    pub fn operation(&self) -> &'static str {
        match self {
            LoadError::ColorTableUnreadable { .. } => "can't read color table",
            LoadError::RasterUnopenable { .. } => "can't open raster map",
        }
    }

    /// Kind of the underlying storage failure.
    pub fn kind(&self) -> ErrorKind {
        self.storage_error().kind()
    }

    pub fn storage_error(&self) -> &Error {
        match self {
            LoadError::ColorTableUnreadable { source, .. }
            | LoadError::RasterUnopenable { source, .. } => source,
        }
    }
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.map(), self.operation())
    }
}

impl StdError for LoadError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.storage_error())
    }
}

impl From<LoadError> for Error {
    fn from(err: LoadError) -> Self {
        let kind = err.kind();
        let message = err.operation();
        let (map, source) = match err {
            LoadError::ColorTableUnreadable { map, source }
            | LoadError::RasterUnopenable { map, source } => (map, source),
        };
        Error::new(kind)
            .with_message(message)
            .with_map(map)
            .with_source(source)
    }
}

/// Bookkeeping for the raster currently used by map output.
///
/// At most one raster is open at a time. Its handle and color table are
/// released through `store` when replaced, on `release`, or when the
/// context drops. The context is not synchronized; callers sharing one
/// across threads must serialize access themselves.
pub struct RasterContext<'s, S: RasterStore + ?Sized> {
    store: &'s S,
    loaded: Option<LoadedRaster<'s, S>>,
    do_colortable: bool,
}

impl<'s, S: RasterStore + ?Sized> RasterContext<'s, S> {
    pub fn new(store: &'s S) -> Self {
        Self {
            store,
            loaded: None,
            do_colortable: false,
        }
    }

    /// Replaces the current raster with `name` in `mapset`.
    ///
    /// The previous raster is released before anything new is acquired, so
    /// on failure the context holds no raster at all.
    pub fn load_raster(&mut self, name: &str, mapset: &str) -> Result<(), LoadError> {
        // Also clears the color-table flag, even when nothing was loaded.
        self.release();

        let store = self.store;
        let fullname = format!("{name} in {mapset}");

        let colors = match store.read_colors(name, mapset) {
            Ok(colors) => HeldColors::new(store, colors),
            Err(source) => {
                tracing::warn!(
                    map = %fullname,
                    operation = "read colors",
                    error = %source,
                    "can't read color table"
                );
                return Err(LoadError::ColorTableUnreadable {
                    map: fullname,
                    source,
                });
            }
        };
        let (min_color, max_color) = store.color_range(&colors);

        // `colors` drops on this path, freeing the table read above.
        let cell = match store.open_raster(name, mapset) {
            Ok(handle) => OpenCell::new(store, handle),
            Err(source) => {
                tracing::warn!(
                    map = %fullname,
                    operation = "open raster",
                    error = %source,
                    "can't open raster map"
                );
                return Err(LoadError::RasterUnopenable {
                    map: fullname,
                    source,
                });
            }
        };

        let stored = store.cell_title(name, mapset);
        let title = match stored.trim() {
            "" => format!("({name})"),
            trimmed => trimmed.to_string(),
        };

        tracing::debug!(map = %fullname, min_color, max_color, "raster loaded");
        self.loaded = Some(LoadedRaster {
            cell,
            colors,
            name: name.to_string(),
            mapset: mapset.to_string(),
            min_color,
            max_color,
            title,
        });
        Ok(())
    }

    /// Closes the current raster and frees its color table, if any.
    pub fn release(&mut self) {
        self.do_colortable = false;
        if let Some(loaded) = self.loaded.take() {
            tracing::debug!(name = %loaded.name, mapset = %loaded.mapset, "raster released");
        }
    }

    pub fn has_raster(&self) -> bool {
        self.loaded.is_some()
    }

    pub fn has_color_table(&self) -> bool {
        self.do_colortable
    }

    /// Turns color-table output on or off. Only takes effect while a raster
    /// is loaded; returns the resulting flag.
    pub fn set_color_table(&mut self, enabled: bool) -> bool {
        self.do_colortable = enabled && self.loaded.is_some();
        self.do_colortable
    }

    pub fn cell_name(&self) -> Option<&str> {
        self.loaded.as_ref().map(|loaded| loaded.name.as_str())
    }

    pub fn cell_mapset(&self) -> Option<&str> {
        self.loaded.as_ref().map(|loaded| loaded.mapset.as_str())
    }

    pub fn title(&self) -> Option<&str> {
        self.loaded.as_ref().map(|loaded| loaded.title.as_str())
    }

    pub fn color_range(&self) -> Option<(i32, i32)> {
        self.loaded
            .as_ref()
            .map(|loaded| (loaded.min_color, loaded.max_color))
    }

    pub fn colors(&self) -> Option<&ColorTable> {
        self.loaded.as_ref().map(|loaded| &*loaded.colors)
    }

    pub fn handle(&self) -> Option<&S::Handle> {
        self.loaded.as_ref().map(|loaded| &*loaded.cell)
    }
}
