// Raster-storage collaborator interface consumed by the loader.
use crate::core::colors::ColorTable;
use crate::core::error::Error;

/// Storage backend that can hand out open rasters and their color tables.
///
/// Every value returned by `open_raster` is given back to `close_raster`
/// exactly once, and every table from `read_colors` to `free_colors`.
/// `RasterContext` enforces that pairing through drop guards.
pub trait RasterStore {
    type Handle;

    fn open_raster(&self, name: &str, mapset: &str) -> Result<Self::Handle, Error>;

    fn close_raster(&self, handle: Self::Handle);

    fn read_colors(&self, name: &str, mapset: &str) -> Result<ColorTable, Error>;

    fn free_colors(&self, colors: ColorTable) {
        drop(colors);
    }

    fn color_range(&self, colors: &ColorTable) -> (i32, i32) {
        colors.int_range()
    }

    /// Stored title for the map; empty when the map has none.
    fn cell_title(&self, name: &str, mapset: &str) -> String;
}
