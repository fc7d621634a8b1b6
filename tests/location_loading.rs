// Loading rasters from an on-disk location through `RasterContext`.
use std::fs;
use std::path::Path;

use cellmap::core::database::Location;
use cellmap::core::error::ErrorKind;
use cellmap::core::loader::{LoadError, RasterContext};
use fs2::FileExt;

fn write(root: &Path, mapset: &str, element: &str, name: &str, text: &str) {
    let dir = root.join(mapset).join(element);
    fs::create_dir_all(&dir).expect("mkdir");
    fs::write(dir.join(name), text).expect("write");
}

fn raster(root: &Path, mapset: &str, name: &str, colr: &str, title: &str) {
    write(root, mapset, "cellhd", name, "rows: 2\ncols: 3\nformat: 1\n");
    write(root, mapset, "cell", name, "abcdef");
    write(root, mapset, "colr", name, colr);
    write(root, mapset, "cats", name, &format!("# 0 categories\n{title}\n"));
}

#[test]
fn elevation_loads_with_trimmed_title_and_range() {
    let temp = tempfile::tempdir().expect("tempdir");
    raster(temp.path(), "PERMANENT", "elevation", "% 0 255\n0:0 255:255\n", "  Elevation Model  ");
    let location = Location::open(temp.path()).expect("location");

    let mut ctx = RasterContext::new(&location);
    ctx.load_raster("elevation", "PERMANENT").expect("load");

    assert!(ctx.has_raster());
    assert_eq!(ctx.title(), Some("Elevation Model"));
    assert_eq!(ctx.color_range(), Some((0, 255)));
    let cell = ctx.handle().expect("handle");
    assert_eq!(cell.header().rows, 2);
    assert!(cell.path().ends_with("PERMANENT/cell/elevation"));
}

#[test]
fn missing_color_table_reports_identifier() {
    let temp = tempfile::tempdir().expect("tempdir");
    write(temp.path(), "PERMANENT", "cellhd", "elevation", "rows: 1\ncols: 1\n");
    write(temp.path(), "PERMANENT", "cell", "elevation", "x");
    let location = Location::open(temp.path()).expect("location");

    let mut ctx = RasterContext::new(&location);
    let err = ctx.load_raster("elevation", "PERMANENT").unwrap_err();
    match &err {
        LoadError::ColorTableUnreadable { map, .. } => assert_eq!(map, "elevation in PERMANENT"),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(!ctx.has_raster());
    assert!(ctx.handle().is_none());
}

#[test]
fn missing_cell_file_reports_unopenable() {
    let temp = tempfile::tempdir().expect("tempdir");
    write(temp.path(), "PERMANENT", "colr", "elevation", "0:0 255:255\n");
    let location = Location::open(temp.path()).expect("location");

    let mut ctx = RasterContext::new(&location);
    let err = ctx.load_raster("elevation", "PERMANENT").unwrap_err();
    assert!(matches!(err, LoadError::RasterUnopenable { .. }));
    assert_eq!(err.map(), "elevation in PERMANENT");
    assert!(!ctx.has_raster());
    assert!(ctx.colors().is_none());
}

#[test]
fn replacing_a_raster_releases_its_lock() {
    let temp = tempfile::tempdir().expect("tempdir");
    raster(temp.path(), "PERMANENT", "elevation", "0:0 10:255\n", "Elevation");
    raster(temp.path(), "PERMANENT", "soils", "1:0 12:255\n", "");
    let location = Location::open(temp.path()).expect("location");
    let elevation_cell = temp.path().join("PERMANENT/cell/elevation");

    let mut ctx = RasterContext::new(&location);
    ctx.load_raster("elevation", "PERMANENT").expect("elevation");

    let other = fs::File::open(&elevation_cell).expect("second handle");
    assert!(FileExt::try_lock_exclusive(&other).is_err());

    ctx.load_raster("soils", "PERMANENT").expect("soils");
    assert_eq!(ctx.title(), Some("(soils)"));
    assert_eq!(ctx.color_range(), Some((1, 12)));
    FileExt::try_lock_exclusive(&other).expect("elevation lock released");
    FileExt::unlock(&other).expect("unlock");
}

#[test]
fn busy_raster_fails_unopenable() {
    let temp = tempfile::tempdir().expect("tempdir");
    raster(temp.path(), "PERMANENT", "elevation", "0:0 10:255\n", "Elevation");
    let location = Location::open(temp.path()).expect("location");

    let holder = fs::File::open(temp.path().join("PERMANENT/cell/elevation")).expect("holder");
    FileExt::lock_exclusive(&holder).expect("lock");

    let mut ctx = RasterContext::new(&location);
    let err = ctx.load_raster("elevation", "PERMANENT").unwrap_err();
    assert!(matches!(err, LoadError::RasterUnopenable { .. }));
    assert_eq!(err.kind(), ErrorKind::Busy);
    assert!(ctx.colors().is_none());
}
