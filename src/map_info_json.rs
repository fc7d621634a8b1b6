//! Purpose: JSON envelopes for raster context state and color tables.
//! Exports: `raster_json`, `colors_json`.
//! Role: Keep the `load` and `colors` stdout shapes in one place.
//! Invariants: Stable key names for v0 payloads; `raster` is null when nothing is loaded.

use cellmap::core::colors::ColorTable;
use cellmap::core::database::{CellFile, Location};
use cellmap::core::loader::RasterContext;
use serde_json::{Map, Value, json};

pub(crate) fn raster_json(ctx: &RasterContext<'_, Location>) -> Value {
    let (Some(name), Some(mapset), Some(cell)) = (ctx.cell_name(), ctx.cell_mapset(), ctx.handle())
    else {
        return json!({ "raster": null });
    };

    let mut map = Map::new();
    map.insert("name".to_string(), json!(name));
    map.insert("mapset".to_string(), json!(mapset));
    map.insert("title".to_string(), json!(ctx.title()));
    if let Some((min, max)) = ctx.color_range() {
        map.insert("color_range".to_string(), json!({ "min": min, "max": max }));
    }
    map.insert("colortable".to_string(), json!(ctx.has_color_table()));
    map.insert("cell".to_string(), cell_json(cell));

    let mut outer = Map::new();
    outer.insert("raster".to_string(), Value::Object(map));
    Value::Object(outer)
}

fn cell_json(cell: &CellFile) -> Value {
    let header = cell.header();
    let mut map = Map::new();
    map.insert("path".to_string(), json!(cell.path().display().to_string()));
    map.insert("rows".to_string(), json!(header.rows));
    map.insert("cols".to_string(), json!(header.cols));
    if let Some(format) = header.format {
        map.insert("format".to_string(), json!(format));
    }
    if let Some(compressed) = header.compressed {
        map.insert("compressed".to_string(), json!(compressed));
    }
    if let Ok(len) = cell.data_len() {
        map.insert("data_bytes".to_string(), json!(len));
    }
    Value::Object(map)
}

pub(crate) fn colors_json(map_name: &str, colors: &ColorTable) -> Value {
    let (min, max) = colors.int_range();
    json!({
        "map": map_name,
        "range": { "min": min, "max": max },
        "rules": colors.rules(),
        "null_color": colors.null_color(),
        "default_color": colors.default_color(),
    })
}
