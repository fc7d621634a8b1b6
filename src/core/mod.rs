// Core modules implementing raster storage, color tables, loading, and error modeling.
pub mod colors;
pub mod database;
pub mod error;
pub mod loader;
pub mod store;
