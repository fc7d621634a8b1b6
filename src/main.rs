//! Purpose: `cellmap` CLI entry point and command dispatch.
//! Role: Binary crate root; parses args, loads rasters, emits JSON on stdout.
//! Invariants: Commands emit stable JSON on stdout (pretty on a TTY, compact otherwise).
//! Invariants: Non-interactive errors and notices are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `core::error::to_exit_code`.
//! Invariants: Maps are loaded through one `RasterContext`, so at most one is open.
use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::{Args, Parser, Subcommand, ValueEnum, ValueHint, error::ErrorKind as ClapErrorKind};
use serde_json::{Map, Value, json};
use std::error::Error as StdError;
use tracing_subscriber::EnvFilter;

mod map_info_json;
mod map_paths;

use cellmap::core::database::Location;
use cellmap::core::store::RasterStore;
use cellmap::core::error::{Error, ErrorKind, to_exit_code};
use cellmap::core::loader::RasterContext;
use cellmap::notice::{Notice, load_failed_notice, notice_json};
use map_info_json::{colors_json, raster_json};
use map_paths::{MapRef, MapRefError, default_location_dir, parse_map_ref, search_path};

#[derive(Copy, Clone, Debug)]
struct RunOutcome {
    exit_code: i32,
}

impl RunOutcome {
    fn ok() -> Self {
        Self { exit_code: 0 }
    }

    fn with_code(exit_code: i32) -> Self {
        Self { exit_code }
    }
}

fn main() {
    let exit_code = match run() {
        Ok(outcome) => outcome.exit_code,
        Err((err, color_mode)) => {
            emit_error(&err, color_mode);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<RunOutcome, (Error, ColorMode)> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    (
                        Error::new(ErrorKind::Io)
                            .with_message("failed to write help")
                            .with_source(io_err),
                        ColorMode::Auto,
                    )
                })?;
                let exit_code = if matches!(
                    err.kind(),
                    ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                ) {
                    2
                } else {
                    0
                };
                return Ok(RunOutcome::with_code(exit_code));
            }
            _ => {
                return Err((
                    Error::new(ErrorKind::Usage)
                        .with_message(clap_error_summary(&err))
                        .with_hint("Try `cellmap --help`."),
                    ColorMode::Auto,
                ));
            }
        },
    };

    init_tracing();
    let color_mode = cli.color;
    let location_dir = cli.location.clone().unwrap_or_else(default_location_dir);
    let current = cli.mapset.clone();
    map_paths::check_legal(&current).map_err(|err| (map_ref_error(err), color_mode))?;

    match cli.command {
        Command::Load(args) => run_load(&location_dir, &current, args, color_mode),
        Command::Colors { map } => {
            let location = Location::open(&location_dir).map_err(|err| (err, color_mode))?;
            let map_ref = parse_map_ref(&map).map_err(|err| (map_ref_error(err), color_mode))?;
            let mapset = resolve_mapset(&location, &map_ref, &current).ok_or_else(|| {
                (not_in_search_path(&map_ref.name, &current), color_mode)
            })?;
            let fullname = format!("{} in {}", map_ref.name, mapset);
            let colors = location
                .read_colors(&map_ref.name, &mapset)
                .map_err(|err| (err.with_map(fullname.clone()), color_mode))?;
            emit_json(colors_json(&fullname, &colors));
            Ok(RunOutcome::ok())
        }
        Command::Mapsets => {
            let location = Location::open(&location_dir).map_err(|err| (err, color_mode))?;
            let mapsets = location.mapsets().map_err(|err| (err, color_mode))?;
            emit_json(json!({
                "location": location.root().display().to_string(),
                "current": current,
                "mapsets": mapsets,
            }));
            Ok(RunOutcome::ok())
        }
    }
}

fn run_load(
    location_dir: &Path,
    current: &str,
    args: LoadArgs,
    color_mode: ColorMode,
) -> Result<RunOutcome, (Error, ColorMode)> {
    let map_refs = args
        .maps
        .iter()
        .map(|raw| parse_map_ref(raw))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| (map_ref_error(err), color_mode))?;
    let location = Location::open(location_dir).map_err(|err| (err, color_mode))?;

    let mut ctx = RasterContext::new(&location);
    let mut last_failure = None;
    for map_ref in &map_refs {
        // Unresolved names fall back to the current mapset and fail in the loader.
        let mapset = resolve_mapset(&location, map_ref, current)
            .unwrap_or_else(|| current.to_string());
        match ctx.load_raster(&map_ref.name, &mapset) {
            Ok(()) => last_failure = None,
            Err(err) => {
                let time = notice_time_now().unwrap_or_default();
                emit_notice(&load_failed_notice(&err, "load", time), color_mode);
                last_failure = Some(to_exit_code(err.kind()));
            }
        }
    }
    if args.colortable {
        ctx.set_color_table(true);
    }

    emit_json(raster_json(&ctx));
    Ok(RunOutcome::with_code(last_failure.unwrap_or(0)))
}

fn resolve_mapset(location: &Location, map_ref: &MapRef, current: &str) -> Option<String> {
    if let Some(mapset) = &map_ref.mapset {
        return Some(mapset.clone());
    }
    let search = search_path(current);
    location
        .find_mapset(&map_ref.name, &search)
        .map(str::to_string)
}

fn not_in_search_path(name: &str, current: &str) -> Error {
    let searched = search_path(current).join(", ");
    Error::new(ErrorKind::NotFound)
        .with_message(format!("raster map {name:?} not found in mapsets: {searched}"))
        .with_hint("Qualify the map as name@mapset or pass --mapset.")
}

fn map_ref_error(err: MapRefError) -> Error {
    let message = match err {
        MapRefError::Empty => "map name is empty".to_string(),
        MapRefError::IllegalName(name) => format!("illegal map or mapset name: {name:?}"),
    };
    Error::new(ErrorKind::Usage).with_message(message).with_hint(
        "Names may not contain whitespace, '/', '@' (except as name@mapset), or start with '.'.",
    )
}

#[derive(Parser)]
#[command(
    name = "cellmap",
    version,
    about = "Load raster maps and their color tables from a location directory",
    long_about = None,
    before_help = r#"A location holds mapsets; each mapset holds rasters as
  <mapset>/cell/<name>     raster data
  <mapset>/cellhd/<name>   header (rows, cols, format)
  <mapset>/colr/<name>     color table
  <mapset>/cats/<name>     categories; line 2 is the title
"#,
    after_help = r#"EXAMPLES
  $ cellmap --location ~/grassdata/spearfish mapsets
  $ cellmap load elevation@PERMANENT
  $ cellmap --mapset user1 load soils roads --colortable
  $ cellmap colors elevation

  $ cellmap <command> --help"#,
    arg_required_else_help = true
)]
struct Cli {
    #[arg(
        long,
        help = "Location directory (default: $CELLMAP_LOCATION or ~/.cellmap/location)",
        value_hint = ValueHint::DirPath
    )]
    location: Option<PathBuf>,
    #[arg(
        long,
        default_value = map_paths::PERMANENT,
        help = "Current mapset; unqualified names search it, then PERMANENT"
    )]
    mapset: String,
    #[arg(
        long,
        default_value = "auto",
        value_enum,
        help = "Colorize stderr diagnostics: auto|always|never"
    )]
    color: ColorMode,

    #[command(subcommand)]
    command: Command,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ColorMode {
    Auto,
    Always,
    Never,
}

impl ColorMode {
    fn use_color(self, is_tty: bool) -> bool {
        match self {
            ColorMode::Auto => is_tty,
            ColorMode::Always => true,
            ColorMode::Never => false,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    #[command(
        about = "Load maps in order into one context and print the final state",
        long_about = r#"Load each map in turn, replacing the previous one.

A map that fails to load is reported as a notice on stderr and leaves no raster
loaded; later maps are still attempted. The exit code reflects the last map."#
    )]
    Load(LoadArgs),
    #[command(about = "Print a map's color table")]
    Colors {
        #[arg(help = "Map reference: name or name@mapset")]
        map: String,
    },
    #[command(about = "List mapsets in the location")]
    Mapsets,
}

#[derive(Args)]
struct LoadArgs {
    #[arg(required = true, help = "Map references: name or name@mapset")]
    maps: Vec<String>,
    #[arg(long, help = "Enable color-table output for the loaded raster")]
    colortable: bool,
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_ansi(io::stderr().is_terminal())
        .with_writer(io::stderr)
        .try_init();
}

fn emit_json(value: Value) {
    let encoded = if io::stdout().is_terminal() {
        serde_json::to_string_pretty(&value)
    } else {
        serde_json::to_string(&value)
    };
    let json = encoded.unwrap_or_else(|_| "{\"error\":\"json encode failed\"}".to_string());
    println!("{json}");
}

fn emit_error(err: &Error, color_mode: ColorMode) {
    let is_tty = io::stderr().is_terminal();
    if is_tty {
        eprintln!("{}", error_text(err, color_mode.use_color(is_tty)));
        return;
    }

    let value = error_json(err);
    let json = serde_json::to_string(&value).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn notice_time_now() -> Option<String> {
    use time::format_description::well_known::Rfc3339;
    let duration = SystemTime::now().duration_since(UNIX_EPOCH).ok()?;
    let ts = time::OffsetDateTime::from_unix_timestamp_nanos(duration.as_nanos() as i128).ok()?;
    ts.format(&Rfc3339).ok()
}

fn emit_notice(notice: &Notice, color_mode: ColorMode) {
    let is_tty = io::stderr().is_terminal();
    if is_tty {
        let label = colorize_label("notice:", color_mode.use_color(is_tty), AnsiColor::Yellow);
        eprintln!("{label} {}: {}", notice.map, notice.message);
        return;
    }

    let value = notice_json(notice);
    let json = serde_json::to_string(&value).unwrap_or_else(|_| {
        "{\"notice\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

#[derive(Copy, Clone, Debug)]
enum AnsiColor {
    Red,
    Yellow,
}

fn colorize_label(label: &str, enabled: bool, color: AnsiColor) -> String {
    if !enabled {
        return label.to_string();
    }
    let code = match color {
        AnsiColor::Red => "31",
        AnsiColor::Yellow => "33",
    };
    format!("\u{1b}[{code}m{label}\u{1b}[0m")
}

fn error_message(err: &Error) -> String {
    if let Some(message) = err.message() {
        return message.to_string();
    }
    match err.kind() {
        ErrorKind::Internal => "internal error".to_string(),
        ErrorKind::Usage => "usage error".to_string(),
        ErrorKind::NotFound => "not found".to_string(),
        ErrorKind::AlreadyExists => "already exists".to_string(),
        ErrorKind::Busy => "resource is busy".to_string(),
        ErrorKind::Permission => "permission denied".to_string(),
        ErrorKind::Corrupt => "corrupt data".to_string(),
        ErrorKind::Io => "i/o error".to_string(),
    }
}

fn error_causes(err: &Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut cur = err.source();
    while let Some(source) = cur {
        causes.push(source.to_string());
        cur = source.source();
    }
    causes
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert("message".to_string(), json!(error_message(err)));
    if let Some(hint) = err.hint() {
        inner.insert("hint".to_string(), json!(hint));
    }
    if let Some(map) = err.map() {
        inner.insert("map".to_string(), json!(map));
    }
    if let Some(path) = err.path() {
        inner.insert("path".to_string(), json!(path.display().to_string()));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}

fn error_text(err: &Error, use_color: bool) -> String {
    let mut lines = vec![format!(
        "{} {}",
        colorize_label("error:", use_color, AnsiColor::Red),
        error_message(err)
    )];

    if let Some(hint) = err.hint() {
        lines.push(format!(
            "{} {hint}",
            colorize_label("hint:", use_color, AnsiColor::Yellow)
        ));
    }
    if let Some(map) = err.map() {
        lines.push(format!(
            "{} {map}",
            colorize_label("map:", use_color, AnsiColor::Yellow)
        ));
    }
    if let Some(path) = err.path() {
        lines.push(format!(
            "{} {}",
            colorize_label("path:", use_color, AnsiColor::Yellow),
            path.display()
        ));
    }

    let causes = error_causes(err);
    if let Some(cause) = causes.first() {
        lines.push(format!(
            "{} {cause}",
            colorize_label("caused by:", use_color, AnsiColor::Yellow)
        ));
    }

    lines.join("\n")
}

fn clap_error_summary(err: &clap::Error) -> String {
    for line in err.to_string().lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("error:") {
            return rest.trim().to_string();
        }
        return trimmed.to_string();
    }
    "invalid arguments".to_string()
}
