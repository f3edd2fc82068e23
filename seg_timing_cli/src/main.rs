use std::fs;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueHint};
use geo::Point;
use seg_timing::{
    parse_trackpoints, segment_efforts, EffortResult, MatchParams, Segment, TrackPoint,
};
use serde::Deserialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Precise segment effort timing for GPS activities",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compute the timed traversals of a segment in one activity
    Efforts(EffortsArgs),
    /// Summarize an activity file: point count, time span, sampling, extent
    Inspect(InspectArgs),
    /// List the segments usable without an API access token
    Segments(SegmentsArgs),
}

#[derive(Parser, Debug)]
struct EffortsArgs {
    /// Activity file to analyze (.tcx, .gpx or .fit)
    #[arg(required = true, value_hint = ValueHint::FilePath)]
    activity: PathBuf,

    /// Numeric segment ID, resolved via the built-in table or the Strava API
    #[arg(short, long)]
    segment_id: Option<u64>,

    /// Segment start as "lng,lat" degrees, alternative to --segment-id
    #[arg(long)]
    start: Option<String>,

    /// Segment end as "lng,lat" degrees
    #[arg(long)]
    end: Option<String>,

    /// Strava API access token, only needed for segments not built in
    #[arg(short = 't', long, env = "STRAVA_ACCESS_TOKEN", hide_env_values = true)]
    access_token: Option<String>,

    /// Candidate box half-width in degrees around each segment endpoint
    #[arg(long, default_value_t = 0.0005)]
    tolerance: f64,

    /// Track points kept on each side of a matched candidate
    #[arg(long, default_value_t = 2)]
    window_radius: usize,

    /// Output CSV path ('-' writes to stdout)
    #[arg(short, long, default_value = "-", value_hint = ValueHint::FilePath)]
    output: PathBuf,

    /// Also write the results as JSON to this path
    #[arg(long, value_hint = ValueHint::FilePath)]
    json: Option<PathBuf>,

    /// Enable verbose (debug) logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[derive(Parser, Debug)]
struct InspectArgs {
    /// Activity file to summarize (.tcx, .gpx or .fit)
    #[arg(required = true, value_hint = ValueHint::FilePath)]
    activity: PathBuf,

    /// Report path ('-' writes to stdout)
    #[arg(short, long, default_value = "-", value_hint = ValueHint::FilePath)]
    output: PathBuf,

    /// Enable verbose (debug) logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[derive(Parser, Debug)]
struct SegmentsArgs {
    /// Enable verbose (debug) logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

struct BuiltinSegment {
    id: u64,
    name: &'static str,
    start_lnglat: (f64, f64),
    end_lnglat: (f64, f64),
}

/// Segments bundled with the binary so the common case needs no API token.
const BUILTIN_SEGMENTS: &[BuiltinSegment] = &[BuiltinSegment {
    id: 4391619,
    name: "Marienfeld Climb",
    start_lnglat: (7.436902, 50.884516),
    end_lnglat: (7.441928, 50.883243),
}];

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Command::Efforts(args) => {
            if args.verbose {
                "debug"
            } else {
                "info"
            }
        }
        Command::Inspect(args) => {
            if args.verbose {
                "debug"
            } else {
                "info"
            }
        }
        Command::Segments(args) => {
            if args.verbose {
                "debug"
            } else {
                "info"
            }
        }
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    match cli.command {
        Command::Efforts(args) => handle_efforts(args),
        Command::Inspect(args) => handle_inspect(args),
        Command::Segments(args) => handle_segments(args),
    }
}

fn handle_efforts(args: EffortsArgs) -> Result<()> {
    let (segment, name) = resolve_segment(&args)?;
    info!(
        "Segment '{}': ({:.6}, {:.6}) -> ({:.6}, {:.6})",
        name,
        segment.start.x(),
        segment.start.y(),
        segment.end.x(),
        segment.end.y()
    );

    let trackpoints = load_activity(&args.activity)?;
    info!(
        "Loaded {} track points from {}",
        trackpoints.len(),
        args.activity.display()
    );

    let params = MatchParams {
        proximity_tolerance_deg: args.tolerance,
        window_radius: args.window_radius,
    };
    let efforts = segment_efforts(&segment, &trackpoints, &params)
        .with_context(|| format!("no effort times for segment '{}'", name))?;

    if efforts.is_empty() {
        warn!("Track comes near both endpoints but never crosses the segment");
    }
    for (idx, effort) in efforts.iter().enumerate() {
        info!(
            "Effort {}: {:.3} s, started {}",
            idx + 1,
            effort.elapsed_s,
            effort.started_at.to_rfc3339()
        );
    }

    if args.output.as_os_str() == "-" {
        write_efforts_stdout(&efforts)?;
    } else {
        write_efforts_csv(&efforts, &args.output)?;
        info!("Wrote efforts CSV: {}", args.output.display());
    }
    if let Some(path) = args.json.as_ref() {
        write_efforts_json(&segment, &name, &params, &efforts, path)?;
        info!("Wrote efforts JSON: {}", path.display());
    }

    Ok(())
}

fn handle_inspect(args: InspectArgs) -> Result<()> {
    let trackpoints = load_activity(&args.activity)?;

    let mut report = String::new();
    report.push_str(&format!("FILE: {}\n", args.activity.display()));
    report.push_str(&format!("  points: {}\n", trackpoints.len()));

    if let (Some(first), Some(last)) = (trackpoints.first(), trackpoints.last()) {
        let span_s = (last.time - first.time).num_milliseconds() as f64 / 1000.0;
        report.push_str(&format!("  first_time: {}\n", first.time.to_rfc3339()));
        report.push_str(&format!("  last_time: {}\n", last.time.to_rfc3339()));
        report.push_str(&format!("  span_s: {:.1}\n", span_s));
    }

    if trackpoints.len() >= 2 {
        let deltas: Vec<f64> = trackpoints
            .windows(2)
            .map(|pair| (pair[1].time - pair[0].time).num_milliseconds() as f64 / 1000.0)
            .collect();
        let min = deltas.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = deltas.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let mean = deltas.iter().sum::<f64>() / deltas.len() as f64;
        report.push_str(&format!(
            "  sampling_s: min={:.1} mean={:.2} max={:.1}\n",
            min, mean, max
        ));
    }

    if let Some(bbox) = bounding_box(&trackpoints) {
        report.push_str(&format!(
            "  bbox: lng {:.6}..{:.6} lat {:.6}..{:.6}\n",
            bbox.0, bbox.1, bbox.2, bbox.3
        ));
    }

    let with_elevation = trackpoints.iter().filter(|p| p.elevation.is_some()).count();
    report.push_str(&format!("  with_elevation: {}\n", with_elevation));

    if args.output.as_os_str() == "-" {
        print!("{}", report);
    } else {
        fs::write(&args.output, report)
            .with_context(|| format!("failed to write {}", args.output.display()))?;
        info!("Wrote inspection report: {}", args.output.display());
    }

    Ok(())
}

fn handle_segments(_args: SegmentsArgs) -> Result<()> {
    let stdout = io::stdout();
    let handle = stdout.lock();
    let mut writer = csv::Writer::from_writer(handle);
    writer.write_record([
        "segment_id",
        "name",
        "start_lng",
        "start_lat",
        "end_lng",
        "end_lat",
    ])?;
    for segment in BUILTIN_SEGMENTS {
        writer.write_record([
            segment.id.to_string(),
            segment.name.to_string(),
            format!("{:.6}", segment.start_lnglat.0),
            format!("{:.6}", segment.start_lnglat.1),
            format!("{:.6}", segment.end_lnglat.0),
            format!("{:.6}", segment.end_lnglat.1),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

fn resolve_segment(args: &EffortsArgs) -> Result<(Segment, String)> {
    if let (Some(start), Some(end)) = (args.start.as_deref(), args.end.as_deref()) {
        let segment = Segment::new(parse_lnglat(start)?, parse_lnglat(end)?)?;
        return Ok((segment, "custom coordinates".to_string()));
    }
    if args.start.is_some() || args.end.is_some() {
        return Err(anyhow!("--start and --end must be given together"));
    }

    let segment_id = args
        .segment_id
        .ok_or_else(|| anyhow!("either --segment-id or --start/--end is required"))?;
    if let Some(builtin) = BUILTIN_SEGMENTS.iter().find(|s| s.id == segment_id) {
        let segment = Segment::new(
            Point::new(builtin.start_lnglat.0, builtin.start_lnglat.1),
            Point::new(builtin.end_lnglat.0, builtin.end_lnglat.1),
        )?;
        return Ok((segment, builtin.name.to_string()));
    }

    let token = args.access_token.as_deref().ok_or_else(|| {
        anyhow!(
            "segment {} is not built in; pass --access-token or set STRAVA_ACCESS_TOKEN",
            segment_id
        )
    })?;
    info!("Fetching segment {} from the Strava API", segment_id);
    fetch_segment(token, segment_id)
}

fn fetch_segment(access_token: &str, segment_id: u64) -> Result<(Segment, String)> {
    #[derive(Deserialize)]
    struct SegmentResponse {
        name: String,
        start_latlng: [f64; 2],
        end_latlng: [f64; 2],
    }

    let url = format!("https://www.strava.com/api/v3/segments/{}", segment_id);
    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .context("failed to build the HTTP client")?;
    let response = client
        .get(&url)
        .bearer_auth(access_token)
        .send()
        .with_context(|| format!("request for segment {} failed", segment_id))?;
    if !response.status().is_success() {
        return Err(anyhow!(
            "request for segment {} returned {}",
            segment_id,
            response.status()
        ));
    }
    let body: SegmentResponse = response
        .json()
        .with_context(|| format!("segment {} response was not valid JSON", segment_id))?;

    // The API serves [lat, lng]; the geometry wants x = lng, y = lat.
    let segment = Segment::new(
        Point::new(body.start_latlng[1], body.start_latlng[0]),
        Point::new(body.end_latlng[1], body.end_latlng[0]),
    )?;
    Ok((segment, body.name))
}

fn load_activity(path: &Path) -> Result<Vec<TrackPoint>> {
    let data = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let hint = path.extension().and_then(|ext| ext.to_str()).unwrap_or("tcx");
    let trackpoints = parse_trackpoints(&data, hint)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(trackpoints)
}

fn parse_lnglat(input: &str) -> Result<Point<f64>> {
    let (lng, lat) = input
        .split_once(',')
        .ok_or_else(|| anyhow!("invalid coordinate '{}': expected \"lng,lat\"", input))?;
    let lng: f64 = lng
        .trim()
        .parse()
        .with_context(|| format!("invalid longitude '{}'", lng.trim()))?;
    let lat: f64 = lat
        .trim()
        .parse()
        .with_context(|| format!("invalid latitude '{}'", lat.trim()))?;
    Ok(Point::new(lng, lat))
}

fn bounding_box(trackpoints: &[TrackPoint]) -> Option<(f64, f64, f64, f64)> {
    let first = trackpoints.first()?;
    let mut bbox = (
        first.point.x(),
        first.point.x(),
        first.point.y(),
        first.point.y(),
    );
    for point in &trackpoints[1..] {
        bbox.0 = bbox.0.min(point.point.x());
        bbox.1 = bbox.1.max(point.point.x());
        bbox.2 = bbox.2.min(point.point.y());
        bbox.3 = bbox.3.max(point.point.y());
    }
    Some(bbox)
}

fn write_efforts_stdout(efforts: &[EffortResult]) -> Result<()> {
    let stdout = io::stdout();
    let handle = stdout.lock();
    let mut writer = csv::Writer::from_writer(handle);
    write_effort_rows(efforts, &mut writer)
}

fn write_efforts_csv(efforts: &[EffortResult], path: &Path) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut writer = csv::Writer::from_writer(file);
    write_effort_rows(efforts, &mut writer)
}

fn write_effort_rows<W: Write>(
    efforts: &[EffortResult],
    writer: &mut csv::Writer<W>,
) -> Result<()> {
    writer.write_record(["effort", "started_at", "elapsed_s"])?;
    for (idx, effort) in efforts.iter().enumerate() {
        writer.write_record([
            (idx + 1).to_string(),
            effort.started_at.to_rfc3339(),
            format!("{:.3}", effort.elapsed_s),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

fn write_efforts_json(
    segment: &Segment,
    name: &str,
    params: &MatchParams,
    efforts: &[EffortResult],
    path: &Path,
) -> Result<()> {
    let doc = serde_json::json!({
        "segment": {
            "name": name,
            "start_lnglat": [segment.start.x(), segment.start.y()],
            "end_lnglat": [segment.end.x(), segment.end.y()],
        },
        "params": params,
        "efforts": efforts,
    });
    let text = serde_json::to_string_pretty(&doc)?;
    fs::write(path, text).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}
