//! Activity track decoding: TCX, GPX and FIT bytes into [`TrackPoint`]s.

use chrono::{DateTime, Utc};
use geo::Point;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::{SegTimingError, TrackPoint};

/// Parse track points from bytes using the provided format hint, typically
/// the file extension. Points carrying no position are skipped; track order
/// is preserved.
pub fn parse_trackpoints(input: &[u8], format: &str) -> Result<Vec<TrackPoint>, SegTimingError> {
    let format_lc = format.to_ascii_lowercase();
    if format_lc.ends_with(".tcx") || format_lc == "tcx" {
        parse_tcx_trackpoints(input)
    } else if format_lc.ends_with(".gpx") || format_lc == "gpx" {
        parse_gpx_trackpoints(input)
    } else if format_lc.ends_with(".fit") || format_lc == "fit" {
        parse_fit_trackpoints(input)
    } else {
        Err(SegTimingError::UnsupportedFormat(format.to_string()))
    }
}

fn parse_tcx_trackpoints(input: &[u8]) -> Result<Vec<TrackPoint>, SegTimingError> {
    let mut reader = Reader::from_reader(input);
    reader.config_mut().trim_text(true);

    let mut out = Vec::new();
    let mut buf = Vec::new();
    let mut in_trackpoint = false;
    let mut time: Option<DateTime<Utc>> = None;
    let mut latitude: Option<f64> = None;
    let mut longitude: Option<f64> = None;
    let mut elevation: Option<f64> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"Trackpoint" => {
                    in_trackpoint = true;
                    time = None;
                    latitude = None;
                    longitude = None;
                    elevation = None;
                }
                b"Time" if in_trackpoint => {
                    let text = read_tcx_text(&mut reader, &e)?;
                    let parsed = DateTime::parse_from_rfc3339(text.trim())
                        .map_err(|err| SegTimingError::TcxParse(err.to_string()))?;
                    time = Some(parsed.with_timezone(&Utc));
                }
                b"LatitudeDegrees" if in_trackpoint => {
                    latitude = Some(read_tcx_f64(&mut reader, &e)?);
                }
                b"LongitudeDegrees" if in_trackpoint => {
                    longitude = Some(read_tcx_f64(&mut reader, &e)?);
                }
                b"AltitudeMeters" if in_trackpoint => {
                    elevation = Some(read_tcx_f64(&mut reader, &e)?);
                }
                _ => {}
            },
            Ok(Event::End(e)) => {
                if e.local_name().as_ref() == b"Trackpoint" {
                    in_trackpoint = false;
                    if let (Some(time), Some(lat), Some(lng)) = (time, latitude, longitude) {
                        out.push(TrackPoint {
                            point: Point::new(lng, lat),
                            time,
                            elevation,
                        });
                    }
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(err) => return Err(SegTimingError::TcxParse(err.to_string())),
        }
        buf.clear();
    }

    Ok(out)
}

fn read_tcx_text<'a>(
    reader: &mut Reader<&'a [u8]>,
    e: &BytesStart,
) -> Result<std::borrow::Cow<'a, str>, SegTimingError> {
    reader
        .read_text(e.name())
        .map_err(|err| SegTimingError::TcxParse(err.to_string()))
}

fn read_tcx_f64(reader: &mut Reader<&[u8]>, e: &BytesStart) -> Result<f64, SegTimingError> {
    let text = read_tcx_text(reader, e)?;
    text.trim()
        .parse::<f64>()
        .map_err(|err| SegTimingError::TcxParse(err.to_string()))
}

fn parse_gpx_trackpoints(input: &[u8]) -> Result<Vec<TrackPoint>, SegTimingError> {
    use std::io::Cursor;

    let mut cursor = Cursor::new(input);
    let gpx = gpx::read(&mut cursor).map_err(|err| SegTimingError::GpxParse(err.to_string()))?;

    let mut out = Vec::new();
    for track in gpx.tracks {
        for segment in track.segments {
            for waypoint in segment.points {
                if let Some(time) = waypoint.time {
                    let iso = time
                        .format()
                        .map_err(|err| SegTimingError::GpxParse(err.to_string()))?;
                    let utc = DateTime::parse_from_rfc3339(&iso)
                        .map_err(|err| SegTimingError::GpxParse(err.to_string()))?
                        .with_timezone(&Utc);
                    out.push(TrackPoint {
                        point: waypoint.point(),
                        time: utc,
                        elevation: waypoint.elevation,
                    });
                }
            }
        }
    }
    Ok(out)
}

fn parse_fit_trackpoints(input: &[u8]) -> Result<Vec<TrackPoint>, SegTimingError> {
    use fitparser::de::from_bytes;
    use fitparser::profile::MesgNum;

    // FIT stores position as signed 32-bit semicircles.
    const SEMICIRCLES_TO_DEG: f64 = 180.0 / 2_147_483_648.0;

    let records = from_bytes(input).map_err(|err| SegTimingError::FitParse(err.to_string()))?;

    let mut out = Vec::new();
    for record in records {
        if record.kind() != MesgNum::Record {
            continue;
        }
        let mut time: Option<DateTime<Utc>> = None;
        let mut latitude: Option<f64> = None;
        let mut longitude: Option<f64> = None;
        let mut elevation: Option<f64> = None;
        for field in record.fields() {
            match field.name() {
                "timestamp" => {
                    if let fitparser::Value::Timestamp(ts) = field.value() {
                        time = Some(ts.with_timezone(&Utc));
                    }
                }
                "position_lat" => {
                    if let Some(val) = fit_value_to_f64(field.value()) {
                        latitude = Some(val * SEMICIRCLES_TO_DEG);
                    }
                }
                "position_long" => {
                    if let Some(val) = fit_value_to_f64(field.value()) {
                        longitude = Some(val * SEMICIRCLES_TO_DEG);
                    }
                }
                "altitude" | "enhanced_altitude" => {
                    if let Some(val) = fit_value_to_f64(field.value()) {
                        elevation = Some(val);
                    }
                }
                _ => {}
            }
        }
        if let (Some(time), Some(lat), Some(lng)) = (time, latitude, longitude) {
            out.push(TrackPoint {
                point: Point::new(lng, lat),
                time,
                elevation,
            });
        }
    }
    Ok(out)
}

fn fit_value_to_f64(value: &fitparser::Value) -> Option<f64> {
    match value {
        fitparser::Value::SInt8(v) => Some(*v as f64),
        fitparser::Value::UInt8(v) => Some(*v as f64),
        fitparser::Value::SInt16(v) => Some(*v as f64),
        fitparser::Value::UInt16(v) => Some(*v as f64),
        fitparser::Value::SInt32(v) => Some(*v as f64),
        fitparser::Value::UInt32(v) => Some(*v as f64),
        fitparser::Value::SInt64(v) => Some(*v as f64),
        fitparser::Value::UInt64(v) => Some(*v as f64),
        fitparser::Value::UInt8z(v) => Some(*v as f64),
        fitparser::Value::UInt16z(v) => Some(*v as f64),
        fitparser::Value::UInt32z(v) => Some(*v as f64),
        fitparser::Value::UInt64z(v) => Some(*v as f64),
        fitparser::Value::Float32(v) => Some(*v as f64),
        fitparser::Value::Float64(v) => Some(*v),
        fitparser::Value::Array(values) => values.iter().find_map(fit_value_to_f64),
        _ => None,
    }
}
