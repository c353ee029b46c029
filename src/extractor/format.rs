//! Format selection over the tool's info JSON.
//!
//! Only direct http(s) formats carrying both audio and video qualify for
//! the progressive pick. MP4 and H.264 earn a small fixed bonus, height
//! counts up to 4K, and anything at or above the preferred height gets a
//! large jump so 720p+ wins whenever one exists. When nothing qualifies
//! the pick falls back to `requested_formats`, then the top-level `url`.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use url::Url;

use crate::models::{JobOptions, ResolvedMedia};

/// Lifetime assumed for stream URLs that carry no expiry of their own.
const DEFAULT_LINK_TTL_SECONDS: i64 = 3600;

const CONTAINER_BONUS: i64 = 10;
const CODEC_BONUS: i64 = 10;
const PREFERRED_HEIGHT_BONUS: i64 = 200;
const MAX_HEIGHT_SCORE: i64 = 2160;

/// Turn the tool's info JSON into the job payload, or `None` when no
/// usable format exists.
pub fn resolve_media(info: &Value, options: &JobOptions) -> Option<ResolvedMedia> {
    let chosen = pick_format(info, options)?;
    let stream_url = chosen.get("url")?.as_str()?.to_string();
    let expires_at = parse_expiry(&stream_url, Utc::now());
    let quality = quality_label(chosen);
    let ext = extension(chosen);
    let mime = if options.audio_only {
        format!("audio/{ext}")
    } else {
        format!("video/{ext}")
    };
    Some(ResolvedMedia {
        video_id: info.get("id").and_then(Value::as_str).map(str::to_string),
        stream_url,
        expires_at,
        quality,
        mime,
        title: info.get("title").and_then(Value::as_str).map(str::to_string),
        duration_seconds: info.get("duration").and_then(Value::as_f64),
    })
}

/// Pick the best format entry out of the info JSON.
pub fn pick_format<'a>(info: &'a Value, options: &JobOptions) -> Option<&'a Value> {
    if let Some(formats) = info.get("formats").and_then(Value::as_array) {
        let best = if options.audio_only {
            best_audio(formats)
        } else {
            best_progressive(formats, options.effective_min_height())
        };
        if best.is_some() {
            return best;
        }
    }
    if let Some(requested) = info.get("requested_formats").and_then(Value::as_array) {
        if let Some(format) = requested
            .iter()
            .find(|f| f.get("url").and_then(Value::as_str).is_some())
        {
            return Some(format);
        }
    }
    if info.get("url").and_then(Value::as_str).is_some() {
        return Some(info);
    }
    None
}

fn best_progressive<'a>(formats: &'a [Value], min_height: u32) -> Option<&'a Value> {
    let mut best = None;
    let mut best_score = i64::MIN;
    for format in formats {
        if format.get("url").and_then(Value::as_str).is_none() {
            continue;
        }
        let vcodec = lower(format, "vcodec");
        let acodec = lower(format, "acodec");
        if vcodec == "none" || acodec == "none" {
            continue;
        }
        if !lower(format, "protocol").starts_with("http") {
            continue;
        }
        let height = format.get("height").and_then(Value::as_i64).unwrap_or(0);

        let mut score = height.min(MAX_HEIGHT_SCORE);
        if lower(format, "ext") == "mp4" {
            score += CONTAINER_BONUS;
        }
        if vcodec.starts_with("avc") || vcodec.contains("h264") {
            score += CODEC_BONUS;
        }
        if height >= i64::from(min_height) {
            score += PREFERRED_HEIGHT_BONUS;
        }
        if score > best_score {
            best_score = score;
            best = Some(format);
        }
    }
    best
}

fn best_audio<'a>(formats: &'a [Value]) -> Option<&'a Value> {
    let mut best = None;
    let mut best_score = f64::MIN;
    for format in formats {
        if format.get("url").and_then(Value::as_str).is_none() {
            continue;
        }
        let acodec = lower(format, "acodec");
        if lower(format, "vcodec") != "none" || acodec == "none" || acodec.is_empty() {
            continue;
        }
        if !lower(format, "protocol").starts_with("http") {
            continue;
        }
        let mut score = format.get("abr").and_then(Value::as_f64).unwrap_or(0.0);
        if lower(format, "ext") == "m4a" {
            score += 10.0;
        }
        if score > best_score {
            best_score = score;
            best = Some(format);
        }
    }
    best
}

/// Expiry baked into the stream URL's `expire` query parameter, else
/// `now` plus the default TTL.
pub fn parse_expiry(stream_url: &str, now: DateTime<Utc>) -> DateTime<Utc> {
    if let Ok(url) = Url::parse(stream_url) {
        for (key, value) in url.query_pairs() {
            if key == "expire" {
                if let Some(expiry) = value
                    .parse::<i64>()
                    .ok()
                    .and_then(|epoch| Utc.timestamp_opt(epoch, 0).single())
                {
                    return expiry;
                }
            }
        }
    }
    now + chrono::Duration::seconds(DEFAULT_LINK_TTL_SECONDS)
}

fn quality_label(format: &Value) -> String {
    if let Some(note) = format.get("format_note").and_then(Value::as_str) {
        if !note.is_empty() {
            return note.to_string();
        }
    }
    if let Some(height) = format.get("height").and_then(Value::as_i64) {
        if height > 0 {
            return format!("{height}p");
        }
    }
    "unknown".to_string()
}

fn extension(format: &Value) -> String {
    let ext = lower(format, "ext");
    if ext.is_empty() {
        "mp4".to_string()
    } else {
        ext
    }
}

fn lower(format: &Value, key: &str) -> String {
    format
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_ascii_lowercase()
}
