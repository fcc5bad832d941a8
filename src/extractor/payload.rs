// some embed hosts hand the player its sources in the url itself, no browser needed for those
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use url::Url;

use super::AudioStream;

/// looks through every query value for a base64 encoded `[{language, link}]` list
pub fn decode_fast_path(url: &Url) -> Option<Vec<AudioStream>> {
    url.query_pairs()
        .find_map(|(_, value)| decode_payload(&value))
}

pub fn decode_payload(value: &str) -> Option<Vec<AudioStream>> {
    // query_pairs turns an unescaped '+' into a space, put it back before decoding
    let candidate = value.trim().replace(' ', "+");
    if candidate.len() < 8 {
        return None;
    }

    let bytes = [STANDARD, URL_SAFE, STANDARD_NO_PAD, URL_SAFE_NO_PAD]
        .iter()
        .find_map(|engine| engine.decode(candidate.as_bytes()).ok())?;

    let streams: Vec<AudioStream> = serde_json::from_slice(&bytes).ok()?;
    let streams: Vec<AudioStream> = streams
        .into_iter()
        .filter(|s| s.link.starts_with("http://") || s.link.starts_with("https://"))
        .collect();

    if streams.is_empty() { None } else { Some(streams) }
}
