//! Google News hands out its own `news.google.com/rss/articles/<id>` links
//! instead of publisher URLs. Older ids embed the publisher URL directly;
//! newer ones (prefixed `AU_yqL`) can only be resolved through Google's
//! `batchexecute` endpoint with the signature found on the article page.

use std::sync::OnceLock;

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::{DecodePaddingMode, Engine};
use regex::Regex;
use serde_json::{json, Value};
use url::Url;

pub const BATCH_EXECUTE_URL: &str = "https://news.google.com/_/DotsSplashUi/data/batchexecute";

const ID_PREFIX: &[u8] = &[0x08, 0x13, 0x22];
const ID_SUFFIX: &[u8] = &[0xd2, 0x01, 0x00];
const SIGNED_ID_MARKER: &str = "AU_yqL";

const ARTICLE_ID: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// Article id of a Google News link, `None` for any other link.
pub fn article_id(link: &str) -> Option<String> {
    let url = Url::parse(link).ok()?;
    if url.host_str() != Some("news.google.com") {
        return None;
    }
    let segments: Vec<&str> = url.path_segments()?.collect();
    let position = segments.iter().position(|s| *s == "articles" || *s == "read")?;
    segments
        .get(position + 1)
        .filter(|id| !id.is_empty())
        .map(|id| id.to_string())
}

/// Publisher URL embedded in an old-style article id. Signed ids and
/// anything that does not decode to an http(s) URL give `None`.
pub fn decode_embedded(id: &str) -> Option<String> {
    let bytes = ARTICLE_ID.decode(id.trim_end_matches('=')).ok()?;
    let mut body = bytes.strip_prefix(ID_PREFIX).unwrap_or(&bytes);
    body = body.strip_suffix(ID_SUFFIX).unwrap_or(body);

    let (length, header) = read_varint(body)?;
    let rest = &body[header..];
    let payload = rest.get(..length).unwrap_or(rest);
    let decoded = String::from_utf8(payload.to_vec()).ok()?;

    if decoded.starts_with(SIGNED_ID_MARKER) || !decoded.starts_with("http") {
        return None;
    }
    Some(decoded)
}

/// Protobuf varint: value and number of bytes it took.
fn read_varint(bytes: &[u8]) -> Option<(usize, usize)> {
    let mut value = 0usize;
    for (i, byte) in bytes.iter().take(4).enumerate() {
        value |= ((byte & 0x7f) as usize) << (7 * i);
        if byte & 0x80 == 0 {
            return Some((value, i + 1));
        }
    }
    None
}

/// Signature and timestamp Google embeds in an article page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningParams {
    pub signature: String,
    pub timestamp: String,
}

pub fn signing_params(html: &str) -> Option<SigningParams> {
    static SIGNATURE: OnceLock<Regex> = OnceLock::new();
    static TIMESTAMP: OnceLock<Regex> = OnceLock::new();
    let signature = SIGNATURE
        .get_or_init(|| Regex::new(r#"data-n-a-sg="([^"]+)""#).expect("valid regex"))
        .captures(html)?;
    let timestamp = TIMESTAMP
        .get_or_init(|| Regex::new(r#"data-n-a-ts="(\d+)""#).expect("valid regex"))
        .captures(html)?;
    Some(SigningParams {
        signature: signature[1].to_string(),
        timestamp: timestamp[1].to_string(),
    })
}

/// The `f.req` form value asking `batchexecute` to resolve one article id.
pub fn batch_execute_request(id: &str, params: &SigningParams) -> String {
    let inner = format!(
        r#"["garturlreq",[["X","X",["X","X"],null,null,1,1,"US:en",null,1,null,null,null,null,null,0,1],"X","X",1,[1,1,1],1,1,null,0,0,null,0],{},{},{}]"#,
        Value::from(id),
        params.timestamp,
        Value::from(params.signature.as_str()),
    );
    json!([[["Fbv4je", inner, null, "generic"]]]).to_string()
}

/// Publisher URL from a `batchexecute` response body.
pub fn parse_batch_execute(body: &str) -> Option<String> {
    let chunk = body.split("\n\n").nth(1)?;
    let outer: Value = serde_json::from_str(chunk.trim()).ok()?;
    let inner: Value = serde_json::from_str(outer.get(0)?.get(2)?.as_str()?).ok()?;
    inner
        .get(1)?
        .as_str()
        .filter(|url| url.starts_with("http"))
        .map(str::to_string)
}
