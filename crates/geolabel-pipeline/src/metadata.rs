//! Geospatial metadata reconciliation for sidecar JSON.
//!
//! A sidecar describes one image: its coordinate reference system and the
//! affine pixel-to-world transform, plus whatever else the extraction step
//! recorded. The CRS may be a structured dictionary or a plain string;
//! dictionaries are tried first and strings are the fallback.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::diagnostics::{Notice, NoticeKind, StageMetrics};
use crate::types::PipelineError;

/// Leading keywords of WKT1 and WKT2 CRS definitions.
const WKT_KEYWORDS: &[&str] = &[
    "GEOGCS",
    "PROJCS",
    "GEOCCS",
    "LOCAL_CS",
    "COMPD_CS",
    "GEOGCRS",
    "PROJCRS",
    "GEODCRS",
    "COMPOUNDCRS",
    "BOUNDCRS",
    "ENGCRS",
];

/// A resolved coordinate reference system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Crs {
    /// EPSG authority code.
    Epsg(u32),
    /// PROJ parameter string (`+proj=... +datum=...`).
    Proj(String),
    /// Well-known text, version 1 or 2.
    Wkt(String),
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Epsg(code) => write!(f, "EPSG:{code}"),
            Self::Proj(text) | Self::Wkt(text) => f.write_str(text),
        }
    }
}

/// Six-parameter affine transform from pixel (col, row) to world (x, y).
///
/// `x = a*col + b*row + c`, `y = d*col + e*row + f`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    /// Pixel width in world units.
    pub a: f64,
    /// Row rotation term.
    pub b: f64,
    /// World x of the top-left corner.
    pub c: f64,
    /// Column rotation term.
    pub d: f64,
    /// Pixel height in world units, negative for north-up rasters.
    pub e: f64,
    /// World y of the top-left corner.
    pub f: f64,
}

impl GeoTransform {
    /// Build from `[a, b, c, d, e, f]`, or from the nine-element matrix
    /// form whose last row is `0, 0, 1`.
    ///
    /// The returned flag is `true` when a nine-element form was truncated.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::MalformedMetadata`] for any other length, a
    /// last row other than `0, 0, 1`, or non-finite values.
    pub fn from_slice(values: &[f64]) -> Result<(Self, bool), PipelineError> {
        let truncated = match values.len() {
            6 => false,
            9 if values[6..] == [0.0, 0.0, 1.0] => true,
            9 => {
                return Err(PipelineError::MalformedMetadata(format!(
                    "transform last row must be 0, 0, 1, got {:?}",
                    &values[6..]
                )));
            }
            n => {
                return Err(PipelineError::MalformedMetadata(format!(
                    "transform needs 6 or 9 numbers, got {n}"
                )));
            }
        };
        if values.iter().any(|v| !v.is_finite()) {
            return Err(PipelineError::MalformedMetadata(
                "transform contains non-finite values".to_string(),
            ));
        }
        let transform = Self {
            a: values[0],
            b: values[1],
            c: values[2],
            d: values[3],
            e: values[4],
            f: values[5],
        };
        Ok((transform, truncated))
    }

    /// `[a, b, c, d, e, f]`.
    #[must_use]
    pub const fn to_array(self) -> [f64; 6] {
        [self.a, self.b, self.c, self.d, self.e, self.f]
    }

    /// No rotation or shear, columns running east and rows running south.
    #[must_use]
    pub fn is_north_up(self) -> bool {
        self.b == 0.0 && self.d == 0.0 && self.a > 0.0 && self.e < 0.0
    }

    /// World coordinates of a pixel corner.
    #[must_use]
    pub fn apply(self, col: f64, row: f64) -> (f64, f64) {
        (
            self.a.mul_add(col, self.b.mul_add(row, self.c)),
            self.d.mul_add(col, self.e.mul_add(row, self.f)),
        )
    }
}

/// Georeferencing for one image.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoMetadata {
    /// Coordinate reference system of the world coordinates.
    pub crs: Crs,
    /// Pixel to world mapping.
    pub transform: GeoTransform,
    /// Sidecar keys other than `crs` and `transform`, unchanged.
    pub extra: Map<String, Value>,
}

impl GeoMetadata {
    /// Summary for the metadata stage of [`crate::ImageDiagnostics`].
    #[must_use]
    pub fn stage_metrics(&self) -> StageMetrics {
        StageMetrics::Metadata {
            crs: self.crs.to_string(),
            north_up: self.transform.is_north_up(),
        }
    }
}

#[derive(Deserialize)]
struct Sidecar {
    #[serde(default)]
    crs: Option<Value>,
    #[serde(default)]
    transform: Option<Vec<f64>>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

/// Parse one image's sidecar JSON.
///
/// Notices (string CRS fallback, truncated transform) are tagged with
/// `image`.
///
/// # Errors
///
/// Returns [`PipelineError::UnresolvableCrs`] if the CRS is absent, null or
/// not understood, and [`PipelineError::MalformedMetadata`] if the JSON is
/// invalid or the transform is missing or malformed.
pub fn parse_sidecar(image: &str, bytes: &[u8]) -> Result<(GeoMetadata, Vec<Notice>), PipelineError> {
    let sidecar: Sidecar =
        serde_json::from_slice(bytes).map_err(|e| PipelineError::MalformedMetadata(e.to_string()))?;

    let mut notices = Vec::new();

    let (crs, fallback) = resolve_crs(sidecar.crs.as_ref())?;
    if let Some(kind) = fallback {
        notices.push(Notice::image(image, kind));
    }

    let values = sidecar
        .transform
        .ok_or_else(|| PipelineError::MalformedMetadata("sidecar has no transform".to_string()))?;
    let (transform, truncated) = GeoTransform::from_slice(&values)?;
    if truncated {
        notices.push(Notice::image(image, NoticeKind::TransformTruncated));
    }

    Ok((
        GeoMetadata {
            crs,
            transform,
            extra: sidecar.extra,
        },
        notices,
    ))
}

/// Resolve a sidecar CRS value.
///
/// Returns the CRS and, when it was read from its string form, a
/// [`NoticeKind::CrsStringFallback`].
///
/// # Errors
///
/// Returns [`PipelineError::UnresolvableCrs`] for a missing or `null`
/// value, or one neither interpretation understands.
pub fn resolve_crs(value: Option<&Value>) -> Result<(Crs, Option<NoticeKind>), PipelineError> {
    match value {
        None | Some(Value::Null) => Err(PipelineError::UnresolvableCrs(
            "sidecar has no CRS".to_string(),
        )),
        Some(raw @ Value::Object(map)) => crs_from_dict(map)
            .map(|crs| (crs, None))
            .ok_or_else(|| PipelineError::UnresolvableCrs(format!("unrecognized CRS {raw}"))),
        Some(Value::String(text)) => crs_from_string(text)
            .map(|crs| {
                let notice = NoticeKind::CrsStringFallback {
                    crs: text.trim().to_string(),
                };
                (crs, Some(notice))
            })
            .ok_or_else(|| PipelineError::UnresolvableCrs(format!("unrecognized CRS `{text}`"))),
        Some(other) => Err(PipelineError::UnresolvableCrs(format!(
            "CRS must be an object or a string, got {other}"
        ))),
    }
}

fn crs_from_dict(map: &Map<String, Value>) -> Option<Crs> {
    if let Some(init) = map.get("init").and_then(Value::as_str) {
        return epsg_code(init.trim(), "epsg:").map(Crs::Epsg);
    }

    if let Some(authority) = map.get("authority").and_then(Value::as_str) {
        if !authority.eq_ignore_ascii_case("EPSG") {
            return None;
        }
        return match map.get("code")? {
            Value::Number(n) => n.as_u64().and_then(|c| u32::try_from(c).ok()),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
        .map(Crs::Epsg);
    }

    let proj = map.get("proj")?;
    let mut parts = vec![format!("+proj={}", proj_value(proj)?)];
    let mut rest: Vec<_> = map.iter().filter(|(k, _)| k.as_str() != "proj").collect();
    rest.sort_by(|a, b| a.0.cmp(b.0));
    for (key, value) in rest {
        match value {
            Value::Bool(true) => parts.push(format!("+{key}")),
            Value::Bool(false) | Value::Null => {}
            other => parts.push(format!("+{key}={}", proj_value(other)?)),
        }
    }
    Some(Crs::Proj(parts.join(" ")))
}

fn proj_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn crs_from_string(text: &str) -> Option<Crs> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Some(code) = epsg_code(text, "epsg:") {
        return Some(Crs::Epsg(code));
    }
    if let Some(code) = text
        .split_whitespace()
        .next()
        .and_then(|first| epsg_code(first, "+init=epsg:"))
    {
        return Some(Crs::Epsg(code));
    }
    if text.starts_with('+') && text.contains("proj=") {
        return Some(Crs::Proj(text.to_string()));
    }
    let upper = text.to_ascii_uppercase();
    if text.contains('[') && WKT_KEYWORDS.iter().any(|k| upper.starts_with(k)) {
        return Some(Crs::Wkt(text.to_string()));
    }
    None
}

/// `prefix` matched case-insensitively, followed by a bare code.
fn epsg_code(text: &str, prefix: &str) -> Option<u32> {
    let head = text.get(..prefix.len())?;
    if !head.eq_ignore_ascii_case(prefix) {
        return None;
    }
    text[prefix.len()..].trim().parse().ok()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    const TRANSFORM: &str = "[0.5, 0.0, 500000.0, 0.0, -0.5, 4100000.0]";

    fn sidecar(crs: &str) -> Vec<u8> {
        format!(r#"{{"crs": {crs}, "transform": {TRANSFORM}, "count": 3, "driver": "PNG"}}"#)
            .into_bytes()
    }

    #[test]
    fn dictionary_crs_resolves_without_notice() {
        let (meta, notices) = parse_sidecar("a.png", &sidecar(r#"{"init": "epsg:32633"}"#)).unwrap();
        assert_eq!(meta.crs, Crs::Epsg(32633));
        assert!(notices.is_empty());
        assert!((meta.transform.a - 0.5).abs() < f64::EPSILON);
        assert_eq!(meta.extra["driver"], json!("PNG"));
        assert!(!meta.extra.contains_key("crs"));
    }

    #[test]
    fn string_crs_resolves_via_fallback() {
        let (meta, notices) = parse_sidecar("a.png", &sidecar(r#""EPSG:4326""#)).unwrap();
        assert_eq!(meta.crs, Crs::Epsg(4326));
        assert_eq!(
            notices,
            vec![Notice::image(
                "a.png",
                NoticeKind::CrsStringFallback {
                    crs: "EPSG:4326".to_string()
                }
            )]
        );
    }

    #[test]
    fn null_or_absent_crs_is_unresolvable() {
        assert!(matches!(
            parse_sidecar("a.png", &sidecar("null")),
            Err(PipelineError::UnresolvableCrs(_))
        ));
        let bytes = format!(r#"{{"transform": {TRANSFORM}}}"#).into_bytes();
        assert!(matches!(
            parse_sidecar("a.png", &bytes),
            Err(PipelineError::UnresolvableCrs(_))
        ));
    }

    #[test]
    fn unrecognized_crs_values_are_unresolvable() {
        for crs in [
            json!(""),
            json!("not a crs"),
            json!(4326),
            json!({}),
            json!({"authority": "ESRI", "code": 102_100}),
            json!({"init": "foo:1"}),
        ] {
            assert!(
                matches!(resolve_crs(Some(&crs)), Err(PipelineError::UnresolvableCrs(_))),
                "{crs}"
            );
        }
    }

    #[test]
    fn structured_forms() {
        let (crs, notice) =
            resolve_crs(Some(&json!({"authority": "epsg", "code": "3857"}))).unwrap();
        assert_eq!(crs, Crs::Epsg(3857));
        assert!(notice.is_none());

        let (crs, _) = resolve_crs(Some(&json!({
            "proj": "utm", "zone": 33, "datum": "WGS84", "units": "m", "no_defs": true, "south": false
        })))
        .unwrap();
        assert_eq!(
            crs,
            Crs::Proj("+proj=utm +datum=WGS84 +no_defs +units=m +zone=33".to_string())
        );
    }

    #[test]
    fn string_forms() {
        let cases = [
            ("epsg:32633", Crs::Epsg(32633)),
            ("+init=EPSG:3857", Crs::Epsg(3857)),
            ("+init=epsg:4326 +no_defs", Crs::Epsg(4326)),
            (
                "+proj=longlat +datum=WGS84 +no_defs",
                Crs::Proj("+proj=longlat +datum=WGS84 +no_defs".to_string()),
            ),
            (
                r#"GEOGCS["WGS 84",DATUM["WGS_1984"]]"#,
                Crs::Wkt(r#"GEOGCS["WGS 84",DATUM["WGS_1984"]]"#.to_string()),
            ),
        ];
        for (text, expected) in cases {
            let (crs, notice) = resolve_crs(Some(&json!(text))).unwrap();
            assert_eq!(crs, expected, "{text}");
            assert!(notice.is_some());
        }
    }

    #[test]
    fn nine_element_transform_is_truncated() {
        let bytes = br#"{"crs": "EPSG:4326", "transform": [1, 0, 10, 0, -1, 20, 0, 0, 1]}"#;
        let (meta, notices) = parse_sidecar("a.png", bytes).unwrap();
        assert_eq!(meta.transform.to_array(), [1.0, 0.0, 10.0, 0.0, -1.0, 20.0]);
        assert!(notices.contains(&Notice::image("a.png", NoticeKind::TransformTruncated)));
    }

    #[test]
    fn malformed_transforms() {
        for transform in ["[1, 0, 10, 0, -1]", "[1, 0, 10, 0, -1, 20, 0, 1, 1]", r#""abc""#] {
            let bytes = format!(r#"{{"crs": "EPSG:4326", "transform": {transform}}}"#).into_bytes();
            assert!(
                matches!(
                    parse_sidecar("a.png", &bytes),
                    Err(PipelineError::MalformedMetadata(_))
                ),
                "{transform}"
            );
        }
        let bytes = br#"{"crs": "EPSG:4326"}"#;
        assert!(matches!(
            parse_sidecar("a.png", bytes),
            Err(PipelineError::MalformedMetadata(_))
        ));
    }

    #[test]
    fn invalid_json_is_malformed() {
        assert!(matches!(
            parse_sidecar("a.png", b"{not json"),
            Err(PipelineError::MalformedMetadata(_))
        ));
    }

    #[test]
    fn transform_helpers() {
        let (t, _) = GeoTransform::from_slice(&[2.0, 0.0, 100.0, 0.0, -2.0, 50.0]).unwrap();
        assert!(t.is_north_up());
        assert_eq!(t.apply(3.0, 4.0), (106.0, 42.0));
        let (rotated, _) = GeoTransform::from_slice(&[1.0, 0.5, 0.0, 0.5, -1.0, 0.0]).unwrap();
        assert!(!rotated.is_north_up());
        let (south_up, _) = GeoTransform::from_slice(&[2.0, 0.0, 100.0, 0.0, 2.0, 50.0]).unwrap();
        assert!(!south_up.is_north_up());
        let (mirrored, _) = GeoTransform::from_slice(&[-2.0, 0.0, 100.0, 0.0, -2.0, 50.0]).unwrap();
        assert!(!mirrored.is_north_up());
    }

    #[test]
    fn crs_display() {
        assert_eq!(Crs::Epsg(4326).to_string(), "EPSG:4326");
        assert_eq!(Crs::Proj("+proj=utm".to_string()).to_string(), "+proj=utm");
    }
}
