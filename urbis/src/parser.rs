//! WKT and GeoJSON input/output.
//!
//! Parsing accepts the geometry subset the index stores (Point,
//! LineString/Polyline, Polygon with holes) from WKT text and from RFC 7946
//! GeoJSON (bare geometry, `Feature`, or `FeatureCollection`). Recognised
//! WKT variants outside that subset report `Unsupported`; malformed input
//! reports `Parse` with a line and column. Exporters emit the same subset
//! with six fractional digits.

use bytes::Bytes;
use serde_json::{Map, Value};
use std::fmt::Write as _;

use crate::error::{UrbisError, UrbisResult};
use crate::geometry::{Geometry, Point, Polygon, Polyline, SpatialObject};

// ============================================================================
// WKT Parsing
// ============================================================================

/// Character cursor that tracks line and column for error reporting.
struct Cursor<'a> {
    input: &'a [u8],
    pos: usize,
    line: usize,
    column: usize,
}

impl<'a> Cursor<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input: input.as_bytes(),
            pos: 0,
            line: 1,
            column: 1,
        }
    }

    fn error(&self, message: impl Into<String>) -> UrbisError {
        UrbisError::parse_at(self.line, self.column, message)
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn advance(&mut self) -> Option<u8> {
        let byte = self.peek()?;
        self.pos += 1;
        if byte == b'\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(byte)
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\r' | b'\n')) {
            self.advance();
        }
    }

    fn expect(&mut self, expected: u8) -> UrbisResult<()> {
        self.skip_whitespace();
        match self.peek() {
            Some(byte) if byte == expected => {
                self.advance();
                Ok(())
            }
            Some(byte) => Err(self.error(format!(
                "expected '{}', found '{}'",
                expected as char, byte as char
            ))),
            None => Err(self.error(format!("expected '{}', found end of input", expected as char))),
        }
    }

    fn consume_if(&mut self, expected: u8) -> bool {
        self.skip_whitespace();
        if self.peek() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    /// Reads an uppercase keyword of ASCII letters.
    fn keyword(&mut self) -> String {
        self.skip_whitespace();
        let mut word = String::new();
        while let Some(byte) = self.peek() {
            if byte.is_ascii_alphabetic() {
                word.push((byte as char).to_ascii_uppercase());
                self.advance();
            } else {
                break;
            }
        }
        word
    }

    fn number(&mut self) -> UrbisResult<f64> {
        self.skip_whitespace();
        let start = self.pos;
        while let Some(byte) = self.peek() {
            if byte.is_ascii_digit() || matches!(byte, b'+' | b'-' | b'.' | b'e' | b'E') {
                self.advance();
            } else {
                break;
            }
        }
        if start == self.pos {
            return Err(self.error("expected a number"));
        }
        std::str::from_utf8(&self.input[start..self.pos])
            .ok()
            .and_then(|s| s.parse::<f64>().ok())
            .ok_or_else(|| self.error("malformed number"))
    }

    fn at_end(&mut self) -> bool {
        self.skip_whitespace();
        self.pos >= self.input.len()
    }
}

/// Parses a coordinate pair: `x y`.
fn parse_wkt_coord(cursor: &mut Cursor) -> UrbisResult<Point> {
    let x = cursor.number()?;
    let y = cursor.number()?;
    Ok(Point::new(x, y))
}

/// Parses a parenthesised, comma-separated coordinate list.
fn parse_wkt_coord_list(cursor: &mut Cursor) -> UrbisResult<Vec<Point>> {
    cursor.expect(b'(')?;
    let mut coords = vec![parse_wkt_coord(cursor)?];
    while cursor.consume_if(b',') {
        coords.push(parse_wkt_coord(cursor)?);
    }
    cursor.expect(b')')?;
    Ok(coords)
}

/// WKT variants recognised but outside the supported subset.
const UNSUPPORTED_WKT: &[&str] = &[
    "MULTIPOINT",
    "MULTILINESTRING",
    "MULTIPOLYGON",
    "GEOMETRYCOLLECTION",
];

/// Parses a WKT geometry.
///
/// Supported: `POINT(x y)`, `LINESTRING(x y, …)`,
/// `POLYGON((x y, …), (hole, …))`. Keywords are case-insensitive.
///
/// # Errors
/// `Unsupported` for recognised multi-geometry variants, `Parse` with
/// line/column for anything malformed.
pub fn parse_wkt(input: &str) -> UrbisResult<Geometry> {
    let mut cursor = Cursor::new(input);
    let keyword = cursor.keyword();

    let geom = match keyword.as_str() {
        "POINT" => {
            cursor.expect(b'(')?;
            let p = parse_wkt_coord(&mut cursor)?;
            cursor.expect(b')')?;
            Geometry::Point(p)
        }
        "LINESTRING" => {
            let coords = parse_wkt_coord_list(&mut cursor)?;
            Geometry::Polyline(Polyline::new(coords)?)
        }
        "POLYGON" => {
            cursor.expect(b'(')?;
            let exterior = parse_wkt_coord_list(&mut cursor)?;
            let mut holes = Vec::new();
            while cursor.consume_if(b',') {
                holes.push(parse_wkt_coord_list(&mut cursor)?);
            }
            cursor.expect(b')')?;
            Geometry::Polygon(Polygon::with_holes(exterior, holes)?)
        }
        other if UNSUPPORTED_WKT.contains(&other) => {
            return Err(UrbisError::Unsupported(format!("WKT {}", other)));
        }
        other => {
            return Err(cursor.error(format!("unknown WKT geometry type '{}'", other)));
        }
    };

    if !cursor.at_end() {
        return Err(cursor.error("trailing input after geometry"));
    }
    Ok(geom)
}

// ============================================================================
// GeoJSON Parsing
// ============================================================================

fn semantic_error(message: impl Into<String>) -> UrbisError {
    UrbisError::parse_at(0, 0, message)
}

fn json_position(value: &Value) -> Option<f64> {
    value.as_f64()
}

/// Decodes a GeoJSON `[x, y, …]` position; extra dimensions are ignored.
fn parse_position(value: &Value) -> UrbisResult<Point> {
    let coords = value
        .as_array()
        .ok_or_else(|| semantic_error("position must be an array"))?;
    if coords.len() < 2 {
        return Err(semantic_error("position needs at least two coordinates"));
    }
    let x = json_position(&coords[0])
        .ok_or_else(|| semantic_error("non-numeric x coordinate"))?;
    let y = json_position(&coords[1])
        .ok_or_else(|| semantic_error("non-numeric y coordinate"))?;
    Ok(Point::new(x, y))
}

fn parse_position_list(value: &Value) -> UrbisResult<Vec<Point>> {
    value
        .as_array()
        .ok_or_else(|| semantic_error("coordinate list must be an array"))?
        .iter()
        .map(parse_position)
        .collect()
}

/// Converts a GeoJSON geometry object to a [`Geometry`].
fn parse_geometry_value(value: &Value) -> UrbisResult<Geometry> {
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| semantic_error("geometry has no type"))?;
    let coordinates = value
        .get("coordinates")
        .ok_or_else(|| semantic_error(format!("{} has no coordinates", kind)))?;

    match kind {
        "Point" => Ok(Geometry::Point(parse_position(coordinates)?)),
        "LineString" => Ok(Geometry::Polyline(Polyline::new(parse_position_list(
            coordinates,
        )?)?)),
        "Polygon" => {
            let rings = coordinates
                .as_array()
                .ok_or_else(|| semantic_error("Polygon coordinates must be an array of rings"))?;
            let mut iter = rings.iter();
            let exterior = match iter.next() {
                Some(ring) => parse_position_list(ring)?,
                None => return Err(semantic_error("Polygon has no exterior ring")),
            };
            let holes: Vec<Vec<Point>> =
                iter.map(parse_position_list).collect::<UrbisResult<_>>()?;
            Ok(Geometry::Polygon(Polygon::with_holes(exterior, holes)?))
        }
        other => Err(UrbisError::Unsupported(format!("GeoJSON {}", other))),
    }
}

/// Converts a `Feature` object to a [`SpatialObject`].
///
/// Numeric feature ids become the object id; string ids are preserved in
/// the property blob under the `"id"` key. The `properties` object is
/// carried verbatim as compact JSON in the opaque blob.
fn parse_feature(feature: &Value) -> UrbisResult<SpatialObject> {
    let geometry = feature
        .get("geometry")
        .ok_or_else(|| semantic_error("Feature has no geometry"))?;
    let mut obj = SpatialObject::new(0, parse_geometry_value(geometry)?);

    let mut properties = match feature.get("properties") {
        Some(Value::Object(map)) => map.clone(),
        _ => Map::new(),
    };
    match feature.get("id") {
        Some(Value::Number(n)) => {
            if let Some(id) = n.as_u64() {
                obj.set_id(id);
            }
        }
        Some(Value::String(s)) => {
            properties
                .entry("id".to_string())
                .or_insert_with(|| Value::String(s.clone()));
        }
        _ => {}
    }
    if !properties.is_empty() {
        let blob = serde_json::to_vec(&Value::Object(properties))
            .map_err(|e| semantic_error(e.to_string()))?;
        obj.set_properties(Bytes::from(blob));
    }
    Ok(obj)
}

/// Parses GeoJSON text into spatial objects.
///
/// Accepts a bare geometry, a `Feature`, or a `FeatureCollection`; a single
/// input always yields a one-element vector.
///
/// # Errors
/// `Parse` (with the tokenizer's line/column for syntax errors),
/// `Unsupported` for geometry types outside the stored subset,
/// `InvalidGeometry` when a geometry fails construction.
pub fn parse_geojson(input: &str) -> UrbisResult<Vec<SpatialObject>> {
    let value: Value = serde_json::from_str(input)
        .map_err(|e| UrbisError::parse_at(e.line(), e.column(), e.to_string()))?;

    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| semantic_error("GeoJSON object has no type"))?;

    match kind {
        "FeatureCollection" => {
            let features = value
                .get("features")
                .and_then(Value::as_array)
                .ok_or_else(|| semantic_error("FeatureCollection has no features array"))?;
            features.iter().map(parse_feature).collect()
        }
        "Feature" => Ok(vec![parse_feature(&value)?]),
        _ => Ok(vec![SpatialObject::new(0, parse_geometry_value(&value)?)]),
    }
}

// ============================================================================
// Export
// ============================================================================

fn write_geojson_positions(out: &mut String, points: &[Point]) {
    out.push('[');
    for (i, p) in points.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        let _ = write!(out, "[{:.6},{:.6}]", p.x, p.y);
    }
    out.push(']');
}

/// Emits a GeoJSON geometry object with six fractional digits.
pub fn export_geojson_geometry(geom: &Geometry) -> String {
    let mut out = String::new();
    match geom {
        Geometry::Point(p) => {
            let _ = write!(
                out,
                "{{\"type\":\"Point\",\"coordinates\":[{:.6},{:.6}]}}",
                p.x, p.y
            );
        }
        Geometry::Polyline(line) => {
            out.push_str("{\"type\":\"LineString\",\"coordinates\":");
            write_geojson_positions(&mut out, line.vertices());
            out.push('}');
        }
        Geometry::Polygon(poly) => {
            out.push_str("{\"type\":\"Polygon\",\"coordinates\":[");
            write_geojson_positions(&mut out, poly.exterior());
            for hole in poly.holes() {
                out.push(',');
                write_geojson_positions(&mut out, hole);
            }
            out.push_str("]}");
        }
    }
    out
}

/// Emits a GeoJSON `Feature` for the object: assigned ids become the
/// feature id, and a property blob holding valid JSON rides along as the
/// `properties` object.
pub fn export_geojson(obj: &SpatialObject) -> String {
    let mut out = String::from("{\"type\":\"Feature\",");
    if obj.id() != 0 {
        let _ = write!(out, "\"id\":{},", obj.id());
    }
    out.push_str("\"geometry\":");
    out.push_str(&export_geojson_geometry(obj.geometry()));
    out.push_str(",\"properties\":");
    match serde_json::from_slice::<Value>(obj.properties()) {
        Ok(value @ Value::Object(_)) => {
            out.push_str(&value.to_string());
        }
        _ => out.push_str("null"),
    }
    out.push('}');
    out
}

fn write_wkt_coords(out: &mut String, points: &[Point]) {
    for (i, p) in points.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        let _ = write!(out, "{:.6} {:.6}", p.x, p.y);
    }
}

/// Emits WKT with six fractional digits.
pub fn export_wkt(geom: &Geometry) -> String {
    let mut out = String::new();
    match geom {
        Geometry::Point(p) => {
            let _ = write!(out, "POINT ({:.6} {:.6})", p.x, p.y);
        }
        Geometry::Polyline(line) => {
            out.push_str("LINESTRING (");
            write_wkt_coords(&mut out, line.vertices());
            out.push(')');
        }
        Geometry::Polygon(poly) => {
            out.push_str("POLYGON ((");
            write_wkt_coords(&mut out, poly.exterior());
            out.push(')');
            for hole in poly.holes() {
                out.push_str(", (");
                write_wkt_coords(&mut out, hole);
                out.push(')');
            }
            out.push(')');
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::GeometryKind;

    // ========================================================================
    // WKT
    // ========================================================================

    #[test]
    fn test_parse_wkt_point() {
        let geom = parse_wkt("POINT(1.5 -2.5)").unwrap();
        assert_eq!(geom, Geometry::Point(Point::new(1.5, -2.5)));

        // Whitespace and case are tolerated.
        let geom = parse_wkt("  point ( 1.5  -2.5 ) ").unwrap();
        assert_eq!(geom, Geometry::Point(Point::new(1.5, -2.5)));
    }

    #[test]
    fn test_parse_wkt_linestring() {
        let geom = parse_wkt("LINESTRING(0 0, 10 0, 10 10)").unwrap();
        match geom {
            Geometry::Polyline(line) => {
                assert_eq!(line.vertices().len(), 3);
                assert_eq!(line.vertices()[2], Point::new(10.0, 10.0));
            }
            other => panic!("expected polyline, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_wkt_polygon_with_hole() {
        let geom =
            parse_wkt("POLYGON((0 0, 10 0, 10 10, 0 10, 0 0), (2 2, 4 2, 4 4, 2 4, 2 2))").unwrap();
        match geom {
            Geometry::Polygon(poly) => {
                assert_eq!(poly.exterior().len(), 5);
                assert_eq!(poly.holes().len(), 1);
            }
            other => panic!("expected polygon, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_wkt_unsupported_variants() {
        for wkt in [
            "MULTIPOINT((0 0), (1 1))",
            "MULTILINESTRING((0 0, 1 1))",
            "MULTIPOLYGON(((0 0, 1 0, 0 1)))",
            "GEOMETRYCOLLECTION(POINT(0 0))",
        ] {
            assert!(
                matches!(parse_wkt(wkt), Err(UrbisError::Unsupported(_))),
                "{} should be unsupported",
                wkt
            );
        }
    }

    #[test]
    fn test_parse_wkt_syntax_errors_carry_position() {
        match parse_wkt("POINT(1.5)") {
            Err(UrbisError::Parse { line, column, .. }) => {
                assert_eq!(line, 1);
                assert!(column > 1);
            }
            other => panic!("expected parse error, got {:?}", other),
        }

        assert!(matches!(
            parse_wkt("CIRCLE(0 0, 5)"),
            Err(UrbisError::Parse { .. })
        ));
        assert!(matches!(
            parse_wkt("POINT(1 2) extra"),
            Err(UrbisError::Parse { .. })
        ));
    }

    #[test]
    fn test_parse_wkt_polygon_too_small() {
        assert!(matches!(
            parse_wkt("POLYGON((0 0, 1 1))"),
            Err(UrbisError::InvalidGeometry(_))
        ));
    }

    #[test]
    fn test_wkt_round_trip() {
        let original = parse_wkt("POLYGON ((0.000000 0.000000, 10.000000 0.000000, 10.000000 10.000000, 0.000000 10.000000, 0.000000 0.000000))").unwrap();
        let exported = export_wkt(&original);
        let reparsed = parse_wkt(&exported).unwrap();
        assert_eq!(original, reparsed);
    }

    #[test]
    fn test_export_wkt_formatting() {
        let geom = Geometry::Point(Point::new(1.0, 2.5));
        assert_eq!(export_wkt(&geom), "POINT (1.000000 2.500000)");

        let line = Geometry::Polyline(
            Polyline::new(vec![Point::new(0.0, 0.0), Point::new(1.0, 1.0)]).unwrap(),
        );
        assert_eq!(
            export_wkt(&line),
            "LINESTRING (0.000000 0.000000, 1.000000 1.000000)"
        );
    }

    // ========================================================================
    // GeoJSON
    // ========================================================================

    #[test]
    fn test_parse_geojson_bare_point() {
        let objs = parse_geojson(r#"{"type":"Point","coordinates":[1.0, 2.0]}"#).unwrap();
        assert_eq!(objs.len(), 1);
        assert_eq!(objs[0].kind(), GeometryKind::Point);
        assert_eq!(objs[0].centroid(), Point::new(1.0, 2.0));
    }

    #[test]
    fn test_parse_geojson_linestring() {
        let objs =
            parse_geojson(r#"{"type":"LineString","coordinates":[[0,0],[10,0]]}"#).unwrap();
        assert_eq!(objs[0].kind(), GeometryKind::Polyline);
        assert_eq!(objs[0].centroid(), Point::new(5.0, 0.0));
    }

    #[test]
    fn test_parse_geojson_polygon_with_hole() {
        let json = r#"{
            "type": "Polygon",
            "coordinates": [
                [[0,0],[10,0],[10,10],[0,10],[0,0]],
                [[2,2],[4,2],[4,4],[2,4],[2,2]]
            ]
        }"#;
        let objs = parse_geojson(json).unwrap();
        match objs[0].geometry() {
            Geometry::Polygon(poly) => {
                assert_eq!(poly.holes().len(), 1);
                assert!((poly.area() - 96.0).abs() < 1e-9);
            }
            other => panic!("expected polygon, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_geojson_feature_numeric_id_and_properties() {
        let json = r#"{
            "type": "Feature",
            "id": 42,
            "geometry": {"type":"Point","coordinates":[3.0,4.0]},
            "properties": {"name":"hydrant","height":2.5}
        }"#;
        let objs = parse_geojson(json).unwrap();
        assert_eq!(objs[0].id(), 42);
        let props: Value = serde_json::from_slice(objs[0].properties()).unwrap();
        assert_eq!(props["name"], "hydrant");
    }

    #[test]
    fn test_parse_geojson_feature_string_id_preserved() {
        let json = r#"{
            "type": "Feature",
            "id": "way/123",
            "geometry": {"type":"Point","coordinates":[0,0]},
            "properties": {}
        }"#;
        let objs = parse_geojson(json).unwrap();
        assert_eq!(objs[0].id(), 0);
        let props: Value = serde_json::from_slice(objs[0].properties()).unwrap();
        assert_eq!(props["id"], "way/123");
    }

    #[test]
    fn test_parse_geojson_feature_collection() {
        let json = r#"{
            "type": "FeatureCollection",
            "features": [
                {"type":"Feature","geometry":{"type":"Point","coordinates":[0,0]},"properties":null},
                {"type":"Feature","geometry":{"type":"Point","coordinates":[1,1]},"properties":null}
            ]
        }"#;
        let objs = parse_geojson(json).unwrap();
        assert_eq!(objs.len(), 2);
    }

    #[test]
    fn test_parse_geojson_malformed_reports_position() {
        match parse_geojson("{\n  \"type\": oops\n}") {
            Err(UrbisError::Parse { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_geojson_unsupported_type() {
        let err = parse_geojson(r#"{"type":"MultiPoint","coordinates":[[0,0]]}"#);
        assert!(matches!(err, Err(UrbisError::Unsupported(_))));
    }

    #[test]
    fn test_parse_geojson_non_numeric_coordinate() {
        let err = parse_geojson(r#"{"type":"Point","coordinates":["a", 2]}"#);
        assert!(matches!(err, Err(UrbisError::Parse { .. })));
    }

    #[test]
    fn test_geojson_round_trip_with_properties() {
        let mut obj = SpatialObject::point(1.25, -3.5);
        obj.set_id(9);
        obj.set_properties(Bytes::from_static(b"{\"name\":\"plaza\"}"));

        let exported = export_geojson(&obj);
        let reparsed = parse_geojson(&exported).unwrap();
        assert_eq!(reparsed.len(), 1);
        assert_eq!(reparsed[0].id(), 9);
        assert_eq!(reparsed[0].centroid(), Point::new(1.25, -3.5));
        let props: Value = serde_json::from_slice(reparsed[0].properties()).unwrap();
        assert_eq!(props["name"], "plaza");
    }

    #[test]
    fn test_geojson_round_trip_rounds_to_six_digits() {
        let obj = SpatialObject::point(1.123456789, 2.0);
        let reparsed = parse_geojson(&export_geojson(&obj)).unwrap();
        assert!((reparsed[0].centroid().x - 1.123457).abs() < 1e-9);
    }

    #[test]
    fn test_export_geojson_geometry_shapes() {
        let geom = Geometry::Point(Point::new(1.0, 2.0));
        assert_eq!(
            export_geojson_geometry(&geom),
            "{\"type\":\"Point\",\"coordinates\":[1.000000,2.000000]}"
        );

        let poly = Geometry::Polygon(
            Polygon::new(vec![
                Point::new(0.0, 0.0),
                Point::new(1.0, 0.0),
                Point::new(0.0, 1.0),
            ])
            .unwrap(),
        );
        let out = export_geojson_geometry(&poly);
        assert!(out.starts_with("{\"type\":\"Polygon\""));
        // Exported geometry parses back.
        assert!(parse_geojson(&out).is_ok());
    }
}
