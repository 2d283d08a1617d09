// src/ingest/types.rs
use chrono::{DateTime, Utc};
use geo::{Centroid, Coord, LineString, MapCoords, Point, Polygon};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::IngestError;

/// `[longitude, latitude]`, GeoJSON order.
pub type Position = [f64; 2];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    // v2.1 sends numeric ids, v3 sends slugs
    #[serde(deserialize_with = "id_from_number_or_string")]
    pub id: String,
    #[serde(default)]
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    pub id: String,
    #[serde(default)]
    pub url: Option<String>,
}

/// Coordinate payload as the feed sends it. The nesting depth tells the
/// variants apart; whether it agrees with the declared kind is checked
/// during conversion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Coordinates {
    Point(Position),
    Path(Vec<Position>),
    Rings(Vec<Vec<Position>>),
}

impl Coordinates {
    pub fn map_positions<F>(&self, mut f: F) -> Coordinates
    where
        F: FnMut(Position) -> Position,
    {
        match self {
            Coordinates::Point(p) => Coordinates::Point(f(*p)),
            Coordinates::Path(ps) => Coordinates::Path(ps.iter().map(|p| f(*p)).collect()),
            Coordinates::Rings(rings) => Coordinates::Rings(
                rings
                    .iter()
                    .map(|r| r.iter().map(|p| f(*p)).collect())
                    .collect(),
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawGeometry {
    pub date: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub coordinates: Coordinates,
}

/// One event exactly as received from the hazard feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawFeedEvent {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub closed: Option<String>,
    #[serde(default)]
    pub categories: Vec<Category>,
    #[serde(default)]
    pub sources: Vec<SourceRef>,
    #[serde(default, alias = "geometry")]
    pub geometries: Vec<RawGeometry>,
}

/// Canonical geometry backed by `geo` types. Serialized GeoJSON style
/// (`{"type": .., "coordinates": ..}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "GeoJsonGeometry", from = "GeoJsonGeometry")]
pub enum Geometry {
    Point(Point<f64>),
    LineString(LineString<f64>),
    Polygon(Polygon<f64>),
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "type", content = "coordinates")]
enum GeoJsonGeometry {
    Point(Position),
    LineString(Vec<Position>),
    Polygon(Vec<Vec<Position>>),
}

fn positions(ls: &LineString<f64>) -> Vec<Position> {
    ls.coords().map(|c| [c.x, c.y]).collect()
}

impl From<Geometry> for GeoJsonGeometry {
    fn from(g: Geometry) -> Self {
        match g {
            Geometry::Point(p) => GeoJsonGeometry::Point([p.x(), p.y()]),
            Geometry::LineString(ls) => GeoJsonGeometry::LineString(positions(&ls)),
            Geometry::Polygon(poly) => {
                let mut rings = Vec::with_capacity(1 + poly.interiors().len());
                if !poly.exterior().0.is_empty() {
                    rings.push(positions(poly.exterior()));
                }
                rings.extend(poly.interiors().iter().map(positions));
                GeoJsonGeometry::Polygon(rings)
            }
        }
    }
}

impl From<GeoJsonGeometry> for Geometry {
    fn from(g: GeoJsonGeometry) -> Self {
        match g {
            GeoJsonGeometry::Point(p) => Geometry::point(p),
            GeoJsonGeometry::LineString(ps) => Geometry::line_string(ps),
            GeoJsonGeometry::Polygon(rings) => Geometry::polygon(rings),
        }
    }
}

impl Geometry {
    pub fn point(p: Position) -> Self {
        Geometry::Point(Point::from(p))
    }

    pub fn line_string(ps: Vec<Position>) -> Self {
        Geometry::LineString(LineString::from(ps))
    }

    /// First ring is the exterior; an open ring is closed.
    pub fn polygon(rings: Vec<Vec<Position>>) -> Self {
        let mut rings = rings.into_iter().map(LineString::from);
        let exterior = rings.next().unwrap_or_else(|| LineString::new(vec![]));
        Geometry::Polygon(Polygon::new(exterior, rings.collect()))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Geometry::Point(_) => "Point",
            Geometry::LineString(_) => "LineString",
            Geometry::Polygon(_) => "Polygon",
        }
    }

    /// Coordinate used for reverse geocoding the whole sample.
    ///
    /// Point: the point. LineString: its first position. Polygon: centroid
    /// of the exterior, taken with longitudes unwrapped around the first
    /// vertex so rings crossing the antimeridian stay on their own side.
    pub fn anchor(&self) -> Option<Position> {
        match self {
            Geometry::Point(p) => Some([p.x(), p.y()]),
            Geometry::LineString(ls) => ls.0.first().map(|c| [c.x, c.y]),
            Geometry::Polygon(poly) => {
                let origin = poly.exterior().0.first()?.x;
                let unwrapped = poly.map_coords(|c| Coord {
                    x: origin + wrap_lon(c.x - origin),
                    y: c.y,
                });
                let c = unwrapped.centroid()?;
                Some([wrap_lon(c.x()), c.y()])
            }
        }
    }
}

/// Longitude folded into `[-180, 180)`.
fn wrap_lon(lon: f64) -> f64 {
    (lon + 180.0).rem_euclid(360.0) - 180.0
}

/// A resolved gazetteer match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Place {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin1: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin2: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin3: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin4: Option<String>,
    pub country_code: String,
    pub distance_km: f64,
}

impl Place {
    /// "Name, Admin1, CC" with absent parts left out.
    pub fn label(&self) -> String {
        let mut parts = vec![self.name.as_str()];
        if let Some(a1) = self.admin1.as_deref() {
            parts.push(a1);
        }
        if !self.country_code.is_empty() {
            parts.push(self.country_code.as_str());
        }
        parts.join(", ")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventSample {
    pub date: DateTime<Utc>,
    pub geometry: Geometry,
    #[serde(default)]
    pub place: Option<Place>,
}

/// Canonical record persisted by the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedEvent {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub closed: Option<String>,
    pub categories: Vec<Category>,
    #[serde(default)]
    pub sources: Vec<SourceRef>,
    pub samples: Vec<EventSample>,
}

#[async_trait::async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<RawFeedEvent>, IngestError>;
    fn name(&self) -> &'static str;
}

fn id_from_number_or_string<'de, D>(d: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum AnyId {
        Num(i64),
        Str(String),
    }
    Ok(match AnyId::deserialize(d)? {
        AnyId::Num(n) => n.to_string(),
        AnyId::Str(s) => s,
    })
}
