//! Spatial reference identifiers, envelopes and coordinate transforms.
//!
//! Coordinates are always held in x/y (easting/northing, longitude/latitude)
//! order inside the crate. Axis-order quirks of the wire format are handled
//! by the GML decoder via [`Crs::is_lat_lon_axis_order`].

use crate::error::{Result, WfsError};
use geo::{BoundingRect, MapCoords};
use geo_types::{Coord, Geometry};
use std::fmt;

const WGS84: u32 = 4326;
const WEB_MERCATOR: u32 = 3857;
const GOOGLE_MERCATOR: u32 = 900913;
const EARTH_RADIUS: f64 = 6_378_137.0;
const MAX_MERCATOR_LAT: f64 = 85.051_128_779_806_6;

/// A coordinate reference system, identified by EPSG code.
#[derive(Debug, Clone)]
pub struct Crs {
    code: u32,
    lat_lon: bool,
}

impl Crs {
    /// Create from a bare EPSG code (x/y axis order).
    pub fn epsg(code: u32) -> Self {
        Self {
            code: normalize_code(code),
            lat_lon: false,
        }
    }

    /// WGS84 geographic, longitude/latitude order.
    pub fn wgs84() -> Self {
        Self::epsg(WGS84)
    }

    /// Parse any of the identifier spellings WFS servers use.
    ///
    /// Supports `EPSG:n`, `urn:ogc:def:crs:EPSG::n`, `urn:x-ogc:def:crs:EPSG:n`,
    /// `http://www.opengis.net/gml/srs/epsg.xml#n` and `CRS:84`.
    pub fn parse(id: &str) -> Result<Self> {
        let trimmed = id.trim();
        let upper = trimmed.to_ascii_uppercase();

        if upper == "CRS:84" || upper.ends_with(":CRS84") {
            return Ok(Self::wgs84());
        }

        let (code_str, lat_lon) = if upper.starts_with("URN:") {
            let code = upper.rsplit(':').next().unwrap_or_default();
            (code.to_string(), true)
        } else if let Some((_, code)) = upper.split_once('#') {
            (code.to_string(), false)
        } else if let Some(code) = upper.strip_prefix("EPSG:") {
            (code.to_string(), false)
        } else {
            return Err(WfsError::reference_system(format!(
                "Unrecognized spatial reference identifier '{}'",
                trimmed
            )));
        };

        let code: u32 = code_str.parse().map_err(|_| {
            WfsError::reference_system(format!(
                "Invalid EPSG code in spatial reference identifier '{}'",
                trimmed
            ))
        })?;
        let code = normalize_code(code);

        Ok(Self {
            code,
            // Only geographic CRSs flip their axes in URN form
            lat_lon: lat_lon && code == WGS84,
        })
    }

    /// EPSG code.
    pub fn code(&self) -> u32 {
        self.code
    }

    /// Whether coordinates on the wire are latitude first.
    pub fn is_lat_lon_axis_order(&self) -> bool {
        self.lat_lon
    }

    /// Identifier emitted in `SRSNAME` / `srsName`.
    pub fn to_srs_name(&self) -> String {
        format!("EPSG:{}", self.code)
    }
}

impl PartialEq for Crs {
    fn eq(&self, other: &Self) -> bool {
        self.code == other.code
    }
}

impl Eq for Crs {}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.code)
    }
}

fn normalize_code(code: u32) -> u32 {
    if code == GOOGLE_MERCATOR {
        WEB_MERCATOR
    } else {
        code
    }
}

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Envelope {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Envelope {
    /// Create a new envelope, normalizing swapped corners.
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x: min_x.min(max_x),
            min_y: min_y.min(max_y),
            max_x: min_x.max(max_x),
            max_y: min_y.max(max_y),
        }
    }

    /// Compute from a geo-types Geometry.
    pub fn from_geometry(geom: &Geometry<f64>) -> Option<Self> {
        let rect = geom.bounding_rect()?;
        Some(Self::new(
            rect.min().x,
            rect.min().y,
            rect.max().x,
            rect.max().y,
        ))
    }

    /// Smallest envelope covering both.
    pub fn union(&self, other: &Envelope) -> Envelope {
        Envelope {
            min_x: self.min_x.min(other.min_x),
            min_y: self.min_y.min(other.min_y),
            max_x: self.max_x.max(other.max_x),
            max_y: self.max_y.max(other.max_y),
        }
    }

    /// Fold an optional running union with another envelope.
    pub fn expand(acc: Option<Envelope>, other: &Envelope) -> Envelope {
        match acc {
            Some(env) => env.union(other),
            None => *other,
        }
    }

    /// Check if this envelope intersects another.
    pub fn intersects(&self, other: &Envelope) -> bool {
        self.min_x <= other.max_x
            && self.max_x >= other.min_x
            && self.min_y <= other.max_y
            && self.max_y >= other.min_y
    }
}

/// Coordinate transformation between reference systems.
///
/// Implementations are external collaborators; the pipeline only relies on
/// these two operations.
pub trait CrsTransform: Send + Sync + fmt::Debug {
    /// Transform an envelope, returning the envelope of the transformed corners.
    fn transform_envelope(&self, env: &Envelope, from: &Crs, to: &Crs) -> Result<Envelope>;

    /// Transform every coordinate of a geometry.
    fn transform_geometry(
        &self,
        geom: &Geometry<f64>,
        from: &Crs,
        to: &Crs,
    ) -> Result<Geometry<f64>>;
}

/// Built-in transforms: identity and WGS84 <-> spherical web mercator.
#[derive(Debug, Default, Clone, Copy)]
pub struct StandardTransform;

impl StandardTransform {
    fn coord_fn(from: &Crs, to: &Crs) -> Result<fn(Coord<f64>) -> Coord<f64>> {
        match (from.code(), to.code()) {
            (a, b) if a == b => Ok(identity),
            (WGS84, WEB_MERCATOR) => Ok(wgs84_to_mercator),
            (WEB_MERCATOR, WGS84) => Ok(mercator_to_wgs84),
            _ => Err(WfsError::projection(format!(
                "No transform available from {} to {}",
                from, to
            ))),
        }
    }
}

impl CrsTransform for StandardTransform {
    fn transform_envelope(&self, env: &Envelope, from: &Crs, to: &Crs) -> Result<Envelope> {
        let f = Self::coord_fn(from, to)?;
        let lower = f(Coord {
            x: env.min_x,
            y: env.min_y,
        });
        let upper = f(Coord {
            x: env.max_x,
            y: env.max_y,
        });
        Ok(Envelope::new(lower.x, lower.y, upper.x, upper.y))
    }

    fn transform_geometry(
        &self,
        geom: &Geometry<f64>,
        from: &Crs,
        to: &Crs,
    ) -> Result<Geometry<f64>> {
        let f = Self::coord_fn(from, to)?;
        Ok(geom.map_coords(f))
    }
}

fn identity(c: Coord<f64>) -> Coord<f64> {
    c
}

fn wgs84_to_mercator(c: Coord<f64>) -> Coord<f64> {
    let lat = c.y.clamp(-MAX_MERCATOR_LAT, MAX_MERCATOR_LAT);
    Coord {
        x: EARTH_RADIUS * c.x.to_radians(),
        y: EARTH_RADIUS * (std::f64::consts::FRAC_PI_4 + lat.to_radians() / 2.0).tan().ln(),
    }
}

fn mercator_to_wgs84(c: Coord<f64>) -> Coord<f64> {
    Coord {
        x: (c.x / EARTH_RADIUS).to_degrees(),
        y: (2.0 * (c.y / EARTH_RADIUS).exp().atan() - std::f64::consts::FRAC_PI_2).to_degrees(),
    }
}
