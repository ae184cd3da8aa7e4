//! GML 3.1 / GML 2 geometry reading.

use super::xml::XmlNode;
use crate::crs::Crs;
use crate::error::{Result, WfsError};
use crate::schema::GeometryValue;
use geo_types::{
    Coord, Geometry, LineString, MultiLineString, MultiPoint, MultiPolygon, Point, Polygon,
};

/// Read the geometry element `node`.
///
/// `default_crs` applies when the element carries no `srsName`.
/// Latitude-first reference systems are swapped into x/y order.
pub fn parse_geometry(node: &XmlNode, default_crs: Option<&Crs>) -> Result<GeometryValue> {
    let crs = match node.attr("srsName") {
        Some(srs) => match Crs::parse(srs) {
            Ok(crs) => Some(crs),
            Err(e) => {
                tracing::debug!(srs_name = srs, error = %e, "Unrecognized srsName on geometry");
                default_crs.cloned()
            }
        },
        None => default_crs.cloned(),
    };
    let ctx = Context {
        swap: crs.as_ref().map(|c| c.is_lat_lon_axis_order()).unwrap_or(false),
        dimension: dimension_of(node, 2),
    };
    let geometry = ctx.geometry(node)?;
    Ok(GeometryValue::new(geometry, crs))
}

fn dimension_of(node: &XmlNode, inherited: usize) -> usize {
    node.attr("srsDimension")
        .and_then(|d| d.parse::<usize>().ok())
        .filter(|d| *d >= 2)
        .unwrap_or(inherited)
}

fn malformed(what: &str) -> WfsError {
    WfsError::xml(format!("Malformed GML {}", what))
}

#[derive(Debug, Clone, Copy)]
struct Context {
    swap: bool,
    dimension: usize,
}

impl Context {
    fn with(&self, node: &XmlNode) -> Self {
        Self {
            swap: self.swap,
            dimension: dimension_of(node, self.dimension),
        }
    }

    fn coord(&self, a: f64, b: f64) -> Coord<f64> {
        if self.swap {
            Coord { x: b, y: a }
        } else {
            Coord { x: a, y: b }
        }
    }

    fn geometry(&self, node: &XmlNode) -> Result<Geometry<f64>> {
        let ctx = self.with(node);
        match node.name.as_str() {
            "Point" => Ok(Geometry::Point(ctx.point(node)?)),
            "LineString" | "LinearRing" | "Curve" => Ok(Geometry::LineString(ctx.line(node)?)),
            "Polygon" | "Surface" | "PolygonPatch" => Ok(Geometry::Polygon(ctx.polygon(node)?)),
            "MultiPoint" => {
                let points = ctx
                    .members(node, &["pointMember", "pointMembers"])
                    .map(|n| ctx.with(n).point(n))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Geometry::MultiPoint(MultiPoint(points)))
            }
            "MultiLineString" | "MultiCurve" => {
                let lines = ctx
                    .members(node, &["lineStringMember", "curveMember", "curveMembers"])
                    .map(|n| ctx.with(n).line(n))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Geometry::MultiLineString(MultiLineString(lines)))
            }
            "MultiPolygon" | "MultiSurface" => {
                let polygons = ctx
                    .members(node, &["polygonMember", "surfaceMember", "surfaceMembers"])
                    .map(|n| ctx.with(n).polygon(n))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Geometry::MultiPolygon(MultiPolygon(polygons)))
            }
            other => Err(WfsError::xml(format!("Unsupported GML geometry '{}'", other))),
        }
    }

    /// Geometry elements under member wrappers, flattened.
    fn members<'a>(
        &self,
        node: &'a XmlNode,
        wrappers: &'a [&'a str],
    ) -> impl Iterator<Item = &'a XmlNode> + 'a {
        node.children
            .iter()
            .filter(move |c| wrappers.contains(&c.name.as_str()))
            .flat_map(|wrapper| wrapper.children.iter())
    }

    fn point(&self, node: &XmlNode) -> Result<Point<f64>> {
        let coords = self.coordinates(node)?;
        coords
            .first()
            .map(|c| Point(*c))
            .ok_or_else(|| malformed("Point without coordinates"))
    }

    fn line(&self, node: &XmlNode) -> Result<LineString<f64>> {
        if node.name == "Curve" {
            // Curve -> segments -> LineStringSegment*
            let mut coords = Vec::new();
            if let Some(segments) = node.child("segments") {
                for segment in &segments.children {
                    let seg = self.with(segment).coordinates(segment)?;
                    // Segments share their joining vertex
                    let skip = usize::from(!coords.is_empty() && coords.last() == seg.first());
                    coords.extend(seg.into_iter().skip(skip));
                }
            }
            return Ok(LineString(coords));
        }
        let coords = self.coordinates(node)?;
        if coords.len() < 2 {
            return Err(malformed("LineString with fewer than two positions"));
        }
        Ok(LineString(coords))
    }

    fn ring(&self, boundary: &XmlNode) -> Result<LineString<f64>> {
        let ring = boundary
            .first_child()
            .ok_or_else(|| malformed("boundary without LinearRing"))?;
        let ctx = self.with(ring);
        Ok(LineString(ctx.coordinates(ring)?))
    }

    fn polygon(&self, node: &XmlNode) -> Result<Polygon<f64>> {
        if node.name == "Surface" {
            let patch = node
                .child("patches")
                .and_then(|p| p.first_child())
                .ok_or_else(|| malformed("Surface without patches"))?;
            return self.with(patch).polygon(patch);
        }
        let exterior = node
            .child("exterior")
            .or_else(|| node.child("outerBoundaryIs"))
            .ok_or_else(|| malformed("Polygon without exterior"))?;
        let exterior = self.ring(exterior)?;
        let interiors = node
            .children
            .iter()
            .filter(|c| c.name == "interior" || c.name == "innerBoundaryIs")
            .map(|c| self.ring(c))
            .collect::<Result<Vec<_>>>()?;
        Ok(Polygon::new(exterior, interiors))
    }

    /// Positions of a primitive, from `pos`, `posList`, `coordinates` or `coord`.
    fn coordinates(&self, node: &XmlNode) -> Result<Vec<Coord<f64>>> {
        if let Some(list) = node.child("posList") {
            let ctx = self.with(list);
            return ctx.pos_list(list.trimmed_text());
        }
        let positions: Vec<&XmlNode> = node.children_named("pos").collect();
        if !positions.is_empty() {
            let mut coords = Vec::with_capacity(positions.len());
            for pos in positions {
                let ctx = self.with(pos);
                coords.extend(ctx.pos_list(pos.trimmed_text())?);
            }
            return Ok(coords);
        }
        if let Some(c) = node.child("coordinates") {
            return self.gml2_coordinates(c);
        }
        let coords: Vec<&XmlNode> = node.children_named("coord").collect();
        if !coords.is_empty() {
            return coords
                .into_iter()
                .map(|c| {
                    let x = number(c.child("X").map(|n| n.trimmed_text()))?;
                    let y = number(c.child("Y").map(|n| n.trimmed_text()))?;
                    Ok(self.coord(x, y))
                })
                .collect();
        }
        Err(malformed(&format!("{} without positions", node.name)))
    }

    fn pos_list(&self, text: &str) -> Result<Vec<Coord<f64>>> {
        let values = text
            .split_whitespace()
            .map(|v| v.parse::<f64>().map_err(|_| malformed("position value")))
            .collect::<Result<Vec<_>>>()?;
        if values.len() % self.dimension != 0 {
            return Err(malformed("position list length"));
        }
        Ok(values
            .chunks(self.dimension)
            .map(|c| self.coord(c[0], c[1]))
            .collect())
    }

    fn gml2_coordinates(&self, node: &XmlNode) -> Result<Vec<Coord<f64>>> {
        let cs = node.attr("cs").unwrap_or(",");
        let ts = node.attr("ts").unwrap_or(" ");
        let decimal = node.attr("decimal").unwrap_or(".");
        let text = node.trimmed_text();

        let tuples: Vec<&str> = if ts.trim().is_empty() {
            text.split_whitespace().collect()
        } else {
            text.split(ts).map(str::trim).filter(|t| !t.is_empty()).collect()
        };
        tuples
            .into_iter()
            .map(|tuple| {
                let mut parts = tuple.split(cs).map(|p| {
                    let p = p.trim();
                    if decimal == "." {
                        p.parse::<f64>()
                    } else {
                        p.replace(decimal, ".").parse::<f64>()
                    }
                });
                match (parts.next(), parts.next()) {
                    (Some(Ok(a)), Some(Ok(b))) => Ok(self.coord(a, b)),
                    _ => Err(malformed("coordinates tuple")),
                }
            })
            .collect()
    }
}

fn number(text: Option<&str>) -> Result<f64> {
    text.and_then(|t| t.parse::<f64>().ok())
        .ok_or_else(|| malformed("coord value"))
}
