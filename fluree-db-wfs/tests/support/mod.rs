//! Shared fixtures for fluree-db-wfs integration tests.
//!
//! A GeoServer-like service with three types:
//! - `topp:roads` - EPSG:3857, declared bounds, line geometries
//! - `topp:parcels` - EPSG:4326, no declared bounds, point geometries
//! - `topp:rivers` - EPSG:27700, never queried

#![allow(dead_code)]

use fluree_db_wfs::{
    MemoryTransport, StandardTransform, WfsConfig, WfsDataStore,
};
use fluree_db_wfs::schema::DescribeFeatureTypeResolver;
use std::sync::Arc;

pub const CAPABILITIES_URL: &str =
    "http://localhost/geoserver/wfs?SERVICE=WFS&VERSION=1.1.0&REQUEST=GetCapabilities";

pub const DESCRIBE_ROADS: &str = "REQUEST=DescribeFeatureType&TYPENAME=topp%3Aroads";
pub const DESCRIBE_PARCELS: &str = "REQUEST=DescribeFeatureType&TYPENAME=topp%3Aparcels";
pub const GET_ROADS: &str = "REQUEST=GetFeature&TYPENAME=topp%3Aroads";
pub const GET_PARCELS: &str = "REQUEST=GetFeature&TYPENAME=topp%3Aparcels";
pub const HITS: &str = "RESULTTYPE=hits";

pub const CAPABILITIES: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<wfs:WFS_Capabilities version="1.1.0"
    xmlns:wfs="http://www.opengis.net/wfs" xmlns:ows="http://www.opengis.net/ows"
    xmlns:xlink="http://www.w3.org/1999/xlink" xmlns:topp="http://www.openplans.org/topp">
  <ows:ServiceIdentification>
    <ows:Title>Test WFS</ows:Title>
  </ows:ServiceIdentification>
  <ows:OperationsMetadata>
    <ows:Operation name="GetCapabilities">
      <ows:DCP><ows:HTTP><ows:Get xlink:href="http://localhost/geoserver/wfs?"/></ows:HTTP></ows:DCP>
    </ows:Operation>
    <ows:Operation name="DescribeFeatureType">
      <ows:DCP><ows:HTTP><ows:Get xlink:href="http://localhost/geoserver/wfs?"/></ows:HTTP></ows:DCP>
    </ows:Operation>
    <ows:Operation name="GetFeature">
      <ows:DCP><ows:HTTP>
        <ows:Get xlink:href="http://localhost/geoserver/wfs?"/>
        <ows:Post xlink:href="http://localhost/geoserver/wfs"/>
      </ows:HTTP></ows:DCP>
      <ows:Parameter name="resultType">
        <ows:Value>results</ows:Value>
        <ows:Value>hits</ows:Value>
      </ows:Parameter>
    </ows:Operation>
    <ows:Constraint name="DefaultMaxFeatures">
      <ows:Value>500</ows:Value>
    </ows:Constraint>
  </ows:OperationsMetadata>
  <wfs:FeatureTypeList>
    <wfs:FeatureType>
      <wfs:Name>topp:roads</wfs:Name>
      <wfs:Title>Roads</wfs:Title>
      <wfs:DefaultSRS>urn:x-ogc:def:crs:EPSG:3857</wfs:DefaultSRS>
      <wfs:OtherSRS>urn:x-ogc:def:crs:EPSG:4326</wfs:OtherSRS>
      <ows:WGS84BoundingBox>
        <ows:LowerCorner>-10.0 40.0</ows:LowerCorner>
        <ows:UpperCorner>10.0 50.0</ows:UpperCorner>
      </ows:WGS84BoundingBox>
    </wfs:FeatureType>
    <wfs:FeatureType>
      <wfs:Name>topp:parcels</wfs:Name>
      <wfs:Title>Parcels</wfs:Title>
      <wfs:DefaultSRS>EPSG:4326</wfs:DefaultSRS>
    </wfs:FeatureType>
    <wfs:FeatureType>
      <wfs:Name>topp:rivers</wfs:Name>
      <wfs:Title>Rivers</wfs:Title>
      <wfs:DefaultSRS>EPSG:27700</wfs:DefaultSRS>
    </wfs:FeatureType>
  </wfs:FeatureTypeList>
</wfs:WFS_Capabilities>"#;

pub const ROADS_XSD: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<xsd:schema xmlns:xsd="http://www.w3.org/2001/XMLSchema" xmlns:gml="http://www.opengis.net/gml"
    xmlns:topp="http://www.openplans.org/topp" targetNamespace="http://www.openplans.org/topp">
  <xsd:complexType name="roadsType">
    <xsd:complexContent>
      <xsd:extension base="gml:AbstractFeatureType">
        <xsd:sequence>
          <xsd:element minOccurs="0" name="the_geom" nillable="true" type="gml:MultiLineStringPropertyType"/>
          <xsd:element minOccurs="1" name="name" nillable="false" type="xsd:string"/>
          <xsd:element minOccurs="0" name="lanes" nillable="true" type="xsd:int"/>
        </xsd:sequence>
      </xsd:extension>
    </xsd:complexContent>
  </xsd:complexType>
  <xsd:element name="roads" substitutionGroup="gml:_Feature" type="topp:roadsType"/>
</xsd:schema>"#;

pub const PARCELS_XSD: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<xsd:schema xmlns:xsd="http://www.w3.org/2001/XMLSchema" xmlns:gml="http://www.opengis.net/gml"
    xmlns:topp="http://www.openplans.org/topp" targetNamespace="http://www.openplans.org/topp">
  <xsd:complexType name="parcelsType">
    <xsd:complexContent>
      <xsd:extension base="gml:AbstractFeatureType">
        <xsd:sequence>
          <xsd:element minOccurs="0" name="geom" type="gml:PointPropertyType"/>
          <xsd:element minOccurs="0" name="owner" type="xsd:string"/>
        </xsd:sequence>
      </xsd:extension>
    </xsd:complexContent>
  </xsd:complexType>
  <xsd:element name="parcels" substitutionGroup="gml:_Feature" type="topp:parcelsType"/>
</xsd:schema>"#;

pub const EXCEPTION: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<ows:ExceptionReport xmlns:ows="http://www.opengis.net/ows" version="1.0.0">
  <ows:Exception exceptionCode="InvalidParameterValue" locator="typeName">
    <ows:ExceptionText>Feature type topp:roads is disabled</ows:ExceptionText>
  </ows:Exception>
</ows:ExceptionReport>"#;

fn collection(members: impl Iterator<Item = String>, count: usize) -> String {
    let mut doc = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<wfs:FeatureCollection numberOfFeatures="{}" xmlns:wfs="http://www.opengis.net/wfs" xmlns:gml="http://www.opengis.net/gml" xmlns:topp="http://www.openplans.org/topp">"#,
        count
    );
    for member in members {
        doc.push_str(&member);
    }
    doc.push_str("</wfs:FeatureCollection>");
    doc
}

/// `n` roads; road `i` runs from `(i, 0)` to `(i, 1)` and has `i % 4 + 1` lanes.
pub fn roads(n: usize) -> String {
    let members = (1..=n).map(|i| {
        format!(
            r#"<gml:featureMember><topp:roads gml:id="roads.{i}"><topp:the_geom><gml:MultiLineString srsName="EPSG:3857"><gml:lineStringMember><gml:LineString><gml:posList>{i} 0 {i} 1</gml:posList></gml:LineString></gml:lineStringMember></gml:MultiLineString></topp:the_geom><topp:name>Road {i}</topp:name><topp:lanes>{lanes}</topp:lanes></topp:roads></gml:featureMember>"#,
            i = i,
            lanes = i % 4 + 1
        )
    });
    collection(members, n)
}

/// `n` parcels at `(i, -i)`.
pub fn parcels(n: usize) -> String {
    let members = (1..=n).map(|i| {
        format!(
            r#"<gml:featureMember><topp:parcels gml:id="parcels.{i}"><topp:geom><gml:Point srsName="EPSG:4326"><gml:pos>{i} -{i}</gml:pos></gml:Point></topp:geom><topp:owner>Owner {i}</topp:owner></topp:parcels></gml:featureMember>"#,
            i = i
        )
    });
    collection(members, n)
}

/// Transport answering capabilities and schema requests; add feature routes
/// with [`MemoryTransport::route`].
pub fn base_transport(capabilities: &str) -> MemoryTransport {
    MemoryTransport::new()
        .route("REQUEST=GetCapabilities", capabilities.to_string())
        .route(DESCRIBE_ROADS, ROADS_XSD)
        .route(DESCRIBE_PARCELS, PARCELS_XSD)
}

/// Capabilities with `resultType=hits` not advertised.
pub fn capabilities_without_hits() -> String {
    CAPABILITIES.replace("<ows:Value>hits</ows:Value>", "")
}

pub async fn connect(config: WfsConfig, transport: &MemoryTransport) -> WfsDataStore {
    let transport = Arc::new(transport.clone());
    WfsDataStore::connect(
        config,
        transport.clone(),
        Arc::new(DescribeFeatureTypeResolver::new(transport)),
        Arc::new(StandardTransform),
    )
    .await
    .expect("connect")
}

pub fn config() -> WfsConfig {
    WfsConfig::new(CAPABILITIES_URL)
}
