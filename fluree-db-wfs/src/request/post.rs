//! `wfs:GetFeature` XML request bodies.

use super::GetFeatureParams;
use crate::error::{Result, WfsError};
use crate::filter::encode::{GML_NS, OGC_NS};
use crate::filter::{Filter, FilterEncoder};
use crate::WFS_VERSION;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

const WFS_NS: &str = "http://www.opengis.net/wfs";

fn write(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> Result<()> {
    writer
        .write_event(event)
        .map_err(|e| WfsError::predicate_encoding(format!("XML write failed: {}", e)))
}

fn text_element(writer: &mut Writer<Vec<u8>>, name: &str, text: &str) -> Result<()> {
    write(writer, Event::Start(BytesStart::new(name)))?;
    write(writer, Event::Text(BytesText::new(text)))?;
    write(writer, Event::End(BytesEnd::new(name)))
}

pub(super) fn get_feature_body(
    params: &GetFeatureParams,
    encoder: &dyn FilterEncoder,
) -> Result<String> {
    let mut w = Writer::new(Vec::new());
    write(&mut w, Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    let max = params.max_features.map(|m| m.to_string());
    let start = params.start_index.to_string();
    let mut root = BytesStart::new("wfs:GetFeature").with_attributes([
        ("service", "WFS"),
        ("version", WFS_VERSION),
        ("xmlns:wfs", WFS_NS),
        ("xmlns:ogc", OGC_NS),
        ("xmlns:gml", GML_NS),
    ]);
    if let Some(max) = max.as_deref() {
        root.push_attribute(("maxFeatures", max));
    }
    if params.start_index > 0 {
        root.push_attribute(("startIndex", start.as_str()));
    }
    if params.hits {
        root.push_attribute(("resultType", "hits"));
    }
    write(&mut w, Event::Start(root))?;

    let mut query =
        BytesStart::new("wfs:Query").with_attributes([("typeName", params.type_name.as_str())]);
    if let Some(srs) = params.srs_name.as_deref() {
        query.push_attribute(("srsName", srs));
    }
    if let Some(handle) = params.handle.as_deref() {
        query.push_attribute(("handle", handle));
    }
    write(&mut w, Event::Start(query))?;

    for property in &params.properties {
        text_element(&mut w, "wfs:PropertyName", property)?;
    }

    if !matches!(params.server_filter, Filter::Include) {
        let filter_xml = encoder.encode(&params.server_filter)?;
        // Already well-formed XML; written through unescaped
        write(&mut w, Event::Text(BytesText::from_escaped(filter_xml)))?;
    }

    if !params.sort_by.is_empty() {
        write(&mut w, Event::Start(BytesStart::new("ogc:SortBy")))?;
        for sort in &params.sort_by {
            write(&mut w, Event::Start(BytesStart::new("ogc:SortProperty")))?;
            text_element(&mut w, "ogc:PropertyName", &sort.property)?;
            text_element(&mut w, "ogc:SortOrder", sort.order.xml_token())?;
            write(&mut w, Event::End(BytesEnd::new("ogc:SortProperty")))?;
        }
        write(&mut w, Event::End(BytesEnd::new("ogc:SortBy")))?;
    }

    write(&mut w, Event::End(BytesEnd::new("wfs:Query")))?;
    write(&mut w, Event::End(BytesEnd::new("wfs:GetFeature")))?;

    String::from_utf8(w.into_inner())
        .map_err(|e| WfsError::predicate_encoding(format!("Non UTF-8 request body: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::tests::CAPABILITIES;
    use crate::capabilities::CapabilitiesIndex;
    use crate::crs::{Crs, Envelope};
    use crate::filter::OgcFilterEncoder;
    use crate::query::{QueryDescriptor, SortBy};
    use crate::request::RequestBuilder;
    use crate::schema::{AttributeDescriptor, AttributeType, GeometryKind, RecordSchema};
    use crate::transport::TransportMethod;

    fn schema() -> RecordSchema {
        RecordSchema::new(
            "topp:roads",
            vec![
                AttributeDescriptor::geometry("the_geom", GeometryKind::MultiLineString, None),
                AttributeDescriptor::new("name", AttributeType::String),
                AttributeDescriptor::new("lanes", AttributeType::Integer),
            ],
        )
    }

    #[test]
    fn test_post_body() {
        let caps = CapabilitiesIndex::build(CAPABILITIES.as_bytes()).unwrap();
        let builder = RequestBuilder::new(&caps, &OgcFilterEncoder, 0);
        let query = QueryDescriptor::new("topp:roads")
            .with_properties(["name", "the_geom"])
            .with_filter(Filter::bbox(
                "the_geom",
                Envelope::new(0.0, 0.0, 1.0, 1.0),
                Some(Crs::wgs84()),
            ))
            .with_max_features(20)
            .with_target_crs(Crs::wgs84())
            .with_sort_by(SortBy::desc("name"))
            .with_handle("view-1");
        let plan = builder
            .build_get_feature(&query, &schema(), TransportMethod::Post)
            .unwrap();

        assert_eq!(plan.request.method, TransportMethod::Post);
        assert_eq!(plan.request.url, "http://localhost/geoserver/wfs");
        let body = plan.request.body.unwrap();
        assert!(body.starts_with(r#"<?xml version="1.0" encoding="UTF-8"?>"#));
        assert!(body.contains(r#"maxFeatures="20""#));
        assert!(!body.contains("startIndex"));
        assert!(body.contains(
            r#"<wfs:Query typeName="topp:roads" srsName="EPSG:4326" handle="view-1">"#
        ));
        assert!(body.contains(
            "<wfs:PropertyName>name</wfs:PropertyName><wfs:PropertyName>the_geom</wfs:PropertyName>"
        ));
        assert!(body.contains("<ogc:BBOX><ogc:PropertyName>the_geom</ogc:PropertyName>"));
        assert!(body.contains(
            "<ogc:SortProperty><ogc:PropertyName>name</ogc:PropertyName><ogc:SortOrder>DESC</ogc:SortOrder></ogc:SortProperty>"
        ));
        assert!(body.ends_with("</wfs:Query></wfs:GetFeature>"));
    }

    #[test]
    fn test_post_hits_body() {
        let caps = CapabilitiesIndex::build(CAPABILITIES.as_bytes()).unwrap();
        let builder = RequestBuilder::new(&caps, &OgcFilterEncoder, 0);
        let request = builder.build_hits("topp:roads", TransportMethod::Post).unwrap();
        let body = request.body.unwrap();
        assert!(body.contains(r#"resultType="hits""#));
        assert!(!body.contains("PropertyName"));
    }
}
