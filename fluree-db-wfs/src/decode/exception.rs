//! OWS exception reports.
//!
//! Servers answer failed requests with HTTP 200 and an `ows:ExceptionReport`
//! (WFS 1.1) or `ServiceExceptionReport` (WFS 1.0) body. Both are turned into
//! [`WfsError::ServiceException`] before any record is handed out.

use super::xml::XmlNode;
use crate::error::WfsError;
use quick_xml::events::Event;
use quick_xml::Reader;

/// Root element names that mark an exception document.
pub fn is_exception_root(local_name: &[u8]) -> bool {
    matches!(local_name, b"ExceptionReport" | b"ServiceExceptionReport")
}

/// Extract code and message from an exception document.
///
/// Never fails: unreadable reports still produce a `ServiceException` with
/// whatever could be salvaged.
pub fn parse_exception_report(xml: &[u8]) -> WfsError {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut code: Option<String> = None;
    let mut messages: Vec<String> = Vec::new();
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => {
                match e.local_name().as_ref() {
                    b"Exception" | b"ServiceException" => {
                        for attr in e.attributes().flatten() {
                            let key = attr.key.local_name();
                            if code.is_none()
                                && matches!(key.as_ref(), b"exceptionCode" | b"code")
                            {
                                code = Some(String::from_utf8_lossy(&attr.value).into_owned());
                            }
                        }
                        // WFS 1.0 puts the message directly in ServiceException
                        in_text = e.local_name().as_ref() == b"ServiceException";
                    }
                    b"ExceptionText" => in_text = true,
                    _ => {}
                }
            }
            Ok(Event::Text(ref e)) if in_text => {
                if let Ok(text) = e.unescape() {
                    let text = text.trim();
                    if !text.is_empty() {
                        messages.push(text.to_string());
                    }
                }
            }
            Ok(Event::CData(ref e)) if in_text => {
                let text = String::from_utf8_lossy(e).trim().to_string();
                if !text.is_empty() {
                    messages.push(text);
                }
            }
            Ok(Event::End(_)) => in_text = false,
            Ok(Event::Eof) => break,
            Err(e) => {
                messages.push(format!("(unreadable exception report: {})", e));
                break;
            }
            _ => {}
        }
        buf.clear();
    }

    WfsError::ServiceException {
        code: code.unwrap_or_else(|| "NoApplicableCode".to_string()),
        message: if messages.is_empty() {
            "Service reported an exception without text".to_string()
        } else {
            messages.join("; ")
        },
    }
}

/// Same as [`parse_exception_report`], for a report already read into a tree.
pub fn exception_from_node(report: &XmlNode) -> WfsError {
    fn walk<'a>(node: &'a XmlNode, code: &mut Option<&'a str>, messages: &mut Vec<&'a str>) {
        match node.name.as_str() {
            "Exception" | "ServiceException" => {
                if code.is_none() {
                    *code = node.attr("exceptionCode").or_else(|| node.attr("code"));
                }
                if node.name == "ServiceException" && !node.trimmed_text().is_empty() {
                    messages.push(node.trimmed_text());
                }
            }
            "ExceptionText" if !node.trimmed_text().is_empty() => {
                messages.push(node.trimmed_text())
            }
            _ => {}
        }
        for child in &node.children {
            walk(child, code, messages);
        }
    }

    let mut code = None;
    let mut messages = Vec::new();
    walk(report, &mut code, &mut messages);
    WfsError::ServiceException {
        code: code.unwrap_or("NoApplicableCode").to_string(),
        message: if messages.is_empty() {
            "Service reported an exception without text".to_string()
        } else {
            messages.join("; ")
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ows_exception_report() {
        let xml = br#"<?xml version="1.0"?>
<ows:ExceptionReport xmlns:ows="http://www.opengis.net/ows" version="1.0.0">
  <ows:Exception exceptionCode="InvalidParameterValue" locator="typeName">
    <ows:ExceptionText>Feature type topp:nope unknown</ows:ExceptionText>
  </ows:Exception>
</ows:ExceptionReport>"#;
        match parse_exception_report(xml) {
            WfsError::ServiceException { code, message } => {
                assert_eq!(code, "InvalidParameterValue");
                assert_eq!(message, "Feature type topp:nope unknown");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_parse_wfs10_service_exception() {
        let xml = br#"<ServiceExceptionReport version="1.2.0">
  <ServiceException code="GeneralException"><![CDATA[Query failed]]></ServiceException>
</ServiceExceptionReport>"#;
        match parse_exception_report(xml) {
            WfsError::ServiceException { code, message } => {
                assert_eq!(code, "GeneralException");
                assert_eq!(message, "Query failed");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_exception_from_tree_matches_document_parse() {
        let xml = br#"<ows:ExceptionReport xmlns:ows="http://www.opengis.net/ows">
  <ows:Exception exceptionCode="OperationProcessingFailed">
    <ows:ExceptionText>Timeout</ows:ExceptionText>
    <ows:ExceptionText>Query aborted</ows:ExceptionText>
  </ows:Exception>
</ows:ExceptionReport>"#;
        let node = crate::decode::xml::parse_fragment(xml).unwrap();
        match exception_from_node(&node) {
            WfsError::ServiceException { code, message } => {
                assert_eq!(code, "OperationProcessingFailed");
                assert_eq!(message, "Timeout; Query aborted");
            }
            other => panic!("unexpected: {other:?}"),
        }
        match exception_from_node(&crate::decode::xml::parse_fragment(b"<ExceptionReport/>").unwrap()) {
            WfsError::ServiceException { code, .. } => assert_eq!(code, "NoApplicableCode"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_exception_root_names() {
        assert!(is_exception_root(b"ExceptionReport"));
        assert!(is_exception_root(b"ServiceExceptionReport"));
        assert!(!is_exception_root(b"FeatureCollection"));
    }
}
