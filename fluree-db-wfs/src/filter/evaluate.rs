//! In-process evaluation of filters against decoded features.

use super::{ComparisonOp, Filter, Literal};
use crate::crs::CrsTransform;
use crate::schema::{AttributeValue, Feature, RecordSchema};
use std::cmp::Ordering;

/// Evaluate `filter` against one feature.
///
/// Missing attributes and nulls behave like SQL NULL: comparisons on them
/// are unknown rather than false, `Not` keeps unknown unknown, and only a
/// definite true matches. `IsNull` is never unknown. A bounding box that
/// cannot be reprojected into the geometry's reference system is unknown too.
pub fn evaluate(
    filter: &Filter,
    feature: &Feature,
    schema: &RecordSchema,
    transform: &dyn CrsTransform,
) -> bool {
    truth(filter, feature, schema, transform) == Some(true)
}

/// Three-valued result; `None` is unknown.
fn truth(
    filter: &Filter,
    feature: &Feature,
    schema: &RecordSchema,
    transform: &dyn CrsTransform,
) -> Option<bool> {
    match filter {
        Filter::Include => Some(true),
        Filter::Exclude => Some(false),
        Filter::Id(ids) => Some(ids.contains(&feature.id)),
        Filter::And(filters) => {
            let mut unknown = false;
            for f in filters {
                match truth(f, feature, schema, transform) {
                    Some(false) => return Some(false),
                    None => unknown = true,
                    Some(true) => {}
                }
            }
            if unknown {
                None
            } else {
                Some(true)
            }
        }
        Filter::Or(filters) => {
            let mut unknown = false;
            for f in filters {
                match truth(f, feature, schema, transform) {
                    Some(true) => return Some(true),
                    None => unknown = true,
                    Some(false) => {}
                }
            }
            if unknown {
                None
            } else {
                Some(false)
            }
        }
        Filter::Not(inner) => truth(inner, feature, schema, transform).map(|t| !t),
        Filter::IsNull(property) => Some(
            feature
                .value(schema, property)
                .map(AttributeValue::is_null)
                .unwrap_or(true),
        ),
        Filter::Comparison {
            property,
            op,
            value,
        } => match feature.value(schema, property) {
            Some(AttributeValue::Null) | None => None,
            Some(actual) => compare(actual, value).map(|ord| op_matches(*op, ord)),
        },
        Filter::Like {
            property,
            pattern,
            wildcard,
            single_char,
            escape,
        } => match feature.value(schema, property) {
            Some(AttributeValue::Null) | None => None,
            Some(AttributeValue::Geometry(_)) => Some(false),
            Some(v) => {
                let text: Vec<char> = v.to_string().chars().collect();
                let tokens = tokenize_pattern(pattern, *wildcard, *single_char, *escape);
                Some(like_matches(&tokens, &text))
            }
        },
        Filter::BBox {
            property,
            envelope,
            crs,
        } => {
            let geom = match feature.value(schema, property)? {
                AttributeValue::Geometry(g) => g,
                AttributeValue::Null => return None,
                _ => return Some(false),
            };
            let geom_env = geom.envelope()?;
            let target = match (crs, &geom.crs) {
                (Some(box_crs), Some(geom_crs)) if box_crs != geom_crs => {
                    match transform.transform_envelope(envelope, box_crs, geom_crs) {
                        Ok(env) => env,
                        Err(e) => {
                            tracing::debug!(property = %property, error = %e, "BBOX not comparable");
                            return None;
                        }
                    }
                }
                _ => *envelope,
            };
            Some(geom_env.intersects(&target))
        }
    }
}

fn op_matches(op: ComparisonOp, ord: Ordering) -> bool {
    match op {
        ComparisonOp::Eq => ord == Ordering::Equal,
        ComparisonOp::NotEq => ord != Ordering::Equal,
        ComparisonOp::Lt => ord == Ordering::Less,
        ComparisonOp::LtEq => ord != Ordering::Greater,
        ComparisonOp::Gt => ord == Ordering::Greater,
        ComparisonOp::GtEq => ord != Ordering::Less,
    }
}

/// Order a feature value against a literal. `None` when they don't compare.
fn compare(actual: &AttributeValue, literal: &Literal) -> Option<Ordering> {
    match (actual, literal) {
        (AttributeValue::Null, _) | (AttributeValue::Geometry(_), _) => None,
        (AttributeValue::Integer(a), Literal::Integer(b)) => Some(a.cmp(b)),
        (AttributeValue::Integer(a), Literal::Float(b)) => (*a as f64).partial_cmp(b),
        (AttributeValue::Float(a), Literal::Float(b)) => a.partial_cmp(b),
        (AttributeValue::Float(a), Literal::Integer(b)) => a.partial_cmp(&(*b as f64)),
        (AttributeValue::Boolean(a), Literal::Boolean(b)) => Some(a.cmp(b)),
        (AttributeValue::String(a), Literal::String(b)) => Some(a.as_str().cmp(b.as_str())),
        // Literal text against a typed value: coerce the literal
        (AttributeValue::Integer(a), Literal::String(b)) => {
            b.trim().parse::<f64>().ok().and_then(|b| (*a as f64).partial_cmp(&b))
        }
        (AttributeValue::Float(a), Literal::String(b)) => {
            b.trim().parse::<f64>().ok().and_then(|b| a.partial_cmp(&b))
        }
        (AttributeValue::Boolean(a), Literal::String(b)) => {
            b.trim().parse::<bool>().ok().map(|b| a.cmp(&b))
        }
        (AttributeValue::String(a), other) => Some(a.as_str().cmp(other.to_string().as_str())),
        _ => None,
    }
}

#[derive(Debug, PartialEq)]
enum LikeToken {
    Any,
    One,
    Char(char),
}

fn tokenize_pattern(pattern: &str, wildcard: char, single: char, escape: char) -> Vec<LikeToken> {
    let mut tokens = Vec::new();
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        if c == escape {
            if let Some(next) = chars.next() {
                tokens.push(LikeToken::Char(next));
            }
        } else if c == wildcard {
            tokens.push(LikeToken::Any);
        } else if c == single {
            tokens.push(LikeToken::One);
        } else {
            tokens.push(LikeToken::Char(c));
        }
    }
    tokens
}

fn like_matches(tokens: &[LikeToken], text: &[char]) -> bool {
    // Greedy match with single-star backtracking
    let (mut t, mut s) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;
    while s < text.len() {
        match tokens.get(t) {
            Some(LikeToken::Char(c)) if *c == text[s] => {
                t += 1;
                s += 1;
            }
            Some(LikeToken::One) => {
                t += 1;
                s += 1;
            }
            Some(LikeToken::Any) => {
                star = Some((t, s));
                t += 1;
            }
            _ => match star {
                Some((st, ss)) => {
                    t = st + 1;
                    s = ss + 1;
                    star = Some((st, ss + 1));
                }
                None => return false,
            },
        }
    }
    tokens[t..].iter().all(|tok| *tok == LikeToken::Any)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crs::{Crs, Envelope, StandardTransform};
    use crate::schema::{AttributeDescriptor, AttributeType, GeometryKind, GeometryValue};
    use geo_types::{Geometry, Point};

    fn schema() -> RecordSchema {
        RecordSchema::new(
            "topp:roads",
            vec![
                AttributeDescriptor::geometry("the_geom", GeometryKind::Point, Some(Crs::wgs84())),
                AttributeDescriptor::new("name", AttributeType::String),
                AttributeDescriptor::new("lanes", AttributeType::Integer),
            ],
        )
    }

    fn feature(id: &str, x: f64, y: f64, name: &str, lanes: Option<i64>) -> Feature {
        Feature::new(
            id,
            vec![
                AttributeValue::Geometry(GeometryValue::new(
                    Geometry::Point(Point::new(x, y)),
                    Some(Crs::wgs84()),
                )),
                AttributeValue::String(name.to_string()),
                lanes.map(AttributeValue::Integer).unwrap_or(AttributeValue::Null),
            ],
        )
    }

    fn eval(filter: &Filter, f: &Feature) -> bool {
        evaluate(filter, f, &schema(), &StandardTransform)
    }

    #[test]
    fn test_comparisons() {
        let f = feature("roads.1", 1.0, 1.0, "Main St", Some(4));
        assert!(eval(&Filter::gt("lanes", 2), &f));
        assert!(!eval(&Filter::lt("lanes", 4), &f));
        assert!(eval(&Filter::compare("lanes", ComparisonOp::LtEq, 4), &f));
        assert!(eval(&Filter::eq("lanes", "4"), &f));
        assert!(eval(&Filter::eq("name", "Main St"), &f));
        assert!(!eval(&Filter::eq("width", 1), &f));
    }

    #[test]
    fn test_null_semantics() {
        let f = feature("roads.2", 1.0, 1.0, "Side St", None);
        assert!(!eval(&Filter::gt("lanes", 0), &f));
        assert!(!eval(&Filter::compare("lanes", ComparisonOp::NotEq, 0), &f));
        assert!(eval(&Filter::is_null("lanes"), &f));
        assert!(eval(&Filter::is_null("width"), &f));

        // Negating an unknown comparison stays unknown
        assert!(!eval(&Filter::negate(Filter::gt("lanes", 0)), &f));
        assert!(!eval(&Filter::negate(Filter::eq("width", 1)), &f));
        assert!(!eval(&Filter::negate(Filter::like("width", "A%")), &f));
        let with_lanes = feature("roads.3", 1.0, 1.0, "A", Some(1));
        assert!(eval(&Filter::negate(Filter::is_null("lanes")), &with_lanes));
        // A definite answer on either side still decides And / Or
        let or = Filter::or(vec![Filter::gt("lanes", 0), Filter::eq("name", "Side St")]);
        assert!(eval(&or, &f));
        let and = Filter::and(vec![Filter::gt("lanes", 0), Filter::eq("name", "Side St")]);
        assert!(!eval(&Filter::negate(and), &f));
        let not_and = Filter::negate(Filter::and(vec![
            Filter::gt("lanes", 0),
            Filter::eq("name", "Other"),
        ]));
        assert!(eval(&not_and, &f));
    }

    #[test]
    fn test_like() {
        let f = feature("roads.3", 1.0, 1.0, "Main Street", Some(2));
        assert!(eval(&Filter::like("name", "Main%"), &f));
        assert!(eval(&Filter::like("name", "%Str__t"), &f));
        assert!(!eval(&Filter::like("name", "Side%"), &f));
        assert!(eval(&Filter::like("name", "%a%e%"), &f));

        let pct = feature("roads.4", 1.0, 1.0, "100%", Some(2));
        assert!(eval(&Filter::like("name", "100\\%"), &pct));
        assert!(!eval(&Filter::like("name", "10\\%"), &pct));
    }

    #[test]
    fn test_bbox_with_reprojection() {
        let f = feature("roads.5", 5.0, 45.0, "A", None);
        let inside = Filter::bbox("the_geom", Envelope::new(0.0, 40.0, 10.0, 50.0), None);
        let outside = Filter::bbox("the_geom", Envelope::new(20.0, 40.0, 30.0, 50.0), None);
        assert!(eval(&inside, &f));
        assert!(!eval(&outside, &f));

        let merc = StandardTransform
            .transform_envelope(
                &Envelope::new(0.0, 40.0, 10.0, 50.0),
                &Crs::wgs84(),
                &Crs::epsg(3857),
            )
            .unwrap();
        let in_merc = Filter::bbox("the_geom", merc, Some(Crs::epsg(3857)));
        assert!(eval(&in_merc, &f));

        let unprojectable = Filter::bbox(
            "the_geom",
            Envelope::new(0.0, 0.0, 1e6, 1e6),
            Some(Crs::epsg(27700)),
        );
        assert!(!eval(&unprojectable, &f));
        assert!(!eval(&Filter::negate(unprojectable), &f));
    }

    #[test]
    fn test_logical_and_ids() {
        let f = feature("roads.6", 1.0, 1.0, "A", Some(1));
        assert!(eval(&Filter::ids(["roads.6", "roads.7"]), &f));
        assert!(!eval(&Filter::ids(["roads.7"]), &f));
        let filter = Filter::or(vec![
            Filter::eq("name", "B"),
            Filter::negate(Filter::gt("lanes", 3)),
        ]);
        assert!(eval(&filter, &f));
    }
}
