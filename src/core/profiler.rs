use crate::domain::model::{FieldPath, FieldProfile, ObservedType, RawRecord, StructuralSummary};
use crate::utils::error::{EtlError, Result};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Default)]
struct LeafStats {
    seen_types: BTreeSet<ObservedType>,
    occurrences: usize,
}

/// Builds the structural summary of a non-empty sample set.
///
/// Objects are descended with the key appended to the path; arrays are
/// recorded as leaves and never descended.
pub fn profile(samples: &[RawRecord]) -> Result<StructuralSummary> {
    if samples.is_empty() {
        return Err(EtlError::EmptyInput {
            stage: "schema profiling".to_string(),
        });
    }

    let mut leaves: BTreeMap<FieldPath, LeafStats> = BTreeMap::new();
    let mut objects = BTreeSet::new();

    for sample in samples {
        let mut seen = BTreeMap::new();
        walk_object(&sample.data, None, &mut seen, &mut objects);
        for (path, observed) in seen {
            let stats = leaves.entry(path).or_default();
            stats.seen_types.insert(observed);
            stats.occurrences += 1;
        }
    }

    let sample_count = samples.len();
    let fields = leaves
        .into_iter()
        .map(|(path, stats)| {
            let observed = stats
                .seen_types
                .iter()
                .copied()
                .fold(ObservedType::Null, ObservedType::merge);
            let profile = FieldProfile {
                path: path.clone(),
                observed,
                is_array: stats.seen_types.contains(&ObservedType::Array),
                is_optional: stats.occurrences < sample_count,
                is_nullable: stats.seen_types.contains(&ObservedType::Null),
                occurrences: stats.occurrences,
                seen_types: stats.seen_types,
            };
            (path, profile)
        })
        .collect();

    let summary = StructuralSummary {
        sample_count,
        fields,
        objects,
    };

    tracing::debug!(
        "🔍 Profiled {} samples: {} leaf paths, {} nested objects, max depth {}",
        sample_count,
        summary.len(),
        summary.objects.len(),
        summary.max_depth()
    );

    Ok(summary)
}

fn walk_object(
    object: &serde_json::Map<String, serde_json::Value>,
    parent: Option<&FieldPath>,
    seen: &mut BTreeMap<FieldPath, ObservedType>,
    objects: &mut BTreeSet<FieldPath>,
) {
    for (key, value) in object {
        let path = match parent {
            Some(p) => p.child(key),
            None => FieldPath::root(key),
        };
        match value {
            serde_json::Value::Object(nested) => {
                if !nested.is_empty() {
                    objects.insert(path.clone());
                }
                walk_object(nested, Some(&path), seen, objects);
            }
            leaf => {
                seen.insert(path, ObservedType::of(leaf));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: serde_json::Value) -> RawRecord {
        RawRecord::from_value(value).unwrap()
    }

    fn path(p: &str) -> FieldPath {
        FieldPath::parse(p).unwrap()
    }

    #[test]
    fn test_profile_rejects_empty_samples() {
        let err = profile(&[]).unwrap_err();
        assert!(matches!(err, EtlError::EmptyInput { .. }));
    }

    #[test]
    fn test_profile_nested_and_array_paths() {
        let sample = record(json!({
            "order_id": 1,
            "customer": {"id": 7, "details": {"name": "Ada"}},
            "items": [{"sku": "A"}],
            "total_amount": "12.5"
        }));

        let summary = profile(&[sample]).unwrap();

        let name = summary.get(&path("customer.details.name")).unwrap();
        assert_eq!(name.observed, ObservedType::String);
        assert_eq!(name.depth(), 3);
        assert!(!name.is_optional);

        let items = summary.get(&path("items")).unwrap();
        assert!(items.is_array);
        assert!(summary.get(&path("items.sku")).is_none());

        assert!(summary.objects.contains(&path("customer")));
        assert!(summary.objects.contains(&path("customer.details")));
        assert_eq!(summary.max_depth(), 3);
    }

    #[test]
    fn test_profile_marks_optional_and_mixed() {
        let samples = vec![
            record(json!({"id": 1, "amount": 10, "code": "A"})),
            record(json!({"id": 2, "amount": "ten"})),
            record(json!({"id": 3, "amount": 2.5, "code": null})),
        ];

        let summary = profile(&samples).unwrap();

        let code = summary.get(&path("code")).unwrap();
        assert!(code.is_optional);
        assert!(code.is_nullable);
        assert_eq!(code.observed, ObservedType::String);

        let amount = summary.get(&path("amount")).unwrap();
        assert_eq!(amount.observed, ObservedType::Mixed);
        assert_eq!(amount.seen_types_label(), "integer, float, string");

        let id = summary.get(&path("id")).unwrap();
        assert!(!id.is_optional);
        assert_eq!(id.occurrences, 3);
    }

    #[test]
    fn test_profile_widens_integer_to_float() {
        let samples = vec![record(json!({"x": 1})), record(json!({"x": 1.5}))];
        let summary = profile(&samples).unwrap();
        assert_eq!(summary.get(&path("x")).unwrap().observed, ObservedType::Float);
    }
}
