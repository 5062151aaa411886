//! Property tests for rule field paths

use proptest::prelude::*;
use serde_json::{json, Value};
use sp_policy::FieldPath;

fn segment() -> impl Strategy<Value = String> {
    prop_oneof![
        "[a-z0-9_-]{1,8}",
        // Label-style keys that need the bracket form
        "[a-z]{1,6}\\.[a-z]{1,6}/[a-z-]{1,8}",
    ]
}

/// Render segments the way a policy author would write them
fn render(segments: &[String]) -> String {
    let mut out = String::new();
    for (i, seg) in segments.iter().enumerate() {
        if seg.contains(['.', '/']) {
            out.push_str(&format!("[\"{seg}\"]"));
        } else {
            if i > 0 {
                out.push('.');
            }
            out.push_str(seg);
        }
    }
    out
}

fn nest(segments: &[String], leaf: Value) -> Value {
    segments.iter().rev().fold(leaf, |inner, seg| {
        let mut map = serde_json::Map::new();
        map.insert(seg.clone(), inner);
        Value::Object(map)
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn display_parses_back_to_the_same_path(segments in prop::collection::vec(segment(), 1..6)) {
        let path = FieldPath::parse(&render(&segments)).unwrap();
        let reparsed = FieldPath::parse(&path.to_string()).unwrap();
        prop_assert_eq!(reparsed, path);
    }

    #[test]
    fn parsed_path_resolves_its_own_document(segments in prop::collection::vec(segment(), 1..6)) {
        let path = FieldPath::parse(&render(&segments)).unwrap();
        let doc = nest(&segments, json!("leaf"));
        prop_assert_eq!(path.resolve(&doc), Some(&json!("leaf")));
    }

    #[test]
    fn doubled_dot_is_always_rejected(
        segments in prop::collection::vec("[a-z]{1,6}", 2..5),
        at in any::<prop::sample::Index>(),
    ) {
        let mut raw = segments.join(".");
        let dots: Vec<usize> = raw.match_indices('.').map(|(i, _)| i).collect();
        let pos = dots[at.index(dots.len())];
        raw.insert(pos, '.');
        prop_assert!(FieldPath::parse(&raw).is_err(), "{} accepted", raw);
    }
}
