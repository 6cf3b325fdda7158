use crate::config::FormConfig;
use crate::constraint::{wildcard_name, Constraint, ConstraintMap};
use crate::error::{FormError, ReconcileError};
use crate::formdata::{build_tree, flatten, FormEntry};
use crate::intent::{classify, Intent, IntentKind};
use crate::list::{apply_to_value, ListOp};
use crate::memo::SingleSlotCache;
use crate::metadata::{field_id, is_dirty, FormMetadata};
use crate::path::{decode, encode, is_name_within, Path, Segment};
use crate::result::{ErrorTree, SubmissionResult, SubmissionStatus};
use crate::sequence::SubmissionSequence;
use crate::state::FormState;
use crate::submission::{parse_submission, ReplyOptions};
use crate::tree::{FileEntry, Value};
use crate::validate::{validate_submission, ConstraintValidator, SyncValidator, ValidationContext};
use futures::executor::block_on;
use serde_json::json;
use std::cell::Cell;

// ── Shared fixture runners ──────────────────────────────────────────

/// Embed fixture files at compile time.
const NAME_FIXTURES: &str = include_str!("../test-data/fixtures/names.json");
const NAME_ERROR_FIXTURES: &str = include_str!("../test-data/fixtures/name-errors.json");
const INTENT_FIXTURES: &str = include_str!("../test-data/fixtures/intents.json");
const INTENT_ERROR_FIXTURES: &str = include_str!("../test-data/fixtures/intent-errors.json");
const TREE_FIXTURES: &str = include_str!("../test-data/fixtures/trees.json");
const TREE_ERROR_FIXTURES: &str = include_str!("../test-data/fixtures/tree-errors.json");

/// Convert a fixture segment list (`["tasks", 0, "content"]`) to a path.
fn fixture_path(segments: &serde_json::Value) -> Path {
    let segments = segments
        .as_array()
        .unwrap()
        .iter()
        .map(|s| match s {
            serde_json::Value::String(key) => Segment::Key(key.clone()),
            serde_json::Value::Number(n) => Segment::Index(n.as_u64().unwrap() as usize),
            other => panic!("bad segment in fixture: {}", other),
        })
        .collect();
    Path::from_segments(segments)
}

/// Convert fixture `[[name, value], ...]` pairs to form entries.
fn fixture_entries(entries: &serde_json::Value) -> Vec<(String, FormEntry)> {
    entries
        .as_array()
        .unwrap()
        .iter()
        .map(|pair| {
            let name = pair[0].as_str().unwrap().to_string();
            let value = pair[1].as_str().unwrap();
            (name, FormEntry::from(value))
        })
        .collect()
}

fn tree(json: serde_json::Value) -> Value {
    Value::try_from(json).unwrap()
}

#[test]
fn test_fixture_names() {
    let fixtures: Vec<serde_json::Value> = serde_json::from_str(NAME_FIXTURES).unwrap();

    for fixture in &fixtures {
        let name = fixture["name"].as_str().unwrap();
        let input = fixture["input"].as_str().unwrap();
        let expected = fixture_path(&fixture["segments"]);

        let decoded = decode(input)
            .unwrap_or_else(|e| panic!("Fixture '{}': unexpected error: {}", name, e));
        assert_eq!(decoded, expected, "Fixture '{}': path mismatch", name);
        assert_eq!(encode(&decoded), input, "Fixture '{}': name did not round-trip", name);
        assert_eq!(
            decode(&encode(&expected)).unwrap(),
            expected,
            "Fixture '{}': path did not round-trip",
            name
        );
    }
}

#[test]
fn test_fixture_name_errors() {
    let fixtures: Vec<serde_json::Value> = serde_json::from_str(NAME_ERROR_FIXTURES).unwrap();

    for fixture in &fixtures {
        let name = fixture["name"].as_str().unwrap();

        // Property names that a field name cannot express.
        if let Some(key) = fixture.get("key").and_then(|k| k.as_str()) {
            match Path::root().checked_child(key) {
                Err(FormError::InvalidName { name: bad, .. }) => {
                    assert_eq!(bad, key, "Fixture '{}': error names the wrong key", name)
                }
                other => panic!("Fixture '{}': expected InvalidName, got {:?}", name, other),
            }
            continue;
        }

        let input = fixture["input"].as_str().unwrap();
        match decode(input) {
            Err(FormError::InvalidName { name: bad, .. }) => {
                assert_eq!(bad, input, "Fixture '{}': error names the wrong input", name)
            }
            other => panic!("Fixture '{}': expected InvalidName, got {:?}", name, other),
        }
    }
}

#[test]
fn test_fixture_intents() {
    let fixtures: Vec<serde_json::Value> = serde_json::from_str(INTENT_FIXTURES).unwrap();

    for fixture in &fixtures {
        let name = fixture["name"].as_str().unwrap();
        let token = fixture["token"].as_str().unwrap();

        let intent = Intent::parse(token)
            .unwrap_or_else(|e| panic!("Fixture '{}': unexpected error: {}", name, e));
        assert_eq!(
            intent.kind().as_str(),
            fixture["kind"].as_str().unwrap(),
            "Fixture '{}': kind mismatch",
            name
        );
        assert_eq!(
            intent.name(),
            fixture["target"].as_str().unwrap(),
            "Fixture '{}': target mismatch",
            name
        );
        assert_eq!(intent.serialize(), token, "Fixture '{}': token did not round-trip", name);
    }
}

#[test]
fn test_fixture_intent_errors() {
    let fixtures: Vec<serde_json::Value> = serde_json::from_str(INTENT_ERROR_FIXTURES).unwrap();

    for fixture in &fixtures {
        let name = fixture["name"].as_str().unwrap();
        let token = fixture["token"].as_str().unwrap();
        let code = fixture["code"].as_str().unwrap();

        match Intent::parse(token) {
            Err(err) => assert_eq!(err.code(), code, "Fixture '{}': {}", name, err),
            Ok(intent) => panic!("Fixture '{}': expected an error, got {:?}", name, intent),
        }
    }
}

#[test]
fn test_fixture_trees() {
    let fixtures: Vec<serde_json::Value> = serde_json::from_str(TREE_FIXTURES).unwrap();

    for fixture in &fixtures {
        let name = fixture["name"].as_str().unwrap();
        let entries = fixture_entries(&fixture["entries"]);
        let expected = tree(fixture["expected"].clone());

        let built = build_tree(entries)
            .unwrap_or_else(|e| panic!("Fixture '{}': unexpected error: {}", name, e));
        assert_eq!(
            built, expected,
            "Fixture '{}': tree mismatch\n  Got:      {:?}\n  Expected: {:?}",
            name, built, expected
        );

        let lossy = fixture.get("lossy").and_then(|v| v.as_bool()).unwrap_or(false);
        if !lossy {
            let rebuilt = build_tree(
                flatten(&built)
                    .into_iter()
                    .map(|(name, value)| (name, FormEntry::from(value))),
            )
            .unwrap();
            assert_eq!(rebuilt, built, "Fixture '{}': flatten did not invert", name);
        }
    }
}

#[test]
fn test_fixture_tree_errors() {
    let fixtures: Vec<serde_json::Value> = serde_json::from_str(TREE_ERROR_FIXTURES).unwrap();

    for fixture in &fixtures {
        let name = fixture["name"].as_str().unwrap();
        let code = fixture["code"].as_str().unwrap();

        match build_tree(fixture_entries(&fixture["entries"])) {
            Err(err) => assert_eq!(err.code(), code, "Fixture '{}': {}", name, err),
            Ok(tree) => panic!("Fixture '{}': expected an error, got {:?}", name, tree),
        }
    }
}

// ── Paths ───────────────────────────────────────────────────────────

#[test]
fn test_malformed_index_is_invalid_name() {
    let err = decode("tasks[abc]").unwrap_err();
    assert!(matches!(err, FormError::InvalidName { .. }));
    assert!(err.is_malformed_input());
    assert!(!err.is_structural());
}

#[test]
fn test_ancestors_exclude_root() {
    let path = decode("tasks[0].content").unwrap();
    let names: Vec<String> = path.ancestors().map(|p| p.to_name()).collect();
    assert_eq!(names, vec!["tasks[0].content", "tasks[0]", "tasks"]);
    assert_eq!(Path::root().ancestors().count(), 0);
}

#[test]
fn test_name_containment() {
    assert!(is_name_within("tasks", "tasks"));
    assert!(is_name_within("tasks", "tasks[0].content"));
    assert!(is_name_within("", "anything.at.all"));
    assert!(!is_name_within("tasks", "tasksX"));
    assert!(!is_name_within("tasks[1]", "tasks[10]"));
    assert!(!is_name_within("tasks[0].content", "tasks[0]"));
}

#[test]
fn test_checked_child_round_trips() {
    let path = Path::root()
        .checked_child("tasks")
        .unwrap()
        .index(2)
        .checked_child("content")
        .unwrap();
    assert_eq!(path.to_name(), "tasks[2].content");
    assert_eq!(decode(&path.to_name()).unwrap(), path);
}

#[test]
fn test_submitted_markers_reject_bad_names() {
    let fields: std::collections::BTreeSet<String> = ["tasks[0].content".to_string()].into();
    let markers = crate::state::submitted_markers(&fields).unwrap();
    assert_eq!(
        markers.into_iter().collect::<Vec<_>>(),
        vec!["", "tasks", "tasks[0]", "tasks[0].content"]
    );

    let fields: std::collections::BTreeSet<String> = ["a..b".to_string()].into();
    assert!(matches!(
        crate::state::submitted_markers(&fields),
        Err(FormError::InvalidName { .. })
    ));
}

// ── Value trees and JSON ────────────────────────────────────────────

#[test]
fn test_json_scalars_convert_like_a_form() {
    let value = crate::json::from_json(
        r#"{"agree":true,"off":false,"none":null,"count":3,"doc":{"$file":{"name":"a.txt","type":"text/plain","size":3}}}"#,
    )
    .unwrap();

    let map = value.as_object().unwrap();
    assert_eq!(map["agree"], Value::from("on"));
    assert_eq!(map["off"], Value::Absent);
    assert_eq!(map["none"], Value::Absent);
    assert_eq!(map["count"], Value::from("3"));
    assert_eq!(
        map["doc"],
        Value::File(FileEntry {
            name: "a.txt".to_string(),
            content_type: "text/plain".to_string(),
            size: 3,
        })
    );

    let again = crate::json::from_json(&crate::json::to_json(&value)).unwrap();
    assert_eq!(again, value);
}

#[test]
fn test_reserved_keys_are_rejected() {
    assert!(crate::json::from_json(r#"{"a.b": "x"}"#).is_err());
    assert!(matches!(
        Value::try_from(json!({"tasks": [{"": "x"}]})),
        Err(FormError::InvalidName { .. })
    ));
    assert!(SubmissionResult::from_json(r#"{"payload": {"x[0]": "y"}}"#).is_err());

    // A dotted key would flatten to `a.b` and come back as `{a: {b: ..}}`.
    let mut map = std::collections::BTreeMap::new();
    map.insert("a.b".to_string(), Value::from("x"));
    let dotted = Value::Object(map);
    assert!(matches!(dotted.check_keys(), Err(FormError::InvalidName { .. })));
    assert!(matches!(
        FormState::initialize(dotted.clone(), None),
        Err(FormError::InvalidName { .. })
    ));

    let state = FormState::initialize(tree(json!({"tasks": ["a"]})), None).unwrap();
    let result = SubmissionResult {
        payload: Some(dotted.clone()),
        ..SubmissionResult::default()
    };
    assert!(matches!(
        state.apply_server_result(&result),
        Err(FormError::InvalidName { .. })
    ));
    assert!(matches!(
        state.apply_intent(Some(&Intent::replace("tasks", 0, dotted)), [("tasks[0]", "a")]),
        Err(FormError::InvalidName { .. })
    ));
}

#[test]
fn test_files_are_skipped_by_flatten() {
    let mut builder = crate::formdata::TreeBuilder::new();
    builder.insert("title", FormEntry::from("T")).unwrap();
    builder
        .insert(
            "avatar",
            FormEntry::File(FileEntry {
                name: "me.png".to_string(),
                content_type: "image/png".to_string(),
                size: 120,
            }),
        )
        .unwrap();
    let (value, fields) = builder.finish();

    assert!(fields.contains("avatar"));
    assert!(matches!(value.get(&decode("avatar").unwrap()), Some(Value::File(_))));
    assert_eq!(flatten(&value), vec![("title".to_string(), "T".to_string())]);
}

#[test]
fn test_remove_keeps_sibling_indices() {
    let mut value = tree(json!({"tasks": ["a", "b", "c"], "title": "T"}));
    assert_eq!(value.remove(&decode("tasks[1]").unwrap()), Some(Value::from("b")));
    assert_eq!(value.remove(&decode("title").unwrap()), Some(Value::from("T")));
    assert_eq!(value, tree(json!({"tasks": ["a", null, "c"]})));
}

// ── List engine ─────────────────────────────────────────────────────

#[test]
fn test_out_of_range_fails_closed() {
    for len in 0..4usize {
        let items: Vec<String> = (0..len).map(|i| i.to_string()).collect();
        let base = if len == 0 {
            tree(json!({}))
        } else {
            tree(json!({ "tasks": items }))
        };
        let path = decode("tasks").unwrap();

        let ops = [
            ListOp::Remove { index: len },
            ListOp::Reorder { from: len, to: 0 },
            ListOp::Reorder { from: 0, to: len },
            ListOp::Replace {
                index: len,
                value: Value::from("x"),
            },
        ];
        for op in &ops {
            let mut value = base.clone();
            match apply_to_value(&mut value, &path, op) {
                Err(FormError::IndexOutOfRange { length, .. }) => {
                    assert_eq!(length, len, "{:?} on length {}", op, len)
                }
                other => panic!("{:?} on length {}: expected IndexOutOfRange, got {:?}", op, len, other),
            }
            assert_eq!(value, base, "{:?} on length {} changed the tree", op, len);
        }
    }
}

#[test]
fn test_insert_clamps_and_appends() {
    let path = decode("tasks").unwrap();
    let mut value = tree(json!({"tasks": ["a", "b"]}));

    apply_to_value(
        &mut value,
        &path,
        &ListOp::Insert {
            index: Some(10),
            default_value: Some(Value::from("z")),
        },
    )
    .unwrap();
    apply_to_value(
        &mut value,
        &path,
        &ListOp::Insert {
            index: Some(0),
            default_value: None,
        },
    )
    .unwrap();

    assert_eq!(value, tree(json!({"tasks": [null, "a", "b", "z"]})));
}

#[test]
fn test_list_op_on_scalar_is_invalid_operation() {
    let mut value = tree(json!({"title": "T"}));
    let result = apply_to_value(
        &mut value,
        &decode("title").unwrap(),
        &ListOp::Insert {
            index: None,
            default_value: None,
        },
    );
    assert!(matches!(result, Err(FormError::InvalidOperation { .. })));
}

#[test]
fn test_list_path_through_leaf_is_invalid_operation() {
    let base = tree(json!({"title": "T", "tasks": {"content": "x"}}));
    let ops = [
        ListOp::Insert {
            index: None,
            default_value: None,
        },
        ListOp::Remove { index: 0 },
        ListOp::Reorder { from: 0, to: 1 },
    ];
    for target in ["title.items", "title[0]", "tasks[0].items"] {
        for op in &ops {
            let mut value = base.clone();
            match apply_to_value(&mut value, &decode(target).unwrap(), op) {
                Err(err @ FormError::InvalidOperation { .. }) => assert!(err.is_structural()),
                other => panic!("{:?} on {}: expected InvalidOperation, got {:?}", op, target, other),
            }
            assert_eq!(value, base, "{:?} on {} changed the tree", op, target);
        }
    }
}

// ── Form state: list intents ────────────────────────────────────────

#[test]
fn test_reorder_moves_values_and_keys_together() {
    let state = FormState::initialize(tree(json!({"tasks": ["A", "B", "C"]})), None).unwrap();
    let k = state.list_keys("tasks").to_vec();
    assert_eq!(k.len(), 3);

    let next = state
        .apply_intent(
            Some(&Intent::reorder("tasks", 2, 0)),
            [("tasks[0]", "A"), ("tasks[1]", "B"), ("tasks[2]", "C")],
        )
        .unwrap();

    assert_eq!(next.value(), &tree(json!({"tasks": ["C", "A", "B"]})));
    assert_eq!(next.list_keys("tasks"), &[k[2].clone(), k[0].clone(), k[1].clone()]);
}

#[test]
fn test_insert_then_remove_restores_keys() {
    let state = FormState::initialize(tree(json!({"tasks": ["A", "B"]})), None).unwrap();
    let before = state.list_keys("tasks").to_vec();

    let inserted = state
        .apply_intent(
            Some(&Intent::insert("tasks", Some(1), Some(Value::from("X")))),
            flatten(state.value()),
        )
        .unwrap();
    assert_eq!(inserted.value(), &tree(json!({"tasks": ["A", "X", "B"]})));
    let fresh = inserted.list_keys("tasks")[1].clone();
    assert!(!before.contains(&fresh));
    assert_eq!(inserted.list_keys("tasks")[0], before[0]);
    assert_eq!(inserted.list_keys("tasks")[2], before[1]);

    let removed = inserted
        .apply_intent(Some(&Intent::remove("tasks", 1)), flatten(inserted.value()))
        .unwrap();
    assert_eq!(removed.value(), &tree(json!({"tasks": ["A", "B"]})));
    assert_eq!(removed.list_keys("tasks"), before.as_slice());
}

#[test]
fn test_reorder_then_inverse_restores_order() {
    let original = FormState::initialize(tree(json!({"tasks": ["A", "B", "C", "D"]})), None).unwrap();

    for from in 0..4 {
        for to in 0..4 {
            if from == to {
                continue;
            }
            let moved = original
                .apply_intent(Some(&Intent::reorder("tasks", from, to)), flatten(original.value()))
                .unwrap();
            let back = moved
                .apply_intent(Some(&Intent::reorder("tasks", to, from)), flatten(moved.value()))
                .unwrap();
            assert_eq!(back.value(), original.value(), "reorder({}, {})", from, to);
            assert_eq!(back.list_keys("tasks"), original.list_keys("tasks"), "reorder({}, {})", from, to);
        }
    }
}

#[test]
fn test_replace_keeps_element_key() {
    let state = FormState::initialize(
        tree(json!({"tasks": [{"content": "a", "tags": ["x"]}, {"content": "b"}]})),
        None,
    ).unwrap();
    let task_keys = state.list_keys("tasks").to_vec();
    let old_tag_key = state.list_keys("tasks[0].tags")[0].clone();

    let next = state
        .apply_intent(
            Some(&Intent::replace(
                "tasks",
                0,
                tree(json!({"content": "z", "tags": ["p", "q"]})),
            )),
            flatten(state.value()),
        )
        .unwrap();

    assert_eq!(
        next.value(),
        &tree(json!({"tasks": [{"content": "z", "tags": ["p", "q"]}, {"content": "b"}]}))
    );
    assert_eq!(next.list_keys("tasks"), task_keys.as_slice());
    assert_eq!(next.list_keys("tasks[0].tags").len(), 2);
    assert!(!next.list_keys("tasks[0].tags").contains(&old_tag_key));
}

#[test]
fn test_insert_creates_missing_list() {
    let state = FormState::initialize(Value::object(), None).unwrap();
    let next = state
        .apply_intent(
            Some(&Intent::insert("tasks", None, Some(Value::from("first")))),
            Vec::<(String, String)>::new(),
        )
        .unwrap();

    assert_eq!(next.value(), &tree(json!({"tasks": ["first"]})));
    assert_eq!(next.list_keys("tasks").len(), 1);
    assert!(next.touched_fields().contains("tasks"));
}

#[test]
fn test_removing_out_of_range_leaves_state_untouched() {
    let state = FormState::initialize(tree(json!({"tasks": ["A"]})), None).unwrap();
    let result = state.apply_intent(Some(&Intent::remove("tasks", 3)), [("tasks[0]", "A")]);
    assert!(matches!(
        result,
        Err(FormError::IndexOutOfRange {
            index: 3,
            length: 1,
            ..
        })
    ));
    assert_eq!(state.list_keys("tasks").len(), 1);
}

#[test]
fn test_list_ops_remap_markers_and_errors() {
    let state = FormState::initialize(
        tree(json!({"tasks": [{"content": ""}, {"content": ""}]})),
        None,
    ).unwrap();
    let validated = state
        .apply_intent(
            Some(&Intent::validate("tasks[1].content")),
            flatten(state.value()),
        )
        .unwrap();
    let mut errors = ErrorTree::new();
    errors.push("tasks[0].content", "Required");
    errors.push("tasks[1].content", "Too short");
    let validated = validated.merge_validation(Some(&Intent::validate("tasks[1].content")), Some(errors));

    let removed = validated
        .apply_intent(Some(&Intent::remove("tasks", 0)), flatten(validated.value()))
        .unwrap();

    assert!(removed.is_validated("tasks[0].content"));
    assert!(removed.is_validated("tasks[0]"));
    assert!(removed.is_validated("tasks"));
    assert!(!removed.is_validated("tasks[1].content"));
    assert!(removed.touched_fields().contains("tasks[0].content"));

    let error = removed.error().unwrap();
    assert_eq!(error.get("tasks[0].content"), Some(&["Too short".to_string()][..]));
    assert_eq!(error.get("tasks[1].content"), None);
}

// ── Form state: other intents ───────────────────────────────────────

#[test]
fn test_validate_marks_ancestors() {
    let state = FormState::initialize(tree(json!({"tasks": [{"content": ""}]})), None).unwrap();
    let next = state
        .apply_intent(
            Some(&Intent::validate("tasks[0].content")),
            [("tasks[0].content", "")],
        )
        .unwrap();

    for name in ["tasks[0].content", "tasks[0]", "tasks"] {
        assert!(next.is_validated(name), "{} should be validated", name);
    }
    assert!(!next.is_validated(""));
    assert!(next.touched_fields().contains("tasks[0].content"));
}

#[test]
fn test_submit_marks_every_field() {
    let state = FormState::initialize(Value::object(), None).unwrap();
    let next = state
        .apply_intent(None, [("title", "x"), ("tasks[0].content", "y")])
        .unwrap();

    for name in ["", "title", "tasks", "tasks[0]", "tasks[0].content"] {
        assert!(next.is_validated(name), "{} should be validated", name);
        assert!(next.touched_fields().contains(name), "{} should be touched", name);
    }
}

#[test]
fn test_reset_restores_defaults_with_fresh_keys() {
    let default_value = tree(json!({"title": "T", "tasks": [{"content": "x"}]}));
    let state = FormState::initialize(default_value.clone(), None).unwrap();
    let old_key = state.list_keys("tasks")[0].clone();

    let edited = state
        .apply_intent(None, [("title", "T"), ("tasks[0].content", "y")])
        .unwrap();
    assert_eq!(
        edited.value(),
        &tree(json!({"title": "T", "tasks": [{"content": "y"}]}))
    );
    assert_eq!(edited.list_keys("tasks")[0], old_key);

    let reset = edited.reset(None).unwrap();
    assert_eq!(reset.value(), &default_value);
    assert_eq!(reset.list_keys("tasks").len(), 1);
    assert_ne!(reset.list_keys("tasks")[0], old_key);
    assert!(reset.validated_fields().is_empty());
    assert!(reset.touched_fields().is_empty());
    assert!(reset.error().is_none());

    let via_intent = edited
        .apply_intent(Some(&Intent::reset_all()), flatten(edited.value()))
        .unwrap();
    assert_eq!(via_intent.value(), &default_value);
    assert_ne!(via_intent.list_keys("tasks")[0], old_key);
}

#[test]
fn test_reset_one_field() {
    let state = FormState::initialize(tree(json!({"title": "T", "body": "B"})), None).unwrap();
    let edited = state
        .apply_intent(None, [("title", "changed"), ("body", "changed")])
        .unwrap();
    let mut errors = ErrorTree::new();
    errors.push("title", "Taken");
    let edited = edited.merge_validation(None, Some(errors));

    let next = edited
        .apply_intent(Some(&Intent::reset("title")), flatten(edited.value()))
        .unwrap();

    assert_eq!(next.value(), &tree(json!({"title": "T", "body": "changed"})));
    assert!(!next.is_validated("title"));
    assert!(next.is_validated("body"));
    assert!(next.error().map_or(true, |e| e.get("title").is_none()));
}

#[test]
fn test_update_sets_value_and_markers() {
    let state = FormState::initialize(tree(json!({"title": "", "tags": ["a"]})), None).unwrap();
    let old_tag_key = state.list_keys("tags")[0].clone();

    let next = state
        .apply_intent(
            Some(&Intent::update("tags", Some(tree(json!(["b", "c"]))), None)),
            [("title", ""), ("tags[0]", "a")],
        )
        .unwrap();
    assert_eq!(next.value(), &tree(json!({"title": "", "tags": ["b", "c"]})));
    assert!(next.is_validated("tags"));
    assert_eq!(next.list_keys("tags").len(), 2);
    assert!(!next.list_keys("tags").contains(&old_tag_key));

    let cleared = next
        .apply_intent(
            Some(&Intent::update("tags", None, Some(false))),
            flatten(next.value()),
        )
        .unwrap();
    assert!(!cleared.is_validated("tags"));
    assert!(!cleared.is_validated("tags[0]"));
}

#[test]
fn test_entries_win_over_stale_value() {
    let state = FormState::initialize(tree(json!({"tasks": ["A", "B", "C"]})), None).unwrap();
    let next = state.apply_intent(None, [("tasks[0]", "A")]).unwrap();
    assert_eq!(next.value(), &tree(json!({"tasks": ["A"]})));
    assert_eq!(next.list_keys("tasks").len(), 1);
    assert_eq!(next.list_keys("tasks")[0], state.list_keys("tasks")[0]);
}

// ── Submissions ─────────────────────────────────────────────────────

#[test]
fn test_conflicting_intents_are_malformed() {
    let config = FormConfig::default();
    let result = parse_submission(
        vec![
            ("__intent__", "validate/a"),
            ("a", "x"),
            ("__intent__", "validate/b"),
        ],
        &config,
    );
    assert!(matches!(result, Err(FormError::MalformedIntent { .. })));

    let repeated = parse_submission(
        vec![("__intent__", "validate/a"), ("__intent__", "validate/a"), ("a", "x")],
        &config,
    )
    .unwrap();
    assert_eq!(repeated.intent, Some(Intent::validate("a")));
    assert_eq!(repeated.payload, tree(json!({"a": "x"})));
}

#[test]
fn test_button_round_trips_through_submission() {
    let config = FormConfig {
        intent_field: "_action".to_string(),
        ..FormConfig::default()
    };
    let (field, token) = Intent::remove("tasks", 0).button(&config.intent_field);
    let submission = parse_submission(
        vec![
            ("tasks[0]".to_string(), "A".to_string()),
            (field, token),
            ("tasks[1]".to_string(), "B".to_string()),
        ],
        &config,
    )
    .unwrap();

    assert_eq!(submission.kind(), IntentKind::List);
    assert!(!submission.fields.contains("_action"));
    assert_eq!(
        submission.intended_value().unwrap(),
        Some(tree(json!({"tasks": ["B"]})))
    );

    let state = FormState::initialize(tree(json!({"tasks": ["A", "B"]})), None).unwrap();
    let second_key = state.list_keys("tasks")[1].clone();
    let (field, token) = Intent::remove("tasks", 0).button(&config.intent_field);
    let next = crate::reconcile(
        &state,
        vec![
            (field, token),
            ("tasks[0]".to_string(), "A".to_string()),
            ("tasks[1]".to_string(), "B".to_string()),
        ],
        &config,
    )
    .unwrap();
    assert_eq!(next.list_keys("tasks"), &[second_key]);
}

#[test]
fn test_reply_to_plain_submit() {
    let submission = parse_submission(
        vec![("email", "a@b.c"), ("password", "hunter2")],
        &FormConfig::default(),
    )
    .unwrap();
    assert_eq!(classify(submission.intent.as_ref()), IntentKind::Submit);

    let ok = submission
        .reply(ReplyOptions {
            hide_fields: vec!["password".to_string()],
            ..ReplyOptions::default()
        })
        .unwrap();
    assert_eq!(ok.status, Some(SubmissionStatus::Success));
    assert_eq!(ok.payload, Some(tree(json!({"email": "a@b.c"}))));
    assert!(ok.state.validated.contains(""));
    assert!(ok.state.validated.contains("email"));
    assert!(ok.error.is_none());

    let failed = submission
        .reply(ReplyOptions {
            form_errors: vec!["Invalid credentials".to_string()],
            ..ReplyOptions::default()
        })
        .unwrap();
    assert_eq!(failed.status, Some(SubmissionStatus::Error));
    assert_eq!(
        failed.error.as_ref().and_then(|e| e.form_errors()),
        Some(&["Invalid credentials".to_string()][..])
    );

    let reset = submission
        .reply(ReplyOptions {
            reset_form: true,
            ..ReplyOptions::default()
        })
        .unwrap();
    assert!(reset.reset_form);
    assert_eq!(reset.payload, None);
}

#[test]
fn test_reply_to_intent_has_no_status() {
    let submission = parse_submission(
        vec![("__intent__", "validate/email"), ("email", "")],
        &FormConfig::default(),
    )
    .unwrap();
    let reply = submission.reply(ReplyOptions::default()).unwrap();
    assert_eq!(reply.status, None);
    assert!(reply.state.validated.contains("email"));
    assert!(!reply.state.validated.contains(""));
}

// ── Server results ──────────────────────────────────────────────────

#[test]
fn test_server_result_is_adopted() {
    let state = FormState::initialize(tree(json!({"username": ""})), None).unwrap();
    let result = SubmissionResult::from_json(
        r#"{"status":"error","payload":{"username":"taken"},"error":{"username":["Already taken"]},"state":{"validated":["username"],"touched":["username"]}}"#,
    )
    .unwrap();

    let next = state.apply_server_result(&result).unwrap();
    assert_eq!(next.status(), Some(SubmissionStatus::Error));
    assert_eq!(next.value(), &tree(json!({"username": "taken"})));
    assert!(next.is_validated("username"));

    let config = FormConfig::default();
    let meta = FormMetadata::new(&next, &config);
    let field = meta.field("username").unwrap();
    assert_eq!(field.errors, Some(vec!["Already taken".to_string()]));
    assert!(!field.valid);
}

#[test]
fn test_server_result_can_reset_form() {
    let state = FormState::initialize(tree(json!({"title": ""})), None).unwrap();
    let edited = state.apply_intent(None, [("title", "draft")]).unwrap();

    let result = SubmissionResult {
        status: Some(SubmissionStatus::Success),
        payload: Some(tree(json!({"title": "saved"}))),
        reset_form: true,
        ..SubmissionResult::default()
    };
    let next = edited.apply_server_result(&result).unwrap();
    assert_eq!(next.default_value(), &tree(json!({"title": "saved"})));
    assert_eq!(next.value(), next.default_value());
    assert!(next.validated_fields().is_empty());
    assert_eq!(next.status(), Some(SubmissionStatus::Success));

    let reloaded = FormState::initialize(tree(json!({"title": ""})), Some(&result)).unwrap();
    assert_eq!(reloaded.default_value(), &tree(json!({"title": "saved"})));
}

#[test]
fn test_initialize_from_last_result() {
    let result = SubmissionResult::from_json(
        r#"{"status":"error","payload":{"tasks":["a","b"]},"error":{"tasks[1]":["Bad"]},"state":{"validated":["tasks[1]","tasks"],"touched":["tasks[1]"]}}"#,
    )
    .unwrap();
    let state = FormState::initialize(tree(json!({"tasks": []})), Some(&result)).unwrap();

    assert_eq!(state.value(), &tree(json!({"tasks": ["a", "b"]})));
    assert_eq!(state.list_keys("tasks").len(), 2);
    assert!(state.is_validated("tasks[1]"));
    assert_eq!(state.status(), Some(SubmissionStatus::Error));
}

#[test]
fn test_state_serializes_camel_case() {
    let state = FormState::initialize(tree(json!({"tasks": ["a"]})), None).unwrap();
    let json = serde_json::to_value(&state).unwrap();
    assert_eq!(json["defaultValue"], json!({"tasks": ["a"]}));
    assert!(json["keys"]["tasks"].is_array());
    assert!(json["validatedFields"].as_array().unwrap().is_empty());
}

// ── Metadata ────────────────────────────────────────────────────────

#[test]
fn test_field_ids() {
    assert_eq!(field_id("signup", ""), "signup");
    assert_eq!(field_id("signup", "email"), "signup-field-email");
    assert_eq!(field_id("form", "tasks[0].content"), "form-field-tasks-0--content");
}

#[test]
fn test_metadata_for_list_elements() {
    let config = FormConfig::with_form_id("todo");
    let state = FormState::initialize(
        tree(json!({"title": "", "tasks": [{"content": "a"}, {"content": "b"}]})),
        None,
    ).unwrap();
    let meta = FormMetadata::new(&state, &config);

    let items = meta.field_list("tasks").unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[1].name, "tasks[1]");
    assert_eq!(items[1].key, state.list_keys("tasks")[1]);

    let element = meta.field("tasks[1]").unwrap();
    assert_eq!(element.key.as_deref(), Some(state.list_keys("tasks")[1].as_str()));
    assert_eq!(element.id, "todo-field-tasks-1-");
    assert_eq!(element.error_id, "todo-field-tasks-1--error");
    assert_eq!(element.description_id, "todo-field-tasks-1--description");

    assert!(meta.field_list("missing").unwrap().is_empty());
    assert!(matches!(
        meta.field_list("title"),
        Err(FormError::InvalidOperation { .. })
    ));
    assert!(matches!(meta.field("tasks[x]"), Err(FormError::InvalidName { .. })));
    assert_eq!(meta.fieldset_names("").unwrap(), vec!["tasks", "title"]);
}

#[test]
fn test_errors_visible_only_once_validated() {
    let config = FormConfig::default();
    let state = FormState::initialize(tree(json!({"title": "", "body": ""})), None).unwrap();
    let next = state
        .apply_intent(Some(&Intent::validate("title")), [("title", ""), ("body", "")])
        .unwrap();
    let mut errors = ErrorTree::new();
    errors.push("title", "Required");
    errors.push("body", "Required");
    let next = next.merge_validation(Some(&Intent::validate("title")), Some(errors));
    assert_eq!(next.status(), None);

    let meta = FormMetadata::new(&next, &config);
    assert_eq!(meta.field("title").unwrap().errors, Some(vec!["Required".to_string()]));
    assert_eq!(meta.field("body").unwrap().errors, None);
    assert!(meta.field("body").unwrap().valid);

    let form = meta.form();
    assert!(!form.valid);
    assert_eq!(form.all_errors.keys().collect::<Vec<_>>(), vec!["title"]);
    assert_eq!(form.id, "form");
}

#[test]
fn test_dirty_tracking() {
    assert!(!is_dirty(Some(&Value::from("")), None));
    assert!(!is_dirty(Some(&Value::Absent), Some(&Value::from(""))));
    assert!(is_dirty(Some(&Value::from("a")), Some(&Value::from("b"))));
    assert!(is_dirty(Some(&tree(json!(["a"]))), Some(&tree(json!(["a", "b"])))));
    assert!(!is_dirty(Some(&tree(json!({"a": ""}))), None));
    assert!(is_dirty(Some(&tree(json!({"a": "x"}))), Some(&tree(json!({})))));

    let config = FormConfig::default();
    let state = FormState::initialize(tree(json!({"title": "T", "body": ""})), None).unwrap();
    let edited = state.apply_intent(None, [("title", "changed"), ("body", "")]).unwrap();
    let meta = FormMetadata::new(&edited, &config);
    assert!(meta.field("title").unwrap().dirty);
    assert!(!meta.field("body").unwrap().dirty);
    assert!(meta.form().dirty);
}

#[test]
fn test_constraints_resolve_through_wildcards() {
    assert_eq!(wildcard_name("tasks[3].tags[10]"), "tasks[].tags[]");

    let mut constraints = ConstraintMap::new();
    constraints.insert(
        "tasks[].content",
        Constraint {
            required: true,
            ..Constraint::default()
        },
    );
    constraints.insert(
        "tasks[0].content",
        Constraint {
            max_length: Some(5),
            ..Constraint::default()
        },
    );

    assert!(constraints.resolve("tasks[4].content").unwrap().required);
    assert_eq!(constraints.resolve("tasks[0].content").unwrap().max_length, Some(5));
    assert!(constraints.resolve("title").is_none());

    let config = FormConfig::default();
    let state = FormState::initialize(tree(json!({"tasks": [{"content": ""}]})), None).unwrap();
    let meta = FormMetadata::new(&state, &config).with_constraints(&constraints);
    assert!(meta.field("tasks[0].content").unwrap().constraint.is_some());
}

// ── Validation ──────────────────────────────────────────────────────

fn signup_constraints() -> ConstraintMap {
    serde_json::from_value(json!({
        "username": { "required": true, "minLength": 3, "pattern": "[a-z]+" },
        "tasks[].content": { "required": true }
    }))
    .unwrap()
}

#[test]
fn test_constraint_validator_checks_every_element() {
    let validator = ConstraintValidator::new(signup_constraints());
    let errors = validator
        .check(&tree(json!({"username": "Ab", "tasks": [{"content": "x"}, {"content": ""}]})))
        .unwrap()
        .unwrap();

    assert_eq!(
        errors.get("username").unwrap(),
        &[
            "Must be at least 3 characters".to_string(),
            "Does not match the required pattern".to_string()
        ]
    );
    assert_eq!(errors.get("tasks[1].content").unwrap(), &["Required".to_string()]);
    assert!(errors.get("tasks[0].content").is_none());

    assert!(validator
        .check(&tree(json!({"username": "abc", "tasks": []})))
        .unwrap()
        .is_none());
}

#[test]
fn test_exact_constraint_overrides_wildcard() {
    let constraints: ConstraintMap = serde_json::from_value(json!({
        "tasks[].content": { "required": true },
        "tasks[0].content": { "minLength": 5 }
    }))
    .unwrap();
    assert!(!constraints.resolve("tasks[0].content").unwrap().required);

    let validator = ConstraintValidator::new(constraints);
    let errors = validator
        .check(&tree(json!({"tasks": [{"content": ""}, {"content": ""}, {"content": "abc"}]})))
        .unwrap()
        .unwrap();
    assert_eq!(errors.get("tasks[0].content"), None);
    assert_eq!(errors.get("tasks[1].content").unwrap(), &["Required".to_string()]);
    assert_eq!(errors.get("tasks[2].content"), None);

    let errors = validator
        .check(&tree(json!({"tasks": [{"content": "abc"}]})))
        .unwrap()
        .unwrap();
    assert_eq!(
        errors.get("tasks[0].content").unwrap(),
        &["Must be at least 5 characters".to_string()]
    );
}

#[test]
fn test_bad_pattern_is_reported() {
    let mut constraints = ConstraintMap::new();
    constraints.insert(
        "code",
        Constraint {
            pattern: Some("(".to_string()),
            ..Constraint::default()
        },
    );
    let result = ConstraintValidator::new(constraints).check(&tree(json!({"code": "x"})));
    assert!(matches!(
        result,
        Err(crate::validate::ConstraintError::Pattern { .. })
    ));
}

#[test]
fn test_validate_submission_merges_errors() {
    let config = FormConfig::default();
    let state = FormState::initialize(tree(json!({"username": "", "tasks": []})), None).unwrap();
    let submission = parse_submission(vec![("username", "")], &config).unwrap();

    let validator = ConstraintValidator::new(signup_constraints());
    let next = block_on(validate_submission(&state, &submission, &validator)).unwrap();

    assert_eq!(next.status(), Some(SubmissionStatus::Error));
    assert_eq!(
        next.error().and_then(|e| e.get("username")),
        Some(&["Required".to_string()][..])
    );
    let meta = FormMetadata::new(&next, &config);
    assert!(!meta.form().valid);
}

#[test]
fn test_adapter_failure_is_not_a_pass() {
    let state = FormState::initialize(Value::object(), None).unwrap();
    let submission = parse_submission(vec![("title", "x")], &FormConfig::default()).unwrap();
    let validator = SyncValidator::new(|_: &Value, _: &ValidationContext<'_>| {
        Err::<Option<ErrorTree>, String>("service unavailable".to_string())
    });

    match block_on(validate_submission(&state, &submission, &validator)) {
        Err(ReconcileError::Adapter(message)) => assert_eq!(message, "service unavailable"),
        other => panic!("expected adapter error, got {:?}", other.map(|s| s.status())),
    }
}

#[test]
fn test_reset_skips_validation() {
    let state = FormState::initialize(tree(json!({"title": "T"})), None).unwrap();
    let submission = parse_submission(
        vec![("__intent__", "reset/{}"), ("title", "edited")],
        &FormConfig::default(),
    )
    .unwrap();
    let validator = SyncValidator::new(|_: &Value, _: &ValidationContext<'_>| {
        Err::<Option<ErrorTree>, String>("must not run".to_string())
    });

    let next = block_on(validate_submission(&state, &submission, &validator)).unwrap();
    assert_eq!(next.value(), &tree(json!({"title": "T"})));
}

#[test]
fn test_validator_sees_intent() {
    let state = FormState::initialize(Value::object(), None).unwrap();
    let submission = parse_submission(
        vec![("__intent__", "validate/title"), ("title", "")],
        &FormConfig::default(),
    )
    .unwrap();
    let seen = Cell::new(None);
    let validator = SyncValidator::new(|_: &Value, context: &ValidationContext<'_>| {
        seen.set(context.intent.map(|i| i.kind()));
        Ok::<_, String>(None)
    });

    let next = block_on(validate_submission(&state, &submission, &validator)).unwrap();
    assert_eq!(seen.get(), Some(IntentKind::Validate));
    assert!(next.error().is_none());
    assert_eq!(next.status(), None);
}

// ── Sequencing and memoization ──────────────────────────────────────

#[test]
fn test_only_latest_submission_is_accepted() {
    let mut sequence = SubmissionSequence::new();
    let first = sequence.issue();
    let second = sequence.issue();

    assert!(first < second);
    assert_eq!(second.value(), first.value() + 1);
    assert_eq!(sequence.accept(first, "stale"), None);
    assert_eq!(sequence.accept(second, "fresh"), Some("fresh"));
    assert!(sequence.is_current(second));
}

#[test]
fn test_single_slot_cache() {
    let calls = Cell::new(0);
    let mut cache: SingleSlotCache<String, usize> = SingleSlotCache::new();
    let lookup = |name: &String| -> Result<usize, String> {
        calls.set(calls.get() + 1);
        Ok(name.len())
    };

    assert_eq!(cache.get_or_try_insert_with("alice".to_string(), lookup), Ok(5));
    assert_eq!(cache.get_or_try_insert_with("alice".to_string(), lookup), Ok(5));
    assert_eq!(calls.get(), 1);

    assert_eq!(cache.get_or_try_insert_with("bob".to_string(), lookup), Ok(3));
    assert_eq!(calls.get(), 2);
    assert_eq!(cache.get(&"alice".to_string()), None);

    let failed = cache.get_or_try_insert_with("bob".to_string(), |_| Err::<usize, _>("offline".to_string()));
    assert_eq!(failed, Ok(3));

    cache.clear();
    let failed = cache.get_or_try_insert_with("bob".to_string(), |_| Err::<usize, _>("offline".to_string()));
    assert_eq!(failed, Err("offline".to_string()));
    assert_eq!(cache.get(&"bob".to_string()), None);
}

#[test]
fn test_single_slot_cache_async_and_custom_eq() {
    let mut cache: SingleSlotCache<String, bool> =
        SingleSlotCache::with_eq(|a: &String, b: &String| a.eq_ignore_ascii_case(b));
    let calls = Cell::new(0);

    for name in ["Alice", "ALICE", "alice"] {
        let taken = block_on(cache.get_or_try_insert_async(name.to_string(), |name| {
            calls.set(calls.get() + 1);
            let taken = name.to_lowercase() == "alice";
            async move { Ok::<_, String>(taken) }
        }));
        assert_eq!(taken, Ok(true));
    }
    assert_eq!(calls.get(), 1);

    let result = block_on(cache.get_or_try_insert_async("carol".to_string(), |_| async {
        Err::<bool, _>("timeout".to_string())
    }));
    assert_eq!(result, Err("timeout".to_string()));
    assert_eq!(cache.get(&"alice".to_string()), None);
}

#[test]
fn test_config_defaults() {
    let config = FormConfig::from_json(r#"{"formId":"signup"}"#).unwrap();
    assert_eq!(config.form_id, "signup");
    assert_eq!(config.intent_field, crate::config::DEFAULT_INTENT_FIELD);
}
