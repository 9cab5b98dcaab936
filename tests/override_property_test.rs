//! 覆盖配置与缓存键的属性测试

use chips_pipeline::{builtin, Engine, OverrideMap, PipelineConfig, ProvidedInstances};
use proptest::prelude::*;
use serde_json::json;

fn segment() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_]{0,6}"
}

fn engine() -> Engine {
    Engine::new(builtin::registry().unwrap(), PipelineConfig::default())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn test_dotted_assignment_lands_at_path(
        segments in prop::collection::vec(segment(), 1..5),
        value in "[A-Za-z0-9=./:-]{0,12}"
    ) {
        let key = segments.join(".");
        let overrides = OverrideMap::parse([format!("{}={}", key, value)]).unwrap();

        let (last, parents) = segments.split_last().unwrap();
        let mut scope = &overrides;
        for parent in parents {
            scope = scope.child(parent).unwrap();
        }
        prop_assert_eq!(scope.value(last), Some(&json!(value)));
    }

    #[test]
    fn test_assignments_round_trip(
        entries in prop::collection::btree_map(
            prop::collection::vec(segment(), 1..4).prop_map(|s| s.join(".")),
            "[a-z0-9]{1,8}",
            1..8
        )
    ) {
        let assignments: Vec<String> = entries
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        // 同一路径既是叶子又有子键时，叶子合并为该作用域的 name
        let overrides = OverrideMap::parse(&assignments).unwrap();

        let replay = OverrideMap::parse(overrides.to_assignments()).unwrap();
        prop_assert_eq!(&replay, &overrides);
        prop_assert_eq!(OverrideMap::from_json(&overrides.to_json()).unwrap(), overrides);
    }

    #[test]
    fn test_cache_key_ignores_spelling(
        hits in 1i64..5000,
        porter in any::<bool>(),
        stops in any::<bool>(),
        reverse in any::<bool>()
    ) {
        let engine = engine();
        let none = ProvidedInstances::new();
        let stemmer = if porter { "porter" } else { "none" };

        let mut assignments = vec![
            format!("hits={}", hits),
            format!("index.stemmer={}", stemmer),
            format!("index.indexstops={}", stops),
            "index.collection=dummy".to_string(),
        ];
        if reverse {
            assignments.reverse();
        }
        let from_text = engine
            .resolve("searcher", "termmatch", &OverrideMap::parse(&assignments).unwrap(), &none)
            .unwrap();

        let typed = OverrideMap::from_json(&json!({
            "hits": hits,
            "index": { "stemmer": stemmer, "indexstops": stops },
        }))
        .unwrap();
        let from_json = engine.resolve("searcher", "termmatch", &typed, &none).unwrap();

        prop_assert_eq!(&from_text.cache_key, &from_json.cache_key);
        prop_assert_eq!(from_text.cache_key.digest(), from_json.cache_key.digest());

        // 输出的配置树重新输入后得到同一个键
        let replay = OverrideMap::from_json(&from_text.to_json()).unwrap();
        let again = engine.resolve("searcher", "termmatch", &replay, &none).unwrap();
        prop_assert_eq!(&again.cache_key, &from_text.cache_key);
    }

    #[test]
    fn test_distinct_configs_get_distinct_keys(a in 1i64..5000, b in 1i64..5000) {
        prop_assume!(a != b);
        let engine = engine();
        let none = ProvidedInstances::new();
        let resolve = |hits: i64| {
            engine
                .resolve(
                    "searcher",
                    "termmatch",
                    &OverrideMap::parse([format!("hits={}", hits)]).unwrap(),
                    &none,
                )
                .unwrap()
        };
        prop_assert_ne!(&resolve(a).cache_key, &resolve(b).cache_key);
    }
}
