#![no_main]

use ferrous_locator::naming::instance_name;
use libfuzzer_sys::fuzz_target;
use serde_json::{Map, Value};

fuzz_target!(|data: &[u8]| {
    let Ok(args) = serde_json::from_slice::<Value>(data) else {
        return;
    };

    let name = instance_name("Fuzzed(1)", Some(&args));
    assert!(name.starts_with("Fuzzed(1)"));

    // Reinserting the top-level keys backwards must not change the name
    if let Value::Object(map) = &args {
        let reversed: Map<String, Value> = map
            .iter()
            .rev()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        assert_eq!(name, instance_name("Fuzzed(1)", Some(&Value::Object(reversed))));
    }
});
