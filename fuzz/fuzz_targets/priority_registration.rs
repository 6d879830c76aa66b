#![no_main]

use ferrous_locator::{Container, DiError, FactoryContext, Scope, ServiceArgs, Target, Token};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.is_empty() || data.len() > 64 {
        return;
    }

    let runtime = match tokio::runtime::Builder::new_current_thread().build() {
        Ok(rt) => rt,
        Err(_) => return,
    };
    let token = Token::<usize>::new("Fuzzed");
    let container = Container::new();

    // Each byte is one registration: the low nibble is its priority, bit 4 deletes the winner
    let mut live: Vec<(usize, i32)> = Vec::new();
    for (index, byte) in data.iter().enumerate() {
        if byte & 0x10 != 0 {
            let removed = container.registry().delete(&token);
            let best = live.iter().enumerate().max_by_key(|(_, (i, p))| (*p, *i)).map(|(pos, _)| pos);
            assert_eq!(removed.is_some(), best.is_some());
            if let Some(pos) = best {
                live.remove(pos);
            }
            continue;
        }
        let priority = (byte & 0x0f) as i32 - 8;
        let target = Target::factory(move |_: FactoryContext, _: ServiceArgs| async move {
            Ok::<_, DiError>(index)
        });
        container.registry().set(&token, Scope::Transient, target, priority);
        live.push((index, priority));
    }

    let resolved = runtime.block_on(container.get(&token));
    match live.iter().max_by_key(|(i, p)| (*p, *i)) {
        Some((index, _)) => assert_eq!(*resolved.unwrap(), *index),
        None => assert!(matches!(resolved, Err(DiError::FactoryNotFound(_)))),
    }
});
