//! Integration tests for the copy-on-write trie

use quarry::trie::Trie;

#[test]
fn test_trie_versions_are_independent() {
    let t0 = Trie::new();
    let t1 = t0.put(b"ab", 1u32);
    let t2 = t1.put(b"ac", 2u32);

    assert_eq!(t0.get::<u32>(b"ab"), None);
    assert_eq!(t1.get::<u32>(b"ab"), Some(&1));
    assert_eq!(t1.get::<u32>(b"ac"), None);
    assert_eq!(t2.get::<u32>(b"ab"), Some(&1));
    assert_eq!(t2.get::<u32>(b"ac"), Some(&2));
}

#[test]
fn test_trie_overwrite_value() {
    let t1 = Trie::new().put(b"key", 1u32);
    let t2 = t1.put(b"key", 2u32);

    assert_eq!(t1.get::<u32>(b"key"), Some(&1));
    assert_eq!(t2.get::<u32>(b"key"), Some(&2));
}

#[test]
fn test_trie_put_is_idempotent_for_get() {
    let t1 = Trie::new().put(b"key", 5u32);
    let t2 = t1.put(b"key", 5u32);
    assert_eq!(t1.get::<u32>(b"key"), t2.get::<u32>(b"key"));
}

#[test]
fn test_trie_empty_key() {
    let trie = Trie::new().put(b"", 7u32);
    assert_eq!(trie.get::<u32>(b""), Some(&7));

    // A keyed entry coexists with the root value.
    let trie = trie.put(b"x", 8u32);
    assert_eq!(trie.get::<u32>(b""), Some(&7));
    assert_eq!(trie.get::<u32>(b"x"), Some(&8));

    let trie = trie.remove(b"");
    assert_eq!(trie.get::<u32>(b""), None);
    assert_eq!(trie.get::<u32>(b"x"), Some(&8));
}

#[test]
fn test_trie_remove_round_trip() {
    let base = Trie::new().put(b"keep", 1u32);
    let trie = base.put(b"gone", 2u32).remove(b"gone");

    assert_eq!(trie.get::<u32>(b"gone"), None);
    assert_eq!(trie.get::<u32>(b"keep"), Some(&1));
}

#[test]
fn test_trie_remove_nested_prefixes() {
    let trie = Trie::new()
        .put(b"a", 1u32)
        .put(b"ab", 2u32)
        .put(b"abc", 3u32);

    let trie = trie.remove(b"ab");
    assert_eq!(trie.get::<u32>(b"a"), Some(&1));
    assert_eq!(trie.get::<u32>(b"ab"), None);
    assert_eq!(trie.get::<u32>(b"abc"), Some(&3));

    let trie = trie.remove(b"abc");
    assert_eq!(trie.get::<u32>(b"a"), Some(&1));
    assert_eq!(trie.get::<u32>(b"abc"), None);

    let trie = trie.remove(b"a");
    assert!(trie.is_empty());
}

#[test]
fn test_trie_remove_absent_key() {
    let trie = Trie::new().put(b"present", 1u32);
    let same = trie.remove(b"absent");
    assert_eq!(same.get::<u32>(b"present"), Some(&1));
}

#[test]
fn test_trie_mixed_value_types() {
    let trie = Trie::new()
        .put(b"int", 42u32)
        .put(b"wide", 42u64)
        .put(b"text", String::from("forty-two"));

    assert_eq!(trie.get::<u32>(b"int"), Some(&42));
    assert_eq!(trie.get::<u64>(b"wide"), Some(&42));
    assert_eq!(trie.get::<String>(b"text").map(String::as_str), Some("forty-two"));

    // Wrong type at the right key misses.
    assert_eq!(trie.get::<u64>(b"int"), None);
    assert_eq!(trie.get::<String>(b"wide"), None);
}

#[test]
fn test_trie_shared_handles_across_threads() {
    use std::thread;

    let trie = Trie::new().put(b"shared", 11u32);

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let snapshot = trie.clone();
            thread::spawn(move || {
                for _ in 0..1000 {
                    assert_eq!(snapshot.get::<u32>(b"shared"), Some(&11));
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
}
