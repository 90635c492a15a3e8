//! Property-based test generators using proptest.

use crate::fixtures::{SampleQuestion, SampleResult};
use offsync_core::RecordKey;
use proptest::prelude::*;

/// Strategy for generating valid partition and key names.
pub fn storage_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z0-9_-][a-zA-Z0-9_.-]{0,63}").expect("Invalid regex")
}

/// Strategy for generating names the stores must reject.
pub fn invalid_name_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just(String::new()),
        Just("..".to_string()),
        prop::string::string_regex("\\.[a-z]{1,8}").expect("Invalid regex"),
        prop::string::string_regex("[a-z]{1,8}/[a-z]{1,8}").expect("Invalid regex"),
        prop::string::string_regex("[a-z]{1,8} [a-z]{1,8}").expect("Invalid regex"),
        prop::string::string_regex("[a-z]{129,160}").expect("Invalid regex"),
    ]
}

/// Strategy for generating record keys in the generated-key format.
pub fn record_key_strategy() -> impl Strategy<Value = RecordKey> {
    prop::string::string_regex("[0-9a-f]{32}")
        .expect("Invalid regex")
        .prop_map(|hex| {
            RecordKey::parse(format!("{}{hex}", RecordKey::PREFIX)).expect("generated key is valid")
        })
}

/// Strategy for generating result payloads.
pub fn sample_result_strategy() -> impl Strategy<Value = SampleResult> {
    (
        "[a-z0-9-]{1,24}",
        "[a-z0-9-]{1,24}",
        1u32..=50,
        prop::collection::vec(0u8..4, 0..50),
        any::<u64>(),
    )
        .prop_flat_map(|(user_id, test_id, total, answers, completed_at)| {
            (0..=total).prop_map(move |score| SampleResult {
                user_id: user_id.clone(),
                test_id: test_id.clone(),
                score,
                total,
                answers: answers.clone(),
                completed_at,
            })
        })
}

/// Strategy for generating a question set.
pub fn questions_strategy(max: usize) -> impl Strategy<Value = Vec<SampleQuestion>> {
    prop::collection::vec(
        (any::<u32>(), ".{0,80}", prop::collection::vec(".{0,20}", 2..6)),
        0..max,
    )
    .prop_map(|rows| {
        rows.into_iter()
            .map(|(id, prompt, choices)| SampleQuestion {
                id,
                prompt,
                correct: (id as usize % choices.len()) as u8,
                choices,
            })
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::memory_store;
    use offsync_core::{LocalCache, PendingWriteQueue};
    use offsync_storage::{validate_name, InMemoryStore, KvStore};

    proptest! {
        #[test]
        fn valid_names_are_accepted(name in storage_name_strategy()) {
            prop_assert!(validate_name(&name).is_ok());
        }

        #[test]
        fn invalid_names_are_rejected(name in invalid_name_strategy()) {
            let store = InMemoryStore::new();
            prop_assert!(validate_name(&name).is_err());
            prop_assert!(store.set("p", &name, b"x").is_err());
        }

        #[test]
        fn queue_preserves_insertion_order(results in prop::collection::vec(sample_result_strategy(), 0..20)) {
            let queue = PendingWriteQueue::open(memory_store()).unwrap();
            let keys: Vec<_> = results.iter().map(|r| queue.enqueue(r.clone()).unwrap()).collect();

            let pending = queue.list_pending().unwrap();
            prop_assert_eq!(pending.iter().map(|r| r.key.clone()).collect::<Vec<_>>(), keys);
            prop_assert_eq!(pending.into_iter().map(|r| r.payload).collect::<Vec<_>>(), results);
        }

        #[test]
        fn removing_a_subset_keeps_the_rest_in_order(
            keys in prop::collection::btree_set(record_key_strategy(), 1..15),
            mask in prop::collection::vec(any::<bool>(), 15),
        ) {
            let queue = PendingWriteQueue::open(memory_store()).unwrap();
            let keys: Vec<_> = keys.into_iter().collect();
            for (i, key) in keys.iter().enumerate() {
                queue.enqueue_with_key(key.clone(), i as u32).unwrap();
            }

            let mut kept = Vec::new();
            for (i, key) in keys.iter().enumerate() {
                if mask[i] {
                    queue.remove(key).unwrap();
                } else {
                    kept.push(i as u32);
                }
            }

            let payloads: Vec<u32> = queue.list_pending().unwrap().into_iter().map(|r| r.payload).collect();
            prop_assert_eq!(payloads, kept);
        }

        #[test]
        fn cache_returns_what_was_stored(questions in questions_strategy(30)) {
            let cache = LocalCache::new(memory_store());
            cache.store(&questions).unwrap();
            let dataset = cache.load().unwrap();
            prop_assert_eq!(cache.meta().unwrap().count, questions.len());
            prop_assert_eq!(dataset.items, questions);
        }
    }
}
