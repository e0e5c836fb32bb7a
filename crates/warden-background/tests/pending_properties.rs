//! Property tests for the pending request store

use futures::FutureExt;
use proptest::prelude::*;
use std::collections::HashMap;
use warden_background::{PendingRequestStore, PendingResponse, RequestStatus};
use warden_core::Error;

#[derive(Debug, Clone)]
enum Op {
    Enqueue(u8),
    Resolve(u8, u32),
    Reject(u8),
    Cancel(u8),
}

fn op() -> impl Strategy<Value = Op> {
    let id = 0u8..4;
    prop_oneof![
        id.clone().prop_map(Op::Enqueue),
        (id.clone(), any::<u32>()).prop_map(|(id, v)| Op::Resolve(id, v)),
        id.clone().prop_map(Op::Reject),
        id.prop_map(Op::Cancel),
    ]
}

#[derive(Debug, Clone, PartialEq)]
enum Expected {
    Value(u32),
    Rejected,
    Cancelled,
}

proptest! {
    #[test]
    fn prop_each_request_settles_once(ops in prop::collection::vec(op(), 1..40)) {
        let store: PendingRequestStore<u8, u32> = PendingRequestStore::new("prop", 64);
        let mut waiting: Vec<(PendingResponse<u32>, Option<Expected>)> = Vec::new();
        let mut live: HashMap<u8, usize> = HashMap::new();

        for op in ops {
            let (id, outcome) = match op {
                Op::Enqueue(id) => {
                    let key = id.to_string();
                    let result = store.enqueue(&key, id);
                    if live.contains_key(&id) {
                        prop_assert!(matches!(result, Err(Error::Validation(_))));
                    } else {
                        live.insert(id, waiting.len());
                        waiting.push((result.unwrap(), None));
                    }
                    continue;
                }
                Op::Resolve(id, v) => (id, (store.resolve(&id.to_string(), v), Expected::Value(v))),
                Op::Reject(id) => (id, (store.reject(&id.to_string(), Error::UserRejected), Expected::Rejected)),
                Op::Cancel(id) => (id, (store.cancel(&id.to_string()), Expected::Cancelled)),
            };

            let (result, expected) = outcome;
            match live.remove(&id) {
                Some(index) => {
                    prop_assert!(result.is_ok());
                    waiting[index].1 = Some(expected);
                }
                None => prop_assert!(matches!(result, Err(Error::StaleRequest { .. })), "expected StaleRequest"),
            }
        }

        prop_assert_eq!(store.len(), live.len());
        for id in live.keys() {
            prop_assert_eq!(store.status(&id.to_string()), Some(RequestStatus::Pending));
        }

        for (response, expected) in waiting {
            let settled = response.now_or_never();
            match expected {
                None => prop_assert!(settled.is_none()),
                Some(Expected::Value(v)) => prop_assert_eq!(settled.unwrap().unwrap(), v),
                Some(Expected::Rejected) => {
                    prop_assert!(matches!(settled, Some(Err(Error::UserRejected))))
                }
                Some(Expected::Cancelled) => {
                    prop_assert!(matches!(settled, Some(Err(Error::Cancelled))))
                }
            }
        }
    }
}
