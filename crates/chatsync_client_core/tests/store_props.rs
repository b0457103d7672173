#![forbid(unsafe_code)]

use std::collections::BTreeSet;

use chatsync_client_core::{LoadOlder, MessageLog, PaginationCursor};
use chatsync_domain::{Message, MessageId, MessageKind, UserId};
use proptest::prelude::*;

fn msg(id: u64) -> Message {
	Message {
		id: MessageId(id),
		author_id: UserId(1),
		author_name: "a".to_string(),
		author_avatar: None,
		content: format!("m{id}"),
		kind: MessageKind::Text,
		created_at: String::new(),
		link_preview: None,
	}
}

#[derive(Debug, Clone)]
enum Op {
	Seed(Vec<u64>),
	Live(u64),
	Older(Vec<u64>),
}

fn op() -> impl Strategy<Value = Op> {
	prop_oneof![
		prop::collection::vec(1u64..200, 0..20).prop_map(Op::Seed),
		(1u64..200).prop_map(Op::Live),
		prop::collection::vec(1u64..200, 0..20).prop_map(Op::Older),
	]
}

fn ids(log: &MessageLog) -> Vec<u64> {
	log.as_slice().iter().map(|m| m.id.get()).collect()
}

proptest! {
	#[test]
	fn log_stays_strictly_ascending(ops in prop::collection::vec(op(), 1..40)) {
		let mut log = MessageLog::new();
		let mut expected: BTreeSet<u64> = BTreeSet::new();

		for op in ops {
			match op {
				Op::Seed(seed) => {
					expected = seed.iter().copied().collect();
					log.seed(seed.into_iter().map(msg));
				}
				Op::Live(id) => {
					expected.insert(id);
					log.append_live(msg(id));
				}
				Op::Older(page) => {
					expected.extend(page.iter().copied());
					log.prepend_older_page(page.into_iter().map(msg));
				}
			}

			let got = ids(&log);
			prop_assert!(got.windows(2).all(|w| w[0] < w[1]), "not ascending: {:?}", got);
			prop_assert_eq!(got, expected.iter().copied().collect::<Vec<_>>());
		}
	}

	#[test]
	fn append_live_is_idempotent(seed in prop::collection::vec(1u64..100, 0..30), id in 1u64..100) {
		let mut log = MessageLog::new();
		log.seed(seed.into_iter().map(msg));

		log.append_live(msg(id));
		let once = log.clone();
		let outcome = log.append_live(msg(id));

		prop_assert!(!outcome.is_new());
		prop_assert_eq!(log, once);
	}

	#[test]
	fn pagination_terminates_with_every_message_once(total in 0u64..120, initial in 1u32..30, page in 1u32..30) {
		// Server history is 1..=total; snapshot and pages are newest-first.
		let serve = |below: u64, rows: u32| -> Vec<Message> {
			(1..below).rev().take(rows as usize).map(msg).collect()
		};

		let snapshot = serve(total + 1, initial);
		let mut cursor = PaginationCursor::after_seed(snapshot.len(), initial);
		let mut log = MessageLog::new();
		log.seed(snapshot);

		let mut requests = 0u64;
		loop {
			match cursor.begin(log.oldest_id(), page, requests) {
				LoadOlder::Requested(p) => {
					requests += 1;
					prop_assert!(requests <= total + 1, "pagination did not terminate");
					let reply = serve(p.begin_id.get(), p.row_count);
					prop_assert!(cursor.complete(reply.len()).is_some());
					log.prepend_older_page(reply);
				}
				LoadOlder::Exhausted | LoadOlder::NothingLoaded => break,
				LoadOlder::AlreadyLoading => prop_assert!(false, "request left outstanding"),
			}
		}

		prop_assert!(!cursor.has_more());
		prop_assert_eq!(ids(&log), (1..=total).collect::<Vec<_>>());
	}
}

#[test]
fn empty_older_page_ends_pagination() {
	let mut cursor = PaginationCursor::after_seed(20, 20);
	let LoadOlder::Requested(_) = cursor.begin(Some(MessageId(1)), 20, 1) else {
		panic!("expected a request");
	};
	cursor.complete(0);
	assert!(!cursor.has_more());
	assert_eq!(cursor.begin(Some(MessageId(1)), 20, 2), LoadOlder::Exhausted);
}
