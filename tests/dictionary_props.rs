//! Property-based tests for the dictionary.
//!
//! - Repeat insertion returns the same id, which `word_id` agrees with
//! - Every subword row lies inside the input matrix
//! - Frozen ids are dense: words first, then labels

use proptest::prelude::*;
use std::io::Cursor;

use subvec::dictionary::{hash, EOS};
use subvec::{Args, Dictionary, EntryKind};

fn args() -> Args {
    Args {
        min_count: 1,
        min_count_label: 1,
        minn: 2,
        maxn: 4,
        bucket: 97,
        vocab_capacity: 64,
        ..Args::skipgram()
    }
}

prop_compose! {
    fn arb_token()(s in "[a-zé日_]{1,8}") -> String {
        s
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn repeat_insertion_is_idempotent(tokens in prop::collection::vec(arb_token(), 1..200)) {
        let mut dict = Dictionary::new(&args());
        for t in &tokens {
            let first = dict.add_token(t);
            let again = dict.add_token(t);
            prop_assert_eq!(first, again);
            prop_assert_eq!(dict.word_id(t), Some(first));
        }
        // Growth must not lose earlier tokens.
        for t in &tokens {
            prop_assert!(dict.word_id(t).is_some());
        }
    }

    #[test]
    fn subword_rows_stay_in_bounds(
        words in prop::collection::vec(arb_token(), 1..40),
        query in arb_token(),
    ) {
        let a = args();
        let text = words.join(" ");
        let dict = Dictionary::from_reader(&a, Cursor::new(text)).unwrap();
        let rows = dict.nwords() + dict.bucket_rows();
        for id in dict.subword_ids(&query) {
            prop_assert!(id < rows);
        }
        let (ids, strings) = dict.subword_strings(&query);
        prop_assert_eq!(ids.len(), strings.len());
    }

    #[test]
    fn frozen_ids_are_words_then_labels(
        words in prop::collection::vec("[a-c]{1,3}", 1..50),
        labels in prop::collection::vec("__label__[xy]", 1..10),
    ) {
        let text = format!("{}\n{}\n", words.join(" "), labels.join(" "));
        let dict = Dictionary::from_reader(&args(), Cursor::new(text)).unwrap();
        prop_assert_eq!(dict.len(), dict.nwords() + dict.nlabels());
        for id in 0..dict.len() {
            let expected = if id < dict.nwords() { EntryKind::Word } else { EntryKind::Label };
            prop_assert_eq!(dict.kind(id), expected);
        }
        // Counts are non-increasing within each kind.
        for kind in [EntryKind::Word, EntryKind::Label] {
            let counts = dict.counts(kind);
            prop_assert!(counts.windows(2).all(|w| w[0] >= w[1]));
        }
        prop_assert!(dict.word_id(EOS).is_some());
    }
}

#[test]
fn hash_matches_reference_values() {
    assert_eq!(hash(""), 2_166_136_261);
    assert_eq!(hash("a"), 0xe40c_292c);
    // Bytes >= 0x80 are sign-extended before mixing ("Ã" is C3 83).
    let fold = |extend: bool| {
        [0xc3u8, 0x83].iter().fold(2_166_136_261u32, |h, &b| {
            let b = if extend { b as i8 as i32 as u32 } else { b as u32 };
            (h ^ b).wrapping_mul(16_777_619)
        })
    };
    assert_eq!(hash("\u{c3}"), fold(true));
    assert_ne!(hash("\u{c3}"), fold(false));
}
