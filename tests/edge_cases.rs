//! Edge case tests for subvec.
//!
//! Unusual inputs and boundary conditions that could cause failures.

use std::io::{Cursor, Write};

use rand::rngs::StdRng;
use rand::SeedableRng;

use subvec::dictionary::MAX_LINE_SIZE;
use subvec::{train, Args, Dictionary, Error, LossKind, ModelKind, QuantizeArgs};

fn write_bytes(bytes: &[u8]) -> tempfile::NamedTempFile {
    let mut f = tempfile::NamedTempFile::new().expect("temp file");
    f.write_all(bytes).expect("write");
    f.flush().expect("flush");
    f
}

fn quick(model: ModelKind) -> Args {
    Args {
        dim: 4,
        epoch: 1,
        thread: 1,
        min_count: 1,
        t: 1.0,
        bucket: 100,
        vocab_capacity: 256,
        verbose: 0,
        ..Args::for_model(model)
    }
}

// =============================================================================
// Configuration
// =============================================================================

#[test]
fn invalid_configs_are_rejected_before_reading() {
    let corpus = write_bytes(b"a b c\n");
    let cases = [
        Args { dim: 0, ..quick(ModelKind::Cbow) },
        Args { minn: 5, maxn: 3, ..quick(ModelKind::Cbow) },
        Args { maxn: 3, bucket: 0, ..quick(ModelKind::SkipGram) },
        Args { word_ngrams: 2, ..quick(ModelKind::SkipGram) },
        Args { lr: -0.1, ..quick(ModelKind::SkipGram) },
        Args { neg: 0, loss: LossKind::NegativeSampling, ..quick(ModelKind::SkipGram) },
    ];
    for args in cases {
        let err = train(args.clone(), corpus.path()).unwrap_err();
        assert!(matches!(err, Error::Config(_)), "{args:?} gave {err}");
    }
}

#[test]
fn quantize_args_are_validated() {
    assert!(QuantizeArgs { nbits: 0, ..QuantizeArgs::default() }.validate().is_err());
    assert!(QuantizeArgs { nbits: 9, ..QuantizeArgs::default() }.validate().is_err());
    assert!(QuantizeArgs { dsub: 0, ..QuantizeArgs::default() }.validate().is_err());
    assert!(QuantizeArgs::default().validate().is_ok());
}

#[test]
fn args_json_round_trip() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("args.json");
    let args = Args {
        word_ngrams: 3,
        bucket: 1000,
        ..Args::supervised()
    };
    args.save(&path).expect("save");
    assert_eq!(Args::load(&path).expect("load"), args);
}

#[test]
fn missing_corpus_is_an_io_error() {
    let err = train(quick(ModelKind::Cbow), "/definitely/not/here.txt").unwrap_err();
    assert!(matches!(err, Error::Io(_)));
}

// =============================================================================
// Corpus contents
// =============================================================================

#[test]
fn invalid_utf8_and_crlf_are_tolerated() {
    let mut bytes = b"caf\xe9 au lait\r\n".repeat(10);
    bytes.extend_from_slice("naïve café\n".as_bytes());
    let corpus = write_bytes(&bytes);
    let outcome = train(quick(ModelKind::SkipGram), corpus.path()).expect("train");
    let dict = outcome.model.dictionary();
    assert!(dict.word_id("lait").is_some());
    assert!(dict.word_id("café").is_some());
}

#[test]
fn single_word_corpus_trains() {
    let corpus = write_bytes(b"lonely\n");
    for loss in [
        LossKind::NegativeSampling,
        LossKind::HierarchicalSoftmax,
        LossKind::Softmax,
    ] {
        let args = Args { loss, ..quick(ModelKind::Cbow) };
        let outcome = train(args, corpus.path()).expect("train");
        assert!(outcome.model.word_vector("lonely").as_slice().iter().all(|x| x.is_finite()));
    }
}

#[test]
fn more_threads_than_lines() {
    let corpus = write_bytes(b"just one line here\n");
    let args = Args { thread: 8, ..quick(ModelKind::SkipGram) };
    let outcome = train(args, corpus.path()).expect("train");
    assert!(outcome.tokens_processed >= outcome.model.dictionary().ntokens());
}

#[test]
fn corpus_without_trailing_newline() {
    let corpus = write_bytes(b"first line\nsecond line without newline");
    let outcome = train(quick(ModelKind::Cbow), corpus.path()).expect("train");
    assert!(outcome.model.dictionary().word_id("newline").is_some());
}

#[test]
fn overlong_lines_are_truncated() {
    let args = quick(ModelKind::SkipGram);
    let line: Vec<String> = (0..MAX_LINE_SIZE + 500).map(|i| format!("w{}", i % 50)).collect();
    let text = format!("{}\n", line.join(" "));
    let dict = Dictionary::from_reader(&args, Cursor::new(text.as_str())).expect("dict");
    let mut words = Vec::new();
    let mut rng = StdRng::seed_from_u64(0);
    let n = dict.get_line(&text, &mut words, &mut rng);
    assert!(n as usize <= MAX_LINE_SIZE + 1);
    assert!(words.len() <= MAX_LINE_SIZE + 1);
}

// =============================================================================
// Queries
// =============================================================================

#[test]
fn queries_on_the_wrong_model_kind() {
    let corpus = write_bytes(b"some words to embed\n");
    let model = train(quick(ModelKind::Cbow), corpus.path()).expect("train").model;
    assert!(matches!(model.predict("some", 1, 0.0), Err(Error::Unsupported(_))));
    assert!(matches!(model.predict_classes("some", 1, 0.0), Err(Error::Unsupported(_))));
    assert!(matches!(
        model.test(Cursor::new("__label__a some\n"), 1, 0.0),
        Err(Error::Unsupported(_))
    ));
}

#[test]
fn supervised_edge_inputs() {
    let corpus = write_bytes(b"__label__a red\n__label__b blue\n");
    let args = Args {
        thread: 1,
        epoch: 1,
        dim: 4,
        vocab_capacity: 64,
        verbose: 0,
        ..Args::supervised()
    };
    let model = train(args, corpus.path()).expect("train").model;

    // Unknown words still leave the end-of-line token as a feature.
    assert_eq!(model.predict("green", 1, 0.0).expect("predict").len(), 1);
    assert!(model.predict("red", 0, 0.0).expect("predict").is_empty());
    assert!(model.predict("red", 1, 1.1).expect("predict").is_empty());
    assert_eq!(model.predict("red blue", 5, 0.0).expect("predict").len(), 2);

    let named = model.predict("red blue", 2, 0.0).expect("predict");
    let classes = model.predict_classes("red blue", 2, 0.0).expect("predict");
    assert_eq!(named.len(), classes.len());
    for ((p, label), (q, class)) in named.iter().zip(&classes) {
        assert_eq!(p, q);
        assert_eq!(model.dictionary().label(*class), Some(label.as_str()));
    }

    let metrics = model.test(Cursor::new("no labels\n\n"), 1, 0.0).expect("test");
    assert_eq!(metrics.examples, 0);
    assert_eq!(metrics.precision(), 0.0);
    assert_eq!(metrics.recall(), 0.0);
}

#[test]
fn empty_words_have_zero_vectors() {
    let corpus = write_bytes(b"alpha beta\n");
    let model = train(quick(ModelKind::SkipGram), corpus.path()).expect("train").model;
    assert_eq!(model.sentence_vector("").norm(), 0.0);
    assert_eq!(model.word_vector("").norm(), 0.0);
    assert!(model.nearest_neighbors("alpha", 0).is_empty());
}
