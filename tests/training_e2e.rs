//! End-to-end training runs over small corpora on disk.

use std::io::Write;

use subvec::{train, Args, LossKind, ModelKind, RowStore, Trainer};

fn write_corpus(text: &str) -> tempfile::NamedTempFile {
    let mut f = tempfile::NamedTempFile::new().expect("temp file");
    f.write_all(text.as_bytes()).expect("write corpus");
    f.flush().expect("flush corpus");
    f
}

fn embedding_corpus() -> String {
    let lines = [
        "the cat sat on the mat",
        "the dog sat on the rug",
        "a cat chased a mouse across the mat",
        "a dog chased a cat across the rug",
        "the mouse hid under the mat",
    ];
    let mut text = String::new();
    for _ in 0..40 {
        for l in lines {
            text.push_str(l);
            text.push('\n');
        }
    }
    text
}

fn small(model: ModelKind) -> Args {
    Args {
        dim: 16,
        epoch: 3,
        thread: 1,
        min_count: 1,
        // Tiny corpus: keep every token.
        t: 1.0,
        bucket: 2000,
        minn: 3,
        maxn: 5,
        vocab_capacity: 1024,
        verbose: 0,
        ..Args::for_model(model)
    }
}

#[test]
fn token_counter_matches_requested_work() {
    let corpus = write_corpus(&embedding_corpus());
    let args = small(ModelKind::SkipGram);
    let (epoch, rate) = (args.epoch as u64, args.lr_update_rate);
    let outcome = train(args, corpus.path()).expect("train");
    let ntokens = outcome.model.dictionary().ntokens();

    assert!(!outcome.cancelled);
    assert!(outcome.tokens_processed >= epoch * ntokens);
    // At most one unflushed batch plus one line past the target.
    assert!(outcome.tokens_processed < epoch * ntokens + rate + 16);
    assert!(outcome.average_loss.is_finite() && outcome.average_loss > 0.0);
}

#[test]
fn single_thread_runs_are_reproducible() {
    let corpus = write_corpus(&embedding_corpus());
    let a = train(small(ModelKind::Cbow), corpus.path()).expect("first run");
    let b = train(small(ModelKind::Cbow), corpus.path()).expect("second run");
    assert_eq!(a.tokens_processed, b.tokens_processed);
    assert_eq!(a.model.word_vector("cat"), b.model.word_vector("cat"));
}

#[test]
fn skipgram_and_cbow_learn_different_tables() {
    let corpus = write_corpus(&embedding_corpus());
    let sg = train(small(ModelKind::SkipGram), corpus.path()).expect("skipgram");
    let cbow = train(small(ModelKind::Cbow), corpus.path()).expect("cbow");

    assert_eq!(sg.model.input().rows(), cbow.model.input().rows());
    assert_eq!(sg.model.input().cols(), cbow.model.input().cols());
    assert_eq!(sg.model.output().rows(), cbow.model.output().rows());
    assert_ne!(sg.model.word_vector("cat"), cbow.model.word_vector("cat"));
}

#[test]
fn every_loss_trains_with_several_threads() {
    let corpus = write_corpus(&embedding_corpus());
    for loss in [
        LossKind::NegativeSampling,
        LossKind::HierarchicalSoftmax,
        LossKind::Softmax,
    ] {
        let args = Args {
            loss,
            thread: 3,
            ..small(ModelKind::SkipGram)
        };
        let outcome = train(args, corpus.path()).expect("train");
        let v = outcome.model.word_vector("mouse");
        assert_eq!(v.len(), 16);
        assert!(v.as_slice().iter().all(|x| x.is_finite()), "{loss:?}");
        assert!(outcome.average_loss.is_finite(), "{loss:?}");
    }
}

#[test]
fn supervised_model_separates_two_topics() {
    let mut text = String::new();
    for i in 0..60 {
        if i % 2 == 0 {
            text.push_str("__label__sport the team won the match with a late goal\n");
        } else {
            text.push_str("__label__cooking whisk the eggs and bake the cake slowly\n");
        }
    }
    let corpus = write_corpus(&text);
    let args = Args {
        dim: 10,
        epoch: 20,
        lr: 0.5,
        thread: 1,
        vocab_capacity: 1024,
        verbose: 0,
        ..Args::supervised()
    };
    let model = train(args, corpus.path()).expect("train").model;

    let sport = model.predict("late goal for the team", 1, 0.0).expect("predict");
    assert_eq!(sport[0].1, "__label__sport");
    let cooking = model.predict("bake the eggs", 2, 0.0).expect("predict");
    assert_eq!(cooking[0].1, "__label__cooking");
    assert!(cooking[0].0 >= cooking[1].0);

    let metrics = model
        .test(std::io::Cursor::new(text.as_bytes()), 1, 0.0)
        .expect("test");
    assert_eq!(metrics.examples, 60);
    assert!(metrics.precision() > 0.9);
    assert_eq!(metrics.precision(), metrics.recall());
}

#[test]
fn cancellation_stops_a_long_run() {
    let corpus = write_corpus(&embedding_corpus());
    let args = Args {
        epoch: 100_000,
        thread: 2,
        ..small(ModelKind::SkipGram)
    }
    .resolve()
    .expect("args");
    let dict = subvec::Dictionary::from_reader(
        &args,
        std::io::BufReader::new(std::fs::File::open(corpus.path()).expect("open")),
    )
    .expect("dictionary");
    let rows = dict.nwords() + dict.bucket_rows();
    let input = subvec::Matrix::uniform(rows, args.dim, 1.0 / args.dim as f32, 1);
    let output = subvec::Matrix::new(dict.nwords(), args.dim);
    let total = args.epoch as u64 * dict.ntokens();

    let trainer = Trainer::new(args, dict, input, output).expect("trainer");
    let handle = trainer.cancel_handle();
    let canceller = std::thread::spawn(move || {
        std::thread::sleep(std::time::Duration::from_millis(200));
        handle.cancel();
    });
    let outcome = trainer.run(corpus.path()).expect("run");
    canceller.join().expect("canceller");

    assert!(outcome.cancelled);
    assert!(outcome.tokens_processed < total);
}

#[test]
fn empty_corpus_is_an_error() {
    let corpus = write_corpus("");
    let err = train(small(ModelKind::SkipGram), corpus.path()).unwrap_err();
    assert!(matches!(err, subvec::Error::EmptyVocabulary(_)));
}

#[test]
fn supervised_corpus_without_labels_is_an_error() {
    let corpus = write_corpus("no labels here\nnor here\n");
    let args = Args {
        vocab_capacity: 256,
        verbose: 0,
        ..Args::supervised()
    };
    let err = train(args, corpus.path()).unwrap_err();
    assert!(matches!(err, subvec::Error::EmptyVocabulary(_)));
}
