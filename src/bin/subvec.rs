//! subvec command-line tool.
//!
//! # Usage
//!
//! ```bash
//! # Word vectors
//! subvec skipgram -i corpus.txt -o model
//! subvec cbow -i corpus.txt -o model --dim 300 --epoch 10
//!
//! # Classifier
//! subvec supervised -i train.txt -o model --word-ngrams 2
//! subvec test model.bin valid.txt -k 1
//! echo "which baking dish is best" | subvec predict model.bin - -k 3
//!
//! # Compress
//! subvec quantize -o model --cutoff 100000 --qnorm
//!
//! # Queries (read from stdin)
//! echo "asparagus" | subvec nn model.bin -k 10
//! ```
//!
//! Training writes `<output>.bin` and `<output>.vec`; quantization reads
//! `<output>.bin` and writes `<output>.ftz`. Set `RUST_LOG` to change the
//! log level (default `info`).

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use subvec::{LossKind, ModelKind, QuantizeArgs, TrainedModel};

#[derive(Parser, Debug)]
#[command(name = "subvec")]
#[command(about = "Subword embeddings and linear text classifiers")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train a text classifier
    Supervised(TrainOpts),
    /// Train word vectors with continuous bag of words
    Cbow(TrainOpts),
    /// Train word vectors with skip-gram
    Skipgram(TrainOpts),
    /// Quantize `<output>.bin` into `<output>.ftz`
    Quantize(QuantizeOpts),
    /// Report precision and recall at k on a labelled file
    Test {
        model: PathBuf,
        /// Test file, `-` for stdin
        data: PathBuf,
        #[arg(short, default_value_t = 1)]
        k: usize,
        #[arg(long, default_value_t = 0.0)]
        threshold: f32,
    },
    /// Print the top k labels of each line
    Predict {
        model: PathBuf,
        /// Input file, `-` for stdin
        data: PathBuf,
        #[arg(short, default_value_t = 1)]
        k: usize,
        #[arg(long, default_value_t = 0.0)]
        threshold: f32,
        /// Also print probabilities
        #[arg(long)]
        prob: bool,
    },
    /// Print the vector of every word read from stdin
    PrintWordVectors { model: PathBuf },
    /// Print the vector of every line read from stdin
    PrintSentenceVectors { model: PathBuf },
    /// Print the n-gram vectors of one word
    PrintNgrams { model: PathBuf, word: String },
    /// Nearest neighbours of each word read from stdin
    Nn {
        model: PathBuf,
        #[arg(short, default_value_t = 10)]
        k: usize,
    },
    /// Analogies `a - b + c` for each triplet read from stdin
    Analogies {
        model: PathBuf,
        #[arg(short, default_value_t = 10)]
        k: usize,
    },
}

/// Overrides on top of the per-model defaults.
#[derive(clap::Args, Debug)]
struct TrainOpts {
    /// Training corpus
    #[arg(short, long)]
    input: PathBuf,
    /// Output path without extension
    #[arg(short, long)]
    output: PathBuf,
    /// JSON file of hyperparameters; flags still override it
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    lr: Option<f64>,
    #[arg(long)]
    lr_update_rate: Option<u64>,
    #[arg(long)]
    dim: Option<usize>,
    #[arg(long)]
    ws: Option<usize>,
    #[arg(long)]
    epoch: Option<usize>,
    #[arg(long)]
    min_count: Option<u64>,
    #[arg(long)]
    min_count_label: Option<u64>,
    #[arg(long)]
    neg: Option<usize>,
    #[arg(long)]
    word_ngrams: Option<usize>,
    /// hs, ns or softmax
    #[arg(long)]
    loss: Option<LossKind>,
    #[arg(long)]
    bucket: Option<usize>,
    #[arg(long)]
    minn: Option<usize>,
    #[arg(long)]
    maxn: Option<usize>,
    #[arg(long)]
    thread: Option<usize>,
    #[arg(short, long)]
    t: Option<f64>,
    #[arg(long)]
    label: Option<String>,
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long)]
    vocab_capacity: Option<usize>,
    #[arg(long)]
    pretrained_vectors: Option<PathBuf>,
    #[arg(long)]
    verbose: Option<u8>,
    /// Also write the output matrix to `<output>.output`
    #[arg(long)]
    save_output: bool,
}

#[derive(clap::Args, Debug)]
struct QuantizeOpts {
    /// Model path without extension
    #[arg(short, long)]
    output: PathBuf,
    #[arg(long, default_value_t = 2)]
    dsub: usize,
    #[arg(long, default_value_t = 8)]
    nbits: u8,
    #[arg(long)]
    qnorm: bool,
    #[arg(long)]
    qout: bool,
    #[arg(long, default_value_t = 0)]
    cutoff: usize,
    #[arg(long, default_value_t = 1234)]
    seed: u64,
}

macro_rules! override_fields {
    ($args:ident, $opts:ident, $($field:ident),*) => {
        $(if let Some(v) = $opts.$field.clone() { $args.$field = v; })*
    };
}

impl TrainOpts {
    fn to_args(&self, model: ModelKind) -> Result<subvec::Args> {
        let mut args = match &self.config {
            Some(path) => {
                let mut args = subvec::Args::load(path)
                    .with_context(|| format!("reading {}", path.display()))?;
                args.model = model;
                args
            }
            None => subvec::Args::for_model(model),
        };
        let opts = self;
        override_fields!(
            args, opts, lr, lr_update_rate, dim, ws, epoch, min_count, min_count_label, neg,
            word_ngrams, loss, bucket, minn, maxn, thread, t, label, seed, vocab_capacity, verbose
        );
        if let Some(path) = &self.pretrained_vectors {
            args.pretrained_vectors = Some(path.clone());
        }
        Ok(args)
    }
}

fn with_extension(base: &Path, ext: &str) -> PathBuf {
    let mut s = base.as_os_str().to_owned();
    s.push(".");
    s.push(ext);
    PathBuf::from(s)
}

fn open_input(path: &Path) -> Result<Box<dyn BufRead>> {
    if path.as_os_str() == "-" {
        return Ok(Box::new(BufReader::new(io::stdin())));
    }
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    Ok(Box::new(BufReader::new(file)))
}

fn load_model(path: &Path) -> Result<TrainedModel> {
    TrainedModel::load(path).with_context(|| format!("loading model {}", path.display()))
}

fn print_vector(out: &mut impl Write, token: &str, values: &[f32]) -> io::Result<()> {
    write!(out, "{token}")?;
    for v in values {
        write!(out, " {v:.5}")?;
    }
    writeln!(out)
}

fn run_train(model: ModelKind, opts: &TrainOpts) -> Result<()> {
    let args = opts.to_args(model)?;
    let outcome = subvec::train(args, &opts.input)
        .with_context(|| format!("training on {}", opts.input.display()))?;
    if outcome.cancelled {
        bail!("training was cancelled");
    }
    let model = outcome.model;
    let bin = with_extension(&opts.output, "bin");
    model.save(&bin).with_context(|| format!("writing {}", bin.display()))?;
    model.save_vectors(with_extension(&opts.output, "vec"))?;
    if opts.save_output {
        model.save_output(with_extension(&opts.output, "output"))?;
    }
    tracing::info!(model = %bin.display(), loss = outcome.average_loss, "saved");
    Ok(())
}

fn run_quantize(opts: &QuantizeOpts) -> Result<()> {
    let bin = with_extension(&opts.output, "bin");
    let mut model = load_model(&bin)?;
    model.quantize(&QuantizeArgs {
        dsub: opts.dsub,
        nbits: opts.nbits,
        qnorm: opts.qnorm,
        qout: opts.qout,
        cutoff: opts.cutoff,
        seed: opts.seed,
    })?;
    let ftz = with_extension(&opts.output, "ftz");
    model.save(&ftz).with_context(|| format!("writing {}", ftz.display()))?;
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());

    match cli.command {
        Command::Supervised(opts) => run_train(ModelKind::Supervised, &opts)?,
        Command::Cbow(opts) => run_train(ModelKind::Cbow, &opts)?,
        Command::Skipgram(opts) => run_train(ModelKind::SkipGram, &opts)?,
        Command::Quantize(opts) => run_quantize(&opts)?,
        Command::Test {
            model,
            data,
            k,
            threshold,
        } => {
            let model = load_model(&model)?;
            let metrics = model.test(open_input(&data)?, k, threshold)?;
            writeln!(out, "N\t{}", metrics.examples)?;
            writeln!(out, "P@{k}\t{:.3}", metrics.precision())?;
            writeln!(out, "R@{k}\t{:.3}", metrics.recall())?;
        }
        Command::Predict {
            model,
            data,
            k,
            threshold,
            prob,
        } => {
            let model = load_model(&model)?;
            for line in open_input(&data)?.lines() {
                let predictions = model.predict(&line?, k, threshold)?;
                let fields: Vec<String> = predictions
                    .into_iter()
                    .map(|(p, label)| if prob { format!("{label} {p:.5}") } else { label })
                    .collect();
                writeln!(out, "{}", fields.join(" "))?;
            }
        }
        Command::PrintWordVectors { model } => {
            let model = load_model(&model)?;
            for line in io::stdin().lock().lines() {
                for word in line?.split_whitespace() {
                    print_vector(&mut out, word, model.word_vector(word).as_slice())?;
                }
            }
        }
        Command::PrintSentenceVectors { model } => {
            let model = load_model(&model)?;
            for line in io::stdin().lock().lines() {
                let v = model.sentence_vector(&line?);
                let values: Vec<String> = v.as_slice().iter().map(|x| format!("{x:.5}")).collect();
                writeln!(out, "{}", values.join(" "))?;
            }
        }
        Command::PrintNgrams { model, word } => {
            let model = load_model(&model)?;
            for (ngram, v) in model.ngram_vectors(&word) {
                print_vector(&mut out, &ngram, v.as_slice())?;
            }
        }
        Command::Nn { model, k } => {
            let model = load_model(&model)?;
            for line in io::stdin().lock().lines() {
                for word in line?.split_whitespace() {
                    for (score, neighbour) in model.nearest_neighbors(word, k) {
                        writeln!(out, "{neighbour} {score:.5}")?;
                    }
                    out.flush()?;
                }
            }
        }
        Command::Analogies { model, k } => {
            let model = load_model(&model)?;
            for line in io::stdin().lock().lines() {
                let line = line?;
                let words: Vec<&str> = line.split_whitespace().collect();
                let [a, b, c] = words[..] else {
                    eprintln!("expected three words, got {}", words.len());
                    continue;
                };
                for (score, word) in model.analogies(a, b, c, k) {
                    writeln!(out, "{word} {score:.5}")?;
                }
                out.flush()?;
            }
        }
    }
    out.flush()?;
    Ok(())
}
