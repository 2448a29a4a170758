//! Lock-free multi-threaded training.
//!
//! The corpus file is cut into one shard per thread at line boundaries.
//! Every worker streams its shard in a loop, updating the shared parameters
//! without synchronization, until the global token counter reaches
//! `epoch * ntokens` or training is cancelled.
//!
//! ```text
//!  corpus ─┬─ shard 0 ─▶ worker 0 ─┐
//!          ├─ shard 1 ─▶ worker 1 ─┼─▶ SharedMatrix (input, output)
//!          └─ shard n ─▶ worker n ─┘          │
//!                   │                          ▼
//!                   └──▶ Progress (atomics) ◀── reporter
//! ```

use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::args::{Args, ModelKind};
use crate::dictionary::{Dictionary, EntryKind};
use crate::error::{Error, Result};
use crate::matrix::{Matrix, SharedMatrix};
use crate::model::{Model, OutputLayer};
use crate::persistence::vectors::read_vectors;
use crate::trained::{output_counts, output_size, TrainedModel};

/// How often the reporter thread logs progress.
pub const REPORT_INTERVAL: Duration = Duration::from_millis(500);

/// Stops a running [`Trainer`] from another thread.
///
/// Workers check the flag before every line, so training returns promptly
/// with whatever has been learned so far.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Counters shared by all workers.
#[derive(Debug, Default)]
struct Progress {
    tokens: AtomicU64,
    /// `f64` bits of the summed loss.
    loss: AtomicU64,
    examples: AtomicU64,
}

impl Progress {
    fn tokens(&self) -> u64 {
        self.tokens.load(Ordering::Relaxed)
    }

    fn add_tokens(&self, n: u64) {
        self.tokens.fetch_add(n, Ordering::Relaxed);
    }

    fn add_loss(&self, sum: f64, examples: u64) {
        if examples == 0 {
            return;
        }
        let _ = self
            .loss
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                Some((f64::from_bits(bits) + sum).to_bits())
            });
        self.examples.fetch_add(examples, Ordering::Relaxed);
    }

    fn average_loss(&self) -> f64 {
        let n = self.examples.load(Ordering::Relaxed);
        if n == 0 {
            0.0
        } else {
            f64::from_bits(self.loss.load(Ordering::Relaxed)) / n as f64
        }
    }
}

/// Result of [`Trainer::run`].
#[derive(Debug)]
pub struct TrainOutcome {
    pub model: TrainedModel,
    /// Tokens consumed across all workers and epochs.
    pub tokens_processed: u64,
    /// Mean loss per training example.
    pub average_loss: f64,
    pub elapsed: Duration,
    /// Whether training stopped early through a [`CancelHandle`].
    pub cancelled: bool,
}

/// Owns the parameters for one training run.
#[derive(Debug)]
pub struct Trainer {
    args: Args,
    dict: Dictionary,
    input: Matrix,
    output: Matrix,
    layer: OutputLayer,
    cancel: CancelHandle,
}

impl Trainer {
    /// Prepare a run over an already built dictionary and initialized matrices.
    pub fn new(args: Args, dict: Dictionary, input: Matrix, output: Matrix) -> Result<Self> {
        args.validate()?;
        let osz = output_size(&args, &dict);
        if osz == 0 {
            return Err(Error::EmptyVocabulary(
                "supervised training needs at least one label".into(),
            ));
        }
        let shapes = [
            (args.dim, input.cols()),
            (args.dim, output.cols()),
            (dict.nwords() + dict.bucket_rows(), input.rows()),
            (osz, output.rows()),
        ];
        if let Some((expected, actual)) = shapes.into_iter().find(|(e, a)| e != a) {
            return Err(Error::DimensionMismatch { expected, actual });
        }
        let layer = OutputLayer::new(args.loss, &output_counts(&args, &dict), args.neg, args.seed);
        Ok(Self {
            args,
            dict,
            input,
            output,
            layer,
            cancel: CancelHandle::default(),
        })
    }

    pub fn args(&self) -> &Args {
        &self.args
    }

    pub fn dictionary(&self) -> &Dictionary {
        &self.dict
    }

    /// Handle that cancels this trainer's [`run`](Self::run).
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Train over `corpus` with `args.thread` workers.
    ///
    /// A worker panic is re-raised on the calling thread; a worker error
    /// stops the others and is returned.
    pub fn run(self, corpus: impl AsRef<Path>) -> Result<TrainOutcome> {
        let corpus = corpus.as_ref();
        let Trainer {
            args,
            dict,
            input,
            output,
            layer,
            cancel,
        } = self;

        let size = std::fs::metadata(corpus)?.len();
        let shards = shard_bounds(corpus, size, args.thread)?;
        let total = args.epoch as u64 * dict.ntokens();
        let wi = SharedMatrix::from(input);
        let wo = SharedMatrix::from(output);
        let progress = Progress::default();
        let done = AtomicBool::new(false);
        let start = Instant::now();

        if args.verbose > 0 {
            info!(
                threads = args.thread,
                words = dict.nwords(),
                labels = dict.nlabels(),
                tokens = dict.ntokens(),
                epochs = args.epoch,
                "training started"
            );
        }

        let joined: Result<()> = thread::scope(|s| {
            let ctx = WorkerContext {
                args: &args,
                dict: &dict,
                wi: &wi,
                wo: &wo,
                layer: &layer,
                corpus,
                total,
                progress: &progress,
                cancel: &cancel,
            };
            let workers: Vec<_> = shards
                .iter()
                .enumerate()
                .map(|(id, &shard)| s.spawn(move || ctx.run(id, shard)))
                .collect();
            let reporter = if args.verbose > 1 {
                Some(s.spawn(|| report(&progress, &done, total, args.lr, args.thread, start)))
            } else {
                None
            };

            let mut first_error = None;
            for handle in workers {
                match handle.join() {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        cancel.cancel();
                        first_error.get_or_insert(e);
                    }
                    Err(panic) => {
                        cancel.cancel();
                        done.store(true, Ordering::Release);
                        if let Some(r) = &reporter {
                            r.thread().unpark();
                        }
                        std::panic::resume_unwind(panic);
                    }
                }
            }
            done.store(true, Ordering::Release);
            if let Some(r) = &reporter {
                r.thread().unpark();
            }
            first_error.map_or(Ok(()), Err)
        });
        joined?;

        let outcome_cancelled = cancel.is_cancelled();
        let tokens_processed = progress.tokens();
        let average_loss = progress.average_loss();
        let elapsed = start.elapsed();
        if args.verbose > 0 {
            info!(
                tokens = tokens_processed,
                loss = average_loss,
                secs = elapsed.as_secs_f64(),
                cancelled = outcome_cancelled,
                "training finished"
            );
        }
        let model = TrainedModel::from_parts(args, dict, wi.into_matrix(), wo.into_matrix())?;
        Ok(TrainOutcome {
            model,
            tokens_processed,
            average_loss,
            elapsed,
            cancelled: outcome_cancelled,
        })
    }
}

/// Borrowed state every worker reads.
#[derive(Clone, Copy)]
struct WorkerContext<'a> {
    args: &'a Args,
    dict: &'a Dictionary,
    wi: &'a SharedMatrix,
    wo: &'a SharedMatrix,
    layer: &'a OutputLayer,
    corpus: &'a Path,
    total: u64,
    progress: &'a Progress,
    cancel: &'a CancelHandle,
}

impl WorkerContext<'_> {
    fn run(self, id: usize, (start, end): (u64, u64)) -> Result<()> {
        let mut model = Model::new(self.args, self.dict, self.wi, self.wo, self.layer, id);
        let mut reader = BufReader::new(File::open(self.corpus)?);
        reader.seek(SeekFrom::Start(start))?;
        let supervised = self.args.model == ModelKind::Supervised;

        let (mut words, mut labels) = (Vec::new(), Vec::new());
        let mut buf = Vec::new();
        let mut pos = start;
        let mut local_tokens = 0u64;
        let mut pass_tokens = 0u64;

        while !self.cancel.is_cancelled() {
            let seen = self.progress.tokens();
            if seen >= self.total {
                break;
            }
            if pos >= end {
                // A full pass that yields no known token would spin forever.
                if pass_tokens == 0 {
                    warn!(worker = id, "shard has no known tokens; stopping worker");
                    break;
                }
                reader.seek(SeekFrom::Start(start))?;
                pos = start;
                pass_tokens = 0;
            }

            buf.clear();
            let n = reader.read_until(b'\n', &mut buf)?;
            if n == 0 {
                pos = end;
                continue;
            }
            pos += n as u64;

            let lr = (self.args.lr * (1.0 - seen as f64 / self.total as f64)) as f32;
            let line = String::from_utf8_lossy(&buf);
            let ntokens = if supervised {
                self.dict.get_labeled_line(&line, &mut words, &mut labels)
            } else {
                self.dict
                    .get_line(&line, &mut words, &mut model.state_mut().rng)
            };
            model.forward_and_update(&words, &labels, lr);

            local_tokens += ntokens;
            pass_tokens += ntokens;
            if local_tokens >= self.args.lr_update_rate {
                self.flush(&mut model, &mut local_tokens);
            }
        }
        self.flush(&mut model, &mut local_tokens);
        debug!(worker = id, "worker finished");
        Ok(())
    }

    fn flush(&self, model: &mut Model<'_>, local_tokens: &mut u64) {
        self.progress.add_tokens(*local_tokens);
        *local_tokens = 0;
        let (sum, n) = model.state_mut().take_loss();
        self.progress.add_loss(sum, n);
    }
}

fn report(progress: &Progress, done: &AtomicBool, total: u64, lr0: f64, threads: usize, start: Instant) {
    while !done.load(Ordering::Acquire) {
        thread::park_timeout(REPORT_INTERVAL);
        let tokens = progress.tokens().min(total);
        let fraction = if total == 0 { 1.0 } else { tokens as f64 / total as f64 };
        let secs = start.elapsed().as_secs_f64().max(1e-9);
        info!(
            progress = %format!("{:.1}%", 100.0 * fraction),
            words_per_sec_per_thread = (tokens as f64 / secs / threads as f64) as u64,
            lr = lr0 * (1.0 - fraction),
            loss = progress.average_loss(),
            "training"
        );
    }
}

/// `(start, end)` byte range of each shard.
///
/// Shard `i` begins at the first line start at or after `i * size / threads`
/// and ends where shard `i + 1` begins. A shard that comes out empty (more
/// threads than lines) covers the whole file instead.
fn shard_bounds(corpus: &Path, size: u64, threads: usize) -> Result<Vec<(u64, u64)>> {
    let mut reader = BufReader::new(File::open(corpus)?);
    let mut starts = Vec::with_capacity(threads);
    for i in 0..threads as u64 {
        starts.push(next_line_start(&mut reader, size * i / threads as u64)?);
    }
    Ok((0..threads)
        .map(|i| {
            let start = starts[i];
            let end = starts.get(i + 1).copied().unwrap_or(size);
            if start < end {
                (start, end)
            } else {
                (0, size)
            }
        })
        .collect())
}

fn next_line_start<R: BufRead + Seek>(reader: &mut R, offset: u64) -> Result<u64> {
    if offset == 0 {
        return Ok(0);
    }
    reader.seek(SeekFrom::Start(offset - 1))?;
    let mut skipped = Vec::new();
    let n = reader.read_until(b'\n', &mut skipped)?;
    Ok(offset - 1 + n as u64)
}

/// Copy rows of a vector file into `input` for words present in `dict`.
///
/// Returns how many rows were copied.
fn load_pretrained(path: &Path, args: &Args, dict: &Dictionary, input: &mut Matrix) -> Result<usize> {
    let (dim, rows) = read_vectors(BufReader::new(File::open(path)?))?;
    if dim != args.dim {
        return Err(Error::DimensionMismatch {
            expected: args.dim,
            actual: dim,
        });
    }
    let mut copied = 0;
    for (token, values) in &rows {
        if let Some(id) = dict.word_id(token) {
            if dict.kind(id) == EntryKind::Word {
                input.row_mut(id).copy_from_slice(values);
                copied += 1;
            }
        }
    }
    info!(
        path = %path.display(),
        copied,
        skipped = rows.len() - copied,
        "loaded pretrained vectors"
    );
    Ok(copied)
}

/// Build the dictionary from `corpus`, initialize parameters and train.
///
/// The input matrix starts uniform in `±1/dim` (pretrained rows replace it
/// where given), the output matrix at zero.
pub fn train(args: Args, corpus: impl AsRef<Path>) -> Result<TrainOutcome> {
    let corpus = corpus.as_ref();
    let args = args.resolve()?;
    let dict = Dictionary::from_reader(&args, BufReader::new(File::open(corpus)?))?;

    let rows = dict.nwords() + dict.bucket_rows();
    let mut input = Matrix::uniform(rows, args.dim, 1.0 / args.dim as f32, args.seed);
    if let Some(path) = &args.pretrained_vectors {
        load_pretrained(path, &args, &dict, &mut input)?;
    }
    let output = Matrix::new(output_size(&args, &dict), args.dim);

    Trainer::new(args, dict, input, output)?.run(corpus)
}
