//! Vocabulary, labels, and hashed subword features.
//!
//! Tokens are stored once in an entry list and indexed through an
//! open-addressed slot table (FNV-1a, linear probing). After a full corpus
//! pass the vocabulary is thresholded and frozen; ids are then dense:
//!
//! ```text
//! [0, nwords)                      words, most frequent first
//! [nwords, nwords + nlabels)       labels (supervised only)
//! input rows: [0, nwords)          word rows
//!             [nwords, +bucket)    hashed char / word n-gram rows
//! ```
//!
//! Different n-grams may hash to the same bucket. That is the feature-hashing
//! trick: the table size is fixed no matter how many distinct n-grams exist.

use std::collections::HashMap;
use std::io::{BufRead, Read, Write};
use std::iter;

use rand::Rng;
use tracing::{debug, info};

use crate::args::{Args, ModelKind};
use crate::error::{Error, Result};
use crate::persistence::codec;

/// End-of-sentence token, emitted for every line break.
pub const EOS: &str = "</s>";
/// Begin-of-word marker used when extracting character n-grams.
pub const BOW: &str = "<";
/// End-of-word marker used when extracting character n-grams.
pub const EOW: &str = ">";
/// Lines longer than this many tokens are truncated.
pub const MAX_LINE_SIZE: usize = 1024;

/// Upper bound on entries accepted when loading a dictionary.
const MAX_LOAD_ENTRIES: u64 = 1 << 32;

/// Whether an entry is an input word or an output label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EntryKind {
    Word = 0,
    Label = 1,
}

impl TryFrom<u8> for EntryKind {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(EntryKind::Word),
            1 => Ok(EntryKind::Label),
            other => Err(Error::Format(format!("unknown entry kind tag {other}"))),
        }
    }
}

/// One vocabulary entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub word: String,
    pub count: u64,
    pub kind: EntryKind,
    /// Input rows for this token: its own id, then its n-gram buckets.
    pub subwords: Vec<usize>,
}

/// 32-bit FNV-1a over the UTF-8 bytes, with bytes sign-extended before the xor.
pub fn hash(s: &str) -> u32 {
    let mut h: u32 = 2_166_136_261;
    for &b in s.as_bytes() {
        h ^= b as i8 as i32 as u32;
        h = h.wrapping_mul(16_777_619);
    }
    h
}

/// Token → id mapping plus subword expansion and subsampling.
#[derive(Debug, Clone)]
pub struct Dictionary {
    label_prefix: String,
    supervised: bool,
    minn: usize,
    maxn: usize,
    bucket: usize,
    word_ngrams: usize,
    min_count: u64,
    min_count_label: u64,
    t: f64,
    capacity: usize,

    /// slot → entry index, `-1` when free.
    table: Vec<i32>,
    entries: Vec<Entry>,
    pdiscard: Vec<f32>,
    nwords: usize,
    nlabels: usize,
    ntokens: u64,
    /// `Some` once pruned: original bucket → kept bucket. Buckets missing
    /// from the map are discarded.
    prune_idx: Option<HashMap<usize, usize>>,
}

impl Dictionary {
    /// Empty dictionary configured from `args`.
    pub fn new(args: &Args) -> Self {
        Self {
            label_prefix: args.label.clone(),
            supervised: args.model == ModelKind::Supervised,
            minn: args.minn,
            maxn: args.maxn,
            bucket: args.bucket,
            word_ngrams: args.word_ngrams,
            min_count: args.min_count,
            min_count_label: args.min_count_label,
            t: args.t,
            capacity: args.vocab_capacity.max(1),
            table: vec![-1; args.vocab_capacity.max(1)],
            entries: Vec::new(),
            pdiscard: Vec::new(),
            nwords: 0,
            nlabels: 0,
            ntokens: 0,
            prune_idx: None,
        }
    }

    /// Build and freeze a dictionary from a newline-delimited corpus.
    pub fn from_reader<R: BufRead>(args: &Args, reader: R) -> Result<Self> {
        let mut dict = Self::new(args);
        dict.read_from(reader)?;
        Ok(dict)
    }

    // ── Lookup ──────────────────────────────────────────────────────────────

    /// Slot for `word` (occupied by it, or the free slot it would take).
    fn find(&self, word: &str, h: u32) -> usize {
        let n = self.table.len();
        let mut slot = h as usize % n;
        loop {
            let id = self.table[slot];
            if id < 0 || self.entries[id as usize].word == word {
                return slot;
            }
            slot = (slot + 1) % n;
        }
    }

    fn find_id(&self, word: &str, h: u32) -> Option<usize> {
        let id = self.table[self.find(word, h)];
        (id >= 0).then_some(id as usize)
    }

    /// Id of `word`, or `None` if it is not in the vocabulary.
    pub fn word_id(&self, word: &str) -> Option<usize> {
        self.find_id(word, hash(word))
    }

    /// Token string for `id`.
    pub fn word(&self, id: usize) -> &str {
        &self.entries[id].word
    }

    pub fn kind(&self, id: usize) -> EntryKind {
        self.entries[id].kind
    }

    pub fn entry(&self, id: usize) -> &Entry {
        &self.entries[id]
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Label string for label index `i` (0-based among labels).
    pub fn label(&self, i: usize) -> Option<&str> {
        (i < self.nlabels).then(|| self.entries[self.nwords + i].word.as_str())
    }

    fn kind_of_token(&self, token: &str) -> EntryKind {
        if token.starts_with(&self.label_prefix) {
            EntryKind::Label
        } else {
            EntryKind::Word
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn nwords(&self) -> usize {
        self.nwords
    }

    pub fn nlabels(&self) -> usize {
        self.nlabels
    }

    pub fn ntokens(&self) -> u64 {
        self.ntokens
    }

    /// Number of n-gram rows in the input matrix.
    pub fn bucket_rows(&self) -> usize {
        match &self.prune_idx {
            Some(map) => map.len(),
            None => self.bucket,
        }
    }

    pub fn is_pruned(&self) -> bool {
        self.prune_idx.is_some()
    }

    /// Counts of all entries of one kind, in id order.
    pub fn counts(&self, kind: EntryKind) -> Vec<u64> {
        self.entries
            .iter()
            .filter(|e| e.kind == kind)
            .map(|e| e.count)
            .collect()
    }

    // ── Building ────────────────────────────────────────────────────────────

    /// Count one occurrence of `token`, inserting it on first sight.
    ///
    /// Returns the token's id. Calling it again for the same token returns
    /// the same id (until the next [`threshold`](Self::threshold)).
    pub fn add_token(&mut self, token: &str) -> usize {
        if (self.entries.len() + 1) * 4 > self.table.len() * 3 {
            self.grow_table();
        }
        let h = hash(token);
        let slot = self.find(token, h);
        self.ntokens += 1;
        let id = self.table[slot];
        if id >= 0 {
            let id = id as usize;
            self.entries[id].count += 1;
            return id;
        }
        let id = self.entries.len();
        self.entries.push(Entry {
            word: token.to_string(),
            count: 1,
            kind: self.kind_of_token(token),
            subwords: Vec::new(),
        });
        self.table[slot] = id as i32;
        id
    }

    fn grow_table(&mut self) {
        let new_len = (self.table.len() * 2).max(16);
        debug!(from = self.table.len(), to = new_len, "growing vocabulary table");
        self.table = vec![-1; new_len];
        self.rebuild_table();
    }

    fn rebuild_table(&mut self) {
        self.table.fill(-1);
        for i in 0..self.entries.len() {
            let slot = self.find(&self.entries[i].word, hash(&self.entries[i].word));
            self.table[slot] = i as i32;
        }
    }

    /// Count every token of a newline-delimited corpus, then freeze.
    ///
    /// Each line contributes its whitespace-separated tokens followed by
    /// [`EOS`]. When the vocabulary outgrows 75 % of the configured capacity
    /// the rarest entries are dropped with a rising threshold.
    pub fn read_from<R: BufRead>(&mut self, mut reader: R) -> Result<()> {
        let mut buf = Vec::new();
        let mut min_threshold = 1;
        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf)? == 0 {
                break;
            }
            let line = String::from_utf8_lossy(&buf);
            for token in tokens(&line) {
                self.add_token(token);
                if self.ntokens % 1_000_000 == 0 {
                    debug!(tokens = self.ntokens, "reading corpus");
                }
                if self.entries.len() * 4 > self.capacity * 3 {
                    min_threshold += 1;
                    self.threshold(min_threshold, min_threshold);
                }
            }
        }
        self.threshold(self.min_count, self.min_count_label);
        self.init_table_discard();
        self.init_ngrams();
        info!(
            words = self.nwords,
            labels = self.nlabels,
            tokens = self.ntokens,
            "read vocabulary"
        );
        if self.nwords == 0 {
            return Err(Error::EmptyVocabulary(
                "no word reached min_count; lower it or provide more text".into(),
            ));
        }
        Ok(())
    }

    /// Drop words seen fewer than `t` times and labels seen fewer than `tl`
    /// times, then renumber.
    ///
    /// Entries are ordered words-first, then by descending count; the sort
    /// is stable, so equal counts keep their first-seen order.
    pub fn threshold(&mut self, t: u64, tl: u64) {
        self.entries.sort_by(|a, b| {
            (a.kind as u8)
                .cmp(&(b.kind as u8))
                .then_with(|| b.count.cmp(&a.count))
        });
        self.entries.retain(|e| match e.kind {
            EntryKind::Word => e.count >= t,
            EntryKind::Label => e.count >= tl,
        });
        self.entries.shrink_to_fit();
        self.nwords = self
            .entries
            .iter()
            .filter(|e| e.kind == EntryKind::Word)
            .count();
        self.nlabels = self.entries.len() - self.nwords;
        self.rebuild_table();
    }

    fn init_table_discard(&mut self) {
        let total = self.ntokens.max(1) as f64;
        self.pdiscard = self
            .entries
            .iter()
            .map(|e| {
                let f = e.count as f64 / total;
                ((self.t / f).sqrt() + self.t / f) as f32
            })
            .collect();
    }

    fn init_ngrams(&mut self) {
        for i in 0..self.entries.len() {
            let mut subwords = vec![i];
            if self.entries[i].word != EOS {
                let wrapped = format!("{BOW}{}{EOW}", self.entries[i].word);
                self.compute_subwords(&wrapped, &mut subwords, None);
            }
            self.entries[i].subwords = subwords;
        }
    }

    // ── Subwords ────────────────────────────────────────────────────────────

    fn push_hash(&self, out: &mut Vec<usize>, h: usize) {
        match &self.prune_idx {
            None => out.push(self.nwords + h),
            Some(map) => {
                if let Some(&j) = map.get(&h) {
                    out.push(self.nwords + j);
                }
            }
        }
    }

    /// Character n-grams of an already wrapped word (`<word>`), UTF-8 aware.
    ///
    /// Single-character n-grams that touch a boundary marker are skipped.
    fn compute_subwords(
        &self,
        word: &str,
        ngrams: &mut Vec<usize>,
        mut substrings: Option<&mut Vec<String>>,
    ) {
        if self.maxn == 0 || self.bucket == 0 {
            return;
        }
        let bytes = word.as_bytes();
        for i in 0..bytes.len() {
            if bytes[i] & 0xC0 == 0x80 {
                continue;
            }
            let mut j = i;
            let mut n = 1;
            while j < bytes.len() && n <= self.maxn {
                j += 1;
                while j < bytes.len() && bytes[j] & 0xC0 == 0x80 {
                    j += 1;
                }
                if n >= self.minn && !(n == 1 && (i == 0 || j == bytes.len())) {
                    let ngram = &word[i..j];
                    let before = ngrams.len();
                    self.push_hash(ngrams, hash(ngram) as usize % self.bucket);
                    if ngrams.len() > before {
                        if let Some(s) = substrings.as_deref_mut() {
                            s.push(ngram.to_string());
                        }
                    }
                }
                n += 1;
            }
        }
    }

    /// Input rows that represent `word`: its id if known, then its n-gram buckets.
    pub fn subword_ids(&self, word: &str) -> Vec<usize> {
        if let Some(id) = self.word_id(word) {
            return self.entries[id].subwords.clone();
        }
        let mut ngrams = Vec::new();
        if word != EOS {
            self.compute_subwords(&format!("{BOW}{word}{EOW}"), &mut ngrams, None);
        }
        ngrams
    }

    /// Precomputed input rows for a known id.
    pub fn subwords_of(&self, id: usize) -> &[usize] {
        &self.entries[id].subwords
    }

    /// Input rows of `word` paired with the string each row stands for.
    pub fn subword_strings(&self, word: &str) -> (Vec<usize>, Vec<String>) {
        let mut ids = Vec::new();
        let mut strings = Vec::new();
        if let Some(id) = self.word_id(word) {
            ids.push(id);
            strings.push(self.entries[id].word.clone());
        }
        if word != EOS {
            self.compute_subwords(
                &format!("{BOW}{word}{EOW}"),
                &mut ids,
                Some(&mut strings),
            );
        }
        (ids, strings)
    }

    /// Input row of a single n-gram string, or `None` if buckets are disabled
    /// or the bucket was pruned away.
    pub fn subword_id(&self, ngram: &str) -> Option<usize> {
        if self.bucket == 0 {
            return None;
        }
        let mut out = Vec::with_capacity(1);
        self.push_hash(&mut out, hash(ngram) as usize % self.bucket);
        out.pop()
    }

    // ── Lines ───────────────────────────────────────────────────────────────

    /// Whether to drop one occurrence of word `id` given a uniform draw `rand`.
    ///
    /// Keep probability is `sqrt(t / f) + t / f` with `f` the word's corpus
    /// frequency. Supervised lines are never subsampled.
    pub fn discard(&self, id: usize, rand: f32) -> bool {
        if self.supervised {
            return false;
        }
        rand > self.pdiscard[id]
    }

    /// Known, non-discarded word ids of one unsupervised line.
    ///
    /// Returns the number of known tokens read (including the trailing
    /// [`EOS`]), which is what drives progress accounting.
    pub fn get_line<R: Rng + ?Sized>(&self, text: &str, words: &mut Vec<usize>, rng: &mut R) -> u64 {
        words.clear();
        let mut ntokens = 0u64;
        for token in tokens(text) {
            let Some(wid) = self.word_id(token) else {
                continue;
            };
            ntokens += 1;
            if self.entries[wid].kind == EntryKind::Word && !self.discard(wid, rng.random::<f32>()) {
                words.push(wid);
            }
            if ntokens as usize > MAX_LINE_SIZE {
                break;
            }
        }
        ntokens
    }

    /// Input features and label indices of one supervised line.
    ///
    /// Words expand to their subword rows; unknown words still contribute
    /// their n-grams. Word n-grams up to `word_ngrams` are hashed into buckets.
    /// Label indices are 0-based among labels.
    pub fn get_labeled_line(
        &self,
        text: &str,
        words: &mut Vec<usize>,
        labels: &mut Vec<usize>,
    ) -> u64 {
        words.clear();
        labels.clear();
        let mut hashes: Vec<u32> = Vec::new();
        let mut ntokens = 0u64;
        for token in tokens(text) {
            let h = hash(token);
            let wid = self.find_id(token, h);
            let kind = wid.map_or_else(|| self.kind_of_token(token), |id| self.entries[id].kind);
            ntokens += 1;
            match kind {
                EntryKind::Word => {
                    self.add_subwords(words, token, wid);
                    hashes.push(h);
                }
                EntryKind::Label => {
                    if let Some(id) = wid {
                        labels.push(id - self.nwords);
                    }
                }
            }
            if ntokens as usize > MAX_LINE_SIZE {
                break;
            }
        }
        self.add_word_ngrams(words, &hashes);
        ntokens
    }

    fn add_subwords(&self, line: &mut Vec<usize>, token: &str, wid: Option<usize>) {
        match wid {
            None => {
                if token != EOS {
                    self.compute_subwords(&format!("{BOW}{token}{EOW}"), line, None);
                }
            }
            Some(id) if self.maxn == 0 => line.push(id),
            Some(id) => line.extend_from_slice(&self.entries[id].subwords),
        }
    }

    fn add_word_ngrams(&self, line: &mut Vec<usize>, hashes: &[u32]) {
        if self.bucket == 0 || self.word_ngrams <= 1 {
            return;
        }
        for i in 0..hashes.len() {
            let mut h = hashes[i] as u64;
            for &next in hashes.iter().take(i + self.word_ngrams).skip(i + 1) {
                h = h.wrapping_mul(116_049_371).wrapping_add(next as u64);
                self.push_hash(line, (h % self.bucket as u64) as usize);
            }
        }
    }

    // ── Pruning ─────────────────────────────────────────────────────────────

    /// Keep only the input rows listed in `idx` (word ids and n-gram rows).
    ///
    /// Labels always survive. On return `idx` lists the kept rows in their
    /// new order (kept words ascending, then kept buckets), so the caller can
    /// gather the matching rows of the input matrix.
    pub fn prune(&mut self, idx: &mut Vec<usize>) {
        let mut words: Vec<usize> = Vec::new();
        let mut ngrams: Vec<usize> = Vec::new();
        for &i in idx.iter() {
            if i < self.nwords {
                words.push(i);
            } else {
                ngrams.push(i);
            }
        }
        words.sort_unstable();
        words.dedup();

        // Rows are nwords + bucket, or nwords + kept index when already pruned.
        let original: Option<HashMap<usize, usize>> = self
            .prune_idx
            .as_ref()
            .map(|m| m.iter().map(|(&orig, &kept)| (kept, orig)).collect());
        let mut map = HashMap::with_capacity(ngrams.len());
        let mut kept_rows = Vec::with_capacity(ngrams.len());
        for &row in &ngrams {
            let local = row - self.nwords;
            let bucket = match &original {
                Some(back) => back.get(&local).copied().unwrap_or(local),
                None => local,
            };
            if !map.contains_key(&bucket) {
                let next = map.len();
                map.insert(bucket, next);
                kept_rows.push(row);
            }
        }

        idx.clear();
        idx.extend_from_slice(&words);
        idx.extend_from_slice(&kept_rows);

        let mut kept = Vec::with_capacity(words.len() + self.nlabels);
        let mut w = 0;
        for (i, e) in std::mem::take(&mut self.entries).into_iter().enumerate() {
            if e.kind == EntryKind::Label || (w < words.len() && words[w] == i) {
                if e.kind == EntryKind::Word {
                    w += 1;
                }
                kept.push(e);
            }
        }
        self.entries = kept;
        self.nwords = words.len();
        self.prune_idx = Some(map);
        self.rebuild_table();
        self.init_table_discard();
        self.init_ngrams();
        info!(
            words = self.nwords,
            buckets = self.bucket_rows(),
            "pruned dictionary"
        );
    }

    // ── Persistence ─────────────────────────────────────────────────────────

    pub fn save<W: Write>(&self, writer: &mut W) -> Result<()> {
        codec::write_u64(writer, self.entries.len() as u64)?;
        codec::write_u64(writer, self.nwords as u64)?;
        codec::write_u64(writer, self.nlabels as u64)?;
        codec::write_u64(writer, self.ntokens)?;
        match &self.prune_idx {
            None => codec::write_u8(writer, 0)?,
            Some(map) => {
                codec::write_u8(writer, 1)?;
                let mut pairs: Vec<(usize, usize)> = map.iter().map(|(&a, &b)| (a, b)).collect();
                pairs.sort_unstable();
                codec::write_u64(writer, pairs.len() as u64)?;
                for (orig, kept) in pairs {
                    codec::write_u64(writer, orig as u64)?;
                    codec::write_u64(writer, kept as u64)?;
                }
            }
        }
        for e in &self.entries {
            codec::write_str(writer, &e.word)?;
            codec::write_u64(writer, e.count)?;
            codec::write_u8(writer, e.kind as u8)?;
        }
        Ok(())
    }

    /// Read a dictionary written by [`save`](Self::save); `args` must be the
    /// configuration stored alongside it.
    pub fn load<R: Read>(args: &Args, reader: &mut R) -> Result<Self> {
        let size = codec::read_len(reader, MAX_LOAD_ENTRIES, "dictionary size")?;
        let nwords = codec::read_len(reader, MAX_LOAD_ENTRIES, "word count")?;
        let nlabels = codec::read_len(reader, MAX_LOAD_ENTRIES, "label count")?;
        let ntokens = codec::read_u64(reader, "token count")?;
        if nwords + nlabels != size {
            return Err(Error::Format(format!(
                "dictionary size {size} != {nwords} words + {nlabels} labels"
            )));
        }

        let prune_idx = match codec::read_u8(reader, "prune flag")? {
            0 => None,
            1 => {
                let n = codec::read_len(reader, MAX_LOAD_ENTRIES, "pruned buckets")?;
                let mut map = HashMap::with_capacity(n);
                for _ in 0..n {
                    let orig = codec::read_u64(reader, "pruned bucket")? as usize;
                    let kept = codec::read_u64(reader, "pruned bucket")? as usize;
                    if kept >= n {
                        return Err(Error::Format(format!(
                            "pruned bucket {kept} out of range {n}"
                        )));
                    }
                    map.insert(orig, kept);
                }
                Some(map)
            }
            other => return Err(Error::Format(format!("bad prune flag {other}"))),
        };

        let mut dict = Self::new(&Args {
            vocab_capacity: (size * 2).max(16),
            ..args.clone()
        });
        dict.entries.reserve(size);
        for i in 0..size {
            let word = codec::read_string(reader, "token")?;
            let count = codec::read_u64(reader, "token count")?;
            let kind = EntryKind::try_from(codec::read_u8(reader, "token kind")?)?;
            let expected = if i < nwords {
                EntryKind::Word
            } else {
                EntryKind::Label
            };
            if kind != expected {
                return Err(Error::Format(format!(
                    "entry {i} is a {kind:?} but the header places it among {expected:?}s"
                )));
            }
            dict.entries.push(Entry {
                word,
                count,
                kind,
                subwords: Vec::new(),
            });
        }
        dict.nwords = nwords;
        dict.nlabels = nlabels;
        dict.ntokens = ntokens;
        dict.prune_idx = prune_idx;
        dict.rebuild_table();
        dict.init_table_discard();
        dict.init_ngrams();
        Ok(dict)
    }
}

/// Whitespace-separated tokens of one line, followed by [`EOS`].
fn tokens(line: &str) -> impl Iterator<Item = &str> {
    line.split_whitespace().chain(iter::once(EOS))
}
