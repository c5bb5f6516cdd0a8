//! Splits text into request-sized chunks for the synthesis backend.
//!
//! Boundaries are preferred coarsest first: paragraph, then sentence, then
//! word. Sizes are measured in bytes because backends limit request bodies,
//! not characters.

/// Separator placed between paragraphs that share a chunk.
const PARAGRAPH_SEPARATOR: &str = "\n\n";

/// Separator placed between sentences or words that share a chunk.
const WORD_SEPARATOR: &str = " ";

/// Characters that end a sentence.
const SENTENCE_TERMINATORS: &[char] = &['.', '!', '?', '…', '。', '！', '？'];

/// Full-width terminators end a sentence even without trailing whitespace.
const FULL_WIDTH_TERMINATORS: &[char] = &['。', '！', '？'];

/// Closing quotes and brackets that may follow a terminator.
const CLOSERS: &[char] = &['"', '\'', '”', '’', ')', ']', '}', '»', '」', '』'];

/// Split `text` into ordered chunks of at most `max_bytes` bytes.
///
/// A single word longer than `max_bytes` cannot be split without changing
/// how it is pronounced, so it is emitted as its own oversized chunk.
/// Returned chunks are trimmed and never empty.
pub fn split(text: &str, max_bytes: usize) -> Vec<String> {
    let max_bytes = max_bytes.max(1);
    let mut chunker = Accumulator::new(max_bytes);

    for paragraph in paragraphs(text) {
        if paragraph.len() <= max_bytes {
            chunker.push(paragraph, PARAGRAPH_SEPARATOR);
            continue;
        }

        // The first unit of a split paragraph still follows a paragraph break.
        let mut separator = PARAGRAPH_SEPARATOR;
        for sentence in sentences(paragraph) {
            if sentence.len() <= max_bytes {
                chunker.push(sentence, separator);
                separator = WORD_SEPARATOR;
            } else {
                for word in sentence.split_whitespace() {
                    chunker.push(word, separator);
                    separator = WORD_SEPARATOR;
                }
            }
        }
    }

    chunker.finish()
}

/// Greedy chunk builder.
struct Accumulator {
    max_bytes: usize,
    current: String,
    chunks: Vec<String>,
}

impl Accumulator {
    fn new(max_bytes: usize) -> Self {
        Self { max_bytes, current: String::new(), chunks: Vec::new() }
    }

    /// Append a unit, flushing first if it would overflow the current chunk.
    fn push(&mut self, unit: &str, separator: &str) {
        let unit = unit.trim();
        if unit.is_empty() {
            return;
        }

        if !self.current.is_empty() && self.current.len() + separator.len() + unit.len() > self.max_bytes {
            self.flush();
        }
        if !self.current.is_empty() {
            self.current.push_str(separator);
        }
        self.current.push_str(unit);
    }

    fn flush(&mut self) {
        let chunk = self.current.trim();
        if !chunk.is_empty() {
            self.chunks.push(chunk.to_string());
        }
        self.current.clear();
    }

    fn finish(mut self) -> Vec<String> {
        self.flush();
        self.chunks
    }
}

/// Paragraphs separated by one or more blank lines.
fn paragraphs(text: &str) -> Vec<&str> {
    let mut result = Vec::new();
    let mut start = 0;
    let mut blank_run = false;
    let mut offset = 0;

    for line in text.split_inclusive('\n') {
        if line.trim().is_empty() {
            if !blank_run {
                result.push(&text[start..offset]);
                blank_run = true;
            }
        } else if blank_run {
            start = offset;
            blank_run = false;
        }
        offset += line.len();
    }
    if !blank_run {
        result.push(&text[start..]);
    }

    result.into_iter().map(str::trim).filter(|p| !p.is_empty()).collect()
}

/// Sentences of a paragraph, each ending at its terminator and closers.
fn sentences(paragraph: &str) -> Vec<&str> {
    let mut result = Vec::new();
    let mut start = 0;
    let mut chars = paragraph.char_indices().peekable();

    while let Some((_, c)) = chars.next() {
        if !SENTENCE_TERMINATORS.contains(&c) {
            continue;
        }

        // Runs like "?!" or "..." belong to the same sentence end.
        while let Some(&(_, next)) = chars.peek() {
            if SENTENCE_TERMINATORS.contains(&next) || CLOSERS.contains(&next) {
                chars.next();
            } else {
                break;
            }
        }

        let end = chars.peek().map_or(paragraph.len(), |&(i, _)| i);
        let at_boundary = match chars.peek() {
            None => true,
            Some(&(_, next)) => next.is_whitespace() || FULL_WIDTH_TERMINATORS.contains(&c),
        };
        if at_boundary {
            result.push(&paragraph[start..end]);
            start = end;
        }
    }
    if start < paragraph.len() {
        result.push(&paragraph[start..]);
    }

    result.into_iter().map(str::trim).filter(|s| !s.is_empty()).collect()
}
