//! Request feeds: lazy sources of command envelopes.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use codec::{
    AddItemRequest, CommandEnvelope, CommandType, DeleteItemRequest, GetAllItemsRequest,
    GetItemRequest,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("feed exhausted")]
    Exhausted,

    #[error("failed to parse request at line {line}: {source}")]
    Parse {
        line: usize,
        source: codec::CodecError,
    },

    #[error("failed to build request: {0}")]
    Codec(#[from] codec::CodecError),

    #[error("failed to read feed: {0}")]
    Io(#[from] std::io::Error),
}

/// A lazy source of request envelopes.
///
/// `next` on an exhausted feed returns [`FeedError::Exhausted`]; parse
/// failures are per-entry and the caller is expected to skip them.
pub trait RequestFeed: Send {
    fn next(&mut self) -> Result<CommandEnvelope, FeedError>;
    fn is_empty(&self) -> bool;
    fn close(&mut self);
}

/// Reads one JSON envelope per line from a file.
pub struct FileRequestFeed {
    reader: Option<BufReader<File>>,
    line_number: usize,
    exhausted: bool,
}

impl FileRequestFeed {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, FeedError> {
        let file = File::open(path)?;
        Ok(Self {
            reader: Some(BufReader::new(file)),
            line_number: 0,
            exhausted: false,
        })
    }
}

impl RequestFeed for FileRequestFeed {
    fn next(&mut self) -> Result<CommandEnvelope, FeedError> {
        let Some(reader) = self.reader.as_mut() else {
            self.exhausted = true;
            return Err(FeedError::Exhausted);
        };

        let mut line = String::new();
        // A read failure ends the feed the same way end-of-file does.
        let bytes = match reader.read_line(&mut line) {
            Ok(bytes) => bytes,
            Err(e) => {
                self.exhausted = true;
                return Err(e.into());
            }
        };
        if bytes == 0 {
            self.exhausted = true;
            return Err(FeedError::Exhausted);
        }
        self.line_number += 1;

        // Blank and malformed lines both surface as parse errors; callers
        // log and move on.
        codec::deserialize_envelope(line.trim()).map_err(|source| FeedError::Parse {
            line: self.line_number,
            source,
        })
    }

    fn is_empty(&self) -> bool {
        self.exhausted
    }

    fn close(&mut self) {
        self.reader = None;
        self.exhausted = true;
    }
}

/// Emits uniformly random commands over a bounded key/value namespace, so
/// gets and deletes see a realistic hit/miss mix.
pub struct RandomRequestFeed {
    max_requests: i64,
    produced: i64,
    rng: StdRng,
}

/// Cardinality of the generated key and value namespaces.
const NAMESPACE_SIZE: u32 = 1000;

impl RandomRequestFeed {
    /// `max_requests <= 0` means unbounded.
    pub fn new(max_requests: i64) -> Self {
        Self {
            max_requests,
            produced: 0,
            rng: StdRng::from_entropy(),
        }
    }

    fn random_key(&mut self) -> String {
        format!("key{}", self.rng.gen_range(0..NAMESPACE_SIZE))
    }

    fn random_value(&mut self) -> String {
        format!("value{}", self.rng.gen_range(0..NAMESPACE_SIZE))
    }
}

impl RequestFeed for RandomRequestFeed {
    fn next(&mut self) -> Result<CommandEnvelope, FeedError> {
        if self.is_empty() {
            return Err(FeedError::Exhausted);
        }
        if self.max_requests > 0 {
            self.produced += 1;
        }

        let envelope = match self.rng.gen_range(0..4) {
            0 => CommandEnvelope::new(
                CommandType::AddItem,
                &AddItemRequest {
                    key: self.random_key(),
                    value: self.random_value(),
                },
            ),
            1 => CommandEnvelope::new(
                CommandType::DeleteItem,
                &DeleteItemRequest {
                    key: self.random_key(),
                },
            ),
            2 => CommandEnvelope::new(
                CommandType::GetItem,
                &GetItemRequest {
                    key: self.random_key(),
                },
            ),
            _ => CommandEnvelope::new(CommandType::GetAllItems, &GetAllItemsRequest::default()),
        }?;
        Ok(envelope)
    }

    fn is_empty(&self) -> bool {
        self.max_requests > 0 && self.produced >= self.max_requests
    }

    fn close(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn file_feed_reads_envelopes_line_by_line() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{"type":"addItem","payload":{{"key":"a","value":"1"}}}}"#
        )
        .unwrap();
        writeln!(file, r#"{{"type":"getItem","payload":{{"key":"a"}}}}"#).unwrap();

        let mut feed = FileRequestFeed::open(file.path()).unwrap();
        assert!(!feed.is_empty());

        let envelope = feed.next().unwrap();
        assert_eq!(envelope.command_type, CommandType::AddItem);
        let envelope = feed.next().unwrap();
        assert_eq!(envelope.command_type, CommandType::GetItem);

        assert!(matches!(feed.next(), Err(FeedError::Exhausted)));
        assert!(feed.is_empty());
    }

    #[test]
    fn file_feed_flags_malformed_lines_without_ending() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "this is not json").unwrap();
        writeln!(file).unwrap();
        writeln!(file, r#"{{"type":"getAllItems","payload":{{}}}}"#).unwrap();

        let mut feed = FileRequestFeed::open(file.path()).unwrap();

        assert!(matches!(feed.next(), Err(FeedError::Parse { line: 1, .. })));
        assert!(!feed.is_empty());
        assert!(matches!(feed.next(), Err(FeedError::Parse { line: 2, .. })));

        let envelope = feed.next().unwrap();
        assert_eq!(envelope.command_type, CommandType::GetAllItems);
        assert!(matches!(feed.next(), Err(FeedError::Exhausted)));
    }

    #[test]
    fn file_feed_close_ends_the_feed() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"type":"getAllItems","payload":{{}}}}"#).unwrap();

        let mut feed = FileRequestFeed::open(file.path()).unwrap();
        feed.close();
        assert!(feed.is_empty());
        assert!(matches!(feed.next(), Err(FeedError::Exhausted)));
    }

    #[test]
    fn random_feed_respects_its_bound() {
        let mut feed = RandomRequestFeed::new(25);
        let mut produced = 0;
        while !feed.is_empty() {
            feed.next().unwrap();
            produced += 1;
        }
        assert_eq!(produced, 25);
        assert!(matches!(feed.next(), Err(FeedError::Exhausted)));
    }

    #[test]
    fn random_feed_zero_or_negative_bound_is_unbounded() {
        for bound in [0, -1] {
            let mut feed = RandomRequestFeed::new(bound);
            for _ in 0..100 {
                assert!(!feed.is_empty());
                feed.next().unwrap();
            }
        }
    }

    #[test]
    fn random_feed_emits_known_command_types() {
        let mut feed = RandomRequestFeed::new(50);
        while !feed.is_empty() {
            let envelope = feed.next().unwrap();
            assert_ne!(envelope.command_type, CommandType::Unknown);
        }
    }
}
