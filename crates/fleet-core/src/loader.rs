// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Batch registration from line-oriented text.

use crate::id::WorkerId;
use crate::record::{AccountLineParser, LineParser, RecordError};
use crate::worker::WorkerSpec;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Parses batches of record lines and feeds them to a registration sink.
#[derive(Clone)]
pub struct BulkLoader {
    parser: Arc<dyn LineParser>,
}

impl Default for BulkLoader {
    fn default() -> Self {
        Self::new(Arc::new(AccountLineParser))
    }
}

impl BulkLoader {
    /// Loader using `parser` for each line.
    pub fn new(parser: Arc<dyn LineParser>) -> Self {
        Self { parser }
    }

    /// Per-line outcomes, numbered from 1. Blank lines are omitted.
    pub fn parse_lines<'a>(
        &'a self,
        text: &'a str,
    ) -> impl Iterator<Item = (usize, Result<WorkerSpec, RecordError>)> + 'a {
        text.lines()
            .enumerate()
            .map(|(index, line)| (index + 1, self.parser.parse_line(line)))
            .filter(|(_, outcome)| !matches!(outcome, Err(RecordError::Blank)))
    }

    /// Every usable record in `text`; malformed lines are logged and skipped.
    pub fn parse_batch(&self, text: &str) -> Vec<WorkerSpec> {
        self.parse_lines(text)
            .filter_map(|(line, outcome)| match outcome {
                Ok(spec) => Some(spec),
                Err(err) => {
                    warn!(line, %err, "skipping malformed record");
                    None
                }
            })
            .collect()
    }

    /// Parse `text` and hand each record to `register`, collecting the ids.
    ///
    /// Nothing is launched here; the caller decides when to run the workers.
    pub fn load_and_register<F>(&self, text: &str, mut register: F) -> Vec<WorkerId>
    where
        F: FnMut(WorkerSpec) -> WorkerId,
    {
        let ids: Vec<WorkerId> = self
            .parse_batch(text)
            .into_iter()
            .map(|spec| {
                debug!(user_id = %spec.user_id, "registering batch record");
                register(spec)
            })
            .collect();
        info!(count = ids.len(), "batch registered");
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DirectOnly;

    impl LineParser for DirectOnly {
        fn parse_line(&self, line: &str) -> Result<WorkerSpec, RecordError> {
            let spec = AccountLineParser.parse_line(line)?;
            match spec.proxy_url {
                None => Ok(spec),
                Some(proxy) => Err(RecordError::InvalidProxy(proxy)),
            }
        }
    }

    #[test]
    fn batch_keeps_valid_records_in_order() {
        let loader = BulkLoader::default();
        let specs = loader.parse_batch("u1==http://p1\n\n==http://orphan\nu2\n");
        assert_eq!(
            specs,
            vec![WorkerSpec::proxied("u1", "http://p1"), WorkerSpec::direct("u2")]
        );
    }

    #[test]
    fn parse_lines_reports_line_numbers() {
        let loader = BulkLoader::default();
        let outcomes: Vec<_> = loader.parse_lines("a1\n\nbad line\nb2").collect();
        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes[0].0, 1);
        assert!(matches!(outcomes[1], (3, Err(RecordError::InvalidUserId(_)))));
        assert_eq!(outcomes[2], (4, Ok(WorkerSpec::direct("b2"))));
    }

    #[test]
    fn bare_word_line_is_skipped() {
        let loader = BulkLoader::default();
        let specs = loader.parse_batch("u1==http://p1\nbadline\nu2\n");
        assert_eq!(
            specs,
            vec![WorkerSpec::proxied("u1", "http://p1"), WorkerSpec::direct("u2")]
        );
    }

    #[test]
    fn custom_parser_decides_what_is_malformed() {
        let loader = BulkLoader::new(Arc::new(DirectOnly));
        let specs = loader.parse_batch("u1==http://p1\nu2\nu3==\n");
        assert_eq!(specs, vec![WorkerSpec::direct("u2"), WorkerSpec::direct("u3")]);
    }

    #[test]
    fn load_and_register_feeds_the_sink() {
        let loader = BulkLoader::default();
        let mut seen = Vec::new();
        let ids = loader.load_and_register("x1\ny2\n", |spec| {
            seen.push(spec.user_id);
            WorkerId::new_random()
        });
        assert_eq!(ids.len(), 2);
        assert_eq!(seen, ["x1", "y2"]);
    }
}
