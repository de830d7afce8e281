//! Parse worker
//!
//! Parsing a large bibliography is CPU-bound, so it runs away from the
//! caller's task. One worker task owns a FIFO job queue and runs one parse
//! at a time on the blocking pool; sources share a cloned handle.
//!
//! Cancellation is cooperative: a caller whose token fires gets
//! [`WorkerError::Cancelled`] immediately. A parse already running is left
//! to finish and its result is dropped; a queued job whose token has fired
//! is skipped.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::ParseError;
use crate::parse::{parse_records, DatabaseFormat, ParseOutput};

/// Why a parse request produced no output
#[derive(thiserror::Error, Debug)]
pub enum WorkerError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("Parse request cancelled")]
    Cancelled,

    #[error("Parse worker has stopped")]
    Stopped,
}

type ParseFn = Arc<dyn Fn(&str, DatabaseFormat) -> Result<ParseOutput, ParseError> + Send + Sync>;

struct ParseJob {
    text: String,
    format: DatabaseFormat,
    cancel: CancellationToken,
    reply: oneshot::Sender<Result<ParseOutput, ParseError>>,
}

/// Handle to the parse worker
///
/// Cloning is cheap; the worker stops once every handle is dropped.
#[derive(Clone)]
pub struct ParseWorker {
    job_tx: mpsc::UnboundedSender<ParseJob>,
}

impl ParseWorker {
    /// Spawn the worker task on the current Tokio runtime
    pub fn spawn() -> Self {
        Self::spawn_with(Arc::new(parse_records))
    }

    fn spawn_with(parser: ParseFn) -> Self {
        let (job_tx, job_rx) = mpsc::unbounded_channel();
        tokio::spawn(worker_loop(job_rx, parser));
        Self { job_tx }
    }

    /// Queue `text` for parsing and wait for the result
    pub async fn parse(
        &self,
        text: String,
        format: DatabaseFormat,
        cancel: &CancellationToken,
    ) -> Result<ParseOutput, WorkerError> {
        if cancel.is_cancelled() {
            return Err(WorkerError::Cancelled);
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        self.job_tx
            .send(ParseJob {
                text,
                format,
                cancel: cancel.clone(),
                reply: reply_tx,
            })
            .map_err(|_| WorkerError::Stopped)?;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(WorkerError::Cancelled),
            reply = reply_rx => match reply {
                Ok(result) => result.map_err(WorkerError::from),
                Err(_) => Err(WorkerError::Stopped),
            },
        }
    }
}

async fn worker_loop(mut job_rx: mpsc::UnboundedReceiver<ParseJob>, parser: ParseFn) {
    debug!("Parse worker started");

    while let Some(job) = job_rx.recv().await {
        if job.cancel.is_cancelled() || job.reply.is_closed() {
            trace!("Skipping cancelled {} parse job", job.format.label());
            continue;
        }

        let ParseJob {
            text,
            format,
            reply,
            ..
        } = job;
        let size = text.len();

        let parser = parser.clone();
        let result = tokio::task::spawn_blocking(move || parser(&text, format))
            .await
            .unwrap_or_else(|e| Err(ParseError::Worker(e.to_string())));

        trace!(bytes = size, format = %format, ok = result.is_ok(), "Parse job finished");

        // The requester may have given up in the meantime
        let _ = reply.send(result);
    }

    debug!("Parse worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::RawRecord;
    use std::sync::Mutex;
    use std::time::Duration;

    type Log = Arc<Mutex<Vec<String>>>;

    /// Parser that logs when each job starts and ends
    fn recording_parser(log: Log, delay: Duration) -> ParseFn {
        Arc::new(move |text: &str, _format: DatabaseFormat| {
            log.lock().unwrap().push(format!("start {}", text));
            std::thread::sleep(delay);
            log.lock().unwrap().push(format!("end {}", text));
            Ok(ParseOutput::default())
        })
    }

    fn logged(log: &Log) -> Vec<String> {
        log.lock().unwrap().clone()
    }

    async fn wait_for(log: &Log, line: &str) {
        while !logged(log).iter().any(|l| l == line) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_parse_csl() {
        let worker = ParseWorker::spawn();
        let token = CancellationToken::new();

        let out = worker
            .parse(
                r#"[{"id": "a", "type": "book"}]"#.to_string(),
                DatabaseFormat::CslJson,
                &token,
            )
            .await
            .unwrap();
        assert_eq!(out.records.len(), 1);
        assert!(matches!(out.records[0], RawRecord::Csl(_)));
    }

    #[tokio::test]
    async fn test_fatal_error_is_reported() {
        let worker = ParseWorker::spawn();
        let token = CancellationToken::new();

        let err = worker
            .parse("not json".to_string(), DatabaseFormat::CslJson, &token)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::Parse(ParseError::InvalidJson { .. })));
    }

    #[tokio::test]
    async fn test_warnings_do_not_fail_the_batch() {
        let worker = ParseWorker::spawn();
        let token = CancellationToken::new();

        let out = worker
            .parse(
                "@book{ok, title = {Fine}}\n@book{, broken}".to_string(),
                DatabaseFormat::BibLatex,
                &token,
            )
            .await
            .unwrap();
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.warnings.len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_request() {
        let worker = ParseWorker::spawn();
        let token = CancellationToken::new();
        token.cancel();

        let err = worker
            .parse("[]".to_string(), DatabaseFormat::CslJson, &token)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::Cancelled));
    }

    #[tokio::test]
    async fn test_concurrent_requests_all_complete() {
        let worker = ParseWorker::spawn();
        let token = CancellationToken::new();

        let jobs = (0..4).map(|i| {
            let worker = worker.clone();
            let token = token.clone();
            async move {
                let text = format!(r#"[{{"id": "k{}", "type": "book"}}]"#, i);
                worker.parse(text, DatabaseFormat::CslJson, &token).await
            }
        });

        let results = futures_util::future::join_all(jobs).await;
        assert!(results.iter().all(|r| matches!(r, Ok(out) if out.records.len() == 1)));
    }

    #[tokio::test]
    async fn test_jobs_run_one_at_a_time_in_order() {
        let log = Log::default();
        let worker = ParseWorker::spawn_with(recording_parser(log.clone(), Duration::from_millis(20)));
        let token = CancellationToken::new();

        let jobs = ["a", "b", "c"].map(|name| {
            let worker = worker.clone();
            let token = token.clone();
            async move { worker.parse(name.to_string(), DatabaseFormat::CslJson, &token).await }
        });
        let results = futures_util::future::join_all(jobs).await;
        assert!(results.iter().all(|r| r.is_ok()));

        assert_eq!(
            logged(&log),
            vec!["start a", "end a", "start b", "end b", "start c", "end c"]
        );
    }

    #[tokio::test]
    async fn test_cancelled_queued_job_is_skipped() {
        let log = Log::default();
        let worker = ParseWorker::spawn_with(recording_parser(log.clone(), Duration::from_millis(200)));
        let keep = CancellationToken::new();
        let skip = CancellationToken::new();

        let first = tokio::spawn({
            let worker = worker.clone();
            let keep = keep.clone();
            async move { worker.parse("first".to_string(), DatabaseFormat::BibLatex, &keep).await }
        });
        wait_for(&log, "start first").await;

        let queued = tokio::spawn({
            let worker = worker.clone();
            let skip = skip.clone();
            async move { worker.parse("queued".to_string(), DatabaseFormat::CslJson, &skip).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        skip.cancel();

        let err = queued.await.unwrap().unwrap_err();
        assert!(matches!(err, WorkerError::Cancelled));
        assert!(!logged(&log).contains(&"end first".to_string()));

        worker
            .parse("last".to_string(), DatabaseFormat::CslJson, &keep)
            .await
            .unwrap();
        first.await.unwrap().unwrap();

        assert_eq!(
            logged(&log),
            vec!["start first", "end first", "start last", "end last"]
        );
    }

    #[tokio::test]
    async fn test_in_flight_result_is_discarded() {
        let log = Log::default();
        let worker = ParseWorker::spawn_with(recording_parser(log.clone(), Duration::from_millis(200)));
        let token = CancellationToken::new();

        let running = tokio::spawn({
            let worker = worker.clone();
            let token = token.clone();
            async move { worker.parse("slow".to_string(), DatabaseFormat::BibLatex, &token).await }
        });
        wait_for(&log, "start slow").await;
        token.cancel();

        let err = running.await.unwrap().unwrap_err();
        assert!(matches!(err, WorkerError::Cancelled));
        assert!(!logged(&log).contains(&"end slow".to_string()));

        // The parse still runs to completion before the next job starts
        let fresh = CancellationToken::new();
        worker
            .parse("next".to_string(), DatabaseFormat::CslJson, &fresh)
            .await
            .unwrap();
        assert_eq!(
            logged(&log),
            vec!["start slow", "end slow", "start next", "end next"]
        );
    }
}
