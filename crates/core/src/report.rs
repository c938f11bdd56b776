//! Progress and error reporting sinks.
//!
//! Two unbounded FIFO queues, each consumed by one printer task:
//! progress lines go to stdout, error lines to stderr. Lines from
//! concurrent workers interleave, but each line is atomic and
//! attributed to one item.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Cloneable producer half handed to command drivers and pool handlers.
#[derive(Debug, Clone)]
pub struct ReportSink {
    print_tx: mpsc::UnboundedSender<String>,
    error_tx: mpsc::UnboundedSender<String>,
    errored: Arc<AtomicBool>,
}

impl ReportSink {
    /// A sink plus the consuming halves of its two queues. [`Reporter`]
    /// attaches the stdout/stderr printer tasks to the receivers; tests
    /// drain them directly to observe reported lines.
    pub fn paired() -> (
        Self,
        mpsc::UnboundedReceiver<String>,
        mpsc::UnboundedReceiver<String>,
    ) {
        let (print_tx, print_rx) = mpsc::unbounded_channel();
        let (error_tx, error_rx) = mpsc::unbounded_channel();
        let sink = Self {
            print_tx,
            error_tx,
            errored: Arc::new(AtomicBool::new(false)),
        };
        (sink, print_rx, error_rx)
    }

    /// Queues a progress line for stdout.
    pub fn progress(&self, line: impl Into<String>) {
        let _ = self.print_tx.send(line.into());
    }

    /// Queues an error line for stderr and marks the run as failed.
    pub fn error(&self, line: impl Into<String>) {
        self.errored.store(true, Ordering::SeqCst);
        let _ = self.error_tx.send(line.into());
    }

    /// Whether any error line was emitted so far.
    pub fn had_errors(&self) -> bool {
        self.errored.load(Ordering::SeqCst)
    }
}

/// Owner of the printer tasks. Created once per process; `close` must
/// run after every sink clone has been dropped so the queues can drain
/// to completion.
pub struct Reporter {
    sink: ReportSink,
    print_task: JoinHandle<()>,
    error_task: JoinHandle<()>,
}

impl Reporter {
    pub fn new() -> Self {
        let (sink, mut print_rx, mut error_rx) = ReportSink::paired();

        let print_task = tokio::spawn(async move {
            while let Some(line) = print_rx.recv().await {
                println!("{line}");
            }
        });
        let error_task = tokio::spawn(async move {
            while let Some(line) = error_rx.recv().await {
                eprintln!("{line}");
            }
        });

        Self {
            sink,
            print_task,
            error_task,
        }
    }

    pub fn sink(&self) -> ReportSink {
        self.sink.clone()
    }

    /// Drains both queues and returns whether any error was reported.
    pub async fn close(self) -> bool {
        let Reporter {
            sink,
            print_task,
            error_task,
        } = self;
        let errored = sink.had_errors();
        drop(sink);
        let _ = print_task.await;
        let _ = error_task.await;
        errored
    }
}

impl Default for Reporter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn close_reports_error_state() {
        let reporter = Reporter::new();
        let sink = reporter.sink();
        sink.progress("uploaded photos/cat.jpg");
        assert!(!sink.had_errors());
        sink.error("Object 'photos/dog.jpg' not found");
        assert!(sink.had_errors());
        drop(sink);
        assert!(reporter.close().await);
    }

    #[tokio::test]
    async fn paired_receivers_observe_lines() {
        let (sink, mut print_rx, mut error_rx) = ReportSink::paired();
        sink.progress("uploaded a");
        sink.error("lost b");
        assert_eq!(print_rx.try_recv().unwrap(), "uploaded a");
        assert_eq!(error_rx.try_recv().unwrap(), "lost b");
        assert!(sink.had_errors());
    }

    #[tokio::test]
    async fn clean_run_closes_clean() {
        let reporter = Reporter::new();
        let sink = reporter.sink();
        sink.progress("done");
        drop(sink);
        assert!(!reporter.close().await);
    }
}
