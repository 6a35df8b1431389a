//! Multiplexed curl adapter.
//!
//! One scheduler loop drives many transfers over a single native
//! multiplexer with a sliding concurrency window:
//!
//! ```text
//!   source ──▶ before ──▶ compile ──▶ add2 ──┐
//!     ▲                                     │ perform / wait
//!     │ refill                              ▼
//!     └──── retry queue ◀── complete/error ◀── finished message
//! ```
//!
//! Finished transfers are removed and classified immediately, and their
//! slot is refilled before the next wait.
//!
//! Native multiplexers never leave the thread that created them. Idle ones
//! are cached per thread, and a running batch only absorbs `send_all` calls
//! made on its own thread (that is, from its listeners).

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Instant;

use curl::easy::Easy2;
use curl::multi::Multi;
use parking_lot::Mutex;
use tracing::{debug, info, trace};

use super::batch::{BatchContext, PendingQueue, SharedQueue};
use super::compiler::OptionCompiler;
use super::mediator::Mediator;
use crate::domain::{EngineConfig, Response, Transaction, TransactionState, TransferInfo};
use crate::error::{check_multi_code, curl_code, AdapterError, RequestError, SendError};
use crate::events::pipeline::{final_response, relay_listener_failure};
use crate::events::{emit_before, emit_complete, emit_error, Outcome};
use crate::metrics::SchedulerStats;
use crate::ports::{Adapter, ParallelAdapter, TransactionIter};

thread_local! {
    static IDLE_MULTI: RefCell<Vec<Multi>> = const { RefCell::new(Vec::new()) };
}

/// Sends transactions through libcurl's multi interface.
pub struct MultiAdapter {
    config: EngineConfig,
    compiler: OptionCompiler,
    /// Pending queue of the batch each scheduling thread is running.
    active: Mutex<HashMap<ThreadId, SharedQueue>>,
    stats: Arc<SchedulerStats>,
}

impl Default for MultiAdapter {
    fn default() -> Self {
        let config = EngineConfig::default();
        Self::with_compiler(OptionCompiler::new(&config), config)
    }
}

impl MultiAdapter {
    /// Create an adapter from a validated configuration.
    pub fn new(config: EngineConfig) -> Result<Self, AdapterError> {
        config.validate()?;
        Ok(Self::with_compiler(OptionCompiler::new(&config), config))
    }

    /// Create an adapter with an explicit option compiler.
    pub fn with_compiler(compiler: OptionCompiler, config: EngineConfig) -> Self {
        Self {
            config,
            compiler,
            active: Mutex::new(HashMap::new()),
            stats: Arc::new(SchedulerStats::new()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn stats(&self) -> Arc<SchedulerStats> {
        self.stats.clone()
    }

    /// Number of idle multiplexers kept for reuse on the calling thread.
    pub fn cached_handles(&self) -> usize {
        IDLE_MULTI.with(|idle| idle.borrow().len())
    }

    fn checkout(&self) -> Multi {
        IDLE_MULTI
            .with(|idle| idle.borrow_mut().pop())
            .unwrap_or_else(Multi::new)
    }

    fn release(&self, multi: Multi) {
        let limit = self.config.max_cached_multi_handles;
        IDLE_MULTI.with(|idle| {
            let mut idle = idle.borrow_mut();
            if idle.len() < limit {
                idle.push(multi);
            }
        });
    }

    /// Run `before` and, unless a listener settled the transaction, register
    /// a transfer for it.
    fn add_handle(&self, tx: &Transaction, context: &mut BatchContext) -> Result<(), AdapterError> {
        match emit_before(tx) {
            Outcome::Proceed => {}
            settled => {
                self.settle(context, tx, settled);
                return Ok(());
            }
        }

        let request = tx.request();
        let options = self.compiler.compile(&request)?;
        let request_body = if options.reads_body() {
            request.body().cloned()
        } else {
            None
        };
        let mediator = Mediator::new(tx.clone())
            .with_request_body(request_body)
            .with_response_body(options.save_to().cloned())
            .with_debug(options.debug_sink().cloned());

        let mut easy = Easy2::new(mediator);
        options.apply(&mut easy)?;
        tx.set_state(TransactionState::Transferring);
        context.add_transaction(tx, easy)?;
        self.stats.record_registered();
        debug!(
            transaction = %tx.id(),
            method = %request.method(),
            url = %request.url(),
            in_flight = context.in_flight(),
            "transfer registered"
        );
        Ok(())
    }

    /// Keep the window full from due retries and the pending sources.
    fn refill(&self, context: &mut BatchContext) -> Result<(), AdapterError> {
        while context.in_flight() < context.window() {
            let Some(tx) = context.next_pending() else {
                break;
            };
            self.add_handle(&tx, context)?;
        }
        Ok(())
    }

    fn settle(&self, context: &mut BatchContext, tx: &Transaction, outcome: Outcome) {
        match outcome {
            Outcome::Retry(delay) => {
                self.stats.record_retried();
                debug!(transaction = %tx.id(), retries = tx.retries(), ?delay, "retry scheduled");
                context.schedule_retry(tx.clone(), delay);
            }
            Outcome::Resolved => self.stats.record_completed(),
            Outcome::Intercepted => self.stats.record_intercepted(),
            Outcome::Failed(_) | Outcome::Suppressed(_) => self.stats.record_failed(),
            Outcome::Proceed => {}
        }
    }

    fn perform(&self, context: &mut BatchContext) -> Result<(), AdapterError> {
        let mut timeout = self.config.initial_select_timeout();

        loop {
            let active = loop {
                match context.multi().perform() {
                    Ok(running) => break running,
                    // Call-again is the only non-fatal failure code.
                    Err(e) => check_multi_code(e.code())?,
                }
            };

            self.process_messages(context)?;
            self.refill(context)?;

            if context.in_flight() == 0 && !context.has_pending() {
                return Ok(());
            }

            let retry_wait = context
                .next_retry_due()
                .map(|due| due.saturating_duration_since(Instant::now()));
            if active > 0 {
                let wait = retry_wait.map_or(timeout, |d| d.min(timeout));
                context.multi().wait(&mut [], wait)?;
                timeout = self.config.select_timeout();
            } else if context.in_flight() == 0 {
                // Only delayed retries remain.
                if let Some(wait) = retry_wait {
                    std::thread::sleep(wait);
                }
            }
        }
    }

    fn process_messages(&self, context: &mut BatchContext) -> Result<(), AdapterError> {
        for (token, result) in context.drain_finished() {
            let tx = context.find_transaction(token)?;
            let easy = context.remove_transaction(&tx)?;
            self.stats.record_removed();

            let outcome = self.process_response(&tx, easy, result)?;
            self.settle(context, &tx, outcome);
            self.refill(context)?;
        }
        Ok(())
    }

    fn process_response(
        &self,
        tx: &Transaction,
        mut easy: Easy2<Mediator>,
        result: Result<(), curl::Error>,
    ) -> Result<Outcome, AdapterError> {
        let info = transfer_info(&mut easy, &result);
        trace!(transaction = %tx.id(), info = ?info, "transfer finished");
        tx.set_transfer_info(Some(info.clone()));

        if let Some(failure) = easy.get_mut().take_headers_failure() {
            return match failure.downcast::<AdapterError>() {
                Ok(fatal) => Err(fatal),
                Err(failure) => Ok(relay_listener_failure(tx, failure)),
            };
        }

        let outcome = match result {
            Err(e) => {
                let error = tx.with_request(|r| RequestError::from_curl(r, &e));
                emit_error(
                    tx,
                    Arc::new(
                        error
                            .with_response(tx.response())
                            .with_transfer_info(info)
                            .with_source(e),
                    ),
                )
            }
            Ok(()) if !tx.has_response() => {
                let error = tx.with_request(RequestError::no_response).with_transfer_info(info);
                emit_error(tx, Arc::new(error))
            }
            Ok(()) => {
                tx.with_response_mut(|r| {
                    if r.body().is_seekable() {
                        r.body().rewind().ok();
                    }
                });
                emit_complete(tx)
            }
        };
        Ok(outcome)
    }
}

fn transfer_info(easy: &mut Easy2<Mediator>, result: &Result<(), curl::Error>) -> TransferInfo {
    TransferInfo {
        effective_url: easy.effective_url().ok().flatten().map(str::to_string),
        response_code: easy.response_code().ok().filter(|code| *code != 0),
        total_time: easy.total_time().ok(),
        connect_time: easy.connect_time().ok(),
        primary_ip: easy.primary_ip().ok().flatten().map(str::to_string),
        redirect_count: easy.redirect_count().ok(),
        result_code: Some(match result {
            Ok(()) => 0,
            Err(e) => curl_code(e),
        }),
    }
}

impl Adapter for MultiAdapter {
    fn send(&self, transaction: &Transaction) -> Result<Response, SendError> {
        let queue = Arc::new(Mutex::new(PendingQueue::default()));
        let mut context = BatchContext::new(self.checkout(), 1, queue);

        let result = self
            .add_handle(transaction, &mut context)
            .and_then(|()| self.perform(&mut context));
        self.release(context.into_multi());
        result?;

        final_response(transaction)
    }
}

impl ParallelAdapter for MultiAdapter {
    fn send_all(&self, transactions: TransactionIter, concurrency: usize) -> Result<(), AdapterError> {
        let thread = thread::current().id();
        let queue = {
            let mut active = self.active.lock();
            if let Some(queue) = active.get(&thread) {
                queue.lock().push(transactions);
                debug!("transactions merged into the running batch");
                return Ok(());
            }
            let queue: SharedQueue = Arc::new(Mutex::new(PendingQueue::new(transactions)));
            active.insert(thread, queue.clone());
            queue
        };

        let started = Instant::now();
        let mut context = BatchContext::new(self.checkout(), concurrency, queue);
        let result = self
            .refill(&mut context)
            .and_then(|()| self.perform(&mut context));

        // Only this thread's listeners can merge, and none run past perform.
        self.active.lock().remove(&thread);
        self.release(context.into_multi());

        let stats = self.stats.snapshot();
        info!(
            concurrency,
            elapsed_ms = started.elapsed().as_millis() as u64,
            completed = stats.completed,
            failed = stats.failed,
            peak_in_flight = stats.peak_in_flight,
            "batch finished"
        );
        result
    }
}
