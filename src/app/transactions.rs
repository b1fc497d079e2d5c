//! Transaction lifecycle tracker.
//!
//! Submits a state-changing call and reports its progress as a stream of
//! lifecycle snapshots: `pending`, `mined`, then `confirmed` or `failed`.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};
use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::domain::abi::{decode_log, encode_call};
use crate::domain::{
    AbiValue, Address, AppError, CallRequest, Confirmation, ConfirmationProbe, ContractHandle, Diagnostic,
    ErrorClassifier, FailedCall, LifecycleEvent, RawReceipt, Receipt, SubmissionError, TransactionRecord,
    TransactionRequest, TransactionStatus,
};

use super::classifier::PassThrough;
use super::context::Context;

/// Room for every snapshot a transaction can produce.
const EVENT_BUFFER: usize = 4;

/// Options for one submission; created by [`Context::transaction`].
pub struct TransactionBuilder {
    ctx: Context,
    contract: Arc<ContractHandle>,
    method: String,
    args: Vec<AbiValue>,
    sender: Option<Address>,
    classifier: Arc<dyn ErrorClassifier>,
    probe: Option<Box<dyn ConfirmationProbe>>,
}

impl TransactionBuilder {
    /// Signs with `sender` instead of the context's default account.
    #[must_use]
    pub fn sender(mut self, sender: Address) -> Self {
        self.sender = Some(sender);
        self
    }

    #[must_use]
    pub fn classifier(mut self, classifier: Arc<dyn ErrorClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Waits for `probe` before emitting `confirmed`.
    #[must_use]
    pub fn confirm_with(mut self, probe: impl ConfirmationProbe + 'static) -> Self {
        self.probe = Some(Box::new(probe));
        self
    }

    /// Validates the call, emits `pending` and starts tracking.
    ///
    /// # Errors
    ///
    /// Fails before any event is emitted with `NotConnected`, `NoSigner`,
    /// `UnknownContract` (method not on the interface) or `Mapping` (bad
    /// arguments).
    #[instrument(skip(self), fields(contract = %self.contract.address(), method = %self.method))]
    pub fn submit(self) -> Result<TransactionStream, AppError> {
        self.ctx.ensure_connected()?;
        let contract_address = self.contract.address().clone();

        let sender = self
            .sender
            .or_else(|| self.ctx.account().cloned())
            .ok_or_else(|| {
                AppError::NoSigner(format!(
                    "cannot call {} on {} without a signing account",
                    self.method, contract_address
                ))
            })?;

        let function = self.contract.interface().function(&self.method).ok_or_else(|| {
            AppError::UnknownContract(format!(
                "{} at {} has no method '{}'",
                self.contract.interface().name,
                contract_address,
                self.method
            ))
        })?;
        let data = encode_call(function, &self.args)?;

        let record = TransactionRecord::new(TransactionRequest {
            contract: contract_address.clone(),
            method: self.method.clone(),
            args: self.args.iter().map(ToString::to_string).collect(),
            sender: sender.clone(),
        });
        let id = record.id;

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        tx.try_send(LifecycleEvent::snapshot(&record))
            .map_err(|e| AppError::Internal(format!("could not emit pending event: {e}")))?;
        metrics::counter!("transactions_submitted_total").increment(1);
        info!(transaction_id = %id, sender = %sender, "Transaction pending");

        let tracker = Tracker {
            ctx: self.ctx.clone(),
            contract: self.contract,
            classifier: self.classifier,
            probe: self.probe,
            request: CallRequest {
                from: Some(sender),
                to: contract_address,
                data,
            },
            record,
            events: tx,
        };
        tokio::spawn(tracker.run());

        Ok(TransactionStream { id, rx })
    }
}

/// Ordered lifecycle snapshots of one submitted transaction.
///
/// The stream ends after `confirmed` or `failed`, or when the context is
/// disposed.
pub struct TransactionStream {
    id: Uuid,
    rx: mpsc::Receiver<LifecycleEvent>,
}

impl TransactionStream {
    /// The locally generated correlation id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Drives the lifecycle to its end.
    ///
    /// Returns the `confirmed` snapshot, or the classified failure.
    pub async fn send(mut self) -> Result<LifecycleEvent, AppError> {
        while let Some(event) = self.next().await {
            match event.status {
                TransactionStatus::Confirmed => return Ok(event),
                TransactionStatus::Failed => {
                    return Err(event.record.error.map(AppError::Submission).unwrap_or_else(|| {
                        AppError::Internal(format!("transaction {} failed without an error", self.id))
                    }));
                }
                _ => {}
            }
        }
        Err(AppError::NotConnected)
    }
}

impl Stream for TransactionStream {
    type Item = LifecycleEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

struct Tracker {
    ctx: Context,
    contract: Arc<ContractHandle>,
    classifier: Arc<dyn ErrorClassifier>,
    probe: Option<Box<dyn ConfirmationProbe>>,
    request: CallRequest,
    record: TransactionRecord,
    events: mpsc::Sender<LifecycleEvent>,
}

/// A confirmation probe running beside the submission.
///
/// Arming starts before the call is sent but never holds it back. The
/// receipt is handed over once the transaction is mined. Dropping the
/// watch stops the probe.
struct ProbeWatch {
    receipt: Option<oneshot::Sender<Receipt>>,
    task: JoinHandle<Result<(), AppError>>,
}

impl ProbeWatch {
    fn start(mut probe: Box<dyn ConfirmationProbe>) -> Self {
        let (receipt_tx, receipt_rx) = oneshot::channel::<Receipt>();
        let task = tokio::spawn(async move {
            probe.arm().await?;
            let receipt = receipt_rx
                .await
                .map_err(|_| AppError::Internal("transaction tracking stopped".to_string()))?;
            probe.settled(&receipt).await
        });
        Self {
            receipt: Some(receipt_tx),
            task,
        }
    }

    /// Hands over the receipt and waits for the probe to settle.
    async fn settle(&mut self, receipt: Receipt) -> Result<(), AppError> {
        if let Some(tx) = self.receipt.take() {
            // A probe that already ended reports through the task result.
            let _ = tx.send(receipt);
        }
        match (&mut self.task).await {
            Ok(result) => result,
            Err(e) => Err(AppError::Internal(format!("confirmation probe stopped: {e}"))),
        }
    }
}

impl Drop for ProbeWatch {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl Tracker {
    async fn run(mut self) {
        let mut shutdown = self.ctx.subscribe_shutdown();
        let id = self.record.id;
        tokio::select! {
            _ = self.lifecycle() => {}
            _ = shutdown.wait_for(|disposed| *disposed) => {
                info!(transaction_id = %id, "Context disposed, tracking stopped");
            }
        }
    }

    async fn lifecycle(&mut self) {
        let mut watch = self.probe.take().map(ProbeWatch::start);

        let hash = match self.ctx.chain().send_transaction(&self.request).await {
            Ok(hash) => hash,
            Err(e) => {
                let error = self.raw_error(&e);
                return self.fail(error).await;
            }
        };
        debug!(transaction_id = %self.record.id, hash = %hash, "Transaction accepted");
        self.record.hash = Some(hash.clone());

        let raw = match self.wait_for_receipt(&hash).await {
            Ok(raw) => raw,
            Err(error) => return self.fail(error).await,
        };
        if !raw.success {
            let error = SubmissionError::Reverted {
                contract: self.request.to.to_string(),
                method: self.record.request.method.clone(),
                tx_hash: hash,
            };
            return self.fail(error).await;
        }

        let receipt = decode_receipt(&self.contract, raw);
        self.record.receipt = Some(receipt.clone());
        if !self.emit(TransactionStatus::Mined).await {
            return;
        }
        info!(transaction_id = %self.record.id, block = receipt.block_number, "Transaction mined");
        self.ctx.invalidate();

        let confirmation = match watch.as_mut() {
            Some(watch) => self.await_read_model(watch, &receipt).await,
            None => Confirmation::ReceiptOnly,
        };
        self.record.confirmation = Some(confirmation);
        self.emit(TransactionStatus::Confirmed).await;
    }

    /// The read-after-write join, bounded by the confirmation timeout.
    async fn await_read_model(&self, watch: &mut ProbeWatch, receipt: &Receipt) -> Confirmation {
        let waited = self.ctx.config().confirmation_timeout;
        match tokio::time::timeout(waited, watch.settle(receipt.clone())).await {
            Ok(Ok(())) => Confirmation::ReadModel,
            Ok(Err(e)) => {
                warn!(transaction_id = %self.record.id, error = %e, "Confirmation probe failed, confirming on receipt");
                self.ctx.report(Diagnostic::ProbeFailed {
                    transaction_id: self.record.id,
                    tx_hash: receipt.transaction_hash.clone(),
                    reason: e.to_string(),
                });
                Confirmation::ReceiptOnly
            }
            Err(_) => {
                metrics::counter!("consistency_timeouts_total").increment(1);
                warn!(
                    transaction_id = %self.record.id,
                    tx_hash = %receipt.transaction_hash,
                    waited_ms = duration_ms(waited),
                    "Read model did not reflect transaction in time, confirming on receipt"
                );
                self.ctx.report(Diagnostic::ConsistencyTimeout {
                    transaction_id: self.record.id,
                    tx_hash: receipt.transaction_hash.clone(),
                    contract: self.request.to.clone(),
                    method: self.record.request.method.clone(),
                    waited,
                });
                Confirmation::ReceiptOnly
            }
        }
    }

    async fn wait_for_receipt(&self, hash: &str) -> Result<RawReceipt, SubmissionError> {
        let config = self.ctx.config();
        let start = Instant::now();

        while start.elapsed() < config.receipt_timeout {
            match self.ctx.chain().get_receipt(hash).await {
                Ok(Some(receipt)) => return Ok(receipt),
                Ok(None) => debug!(hash = %hash, "Transaction not yet mined"),
                Err(e) => warn!(hash = %hash, error = ?e, "Error fetching receipt"),
            }
            tokio::time::sleep(config.receipt_poll_interval).await;
        }

        Err(SubmissionError::ReceiptTimeout {
            contract: self.request.to.to_string(),
            method: self.record.request.method.clone(),
            tx_hash: hash.to_string(),
            timeout_ms: duration_ms(config.receipt_timeout),
        })
    }

    fn raw_error(&self, error: &AppError) -> SubmissionError {
        let contract = self.request.to.as_str();
        let method = self.record.request.method.as_str();
        let sender = self.record.request.sender.as_str();
        match error {
            AppError::Chain(chain) => SubmissionError::from_chain(contract, method, sender, chain),
            AppError::Submission(submission) => submission.clone(),
            other => SubmissionError::Rejected {
                contract: contract.to_string(),
                method: method.to_string(),
                reason: other.to_string(),
            },
        }
    }

    async fn fail(&mut self, error: SubmissionError) {
        let error = self
            .classifier
            .classify(
                error,
                FailedCall {
                    contract: &self.contract,
                    method: &self.record.request.method,
                    sender: &self.record.request.sender,
                },
            )
            .await;
        metrics::counter!("transactions_failed_total").increment(1);
        warn!(transaction_id = %self.record.id, error = %error, "Transaction failed");
        self.record.error = Some(error);
        self.emit(TransactionStatus::Failed).await;
    }

    /// Advances the record and emits its snapshot. Returns `false` once the
    /// caller has dropped the stream.
    async fn emit(&mut self, status: TransactionStatus) -> bool {
        if let Err(e) = self.record.advance(status) {
            warn!(error = %e, "Refusing lifecycle transition");
            return false;
        }
        self.events.send(LifecycleEvent::snapshot(&self.record)).await.is_ok()
    }
}

/// Decodes the logs `contract` emitted; logs of other contracts touched by
/// the same transaction are skipped.
fn decode_receipt(contract: &ContractHandle, raw: RawReceipt) -> Receipt {
    let address = contract.address().as_str();
    let events = raw
        .logs
        .iter()
        .filter(|log| log.address.eq_ignore_ascii_case(address))
        .filter_map(|log| decode_log(contract.interface(), log))
        .collect();
    Receipt {
        transaction_hash: raw.transaction_hash,
        block_number: raw.block_number,
        gas_used: raw.gas_used,
        events,
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl Context {
    /// Prepares a call of `method` on `contract`; see [`TransactionBuilder`].
    pub fn transaction(
        &self,
        contract: &Arc<ContractHandle>,
        method: impl Into<String>,
        args: Vec<AbiValue>,
    ) -> TransactionBuilder {
        TransactionBuilder {
            ctx: self.clone(),
            contract: Arc::clone(contract),
            method: method.into(),
            args,
            sender: None,
            classifier: Arc::new(PassThrough),
            probe: None,
        }
    }

    /// Submits `method(args)` signed by `sender` or the default account,
    /// confirming on receipt alone.
    pub fn submit(
        &self,
        contract: &Arc<ContractHandle>,
        method: &str,
        args: Vec<AbiValue>,
        sender: Option<Address>,
    ) -> Result<TransactionStream, AppError> {
        let builder = self.transaction(contract, method, args);
        match sender {
            Some(sender) => builder.sender(sender),
            None => builder,
        }
        .submit()
    }
}
