//! Read-model confirmation probes joining the write path to the read path.

use async_trait::async_trait;
use futures::StreamExt;

use crate::domain::{AppError, ConfirmationProbe, Receipt};

use super::live_query::{LiveQuery, LiveStream};

type Predicate<T> = Box<dyn Fn(&T, &Receipt) -> bool + Send + Sync>;

enum Expectation<T> {
    Matches(Predicate<T>),
    ChangedFrom(Option<T>),
}

/// Waits until a live query shows the effect of a mined transaction.
///
/// The subscription opened while arming is kept alive until the probe
/// settles, so refreshes keep running throughout the submission.
pub struct ObservedState<T> {
    query: LiveQuery<T>,
    expect: Expectation<T>,
    stream: Option<LiveStream<T>>,
}

impl<T> ObservedState<T>
where
    T: PartialEq + Clone + Send + Sync + 'static,
{
    /// Settles on the first value satisfying `predicate`.
    pub fn until<F>(query: LiveQuery<T>, predicate: F) -> Self
    where
        F: Fn(&T, &Receipt) -> bool + Send + Sync + 'static,
    {
        Self {
            query,
            expect: Expectation::Matches(Box::new(predicate)),
            stream: None,
        }
    }

    /// Settles on the first value that differs from the first one observed
    /// once the submission started.
    pub fn change(query: LiveQuery<T>) -> Self {
        Self {
            query,
            expect: Expectation::ChangedFrom(None),
            stream: None,
        }
    }

    fn satisfied(&self, value: &T, receipt: &Receipt) -> bool {
        match &self.expect {
            Expectation::Matches(predicate) => predicate(value, receipt),
            Expectation::ChangedFrom(Some(baseline)) => value != baseline,
            Expectation::ChangedFrom(None) => false,
        }
    }
}

#[async_trait]
impl<T> ConfirmationProbe for ObservedState<T>
where
    T: PartialEq + Clone + Send + Sync + 'static,
{
    async fn arm(&mut self) -> Result<(), AppError> {
        let mut stream = self.query.subscribe()?;
        if let Expectation::ChangedFrom(baseline) = &mut self.expect {
            match stream.next().await {
                Some(Ok(value)) => *baseline = Some(value),
                Some(Err(e)) => return Err(e),
                None => return Err(AppError::NotConnected),
            }
        }
        self.stream = Some(stream);
        Ok(())
    }

    async fn settled(&mut self, receipt: &Receipt) -> Result<(), AppError> {
        let mut stream = match self.stream.take() {
            Some(stream) => stream,
            None => self.query.subscribe()?,
        };
        while let Some(item) = stream.next().await {
            let value = item?;
            if self.satisfied(&value, receipt) {
                return Ok(());
            }
        }
        Err(AppError::NotConnected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;

    use crate::app::Context;
    use crate::domain::{QueryDescriptor, Trigger};
    use crate::test_utils::{MockChainClient, MockInterfaceLoader, MockReadModel, test_context};

    const QUERY: &str = "{ tokenHolders { balance } }";

    fn receipt() -> Receipt {
        Receipt {
            transaction_hash: "0x01".to_string(),
            block_number: 1,
            gas_used: 21_000,
            events: vec![],
        }
    }

    fn setup() -> (Arc<MockReadModel>, Context, LiveQuery<u64>) {
        let read_model = Arc::new(MockReadModel::new());
        read_model.respond(QUERY, json!({"tokenHolders": [{"balance": 10}]}));
        let ctx = test_context(
            Arc::clone(&read_model) as _,
            Arc::new(MockChainClient::new()),
            Arc::new(MockInterfaceLoader::new()),
            None,
        );
        let query = ctx
            .observe_object(
                QueryDescriptor::single(QUERY, |root| Ok(root[0]["balance"].as_u64().unwrap_or(0)))
                    .with_trigger(Trigger::Interval(Duration::from_millis(100))),
            )
            .unwrap();
        (read_model, ctx, query)
    }

    #[tokio::test(start_paused = true)]
    async fn test_change_probe_waits_for_new_value() {
        let (read_model, _ctx, query) = setup();
        let mut probe = ObservedState::change(query);
        probe.arm().await.unwrap();

        let settle = tokio::spawn(async move { probe.settled(&receipt()).await });
        tokio::time::sleep(Duration::from_millis(350)).await;
        assert!(!settle.is_finished());

        read_model.respond(QUERY, json!({"tokenHolders": [{"balance": 15}]}));
        assert!(settle.await.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_until_probe_without_arming() {
        let (_read_model, _ctx, query) = setup();
        let mut probe = ObservedState::until(query, |balance, _| *balance == 10);
        assert!(probe.settled(&receipt()).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_surfaces_terminal_stream_error() {
        let (_read_model, ctx, _) = setup();
        let failing = ctx
            .observe_object(QueryDescriptor::single(QUERY, |_| {
                Err::<u64, _>(AppError::NotFound("holder".to_string()))
            }))
            .unwrap();
        let mut probe = ObservedState::change(failing);
        assert!(matches!(probe.arm().await, Err(AppError::NotFound(_))));
    }
}
