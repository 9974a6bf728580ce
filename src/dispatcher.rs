//! Bounded concurrent execution of asynchronous calls, with a per-host
//! cap enforced alongside the global cap.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use log::debug;
use tokio::sync::Mutex;

use crate::call::RealCall;
use crate::error::CallError;
use crate::response::Response;

const DEFAULT_MAX_REQUESTS: usize = 64;
const DEFAULT_MAX_REQUESTS_PER_HOST: usize = 5;

struct Queued {
    call: Arc<RealCall>,
    host: String,
    on_response: Box<dyn FnOnce(Response) + Send>,
    on_failure: Box<dyn FnOnce(CallError) + Send>,
}

struct State {
    ready: Vec<Queued>,
    running_async_hosts: HashMap<String, usize>,
    running_async_count: usize,
    shutting_down: bool,
}

/// A single lock guards the ready/running bookkeeping, with promotion
/// re-evaluated whenever a slot frees up.
pub struct Dispatcher {
    state: Mutex<State>,
    max_requests: usize,
    max_requests_per_host: usize,
}

impl Dispatcher {
    pub fn new() -> Arc<Self> {
        Self::with_limits(DEFAULT_MAX_REQUESTS, DEFAULT_MAX_REQUESTS_PER_HOST)
    }

    pub fn with_limits(max_requests: usize, max_requests_per_host: usize) -> Arc<Self> {
        Arc::new(Dispatcher {
            state: Mutex::new(State {
                ready: Vec::new(),
                running_async_hosts: HashMap::new(),
                running_async_count: 0,
                shutting_down: false,
            }),
            max_requests,
            max_requests_per_host,
        })
    }

    /// Queues `call` for asynchronous execution; `on_response` xor
    /// `on_failure` runs exactly once, once a slot is available and the
    /// call completes.
    pub async fn enqueue(
        self: &Arc<Self>,
        call: Arc<RealCall>,
        on_response: impl FnOnce(Response) + Send + 'static,
        on_failure: impl FnOnce(CallError) + Send + 'static,
    ) {
        let host = call.request().host().to_owned();
        let queued = Queued { call, host, on_response: Box::new(on_response), on_failure: Box::new(on_failure) };
        {
            let mut state = self.state.lock().await;
            if state.shutting_down {
                drop(state);
                (queued.on_failure)(CallError::ConnectionShutdown);
                return;
            }
            state.ready.push(queued);
        }
        self.promote().await;
    }

    /// Moves as many ready calls into flight as the global and per-host
    /// caps allow.
    ///
    /// Spelled as a boxed, explicitly `Send` future (rather than a plain
    /// `async fn`) because this function and `finish` call each other
    /// (`promote` spawns a task that calls `finish`, which calls back into
    /// `promote`); with two ordinary `async fn`s the compiler can't resolve
    /// the resulting `Send` cycle between their opaque return types.
    fn promote(self: &Arc<Self>) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            let mut to_run = Vec::new();
            {
                let mut state = self.state.lock().await;
                let mut i = 0;
                while i < state.ready.len() {
                    if state.running_async_count >= self.max_requests {
                        break;
                    }
                    let host = state.ready[i].host.clone();
                    let per_host = *state.running_async_hosts.get(&host).unwrap_or(&0);
                    if per_host >= self.max_requests_per_host {
                        i += 1;
                        continue;
                    }
                    let queued = state.ready.remove(i);
                    state.running_async_count += 1;
                    *state.running_async_hosts.entry(host).or_insert(0) += 1;
                    to_run.push(queued);
                }
            }

            for queued in to_run {
                let dispatcher = self.clone();
                let host = queued.host.clone();
                tokio::spawn(async move {
                    let result = queued.call.execute().await;
                    dispatcher.finish(&host).await;
                    match result {
                        Ok(response) => (queued.on_response)(response),
                        Err(err) => {
                            debug!("dispatched call failed: {err}");
                            (queued.on_failure)(err)
                        }
                    }
                });
            }
        })
    }

    fn finish<'a>(self: &'a Arc<Self>, host: &'a str) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            {
                let mut state = self.state.lock().await;
                state.running_async_count = state.running_async_count.saturating_sub(1);
                if let Some(count) = state.running_async_hosts.get_mut(host) {
                    *count = count.saturating_sub(1);
                    if *count == 0 {
                        state.running_async_hosts.remove(host);
                    }
                }
            }
            self.promote().await;
        })
    }

    /// Refuses new submissions, waits up to `timeout` for in-flight and
    /// queued calls to drain, then cancels anything left.
    pub async fn shutdown(self: &Arc<Self>, timeout: Duration) {
        let ready_calls: Vec<Arc<RealCall>> = {
            let mut state = self.state.lock().await;
            state.shutting_down = true;
            state.ready.drain(..).map(|q| q.call).collect()
        };
        for call in &ready_calls {
            call.cancel();
        }

        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if self.state.lock().await.running_async_count == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        self.cancel_all().await;
    }

    /// Cancels every running and queued call.
    pub async fn cancel_all(self: &Arc<Self>) {
        let mut state = self.state.lock().await;
        for queued in &state.ready {
            queued.call.cancel();
        }
        state.ready.clear();
    }

    pub async fn running_async_count(&self) -> usize {
        self.state.lock().await.running_async_count
    }

    pub async fn queued_count(&self) -> usize {
        self.state.lock().await.ready.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::CallConfig;
    use crate::interceptor::retry_followup::RetryFollowUpInterceptor;
    use crate::request::{Method, Request};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_config() -> Arc<CallConfig> {
        let connector = Arc::new(crate::transport::RustlsConnector::new());
        let pool = crate::pool::ConnectionPool::new(connector, 5, Duration::from_secs(300));
        Arc::new(CallConfig {
            pool,
            cache: None,
            application_interceptors: Vec::new(),
            network_interceptors: Vec::new(),
            retry_followup: Arc::new(RetryFollowUpInterceptor::default()),
        })
    }

    #[tokio::test]
    async fn per_host_cap_limits_concurrent_running_calls() {
        let dispatcher = Dispatcher::with_limits(64, 2);
        let config = test_config();
        let completed = Arc::new(AtomicUsize::new(0));

        for _ in 0..5 {
            let request = Request::new(Method::Get, url::Url::parse("https://example.invalid/").unwrap());
            let call = Arc::new(RealCall::new(config.clone(), request));
            let completed_ok = completed.clone();
            let completed_err = completed.clone();
            dispatcher
                .enqueue(
                    call,
                    move |_| {
                        completed_ok.fetch_add(1, Ordering::SeqCst);
                    },
                    move |_| {
                        completed_err.fetch_add(1, Ordering::SeqCst);
                    },
                )
                .await;
        }

        assert!(dispatcher.running_async_count().await <= 2);
        dispatcher.shutdown(Duration::from_millis(500)).await;
    }
}
