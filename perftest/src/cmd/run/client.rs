use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use rama::{
    Layer as _, Service,
    error::{BoxError, ErrorContext as _},
    http::{Request, Response, client::EasyHttpWebClient},
    layer::{MapErrLayer, TimeoutLayer},
    rt::Executor,
};
use tokio::{sync::mpsc::UnboundedSender, time::Instant};

use super::reporter::{RequestOutcome, RequestResultEvent};

/// Upper bound for a single request, connect included.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Create a new web client that can be cloned and shared by all virtual users.
///
/// Requests taking longer than [`REQUEST_TIMEOUT`] fail with an error,
/// so a stalled target can not hold a burst back forever.
pub fn new_web_client(
    exec: Executor,
) -> Result<impl Service<Request, Output = Response, Error: Into<BoxError>> + Clone, BoxError> {
    let client = EasyHttpWebClient::connector_builder()
        .with_default_transport_connector()
        .without_tls_proxy_support()
        .without_proxy_support()
        .with_tls_support_using_boringssl(None)
        .with_default_http_connector(exec)
        .try_with_default_connection_pool()
        .context("create connection pool for load web client")?
        .build_client();

    Ok(with_request_timeout(client, REQUEST_TIMEOUT))
}

fn with_request_timeout<S>(
    client: S,
    timeout: Duration,
) -> impl Service<Request, Output = Response, Error: Into<BoxError>> + Clone
where
    S: Service<Request, Output = Response, Error: Into<BoxError>> + Clone,
{
    (MapErrLayer::into_opaque_error(), TimeoutLayer::new(timeout)).into_layer(client)
}

/// Client wrapper which records the outcome of every request
/// it forwards, without touching the request or its result.
///
/// One instance is created per virtual user iteration.
#[derive(Debug, Clone)]
pub struct MeteredClient<S> {
    inner: S,
    vu: usize,
    iteration: usize,
    index: Arc<AtomicUsize>,
    start: Instant,
    events: UnboundedSender<RequestResultEvent>,
}

impl<S> MeteredClient<S> {
    pub fn new(
        inner: S,
        vu: usize,
        iteration: usize,
        start: Instant,
        events: UnboundedSender<RequestResultEvent>,
    ) -> Self {
        Self {
            inner,
            vu,
            iteration,
            index: Arc::new(AtomicUsize::new(0)),
            start,
            events,
        }
    }
}

impl<S> Service<Request> for MeteredClient<S>
where
    S: Service<Request, Output = Response, Error: Into<BoxError>>,
{
    type Output = Response;
    type Error = BoxError;

    async fn serve(&self, req: Request) -> Result<Self::Output, Self::Error> {
        let index = self.index.fetch_add(1, Ordering::Relaxed);
        let req_start = Instant::now();

        let result = self.inner.serve(req).await.map_err(Into::into);

        let outcome = match &result {
            Ok(resp) => RequestOutcome::from_status(resp.status().as_u16()),
            Err(_) => RequestOutcome::transport_failure(),
        };

        // the channel is unbounded so that reporting never holds back a burst,
        // a closed receiver only means nobody is listening anymore
        let _ = self.events.send(RequestResultEvent {
            ts: std::time::SystemTime::now(),
            elapsed: self.start.elapsed(),
            vu: self.vu,
            iteration: self.iteration,
            index,
            latency: req_start.elapsed(),
            outcome,
        });

        result
    }
}

#[cfg(test)]
mod tests {
    use std::{convert::Infallible, sync::Mutex};

    use rama::{
        http::{
            BodyExtractExt as _, Method, StatusCode, server::HttpServer,
            service::client::HttpClientExt as _, service::web::response::IntoResponse as _,
        },
        net::socket::Interface,
        tcp::server::TcpListener,
    };
    use tokio::sync::mpsc;

    use super::*;
    use crate::{cmd::run::reporter::FailureKind, scenario::BurstSleep};

    #[derive(Debug, Clone)]
    struct StaticClient {
        status: Option<StatusCode>,
        delay: Duration,
    }

    impl Service<Request> for StaticClient {
        type Output = Response;
        type Error = BoxError;

        async fn serve(&self, _req: Request) -> Result<Self::Output, Self::Error> {
            tokio::time::sleep(self.delay).await;
            match self.status {
                Some(status) => Ok(status.into_response()),
                None => Err(BoxError::from("connection reset by peer")),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn records_outcomes_in_request_order() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let client = MeteredClient::new(
            StaticClient {
                status: Some(StatusCode::NOT_FOUND),
                delay: Duration::from_millis(250),
            },
            3,
            7,
            Instant::now(),
            tx,
        );

        for _ in 0..2 {
            let resp = client.get("http://example.com").send().await.unwrap();
            assert_eq!(StatusCode::NOT_FOUND, resp.status());
        }
        drop(client);

        let first = rx.recv().await.unwrap();
        assert_eq!((3, 7, 0), (first.vu, first.iteration, first.index));
        assert_eq!(Duration::from_millis(250), first.latency);
        assert_eq!(Some(FailureKind::HttpStatus), first.outcome.failure);

        let second = rx.recv().await.unwrap();
        assert_eq!(1, second.index);
        assert_eq!(Duration::from_millis(500), second.elapsed);

        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn passes_errors_through() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let client = MeteredClient::new(
            StaticClient {
                status: None,
                delay: Duration::ZERO,
            },
            0,
            0,
            Instant::now(),
            tx,
        );

        assert!(client.get("http://example.com").send().await.is_err());

        let ev = rx.recv().await.unwrap();
        assert_eq!(RequestOutcome::transport_failure(), ev.outcome);
    }

    #[tokio::test]
    async fn closed_receiver_does_not_fail_requests() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let client = MeteredClient::new(
            StaticClient {
                status: Some(StatusCode::OK),
                delay: Duration::ZERO,
            },
            0,
            0,
            Instant::now(),
            tx,
        );

        let resp = client.get("http://example.com").send().await.unwrap();
        assert_eq!(StatusCode::OK, resp.status());
    }

    #[derive(Debug, Clone)]
    struct StalledClient;

    impl Service<Request> for StalledClient {
        type Output = Response;
        type Error = BoxError;

        async fn serve(&self, _req: Request) -> Result<Self::Output, Self::Error> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_requests_time_out_and_the_burst_carries_on() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let client = MeteredClient::new(
            with_request_timeout(StalledClient, REQUEST_TIMEOUT),
            0,
            0,
            Instant::now(),
            tx,
        );
        let start = Instant::now();

        BurstSleep::SPICY_KEBAB.burst(&client).await;
        drop(client);

        assert_eq!(REQUEST_TIMEOUT * 10, start.elapsed());

        let mut timed_out = 0;
        while let Some(ev) = rx.recv().await {
            assert_eq!(timed_out, ev.index);
            assert_eq!(REQUEST_TIMEOUT, ev.latency);
            assert_eq!(Some(FailureKind::Other), ev.outcome.failure);
            timed_out += 1;
        }
        assert_eq!(10, timed_out);
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct SeenRequest {
        method: Method,
        path: String,
        query: Option<String>,
        body: String,
    }

    #[derive(Debug, Clone, Default)]
    struct RecordingServer {
        seen: Arc<Mutex<Vec<SeenRequest>>>,
    }

    impl Service<Request> for RecordingServer {
        type Output = Response;
        type Error = Infallible;

        async fn serve(&self, req: Request) -> Result<Self::Output, Self::Error> {
            let method = req.method().clone();
            let path = req.uri().path().to_owned();
            let query = req.uri().query().map(ToOwned::to_owned);
            let body = req.try_into_string().await.unwrap();

            self.seen.lock().unwrap().push(SeenRequest {
                method,
                path,
                query,
                body,
            });
            Ok(StatusCode::OK.into_response())
        }
    }

    #[tokio::test]
    async fn burst_reaches_a_local_server() {
        let exec = Executor::default();
        let recorder = RecordingServer::default();

        let bind: Interface = "127.0.0.1:0".parse().unwrap();
        let listener = TcpListener::bind(bind, exec.clone()).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = HttpServer::auto(exec.clone()).service(Arc::new(recorder.clone()));
        tokio::spawn(listener.serve(server));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let client = MeteredClient::new(new_web_client(exec).unwrap(), 0, 0, Instant::now(), tx);

        let schedule = BurstSleep {
            target: format!("http://{addr}").leak(),
            ..BurstSleep::SPICY_KEBAB
        };
        schedule.burst(&client).await;
        drop(client);

        let seen = recorder.seen.lock().unwrap().clone();
        assert_eq!(10, seen.len());
        for req in seen {
            assert_eq!(
                SeenRequest {
                    method: Method::GET,
                    path: "/".to_owned(),
                    query: None,
                    body: String::new(),
                },
                req,
            );
        }

        let mut ok = 0;
        while let Some(ev) = rx.recv().await {
            assert!(ev.outcome.ok);
            ok += 1;
        }
        assert_eq!(10, ok);
    }
}
