//! reqwest-backed transport agent.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use async_trait::async_trait;
use courier_types::{AgentKind, RequestPayload, TransportResponse};
use courier_util::{
    EngineSettings,
    http::{body_preview, status_reason},
    redact_sensitive,
};
use indexmap::IndexMap;
use reqwest::{Client, Method, RequestBuilder, header};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{DispatchError, Dispatcher};

/// Sends requests directly over HTTP. Calls in flight are tracked by request
/// id so [`Dispatcher::cancel`] can abort them.
#[derive(Debug)]
pub struct HttpDispatcher {
    client: Client,
    user_agent: String,
    in_flight: Mutex<HashMap<String, InFlightCall>>,
    next_ticket: AtomicU64,
}

/// Registration of one call. The ticket tells overlapping calls that share a
/// request id apart.
#[derive(Debug)]
struct InFlightCall {
    ticket: u64,
    cancellation: CancellationToken,
}

/// Removes its own registration when the call ends or its future is dropped.
struct Tracked<'a> {
    dispatcher: &'a HttpDispatcher,
    request_id: String,
    ticket: u64,
}

impl Drop for Tracked<'_> {
    fn drop(&mut self) {
        let mut in_flight = self.dispatcher.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if in_flight.get(&self.request_id).is_some_and(|call| call.ticket == self.ticket) {
            in_flight.remove(&self.request_id);
        }
    }
}

impl HttpDispatcher {
    /// Build a dispatcher with the timeout and user agent from `settings`.
    pub fn new(settings: &EngineSettings) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(settings.request_timeout()).build()?;
        Ok(Self::with_client(client, settings.user_agent.clone()))
    }

    pub fn with_client(client: Client, user_agent: impl Into<String>) -> Self {
        Self {
            client,
            user_agent: user_agent.into(),
            in_flight: Mutex::new(HashMap::new()),
            next_ticket: AtomicU64::new(0),
        }
    }

    fn build_request(&self, payload: RequestPayload) -> Result<RequestBuilder, DispatchError> {
        let method = Method::from_bytes(payload.method.as_str().as_bytes())
            .map_err(|error| DispatchError::message(format!("invalid method: {error}")))?;
        let mut builder = self.client.request(method, &payload.url);

        if !payload.headers.keys().any(|name| name.eq_ignore_ascii_case(header::USER_AGENT.as_str())) {
            builder = builder.header(header::USER_AGENT, &self.user_agent);
        }
        for (name, value) in &payload.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = payload.body {
            builder = builder.body(body.content);
        }
        Ok(builder)
    }

    /// Register a call under `request_id`, replacing any older registration.
    fn track(&self, request_id: &str, cancellation: &CancellationToken) -> Tracked<'_> {
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        in_flight.insert(request_id.to_string(), InFlightCall {
            ticket,
            cancellation: cancellation.clone(),
        });
        Tracked {
            dispatcher: self,
            request_id: request_id.to_string(),
            ticket,
        }
    }
}

#[async_trait]
impl Dispatcher for HttpDispatcher {
    async fn execute(&self, payload: RequestPayload, cancellation: CancellationToken) -> Result<TransportResponse, DispatchError> {
        let request_id = payload.request_id.clone();
        debug!(
            request_id = %request_id,
            method = %payload.method,
            url = %redact_sensitive(&payload.url),
            "dispatching request"
        );
        let builder = self.build_request(payload)?;

        let tracked = self.track(&request_id, &cancellation);
        let result = tokio::select! {
            _ = cancellation.cancelled() => Err(DispatchError::Cancelled),
            result = send(builder) => result,
        };
        drop(tracked);

        match &result {
            Ok(response) => debug!(
                request_id = %request_id,
                status = response.status_code,
                duration_ms = ?response.duration_ms,
                body = %body_preview(&response.body, 120),
                "request finished"
            ),
            Err(error) => debug!(request_id = %request_id, error = %error, "request failed"),
        }
        result
    }

    async fn cancel(&self, request_id: &str, agent: AgentKind) -> Result<(), DispatchError> {
        let call = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            in_flight.remove(request_id)
        };
        match call {
            Some(call) => {
                debug!(request_id, %agent, "aborting in-flight request");
                call.cancellation.cancel();
            }
            None => debug!(request_id, %agent, "no in-flight request to abort"),
        }
        Ok(())
    }
}

async fn send(builder: RequestBuilder) -> Result<TransportResponse, DispatchError> {
    let started = Instant::now();
    let response = builder.send().await.map_err(map_reqwest_error)?;

    let status = response.status();
    let mut headers = IndexMap::new();
    for (name, value) in response.headers() {
        headers.insert(name.as_str().to_string(), String::from_utf8_lossy(value.as_bytes()).into_owned());
    }
    let bytes = response.bytes().await.map_err(map_reqwest_error)?;

    Ok(TransportResponse {
        status_code: status.as_u16(),
        status_text: status_reason(status.as_u16()).map(str::to_string),
        headers,
        size: Some(bytes.len() as u64),
        body: String::from_utf8_lossy(&bytes).into_owned(),
        duration_ms: Some(started.elapsed().as_millis() as u64),
        test_script_result: None,
    })
}

fn map_reqwest_error(error: reqwest::Error) -> DispatchError {
    if error.is_timeout() {
        DispatchError::message("timeout")
    } else if error.is_connect() {
        DispatchError::message(format!("connection failed: {error}"))
    } else {
        DispatchError::message(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_types::{HttpMethod, PayloadBody};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn payload(url: String) -> RequestPayload {
        RequestPayload {
            request_id: "r1".into(),
            method: HttpMethod::Post,
            url,
            headers: IndexMap::new(),
            body: Some(PayloadBody {
                content_type: Some("text/plain".into()),
                content: "ping".into(),
            }),
        }
    }

    /// Serves one canned HTTP response and returns the raw request it read.
    async fn serve_once(response: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let read = socket.read(&mut buf).await.unwrap();
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            String::from_utf8_lossy(&buf[..read]).into_owned()
        });
        (format!("http://{address}/ping"), handle)
    }

    #[tokio::test]
    async fn non_success_status_is_still_a_response() {
        let (url, server) =
            serve_once("HTTP/1.1 404 Not Found\r\ncontent-length: 9\r\nconnection: close\r\n\r\nnot found").await;
        let dispatcher = HttpDispatcher::new(&EngineSettings::default()).unwrap();

        let response = dispatcher.execute(payload(url), CancellationToken::new()).await.unwrap();

        assert_eq!(response.status_code, 404);
        assert_eq!(response.status_text.as_deref(), Some("Not Found"));
        assert_eq!(response.body, "not found");
        assert_eq!(response.size, Some(9));
        assert!(response.duration_ms.is_some());

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /ping"));
        assert!(request.to_ascii_lowercase().contains("user-agent: courier/"));
    }

    #[tokio::test]
    async fn cancel_aborts_in_flight_request() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/slow", listener.local_addr().unwrap());
        // Accept and never answer.
        let _server = tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let dispatcher = std::sync::Arc::new(HttpDispatcher::new(&EngineSettings::default()).unwrap());
        let task = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move { dispatcher.execute(payload(url), CancellationToken::new()).await })
        };

        // Wait until the call is registered before cancelling it.
        while dispatcher.in_flight.lock().unwrap().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        dispatcher.cancel("r1", AgentKind::Desktop).await.unwrap();

        assert_eq!(task.await.unwrap(), Err(DispatchError::Cancelled));
        assert!(dispatcher.in_flight.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn finished_call_does_not_unregister_a_newer_call_with_the_same_id() {
        let dispatcher = HttpDispatcher::new(&EngineSettings::default()).unwrap();
        let older = CancellationToken::new();
        let newer = CancellationToken::new();

        let older_call = dispatcher.track("r1", &older);
        let _newer_call = dispatcher.track("r1", &newer);
        drop(older_call);

        dispatcher.cancel("r1", AgentKind::Desktop).await.unwrap();
        assert!(newer.is_cancelled());
        assert!(!older.is_cancelled());
        assert!(dispatcher.in_flight.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn dropped_dispatch_unregisters_itself() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/slow", listener.local_addr().unwrap());
        let _server = tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });
        let dispatcher = HttpDispatcher::new(&EngineSettings::default()).unwrap();

        let abandoned = tokio::time::timeout(
            Duration::from_millis(100),
            dispatcher.execute(payload(url), CancellationToken::new()),
        )
        .await;

        assert!(abandoned.is_err());
        assert!(dispatcher.in_flight.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_request_cancel_is_ok() {
        let dispatcher = HttpDispatcher::new(&EngineSettings::default()).unwrap();
        assert!(dispatcher.cancel("missing", AgentKind::Web).await.is_ok());
    }

    #[tokio::test]
    async fn connection_failure_is_a_message() {
        // Bind then drop to obtain a port with no listener.
        let address = TcpListener::bind("127.0.0.1:0").await.unwrap().local_addr().unwrap();
        let dispatcher = HttpDispatcher::new(&EngineSettings::default()).unwrap();

        let error = dispatcher
            .execute(payload(format!("http://{address}/")), CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(error, DispatchError::Message(message) if message.starts_with("connection failed")));
    }
}
