//! Retrying request execution under admission control.
//!
//! [`RequestExecutor`] runs each attempt of a request inside its own
//! [`AdmissionPermit`](crate::admission::AdmissionPermit), retries gateway failures and
//! disconnects according to a [`RetryPolicy`], and feeds the provider's error-budget
//! announcements back into the [`AdmissionController`].

pub mod endpoint;
pub mod retry;

pub use endpoint::{Endpoint, EndpointAuth};
pub use retry::{BudgetFeedback, RetryPolicy};

// crates.io
use oauth2::http::{HeaderMap, HeaderName, HeaderValue, Method, Request};
use serde::de::DeserializeOwned;
// self
use crate::{
	_prelude::*,
	admission::AdmissionController,
	error::{ConfigError, PermanentError, TransientError},
	http::{ApiHttpClient, HttpRequest, HttpResponse, ResponseMetadata, TransportErrorMapper},
	obs::{self, OperationKind, OperationOutcome, OperationSpan},
};

/// Statuses treated as transient upstream failures.
pub const RETRYABLE_STATUSES: [u16; 3] = [502, 503, 504];

/// Fully resolved GET request.
#[derive(Clone)]
pub struct ApiRequest {
	/// Target URL, query parameters included.
	pub url: Url,
	/// Headers sent with every attempt.
	pub headers: HeaderMap,
}
impl ApiRequest {
	/// Creates a request without headers.
	pub fn get(url: Url) -> Self {
		Self { url, headers: HeaderMap::new() }
	}

	/// Adds or replaces a header.
	pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
		self.headers.insert(name, value);

		self
	}

	fn to_http(&self) -> Result<HttpRequest> {
		let mut request = Request::builder()
			.method(Method::GET)
			.uri(self.url.as_str())
			.body(Vec::new())
			.map_err(ConfigError::from)?;

		*request.headers_mut() = self.headers.clone();

		Ok(request)
	}
}
impl Debug for ApiRequest {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ApiRequest")
			.field("url", &self.url.as_str())
			.field("headers", &self.headers.keys().collect::<Vec<_>>())
			.finish()
	}
}

/// Successful response with its body parsed as JSON.
#[derive(Clone, Debug, PartialEq)]
pub struct ApiResponse {
	/// URL that produced the response.
	pub url: Url,
	/// Status and budget facts parsed when the response arrived.
	pub metadata: ResponseMetadata,
	/// JSON body; `null` when the response had no body.
	pub body: serde_json::Value,
}
impl ApiResponse {
	/// HTTP status code.
	pub fn status(&self) -> u16 {
		self.metadata.status
	}

	/// Decodes the body into a typed value, reporting the failing path on mismatch.
	pub fn decode<T>(&self) -> Result<T>
	where
		T: DeserializeOwned,
	{
		serde_path_to_error::deserialize(&self.body).map_err(|source| {
			PermanentError::Decode { url: self.url.to_string(), status: self.status(), source }
				.into()
		})
	}

	/// Consumes the response and returns the raw JSON body.
	pub fn into_body(self) -> serde_json::Value {
		self.body
	}

	fn classify(url: &Url, response: HttpResponse) -> Result<Self> {
		let metadata = ResponseMetadata::from_response(&response);
		let status = metadata.status;
		let raw = response.body();
		let parsed = if raw.iter().all(u8::is_ascii_whitespace) {
			Ok(serde_json::Value::Null)
		} else {
			serde_path_to_error::deserialize(&mut serde_json::Deserializer::from_slice(raw))
		};

		match parsed {
			Ok(body) if metadata.is_success() => Ok(Self { url: url.clone(), metadata, body }),
			Ok(body) => {
				if !body.is_null() {
					tracing::warn!(url = %url, status, %body, "upstream returned an error body");
				}

				Err(status_error(url, status, (!body.is_null()).then_some(body)))
			},
			Err(_) if !metadata.is_success() => Err(status_error(url, status, None)),
			Err(source) => Err(PermanentError::Decode { url: url.to_string(), status, source }.into()),
		}
	}
}

fn status_error(url: &Url, status: u16, body: Option<serde_json::Value>) -> Error {
	if RETRYABLE_STATUSES.contains(&status) {
		TransientError::Status { url: url.to_string(), status }.into()
	} else {
		PermanentError::Status { url: url.to_string(), status, body }.into()
	}
}

/// Executes requests with per-attempt admission, retry, and capacity feedback.
pub struct RequestExecutor<C, M>
where
	C: ApiHttpClient,
	M: TransportErrorMapper<C::TransportError>,
{
	http_client: Arc<C>,
	transport_mapper: Arc<M>,
	admission: AdmissionController,
	retry: RetryPolicy,
	feedback: BudgetFeedback,
}
impl<C, M> RequestExecutor<C, M>
where
	C: ApiHttpClient,
	M: TransportErrorMapper<C::TransportError>,
{
	/// Creates an executor over a shared transport and admission controller.
	pub fn new(
		http_client: impl Into<Arc<C>>,
		transport_mapper: impl Into<Arc<M>>,
		admission: AdmissionController,
		retry: RetryPolicy,
		feedback: BudgetFeedback,
	) -> Self {
		Self {
			http_client: http_client.into(),
			transport_mapper: transport_mapper.into(),
			admission,
			retry,
			feedback,
		}
	}

	/// Admission controller shared by every attempt.
	pub fn admission(&self) -> &AdmissionController {
		&self.admission
	}

	/// Retry policy applied to transient failures.
	pub fn retry_policy(&self) -> &RetryPolicy {
		&self.retry
	}

	/// Underlying transport.
	pub fn http_client(&self) -> &Arc<C> {
		&self.http_client
	}

	/// Transport error mapper.
	pub fn transport_mapper(&self) -> &Arc<M> {
		&self.transport_mapper
	}

	/// Executes `request`, retrying transient failures.
	///
	/// Every attempt holds an admission permit only while the request is in flight, so
	/// backoff sleeps never occupy capacity. Dropping the returned future at any point
	/// releases the permit of the attempt in progress.
	pub async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse> {
		let span = OperationSpan::new(OperationKind::Request, "execute");

		obs::record_outcome(OperationKind::Request, OperationOutcome::Attempt);

		let result = span
			.instrument(self.retry.run(request.url.as_str(), |_| self.attempt(request)))
			.await;

		obs::record_outcome(OperationKind::Request, OperationOutcome::of(&result));

		result
	}

	async fn attempt(&self, request: &ApiRequest) -> Result<ApiResponse> {
		let http_request = request.to_http()?;
		let permit = self.admission.acquire().await;
		let response = self.http_client.send(http_request).await;

		permit.release();

		let response = response.map_err(|e| {
			self.transport_mapper.map_transport_error(request.url.as_str(), e)
		})?;
		let response = ApiResponse::classify(&request.url, response)?;

		self.apply_feedback(&response.metadata);

		Ok(response)
	}

	fn apply_feedback(&self, metadata: &ResponseMetadata) {
		match metadata.budget_update() {
			Ok(Some((response_at, budget))) => {
				let (remaining, reset_after) =
					self.feedback.adjust(budget.remaining, budget.reset_after);

				self.admission.set_remaining(response_at, remaining, Some(reset_after));
			},
			Ok(None) => {},
			Err(e) => tracing::warn!(error = %e, "ignoring unusable error budget headers"),
		}
	}
}
impl<C, M> Clone for RequestExecutor<C, M>
where
	C: ApiHttpClient,
	M: TransportErrorMapper<C::TransportError>,
{
	fn clone(&self) -> Self {
		Self {
			http_client: self.http_client.clone(),
			transport_mapper: self.transport_mapper.clone(),
			admission: self.admission.clone(),
			retry: self.retry,
			feedback: self.feedback,
		}
	}
}
impl<C, M> Debug for RequestExecutor<C, M>
where
	C: ApiHttpClient,
	M: TransportErrorMapper<C::TransportError>,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RequestExecutor")
			.field("admission", &self.admission)
			.field("retry", &self.retry)
			.field("feedback", &self.feedback)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::{
		sync::atomic::{AtomicUsize, Ordering},
		time::Duration as StdDuration,
	};
	// crates.io
	use oauth2::http::Response;
	use serde_json::json;
	// self
	use super::*;
	use crate::http::{ERROR_LIMIT_REMAIN, ERROR_LIMIT_RESET, HttpFuture};

	#[derive(Debug, ThisError)]
	#[error("scripted connection drop")]
	struct ScriptedDrop;

	enum Step {
		Respond(HttpResponse),
		Drop,
		Hang,
	}

	#[derive(Default)]
	struct ScriptedTransport {
		steps: Mutex<VecDeque<Step>>,
		calls: AtomicUsize,
	}
	impl ScriptedTransport {
		fn new(steps: impl IntoIterator<Item = Step>) -> Self {
			Self { steps: Mutex::new(steps.into_iter().collect()), calls: AtomicUsize::new(0) }
		}

		fn calls(&self) -> usize {
			self.calls.load(Ordering::SeqCst)
		}
	}
	impl ApiHttpClient for ScriptedTransport {
		type TransportError = ScriptedDrop;

		fn send(&self, _: HttpRequest) -> HttpFuture<'_, Self::TransportError> {
			self.calls.fetch_add(1, Ordering::SeqCst);

			let step = self.steps.lock().pop_front();

			Box::pin(async move {
				match step {
					Some(Step::Respond(response)) => Ok(response),
					Some(Step::Hang) => std::future::pending().await,
					Some(Step::Drop) | None => Err(ScriptedDrop),
				}
			})
		}
	}

	struct DropMapper;
	impl TransportErrorMapper<ScriptedDrop> for DropMapper {
		fn map_transport_error(&self, url: &str, error: ScriptedDrop) -> Error {
			TransientError::disconnected(url, error).into()
		}
	}

	fn respond(status: u16, headers: &[(&str, &str)], body: &str) -> Step {
		let mut builder = Response::builder().status(status);

		for (name, value) in headers {
			builder = builder.header(*name, *value);
		}

		Step::Respond(
			builder.body(body.as_bytes().to_vec()).expect("Scripted response should build."),
		)
	}

	fn executor(
		transport: Arc<ScriptedTransport>,
		admission: AdmissionController,
	) -> RequestExecutor<ScriptedTransport, DropMapper> {
		RequestExecutor::new(
			transport,
			DropMapper,
			admission,
			RetryPolicy::default(),
			BudgetFeedback::default(),
		)
	}

	fn request() -> ApiRequest {
		ApiRequest::get(
			Url::parse("https://esi.test/latest/universe/types/34")
				.expect("Request URL fixture should parse."),
		)
	}

	#[tokio::test(start_paused = true)]
	async fn always_transient_endpoint_is_attempted_exactly_three_times() {
		let transport = Arc::new(ScriptedTransport::new([
			respond(502, &[], ""),
			respond(503, &[], "{\"error\":\"busy\"}"),
			respond(504, &[], ""),
		]));
		let admission = AdmissionController::new();
		let err = executor(transport.clone(), admission.clone())
			.execute(&request())
			.await
			.expect_err("Exhausted retries should surface the last failure.");

		assert_eq!(transport.calls(), 3);
		assert!(matches!(err, Error::Transient(TransientError::Status { status: 504, .. })));
		assert_eq!(admission.snapshot().occupancy, 0);
	}

	#[tokio::test(start_paused = true)]
	async fn disconnect_is_retried_and_budget_feedback_is_applied() {
		let transport = Arc::new(ScriptedTransport::new([
			Step::Drop,
			respond(
				200,
				&[
					("date", "Wed, 01 Jan 2025 00:00:05 GMT"),
					(ERROR_LIMIT_REMAIN, "20"),
					(ERROR_LIMIT_RESET, "60"),
				],
				"{\"name\":\"Tritanium\"}",
			),
		]));
		let admission = AdmissionController::new();
		let response = executor(transport.clone(), admission.clone())
			.execute(&request())
			.await
			.expect("Second attempt should succeed.");

		assert_eq!(transport.calls(), 2);
		assert_eq!(response.body, json!({ "name": "Tritanium" }));

		let snapshot = admission.snapshot();

		assert_eq!(snapshot.capacity, 19);
		assert_eq!(snapshot.occupancy, 0);
		assert!(snapshot.reset_pending);
	}

	#[tokio::test(start_paused = true)]
	async fn permanent_status_is_not_retried_and_keeps_the_body() {
		let transport =
			Arc::new(ScriptedTransport::new([respond(404, &[], "{\"error\":\"Type not found!\"}")]));
		let err = executor(transport.clone(), AdmissionController::new())
			.execute(&request())
			.await
			.expect_err("404 should surface immediately.");

		assert_eq!(transport.calls(), 1);
		assert!(matches!(
			err,
			Error::Permanent(PermanentError::Status { status: 404, body: Some(ref body), .. })
				if body["error"] == "Type not found!"
		));
	}

	#[tokio::test(start_paused = true)]
	async fn undecodable_success_body_is_permanent() {
		let transport = Arc::new(ScriptedTransport::new([respond(200, &[], "<html>")]));
		let err = executor(transport.clone(), AdmissionController::new())
			.execute(&request())
			.await
			.expect_err("Non-JSON success body should fail.");

		assert_eq!(transport.calls(), 1);
		assert!(matches!(err, Error::Permanent(PermanentError::Decode { status: 200, .. })));
	}

	#[tokio::test(start_paused = true)]
	async fn garbled_budget_headers_do_not_fail_the_request() {
		let transport = Arc::new(ScriptedTransport::new([respond(
			200,
			&[
				("date", "Wed, 01 Jan 2025 00:00:05 GMT"),
				(ERROR_LIMIT_REMAIN, "plenty"),
				(ERROR_LIMIT_RESET, "60"),
			],
			"[]",
		)]));
		let admission = AdmissionController::new();

		executor(transport, admission.clone())
			.execute(&request())
			.await
			.expect("Header parse failures should be non-fatal.");

		assert_eq!(admission.snapshot().capacity, 1);
		assert_eq!(admission.snapshot().last_applied, None);
	}

	#[tokio::test(start_paused = true)]
	async fn cancelled_attempt_releases_its_permit() {
		let transport = Arc::new(ScriptedTransport::new([
			Step::Hang,
			respond(200, &[], "{\"ok\":true}"),
		]));
		let admission = AdmissionController::new();
		let executor = executor(transport.clone(), admission.clone());
		let timed_out =
			tokio::time::timeout(StdDuration::from_secs(5), executor.execute(&request())).await;

		assert!(timed_out.is_err());
		assert_eq!(admission.snapshot().occupancy, 0);

		let response = executor
			.execute(&request())
			.await
			.expect("Released slot should admit the next request.");

		assert_eq!(response.decode::<serde_json::Value>().ok(), Some(json!({ "ok": true })));
		assert_eq!(transport.calls(), 2);
	}

	#[test]
	fn typed_decode_reports_the_failing_path() {
		let response = ApiResponse {
			url: Url::parse("https://esi.test/x").expect("URL fixture should parse."),
			metadata: ResponseMetadata::from_parts(200, &HeaderMap::new()),
			body: json!({ "balance": "lots" }),
		};

		#[derive(Debug, Deserialize)]
		struct Wallet {
			#[allow(dead_code)]
			balance: f64,
		}

		let err = response.decode::<Wallet>().expect_err("String balance should not decode.");

		assert!(matches!(
			err,
			Error::Permanent(PermanentError::Decode { ref source, .. }) if source.path().to_string() == "balance"
		));
	}
}
