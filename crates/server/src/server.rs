//! The covenant server: construction and procedure dispatch.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use covenant_contract::Covenant;
use covenant_sidekick_proto::{Sidekick, SidekickError};
use covenant_wire::Value;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;

use crate::args::{ConnectArgs, Headers, MessageArgs, ProcedureArgs, RequestHandle, ResourceArgs};
use crate::error::{DefinitionError, ErrorSink, Halt, ProcedureFailure, Reject, RejectSink};

pub(crate) type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

pub(crate) type ContextGenerator<C> =
	Arc<dyn Fn(Arc<Headers>, RequestHandle) -> BoxFuture<Result<C, Halt>> + Send + Sync>;
pub(crate) type DerivationFn<C, D> =
	Arc<dyn Fn(Arc<C>, ErrorSink) -> BoxFuture<Result<D, Halt>> + Send + Sync>;
pub(crate) type ChannelDerivationFn<D> =
	Arc<dyn Fn(Value, RejectSink) -> BoxFuture<Result<D, Reject>> + Send + Sync>;
pub(crate) type ProcedureHandlerFn<C, D> =
	Arc<dyn Fn(ProcedureArgs<C, D>) -> BoxFuture<Result<Value, Halt>> + Send + Sync>;
pub(crate) type ResourcesFn<C> =
	Arc<dyn for<'r> Fn(ResourceArgs<'r, C>) -> Vec<String> + Send + Sync>;
pub(crate) type ConnectFn<C, D> =
	Arc<dyn Fn(ConnectArgs<C, D>) -> BoxFuture<Result<Value, Reject>> + Send + Sync>;
pub(crate) type MessageFn<D> =
	Arc<dyn Fn(MessageArgs<D>) -> BoxFuture<Result<(), Reject>> + Send + Sync>;

pub(crate) struct ProcedureImpl<C, D> {
	pub(crate) handler: ProcedureHandlerFn<C, D>,
	pub(crate) resources: Option<ResourcesFn<C>>,
}

pub(crate) struct ChannelImpl<C, D> {
	pub(crate) on_connect: ConnectFn<C, D>,
	pub(crate) on_message: MessageFn<D>,
}

/// The success half of a procedure result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcedureSuccess {
	/// The validated handler outputs.
	pub data: Value,
	/// Deduplicated resources the procedure touched, in first-occurrence
	/// order.
	pub resources: Vec<String>,
}

/// Outcome of one procedure call: data and resources, or error info.
/// Never both.
pub type ProcedureResult = Result<ProcedureSuccess, ProcedureFailure>;

/// The covenant server. Immutable once built; shared behind [`Arc`].
pub struct CovenantServer<C, D> {
	pub(crate) covenant: Covenant,
	pub(crate) context_generator: ContextGenerator<C>,
	pub(crate) derivation: DerivationFn<C, D>,
	pub(crate) channel_derivation: Option<ChannelDerivationFn<D>>,
	pub(crate) procedures: HashMap<String, ProcedureImpl<C, D>>,
	pub(crate) channels: HashMap<String, ChannelImpl<C, D>>,
	pub(crate) sidekick: Arc<dyn Sidekick>,
}

/// Accumulates handler implementations for a [`CovenantServer`].
pub struct CovenantServerBuilder<C, D> {
	covenant: Covenant,
	context_generator: ContextGenerator<C>,
	derivation: DerivationFn<C, D>,
	channel_derivation: Option<ChannelDerivationFn<D>>,
	procedures: HashMap<String, ProcedureImpl<C, D>>,
	channels: HashMap<String, ChannelImpl<C, D>>,
	sidekick: Arc<dyn Sidekick>,
}

impl<C: Send + Sync + 'static, D: Send + Sync + 'static> CovenantServer<C, D> {
	/// Starts building a server from its covenant, broker handle, context
	/// generator, and derivation.
	pub fn builder<CF, CFut, DF, DFut>(
		covenant: Covenant,
		sidekick: Arc<dyn Sidekick>,
		context_generator: CF,
		derivation: DF,
	) -> CovenantServerBuilder<C, D>
	where
		CF: Fn(Arc<Headers>, RequestHandle) -> CFut + Send + Sync + 'static,
		CFut: Future<Output = Result<C, Halt>> + Send + 'static,
		DF: Fn(Arc<C>, ErrorSink) -> DFut + Send + Sync + 'static,
		DFut: Future<Output = Result<D, Halt>> + Send + 'static,
	{
		CovenantServerBuilder {
			covenant,
			context_generator: Arc::new(move |headers, request| {
				Box::pin(context_generator(headers, request))
			}),
			derivation: Arc::new(move |context, error| Box::pin(derivation(context, error))),
			channel_derivation: None,
			procedures: HashMap::new(),
			channels: HashMap::new(),
			sidekick,
		}
	}

	/// Runs one procedure call through the full pipeline.
	///
	/// `deadline` is the transport-derived time budget for the whole
	/// pipeline. On expiry the handler's cancellation token is tripped,
	/// any partial output is discarded, and no resources are reported.
	pub async fn run_procedure(
		&self,
		name: &str,
		inputs: Value,
		headers: Headers,
		deadline: Option<Duration>,
	) -> ProcedureResult {
		let cancel = CancellationToken::new();
		let run = self.dispatch(name, inputs, Arc::new(headers), cancel.clone(), deadline);
		match deadline {
			Some(limit) => match tokio::time::timeout(limit, run).await {
				Ok(result) => result,
				Err(_) => {
					cancel.cancel();
					tracing::warn!(procedure = name, ?limit, "procedure deadline exceeded");
					Err(ProcedureFailure::deadline_exceeded(name))
				}
			},
			None => run.await,
		}
	}

	async fn dispatch(
		&self,
		name: &str,
		inputs: Value,
		headers: Arc<Headers>,
		cancel: CancellationToken,
		deadline: Option<Duration>,
	) -> ProcedureResult {
		let Some(def) = self.covenant.procedure(name) else {
			return Err(ProcedureFailure::not_found(name));
		};

		if let Err(issues) = def.input.validate(&inputs) {
			return Err(ProcedureFailure::bad_input(name, &issues));
		}

		let request = RequestHandle {
			deadline,
			cancel: cancel.clone(),
		};
		let context = Arc::new((self.context_generator)(headers.clone(), request).await?);
		let derivation = Arc::new((self.derivation)(context.clone(), ErrorSink).await?);

		let Some(imp) = self.procedures.get(name) else {
			// Declared but unimplemented; assert_all_defined would have
			// refused startup.
			tracing::error!(procedure = name, "declared procedure has no handler");
			return Err(ProcedureFailure::internal());
		};

		let args = ProcedureArgs {
			inputs: inputs.clone(),
			context: context.clone(),
			derivation,
			headers,
			cancel,
			error: ErrorSink,
		};
		let outputs = match std::panic::AssertUnwindSafe((imp.handler)(args))
			.catch_unwind()
			.await
		{
			Ok(Ok(outputs)) => outputs,
			Ok(Err(halt)) => return Err(halt.into()),
			Err(_) => {
				tracing::error!(procedure = name, "handler panicked");
				return Err(ProcedureFailure::internal());
			}
		};

		let resources = match &imp.resources {
			Some(resources) => dedup_preserving_order(resources(ResourceArgs {
				inputs: &inputs,
				outputs: &outputs,
				context: &context,
			})),
			None => Vec::new(),
		};

		if let Err(issues) = def.output.validate(&outputs) {
			tracing::error!(procedure = name, %issues, "output contract violation");
			return Err(ProcedureFailure::output_contract(name, &issues));
		}

		Ok(ProcedureSuccess {
			data: outputs,
			resources,
		})
	}

	/// Publishes `updated` on each resource topic via the broker.
	///
	/// Called by transport adapters after a successful mutation.
	pub fn publish_updates(&self, resources: &[String]) -> Result<(), SidekickError> {
		self.sidekick.update_resources(resources)
	}

	/// The shared contract this server implements.
	pub fn covenant(&self) -> &Covenant {
		&self.covenant
	}

	/// Verifies every declared procedure and channel has an
	/// implementation. Call before accepting traffic; failures are fatal
	/// at startup.
	pub fn assert_all_defined(&self) -> Result<(), DefinitionError> {
		let mut missing_procedures: Vec<String> = self
			.covenant
			.procedures()
			.filter(|p| !self.procedures.contains_key(&p.name))
			.map(|p| p.name.clone())
			.collect();
		missing_procedures.sort();

		let mut missing_channels: Vec<String> = self
			.covenant
			.channels()
			.filter(|c| !self.channels.contains_key(&c.name))
			.map(|c| c.name.clone())
			.collect();
		missing_channels.sort();

		let missing_channel_derivation =
			self.covenant.channels().next().is_some() && self.channel_derivation.is_none();

		if missing_procedures.is_empty()
			&& missing_channels.is_empty()
			&& !missing_channel_derivation
		{
			Ok(())
		} else {
			Err(DefinitionError {
				procedures: missing_procedures,
				channels: missing_channels,
				missing_channel_derivation,
			})
		}
	}
}

impl<C: Send + Sync + 'static, D: Send + Sync + 'static> CovenantServerBuilder<C, D> {
	/// Registers a procedure handler with no resources function.
	pub fn procedure<F, Fut>(self, name: impl Into<String>, handler: F) -> Self
	where
		F: Fn(ProcedureArgs<C, D>) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Result<Value, Halt>> + Send + 'static,
	{
		self.install_procedure(name.into(), handler, None)
	}

	/// Registers a procedure handler together with its resources function.
	pub fn procedure_with_resources<F, Fut, R>(
		self,
		name: impl Into<String>,
		handler: F,
		resources: R,
	) -> Self
	where
		F: Fn(ProcedureArgs<C, D>) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Result<Value, Halt>> + Send + 'static,
		R: for<'r> Fn(ResourceArgs<'r, C>) -> Vec<String> + Send + Sync + 'static,
	{
		self.install_procedure(name.into(), handler, Some(Arc::new(resources) as ResourcesFn<C>))
	}

	fn install_procedure<F, Fut>(
		mut self,
		name: String,
		handler: F,
		resources: Option<ResourcesFn<C>>,
	) -> Self
	where
		F: Fn(ProcedureArgs<C, D>) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Result<Value, Halt>> + Send + 'static,
	{
		self.procedures.insert(
			name,
			ProcedureImpl {
				handler: Arc::new(move |args| Box::pin(handler(args))),
				resources,
			},
		);
		self
	}

	/// Registers both handlers for a channel.
	pub fn channel<CF, CFut, MF, MFut>(
		mut self,
		name: impl Into<String>,
		on_connect: CF,
		on_message: MF,
	) -> Self
	where
		CF: Fn(ConnectArgs<C, D>) -> CFut + Send + Sync + 'static,
		CFut: Future<Output = Result<Value, Reject>> + Send + 'static,
		MF: Fn(MessageArgs<D>) -> MFut + Send + Sync + 'static,
		MFut: Future<Output = Result<(), Reject>> + Send + 'static,
	{
		self.channels.insert(
			name.into(),
			ChannelImpl {
				on_connect: Arc::new(move |args| Box::pin(on_connect(args))),
				on_message: Arc::new(move |args| Box::pin(on_message(args))),
			},
		);
		self
	}

	/// Sets the per-delivery derivation used by `on_message` handlers,
	/// built from a connection context.
	pub fn channel_derivation<F, Fut>(mut self, derivation: F) -> Self
	where
		F: Fn(Value, RejectSink) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Result<D, Reject>> + Send + 'static,
	{
		self.channel_derivation = Some(Arc::new(move |context, reject| {
			Box::pin(derivation(context, reject))
		}));
		self
	}

	/// Finishes construction.
	pub fn build(self) -> Arc<CovenantServer<C, D>> {
		Arc::new(CovenantServer {
			covenant: self.covenant,
			context_generator: self.context_generator,
			derivation: self.derivation,
			channel_derivation: self.channel_derivation,
			procedures: self.procedures,
			channels: self.channels,
			sidekick: self.sidekick,
		})
	}
}

fn dedup_preserving_order(resources: Vec<String>) -> Vec<String> {
	let mut seen = HashSet::new();
	resources
		.into_iter()
		.filter(|resource| seen.insert(resource.clone()))
		.collect()
}

#[cfg(test)]
mod tests {
	use covenant_contract::{ProcedureDef, ProcedureKind};
	use covenant_schema::Schema;
	use covenant_sidekick_proto::{ConnectionRecord, ConnectionToken, ParamMap};

	use super::*;

	#[derive(Debug, Default)]
	struct NullSidekick;

	impl Sidekick for NullSidekick {
		fn add_connection(&self, _record: ConnectionRecord) -> Result<(), SidekickError> {
			Ok(())
		}

		fn remove_connection(&self, _token: &ConnectionToken) -> Result<(), SidekickError> {
			Ok(())
		}

		fn update_resources(&self, _resources: &[String]) -> Result<(), SidekickError> {
			Ok(())
		}

		fn post_server_message(
			&self,
			_channel: &str,
			_params: &ParamMap,
			_data: &Value,
		) -> Result<(), SidekickError> {
			Ok(())
		}
	}

	fn covenant() -> Covenant {
		Covenant::declare(
			[
				ProcedureDef::query("helloWorld", Schema::String, Schema::String),
				ProcedureDef::query("failingQuery", Schema::Bool, Schema::String),
				ProcedureDef::query(
					"getData",
					Schema::String,
					Schema::object([("str", Schema::String), ("n", Schema::Int)]),
				),
				ProcedureDef::mutation("updateData", Schema::String, Schema::Null),
				ProcedureDef::query("brokenOutput", Schema::Null, Schema::String),
				ProcedureDef::query("slowQuery", Schema::Null, Schema::Null),
			],
			[],
		)
		.unwrap()
	}

	fn server() -> Arc<CovenantServer<(), ()>> {
		CovenantServer::builder(
			covenant(),
			Arc::new(NullSidekick),
			|_headers, _request| async { Ok(()) },
			|_context, _error| async { Ok(()) },
		)
		.procedure("helloWorld", |args| async move {
			let name = args.inputs.as_str().unwrap_or_default().to_string();
			Ok(Value::from(format!("Hello, {name}")))
		})
		.procedure("failingQuery", |args| async move {
			if args.inputs.as_bool() == Some(true) {
				Err(args.error.raise("Intentional failure", 400))
			} else {
				Ok(Value::from("success"))
			}
		})
		.procedure_with_resources(
			"getData",
			|args| async move {
				let key = args.inputs.as_str().unwrap_or_default().to_string();
				Ok(Value::object([
					("str", Value::from(format!("got data: {key}"))),
					("n", Value::from(42.0)),
				]))
			},
			|args| {
				let key = args.inputs.as_str().unwrap_or_default();
				vec![
					format!("/data/{key}"),
					format!("/data/{key}"),
					"/data/all".to_string(),
				]
			},
		)
		.procedure("updateData", |_args| async move { Ok(Value::Null) })
		.procedure("brokenOutput", |_args| async move { Ok(Value::from(7.0)) })
		.procedure("slowQuery", |_args| async move {
			tokio::time::sleep(Duration::from_secs(3600)).await;
			Ok(Value::Null)
		})
		.build()
	}

	#[tokio::test]
	async fn query_returns_data_and_no_resources() {
		let ok = server()
			.run_procedure("helloWorld", Value::from("TestClient"), Headers::new(), None)
			.await
			.unwrap();
		assert_eq!(ok.data, Value::from("Hello, TestClient"));
		assert!(ok.resources.is_empty());
	}

	#[tokio::test]
	async fn resources_are_deduplicated_in_order() {
		let ok = server()
			.run_procedure("getData", Value::from("test-key"), Headers::new(), None)
			.await
			.unwrap();
		assert_eq!(
			ok.resources,
			vec!["/data/test-key".to_string(), "/data/all".to_string()]
		);
	}

	#[tokio::test]
	async fn unknown_procedure_is_404() {
		let err = server()
			.run_procedure("nope", Value::Null, Headers::new(), None)
			.await
			.unwrap_err();
		assert_eq!(err.code, 404);
	}

	#[tokio::test]
	async fn invalid_inputs_are_400_naming_the_parse() {
		let err = server()
			.run_procedure("getData", Value::from(12345.0), Headers::new(), None)
			.await
			.unwrap_err();
		assert_eq!(err.code, 400);
		assert!(err.message.to_lowercase().contains("parsing procedure inputs"));
		assert!(err.message.contains("getData"));
	}

	#[tokio::test]
	async fn handler_halt_carries_code_and_message() {
		let err = server()
			.run_procedure("failingQuery", Value::from(true), Headers::new(), None)
			.await
			.unwrap_err();
		assert_eq!(err.code, 400);
		assert_eq!(err.message, "Intentional failure");

		let ok = server()
			.run_procedure("failingQuery", Value::from(false), Headers::new(), None)
			.await
			.unwrap();
		assert_eq!(ok.data, Value::from("success"));
	}

	#[tokio::test]
	async fn output_contract_violation_is_500() {
		let err = server()
			.run_procedure("brokenOutput", Value::Null, Headers::new(), None)
			.await
			.unwrap_err();
		assert_eq!(err.code, 500);
		assert!(err.message.contains("output contract"));
	}

	#[tokio::test(start_paused = true)]
	async fn deadline_expiry_cancels_the_handler() {
		let err = server()
			.run_procedure(
				"slowQuery",
				Value::Null,
				Headers::new(),
				Some(Duration::from_millis(250)),
			)
			.await
			.unwrap_err();
		assert_eq!(err.code, 504);
	}

	#[tokio::test]
	async fn context_generator_halt_surfaces_as_failure() {
		let server = CovenantServer::builder(
			covenant(),
			Arc::new(NullSidekick) as Arc<dyn Sidekick>,
			|headers: Arc<Headers>, _request| async move {
				match headers.get("authorization") {
					Some(_) => Ok(()),
					None => Err(Halt::unauthorized("missing credentials")),
				}
			},
			|_context, _error| async { Ok(()) },
		)
		.procedure("helloWorld", |_args| async { Ok(Value::from("hi")) })
		.build();

		let err = server
			.run_procedure("helloWorld", Value::from("x"), Headers::new(), None)
			.await
			.unwrap_err();
		assert_eq!(err.code, 401);

		let headers: Headers = [("authorization", "Bearer ok")].into_iter().collect();
		assert!(
			server
				.run_procedure("helloWorld", Value::from("x"), headers, None)
				.await
				.is_ok()
		);
	}

	#[tokio::test]
	async fn handler_panic_is_sanitized_internal_error() {
		let server = CovenantServer::builder(
			covenant(),
			Arc::new(NullSidekick) as Arc<dyn Sidekick>,
			|_headers, _request| async { Ok(()) },
			|_context, _error| async { Ok(()) },
		)
		.procedure("helloWorld", |_args| async {
			panic!("secret database password leaked");
		})
		.build();

		let err = server
			.run_procedure("helloWorld", Value::from("x"), Headers::new(), None)
			.await
			.unwrap_err();
		assert_eq!(err.code, 500);
		assert_eq!(err.message, "internal server error");
	}

	#[test]
	fn assert_all_defined_lists_missing_names() {
		let incomplete = CovenantServer::builder(
			covenant(),
			Arc::new(NullSidekick) as Arc<dyn Sidekick>,
			|_headers, _request| async { Ok(()) },
			|_context, _error| async { Ok(()) },
		)
		.procedure("helloWorld", |_args| async { Ok(Value::from("hi")) })
		.build();

		let err = incomplete.assert_all_defined().unwrap_err();
		assert!(err.procedures.contains(&"getData".to_string()));
		assert!(!err.procedures.contains(&"helloWorld".to_string()));

		assert!(server().assert_all_defined().is_ok());
	}

	#[test]
	fn mutations_and_queries_share_kind_metadata_only() {
		let covenant = covenant();
		assert_eq!(
			covenant.procedure("updateData").map(|p| p.kind),
			Some(ProcedureKind::Mutation)
		);
		assert_eq!(
			covenant.procedure("getData").map(|p| p.kind),
			Some(ProcedureKind::Query)
		);
	}
}
