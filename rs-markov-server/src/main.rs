use std::sync::{Arc, Mutex};

use actix_web::{get, put, web, App, HttpResponse, HttpServer, Responder};
use log::{error, info};
use serde::{Deserialize, Serialize};

use rs_markov_core::storage::{ProcessingStats, StoreStats};
use rs_markov_core::{Config, GenerationParams, Generator, MarkovError, TransitionStore};

/// Returned when the models cannot produce a single token.
const NOT_ENOUGH_DATA: &str = "I don't have enough training data yet.";

/// Query parameters shared by `/v1/generate` and `/v1/prompt`.
///
/// Missing values fall back to the configured generation defaults.
#[derive(Deserialize)]
struct GenerateQuery {
	context: Option<String>,
	order: Option<usize>,
	max_tokens: Option<usize>,
	temperature: Option<f32>,
	top_k: Option<usize>,
	recommended_length: Option<usize>,
}

#[derive(Deserialize)]
struct AuthorQuery {
	user_id: Option<String>,
	channel_id: Option<String>,
}

#[derive(Serialize)]
struct StatsResponse {
	store: StoreStats,
	processing: Vec<OrderProgress>,
}

#[derive(Serialize)]
struct OrderProgress {
	order: usize,
	#[serde(flatten)]
	stats: ProcessingStats,
}

struct SharedData {
	generator: Generator,
}

impl GenerateQuery {
	/// Overlays the query on the configured defaults.
	fn params(&self, config: &Config) -> Result<GenerationParams, MarkovError> {
		let mut params = config.generation_params()?;
		if let Some(max_tokens) = self.max_tokens {
			params.max_tokens = max_tokens;
		}
		if let Some(temperature) = self.temperature {
			params.set_temperature(temperature)?;
		}
		if self.top_k.is_some() {
			params.set_top_k(self.top_k)?;
		}
		if self.recommended_length.is_some() {
			params.set_recommended_length(self.recommended_length)?;
		}
		Ok(params)
	}
}

impl AuthorQuery {
	fn user_id(&self) -> &str {
		self.user_id.as_deref().unwrap_or("anonymous")
	}

	fn channel_id(&self) -> &str {
		self.channel_id.as_deref().unwrap_or("default")
	}
}

fn error_response(e: MarkovError) -> HttpResponse {
	match e {
		MarkovError::InvalidArgument(_) | MarkovError::InvalidOrder(_) | MarkovError::UnknownOrder(_) => {
			HttpResponse::BadRequest().body(e.to_string())
		}
		_ => {
			error!("request failed: {e}");
			HttpResponse::InternalServerError().body(e.to_string())
		}
	}
}

fn generated_response(text: String) -> HttpResponse {
	if text.is_empty() {
		HttpResponse::Ok().body(NOT_ENOUGH_DATA)
	} else {
		HttpResponse::Ok().body(text)
	}
}

/// HTTP GET endpoint `/v1/generate`
///
/// Generates text continuing the optional `context`, without learning it.
#[get("/v1/generate")]
async fn get_generated(data: web::Data<Mutex<SharedData>>, query: web::Query<GenerateQuery>) -> impl Responder {
	let shared_data = match data.lock() {
		Ok(m) => m,
		Err(_) => return HttpResponse::InternalServerError().body("Model lock failed"),
	};

	let params = match query.params(shared_data.generator.config()) {
		Ok(p) => p,
		Err(e) => return error_response(e),
	};
	let context = query.context.as_deref().unwrap_or("");

	match shared_data.generator.generate(context, query.order, &params) {
		Ok(text) => generated_response(text),
		Err(e) => error_response(e),
	}
}

/// HTTP PUT endpoint `/v1/train`
///
/// Learns the request body as one message.
#[put("/v1/train")]
async fn put_train(data: web::Data<Mutex<SharedData>>, query: web::Query<AuthorQuery>, body: String) -> impl Responder {
	let mut shared_data = match data.lock() {
		Ok(m) => m,
		Err(_) => return HttpResponse::InternalServerError().body("Model lock failed"),
	};

	match shared_data.generator.ingest(query.user_id(), query.channel_id(), &body) {
		Ok(Some(_)) => HttpResponse::Ok().body("Trained"),
		Ok(None) => HttpResponse::Ok().body("Skipped"),
		Err(e) => error_response(e),
	}
}

/// HTTP PUT endpoint `/v1/prompt`
///
/// Learns the request body, then answers it when running in live mode.
#[put("/v1/prompt")]
async fn put_prompt(
	data: web::Data<Mutex<SharedData>>,
	author: web::Query<AuthorQuery>,
	query: web::Query<GenerateQuery>,
	body: String,
) -> impl Responder {
	let mut shared_data = match data.lock() {
		Ok(m) => m,
		Err(_) => return HttpResponse::InternalServerError().body("Model lock failed"),
	};

	let params = match query.params(shared_data.generator.config()) {
		Ok(p) => p,
		Err(e) => return error_response(e),
	};

	match shared_data.generator.respond(author.user_id(), author.channel_id(), &body, &params) {
		Ok(Some(text)) => generated_response(text),
		Ok(None) => HttpResponse::Ok().body("Trained"),
		Err(e) => error_response(e),
	}
}

/// HTTP PUT endpoint `/v1/refresh`
///
/// Reloads every order from the store to pick up background progress.
#[put("/v1/refresh")]
async fn put_refresh(data: web::Data<Mutex<SharedData>>) -> impl Responder {
	let mut shared_data = match data.lock() {
		Ok(m) => m,
		Err(_) => return HttpResponse::InternalServerError().body("Model lock failed"),
	};

	match shared_data.generator.refresh_all() {
		Ok(()) => HttpResponse::Ok().body("Models refreshed"),
		Err(e) => error_response(e),
	}
}

#[put("/v1/compact")]
async fn put_compact(data: web::Data<Mutex<SharedData>>) -> impl Responder {
	let mut shared_data = match data.lock() {
		Ok(m) => m,
		Err(_) => return HttpResponse::InternalServerError().body("Model lock failed"),
	};

	match shared_data.generator.compact() {
		Ok(report) => HttpResponse::Ok().json(report),
		Err(e) => error_response(e),
	}
}

#[get("/v1/stats")]
async fn get_stats(data: web::Data<Mutex<SharedData>>) -> impl Responder {
	let shared_data = match data.lock() {
		Ok(m) => m,
		Err(_) => return HttpResponse::InternalServerError().body("Model lock failed"),
	};

	let store = match shared_data.generator.stats() {
		Ok(s) => s,
		Err(e) => return error_response(e),
	};
	let processing = match shared_data.generator.processing_stats() {
		Ok(p) => p.into_iter().map(|(order, stats)| OrderProgress { order, stats }).collect(),
		Err(e) => return error_response(e),
	};

	HttpResponse::Ok().json(StatsResponse { store, processing })
}

fn build_generator(config: Config) -> Result<Generator, MarkovError> {
	let store = Arc::new(TransitionStore::open(&config.db_path)?);
	Generator::new(store, config)
}

/// Main entry point for the server.
///
/// Opens the store, hydrates every configured order, wraps the generator in
/// a `Mutex` and starts an Actix-web HTTP server.
///
/// # Notes
/// - Configuration comes from the environment (`DB_PATH`, `MODE`, ...).
/// - The server binds to 127.0.0.1 on `MARKOV_PORT`.
/// - Background orders are trained by `rs-markov-worker`; call
///   `/v1/refresh` to load its progress.
#[actix_web::main]
async fn main() -> std::io::Result<()> {
	env_logger::init();

	let config = Config::from_env().map_err(std::io::Error::other)?;
	let port = config.port;
	info!("opening store at {} in {:?} mode", config.db_path, config.mode);

	let generator = build_generator(config).map_err(std::io::Error::other)?;
	let shared_data = SharedData { generator };
	let shared_generator = web::Data::new(Mutex::new(shared_data));

	info!("listening on 127.0.0.1:{port}");
	HttpServer::new(move || {
		App::new()
			.app_data(shared_generator.clone())
			.service(get_generated)
			.service(put_train)
			.service(put_prompt)
			.service(put_refresh)
			.service(put_compact)
			.service(get_stats)
	})
		.bind(("127.0.0.1", port))?
		.run()
		.await
}
