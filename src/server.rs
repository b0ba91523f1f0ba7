use actix_cors::Cors;
use actix_web::{web, App, HttpResponse, HttpServer, Responder};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::config::ScrapeConfig;
use crate::corpus::latest_corpus;
use crate::filter::{FilterCriteria, FilterEngine};
use crate::pipeline::run_scrape;
use crate::results::{is_valid_set_name, ResultStore};
use crate::tender::INDIAN_STATES;

const MAX_LOG_LINES: usize = 200;

pub struct AppState {
    pub config: Arc<ScrapeConfig>,
    pub store: ResultStore,
    pub engine: FilterEngine,
    pub logs: Arc<Mutex<Vec<String>>>,
    pub scrape_running: Arc<AtomicBool>,
}

impl AppState {
    pub fn new(config: Arc<ScrapeConfig>) -> Self {
        Self {
            store: ResultStore::new(config.filtered_dir()),
            engine: FilterEngine::new(&config),
            config,
            logs: Arc::new(Mutex::new(Vec::new())),
            scrape_running: Arc::new(AtomicBool::new(false)),
        }
    }
}

/// Clears the scrape-running flag when dropped, including when the run task panics.
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

async fn push_log(logs: &Arc<Mutex<Vec<String>>>, line: String) {
    let mut logs = logs.lock().await;
    logs.push(line);
    if logs.len() > MAX_LOG_LINES {
        let excess = logs.len() - MAX_LOG_LINES;
        logs.drain(..excess);
    }
}

#[derive(Debug, Deserialize)]
pub struct FilterRequest {
    filter_name: String,
    #[serde(default)]
    keywords: String,
    #[serde(default)]
    regex: bool,
    state: Option<String>,
    start_date: Option<String>,
    end_date: Option<String>,
}

#[derive(Debug, Serialize)]
struct FilterResponse {
    filter_name: String,
    corpus: String,
    matched: usize,
    result_path: String,
}

#[derive(Debug, Deserialize)]
pub struct BulkDeleteRequest {
    names: Vec<String>,
}

/// Starts a scrape run in the background. Only one run at a time.
async fn start_scrape(state: web::Data<AppState>) -> impl Responder {
    if state
        .scrape_running
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return HttpResponse::Conflict().json(json!({ "error": "A scrape run is already in progress." }));
    }

    let config = Arc::clone(&state.config);
    let logs = Arc::clone(&state.logs);
    let running = RunningGuard(Arc::clone(&state.scrape_running));
    push_log(&logs, "🚀 Scrape run started".to_string()).await;

    tokio::spawn(async move {
        let _running = running;
        match run_scrape(config).await {
            Ok(report) => push_log(&logs, report.describe()).await,
            Err(e) => {
                error!("💥 [SERVER] Scrape run failed: {:#}", e);
                push_log(&logs, format!("❌ Scrape run failed: {:#}", e)).await;
            }
        }
    });

    HttpResponse::Accepted().json(json!({ "message": "Scrape run started." }))
}

async fn get_logs(state: web::Data<AppState>) -> impl Responder {
    let logs = state.logs.lock().await.clone();
    HttpResponse::Ok().json(json!({
        "running": state.scrape_running.load(Ordering::SeqCst),
        "logs": logs,
    }))
}

/// Filters the newest corpus and stores the matches under the requested name.
async fn run_filter(req: web::Json<FilterRequest>, state: web::Data<AppState>) -> impl Responder {
    let req = req.into_inner();
    if !is_valid_set_name(&req.filter_name) {
        return HttpResponse::BadRequest().json(json!({ "error": "Invalid filter name." }));
    }
    let name = req.filter_name.trim().to_string();

    let corpus = match latest_corpus(&state.config.data_dir) {
        Ok(Some(path)) => path,
        Ok(None) => {
            return HttpResponse::NotFound().json(json!({ "error": "No source tender list files found." }));
        }
        Err(e) => {
            error!("❌ [SERVER] Could not look up corpus: {:#}", e);
            return HttpResponse::InternalServerError()
                .json(json!({ "error": "Error accessing source tender data." }));
        }
    };

    let criteria = FilterCriteria::from_inputs(
        FilterCriteria::parse_keyword_list(&req.keywords),
        req.regex,
        req.state.as_deref(),
        req.start_date.as_deref(),
        req.end_date.as_deref(),
    );
    info!("[SERVER] Running filter '{}' on {} with {:?}", name, corpus.display(), criteria);

    let matched = match state.engine.run_file(&corpus, &criteria) {
        Ok(records) => records,
        Err(e) => {
            error!("❌ [SERVER] Filter '{}' failed: {:#}", name, e);
            return HttpResponse::InternalServerError().json(json!({ "error": format!("Error running filter: {}", e) }));
        }
    };

    match state.store.save(&name, &matched).await {
        Ok(path) => {
            push_log(&state.logs, format!("Filter '{}' matched {} tenders", name, matched.len())).await;
            HttpResponse::Ok().json(FilterResponse {
                filter_name: name,
                corpus: corpus.display().to_string(),
                matched: matched.len(),
                result_path: path.display().to_string(),
            })
        }
        Err(e) => {
            error!("❌ [SERVER] Could not save filter '{}': {:#}", name, e);
            HttpResponse::InternalServerError().json(json!({ "error": "Failed to write result set." }))
        }
    }
}

async fn list_filters(state: web::Data<AppState>) -> impl Responder {
    match state.store.list() {
        Ok(names) => HttpResponse::Ok().json(json!({ "filters": names })),
        Err(e) => {
            error!("❌ [SERVER] Could not list result sets: {:#}", e);
            HttpResponse::InternalServerError().json(json!({ "error": "Could not list result sets." }))
        }
    }
}

async fn get_filter(path: web::Path<String>, state: web::Data<AppState>) -> impl Responder {
    let name = path.into_inner();
    if !is_valid_set_name(&name) {
        return HttpResponse::BadRequest().json(json!({ "error": "Invalid filter name." }));
    }
    match state.store.load(&name).await {
        Ok(records) => HttpResponse::Ok().json(records),
        Err(e) => {
            warn!("⚠️ [SERVER] Could not load result set '{}': {:#}", name, e);
            HttpResponse::NotFound().json(json!({ "error": format!("Result set '{}' not found.", name) }))
        }
    }
}

async fn delete_filter(path: web::Path<String>, state: web::Data<AppState>) -> impl Responder {
    let name = path.into_inner();
    if !is_valid_set_name(&name) {
        return HttpResponse::BadRequest().json(json!({ "error": "Invalid filter name." }));
    }
    match state.store.delete(&name).await {
        Ok(()) => HttpResponse::NoContent().finish(),
        Err(e) => HttpResponse::InternalServerError().json(json!({ "error": format!("Delete failed: {:#}", e) })),
    }
}

async fn bulk_delete(req: web::Json<BulkDeleteRequest>, state: web::Data<AppState>) -> impl Responder {
    let (valid, invalid): (Vec<String>, Vec<String>) =
        req.into_inner().names.into_iter().partition(|name| is_valid_set_name(name));

    let mut failures = state.store.delete_many(&valid).await;
    let deleted = valid.len() - failures.len();
    failures.extend(invalid.into_iter().map(|name| (name, "invalid name".to_string())));

    HttpResponse::Ok().json(json!({
        "deleted": deleted,
        "failures": failures
            .into_iter()
            .map(|(name, reason)| json!({ "name": name, "error": reason }))
            .collect::<Vec<_>>(),
    }))
}

async fn list_states() -> impl Responder {
    HttpResponse::Ok().json(INDIAN_STATES)
}

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/scrape", web::post().to(start_scrape))
        .route("/logs", web::get().to(get_logs))
        .route("/filter", web::post().to(run_filter))
        .route("/filters", web::get().to(list_filters))
        .route("/filters/bulk-delete", web::post().to(bulk_delete))
        .route("/filters/{name}", web::get().to(get_filter))
        .route("/filters/{name}", web::delete().to(delete_filter))
        .route("/states", web::get().to(list_states));
}

pub async fn serve(config: Arc<ScrapeConfig>) -> std::io::Result<()> {
    let host = config.host.clone();
    let port = config.port;
    let state = web::Data::new(AppState::new(config));

    info!("Starting server at http://{}:{}", host, port);
    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);
        App::new()
            .wrap(cors)
            .app_data(state.clone())
            .configure(routes)
    })
    .bind((host.as_str(), port))?
    .run()
    .await
}
