// apiserver.rs

use axum::{
    extract::{Form, Path, Query, State},
    http::{
        header::{CACHE_CONTROL, HOST, LINK},
        HeaderMap, HeaderValue, StatusCode,
    },
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};
use tokio::net::TcpListener;
use tower_http::{set_header::SetResponseHeaderLayer, trace::TraceLayer};

use crate::*;

const CACHE_POLICY: &str = "must-revalidate, private, max-age=20";
const METER_OPTIONS: [&str; 3] = ["value", "label", "unit"];

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            AppError::UnknownMeter(_) => StatusCode::NOT_FOUND,
            AppError::ValueTooSmall { .. } | AppError::InvalidValue(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

struct MeterRow {
    id: String,
    label: String,
    unit: String,
    value: String,
    selected: bool,
}

#[derive(Template)]
#[template(path = "index.html.ask", escape = "html")]
struct IndexPage {
    meters: Vec<MeterRow>,
    value: String,
    unit: String,
    error: String,
    version: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct IndexQuery {
    pub meter: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SetForm {
    #[serde(default)]
    pub meter: Option<String>,
    #[serde(default)]
    pub value: String,
}

pub fn api_router(registry: MeterRegistry) -> Router {
    Router::new()
        .route("/", get(index).post(index_set))
        .route("/api", get(list))
        .route("/api/{id}", get(options))
        .route("/api/{id}/{field}", get(field).post(set_value))
        .layer(SetResponseHeaderLayer::overriding(
            CACHE_CONTROL,
            HeaderValue::from_static(CACHE_POLICY),
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(registry)
}

pub async fn run_api_server(registry: MeterRegistry, addr: &str) -> AppResult<()> {
    let addr = addr.parse::<net::SocketAddr>()?;
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| AppError::Message(format!("Cannot bind {addr}: {e}")))?;
    serve_api(listener, registry).await
}

pub async fn serve_api(listener: TcpListener, registry: MeterRegistry) -> AppResult<()> {
    if let Ok(local) = listener.local_addr() {
        info!("API server listening on {local}");
    }
    axum::serve(listener, api_router(registry))
        .await
        .map_err(|e| AppError::Message(format!("API server failed: {e}")))
}

fn parse_value(raw: &str) -> AppResult<f64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(AppError::InvalidValue("empty value".into()));
    }
    let value = raw
        .parse::<f64>()
        .map_err(|e| AppError::InvalidValue(format!("{raw:?}: {e}")))?;
    if !value.is_finite() {
        return Err(AppError::InvalidValue(format!("{raw:?} is not a finite number")));
    }
    Ok(value)
}

fn base_url(headers: &HeaderMap) -> String {
    let host = headers
        .get(HOST)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("localhost");
    format!("http://{host}")
}

/// Newline separated list plus one `Link` header per entry.
fn link_list(links: Vec<String>) -> Response {
    let mut headers = HeaderMap::new();
    for link in &links {
        if let Ok(v) = HeaderValue::from_str(&format!("<{link}>; rel=alternate")) {
            headers.append(LINK, v);
        }
    }
    let body = links.iter().map(|l| format!("{l}\n")).collect::<String>();
    (headers, body).into_response()
}

async fn render_index(registry: &MeterRegistry, selected: Option<&str>, error: String) -> AppResult<Html<String>> {
    let selected = selected
        .filter(|id| registry.get(id).is_some())
        .map(str::to_string)
        .or_else(|| registry.meters().first().map(|m| m.id()));

    let mut page = IndexPage {
        meters: Vec::with_capacity(registry.meters().len()),
        value: String::new(),
        unit: String::new(),
        error,
        version: FW_VERSION,
    };
    for m in registry.meters() {
        let row = MeterRow {
            id: m.id(),
            label: m.label().to_string(),
            unit: m.unit().to_string(),
            value: format!("{:.3}", m.get().await),
            selected: selected.as_deref() == Some(m.id().as_str()),
        };
        if row.selected {
            page.value = row.value.clone();
            page.unit = row.unit.clone();
        }
        page.meters.push(row);
    }
    Ok(Html(page.render()?))
}

#[axum_macros::debug_handler]
async fn index(State(registry): State<MeterRegistry>, Query(q): Query<IndexQuery>) -> AppResult<Html<String>> {
    render_index(&registry, q.meter.as_deref(), String::new()).await
}

#[axum_macros::debug_handler]
async fn index_set(State(registry): State<MeterRegistry>, Form(form): Form<SetForm>) -> AppResult<Response> {
    let id = form.meter.unwrap_or_default();
    let result = match parse_value(&form.value) {
        Ok(value) => registry.set(&id, value).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(_) => Ok(render_index(&registry, Some(&id), String::new()).await?.into_response()),
        Err(e) => {
            warn!("Set '{id}' rejected: {e}");
            let page = render_index(&registry, Some(&id), e.to_string()).await?;
            Ok((StatusCode::BAD_REQUEST, page).into_response())
        }
    }
}

async fn list(State(registry): State<MeterRegistry>, headers: HeaderMap) -> Response {
    let base = base_url(&headers);
    link_list(
        registry
            .meters()
            .iter()
            .map(|m| format!("{base}/api/{}", m.id()))
            .collect(),
    )
}

async fn options(
    State(registry): State<MeterRegistry>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> AppResult<Response> {
    let meter = registry.get(&id).ok_or_else(|| AppError::UnknownMeter(id.clone()))?;
    let base = base_url(&headers);
    Ok(link_list(
        METER_OPTIONS
            .iter()
            .map(|o| format!("{base}/api/{}/{o}", meter.id()))
            .collect(),
    ))
}

async fn field(State(registry): State<MeterRegistry>, Path((id, field)): Path<(String, String)>) -> AppResult<String> {
    let meter = registry.get(&id).ok_or_else(|| AppError::UnknownMeter(id.clone()))?;
    Ok(match field.as_str() {
        "label" => meter.label().to_string(),
        "unit" => meter.unit().to_string(),
        "value" => format!("{:.3}", meter.get().await),
        _ => return Err(AppError::UnknownMeter(format!("{id}/{field}"))),
    })
}

#[axum_macros::debug_handler]
async fn set_value(
    State(registry): State<MeterRegistry>,
    Path((id, field)): Path<(String, String)>,
    Form(form): Form<SetForm>,
) -> AppResult<String> {
    if field != "value" {
        return Err(AppError::InvalidValue(format!("cannot set '{field}'")));
    }
    let value = parse_value(&form.value)?;
    let stored = registry.set(&id, value).await?;
    Ok(format!("{stored:.3}"))
}

// EOF
