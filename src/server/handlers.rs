use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{
        sse::{Event as SseEvent, KeepAlive},
        IntoResponse, Json, Response, Sse,
    },
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::Stream;
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::events::JournalEvent;
use super::state::AppState;
use crate::constants::COINCIDENT_TOLERANCE_DEGREES;
use crate::map_index::{MapPin, Region};
use crate::models::{AssetHint, Coordinate, JournalEntry, ProfileStatistics, UserProfile};
use crate::pipeline::Resolution;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Runs a blocking store call off the async workers, mapping failures to 500.
async fn blocking<T, F>(f: F) -> Result<T, StatusCode>
where
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => {
            error!(error = %e, "Storage error");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
        Err(e) => {
            error!(error = %e, "Storage task panicked");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

pub async fn list_entries(State(state): State<AppState>) -> Json<Vec<JournalEntry>> {
    Json(state.store.all_entries())
}

pub async fn get_entry(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<JournalEntry>, StatusCode> {
    state.store.get(id).map(Json).ok_or(StatusCode::NOT_FOUND)
}

pub async fn delete_entry(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<StatusCode, StatusCode> {
    let store = state.store.clone();
    if blocking(move || store.delete(id)).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(StatusCode::NOT_FOUND)
    }
}

/// Optional asset metadata sent along with an uploaded photo.
#[derive(Debug, Default, Deserialize)]
pub struct UploadQuery {
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub taken_at: Option<DateTime<Utc>>,
}

impl UploadQuery {
    fn into_hint(self) -> Result<AssetHint, StatusCode> {
        let coordinate = match (self.lat, self.lon) {
            (Some(lat), Some(lon)) => {
                let coordinate = Coordinate::new(lat, lon);
                if !coordinate.is_valid() {
                    return Err(StatusCode::BAD_REQUEST);
                }
                Some(coordinate)
            }
            (None, None) => None,
            _ => return Err(StatusCode::BAD_REQUEST),
        };
        Ok(AssetHint {
            coordinate,
            created_at: self.taken_at,
            source_id: None,
        })
    }
}

/// Accepts raw image bytes. 201 with the entry when saved, 204 when the result was discarded.
pub async fn create_entry(
    State(state): State<AppState>,
    Query(query): Query<UploadQuery>,
    body: Bytes,
) -> Result<Response, StatusCode> {
    if body.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    let hint = query.into_hint()?;

    match state.pipeline.resolve(body.to_vec(), Some(hint)).await {
        Ok(Resolution::Saved(entry)) => Ok((StatusCode::CREATED, Json(entry)).into_response()),
        Ok(Resolution::Discarded(reason)) => {
            debug!(%reason, "Upload produced no entry");
            Ok(StatusCode::NO_CONTENT.into_response())
        }
        Err(e) => {
            error!(error = %e, "Failed to save uploaded photo");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FavoriteResponse {
    pub id: Uuid,
    pub is_favorite: bool,
}

pub async fn toggle_favorite(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<FavoriteResponse>, StatusCode> {
    let store = state.store.clone();
    match blocking(move || store.toggle_favorite(id)).await? {
        Some(is_favorite) => Ok(Json(FavoriteResponse { id, is_favorite })),
        None => Err(StatusCode::NOT_FOUND),
    }
}

pub async fn get_image(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Response, StatusCode> {
    let entry = state.store.get(id).ok_or(StatusCode::NOT_FOUND)?;
    let store = state.store.clone();
    let bytes = blocking(move || store.image_bytes(&entry)).await?;

    let mime = image::guess_format(&bytes)
        .map(|format| format.to_mime_type())
        .unwrap_or("application/octet-stream");

    Ok((
        [
            (header::CONTENT_TYPE, mime),
            (header::CACHE_CONTROL, "public, max-age=3600"),
        ],
        bytes,
    )
        .into_response())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DaySummary {
    pub date: NaiveDate,
    pub count: usize,
}

pub async fn list_days(State(state): State<AppState>) -> Json<Vec<DaySummary>> {
    let days = state
        .store
        .day_summaries()
        .into_iter()
        .map(|(date, count)| DaySummary { date, count })
        .collect();
    Json(days)
}

pub async fn get_day(
    State(state): State<AppState>,
    Path(date): Path<NaiveDate>,
) -> Result<Json<Vec<JournalEntry>>, StatusCode> {
    state.store.entries_for_day(date).map(Json).ok_or(StatusCode::NOT_FOUND)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MapView {
    pub pins: Vec<MapPin>,
    pub region: Region,
    /// Set only on the first map request after start; clients move the camera to
    /// `region` then and leave it alone afterwards.
    pub recenter: bool,
    pub all_pins_coincident: bool,
}

pub async fn get_map(State(state): State<AppState>) -> Result<Json<MapView>, StatusCode> {
    let mut projector = state.projector.lock().map_err(|_| {
        error!("Map projector lock poisoned");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    let recenter = !projector.has_set_initial_position();
    let region = projector.initial_region();
    Ok(Json(MapView {
        pins: projector.pins().to_vec(),
        region,
        recenter,
        all_pins_coincident: projector.all_pins_coincident(COINCIDENT_TOLERANCE_DEGREES),
    }))
}

pub async fn get_stats(State(state): State<AppState>) -> Json<ProfileStatistics> {
    Json(state.store.statistics())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileView {
    #[serde(flatten)]
    pub profile: UserProfile,
    pub statistics: ProfileStatistics,
}

pub async fn get_profile(State(state): State<AppState>) -> Json<ProfileView> {
    Json(ProfileView {
        profile: state.store.profile(),
        statistics: state.store.statistics(),
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    pub display_name: String,
    #[serde(default)]
    pub home_country: Option<String>,
}

pub async fn update_profile(
    State(state): State<AppState>,
    Json(update): Json<ProfileUpdate>,
) -> Result<Json<ProfileView>, StatusCode> {
    let display_name = update.display_name.trim().to_string();
    if display_name.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let profile = UserProfile {
        display_name,
        home_country: update
            .home_country
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty()),
        ..state.store.profile()
    };
    let store = state.store.clone();
    let saved = profile.clone();
    blocking(move || store.update_profile(saved)).await?;

    Ok(Json(ProfileView {
        profile,
        statistics: state.store.statistics(),
    }))
}

fn sse_event(event: JournalEvent) -> SseEvent {
    SseEvent::default()
        .json_data(event)
        .unwrap_or_else(|_| SseEvent::default().data("error serializing event"))
}

/// Relays the store's change broadcast as server-sent events, with a periodic heartbeat.
pub async fn journal_events_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let (tx, rx) = mpsc::channel(16);
    let mut changes = state.store.subscribe();

    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                change = changes.recv() => match change {
                    Ok(_) => JournalEvent::Changed,
                    // Missed notifications collapse into one
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Event subscriber lagged");
                        JournalEvent::Changed
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = tokio::time::sleep(HEARTBEAT_INTERVAL) => JournalEvent::Heartbeat,
            };

            if tx.send(Ok(sse_event(event))).await.is_err() {
                break; // client disconnected
            }
        }
    });

    Sse::new(ReceiverStream::new(rx)).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}
