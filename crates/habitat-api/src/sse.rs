//! Server-sent events stream of engine events

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

use crate::AppState;

/// Stream engine events as they happen
pub async fn events(State(state): State<AppState>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut event_rx = state.engine.subscribe();

    let stream = async_stream::stream! {
        yield Ok(Event::default().event("connected").data("{}"));

        loop {
            match event_rx.recv().await {
                Ok(event) => match Event::default().event("engine").json_data(&event) {
                    Ok(sse) => yield Ok(sse),
                    Err(e) => tracing::warn!("Failed to encode event: {}", e),
                },
                Err(RecvError::Lagged(missed)) => {
                    tracing::debug!("SSE client lagged, {} events dropped", missed);
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}
