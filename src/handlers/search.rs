use super::{HandlerError, HandlerOutcome};
use crate::models::search::SearchRequest;

/// No query engine is wired in yet; every search finishes unsuccessfully
/// with no data.
pub async fn handle(request: &SearchRequest) -> Result<HandlerOutcome, HandlerError> {
    tracing::debug!(query = %request.query, "No search backend configured");
    Ok(HandlerOutcome::failure())
}
