async fn update_decoration(
    State(state): State<AppState>,
    payload: Result<Json<DecorationUpdateRequest>, JsonRejection>,
) -> Result<Json<DecorationUpdateResponse>, HttpApiError> {
    let Json(request) = payload.map_err(HttpApiError::invalid_body)?;
    let response = state
        .service
        .update_decoration(request)
        .await
        .map_err(HttpApiError::from_service)?;
    Ok(Json(response))
}
