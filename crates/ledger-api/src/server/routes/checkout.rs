async fn create_checkout(
    State(state): State<AppState>,
    payload: Result<Json<CheckoutRequest>, JsonRejection>,
) -> Result<Json<CheckoutResponse>, HttpApiError> {
    let Json(request) = payload.map_err(HttpApiError::invalid_body)?;
    let response = state
        .service
        .create_checkout(&request)
        .await
        .map_err(HttpApiError::from_service)?;
    Ok(Json(response))
}
