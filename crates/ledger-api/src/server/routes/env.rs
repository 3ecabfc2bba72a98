async fn env_check(State(state): State<AppState>) -> Result<Json<EnvReport>, HttpApiError> {
    state
        .service
        .env_report()
        .cloned()
        .map(Json)
        .ok_or_else(|| {
            HttpApiError::internal(
                ErrorCode::InternalError,
                "configuration report unavailable",
                None,
            )
        })
}
