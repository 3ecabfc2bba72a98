async fn get_leaderboard(
    State(state): State<AppState>,
) -> Result<Json<LeaderboardResponse>, HttpApiError> {
    let response = state
        .service
        .leaderboard()
        .await
        .map_err(HttpApiError::from_service)?;
    Ok(Json(response))
}
