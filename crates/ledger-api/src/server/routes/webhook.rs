async fn receive_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, HttpApiError> {
    let outcome = state
        .service
        .handle_notification(&body, signature_header(&headers))
        .await
        .map_err(HttpApiError::from_service)?;

    match outcome {
        NotificationOutcome::Applied(applied) => info!(
            disposition = applied.disposition.as_str(),
            is_leader = applied.is_leader,
            "notification acknowledged"
        ),
        NotificationOutcome::Ignored { event_type } => {
            info!(event_type = event_type.as_str(), "notification acknowledged")
        }
        NotificationOutcome::Rejected { .. } => {
            info!("notification acknowledged without ledger change")
        }
    }

    Ok(Json(WebhookAck::received()))
}
