#[derive(Clone)]
struct AppState {
    service: Arc<LeaderboardService>,
}

impl AppState {
    fn new(service: Arc<LeaderboardService>) -> Self {
        Self { service }
    }
}
