use axum::response::IntoResponse;

// axum handler for the bare root, mainly for load balancer probes
pub async fn root() -> impl IntoResponse {
    concat!(env!("CARGO_PKG_NAME"), " ", env!("CARGO_PKG_VERSION"))
}

#[cfg(test)]
mod tests {
    use super::root;
    use axum::{http::StatusCode, response::IntoResponse};

    #[tokio::test]
    async fn root_is_ok() {
        let response = root().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
