use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};

use crate::state::AppState;

pub(crate) mod dto;
pub(crate) mod handlers;
pub mod repo;
pub mod services;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/users/register",
            post(handlers::register).layer(DefaultBodyLimit::max(20 * 1024 * 1024)),
        )
        .route("/users/login", post(handlers::login))
        .route("/users/refresh-token", post(handlers::refresh))
        .route("/users", get(handlers::list_users))
        .route("/users/current", get(handlers::current_user))
        .route("/users/logout", post(handlers::logout))
        .route("/users/change-password", post(handlers::change_password))
        .route("/users/:id", get(handlers::get_user))
}
