//! OIDC Login Endpoints
//!
//! - GET /login - set the state cookie and redirect to the IdP
//! - GET /cb    - IdP callback, redirects to the frontend
//! - GET /dump  - redacted token dump (only when enabled on the client)
//!
//! Every callback response that read a state cookie also clears it.
//! Repeated query parameters keep their first value.

use std::sync::Arc;

use axum::{
    extract::{Query, RawQuery, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use axum_extra::extract::cookie::CookieJar;

use crate::client::{CallbackQuery, LoginQuery, OidcClient};
use crate::context::CallContext;
use crate::state::{state_removal_cookie, STATE_COOKIE};

/// Router for one client. Nest it under the client's cookie path.
pub fn auth_router(client: Arc<OidcClient>) -> Router {
    let mut router = Router::new()
        .route("/login", get(login))
        .route("/cb", get(callback));

    if client.token_dump_enabled() {
        router = router.route("/dump", get(dump));
    }

    router.with_state(client)
}

fn redirect(jar: CookieJar, location: String) -> Response {
    (StatusCode::FOUND, jar, [(header::LOCATION, location)]).into_response()
}

/// Raw query pairs in request order.
type QueryPairs = Query<Vec<(String, String)>>;

/// Clear the state cookie if the request carried one.
fn consume_state(client: &OidcClient, jar: CookieJar) -> CookieJar {
    if jar.get(STATE_COOKIE).is_some() {
        jar.remove(state_removal_cookie(client.cookie_path()))
    } else {
        jar
    }
}

async fn login(
    State(client): State<Arc<OidcClient>>,
    Query(pairs): QueryPairs,
    RawQuery(raw_query): RawQuery,
    jar: CookieJar,
) -> Response {
    let query = LoginQuery::from_pairs(&pairs);

    match client.begin_login(query.token.as_deref(), raw_query.as_deref()) {
        Ok(start) => redirect(jar.add(start.cookie), start.location),
        Err(e) => e.into_response(),
    }
}

async fn callback(
    State(client): State<Arc<OidcClient>>,
    Query(pairs): QueryPairs,
    jar: CookieJar,
) -> Response {
    let query = CallbackQuery::from_pairs(&pairs);
    let (ctx, _guard) = CallContext::scoped(client.call_timeout());

    let result = client.complete_login(&query, &jar, &ctx).await;
    let jar = consume_state(&client, jar);

    match result {
        Ok(done) => {
            let jar = done.cookies.into_iter().fold(jar, |jar, cookie| jar.add(cookie));
            redirect(jar, done.location)
        }
        Err(e) => (jar, e).into_response(),
    }
}

async fn dump(
    State(client): State<Arc<OidcClient>>,
    Query(pairs): QueryPairs,
    jar: CookieJar,
) -> Response {
    let query = CallbackQuery::from_pairs(&pairs);
    let (ctx, _guard) = CallContext::scoped(client.call_timeout());

    let result = client
        .authenticate_callback(&query, &jar, &ctx)
        .await
        .and_then(|login| client.dump_token(&login));
    let jar = consume_state(&client, jar);

    match result {
        Ok(body) => (
            StatusCode::OK,
            jar,
            [(header::CONTENT_TYPE, "application/json")],
            body,
        )
            .into_response(),
        Err(e) => (jar, e).into_response(),
    }
}
