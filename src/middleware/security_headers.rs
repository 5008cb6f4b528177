//! Security headers middleware
//!
//! Adds security headers to all responses. Tuned for a JSON API with no
//! browser UI: the content-security-policy denies everything and responses
//! carrying tokens or key material must never be cached.

use axum::{body::Body, http::Request, middleware::Next, response::Response};

/// Middleware that adds security headers to all responses
pub async fn security_headers_middleware(request: Request<Body>, next: Next) -> Response {
    let mut response = next.run(request).await;

    let headers = response.headers_mut();

    // Strict-Transport-Security (HSTS)
    // max-age=31536000 = 1 year, includeSubDomains applies to all subdomains
    headers.insert(
        "Strict-Transport-Security",
        "max-age=31536000; includeSubDomains".parse().unwrap(),
    );

    // Prevents MIME-sniffing a response away from the declared content-type
    headers.insert("X-Content-Type-Options", "nosniff".parse().unwrap());

    // No part of this service is meant to render in a frame
    headers.insert("X-Frame-Options", "DENY".parse().unwrap());

    // Controls how much referrer information is included with requests
    headers.insert(
        "Referrer-Policy",
        "strict-origin-when-cross-origin".parse().unwrap(),
    );

    // Pure JSON API: nothing may load anything
    headers.insert(
        "Content-Security-Policy",
        "default-src 'none'; frame-ancestors 'none'".parse().unwrap(),
    );

    response
}

/// Cache control for API responses
///
/// Login tokens, exchange tokens, and one-time raw keys must never land in a
/// shared cache.
pub async fn api_cache_control_middleware(request: Request<Body>, next: Next) -> Response {
    let mut response = next.run(request).await;

    let headers = response.headers_mut();

    headers.insert(
        "Cache-Control",
        "no-store, no-cache, must-revalidate, private".parse().unwrap(),
    );
    headers.insert("Pragma", "no-cache".parse().unwrap());
    headers.insert("Expires", "0".parse().unwrap());

    response
}
