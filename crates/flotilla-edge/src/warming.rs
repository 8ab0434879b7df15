//! Warming-page helpers: request classification and the self-refreshing
//! HTML served to browsers while a container wakes.

use axum::http::HeaderMap;

/// Decide whether a request is a browser navigation.
///
/// Judged by the fetch-metadata signals: an explicit `Sec-Fetch-Mode`
/// decides outright; otherwise `Sec-Fetch-Dest: document` counts; with
/// neither signal present the request defaults to a navigation (older
/// browsers send none).
pub fn is_browser_navigation(headers: &HeaderMap) -> bool {
    let mode = headers.get("sec-fetch-mode").and_then(|v| v.to_str().ok());
    let dest = headers.get("sec-fetch-dest").and_then(|v| v.to_str().ok());
    match (mode, dest) {
        (Some(mode), _) => mode.eq_ignore_ascii_case("navigate"),
        (None, Some(dest)) => dest.eq_ignore_ascii_case("document"),
        (None, None) => true,
    }
}

/// Whether the client accepts an HTML response.
pub fn accepts_html(headers: &HeaderMap) -> bool {
    match headers.get("accept").and_then(|v| v.to_str().ok()) {
        Some(accept) => accept.contains("text/html") || accept.contains("*/*"),
        None => true,
    }
}

/// Sanitize the path the warming page redirects back to. It must start
/// with `/` and contain no CR/LF; anything else falls back to `/`.
pub fn sanitize_redirect_path(path: Option<&str>) -> String {
    match path {
        Some(p) if p.starts_with('/') && !p.contains('\r') && !p.contains('\n') => p.to_string(),
        _ => "/".to_string(),
    }
}

/// The self-refreshing 503 page served to browser navigations.
///
/// Refreshes via `<meta http-equiv="refresh">` at the retry interval and
/// additionally redirects back to the original path via a timed script
/// after `max(1000, retry_after * 1000)` ms.
pub fn warming_page(redirect_path: &str, retry_after_seconds: u32) -> String {
    let delay_ms = (u64::from(retry_after_seconds) * 1000).max(1000);
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <meta http-equiv="refresh" content="{retry_after_seconds}">
  <title>Waking up&hellip;</title>
  <style>
    body {{ font-family: system-ui, sans-serif; display: flex; align-items: center;
           justify-content: center; min-height: 100vh; margin: 0; background: #0f1117; color: #e6e6e6; }}
    .card {{ text-align: center; }}
    .spinner {{ width: 2.5rem; height: 2.5rem; margin: 0 auto 1rem;
               border: 3px solid #2d313d; border-top-color: #7aa2f7; border-radius: 50%;
               animation: spin 0.9s linear infinite; }}
    @keyframes spin {{ to {{ transform: rotate(360deg); }} }}
  </style>
</head>
<body>
  <div class="card">
    <div class="spinner"></div>
    <h1>Your app is waking up</h1>
    <p>This page refreshes automatically.</p>
  </div>
  <script>
    setTimeout(function () {{ window.location.replace({path_json}); }}, {delay_ms});
  </script>
</body>
</html>
"#,
        path_json = serde_json::to_string(redirect_path).unwrap_or_else(|_| "\"/\"".to_string()),
    )
}
