use anyhow::{Context, Result};
use reqwest::{cookie::Jar, header, Client, Url};
use std::fs;
use std::sync::Arc;

/// Creates an HTTP client that presents itself like a desktop browser, with
/// an optional shared cookie jar.
pub fn create_http_client_with_cookies(user_agent: &str, cookie_jar: Option<Arc<Jar>>) -> Result<Client> {
    let mut headers = header::HeaderMap::new();

    headers.insert(
        header::ACCEPT,
        header::HeaderValue::from_static("text/html,application/xhtml+xml,application/json;q=0.9,*/*;q=0.8")
    );
    headers.insert(
        header::ACCEPT_LANGUAGE,
        header::HeaderValue::from_static("en-US,en;q=0.9")
    );
    headers.insert(
        header::DNT,
        header::HeaderValue::from_static("1")
    );
    headers.insert(
        "Upgrade-Insecure-Requests",
        header::HeaderValue::from_static("1")
    );
    headers.insert(
        "Sec-Fetch-Dest",
        header::HeaderValue::from_static("document")
    );
    headers.insert(
        "Sec-Fetch-Mode",
        header::HeaderValue::from_static("navigate")
    );

    let mut builder = Client::builder()
        .user_agent(user_agent)
        .default_headers(headers)
        .timeout(std::time::Duration::from_secs(30));

    if let Some(jar) = cookie_jar {
        builder = builder.cookie_provider(jar);
    } else {
        builder = builder.cookie_store(true);
    }

    Ok(builder.build()?)
}

/// Load cookies exported from a browser (array of objects with `name`,
/// `value` and `domain`) into `jar`. Returns how many were loaded.
///
/// Cookies whose domain matches none of `urls` are skipped.
pub fn load_cookies_from_file(jar: &Jar, path: &str, urls: &[String]) -> Result<usize> {
    let cookie_data = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path))?;
    let cookies: Vec<serde_json::Value> =
        serde_json::from_str(&cookie_data).context("Cookie file is not a JSON array")?;

    let targets: Vec<Url> = urls.iter().filter_map(|u| u.parse::<Url>().ok()).collect();

    let mut loaded_count = 0;
    for cookie in &cookies {
        let (Some(name), Some(value)) = (
            cookie.get("name").and_then(|v| v.as_str()),
            cookie.get("value").and_then(|v| v.as_str()),
        ) else {
            continue;
        };
        let domain = cookie
            .get("domain")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .trim_start_matches('.');

        for url in targets.iter().filter(|u| cookie_applies(u, domain)) {
            jar.add_cookie_str(&format!("{}={}", name, value), url);
            tracing::debug!("Loaded cookie {} for {}", name, url);
            loaded_count += 1;
        }
    }

    tracing::info!("Loaded {} cookies from {}", loaded_count, path);
    Ok(loaded_count)
}

fn cookie_applies(url: &Url, domain: &str) -> bool {
    match url.host_str() {
        Some(host) => domain.is_empty() || host == domain || host.ends_with(&format!(".{}", domain)),
        None => false,
    }
}
