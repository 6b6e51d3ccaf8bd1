// ABOUTME: IBM Cloud IAM API-key to bearer-token exchange for object store access
// ABOUTME: Produces the Authorization and service-instance headers sent with every store request

use super::StoreError;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::Deserialize;
use std::time::Duration;

const APIKEY_GRANT_TYPE: &str = "urn:ibm:params:oauth:grant-type:apikey";
const SERVICE_INSTANCE_HEADER: &str = "ibm-service-instance-id";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// A bearer token and how long IAM said it stays valid
pub struct AccessToken {
    pub value: String,
    /// `None` when the response carried no `expires_in`
    pub lifetime: Option<Duration>,
}

/// Exchange an IAM API key for an access token
///
/// Posts the API key to `iam_endpoint` using the API-key grant type and
/// returns the bearer token from the response with its lifetime.
///
/// # Errors
///
/// Returns [`StoreError::Auth`] when the endpoint rejects the key or answers
/// with an unexpected body, and [`StoreError::Unavailable`] when the endpoint
/// cannot be reached.
pub async fn fetch_access_token(
    iam_endpoint: &str,
    api_key: &str,
    timeout: Duration,
) -> Result<AccessToken, StoreError> {
    tracing::debug!("Requesting IAM access token from {}", iam_endpoint);

    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| StoreError::Unavailable(format!("failed to build HTTP client: {}", e)))?;

    let response = client
        .post(iam_endpoint)
        .header("Accept", "application/json")
        .form(&[("grant_type", APIKEY_GRANT_TYPE), ("apikey", api_key)])
        .send()
        .await
        .map_err(|e| {
            StoreError::Unavailable(format!("IAM endpoint {} unreachable: {}", iam_endpoint, e))
        })?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable response body>".to_string());
        return Err(match status.as_u16() {
            400 | 401 | 403 => StoreError::Auth(format!(
                "IAM rejected the API key (status {}): {}",
                status, body
            )),
            _ => StoreError::Unavailable(format!(
                "IAM token request failed (status {}): {}",
                status, body
            )),
        });
    }

    let token: TokenResponse = response
        .json()
        .await
        .map_err(|e| StoreError::Auth(format!("unexpected IAM token response: {}", e)))?;

    if let Some(expires_in) = token.expires_in {
        tracing::debug!("IAM access token valid for {}s", expires_in);
    }

    Ok(AccessToken {
        value: token.access_token,
        lifetime: token.expires_in.map(Duration::from_secs),
    })
}

/// Build the default headers that authenticate unsigned store requests
pub fn bearer_headers(
    access_token: &str,
    service_instance_id: &str,
) -> Result<HeaderMap, StoreError> {
    let mut headers = HeaderMap::new();

    let mut authorization = HeaderValue::from_str(&format!("Bearer {}", access_token))
        .map_err(|_| StoreError::Auth("IAM access token is not a valid header value".into()))?;
    authorization.set_sensitive(true);
    headers.insert(AUTHORIZATION, authorization);

    let instance = HeaderValue::from_str(service_instance_id).map_err(|_| {
        StoreError::Auth("service instance id is not a valid header value".into())
    })?;
    headers.insert(SERVICE_INSTANCE_HEADER, instance);

    Ok(headers)
}
