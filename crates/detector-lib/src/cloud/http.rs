//! Bearer-token JSON requests shared by the provider connectors

use super::ConnectorResult;
use crate::error::ConnectorError;
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use url::Url;

/// Send an authenticated request and decode a JSON body.
///
/// 401 and 403 become `Authentication`, any other non-2xx status `Api`.
pub(super) async fn send_json<T: DeserializeOwned>(
    request: RequestBuilder,
    access_token: &str,
) -> ConnectorResult<T> {
    let response = request.bearer_auth(access_token).send().await?;

    let status = response.status();
    let body = response.text().await?;

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(ConnectorError::Authentication {
            status: status.as_u16(),
            message: body,
        });
    }
    if !status.is_success() {
        return Err(ConnectorError::Api {
            status: status.as_u16(),
            body,
        });
    }

    serde_json::from_str(&body).map_err(|e| ConnectorError::Decode(e.to_string()))
}

/// Parse a base URL so relative API paths join below it
pub(super) fn base_url(raw: &str) -> ConnectorResult<Url> {
    let mut url = Url::parse(raw)?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_gets_trailing_slash() {
        let url = base_url("http://127.0.0.1:8080/mock").unwrap();
        assert_eq!(url.join("v3/x").unwrap().as_str(), "http://127.0.0.1:8080/mock/v3/x");
        assert!(base_url("not a url").is_err());
    }
}
