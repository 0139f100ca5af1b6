// =============================================================================
// Subscription request and feed URL
// =============================================================================

use serde::Serialize;
use url::Url;

use crate::error::FeedError;
use crate::runtime_config::Credentials;

/// Request code that subscribes instruments to ticker packets.
pub const SUBSCRIBE_TICKER: u16 = 15;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Instrument {
    pub exchange_segment: String,
    pub security_id: String,
}

/// JSON text frame sent once per connection, right after the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SubscriptionRequest {
    pub request_code: u16,
    pub instrument_count: usize,
    pub instrument_list: Vec<Instrument>,
}

impl SubscriptionRequest {
    pub fn ticker(exchange_segment: impl Into<String>, security_id: impl Into<String>) -> Self {
        Self {
            request_code: SUBSCRIBE_TICKER,
            instrument_count: 1,
            instrument_list: vec![Instrument {
                exchange_segment: exchange_segment.into(),
                security_id: security_id.into(),
            }],
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Feed endpoint with version, credentials and auth type as query parameters.
pub fn feed_url(
    endpoint: &str,
    protocol_version: u8,
    auth_type: u8,
    credentials: &Credentials,
) -> Result<Url, FeedError> {
    let url = Url::parse_with_params(
        endpoint,
        &[
            ("version", protocol_version.to_string()),
            ("token", credentials.access_token.clone()),
            ("clientId", credentials.client_id.clone()),
            ("authType", auth_type.to_string()),
        ],
    )?;
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscription_json_shape() {
        let req = SubscriptionRequest::ticker("NSE_EQ", "1333");
        let value: serde_json::Value = serde_json::from_str(&req.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "RequestCode": 15,
                "InstrumentCount": 1,
                "InstrumentList": [
                    { "ExchangeSegment": "NSE_EQ", "SecurityId": "1333" }
                ]
            })
        );
    }

    #[test]
    fn feed_url_carries_credentials() {
        let creds = Credentials {
            access_token: "tok en".into(),
            client_id: "C42".into(),
        };
        let url = feed_url("wss://api-feed.dhan.co", 2, 2, &creds).unwrap();
        assert_eq!(url.scheme(), "wss");
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("version".into(), "2".into()),
                ("token".into(), "tok en".into()),
                ("clientId".into(), "C42".into()),
                ("authType".into(), "2".into()),
            ]
        );
    }

    #[test]
    fn malformed_endpoint_is_rejected() {
        let creds = Credentials {
            access_token: "t".into(),
            client_id: "c".into(),
        };
        assert!(matches!(
            feed_url("not a url", 2, 2, &creds),
            Err(FeedError::InvalidEndpoint(_))
        ));
    }
}
