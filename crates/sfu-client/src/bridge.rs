//! HTTP access to the bridge's Colibri conference API.

use std::time::Duration;

use async_trait::async_trait;
use groupcall_core::{ConferenceDescription, ConferencePatch};
use reqwest::{Client, RequestBuilder, Url};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::BridgeError;

/// Default bound on a single bridge request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Port the bridge serves its REST API on unless configured otherwise.
pub const DEFAULT_BRIDGE_PORT: u16 = 8080;

const CONFERENCES_PATH: &str = "colibri/conferences/";

/// Conference lifecycle calls against a bridge. No call is retried here.
#[async_trait]
pub trait ConferenceApi: Send + Sync {
    async fn list_conferences(&self) -> Result<Vec<ConferenceDescription>, BridgeError>;

    async fn get_conference(&self, id: &str) -> Result<ConferenceDescription, BridgeError>;

    async fn create_conference(&self) -> Result<ConferenceDescription, BridgeError>;

    async fn patch_conference(
        &self,
        id: &str,
        patch: &ConferencePatch,
    ) -> Result<ConferenceDescription, BridgeError>;
}

/// Base URL of a bridge reachable at `host` on the default REST port.
pub fn default_bridge_url(host: &str) -> String {
    format!("http://{host}:{DEFAULT_BRIDGE_PORT}/")
}

#[derive(Debug, Clone)]
pub struct HttpBridgeClient {
    http: Client,
    conferences: Url,
}

impl HttpBridgeClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, BridgeError> {
        let mut base = Url::parse(base_url)
            .map_err(|err| BridgeError::Generic(format!("invalid bridge url '{base_url}': {err}")))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let conferences = base
            .join(CONFERENCES_PATH)
            .map_err(|err| BridgeError::Generic(err.to_string()))?;

        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| BridgeError::Generic(format!("failed to build HTTP client: {err}")))?;

        Ok(Self { http, conferences })
    }

    pub fn conferences_url(&self) -> &Url {
        &self.conferences
    }

    fn conference_url(&self, id: &str) -> Result<Url, BridgeError> {
        self.conferences
            .join(id)
            .map_err(|err| BridgeError::Generic(format!("invalid conference id '{id}': {err}")))
    }

    async fn execute(&self, operation: &'static str, request: RequestBuilder) -> Result<Value, BridgeError> {
        let response = request.send().await.map_err(|err| {
            warn!(operation, error = %err, "bridge request failed");
            if err.is_builder() {
                BridgeError::Generic(err.to_string())
            } else {
                BridgeError::Server(err.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(operation, status = %status, body = %body, "bridge rejected request");
            return Err(BridgeError::Server(format!("{operation} returned {status}")));
        }

        response.json::<Value>().await.map_err(|err| {
            warn!(operation, error = %err, "bridge response was not JSON");
            BridgeError::Network(err.to_string())
        })
    }
}

fn decode_conference(operation: &'static str, value: &Value) -> Result<ConferenceDescription, BridgeError> {
    ConferenceDescription::from_json(value).map_err(|err| {
        warn!(operation, error = %err, "bridge returned an unusable conference");
        BridgeError::Network(err.to_string())
    })
}

#[async_trait]
impl ConferenceApi for HttpBridgeClient {
    async fn list_conferences(&self) -> Result<Vec<ConferenceDescription>, BridgeError> {
        debug!(url = %self.conferences, "listing conferences");
        let value = self
            .execute("list_conferences", self.http.get(self.conferences.clone()))
            .await?;
        ConferenceDescription::parse_list(&value).map_err(|err| {
            warn!(error = %err, "conference list was not an array");
            BridgeError::Network(err.to_string())
        })
    }

    async fn get_conference(&self, id: &str) -> Result<ConferenceDescription, BridgeError> {
        let url = self.conference_url(id)?;
        debug!(conference_id = id, "fetching conference");
        let value = self.execute("get_conference", self.http.get(url)).await?;
        decode_conference("get_conference", &value)
    }

    async fn create_conference(&self) -> Result<ConferenceDescription, BridgeError> {
        debug!(url = %self.conferences, "creating conference");
        let request = self.http.post(self.conferences.clone()).json(&json!({}));
        let value = self.execute("create_conference", request).await?;
        decode_conference("create_conference", &value)
    }

    async fn patch_conference(
        &self,
        id: &str,
        patch: &ConferencePatch,
    ) -> Result<ConferenceDescription, BridgeError> {
        let url = self.conference_url(id)?;
        let body = serde_json::to_value(patch)
            .map_err(|err| BridgeError::Generic(format!("failed to encode patch: {err}")))?;
        debug!(
            conference_id = id,
            channels = patch.contents.iter().map(|c| c.channels.len()).sum::<usize>(),
            "patching conference"
        );
        let value = self
            .execute("patch_conference", self.http.patch(url).json(&body))
            .await?;
        decode_conference("patch_conference", &value)
    }
}
