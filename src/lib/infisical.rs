//! [`SecretStore`] backed by the Infisical HTTP API.
//!
//! Authentication uses a Universal Auth machine identity. The login happens
//! on the first request and its access token is reused for the lifetime of the
//! client.

use reqwest::{
  Method, StatusCode, Url,
  blocking::{Client, RequestBuilder, Response},
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
#[cfg(feature = "tracing")]
use tracing::{debug, trace};

use crate::store::{Scope, Secret, SecretStore, StoreError};

pub const DEFAULT_URL: &str = "https://app.infisical.com";
pub const DEFAULT_ENVIRONMENT: &str = "dev";
pub const DEFAULT_SECRET_PATH: &str = "/";

const LOGIN_ENDPOINT: &str = "/api/v1/auth/universal-auth/login";
const SECRETS_ENDPOINT: &str = "/api/v3/secrets/raw";
const SECRET_TYPE: &str = "shared";

/// Connection settings for [`InfisicalClient`].
#[derive(Debug)]
pub struct InfisicalConfig {
  /// Server URL, cloud or self-hosted
  pub url: String,
  pub client_id: String,
  pub client_secret: SecretString,
  /// Project (workspace) the secrets belong to
  pub project_id: String,
  /// Environment slug used when a call's [`Scope`] does not name one
  pub environment: String,
  /// Folder used when a call's [`Scope`] does not name one
  pub secret_path: String,
}

impl InfisicalConfig {
  pub fn new(
    client_id: impl Into<String>,
    client_secret: impl Into<String>,
    project_id: impl Into<String>,
  ) -> Self {
    Self {
      url: DEFAULT_URL.to_string(),
      client_id: client_id.into(),
      client_secret: SecretString::from(client_secret.into()),
      project_id: project_id.into(),
      environment: DEFAULT_ENVIRONMENT.to_string(),
      secret_path: DEFAULT_SECRET_PATH.to_string(),
    }
  }
}

pub struct InfisicalClient {
  config: InfisicalConfig,
  http: Client,
  access_token: Option<SecretString>,
}

impl InfisicalClient {
  pub fn new(config: InfisicalConfig) -> Self {
    Self::with_http_client(config, Client::new())
  }

  pub fn with_http_client(config: InfisicalConfig, http: Client) -> Self {
    Self {
      config,
      http,
      access_token: None,
    }
  }

  pub fn config(&self) -> &InfisicalConfig {
    &self.config
  }

  pub fn is_authenticated(&self) -> bool {
    self.access_token.is_some()
  }

  fn endpoint(&self, suffix: &str) -> String {
    format!("{}{}", self.config.url.trim_end_matches('/'), suffix)
  }

  fn secrets_url(&self) -> Result<Url, StoreError> {
    let endpoint = self.endpoint(SECRETS_ENDPOINT);
    Url::parse(&endpoint).map_err(|_| StoreError::InvalidUrl(endpoint))
  }

  /// Secrets endpoint with `key` appended as one percent-encoded path segment.
  fn secret_url(&self, key: &str) -> Result<Url, StoreError> {
    let mut url = self.secrets_url()?;
    url
      .path_segments_mut()
      .map_err(|_| StoreError::InvalidUrl(self.config.url.clone()))?
      .push(key);
    Ok(url)
  }

  fn authenticate(&mut self) -> Result<&SecretString, StoreError> {
    if self.access_token.is_none() {
      #[cfg(feature = "tracing")]
      debug!(url = %self.config.url, "Logging in with universal auth");

      let response = self
        .http
        .post(self.endpoint(LOGIN_ENDPOINT))
        .json(&LoginRequest {
          client_id: &self.config.client_id,
          client_secret: self.config.client_secret.expose_secret(),
        })
        .send()?;

      if !response.status().is_success() {
        return Err(StoreError::Authentication(error_message(response)));
      }

      let login: LoginResponse = response.json()?;
      self.access_token = Some(SecretString::from(login.access_token));
    }

    self
      .access_token
      .as_ref()
      .ok_or_else(|| StoreError::Authentication("no access token".to_string()))
  }

  fn request(&mut self, method: Method, url: Url) -> Result<RequestBuilder, StoreError> {
    let token = self.authenticate()?.expose_secret().to_string();

    #[cfg(feature = "tracing")]
    trace!(%method, %url, "Infisical request");

    Ok(self.http.request(method, url).bearer_auth(token))
  }

  fn target<'a>(&'a self, scope: &'a Scope) -> Target<'a> {
    Target {
      workspace_id: &self.config.project_id,
      environment: scope
        .environment
        .as_deref()
        .unwrap_or(&self.config.environment),
      secret_path: scope.path.as_deref().unwrap_or(&self.config.secret_path),
      kind: SECRET_TYPE,
    }
  }

  fn write_secret(
    &mut self,
    method: Method,
    key: &str,
    value: &str,
    scope: &Scope,
  ) -> Result<(), StoreError> {
    let url = self.secret_url(key)?;
    let request = self.request(method, url)?;
    let body = WriteRequest {
      target: self.target(scope),
      secret_value: value,
    };
    check(request.json(&body).send()?, key)?;
    Ok(())
  }
}

impl SecretStore for InfisicalClient {
  fn list(&mut self, scope: &Scope) -> Result<Vec<Secret>, StoreError> {
    let url = self.secrets_url()?;
    let request = self.request(Method::GET, url)?;
    let response = check(request.query(&self.target(scope)).send()?, "")?;

    let listing: ListResponse = response.json()?;

    #[cfg(feature = "tracing")]
    debug!(count = listing.secrets.len(), "Listed remote secrets");

    Ok(listing.secrets.into_iter().map(Secret::from).collect())
  }

  fn get(&mut self, key: &str, scope: &Scope) -> Result<Option<Secret>, StoreError> {
    let url = self.secret_url(key)?;
    let request = self.request(Method::GET, url)?;

    match check(request.query(&self.target(scope)).send()?, key) {
      Ok(response) => Ok(Some(response.json::<GetResponse>()?.secret.into())),
      Err(StoreError::NotFound(_)) => Ok(None),
      Err(err) => Err(err),
    }
  }

  fn create(&mut self, key: &str, value: &str, scope: &Scope) -> Result<(), StoreError> {
    #[cfg(feature = "tracing")]
    debug!(key, "Creating remote secret");

    match self.write_secret(Method::POST, key, value, scope) {
      Err(StoreError::Api { status, message })
        if (status == 400 || status == 409) && message.to_lowercase().contains("already exist") =>
      {
        Err(StoreError::AlreadyExists(key.to_string()))
      }
      result => result,
    }
  }

  fn update(&mut self, key: &str, value: &str, scope: &Scope) -> Result<(), StoreError> {
    #[cfg(feature = "tracing")]
    debug!(key, "Updating remote secret");

    self.write_secret(Method::PATCH, key, value, scope)
  }

  fn delete(&mut self, key: &str, scope: &Scope) -> Result<(), StoreError> {
    #[cfg(feature = "tracing")]
    debug!(key, "Deleting remote secret");

    let url = self.secret_url(key)?;
    let request = self.request(Method::DELETE, url)?;
    check(request.json(&self.target(scope)).send()?, key)?;
    Ok(())
  }
}

fn check(response: Response, key: &str) -> Result<Response, StoreError> {
  let status = response.status();
  if status.is_success() {
    return Ok(response);
  }

  match status {
    StatusCode::NOT_FOUND if !key.is_empty() => Err(StoreError::NotFound(key.to_string())),
    StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
      Err(StoreError::Authentication(error_message(response)))
    }
    _ => Err(StoreError::Api {
      status: status.as_u16(),
      message: error_message(response),
    }),
  }
}

fn error_message(response: Response) -> String {
  let status = response.status();
  response
    .json::<ErrorResponse>()
    .ok()
    .and_then(|body| body.message)
    .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown error").to_string())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LoginRequest<'a> {
  client_id: &'a str,
  client_secret: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
  access_token: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Target<'a> {
  workspace_id: &'a str,
  environment: &'a str,
  secret_path: &'a str,
  #[serde(rename = "type")]
  kind: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WriteRequest<'a> {
  #[serde(flatten)]
  target: Target<'a>,
  secret_value: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSecret {
  secret_key: String,
  secret_value: String,
}

impl From<RawSecret> for Secret {
  fn from(raw: RawSecret) -> Self {
    Secret::new(raw.secret_key, raw.secret_value)
  }
}

#[derive(Deserialize)]
struct ListResponse {
  secrets: Vec<RawSecret>,
}

#[derive(Deserialize)]
struct GetResponse {
  secret: RawSecret,
}

#[derive(Deserialize)]
struct ErrorResponse {
  message: Option<String>,
}
